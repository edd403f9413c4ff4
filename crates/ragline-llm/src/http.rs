//! Shared HTTP plumbing: status/transport error mapping and a line splitter
//! over a streamed response body (NDJSON and SSE are both line framed).

use futures::stream::{self, BoxStream, Stream, StreamExt};
use ragline_core::GenerationError;
use reqwest::header::RETRY_AFTER;
use reqwest::{Response, StatusCode};

pub(crate) fn map_transport_error(e: reqwest::Error) -> GenerationError {
    if e.is_timeout() {
        GenerationError::Timeout(e.to_string())
    } else if e.is_decode() {
        GenerationError::ResponseParse(e.to_string())
    } else {
        GenerationError::Provider(e.to_string())
    }
}

pub(crate) fn map_http_error(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: &str,
    provider: &str,
) -> GenerationError {
    match status.as_u16() {
        429 => GenerationError::RateLimited { retry_after_secs },
        408 | 504 => GenerationError::Timeout(format!("HTTP {status} from {provider}")),
        _ => GenerationError::Provider(format!("HTTP {status} from {provider}: {body}")),
    }
}

/// Returns the response unchanged on 2xx, otherwise the mapped error.
pub(crate) async fn check_status(resp: Response, provider: &str) -> Result<Response, GenerationError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let retry_after = resp
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok());
    let body = resp.text().await.unwrap_or_default();
    tracing::warn!(provider, %status, "generation request rejected");
    Err(map_http_error(status, retry_after, &body, provider))
}

struct LineState<S> {
    body: S,
    buf: Vec<u8>,
    done: bool,
}

/// Splits a byte stream into trimmed lines. Bytes are buffered until a full
/// line is available so multi-byte characters split across chunks survive.
/// A transport error is yielded once and ends the stream.
pub(crate) fn lines<S, B, E>(body: S) -> BoxStream<'static, Result<String, GenerationError>>
where
    S: Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    let state = LineState { body: Box::pin(body), buf: Vec::new(), done: false };
    stream::unfold(state, |mut st| async move {
        loop {
            if let Some(pos) = st.buf.iter().position(|b| *b == b'\n') {
                let line: Vec<u8> = st.buf.drain(..=pos).collect();
                return Some((Ok(String::from_utf8_lossy(&line).trim().to_string()), st));
            }
            if st.done {
                if st.buf.is_empty() {
                    return None;
                }
                let rest = std::mem::take(&mut st.buf);
                return Some((Ok(String::from_utf8_lossy(&rest).trim().to_string()), st));
            }
            match st.body.next().await {
                Some(Ok(chunk)) => st.buf.extend_from_slice(chunk.as_ref()),
                Some(Err(e)) => {
                    st.done = true;
                    st.buf.clear();
                    return Some((Err(GenerationError::Streaming(e.to_string())), st));
                }
                None => st.done = true,
            }
        }
    })
    .boxed()
}

/// One parsed server-sent event line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum SseEvent {
    Delta(String),
    Done,
    Skip,
}

/// Rough token count when the provider reports none.
pub(crate) fn estimate_tokens(text: &str) -> u32 {
    u32::try_from(text.split_whitespace().count()).unwrap_or(u32::MAX)
}
