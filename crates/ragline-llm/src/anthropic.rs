use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use ragline_core::{
    Completion, GenerationClient, GenerationError, GenerationParams, PromptMessage, Role, TextStream,
    TokenUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{check_status, lines, map_transport_error, SseEvent};

pub const ANTHROPIC_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
/// The Messages API requires `max_tokens`.
pub const DEFAULT_MAX_TOKENS: u32 = 1024;

/// Client for the Anthropic Messages API (`POST {base}/v1/messages`).
/// System messages travel in the top-level `system` field.
pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[derive(Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    messages: Vec<&'a PromptMessage>,
    max_tokens: u32,
    temperature: f32,
    stream: bool,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ContentBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

/// Parses one SSE line of a Messages stream. Only text deltas carry content;
/// `message_stop` ends the stream and `error` events fail it.
pub(crate) fn parse_event_line(line: &str) -> Result<SseEvent, GenerationError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let json: Value = serde_json::from_str(data.trim()).map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
    match json["type"].as_str() {
        Some("content_block_delta") => match json["delta"]["text"].as_str() {
            Some(text) if !text.is_empty() => Ok(SseEvent::Delta(text.to_string())),
            _ => Ok(SseEvent::Skip),
        },
        Some("message_stop") => Ok(SseEvent::Done),
        Some("error") => {
            let message = json["error"]["message"].as_str().unwrap_or("unknown streaming error");
            Err(GenerationError::Streaming(message.to_string()))
        }
        _ => Ok(SseEvent::Skip),
    }
}

impl AnthropicClient {
    pub fn new(
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: Option<&str>,
        timeout: Duration,
    ) -> Result<Self, GenerationError> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(GenerationError::InvalidConfig("API key is required".into()));
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or(ANTHROPIC_BASE_URL).trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
        })
    }

    async fn send(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let (system, turns): (Vec<_>, Vec<_>) = messages.iter().partition(|m| m.role == Role::System);
        let system = (!system.is_empty())
            .then(|| system.iter().map(|m| m.content.as_str()).collect::<Vec<_>>().join("\n\n"));
        let body = MessagesRequest {
            model: &self.model,
            system,
            messages: turns,
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: params.temperature,
            stream,
        };
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(resp, "anthropic").await
    }
}

#[async_trait]
impl GenerationClient for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<Completion, GenerationError> {
        let resp = self.send(messages, params, false).await?;
        let data: MessagesResponse =
            resp.json().await.map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
        let content = data
            .content
            .into_iter()
            .filter(|block| block.kind == "text")
            .filter_map(|block| block.text)
            .collect::<Vec<_>>()
            .join(" ");
        let usage = data.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.input_tokens.saturating_add(u.output_tokens),
        });
        Ok(Completion {
            content,
            model: data.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: data.stop_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<TextStream, GenerationError> {
        let resp = self.send(messages, params, true).await?;
        let stream = lines(resp.bytes_stream())
            .and_then(|line| future::ready(parse_event_line(&line)))
            .try_take_while(|event| future::ready(Ok(*event != SseEvent::Done)))
            .try_filter_map(|event| {
                future::ready(Ok(match event {
                    SseEvent::Delta(text) => Some(text),
                    SseEvent::Done | SseEvent::Skip => None,
                }))
            });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_lines() {
        assert_eq!(
            parse_event_line(
                r#"data: {"type":"content_block_delta","index":0,"delta":{"type":"text_delta","text":"Hel"}}"#
            )
            .unwrap(),
            SseEvent::Delta("Hel".into())
        );
        assert_eq!(parse_event_line("event: content_block_delta").unwrap(), SseEvent::Skip);
        assert_eq!(parse_event_line(r#"data: {"type":"ping"}"#).unwrap(), SseEvent::Skip);
        assert_eq!(
            parse_event_line(r#"data: {"type":"message_start","message":{"id":"msg_1"}}"#).unwrap(),
            SseEvent::Skip
        );
        assert_eq!(parse_event_line(r#"data: {"type":"message_stop"}"#).unwrap(), SseEvent::Done);
        assert!(matches!(
            parse_event_line(r#"data: {"type":"error","error":{"type":"overloaded_error","message":"Overloaded"}}"#),
            Err(GenerationError::Streaming(ref m)) if m == "Overloaded"
        ));
        assert!(matches!(parse_event_line("data: {not json"), Err(GenerationError::ResponseParse(_))));
    }

    #[test]
    fn empty_api_key_is_rejected() {
        let err = AnthropicClient::new("claude-3-haiku-20240307", "", None, Duration::from_secs(5));
        assert!(matches!(err, Err(GenerationError::InvalidConfig(_))));
    }
}
