use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use ragline_core::{
    Completion, GenerationClient, GenerationError, GenerationParams, PromptMessage, TextStream,
    TokenUsage,
};
use serde::{Deserialize, Serialize};

use crate::http::{check_status, estimate_tokens, lines, map_transport_error};

pub const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Chat client for a local Ollama server (`POST /api/chat`, NDJSON stream).
pub struct OllamaClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    stream: bool,
    options: ChatOptions,
}

#[derive(Serialize)]
struct ChatOptions {
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    num_predict: Option<u32>,
}

#[derive(Deserialize, Default)]
struct ChatMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    message: Option<ChatMessage>,
    #[serde(default)]
    done: bool,
    #[serde(default)]
    done_reason: Option<String>,
    #[serde(default)]
    prompt_eval_count: Option<u32>,
    #[serde(default)]
    eval_count: Option<u32>,
    #[serde(default)]
    error: Option<String>,
}

/// One NDJSON line of a streamed chat.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum ChatEvent {
    Text(String),
    Done,
    Skip,
}

pub(crate) fn parse_ndjson_line(line: &str) -> Result<ChatEvent, GenerationError> {
    if line.is_empty() {
        return Ok(ChatEvent::Skip);
    }
    let chunk: ChatResponse =
        serde_json::from_str(line).map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
    if let Some(error) = chunk.error {
        return Err(GenerationError::Streaming(error));
    }
    let text = chunk.message.map(|m| m.content).unwrap_or_default();
    if !text.is_empty() {
        return Ok(ChatEvent::Text(text));
    }
    Ok(if chunk.done { ChatEvent::Done } else { ChatEvent::Skip })
}

impl OllamaClient {
    pub fn new(model: impl Into<String>, base_url: Option<&str>, timeout: Duration) -> Result<Self, GenerationError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| GenerationError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.unwrap_or(DEFAULT_OLLAMA_URL).trim_end_matches('/').to_string(),
            model: model.into(),
        })
    }

    async fn send(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = ChatRequest {
            model: &self.model,
            messages,
            stream,
            options: ChatOptions { temperature: params.temperature, num_predict: params.max_tokens },
        };
        let resp = self
            .client
            .post(format!("{}/api/chat", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(resp, "ollama").await
    }
}

#[async_trait]
impl GenerationClient for OllamaClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<Completion, GenerationError> {
        let resp = self.send(messages, params, false).await?;
        let data: ChatResponse = resp.json().await.map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
        if let Some(error) = data.error {
            return Err(GenerationError::Provider(error));
        }
        let content = data.message.map(|m| m.content).unwrap_or_default();

        let prompt_tokens = data.prompt_eval_count.unwrap_or_else(|| {
            messages.iter().map(|m| estimate_tokens(&m.content)).sum()
        });
        let completion_tokens = data.eval_count.unwrap_or_else(|| estimate_tokens(&content));
        tracing::debug!(model = %self.model, prompt_tokens, completion_tokens, "ollama completion");

        Ok(Completion {
            content,
            model: self.model.clone(),
            usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens.saturating_add(completion_tokens),
            },
            finish_reason: data.done_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<TextStream, GenerationError> {
        let resp = self.send(messages, params, true).await?;
        let stream = lines(resp.bytes_stream())
            .and_then(|line| future::ready(parse_ndjson_line(&line)))
            .try_take_while(|event| future::ready(Ok(*event != ChatEvent::Done)))
            .try_filter_map(|event| {
                future::ready(Ok(match event {
                    ChatEvent::Text(text) => Some(text),
                    ChatEvent::Done | ChatEvent::Skip => None,
                }))
            });
        Ok(stream.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ndjson_lines() {
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":"Hi"},"done":false}"#).unwrap(),
            ChatEvent::Text("Hi".into())
        );
        assert_eq!(
            parse_ndjson_line(r#"{"message":{"role":"assistant","content":""},"done":true,"eval_count":3}"#).unwrap(),
            ChatEvent::Done
        );
        assert_eq!(parse_ndjson_line("").unwrap(), ChatEvent::Skip);
        assert!(matches!(parse_ndjson_line(r#"{"error":"model not found"}"#), Err(GenerationError::Streaming(_))));
        assert!(matches!(parse_ndjson_line("not json"), Err(GenerationError::ResponseParse(_))));
    }
}
