use std::time::Duration;

use async_trait::async_trait;
use futures::{future, StreamExt, TryStreamExt};
use ragline_core::{
    Completion, GenerationClient, GenerationError, GenerationParams, PromptMessage, TextStream,
    TokenUsage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::http::{check_status, lines, map_transport_error, SseEvent};

pub const OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
pub const DEEPSEEK_BASE_URL: &str = "https://api.deepseek.com/v1";

/// Client for OpenAI-style chat completion endpoints
/// (`POST {base}/chat/completions`, SSE when streaming).
pub struct OpenAiCompatClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    provider: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [PromptMessage],
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionResponse {
    #[serde(default)]
    model: Option<String>,
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: u32,
    #[serde(default)]
    completion_tokens: u32,
    #[serde(default)]
    total_tokens: u32,
}

/// Parses one SSE line. Comments, `event:` lines and deltas without content
/// are skipped.
pub(crate) fn parse_sse_line(line: &str) -> Result<SseEvent, GenerationError> {
    let Some(data) = line.strip_prefix("data:") else {
        return Ok(SseEvent::Skip);
    };
    let data = data.trim();
    if data == "[DONE]" {
        return Ok(SseEvent::Done);
    }
    let json: Value =
        serde_json::from_str(data).map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
    if let Some(message) = json["error"]["message"].as_str() {
        return Err(GenerationError::Streaming(message.to_string()));
    }
    match json["choices"][0]["delta"]["content"].as_str() {
        Some(text) if !text.is_empty() => Ok(SseEvent::Delta(text.to_string())),
        _ => Ok(SseEvent::Skip),
    }
}

impl OpenAiCompatClient {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        api_key: impl Into<String>,
        base_url: &str,
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
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.into(),
            provider: provider.into(),
        })
    }

    async fn send(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, GenerationError> {
        let body = CompletionRequest {
            model: &self.model,
            messages,
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            stream,
        };
        let resp = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_transport_error)?;
        check_status(resp, &self.provider).await
    }
}

#[async_trait]
impl GenerationClient for OpenAiCompatClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn generate(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<Completion, GenerationError> {
        let resp = self.send(messages, params, false).await?;
        let data: CompletionResponse =
            resp.json().await.map_err(|e| GenerationError::ResponseParse(e.to_string()))?;
        let choice = data
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| GenerationError::ResponseParse("response has no choices".into()))?;
        let usage = data.usage.map_or_else(TokenUsage::default, |u| TokenUsage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
            total_tokens: u.total_tokens,
        });
        Ok(Completion {
            content: choice.message.content.unwrap_or_default(),
            model: data.model.unwrap_or_else(|| self.model.clone()),
            usage,
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn generate_stream(
        &self,
        messages: &[PromptMessage],
        params: &GenerationParams,
    ) -> Result<TextStream, GenerationError> {
        let resp = self.send(messages, params, true).await?;
        let stream = lines(resp.bytes_stream())
            .and_then(|line| future::ready(parse_sse_line(&line)))
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
