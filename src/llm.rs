//! Chat model implementations.
//!
//! [`OpenAiChat`] talks to any OpenAI-compatible `/chat/completions`
//! endpoint (OpenAI, Groq, LM Studio, vLLM). Streaming reads the
//! server-sent event body line by line and forwards each
//! `choices[0].delta.content` fragment to the sink.

use std::sync::Arc;

use anyhow::bail;
use async_trait::async_trait;
use futures_util::StreamExt;

use tabula_core::error::{Error, Result};
use tabula_core::llm::{ChatModel, CompletionRequest, TokenSink};

use crate::config::LlmConfig;
use crate::http;

/// Always fails. Used when `llm.provider = "disabled"`.
pub struct DisabledChat;

#[async_trait]
impl ChatModel for DisabledChat {
    fn model_name(&self) -> &str {
        "disabled"
    }

    async fn complete(&self, _request: &CompletionRequest) -> Result<String> {
        Err(Error::Provider("chat provider is disabled".to_string()))
    }
}

pub struct OpenAiChat {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
    max_retries: u32,
}

impl OpenAiChat {
    pub fn new(config: &LlmConfig) -> anyhow::Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("llm.model required for OpenAI provider"))?;

        // Local OpenAI-compatible servers usually run without a key.
        let api_key = http::api_key(&config.api_key_env);
        if api_key.is_none() {
            tracing::warn!(env = %config.api_key_env, "no API key set for chat provider");
        }

        Ok(Self {
            client: http::client(config.timeout_secs)?,
            url: format!("{}/chat/completions", config.url.trim_end_matches('/')),
            model,
            api_key,
            max_retries: config.max_retries,
        })
    }

    fn body(&self, request: &CompletionRequest, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": request.messages,
            "temperature": request.temperature,
            "stream": stream,
        });
        if let Some(max_tokens) = request.max_tokens {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }
        body
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn model_name(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &CompletionRequest) -> Result<String> {
        let json = http::post_json_with_retry(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &self.body(request, false),
            self.max_retries,
            "chat",
        )
        .await?;

        json["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| Error::Provider("chat response has no message content".to_string()))
    }

    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn TokenSink,
    ) -> Result<String> {
        let response = http::send_with_retry(
            &self.client,
            &self.url,
            self.api_key.as_deref(),
            &self.body(request, true),
            self.max_retries,
            "chat",
        )
        .await?;

        let mut stream = response.bytes_stream();
        let mut pending = String::new();
        let mut full = String::new();

        while let Some(item) = stream.next().await {
            let bytes = item.map_err(|e| Error::Provider(format!("chat stream failed: {}", e)))?;
            pending.push_str(&String::from_utf8_lossy(&bytes));

            while let Some(newline) = pending.find('\n') {
                let line: String = pending.drain(..=newline).collect();
                match parse_sse_line(line.trim()) {
                    SseLine::Token(token) => {
                        full.push_str(&token);
                        if !sink.push(&token).await {
                            tracing::debug!("stream consumer went away, stopping generation");
                            return Ok(full);
                        }
                    }
                    SseLine::Done => return Ok(full),
                    SseLine::Skip => {}
                }
            }
        }
        Ok(full)
    }
}

#[derive(Debug, PartialEq)]
enum SseLine {
    Token(String),
    Done,
    Skip,
}

fn parse_sse_line(line: &str) -> SseLine {
    let Some(data) = line.strip_prefix("data:") else {
        return SseLine::Skip;
    };
    let data = data.trim();
    if data == "[DONE]" {
        return SseLine::Done;
    }
    match serde_json::from_str::<serde_json::Value>(data) {
        Ok(json) => match json["choices"][0]["delta"]["content"].as_str() {
            Some(content) if !content.is_empty() => SseLine::Token(content.to_string()),
            _ => SseLine::Skip,
        },
        Err(_) => SseLine::Skip,
    }
}

pub fn create_chat_model(config: &LlmConfig) -> anyhow::Result<Arc<dyn ChatModel>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledChat)),
        "openai" => Ok(Arc::new(OpenAiChat::new(config)?)),
        other => bail!("Unknown llm provider: {}", other),
    }
}
