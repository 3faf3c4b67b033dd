//! Chat/completion provider abstraction.
//!
//! [`ChatModel`] is the seam to the language model. Streaming is expressed
//! as a [`TokenSink`] the provider pushes tokens into, so the core never
//! depends on a particular channel or runtime.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompletionRequest {
    pub messages: Vec<ChatMessage>,
    pub temperature: f32,
    pub max_tokens: Option<u32>,
}

impl CompletionRequest {
    /// A single user-turn prompt.
    pub fn prompt(text: impl Into<String>, temperature: f32) -> Self {
        Self {
            messages: vec![ChatMessage::user(text)],
            temperature,
            max_tokens: None,
        }
    }

    /// Text of the last user message.
    pub fn last_user_text(&self) -> &str {
        self.messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("")
    }
}

/// Receives streamed tokens.
#[async_trait]
pub trait TokenSink: Send + Sync {
    /// Deliver one token. Returns `false` once the consumer has gone away,
    /// after which the producer should stop generating.
    async fn push(&self, token: &str) -> bool;
}

#[async_trait]
pub trait ChatModel: Send + Sync {
    fn model_name(&self) -> &str;

    async fn complete(&self, request: &CompletionRequest) -> Result<String>;

    /// Complete while pushing tokens to `sink` as they arrive. Returns the
    /// full text. Providers without native streaming deliver the whole
    /// completion as one token.
    async fn complete_streaming(
        &self,
        request: &CompletionRequest,
        sink: &dyn TokenSink,
    ) -> Result<String> {
        let text = self.complete(request).await?;
        sink.push(&text).await;
        Ok(text)
    }
}
