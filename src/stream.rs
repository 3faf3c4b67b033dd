//! Streaming answers over a bounded channel.
//!
//! A producer task pushes [`StreamEvent::Token`]s as the chat provider
//! emits them and finishes with exactly one terminal event: `Done` with a
//! result id, or `Error`. The consumer drains the receiver. When the
//! receiver is dropped, sends fail and the producer stops generating.

use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;

use tabula_core::llm::TokenSink;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum StreamEvent {
    Token { text: String },
    Done { result_id: String },
    Error { message: String },
}

impl StreamEvent {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, StreamEvent::Token { .. })
    }

    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::Token { .. } => "token",
            StreamEvent::Done { .. } => "done",
            StreamEvent::Error { .. } => "error",
        }
    }
}

/// [`TokenSink`] that forwards each token into the channel.
pub struct ChannelSink {
    tx: mpsc::Sender<StreamEvent>,
}

impl ChannelSink {
    pub fn new(tx: mpsc::Sender<StreamEvent>) -> Self {
        Self { tx }
    }
}

#[async_trait]
impl TokenSink for ChannelSink {
    async fn push(&self, token: &str) -> bool {
        if token.is_empty() {
            return !self.tx.is_closed();
        }
        self.tx
            .send(StreamEvent::Token {
                text: token.to_string(),
            })
            .await
            .is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sink_forwards_until_receiver_dropped() {
        let (tx, mut rx) = mpsc::channel(4);
        let sink = ChannelSink::new(tx);
        assert!(sink.push("hel").await);
        assert_eq!(
            rx.recv().await,
            Some(StreamEvent::Token { text: "hel".into() })
        );
        drop(rx);
        assert!(!sink.push("lo").await);
    }

    #[test]
    fn test_event_serialization() {
        let done = StreamEvent::Done {
            result_id: "r1".into(),
        };
        assert!(done.is_terminal());
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            serde_json::json!({"event": "done", "result_id": "r1"})
        );
        assert!(!StreamEvent::Token { text: "x".into() }.is_terminal());
    }
}
