//! SpeechQueue - Spoken Message Handoff
//!
//! Messages queued by the station for the presentation layer to voice.
//! The consumer polls and drains; draining clears the queue.

use tokio::sync::RwLock;

/// SpeechQueue instance
#[derive(Default)]
pub struct SpeechQueue {
    messages: RwLock<Vec<String>>,
}

impl SpeechQueue {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn push(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::debug!(message = %message, "Speech message queued");
        self.messages.write().await.push(message);
    }

    /// Return all queued messages and clear the queue.
    pub async fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.write().await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_drain_returns_in_order_and_clears() {
        let queue = SpeechQueue::new();
        queue.push("first").await;
        queue.push("second").await;

        assert_eq!(queue.drain().await, vec!["first", "second"]);
        assert!(queue.drain().await.is_empty());
    }
}
