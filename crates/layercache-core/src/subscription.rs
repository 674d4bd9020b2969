//! Handle for an active pub/sub subscription.

use tokio::sync::mpsc;
use tokio::task::AbortHandle;

/// A live subscription to one channel.
///
/// Messages arrive in the order the channel delivered them. The subscription
/// ends when the handle is dropped or [`Subscription::unsubscribe`] is called;
/// any background task feeding it (e.g. a Redis SUBSCRIBE loop) is aborted.
#[derive(Debug)]
pub struct Subscription {
    channel: String,
    messages: mpsc::UnboundedReceiver<String>,
    feeder: Option<AbortHandle>,
}

impl Subscription {
    /// Wraps a message receiver fed directly by the backend.
    pub fn new(channel: impl Into<String>, messages: mpsc::UnboundedReceiver<String>) -> Self {
        Self {
            channel: channel.into(),
            messages,
            feeder: None,
        }
    }

    /// Wraps a message receiver fed by a background task that must stop with
    /// the subscription.
    pub fn with_feeder(
        channel: impl Into<String>,
        messages: mpsc::UnboundedReceiver<String>,
        feeder: AbortHandle,
    ) -> Self {
        Self {
            channel: channel.into(),
            messages,
            feeder: Some(feeder),
        }
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    /// Waits for the next message; `None` once the channel is gone.
    pub async fn next_message(&mut self) -> Option<String> {
        self.messages.recv().await
    }

    /// Ends the subscription.
    pub fn unsubscribe(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.messages.close();
        if let Some(feeder) = self.feeder.take() {
            feeder.abort();
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.stop();
    }
}
