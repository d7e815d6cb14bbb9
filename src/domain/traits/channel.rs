use async_trait::async_trait;

use crate::application::errors::ChannelError;
use crate::domain::entities::InboundEvent;

/// Channel trait - abstraction for messaging platform adapters
///
/// Outbound send failures are logged by callers, not retried, and never
/// block state persistence.
#[async_trait]
pub trait Channel: Send + Sync {
    /// Send a text message, optionally attaching a media reference (URL).
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<(), ChannelError>;

    /// Pull inbound events that arrived since the last poll.
    async fn poll_inbound(&self) -> Result<Vec<InboundEvent>, ChannelError>;

    /// Fetch media bytes referenced by an inbound event. Media URLs may
    /// require channel credentials, so the download lives here.
    async fn download_media(&self, url: &str) -> Result<Vec<u8>, ChannelError>;

    /// Adapter name for logs.
    fn name(&self) -> &str;
}
