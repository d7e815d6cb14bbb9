//! Console adapter for development/testing

use async_trait::async_trait;

use crate::application::errors::ChannelError;
use crate::domain::entities::InboundEvent;
use crate::domain::traits::Channel;

/// Console channel adapter for local development. Every line typed on
/// stdin becomes one inbound event from a fixed phone identity; replies
/// go to stdout.
pub struct ConsoleAdapter {
    sender_identity: String,
}

impl ConsoleAdapter {
    pub fn new() -> Self {
        Self {
            sender_identity: "console:+910000000000".to_string(),
        }
    }
}

impl Default for ConsoleAdapter {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Channel for ConsoleAdapter {
    async fn send(
        &self,
        _recipient: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<(), ChannelError> {
        println!("[BOT] {}", body);
        if let Some(url) = media_url {
            println!("[BOT] 📎 {}", url);
        }
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<InboundEvent>, ChannelError> {
        let line = tokio::task::spawn_blocking(|| {
            let mut input = String::new();
            match std::io::stdin().read_line(&mut input) {
                Ok(0) => None,
                Ok(_) => Some(input.trim().to_string()),
                Err(_) => None,
            }
        })
        .await
        .map_err(|e| ChannelError::Api(e.to_string()))?;

        match line {
            Some(text) if !text.is_empty() => {
                Ok(vec![InboundEvent::new(self.sender_identity.clone(), text)])
            }
            Some(_) => Ok(vec![]),
            None => Err(ChannelError::Network("stdin closed".to_string())),
        }
    }

    async fn download_media(&self, _url: &str) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::Api(
            "console channel has no media".to_string(),
        ))
    }

    fn name(&self) -> &str {
        "console"
    }
}
