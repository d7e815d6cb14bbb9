//! Twilio WhatsApp adapter

use std::collections::HashSet;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use crate::application::errors::ChannelError;
use crate::domain::entities::InboundEvent;
use crate::domain::traits::Channel;

/// Twilio REST API base URL
const API_BASE: &str = "https://api.twilio.com";

/// Messages kept in the seen-SID window. Twilio's list endpoint has no
/// cursor for "new since last poll", so recent SIDs are remembered and
/// filtered out.
const SEEN_CAPACITY: usize = 4096;

/// One message in a Messages.json list response
#[derive(Debug, Clone, Deserialize)]
struct TwilioMessage {
    sid: String,
    from: String,
    body: Option<String>,
    direction: String,
    num_media: Option<String>,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct MessageListResponse {
    messages: Vec<TwilioMessage>,
}

#[derive(Debug, Deserialize)]
struct MediaItem {
    content_type: String,
    uri: String,
}

#[derive(Debug, Deserialize)]
struct MediaListResponse {
    media_list: Vec<MediaItem>,
}

/// Twilio WhatsApp channel adapter
pub struct TwilioAdapter {
    account_sid: String,
    auth_token: String,
    from_number: String,
    client: Client,
    seen: Mutex<HashSet<String>>,
}

impl TwilioAdapter {
    pub fn new(
        account_sid: impl Into<String>,
        auth_token: impl Into<String>,
        from_number: impl Into<String>,
    ) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            account_sid: account_sid.into(),
            auth_token: auth_token.into(),
            from_number: from_number.into(),
            client,
            seen: Mutex::new(HashSet::new()),
        }
    }

    fn api_url(&self, resource: &str) -> String {
        format!(
            "{}/2010-04-01/Accounts/{}/{}",
            API_BASE, self.account_sid, resource
        )
    }

    /// Record a SID, reporting whether it was new. The window is cleared
    /// wholesale at capacity; re-delivering a handful of old messages once
    /// in a while is acceptable, unbounded growth is not.
    fn mark_seen(&self, sid: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(|p| p.into_inner());
        if seen.len() >= SEEN_CAPACITY {
            seen.clear();
        }
        seen.insert(sid.to_string())
    }

    async fn fetch_media(&self, message_uri: &str) -> Option<(String, String)> {
        // message_uri is ".../Messages/SMxxx.json"; the media subresource
        // hangs off the same path.
        let media_uri = message_uri.trim_end_matches(".json");
        let url = format!("{}{}/Media.json", API_BASE, media_uri);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .ok()?;
        let list: MediaListResponse = response.json().await.ok()?;
        let item = list.media_list.into_iter().next()?;
        let content_url = format!("{}{}", API_BASE, item.uri.trim_end_matches(".json"));
        Some((item.content_type, content_url))
    }
}

#[async_trait]
impl Channel for TwilioAdapter {
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<(), ChannelError> {
        let mut form = vec![
            ("To", recipient.to_string()),
            ("From", self.from_number.clone()),
            ("Body", body.to_string()),
        ];
        if let Some(url) = media_url {
            form.push(("MediaUrl", url.to_string()));
        }

        let response = self
            .client
            .post(self.api_url("Messages.json"))
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .form(&form)
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ChannelError::Api(format!(
                "status: {}, body: {}",
                status, body
            )));
        }
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<InboundEvent>, ChannelError> {
        let response = self
            .client
            .get(self.api_url("Messages.json"))
            .query(&[("To", self.from_number.as_str()), ("PageSize", "20")])
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Api(format!("status: {}", response.status())));
        }

        let list: MessageListResponse = response
            .json()
            .await
            .map_err(|e| ChannelError::Api(format!("list parse: {}", e)))?;

        let mut events = Vec::new();
        for msg in list.messages {
            if !msg.direction.starts_with("inbound") {
                continue;
            }
            if !self.mark_seen(&msg.sid) {
                continue;
            }

            let num_media: u32 = msg
                .num_media
                .as_deref()
                .and_then(|n| n.parse().ok())
                .unwrap_or(0);

            let mut event = InboundEvent::new(msg.from.clone(), msg.body.unwrap_or_default());
            event.id = msg.sid.clone();
            if num_media > 0 {
                if let Some((content_type, content_url)) = self.fetch_media(&msg.uri).await {
                    event = event.with_media(content_type, content_url);
                }
            }
            events.push(event);
        }

        // Oldest first; Twilio lists newest first.
        events.reverse();
        Ok(events)
    }

    async fn download_media(&self, url: &str) -> Result<Vec<u8>, ChannelError> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.account_sid, Some(&self.auth_token))
            .send()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ChannelError::Api(format!("status: {}", response.status())));
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| ChannelError::Network(e.to_string()))?;
        Ok(bytes.to_vec())
    }

    fn name(&self) -> &str {
        "twilio"
    }
}
