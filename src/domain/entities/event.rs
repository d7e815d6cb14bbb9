use chrono::{DateTime, Utc};

/// An inbound event pulled from the messaging channel.
///
/// `sender` is the raw channel identity (e.g. `whatsapp:+91...`);
/// normalization happens at the persistence boundary.
#[derive(Debug, Clone)]
pub struct InboundEvent {
    pub id: String,
    pub sender: String,
    pub body: String,
    pub num_media: u32,
    pub media_type: Option<String>,
    pub media_url: Option<String>,
    pub received_at: DateTime<Utc>,
}

impl InboundEvent {
    pub fn new(sender: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            sender: sender.into(),
            body: body.into(),
            num_media: 0,
            media_type: None,
            media_url: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_media(mut self, media_type: impl Into<String>, media_url: impl Into<String>) -> Self {
        self.num_media = 1;
        self.media_type = Some(media_type.into());
        self.media_url = Some(media_url.into());
        self
    }

    /// True when the event carries media of the given kind ("audio", "image").
    pub fn has_media(&self, kind: &str) -> bool {
        self.num_media > 0
            && self
                .media_type
                .as_deref()
                .map(|t| t.contains(kind))
                .unwrap_or(false)
    }
}
