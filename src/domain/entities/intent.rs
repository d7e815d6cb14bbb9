use serde_json::Value;

/// Input handed to the classifier. Media bytes are already downloaded by
/// the channel adapter; the classifier never talks to the channel.
#[derive(Debug, Clone)]
pub enum ClassifierInput {
    Text(String),
    Audio(Vec<u8>),
    Image(Vec<u8>),
}

/// One line of an order as extracted by the classifier.
///
/// `qty` and `rate` stay as raw JSON values until the draft builder coerces
/// them; the classifier is allowed to hand back numbers or numeric strings.
#[derive(Debug, Clone, serde::Deserialize)]
pub struct LineItemDraft {
    #[serde(default = "default_product")]
    pub product: String,
    #[serde(default)]
    pub qty: Value,
    #[serde(default)]
    pub rate: Value,
}

fn default_product() -> String {
    "Item".to_string()
}

/// Structured intent extracted from one inbound event.
#[derive(Debug, Clone)]
pub enum Intent {
    CreateOrder {
        customer_name: String,
        items: Vec<LineItemDraft>,
    },
    Reminder {
        details: String,
        time: Option<String>,
    },
    Chat,
}

/// Classifier result: an intent plus the suggested reply text.
#[derive(Debug, Clone)]
pub struct Classification {
    pub intent: Intent,
    pub reply_text: Option<String>,
}

impl Classification {
    /// The degraded default used when classification fails.
    pub fn fallback(reply: impl Into<String>) -> Self {
        Self {
            intent: Intent::Chat,
            reply_text: Some(reply.into()),
        }
    }
}
