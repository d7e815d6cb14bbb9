//! Groq-backed intent classifier
//!
//! One chat completion per event: the model gets the merchant's product
//! list and a strict JSON output contract, and the response is mapped to
//! a typed [`Intent`]. Voice notes are transcribed first (Whisper);
//! images go through the vision model with the same output contract.
//! Malformed model output never raises — it degrades to a `Chat`
//! fallback so the merchant always gets a reply.

use async_trait::async_trait;
use base64::Engine;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::application::errors::ClassifierError;
use crate::domain::entities::{Classification, ClassifierInput, Intent, LineItemDraft};
use crate::domain::traits::Classifier;

/// Groq API endpoint
const API_BASE: &str = "https://api.groq.com/openai/v1";

const FALLBACK_REPLY: &str = "🙏 I can record orders and reminders for you. \
Try \"Order for Sharma: 2 rice bags @ 50\".";

/// Groq classifier
pub struct GroqClassifier {
    api_key: String,
    client: Client,
    model: String,
    audio_model: String,
    vision_model: String,
}

/// API request structure
#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
}

/// Chat message; `content` stays a raw value so vision messages can carry
/// structured content parts.
#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: Value,
}

/// API response structure
#[derive(Deserialize, Debug)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    content: String,
}

#[derive(Deserialize, Debug)]
struct TranscriptionResponse {
    text: String,
}

/// The JSON contract the model is asked to emit.
#[derive(Deserialize, Debug)]
struct RawClassification {
    intent: String,
    #[serde(default)]
    data: Value,
    #[serde(default)]
    reply_text: Option<String>,
}

impl GroqClassifier {
    pub fn new(
        api_key: impl Into<String>,
        model: impl Into<String>,
        audio_model: impl Into<String>,
        vision_model: impl Into<String>,
    ) -> Self {
        Self {
            api_key: api_key.into(),
            client: Client::new(),
            model: model.into(),
            audio_model: audio_model.into(),
            vision_model: vision_model.into(),
        }
    }

    fn extraction_prompt(known_products: &[String]) -> String {
        let catalog = if known_products.is_empty() {
            "(no catalog yet)".to_string()
        } else {
            known_products.join(", ")
        };
        format!(
            "You are MinA, a WhatsApp assistant for small merchants. \
             Classify the merchant's message and reply ONLY with JSON:\n\
             {{\"intent\": \"create_order\" | \"reminder\" | \"chat\",\n\
             \"data\": {{...}},\n\
             \"reply_text\": \"short friendly reply in the merchant's language\"}}\n\n\
             For create_order, data is {{\"customer_name\": str, \"items\": \
             [{{\"product\": str, \"qty\": number, \"rate\": number}}]}}. \
             Match product names against the merchant's catalog where possible: {}.\n\
             For reminder, data is {{\"details\": str, \"time\": \
             \"YYYY-MM-DD HH:MM:SS\" or null}}.\n\
             For chat, data is {{}} and reply_text answers the merchant directly.",
            catalog
        )
    }

    async fn chat(&self, model: &str, messages: Vec<ChatMessage>) -> Result<String, ClassifierError> {
        let request = ChatRequest {
            model: model.to_string(),
            messages,
            temperature: 0.2,
        };

        let response = self
            .client
            .post(format!("{}/chat/completions", API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&request)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(format!(
                "status: {}, body: {}",
                status, body
            )));
        }

        let chat_response: ChatResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;

        chat_response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| ClassifierError::Parse("no choices in response".to_string()))
    }

    async fn transcribe(&self, audio: Vec<u8>) -> Result<String, ClassifierError> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name("voice-note.ogg")
            .mime_str("audio/ogg")
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;
        let form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("model", self.audio_model.clone());

        let response = self
            .client
            .post(format!("{}/audio/transcriptions", API_BASE))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .multipart(form)
            .send()
            .await
            .map_err(|e| ClassifierError::Network(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Api(format!(
                "status: {}, body: {}",
                status, body
            )));
        }

        let transcription: TranscriptionResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Parse(e.to_string()))?;
        Ok(transcription.text)
    }

    fn vision_messages(prompt: &str, image: &[u8]) -> Vec<ChatMessage> {
        let data_url = format!(
            "data:image/jpeg;base64,{}",
            base64::engine::general_purpose::STANDARD.encode(image)
        );
        vec![ChatMessage {
            role: "user",
            content: serde_json::json!([
                {
                    "type": "text",
                    "text": format!(
                        "{}\n\nThe merchant sent this photo (usually a handwritten \
                         order list or bill). Extract the order from it.",
                        prompt
                    )
                },
                { "type": "image_url", "image_url": { "url": data_url } }
            ]),
        }]
    }
}

#[async_trait]
impl Classifier for GroqClassifier {
    async fn classify(
        &self,
        merchant_phone: &str,
        input: ClassifierInput,
        known_products: &[String],
    ) -> Result<Classification, ClassifierError> {
        let prompt = Self::extraction_prompt(known_products);

        let raw = match input {
            ClassifierInput::Text(body) => {
                let messages = vec![
                    ChatMessage {
                        role: "system",
                        content: Value::String(prompt),
                    },
                    ChatMessage {
                        role: "user",
                        content: Value::String(body),
                    },
                ];
                self.chat(&self.model, messages).await?
            }
            ClassifierInput::Audio(bytes) => {
                let transcript = self.transcribe(bytes).await?;
                tracing::debug!(%merchant_phone, "transcribed voice note: {}", transcript);
                let messages = vec![
                    ChatMessage {
                        role: "system",
                        content: Value::String(prompt),
                    },
                    ChatMessage {
                        role: "user",
                        content: Value::String(transcript),
                    },
                ];
                self.chat(&self.model, messages).await?
            }
            ClassifierInput::Image(bytes) => {
                let messages = Self::vision_messages(&prompt, &bytes);
                self.chat(&self.vision_model, messages).await?
            }
        };

        Ok(parse_classification(&raw))
    }
}

/// Map raw model output to a typed classification. Anything the contract
/// does not cover degrades to `Chat` with the fallback reply.
fn parse_classification(raw: &str) -> Classification {
    let cleaned = strip_code_fence(raw);
    let parsed: RawClassification = match serde_json::from_str(cleaned) {
        Ok(p) => p,
        Err(e) => {
            tracing::warn!("unparseable classifier output: {}", e);
            return Classification::fallback(FALLBACK_REPLY);
        }
    };

    let intent = match parsed.intent.as_str() {
        "create_order" => {
            let customer_name = parsed
                .data
                .get("customer_name")
                .and_then(Value::as_str)
                .unwrap_or("Customer")
                .to_string();
            let items: Vec<LineItemDraft> = parsed
                .data
                .get("items")
                .cloned()
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default();
            Intent::CreateOrder {
                customer_name,
                items,
            }
        }
        "reminder" | "set_reminder" => {
            let details = parsed
                .data
                .get("details")
                .or_else(|| parsed.data.get("task"))
                .and_then(Value::as_str)
                .unwrap_or("Reminder")
                .to_string();
            let time = parsed
                .data
                .get("time")
                .and_then(Value::as_str)
                .map(str::to_string);
            Intent::Reminder { details, time }
        }
        _ => Intent::Chat,
    };

    Classification {
        intent,
        reply_text: parsed.reply_text,
    }
}

/// Strip a Markdown code fence the model sometimes wraps its JSON in.
fn strip_code_fence(raw: &str) -> &str {
    let trimmed = raw.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim_end_matches('`').trim()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_json_fences() {
        assert_eq!(strip_code_fence("{\"a\":1}"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("```\n{\"a\":1}\n```"), "{\"a\":1}");
    }

    #[test]
    fn maps_create_order() {
        let raw = r#"```json
        {"intent": "create_order",
         "data": {"customer_name": "Sharma",
                  "items": [{"product": "rice", "qty": 2, "rate": "50"}]},
         "reply_text": "Got it!"}
        ```"#;
        let c = parse_classification(raw);
        match c.intent {
            Intent::CreateOrder {
                customer_name,
                items,
            } => {
                assert_eq!(customer_name, "Sharma");
                assert_eq!(items.len(), 1);
                assert_eq!(items[0].product, "rice");
            }
            other => panic!("wrong intent: {:?}", other),
        }
        assert_eq!(c.reply_text.as_deref(), Some("Got it!"));
    }

    #[test]
    fn maps_reminder_with_task_alias() {
        let raw = r#"{"intent": "reminder",
                      "data": {"task": "call the distributor", "time": null},
                      "reply_text": "Will remind you"}"#;
        let c = parse_classification(raw);
        match c.intent {
            Intent::Reminder { details, time } => {
                assert_eq!(details, "call the distributor");
                assert!(time.is_none());
            }
            other => panic!("wrong intent: {:?}", other),
        }
    }

    #[test]
    fn garbage_degrades_to_chat_fallback() {
        let c = parse_classification("sure, here is the order you asked for");
        assert!(matches!(c.intent, Intent::Chat));
        assert!(c.reply_text.is_some());
    }

    #[test]
    fn unknown_intent_is_chat() {
        let c = parse_classification(r#"{"intent": "dance", "data": {}, "reply_text": "hi"}"#);
        assert!(matches!(c.intent, Intent::Chat));
        assert_eq!(c.reply_text.as_deref(), Some("hi"));
    }
}
