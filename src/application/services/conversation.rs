//! Conversation orchestrator - one inbound event in, one reply out
//!
//! Routes each event through the per-merchant state machine: an active
//! CONFIRM_ORDER flow is resolved first (confirm / cancel / fall through
//! to fresh classification); otherwise the event is classified and
//! dispatched on intent. Every handled event ends with exactly one state
//! write, so a crash between reply and write can only replay, never
//! corrupt.

use std::collections::HashSet;
use std::sync::Arc;

use once_cell::sync::Lazy;
use serde_json::{json, Value};

use crate::application::errors::BotError;
use crate::domain::entities::{ClassifierInput, DraftOrder, InboundEvent, Intent, LineItemDraft};
use crate::domain::traits::{Channel, Classifier, InvoiceRenderer};
use crate::infrastructure::database::{Repository, StateStore};

pub const CONFIRM_ORDER_STATE: &str = "CONFIRM_ORDER";

static AFFIRMATIONS: Lazy<HashSet<&str>> = Lazy::new(|| ["1", "yes", "ha"].into_iter().collect());
static CANCELLATIONS: Lazy<HashSet<&str>> =
    Lazy::new(|| ["2", "no", "cancel"].into_iter().collect());

pub struct ConversationService {
    repo: Repository,
    state: StateStore,
    orders: super::OrderService,
    channel: Arc<dyn Channel>,
    classifier: Arc<dyn Classifier>,
    renderer: Arc<dyn InvoiceRenderer>,
    base_url: String,
}

impl ConversationService {
    pub fn new(
        repo: Repository,
        state: StateStore,
        orders: super::OrderService,
        channel: Arc<dyn Channel>,
        classifier: Arc<dyn Classifier>,
        renderer: Arc<dyn InvoiceRenderer>,
        base_url: String,
    ) -> Self {
        Self {
            repo,
            state,
            orders,
            channel,
            classifier,
            renderer,
            base_url,
        }
    }

    /// Process one inbound event end to end.
    pub async fn handle_event(&self, event: &InboundEvent) -> Result<(), BotError> {
        let (tag, meta) = self.state.get_state(&event.sender).await?;

        if tag.as_deref() == Some(CONFIRM_ORDER_STATE) {
            let body = event.body.trim().to_lowercase();
            let order_id = meta.get("order_id").and_then(Value::as_i64);

            if is_affirmative(&body) {
                return self.handle_confirmation(&event.sender, order_id).await;
            }
            if is_cancellation(&body) {
                if let Some(id) = order_id {
                    self.repo.cancel_order(id).await?;
                }
                self.send_best_effort(
                    &event.sender,
                    "🗑️ Draft discarded. Send me a new order anytime.",
                    None,
                )
                .await;
                self.state
                    .set_state(&event.sender, None, &empty_object())
                    .await?;
                return Ok(());
            }
            // Anything else is treated as a fresh request; the state write
            // at the end of the intent path replaces the pending
            // confirmation.
            tracing::debug!(
                sender = %event.sender,
                "non-confirmation reply in CONFIRM_ORDER, re-classifying"
            );
        }

        self.handle_intent(event).await
    }

    async fn handle_confirmation(
        &self,
        sender: &str,
        order_id: Option<i64>,
    ) -> Result<(), BotError> {
        let Some(order_id) = order_id else {
            // Metadata lost its order reference; nothing to confirm.
            tracing::warn!(%sender, "confirmation state without order_id");
            self.send_best_effort(
                sender,
                "⚠️ I couldn't find that draft anymore. Please send the order again.",
                None,
            )
            .await;
            self.state.set_state(sender, None, &empty_object()).await?;
            return Ok(());
        };

        // Render first so the pdf_url lands on the confirmed row; a render
        // failure still confirms the order.
        let pdf_url = self.renderer.render(order_id, &self.base_url).await;
        self.repo.confirm_order(order_id, pdf_url.as_deref()).await?;

        match &pdf_url {
            Some(url) => {
                let body = format!("✅ Order confirmed! Invoice INV-{:04} is ready.", order_id);
                self.send_best_effort(sender, &body, Some(url)).await;
            }
            None => {
                self.send_best_effort(
                    sender,
                    "✅ Order saved! (Invoice PDF could not be generated right now.)",
                    None,
                )
                .await;
            }
        }

        self.state.set_state(sender, None, &empty_object()).await?;
        Ok(())
    }

    async fn handle_intent(&self, event: &InboundEvent) -> Result<(), BotError> {
        let merchant = self.repo.get_or_create_user(&event.sender).await?;
        let products = self.repo.list_products(merchant.id).await?;
        let product_names: Vec<String> = products.into_iter().map(|p| p.name).collect();

        let input = self.classifier_input(event).await;
        let classification = match self
            .classifier
            .classify(&merchant.phone, input, &product_names)
            .await
        {
            Ok(c) => c,
            Err(e) => {
                tracing::warn!(sender = %event.sender, "classification failed: {}", e);
                crate::domain::entities::Classification::fallback(
                    "😅 Sorry, I couldn't process that. Could you try again?",
                )
            }
        };

        match classification.intent {
            Intent::CreateOrder {
                customer_name,
                items,
            } if !items.is_empty() => {
                self.handle_create_order(event, &customer_name, &items)
                    .await
            }
            Intent::CreateOrder { .. } => {
                self.send_best_effort(
                    &event.sender,
                    "🤔 I understood that as an order but couldn't read any items. \
                     Try e.g. \"Order for Sharma: 2 rice bags @ 50\".",
                    None,
                )
                .await;
                self.state
                    .set_state(&event.sender, None, &empty_object())
                    .await?;
                Ok(())
            }
            Intent::Reminder { details, time } => {
                self.repo
                    .insert_task(merchant.id, &details, time.as_deref())
                    .await?;
                let body = classification
                    .reply_text
                    .unwrap_or_else(|| "⏰ Reminder saved!".to_string());
                self.send_best_effort(&event.sender, &body, None).await;
                self.state
                    .set_state(&event.sender, None, &empty_object())
                    .await?;
                Ok(())
            }
            Intent::Chat => {
                let body = classification
                    .reply_text
                    .unwrap_or_else(|| "🙏 How can I help you today?".to_string());
                self.send_best_effort(&event.sender, &body, None).await;
                self.state
                    .set_state(&event.sender, None, &empty_object())
                    .await?;
                Ok(())
            }
        }
    }

    async fn handle_create_order(
        &self,
        event: &InboundEvent,
        customer_name: &str,
        items: &[LineItemDraft],
    ) -> Result<(), BotError> {
        match self
            .orders
            .create_draft_order(&event.sender, customer_name, items)
            .await
        {
            Ok(draft) => {
                let summary = draft_summary(&draft, items);
                self.send_best_effort(&event.sender, &summary, None).await;
                self.state
                    .set_state(
                        &event.sender,
                        Some(CONFIRM_ORDER_STATE),
                        &json!({ "order_id": draft.order_id }),
                    )
                    .await?;
                Ok(())
            }
            Err(BotError::Validation(msg)) => {
                tracing::warn!(sender = %event.sender, "draft rejected: {}", msg);
                self.send_best_effort(
                    &event.sender,
                    "⚠️ I couldn't read the quantities or rates in that order. \
                     Please resend it with numbers, e.g. \"2 rice @ 50\".",
                    None,
                )
                .await;
                self.state
                    .set_state(&event.sender, None, &empty_object())
                    .await?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Pick the classifier input for this event. Media is downloaded
    /// through the channel (the bytes may sit behind channel auth); a
    /// failed download degrades to the text body.
    async fn classifier_input(&self, event: &InboundEvent) -> ClassifierInput {
        let kind = if event.has_media("audio") {
            Some("audio")
        } else if event.has_media("image") {
            Some("image")
        } else {
            None
        };

        if let (Some(kind), Some(url)) = (kind, event.media_url.as_deref()) {
            match self.channel.download_media(url).await {
                Ok(bytes) if kind == "audio" => return ClassifierInput::Audio(bytes),
                Ok(bytes) => return ClassifierInput::Image(bytes),
                Err(e) => {
                    tracing::warn!(sender = %event.sender, "media download failed: {}", e);
                }
            }
        }
        ClassifierInput::Text(event.body.clone())
    }

    /// Outbound sends are logged on failure, never retried, and never
    /// allowed to block the state write that follows them.
    async fn send_best_effort(&self, recipient: &str, body: &str, media_url: Option<&str>) {
        if let Err(e) = self.channel.send(recipient, body, media_url).await {
            tracing::error!(%recipient, channel = self.channel.name(), "send failed: {}", e);
        }
    }
}

fn is_affirmative(normalized_body: &str) -> bool {
    AFFIRMATIONS.contains(normalized_body)
}

fn is_cancellation(normalized_body: &str) -> bool {
    CANCELLATIONS.contains(normalized_body)
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}

fn draft_summary(draft: &DraftOrder, items: &[LineItemDraft]) -> String {
    let mut out = format!("🛒 Draft order for *{}*:\n", draft.customer_name);
    for item in items {
        out.push_str(&format!(
            "• {} x {}\n",
            item.product,
            display_value(&item.qty)
        ));
    }
    out.push_str(&format!(
        "\nTotal: ₹{:.2}\nReply *1* to confirm or *2* to cancel.",
        draft.total
    ));
    out
}

fn display_value(v: &Value) -> String {
    match v {
        Value::Null => "1".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
