//! Conversation flow integration tests with stubbed channel/classifier
//! Run with: cargo test --test conversation_test

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::json;

use mina_bot::application::services::{conversation::CONFIRM_ORDER_STATE, ConversationService, OrderService};
use mina_bot::application::errors::{ChannelError, ClassifierError};
use mina_bot::domain::entities::{
    Classification, ClassifierInput, InboundEvent, Intent, InvalidItemPolicy, LineItemDraft,
};
use mina_bot::domain::traits::{Channel, Classifier, InvoiceRenderer};
use mina_bot::infrastructure::database::sqlite::SqliteBackend;
use mina_bot::infrastructure::database::{schema, Repository, StateStore, StorageBackend};

const MERCHANT: &str = "whatsapp:+919876543210";

#[derive(Default)]
struct RecordingChannel {
    sent: Mutex<Vec<(String, String, Option<String>)>>,
}

impl RecordingChannel {
    fn last_body(&self) -> String {
        self.sent.lock().unwrap().last().unwrap().1.clone()
    }

    fn last_media(&self) -> Option<String> {
        self.sent.lock().unwrap().last().unwrap().2.clone()
    }
}

#[async_trait]
impl Channel for RecordingChannel {
    async fn send(
        &self,
        recipient: &str,
        body: &str,
        media_url: Option<&str>,
    ) -> Result<(), ChannelError> {
        self.sent.lock().unwrap().push((
            recipient.to_string(),
            body.to_string(),
            media_url.map(str::to_string),
        ));
        Ok(())
    }

    async fn poll_inbound(&self) -> Result<Vec<InboundEvent>, ChannelError> {
        Ok(vec![])
    }

    async fn download_media(&self, _url: &str) -> Result<Vec<u8>, ChannelError> {
        Err(ChannelError::Api("no media in tests".to_string()))
    }

    fn name(&self) -> &str {
        "recording"
    }
}

struct StubClassifier {
    results: Mutex<VecDeque<Result<Classification, ClassifierError>>>,
}

impl StubClassifier {
    fn returning(results: Vec<Result<Classification, ClassifierError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
        }
    }
}

#[async_trait]
impl Classifier for StubClassifier {
    async fn classify(
        &self,
        _merchant_phone: &str,
        _input: ClassifierInput,
        _known_products: &[String],
    ) -> Result<Classification, ClassifierError> {
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Ok(Classification::fallback("stub exhausted")))
    }
}

struct StubRenderer {
    url: Option<String>,
}

#[async_trait]
impl InvoiceRenderer for StubRenderer {
    async fn render(&self, _order_id: i64, _base_url: &str) -> Option<String> {
        self.url.clone()
    }
}

fn order_classification(customer: &str, items: Vec<(&str, i64, i64)>) -> Classification {
    Classification {
        intent: Intent::CreateOrder {
            customer_name: customer.to_string(),
            items: items
                .into_iter()
                .map(|(p, q, r)| LineItemDraft {
                    product: p.to_string(),
                    qty: json!(q),
                    rate: json!(r),
                })
                .collect(),
        },
        reply_text: None,
    }
}

struct Harness {
    repo: Repository,
    state: StateStore,
    channel: Arc<RecordingChannel>,
    service: ConversationService,
}

async fn harness(
    classifier: StubClassifier,
    renderer_url: Option<&str>,
) -> Harness {
    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
    schema::ensure_schema(backend.as_ref()).await.unwrap();
    let repo = Repository::new(backend);
    let state = StateStore::new(repo.clone());
    let channel = Arc::new(RecordingChannel::default());
    let service = ConversationService::new(
        repo.clone(),
        state.clone(),
        OrderService::new(repo.clone(), InvalidItemPolicy::Abort),
        channel.clone(),
        Arc::new(classifier),
        Arc::new(StubRenderer {
            url: renderer_url.map(str::to_string),
        }),
        "http://test".to_string(),
    );
    Harness {
        repo,
        state,
        channel,
        service,
    }
}

async fn current_order_id(h: &Harness) -> i64 {
    let (tag, meta) = h.state.get_state(MERCHANT).await.unwrap();
    assert_eq!(tag.as_deref(), Some(CONFIRM_ORDER_STATE));
    meta["order_id"].as_i64().unwrap()
}

#[tokio::test]
async fn order_message_builds_draft_and_asks_for_confirmation() {
    let h = harness(
        StubClassifier::returning(vec![Ok(order_classification(
            "Sharma Traders",
            vec![("rice bag", 2, 50)],
        ))]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "2 rice bags for Sharma at 50"))
        .await
        .unwrap();

    let body = h.channel.last_body();
    assert!(body.contains("Sharma Traders"));
    assert!(body.contains("₹100.00"));
    assert!(body.contains("*1*"));

    let order_id = current_order_id(&h).await;
    let details = h.repo.get_order_with_items(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "draft");
}

#[tokio::test]
async fn affirmation_confirms_and_sends_invoice_link() {
    let h = harness(
        StubClassifier::returning(vec![Ok(order_classification(
            "Sharma",
            vec![("rice", 2, 50)],
        ))]),
        Some("https://cdn.example.com/inv.pdf"),
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "2 rice for Sharma"))
        .await
        .unwrap();
    let order_id = current_order_id(&h).await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, " Yes "))
        .await
        .unwrap();

    let details = h.repo.get_order_with_items(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "confirmed");
    assert_eq!(
        details.order.pdf_url.as_deref(),
        Some("https://cdn.example.com/inv.pdf")
    );
    assert_eq!(
        h.channel.last_media().as_deref(),
        Some("https://cdn.example.com/inv.pdf")
    );

    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());
}

#[tokio::test]
async fn render_failure_still_confirms_order() {
    let h = harness(
        StubClassifier::returning(vec![Ok(order_classification(
            "Sharma",
            vec![("rice", 1, 10)],
        ))]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "1 rice for Sharma"))
        .await
        .unwrap();
    let order_id = current_order_id(&h).await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "1"))
        .await
        .unwrap();

    let details = h.repo.get_order_with_items(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "confirmed");
    assert!(details.order.pdf_url.is_none());
    assert!(h.channel.last_body().contains("saved"));

    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());
}

#[tokio::test]
async fn cancellation_discards_draft() {
    let h = harness(
        StubClassifier::returning(vec![Ok(order_classification(
            "Sharma",
            vec![("rice", 1, 10)],
        ))]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "1 rice for Sharma"))
        .await
        .unwrap();
    let order_id = current_order_id(&h).await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "cancel"))
        .await
        .unwrap();

    let details = h.repo.get_order_with_items(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "cancelled");
    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());
}

#[tokio::test]
async fn unrelated_reply_in_confirmation_reclassifies() {
    let h = harness(
        StubClassifier::returning(vec![
            Ok(order_classification("Sharma", vec![("rice", 1, 10)])),
            Ok(Classification {
                intent: Intent::Chat,
                reply_text: Some("Happy to help!".to_string()),
            }),
        ]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "1 rice for Sharma"))
        .await
        .unwrap();
    let order_id = current_order_id(&h).await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "what time do you close?"))
        .await
        .unwrap();

    assert_eq!(h.channel.last_body(), "Happy to help!");
    // The pending confirmation was replaced, not resolved.
    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());
    let details = h.repo.get_order_with_items(order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "draft");
}

#[tokio::test]
async fn classifier_failure_sends_fallback() {
    let h = harness(
        StubClassifier::returning(vec![Err(ClassifierError::Network(
            "connection refused".to_string(),
        ))]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "hello"))
        .await
        .unwrap();

    assert!(!h.channel.sent.lock().unwrap().is_empty());
    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());
}

#[tokio::test]
async fn invalid_items_get_a_helpful_reply_and_no_order() {
    let h = harness(
        StubClassifier::returning(vec![Ok(Classification {
            intent: Intent::CreateOrder {
                customer_name: "Sharma".to_string(),
                items: vec![LineItemDraft {
                    product: "rice".to_string(),
                    qty: json!("a few"),
                    rate: json!(50),
                }],
            },
            reply_text: None,
        })]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "some rice for Sharma"))
        .await
        .unwrap();

    assert!(h.channel.last_body().contains("⚠️"));
    let (tag, _) = h.state.get_state(MERCHANT).await.unwrap();
    assert!(tag.is_none());

    let mut sess = h.repo.session().await.unwrap();
    let row = sess
        .query_one("SELECT COUNT(*) AS n FROM orders", &[])
        .await
        .unwrap()
        .unwrap();
    sess.commit().await.unwrap();
    assert_eq!(row.require_i64("n").unwrap(), 0);
}

#[tokio::test]
async fn reminder_intent_saves_task_and_replies() {
    let h = harness(
        StubClassifier::returning(vec![Ok(Classification {
            intent: Intent::Reminder {
                details: "pay the supplier".to_string(),
                time: Some("2026-09-01 10:00:00".to_string()),
            },
            reply_text: Some("⏰ I'll remind you!".to_string()),
        })]),
        None,
    )
    .await;

    h.service
        .handle_event(&InboundEvent::new(MERCHANT, "remind me to pay the supplier"))
        .await
        .unwrap();

    assert_eq!(h.channel.last_body(), "⏰ I'll remind you!");
    let mut sess = h.repo.session().await.unwrap();
    let row = sess
        .query_one("SELECT COUNT(*) AS n FROM tasks", &[])
        .await
        .unwrap()
        .unwrap();
    sess.commit().await.unwrap();
    assert_eq!(row.require_i64("n").unwrap(), 1);
}
