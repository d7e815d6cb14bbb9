//! Storage integration tests over the embedded SQLite backend
//! Run with: cargo test --test storage_test

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use mina_bot::application::errors::{BotError, StorageError};
use mina_bot::application::services::OrderService;
use mina_bot::domain::entities::{InvalidItemPolicy, LineItemDraft};
use mina_bot::infrastructure::database::{
    schema, Dialect, Record, Repository, SqlValue, StateStore, StorageBackend, StorageSession,
};
use mina_bot::infrastructure::database::sqlite::SqliteBackend;
use serde_json::json;
use std::sync::Once;

static INIT: Once = Once::new();

async fn setup() -> Repository {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
    schema::ensure_schema(backend.as_ref()).await.unwrap();
    Repository::new(backend)
}

fn item(product: &str, qty: serde_json::Value, rate: serde_json::Value) -> LineItemDraft {
    LineItemDraft {
        product: product.to_string(),
        qty,
        rate,
    }
}

async fn count(repo: &Repository, sql: &str) -> i64 {
    let mut sess = repo.session().await.unwrap();
    let row = sess.query_one(sql, &[]).await.unwrap().unwrap();
    sess.commit().await.unwrap();
    row.require_i64("n").unwrap()
}

#[tokio::test]
async fn schema_is_idempotent() {
    let backend: Arc<dyn StorageBackend> = Arc::new(SqliteBackend::in_memory().unwrap());
    schema::ensure_schema(backend.as_ref()).await.unwrap();
    schema::ensure_schema(backend.as_ref()).await.unwrap();

    // Still usable after the second run.
    let repo = Repository::new(backend);
    let user = repo.get_or_create_user("+919876543210").await.unwrap();
    assert!(user.id > 0);
}

#[tokio::test]
async fn get_or_create_user_is_idempotent_and_normalizes() {
    let repo = setup().await;
    let a = repo.get_or_create_user("whatsapp:+919876543210").await.unwrap();
    let b = repo.get_or_create_user("+919876543210").await.unwrap();
    assert_eq!(a.id, b.id);
    assert_eq!(b.phone, "+919876543210");
    assert_eq!(b.subscription_tier, "free");
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM users").await, 1);
}

#[tokio::test]
async fn user_lookup_without_create() {
    let repo = setup().await;
    assert!(repo.get_user_by_phone("+913333333333").await.unwrap().is_none());

    repo.get_or_create_user("whatsapp:+913333333333").await.unwrap();
    let user = repo
        .get_user_by_phone("whatsapp:+913333333333")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.phone, "+913333333333");
}

#[tokio::test]
async fn customer_row_is_fetchable_after_draft() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);
    let draft = orders
        .create_draft_order("+919876543210", "Sharma", &[item("rice", json!(1), json!(10))])
        .await
        .unwrap();

    let details = repo.get_order_with_items(draft.order_id).await.unwrap().unwrap();
    let customer = repo
        .get_customer(details.order.customer_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(customer.name, "Sharma");
    assert_eq!(customer.current_balance, 0.0);
}

#[tokio::test]
async fn state_round_trips() {
    let repo = setup().await;
    let state = StateStore::new(repo.clone());

    let (tag, meta) = state.get_state("+911111111111").await.unwrap();
    assert!(tag.is_none());
    assert!(meta.as_object().unwrap().is_empty());

    state
        .set_state("+911111111111", Some("CONFIRM_ORDER"), &json!({"order_id": 7}))
        .await
        .unwrap();
    let (tag, meta) = state.get_state("whatsapp:+911111111111").await.unwrap();
    assert_eq!(tag.as_deref(), Some("CONFIRM_ORDER"));
    assert_eq!(meta["order_id"], 7);

    state
        .set_state("+911111111111", None, &json!({}))
        .await
        .unwrap();
    let (tag, _) = state.get_state("+911111111111").await.unwrap();
    assert!(tag.is_none());
}

#[tokio::test]
async fn corrupt_state_metadata_degrades_to_idle() {
    let repo = setup().await;
    let state = StateStore::new(repo.clone());
    repo.get_or_create_user("+912222222222").await.unwrap();

    let mut sess = repo.session().await.unwrap();
    sess.execute(
        "UPDATE users SET current_state = 'CONFIRM_ORDER', state_metadata = 'not json' \
         WHERE phone = $1",
        &[SqlValue::from("+912222222222")],
    )
    .await
    .unwrap();
    sess.commit().await.unwrap();
    drop(sess);

    let (tag, meta) = state.get_state("+912222222222").await.unwrap();
    assert!(tag.is_none());
    assert!(meta.as_object().unwrap().is_empty());
}

#[tokio::test]
async fn draft_order_accumulates_totals() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);

    let draft = orders
        .create_draft_order(
            "+919876543210",
            "Sharma Traders",
            &[
                item("rice bag", json!(2), json!("50")),
                item("oil tin", json!(3), json!(20)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(draft.total, 160.0);
    assert_eq!(draft.line_count, 2);

    let details = repo.get_order_with_items(draft.order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "draft");
    assert_eq!(details.order.final_amount, 160.0);
    assert_eq!(details.customer_name, "Sharma Traders");
    assert_eq!(details.items.len(), 2);
    assert_eq!(details.items[0].product_name, "rice bag");
    assert_eq!(details.items[0].total_price, 100.0);
}

#[tokio::test]
async fn invalid_line_aborts_whole_draft() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);

    let err = orders
        .create_draft_order(
            "+919876543210",
            "Gupta Stores",
            &[
                item("rice", json!(2), json!(50)),
                item("oil", json!("a few"), json!(20)),
                item("soap", json!(1), json!(10)),
            ],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));

    // Nothing from the aborted transaction is visible, customer included.
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM orders").await, 0);
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM order_items").await, 0);
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM customers").await, 0);
}

#[tokio::test]
async fn skip_policy_drops_bad_lines_only() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Skip);

    let draft = orders
        .create_draft_order(
            "+919876543210",
            "Gupta Stores",
            &[
                item("rice", json!(2), json!(50)),
                item("oil", json!("a few"), json!(20)),
            ],
        )
        .await
        .unwrap();

    assert_eq!(draft.line_count, 1);
    assert_eq!(draft.total, 100.0);
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM order_items").await, 1);
}

#[tokio::test]
async fn skip_policy_still_rejects_all_invalid() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Skip);

    let err = orders
        .create_draft_order(
            "+919876543210",
            "Gupta Stores",
            &[item("oil", json!("a few"), json!("later"))],
        )
        .await
        .unwrap_err();
    assert!(matches!(err, BotError::Validation(_)));
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM orders").await, 0);
}

#[tokio::test]
async fn fuzzy_customer_match_reuses_row() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);

    orders
        .create_draft_order(
            "+919876543210",
            "Sharma Traders",
            &[item("rice", json!(1), json!(50))],
        )
        .await
        .unwrap();
    orders
        .create_draft_order(
            "+919876543210",
            "sharma",
            &[item("oil", json!(1), json!(20))],
        )
        .await
        .unwrap();

    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM customers").await, 1);
    assert_eq!(count(&repo, "SELECT COUNT(*) AS n FROM orders").await, 2);
}

#[tokio::test]
async fn confirm_stamps_invoice_and_pdf() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);

    let draft = orders
        .create_draft_order(
            "+919876543210",
            "Sharma",
            &[item("rice", json!(2), json!(50))],
        )
        .await
        .unwrap();

    repo.confirm_order(draft.order_id, Some("https://cdn.example.com/inv.pdf"))
        .await
        .unwrap();
    let details = repo.get_order_with_items(draft.order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "confirmed");
    assert_eq!(
        details.order.invoice_number.as_deref(),
        Some(format!("INV-{:04}", draft.order_id).as_str())
    );
    assert_eq!(
        details.order.pdf_url.as_deref(),
        Some("https://cdn.example.com/inv.pdf")
    );
}

#[tokio::test]
async fn cancel_marks_order_cancelled() {
    let repo = setup().await;
    let orders = OrderService::new(repo.clone(), InvalidItemPolicy::Abort);
    let draft = orders
        .create_draft_order("+919876543210", "Sharma", &[item("rice", json!(1), json!(10))])
        .await
        .unwrap();

    repo.cancel_order(draft.order_id).await.unwrap();
    let details = repo.get_order_with_items(draft.order_id).await.unwrap().unwrap();
    assert_eq!(details.order.status, "cancelled");
}

#[tokio::test]
async fn missing_order_reads_as_none() {
    let repo = setup().await;
    assert!(repo.get_order_with_items(9999).await.unwrap().is_none());
}

/// Backend scripted to make the user insert lose the unique-phone race:
/// the first session sees no row and fails the insert with a constraint
/// violation, every later session sees the row the "other worker" wrote.
struct RacingBackend {
    sessions: AtomicUsize,
}

struct RacingSession {
    index: usize,
}

fn stored_user_row() -> Record {
    let mut rec = Record::new();
    rec.insert("id", SqlValue::Int(42));
    rec.insert("phone", SqlValue::Text("+919876543210".to_string()));
    rec
}

#[async_trait]
impl StorageBackend for RacingBackend {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn session(&self) -> Result<Box<dyn StorageSession>, StorageError> {
        let index = self.sessions.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(RacingSession { index }))
    }
}

#[async_trait]
impl StorageSession for RacingSession {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    async fn execute(&mut self, sql: &str, _params: &[SqlValue]) -> Result<u64, StorageError> {
        if sql.starts_with("INSERT INTO users") {
            return Err(StorageError::Constraint(
                "UNIQUE constraint failed: users.phone".to_string(),
            ));
        }
        Ok(0)
    }

    async fn query_one(
        &mut self,
        sql: &str,
        _params: &[SqlValue],
    ) -> Result<Option<Record>, StorageError> {
        if sql.starts_with("SELECT * FROM users") && self.index > 0 {
            return Ok(Some(stored_user_row()));
        }
        Ok(None)
    }

    async fn query_all(
        &mut self,
        _sql: &str,
        _params: &[SqlValue],
    ) -> Result<Vec<Record>, StorageError> {
        Ok(Vec::new())
    }

    async fn last_insert_id(&mut self, _table: &str) -> Result<i64, StorageError> {
        Ok(42)
    }

    async fn commit(&mut self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

#[tokio::test]
async fn lost_user_insert_race_refetches_the_winning_row() {
    let backend = Arc::new(RacingBackend {
        sessions: AtomicUsize::new(0),
    });
    let repo = Repository::new(backend.clone() as Arc<dyn StorageBackend>);

    let user = repo.get_or_create_user("whatsapp:+919876543210").await.unwrap();
    assert_eq!(user.id, 42);
    assert_eq!(user.phone, "+919876543210");
    // The re-fetch ran in a fresh session after the rollback.
    assert_eq!(backend.sessions.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn reminder_lands_in_tasks() {
    let repo = setup().await;
    let user = repo.get_or_create_user("+919876543210").await.unwrap();
    let id = repo
        .insert_task(user.id, "call the distributor", Some("2026-09-01 10:00:00"))
        .await
        .unwrap();
    assert!(id > 0);

    let mut sess = repo.session().await.unwrap();
    let row = sess
        .query_one(
            "SELECT title, due_at, status FROM tasks WHERE id = $1",
            &[SqlValue::from(id)],
        )
        .await
        .unwrap()
        .unwrap();
    sess.commit().await.unwrap();
    assert_eq!(row.get_str("title"), Some("call the distributor"));
    assert_eq!(row.get_str("due_at"), Some("2026-09-01 10:00:00"));
    assert_eq!(row.get_str("status"), Some("pending"));
}
