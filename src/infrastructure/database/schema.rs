//! Schema manager - idempotent table creation and additive migrations
//!
//! Runs once per process start. Only ever creates tables, indexes and
//! columns; never drops or renames, and never fails startup because the
//! schema is already current.

use crate::application::errors::StorageError;

use super::{SqlValue, StorageBackend, StorageSession};

/// Create every required table if absent and apply guarded column
/// migrations. Running this N times yields the same schema as running it
/// once.
pub async fn ensure_schema(backend: &dyn StorageBackend) -> Result<(), StorageError> {
    let dialect = backend.dialect();
    let pk = dialect.pk_type();
    let fk = dialect.ref_type();
    let ts = dialect.timestamp_default();

    let mut sess = backend.session().await?;
    let result = create_tables(&mut *sess, pk, fk, ts).await;
    match result {
        Ok(()) => {
            sess.commit().await?;
        }
        Err(e) => {
            if let Err(rb) = sess.rollback().await {
                tracing::warn!("schema rollback failed: {}", rb);
            }
            return Err(e);
        }
    }
    // Release the connection guard before opening migration sessions.
    drop(sess);

    apply_migrations(backend).await?;
    tracing::info!(dialect = ?dialect, "Schema initialized");
    Ok(())
}

async fn create_tables(
    sess: &mut dyn StorageSession,
    pk: &str,
    fk: &str,
    ts: &str,
) -> Result<(), StorageError> {
    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS users (
                id {pk},
                phone TEXT UNIQUE NOT NULL,
                created_at TIMESTAMP {ts},
                subscription_tier VARCHAR(20) DEFAULT 'free',
                credits_remaining FLOAT DEFAULT 30.0,
                subscription_active BOOLEAN DEFAULT FALSE,
                subscription_expiry TIMESTAMP,
                razorpay_customer_id TEXT,
                business_name TEXT,
                gstin TEXT,
                preferred_language TEXT DEFAULT 'hi',
                current_state VARCHAR(100),
                state_metadata TEXT DEFAULT '{{}}'
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS customers (
                id {pk},
                merchant_id {fk} NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                phone TEXT,
                gstin TEXT,
                billing_address TEXT,
                email TEXT,
                current_balance FLOAT DEFAULT 0.0,
                created_at TIMESTAMP {ts},
                UNIQUE(merchant_id, phone)
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS products (
                id {pk},
                merchant_id {fk} NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                name TEXT NOT NULL,
                alias TEXT,
                description TEXT,
                unit VARCHAR(20) DEFAULT 'pcs',
                price FLOAT DEFAULT 0.0,
                stock_qty FLOAT DEFAULT 0.0,
                hsn_code TEXT,
                gst_rate FLOAT DEFAULT 0.0,
                created_at TIMESTAMP {ts}
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS orders (
                id {pk},
                merchant_id {fk} NOT NULL REFERENCES users(id) ON DELETE CASCADE,
                customer_id {fk} REFERENCES customers(id),
                invoice_number TEXT,
                invoice_date TIMESTAMP {ts},
                due_date TIMESTAMP,
                final_amount FLOAT DEFAULT 0.0,
                status VARCHAR(20) DEFAULT 'draft',
                payment_status VARCHAR(20) DEFAULT 'unpaid',
                pdf_url TEXT,
                notes TEXT,
                created_at TIMESTAMP {ts}
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS order_items (
                id {pk},
                order_id {fk} NOT NULL REFERENCES orders(id) ON DELETE CASCADE,
                product_id {fk} REFERENCES products(id),
                product_name TEXT NOT NULL,
                quantity FLOAT NOT NULL,
                unit_price FLOAT NOT NULL,
                gst_rate FLOAT DEFAULT 0.0,
                total_price FLOAT NOT NULL
            )"
        ),
        &[],
    )
    .await?;

    // Legacy tables kept for older deployments.
    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS meeting_notes (
                id {pk},
                phone TEXT,
                audio_file TEXT,
                transcript TEXT,
                summary TEXT,
                message_sid TEXT,
                created_at TIMESTAMP {ts}
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        &format!(
            "CREATE TABLE IF NOT EXISTS tasks (
                id {pk},
                user_id {fk},
                title TEXT,
                description TEXT,
                due_at TIMESTAMP,
                status VARCHAR(20),
                metadata TEXT,
                created_at TIMESTAMP {ts}
            )"
        ),
        &[],
    )
    .await?;

    sess.execute(
        "CREATE INDEX IF NOT EXISTS idx_customers_merchant ON customers(merchant_id)",
        &[],
    )
    .await?;
    sess.execute(
        "CREATE INDEX IF NOT EXISTS idx_orders_merchant ON orders(merchant_id)",
        &[],
    )
    .await?;
    sess.execute(
        "CREATE INDEX IF NOT EXISTS idx_order_items_order ON order_items(order_id)",
        &[],
    )
    .await?;

    Ok(())
}

/// Additive column migrations for schemas created before the conversation
/// state columns existed. A column is only added when absent, so a current
/// schema is a no-op.
async fn apply_migrations(backend: &dyn StorageBackend) -> Result<(), StorageError> {
    add_column_if_missing(backend, "users", "current_state", "VARCHAR(100)").await?;
    add_column_if_missing(backend, "users", "state_metadata", "TEXT DEFAULT '{}'").await?;
    Ok(())
}

async fn add_column_if_missing(
    backend: &dyn StorageBackend,
    table: &str,
    column: &str,
    definition: &str,
) -> Result<(), StorageError> {
    let mut sess = backend.session().await?;
    let exists = column_exists(&mut *sess, table, column).await?;
    if exists {
        sess.commit().await?;
        return Ok(());
    }

    tracing::info!(table, column, "Adding missing column");
    let result = sess
        .execute(
            &format!("ALTER TABLE {} ADD COLUMN {} {}", table, column, definition),
            &[],
        )
        .await;
    match result {
        Ok(_) => sess.commit().await,
        Err(e) => {
            if let Err(rb) = sess.rollback().await {
                tracing::warn!("migration rollback failed: {}", rb);
            }
            Err(e)
        }
    }
}

async fn column_exists(
    sess: &mut dyn StorageSession,
    table: &str,
    column: &str,
) -> Result<bool, StorageError> {
    let sql = match sess.dialect() {
        super::Dialect::Sqlite => {
            "SELECT COUNT(*) AS n FROM pragma_table_info($1) WHERE name = $2"
        }
        super::Dialect::Postgres => {
            "SELECT COUNT(*) AS n FROM information_schema.columns \
             WHERE table_name = $1 AND column_name = $2"
        }
    };
    let row = sess
        .query_one(sql, &[SqlValue::from(table), SqlValue::from(column)])
        .await?
        .ok_or_else(|| StorageError::Execution("column check returned no row".to_string()))?;
    Ok(row.require_i64("n")? > 0)
}
