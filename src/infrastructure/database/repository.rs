//! Entity repository - CRUD over users, customers, products, orders
//!
//! The sole mutator of persisted rows. Session-owning operations wrap one
//! transaction each; the session-taking family (customer resolution, order
//! header/item/total writes) composes into the draft builder's single
//! transactional scope. Only normalized records cross this boundary.

use std::sync::Arc;

use crate::application::errors::StorageError;
use crate::domain::entities::{
    Customer, Order, OrderDetails, OrderItem, OrderStatus, Product, User,
};
use crate::domain::phone::normalize_phone;

use super::{insert_returning_id, Record, SqlValue, StorageBackend, StorageSession};

#[derive(Clone)]
pub struct Repository {
    backend: Arc<dyn StorageBackend>,
}

impl Repository {
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self { backend }
    }

    /// Open a transactional session for multi-statement callers
    /// (the draft builder).
    pub async fn session(&self) -> Result<Box<dyn StorageSession>, StorageError> {
        self.backend.session().await
    }

    // ---- users ----

    /// Look up a user by phone, inserting a defaulted row if absent.
    ///
    /// Safe under concurrent duplicate delivery: the unique constraint on
    /// phone turns the losing insert into a re-fetch.
    pub async fn get_or_create_user(&self, raw_phone: &str) -> Result<User, StorageError> {
        let phone = normalize_phone(raw_phone);
        let mut sess = self.backend.session().await?;

        if let Some(row) = self.select_user(&mut *sess, &phone).await? {
            sess.commit().await?;
            return user_from_record(&row);
        }

        match self.insert_user(&mut *sess, &phone).await {
            Ok(row) => {
                sess.commit().await?;
                user_from_record(&row)
            }
            Err(StorageError::Constraint(msg)) => {
                // Lost the insert race to a concurrent worker; the row
                // exists now, so re-fetch in a fresh transaction.
                tracing::debug!(%phone, "user insert raced: {}", msg);
                if let Err(e) = sess.rollback().await {
                    tracing::warn!("rollback after constraint failed: {}", e);
                }
                drop(sess);

                let mut sess = self.backend.session().await?;
                let row = self
                    .select_user(&mut *sess, &phone)
                    .await?
                    .ok_or_else(|| {
                        StorageError::Execution(format!(
                            "user {} missing after unique violation",
                            phone
                        ))
                    })?;
                sess.commit().await?;
                user_from_record(&row)
            }
            Err(e) => {
                if let Err(rb) = sess.rollback().await {
                    tracing::warn!("rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    pub async fn get_user_by_phone(&self, raw_phone: &str) -> Result<Option<User>, StorageError> {
        let phone = normalize_phone(raw_phone);
        let mut sess = self.backend.session().await?;
        let row = self.select_user(&mut *sess, &phone).await?;
        sess.commit().await?;
        row.as_ref().map(user_from_record).transpose()
    }

    async fn select_user(
        &self,
        sess: &mut dyn StorageSession,
        phone: &str,
    ) -> Result<Option<Record>, StorageError> {
        sess.query_one(
            "SELECT * FROM users WHERE phone = $1",
            &[SqlValue::from(phone)],
        )
        .await
    }

    async fn insert_user(
        &self,
        sess: &mut dyn StorageSession,
        phone: &str,
    ) -> Result<Record, StorageError> {
        if sess.dialect().supports_returning() {
            sess.query_one(
                "INSERT INTO users (phone) VALUES ($1) RETURNING *",
                &[SqlValue::from(phone)],
            )
            .await?
            .ok_or_else(|| StorageError::Execution("insert returned no row".to_string()))
        } else {
            sess.execute(
                "INSERT INTO users (phone) VALUES ($1)",
                &[SqlValue::from(phone)],
            )
            .await?;
            // Safe: same transaction as the insert, no interleaving writer.
            self.select_user(sess, phone).await?.ok_or_else(|| {
                StorageError::Execution("inserted user not visible in transaction".to_string())
            })
        }
    }

    // ---- products ----

    pub async fn list_products(&self, merchant_id: i64) -> Result<Vec<Product>, StorageError> {
        let mut sess = self.backend.session().await?;
        let rows = sess
            .query_all(
                "SELECT * FROM products WHERE merchant_id = $1 ORDER BY name",
                &[SqlValue::from(merchant_id)],
            )
            .await?;
        sess.commit().await?;
        rows.iter().map(product_from_record).collect()
    }

    // ---- customers ----

    /// Fuzzy-resolve a customer by case-insensitive substring match within
    /// the merchant's scope, creating one on miss. Runs inside the
    /// caller's transaction.
    pub async fn find_or_create_customer(
        &self,
        sess: &mut dyn StorageSession,
        merchant_id: i64,
        name: &str,
    ) -> Result<i64, StorageError> {
        let name = name.trim();
        let sql = format!(
            "SELECT id FROM customers WHERE merchant_id = $1 AND name {} $2",
            sess.dialect().like_operator()
        );
        let pattern = format!("%{}%", name);
        if let Some(row) = sess
            .query_one(&sql, &[SqlValue::from(merchant_id), SqlValue::from(pattern)])
            .await?
        {
            return row.require_i64("id");
        }

        insert_returning_id(
            sess,
            "INSERT INTO customers (merchant_id, name) VALUES ($1, $2)",
            &[SqlValue::from(merchant_id), SqlValue::from(name)],
            "customers",
        )
        .await
    }

    pub async fn get_customer(&self, customer_id: i64) -> Result<Option<Customer>, StorageError> {
        let mut sess = self.backend.session().await?;
        let row = sess
            .query_one(
                "SELECT * FROM customers WHERE id = $1",
                &[SqlValue::from(customer_id)],
            )
            .await?;
        sess.commit().await?;
        row.as_ref().map(customer_from_record).transpose()
    }

    // ---- orders ----

    /// Insert a `draft` order header, returning its id. Runs inside the
    /// caller's transaction.
    pub async fn insert_order_header(
        &self,
        sess: &mut dyn StorageSession,
        merchant_id: i64,
        customer_id: i64,
    ) -> Result<i64, StorageError> {
        insert_returning_id(
            sess,
            "INSERT INTO orders (merchant_id, customer_id, status) VALUES ($1, $2, $3)",
            &[
                SqlValue::from(merchant_id),
                SqlValue::from(customer_id),
                SqlValue::from(OrderStatus::Draft.as_str()),
            ],
            "orders",
        )
        .await
    }

    /// Insert one immutable order line. Runs inside the caller's
    /// transaction.
    pub async fn insert_order_item(
        &self,
        sess: &mut dyn StorageSession,
        order_id: i64,
        product_name: &str,
        quantity: f64,
        unit_price: f64,
        total_price: f64,
    ) -> Result<(), StorageError> {
        sess.execute(
            "INSERT INTO order_items (order_id, product_name, quantity, unit_price, total_price) \
             VALUES ($1, $2, $3, $4, $5)",
            &[
                SqlValue::from(order_id),
                SqlValue::from(product_name),
                SqlValue::from(quantity),
                SqlValue::from(unit_price),
                SqlValue::from(total_price),
            ],
        )
        .await?;
        Ok(())
    }

    /// Persist the accumulated total on the order header. Runs inside the
    /// caller's transaction.
    pub async fn update_order_total(
        &self,
        sess: &mut dyn StorageSession,
        order_id: i64,
        total: f64,
    ) -> Result<(), StorageError> {
        sess.execute(
            "UPDATE orders SET final_amount = $1 WHERE id = $2",
            &[SqlValue::from(total), SqlValue::from(order_id)],
        )
        .await?;
        Ok(())
    }

    /// Stamp a confirmed draft with its invoice number and rendered
    /// artifact reference (when rendering succeeded).
    pub async fn confirm_order(
        &self,
        order_id: i64,
        pdf_url: Option<&str>,
    ) -> Result<(), StorageError> {
        let invoice_number = format!("INV-{:04}", order_id);
        let mut sess = self.backend.session().await?;
        sess.execute(
            "UPDATE orders SET status = $1, invoice_number = $2, pdf_url = $3 WHERE id = $4",
            &[
                SqlValue::from(OrderStatus::Confirmed.as_str()),
                SqlValue::from(invoice_number),
                SqlValue::from(pdf_url),
                SqlValue::from(order_id),
            ],
        )
        .await?;
        sess.commit().await?;
        Ok(())
    }

    /// Mark a draft as discarded by the merchant.
    pub async fn cancel_order(&self, order_id: i64) -> Result<(), StorageError> {
        let mut sess = self.backend.session().await?;
        sess.execute(
            "UPDATE orders SET status = $1 WHERE id = $2",
            &[
                SqlValue::from(OrderStatus::Cancelled.as_str()),
                SqlValue::from(order_id),
            ],
        )
        .await?;
        sess.commit().await?;
        Ok(())
    }

    /// Join order, customer and merchant rows plus the full item list.
    /// Returns `None` when the order id does not exist.
    pub async fn get_order_with_items(
        &self,
        order_id: i64,
    ) -> Result<Option<OrderDetails>, StorageError> {
        let mut sess = self.backend.session().await?;
        let header = sess
            .query_one(
                "SELECT o.id, o.merchant_id, o.customer_id, o.invoice_number, o.final_amount, \
                        o.status, o.payment_status, o.pdf_url, o.notes, o.created_at, \
                        c.name AS customer_name, c.phone AS customer_phone, \
                        u.business_name, u.phone AS merchant_phone \
                 FROM orders o \
                 JOIN customers c ON o.customer_id = c.id \
                 JOIN users u ON o.merchant_id = u.id \
                 WHERE o.id = $1",
                &[SqlValue::from(order_id)],
            )
            .await?;

        let Some(header) = header else {
            sess.commit().await?;
            return Ok(None);
        };

        let item_rows = sess
            .query_all(
                "SELECT * FROM order_items WHERE order_id = $1 ORDER BY id",
                &[SqlValue::from(order_id)],
            )
            .await?;
        sess.commit().await?;

        let items = item_rows
            .iter()
            .map(item_from_record)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(OrderDetails {
            order: order_from_record(&header)?,
            customer_name: header.require_string("customer_name")?,
            customer_phone: header.get_string("customer_phone"),
            business_name: header.get_string("business_name"),
            merchant_phone: header.require_string("merchant_phone")?,
            items,
        }))
    }

    // ---- tasks (reminders) ----

    /// Record a reminder as a pending task. Unparseable due times go into
    /// the metadata payload instead of the timestamp column.
    pub async fn insert_task(
        &self,
        user_id: i64,
        title: &str,
        raw_time: Option<&str>,
    ) -> Result<i64, StorageError> {
        let due_at = raw_time.and_then(parse_due_time);
        let metadata = serde_json::json!({ "raw_time": raw_time }).to_string();

        let mut sess = self.backend.session().await?;
        let result = insert_returning_id(
            &mut *sess,
            "INSERT INTO tasks (user_id, title, due_at, status, metadata) \
             VALUES ($1, $2, $3, 'pending', $4)",
            &[
                SqlValue::from(user_id),
                SqlValue::from(title),
                SqlValue::from(due_at),
                SqlValue::from(metadata),
            ],
            "tasks",
        )
        .await;
        match result {
            Ok(id) => {
                sess.commit().await?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rb) = sess.rollback().await {
                    tracing::warn!("rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }
}

fn parse_due_time(raw: &str) -> Option<String> {
    let raw = raw.trim();
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(t) = chrono::NaiveDateTime::parse_from_str(raw, fmt) {
            return Some(t.format("%Y-%m-%d %H:%M:%S").to_string());
        }
    }
    None
}

// ---- record mapping ----

fn user_from_record(rec: &Record) -> Result<User, StorageError> {
    Ok(User {
        id: rec.require_i64("id")?,
        phone: rec.require_string("phone")?,
        subscription_tier: rec
            .get_string("subscription_tier")
            .unwrap_or_else(|| "free".to_string()),
        credits_remaining: rec.get_f64("credits_remaining").unwrap_or(30.0),
        subscription_active: rec.get_bool("subscription_active").unwrap_or(false),
        subscription_expiry: rec.get_string("subscription_expiry"),
        razorpay_customer_id: rec.get_string("razorpay_customer_id"),
        business_name: rec.get_string("business_name"),
        gstin: rec.get_string("gstin"),
        preferred_language: rec
            .get_string("preferred_language")
            .unwrap_or_else(|| "hi".to_string()),
        current_state: rec.get_string("current_state"),
        state_metadata: rec
            .get_string("state_metadata")
            .unwrap_or_else(|| "{}".to_string()),
        created_at: rec.get_string("created_at"),
    })
}

fn customer_from_record(rec: &Record) -> Result<Customer, StorageError> {
    Ok(Customer {
        id: rec.require_i64("id")?,
        merchant_id: rec.require_i64("merchant_id")?,
        name: rec.require_string("name")?,
        phone: rec.get_string("phone"),
        gstin: rec.get_string("gstin"),
        billing_address: rec.get_string("billing_address"),
        email: rec.get_string("email"),
        current_balance: rec.get_f64("current_balance").unwrap_or(0.0),
        created_at: rec.get_string("created_at"),
    })
}

fn product_from_record(rec: &Record) -> Result<Product, StorageError> {
    Ok(Product {
        id: rec.require_i64("id")?,
        merchant_id: rec.require_i64("merchant_id")?,
        name: rec.require_string("name")?,
        alias: rec.get_string("alias"),
        description: rec.get_string("description"),
        unit: rec.get_string("unit").unwrap_or_else(|| "pcs".to_string()),
        price: rec.get_f64("price").unwrap_or(0.0),
        stock_qty: rec.get_f64("stock_qty").unwrap_or(0.0),
        hsn_code: rec.get_string("hsn_code"),
        gst_rate: rec.get_f64("gst_rate").unwrap_or(0.0),
    })
}

fn order_from_record(rec: &Record) -> Result<Order, StorageError> {
    Ok(Order {
        id: rec.require_i64("id")?,
        merchant_id: rec.require_i64("merchant_id")?,
        customer_id: rec.require_i64("customer_id")?,
        invoice_number: rec.get_string("invoice_number"),
        final_amount: rec.get_f64("final_amount").unwrap_or(0.0),
        status: rec
            .get_string("status")
            .unwrap_or_else(|| "draft".to_string()),
        payment_status: rec
            .get_string("payment_status")
            .unwrap_or_else(|| "unpaid".to_string()),
        pdf_url: rec.get_string("pdf_url"),
        notes: rec.get_string("notes"),
        created_at: rec.get_string("created_at"),
    })
}

fn item_from_record(rec: &Record) -> Result<OrderItem, StorageError> {
    Ok(OrderItem {
        id: rec.require_i64("id")?,
        order_id: rec.require_i64("order_id")?,
        product_name: rec.require_string("product_name")?,
        quantity: rec.require_f64("quantity")?,
        unit_price: rec.require_f64("unit_price")?,
        total_price: rec.require_f64("total_price")?,
    })
}
