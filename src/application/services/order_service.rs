//! Order draft builder - the transactional core
//!
//! Resolves the merchant, fuzzy-resolves or creates the customer, inserts
//! the draft header and every line item, and persists the accumulated
//! total — header, items and total commit together or not at all.

use serde_json::Value;

use crate::application::errors::BotError;
use crate::domain::entities::{DraftOrder, InvalidItemPolicy, LineItemDraft};
use crate::infrastructure::database::{Repository, StorageSession};

pub struct OrderService {
    repo: Repository,
    policy: InvalidItemPolicy,
}

impl OrderService {
    pub fn new(repo: Repository, policy: InvalidItemPolicy) -> Self {
        Self { repo, policy }
    }

    /// Build a complete draft order. Customer resolution, header, items
    /// and total all commit in one transaction; any failure rolls the
    /// whole draft back so a partial order is never observable.
    pub async fn create_draft_order(
        &self,
        merchant_phone: &str,
        customer_name: &str,
        items: &[LineItemDraft],
    ) -> Result<DraftOrder, BotError> {
        if items.is_empty() {
            return Err(BotError::Validation("no items in order".to_string()));
        }

        // Merchant resolution is idempotent and commits on its own; the
        // draft itself is the atomic unit.
        let merchant = self.repo.get_or_create_user(merchant_phone).await?;

        let mut sess = self.repo.session().await?;
        let result = self
            .build_draft(&mut *sess, merchant.id, customer_name, items)
            .await;
        match result {
            Ok(draft) => {
                sess.commit().await.map_err(BotError::from)?;
                tracing::info!(
                    order_id = draft.order_id,
                    total = draft.total,
                    lines = draft.line_count,
                    "Draft order created"
                );
                Ok(draft)
            }
            Err(e) => {
                if let Err(rb) = sess.rollback().await {
                    tracing::warn!("draft rollback failed: {}", rb);
                }
                Err(e)
            }
        }
    }

    async fn build_draft(
        &self,
        sess: &mut dyn StorageSession,
        merchant_id: i64,
        customer_name: &str,
        items: &[LineItemDraft],
    ) -> Result<DraftOrder, BotError> {
        let customer_id = self
            .repo
            .find_or_create_customer(sess, merchant_id, customer_name)
            .await?;
        let order_id = self
            .repo
            .insert_order_header(sess, merchant_id, customer_id)
            .await?;

        let mut total = 0.0;
        let mut line_count = 0usize;
        for (idx, item) in items.iter().enumerate() {
            let qty = coerce_number(&item.qty, 1.0);
            let rate = coerce_number(&item.rate, 0.0);
            let (qty, rate) = match (qty, rate) {
                (Some(q), Some(r)) => (q, r),
                (q, r) => {
                    let field = if q.is_none() { "quantity" } else { "rate" };
                    match self.policy {
                        InvalidItemPolicy::Abort => {
                            return Err(BotError::Validation(format!(
                                "line {} ({}): non-numeric {}",
                                idx + 1,
                                item.product,
                                field
                            )));
                        }
                        InvalidItemPolicy::Skip => {
                            tracing::warn!(
                                line = idx + 1,
                                product = %item.product,
                                "skipping line with non-numeric {}",
                                field
                            );
                            continue;
                        }
                    }
                }
            };

            let line_total = qty * rate;
            self.repo
                .insert_order_item(sess, order_id, &item.product, qty, rate, line_total)
                .await?;
            total += line_total;
            line_count += 1;
        }

        // A header with zero lines must never commit, even under the
        // skip policy.
        if line_count == 0 {
            return Err(BotError::Validation(
                "every item line was invalid".to_string(),
            ));
        }

        self.repo.update_order_total(sess, order_id, total).await?;

        Ok(DraftOrder {
            order_id,
            customer_name: customer_name.trim().to_string(),
            total,
            line_count,
        })
    }
}

/// Coerce a classifier-supplied quantity or rate to a number. Absent
/// values take the given default (the classifier may omit them); present
/// but non-numeric values are a validation failure, reported as `None`.
fn coerce_number(value: &Value, default: f64) -> Option<f64> {
    match value {
        Value::Null => Some(default),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn coerces_numbers_and_numeric_strings() {
        assert_eq!(coerce_number(&json!(2), 1.0), Some(2.0));
        assert_eq!(coerce_number(&json!(2.5), 1.0), Some(2.5));
        assert_eq!(coerce_number(&json!("50"), 1.0), Some(50.0));
        assert_eq!(coerce_number(&json!(" 50.5 "), 1.0), Some(50.5));
    }

    #[test]
    fn absent_values_take_default() {
        assert_eq!(coerce_number(&Value::Null, 1.0), Some(1.0));
        assert_eq!(coerce_number(&Value::Null, 0.0), Some(0.0));
    }

    #[test]
    fn garbage_is_rejected() {
        assert_eq!(coerce_number(&json!("two kilos"), 1.0), None);
        assert_eq!(coerce_number(&json!({"qty": 2}), 1.0), None);
        assert_eq!(coerce_number(&json!([2]), 1.0), None);
    }
}
