//! Conversation state store - one (tag, metadata) pair per phone identity
//!
//! State must always be readable: a missing row or a corrupt metadata blob
//! degrades to `(None, {})` rather than failing the read. Writes lazily
//! create the user row.

use serde_json::Value;

use crate::application::errors::StorageError;
use crate::domain::phone::normalize_phone;

use super::{Repository, SqlValue};

#[derive(Clone)]
pub struct StateStore {
    repo: Repository,
}

impl StateStore {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Read the current state. `(None, {})` when the user has no row, no
    /// active flow, or the stored metadata fails to parse — a corrupt blob
    /// means the flow context is unusable, so the whole pair degrades
    /// (deliberate swallow, logged here).
    pub async fn get_state(&self, raw_phone: &str) -> Result<(Option<String>, Value), StorageError> {
        let phone = normalize_phone(raw_phone);
        let mut sess = self.repo.session().await?;
        let row = sess
            .query_one(
                "SELECT current_state, state_metadata FROM users WHERE phone = $1",
                &[SqlValue::from(phone.as_str())],
            )
            .await?;
        sess.commit().await?;

        let Some(row) = row else {
            return Ok((None, empty_object()));
        };

        let tag = row.get_string("current_state");
        let raw_meta = row.get_str("state_metadata").unwrap_or("{}");
        match serde_json::from_str::<Value>(raw_meta) {
            Ok(meta) if meta.is_object() => Ok((tag, meta)),
            Ok(_) | Err(_) => {
                tracing::warn!(%phone, "corrupt state metadata, degrading to idle");
                Ok((None, empty_object()))
            }
        }
    }

    /// Write the state pair, creating the user row if absent. A `None` tag
    /// clears the active flow.
    pub async fn set_state(
        &self,
        raw_phone: &str,
        tag: Option<&str>,
        metadata: &Value,
    ) -> Result<(), StorageError> {
        let phone = normalize_phone(raw_phone);
        self.repo.get_or_create_user(&phone).await?;

        let meta_str = metadata.to_string();
        let mut sess = self.repo.session().await?;
        sess.execute(
            "UPDATE users SET current_state = $1, state_metadata = $2 WHERE phone = $3",
            &[
                SqlValue::from(tag),
                SqlValue::from(meta_str),
                SqlValue::from(phone.as_str()),
            ],
        )
        .await?;
        sess.commit().await?;
        Ok(())
    }
}

fn empty_object() -> Value {
    Value::Object(serde_json::Map::new())
}
