use serde::{Deserialize, Serialize};

/// A merchant account, keyed by canonical phone identity.
///
/// Created lazily on first contact and never deleted in normal operation.
/// `current_state` / `state_metadata` track the in-progress conversation
/// flow; a `None` state means no active flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub phone: String,
    pub subscription_tier: String,
    pub credits_remaining: f64,
    pub subscription_active: bool,
    pub subscription_expiry: Option<String>,
    pub razorpay_customer_id: Option<String>,
    pub business_name: Option<String>,
    pub gstin: Option<String>,
    pub preferred_language: String,
    pub current_state: Option<String>,
    pub state_metadata: String,
    pub created_at: Option<String>,
}
