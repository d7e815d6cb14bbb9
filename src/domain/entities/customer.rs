use serde::{Deserialize, Serialize};

/// A customer of one merchant.
///
/// Unique per (merchant, phone) when a phone is present; resolved by fuzzy
/// name match within the merchant's scope and created on first reference
/// from an order draft.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Customer {
    pub id: i64,
    pub merchant_id: i64,
    pub name: String,
    pub phone: Option<String>,
    pub gstin: Option<String>,
    pub billing_address: Option<String>,
    pub email: Option<String>,
    pub current_balance: f64,
    pub created_at: Option<String>,
}

/// A catalog product. Read-only from the core's point of view; surfaced to
/// the classifier as known item names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: i64,
    pub merchant_id: i64,
    pub name: String,
    pub alias: Option<String>,
    pub description: Option<String>,
    pub unit: String,
    pub price: f64,
    pub stock_qty: f64,
    pub hsn_code: Option<String>,
    pub gst_rate: f64,
}
