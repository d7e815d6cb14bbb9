use serde::{Deserialize, Serialize};

/// Order lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Draft,
    Confirmed,
    Cancelled,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Draft => "draft",
            OrderStatus::Confirmed => "confirmed",
            OrderStatus::Cancelled => "cancelled",
        }
    }
}

/// An order header. Created as `draft` by the draft builder, later stamped
/// with status, invoice number and pdf reference by the confirmation step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: i64,
    pub merchant_id: i64,
    pub customer_id: i64,
    pub invoice_number: Option<String>,
    pub final_amount: f64,
    pub status: String,
    pub payment_status: String,
    pub pdf_url: Option<String>,
    pub notes: Option<String>,
    pub created_at: Option<String>,
}

/// A persisted order line. Immutable once inserted;
/// `quantity * unit_price == total_price` always holds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_name: String,
    pub quantity: f64,
    pub unit_price: f64,
    pub total_price: f64,
}

/// An order joined with its customer, merchant and line items, as consumed
/// by invoice rendering and reply composition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: Order,
    pub customer_name: String,
    pub customer_phone: Option<String>,
    pub business_name: Option<String>,
    pub merchant_phone: String,
    pub items: Vec<OrderItem>,
}

impl OrderDetails {
    /// Business name for invoices and replies, with a neutral default for
    /// merchants who never set one.
    pub fn business_display_name(&self) -> &str {
        self.business_name.as_deref().unwrap_or("My Business")
    }
}

/// Result of a successful draft build.
#[derive(Debug, Clone)]
pub struct DraftOrder {
    pub order_id: i64,
    pub customer_name: String,
    pub total: f64,
    pub line_count: usize,
}

/// What to do with a line item whose quantity or rate is not numeric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InvalidItemPolicy {
    /// Roll the whole draft back and report the bad line.
    Abort,
    /// Drop the bad line and keep the remainder of the draft.
    Skip,
}

impl Default for InvalidItemPolicy {
    fn default() -> Self {
        InvalidItemPolicy::Abort
    }
}
