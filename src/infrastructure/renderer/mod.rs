//! Invoice renderer - HTTP render service client
//!
//! Posts the full order payload to an external render service and hands
//! back the artifact URL. Rendering is always best-effort: any failure
//! (no endpoint, missing order, transport, bad response) returns `None`
//! and the confirmation flow proceeds without a PDF link.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::domain::entities::{OrderDetails, OrderItem};
use crate::domain::traits::InvoiceRenderer;
use crate::infrastructure::database::Repository;

pub struct HttpInvoiceRenderer {
    repo: Repository,
    client: Client,
    endpoint: Option<String>,
}

#[derive(Serialize)]
struct RenderRequest<'a> {
    order_id: i64,
    invoice_number: &'a str,
    business_name: &'a str,
    merchant_phone: &'a str,
    customer_name: &'a str,
    customer_phone: Option<&'a str>,
    total: f64,
    items: Vec<RenderItem<'a>>,
    base_url: &'a str,
}

#[derive(Serialize)]
struct RenderItem<'a> {
    product: &'a str,
    quantity: f64,
    unit_price: f64,
    total_price: f64,
}

#[derive(Deserialize)]
struct RenderResponse {
    url: String,
}

impl HttpInvoiceRenderer {
    pub fn new(repo: Repository, endpoint: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            repo,
            client,
            endpoint,
        }
    }

    fn request_payload<'a>(
        details: &'a OrderDetails,
        base_url: &'a str,
        invoice_number: &'a str,
    ) -> RenderRequest<'a> {
        RenderRequest {
            order_id: details.order.id,
            invoice_number,
            business_name: details.business_display_name(),
            merchant_phone: &details.merchant_phone,
            customer_name: &details.customer_name,
            customer_phone: details.customer_phone.as_deref(),
            total: details.order.final_amount,
            items: details.items.iter().map(render_item).collect(),
            base_url,
        }
    }
}

/// Rendering happens while the order is still a draft, so the invoice
/// number is usually not stamped yet; derive the same number confirmation
/// will assign.
fn effective_invoice_number(details: &OrderDetails) -> String {
    details
        .order
        .invoice_number
        .clone()
        .unwrap_or_else(|| format!("INV-{:04}", details.order.id))
}

fn render_item(item: &OrderItem) -> RenderItem<'_> {
    RenderItem {
        product: &item.product_name,
        quantity: item.quantity,
        unit_price: item.unit_price,
        total_price: item.total_price,
    }
}

#[async_trait]
impl InvoiceRenderer for HttpInvoiceRenderer {
    async fn render(&self, order_id: i64, base_url: &str) -> Option<String> {
        let endpoint = self.endpoint.as_deref()?;

        let details = match self.repo.get_order_with_items(order_id).await {
            Ok(Some(details)) => details,
            Ok(None) => {
                tracing::warn!(order_id, "render requested for unknown order");
                return None;
            }
            Err(e) => {
                tracing::warn!(order_id, "order fetch for render failed: {}", e);
                return None;
            }
        };

        let invoice_number = effective_invoice_number(&details);
        let payload = Self::request_payload(&details, base_url, &invoice_number);
        let response = match self.client.post(endpoint).json(&payload).send().await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(order_id, "render request failed: {}", e);
                return None;
            }
        };

        if !response.status().is_success() {
            tracing::warn!(order_id, status = %response.status(), "render service error");
            return None;
        }

        match response.json::<RenderResponse>().await {
            Ok(r) => Some(r.url),
            Err(e) => {
                tracing::warn!(order_id, "render response parse failed: {}", e);
                None
            }
        }
    }
}
