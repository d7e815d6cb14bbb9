use async_trait::async_trait;

/// Invoice renderer trait - turns a committed order into a retrievable
/// invoice artifact reference.
///
/// `None` signals render failure and is always a non-fatal degraded path:
/// the order stays saved and the merchant gets a fallback reply.
#[async_trait]
pub trait InvoiceRenderer: Send + Sync {
    async fn render(&self, order_id: i64, base_url: &str) -> Option<String>;
}
