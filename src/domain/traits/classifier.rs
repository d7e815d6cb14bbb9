use async_trait::async_trait;

use crate::application::errors::ClassifierError;
use crate::domain::entities::{Classification, ClassifierInput};

/// Classifier trait - turns free-form merchant input into a structured
/// intent, extraction payload and reply text.
///
/// Implementations degrade malformed model output to a `Chat` fallback
/// internally; an `Err` is reserved for transport-level failures.
#[async_trait]
pub trait Classifier: Send + Sync {
    async fn classify(
        &self,
        merchant_phone: &str,
        input: ClassifierInput,
        known_products: &[String],
    ) -> Result<Classification, ClassifierError>;
}
