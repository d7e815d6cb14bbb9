//! Domain traits - Abstractions for infrastructure implementations

pub mod channel;
pub mod classifier;
pub mod renderer;

pub use channel::Channel;
pub use classifier::Classifier;
pub use renderer::InvoiceRenderer;
