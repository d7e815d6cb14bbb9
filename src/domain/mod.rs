//! Domain layer - Core business logic with no external dependencies
//!
//! This layer contains:
//! - Entities: Core business objects (User, Customer, Order, InboundEvent)
//! - Traits: Abstractions for infrastructure (Channel, Classifier, InvoiceRenderer)
//! - Phone: Canonical phone identity normalization

pub mod entities;
pub mod phone;
pub mod traits;
