//! Application layer - Use cases and business logic
//!
//! This layer contains:
//! - Services: Draft order building and conversation orchestration
//! - Worker: Queue consumption with per-phone serialization
//! - Errors: Domain-specific errors

pub mod errors;
pub mod services;
pub mod worker;
