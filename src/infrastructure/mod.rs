//! Infrastructure layer - External concerns
//!
//! This layer contains:
//! - Config: Configuration loading
//! - Database: Dual-dialect persistence (SQLite / Postgres)
//! - Adapters: Messaging channel integrations (Twilio WhatsApp, console)
//! - Classifier: Groq-backed intent extraction
//! - Renderer: Invoice artifact generation

pub mod adapters;
pub mod classifier;
pub mod config;
pub mod database;
pub mod renderer;
