//! Channel adapters - messaging platform integrations

pub mod console;
pub mod twilio;

pub use console::ConsoleAdapter;
pub use twilio::TwilioAdapter;
