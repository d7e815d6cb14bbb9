//! Application services - draft order building and conversation orchestration

pub mod conversation;
pub mod order_service;

pub use conversation::ConversationService;
pub use order_service::OrderService;
