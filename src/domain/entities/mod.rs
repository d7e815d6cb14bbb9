//! Domain entities - Core business objects with no external dependencies

pub mod customer;
pub mod event;
pub mod intent;
pub mod order;
pub mod user;

pub use customer::{Customer, Product};
pub use event::InboundEvent;
pub use intent::{Classification, ClassifierInput, Intent, LineItemDraft};
pub use order::{DraftOrder, InvalidItemPolicy, Order, OrderDetails, OrderItem, OrderStatus};
pub use user::User;
