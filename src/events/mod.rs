//! Lifecycle events published during pipeline runs

pub mod bus;
pub mod event;

pub use bus::{DeliveryError, EventBus, EventHandler, SubscriptionId, SUPERVISOR_CHANNEL};
pub use event::{Event, EventDraft, EventKind, Recipient};
