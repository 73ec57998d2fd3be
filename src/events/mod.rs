//! In-process event bus and its standard subscribers.
//!
//! The orchestrator, tool runner, and reminder scheduler publish lifecycle
//! events here; observability, ingest, and audit subscribers react
//! independently. Delivery is synchronous on the publisher's thread.

pub mod bus;
pub mod subscribers;

pub use bus::{Event, EventBus, EventType, SubscriptionToken};
pub use subscribers::{wire_subscribers, SubscriberOptions, WiredSubscribers};
