//! Event bus and audit infrastructure for the timer subsystem.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`ModerationEvent`] — the event envelope for timer activity.
//! - [`EventPersistence`] — background service that durably writes every
//!   event to the `events` table.
//! - [`WebhookFanout`] — optional external delivery of events via HTTP.
//! - [`BusNotifier`] — the engine's notification/audit hook, publishing
//!   to the bus without ever blocking a firing.

pub mod bus;
pub mod delivery;
pub mod hook;
pub mod persistence;

pub use bus::{EventBus, ModerationEvent};
pub use delivery::{WebhookDelivery, WebhookFanout};
pub use hook::BusNotifier;
pub use persistence::EventPersistence;
