//! Pure domain logic for the agora moderation platform.
//!
//! This crate has zero internal dependencies so it can be used by the
//! timer engine, the repository layer, and any future CLI tooling.

pub mod error;
pub mod timers;
pub mod types;
