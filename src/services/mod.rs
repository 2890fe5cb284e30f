//! Business logic services.
//!
//! Services contain the key lifecycle logic separated from HTTP handlers.
//! They talk to storage only through the traits in [`crate::store`].

pub mod generator;
pub mod key_service;
pub mod notifier;
pub mod sweeper;
