//! Stateful polling worker that drives notification delivery.
//!
//! The hosting process constructs a [`NotificationWorker`] with its store
//! and transport implementations, calls [`NotificationWorker::start`], and
//! the worker runs until [`NotificationWorker::stop`]. There is no CLI or
//! wire surface here.

pub mod worker;

pub use worker::{DeliveryOutcome, NotificationWorker, REMINDER_LOOKBACK_SECS};
