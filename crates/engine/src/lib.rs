//! Pure decision components of the TaskHerald notification engine.
//!
//! Everything here is deterministic given its inputs: content builders,
//! scheduling decisions, and the in-memory quota/cooldown bookkeeping. The
//! stateful orchestration lives in `taskherald-notifier`.

pub mod clock;
pub mod content;
pub mod cooldown;
pub mod ratelimit;
pub mod scheduler;
