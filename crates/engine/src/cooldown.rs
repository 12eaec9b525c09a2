//! Overdue cooldown — per-task suppression timers.
//!
//! After an overdue alert fires for a task, the task enters a cooldown
//! period during which no further overdue alerts are generated. This
//! prevents flooding the user's channels with repeats of the same condition
//! on every poll.
//!
//! State is held in-memory per task ID and is lost on restart; a restart can
//! therefore repeat at most one overdue alert per task within the window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

/// Default cooldown duration in seconds (1 hour).
pub const DEFAULT_OVERDUE_COOLDOWN_SECS: i64 = 3600;

/// In-memory overdue cooldown tracker.
#[derive(Debug)]
pub struct OverdueCooldown {
    window: Duration,
    last_fired: HashMap<Uuid, DateTime<Utc>>,
}

impl OverdueCooldown {
    pub fn new() -> Self {
        Self::with_window_secs(DEFAULT_OVERDUE_COOLDOWN_SECS)
    }

    pub fn with_window_secs(secs: i64) -> Self {
        Self {
            window: Duration::seconds(secs),
            last_fired: HashMap::new(),
        }
    }

    /// Whether an overdue alert may fire for this task at `now`.
    ///
    /// Returns `false` while a previous fire is within the window.
    pub fn allows(&self, task_id: Uuid, now: DateTime<Utc>) -> bool {
        match self.last_fired.get(&task_id) {
            Some(fired_at) => now - *fired_at >= self.window,
            None => true,
        }
    }

    /// Record that an overdue alert fired for this task at `now`.
    pub fn record(&mut self, task_id: Uuid, now: DateTime<Utc>) {
        self.last_fired.insert(task_id, now);
    }

    /// Drop entries whose window has fully elapsed. Called from the cleanup
    /// pass so the map does not grow without bound.
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let window = self.window;
        self.last_fired.retain(|_, fired_at| now - *fired_at < window);
    }

    /// Number of tasks currently tracked (for monitoring).
    pub fn tracked_count(&self) -> usize {
        self.last_fired.len()
    }
}

impl Default for OverdueCooldown {
    fn default() -> Self {
        Self::new()
    }
}
