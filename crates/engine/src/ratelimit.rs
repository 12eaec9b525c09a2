//! Daily notification quotas.
//!
//! Two independent caps: per (user, server) and per server, both counted
//! against local calendar days. Counts are held in-memory per process and
//! cleared by the worker's midnight reset; a restart loses the day's counts,
//! which is accepted degradation for a single-instance deployment.

use std::collections::HashMap;

/// In-memory daily quota tracker.
///
/// `check` and `record` are deliberately separate so the caller can gate
/// first and count only what was actually attempted.
#[derive(Debug, Default)]
pub struct DailyRateLimiter {
    user_counts: HashMap<(String, String), u32>,
    server_counts: HashMap<String, u32>,
}

impl DailyRateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether another notification may be delivered for this user on this
    /// server. A limit of 0 means unlimited.
    pub fn check(
        &self,
        user_id: &str,
        server_id: &str,
        user_limit: u32,
        server_limit: u32,
    ) -> bool {
        if user_limit > 0 && self.user_count(user_id, server_id) >= user_limit {
            return false;
        }
        if server_limit > 0 && self.server_count(server_id) >= server_limit {
            return false;
        }
        true
    }

    /// Count one delivered notification against both quotas.
    pub fn record(&mut self, user_id: &str, server_id: &str) {
        *self
            .user_counts
            .entry((user_id.to_string(), server_id.to_string()))
            .or_insert(0) += 1;
        *self.server_counts.entry(server_id.to_string()).or_insert(0) += 1;
    }

    /// Clear all counts. Called at local midnight.
    pub fn reset(&mut self) {
        self.user_counts.clear();
        self.server_counts.clear();
    }

    pub fn user_count(&self, user_id: &str, server_id: &str) -> u32 {
        self.user_counts
            .get(&(user_id.to_string(), server_id.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn server_count(&self, server_id: &str) -> u32 {
        self.server_counts.get(server_id).copied().unwrap_or(0)
    }
}
