use serde::Deserialize;

/// Notification worker configuration loaded from environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Delivery-check tick interval in seconds (default: 60)
    pub check_interval_secs: u64,

    /// Retention cleanup interval in seconds (default: 3600)
    pub cleanup_interval_secs: u64,
}

impl WorkerConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            check_interval_secs: std::env::var("NOTIFIER_CHECK_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("NOTIFIER_CHECK_INTERVAL_SECS must be a valid u64"))?,
            cleanup_interval_secs: std::env::var("NOTIFIER_CLEANUP_INTERVAL_SECS")
                .unwrap_or_else(|_| "3600".to_string())
                .parse()
                .map_err(|_| {
                    anyhow::anyhow!("NOTIFIER_CLEANUP_INTERVAL_SECS must be a valid u64")
                })?,
        })
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            check_interval_secs: 60,
            cleanup_interval_secs: 3600,
        }
    }
}
