//! Chat-platform transport contract.
//!
//! The actual Discord client lives in the hosting process; the worker only
//! needs to enumerate known guilds and push plain-text messages. Channel and
//! DM sends fail independently per call.

use async_trait::async_trait;

use crate::error::AppError;

#[async_trait]
pub trait Messenger: Send + Sync {
    /// Snowflakes of every guild the bot currently serves.
    async fn guild_ids(&self) -> Result<Vec<String>, AppError>;

    async fn send_channel_message(
        &self,
        server_id: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<(), AppError>;

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), AppError>;
}
