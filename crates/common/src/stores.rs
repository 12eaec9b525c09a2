//! Repository contracts consumed by the notification worker.
//!
//! The document store itself lives outside this subsystem; the hosting
//! process supplies implementations of these traits. All operations are
//! async and may fail with a generic [`AppError`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::error::AppError;
use crate::types::{
    Notification, NotificationPreferences, ServerNotificationSettings, Task, TaskStatus,
};

/// Partial update applied to a task.
///
/// The worker only ever sets `status` (the `Pending` → `Overdue`
/// transition); other transitions are owned by the task-management side.
#[derive(Debug, Clone, Default)]
pub struct TaskPatch {
    pub status: Option<TaskStatus>,
    pub completed_date: Option<DateTime<Utc>>,
}

impl TaskPatch {
    pub fn status(status: TaskStatus) -> Self {
        Self {
            status: Some(status),
            ..Default::default()
        }
    }
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, AppError>;

    async fn find_by_status_and_server(
        &self,
        server_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, AppError>;

    async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<Task>, AppError>;

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<(), AppError>;
}

#[async_trait]
pub trait PreferencesStore: Send + Sync {
    async fn find_by_user(
        &self,
        user_id: &str,
        server_id: &str,
    ) -> Result<Option<NotificationPreferences>, AppError>;

    async fn find_by_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<NotificationPreferences>, AppError>;

    async fn create(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, AppError>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    async fn create(&self, notification: Notification) -> Result<(), AppError>;

    /// Unsent notifications with `scheduled_for` in `[from, to]`.
    async fn find_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Notification>, AppError>;

    async fn mark_as_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError>;

    /// Delete notifications on a server older than `older_than`. With
    /// `only_read` set, unread records are left untouched. Returns the
    /// number of records removed.
    async fn cleanup(
        &self,
        server_id: &str,
        older_than: DateTime<Utc>,
        only_read: bool,
    ) -> Result<u64, AppError>;

    /// Archive every notification attached to a task. Returns the number of
    /// records archived.
    async fn archive_for_task(&self, task_id: Uuid) -> Result<u64, AppError>;
}

#[async_trait]
pub trait ServerSettingsStore: Send + Sync {
    /// Settings for a server, with documented defaults applied when the
    /// server has no stored row.
    async fn get_notification_settings(
        &self,
        server_id: &str,
    ) -> Result<ServerNotificationSettings, AppError>;
}
