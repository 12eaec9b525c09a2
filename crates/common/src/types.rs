use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// Lifecycle states of a tracked task.
///
/// Owned and mutated by the task-management side; the notification worker
/// only reads them, except for the `Pending` → `Overdue` transition written
/// by the overdue pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Overdue,
    Skipped,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "PENDING"),
            TaskStatus::InProgress => write!(f, "IN_PROGRESS"),
            TaskStatus::Completed => write!(f, "COMPLETED"),
            TaskStatus::Overdue => write!(f, "OVERDUE"),
            TaskStatus::Skipped => write!(f, "SKIPPED"),
        }
    }
}

/// A tracked task as stored by the task-management component.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    /// Discord snowflake of the assignee, when assigned.
    pub assignee_id: Option<String>,
    pub due_date: Option<DateTime<Utc>>,
    pub completed_date: Option<DateTime<Utc>>,
    pub status: TaskStatus,
    /// Discord snowflake of the guild the task belongs to.
    pub server_id: String,
}

/// Kinds of notifications produced by the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationKind {
    Assignment,
    DueReminder,
    Overdue,
    Completion,
    DailyDigest,
}

impl std::fmt::Display for NotificationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationKind::Assignment => write!(f, "assignment"),
            NotificationKind::DueReminder => write!(f, "due_reminder"),
            NotificationKind::Overdue => write!(f, "overdue"),
            NotificationKind::Completion => write!(f, "completion"),
            NotificationKind::DailyDigest => write!(f, "daily_digest"),
        }
    }
}

/// A persisted notification record.
///
/// `sent_at` is `None` until the worker finalizes the record; once set it is
/// never cleared. Records are eventually removed or archived by the cleanup
/// pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub id: Uuid,
    #[serde(rename = "type")]
    pub kind: NotificationKind,
    pub user_id: String,
    pub server_id: String,
    pub task_id: Option<Uuid>,
    pub message: String,
    pub read: bool,
    pub scheduled_for: DateTime<Utc>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Per-(user, server) notification preferences.
///
/// Created lazily with defaults on first use; mutated by user-settings
/// commands outside this subsystem.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationPreferences {
    pub user_id: String,
    pub server_id: String,
    /// Deliver a copy of each notification to the user's DMs.
    pub discord_dm: bool,
    /// Hours before the due date at which the due-reminder fires.
    pub reminder_hours: i64,
    pub daily_digest: bool,
    /// Local time of day for the daily digest, "HH:mm".
    pub digest_time: String,
    pub notify_on_assignment: bool,
    pub notify_on_completion: bool,
    pub notify_on_due: bool,
    pub notify_on_overdue: bool,
    /// Daily per-user cap; 0 means unlimited.
    pub max_daily_notifications: u32,
}

/// Largest accepted `reminder-hours` value (one year). Keeps stored lead
/// times inside the range the scheduler's duration arithmetic can represent.
pub const MAX_REMINDER_HOURS: i64 = 8760;

/// User-settings option names, mapped explicitly to preference fields.
///
/// Settings commands address preferences by kebab-case option name; this
/// enumerated table replaces any dynamic key derivation so the full set of
/// valid options is visible in one place.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PreferenceKey {
    DiscordDm,
    ReminderHours,
    DailyDigest,
    DigestTime,
    NotifyAssignment,
    NotifyCompletion,
    NotifyDue,
    NotifyOverdue,
    MaxDailyNotifications,
}

impl PreferenceKey {
    /// All keys, in the order they are presented to users.
    pub const ALL: [PreferenceKey; 9] = [
        PreferenceKey::DiscordDm,
        PreferenceKey::ReminderHours,
        PreferenceKey::DailyDigest,
        PreferenceKey::DigestTime,
        PreferenceKey::NotifyAssignment,
        PreferenceKey::NotifyCompletion,
        PreferenceKey::NotifyDue,
        PreferenceKey::NotifyOverdue,
        PreferenceKey::MaxDailyNotifications,
    ];

    /// Resolve a kebab-case option name to a key.
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "discord-dm" => Some(PreferenceKey::DiscordDm),
            "reminder-hours" => Some(PreferenceKey::ReminderHours),
            "daily-digest" => Some(PreferenceKey::DailyDigest),
            "digest-time" => Some(PreferenceKey::DigestTime),
            "notify-assignment" => Some(PreferenceKey::NotifyAssignment),
            "notify-completion" => Some(PreferenceKey::NotifyCompletion),
            "notify-due" => Some(PreferenceKey::NotifyDue),
            "notify-overdue" => Some(PreferenceKey::NotifyOverdue),
            "max-daily-notifications" => Some(PreferenceKey::MaxDailyNotifications),
            _ => None,
        }
    }

    /// The kebab-case option name for this key.
    pub fn option_name(&self) -> &'static str {
        match self {
            PreferenceKey::DiscordDm => "discord-dm",
            PreferenceKey::ReminderHours => "reminder-hours",
            PreferenceKey::DailyDigest => "daily-digest",
            PreferenceKey::DigestTime => "digest-time",
            PreferenceKey::NotifyAssignment => "notify-assignment",
            PreferenceKey::NotifyCompletion => "notify-completion",
            PreferenceKey::NotifyDue => "notify-due",
            PreferenceKey::NotifyOverdue => "notify-overdue",
            PreferenceKey::MaxDailyNotifications => "max-daily-notifications",
        }
    }

    /// Apply a user-supplied value to the matching preference field.
    pub fn apply(
        &self,
        prefs: &mut NotificationPreferences,
        value: &str,
    ) -> Result<(), AppError> {
        match self {
            PreferenceKey::DiscordDm => prefs.discord_dm = parse_bool(value)?,
            PreferenceKey::DailyDigest => prefs.daily_digest = parse_bool(value)?,
            PreferenceKey::NotifyAssignment => prefs.notify_on_assignment = parse_bool(value)?,
            PreferenceKey::NotifyCompletion => prefs.notify_on_completion = parse_bool(value)?,
            PreferenceKey::NotifyDue => prefs.notify_on_due = parse_bool(value)?,
            PreferenceKey::NotifyOverdue => prefs.notify_on_overdue = parse_bool(value)?,
            PreferenceKey::ReminderHours => {
                let hours: i64 = value.parse().map_err(|_| {
                    AppError::InvalidPreference(format!("reminder-hours: {value}"))
                })?;
                if !(1..=MAX_REMINDER_HOURS).contains(&hours) {
                    return Err(AppError::InvalidPreference(format!(
                        "reminder-hours must be between 1 and {MAX_REMINDER_HOURS}, got {value}"
                    )));
                }
                prefs.reminder_hours = hours;
            }
            PreferenceKey::DigestTime => {
                NaiveTime::parse_from_str(value, "%H:%M").map_err(|_| {
                    AppError::InvalidPreference(format!(
                        "digest-time must be HH:mm, got {value}"
                    ))
                })?;
                prefs.digest_time = value.to_string();
            }
            PreferenceKey::MaxDailyNotifications => {
                prefs.max_daily_notifications = value.parse().map_err(|_| {
                    AppError::InvalidPreference(format!("max-daily-notifications: {value}"))
                })?;
            }
        }
        Ok(())
    }
}

fn parse_bool(value: &str) -> Result<bool, AppError> {
    match value {
        "true" | "on" | "yes" => Ok(true),
        "false" | "off" | "no" => Ok(false),
        other => Err(AppError::InvalidPreference(format!(
            "expected true/false, got {other}"
        ))),
    }
}

/// Default number of days read notifications are retained.
pub const DEFAULT_RETENTION_DAYS: i64 = 30;

/// Default number of days unread notifications are kept before cleanup.
pub const DEFAULT_CLEANUP_UNREAD_AFTER_DAYS: i64 = 90;

/// Per-server notification settings, managed by server admins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerNotificationSettings {
    pub server_id: String,
    /// Channel that receives notifications; `None` disables channel delivery.
    pub notification_channel_id: Option<String>,
    /// Daily per-server cap; 0 means unlimited.
    pub max_daily_server_notifications: u32,
    pub notification_retention_days: i64,
    pub cleanup_unread_after_days: i64,
}

impl ServerNotificationSettings {
    /// Settings with documented defaults for a server without a stored row.
    pub fn defaults_for(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            notification_channel_id: None,
            max_daily_server_notifications: 0,
            notification_retention_days: DEFAULT_RETENTION_DAYS,
            cleanup_unread_after_days: DEFAULT_CLEANUP_UNREAD_AFTER_DAYS,
        }
    }
}

/// A single name/value field of a rich notification embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentField {
    pub name: String,
    pub value: String,
}

/// Structured, human-readable notification content.
///
/// `message` is the plain-text rendering used by transports without embed
/// support; the remaining fields describe the rich embed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationContent {
    pub title: String,
    pub description: String,
    pub fields: Vec<ContentField>,
    /// Embed accent color (0xRRGGBB).
    pub color: u32,
    pub message: String,
}

/// An ephemeral (notification, task, preferences) pairing computed for one
/// tick. Not persisted; consumed by the worker immediately after being
/// produced.
#[derive(Debug, Clone)]
pub struct ScheduledNotification {
    pub notification: Notification,
    pub task: Task,
    pub preferences: NotificationPreferences,
}
