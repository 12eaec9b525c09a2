//! Notification content builders.
//!
//! Translates a task + event kind into human-readable content: a rich embed
//! description plus a plain-text `message` for transports without embed
//! support. Pure and deterministic; the only timestamp involved is the `now`
//! passed to [`build_notification`].

use chrono::{DateTime, Utc};
use uuid::Uuid;

use taskherald_common::types::{
    ContentField, Notification, NotificationContent, NotificationKind, NotificationPreferences,
    Task,
};

/// Embed accent colors (Discord palette).
pub const COLOR_ASSIGNMENT: u32 = 0x3498DB;
pub const COLOR_DUE_REMINDER: u32 = 0xF1C40F;
pub const COLOR_OVERDUE: u32 = 0xE74C3C;
pub const COLOR_COMPLETION: u32 = 0x2ECC71;
pub const COLOR_DIGEST: u32 = 0x9B59B6;

/// Default hours before the due date at which the due-reminder fires.
pub const DEFAULT_REMINDER_HOURS: i64 = 24;

/// Default local time of day for the daily digest.
pub const DEFAULT_DIGEST_TIME: &str = "09:00";

fn format_due(due: DateTime<Utc>) -> String {
    due.format("%Y-%m-%d %H:%M UTC").to_string()
}

fn base_fields(task: &Task) -> Vec<ContentField> {
    let mut fields = vec![ContentField {
        name: "Task".to_string(),
        value: task.title.clone(),
    }];
    if let Some(due) = task.due_date {
        fields.push(ContentField {
            name: "Due".to_string(),
            value: format_due(due),
        });
    }
    fields
}

pub fn assignment_content(task: &Task) -> NotificationContent {
    let due_part = task
        .due_date
        .map(|d| format!(" (due {})", format_due(d)))
        .unwrap_or_default();
    NotificationContent {
        title: "📋 New Task Assignment".to_string(),
        description: task.description.clone().unwrap_or_default(),
        fields: base_fields(task),
        color: COLOR_ASSIGNMENT,
        message: format!(
            "You have been assigned a new task: **{}**{}",
            task.title, due_part
        ),
    }
}

pub fn due_reminder_content(task: &Task, reminder_hours: i64) -> NotificationContent {
    let due_part = task
        .due_date
        .map(format_due)
        .unwrap_or_else(|| "soon".to_string());
    let mut fields = base_fields(task);
    fields.push(ContentField {
        name: "Reminder window".to_string(),
        value: format!("{reminder_hours}h before due"),
    });
    NotificationContent {
        title: "⏰ Task Due Reminder".to_string(),
        description: task.description.clone().unwrap_or_default(),
        fields,
        color: COLOR_DUE_REMINDER,
        message: format!("Reminder: task **{}** is due {}.", task.title, due_part),
    }
}

pub fn overdue_content(task: &Task) -> NotificationContent {
    let due_part = task
        .due_date
        .map(|d| format!(" It was due {}.", format_due(d)))
        .unwrap_or_default();
    NotificationContent {
        title: "⚠️ Task Overdue".to_string(),
        description: task.description.clone().unwrap_or_default(),
        fields: base_fields(task),
        color: COLOR_OVERDUE,
        message: format!("Task **{}** is overdue!{}", task.title, due_part),
    }
}

pub fn completion_content(task: &Task) -> NotificationContent {
    NotificationContent {
        title: "✅ Task Completed".to_string(),
        description: task.description.clone().unwrap_or_default(),
        fields: base_fields(task),
        color: COLOR_COMPLETION,
        message: format!("Task **{}** has been completed.", task.title),
    }
}

/// Content for a daily digest whose body text was rendered by the scheduler.
pub fn digest_content(digest: &str) -> NotificationContent {
    NotificationContent {
        title: "📬 Daily Task Digest".to_string(),
        description: String::new(),
        fields: Vec::new(),
        color: COLOR_DIGEST,
        message: digest.to_string(),
    }
}

/// Content for a task event, dispatched on kind.
pub fn content_for(
    kind: NotificationKind,
    task: &Task,
    preferences: &NotificationPreferences,
) -> NotificationContent {
    match kind {
        NotificationKind::Assignment => assignment_content(task),
        NotificationKind::DueReminder => due_reminder_content(task, preferences.reminder_hours),
        NotificationKind::Overdue => overdue_content(task),
        NotificationKind::Completion => completion_content(task),
        // Digest bodies are rendered by the scheduler, not from a task; this
        // arm only supplies the empty scaffold.
        NotificationKind::DailyDigest => digest_content(""),
    }
}

/// Default preferences for a (user, server) pair seen for the first time.
pub fn default_preferences(user_id: &str, server_id: &str) -> NotificationPreferences {
    NotificationPreferences {
        user_id: user_id.to_string(),
        server_id: server_id.to_string(),
        discord_dm: true,
        reminder_hours: DEFAULT_REMINDER_HOURS,
        daily_digest: true,
        digest_time: DEFAULT_DIGEST_TIME.to_string(),
        notify_on_assignment: true,
        notify_on_completion: true,
        notify_on_due: true,
        notify_on_overdue: true,
        max_daily_notifications: 0,
    }
}

/// Build a notification record for a task event.
///
/// `now` is embedded as `created_at`/`updated_at`; `scheduled_for` is the
/// instant the record becomes due for delivery.
pub fn build_notification(
    kind: NotificationKind,
    task: &Task,
    preferences: &NotificationPreferences,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Notification {
    let content = content_for(kind, task, preferences);
    Notification {
        id: Uuid::new_v4(),
        kind,
        user_id: preferences.user_id.clone(),
        server_id: task.server_id.clone(),
        task_id: Some(task.id),
        message: content.message,
        read: false,
        scheduled_for,
        sent_at: None,
        created_at: now,
        updated_at: now,
    }
}
