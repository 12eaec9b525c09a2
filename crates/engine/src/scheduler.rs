//! Pure scheduling decisions.
//!
//! Every function here is a pure computation over (task, preferences, now);
//! the worker owns all I/O and state. Keeping the decisions side-effect free
//! is what makes the time-window arithmetic testable.

use chrono::{DateTime, Duration, Local, NaiveTime, Utc};

use taskherald_common::types::{
    NotificationKind, NotificationPreferences, ScheduledNotification, Task, TaskStatus,
};

use crate::content;

/// How far in the past a due date still counts as "just became overdue".
///
/// Outside this window the overdue check stays silent, so repeated polls do
/// not re-announce long-overdue tasks. The worker's per-task cooldown is a
/// second, coarser guard on top of this.
pub const OVERDUE_DETECTION_WINDOW_SECS: i64 = 300;

/// Tolerance around the configured digest time. Sized to the worker's
/// one-minute poll cadence; there is no built-in de-duplication here.
pub const DIGEST_TOLERANCE_SECS: i64 = 60;

fn pair(
    kind: NotificationKind,
    task: &Task,
    preferences: &NotificationPreferences,
    scheduled_for: DateTime<Utc>,
    now: DateTime<Utc>,
) -> ScheduledNotification {
    ScheduledNotification {
        notification: content::build_notification(kind, task, preferences, scheduled_for, now),
        task: task.clone(),
        preferences: preferences.clone(),
    }
}

/// Candidate notifications for a task, computed at creation/edit time.
///
/// Returns nothing unless the task has both an assignee and a due date.
/// Order is fixed: assignment first, then the due-reminder at
/// `due_date - reminder_hours`.
pub fn schedule_notifications(
    task: &Task,
    preferences: &NotificationPreferences,
    now: DateTime<Utc>,
) -> Vec<ScheduledNotification> {
    let (Some(_assignee), Some(due)) = (task.assignee_id.as_ref(), task.due_date) else {
        return Vec::new();
    };

    let mut scheduled = Vec::new();
    if preferences.notify_on_assignment {
        scheduled.push(pair(NotificationKind::Assignment, task, preferences, now, now));
    }
    if preferences.notify_on_due {
        // A stored lead time outside chrono's representable range drops the
        // reminder instead of aborting the whole schedule.
        let fire_at = Duration::try_hours(preferences.reminder_hours)
            .and_then(|lead| due.checked_sub_signed(lead));
        if let Some(fire_at) = fire_at {
            scheduled.push(pair(
                NotificationKind::DueReminder,
                task,
                preferences,
                fire_at,
                now,
            ));
        }
    }
    scheduled
}

/// Overdue-transition detection for one task.
///
/// Fires only when the due date sits inside the narrow just-became-overdue
/// window `[now - 5min, now)`; completed tasks and users who opted out never
/// fire.
pub fn check_overdue_task(
    task: &Task,
    preferences: &NotificationPreferences,
    now: DateTime<Utc>,
) -> Option<ScheduledNotification> {
    let due = task.due_date?;
    if task.completed_date.is_some()
        || task.status == TaskStatus::Completed
        || !preferences.notify_on_overdue
    {
        return None;
    }

    let window_start = now - Duration::seconds(OVERDUE_DETECTION_WINDOW_SECS);
    if due < now && due >= window_start {
        Some(pair(NotificationKind::Overdue, task, preferences, now, now))
    } else {
        None
    }
}

/// Whether the daily digest should fire for these preferences at `now`.
///
/// True iff the digest is enabled and `now` is within
/// [`DIGEST_TOLERANCE_SECS`] of today's configured digest time. An
/// unparseable digest time never fires.
pub fn should_send_daily_digest(
    preferences: &NotificationPreferences,
    now: DateTime<Local>,
) -> bool {
    if !preferences.daily_digest {
        return false;
    }
    let Ok(target) = NaiveTime::parse_from_str(&preferences.digest_time, "%H:%M") else {
        return false;
    };
    let target_today = now.date_naive().and_time(target);
    let delta = (now.naive_local() - target_today).num_seconds().abs();
    delta < DIGEST_TOLERANCE_SECS
}

/// Render the daily digest for a user's tasks.
///
/// Three optional sections in fixed order: Overdue, Due Today, Completed.
/// The sections are independent filters, not a partition — a completed task
/// due today is listed under both Due Today and Completed only if its status
/// predicate matches; an overdue task due earlier today appears under both
/// Overdue and Due Today. This mirrors the source filters and is intentional.
pub fn format_daily_digest(tasks: &[Task], now: DateTime<Local>) -> String {
    if tasks.is_empty() {
        return "No tasks due today.".to_string();
    }

    let now_utc = now.with_timezone(&Utc);
    let today = now.date_naive();

    let overdue: Vec<&Task> = tasks
        .iter()
        .filter(|t| {
            t.status != TaskStatus::Completed && t.due_date.is_some_and(|d| d < now_utc)
        })
        .collect();
    let due_today: Vec<&Task> = tasks
        .iter()
        .filter(|t| {
            t.status != TaskStatus::Completed
                && t.due_date
                    .is_some_and(|d| d.with_timezone(&Local).date_naive() == today)
        })
        .collect();
    let completed: Vec<&Task> = tasks
        .iter()
        .filter(|t| t.status == TaskStatus::Completed)
        .collect();

    let mut out = String::from("📋 **Daily Task Digest**\n");
    if !overdue.is_empty() {
        out.push_str("\n⚠️ **Overdue**\n");
        for task in overdue {
            let due = task
                .due_date
                .map(|d| d.format("%Y-%m-%d %H:%M UTC").to_string())
                .unwrap_or_default();
            out.push_str(&format!("• {} (due {})\n", task.title, due));
        }
    }
    if !due_today.is_empty() {
        out.push_str("\n📅 **Due Today**\n");
        for task in due_today {
            out.push_str(&format!("• {}\n", task.title));
        }
    }
    if !completed.is_empty() {
        out.push_str("\n✅ **Completed**\n");
        for task in completed {
            out.push_str(&format!("• {}\n", task.title));
        }
    }
    out
}
