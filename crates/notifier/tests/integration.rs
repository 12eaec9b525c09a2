//! Integration tests for the notification worker.
//!
//! Everything runs against in-memory store and transport fakes with a
//! frozen clock, so each tick is fully deterministic. Run with:
//!
//! ```bash
//! cargo test -p taskherald-notifier --test integration -- --nocapture
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Local, TimeZone, Utc};
use uuid::Uuid;

use taskherald_common::config::WorkerConfig;
use taskherald_common::error::AppError;
use taskherald_common::stores::{
    NotificationStore, PreferencesStore, ServerSettingsStore, TaskPatch, TaskStore,
};
use taskherald_common::transport::Messenger;
use taskherald_common::types::{
    Notification, NotificationKind, NotificationPreferences, ServerNotificationSettings, Task,
    TaskStatus,
};
use taskherald_engine::clock::FixedClock;
use taskherald_engine::content;
use taskherald_notifier::NotificationWorker;

const SERVER: &str = "900100";
const CHANNEL: &str = "900200";
const USER: &str = "900300";

// ============================================================
// In-memory fakes
// ============================================================

#[derive(Default)]
struct MemoryTaskStore {
    tasks: Mutex<HashMap<Uuid, Task>>,
}

impl MemoryTaskStore {
    fn insert(&self, task: Task) {
        self.tasks.lock().unwrap().insert(task.id, task);
    }

    fn get(&self, id: Uuid) -> Option<Task> {
        self.tasks.lock().unwrap().get(&id).cloned()
    }

    fn set_status(&self, id: Uuid, status: TaskStatus) {
        if let Some(task) = self.tasks.lock().unwrap().get_mut(&id) {
            task.status = status;
        }
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn find_by_id(&self, id: Uuid) -> Result<Option<Task>, AppError> {
        Ok(self.tasks.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_status_and_server(
        &self,
        server_id: &str,
        status: TaskStatus,
    ) -> Result<Vec<Task>, AppError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.server_id == server_id && t.status == status)
            .cloned()
            .collect())
    }

    async fn find_by_assignee(&self, user_id: &str) -> Result<Vec<Task>, AppError> {
        Ok(self
            .tasks
            .lock()
            .unwrap()
            .values()
            .filter(|t| t.assignee_id.as_deref() == Some(user_id))
            .cloned()
            .collect())
    }

    async fn update(&self, id: Uuid, patch: TaskPatch) -> Result<(), AppError> {
        let mut tasks = self.tasks.lock().unwrap();
        let task = tasks
            .get_mut(&id)
            .ok_or_else(|| AppError::NotFound(format!("task {id}")))?;
        if let Some(status) = patch.status {
            task.status = status;
        }
        if let Some(completed) = patch.completed_date {
            task.completed_date = Some(completed);
        }
        Ok(())
    }
}

#[derive(Default)]
struct MemoryPreferencesStore {
    prefs: Mutex<Vec<NotificationPreferences>>,
}

impl MemoryPreferencesStore {
    fn insert(&self, prefs: NotificationPreferences) {
        self.prefs.lock().unwrap().push(prefs);
    }
}

#[async_trait]
impl PreferencesStore for MemoryPreferencesStore {
    async fn find_by_user(
        &self,
        user_id: &str,
        server_id: &str,
    ) -> Result<Option<NotificationPreferences>, AppError> {
        Ok(self
            .prefs
            .lock()
            .unwrap()
            .iter()
            .find(|p| p.user_id == user_id && p.server_id == server_id)
            .cloned())
    }

    async fn find_by_server(
        &self,
        server_id: &str,
    ) -> Result<Vec<NotificationPreferences>, AppError> {
        Ok(self
            .prefs
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.server_id == server_id)
            .cloned()
            .collect())
    }

    async fn create(
        &self,
        prefs: NotificationPreferences,
    ) -> Result<NotificationPreferences, AppError> {
        self.prefs.lock().unwrap().push(prefs.clone());
        Ok(prefs)
    }
}

#[derive(Default)]
struct MemoryNotificationStore {
    items: Mutex<Vec<Notification>>,
    archived: Mutex<Vec<Notification>>,
}

impl MemoryNotificationStore {
    fn insert(&self, notification: Notification) {
        self.items.lock().unwrap().push(notification);
    }

    fn get(&self, id: Uuid) -> Option<Notification> {
        self.items.lock().unwrap().iter().find(|n| n.id == id).cloned()
    }

    fn contains(&self, id: Uuid) -> bool {
        self.get(id).is_some()
    }

    fn archived_count(&self) -> usize {
        self.archived.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationStore for MemoryNotificationStore {
    async fn create(&self, notification: Notification) -> Result<(), AppError> {
        self.items.lock().unwrap().push(notification);
        Ok(())
    }

    async fn find_scheduled(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
    ) -> Result<Vec<Notification>, AppError> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.sent_at.is_none() && n.scheduled_for >= from && n.scheduled_for <= to)
            .cloned()
            .collect())
    }

    async fn mark_as_sent(&self, id: Uuid, at: DateTime<Utc>) -> Result<(), AppError> {
        let mut items = self.items.lock().unwrap();
        let item = items
            .iter_mut()
            .find(|n| n.id == id)
            .ok_or_else(|| AppError::NotFound(format!("notification {id}")))?;
        item.sent_at = Some(at);
        item.updated_at = at;
        Ok(())
    }

    async fn cleanup(
        &self,
        server_id: &str,
        older_than: DateTime<Utc>,
        only_read: bool,
    ) -> Result<u64, AppError> {
        let mut items = self.items.lock().unwrap();
        let before = items.len();
        items.retain(|n| {
            let expired =
                n.server_id == server_id && n.created_at < older_than && (n.read || !only_read);
            !expired
        });
        Ok((before - items.len()) as u64)
    }

    async fn archive_for_task(&self, task_id: Uuid) -> Result<u64, AppError> {
        let mut items = self.items.lock().unwrap();
        let mut archived = self.archived.lock().unwrap();
        let before = items.len();
        items.retain(|n| {
            if n.task_id == Some(task_id) {
                archived.push(n.clone());
                false
            } else {
                true
            }
        });
        Ok((before - items.len()) as u64)
    }
}

struct MemorySettingsStore {
    settings: Mutex<HashMap<String, ServerNotificationSettings>>,
    /// Servers whose settings lookup fails, for failure-isolation tests.
    failing: Mutex<Vec<String>>,
}

impl MemorySettingsStore {
    fn with_channel(server_id: &str, channel_id: &str) -> Self {
        let mut settings = ServerNotificationSettings::defaults_for(server_id);
        settings.notification_channel_id = Some(channel_id.to_string());
        let store = Self {
            settings: Mutex::new(HashMap::new()),
            failing: Mutex::new(Vec::new()),
        };
        store.insert(settings);
        store
    }

    fn insert(&self, settings: ServerNotificationSettings) {
        self.settings
            .lock()
            .unwrap()
            .insert(settings.server_id.clone(), settings);
    }

    fn fail_for(&self, server_id: &str) {
        self.failing.lock().unwrap().push(server_id.to_string());
    }
}

#[async_trait]
impl ServerSettingsStore for MemorySettingsStore {
    async fn get_notification_settings(
        &self,
        server_id: &str,
    ) -> Result<ServerNotificationSettings, AppError> {
        if self.failing.lock().unwrap().iter().any(|s| s == server_id) {
            return Err(AppError::Store(format!("settings unavailable for {server_id}")));
        }
        Ok(self
            .settings
            .lock()
            .unwrap()
            .get(server_id)
            .cloned()
            .unwrap_or_else(|| ServerNotificationSettings::defaults_for(server_id)))
    }
}

struct RecordingMessenger {
    guilds: Vec<String>,
    channel_messages: Mutex<Vec<(String, String, String)>>,
    direct_messages: Mutex<Vec<(String, String)>>,
    fail_channel: AtomicBool,
}

impl RecordingMessenger {
    fn new(guilds: &[&str]) -> Self {
        Self {
            guilds: guilds.iter().map(|g| g.to_string()).collect(),
            channel_messages: Mutex::new(Vec::new()),
            direct_messages: Mutex::new(Vec::new()),
            fail_channel: AtomicBool::new(false),
        }
    }

    fn channel_count(&self) -> usize {
        self.channel_messages.lock().unwrap().len()
    }

    fn dm_count(&self) -> usize {
        self.direct_messages.lock().unwrap().len()
    }

    fn last_dm(&self) -> Option<(String, String)> {
        self.direct_messages.lock().unwrap().last().cloned()
    }
}

#[async_trait]
impl Messenger for RecordingMessenger {
    async fn guild_ids(&self) -> Result<Vec<String>, AppError> {
        Ok(self.guilds.clone())
    }

    async fn send_channel_message(
        &self,
        server_id: &str,
        channel_id: &str,
        text: &str,
    ) -> Result<(), AppError> {
        if self.fail_channel.load(Ordering::SeqCst) {
            return Err(AppError::Transport("channel unavailable".to_string()));
        }
        self.channel_messages.lock().unwrap().push((
            server_id.to_string(),
            channel_id.to_string(),
            text.to_string(),
        ));
        Ok(())
    }

    async fn send_direct_message(&self, user_id: &str, text: &str) -> Result<(), AppError> {
        self.direct_messages
            .lock()
            .unwrap()
            .push((user_id.to_string(), text.to_string()));
        Ok(())
    }
}

// ============================================================
// Harness
// ============================================================

struct Harness {
    tasks: Arc<MemoryTaskStore>,
    prefs: Arc<MemoryPreferencesStore>,
    notifications: Arc<MemoryNotificationStore>,
    settings: Arc<MemorySettingsStore>,
    messenger: Arc<RecordingMessenger>,
    clock: Arc<FixedClock>,
    worker: NotificationWorker,
}

fn harness_at(now: DateTime<Utc>) -> Harness {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("taskherald_notifier=debug")
        .try_init();

    let tasks = Arc::new(MemoryTaskStore::default());
    let prefs = Arc::new(MemoryPreferencesStore::default());
    let notifications = Arc::new(MemoryNotificationStore::default());
    let settings = Arc::new(MemorySettingsStore::with_channel(SERVER, CHANNEL));
    let messenger = Arc::new(RecordingMessenger::new(&[SERVER]));
    let clock = Arc::new(FixedClock::new(now));

    let worker = NotificationWorker::with_clock(
        WorkerConfig::default(),
        tasks.clone(),
        prefs.clone(),
        notifications.clone(),
        settings.clone(),
        messenger.clone(),
        clock.clone(),
    );

    Harness {
        tasks,
        prefs,
        notifications,
        settings,
        messenger,
        clock,
        worker,
    }
}

fn make_task(due: Option<DateTime<Utc>>, status: TaskStatus) -> Task {
    Task {
        id: Uuid::new_v4(),
        title: "Ship the build".to_string(),
        description: None,
        assignee_id: Some(USER.to_string()),
        due_date: due,
        completed_date: None,
        status,
        server_id: SERVER.to_string(),
    }
}

fn make_reminder(task: &Task, scheduled_for: DateTime<Utc>, now: DateTime<Utc>) -> Notification {
    let prefs = content::default_preferences(USER, SERVER);
    content::build_notification(NotificationKind::DueReminder, task, &prefs, scheduled_for, now)
}

/// Default preferences with the digest disabled, so tests that pin the clock
/// to an arbitrary UTC instant cannot trip the digest window in whatever
/// timezone the test host runs in.
fn quiet_prefs() -> NotificationPreferences {
    let mut prefs = content::default_preferences(USER, SERVER);
    prefs.daily_digest = false;
    prefs
}

// ============================================================
// Delivery
// ============================================================

#[tokio::test]
async fn test_reminder_tick_delivers_and_marks_sent() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    // Due in 58 minutes with a 1-hour reminder window: the trigger time
    // passed two minutes ago, inside the lookback.
    let task = make_task(Some(now + Duration::minutes(58)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let mut prefs = quiet_prefs();
    prefs.reminder_hours = 1;
    prefs.max_daily_notifications = 5;
    h.prefs.insert(prefs);

    let reminder = make_reminder(&task, now - Duration::minutes(2), now - Duration::hours(1));
    let reminder_id = reminder.id;
    h.notifications.insert(reminder);

    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.channel_count(), 1);
    assert_eq!(h.messenger.dm_count(), 1);
    let stored = h.notifications.get(reminder_id).unwrap();
    assert_eq!(stored.sent_at, Some(now));
    assert_eq!(h.worker.user_daily_count(USER, SERVER), 1);
}

#[tokio::test]
async fn test_reminder_outside_lookback_is_not_discovered() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    h.prefs.insert(quiet_prefs());
    let task = make_task(Some(now + Duration::minutes(30)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let stale = make_reminder(&task, now - Duration::minutes(30), now - Duration::hours(1));
    let stale_id = stale.id;
    h.notifications.insert(stale);

    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.channel_count(), 0);
    assert!(h.notifications.get(stale_id).unwrap().sent_at.is_none());
}

#[tokio::test]
async fn test_rate_limit_blocks_second_delivery() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    let task = make_task(Some(now + Duration::hours(1)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let mut prefs = quiet_prefs();
    prefs.max_daily_notifications = 1;
    h.prefs.insert(prefs);

    let first = make_reminder(&task, now - Duration::minutes(3), now - Duration::hours(1));
    let second = make_reminder(&task, now - Duration::minutes(2), now - Duration::hours(1));
    let first_id = first.id;
    let second_id = second.id;
    h.notifications.insert(first);
    h.notifications.insert(second);

    h.worker.run_delivery_tick().await;

    // Only the first went out: one channel message, one DM.
    assert_eq!(h.messenger.channel_count(), 1);
    assert_eq!(h.messenger.dm_count(), 1);
    assert!(h.notifications.get(first_id).unwrap().sent_at.is_some());
    assert!(h.notifications.get(second_id).unwrap().sent_at.is_none());
    assert_eq!(h.worker.user_daily_count(USER, SERVER), 1);
}

#[tokio::test]
async fn test_transport_failure_still_marks_sent() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);
    h.messenger.fail_channel.store(true, Ordering::SeqCst);
    h.prefs.insert(quiet_prefs());

    let task = make_task(Some(now + Duration::hours(1)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let reminder = make_reminder(&task, now - Duration::minutes(1), now - Duration::hours(1));
    let reminder_id = reminder.id;
    h.notifications.insert(reminder);

    h.worker.run_delivery_tick().await;

    // Channel send failed, DM went through; the record is finalized either
    // way because the quota gate passed.
    assert_eq!(h.messenger.channel_count(), 0);
    assert_eq!(h.messenger.dm_count(), 1);
    assert!(h.notifications.get(reminder_id).unwrap().sent_at.is_some());
}

#[tokio::test]
async fn test_dm_disabled_sends_channel_only() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    let task = make_task(Some(now + Duration::hours(1)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let mut prefs = quiet_prefs();
    prefs.discord_dm = false;
    h.prefs.insert(prefs);

    let reminder = make_reminder(&task, now - Duration::minutes(1), now - Duration::hours(1));
    h.notifications.insert(reminder);

    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.channel_count(), 1);
    assert_eq!(h.messenger.dm_count(), 0);
}

// ============================================================
// Overdue pass
// ============================================================

#[tokio::test]
async fn test_overdue_pass_notifies_and_flips_status() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    h.prefs.insert(quiet_prefs());
    let task = make_task(Some(now - Duration::minutes(2)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    h.worker.run_delivery_tick().await;

    assert_eq!(h.tasks.get(task.id).unwrap().status, TaskStatus::Overdue);
    assert_eq!(h.messenger.channel_count(), 1);
    assert_eq!(h.messenger.dm_count(), 1);
    let (_, text) = h.messenger.last_dm().unwrap();
    assert!(text.contains("overdue"));
}

#[tokio::test]
async fn test_overdue_cooldown_suppresses_repeat() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    h.prefs.insert(quiet_prefs());
    let task = make_task(Some(now - Duration::minutes(2)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    h.worker.run_delivery_tick().await;
    assert_eq!(h.messenger.dm_count(), 1);

    // Even if an external writer flips the task back to pending, the
    // cooldown holds for an hour.
    h.tasks.set_status(task.id, TaskStatus::Pending);
    h.clock.advance(Duration::minutes(1));
    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.dm_count(), 1);
}

#[tokio::test]
async fn test_long_overdue_task_is_not_reannounced() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    // Due 10 minutes ago: outside the just-became-overdue window, so the
    // detection filter stays silent and the task keeps its status.
    h.prefs.insert(quiet_prefs());
    let task = make_task(Some(now - Duration::minutes(10)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    h.worker.run_delivery_tick().await;

    assert_eq!(h.tasks.get(task.id).unwrap().status, TaskStatus::Pending);
    assert_eq!(h.messenger.dm_count(), 0);
}

// ============================================================
// Digest pass
// ============================================================

#[tokio::test]
async fn test_digest_fires_at_configured_time() {
    let now_local = Local.with_ymd_and_hms(2025, 7, 1, 9, 0, 30).unwrap();
    let h = harness_at(now_local.with_timezone(&Utc));

    h.prefs.insert(content::default_preferences(USER, SERVER));

    let now_utc = now_local.with_timezone(&Utc);
    h.tasks
        .insert(make_task(Some(now_utc - Duration::days(1)), TaskStatus::Pending));
    h.tasks
        .insert(make_task(Some(now_utc + Duration::hours(3)), TaskStatus::Pending));
    h.tasks.insert(make_task(None, TaskStatus::Completed));

    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.dm_count(), 1);
    let (user, text) = h.messenger.last_dm().unwrap();
    assert_eq!(user, USER);
    let overdue_at = text.find("**Overdue**").unwrap();
    let today_at = text.find("**Due Today**").unwrap();
    let completed_at = text.find("**Completed**").unwrap();
    assert!(overdue_at < today_at && today_at < completed_at);
}

#[tokio::test]
async fn test_digest_silent_off_schedule() {
    let now_local = Local.with_ymd_and_hms(2025, 7, 1, 14, 30, 0).unwrap();
    let h = harness_at(now_local.with_timezone(&Utc));

    h.prefs.insert(content::default_preferences(USER, SERVER));
    h.tasks
        .insert(make_task(Some(Utc::now() + Duration::hours(1)), TaskStatus::Pending));

    h.worker.run_delivery_tick().await;

    assert_eq!(h.messenger.dm_count(), 0);
    assert_eq!(h.messenger.channel_count(), 0);
}

// ============================================================
// Failure isolation
// ============================================================

#[tokio::test]
async fn test_one_failing_guild_does_not_block_others() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    // Rebuild the worker with a two-guild messenger; settings for the first
    // guild are unavailable.
    let messenger = Arc::new(RecordingMessenger::new(&["111111", SERVER]));
    h.settings.fail_for("111111");
    let worker = NotificationWorker::with_clock(
        WorkerConfig::default(),
        h.tasks.clone(),
        h.prefs.clone(),
        h.notifications.clone(),
        h.settings.clone(),
        messenger.clone(),
        h.clock.clone(),
    );

    h.prefs.insert(quiet_prefs());
    let task = make_task(Some(now + Duration::hours(1)), TaskStatus::Pending);
    h.tasks.insert(task.clone());
    let reminder = make_reminder(&task, now - Duration::minutes(1), now - Duration::hours(1));
    let reminder_id = reminder.id;
    h.notifications.insert(reminder);

    worker.run_delivery_tick().await;

    assert!(h.notifications.get(reminder_id).unwrap().sent_at.is_some());
    assert_eq!(messenger.channel_count(), 1);
}

// ============================================================
// Lifecycle
// ============================================================

#[tokio::test]
async fn test_start_is_idempotent_and_stop_clears_timers() {
    let h = harness_at(Utc::now());

    h.worker.start();
    h.worker.start();
    assert!(h.worker.is_running());

    h.worker.stop();
    assert!(!h.worker.is_running());

    // Restart after stop arms fresh timers.
    h.worker.start();
    assert!(h.worker.is_running());
    h.worker.stop();
    assert!(!h.worker.is_running());
}

// ============================================================
// Cleanup
// ============================================================

#[tokio::test]
async fn test_cleanup_respects_read_flag_and_retention() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    let task = make_task(Some(now + Duration::hours(1)), TaskStatus::Pending);
    h.tasks.insert(task.clone());

    let mut read_31d = make_reminder(&task, now, now - Duration::days(31));
    read_31d.created_at = now - Duration::days(31);
    read_31d.read = true;
    let read_31d_id = read_31d.id;

    let mut unread_31d = make_reminder(&task, now, now - Duration::days(31));
    unread_31d.created_at = now - Duration::days(31);
    let unread_31d_id = unread_31d.id;

    let mut unread_91d = make_reminder(&task, now, now - Duration::days(91));
    unread_91d.created_at = now - Duration::days(91);
    let unread_91d_id = unread_91d.id;

    h.notifications.insert(read_31d);
    h.notifications.insert(unread_31d);
    h.notifications.insert(unread_91d);

    h.worker.run_cleanup_tick().await;

    // Read past 30 days: gone. Unread at 31 days: kept until 90. Unread at
    // 91 days: gone.
    assert!(!h.notifications.contains(read_31d_id));
    assert!(h.notifications.contains(unread_31d_id));
    assert!(!h.notifications.contains(unread_91d_id));
}

#[tokio::test]
async fn test_cleanup_archives_completed_task_notifications() {
    let now = Utc.with_ymd_and_hms(2025, 7, 1, 12, 0, 0).unwrap();
    let h = harness_at(now);

    let mut done = make_task(Some(now - Duration::days(1)), TaskStatus::Completed);
    done.completed_date = Some(now - Duration::hours(2));
    h.tasks.insert(done.clone());

    let recent = make_reminder(&done, now - Duration::days(1), now - Duration::days(1));
    let recent_id = recent.id;
    h.notifications.insert(recent);

    h.worker.run_cleanup_tick().await;

    assert!(!h.notifications.contains(recent_id));
    assert_eq!(h.notifications.archived_count(), 1);
}
