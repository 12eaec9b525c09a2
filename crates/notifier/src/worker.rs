//! The notification worker — stateful orchestrator for scheduling decisions,
//! rate limiting, delivery, and retention cleanup.
//!
//! Single-process and timer-driven: a delivery-check loop (every minute), a
//! cleanup loop (hourly), and a midnight loop that clears the daily quota
//! counters. Ticks never overlap — the delivery loop skips a fire while the
//! previous tick is still running.
//!
//! Delivery is at-most-one-attempt per discovered window, not exactly-once:
//! once the quota gate passes, a scheduled notification is marked sent even
//! if the downstream channel/DM sends fail. The periodic poll is the only
//! retry mechanism, bounded by the 5-minute lookback on the scheduled-range
//! query.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveTime, TimeZone, Utc};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use taskherald_common::config::WorkerConfig;
use taskherald_common::error::AppError;
use taskherald_common::stores::{
    NotificationStore, PreferencesStore, ServerSettingsStore, TaskPatch, TaskStore,
};
use taskherald_common::transport::Messenger;
use taskherald_common::types::{
    Notification, NotificationPreferences, ScheduledNotification, ServerNotificationSettings,
    TaskStatus,
};
use taskherald_engine::clock::{Clock, SystemClock};
use taskherald_engine::content;
use taskherald_engine::cooldown::OverdueCooldown;
use taskherald_engine::ratelimit::DailyRateLimiter;
use taskherald_engine::scheduler;

/// Lookback applied to the scheduled-notification query. A notification
/// whose window has slipped further into the past than this is never picked
/// up again.
pub const REMINDER_LOOKBACK_SECS: i64 = 300;

/// Outcome of a single delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The daily quota gate rejected the attempt. Nothing was sent, no
    /// counter moved, and a persisted notification stays unsent.
    RateLimited,
    /// The gate passed and a send was attempted on each enabled path.
    Attempted { channel_sent: bool, dm_sent: bool },
}

impl DeliveryOutcome {
    pub fn was_attempted(&self) -> bool {
        matches!(self, DeliveryOutcome::Attempted { .. })
    }
}

struct TimerHandles {
    check: JoinHandle<()>,
    cleanup: JoinHandle<()>,
    midnight: JoinHandle<()>,
}

struct Inner {
    config: WorkerConfig,
    tasks: Arc<dyn TaskStore>,
    preferences: Arc<dyn PreferencesStore>,
    notifications: Arc<dyn NotificationStore>,
    settings: Arc<dyn ServerSettingsStore>,
    messenger: Arc<dyn Messenger>,
    clock: Arc<dyn Clock>,
    /// Single-slot guard so a slow tick cannot overlap the next fire.
    tick_guard: tokio::sync::Mutex<()>,
    limiter: Mutex<DailyRateLimiter>,
    cooldown: Mutex<OverdueCooldown>,
    timers: Mutex<Option<TimerHandles>>,
}

/// Cheaply cloneable handle to the notification worker.
#[derive(Clone)]
pub struct NotificationWorker {
    inner: Arc<Inner>,
}

/// Recover the guard even if a previous holder panicked; the maps behind
/// these locks hold plain counters with no invariants across operations.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl NotificationWorker {
    pub fn new(
        config: WorkerConfig,
        tasks: Arc<dyn TaskStore>,
        preferences: Arc<dyn PreferencesStore>,
        notifications: Arc<dyn NotificationStore>,
        settings: Arc<dyn ServerSettingsStore>,
        messenger: Arc<dyn Messenger>,
    ) -> Self {
        Self::with_clock(
            config,
            tasks,
            preferences,
            notifications,
            settings,
            messenger,
            Arc::new(SystemClock),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn with_clock(
        config: WorkerConfig,
        tasks: Arc<dyn TaskStore>,
        preferences: Arc<dyn PreferencesStore>,
        notifications: Arc<dyn NotificationStore>,
        settings: Arc<dyn ServerSettingsStore>,
        messenger: Arc<dyn Messenger>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                tasks,
                preferences,
                notifications,
                settings,
                messenger,
                clock,
                tick_guard: tokio::sync::Mutex::new(()),
                limiter: Mutex::new(DailyRateLimiter::new()),
                cooldown: Mutex::new(OverdueCooldown::new()),
                timers: Mutex::new(None),
            }),
        }
    }

    /// Arm the delivery-check, cleanup, and midnight-reset timers.
    ///
    /// Calling `start` while already started is a no-op.
    pub fn start(&self) {
        let mut timers = lock(&self.inner.timers);
        if timers.is_some() {
            tracing::debug!("notification worker already started");
            return;
        }

        let check = {
            let worker = self.clone();
            tokio::spawn(async move { worker.check_loop().await })
        };
        let cleanup = {
            let worker = self.clone();
            tokio::spawn(async move { worker.cleanup_loop().await })
        };
        let midnight = {
            let worker = self.clone();
            tokio::spawn(async move { worker.midnight_loop().await })
        };

        *timers = Some(TimerHandles {
            check,
            cleanup,
            midnight,
        });
        tracing::info!(
            check_interval_secs = self.inner.config.check_interval_secs,
            cleanup_interval_secs = self.inner.config.cleanup_interval_secs,
            "Notification worker started"
        );
    }

    /// Disarm all timers. Work already dispatched by a running tick is not
    /// cancelled and runs to completion.
    pub fn stop(&self) {
        if let Some(timers) = lock(&self.inner.timers).take() {
            timers.check.abort();
            timers.cleanup.abort();
            timers.midnight.abort();
            tracing::info!("Notification worker stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.inner.timers).is_some()
    }

    /// Notifications delivered today for a user on a server (for tests and
    /// monitoring).
    pub fn user_daily_count(&self, user_id: &str, server_id: &str) -> u32 {
        lock(&self.inner.limiter).user_count(user_id, server_id)
    }

    async fn check_loop(self) {
        let mut interval =
            tokio::time::interval(StdDuration::from_secs(self.inner.config.check_interval_secs));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick completes immediately; the first real fire is one
        // period out, matching a fixed-cadence timer.
        interval.tick().await;
        loop {
            interval.tick().await;
            self.run_delivery_tick().await;
        }
    }

    async fn cleanup_loop(self) {
        let mut interval = tokio::time::interval(StdDuration::from_secs(
            self.inner.config.cleanup_interval_secs,
        ));
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        interval.tick().await;
        loop {
            interval.tick().await;
            self.run_cleanup_tick().await;
        }
    }

    async fn midnight_loop(self) {
        loop {
            tokio::time::sleep(self.until_local_midnight()).await;
            lock(&self.inner.limiter).reset();
            tracing::info!("Daily notification counters reset");
        }
    }

    fn until_local_midnight(&self) -> StdDuration {
        let now = self.inner.clock.now_local();
        let tomorrow = now.date_naive() + chrono::Days::new(1);
        let midnight = match Local.from_local_datetime(&tomorrow.and_time(NaiveTime::MIN)) {
            LocalResult::Single(t) | LocalResult::Ambiguous(t, _) => t,
            // A DST gap swallowed midnight; fall back to a flat day.
            LocalResult::None => now + Duration::hours(24),
        };
        (midnight - now)
            .to_std()
            .unwrap_or(StdDuration::from_secs(60))
    }

    /// One delivery-check tick: digest, reminder, and overdue passes for
    /// every known guild. Skipped entirely if the previous tick is still in
    /// flight.
    pub async fn run_delivery_tick(&self) {
        let Ok(_guard) = self.inner.tick_guard.try_lock() else {
            tracing::warn!("previous delivery tick still running, skipping this fire");
            return;
        };

        let guilds = match self.inner.messenger.guild_ids().await {
            Ok(guilds) => guilds,
            Err(e) => {
                tracing::error!(error = %e, "failed to list guilds, skipping tick");
                return;
            }
        };

        for server_id in &guilds {
            let settings = match self.inner.settings.get_notification_settings(server_id).await
            {
                Ok(settings) => settings,
                Err(e) => {
                    tracing::error!(server_id = %server_id, error = %e, "failed to load server settings");
                    continue;
                }
            };

            if let Err(e) = self.digest_pass(server_id, &settings).await {
                tracing::error!(server_id = %server_id, error = %e, "digest pass failed");
            }
            if let Err(e) = self.reminder_pass(server_id, &settings).await {
                tracing::error!(server_id = %server_id, error = %e, "reminder pass failed");
            }
            if let Err(e) = self.overdue_pass(server_id, &settings).await {
                tracing::error!(server_id = %server_id, error = %e, "overdue pass failed");
            }
        }
    }

    /// Send daily digests to every user on the server whose digest time
    /// matches the current minute.
    async fn digest_pass(
        &self,
        server_id: &str,
        settings: &ServerNotificationSettings,
    ) -> Result<(), AppError> {
        let now_local = self.inner.clock.now_local();
        let prefs_list = self.inner.preferences.find_by_server(server_id).await?;

        for prefs in prefs_list {
            if !scheduler::should_send_daily_digest(&prefs, now_local) {
                continue;
            }
            let tasks = match self.inner.tasks.find_by_assignee(&prefs.user_id).await {
                Ok(tasks) => tasks,
                Err(e) => {
                    tracing::warn!(user_id = %prefs.user_id, error = %e, "failed to load tasks for digest");
                    continue;
                }
            };
            let body = scheduler::format_daily_digest(&tasks, now_local);
            let digest = content::digest_content(&body);
            // Digests bypass the daily quota gate, as assignment/due/overdue
            // notifications do not.
            self.send_paths(server_id, settings, &prefs, &digest.message)
                .await;
            tracing::info!(user_id = %prefs.user_id, server_id = %server_id, "daily digest sent");
        }
        Ok(())
    }

    /// Deliver persisted notifications whose scheduled time fell within the
    /// lookback window and that have not been sent.
    async fn reminder_pass(
        &self,
        server_id: &str,
        settings: &ServerNotificationSettings,
    ) -> Result<(), AppError> {
        let now = self.inner.clock.now_utc();
        let from = now - Duration::seconds(REMINDER_LOOKBACK_SECS);
        let due = self.inner.notifications.find_scheduled(from, now).await?;

        for notification in due.into_iter().filter(|n| n.server_id == server_id) {
            let id = notification.id;
            if let Err(e) = self.deliver_scheduled(notification, settings).await {
                tracing::warn!(notification_id = %id, error = %e, "scheduled delivery failed");
            }
        }
        Ok(())
    }

    async fn deliver_scheduled(
        &self,
        notification: Notification,
        settings: &ServerNotificationSettings,
    ) -> Result<(), AppError> {
        let Some(task_id) = notification.task_id else {
            tracing::warn!(notification_id = %notification.id, "scheduled notification has no task, skipping");
            return Ok(());
        };
        let Some(task) = self.inner.tasks.find_by_id(task_id).await? else {
            tracing::warn!(notification_id = %notification.id, task_id = %task_id, "task no longer exists, skipping");
            return Ok(());
        };
        let preferences = self
            .get_or_create_preferences(&notification.user_id, &notification.server_id)
            .await?;

        let id = notification.id;
        let scheduled = ScheduledNotification {
            notification,
            task,
            preferences,
        };
        let outcome = self.deliver(&scheduled, settings).await;
        if outcome.was_attempted() {
            // Finalized once the quota gate passes, independent of whether
            // the channel/DM sends succeeded.
            self.inner
                .notifications
                .mark_as_sent(id, self.inner.clock.now_utc())
                .await?;
        }
        Ok(())
    }

    /// Detect tasks that just became overdue, notify, and flip their status.
    async fn overdue_pass(
        &self,
        server_id: &str,
        settings: &ServerNotificationSettings,
    ) -> Result<(), AppError> {
        let now = self.inner.clock.now_utc();
        let pending = self
            .inner
            .tasks
            .find_by_status_and_server(server_id, TaskStatus::Pending)
            .await?;

        for task in pending {
            let Some(due) = task.due_date else { continue };
            let Some(assignee) = task.assignee_id.clone() else {
                continue;
            };
            if due >= now {
                continue;
            }
            if !lock(&self.inner.cooldown).allows(task.id, now) {
                tracing::debug!(task_id = %task.id, "overdue alert suppressed, task in cooldown");
                continue;
            }

            let preferences = match self.get_or_create_preferences(&assignee, server_id).await {
                Ok(preferences) => preferences,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "failed to load preferences for overdue check");
                    continue;
                }
            };

            let Some(scheduled) = scheduler::check_overdue_task(&task, &preferences, now) else {
                continue;
            };

            let outcome = self.deliver(&scheduled, settings).await;
            lock(&self.inner.cooldown).record(task.id, now);
            tracing::info!(
                task_id = %task.id,
                user_id = %assignee,
                attempted = outcome.was_attempted(),
                "task became overdue"
            );

            if let Err(e) = self
                .inner
                .tasks
                .update(task.id, TaskPatch::status(TaskStatus::Overdue))
                .await
            {
                tracing::warn!(task_id = %task.id, error = %e, "failed to mark task overdue");
            }
        }
        Ok(())
    }

    /// Deliver one scheduled notification, gated by the daily quotas.
    async fn deliver(
        &self,
        scheduled: &ScheduledNotification,
        settings: &ServerNotificationSettings,
    ) -> DeliveryOutcome {
        let prefs = &scheduled.preferences;
        let allowed = lock(&self.inner.limiter).check(
            &prefs.user_id,
            &prefs.server_id,
            prefs.max_daily_notifications,
            settings.max_daily_server_notifications,
        );
        if !allowed {
            tracing::debug!(
                user_id = %prefs.user_id,
                server_id = %prefs.server_id,
                kind = %scheduled.notification.kind,
                "notification suppressed by daily quota"
            );
            return DeliveryOutcome::RateLimited;
        }

        let (channel_sent, dm_sent) = self
            .send_paths(
                &prefs.server_id,
                settings,
                prefs,
                &scheduled.notification.message,
            )
            .await;
        lock(&self.inner.limiter).record(&prefs.user_id, &prefs.server_id);

        DeliveryOutcome::Attempted {
            channel_sent,
            dm_sent,
        }
    }

    /// Attempt the channel and DM paths independently; each failure is
    /// logged and never blocks the other.
    async fn send_paths(
        &self,
        server_id: &str,
        settings: &ServerNotificationSettings,
        prefs: &NotificationPreferences,
        text: &str,
    ) -> (bool, bool) {
        let mut channel_sent = false;
        if let Some(channel_id) = settings.notification_channel_id.as_deref() {
            match self
                .inner
                .messenger
                .send_channel_message(server_id, channel_id, text)
                .await
            {
                Ok(()) => channel_sent = true,
                Err(e) => {
                    tracing::warn!(server_id = %server_id, channel_id = %channel_id, error = %e, "channel send failed")
                }
            }
        }

        let mut dm_sent = false;
        if prefs.discord_dm {
            match self
                .inner
                .messenger
                .send_direct_message(&prefs.user_id, text)
                .await
            {
                Ok(()) => dm_sent = true,
                Err(e) => {
                    tracing::warn!(user_id = %prefs.user_id, error = %e, "DM send failed")
                }
            }
        }
        (channel_sent, dm_sent)
    }

    async fn get_or_create_preferences(
        &self,
        user_id: &str,
        server_id: &str,
    ) -> Result<NotificationPreferences, AppError> {
        if let Some(prefs) = self.inner.preferences.find_by_user(user_id, server_id).await? {
            return Ok(prefs);
        }
        self.inner
            .preferences
            .create(content::default_preferences(user_id, server_id))
            .await
    }

    /// One cleanup tick: retention deletes and completed-task archiving for
    /// every known guild, then cooldown pruning.
    pub async fn run_cleanup_tick(&self) {
        let now = self.inner.clock.now_utc();
        let guilds = match self.inner.messenger.guild_ids().await {
            Ok(guilds) => guilds,
            Err(e) => {
                tracing::error!(error = %e, "failed to list guilds, skipping cleanup");
                return;
            }
        };

        for server_id in &guilds {
            if let Err(e) = self.cleanup_guild(server_id, now).await {
                tracing::error!(server_id = %server_id, error = %e, "cleanup pass failed");
            }
        }

        lock(&self.inner.cooldown).prune(now);
    }

    async fn cleanup_guild(&self, server_id: &str, now: DateTime<Utc>) -> Result<(), AppError> {
        let settings = self.inner.settings.get_notification_settings(server_id).await?;

        let read_cutoff = now - Duration::days(settings.notification_retention_days);
        let removed_read = self
            .inner
            .notifications
            .cleanup(server_id, read_cutoff, true)
            .await?;

        let unread_cutoff = now - Duration::days(settings.cleanup_unread_after_days);
        let removed_unread = self
            .inner
            .notifications
            .cleanup(server_id, unread_cutoff, false)
            .await?;

        let completed = self
            .inner
            .tasks
            .find_by_status_and_server(server_id, TaskStatus::Completed)
            .await?;
        let mut archived = 0u64;
        for task in completed {
            match self.inner.notifications.archive_for_task(task.id).await {
                Ok(count) => archived += count,
                Err(e) => {
                    tracing::warn!(task_id = %task.id, error = %e, "failed to archive notifications")
                }
            }
        }

        if removed_read + removed_unread + archived > 0 {
            tracing::info!(
                server_id = %server_id,
                removed_read,
                removed_unread,
                archived,
                "notification cleanup completed"
            );
        }
        Ok(())
    }
}
