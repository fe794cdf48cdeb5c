//! Per-tenant channel scheduler: job slots, timers, single-flight triggers
//! and execution bookkeeping.

use std::{
    sync::{
        Arc, Weak,
        atomic::{AtomicBool, Ordering},
    },
    time::Duration,
};

use {
    chrono_tz::Tz,
    dashmap::DashMap,
    marketsync_channels::{
        Channel, ChannelExecution, ChannelHandler, ExecutionLog, ExecutionStatus, HandlerRegistry,
        ItemChannelStatus, RunMode, RunRequest, Storage,
    },
    marketsync_common::time::now_ms,
    marketsync_config::SchedulerConfig,
    tokio::task::JoinHandle,
    tracing::{debug, error, info, warn},
};

use crate::{
    Result,
    schedule::{Trigger, next_fire},
};

/// Scheduler switches shared by every manager.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ManagerSettings {
    /// Create timers for scheduled slots. On-demand triggers work either way.
    pub scheduler_enabled: bool,
    /// Re-read the channel row before each run.
    pub reload_channels: bool,
    pub timezone: Option<Tz>,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            scheduler_enabled: true,
            reload_channels: true,
            timezone: None,
        }
    }
}

impl From<&SchedulerConfig> for ManagerSettings {
    fn from(cfg: &SchedulerConfig) -> Self {
        Self {
            scheduler_enabled: cfg.enabled,
            reload_channels: cfg.reload_channels,
            timezone: cfg.tz(),
        }
    }
}

/// Identifies one job slot.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobKey {
    pub channel: String,
    pub mode: RunMode,
}

impl JobKey {
    pub fn new(channel: impl Into<String>, mode: RunMode) -> Self {
        Self {
            channel: channel.into(),
            mode,
        }
    }
}

#[derive(Default)]
struct JobSlot {
    timer: Option<JoinHandle<()>>,
    running: Arc<AtomicBool>,
}

/// Clears the running flag when a run ends, however it ends.
struct RunningGuard(Arc<AtomicBool>);

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Why a trigger did not run the handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingLanguage,
    AlreadyRunning,
    NothingSubmitted,
}

/// Result of [`ChannelsManager::trigger_channel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerOutcome {
    Skipped(SkipReason),
    Finished {
        execution_id: i64,
        status: ExecutionStatus,
    },
}

/// Schedules and runs the channels of one tenant.
pub struct ChannelsManager {
    tenant_id: String,
    slots: DashMap<JobKey, JobSlot>,
    handlers: HandlerRegistry,
    store: Arc<dyn Storage>,
    settings: ManagerSettings,
}

impl ChannelsManager {
    pub fn new(
        tenant_id: impl Into<String>,
        handlers: HandlerRegistry,
        store: Arc<dyn Storage>,
        settings: ManagerSettings,
    ) -> Arc<Self> {
        Arc::new(Self {
            tenant_id: tenant_id.into(),
            slots: DashMap::new(),
            handlers,
            store,
            settings,
        })
    }

    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// Register a channel and schedule its jobs.
    pub fn add_channel(self: &Arc<Self>, channel: &Channel) {
        self.start_channel(channel);
    }

    /// (Re)create the timers of both slots from the channel config.
    ///
    /// Existing timers are always cancelled. No new ones are created when
    /// scheduling is disabled or the channel is inactive. A slot with missing
    /// or invalid settings is logged and left without a timer; the other slot
    /// is unaffected.
    pub fn start_channel(self: &Arc<Self>, channel: &Channel) {
        self.stop_channel(channel);
        if !self.settings.scheduler_enabled {
            debug!(channel = %channel.identifier, "channel scheduler disabled");
            return;
        }
        if !channel.active {
            debug!(channel = %channel.identifier, tenant = %self.tenant_id, "channel inactive, not scheduled");
            return;
        }

        for mode in [RunMode::Default, RunMode::Sync] {
            let key = JobKey::new(channel.identifier.clone(), mode);
            match Trigger::from_slot(&channel.config.schedule(mode)) {
                Ok(None) => {
                    self.slots.entry(key).or_default();
                },
                Ok(Some(trigger)) => {
                    debug!(
                        channel = %channel.identifier,
                        tenant = %self.tenant_id,
                        %mode,
                        cron = %trigger.cron_expression(),
                        "scheduling channel job"
                    );
                    let timer = self.spawn_timer(channel.clone(), mode, trigger);
                    self.slots.entry(key).or_default().timer = Some(timer);
                },
                Err(e) => {
                    warn!(
                        channel = %channel.identifier,
                        tenant = %self.tenant_id,
                        %mode,
                        error = %e,
                        "channel job not scheduled"
                    );
                },
            }
        }
    }

    /// Cancel the timers of both slots. Runs in progress continue.
    pub fn stop_channel(&self, channel: &Channel) {
        for mode in [RunMode::Default, RunMode::Sync] {
            if let Some(mut slot) = self.slots.get_mut(&JobKey::new(channel.identifier.clone(), mode))
                && let Some(timer) = slot.timer.take()
            {
                timer.abort();
            }
        }
    }

    /// Cancel every timer of this tenant.
    pub fn shutdown(&self) {
        for mut slot in self.slots.iter_mut() {
            if let Some(timer) = slot.timer.take() {
                timer.abort();
            }
        }
        info!(tenant = %self.tenant_id, "channels manager stopped");
    }

    /// Slots that currently have a timer.
    pub fn scheduled_jobs(&self) -> Vec<JobKey> {
        self.slots
            .iter()
            .filter(|s| s.timer.is_some())
            .map(|s| s.key().clone())
            .collect()
    }

    pub fn is_running(&self, key: &JobKey) -> bool {
        self.slots
            .get(key)
            .is_some_and(|s| s.running.load(Ordering::Acquire))
    }

    pub fn handler_for(&self, channel: &Channel) -> Result<Arc<dyn ChannelHandler>> {
        Ok(self.handlers.get(channel.channel_type)?)
    }

    /// Run the channel handler once unless the slot is already busy.
    pub async fn trigger_channel(
        &self,
        channel: &Channel,
        language: &str,
        request: RunRequest,
    ) -> Result<TriggerOutcome> {
        info!(channel = %channel.identifier, tenant = %self.tenant_id, ?request, "channel triggered");

        if language.is_empty() {
            error!(
                channel = %channel.identifier,
                tenant = %self.tenant_id,
                "no language configured for channel, processing stopped"
            );
            return Ok(TriggerOutcome::Skipped(SkipReason::MissingLanguage));
        }

        let key = JobKey::new(channel.identifier.clone(), request.mode());
        let running = Arc::clone(&self.slots.entry(key).or_default().running);
        if running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            warn!(channel = %channel.identifier, tenant = %self.tenant_id, "channel is already running, skip it");
            return Ok(TriggerOutcome::Skipped(SkipReason::AlreadyRunning));
        }
        let _guard = RunningGuard(running);

        let handler = self.handler_for(channel)?;

        if matches!(request, RunRequest::Full) {
            let count = self
                .store
                .count_by_channel_status(&self.tenant_id, &channel.identifier, ItemChannelStatus::Submitted)
                .await?;
            if count == 0 {
                info!(channel = %channel.identifier, tenant = %self.tenant_id, "no submitted items, skipping");
                return Ok(TriggerOutcome::Skipped(SkipReason::NothingSubmitted));
            }
            info!(channel = %channel.identifier, tenant = %self.tenant_id, count, "found submitted items");
        }

        let channel = self.reload(channel).await?;
        self.execute(handler.as_ref(), &channel, language, request)
            .await
    }

    // ── Internal ────────────────────────────────────────────────────────

    async fn reload(&self, channel: &Channel) -> Result<Channel> {
        if !self.settings.reload_channels {
            return Ok(channel.clone());
        }
        match self.store.get_channel(channel.id).await? {
            Some(fresh) => {
                debug!(channel = %fresh.identifier, tenant = %self.tenant_id, "channel reloaded");
                Ok(fresh)
            },
            None => Ok(channel.clone()),
        }
    }

    async fn execute(
        &self,
        handler: &dyn ChannelHandler,
        channel: &Channel,
        language: &str,
        request: RunRequest,
    ) -> Result<TriggerOutcome> {
        let execution_id = self
            .store
            .create_execution(&ChannelExecution::running(channel, now_ms()))
            .await?;
        let mut log = ExecutionLog::new(channel.config.debug);

        let status = match handler
            .process_channel(channel, language, request, &mut log)
            .await
        {
            Ok(()) => ExecutionStatus::Success,
            Err(e) => {
                error!(
                    channel = %channel.identifier,
                    tenant = %self.tenant_id,
                    execution_id,
                    error = %e,
                    "channel execution failed"
                );
                log.line(format!("Error: {e}"));
                ExecutionStatus::Error
            },
        };

        self.store
            .finish_execution(execution_id, status, log.as_str(), now_ms())
            .await?;
        info!(channel = %channel.identifier, tenant = %self.tenant_id, execution_id, ?status, "channel execution finished");
        Ok(TriggerOutcome::Finished {
            execution_id,
            status,
        })
    }

    fn spawn_timer(self: &Arc<Self>, channel: Channel, mode: RunMode, trigger: Trigger) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let tz = self.settings.timezone;
        tokio::spawn(async move {
            loop {
                let now = now_ms();
                let next = match next_fire(&trigger, now, tz) {
                    Ok(Some(next)) => next,
                    Ok(None) => break,
                    Err(e) => {
                        warn!(channel = %channel.identifier, %mode, error = %e, "cannot compute next fire time");
                        break;
                    },
                };
                tokio::time::sleep(Duration::from_millis(next.saturating_sub(now))).await;

                let Some(manager) = weak.upgrade() else {
                    break;
                };
                let request = match mode {
                    RunMode::Default => RunRequest::Full,
                    RunMode::Sync => RunRequest::Sync { item: None },
                };
                let channel = channel.clone();
                tokio::spawn(async move {
                    let channel = match manager.reload(&channel).await {
                        Ok(fresh) => fresh,
                        Err(e) => {
                            warn!(channel = %channel.identifier, error = %e, "channel reload failed");
                            channel
                        },
                    };
                    if !channel.active {
                        info!(channel = %channel.identifier, "channel deactivated, scheduled run skipped");
                        return;
                    }
                    let language = channel.config.language.clone().unwrap_or_default();
                    if let Err(e) = manager.trigger_channel(&channel, &language, request).await {
                        error!(channel = %channel.identifier, error = %e, "scheduled channel run failed");
                    }
                });
            }
        })
    }
}

impl Drop for ChannelsManager {
    fn drop(&mut self) {
        for slot in self.slots.iter() {
            if let Some(timer) = &slot.timer {
                timer.abort();
            }
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::testing::{RecordingHandler, channel, seed_submitted},
        marketsync_channels::{ExecutionStore, store_memory::InMemoryStore},
        serde_json::json,
    };

    fn manager(
        store: Arc<InMemoryStore>,
        handler: Arc<RecordingHandler>,
        settings: ManagerSettings,
    ) -> Arc<ChannelsManager> {
        let mut handlers = HandlerRegistry::new();
        handlers.register(handler);
        ChannelsManager::new("t1", handlers, store, settings)
    }

    #[tokio::test]
    async fn inactive_channel_is_never_scheduled() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store, RecordingHandler::new(), ManagerSettings::default());
        let mut ch = channel(json!({"start": 2, "interval": 5, "syncStart": 3, "syncTime": "03:00"}));
        ch.active = false;
        mgr.add_channel(&ch);
        assert!(mgr.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn deactivated_channel_loses_its_timers() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store, RecordingHandler::new(), ManagerSettings::default());
        let mut ch = channel(json!({"start": 2, "interval": 5, "syncStart": 3, "syncTime": "03:00"}));
        mgr.add_channel(&ch);
        assert_eq!(mgr.scheduled_jobs().len(), 2);

        ch.active = false;
        mgr.add_channel(&ch);
        assert!(mgr.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn disabled_scheduler_creates_no_jobs_but_triggers_work() {
        let store = Arc::new(InMemoryStore::new());
        let handler = RecordingHandler::new();
        let mgr = manager(store.clone(), handler.clone(), ManagerSettings {
            scheduler_enabled: false,
            ..Default::default()
        });
        let ch = channel(json!({"start": 2, "interval": 5, "language": "ru"}));
        mgr.add_channel(&ch);
        assert!(mgr.scheduled_jobs().is_empty());

        let out = mgr
            .trigger_channel(&ch, "ru", RunRequest::Sync { item: None })
            .await
            .unwrap();
        assert!(matches!(out, TriggerOutcome::Finished {
            status: ExecutionStatus::Success,
            ..
        }));
        assert_eq!(handler.calls(), vec![RunRequest::Sync { item: None }]);
    }

    #[tokio::test]
    async fn slots_are_scheduled_independently() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store, RecordingHandler::new(), ManagerSettings::default());
        let ch = channel(json!({
            "start": 2, "interval": 15,
            "syncStart": 4, "syncCron": "not valid",
        }));
        mgr.add_channel(&ch);
        assert_eq!(mgr.scheduled_jobs(), vec![JobKey::new("ozon", RunMode::Default)]);

        // Restarting replaces timers rather than adding more.
        mgr.start_channel(&ch);
        assert_eq!(mgr.scheduled_jobs().len(), 1);

        mgr.stop_channel(&ch);
        assert!(mgr.scheduled_jobs().is_empty());
    }

    #[tokio::test]
    async fn overlapping_trigger_is_a_noop() {
        let store = Arc::new(InMemoryStore::new());
        let handler = RecordingHandler::slow(Duration::from_millis(200));
        let mgr = manager(store.clone(), handler.clone(), ManagerSettings::default());
        let ch = channel(json!({}));

        let first = {
            let mgr = Arc::clone(&mgr);
            let ch = ch.clone();
            tokio::spawn(async move {
                mgr.trigger_channel(&ch, "ru", RunRequest::Sync { item: None })
                    .await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(mgr.is_running(&JobKey::new("ozon", RunMode::Sync)));

        let second = mgr
            .trigger_channel(&ch, "ru", RunRequest::Sync { item: None })
            .await
            .unwrap();
        assert_eq!(second, TriggerOutcome::Skipped(SkipReason::AlreadyRunning));

        // Full runs use the other slot and are not blocked by a sync.
        seed_submitted(&store, "ozon").await;
        let full = mgr.trigger_channel(&ch, "ru", RunRequest::Full).await.unwrap();
        assert!(matches!(full, TriggerOutcome::Finished { .. }));

        first.await.unwrap().unwrap();
        assert!(!mgr.is_running(&JobKey::new("ozon", RunMode::Sync)));
        assert_eq!(handler.calls().len(), 2);
    }

    #[tokio::test]
    async fn full_run_skipped_without_submitted_items() {
        let store = Arc::new(InMemoryStore::new());
        let handler = RecordingHandler::new();
        let mgr = manager(store.clone(), handler.clone(), ManagerSettings::default());
        let ch = channel(json!({}));
        let out = mgr.trigger_channel(&ch, "ru", RunRequest::Full).await.unwrap();
        assert_eq!(out, TriggerOutcome::Skipped(SkipReason::NothingSubmitted));
        assert!(handler.calls().is_empty());
        // The guard was released.
        assert!(!mgr.is_running(&JobKey::new("ozon", RunMode::Default)));
    }

    #[tokio::test]
    async fn missing_language_skips_before_guard() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store, RecordingHandler::new(), ManagerSettings::default());
        let out = mgr
            .trigger_channel(&channel(json!({})), "", RunRequest::Full)
            .await
            .unwrap();
        assert_eq!(out, TriggerOutcome::Skipped(SkipReason::MissingLanguage));
    }

    #[tokio::test]
    async fn handler_failure_finalizes_execution_as_error() {
        let store = Arc::new(InMemoryStore::new());
        let handler = RecordingHandler::failing("Ozon client id is not set");
        let mgr = manager(store.clone(), handler, ManagerSettings::default());
        let ch = channel(json!({}));
        let out = mgr
            .trigger_channel(&ch, "ru", RunRequest::ClearCache)
            .await
            .unwrap();
        let TriggerOutcome::Finished {
            execution_id,
            status,
        } = out
        else {
            panic!("expected a finished run, got {out:?}");
        };
        assert_eq!(status, ExecutionStatus::Error);
        let execs = store.list_executions(ch.id, 5).await.unwrap();
        assert_eq!(execs[0].id, execution_id);
        assert!(execs[0].log.contains("Start"));
        assert!(execs[0].log.contains("Error: Ozon client id is not set"));
        assert!(execs[0].finished_at_ms.is_some());
    }

    #[tokio::test]
    async fn reload_uses_stored_channel() {
        let store = Arc::new(InMemoryStore::new());
        let handler = RecordingHandler::new();
        let mgr = manager(store.clone(), handler.clone(), ManagerSettings::default());
        let mut ch = channel(json!({"debug": false}));
        ch.id = marketsync_channels::ChannelStore::upsert_channel(store.as_ref(), &ch)
            .await
            .unwrap();
        let mut edited = ch.clone();
        edited.name = "Edited".into();
        marketsync_channels::ChannelStore::upsert_channel(store.as_ref(), &edited)
            .await
            .unwrap();

        mgr.trigger_channel(&ch, "ru", RunRequest::Sync { item: None })
            .await
            .unwrap();
        assert_eq!(handler.seen_names(), vec!["Edited".to_string()]);
    }

    #[tokio::test]
    async fn unknown_channel_type_is_an_error() {
        let store = Arc::new(InMemoryStore::new());
        let mgr = manager(store, RecordingHandler::new(), ManagerSettings::default());
        let mut ch = channel(json!({}));
        ch.channel_type = marketsync_channels::ChannelType::YandexMarket;
        assert!(mgr.handler_for(&ch).is_err());
        assert!(
            mgr.trigger_channel(&ch, "ru", RunRequest::Sync { item: None })
                .await
                .is_err()
        );
        assert!(!mgr.is_running(&JobKey::new("ozon", RunMode::Sync)));
    }
}
