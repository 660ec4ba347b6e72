//! The supervisor loop.
//!
//! [`Orchestrator`] owns the server supervisor, the mod sync engine and the
//! collaborator handles. Timers only raise flags in [`Triggers`]; each pass
//! of the loop handles at most one of them, in this order:
//!
//! 1. mod check due
//! 2. restart due
//! 3. server not running (crash)
//!
//! then sleeps for the poll interval. Every stop, sync, update and start runs
//! sequentially inside the pass that handles the trigger.

use crate::metrics::Metrics;
use crate::models::{ExistingProcessPolicy, ScheduleSettings, WardenConfig};
use crate::services::announcer::Announcer;
use crate::services::mirror::MirrorCopy;
use crate::services::mod_sync::ModSyncEngine;
use crate::services::registry::ModRegistry;
use crate::services::server::ServerSupervisor;
use crate::services::updater::PackageUpdater;
use crate::state::{FlagTimer, OrchestrationState, StateChange, StateManager, Triggers};
use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

#[cfg(test)]
mod tests;

/// Fixed delays used by the loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoopTimings {
    /// Sleep between passes
    pub poll: Duration,
    /// Warning time given to players before a mod update restart
    pub grace: Duration,
    /// Wait after killing the server before touching its files
    pub drain: Duration,
    /// Period of the mod check timer
    pub mod_check: Duration,
}

impl From<&ScheduleSettings> for LoopTimings {
    fn from(schedule: &ScheduleSettings) -> Self {
        Self {
            poll: schedule.poll_interval(),
            grace: schedule.grace_period(),
            drain: schedule.drain_period(),
            mod_check: schedule.mod_check_interval(),
        }
    }
}

/// Everything the loop needs from the configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    pub mod_list: Utf8PathBuf,
    pub workshop_dir: Utf8PathBuf,
    pub server_mod_dir: Utf8PathBuf,
    pub check_mods_at_startup: bool,
    pub existing_process: ExistingProcessPolicy,
    pub game_app_id: u32,
    pub server_app_id: u32,
    pub update_server: bool,
    pub timings: LoopTimings,
}

impl OrchestratorSettings {
    pub fn from_config(config: &WardenConfig) -> Self {
        Self {
            mod_list: config.mods.mod_list.clone(),
            workshop_dir: config.mods.workshop_dir.clone(),
            server_mod_dir: config.server_mod_dir(),
            check_mods_at_startup: config.mods.check_at_startup,
            existing_process: config.server.existing_process,
            game_app_id: config.updater.game_app_id,
            server_app_id: config.updater.server_app_id,
            update_server: config.updater.update_server,
            timings: LoopTimings::from(&config.schedule),
        }
    }
}

/// External collaborators used by the loop.
#[derive(Clone)]
pub struct Collaborators {
    pub mirror: Arc<dyn MirrorCopy>,
    pub updater: Arc<dyn PackageUpdater>,
    pub announcer: Arc<dyn Announcer>,
}

/// What a single pass of the loop did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterationOutcome {
    /// No trigger was pending and the server is alive
    Idle,
    /// A mod check ran and everything was in sync
    ModsUpToDate,
    /// A mod check found stale mods and cycled the server
    ModUpdate { stale: usize, copied: usize },
    /// The restart timer elapsed and the server was cycled
    Restart,
    /// The server was not running and was started again
    CrashRecovery,
}

pub struct Orchestrator {
    supervisor: ServerSupervisor,
    engine: ModSyncEngine,
    registry: ModRegistry,
    settings: OrchestratorSettings,
    collaborators: Collaborators,
    triggers: Triggers,
    state: StateManager,
    metrics: Arc<Metrics>,
    mod_check_timer: Option<FlagTimer>,
}

impl Orchestrator {
    /// `triggers` must be the same set whose restart flag `supervisor` raises.
    pub fn new(
        supervisor: ServerSupervisor,
        triggers: Triggers,
        settings: OrchestratorSettings,
        collaborators: Collaborators,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            supervisor,
            engine: ModSyncEngine::new(),
            registry: ModRegistry::default(),
            settings,
            collaborators,
            triggers,
            state: StateManager::new(),
            metrics,
            mod_check_timer: None,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state.subscribe()
    }

    pub fn state(&self) -> OrchestrationState {
        self.state.current()
    }

    pub fn triggers(&self) -> &Triggers {
        &self.triggers
    }

    pub fn supervisor(&self) -> &ServerSupervisor {
        &self.supervisor
    }

    pub fn engine(&self) -> &ModSyncEngine {
        &self.engine
    }

    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Start up and loop until a fatal error.
    pub async fn run(&mut self) -> Result<()> {
        self.startup().await?;

        loop {
            let outcome = self.run_iteration().await?;
            if outcome != IterationOutcome::Idle {
                tracing::info!("Pass finished: {:?}", outcome);
                self.metrics.log_summary();
            }
            tokio::time::sleep(self.settings.timings.poll).await;
        }
    }

    /// Bring the server up under warden control.
    ///
    /// Any failure here is fatal.
    pub async fn startup(&mut self) -> Result<()> {
        if self.supervisor.is_running() {
            match self.settings.existing_process {
                ExistingProcessPolicy::Abort => {
                    bail!(
                        "{} is already running and existing_process is set to abort",
                        self.supervisor.process_name()
                    );
                }
                ExistingProcessPolicy::Restart => {
                    tracing::warn!(
                        "{} is already running; stopping it to take over",
                        self.supervisor.process_name()
                    );
                    self.supervisor.stop_server();
                    tokio::time::sleep(self.settings.timings.drain).await;
                }
            }
        }

        self.registry = ModRegistry::load(&self.settings.mod_list)
            .with_context(|| format!("Failed to load mod list {}", self.settings.mod_list))?;
        self.refresh_pairings();

        self.update_server().await;

        let summary = self.engine.sync_all(self.collaborators.mirror.as_ref()).await;
        self.metrics.record_sync(summary.copied, summary.failed);

        if self.settings.check_mods_at_startup {
            let changed = self.download_workshop_items().await;
            tracing::info!("{} workshop mods changed during startup check", changed);

            let summary = self.engine.sync_all(self.collaborators.mirror.as_ref()).await;
            self.metrics.record_sync(summary.copied, summary.failed);
            if summary.copied > 0 {
                self.announce(&format!("{} Mod(s) updated at startup.", summary.copied))
                    .await;
            }
        }

        self.start_and_arm().await?;

        let mod_check_flag = self.triggers.mod_check_flag();
        self.mod_check_timer = Some(FlagTimer::spawn(
            "Mod check",
            mod_check_flag,
            self.settings.timings.mod_check,
        ));

        self.state.transition(OrchestrationState::Running);
        tracing::info!("Startup complete, supervising {}", self.supervisor.process_name());
        Ok(())
    }

    /// Handle at most one pending trigger.
    pub async fn run_iteration(&mut self) -> Result<IterationOutcome> {
        if self.triggers.take_mod_check_due() {
            return self.handle_mod_check().await;
        }

        if self.triggers.take_restart_due() {
            self.handle_restart().await?;
            return Ok(IterationOutcome::Restart);
        }

        if !self.supervisor.is_running() {
            self.handle_crash().await?;
            return Ok(IterationOutcome::CrashRecovery);
        }

        if let Some(remaining) = self.supervisor.time_until_next_restart() {
            tracing::debug!("Next restart in {} minutes", remaining.as_secs() / 60);
        }
        Ok(IterationOutcome::Idle)
    }

    async fn handle_mod_check(&mut self) -> Result<IterationOutcome> {
        self.metrics.record_mod_check();
        tracing::info!("Checking mods for updates");

        match ModRegistry::load(&self.settings.mod_list) {
            Ok(registry) => self.registry = registry,
            Err(e) => tracing::warn!("Could not reload mod list, keeping previous entries: {}", e),
        }
        self.refresh_pairings();

        let changed = self.download_workshop_items().await;
        if changed > 0 {
            tracing::info!("{} workshop mods were updated", changed);
        }

        let stale = self.engine.stale_pairings().await.len();
        if stale == 0 {
            tracing::info!("All mods up to date");
            return Ok(IterationOutcome::ModsUpToDate);
        }

        self.state.transition(OrchestrationState::HandlingModUpdate);

        self.announce(&format!(
            "{} Mod(s) need an update. Restarting in {}!",
            stale,
            describe_duration(self.settings.timings.grace)
        ))
        .await;
        tokio::time::sleep(self.settings.timings.grace).await;

        self.announce("Stopping server now...").await;
        self.stop_and_drain().await;

        let summary = self.engine.sync_all(self.collaborators.mirror.as_ref()).await;
        self.metrics.record_sync(summary.copied, summary.failed);

        self.update_server().await;
        self.start_and_arm().await?;

        self.metrics.record_mod_update();
        self.state.emit(StateChange::ModUpdateHandled {
            stale,
            copied: summary.copied,
        });
        self.state.transition(OrchestrationState::Running);

        Ok(IterationOutcome::ModUpdate {
            stale,
            copied: summary.copied,
        })
    }

    async fn handle_restart(&mut self) -> Result<()> {
        self.state.transition(OrchestrationState::HandlingRestart);
        self.metrics.record_scheduled_restart();

        self.announce("Server Restart-Timer Elapsed, restarting now.").await;
        self.stop_and_drain().await;

        self.update_server().await;
        self.start_and_arm().await?;

        self.state.emit(StateChange::RestartHandled);
        self.state.transition(OrchestrationState::Running);
        Ok(())
    }

    async fn handle_crash(&mut self) -> Result<()> {
        self.state.transition(OrchestrationState::HandlingCrash);
        self.metrics.record_crash();
        tracing::warn!("{} is not running", self.supervisor.process_name());

        self.announce("Server crashed, restarting.").await;
        self.stop_and_drain().await;

        self.start_and_arm().await?;

        self.state.emit(StateChange::CrashHandled);
        self.state.transition(OrchestrationState::Running);
        Ok(())
    }

    /// Request every registry item from the updater, then rebuild the pairings
    /// so folders downloaded for the first time are included.
    ///
    /// Returns how many already-paired workshop folders changed.
    async fn download_workshop_items(&mut self) -> usize {
        let changed = self
            .engine
            .detect_external_updates(
                &self.registry,
                self.collaborators.updater.as_ref(),
                self.settings.game_app_id,
            )
            .await;
        self.refresh_pairings();
        changed.len()
    }

    fn refresh_pairings(&mut self) {
        self.engine.refresh_pairings(
            &self.registry,
            &self.settings.workshop_dir,
            &self.settings.server_mod_dir,
        );
    }

    async fn stop_and_drain(&mut self) {
        self.supervisor.stop_restart_timer();
        self.supervisor.stop_server();
        tokio::time::sleep(self.settings.timings.drain).await;
    }

    /// Start the server with the current pairings and re-arm the restart
    /// timer. A pending restart flag is dropped since this start satisfies it.
    async fn start_and_arm(&mut self) -> Result<()> {
        let mods = self.engine.destination_names();
        self.supervisor
            .start_server(mods.as_slice())
            .context("Failed to start the server")?;
        self.metrics.record_server_start();

        self.supervisor.start_restart_timer();
        self.triggers.clear_restart_due();

        let next_restart = self.supervisor.time_of_next_restart();
        let message = match next_restart {
            Some(at) => format!(
                "Server started! Next restart scheduled at {}",
                at.format("%H:%M")
            ),
            None => "Server started!".to_string(),
        };
        self.announce(&message).await;
        self.state.emit(StateChange::ServerStarted { next_restart });
        Ok(())
    }

    async fn update_server(&self) {
        let updater = self.collaborators.updater.as_ref();
        if !updater.is_enabled() || !self.settings.update_server {
            return;
        }

        match updater.update_app(self.settings.server_app_id).await {
            Ok(true) => tracing::info!("Server files up to date"),
            Ok(false) => {
                tracing::warn!("Server update reported failures");
                self.metrics.record_update_failure();
            }
            Err(e) => {
                tracing::warn!("Server update failed: {}", e);
                self.metrics.record_update_failure();
            }
        }
    }

    async fn announce(&self, text: &str) {
        if let Err(e) = self.collaborators.announcer.announce(text).await {
            tracing::warn!("Announcement failed: {}", e);
            self.metrics.record_announce_failure();
        }
    }
}

/// Human readable delay for announcements, e.g. "5 Minutes".
pub fn describe_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    match secs {
        60 => "1 Minute".to_string(),
        s if s >= 60 && s % 60 == 0 => format!("{} Minutes", s / 60),
        1 => "1 Second".to_string(),
        s => format!("{} Seconds", s),
    }
}
