use crate::models::ServerSettings;
use crate::services::process::{ProcessError, ProcessSupervisor};
use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Local};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Errors raised while constructing or driving the server process.
#[derive(Error, Debug)]
pub enum SupervisorError {
    #[error("Server executable not found: {0}")]
    ExecutableNotFound(Utf8PathBuf),

    #[error("Invalid restart interval: {0} (must be a positive number of seconds)")]
    InvalidRestartInterval(i64),

    #[error(transparent)]
    Process(#[from] ProcessError),
}

/// Launch options that end up on the server's command line.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    pub config_file: String,
    pub port: u16,
    pub profiles_dir: String,
    pub cpu_count: Option<u32>,
    pub extra_args: Vec<String>,
    /// Mods emitted first, in this order, when requested.
    pub mod_priority: Vec<String>,
}

impl From<&ServerSettings> for LaunchOptions {
    fn from(settings: &ServerSettings) -> Self {
        Self {
            config_file: settings.config_file.clone(),
            port: settings.port,
            profiles_dir: settings.profiles_dir.clone(),
            cpu_count: settings.cpu_count,
            extra_args: settings.extra_args.clone(),
            mod_priority: settings.mod_priority.clone(),
        }
    }
}

impl Default for LaunchOptions {
    fn default() -> Self {
        Self::from(&ServerSettings::default())
    }
}

/// Restart timer bookkeeping. Liveness is not stored; it is looked up.
#[derive(Debug, Clone, Copy)]
pub struct ServerRuntimeState {
    pub start_instant: Option<Instant>,
    pub restart_interval: Duration,
    pub timer_armed: bool,
}

/// One armed generation of the repeating restart timer.
struct ArmedTimer {
    task: JoinHandle<()>,
    /// Set by `stop_restart_timer`; a tick already past its await checks this
    /// before raising the flag.
    stopped_manually: Arc<AtomicBool>,
}

/// Owns the dedicated server process and its restart schedule.
///
/// The restart timer does not call back into anything: each tick sets the
/// shared `restart_due` flag, which the orchestrator polls and clears.
pub struct ServerSupervisor {
    executable: Utf8PathBuf,
    process_name: String,
    options: LaunchOptions,
    process: Arc<dyn ProcessSupervisor>,
    restart_due: Arc<AtomicBool>,
    state: ServerRuntimeState,
    timer: Option<ArmedTimer>,
}

impl ServerSupervisor {
    /// Validate the executable and interval and build an idle supervisor.
    pub fn new(
        executable: &Utf8Path,
        restart_interval_secs: i64,
        options: LaunchOptions,
        process: Arc<dyn ProcessSupervisor>,
        restart_due: Arc<AtomicBool>,
    ) -> Result<Self, SupervisorError> {
        if executable.as_str().is_empty() || !executable.is_file() {
            return Err(SupervisorError::ExecutableNotFound(executable.to_path_buf()));
        }

        let Ok(secs) = u64::try_from(restart_interval_secs) else {
            return Err(SupervisorError::InvalidRestartInterval(restart_interval_secs));
        };
        if secs == 0 {
            return Err(SupervisorError::InvalidRestartInterval(restart_interval_secs));
        }

        let process_name = executable
            .file_stem()
            .ok_or_else(|| SupervisorError::ExecutableNotFound(executable.to_path_buf()))?
            .to_string();

        Ok(Self {
            executable: executable.to_path_buf(),
            process_name,
            options,
            process,
            restart_due,
            state: ServerRuntimeState {
                start_instant: None,
                restart_interval: Duration::from_secs(secs),
                timer_armed: false,
            },
            timer: None,
        })
    }

    pub fn process_name(&self) -> &str {
        &self.process_name
    }

    pub fn executable(&self) -> &Utf8Path {
        &self.executable
    }

    pub fn restart_interval(&self) -> Duration {
        self.state.restart_interval
    }

    pub fn runtime_state(&self) -> ServerRuntimeState {
        self.state
    }

    /// Order mods for `-mod=`: priority mods first (in priority order), then
    /// the rest in request order, duplicates dropped.
    pub fn mod_load_order<S: AsRef<str>>(&self, requested: &[S]) -> Vec<String> {
        let mut ordered: Vec<String> = Vec::with_capacity(requested.len());

        for priority in &self.options.mod_priority {
            if requested.iter().any(|m| m.as_ref() == priority) && !ordered.contains(priority) {
                ordered.push(priority.clone());
            }
        }

        for mod_name in requested {
            let mod_name = mod_name.as_ref();
            if !ordered.iter().any(|m| m == mod_name) {
                ordered.push(mod_name.to_string());
            }
        }

        ordered
    }

    /// Full server command line for the given mods.
    pub fn build_launch_arguments<S: AsRef<str>>(&self, mods: &[S]) -> Vec<String> {
        let mut args = vec![
            format!("-config={}", self.options.config_file),
            format!("-port={}", self.options.port),
            "-dologs".to_string(),
            "-adminlog".to_string(),
            "-netlog".to_string(),
            "-freezecheck".to_string(),
        ];

        if let Some(cpu_count) = self.options.cpu_count {
            args.push(format!("-cpuCount={}", cpu_count));
        }

        let ordered = self.mod_load_order(mods);
        if !ordered.is_empty() {
            args.push(format!("-mod={};", ordered.join(";")));
        }

        args.push(format!("-profiles={}", self.options.profiles_dir));
        args.extend(self.options.extra_args.iter().cloned());
        args
    }

    /// Launch the server with the given mods enabled.
    pub fn start_server<S: AsRef<str>>(&self, mods: &[S]) -> Result<u32, SupervisorError> {
        let args = self.build_launch_arguments(mods);

        tracing::info!("Starting {} with generated arguments", self.process_name);
        tracing::info!("Arguments: {}", args.join(" "));

        Ok(self.process.start(&self.executable, &args)?)
    }

    /// Kill every running server process. Idempotent.
    pub fn stop_server(&self) -> usize {
        let killed = self.process.kill(&self.process_name);
        tracing::info!("Killed {} {} processes", killed, self.process_name);
        killed
    }

    pub fn is_running(&self) -> bool {
        self.process.is_running(&self.process_name)
    }

    /// Arm the repeating restart timer, replacing any armed one.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start_restart_timer(&mut self) {
        self.disarm();

        let start = Instant::now();
        let interval = self.state.restart_interval;
        let stopped_manually = Arc::new(AtomicBool::new(false));
        let guard = stopped_manually.clone();
        let restart_due = self.restart_due.clone();

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(start + interval, interval);
            loop {
                ticker.tick().await;
                if guard.load(Ordering::SeqCst) {
                    tracing::debug!("Restart timer tick suppressed after manual stop");
                    break;
                }
                restart_due.store(true, Ordering::SeqCst);
                tracing::info!("Restart timer elapsed");
            }
        });

        self.timer = Some(ArmedTimer {
            task,
            stopped_manually,
        });
        self.state.start_instant = Some(start);
        self.state.timer_armed = true;

        tracing::debug!("Restart timer armed for {:?}", interval);
    }

    /// Disarm the restart timer. A tick in flight at this moment is dropped.
    pub fn stop_restart_timer(&mut self) {
        self.disarm();
        self.state.timer_armed = false;
        self.state.start_instant = None;
    }

    fn disarm(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.stopped_manually.store(true, Ordering::SeqCst);
            timer.task.abort();
        }
    }

    pub fn is_timer_armed(&self) -> bool {
        self.state.timer_armed
    }

    /// Time left until the next scheduled restart, `None` when disarmed.
    /// Saturates at zero once the deadline has passed.
    pub fn time_until_next_restart(&self) -> Option<Duration> {
        if !self.state.timer_armed {
            return None;
        }

        let deadline = self.state.start_instant? + self.state.restart_interval;
        Some(deadline.saturating_duration_since(Instant::now()))
    }

    /// Wall-clock time of the next scheduled restart.
    pub fn time_of_next_restart(&self) -> Option<DateTime<Local>> {
        let remaining = self.time_until_next_restart()?;
        let remaining = chrono::Duration::from_std(remaining).ok()?;
        Some(Local::now() + remaining)
    }
}

impl Drop for ServerSupervisor {
    fn drop(&mut self) {
        self.disarm();
    }
}
