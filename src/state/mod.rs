// Orchestration state and trigger hand-off
//
// Timers never call into the loop. Each one owns a boolean flag it sets when
// it fires; the orchestration loop is the only reader and clearer of each
// flag. The loop's current state lives in a StateManager that the loop owns
// outright and that broadcasts every transition to observers.

use chrono::{DateTime, Local};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Controller state of the orchestration loop.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum OrchestrationState {
    /// Not started yet.
    #[default]
    Idle,
    /// Server up, waiting for a trigger.
    Running,
    HandlingModUpdate,
    HandlingRestart,
    HandlingCrash,
}

impl fmt::Display for OrchestrationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::HandlingModUpdate => "handling mod update",
            Self::HandlingRestart => "handling restart",
            Self::HandlingCrash => "handling crash",
        };
        f.write_str(name)
    }
}

/// Events broadcast by the orchestrator.
#[derive(Clone, Debug, PartialEq)]
pub enum StateChange {
    /// The loop moved from one state to another
    Transition {
        from: OrchestrationState,
        to: OrchestrationState,
    },

    /// The server was (re)started
    ServerStarted {
        next_restart: Option<DateTime<Local>>,
    },

    /// A mod check found out-of-date mods and the server was cycled
    ModUpdateHandled { stale: usize, copied: usize },

    /// The scheduled restart ran
    RestartHandled,

    /// The server was found dead and brought back
    CrashHandled,
}

/// Owns the loop's current state and the event channel.
pub struct StateManager {
    current: OrchestrationState,
    state_tx: broadcast::Sender<StateChange>,
}

impl StateManager {
    /// Channel buffer of 100 events; slow subscribers see `Lagged`.
    pub fn new() -> Self {
        let (state_tx, _) = broadcast::channel(100);
        Self {
            current: OrchestrationState::Idle,
            state_tx,
        }
    }

    pub fn current(&self) -> OrchestrationState {
        self.current
    }

    /// Move to `to`, emitting a transition event if the state actually changed.
    pub fn transition(&mut self, to: OrchestrationState) -> Option<StateChange> {
        if self.current == to {
            return None;
        }

        let change = StateChange::Transition {
            from: self.current,
            to,
        };
        tracing::debug!("State: {} -> {}", self.current, to);
        self.current = to;
        self.emit(change.clone());
        Some(change)
    }

    pub fn emit(&self, change: StateChange) {
        // No subscribers is fine
        let _ = self.state_tx.send(change);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateChange> {
        self.state_tx.subscribe()
    }
}

impl Default for StateManager {
    fn default() -> Self {
        Self::new()
    }
}

/// The flags the loop polls. Cloning shares the underlying flags.
#[derive(Clone, Debug, Default)]
pub struct Triggers {
    restart_due: Arc<AtomicBool>,
    mod_check_due: Arc<AtomicBool>,
}

impl Triggers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle for the restart timer to set.
    pub fn restart_flag(&self) -> Arc<AtomicBool> {
        self.restart_due.clone()
    }

    /// Handle for the mod-check timer to set.
    pub fn mod_check_flag(&self) -> Arc<AtomicBool> {
        self.mod_check_due.clone()
    }

    /// Read and clear the restart flag.
    pub fn take_restart_due(&self) -> bool {
        self.restart_due.swap(false, Ordering::SeqCst)
    }

    /// Read and clear the mod-check flag.
    pub fn take_mod_check_due(&self) -> bool {
        self.mod_check_due.swap(false, Ordering::SeqCst)
    }

    pub fn clear_restart_due(&self) {
        self.restart_due.store(false, Ordering::SeqCst);
    }

    pub fn request_restart(&self) {
        self.restart_due.store(true, Ordering::SeqCst);
    }

    pub fn request_mod_check(&self) {
        self.mod_check_due.store(true, Ordering::SeqCst);
    }
}

/// Repeating timer that only raises a flag. Aborted on drop.
#[derive(Debug)]
pub struct FlagTimer {
    task: JoinHandle<()>,
    period: Duration,
}

impl FlagTimer {
    /// Set `flag` every `period`, first after one full period.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(name: &'static str, flag: Arc<AtomicBool>, period: Duration) -> Self {
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                flag.store(true, Ordering::SeqCst);
                tracing::debug!("{} timer elapsed", name);
            }
        });

        Self { task, period }
    }

    pub fn period(&self) -> Duration {
        self.period
    }
}

impl Drop for FlagTimer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
