// Supervisor metrics
//
// Counters for the events the orchestrator handles, logged after each one.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Lock-free counters shared between the orchestrator and observers.
#[derive(Debug)]
pub struct Metrics {
    /// Server launches, including the initial one
    pub server_starts: AtomicU64,

    /// Restarts triggered by the restart timer
    pub scheduled_restarts: AtomicU64,

    /// Server processes found dead and restarted
    pub crashes_detected: AtomicU64,

    /// Mod checks run
    pub mod_checks: AtomicU64,

    /// Mod checks that found out-of-date mods and cycled the server
    pub mod_updates: AtomicU64,

    /// Pairings mirrored successfully
    pub pairings_copied: AtomicU64,

    /// Pairings whose mirror failed
    pub copy_failures: AtomicU64,

    /// Updater runs that failed or reported failure
    pub update_failures: AtomicU64,

    /// Announcements that could not be delivered
    pub announce_failures: AtomicU64,

    start_time: Instant,
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            server_starts: AtomicU64::new(0),
            scheduled_restarts: AtomicU64::new(0),
            crashes_detected: AtomicU64::new(0),
            mod_checks: AtomicU64::new(0),
            mod_updates: AtomicU64::new(0),
            pairings_copied: AtomicU64::new(0),
            copy_failures: AtomicU64::new(0),
            update_failures: AtomicU64::new(0),
            announce_failures: AtomicU64::new(0),
            start_time: Instant::now(),
        }
    }

    pub fn record_server_start(&self) {
        self.server_starts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_scheduled_restart(&self) {
        self.scheduled_restarts.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_crash(&self) {
        self.crashes_detected.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mod_check(&self) {
        self.mod_checks.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_mod_update(&self) {
        self.mod_updates.fetch_add(1, Ordering::Relaxed);
    }

    /// Record the outcome of one sync pass
    pub fn record_sync(&self, copied: usize, failed: usize) {
        self.pairings_copied.fetch_add(copied as u64, Ordering::Relaxed);
        self.copy_failures.fetch_add(failed as u64, Ordering::Relaxed);
    }

    pub fn record_update_failure(&self) {
        self.update_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_announce_failure(&self) {
        self.announce_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Log metrics summary
    pub fn log_summary(&self) {
        tracing::info!("=== Warden Metrics Summary ===");
        tracing::info!("Uptime: {:.0}s", self.uptime().as_secs_f64());
        tracing::info!(
            "Server starts: {}, scheduled restarts: {}, crashes: {}",
            self.server_starts.load(Ordering::Relaxed),
            self.scheduled_restarts.load(Ordering::Relaxed),
            self.crashes_detected.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Mod checks: {}, mod updates: {}, pairings copied: {}, copy failures: {}",
            self.mod_checks.load(Ordering::Relaxed),
            self.mod_updates.load(Ordering::Relaxed),
            self.pairings_copied.load(Ordering::Relaxed),
            self.copy_failures.load(Ordering::Relaxed)
        );
        tracing::info!(
            "Update failures: {}, announce failures: {}",
            self.update_failures.load(Ordering::Relaxed),
            self.announce_failures.load(Ordering::Relaxed)
        );
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
