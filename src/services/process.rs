//! Raw process primitives: spawn, liveness by name, kill by name.
//!
//! Processes are identified by executable stem (`DayZServer_x64` for
//! `DayZServer_x64.exe`), matching how the server shows up in the process table.

use camino::Utf8Path;
use std::path::Path;
use std::process::Stdio;
use sysinfo::{ProcessRefreshKind, RefreshKind, System};
use thiserror::Error;
use tokio::process::Command;

#[derive(Error, Debug)]
pub enum ProcessError {
    #[error("Failed to spawn {path}: {source}")]
    Spawn {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg_attr(test, mockall::automock)]
pub trait ProcessSupervisor: Send + Sync {
    /// Launch an executable detached from the warden
    ///
    /// The child gets null stdio and runs from the executable's own directory,
    /// so relative `-config=` and `-profiles=` arguments resolve there.
    ///
    /// # Arguments
    /// * `path` - Server executable
    /// * `args` - Launch arguments, one per element, without shell quoting
    ///
    /// # Returns
    /// The pid of the new process
    fn start(&self, path: &Utf8Path, args: &[String]) -> Result<u32, ProcessError>;

    /// Check the process table for a live process
    ///
    /// # Arguments
    /// * `name` - Executable stem, compared case-insensitively
    fn is_running(&self, name: &str) -> bool;

    /// Kill every process with the given executable stem
    ///
    /// # Arguments
    /// * `name` - Executable stem, compared case-insensitively
    ///
    /// # Returns
    /// How many processes were signalled. Zero when none were running.
    fn kill(&self, name: &str) -> usize;
}

/// Process primitives backed by the OS process table.
///
/// Every query takes a fresh process snapshot through sysinfo; nothing is
/// cached between calls.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemProcessSupervisor;

impl SystemProcessSupervisor {
    pub fn new() -> Self {
        Self
    }

    fn process_table() -> System {
        System::new_with_specifics(RefreshKind::new().with_processes(ProcessRefreshKind::new()))
    }
}

/// Does a process table name refer to the executable stem `name`?
///
/// Both `DayZServer_x64` and `DayZServer_x64.exe` match `dayzserver_x64`.
pub fn matches_name(process_name: &Path, name: &str) -> bool {
    process_name
        .file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.eq_ignore_ascii_case(name))
}

impl ProcessSupervisor for SystemProcessSupervisor {
    fn start(&self, path: &Utf8Path, args: &[String]) -> Result<u32, ProcessError> {
        let mut command = Command::new(path);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);

        if let Some(dir) = path.parent().filter(|d| !d.as_str().is_empty()) {
            command.current_dir(dir);
        }

        let child = command.spawn().map_err(|source| ProcessError::Spawn {
            path: path.to_string(),
            source,
        })?;

        let pid = child.id().unwrap_or_default();
        tracing::info!("Started {} (pid {})", path, pid);
        Ok(pid)
    }

    fn is_running(&self, name: &str) -> bool {
        let system = Self::process_table();
        system
            .processes()
            .values()
            .any(|process| matches_name(Path::new(process.name()), name))
    }

    fn kill(&self, name: &str) -> usize {
        let system = Self::process_table();
        let mut killed = 0;

        for process in system
            .processes()
            .values()
            .filter(|process| matches_name(Path::new(process.name()), name))
        {
            if process.kill() {
                killed += 1;
            } else {
                tracing::warn!("Failed to kill {} (pid {})", name, process.pid());
            }
        }

        killed
    }
}
