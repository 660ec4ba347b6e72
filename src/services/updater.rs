//! Content updates through steamcmd.
//!
//! [`PackageUpdater`] is the seam the mod sync engine and orchestrator use to
//! pull fresh server binaries and workshop items. [`SteamCmdUpdater`] runs one
//! steamcmd process per call; [`DisabledUpdater`] is used when another tool
//! (e.g. a desktop Steam client) keeps the content current.

use crate::models::WorkshopId;
use crate::services::credentials::Credentials;
use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use regex::Regex;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::process::Command;
use tokio::time::timeout;

/// Upper bound for a single steamcmd run.
pub const DEFAULT_UPDATE_TIMEOUT: Duration = Duration::from_secs(2 * 60 * 60);

#[derive(Error, Debug)]
pub enum UpdaterError {
    #[error("steamcmd executable not found: {0}")]
    ExecutableNotFound(Utf8PathBuf),

    #[error("steamcmd timed out after {0:?}")]
    Timeout(Duration),

    #[error("Process error: {0}")]
    Process(#[from] std::io::Error),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PackageUpdater: Send + Sync {
    /// False when updating is switched off; calls then succeed without work.
    fn is_enabled(&self) -> bool;

    /// Install or update an app (the dedicated server).
    async fn update_app(&self, app_id: u32) -> Result<bool, UpdaterError>;

    /// Download or update a single workshop item.
    async fn update_workshop_item(&self, app_id: u32, mod_id: WorkshopId) -> Result<bool, UpdaterError>;

    /// Download or update several workshop items. Succeeds only if all did.
    async fn update_workshop_items(
        &self,
        app_id: u32,
        mod_ids: &[WorkshopId],
    ) -> Result<bool, UpdaterError> {
        let mut all_ok = true;
        for mod_id in mod_ids {
            all_ok &= self.update_workshop_item(app_id, *mod_id).await?;
        }
        Ok(all_ok)
    }
}

/// No-op updater.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledUpdater;

#[async_trait]
impl PackageUpdater for DisabledUpdater {
    fn is_enabled(&self) -> bool {
        false
    }

    async fn update_app(&self, _app_id: u32) -> Result<bool, UpdaterError> {
        Ok(true)
    }

    async fn update_workshop_item(&self, _app_id: u32, _mod_id: WorkshopId) -> Result<bool, UpdaterError> {
        Ok(true)
    }

    async fn update_workshop_items(
        &self,
        _app_id: u32,
        _mod_ids: &[WorkshopId],
    ) -> Result<bool, UpdaterError> {
        Ok(true)
    }
}

/// Summary parsed from steamcmd's console output.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SteamCmdOutcome {
    pub downloaded_items: Vec<WorkshopId>,
    pub failed_items: Vec<WorkshopId>,
    pub app_installed: bool,
    pub errors: Vec<String>,
}

impl SteamCmdOutcome {
    pub fn is_success(&self) -> bool {
        self.failed_items.is_empty() && self.errors.is_empty()
    }
}

/// Updater that shells out to steamcmd.
///
/// Each call builds one command line: optional `+force_install_dir`, `+login`,
/// the update commands, then `+quit`. Output lines are matched against a few
/// known success/failure patterns to decide the result, since steamcmd's exit
/// code is not reliable.
pub struct SteamCmdUpdater {
    steamcmd_path: Utf8PathBuf,
    credentials: Credentials,
    server_install_dir: Option<Utf8PathBuf>,
    timeout: Duration,

    /// "Success. Downloaded item 1559212036 to ..."
    downloaded_pattern: Regex,

    /// "ERROR! Download item 1559212036 failed (Failure)."
    item_failed_pattern: Regex,

    /// "Success! App '223350' fully installed." / "... already up to date."
    app_installed_pattern: Regex,

    /// Any other "ERROR! ..." line.
    error_pattern: Regex,
}

impl SteamCmdUpdater {
    pub fn new(steamcmd_path: &Utf8Path, credentials: Credentials) -> Result<Self, UpdaterError> {
        if !steamcmd_path.is_file() {
            return Err(UpdaterError::ExecutableNotFound(steamcmd_path.to_path_buf()));
        }

        Ok(Self {
            steamcmd_path: steamcmd_path.to_path_buf(),
            credentials,
            server_install_dir: None,
            timeout: DEFAULT_UPDATE_TIMEOUT,
            downloaded_pattern: Regex::new(r"Success\. Downloaded item (\d+)")
                .expect("Invalid download regex"),
            item_failed_pattern: Regex::new(r"ERROR! Download item (\d+) failed")
                .expect("Invalid item failure regex"),
            app_installed_pattern: Regex::new(r"Success! App '(\d+)' (fully installed|already up to date)")
                .expect("Invalid app install regex"),
            error_pattern: Regex::new(r"^ERROR!\s*(.*)").expect("Invalid error regex"),
        })
    }

    /// Directory the server app is installed into (`+force_install_dir`).
    pub fn with_server_install_dir(mut self, dir: impl Into<Utf8PathBuf>) -> Self {
        self.server_install_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the full steamcmd argument list.
    pub fn build_arguments(&self, install_dir: Option<&Utf8Path>, commands: &[String]) -> Vec<String> {
        let mut args = Vec::with_capacity(commands.len() + 6);

        if let Some(dir) = install_dir {
            args.push("+force_install_dir".to_string());
            args.push(dir.to_string());
        }

        args.push("+login".to_string());
        args.push(self.credentials.username.clone());
        args.push(self.credentials.password.clone());
        args.extend(commands.iter().cloned());
        args.push("+quit".to_string());

        args
    }

    /// Commands for downloading a batch of workshop items.
    pub fn workshop_commands(app_id: u32, mod_ids: &[WorkshopId]) -> Vec<String> {
        mod_ids
            .iter()
            .flat_map(|id| {
                [
                    "+workshop_download_item".to_string(),
                    app_id.to_string(),
                    id.to_string(),
                ]
            })
            .collect()
    }

    /// Scan steamcmd output for item results and errors.
    pub fn parse_output(&self, output: &str) -> SteamCmdOutcome {
        let mut outcome = SteamCmdOutcome::default();

        for line in output.lines().map(str::trim) {
            if let Some(caps) = self.downloaded_pattern.captures(line) {
                if let Ok(id) = caps[1].parse() {
                    outcome.downloaded_items.push(id);
                }
            } else if let Some(caps) = self.item_failed_pattern.captures(line) {
                if let Ok(id) = caps[1].parse() {
                    outcome.failed_items.push(id);
                }
            } else if self.app_installed_pattern.is_match(line) {
                outcome.app_installed = true;
            } else if let Some(caps) = self.error_pattern.captures(line) {
                outcome.errors.push(caps[1].to_string());
            }
        }

        outcome
    }

    async fn run(&self, install_dir: Option<&Utf8Path>, commands: &[String]) -> Result<SteamCmdOutcome, UpdaterError> {
        let args = self.build_arguments(install_dir, commands);
        let shown: Vec<&str> = args
            .iter()
            .map(|a| if *a == self.credentials.password { "<redacted>" } else { a.as_str() })
            .collect();
        tracing::info!("Executing: {} {}", self.steamcmd_path, shown.join(" "));

        let start = Instant::now();
        let output = timeout(self.timeout, Command::new(&self.steamcmd_path).args(&args).output())
            .await
            .map_err(|_| {
                tracing::warn!("steamcmd timed out after {:?}", self.timeout);
                UpdaterError::Timeout(self.timeout)
            })??;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let outcome = self.parse_output(&stdout);

        tracing::info!(
            "steamcmd finished in {:.1}s with exit code {} ({} items downloaded, {} failed)",
            start.elapsed().as_secs_f32(),
            output.status.code().unwrap_or(-1),
            outcome.downloaded_items.len(),
            outcome.failed_items.len()
        );
        for error in &outcome.errors {
            tracing::warn!("steamcmd: {}", error);
        }

        Ok(outcome)
    }
}

#[async_trait]
impl PackageUpdater for SteamCmdUpdater {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn update_app(&self, app_id: u32) -> Result<bool, UpdaterError> {
        let commands = vec!["+app_update".to_string(), app_id.to_string()];
        let outcome = self.run(self.server_install_dir.as_deref(), &commands).await?;
        Ok(outcome.is_success())
    }

    async fn update_workshop_item(&self, app_id: u32, mod_id: WorkshopId) -> Result<bool, UpdaterError> {
        self.update_workshop_items(app_id, &[mod_id]).await
    }

    async fn update_workshop_items(
        &self,
        app_id: u32,
        mod_ids: &[WorkshopId],
    ) -> Result<bool, UpdaterError> {
        if mod_ids.is_empty() {
            return Ok(true);
        }

        tracing::info!("Executing steamcmd with {} workshop update tasks...", mod_ids.len());
        let commands = Self::workshop_commands(app_id, mod_ids);
        let outcome = self.run(None, &commands).await?;

        for failed in &outcome.failed_items {
            tracing::warn!("Workshop item {} failed to download", failed);
        }

        Ok(outcome.is_success())
    }
}
