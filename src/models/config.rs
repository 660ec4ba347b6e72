use crate::config::ConfigError;
use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// DayZ (client) app id; workshop items are published under it.
pub const DAYZ_GAME_APP_ID: u32 = 221100;

/// DayZ dedicated server app id.
pub const DAYZ_SERVER_APP_ID: u32 = 223350;

/// Mods whose relative load order matters, highest precedence first.
pub const DEFAULT_MOD_PRIORITY: &[&str] = &[
    "@CF",
    "@Dabs-Framework",
    "@Community-Online-Tools",
    "@DayZ-Expansion-Licensed",
    "@DayZ-Expansion-Core",
    "@DayZ-Expansion",
    "@DayZ-Expansion-Book",
    "@DayZ-Expansion-Market",
    "@DayZ-Expansion-Vehicles",
];

/// Complete configuration from `Warden.yaml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct WardenConfig {
    pub server: ServerSettings,
    pub mods: ModSettings,
    pub schedule: ScheduleSettings,
    pub updater: UpdaterSettings,
    pub announcer: AnnouncerSettings,
}

/// What to do when the server is already running when the warden starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExistingProcessPolicy {
    /// Kill it and start a fresh instance under warden control.
    #[default]
    Restart,
    /// Refuse to start.
    Abort,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Path to `DayZServer_x64.exe` (or equivalent).
    pub executable: Utf8PathBuf,
    pub config_file: String,
    pub port: u16,
    pub profiles_dir: String,
    pub cpu_count: Option<u32>,
    pub extra_args: Vec<String>,
    pub mod_priority: Vec<String>,
    pub existing_process: ExistingProcessPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            executable: Utf8PathBuf::new(),
            config_file: "serverDZ.cfg".to_string(),
            port: 2302,
            profiles_dir: "Profiles".to_string(),
            cpu_count: None,
            extra_args: Vec::new(),
            mod_priority: DEFAULT_MOD_PRIORITY.iter().map(|m| m.to_string()).collect(),
            existing_process: ExistingProcessPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModSettings {
    /// Mapping file with `<workshopId>,<folderName>` lines.
    pub mod_list: Utf8PathBuf,
    /// Directory holding one sub-directory per downloaded workshop item.
    pub workshop_dir: Utf8PathBuf,
    /// Where server-side mod folders live. Defaults to the executable's directory.
    pub server_mod_dir: Option<Utf8PathBuf>,
    pub check_at_startup: bool,
}

impl Default for ModSettings {
    fn default() -> Self {
        Self {
            mod_list: Utf8PathBuf::from("modlist.txt"),
            workshop_dir: Utf8PathBuf::new(),
            server_mod_dir: None,
            check_at_startup: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleSettings {
    /// Signed so that a zero or negative value reaches validation instead of
    /// failing deserialization with a less helpful message.
    pub restart_interval_secs: i64,
    pub mod_check_interval_secs: u64,
    pub poll_interval_secs: u64,
    pub grace_period_secs: u64,
    pub drain_period_secs: u64,
}

impl Default for ScheduleSettings {
    fn default() -> Self {
        Self {
            restart_interval_secs: 4 * 60 * 60,
            mod_check_interval_secs: 30 * 60,
            poll_interval_secs: 30,
            grace_period_secs: 5 * 60,
            drain_period_secs: 20,
        }
    }
}

impl ScheduleSettings {
    pub fn mod_check_interval(&self) -> Duration {
        Duration::from_secs(self.mod_check_interval_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn drain_period(&self) -> Duration {
        Duration::from_secs(self.drain_period_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdaterMode {
    /// Drive steamcmd directly.
    SteamCmd,
    /// Content is kept current by something else (e.g. a desktop Steam client).
    #[default]
    Disabled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterSettings {
    pub mode: UpdaterMode,
    pub steamcmd_path: Option<Utf8PathBuf>,
    pub credential_name: String,
    pub game_app_id: u32,
    pub server_app_id: u32,
    /// Run `app_update` for the server while it is stopped for a restart.
    pub update_server: bool,
}

impl Default for UpdaterSettings {
    fn default() -> Self {
        Self {
            mode: UpdaterMode::default(),
            steamcmd_path: None,
            credential_name: "SteamCredentials".to_string(),
            game_app_id: DAYZ_GAME_APP_ID,
            server_app_id: DAYZ_SERVER_APP_ID,
            update_server: true,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AnnouncerSettings {
    /// Two-line file: bot token, then channel id.
    pub discord_secret: Option<Utf8PathBuf>,
    pub muted: bool,
}

impl WardenConfig {
    /// Directory that receives the server-side mod folders.
    pub fn server_mod_dir(&self) -> Utf8PathBuf {
        if let Some(dir) = &self.mods.server_mod_dir {
            return dir.clone();
        }

        self.server
            .executable
            .parent()
            .map(Utf8Path::to_path_buf)
            .unwrap_or_default()
    }

    /// Check everything that must hold before the supervisor loop can start.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.executable.as_str().is_empty() || !self.server.executable.is_file() {
            return Err(ConfigError::MissingPath {
                what: "server executable",
                path: self.server.executable.clone(),
            });
        }

        if !self.mods.workshop_dir.is_dir() {
            return Err(ConfigError::MissingPath {
                what: "workshop directory",
                path: self.mods.workshop_dir.clone(),
            });
        }

        if !self.mods.mod_list.is_file() {
            return Err(ConfigError::MissingPath {
                what: "mod list",
                path: self.mods.mod_list.clone(),
            });
        }

        let server_mod_dir = self.server_mod_dir();
        if !server_mod_dir.is_dir() {
            return Err(ConfigError::MissingPath {
                what: "server mod directory",
                path: server_mod_dir,
            });
        }

        if self.schedule.restart_interval_secs <= 0 {
            return Err(ConfigError::InvalidValue {
                key: "schedule.restart_interval_secs",
                reason: format!(
                    "must be a positive number of seconds, got {}",
                    self.schedule.restart_interval_secs
                ),
            });
        }

        if self.schedule.mod_check_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "schedule.mod_check_interval_secs",
                reason: "must be greater than zero".to_string(),
            });
        }

        if self.updater.mode == UpdaterMode::SteamCmd {
            match &self.updater.steamcmd_path {
                Some(path) if path.is_file() => {}
                Some(path) => {
                    return Err(ConfigError::MissingPath {
                        what: "steamcmd executable",
                        path: path.clone(),
                    });
                }
                None => {
                    return Err(ConfigError::InvalidValue {
                        key: "updater.steamcmd_path",
                        reason: "required when updater.mode is steam_cmd".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn valid_config(dir: &TempDir) -> WardenConfig {
        let root = Utf8PathBuf::try_from(dir.path().to_path_buf()).unwrap();
        let server_dir = root.join("server");
        let workshop_dir = root.join("workshop");
        fs::create_dir_all(&server_dir).unwrap();
        fs::create_dir_all(&workshop_dir).unwrap();
        fs::write(server_dir.join("DayZServer_x64.exe"), b"").unwrap();
        fs::write(root.join("modlist.txt"), "1559212036,@CF\n").unwrap();

        let mut config = WardenConfig::default();
        config.server.executable = server_dir.join("DayZServer_x64.exe");
        config.mods.workshop_dir = workshop_dir;
        config.mods.mod_list = root.join("modlist.txt");
        config
    }

    #[test]
    fn test_schedule_defaults() {
        let schedule = ScheduleSettings::default();
        assert_eq!(schedule.grace_period(), Duration::from_secs(300));
        assert_eq!(schedule.drain_period(), Duration::from_secs(20));
        assert_eq!(schedule.mod_check_interval(), Duration::from_secs(1800));
    }

    #[test]
    fn test_default_priority_starts_with_cf() {
        let server = ServerSettings::default();
        assert_eq!(server.mod_priority.first().map(String::as_str), Some("@CF"));
        assert_eq!(server.mod_priority.len(), DEFAULT_MOD_PRIORITY.len());
    }

    #[test]
    fn test_server_mod_dir_defaults_to_executable_dir() {
        let mut config = WardenConfig::default();
        config.server.executable = Utf8PathBuf::from("/srv/dayz/DayZServer_x64.exe");
        assert_eq!(config.server_mod_dir(), Utf8PathBuf::from("/srv/dayz"));

        config.mods.server_mod_dir = Some(Utf8PathBuf::from("/srv/mods"));
        assert_eq!(config.server_mod_dir(), Utf8PathBuf::from("/srv/mods"));
    }

    #[test]
    fn test_validate_accepts_complete_config() {
        let dir = TempDir::new().unwrap();
        assert!(valid_config(&dir).validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_executable() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.server.executable = config.server.executable.with_file_name("missing.exe");

        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingPath { what: "server executable", .. }));
    }

    #[test]
    fn test_validate_rejects_non_positive_interval() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);

        config.schedule.restart_interval_secs = 0;
        assert!(config.validate().is_err());

        config.schedule.restart_interval_secs = -60;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_requires_steamcmd_when_enabled() {
        let dir = TempDir::new().unwrap();
        let mut config = valid_config(&dir);
        config.updater.mode = UpdaterMode::SteamCmd;

        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { key: "updater.steamcmd_path", .. })
        ));
    }
}
