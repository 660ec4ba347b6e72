//! Secret storage for the Steam login used by steamcmd.

use anyhow::{Context, Result};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::sync::Mutex;

/// A stored login. `Debug` output never shows the password.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Named credential storage
///
/// Failures are logged by the store and reported as `false` / `None`; callers
/// decide whether a missing login is fatal.
#[cfg_attr(test, mockall::automock)]
pub trait CredentialStore: Send + Sync {
    /// Store credentials under `name`, replacing any previous value
    ///
    /// # Arguments
    /// * `name` - Key the login is stored under (e.g. `steam`)
    /// * `username` - Account name
    /// * `password` - Account password, written as-is
    ///
    /// # Returns
    /// `true` once the login is on disk
    fn save(&self, name: &str, username: &str, password: &str) -> bool;

    /// Look up the login stored under `name`
    ///
    /// # Returns
    /// `None` when nothing is stored or the store could not be read
    fn load(&self, name: &str) -> Option<Credentials>;
}

/// Credentials kept in a YAML file next to the settings.
///
/// On unix the file is created with mode 0600.
#[derive(Debug)]
pub struct FileCredentialStore {
    path: Utf8PathBuf,
    lock: Mutex<()>,
}

impl FileCredentialStore {
    /// Create a store backed by `path`
    ///
    /// The file is not touched until the first `save` or `load`. A missing
    /// file reads as an empty store.
    pub fn new(path: impl Into<Utf8PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Utf8Path {
        &self.path
    }

    fn read_all(&self) -> Result<IndexMap<String, Credentials>> {
        if !self.path.exists() {
            return Ok(IndexMap::new());
        }

        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read credential file: {}", self.path))?;
        let entries = serde_yaml_ng::from_str(&content)
            .with_context(|| format!("Failed to parse credential file: {}", self.path))?;
        Ok(entries)
    }

    fn write_all(&self, entries: &IndexMap<String, Credentials>) -> Result<()> {
        let yaml = serde_yaml_ng::to_string(entries).context("Failed to serialize credentials")?;
        fs::write(&self.path, yaml)
            .with_context(|| format!("Failed to write credential file: {}", self.path))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))
                .with_context(|| format!("Failed to restrict permissions on {}", self.path))?;
        }

        Ok(())
    }
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, name: &str, username: &str, password: &str) -> bool {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = self.read_all().and_then(|mut entries| {
            entries.insert(
                name.to_string(),
                Credentials {
                    username: username.to_string(),
                    password: password.to_string(),
                },
            );
            self.write_all(&entries)
        });

        match result {
            Ok(()) => {
                tracing::info!("Stored credentials '{}' in {}", name, self.path);
                true
            }
            Err(e) => {
                tracing::error!("Could not store credentials '{}': {:#}", name, e);
                false
            }
        }
    }

    fn load(&self, name: &str) -> Option<Credentials> {
        let _guard = self.lock.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

        match self.read_all() {
            Ok(mut entries) => entries.shift_remove(name),
            Err(e) => {
                tracing::warn!("Could not load credentials '{}': {:#}", name, e);
                None
            }
        }
    }
}
