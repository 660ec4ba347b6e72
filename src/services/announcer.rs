//! Best-effort status announcements to players.
//!
//! The orchestrator announces before every stop and after every start. An
//! announcement that fails is logged and counted; it never blocks a restart.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::fs;
use std::time::Duration;
use thiserror::Error;

const DISCORD_API: &str = "https://discord.com/api/v10";

#[derive(Error, Debug)]
pub enum AnnounceError {
    #[error("Discord secret file not found: {0}")]
    SecretNotFound(Utf8PathBuf),

    #[error("Invalid Discord secret file {path}: {reason}")]
    InvalidSecret { path: Utf8PathBuf, reason: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Discord rejected the message with status {0}")]
    Rejected(u16),
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Announcer: Send + Sync {
    /// Publish a status message
    ///
    /// # Arguments
    /// * `text` - Plain message text, e.g. `Server crashed, restarting.`
    ///
    /// # Returns
    /// An error when the message could not be delivered
    async fn announce(&self, text: &str) -> Result<(), AnnounceError>;
}

/// Announcer that only writes to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAnnouncer;

#[async_trait]
impl Announcer for LogAnnouncer {
    async fn announce(&self, text: &str) -> Result<(), AnnounceError> {
        tracing::info!("Announcement: {}", text);
        Ok(())
    }
}

/// Bot token and target channel read from a two-line secret file.
#[derive(Clone, PartialEq, Eq)]
pub struct DiscordSecret {
    pub token: String,
    pub channel_id: u64,
}

impl std::fmt::Debug for DiscordSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiscordSecret")
            .field("token", &"<redacted>")
            .field("channel_id", &self.channel_id)
            .finish()
    }
}

impl DiscordSecret {
    /// Read a secret file
    ///
    /// Line 1: bot token. Line 2: numeric channel id. Surrounding whitespace
    /// is ignored and further lines are not read.
    ///
    /// # Arguments
    /// * `path` - Secret file named by `announcer.discord_secret`
    ///
    /// # Returns
    /// The parsed secret, or `SecretNotFound` / `InvalidSecret`
    pub fn load(path: &Utf8Path) -> Result<Self, AnnounceError> {
        if !path.is_file() {
            return Err(AnnounceError::SecretNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path).map_err(|e| AnnounceError::InvalidSecret {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        Self::parse(&content).map_err(|reason| AnnounceError::InvalidSecret {
            path: path.to_path_buf(),
            reason,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        let mut lines = content.lines().map(str::trim);

        let token = lines.next().unwrap_or_default();
        if token.is_empty() {
            return Err("token missing".to_string());
        }

        let channel_id = lines
            .next()
            .unwrap_or_default()
            .parse::<u64>()
            .map_err(|_| "channel id not valid".to_string())?;

        Ok(Self {
            token: token.to_string(),
            channel_id,
        })
    }
}

/// Posts announcements to a Discord channel as a bot.
pub struct DiscordAnnouncer {
    client: reqwest::Client,
    secret: DiscordSecret,
    muted: bool,
}

impl DiscordAnnouncer {
    /// Build an announcer with its own HTTP client
    ///
    /// # Arguments
    /// * `secret` - Bot token and channel to post to
    ///
    /// # Returns
    /// An error only if the HTTP client cannot be built
    pub fn new(secret: DiscordSecret) -> Result<Self, AnnounceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .user_agent(concat!("dayz-warden/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            secret,
            muted: false,
        })
    }

    /// A muted announcer logs messages at debug level instead of posting them.
    pub fn muted(mut self, muted: bool) -> Self {
        self.muted = muted;
        self
    }

    fn messages_url(&self) -> String {
        format!("{}/channels/{}/messages", DISCORD_API, self.secret.channel_id)
    }
}

#[async_trait]
impl Announcer for DiscordAnnouncer {
    async fn announce(&self, text: &str) -> Result<(), AnnounceError> {
        if self.muted {
            tracing::debug!("Muted announcement: {}", text);
            return Ok(());
        }

        let response = self
            .client
            .post(self.messages_url())
            .header("Authorization", format!("Bot {}", self.secret.token))
            .json(&serde_json::json!({ "content": text }))
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(AnnounceError::Rejected(status.as_u16()));
        }

        tracing::info!("Announced: {}", text);
        Ok(())
    }
}
