//! dayz-warden - DayZ dedicated server supervisor
//!
//! Main entry point.
//!
//! # Execution Flow
//!
//! 1. Parse CLI flags, initialize logging → logs/dayz-warden.<date>
//! 2. Load `Warden.yaml` from the config directory (a template is written on
//!    first run) and validate it
//! 3. Ask for Steam credentials on first run when steamcmd is enabled
//! 4. Build the server supervisor and collaborators
//! 5. Run the orchestrator on a tokio runtime until a fatal error
//!
//! There is no shutdown path: the warden runs until it is killed or hits an
//! error it cannot handle, in which case it exits non-zero.

use anyhow::{Context, Result, bail};
use camino::Utf8PathBuf;
use clap::Parser;
use dayz_warden::models::UpdaterMode;
use dayz_warden::services::{
    Announcer, CredentialStore, Credentials, DisabledUpdater, DiscordAnnouncer, DiscordSecret,
    FileCredentialStore, FsMirror, LaunchOptions, LogAnnouncer, PackageUpdater, ServerSupervisor,
    SteamCmdUpdater, SystemProcessSupervisor,
};
use dayz_warden::{
    APP_NAME, Collaborators, ConfigManager, Metrics, Orchestrator, OrchestratorSettings, Triggers,
    VERSION, WardenConfig,
};
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "dayz-warden", version, about = "Keeps a DayZ server running and its mods current")]
struct Args {
    /// Directory holding Warden.yaml and Credentials.yaml
    #[arg(long, default_value = "Warden Data")]
    config_dir: Utf8PathBuf,

    /// Directory for rotating log files
    #[arg(long, default_value = "logs")]
    log_dir: Utf8PathBuf,

    /// Log at debug level
    #[arg(long)]
    debug: bool,

    /// Only log to files
    #[arg(long)]
    no_console: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let _guard = dayz_warden::logging::setup_logging_with_console(
        &args.log_dir,
        dayz_warden::logging::DEFAULT_LOG_PREFIX,
        args.debug,
        !args.no_console,
    )?;

    tracing::info!("Starting {} v{}", APP_NAME, VERSION);

    let config_manager = ConfigManager::new(&args.config_dir)?;
    if config_manager.write_default_if_missing()? {
        tracing::warn!(
            "Wrote a settings template to {}; fill it in and start again",
            config_manager.settings_path()
        );
        return Ok(());
    }

    let config = config_manager.load_config()?;
    config.validate().context("Invalid settings")?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(2)
        .thread_name("warden-worker")
        .build()?;

    tracing::info!("Tokio runtime initialized with {} worker threads", 2);

    let triggers = Triggers::new();
    let supervisor = ServerSupervisor::new(
        &config.server.executable,
        config.schedule.restart_interval_secs,
        LaunchOptions::from(&config.server),
        Arc::new(SystemProcessSupervisor::new()),
        triggers.restart_flag(),
    )?;

    let credential_store = FileCredentialStore::new(config_manager.credentials_path());
    let collaborators = Collaborators {
        mirror: Arc::new(FsMirror::new()),
        updater: build_updater(&config, &credential_store)?,
        announcer: build_announcer(&config),
    };

    let mut orchestrator = Orchestrator::new(
        supervisor,
        triggers,
        OrchestratorSettings::from_config(&config),
        collaborators,
        Arc::new(Metrics::new()),
    );

    let result = runtime.block_on(orchestrator.run());

    if let Err(e) = &result {
        tracing::error!("Fatal error, exiting: {:#}", e);
    }
    result
}

fn build_updater(
    config: &WardenConfig,
    store: &dyn CredentialStore,
) -> Result<Arc<dyn PackageUpdater>> {
    match config.updater.mode {
        UpdaterMode::Disabled => {
            tracing::info!("Updater disabled; workshop content is expected to be kept current externally");
            Ok(Arc::new(DisabledUpdater))
        }
        UpdaterMode::SteamCmd => {
            let Some(steamcmd) = &config.updater.steamcmd_path else {
                bail!("updater.steamcmd_path is required when updater.mode is steam_cmd");
            };

            let credentials = ensure_credentials(store, &config.updater.credential_name)?;
            let mut updater = SteamCmdUpdater::new(steamcmd, credentials)?;
            if let Some(install_dir) = config.server.executable.parent() {
                updater = updater.with_server_install_dir(install_dir);
            }
            Ok(Arc::new(updater))
        }
    }
}

/// Load stored Steam credentials, prompting for them on first run.
fn ensure_credentials(store: &dyn CredentialStore, name: &str) -> Result<Credentials> {
    if let Some(credentials) = store.load(name) {
        tracing::info!("Using stored credentials '{}' for user {}", name, credentials.username);
        return Ok(credentials);
    }

    tracing::warn!("No stored credentials '{}'; asking on the console", name);

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let username = prompt(&mut input, "Steam username: ")?;
    let password = prompt(&mut input, "Steam password: ")?;

    if username.is_empty() || password.is_empty() {
        bail!("Steam username and password must not be empty");
    }

    if !store.save(name, &username, &password) {
        bail!("Could not store Steam credentials '{}'", name);
    }

    Ok(Credentials { username, password })
}

fn prompt(input: &mut impl BufRead, label: &str) -> Result<String> {
    print!("{}", label);
    io::stdout().flush().context("Failed to write prompt")?;

    let mut line = String::new();
    input.read_line(&mut line).context("Failed to read from stdin")?;
    Ok(line.trim().to_string())
}

/// Discord when a valid secret file is configured, the log otherwise.
fn build_announcer(config: &WardenConfig) -> Arc<dyn Announcer> {
    let Some(secret_path) = &config.announcer.discord_secret else {
        tracing::info!("No Discord secret configured; announcements go to the log");
        return Arc::new(LogAnnouncer);
    };

    let announcer = DiscordSecret::load(secret_path)
        .and_then(DiscordAnnouncer::new)
        .map(|announcer| announcer.muted(config.announcer.muted));

    match announcer {
        Ok(announcer) => {
            tracing::info!("Announcing to Discord (muted: {})", config.announcer.muted);
            Arc::new(announcer)
        }
        Err(e) => {
            tracing::warn!("Discord announcements unavailable, using the log: {}", e);
            Arc::new(LogAnnouncer)
        }
    }
}
