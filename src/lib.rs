// dayz-warden - DayZ dedicated server supervisor
//
// This is the library crate containing the core logic and data structures.
// The binary crate (main.rs) wires it to the real process table, filesystem,
// steamcmd and Discord.

pub mod config;
pub mod logging;
pub mod metrics;
pub mod models;
pub mod orchestrator;
pub mod services;
pub mod state;

// Re-export commonly used types for convenience
pub use config::{ConfigError, ConfigManager};
pub use metrics::Metrics;
pub use models::{WardenConfig, WorkshopId};
pub use orchestrator::{Collaborators, IterationOutcome, Orchestrator, OrchestratorSettings};
pub use state::{OrchestrationState, StateChange, Triggers};

/// Application version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
