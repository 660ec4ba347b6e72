//! Data models for the warden.
//!
//! - [`WardenConfig`]: everything loaded from `Warden.yaml` (server launch options,
//!   mod directories, schedule, updater and announcer settings)
//! - [`ModEntry`]: one workshop id → server folder mapping from the mod list
//! - [`ModPairing`]: resolved source/destination directories for one mod
//!
//! Config structs derive `Serialize`/`Deserialize` and default every field, so a
//! partial YAML file (or none at all) still produces a complete value.

pub mod config;
pub mod mods;

pub use config::{
    AnnouncerSettings, DAYZ_GAME_APP_ID, DAYZ_SERVER_APP_ID, DEFAULT_MOD_PRIORITY,
    ExistingProcessPolicy, ModSettings, ScheduleSettings, ServerSettings, UpdaterMode,
    UpdaterSettings, WardenConfig,
};
pub use mods::{ModEntry, ModPairing, WorkshopId};
