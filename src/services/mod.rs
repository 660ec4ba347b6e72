//! Services module - the warden's building blocks.
//!
//! # Core
//!
//! - [`snapshot`]: cheap directory change detection (file name, parent folder, size)
//! - [`registry`]: the `<workshopId>,<folderName>` mod list
//! - [`mod_sync`]: [`ModSyncEngine`], which pairs workshop folders with server
//!   folders, finds stale pairs and mirrors them
//! - [`server`]: [`ServerSupervisor`], which builds the launch command line,
//!   starts and kills the server and owns the restart timer
//!
//! # Collaborators
//!
//! Each external effect sits behind a trait so the orchestrator can be driven
//! with test doubles:
//!
//! | Trait | Built-in implementation |
//! |---|---|
//! | [`ProcessSupervisor`] | [`SystemProcessSupervisor`] (OS process table) |
//! | [`MirrorCopy`] | [`FsMirror`] (recursive copy with deletions) |
//! | [`PackageUpdater`] | [`SteamCmdUpdater`], [`DisabledUpdater`] |
//! | [`Announcer`] | [`DiscordAnnouncer`], [`LogAnnouncer`] |
//! | [`CredentialStore`] | [`FileCredentialStore`] |

pub mod announcer;
pub mod credentials;
pub mod mirror;
pub mod mod_sync;
pub mod process;
pub mod registry;
pub mod server;
pub mod snapshot;
pub mod updater;

pub use announcer::{AnnounceError, Announcer, DiscordAnnouncer, DiscordSecret, LogAnnouncer};
pub use credentials::{CredentialStore, Credentials, FileCredentialStore};
pub use mirror::{FsMirror, MirrorCopy, MirrorError, MirrorReport};
pub use mod_sync::{ModSyncEngine, SyncSummary};
pub use process::{ProcessError, ProcessSupervisor, SystemProcessSupervisor};
pub use registry::{ModRegistry, RegistryError};
pub use server::{LaunchOptions, ServerRuntimeState, ServerSupervisor, SupervisorError};
pub use snapshot::{DirectorySnapshot, FileRecord, SnapshotWatch, diff, directories_equal};
pub use updater::{DisabledUpdater, PackageUpdater, SteamCmdOutcome, SteamCmdUpdater, UpdaterError};
