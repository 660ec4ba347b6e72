//! Workshop folder to server folder synchronization.
//!
//! The engine owns the pairing table built from the mod registry. It answers
//! which pairings are out of date and mirrors them, one pairing at a time.

use crate::models::{ModPairing, WorkshopId};
use crate::services::mirror::MirrorCopy;
use crate::services::registry::ModRegistry;
use crate::services::snapshot::{SnapshotWatch, directories_equal};
use crate::services::updater::PackageUpdater;
use camino::Utf8Path;

/// Result of a [`ModSyncEngine::sync_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncSummary {
    /// Pairings mirrored successfully.
    pub copied: usize,
    /// Pairings whose mirror failed; they stay stale until the next pass.
    pub failed: usize,
}

#[derive(Debug, Default)]
pub struct ModSyncEngine {
    pairings: Vec<ModPairing>,
}

impl ModSyncEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the pairing table from the registry.
    ///
    /// Entries whose workshop folder is missing are logged and left out. The
    /// previous table is replaced only once the new one is complete.
    pub fn refresh_pairings(
        &mut self,
        registry: &ModRegistry,
        workshop_root: &Utf8Path,
        server_root: &Utf8Path,
    ) {
        let mut pairings = Vec::with_capacity(registry.len());

        for entry in registry.entries() {
            let source_dir = workshop_root.join(entry.workshop_id.to_string());
            if !source_dir.is_dir() {
                tracing::warn!(
                    "Mod {} ({}) not found in workshop directory {}; skipping",
                    entry.workshop_id,
                    entry.server_folder_name,
                    workshop_root
                );
                continue;
            }

            pairings.push(ModPairing {
                workshop_id: entry.workshop_id,
                source_dir,
                dest_dir: server_root.join(&entry.server_folder_name),
            });
        }

        tracing::info!(
            "Mod pairings refreshed: {} of {} registry entries active",
            pairings.len(),
            registry.len()
        );
        self.pairings = pairings;
    }

    pub fn pairings(&self) -> &[ModPairing] {
        &self.pairings
    }

    /// Server folder names of every active pairing, in registry order.
    pub fn destination_names(&self) -> Vec<String> {
        self.pairings.iter().map(|p| p.dest_name().to_string()).collect()
    }

    pub fn workshop_ids(&self) -> Vec<WorkshopId> {
        self.pairings.iter().map(|p| p.workshop_id).collect()
    }

    /// Pairings whose server folder differs from the workshop folder right now.
    ///
    /// The comparison walks both trees of every pairing, so it runs on the
    /// blocking pool. A scan that fails to complete reports nothing stale.
    pub async fn stale_pairings(&self) -> Vec<ModPairing> {
        let pairings = self.pairings.clone();
        let scan = tokio::task::spawn_blocking(move || {
            pairings
                .into_iter()
                .filter(|p| !directories_equal(p.source(), p.dest()))
                .collect::<Vec<_>>()
        });

        match scan.await {
            Ok(stale) => stale,
            Err(e) => {
                tracing::warn!("Mod staleness scan did not complete: {}", e);
                Vec::new()
            }
        }
    }

    pub async fn has_stale_pairings(&self) -> bool {
        !self.stale_pairings().await.is_empty()
    }

    /// Run the updater over every workshop item in the registry and report
    /// which pairings' workshop folders changed as a result.
    ///
    /// # Arguments
    ///
    /// * `registry` - Mod list whose ids are requested, including ids that have
    ///   no workshop folder yet
    /// * `updater` - Package updater to run
    /// * `game_app_id` - Steam app id the workshop items belong to
    ///
    /// # Returns
    ///
    /// Pairings whose source folder changed. Items downloaded for the first
    /// time have no pairing yet; call [`Self::refresh_pairings`] afterwards to
    /// pick them up.
    ///
    /// Only existing source folders are snapshotted. A disabled updater or an
    /// empty registry returns no changes without touching the disk. Updater
    /// failures are logged; the after-snapshot is still taken so partial
    /// downloads are reported.
    pub async fn detect_external_updates(
        &self,
        registry: &ModRegistry,
        updater: &dyn PackageUpdater,
        game_app_id: u32,
    ) -> Vec<ModPairing> {
        if !updater.is_enabled() || registry.is_empty() {
            tracing::debug!("Workshop update skipped");
            return Vec::new();
        }

        let mut watch = SnapshotWatch::new(self.pairings.iter().map(|p| p.source()));
        watch.start();

        let ids: Vec<WorkshopId> = registry.ids().collect();
        match updater.update_workshop_items(game_app_id, &ids).await {
            Ok(true) => tracing::info!("Workshop update finished for {} mods", ids.len()),
            Ok(false) => tracing::warn!("Workshop update reported failures"),
            Err(e) => tracing::warn!("Workshop update failed: {}", e),
        }

        let changed = watch.finish();
        self.pairings
            .iter()
            .filter(|p| changed.iter().any(|dir| dir == p.source()))
            .cloned()
            .collect()
    }

    /// Mirror every stale pairing. Failures are logged per pairing and do
    /// not stop the pass.
    pub async fn sync_all(&self, mirror: &dyn MirrorCopy) -> SyncSummary {
        let mut summary = SyncSummary::default();

        for pairing in self.stale_pairings().await {
            tracing::info!("Syncing {} -> {}", pairing.source(), pairing.dest());
            match mirror.mirror(pairing.source(), pairing.dest()).await {
                Ok(report) => {
                    tracing::info!(
                        "Synced {}: {} files copied, {} removed",
                        pairing.dest_name(),
                        report.files_copied,
                        report.files_removed
                    );
                    summary.copied += 1;
                }
                Err(e) => {
                    tracing::warn!("Failed to sync {}: {}", pairing.dest_name(), e);
                    summary.failed += 1;
                }
            }
        }

        tracing::info!(
            "Mod sync pass complete: {} copied, {} failed",
            summary.copied,
            summary.failed
        );
        summary
    }
}
