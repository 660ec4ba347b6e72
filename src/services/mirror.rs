//! Directory mirroring.
//!
//! [`MirrorCopy`] makes a destination directory an exact copy of a source
//! directory, including removal of anything the source does not have.
//! [`FsMirror`] is the built-in implementation on top of `walkdir`.

use async_trait::async_trait;
use camino::{Utf8Path, Utf8PathBuf};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

#[derive(Error, Debug)]
pub enum MirrorError {
    #[error("Source directory not found: {0}")]
    SourceNotFound(Utf8PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to walk {path}: {source}")]
    Walk {
        path: Utf8PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Mirror task failed: {0}")]
    Task(String),
}

/// Outcome of one mirror operation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MirrorReport {
    pub files_copied: usize,
    pub files_removed: usize,
    pub dirs_removed: usize,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MirrorCopy: Send + Sync {
    /// Make `dest` an exact mirror of `source`.
    async fn mirror(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<MirrorReport, MirrorError>;
}

/// Recursive mirror copy on the local filesystem.
///
/// Files are copied when missing at the destination or when size or
/// modification time differ. Runs on tokio's blocking pool.
#[derive(Debug, Clone, Default)]
pub struct FsMirror;

impl FsMirror {
    pub fn new() -> Self {
        Self
    }

    /// Synchronous mirror, used by the async trait method.
    pub fn mirror_blocking(source: &Utf8Path, dest: &Utf8Path) -> Result<MirrorReport, MirrorError> {
        if !source.is_dir() {
            return Err(MirrorError::SourceNotFound(source.to_path_buf()));
        }

        let mut report = MirrorReport::default();
        let mut wanted: HashSet<PathBuf> = HashSet::new();

        fs::create_dir_all(dest).map_err(|e| io_err(dest.as_std_path(), e))?;

        for entry in WalkDir::new(source).min_depth(1).follow_links(false) {
            let entry = entry.map_err(|source_err| MirrorError::Walk {
                path: source.to_path_buf(),
                source: source_err,
            })?;
            let relative = entry
                .path()
                .strip_prefix(source)
                .map_err(|e| MirrorError::Task(e.to_string()))?
                .to_path_buf();
            let target = dest.as_std_path().join(&relative);

            if entry.file_type().is_dir() {
                if target.is_file() {
                    fs::remove_file(&target).map_err(|e| io_err(&target, e))?;
                }
                fs::create_dir_all(&target).map_err(|e| io_err(&target, e))?;
            } else if entry.file_type().is_file() {
                if target.is_dir() {
                    fs::remove_dir_all(&target).map_err(|e| io_err(&target, e))?;
                }
                if needs_copy(entry.path(), &target)? {
                    fs::copy(entry.path(), &target).map_err(|e| io_err(&target, e))?;
                    copy_mtime(entry.path(), &target);
                    report.files_copied += 1;
                }
            } else {
                tracing::debug!("Mirror skips special file {}", entry.path().display());
                continue;
            }

            wanted.insert(relative);
        }

        // Deepest entries first so directories are empty by the time we reach them.
        for entry in WalkDir::new(dest).min_depth(1).contents_first(true) {
            let entry = entry.map_err(|source_err| MirrorError::Walk {
                path: dest.to_path_buf(),
                source: source_err,
            })?;
            let relative = entry
                .path()
                .strip_prefix(dest)
                .map_err(|e| MirrorError::Task(e.to_string()))?;

            if wanted.contains(relative) {
                continue;
            }

            if entry.file_type().is_dir() {
                fs::remove_dir_all(entry.path()).map_err(|e| io_err(entry.path(), e))?;
                report.dirs_removed += 1;
            } else {
                fs::remove_file(entry.path()).map_err(|e| io_err(entry.path(), e))?;
                report.files_removed += 1;
            }
        }

        Ok(report)
    }
}

#[async_trait]
impl MirrorCopy for FsMirror {
    async fn mirror(&self, source: &Utf8Path, dest: &Utf8Path) -> Result<MirrorReport, MirrorError> {
        let source = source.to_path_buf();
        let dest = dest.to_path_buf();

        tracing::info!("Mirroring {} to {}...", source, dest);

        let report = tokio::task::spawn_blocking(move || Self::mirror_blocking(&source, &dest))
            .await
            .map_err(|e| MirrorError::Task(e.to_string()))??;

        tracing::info!(
            "Mirror complete (copied: {}, removed files: {}, removed dirs: {})",
            report.files_copied,
            report.files_removed,
            report.dirs_removed
        );
        Ok(report)
    }
}

fn needs_copy(source: &Path, target: &Path) -> Result<bool, MirrorError> {
    let Ok(target_meta) = fs::metadata(target) else {
        return Ok(true);
    };
    let source_meta = fs::metadata(source).map_err(|e| io_err(source, e))?;

    if source_meta.len() != target_meta.len() {
        return Ok(true);
    }

    match (source_meta.modified(), target_meta.modified()) {
        (Ok(s), Ok(t)) => Ok(s != t),
        _ => Ok(true),
    }
}

fn copy_mtime(source: &Path, target: &Path) {
    let modified = fs::metadata(source).and_then(|m| m.modified());
    let result = modified.and_then(|time| {
        fs::File::options()
            .write(true)
            .open(target)
            .and_then(|file| file.set_modified(time))
    });

    if let Err(e) = result {
        tracing::debug!("Could not carry mtime to {}: {}", target.display(), e);
    }
}

fn io_err(path: &Path, source: std::io::Error) -> MirrorError {
    MirrorError::Io {
        path: path.to_path_buf(),
        source,
    }
}
