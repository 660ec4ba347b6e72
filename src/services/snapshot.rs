//! Cheap directory-content change detection.
//!
//! A [`DirectorySnapshot`] records, for every file below a directory, its file
//! name, the name of the directory it sits in, and its size. Two snapshots are
//! compared with [`diff`]; nothing is hashed, so a same-size content change goes
//! unnoticed.
//!
//! Parent names are taken relative to the snapshot root: files directly inside
//! the root get an empty parent name, so a workshop folder named `1559212036`
//! compares equal to a server folder named `@CF` with the same contents.

use camino::{Utf8Path, Utf8PathBuf};
use std::collections::{HashMap, HashSet};
use std::io::ErrorKind;
use walkdir::WalkDir;

/// Metadata for one file captured by a snapshot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Path relative to the snapshot root, for logging.
    pub relative_path: Utf8PathBuf,
    pub name: String,
    /// Immediate parent directory name, empty for files at the root.
    pub parent: String,
    pub size: u64,
}

/// Lightweight metadata of a directory tree at one instant.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    root: Utf8PathBuf,
    files: Vec<FileRecord>,
}

impl DirectorySnapshot {
    /// Recursively record every file below `dir`.
    ///
    /// A missing `dir` yields an empty snapshot. Files that disappear between
    /// listing and stat, or that cannot be read, are skipped with a warning.
    pub fn capture(dir: &Utf8Path) -> Self {
        let mut files = Vec::new();

        if !dir.is_dir() {
            tracing::debug!("Snapshot of missing directory {} is empty", dir);
            return Self {
                root: dir.to_path_buf(),
                files,
            };
        }

        for entry in WalkDir::new(dir).min_depth(1).follow_links(false) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    let vanished = e
                        .io_error()
                        .is_some_and(|io| io.kind() == ErrorKind::NotFound);
                    if vanished {
                        tracing::warn!("File vanished during snapshot of {}: {}", dir, e);
                    } else {
                        tracing::warn!("Skipping unreadable entry in {}: {}", dir, e);
                    }
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }

            let size = match entry.metadata() {
                Ok(meta) => meta.len(),
                Err(e) => {
                    tracing::warn!(
                        "Could not stat {} during snapshot: {}",
                        entry.path().display(),
                        e
                    );
                    continue;
                }
            };

            let Some(path) = Utf8Path::from_path(entry.path()) else {
                tracing::warn!("Skipping non UTF-8 path {}", entry.path().display());
                continue;
            };

            let relative_path = path.strip_prefix(dir).unwrap_or(path).to_path_buf();
            let name = relative_path.file_name().unwrap_or_default().to_string();
            let parent = relative_path
                .parent()
                .and_then(Utf8Path::file_name)
                .unwrap_or_default()
                .to_string();

            files.push(FileRecord {
                relative_path,
                name,
                parent,
                size,
            });
        }

        Self {
            root: dir.to_path_buf(),
            files,
        }
    }

    /// Build a snapshot from already known records.
    pub fn from_records(root: impl Into<Utf8PathBuf>, files: Vec<FileRecord>) -> Self {
        Self {
            root: root.into(),
            files,
        }
    }

    pub fn root(&self) -> &Utf8Path {
        &self.root
    }

    pub fn files(&self) -> &[FileRecord] {
        &self.files
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

/// Compare two snapshots and report whether anything changed.
///
/// Checked in order, stopping at the first hit:
/// 1. file counts differ
/// 2. a name from `before` is absent from `after` (deletion)
/// 3. a file with the same name and parent has a different size
/// 4. a name from `after` is absent from `before` (addition)
///
/// Sizes are grouped per (name, parent) and compared as sorted lists, so the
/// same name appearing under two equally named parents is compared as a set
/// rather than crosswise.
pub fn diff(before: &DirectorySnapshot, after: &DirectorySnapshot) -> bool {
    if before.len() != after.len() {
        tracing::debug!(
            "Different file count in {} (before: {}, after: {})",
            after.root,
            before.len(),
            after.len()
        );
        return true;
    }

    let before_index = index_by_name(before);
    let after_index = index_by_name(after);

    if let Some(deleted) = before
        .files
        .iter()
        .find(|f| !after_index.names.contains(f.name.as_str()))
    {
        tracing::debug!("Deleted file detected: {}", deleted.relative_path);
        return true;
    }

    for (key, before_sizes) in &before_index.sizes {
        if let Some(after_sizes) = after_index.sizes.get(key) {
            if before_sizes != after_sizes {
                tracing::debug!("Change in file size of {} detected", key.0);
                return true;
            }
        }
    }

    if let Some(added) = after
        .files
        .iter()
        .find(|f| !before_index.names.contains(f.name.as_str()))
    {
        tracing::debug!("New file detected: {}", added.relative_path);
        return true;
    }

    false
}

/// Single-shot comparison of two live directories.
pub fn directories_equal(a: &Utf8Path, b: &Utf8Path) -> bool {
    !diff(&DirectorySnapshot::capture(a), &DirectorySnapshot::capture(b))
}

struct NameIndex<'a> {
    names: HashSet<&'a str>,
    sizes: HashMap<(&'a str, &'a str), Vec<u64>>,
}

fn index_by_name(snapshot: &DirectorySnapshot) -> NameIndex<'_> {
    let mut names = HashSet::with_capacity(snapshot.len());
    let mut sizes: HashMap<(&str, &str), Vec<u64>> = HashMap::with_capacity(snapshot.len());

    for file in &snapshot.files {
        names.insert(file.name.as_str());
        sizes
            .entry((file.name.as_str(), file.parent.as_str()))
            .or_default()
            .push(file.size);
    }

    for list in sizes.values_mut() {
        list.sort_unstable();
    }

    NameIndex { names, sizes }
}

/// Before/after watch over a fixed set of directories.
///
/// Directories that do not exist when the watch is created are dropped
/// silently.
#[derive(Debug)]
pub struct SnapshotWatch {
    dirs: Vec<Utf8PathBuf>,
    start: Vec<DirectorySnapshot>,
}

impl SnapshotWatch {
    pub fn new<I, P>(dirs: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Utf8Path>,
    {
        let dirs: Vec<Utf8PathBuf> = dirs
            .into_iter()
            .map(|d| d.as_ref().to_path_buf())
            .filter(|d| d.is_dir())
            .collect();

        Self {
            dirs,
            start: Vec::new(),
        }
    }

    pub fn watched(&self) -> &[Utf8PathBuf] {
        &self.dirs
    }

    /// Take the "before" snapshots.
    pub fn start(&mut self) {
        self.start = self.dirs.iter().map(|d| DirectorySnapshot::capture(d)).collect();
        tracing::info!("Snapshot watch: observing {} directories", self.dirs.len());
    }

    /// Take the "after" snapshots and return the directories that changed.
    pub fn finish(&mut self) -> Vec<Utf8PathBuf> {
        let before = std::mem::take(&mut self.start);
        let mut changed = Vec::new();

        for (dir, before) in self.dirs.iter().zip(before.iter()) {
            let after = DirectorySnapshot::capture(dir);
            if diff(before, &after) {
                tracing::info!("Directory {} changed", dir);
                changed.push(dir.clone());
            }
        }

        tracing::info!(
            "Snapshot watch: {} of {} directories changed",
            changed.len(),
            self.dirs.len()
        );
        changed
    }
}
