use camino::{Utf8Path, Utf8PathBuf};

/// Numeric Steam Workshop item id. Doubles as the directory name of the mod
/// inside the workshop root.
pub type WorkshopId = i64;

/// One line of the mod list: a workshop item and the folder name it gets in
/// the server directory (e.g. `@CF`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModEntry {
    pub workshop_id: WorkshopId,
    pub server_folder_name: String,
}

/// Source/destination directory correspondence for one mod.
///
/// Derived from the registry on every refresh and never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ModPairing {
    pub workshop_id: WorkshopId,
    pub source_dir: Utf8PathBuf,
    pub dest_dir: Utf8PathBuf,
}

impl ModPairing {
    /// Folder name of the mod inside the server directory.
    pub fn dest_name(&self) -> &str {
        self.dest_dir.file_name().unwrap_or(self.dest_dir.as_str())
    }

    pub fn source(&self) -> &Utf8Path {
        &self.source_dir
    }

    pub fn dest(&self) -> &Utf8Path {
        &self.dest_dir
    }
}
