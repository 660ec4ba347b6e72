//! Mod list parsing.
//!
//! The mod list is a UTF-8 text file with one `<workshopId>,<folderName>` entry
//! per line, e.g.
//!
//! ```text
//! 1559212036,@CF
//! 1564026768,@Community-Online-Tools
//! ```
//!
//! Loading is lenient: blank lines are ignored and any line that is not exactly
//! two non-empty comma-separated fields with a numeric first field is skipped.

use crate::models::{ModEntry, WorkshopId};
use camino::{Utf8Path, Utf8PathBuf};
use indexmap::IndexMap;
use std::fs;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Mod list not found: {0}")]
    NotFound(Utf8PathBuf),

    #[error("Failed to read mod list {path}: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Workshop id → server folder name, in file order.
///
/// A later line with the same id overwrites the folder name of the earlier one
/// but keeps its position.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ModRegistry {
    entries: IndexMap<WorkshopId, String>,
}

impl ModRegistry {
    /// Read and parse a mod list file.
    pub fn load(mapping_file: &Utf8Path) -> Result<Self, RegistryError> {
        if !mapping_file.is_file() {
            return Err(RegistryError::NotFound(mapping_file.to_path_buf()));
        }

        let content = fs::read_to_string(mapping_file).map_err(|source| RegistryError::Io {
            path: mapping_file.to_path_buf(),
            source,
        })?;

        let registry = Self::parse(&content);
        tracing::info!("{} mods found in {}", registry.len(), mapping_file);
        Ok(registry)
    }

    /// Parse mod list content. Never fails; malformed lines are skipped.
    pub fn parse(content: &str) -> Self {
        let mut entries = IndexMap::new();

        for (index, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }

            match parse_line(line) {
                Some(entry) => {
                    if let Some(previous) =
                        entries.insert(entry.workshop_id, entry.server_folder_name)
                    {
                        tracing::debug!(
                            "Mod list line {}: id {} redefined (was {})",
                            index + 1,
                            entry.workshop_id,
                            previous
                        );
                    }
                }
                None => tracing::debug!("Skipping malformed mod list line {}: {:?}", index + 1, line),
            }
        }

        Self { entries }
    }

    pub fn get(&self, id: WorkshopId) -> Option<&str> {
        self.entries.get(&id).map(String::as_str)
    }

    pub fn ids(&self) -> impl Iterator<Item = WorkshopId> + '_ {
        self.entries.keys().copied()
    }

    pub fn entries(&self) -> impl Iterator<Item = ModEntry> + '_ {
        self.entries.iter().map(|(id, name)| ModEntry {
            workshop_id: *id,
            server_folder_name: name.clone(),
        })
    }

    pub fn as_map(&self) -> &IndexMap<WorkshopId, String> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_line(line: &str) -> Option<ModEntry> {
    let mut fields = line.split(',');
    let (id, name) = (fields.next()?.trim(), fields.next()?.trim());

    if fields.next().is_some() || id.is_empty() || name.is_empty() {
        return None;
    }

    let workshop_id = id.parse::<WorkshopId>().ok()?;

    Some(ModEntry {
        workshop_id,
        server_folder_name: name.to_string(),
    })
}
