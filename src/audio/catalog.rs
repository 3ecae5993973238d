// src/audio/catalog.rs
// Patch catalog: the ordered list of chain patches a track can load

use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const MAX_PATCHES: usize = 64;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchInfo {
    pub name: String,
    pub path: PathBuf,
}

pub trait PatchCatalog: Send {
    /// Every available patch, sorted case-insensitively by name.
    fn scan(&mut self) -> Vec<PatchInfo>;
}

pub fn sort_patches(patches: &mut [PatchInfo]) {
    patches.sort_by_cached_key(|p| p.name.to_lowercase());
}

/// Case-insensitive name lookup.
pub fn find_patch(patches: &[PatchInfo], name: &str) -> Option<usize> {
    let wanted = name.trim().to_lowercase();
    patches.iter().position(|p| p.name.to_lowercase() == wanted)
}

/// A fixed list, mostly useful for hosts that manage patches themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticCatalog {
    patches: Vec<PatchInfo>,
}

impl StaticCatalog {
    pub fn new(patches: Vec<PatchInfo>) -> Self {
        Self { patches }
    }
}

impl PatchCatalog for StaticCatalog {
    fn scan(&mut self) -> Vec<PatchInfo> {
        let mut patches = self.patches.clone();
        sort_patches(&mut patches);
        patches
    }
}

#[derive(Deserialize)]
struct PatchHeader {
    name: Option<String>,
}

/// Scans a directory of `*.json` chain patches.
#[derive(Debug, Clone)]
pub struct DirPatchCatalog {
    dir: PathBuf,
}

impl DirPatchCatalog {
    pub fn new<P: AsRef<Path>>(dir: P) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn read_entry(path: &Path) -> Option<PatchInfo> {
        let file_name = path.file_name()?.to_str()?;
        if file_name.starts_with('.') || path.extension()? != "json" {
            return None;
        }

        // Prefer the "name" field, fall back to the file stem
        let name = std::fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<PatchHeader>(&text).ok())
            .and_then(|header| header.name)
            .filter(|name| !name.is_empty())
            .or_else(|| path.file_stem()?.to_str().map(str::to_string))?;

        Some(PatchInfo {
            name,
            path: path.to_path_buf(),
        })
    }
}

impl PatchCatalog for DirPatchCatalog {
    fn scan(&mut self) -> Vec<PatchInfo> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) => {
                log::warn!("Cannot open patches dir {}: {}", self.dir.display(), e);
                return Vec::new();
            }
        };

        let mut patches: Vec<PatchInfo> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| Self::read_entry(&entry.path()))
            .collect();
        sort_patches(&mut patches);
        patches.truncate(MAX_PATCHES);

        log::info!("Found {} patches in {}", patches.len(), self.dir.display());
        patches
    }
}
