use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A single-file JSON store.
///
/// Every persistent engine owns one: the whole store is loaded at process
/// start, mutated in memory, and rewritten on every state-changing operation.
/// Writes go to a temp file in the same directory and are renamed over the
/// target so a crash mid-write never leaves a torn file.
#[derive(Debug, Clone)]
pub struct JsonStore {
    path: PathBuf,
}

impl JsonStore {
    pub fn new(dir: &Path, file_name: &str) -> Result<Self> {
        fs::create_dir_all(dir)
            .with_context(|| format!("Failed to create data directory {}", dir.display()))?;
        Ok(Self {
            path: dir.join(file_name),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the store contents, or `None` if the file does not exist yet.
    pub fn load<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        if !self.path.exists() {
            return Ok(None);
        }
        let raw = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read {}", self.path.display()))?;
        let value = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse {}", self.path.display()))?;
        Ok(Some(value))
    }

    /// Persist the full store state atomically (write temp, rename over).
    pub fn save<T: Serialize>(&self, value: &T) -> Result<()> {
        let serialized = serde_json::to_string_pretty(value).context("Failed to serialize store")?;
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, serialized)
            .with_context(|| format!("Failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("Failed to replace {}", self.path.display()))?;
        Ok(())
    }
}
