use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identity -> current portrait filename. Entries are only ever inserted or
/// overwritten.
pub trait IdentityStore {
    fn get(&self, identity: &str) -> Option<String>;
    fn set(&mut self, identity: &str, filename: &str) -> anyhow::Result<()>;
}

/// In-memory map for hosts that persist it inside their own save state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortraitIndex {
    entries: BTreeMap<String, String>,
}

impl PortraitIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries
            .iter()
            .map(|(identity, filename)| (identity.as_str(), filename.as_str()))
    }
}

impl IdentityStore for PortraitIndex {
    fn get(&self, identity: &str) -> Option<String> {
        self.entries.get(identity).cloned()
    }

    fn set(&mut self, identity: &str, filename: &str) -> anyhow::Result<()> {
        self.entries
            .insert(identity.to_string(), filename.to_string());
        Ok(())
    }
}

/// JSON-file backed index. Every change is flushed immediately; the flush
/// re-reads the file and only applies this instance's dirty keys so two
/// writers of the same file do not clobber each other.
#[derive(Debug, Clone)]
pub struct PortraitIndexFile {
    path: PathBuf,
    index: PortraitIndex,
    dirty_keys: Vec<String>,
}

impl PortraitIndexFile {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let index = read_index(&path).unwrap_or_default();
        Self {
            path,
            index,
            dirty_keys: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn index(&self) -> &PortraitIndex {
        &self.index
    }

    pub fn flush(&mut self) -> anyhow::Result<()> {
        if self.dirty_keys.is_empty() {
            return Ok(());
        }

        let mut on_disk = read_index(&self.path).unwrap_or_default();
        for key in &self.dirty_keys {
            if let Some(value) = self.index.entries.get(key) {
                on_disk.entries.insert(key.clone(), value.clone());
            }
        }
        write_index(&self.path, &on_disk)?;
        self.index = on_disk;
        self.dirty_keys.clear();
        Ok(())
    }
}

impl IdentityStore for PortraitIndexFile {
    fn get(&self, identity: &str) -> Option<String> {
        self.index.get(identity)
    }

    fn set(&mut self, identity: &str, filename: &str) -> anyhow::Result<()> {
        if self.index.get(identity).as_deref() == Some(filename) {
            return Ok(());
        }
        self.index.set(identity, filename)?;
        if !self.dirty_keys.iter().any(|key| key == identity) {
            self.dirty_keys.push(identity.to_string());
        }
        self.flush()
    }
}

fn read_index(path: &Path) -> Option<PortraitIndex> {
    let raw = std::fs::read_to_string(path).ok()?;
    let parsed: Map<String, Value> = serde_json::from_str(&raw).ok()?;
    let entries = parsed
        .into_iter()
        .filter_map(|(key, value)| value.as_str().map(|filename| (key, filename.to_string())))
        .collect();
    Some(PortraitIndex { entries })
}

fn write_index(path: &Path, index: &PortraitIndex) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    std::fs::write(path, serde_json::to_string_pretty(index)?)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(())
}
