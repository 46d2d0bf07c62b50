//! Long-lived audit log of session activity
//!
//! Stored as a JSON array and rewritten in full on every save. Entries are
//! kept as raw JSON values so records written by other tools survive a
//! load/save cycle untouched. Nothing in the agent loop reads this log back.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// What a memory entry records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryKind {
    UserInput,
    ModelReply,
    Command,
}

/// One record appended by this program
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    pub timestamp: DateTime<Utc>,
    pub kind: MemoryKind,
    pub content: Value,
}

impl MemoryEntry {
    pub fn new(kind: MemoryKind, content: impl Into<Value>) -> Self {
        Self {
            timestamp: Utc::now(),
            kind,
            content: content.into(),
        }
    }
}

/// JSON-file backed memory log
#[derive(Debug)]
pub struct MemoryLog {
    path: PathBuf,
    entries: Vec<Value>,
}

impl MemoryLog {
    /// Load prior entries; a missing file means an empty log
    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();

        if !path.exists() {
            warn!(path = %path.display(), "No previous memory found, starting fresh");
            return Ok(Self {
                path,
                entries: Vec::new(),
            });
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read memory file {}", path.display()))?;
        let entries: Vec<Value> = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse memory file {}", path.display()))?;

        info!(path = %path.display(), entries = entries.len(), "Memory loaded from file");
        Ok(Self { path, entries })
    }

    /// Overwrite the file with the current entries
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }

        let json = serde_json::to_string_pretty(&self.entries)
            .context("Failed to serialize memory")?;
        fs::write(&self.path, json)
            .with_context(|| format!("Failed to write memory file {}", self.path.display()))?;

        debug!(path = %self.path.display(), entries = self.entries.len(), "Memory saved to file");
        Ok(())
    }

    /// Append an entry and persist the whole log
    pub fn record(&mut self, entry: MemoryEntry) -> Result<()> {
        let value = serde_json::to_value(&entry).context("Failed to serialize memory entry")?;
        self.entries.push(value);
        self.save()
    }

    pub fn entries(&self) -> &[Value] {
        &self.entries
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
