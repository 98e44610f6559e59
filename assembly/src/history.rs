//! Posting history
//!
//! Bounded record of identifiers that have already been posted, split by
//! category. Loading never fails: a missing or corrupt file (and backup)
//! yields an empty history so the pipeline can still run.

use std::collections::VecDeque;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

/// Default number of identifiers kept per category.
pub const DEFAULT_HISTORY_CAPACITY: usize = 2000;

/// History partition. Each is deduplicated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryCategory {
    /// Catalog item ids.
    Items,
    /// Question topic ids.
    Topics,
    /// Recurring-feature keys (starter-pack themes).
    Features,
}

impl HistoryCategory {
    pub const ALL: [Self; 3] = [Self::Items, Self::Topics, Self::Features];
}

impl fmt::Display for HistoryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Items => write!(f, "items"),
            Self::Topics => write!(f, "topics"),
            Self::Features => write!(f, "features"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("history file not found: {0}")]
    NotFound(PathBuf),

    #[error("history file {path} is corrupt: {source}")]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("history I/O failed at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl HistoryError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// On-disk shape: `{ "items": [...], "topics": [...], "features": [...] }`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(default)]
    items: VecDeque<String>,
    #[serde(default)]
    topics: VecDeque<String>,
    #[serde(default)]
    features: VecDeque<String>,
}

impl HistoryRecord {
    fn entries(&self, category: HistoryCategory) -> &VecDeque<String> {
        match category {
            HistoryCategory::Items => &self.items,
            HistoryCategory::Topics => &self.topics,
            HistoryCategory::Features => &self.features,
        }
    }

    fn entries_mut(&mut self, category: HistoryCategory) -> &mut VecDeque<String> {
        match category {
            HistoryCategory::Items => &mut self.items,
            HistoryCategory::Topics => &mut self.topics,
            HistoryCategory::Features => &mut self.features,
        }
    }
}

/// History store backed by a single JSON file.
#[derive(Debug, Clone)]
pub struct HistoryStore {
    path: PathBuf,
    capacity: usize,
    record: HistoryRecord,
}

impl HistoryStore {
    /// Empty store that will persist to `path`.
    pub fn empty(path: impl AsRef<Path>, capacity: usize) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
            capacity,
            record: HistoryRecord::default(),
        }
    }

    /// Load the store, falling back to the `.backup` sibling and then to empty.
    pub fn load(path: impl AsRef<Path>, capacity: usize) -> Self {
        let path = path.as_ref().to_path_buf();

        let record = match Self::read(&path) {
            Ok(record) => Some(record),
            Err(HistoryError::NotFound(_)) => None,
            Err(e) => {
                warn!(error = %e, "History unreadable, trying backup");
                match Self::read(&backup_path(&path)) {
                    Ok(record) => {
                        warn!(path = %path.display(), "Recovered history from backup");
                        Some(record)
                    }
                    Err(e) => {
                        warn!(error = %e, "History backup unusable, starting empty");
                        None
                    }
                }
            }
        };

        let mut store = Self {
            path,
            capacity,
            record: record.unwrap_or_default(),
        };
        for category in HistoryCategory::ALL {
            store.enforce_capacity(category);
        }
        debug!(
            items = store.len(HistoryCategory::Items),
            topics = store.len(HistoryCategory::Topics),
            features = store.len(HistoryCategory::Features),
            "History loaded"
        );
        store
    }

    fn read(path: &Path) -> Result<HistoryRecord, HistoryError> {
        if !path.exists() {
            return Err(HistoryError::NotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)
            .map_err(|e| HistoryError::io(path, e))?;

        serde_json::from_str(&content).map_err(|source| HistoryError::Corrupt {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Write the whole store atomically (temp file + rename).
    ///
    /// The previous file is copied to `.backup` first; a failed backup is
    /// logged and does not block the write.
    pub fn persist(&self) -> Result<(), HistoryError> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| HistoryError::io(parent, e))?;
        }

        if self.path.exists() {
            if let Err(e) = std::fs::copy(&self.path, backup_path(&self.path)) {
                warn!(error = %e, "Failed to back up history before write");
            }
        }

        let temp = sibling(&self.path, ".tmp");
        let content = serde_json::to_string_pretty(&self.record).map_err(|source| {
            HistoryError::Corrupt {
                path: self.path.clone(),
                source,
            }
        })?;
        std::fs::write(&temp, content)
            .map_err(|e| HistoryError::io(&temp, e))?;
        std::fs::rename(&temp, &self.path)
            .map_err(|e| HistoryError::io(&self.path, e))?;

        debug!(path = %self.path.display(), "History persisted");
        Ok(())
    }

    pub fn has(&self, category: HistoryCategory, id: &str) -> bool {
        self.record.entries(category).iter().any(|used| used == id)
    }

    /// Append ids in order, evicting the oldest beyond capacity.
    pub fn record<I, S>(&mut self, category: HistoryCategory, ids: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.record
            .entries_mut(category)
            .extend(ids.into_iter().map(Into::into));
        self.enforce_capacity(category);
    }

    fn enforce_capacity(&mut self, category: HistoryCategory) {
        let capacity = self.capacity;
        let entries = self.record.entries_mut(category);
        let excess = entries.len().saturating_sub(capacity);
        entries.drain(..excess);
    }

    pub fn len(&self, category: HistoryCategory) -> usize {
        self.record.entries(category).len()
    }

    pub fn is_empty(&self, category: HistoryCategory) -> bool {
        self.record.entries(category).is_empty()
    }

    /// Ids in insertion order, oldest first.
    pub fn ids(&self, category: HistoryCategory) -> impl Iterator<Item = &str> {
        self.record.entries(category).iter().map(String::as_str)
    }

    /// Index of the most recent occurrence of `id`.
    pub fn last_position(&self, category: HistoryCategory, id: &str) -> Option<usize> {
        self.record
            .entries(category)
            .iter()
            .rposition(|used| used == id)

    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn backup_path(path: &Path) -> PathBuf {
    sibling(path, ".backup")
}
