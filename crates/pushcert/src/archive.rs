//! Certificate archive lookup by name.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use tracing::{debug, warn};

/// File extension of certificate archives.
pub const ARCHIVE_EXTENSION: &str = "p12";

/// Locates the raw bytes of a named certificate archive.
pub trait ArchiveLocator: Send + Sync + fmt::Debug {
    /// Archive bytes for `name`, or `None` when it is missing or unreadable.
    fn locate(&self, name: &str) -> Option<Vec<u8>>;
}

/// Reads `<dir>/<name>.p12` from disk.
#[derive(Debug, Clone)]
pub struct DirectoryLocator {
    dir: PathBuf,
}

impl DirectoryLocator {
    /// Locator rooted at `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Path the archive `name` resolves to.
    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{name}.{ARCHIVE_EXTENSION}"))
    }
}

impl ArchiveLocator for DirectoryLocator {
    fn locate(&self, name: &str) -> Option<Vec<u8>> {
        if name.is_empty() || name.contains(['/', '\\']) || name == ".." {
            warn!(name, "rejecting certificate archive name");
            return None;
        }
        let path = self.path_for(name);
        match std::fs::read(&path) {
            Ok(bytes) => {
                debug!(?path, len = bytes.len(), "certificate archive read");
                Some(bytes)
            }
            Err(e) => {
                warn!(?path, error = %e, "certificate archive unavailable");
                None
            }
        }
    }
}

/// Serves archives held in memory, e.g. embedded with `include_bytes!`.
#[derive(Clone, Default)]
pub struct MemoryLocator {
    archives: HashMap<String, Vec<u8>>,
}

impl MemoryLocator {
    /// Empty locator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `bytes` under `name`.
    #[must_use]
    pub fn with_archive(mut self, name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let _ = self.archives.insert(name.into(), bytes.into());
        self
    }
}

impl fmt::Debug for MemoryLocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.archives.keys().collect();
        names.sort();
        f.debug_struct("MemoryLocator").field("archives", &names).finish()
    }
}

impl ArchiveLocator for MemoryLocator {
    fn locate(&self, name: &str) -> Option<Vec<u8>> {
        self.archives.get(name).cloned()
    }
}
