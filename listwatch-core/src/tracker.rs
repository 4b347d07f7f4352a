//! Persistence of the last fully processed reference.

use crate::error::{Error, Result};
use crate::models::HistoryReference;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{debug, info};

/// Storage for the single "where we left off" reference.
pub trait TrackerStore: Send + Sync {
    /// `Ok(None)` means no run has ever completed.
    fn load(&self) -> Result<Option<HistoryReference>>;

    /// Replaces any previous value. A reader never observes a partial write.
    fn save(&self, reference: &HistoryReference) -> Result<()>;
}

/// Keeps the reference as a bare text token in one file.
#[derive(Debug, Clone)]
pub struct FileTracker {
    path: PathBuf,
}

impl FileTracker {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl TrackerStore for FileTracker {
    fn load(&self) -> Result<Option<HistoryReference>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No tracker state at {:?}", self.path);
                return Ok(None);
            }
            Err(e) => {
                return Err(Error::Persistence(format!(
                    "cannot read {}: {}",
                    self.path.display(),
                    e
                )))
            }
        };

        let token = raw.trim();
        if token.is_empty() {
            return Ok(None);
        }
        if token.chars().any(char::is_whitespace) {
            return Err(Error::Persistence(format!(
                "{} does not contain a single reference",
                self.path.display()
            )));
        }

        info!("Last processed reference: {}", token);
        Ok(Some(HistoryReference::new(token)))
    }

    fn save(&self, reference: &HistoryReference) -> Result<()> {
        let persist = || -> std::io::Result<()> {
            if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
                fs::create_dir_all(parent)?;
            }
            let tmp = self.temp_path();
            let mut file = fs::File::create(&tmp)?;
            file.write_all(reference.id.as_bytes())?;
            file.sync_all()?;
            fs::rename(&tmp, &self.path)
        };

        persist().map_err(|e| {
            Error::Persistence(format!("cannot write {}: {}", self.path.display(), e))
        })?;

        info!("Saved reference {} to {:?}", reference.id, self.path);
        Ok(())
    }
}

/// Tracker state held in memory. Clones share the same value.
#[derive(Debug, Clone, Default)]
pub struct MemoryTracker {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Debug, Default)]
struct MemoryState {
    reference: Option<HistoryReference>,
    saves: usize,
}

impl MemoryTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reference(id: &str) -> Self {
        let tracker = Self::new();
        tracker
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reference = Some(HistoryReference::new(id));
        tracker
    }

    /// How many times `save` has been called.
    pub fn save_count(&self) -> usize {
        self.state.lock().unwrap_or_else(PoisonError::into_inner).saves
    }
}

impl TrackerStore for MemoryTracker {
    fn load(&self) -> Result<Option<HistoryReference>> {
        Ok(self
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .reference
            .clone())
    }

    fn save(&self, reference: &HistoryReference) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        state.reference = Some(reference.clone());
        state.saves += 1;
        Ok(())
    }
}
