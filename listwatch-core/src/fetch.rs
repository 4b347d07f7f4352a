//! The boundary to the monitored repository.

use crate::error::FetchError;
use crate::models::{HistoryReference, MonitoredFile};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Content of one file at one reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Snapshot {
    Found(String),
    /// The file did not exist at that reference.
    Missing,
}

/// Read access to the monitored repository's history.
///
/// Implementations must be interchangeable: a local clone and a hosted API
/// have to agree on what `Missing` means.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// The newest reference of the tracked branch.
    async fn latest(&self) -> Result<HistoryReference, FetchError>;

    /// Exact content of `file` as it existed at `at`.
    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError>;
}

#[async_trait]
impl<T: ContentFetcher + ?Sized> ContentFetcher for Box<T> {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        (**self).latest().await
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        (**self).fetch(file, at).await
    }
}

#[async_trait]
impl<T: ContentFetcher + ?Sized> ContentFetcher for Arc<T> {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        (**self).latest().await
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        (**self).fetch(file, at).await
    }
}

type Key = (String, String);

#[derive(Debug, Default)]
struct MemoryRepo {
    head: Option<HistoryReference>,
    files: HashMap<Key, String>,
    queued_errors: HashMap<Key, VecDeque<FetchError>>,
    sticky_errors: HashMap<Key, FetchError>,
    latest_error: Option<FetchError>,
    calls: Vec<Key>,
}

/// In-memory repository history for tests and offline demos.
///
/// Clones share the same history, so a test can keep a handle while the
/// orchestrator owns another.
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    repo: Arc<Mutex<MemoryRepo>>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn repo(&self) -> MutexGuard<'_, MemoryRepo> {
        self.repo.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves the branch tip to `id`.
    pub fn set_head(&self, id: &str) {
        self.repo().head = Some(HistoryReference::new(id));
    }

    pub fn put(&self, at: &str, path: &str, content: &str) {
        self.repo()
            .files
            .insert((at.to_string(), path.to_string()), content.to_string());
    }

    /// Fails the next fetch of `path` at `at` once with `error`.
    pub fn fail_next(&self, at: &str, path: &str, error: FetchError) {
        self.repo()
            .queued_errors
            .entry((at.to_string(), path.to_string()))
            .or_default()
            .push_back(error);
    }

    /// Fails every fetch of `path` at `at` with `error`.
    pub fn fail_always(&self, at: &str, path: &str, error: FetchError) {
        self.repo()
            .sticky_errors
            .insert((at.to_string(), path.to_string()), error);
    }

    pub fn fail_latest(&self, error: FetchError) {
        self.repo().latest_error = Some(error);
    }

    /// Number of `fetch` calls made for `path` at `at`.
    pub fn fetch_count(&self, at: &str, path: &str) -> usize {
        self.repo()
            .calls
            .iter()
            .filter(|(r, p)| r == at && p == path)
            .count()
    }

    pub fn total_fetches(&self) -> usize {
        self.repo().calls.len()
    }
}

#[async_trait]
impl ContentFetcher for MemoryFetcher {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        let repo = self.repo();
        if let Some(error) = &repo.latest_error {
            return Err(error.clone());
        }
        repo.head
            .clone()
            .ok_or_else(|| FetchError::Fatal("repository has no commits".to_string()))
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        let key = (at.id.clone(), file.path().to_string());
        let mut repo = self.repo();
        repo.calls.push(key.clone());

        if let Some(error) = repo.queued_errors.get_mut(&key).and_then(VecDeque::pop_front) {
            return Err(error);
        }
        if let Some(error) = repo.sticky_errors.get(&key) {
            return Err(error.clone());
        }

        Ok(match repo.files.get(&key) {
            Some(content) => Snapshot::Found(content.clone()),
            None => Snapshot::Missing,
        })
    }
}
