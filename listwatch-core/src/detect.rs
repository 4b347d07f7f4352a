//! Decides which records of one file are new between two references.

use crate::canonical;
use crate::error::FetchError;
use crate::fetch::{ContentFetcher, Snapshot};
use crate::models::{DiffResult, HistoryReference, MonitoredFile, RecordSet};
use tracing::{debug, info, warn};

pub struct ChangeDetector<'a, F: ?Sized> {
    fetcher: &'a F,
}

impl<'a, F: ContentFetcher + ?Sized> ChangeDetector<'a, F> {
    pub fn new(fetcher: &'a F) -> Self {
        Self { fetcher }
    }

    /// Compares `file` at `old` and `new`.
    ///
    /// | old                  | old content | newly observed        |
    /// |----------------------|-------------|-----------------------|
    /// | none                 | not fetched | empty (baseline run)  |
    /// | equal to `new`       | not fetched | empty                 |
    /// | differs              | missing     | everything at `new`   |
    /// | differs              | found       | `new` minus `old`     |
    ///
    /// Content at `new` is always fetched. Fetch errors are returned as-is.
    pub async fn detect(
        &self,
        file: &MonitoredFile,
        old: Option<&HistoryReference>,
        new: &HistoryReference,
    ) -> Result<DiffResult, FetchError> {
        let current = self.records_at(file, new).await?;

        let Some(old) = old else {
            info!(
                file = %file,
                records = current.len(),
                "No previous reference, recording baseline"
            );
            return Ok(DiffResult::baseline(file.clone()));
        };

        if old == new {
            debug!(file = %file, reference = %new.short(), "Reference unchanged");
            return Ok(DiffResult::unchanged(file.clone()));
        }

        let previous = match self.fetcher.fetch(file, old).await? {
            Snapshot::Found(content) => canonical::parse(&content),
            Snapshot::Missing => {
                info!(
                    file = %file,
                    reference = %old.short(),
                    "File did not exist at previous reference, treating every record as new"
                );
                RecordSet::new()
            }
        };

        let added = current.added_since(&previous);
        debug!(
            file = %file,
            from = %old.short(),
            to = %new.short(),
            added = added.len(),
            "Compared record sets"
        );
        Ok(DiffResult::new(file.clone(), added))
    }

    async fn records_at(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<RecordSet, FetchError> {
        match self.fetcher.fetch(file, at).await? {
            Snapshot::Found(content) => Ok(canonical::parse(&content)),
            Snapshot::Missing => {
                warn!(
                    file = %file,
                    reference = %at.short(),
                    "File does not exist at current reference"
                );
                Ok(RecordSet::new())
            }
        }
    }
}
