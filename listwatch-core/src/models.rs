use crate::error::FetchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// A point in the monitored repository's history.
///
/// Two references are equal when their identifiers are equal; the optional
/// timestamp is informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryReference {
    pub id: String,
    pub timestamp: Option<DateTime<Utc>>,
}

impl HistoryReference {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            timestamp: None,
        }
    }

    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }

    pub fn short(&self) -> &str {
        let end = self
            .id
            .char_indices()
            .nth(7)
            .map(|(i, _)| i)
            .unwrap_or(self.id.len());
        &self.id[..end]
    }
}

impl PartialEq for HistoryReference {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for HistoryReference {}

impl Hash for HistoryReference {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for HistoryReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.id)
    }
}

/// Path of one tracked record file inside the monitored repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MonitoredFile(String);

impl MonitoredFile {
    pub fn new(path: impl Into<String>) -> Self {
        Self(path.into())
    }

    pub fn path(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MonitoredFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Canonical records of one file at one reference.
///
/// Backed by a `BTreeSet`, so iteration is always lexicographic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordSet(BTreeSet<String>);

impl RecordSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a record unless it is empty. Returns whether the set changed.
    pub fn insert(&mut self, record: impl Into<String>) -> bool {
        let record = record.into();
        if record.is_empty() {
            return false;
        }
        self.0.insert(record)
    }

    pub fn contains(&self, record: &str) -> bool {
        self.0.contains(record)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    /// Records present in `self` but absent from `older`.
    pub fn added_since(&self, older: &RecordSet) -> RecordSet {
        RecordSet(self.0.difference(&older.0).cloned().collect())
    }
}

impl<S: Into<String>> FromIterator<S> for RecordSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = RecordSet::new();
        for record in iter {
            set.insert(record);
        }
        set
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiffResult {
    pub file: MonitoredFile,
    pub new_records: RecordSet,
    pub first_observation: bool,
}

impl DiffResult {
    pub fn new(file: MonitoredFile, new_records: RecordSet) -> Self {
        Self {
            file,
            new_records,
            first_observation: false,
        }
    }

    /// A baseline result: nothing is new relative to nothing.
    pub fn baseline(file: MonitoredFile) -> Self {
        Self {
            file,
            new_records: RecordSet::new(),
            first_observation: true,
        }
    }

    pub fn unchanged(file: MonitoredFile) -> Self {
        Self::new(file, RecordSet::new())
    }
}

/// What happened to one monitored file during a run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    Checked(DiffResult),
    Failed { file: MonitoredFile, error: FetchError },
}

impl FileOutcome {
    pub fn file(&self) -> &MonitoredFile {
        match self {
            FileOutcome::Checked(result) => &result.file,
            FileOutcome::Failed { file, .. } => file,
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, FileOutcome::Failed { .. })
    }
}

/// Summary of one complete invocation.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started: DateTime<Utc>,
    pub previous: Option<HistoryReference>,
    pub current: HistoryReference,
    pub outcomes: Vec<FileOutcome>,
    pub state_advanced: bool,
    pub recorded: bool,
}

impl RunReport {
    pub fn new(previous: Option<HistoryReference>, current: HistoryReference) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started: Utc::now(),
            previous,
            current,
            outcomes: Vec::new(),
            state_advanced: false,
            recorded: false,
        }
    }

    pub fn results(&self) -> impl Iterator<Item = &DiffResult> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            FileOutcome::Checked(result) => Some(result),
            FileOutcome::Failed { .. } => None,
        })
    }

    pub fn failures(&self) -> impl Iterator<Item = (&MonitoredFile, &FetchError)> {
        self.outcomes.iter().filter_map(|outcome| match outcome {
            FileOutcome::Failed { file, error } => Some((file, error)),
            FileOutcome::Checked(_) => None,
        })
    }

    pub fn has_failures(&self) -> bool {
        self.outcomes.iter().any(FileOutcome::is_failed)
    }

    pub fn total_new_records(&self) -> usize {
        self.results().map(|r| r.new_records.len()).sum()
    }

    pub fn is_first_run(&self) -> bool {
        self.previous.is_none()
    }

    pub fn is_success(&self) -> bool {
        !self.has_failures() && self.state_advanced && self.recorded
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_equality_ignores_timestamp() {
        let a = HistoryReference::new("abc123");
        let b = HistoryReference::new("abc123").with_timestamp(Utc::now());

        assert_eq!(a, b);
        assert_ne!(a, HistoryReference::new("def456"));
    }

    #[test]
    fn test_reference_short() {
        let r = HistoryReference::new("0123456789abcdef");
        assert_eq!(r.short(), "0123456");
        assert_eq!(HistoryReference::new("abc").short(), "abc");
    }

    #[test]
    fn test_record_set_rejects_empty() {
        let mut set = RecordSet::new();
        assert!(!set.insert(""));
        assert!(set.insert("a.com"));
        assert!(!set.insert("a.com"));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn test_added_since() {
        let old: RecordSet = ["ads.example.com", "track.example.net"].into_iter().collect();
        let new: RecordSet = [
            "ads.example.com",
            "track.example.net",
            "malware.example.org",
        ]
        .into_iter()
        .collect();

        let added = new.added_since(&old);

        assert_eq!(added.iter().collect::<Vec<_>>(), vec!["malware.example.org"]);
        assert!(old.added_since(&new).is_empty());
    }

    #[test]
    fn test_record_set_iterates_sorted() {
        let set: RecordSet = ["z.com", "a.com", "m.com"].into_iter().collect();
        assert_eq!(set.iter().collect::<Vec<_>>(), vec!["a.com", "m.com", "z.com"]);
    }

    #[test]
    fn test_report_success_requires_all_steps() {
        let mut report = RunReport::new(None, HistoryReference::new("abc"));
        report
            .outcomes
            .push(FileOutcome::Checked(DiffResult::baseline(MonitoredFile::new("a.txt"))));
        assert!(!report.is_success());

        report.state_advanced = true;
        report.recorded = true;
        assert!(report.is_success());

        report.outcomes.push(FileOutcome::Failed {
            file: MonitoredFile::new("b.txt"),
            error: FetchError::Transient("timeout".into()),
        });
        assert!(!report.is_success());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.results().count(), 1);
    }
}
