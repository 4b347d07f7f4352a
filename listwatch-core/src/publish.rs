//! Output artifacts and the hand-off to whatever records them.

use crate::error::{Error, Result};
use crate::models::{DiffResult, FileOutcome, HistoryReference, MonitoredFile, RunReport};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

pub const NO_NEW_RECORDS: &str = "# No new records detected in the last check";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Receives the results of a run. Holds no decision logic.
pub trait ResultPublisher: Send + Sync {
    /// Emits one artifact per checked file. Failed files are skipped.
    fn publish(&self, current: &HistoryReference, outcomes: &[FileOutcome]) -> Result<()>;

    /// Called once per run after tracker state has been handled.
    fn record(&self, report: &RunReport) -> Result<()>;
}

/// Records a set of changed paths as one logical change in local storage.
pub trait ChangeRecorder: Send + Sync {
    /// Returns `Ok(false)` when nothing on disk actually changed.
    fn record(&self, paths: &[PathBuf], message: &str) -> Result<bool>;
}

/// Renders the human-readable artifact for one file.
pub fn render_artifact(
    result: &DiffResult,
    source: &str,
    reference: &HistoryReference,
    generated: DateTime<Utc>,
) -> String {
    let mut out = format!(
        "# New records added to {}:{}\n# Last updated: {}\n# Total new records: {}\n\n",
        source,
        result.file,
        generated.format(TIMESTAMP_FORMAT),
        result.new_records.len()
    );

    if result.new_records.is_empty() {
        if result.first_observation {
            out.push_str(&format!(
                "# Baseline recorded at {}; changes are reported from the next run\n",
                reference.short()
            ));
        }
        out.push_str(NO_NEW_RECORDS);
        out.push('\n');
        return out;
    }

    for record in result.new_records.iter() {
        out.push_str(record);
        out.push('\n');
    }
    out
}

pub fn commit_message(at: DateTime<Utc>) -> String {
    format!("Update new records - {}", at.format(TIMESTAMP_FORMAT))
}

/// Writes `content` to `path` through a sibling temp file.
pub fn write_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)?;
    }
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    let tmp = path.with_file_name(name);
    fs::write(&tmp, content)?;
    fs::rename(&tmp, path)
}

/// Writes artifacts to the local filesystem and optionally hands them,
/// together with the tracker state file, to a [`ChangeRecorder`].
pub struct FsPublisher {
    source: String,
    outputs: HashMap<MonitoredFile, PathBuf>,
    state_path: PathBuf,
    recorder: Option<Box<dyn ChangeRecorder>>,
    written: Mutex<Vec<PathBuf>>,
}

impl FsPublisher {
    pub fn new(
        source: impl Into<String>,
        outputs: impl IntoIterator<Item = (MonitoredFile, PathBuf)>,
        state_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            source: source.into(),
            outputs: outputs.into_iter().collect(),
            state_path: state_path.into(),
            recorder: None,
            written: Mutex::new(Vec::new()),
        }
    }

    pub fn with_recorder(mut self, recorder: Box<dyn ChangeRecorder>) -> Self {
        self.recorder = Some(recorder);
        self
    }

    pub fn output_for(&self, file: &MonitoredFile) -> Option<&Path> {
        self.outputs.get(file).map(PathBuf::as_path)
    }

    /// Paths written by the last `publish` call.
    pub fn written(&self) -> Vec<PathBuf> {
        self.written
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResultPublisher for FsPublisher {
    fn publish(&self, current: &HistoryReference, outcomes: &[FileOutcome]) -> Result<()> {
        let now = Utc::now();
        let mut written = Vec::new();

        for outcome in outcomes {
            let FileOutcome::Checked(result) = outcome else {
                continue;
            };
            let path = self.output_for(&result.file).ok_or_else(|| {
                Error::Publish(format!("no output path configured for {}", result.file))
            })?;

            let artifact = render_artifact(result, &self.source, current, now);
            write_atomic(path, &artifact).map_err(|e| {
                Error::Publish(format!("cannot write {}: {}", path.display(), e))
            })?;
            info!(
                "Saved {} new records for {} to {:?}",
                result.new_records.len(),
                result.file,
                path
            );
            written.push(path.to_path_buf());
        }

        *self.written.lock().unwrap_or_else(PoisonError::into_inner) = written;
        Ok(())
    }

    fn record(&self, report: &RunReport) -> Result<()> {
        let Some(recorder) = &self.recorder else {
            return Ok(());
        };

        let mut paths = self.written();
        if report.state_advanced {
            paths.push(self.state_path.clone());
        }
        if paths.is_empty() {
            return Ok(());
        }

        if recorder.record(&paths, &commit_message(Utc::now()))? {
            info!("Recorded {} path(s)", paths.len());
        } else {
            warn!("Nothing changed on disk, no commit created");
        }
        Ok(())
    }
}

/// Keeps published results in memory. Clones share the same buffers.
#[derive(Debug, Clone, Default)]
pub struct MemoryPublisher {
    inner: Arc<Mutex<MemoryPublished>>,
}

#[derive(Debug, Default)]
struct MemoryPublished {
    artifacts: Vec<(MonitoredFile, String)>,
    recorded: Vec<bool>,
    fail_publish: Option<String>,
    fail_record: Option<String>,
}

impl MemoryPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_publish(&self, message: &str) {
        self.lock().fail_publish = Some(message.to_string());
    }

    pub fn fail_record(&self, message: &str) {
        self.lock().fail_record = Some(message.to_string());
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryPublished> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Rendered artifacts from the last publish, in publish order.
    pub fn artifacts(&self) -> Vec<(MonitoredFile, String)> {
        self.lock().artifacts.clone()
    }

    pub fn artifact(&self, path: &str) -> Option<String> {
        self.lock()
            .artifacts
            .iter()
            .find(|(file, _)| file.path() == path)
            .map(|(_, body)| body.clone())
    }

    /// `state_advanced` of every report passed to `record`.
    pub fn recorded(&self) -> Vec<bool> {
        self.lock().recorded.clone()
    }
}

impl ResultPublisher for MemoryPublisher {
    fn publish(&self, current: &HistoryReference, outcomes: &[FileOutcome]) -> Result<()> {
        let mut inner = self.lock();
        if let Some(message) = &inner.fail_publish {
            return Err(Error::Publish(message.clone()));
        }
        inner.artifacts = outcomes
            .iter()
            .filter_map(|outcome| match outcome {
                FileOutcome::Checked(result) => Some((
                    result.file.clone(),
                    render_artifact(result, "memory", current, Utc::now()),
                )),
                FileOutcome::Failed { .. } => None,
            })
            .collect();
        Ok(())
    }

    fn record(&self, report: &RunReport) -> Result<()> {
        let mut inner = self.lock();
        if let Some(message) = &inner.fail_record {
            return Err(Error::Publish(message.clone()));
        }
        inner.recorded.push(report.state_advanced);
        Ok(())
    }
}
