use crate::detect::ChangeDetector;
use crate::error::Result;
use crate::fetch::ContentFetcher;
use crate::models::{FileOutcome, MonitoredFile, RunReport};
use crate::publish::ResultPublisher;
use crate::tracker::TrackerStore;
use futures::stream::{self, StreamExt};
use tracing::{error, info, info_span, warn, Instrument};

pub const DEFAULT_CONCURRENCY: usize = 4;

/// Runs one detection cycle over a fixed, ordered list of files.
pub struct FileSetOrchestrator<F, T, P> {
    fetcher: F,
    tracker: T,
    publisher: P,
    concurrency: usize,
}

impl<F, T, P> FileSetOrchestrator<F, T, P>
where
    F: ContentFetcher,
    T: TrackerStore,
    P: ResultPublisher,
{
    pub fn new(fetcher: F, tracker: T, publisher: P) -> Self {
        Self {
            fetcher,
            tracker,
            publisher,
            concurrency: DEFAULT_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn fetcher(&self) -> &F {
        &self.fetcher
    }

    pub fn tracker(&self) -> &T {
        &self.tracker
    }

    pub fn publisher(&self) -> &P {
        &self.publisher
    }

    /// Compares every file against the same (previous, current) pair,
    /// publishes what succeeded, and advances tracker state only when every
    /// file succeeded and publication went through.
    ///
    /// Returns `Err` only for run-level failures: unreadable state, no
    /// current reference, failed publication or failed state write.
    pub async fn run(&self, files: &[MonitoredFile]) -> Result<RunReport> {
        let previous = self.tracker.load()?;
        let current = self.fetcher.latest().await?;

        let report = RunReport::new(previous, current);
        let span = info_span!("run", run_id = %report.run_id);
        self.execute(files, report).instrument(span).await
    }

    async fn execute(&self, files: &[MonitoredFile], mut report: RunReport) -> Result<RunReport> {
        match &report.previous {
            None => info!("First run, current reference {}", report.current),
            Some(prev) if *prev == report.current => {
                info!("No new commits since {}", prev.short())
            }
            Some(prev) => info!("Comparing {} -> {}", prev.short(), report.current.short()),
        }

        report.outcomes = self.detect_all(files, &report).await;

        for (file, err) in report.failures() {
            error!(file = %file, kind = err.kind(), "Comparison failed: {}", err);
        }

        self.publisher.publish(&report.current, &report.outcomes)?;

        if report.has_failures() {
            warn!(
                "{} file(s) failed, keeping previous reference",
                report.failures().count()
            );
        } else {
            self.tracker.save(&report.current)?;
            report.state_advanced = true;
        }

        match self.publisher.record(&report) {
            Ok(()) => report.recorded = true,
            Err(e) => error!("Failed to record results: {}", e),
        }

        info!(
            new_records = report.total_new_records(),
            state_advanced = report.state_advanced,
            "Run finished"
        );
        Ok(report)
    }

    async fn detect_all(&self, files: &[MonitoredFile], report: &RunReport) -> Vec<FileOutcome> {
        let detector = ChangeDetector::new(&self.fetcher);
        let previous = report.previous.as_ref();
        let current = &report.current;

        stream::iter(files)
            .map(|file| {
                let detector = &detector;
                async move {
                    match detector.detect(file, previous, current).await {
                        Ok(result) => FileOutcome::Checked(result),
                        Err(error) => FileOutcome::Failed {
                            file: file.clone(),
                            error,
                        },
                    }
                }
            })
            .buffered(self.concurrency)
            .collect()
            .await
    }
}
