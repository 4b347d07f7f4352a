//! # listwatch-core
//!
//! Core library for listwatch - incremental detection of records added to
//! list files in a remote repository.
//!
//! This crate provides the data model, the change detection policy, the
//! persisted "last processed" reference and the orchestration of one run.
//! Reaching the remote repository is left to implementations of
//! [`ContentFetcher`].

pub mod canonical;
pub mod config;
pub mod detect;
pub mod error;
pub mod fetch;
pub mod models;
pub mod orchestrator;
pub mod publish;
pub mod retry;
pub mod tracker;

pub use config::{Config, SourceConfig};
pub use detect::ChangeDetector;
pub use error::{Error, FetchError, Result};
pub use fetch::{ContentFetcher, Snapshot};
pub use models::{DiffResult, FileOutcome, HistoryReference, MonitoredFile, RecordSet, RunReport};
pub use orchestrator::FileSetOrchestrator;
pub use publish::{ChangeRecorder, FsPublisher, ResultPublisher};
pub use retry::{RetryPolicy, RetryingFetcher};
pub use tracker::{FileTracker, TrackerStore};
