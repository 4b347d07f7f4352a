//! # listwatch
//!
//! Tracks append-heavy list files (domain and IP blocklists, for example) in a
//! remote repository and reports only the records added since the last run.
//!
//! This umbrella crate re-exports the engine and the remote backends. The
//! `listwatch` binary lives in `listwatch-cli`.

pub use listwatch_core as core;
pub use listwatch_remote as remote;
