//! Access to the monitored repository through a local clone, and recording
//! of output artifacts in the working repository, both via the `git` binary.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use listwatch_core::publish::ChangeRecorder;
use listwatch_core::{
    ContentFetcher, Error, FetchError, HistoryReference, MonitoredFile, Snapshot,
};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tokio::sync::Mutex;
use tracing::{debug, info};

/// Stderr fragments that mean the remote could not be reached right now.
const TRANSIENT_PATTERNS: &[&str] = &[
    "could not resolve host",
    "connection timed out",
    "operation timed out",
    "network is unreachable",
    "failed to connect",
    "connection refused",
    "connection reset",
    "the remote end hung up unexpectedly",
    "early eof",
    "rpc failed",
    "temporary failure",
    "returned error: 429",
    "returned error: 502",
    "returned error: 503",
    "returned error: 504",
];

/// Stderr fragments from `git show <rev>:<path>` for a path absent at `rev`.
const MISSING_PATTERNS: &[&str] = &["does not exist in", "exists on disk, but not in"];

/// Categorizes a failed git invocation from its stderr.
pub fn classify_stderr(command: &str, stderr: &str) -> FetchError {
    let lower = stderr.to_lowercase();
    let message = format!("{}: {}", command, meaningful_line(stderr));
    if TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p)) {
        FetchError::Transient(message)
    } else {
        FetchError::Fatal(message)
    }
}

/// Keeps git's messages untranslated so the pattern tables above apply
/// under any user locale.
const GIT_ENV: [(&str, &str); 2] = [("LC_ALL", "C"), ("LANGUAGE", "C")];

fn git_command() -> Command {
    let mut command = Command::new("git");
    command.envs(GIT_ENV);
    command
}

fn is_missing_path(stderr: &str) -> bool {
    MISSING_PATTERNS.iter().any(|p| stderr.contains(p))
}

fn meaningful_line(stderr: &str) -> &str {
    stderr
        .lines()
        .map(str::trim)
        .find(|l| l.starts_with("fatal:") || l.starts_with("error:"))
        .or_else(|| stderr.lines().map(str::trim).find(|l| !l.is_empty()))
        .unwrap_or("unknown error")
}

/// Follows a remote repository through a clone under `checkout_dir`.
///
/// Only the object database is used; the working tree is never read, so
/// `latest` just fetches and resolves the fetched tip.
pub struct GitCloneFetcher {
    url: String,
    checkout_dir: PathBuf,
    branch: Option<String>,
    sync: Mutex<()>,
}

impl GitCloneFetcher {
    pub fn new(url: impl Into<String>, checkout_dir: impl Into<PathBuf>, branch: Option<String>) -> Self {
        Self {
            url: url.into(),
            checkout_dir: checkout_dir.into(),
            branch,
            sync: Mutex::new(()),
        }
    }

    pub fn checkout_dir(&self) -> &Path {
        &self.checkout_dir
    }

    async fn git(&self, args: &[&str]) -> Result<Output, FetchError> {
        git_command()
            .arg("-C")
            .arg(&self.checkout_dir)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FetchError::Fatal(format!("cannot run git: {}", e)))
    }

    async fn clone_repository(&self) -> Result<(), FetchError> {
        info!("Cloning repository from {}...", self.url);
        if let Some(parent) = self.checkout_dir.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Fatal(format!("cannot create {}: {}", parent.display(), e)))?;
        }

        let mut command = git_command();
        command.args(["clone", "--quiet", "--no-checkout"]);
        if let Some(branch) = &self.branch {
            command.args(["--branch", branch.as_str()]);
        }
        let output = command
            .arg(&self.url)
            .arg(&self.checkout_dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| FetchError::Fatal(format!("cannot run git: {}", e)))?;

        if !output.status.success() {
            return Err(classify_stderr(
                "git clone",
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        info!("Repository cloned successfully");
        Ok(())
    }

    async fn update(&self) -> Result<&'static str, FetchError> {
        if !self.checkout_dir.join(".git").exists() {
            self.clone_repository().await?;
            return Ok("HEAD");
        }

        debug!("Repository exists, fetching latest changes...");
        let rev = self.branch.as_deref().unwrap_or("HEAD");
        let output = self.git(&["fetch", "--quiet", "origin", rev]).await?;
        if !output.status.success() {
            return Err(classify_stderr(
                "git fetch",
                &String::from_utf8_lossy(&output.stderr),
            ));
        }
        Ok("FETCH_HEAD")
    }
}

#[async_trait]
impl ContentFetcher for GitCloneFetcher {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        let _guard = self.sync.lock().await;
        let rev = self.update().await?;

        let output = self.git(&["log", "-1", "--format=%H%x00%cI", rev]).await?;
        if !output.status.success() {
            return Err(classify_stderr(
                "git log",
                &String::from_utf8_lossy(&output.stderr),
            ));
        }

        parse_log_line(&String::from_utf8_lossy(&output.stdout))
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        let object = format!("{}:{}", at.id, file.path());
        let output = self.git(&["show", &object]).await?;

        if output.status.success() {
            return String::from_utf8(output.stdout)
                .map(Snapshot::Found)
                .map_err(|_| FetchError::Fatal(format!("{} is not valid UTF-8", object)));
        }

        let stderr = String::from_utf8_lossy(&output.stderr);
        if is_missing_path(&stderr) {
            return Ok(Snapshot::Missing);
        }
        Err(classify_stderr("git show", &stderr))
    }
}

fn parse_log_line(line: &str) -> Result<HistoryReference, FetchError> {
    let line = line.trim();
    let (id, date) = line.split_once('\0').unwrap_or((line, ""));
    if id.is_empty() {
        return Err(FetchError::Fatal("git log returned no commit".to_string()));
    }

    let reference = HistoryReference::new(id);
    Ok(match DateTime::parse_from_rfc3339(date.trim()) {
        Ok(ts) => reference.with_timestamp(ts.with_timezone(&Utc)),
        Err(_) => reference,
    })
}

/// Commits changed output artifacts in the working repository.
pub struct GitCommitter {
    workdir: PathBuf,
}

impl GitCommitter {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
        }
    }

    fn git(&self, args: &[&str], paths: &[PathBuf]) -> listwatch_core::Result<Output> {
        let output = std::process::Command::new("git")
            .envs(GIT_ENV)
            .arg("-C")
            .arg(&self.workdir)
            .args(args)
            .arg("--")
            .args(paths)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| Error::Publish(format!("cannot run git: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Publish(format!(
                "git {}: {}",
                args.first().copied().unwrap_or_default(),
                meaningful_line(&stderr)
            )));
        }
        Ok(output)
    }
}

impl ChangeRecorder for GitCommitter {
    fn record(&self, paths: &[PathBuf], message: &str) -> listwatch_core::Result<bool> {
        let status = self.git(&["status", "--porcelain"], paths)?;
        if status.stdout.iter().all(u8::is_ascii_whitespace) {
            info!("No changes to commit");
            return Ok(false);
        }

        self.git(&["add"], paths)?;
        self.git(&["commit", "--quiet", "-m", message], paths)?;
        info!("Committed changes");
        Ok(true)
    }
}
