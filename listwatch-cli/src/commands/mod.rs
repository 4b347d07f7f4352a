pub mod diff;
pub mod init;
pub mod run;
pub mod status;

use anyhow::{Context, Result};
use listwatch_core::{Config, FsPublisher};
use listwatch_remote::GitCommitter;
use std::path::Path;

pub fn load_config(path: &Path) -> Result<Config> {
    if !path.exists() {
        anyhow::bail!(
            "No configuration found at {}. Run 'listwatch init' first.",
            path.display()
        );
    }
    Config::load(path).with_context(|| format!("Invalid configuration in {}", path.display()))
}

pub fn build_publisher(config: &Config, commit: bool) -> FsPublisher {
    let outputs = config
        .files
        .iter()
        .map(|f| (listwatch_core::MonitoredFile::new(f.path.clone()), config.output_path(f)));

    let publisher = FsPublisher::new(config.source.label(), outputs, config.state.path.clone());
    if commit {
        publisher.with_recorder(Box::new(GitCommitter::new(".")))
    } else {
        publisher
    }
}
