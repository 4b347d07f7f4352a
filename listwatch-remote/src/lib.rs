//! # listwatch-remote
//!
//! Interchangeable ways to read the monitored repository's history:
//!
//! - [`GitCloneFetcher`] keeps a local clone and reads objects with `git show`
//! - [`GithubFetcher`] polls the GitHub REST API and downloads raw content
//!
//! ## Example
//!
//! ```no_run
//! use listwatch_core::{Config, ContentFetcher};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let config = Config::load("listwatch.toml")?;
//! let fetcher = listwatch_remote::build_fetcher(&config)?;
//!
//! let head = fetcher.latest().await?;
//! println!("tracking {}", head.short());
//! # Ok(())
//! # }
//! ```

pub mod git;
pub mod github;

pub use git::{GitCloneFetcher, GitCommitter};
pub use github::GithubFetcher;

use listwatch_core::{Config, ContentFetcher, Error, RetryingFetcher, SourceConfig};
use tracing::debug;

/// Builds the fetcher selected by `[source]`, wrapped in the configured
/// retry policy.
pub fn build_fetcher(config: &Config) -> Result<Box<dyn ContentFetcher>, Error> {
    let policy = config.fetch.retry_policy();

    let fetcher: Box<dyn ContentFetcher> = match &config.source {
        SourceConfig::Git {
            url,
            checkout_dir,
            branch,
        } => Box::new(RetryingFetcher::new(
            GitCloneFetcher::new(url.clone(), checkout_dir.clone(), branch.clone()),
            policy,
        )),
        SourceConfig::Github {
            repository,
            branch,
            token_env,
        } => {
            let token = read_token(token_env);
            let github =
                GithubFetcher::new(repository, branch.clone(), token, config.fetch.timeout())?;
            Box::new(RetryingFetcher::new(github, policy))
        }
    };

    Ok(fetcher)
}

fn read_token(var: &str) -> Option<String> {
    match std::env::var(var) {
        Ok(token) if !token.trim().is_empty() => Some(token.trim().to_string()),
        _ => {
            debug!("{} is not set", var);
            None
        }
    }
}
