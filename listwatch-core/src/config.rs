use crate::error::{Error, Result};
use crate::models::MonitoredFile;
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_CONFIG_FILE: &str = "listwatch.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub state: StateConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub files: Vec<FileConfig>,
}

/// Where the monitored repository lives and how to reach it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    /// A local clone kept up to date with `git fetch`.
    Git {
        url: String,
        #[serde(default = "default_checkout_dir")]
        checkout_dir: PathBuf,
        #[serde(default)]
        branch: Option<String>,
    },
    /// The GitHub REST API plus raw content downloads.
    Github {
        repository: String,
        #[serde(default)]
        branch: Option<String>,
        #[serde(default = "default_token_env")]
        token_env: String,
    },
}

impl SourceConfig {
    /// Human-readable name of the monitored repository.
    pub fn label(&self) -> String {
        match self {
            SourceConfig::Git { url, .. } => {
                let mut parts: Vec<&str> = url
                    .trim_end_matches('/')
                    .trim_end_matches(".git")
                    .rsplit(|c| c == '/' || c == ':')
                    .take(2)
                    .collect();
                parts.reverse();
                parts.join("/")
            }
            SourceConfig::Github { repository, .. } => repository.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StateConfig {
    #[serde(default = "default_state_path")]
    pub path: PathBuf,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            path: default_state_path(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_true")]
    pub commit: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
            commit: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FetchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl FetchConfig {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_initial_delay(Duration::from_millis(self.initial_backoff_ms))
            .with_max_delay(Duration::from_millis(self.max_backoff_ms))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub path: String,
    /// Output artifact path; defaults to `<output.dir>/<path>`
    #[serde(default)]
    pub output: Option<PathBuf>,
}

fn default_checkout_dir() -> PathBuf {
    PathBuf::from(".listwatch").join("checkout")
}

fn default_token_env() -> String {
    "GITHUB_TOKEN".to_string()
}

fn default_state_path() -> PathBuf {
    PathBuf::from("last_commit.txt")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("new")
}

fn default_true() -> bool {
    true
}

fn default_concurrency() -> usize {
    4
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_backoff_ms() -> u64 {
    500
}

fn default_max_backoff_ms() -> u64 {
    10_000
}

fn default_timeout_secs() -> u64 {
    30
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        let config: Config = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.files.is_empty() {
            return Err(Error::Configuration(
                "no [[files]] entries configured".to_string(),
            ));
        }

        let mut seen_paths = HashSet::new();
        let mut seen_outputs = HashSet::new();
        for file in &self.files {
            if file.path.trim().is_empty() {
                return Err(Error::Configuration("file path is empty".to_string()));
            }
            check_relative(Path::new(&file.path), "file path")?;
            if !seen_paths.insert(file.path.as_str()) {
                return Err(Error::Configuration(format!(
                    "file '{}' is listed more than once",
                    file.path
                )));
            }
            let output = self.output_path(file);
            check_relative(&output, "output path")?;
            if !seen_outputs.insert(output.clone()) {
                return Err(Error::Configuration(format!(
                    "output {} is used by more than one file",
                    output.display()
                )));
            }
        }

        if self.fetch.concurrency == 0 {
            return Err(Error::Configuration(
                "fetch.concurrency must be at least 1".to_string(),
            ));
        }
        if self.fetch.max_attempts == 0 {
            return Err(Error::Configuration(
                "fetch.max_attempts must be at least 1".to_string(),
            ));
        }

        match &self.source {
            SourceConfig::Git { url, .. } if url.trim().is_empty() => Err(
                Error::Configuration("source.url is empty".to_string()),
            ),
            SourceConfig::Github { repository, .. } => {
                let valid = repository
                    .split_once('/')
                    .map(|(owner, name)| {
                        !owner.is_empty() && !name.is_empty() && !name.contains('/')
                    })
                    .unwrap_or(false);
                if valid {
                    Ok(())
                } else {
                    Err(Error::Configuration(format!(
                        "source.repository must be owner/name, got '{}'",
                        repository
                    )))
                }
            }
            SourceConfig::Git { .. } => Ok(()),
        }
    }

    /// Monitored files in configured order.
    pub fn monitored_files(&self) -> Vec<MonitoredFile> {
        self.files
            .iter()
            .map(|f| MonitoredFile::new(f.path.clone()))
            .collect()
    }

    pub fn output_path(&self, file: &FileConfig) -> PathBuf {
        file.output
            .clone()
            .unwrap_or_else(|| self.output.dir.join(&file.path))
    }
}

fn check_relative(path: &Path, what: &str) -> Result<()> {
    let escapes = path
        .components()
        .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir));
    let names_nothing = !path.components().any(|c| matches!(c, Component::Normal(_)));
    if escapes || names_nothing {
        return Err(Error::Configuration(format!(
            "{} {} must be relative and stay inside the repository",
            what,
            path.display()
        )));
    }
    Ok(())
}

/// Starter configuration written by `listwatch init`.
pub const TEMPLATE: &str = r#"# listwatch configuration

[source]
# "git" keeps a local clone; "github" polls the GitHub API instead.
kind = "git"
url = "https://github.com/hagezi/dns-blocklists.git"
# checkout_dir = ".listwatch/checkout"
# branch = "main"

# [source]
# kind = "github"
# repository = "hagezi/dns-blocklists"
# token_env = "GITHUB_TOKEN"

[state]
path = "last_commit.txt"

[output]
dir = "new"
commit = true

[fetch]
concurrency = 4
max_attempts = 3
initial_backoff_ms = 500
max_backoff_ms = 10000
timeout_secs = 30

[[files]]
path = "domains/tif.txt"
output = "domains/new_last_hour.txt"
"#;

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[source]
kind = "github"
repository = "hagezi/dns-blocklists"

[[files]]
path = "domains/tif.txt"

[[files]]
path = "ips/tif.txt"
output = "custom/ips.txt"
"#;

    #[test]
    fn test_parse_minimal_with_defaults() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(
            config.source,
            SourceConfig::Github {
                repository: "hagezi/dns-blocklists".to_string(),
                branch: None,
                token_env: "GITHUB_TOKEN".to_string(),
            }
        );
        assert_eq!(config.state.path, PathBuf::from("last_commit.txt"));
        assert_eq!(config.fetch.concurrency, 4);
        assert!(config.output.commit);
        assert_eq!(
            config.monitored_files(),
            vec![MonitoredFile::new("domains/tif.txt"), MonitoredFile::new("ips/tif.txt")]
        );
    }

    #[test]
    fn test_output_paths() {
        let config = Config::parse(MINIMAL).unwrap();

        assert_eq!(
            config.output_path(&config.files[0]),
            PathBuf::from("new/domains/tif.txt")
        );
        assert_eq!(
            config.output_path(&config.files[1]),
            PathBuf::from("custom/ips.txt")
        );
    }

    #[test]
    fn test_template_is_valid() {
        let config = Config::parse(TEMPLATE).unwrap();
        assert!(matches!(config.source, SourceConfig::Git { .. }));
        assert_eq!(config.source.label(), "hagezi/dns-blocklists");
    }

    #[test]
    fn test_rejects_empty_file_list() {
        let err = Config::parse("[source]\nkind = \"git\"\nurl = \"x\"\n").unwrap_err();
        assert!(matches!(err, Error::Configuration(_)));
    }

    #[test]
    fn test_rejects_duplicate_files() {
        let raw = r#"
[source]
kind = "git"
url = "https://example.com/lists.git"

[[files]]
path = "a.txt"

[[files]]
path = "a.txt"
"#;
        assert!(matches!(Config::parse(raw), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_escaping_paths() {
        let raw = r#"
[source]
kind = "git"
url = "https://example.com/lists.git"

[[files]]
path = "../secrets.txt"
"#;
        assert!(matches!(Config::parse(raw), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_paths_naming_no_file() {
        for path in [".", "./", "./."] {
            let raw = format!(
                "[source]\nkind = \"git\"\nurl = \"https://example.com/lists.git\"\n\n[[files]]\npath = \"{}\"\noutput = \"out/a.txt\"\n",
                path
            );
            assert!(
                matches!(Config::parse(&raw), Err(Error::Configuration(_))),
                "{} was accepted",
                path
            );
        }

        let raw = "[source]\nkind = \"git\"\nurl = \"https://example.com/lists.git\"\n\n[[files]]\npath = \"a.txt\"\noutput = \".\"\n";
        assert!(matches!(Config::parse(raw), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_bad_repository() {
        let raw = r#"
[source]
kind = "github"
repository = "just-a-name"

[[files]]
path = "a.txt"
"#;
        assert!(matches!(Config::parse(raw), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_rejects_zero_concurrency() {
        let raw = r#"
[source]
kind = "git"
url = "https://example.com/lists.git"

[fetch]
concurrency = 0

[[files]]
path = "a.txt"
"#;
        assert!(matches!(Config::parse(raw), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_unknown_source_kind_is_parse_error() {
        let raw = "[source]\nkind = \"svn\"\n[[files]]\npath = \"a.txt\"\n";
        assert!(matches!(Config::parse(raw), Err(Error::Toml(_))));
    }

    #[test]
    fn test_git_label_variants() {
        let ssh = SourceConfig::Git {
            url: "git@github.com:owner/lists.git".to_string(),
            checkout_dir: default_checkout_dir(),
            branch: None,
        };
        assert_eq!(ssh.label(), "owner/lists");
    }
}
