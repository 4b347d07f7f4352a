use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Persistence error: {0}")]
    Persistence(String),

    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("Publish failed: {0}")]
    Publish(String),

    #[error("Invalid reference: {0}")]
    InvalidReference(String),
}

/// Failure to reach content in the monitored repository.
///
/// A file that simply does not exist at a reference is not an error; see
/// [`crate::fetch::Snapshot::Missing`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("transient fetch error: {0}")]
    Transient(String),

    #[error("fetch failed: {0}")]
    Fatal(String),
}

impl FetchError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchError::Transient(_))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            FetchError::Transient(_) => "transient",
            FetchError::Fatal(_) => "fatal",
        }
    }
}
