use async_trait::async_trait;
use chrono::{DateTime, Utc};
use listwatch_core::{ContentFetcher, FetchError, HistoryReference, MonitoredFile, Snapshot};
use reqwest::header::{HeaderMap, ACCEPT, AUTHORIZATION, USER_AGENT};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

pub const DEFAULT_API_BASE: &str = "https://api.github.com";
pub const DEFAULT_RAW_BASE: &str = "https://raw.githubusercontent.com";

const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";

/// Reads history through the GitHub REST API and raw content downloads.
#[derive(Clone)]
pub struct GithubFetcher {
    owner: String,
    repo: String,
    branch: Option<String>,
    token: Option<String>,
    api_base: String,
    raw_base: String,
    client: reqwest::Client,
}

#[derive(Deserialize)]
struct CommitResponse {
    sha: String,
    commit: CommitDetail,
}

#[derive(Deserialize)]
struct CommitDetail {
    committer: Option<Signature>,
}

#[derive(Deserialize)]
struct Signature {
    date: Option<DateTime<Utc>>,
}

impl GithubFetcher {
    /// Create a new fetcher
    ///
    /// # Arguments
    ///
    /// * `repository` - `owner/name` of the monitored repository
    /// * `branch` - Branch to follow; the repository's default branch if `None`
    /// * `token` - Optional API token, only used to raise rate limits
    /// * `timeout` - Per-request timeout
    pub fn new(
        repository: &str,
        branch: Option<String>,
        token: Option<String>,
        timeout: Duration,
    ) -> Result<Self, FetchError> {
        let (owner, repo) = repository
            .split_once('/')
            .filter(|(o, r)| !o.is_empty() && !r.is_empty())
            .ok_or_else(|| FetchError::Fatal(format!("invalid repository '{}'", repository)))?;

        if token.is_none() {
            debug!("No API token configured, using unauthenticated rate limits");
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("cannot build HTTP client: {}", e)))?;

        Ok(Self {
            owner: owner.to_string(),
            repo: repo.to_string(),
            branch,
            token,
            api_base: DEFAULT_API_BASE.to_string(),
            raw_base: DEFAULT_RAW_BASE.to_string(),
            client,
        })
    }

    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        self.api_base = base.into();
        self
    }

    pub fn with_raw_base(mut self, base: impl Into<String>) -> Self {
        self.raw_base = base.into();
        self
    }

    fn commit_url(&self) -> Result<Url, FetchError> {
        self.commit_url_for(self.branch.as_deref().unwrap_or("HEAD"))
    }

    fn commit_url_for(&self, rev: &str) -> Result<Url, FetchError> {
        build_url(
            &self.api_base,
            ["repos", self.owner.as_str(), self.repo.as_str(), "commits", rev],
        )
    }

    fn raw_url(&self, file: &MonitoredFile, at: &HistoryReference) -> Result<Url, FetchError> {
        let mut segments = vec![self.owner.as_str(), self.repo.as_str(), at.id.as_str()];
        segments.extend(file.path().split('/').filter(|s| !s.is_empty()));
        build_url(&self.raw_base, segments)
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        let request = self
            .client
            .get(url)
            .header(USER_AGENT, concat!("listwatch/", env!("CARGO_PKG_VERSION")))
            .header(ACCEPT, "application/vnd.github+json");

        match &self.token {
            Some(token) => request.header(AUTHORIZATION, format!("Bearer {}", token)),
            None => request,
        }
    }

    /// Raw downloads answer 404 both for an absent path and for an unknown
    /// commit; only the former is `Missing`.
    async fn check_reference(&self, at: &HistoryReference) -> Result<(), FetchError> {
        let url = self.commit_url_for(&at.id)?;
        let response = self.get(url.clone()).send().await.map_err(from_reqwest)?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNPROCESSABLE_ENTITY {
            return Err(FetchError::Fatal(format!(
                "unknown reference {} in {}/{}",
                at.id, self.owner, self.repo
            )));
        }
        Err(classify_status(status, response.headers(), url.as_str()))
    }
}

#[async_trait]
impl ContentFetcher for GithubFetcher {
    async fn latest(&self) -> Result<HistoryReference, FetchError> {
        let url = self.commit_url()?;
        let response = self.get(url.clone()).send().await.map_err(from_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), url.as_str()));
        }

        let body: CommitResponse = response.json().await.map_err(from_reqwest)?;
        let mut reference = HistoryReference::new(body.sha);
        if let Some(date) = body.commit.committer.and_then(|c| c.date) {
            reference = reference.with_timestamp(date);
        }
        Ok(reference)
    }

    async fn fetch(
        &self,
        file: &MonitoredFile,
        at: &HistoryReference,
    ) -> Result<Snapshot, FetchError> {
        let url = self.raw_url(file, at)?;
        debug!("GET {}", url);
        let response = self.get(url.clone()).send().await.map_err(from_reqwest)?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            self.check_reference(at).await?;
            return Ok(Snapshot::Missing);
        }
        if !status.is_success() {
            return Err(classify_status(status, response.headers(), url.as_str()));
        }

        let body = response.bytes().await.map_err(from_reqwest)?;
        let content = String::from_utf8(body.to_vec())
            .map_err(|_| FetchError::Fatal(format!("{} is not valid UTF-8", url)))?;
        Ok(Snapshot::Found(content))
    }
}

fn build_url<'a>(
    base: &str,
    segments: impl IntoIterator<Item = &'a str>,
) -> Result<Url, FetchError> {
    let mut url =
        Url::parse(base).map_err(|e| FetchError::Fatal(format!("invalid base URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::Fatal(format!("base URL {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

/// Maps an unsuccessful HTTP status to a fetch error.
pub fn classify_status(status: StatusCode, headers: &HeaderMap, url: &str) -> FetchError {
    let rate_limited = headers
        .get(RATE_LIMIT_REMAINING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim() == "0")
        .unwrap_or(false);

    let message = format!("{} returned {}", url, status);
    if status == StatusCode::TOO_MANY_REQUESTS
        || status.is_server_error()
        || (status == StatusCode::FORBIDDEN && rate_limited)
    {
        FetchError::Transient(message)
    } else {
        FetchError::Fatal(message)
    }
}

fn from_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() || err.is_connect() || err.is_body() || err.is_request() {
        FetchError::Transient(err.to_string())
    } else {
        FetchError::Fatal(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listwatch_core::ChangeDetector;
    use reqwest::header::HeaderValue;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn fetcher(base: &str) -> GithubFetcher {
        GithubFetcher::new("hagezi/dns-blocklists", None, None, Duration::from_secs(5))
            .unwrap()
            .with_api_base(base)
            .with_raw_base(base)
    }

    type Route = fn(&str) -> (&'static str, &'static [u8]);

    /// Serves the same canned response to every connection.
    async fn serve(status: &'static str, body: &'static str) -> (String, Arc<AtomicUsize>) {
        let (base, hits, _) = serve_with(Box::new(move |_: &str| (status, body.as_bytes()))).await;
        (base, hits)
    }

    /// Answers each request from `route`, keyed on the request path.
    async fn serve_routes(route: Route) -> (String, Arc<Mutex<Vec<String>>>) {
        let (base, _, paths) = serve_with(Box::new(route)).await;
        (base, paths)
    }

    async fn serve_with(
        route: Box<dyn Fn(&str) -> (&'static str, &'static [u8]) + Send>,
    ) -> (String, Arc<AtomicUsize>, Arc<Mutex<Vec<String>>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let paths = Arc::new(Mutex::new(Vec::new()));
        let counter = Arc::clone(&hits);
        let seen = Arc::clone(&paths);

        tokio::spawn(async move {
            loop {
                let Ok((mut socket, _)) = listener.accept().await else {
                    return;
                };
                counter.fetch_add(1, Ordering::SeqCst);
                let mut buf = vec![0u8; 4096];
                let mut read = Vec::new();
                while !read.windows(4).any(|w| w == b"\r\n\r\n") {
                    match socket.read(&mut buf).await {
                        Ok(0) | Err(_) => break,
                        Ok(n) => read.extend_from_slice(&buf[..n]),
                    }
                }
                let request = String::from_utf8_lossy(&read);
                let path = request.split_whitespace().nth(1).unwrap_or("/").to_string();
                let (status, body) = route(&path);
                seen.lock().unwrap().push(path);

                let mut response = format!(
                    "HTTP/1.1 {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
                    status,
                    body.len()
                )
                .into_bytes();
                response.extend_from_slice(body);
                let _ = socket.write_all(&response).await;
                let _ = socket.shutdown().await;
            }
        });

        (format!("http://{}", addr), hits, paths)
    }

    #[test]
    fn test_rejects_malformed_repository() {
        let err = GithubFetcher::new("nope", None, None, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_urls() {
        let f = GithubFetcher::new(
            "hagezi/dns-blocklists",
            Some("main".to_string()),
            None,
            Duration::from_secs(1),
        )
        .unwrap();

        assert_eq!(
            f.commit_url().unwrap().as_str(),
            "https://api.github.com/repos/hagezi/dns-blocklists/commits/main"
        );
        assert_eq!(
            f.raw_url(&MonitoredFile::new("domains/tif list.txt"), &HistoryReference::new("abc"))
                .unwrap()
                .as_str(),
            "https://raw.githubusercontent.com/hagezi/dns-blocklists/abc/domains/tif%20list.txt"
        );
    }

    #[test]
    fn test_default_branch_uses_head() {
        let f = fetcher("https://api.example.com/");
        assert!(f.commit_url().unwrap().as_str().ends_with("/commits/HEAD"));
    }

    #[test]
    fn test_classify_status() {
        let empty = HeaderMap::new();
        let mut exhausted = HeaderMap::new();
        exhausted.insert(RATE_LIMIT_REMAINING, HeaderValue::from_static("0"));

        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, &empty, "u").is_retryable());
        assert!(classify_status(StatusCode::BAD_GATEWAY, &empty, "u").is_retryable());
        assert!(classify_status(StatusCode::FORBIDDEN, &exhausted, "u").is_retryable());
        assert!(!classify_status(StatusCode::FORBIDDEN, &empty, "u").is_retryable());
        assert!(!classify_status(StatusCode::UNAUTHORIZED, &empty, "u").is_retryable());
        assert!(!classify_status(StatusCode::UNPROCESSABLE_ENTITY, &empty, "u").is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_found() {
        let (base, hits) = serve("200 OK", "a.com\nb.com\n").await;

        let snapshot = fetcher(&base)
            .fetch(&MonitoredFile::new("domains/tif.txt"), &HistoryReference::new("abc"))
            .await
            .unwrap();

        assert_eq!(snapshot, Snapshot::Found("a.com\nb.com\n".to_string()));
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_fetch_absent_path_at_known_commit_is_missing() {
        let (base, paths) = serve_routes(|path: &str| -> (&'static str, &'static [u8]) {
            if path.starts_with("/repos/") {
                ("200 OK", br#"{"sha":"c1","commit":{"committer":null}}"#)
            } else {
                ("404 Not Found", b"404: Not Found")
            }
        })
        .await;

        let snapshot = fetcher(&base)
            .fetch(&MonitoredFile::new("domains/new.txt"), &HistoryReference::new("c1"))
            .await
            .unwrap();

        assert_eq!(snapshot, Snapshot::Missing);
        assert_eq!(
            paths.lock().unwrap().last().map(String::as_str),
            Some("/repos/hagezi/dns-blocklists/commits/c1")
        );
    }

    #[tokio::test]
    async fn test_fetch_at_unknown_commit_is_fatal() {
        let (base, _) = serve_routes(|path: &str| -> (&'static str, &'static [u8]) {
            if path.contains("deadbeef") {
                ("404 Not Found", b"404: Not Found")
            } else {
                ("200 OK", b"a.com\nb.com\nc.com\n")
            }
        })
        .await;
        let fetcher = fetcher(&base);

        let err = fetcher
            .fetch(&MonitoredFile::new("a.txt"), &HistoryReference::new("deadbeef"))
            .await
            .unwrap_err();
        assert!(!err.is_retryable());

        let detected = ChangeDetector::new(&fetcher)
            .detect(
                &MonitoredFile::new("a.txt"),
                Some(&HistoryReference::new("deadbeef")),
                &HistoryReference::new("c2"),
            )
            .await;
        assert!(detected.is_err());
    }

    #[tokio::test]
    async fn test_unknown_commit_rejected_with_422_is_fatal() {
        let (base, _) = serve_routes(|path: &str| -> (&'static str, &'static [u8]) {
            if path.starts_with("/repos/") {
                ("422 Unprocessable Entity", br#"{"message":"No commit found for SHA: zz"}"#)
            } else {
                ("404 Not Found", b"404: Not Found")
            }
        })
        .await;

        let err = fetcher(&base)
            .fetch(&MonitoredFile::new("a.txt"), &HistoryReference::new("zz"))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_invalid_utf8_is_fatal() {
        let (base, _) = serve_routes(|_: &str| -> (&'static str, &'static [u8]) {
            ("200 OK", b"a.com\n\xff\xfeb.com\n")
        }).await;

        let err = fetcher(&base)
            .fetch(&MonitoredFile::new("a.txt"), &HistoryReference::new("c1"))
            .await
            .unwrap_err();

        assert!(!err.is_retryable());
        assert!(err.to_string().contains("not valid UTF-8"));
    }

    #[tokio::test]
    async fn test_fetch_503_is_transient() {
        let (base, _) = serve("503 Service Unavailable", "").await;

        let err = fetcher(&base)
            .fetch(&MonitoredFile::new("domains/tif.txt"), &HistoryReference::new("abc"))
            .await
            .unwrap_err();

        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_latest_parses_commit() {
        let (base, _) = serve(
            "200 OK",
            r#"{"sha":"0123456789abcdef","commit":{"committer":{"date":"2024-05-01T13:00:00Z"}}}"#,
        )
        .await;

        let reference = fetcher(&base).latest().await.unwrap();

        assert_eq!(reference.id, "0123456789abcdef");
        assert_eq!(
            reference.timestamp.unwrap().to_rfc3339(),
            "2024-05-01T13:00:00+00:00"
        );
    }

    #[tokio::test]
    async fn test_unreachable_host_is_transient() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = fetcher(&format!("http://{}", addr)).latest().await.unwrap_err();

        assert!(err.is_retryable());
    }
}
