//! HTTP downloader as an item processor
//!
//! This module handles the actual fetching for URL-list runs:
//! - Building HTTP clients with a proper user agent string
//! - Classifying responses and network errors into item errors
//! - Honoring `Retry-After` on throttled responses
//! - Writing response bodies atomically under the content directory

use crate::config::UserAgentConfig;
use crate::item::{ItemError, ItemProcessor, ProcessSummary, WorkItem};
use crate::storage::write_atomic;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{redirect::Policy, Client, StatusCode};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Builds an HTTP client with the configured user agent
///
/// # Arguments
///
/// * `config` - User agent configuration
/// * `timeout` - Per-request timeout; the engine's item timeout still applies on top
pub fn build_http_client(config: &UserAgentConfig, timeout: Duration) -> Result<Client, reqwest::Error> {
    // Format: CrawlerName/Version (+ContactURL; ContactEmail)
    let user_agent = format!(
        "{}/{} (+{}; {})",
        config.crawler_name, config.crawler_version, config.contact_url, config.contact_email
    );

    Client::builder()
        .user_agent(user_agent)
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(10))
        .redirect(Policy::limited(10))
        .gzip(true)
        .brotli(true)
        .build()
}

/// Fetches the `url` of each item and stores the body
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    content_dir: PathBuf,
}

impl HttpDownloader {
    pub fn new(client: Client, content_dir: impl Into<PathBuf>) -> Self {
        Self {
            client,
            content_dir: content_dir.into(),
        }
    }

    pub fn content_dir(&self) -> &Path {
        &self.content_dir
    }

    /// Where the body of the item with `id` is stored
    pub fn output_path(&self, id: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(id.as_bytes()));
        self.content_dir.join(format!("{}.html", digest))
    }
}

#[async_trait]
impl ItemProcessor for HttpDownloader {
    async fn process(&self, item: &WorkItem) -> Result<ProcessSummary, ItemError> {
        let url = item
            .payload()
            .get("url")
            .and_then(serde_json::Value::as_str)
            .ok_or_else(|| ItemError::Malformed(format!("no url for {:?}", item.id())))?;

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(classify_request_error)?;

        let status = response.status();
        if let Some(error) = classify_status(status, response.headers()) {
            tracing::debug!("{} answered HTTP {}", url, status.as_u16());
            return Err(error);
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ItemError::Transient(format!("failed to read body: {}", e)))?;

        let path = self.output_path(item.id());
        let target = path.clone();
        tokio::task::spawn_blocking(move || write_atomic(&target, &body))
            .await
            .map_err(|e| ItemError::Transient(format!("write task failed: {}", e)))?
            .map_err(|e| ItemError::Transient(e.to_string()))?;

        Ok(ProcessSummary {
            subitems: 1,
            note: Some(path.display().to_string()),
        })
    }
}

/// Maps a non-success status to an item error; None for success
fn classify_status(status: StatusCode, headers: &HeaderMap) -> Option<ItemError> {
    if status.is_success() {
        return None;
    }

    let retry_after = parse_retry_after(headers, Utc::now());
    Some(match status {
        StatusCode::TOO_MANY_REQUESTS => ItemError::Throttled { retry_after },
        StatusCode::SERVICE_UNAVAILABLE if retry_after.is_some() => {
            ItemError::Throttled { retry_after }
        }
        StatusCode::REQUEST_TIMEOUT => ItemError::Transient(format!("HTTP {}", status.as_u16())),
        s if s.is_server_error() => ItemError::Transient(format!("HTTP {}", s.as_u16())),
        s => ItemError::Permanent(format!("HTTP {}", s.as_u16())),
    })
}

fn classify_request_error(error: reqwest::Error) -> ItemError {
    if error.is_builder() {
        ItemError::Malformed(error.to_string())
    } else if error.is_timeout() {
        ItemError::Transient("request timeout".to_string())
    } else if error.is_connect() {
        ItemError::Transient(format!("connection failed: {}", error))
    } else if error.is_redirect() {
        ItemError::Permanent(format!("redirect error: {}", error))
    } else {
        ItemError::Transient(error.to_string())
    }
}

/// Reads `Retry-After` as delta-seconds or an HTTP date
fn parse_retry_after(headers: &HeaderMap, now: DateTime<Utc>) -> Option<Duration> {
    let value = headers.get(RETRY_AFTER)?.to_str().ok()?.trim();

    if let Ok(seconds) = value.parse::<u64>() {
        return Some(Duration::from_secs(seconds));
    }

    let at = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
    Some((at - now).to_std().unwrap_or(Duration::ZERO))
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;
    use serde_json::json;
    use tempfile::TempDir;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_agent() -> UserAgentConfig {
        UserAgentConfig {
            crawler_name: "TestHarvester".to_string(),
            crawler_version: "1.0".to_string(),
            contact_url: "https://example.com/about".to_string(),
            contact_email: "admin@example.com".to_string(),
        }
    }

    fn downloader(dir: &Path) -> HttpDownloader {
        let client = build_http_client(&test_agent(), Duration::from_secs(5)).unwrap();
        HttpDownloader::new(client, dir)
    }

    fn item_for(url: String) -> WorkItem {
        WorkItem::with_payload(url.clone(), json!({ "url": url }))
    }

    #[tokio::test]
    async fn test_success_writes_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/page"))
            .and(header(
                "user-agent",
                "TestHarvester/1.0 (+https://example.com/about; admin@example.com)",
            ))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>hi</html>"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = downloader(dir.path());
        let item = item_for(format!("{}/page", server.uri()));

        let summary = downloader.process(&item).await.unwrap();

        assert_eq!(summary.subitems, 1);
        let written = std::fs::read_to_string(downloader.output_path(item.id())).unwrap();
        assert_eq!(written, "<html>hi</html>");
    }

    #[tokio::test]
    async fn test_429_is_throttled_with_hint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(429).insert_header("Retry-After", "7"))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let result = downloader(dir.path())
            .process(&item_for(format!("{}/busy", server.uri())))
            .await;

        assert_eq!(
            result,
            Err(ItemError::Throttled {
                retry_after: Some(Duration::from_secs(7))
            })
        );
    }

    #[tokio::test]
    async fn test_status_classification() {
        let server = MockServer::start().await;
        Mock::given(path("/gone"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(path("/broken"))
            .respond_with(ResponseTemplate::new(502))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let downloader = downloader(dir.path());

        let gone = downloader
            .process(&item_for(format!("{}/gone", server.uri())))
            .await;
        assert_eq!(gone, Err(ItemError::Permanent("HTTP 404".into())));

        let broken = downloader
            .process(&item_for(format!("{}/broken", server.uri())))
            .await;
        assert_eq!(broken, Err(ItemError::Transient("HTTP 502".into())));
    }

    #[tokio::test]
    async fn test_missing_url_is_malformed() {
        let dir = TempDir::new().unwrap();
        let result = downloader(dir.path())
            .process(&WorkItem::new("not-a-url"))
            .await;
        assert!(matches!(result, Err(ItemError::Malformed(_))));
    }

    #[tokio::test]
    async fn test_connection_refused_is_transient() {
        let dir = TempDir::new().unwrap();
        let result = downloader(dir.path())
            .process(&item_for("http://127.0.0.1:9/nothing".to_string()))
            .await;
        assert!(matches!(result, Err(ItemError::Transient(_))));
    }

    #[test]
    fn test_parse_retry_after() {
        let now = Utc::now();
        let mut headers = HeaderMap::new();
        assert_eq!(parse_retry_after(&headers, now), None);

        headers.insert(RETRY_AFTER, HeaderValue::from_static("120"));
        assert_eq!(parse_retry_after(&headers, now), Some(Duration::from_secs(120)));

        let later = (now + chrono::Duration::seconds(30)).to_rfc2822();
        headers.insert(RETRY_AFTER, HeaderValue::from_str(&later).unwrap());
        let parsed = parse_retry_after(&headers, now).unwrap();
        assert!(parsed <= Duration::from_secs(30) && parsed >= Duration::from_secs(29));

        headers.insert(RETRY_AFTER, HeaderValue::from_static("soon"));
        assert_eq!(parse_retry_after(&headers, now), None);
    }

    #[test]
    fn test_output_path_is_stable() {
        let downloader = downloader(Path::new("/tmp/content"));
        let a = downloader.output_path("https://example.com/1");
        assert_eq!(a, downloader.output_path("https://example.com/1"));
        assert_ne!(a, downloader.output_path("https://example.com/2"));
        assert_eq!(a.extension().unwrap(), "html");
    }
}
