//! Newline-delimited URL list as an item source
//!
//! Blank lines and lines starting with `#` are ignored. Every other line
//! becomes one work item keyed by its normalized URL. Lines that do not
//! parse as an http(s) URL are still listed, without a `url` payload, so the
//! engine's malformed-item policy decides what happens to them.

use crate::item::{ItemLister, ListingError, WorkItem};
use async_trait::async_trait;
use serde_json::json;
use std::path::{Path, PathBuf};
use url::Url;

/// Query parameters dropped during normalization
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "fbclid",
    "gclid",
];

/// Lists the URLs of a text file
#[derive(Debug, Clone)]
pub struct UrlListLister {
    path: PathBuf,
}

impl UrlListLister {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl ItemLister for UrlListLister {
    async fn list(&self) -> Result<Vec<WorkItem>, ListingError> {
        let content = tokio::fs::read_to_string(&self.path).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ListingError::Unreachable(format!("{} does not exist", self.path.display()))
            } else {
                ListingError::Io(e)
            }
        })?;

        let items = parse_url_list(&content);
        tracing::debug!("Read {} entries from {}", items.len(), self.path.display());
        Ok(items)
    }
}

/// Turns the text of a URL list into work items, in file order
pub fn parse_url_list(content: &str) -> Vec<WorkItem> {
    content
        .lines()
        .enumerate()
        .filter_map(|(index, line)| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }

            let line_no = index + 1;
            Some(match normalize_url(line) {
                Some(url) => WorkItem::with_payload(
                    url.as_str(),
                    json!({ "url": url.as_str(), "line": line_no }),
                ),
                None => {
                    tracing::debug!("Line {} is not an http(s) URL: {}", line_no, line);
                    WorkItem::with_payload(line, json!({ "line": line_no }))
                }
            })
        })
        .collect()
}

/// Normalizes a URL so that trivially different spellings share one id
///
/// Lowercases scheme and host (done by the parser), drops the fragment and
/// tracking parameters, and sorts the remaining query parameters. Returns
/// None for anything that is not an http(s) URL with a host.
pub fn normalize_url(raw: &str) -> Option<Url> {
    let mut url = Url::parse(raw).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }

    url.set_fragment(None);

    let mut params: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(key, _)| !TRACKING_PARAMS.contains(&key.as_ref()))
        .map(|(key, value)| (key.into_owned(), value.into_owned()))
        .collect();

    if params.is_empty() {
        url.set_query(None);
    } else {
        params.sort();
        url.query_pairs_mut().clear().extend_pairs(params);
    }

    Some(url)
}
