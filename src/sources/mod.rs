//! Ready-made collaborators for the engine
//!
//! The engine only needs an [`ItemLister`](crate::ItemLister) and an
//! [`ItemProcessor`](crate::ItemProcessor). This module provides the pair the
//! `harvest` binary uses: a URL list on disk and an HTTP downloader.

mod http;
mod url_list;

pub use http::{build_http_client, HttpDownloader};
pub use url_list::{normalize_url, parse_url_list, UrlListLister};
