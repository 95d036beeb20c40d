//! Error types for the crawler module

use crate::error::Error as CrateError;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Error type for a single page or asset fetch
#[derive(Debug, Error)]
pub enum FetchError {
    /// Transport-level failure (connection refused, reset, body read, ...)
    #[error("HTTP error: {0}")]
    Http(#[source] reqwest::Error),

    /// The request did not complete within the configured timeout
    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    /// The server answered with a non-2xx status
    #[error("Unexpected status: {0}")]
    Status(u16),

    /// The response was not of the expected media type
    #[error("Unexpected content type: {0}")]
    ContentType(String),
}

/// Error type for crawler operations
#[derive(Debug, Error)]
pub enum CrawlError {
    /// Fetching a page failed; the entry is recorded as failed
    #[error("Fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// Downloading an image failed; the reference is left unresolved
    #[error("Asset download failed for {url}: {reason}")]
    AssetDownload {
        /// Canonical remote URL of the image
        url: String,
        /// Human-readable failure reason
        reason: String,
    },

    /// An image reference that cannot be turned into a downloadable URL
    #[error("Unsupported image reference: {0}")]
    UnsupportedImage(String),

    /// Writing an output file failed
    #[error("Write error for {}: {source}", path.display())]
    Write {
        /// Path that could not be written
        path: PathBuf,
        /// Underlying IO error
        #[source]
        source: std::io::Error,
    },

    /// Rewriting a fragment's markup failed
    #[error("HTML rewrite error: {0}")]
    Rewrite(String),

    /// Invalid configuration; fatal at startup
    #[error("Configuration error: {0}")]
    Config(String),

    /// URL parsing error
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// IO error outside of record writing
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error (site profile, asset manifest, activity log)
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Other errors
    #[error("{0}")]
    Other(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => FetchError::Status(status.as_u16()),
            None => FetchError::Http(err),
        }
    }
}

impl From<CrawlError> for CrateError {
    fn from(err: CrawlError) -> Self {
        match err {
            CrawlError::Fetch(FetchError::Http(e)) => CrateError::Http(e),
            CrawlError::Config(msg) => CrateError::Config(msg),
            CrawlError::Io(e) => CrateError::Io(e),
            CrawlError::Json(e) => CrateError::Json(e),
            CrawlError::UrlParse(e) => CrateError::Other(format!("URL parse error: {}", e)),
            _ => CrateError::Crawl(err.to_string()),
        }
    }
}
