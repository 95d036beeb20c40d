//! # Site Crawler Module
//!
//! This module crawls one content website breadth-first, extracts the
//! article-like regions of each page, mirrors the images those regions
//! reference and writes every region to an output tree that mirrors the
//! site's routes.
//!
//! ## Key Components
//!
//! - `CrawlerConfig` / `SiteProfile`: run options and the description of the target site
//! - `UrlFilter`: canonicalizes and classifies URLs
//! - `Extractor`: ordered content-region strategies
//! - `AssetStore`: one stored copy per canonical remote image URL
//! - `PageWriter`: maps routes to files and writes provenance comments
//! - `Crawler`: the state machine tying them together
//!
//! ## Features
//!
//! - Breadth-first traversal with permanent deduplication of canonical URLs
//! - Rate limiting between page fetches, page caps, depth caps and a seed-only mode
//! - Per-page and per-image failure isolation; nothing short of bad
//!   configuration aborts a run
//! - Append-only activity log of every frontier entry's outcome
//!
//! ## Usage
//!
//! ```rust,no_run
//! use gleaner::crawler::{Crawler, CrawlerConfig};
//!
//! # async fn run() -> Result<(), gleaner::crawler::CrawlError> {
//! let config = CrawlerConfig::builder()
//!     .output_dir("scraped_pages")
//!     .delay_secs(1.0)
//!     .max_pages(Some(50))
//!     .build();
//!
//! let summary = Crawler::new(config).await?.run().await?;
//! println!("fetched {} pages", summary.fetched);
//! # Ok(())
//! # }
//! ```

mod activity;
mod assets;
mod config;
mod engine;
mod error;
mod extraction;
mod fetcher;
mod frontier;
mod normalizer;
mod writer;

// Re-export important types and functions
pub use activity::{ActivityLog, ActivityRecord, Outcome};
pub use assets::{AssetEntry, AssetSource, AssetStore, FetchedAsset, ResolvedAsset};
pub use config::{
    CrawlerConfig, CrawlerConfigBuilder, SiteProfile, StrategyConfig, default_seeds, read_seeds_file,
};
pub use engine::{CrawlEvent, CrawlState, CrawlSummary, Crawler};
pub use error::{CrawlError, FetchError};
pub use extraction::{
    ClassPatternMatcher, ContentMatcher, ContentRegion, ContentResult, Extractor, ImageCandidate,
    SelectorMatcher, rewrite_image_sources,
};
pub use fetcher::{FetchedPage, Fetcher};
pub use frontier::{Frontier, FrontierEntry, VisitedSet};
pub use normalizer::{Rejection, UrlClass, UrlFilter};
pub use writer::PageWriter;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

/// Which kind of content region a record came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegionKind {
    /// The page's main article container
    Content,
    /// One entry of a blog-style listing
    BlogEntry,
}

/// An image referenced by a content region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    /// The `src` exactly as it appeared in the page
    pub original: String,

    /// Canonical remote URL, when the reference could be resolved to one
    pub canonical_url: Option<Url>,

    /// Path of the stored copy relative to the output root
    pub local_path: Option<String>,
}

impl ImageReference {
    /// Whether a local copy exists for this reference
    pub fn is_resolved(&self) -> bool {
        self.local_path.is_some()
    }
}

/// One extracted content region, ready to persist
#[derive(Debug, Clone)]
pub struct PageRecord {
    /// Canonical URL of the page the region came from
    pub source_url: Url,

    /// Region kind
    pub kind: RegionKind,

    /// Position among regions of the same kind on the page
    pub index: usize,

    /// Output file relative to the output root
    pub output_path: PathBuf,

    /// Title of the page
    pub title: Option<String>,

    /// Region markup with image sources rewritten to local paths
    pub html: String,

    /// Images referenced by the region
    pub images: Vec<ImageReference>,

    /// Outbound links found inside the region
    pub links: Vec<Url>,

    /// When the page was fetched
    pub fetched_at: DateTime<Utc>,
}
