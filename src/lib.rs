//! # gleaner - polite content-site crawler
//!
//! This crate crawls a single content website breadth-first, picks out the
//! article-like regions of each page, mirrors the images those regions use
//! and writes every region as an HTML fragment into a tree that mirrors the
//! site's routes.
//!
//! ## Features
//!
//! - Canonical URL deduplication (host aliases, trailing slashes, fragments, queries)
//! - Ordered content-region strategies configurable per site
//! - One stored copy per remote image, reused across pages and across runs
//! - Rate-limited fetching with page and depth caps
//! - Provenance comments on every written record
//! - Async API with Tokio
//!
//! ## Example
//!
//! ```rust,no_run
//! use gleaner::crawler::{Crawler, CrawlerConfig, SiteProfile};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = CrawlerConfig::builder()
//!         .site(SiteProfile::default())
//!         .output_dir("scraped_pages")
//!         .delay_secs(1.0)
//!         .build();
//!
//!     let mut crawler = Crawler::new(config).await?;
//!     let summary = crawler.run().await?;
//!
//!     println!(
//!         "{} fetched, {} skipped, {} failed",
//!         summary.fetched, summary.skipped, summary.failed
//!     );
//!     Ok(())
//! }
//! ```

mod error;

pub mod crawler;

pub use error::{Error, Result};

/// Re-export of types module for public use
pub mod prelude {
    pub use crate::crawler::{CrawlSummary, Crawler, CrawlerConfig, SiteProfile};
    pub use crate::error::Error;
    pub use crate::error::Result;
}
