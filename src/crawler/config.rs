//! # Crawler Configuration Module
//!
//! This module provides configuration options for the crawler: the run
//! parameters (seeds, output root, politeness delay, page cap) and the
//! [`SiteProfile`] describing the target site itself.
//!
//! ## Key Components
//!
//! - `CrawlerConfig`: The main configuration struct with crawler parameters
//! - `CrawlerConfigBuilder`: Builder pattern implementation for easier configuration
//! - `SiteProfile`: Host aliases, exclusion rules, content strategies and seeds,
//!   loadable from a JSON file
//!
//! ## Features
//!
//! - Default configuration suitable for polite crawling of reactome.org
//! - Fine-grained control over crawl behavior (pages, depth, delay, seed-only)
//! - Content selection via ordered strategies (CSS selectors or class patterns)
//! - Exclusion rules for API endpoints, tool applications and non-document files

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::crawler::CrawlError;
use crate::crawler::RegionKind;

/// Default timeout for page and image requests in seconds
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// How a content region is located inside a fetched page
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategyConfig {
    /// CSS selectors tried in order; the first one with matches wins
    Selector {
        /// Record kind produced by this strategy
        kind: RegionKind,
        /// CSS selectors, highest priority first
        selectors: Vec<String>,
    },

    /// Elements of `element` carrying a class that matches `pattern`
    ClassPattern {
        /// Record kind produced by this strategy
        kind: RegionKind,
        /// Tag name to inspect, e.g. `div`
        element: String,
        /// Regular expression matched against each individual class
        pattern: String,
    },
}

/// Description of the site being crawled
///
/// Fields missing from a profile file take the built-in rules, except the
/// site-specific `host_aliases` and `seeds`, which start empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SiteProfile {
    /// Scheme, host and port every canonical URL is pinned to
    pub base_url: String,

    /// Other host names serving the same site (e.g. `www.` variants)
    #[serde(default)]
    pub host_aliases: Vec<String>,

    /// Whether paths should be lower-cased during normalization
    pub case_insensitive_paths: bool,

    /// Query parameters that select different content and must be kept
    pub preserved_query_params: Vec<String>,

    /// Path prefixes never crawled (compared case-insensitively)
    pub excluded_path_prefixes: Vec<String>,

    /// Regular expressions matched against the URL path and query
    pub excluded_patterns: Vec<String>,

    /// File extensions that denote non-document resources
    pub skipped_extensions: Vec<String>,

    /// Content-region strategies in priority order
    pub content_strategies: Vec<StrategyConfig>,

    /// Seed URLs used when none are given on the command line
    #[serde(default)]
    pub seeds: Vec<String>,
}

impl Default for SiteProfile {
    fn default() -> Self {
        Self {
            base_url: "https://reactome.org".to_string(),
            host_aliases: vec!["www.reactome.org".to_string()],
            case_insensitive_paths: false,
            preserved_query_params: Vec::new(),
            excluded_path_prefixes: [
                "/ContentService",
                "/AnalysisService",
                "/PathwayBrowser",
                "/download",
                "/icon-lib",
                "/gsa",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            excluded_patterns: vec![
                r"(?i)/(login|logout|register|reset|remind)(/|$)".to_string(),
                r"(?i)/component/(users|search|finder)".to_string(),
                r"(?i)[?&](task|option)=com_(users|search|finder)".to_string(),
            ],
            skipped_extensions: [
                "pdf", "png", "jpg", "jpeg", "gif", "svg", "css", "js", "zip", "tar", "gz", "xml",
                "json",
            ]
            .into_iter()
            .map(String::from)
            .collect(),
            content_strategies: vec![
                StrategyConfig::Selector {
                    kind: RegionKind::Content,
                    selectors: vec!["div.item-page".to_string()],
                },
                StrategyConfig::Selector {
                    kind: RegionKind::BlogEntry,
                    selectors: vec![
                        r#"div[itemprop="blogPost"]"#.to_string(),
                        r#"div[itemprop="blogpost"]"#.to_string(),
                    ],
                },
                StrategyConfig::ClassPattern {
                    kind: RegionKind::BlogEntry,
                    element: "div".to_string(),
                    pattern: r"^leading-\d+$".to_string(),
                },
            ],
            seeds: default_seeds(),
        }
    }
}

impl SiteProfile {
    /// Load a profile from a JSON file; missing fields take their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CrawlError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            CrawlError::Config(format!("cannot read site profile {}: {}", path.display(), e))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            CrawlError::Config(format!("invalid site profile {}: {}", path.display(), e))
        })
    }

    /// A profile for an arbitrary site with the default rules and no seeds
    pub fn for_base_url(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            host_aliases: Vec::new(),
            seeds: Vec::new(),
            ..Self::default()
        }
    }
}

/// Configuration for the crawler
#[derive(Debug, Clone)]
pub struct CrawlerConfig {
    /// Description of the target site
    pub site: SiteProfile,

    /// Seed URLs; the profile's seeds are used when empty
    pub seeds: Vec<String>,

    /// Root of the output tree
    pub output_dir: PathBuf,

    /// Minimum delay between consecutive page fetches, in seconds
    pub delay_secs: f64,

    /// Maximum number of page fetch attempts (`None` = unbounded)
    pub max_pages: Option<u32>,

    /// Maximum discovery depth (`None` = unbounded, seeds are depth 0)
    pub max_depth: Option<u32>,

    /// Only fetch the seeds, never follow discovered links
    pub seed_only: bool,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,

    /// User agent to use for requests
    pub user_agent: String,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            site: SiteProfile::default(),
            seeds: Vec::new(),
            output_dir: PathBuf::from("scraped_pages"),
            delay_secs: 1.0,
            max_pages: None,
            max_depth: None,
            seed_only: false,
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            user_agent: format!(
                "Mozilla/5.0 (compatible; gleaner/{}; +https://crates.io/crates/gleaner)",
                env!("CARGO_PKG_VERSION")
            ),
        }
    }
}

/// Builder for CrawlerConfig
#[derive(Debug, Default)]
pub struct CrawlerConfigBuilder {
    config: CrawlerConfig,
}

impl CrawlerConfigBuilder {
    /// Create a new builder with default configuration
    pub fn new() -> Self {
        Self {
            config: CrawlerConfig::default(),
        }
    }

    /// Set the site profile
    pub fn site(mut self, site: SiteProfile) -> Self {
        self.config.site = site;
        self
    }

    /// Set the seed URLs
    pub fn seeds<I, S>(mut self, seeds: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.seeds = seeds.into_iter().map(Into::into).collect();
        self
    }

    /// Set the output directory
    pub fn output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = output_dir.into();
        self
    }

    /// Set the delay between page fetches in seconds
    pub fn delay_secs(mut self, delay_secs: f64) -> Self {
        self.config.delay_secs = delay_secs;
        self
    }

    /// Set the maximum number of pages to fetch
    pub fn max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.config.max_pages = max_pages;
        self
    }

    /// Set the maximum discovery depth
    pub fn max_depth(mut self, max_depth: Option<u32>) -> Self {
        self.config.max_depth = max_depth;
        self
    }

    /// Only fetch the seed URLs
    pub fn seed_only(mut self, seed_only: bool) -> Self {
        self.config.seed_only = seed_only;
        self
    }

    /// Set the per-request timeout in seconds
    pub fn request_timeout_secs(mut self, secs: u64) -> Self {
        self.config.request_timeout_secs = secs;
        self
    }

    /// Set the user agent to use for requests
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = user_agent.into();
        self
    }

    /// Build the configuration
    pub fn build(self) -> CrawlerConfig {
        self.config
    }
}

impl CrawlerConfig {
    /// Create a new builder
    pub fn builder() -> CrawlerConfigBuilder {
        CrawlerConfigBuilder::new()
    }

    /// Get the delay between page fetches as a Duration
    pub fn delay(&self) -> Duration {
        Duration::try_from_secs_f64(self.delay_secs).unwrap_or(Duration::ZERO)
    }

    /// Get the request timeout as a Duration
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// The seeds this run starts from
    pub fn effective_seeds(&self) -> &[String] {
        if self.seeds.is_empty() {
            &self.site.seeds
        } else {
            &self.seeds
        }
    }

    /// Check the options that do not need the network or the filesystem
    pub fn validate(&self) -> Result<(), CrawlError> {
        if !self.delay_secs.is_finite() || self.delay_secs < 0.0 {
            return Err(CrawlError::Config(format!(
                "delay must be a non-negative number of seconds, got {}",
                self.delay_secs
            )));
        }
        if self.max_pages == Some(0) {
            return Err(CrawlError::Config(
                "max pages must be a positive integer".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(CrawlError::Config(
                "request timeout must be at least one second".to_string(),
            ));
        }
        if self.effective_seeds().is_empty() {
            return Err(CrawlError::Config("seed list is empty".to_string()));
        }
        Ok(())
    }
}

/// Read a seed list: one URL per line, blank lines and `#` comments ignored
pub fn read_seeds_file(path: impl AsRef<Path>) -> Result<Vec<String>, CrawlError> {
    let path = path.as_ref();
    let raw = std::fs::read_to_string(path).map_err(|e| {
        CrawlError::Config(format!("cannot read seeds file {}: {}", path.display(), e))
    })?;
    Ok(raw
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(String::from)
        .collect())
}

/// Pages linked from the reactome.org navigation menus
pub fn default_seeds() -> Vec<String> {
    [
        "",
        "/what-is-reactome",
        "/about/news",
        "/about/team",
        "/sab",
        "/about/funding",
        "/about/editorial-calendar",
        "/about/release-calendar",
        "/about/statistics",
        "/about/logo",
        "/license",
        "/about/privacy-notice",
        "/about/disclaimer",
        "/about/digital-preservation",
        "/staff",
        "/about/contact-us",
        "/content/toc",
        "/content/doi",
        "/content/schema",
        "/content/reactome-research-spotlight",
        "/orcid",
        "/covid-19",
        "/documentation",
        "/userguide",
        "/userguide/pathway-browser",
        "/userguide/searching",
        "/userguide/details-panel",
        "/userguide/analysis",
        "/userguide/diseases",
        "/userguide/cytomics",
        "/userguide/review-status",
        "/userguide/reactome-fiviz",
        "/dev",
        "/dev/graph-database",
        "/dev/analysis",
        "/dev/content-service",
        "/dev/pathways-overview",
        "/dev/diagram",
        "/icon-info",
        "/icon-info/ehld-specs-guideline",
        "/icon-info/icons-guidelines",
        "/documentation/data-model",
        "/documentation/curator-guide",
        "/documentation/release-documentation",
        "/documentation/inferred-events",
        "/documentation/faq",
        "/linking-to-us",
        "/cite",
        "/tools/reactome-fiviz",
        "/tools/site-search",
        "/community",
        "/community/collaboration",
        "/community/outreach",
        "/community/events",
        "/community/publications",
        "/community/partners",
        "/content/contributors",
        "/community/resources",
    ]
    .into_iter()
    .map(|path| format!("https://reactome.org{}", path))
    .collect()
}
