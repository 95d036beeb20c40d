//! URL canonicalization and classification
//!
//! Every URL the crawler touches passes through [`UrlFilter`]. Page links are
//! pinned to the target site's scheme and host so that spelling variants
//! (`www.` aliases, trailing slashes, fragments, tracking queries) collapse
//! onto one canonical crawl target. Image references get a lighter treatment
//! in [`UrlFilter::canonical_asset_url`]: the query is kept because it may
//! select a different resource.

use regex::Regex;
use thiserror::Error;
use url::Url;

use crate::crawler::config::SiteProfile;
use crate::crawler::error::CrawlError;
use crate::crawler::frontier::VisitedSet;

/// Link prefixes that never point at a fetchable document
const IGNORED_SCHEMES: &[&str] = &["javascript:", "mailto:", "tel:", "data:"];

/// Why a raw link was not admitted to the frontier
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    /// Empty or fragment-only link
    #[error("empty link")]
    Empty,

    /// Not an http(s) link
    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    /// Could not be resolved against the page URL
    #[error("invalid URL: {0}")]
    Invalid(String),

    /// Points at another host
    #[error("external host: {0}")]
    External(String),

    /// Non-document resource (image, archive, stylesheet, ...)
    #[error("non-document resource")]
    Asset,

    /// Matches an exclusion rule
    #[error("excluded by rule {0}")]
    Excluded(String),

    /// Already queued or fetched during this run
    #[error("already visited")]
    AlreadyVisited,
}

/// Classification of a canonical, on-site URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UrlClass {
    /// A page worth fetching
    Content,
    /// A file with a skipped extension
    Asset,
    /// Matches an excluded prefix or pattern; carries the rule
    Excluded(String),
}

/// Canonicalizes and classifies URLs for one target site
#[derive(Debug, Clone)]
pub struct UrlFilter {
    base: Url,
    host: String,
    aliases: Vec<String>,
    case_insensitive: bool,
    preserved_params: Vec<String>,
    excluded_prefixes: Vec<String>,
    excluded_patterns: Vec<Regex>,
    skipped_extensions: Vec<String>,
}

impl UrlFilter {
    /// Build a filter from a site profile
    pub fn new(profile: &SiteProfile) -> Result<Self, CrawlError> {
        let base = Url::parse(&profile.base_url).map_err(|e| {
            CrawlError::Config(format!("invalid base URL {}: {}", profile.base_url, e))
        })?;
        if !matches!(base.scheme(), "http" | "https") {
            return Err(CrawlError::Config(format!(
                "base URL must be http or https: {}",
                profile.base_url
            )));
        }
        let host = base
            .host_str()
            .ok_or_else(|| CrawlError::Config(format!("base URL has no host: {}", base)))?
            .to_ascii_lowercase();

        let excluded_patterns = profile
            .excluded_patterns
            .iter()
            .map(|p| {
                Regex::new(p)
                    .map_err(|e| CrawlError::Config(format!("invalid exclusion pattern {}: {}", p, e)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            base,
            host,
            aliases: profile
                .host_aliases
                .iter()
                .map(|h| h.to_ascii_lowercase())
                .collect(),
            case_insensitive: profile.case_insensitive_paths,
            preserved_params: profile.preserved_query_params.clone(),
            excluded_prefixes: profile
                .excluded_path_prefixes
                .iter()
                .map(|p| p.to_ascii_lowercase())
                .collect(),
            excluded_patterns,
            skipped_extensions: profile
                .skipped_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        })
    }

    /// The site's base URL
    pub fn base(&self) -> &Url {
        &self.base
    }

    /// Whether `url` is served by the target site
    pub fn is_site_host(&self, url: &Url) -> bool {
        let Some(host) = url.host_str() else {
            return false;
        };
        let host = host.to_ascii_lowercase();
        if host == self.host {
            return url.port().is_none() || url.port() == self.base.port();
        }
        self.aliases.contains(&host)
    }

    /// Resolve `raw` against `base` and return its canonical form
    ///
    /// Pure function of its inputs: `normalize(normalize(u)) == normalize(u)`.
    pub fn normalize(&self, raw: &str, base: &Url) -> Result<Url, Rejection> {
        let url = resolve(raw, base)?;
        if !self.is_site_host(&url) {
            return Err(Rejection::External(
                url.host_str().unwrap_or_default().to_string(),
            ));
        }
        Ok(self.canonicalize(&url))
    }

    /// Classify a canonical on-site URL
    pub fn classify(&self, url: &Url) -> UrlClass {
        let path = url.path().to_ascii_lowercase();

        if let Some(prefix) = self
            .excluded_prefixes
            .iter()
            .find(|prefix| path.starts_with(prefix.as_str()))
        {
            return UrlClass::Excluded(prefix.clone());
        }

        let target = match url.query() {
            Some(query) => format!("{}?{}", url.path(), query),
            None => url.path().to_string(),
        };
        if let Some(pattern) = self.excluded_patterns.iter().find(|re| re.is_match(&target)) {
            return UrlClass::Excluded(pattern.as_str().to_string());
        }

        let last = path.rsplit('/').next().unwrap_or_default();
        if let Some((_, ext)) = last.rsplit_once('.') {
            if self.skipped_extensions.iter().any(|skip| skip == ext) {
                return UrlClass::Asset;
            }
        }

        UrlClass::Content
    }

    /// Normalize, classify and check against the visited set in one step
    pub fn admit(&self, raw: &str, base: &Url, visited: &VisitedSet) -> Result<Url, Rejection> {
        let url = self.normalize(raw, base)?;
        match self.classify(&url) {
            UrlClass::Content => {}
            UrlClass::Asset => return Err(Rejection::Asset),
            UrlClass::Excluded(rule) => return Err(Rejection::Excluded(rule)),
        }
        if visited.contains(&url) {
            return Err(Rejection::AlreadyVisited);
        }
        Ok(url)
    }

    /// Canonical remote URL of an image reference found on `page`
    ///
    /// Returns `None` for inline `data:` images and references that cannot
    /// be resolved to an http(s) URL.
    pub fn canonical_asset_url(&self, raw: &str, page: &Url) -> Option<Url> {
        let mut url = resolve(raw, page).ok()?;
        url.set_fragment(None);
        if !self.is_site_host(&url) {
            return Some(url);
        }

        // the query is kept whole: it usually selects a rendition
        let mut canonical = self.base.clone();
        canonical.set_path(&self.canonical_path(url.path()));
        canonical.set_query(url.query());
        canonical.set_fragment(None);
        Some(canonical)
    }

    /// Collapse empty segments and fold case when the site ignores it
    fn canonical_path(&self, path: &str) -> String {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let path = format!("/{}", segments.join("/"));
        if self.case_insensitive {
            path.to_lowercase()
        } else {
            path
        }
    }

    fn canonicalize(&self, url: &Url) -> Url {
        let mut canonical = self.base.clone();
        canonical.set_path(&self.canonical_path(url.path()));
        canonical.set_fragment(None);
        canonical.set_query(None);

        if !self.preserved_params.is_empty() {
            let mut kept: Vec<(String, String)> = url
                .query_pairs()
                .filter(|(key, _)| self.preserved_params.iter().any(|p| p == key))
                .map(|(key, value)| (key.into_owned(), value.into_owned()))
                .collect();
            kept.sort();
            if !kept.is_empty() {
                canonical.query_pairs_mut().extend_pairs(kept);
            }
        }

        canonical
    }
}

/// Resolve a raw link against a base URL, rejecting non-http(s) targets
fn resolve(raw: &str, base: &Url) -> Result<Url, Rejection> {
    let raw = raw.trim();
    if raw.is_empty() || raw.starts_with('#') {
        return Err(Rejection::Empty);
    }

    let lower = raw.to_ascii_lowercase();
    if let Some(scheme) = IGNORED_SCHEMES.iter().find(|s| lower.starts_with(*s)) {
        return Err(Rejection::UnsupportedScheme(
            scheme.trim_end_matches(':').to_string(),
        ));
    }

    let url = base
        .join(raw)
        .map_err(|e| Rejection::Invalid(format!("{}: {}", raw, e)))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(Rejection::UnsupportedScheme(other.to_string())),
    }
}
