//! Content extraction functionality for the crawler module
//!
//! A page's substantive content is located by an ordered list of
//! [`ContentMatcher`] strategies. The first strategy that finds anything
//! wins; every element it returns becomes one [`ContentRegion`]. Images and
//! links are collected from inside those regions only, so navigation chrome
//! never grows the crawl.

use lol_html::{RewriteStrSettings, element, rewrite_str};
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use std::collections::{HashMap, HashSet};
use std::fmt::Debug;
use url::Url;

use crate::crawler::config::{SiteProfile, StrategyConfig};
use crate::crawler::error::CrawlError;
use crate::crawler::{ImageReference, RegionKind};

/// A strategy for locating content regions in a parsed document
pub trait ContentMatcher: Debug + Send + Sync {
    /// Record kind produced by this matcher
    fn kind(&self) -> RegionKind;

    /// Return zero or more matching regions, in document order
    fn find<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>>;
}

/// Tries CSS selectors in order; the first one with matches wins
#[derive(Debug)]
pub struct SelectorMatcher {
    kind: RegionKind,
    selectors: Vec<Selector>,
}

impl SelectorMatcher {
    /// Parse `selectors` into a matcher producing `kind` regions
    pub fn new(kind: RegionKind, selectors: &[String]) -> Result<Self, CrawlError> {
        let selectors = selectors
            .iter()
            .map(|s| parse_selector(s))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kind, selectors })
    }
}

impl ContentMatcher for SelectorMatcher {
    fn kind(&self) -> RegionKind {
        self.kind
    }

    fn find<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        for selector in &self.selectors {
            let found: Vec<_> = document.select(selector).collect();
            if !found.is_empty() {
                return outermost(found);
            }
        }
        Vec::new()
    }
}

/// Matches elements of one tag carrying a class that matches a pattern
#[derive(Debug)]
pub struct ClassPatternMatcher {
    kind: RegionKind,
    element: Selector,
    pattern: Regex,
}

impl ClassPatternMatcher {
    /// Build a matcher for `element` tags whose class list matches `pattern`
    pub fn new(kind: RegionKind, element: &str, pattern: &str) -> Result<Self, CrawlError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| CrawlError::Config(format!("invalid class pattern {}: {}", pattern, e)))?;
        Ok(Self {
            kind,
            element: parse_selector(element)?,
            pattern,
        })
    }
}

impl ContentMatcher for ClassPatternMatcher {
    fn kind(&self) -> RegionKind {
        self.kind
    }

    fn find<'a>(&self, document: &'a Html) -> Vec<ElementRef<'a>> {
        let found = document
            .select(&self.element)
            .filter(|el| el.value().classes().any(|class| self.pattern.is_match(class)))
            .collect();
        outermost(found)
    }
}

/// An image reference as found in the markup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageCandidate {
    /// The literal `src` attribute
    pub original: String,
    /// The reference resolved against the page URL, if possible
    pub absolute: Option<Url>,
}

/// One region located by a matcher
#[derive(Debug, Clone)]
pub struct ContentRegion {
    /// Kind of the matcher that found it
    pub kind: RegionKind,
    /// Position among the regions of this page
    pub index: usize,
    /// Raw outer HTML of the region
    pub html: String,
    /// Images inside the region, deduplicated by literal `src`
    pub images: Vec<ImageCandidate>,
    /// Absolute outbound links inside the region, without fragments
    pub links: Vec<Url>,
}

/// Everything extracted from one page
#[derive(Debug, Clone, Default)]
pub struct ContentResult {
    /// Text of the `<title>` element
    pub title: Option<String>,
    /// Matched regions; empty when no strategy matched
    pub regions: Vec<ContentRegion>,
}

impl ContentResult {
    /// Whether the page had no content region
    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// Outbound links of all regions, first occurrence order
    pub fn links(&self) -> Vec<Url> {
        let mut seen = HashSet::new();
        self.regions
            .iter()
            .flat_map(|region| region.links.iter())
            .filter(|url| seen.insert(url.as_str().to_string()))
            .cloned()
            .collect()
    }
}

/// Locates content regions, their images and their links
#[derive(Debug)]
pub struct Extractor {
    matchers: Vec<Box<dyn ContentMatcher>>,
    title: Selector,
    images: Selector,
    links: Selector,
}

impl Extractor {
    /// Create an extractor trying `matchers` in priority order
    pub fn new(matchers: Vec<Box<dyn ContentMatcher>>) -> Result<Self, CrawlError> {
        Ok(Self {
            matchers,
            title: parse_selector("title")?,
            images: parse_selector("img[src]")?,
            links: parse_selector("a[href]")?,
        })
    }

    /// Build the strategies configured in a site profile
    pub fn from_profile(profile: &SiteProfile) -> Result<Self, CrawlError> {
        let matchers = profile
            .content_strategies
            .iter()
            .map(|strategy| -> Result<Box<dyn ContentMatcher>, CrawlError> {
                match strategy {
                    StrategyConfig::Selector { kind, selectors } => {
                        Ok(Box::new(SelectorMatcher::new(*kind, selectors)?))
                    }
                    StrategyConfig::ClassPattern {
                        kind,
                        element,
                        pattern,
                    } => Ok(Box::new(ClassPatternMatcher::new(*kind, element, pattern)?)),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        if matchers.is_empty() {
            return Err(CrawlError::Config(
                "site profile defines no content strategies".to_string(),
            ));
        }
        Self::new(matchers)
    }

    /// Extract the content regions of `html`, resolving references against `page_url`
    pub fn extract(&self, html: &str, page_url: &Url) -> ContentResult {
        let document = Html::parse_document(html);

        let title = document
            .select(&self.title)
            .next()
            .map(|el| collapse_whitespace(&el.text().collect::<String>()))
            .filter(|t| !t.is_empty());

        let (kind, elements) = self
            .matchers
            .iter()
            .map(|matcher| (matcher.kind(), matcher.find(&document)))
            .find(|(_, found)| !found.is_empty())
            .unwrap_or((RegionKind::Content, Vec::new()));

        let regions = elements
            .into_iter()
            .enumerate()
            .map(|(index, element)| ContentRegion {
                kind,
                index,
                html: element.html(),
                images: self.collect_images(element, page_url),
                links: self.collect_links(element, page_url),
            })
            .collect();

        ContentResult { title, regions }
    }

    fn collect_images(&self, region: ElementRef<'_>, page_url: &Url) -> Vec<ImageCandidate> {
        let mut seen = HashSet::new();
        region
            .select(&self.images)
            .filter_map(|img| img.value().attr("src"))
            .filter(|src| !src.trim().is_empty())
            .filter(|src| seen.insert(src.to_string()))
            .map(|src| ImageCandidate {
                original: src.to_string(),
                absolute: page_url.join(src.trim()).ok(),
            })
            .collect()
    }

    fn collect_links(&self, region: ElementRef<'_>, page_url: &Url) -> Vec<Url> {
        let mut seen = HashSet::new();
        region
            .select(&self.links)
            .filter_map(|a| a.value().attr("href"))
            .map(str::trim)
            .filter(|href| !href.is_empty() && !href.starts_with('#'))
            .filter_map(|href| page_url.join(href).ok())
            .filter(|url| matches!(url.scheme(), "http" | "https"))
            .map(|mut url| {
                url.set_fragment(None);
                url
            })
            .filter(|url| seen.insert(url.as_str().to_string()))
            .collect()
    }
}

/// Point resolved `<img src>` attributes at their local copies
///
/// Each resolved image gets `src` replaced by its local path and a
/// `data-original-src` attribute holding the canonical remote URL.
/// Unresolved references are left exactly as they were.
pub fn rewrite_image_sources(html: &str, images: &[ImageReference]) -> Result<String, CrawlError> {
    // scraper serializes the fragment, so `src` text arrives in its escaped form
    let resolved: HashMap<String, (&str, &Url)> = images
        .iter()
        .filter_map(|image| {
            let local = image.local_path.as_deref()?;
            let remote = image.canonical_url.as_ref()?;
            Some((serialized_attr(&image.original), (local, remote)))
        })
        .collect();
    if resolved.is_empty() {
        return Ok(html.to_string());
    }

    rewrite_str(
        html,
        RewriteStrSettings {
            element_content_handlers: vec![element!("img[src]", |el| {
                if let Some(src) = el.get_attribute("src") {
                    if let Some((local, remote)) = resolved.get(&src) {
                        el.set_attribute("src", local)?;
                        el.set_attribute("data-original-src", remote.as_str())?;
                    }
                }
                Ok(())
            })],
            ..RewriteStrSettings::new()
        },
    )
    .map_err(|e| CrawlError::Rewrite(e.to_string()))
}

/// Attribute text as html5ever writes it
fn serialized_attr(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('\u{a0}', "&nbsp;")
        .replace('"', "&quot;")
}

fn parse_selector(selector: &str) -> Result<Selector, CrawlError> {
    Selector::parse(selector)
        .map_err(|e| CrawlError::Config(format!("invalid selector '{}': {}", selector, e)))
}

/// Drop matches nested inside another match
fn outermost(found: Vec<ElementRef<'_>>) -> Vec<ElementRef<'_>> {
    let ids: HashSet<_> = found.iter().map(|el| el.id()).collect();
    found
        .into_iter()
        .filter(|el| !el.ancestors().any(|ancestor| ids.contains(&ancestor.id())))
        .collect()
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
