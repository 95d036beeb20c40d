//! Breadth-first URL frontier
//!
//! A FIFO queue of [`FrontierEntry`] values plus the [`VisitedSet`] of every
//! canonical URL that has ever been queued. Membership is permanent for the
//! run, so a URL is consumed at most once.

use std::collections::{HashSet, VecDeque};
use url::Url;

/// A pending URL and the number of link hops from its seed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrontierEntry {
    /// Canonical URL to fetch
    pub url: Url,
    /// Hops from the seed set (seeds are depth 0)
    pub depth: u32,
}

/// Canonical URLs already queued or fetched
#[derive(Debug, Clone, Default)]
pub struct VisitedSet {
    seen: HashSet<String>,
}

impl VisitedSet {
    /// Check whether `url` has been seen
    pub fn contains(&self, url: &Url) -> bool {
        self.seen.contains(url.as_str())
    }

    /// Mark `url` as seen; returns `false` if it already was
    pub fn insert(&mut self, url: &Url) -> bool {
        self.seen.insert(url.as_str().to_string())
    }

    /// Number of URLs seen
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Iterate over the seen URLs in no particular order
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.seen.iter().map(String::as_str)
    }
}

/// FIFO frontier with permanent deduplication
#[derive(Debug, Default)]
pub struct Frontier {
    queue: VecDeque<FrontierEntry>,
    visited: VisitedSet,
}

impl Frontier {
    /// Create an empty frontier
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `url` at `depth` unless it was seen before
    pub fn push(&mut self, url: Url, depth: u32) -> bool {
        if !self.visited.insert(&url) {
            return false;
        }
        self.queue.push_back(FrontierEntry { url, depth });
        true
    }

    /// Record `url` as seen without queueing it; returns `false` if it already was
    pub fn mark_visited(&mut self, url: &Url) -> bool {
        self.visited.insert(url)
    }

    /// Take the oldest pending entry
    pub fn pop(&mut self) -> Option<FrontierEntry> {
        self.queue.pop_front()
    }

    /// Number of pending entries
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Whether nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// The visited set, for admission checks
    pub fn visited(&self) -> &VisitedSet {
        &self.visited
    }
}
