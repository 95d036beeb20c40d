//! Output tree for extracted records
//!
//! Each page route becomes a directory under the output root; each content
//! region becomes one file in it, prefixed with provenance comments.

use std::collections::HashSet;
use std::io;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument};
use url::Url;

use crate::crawler::activity::ACTIVITY_FILE;
use crate::crawler::assets::IMAGES_DIR;
use crate::crawler::error::CrawlError;
use crate::crawler::{PageRecord, RegionKind};

const CONTENT_LEAF: &str = "item-page";
const BLOG_LEAF: &str = "blogpost";
/// Directory of the site root; no escaped route can produce it
const ROOT_ROUTE: &str = "_index";

/// Writes [`PageRecord`]s under an output root
#[derive(Debug, Clone)]
pub struct PageWriter {
    root: PathBuf,
}

impl PageWriter {
    /// Create a writer rooted at `root`
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The output root
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a page route, relative to the root
    ///
    /// The site root maps to `_index`. A first segment that starts with `_`
    /// or names an entry the crawler keeps at the root (`images`, the
    /// activity log) gets one more leading `_`, so page routes never share
    /// a path with those. A kept query string is folded into the last
    /// directory name so distinct query variants stay apart.
    pub fn route_dir(url: &Url) -> PathBuf {
        let mut segments: Vec<String> = url
            .path()
            .split('/')
            .filter(|s| !s.is_empty())
            .map(sanitize)
            .collect();
        match segments.first_mut() {
            Some(first) => {
                if first.starts_with('_') || is_reserved(first) {
                    first.insert(0, '_');
                }
            }
            None => segments.push(ROOT_ROUTE.to_string()),
        }
        if let Some(query) = url.query().filter(|q| !q.is_empty()) {
            if let Some(last) = segments.last_mut() {
                last.push('_');
                last.push_str(&sanitize(query));
            }
        }
        segments.iter().collect()
    }

    /// Output path of a region, relative to the root
    pub fn relative_path(url: &Url, kind: RegionKind, index: usize) -> PathBuf {
        Self::route_dir(url).join(leaf_name(kind, index))
    }

    /// Write one record atomically and return its absolute path
    #[instrument(skip(self, record), fields(url = %record.source_url, path = %record.output_path.display()))]
    pub async fn write(&self, record: &PageRecord) -> Result<PathBuf, CrawlError> {
        let path = self.root.join(&record.output_path);

        let mut document = String::with_capacity(record.html.len() + 256);
        document.push_str(&format!("<!-- Source: {} -->\n", record.source_url));
        document.push_str(&format!("<!-- Scraped: {} -->\n", record.fetched_at.to_rfc3339()));
        if let Some(title) = record.title.as_deref().map(comment_safe).filter(|t| !t.is_empty()) {
            document.push_str(&format!("<!-- Title: {} -->\n", title));
        }
        document.push_str(&record.html);
        if !record.html.ends_with('\n') {
            document.push('\n');
        }

        write_atomic(&path, document.as_bytes())
            .await
            .map_err(|source| CrawlError::Write {
                path: path.clone(),
                source,
            })?;

        info!("Saved {}", path.display());
        Ok(path)
    }

    /// Remove record files for `url`'s route that this run did not produce
    ///
    /// `written` holds the relative paths just written for the page. Only
    /// files named like records are touched; nested routes are left alone.
    pub async fn prune_stale(&self, url: &Url, written: &[PathBuf]) -> Result<usize, CrawlError> {
        let dir = self.root.join(Self::route_dir(url));
        if !fs::try_exists(&dir).await? {
            return Ok(0);
        }

        let keep: HashSet<PathBuf> = written.iter().map(|p| self.root.join(p)).collect();
        let mut removed = 0;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_record = path
                .file_name()
                .and_then(|name| name.to_str())
                .is_some_and(is_record_file);
            if !is_record || keep.contains(&path) || !entry.file_type().await?.is_file() {
                continue;
            }
            fs::remove_file(&path).await?;
            debug!("Removed stale record {}", path.display());
            removed += 1;
        }
        Ok(removed)
    }
}

/// Write `bytes` to `path` through a sibling temp file and a rename
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "path has no file name"))?;
    let temp = path.with_file_name(format!(".{}.part", file_name));

    fs::write(&temp, bytes).await?;
    if let Err(e) = fs::rename(&temp, path).await {
        let _ = fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

fn leaf_name(kind: RegionKind, index: usize) -> String {
    match (kind, index) {
        (RegionKind::Content, 0) => format!("{}.html", CONTENT_LEAF),
        (RegionKind::Content, n) => format!("{}-{}.html", CONTENT_LEAF, n + 1),
        (RegionKind::BlogEntry, n) => format!("{}-{}.html", BLOG_LEAF, n + 1),
    }
}

fn is_record_file(name: &str) -> bool {
    let Some(stem) = name.strip_suffix(".html") else {
        return false;
    };
    if stem == CONTENT_LEAF {
        return true;
    }
    [CONTENT_LEAF, BLOG_LEAF].iter().any(|leaf| {
        stem.strip_prefix(leaf)
            .and_then(|rest| rest.strip_prefix('-'))
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
    })
}

fn is_reserved(segment: &str) -> bool {
    [IMAGES_DIR, ACTIVITY_FILE]
        .iter()
        .any(|name| segment.eq_ignore_ascii_case(name))
}

fn sanitize(segment: &str) -> String {
    if segment == "." || segment == ".." {
        return "_".to_string();
    }
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

// "--" may not appear inside an HTML comment
fn comment_safe(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");
    while out.contains("--") {
        out = out.replace("--", "- -");
    }
    out.trim_end_matches('-').trim().to_string()
}
