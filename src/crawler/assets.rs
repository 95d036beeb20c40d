//! Image asset store
//!
//! Images are identified by their canonical remote URL, never by the page
//! that references them. However many pages point at an image, and however
//! they spell the reference, the store downloads it once, keeps one copy on
//! disk and hands every caller the same local path.
//!
//! The index is persisted to `images/manifest.json` so a later run reuses
//! earlier downloads without touching the network.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use tokio::fs;
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::crawler::error::{CrawlError, FetchError};
use crate::crawler::normalizer::UrlFilter;
use crate::crawler::writer::write_atomic;

/// Directory under the output root holding every stored image
pub const IMAGES_DIR: &str = "images";

const MANIFEST_FILE: &str = "manifest.json";

/// Raw image bytes as downloaded
#[derive(Debug, Clone)]
pub struct FetchedAsset {
    /// URL that was requested
    pub url: Url,
    /// Content-Type header, empty when absent
    pub content_type: String,
    /// Response body
    pub bytes: Vec<u8>,
}

/// Something that can download an image
pub trait AssetSource {
    /// Download the resource at `url`
    fn fetch_asset(
        &self,
        url: &Url,
    ) -> impl Future<Output = Result<FetchedAsset, FetchError>> + Send;
}

/// One stored image
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Canonical remote URL
    pub url: Url,
    /// Path relative to the output root, `/`-separated
    pub local_path: String,
    /// Content type reported by the server
    pub content_type: String,
    /// Size of the stored file
    pub bytes: u64,
    /// When the image was downloaded
    pub downloaded_at: DateTime<Utc>,
}

/// Result of resolving one image reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAsset {
    /// Canonical remote URL
    pub url: Url,
    /// Path relative to the output root
    pub local_path: String,
    /// True when the entry already existed and no request was made
    pub cached: bool,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct Manifest {
    assets: Vec<AssetEntry>,
}

/// Content-addressed-by-origin image cache rooted in the output directory
#[derive(Debug)]
pub struct AssetStore {
    root: PathBuf,
    filter: UrlFilter,
    index: HashMap<String, AssetEntry>,
    failed: HashMap<String, String>,
}

impl AssetStore {
    /// Open the store under `root`, loading a previous run's manifest
    ///
    /// Manifest entries whose file is gone are dropped so the image is
    /// downloaded again when next referenced.
    pub async fn open(root: impl Into<PathBuf>, filter: UrlFilter) -> Result<Self, CrawlError> {
        let root = root.into();
        let mut store = Self {
            root,
            filter,
            index: HashMap::new(),
            failed: HashMap::new(),
        };

        let manifest_path = store.manifest_path();
        if !fs::try_exists(&manifest_path).await? {
            return Ok(store);
        }

        let raw = fs::read_to_string(&manifest_path).await?;
        let manifest: Manifest = match serde_json::from_str(&raw) {
            Ok(manifest) => manifest,
            Err(e) => {
                warn!("Ignoring unreadable asset manifest {}: {}", manifest_path.display(), e);
                Manifest::default()
            }
        };

        for entry in manifest.assets {
            if fs::try_exists(store.root.join(&entry.local_path)).await? {
                store.index.insert(entry.url.as_str().to_string(), entry);
            } else {
                debug!("Dropping manifest entry with missing file: {}", entry.local_path);
            }
        }
        info!("Loaded {} stored images", store.index.len());
        Ok(store)
    }

    /// Look up the entry for a canonical URL
    pub fn get(&self, url: &Url) -> Option<&AssetEntry> {
        self.index.get(url.as_str())
    }

    /// Number of stored images
    pub fn len(&self) -> usize {
        self.index.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    /// Iterate over all entries
    pub fn entries(&self) -> impl Iterator<Item = &AssetEntry> {
        self.index.values()
    }

    /// Resolve an image reference found on `page_url` to a stored copy
    ///
    /// A known canonical URL returns immediately without any request. A URL
    /// that already failed during this run fails again without a request.
    #[instrument(skip(self, source), fields(page = %page_url))]
    pub async fn resolve<S: AssetSource>(
        &mut self,
        source: &S,
        image_ref: &str,
        page_url: &Url,
    ) -> Result<ResolvedAsset, CrawlError> {
        let url = self
            .filter
            .canonical_asset_url(image_ref, page_url)
            .ok_or_else(|| CrawlError::UnsupportedImage(image_ref.to_string()))?;
        let key = url.as_str().to_string();

        if let Some(entry) = self.index.get(&key) {
            debug!("Reusing stored image {} -> {}", key, entry.local_path);
            return Ok(ResolvedAsset {
                url,
                local_path: entry.local_path.clone(),
                cached: true,
            });
        }
        if let Some(reason) = self.failed.get(&key) {
            return Err(CrawlError::AssetDownload {
                url: key,
                reason: reason.clone(),
            });
        }

        let asset = match source.fetch_asset(&url).await {
            Ok(asset) => asset,
            Err(e) => return Err(self.remember_failure(key, e.to_string())),
        };
        if !is_image_content_type(&asset.content_type) {
            let reason = format!("unexpected content type '{}'", asset.content_type);
            return Err(self.remember_failure(key, reason));
        }

        let local_path = self.unique_local_path(&url);
        let full_path = self.root.join(&local_path);
        write_atomic(&full_path, &asset.bytes)
            .await
            .map_err(|source| CrawlError::Write {
                path: full_path.clone(),
                source,
            })?;

        let entry = AssetEntry {
            url: url.clone(),
            local_path: local_path.clone(),
            content_type: asset.content_type,
            bytes: asset.bytes.len() as u64,
            downloaded_at: Utc::now(),
        };
        self.index.insert(key, entry);
        if let Err(e) = self.persist_manifest().await {
            warn!("Failed to persist asset manifest: {}", e);
        }

        info!("Downloaded image: {} -> {}", url, local_path);
        Ok(ResolvedAsset {
            url,
            local_path,
            cached: false,
        })
    }

    /// Deterministic storage path for a canonical image URL
    ///
    /// Target-site images mirror their remote path under `images/`; images
    /// from other hosts live under `images/_external/<host>/`. A query string
    /// or a sanitized filename adds a short hash of the full URL so distinct
    /// URLs keep distinct files.
    pub fn local_path_for(&self, url: &Url) -> String {
        let tag = short_hash(url.as_str());
        let mut parts = vec![IMAGES_DIR.to_string()];

        if !self.filter.is_site_host(url) {
            parts.push("_external".to_string());
            let host = match url.port() {
                Some(port) => format!("{}_{}", url.host_str().unwrap_or("unknown"), port),
                None => url.host_str().unwrap_or("unknown").to_string(),
            };
            parts.push(sanitize_segment(&host));
        }

        let path = url.path();
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        let (dirs, file) = if path.ends_with('/') || segments.is_empty() {
            (segments.as_slice(), None)
        } else {
            (&segments[..segments.len() - 1], segments.last().copied())
        };
        parts.extend(dirs.iter().map(|dir| sanitize_segment(dir)));

        let file_name = match file {
            None => format!("image-{}.bin", tag),
            Some(raw) => {
                let clean = sanitize_segment(raw);
                if url.query().is_some() || clean != raw {
                    with_tag(&clean, &tag)
                } else {
                    clean
                }
            }
        };
        parts.push(file_name);
        parts.join("/")
    }

    fn unique_local_path(&self, url: &Url) -> String {
        let candidate = self.local_path_for(url);
        let taken = self
            .index
            .values()
            .any(|entry| entry.local_path == candidate && entry.url != *url);
        if taken {
            let (dir, file) = candidate.rsplit_once('/').unwrap_or(("", candidate.as_str()));
            let tagged = with_tag(file, &short_hash(url.as_str()));
            warn!("Storage path {} already used by another image; using {}", candidate, tagged);
            format!("{}/{}", dir, tagged)
        } else {
            candidate
        }
    }

    fn remember_failure(&mut self, key: String, reason: String) -> CrawlError {
        warn!("Failed to download image {}: {}", key, reason);
        self.failed.insert(key.clone(), reason.clone());
        CrawlError::AssetDownload { url: key, reason }
    }

    fn manifest_path(&self) -> PathBuf {
        self.root.join(IMAGES_DIR).join(MANIFEST_FILE)
    }

    async fn persist_manifest(&self) -> Result<(), CrawlError> {
        let mut assets: Vec<AssetEntry> = self.index.values().cloned().collect();
        assets.sort_by(|a, b| a.url.as_str().cmp(b.url.as_str()));
        let json = serde_json::to_vec_pretty(&Manifest { assets })?;
        write_atomic(&self.manifest_path(), &json).await?;
        Ok(())
    }

    /// Root directory of the output tree
    pub fn root(&self) -> &Path {
        &self.root
    }
}

fn is_image_content_type(content_type: &str) -> bool {
    let content_type = content_type.to_ascii_lowercase();
    content_type.starts_with("image/") || content_type.starts_with("application/octet-stream")
}

fn short_hash(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    digest.iter().take(5).map(|b| format!("{:02x}", b)).collect()
}

fn sanitize_segment(segment: &str) -> String {
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

fn with_tag(file: &str, tag: &str) -> String {
    match file.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, tag, ext),
        _ => format!("{}-{}", file, tag),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::config::SiteProfile;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Serves canned responses and counts requests
    #[derive(Default)]
    struct FakeSource {
        calls: AtomicUsize,
        requested: Mutex<Vec<String>>,
        responses: HashMap<String, Result<(&'static str, Vec<u8>), u16>>,
    }

    impl FakeSource {
        fn with(mut self, url: &str, response: Result<(&'static str, Vec<u8>), u16>) -> Self {
            self.responses.insert(url.to_string(), response);
            self
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AssetSource for FakeSource {
        async fn fetch_asset(&self, url: &Url) -> Result<FetchedAsset, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.requested.lock().unwrap().push(url.to_string());
            match self.responses.get(url.as_str()) {
                Some(Ok((content_type, bytes))) => Ok(FetchedAsset {
                    url: url.clone(),
                    content_type: content_type.to_string(),
                    bytes: bytes.clone(),
                }),
                Some(Err(status)) => Err(FetchError::Status(*status)),
                None => Err(FetchError::Status(404)),
            }
        }
    }

    fn filter() -> UrlFilter {
        let profile = SiteProfile {
            host_aliases: vec!["www.site.example".to_string()],
            ..SiteProfile::for_base_url("https://site.example")
        };
        UrlFilter::new(&profile).unwrap()
    }

    fn page(url: &str) -> Url {
        Url::parse(url).unwrap()
    }

    #[tokio::test]
    async fn test_different_spellings_share_one_entry() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default().with(
            "https://site.example/img/x.png",
            Ok(("image/png", b"png-bytes".to_vec())),
        );
        let mut store = AssetStore::open(dir.path(), filter()).await.unwrap();

        let first = store
            .resolve(&source, "../img/x.png", &page("https://site.example/about/a"))
            .await
            .unwrap();
        let second = store
            .resolve(&source, "./img/x.png", &page("https://www.site.example/b"))
            .await
            .unwrap();

        assert_eq!(first.local_path, "images/img/x.png");
        assert_eq!(first.local_path, second.local_path);
        assert!(!first.cached);
        assert!(second.cached);
        assert_eq!(store.len(), 1);
        assert_eq!(source.calls(), 1);

        let stored = std::fs::read(dir.path().join("images/img/x.png")).unwrap();
        assert_eq!(stored, b"png-bytes");
    }

    #[tokio::test]
    async fn test_case_variants_share_one_entry_on_case_insensitive_site() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default().with(
            "https://site.example/img/x.png",
            Ok(("image/png", b"png-bytes".to_vec())),
        );
        let profile = SiteProfile {
            case_insensitive_paths: true,
            ..SiteProfile::for_base_url("https://site.example")
        };
        let filter = UrlFilter::new(&profile).unwrap();
        let mut store = AssetStore::open(dir.path(), filter).await.unwrap();
        let home = page("https://site.example/");

        let first = store.resolve(&source, "/Img/X.png", &home).await.unwrap();
        let second = store.resolve(&source, "/img//x.png", &home).await.unwrap();

        assert_eq!(first.local_path, second.local_path);
        assert!(second.cached);
        assert_eq!(store.len(), 1);
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_cache_hit_makes_no_request() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default().with(
            "https://site.example/logo.gif",
            Ok(("image/gif", vec![1, 2, 3])),
        );
        let mut store = AssetStore::open(dir.path(), filter()).await.unwrap();
        let home = page("https://site.example/");

        store.resolve(&source, "/logo.gif", &home).await.unwrap();
        for _ in 0..3 {
            let again = store.resolve(&source, "logo.gif", &home).await.unwrap();
            assert!(again.cached);
        }
        assert_eq!(source.calls(), 1);
    }

    #[tokio::test]
    async fn test_failures_leave_reference_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default()
            .with("https://site.example/broken.png", Err(500))
            .with(
                "https://site.example/page.png",
                Ok(("text/html", b"<html></html>".to_vec())),
            );
        let mut store = AssetStore::open(dir.path(), filter()).await.unwrap();
        let home = page("https://site.example/");

        let broken = store.resolve(&source, "/broken.png", &home).await;
        assert!(matches!(broken, Err(CrawlError::AssetDownload { .. })));

        let not_image = store.resolve(&source, "/page.png", &home).await;
        match not_image {
            Err(CrawlError::AssetDownload { reason, .. }) => assert!(reason.contains("text/html")),
            other => panic!("expected AssetDownload, got {:?}", other),
        }

        // known failures are not retried within the run
        let again = store.resolve(&source, "broken.png", &home).await;
        assert!(matches!(again, Err(CrawlError::AssetDownload { .. })));
        assert_eq!(source.calls(), 2);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_inline_images_are_unsupported() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default();
        let mut store = AssetStore::open(dir.path(), filter()).await.unwrap();

        let result = store
            .resolve(&source, "data:image/png;base64,AAAA", &page("https://site.example/"))
            .await;
        assert!(matches!(result, Err(CrawlError::UnsupportedImage(_))));
        assert_eq!(source.calls(), 0);
    }

    #[tokio::test]
    async fn test_local_path_derivation() {
        let dir = tempfile::tempdir().unwrap();
        let store = AssetStore::open(dir.path(), filter()).await.unwrap();
        let path = |url: &str| store.local_path_for(&page(url));

        assert_eq!(path("https://site.example/img/x.png"), "images/img/x.png");
        assert_eq!(
            path("https://cdn.example.net/pics/a.jpg"),
            "images/_external/cdn.example.net/pics/a.jpg"
        );

        let versioned = path("https://site.example/img/x.png?v=2");
        assert!(versioned.starts_with("images/img/x-"));
        assert!(versioned.ends_with(".png"));
        assert_ne!(versioned, path("https://site.example/img/x.png?v=3"));

        let spaced = path("https://site.example/my%20pic.png");
        assert!(spaced.starts_with("images/my_20pic-"));

        let bare = path("https://site.example/gallery/");
        assert!(bare.starts_with("images/gallery/image-"));
        assert!(bare.ends_with(".bin"));

        // identical input, identical output
        assert_eq!(path("https://site.example/a/b.png"), path("https://site.example/a/b.png"));
    }

    #[tokio::test]
    async fn test_manifest_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let source = FakeSource::default().with(
            "https://site.example/img/x.png",
            Ok(("image/png", b"png".to_vec())),
        );
        let home = page("https://site.example/");

        {
            let mut store = AssetStore::open(dir.path(), filter()).await.unwrap();
            store.resolve(&source, "/img/x.png", &home).await.unwrap();
        }

        let mut reopened = AssetStore::open(dir.path(), filter()).await.unwrap();
        assert_eq!(reopened.len(), 1);
        let resolved = reopened.resolve(&source, "img/x.png", &home).await.unwrap();
        assert!(resolved.cached);
        assert_eq!(source.calls(), 1);

        std::fs::remove_file(dir.path().join("images/img/x.png")).unwrap();
        let pruned = AssetStore::open(dir.path(), filter()).await.unwrap();
        assert!(pruned.is_empty());
    }
}
