//! The crawl loop
//!
//! [`Crawler`] owns every piece of mutable crawl state: the frontier and its
//! visited set, the asset store, the output writer and the activity log.
//! One entry is processed at a time; the fetcher's rate limiter spaces the
//! page requests.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use tokio::fs;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, instrument, warn};
use url::Url;

use crate::crawler::activity::{ActivityLog, ActivityRecord, Outcome};
use crate::crawler::assets::AssetStore;
use crate::crawler::config::CrawlerConfig;
use crate::crawler::error::CrawlError;
use crate::crawler::extraction::{ContentRegion, Extractor, rewrite_image_sources};
use crate::crawler::fetcher::Fetcher;
use crate::crawler::frontier::{Frontier, FrontierEntry, VisitedSet};
use crate::crawler::normalizer::{UrlClass, UrlFilter};
use crate::crawler::writer::PageWriter;
use crate::crawler::{ImageReference, PageRecord};

/// Lifecycle of a crawl
///
/// `Idle → Running → (Draining | MaxPagesReached | Error) → Stopped`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    /// Constructed, not yet started
    Idle,
    /// Processing frontier entries
    Running,
    /// The frontier ran empty
    Draining,
    /// The page cap was reached
    MaxPagesReached,
    /// The run was interrupted
    Error,
    /// Finished
    Stopped,
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CrawlState::Idle => "idle",
            CrawlState::Running => "running",
            CrawlState::Draining => "draining",
            CrawlState::MaxPagesReached => "max pages reached",
            CrawlState::Error => "interrupted",
            CrawlState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Counters reported at the end of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    /// The state the run left `Running` through
    pub state: CrawlState,
    /// Pages fetched with at least one record written
    pub fetched: usize,
    /// Pages fetched with nothing to keep
    pub skipped: usize,
    /// Pages whose fetch or write failed
    pub failed: usize,
    pub records_written: usize,
    pub assets_downloaded: usize,
    pub assets_reused: usize,
    /// Image references left pointing at the remote URL
    pub assets_failed: usize,
}

impl Default for CrawlSummary {
    fn default() -> Self {
        Self {
            state: CrawlState::Idle,
            fetched: 0,
            skipped: 0,
            failed: 0,
            records_written: 0,
            assets_downloaded: 0,
            assets_reused: 0,
            assets_failed: 0,
        }
    }
}

/// Progress notifications for an observer
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    StateChanged(CrawlState),
    PageStarted {
        url: Url,
        depth: u32,
        /// Entries still waiting after this one
        queued: usize,
    },
    PageFinished {
        url: Url,
        outcome: Outcome,
        records: usize,
    },
}

/// Breadth-first crawler for one site
#[derive(Debug)]
pub struct Crawler {
    config: CrawlerConfig,
    filter: UrlFilter,
    extractor: Extractor,
    fetcher: Fetcher,
    assets: AssetStore,
    writer: PageWriter,
    activity: ActivityLog,
    frontier: Frontier,
    state: CrawlState,
    summary: CrawlSummary,
    attempts: u32,
    progress: Option<mpsc::Sender<CrawlEvent>>,
    cancel: Option<watch::Receiver<bool>>,
}

impl Crawler {
    /// Prepare a crawl
    ///
    /// Fails with [`CrawlError::Config`] when the configuration is invalid,
    /// a seed is not a crawlable page of the target site, or the output
    /// root cannot be written.
    pub async fn new(config: CrawlerConfig) -> Result<Self, CrawlError> {
        config.validate()?;
        let filter = UrlFilter::new(&config.site)?;
        let extractor = Extractor::from_profile(&config.site)?;

        let mut frontier = Frontier::new();
        for seed in config.effective_seeds() {
            // a blank seed means the site root
            let raw = if seed.trim().is_empty() { "/" } else { seed.as_str() };
            let url = filter
                .normalize(raw, filter.base())
                .map_err(|e| CrawlError::Config(format!("invalid seed '{}': {}", seed, e)))?;
            if let class @ (UrlClass::Asset | UrlClass::Excluded(_)) = filter.classify(&url) {
                return Err(CrawlError::Config(format!(
                    "seed {} is not a content page ({:?})",
                    url, class
                )));
            }
            if !frontier.push(url.clone(), 0) {
                debug!("Duplicate seed collapsed: {}", url);
            }
        }

        let root = config.output_dir.clone();
        ensure_writable(&root).await?;

        let fetcher = Fetcher::from_config(&config)?;
        let assets = AssetStore::open(&root, filter.clone()).await?;
        let writer = PageWriter::new(&root);
        let activity = ActivityLog::open(&root).await?;

        info!(
            "Prepared crawl of {} with {} seeds into {}",
            filter.base(),
            frontier.len(),
            root.display()
        );

        Ok(Self {
            config,
            filter,
            extractor,
            fetcher,
            assets,
            writer,
            activity,
            frontier,
            state: CrawlState::Idle,
            summary: CrawlSummary::default(),
            attempts: 0,
            progress: None,
            cancel: None,
        })
    }

    /// Report progress on `sender`
    pub fn with_progress(mut self, sender: mpsc::Sender<CrawlEvent>) -> Self {
        self.progress = Some(sender);
        self
    }

    /// Stop between entries once `cancel` turns `true`
    pub fn with_cancellation(mut self, cancel: watch::Receiver<bool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn state(&self) -> CrawlState {
        self.state
    }

    /// Every canonical URL queued so far
    pub fn visited(&self) -> &VisitedSet {
        self.frontier.visited()
    }

    pub fn summary(&self) -> &CrawlSummary {
        &self.summary
    }

    pub fn assets(&self) -> &AssetStore {
        &self.assets
    }

    /// Process the frontier until it drains, the page cap is hit or the
    /// run is cancelled
    ///
    /// Per-page and per-image failures are recorded and never abort the run.
    #[instrument(skip(self), fields(site = %self.filter.base()))]
    pub async fn run(&mut self) -> Result<CrawlSummary, CrawlError> {
        if self.state != CrawlState::Idle {
            return Err(CrawlError::Other(format!(
                "crawl already {}; create a new crawler to run again",
                self.state
            )));
        }
        self.transition(CrawlState::Running).await;

        let exit = loop {
            if self.cancelled() {
                warn!("Crawl interrupted with {} entries pending", self.frontier.len());
                break CrawlState::Error;
            }
            if self.frontier.is_empty() {
                break CrawlState::Draining;
            }
            if self.page_cap_reached() {
                info!("Reached maximum of {} pages", self.attempts);
                break CrawlState::MaxPagesReached;
            }
            let Some(entry) = self.frontier.pop() else {
                break CrawlState::Draining;
            };

            self.attempts += 1;
            self.emit(CrawlEvent::PageStarted {
                url: entry.url.clone(),
                depth: entry.depth,
                queued: self.frontier.len(),
            })
            .await;

            let record = self.process(&entry).await;
            match record.outcome {
                Outcome::Fetched => self.summary.fetched += 1,
                Outcome::Skipped => self.summary.skipped += 1,
                Outcome::Failed => self.summary.failed += 1,
            }
            if let Err(e) = self.activity.append(&record).await {
                warn!("Failed to append to activity log: {}", e);
            }
            self.emit(CrawlEvent::PageFinished {
                url: entry.url,
                outcome: record.outcome,
                records: record.records,
            })
            .await;
        };

        self.transition(exit).await;
        self.summary.state = exit;
        self.transition(CrawlState::Stopped).await;

        info!(
            "Crawl finished ({}): {} fetched, {} skipped, {} failed, {} records, {} images downloaded, {} reused, {} failed",
            exit,
            self.summary.fetched,
            self.summary.skipped,
            self.summary.failed,
            self.summary.records_written,
            self.summary.assets_downloaded,
            self.summary.assets_reused,
            self.summary.assets_failed
        );
        Ok(self.summary.clone())
    }

    async fn process(&mut self, entry: &FrontierEntry) -> ActivityRecord {
        info!("Scraping: {}", entry.url);

        let page = match self.fetcher.fetch_page(&entry.url).await {
            Ok(page) => page,
            Err(e) => {
                warn!("Failed to fetch {}: {}", entry.url, e);
                return ActivityRecord::new(&entry.url, entry.depth, Outcome::Failed)
                    .with_reason(e.to_string());
            }
        };
        if let Some(target) = self.redirect_target(&entry.url, &page.url) {
            if !self.frontier.mark_visited(&target) {
                info!("{} redirects to already visited {}", entry.url, target);
                return ActivityRecord::new(&entry.url, entry.depth, Outcome::Skipped)
                    .with_reason(format!("redirects to already visited {}", target));
            }
            debug!("{} redirected to {}", entry.url, target);
        }
        if !page.is_html() {
            debug!("Skipping non-HTML {} ({})", entry.url, page.content_type);
            return ActivityRecord::new(&entry.url, entry.depth, Outcome::Skipped)
                .with_reason(format!("content type '{}'", page.content_type));
        }

        let content = self.extractor.extract(&page.body, &page.url);
        if content.is_empty() {
            debug!("No content region on {}", entry.url);
            return ActivityRecord::new(&entry.url, entry.depth, Outcome::Skipped)
                .with_reason("no content region");
        }

        let mut written: Vec<PathBuf> = Vec::new();
        let mut write_error = None;
        for region in &content.regions {
            let images = self.resolve_images(region, &page.url).await;
            let html = rewrite_image_sources(&region.html, &images).unwrap_or_else(|e| {
                warn!("Keeping remote image sources for {}: {}", entry.url, e);
                region.html.clone()
            });
            let record = PageRecord {
                source_url: entry.url.clone(),
                kind: region.kind,
                index: region.index,
                output_path: PageWriter::relative_path(&entry.url, region.kind, region.index),
                title: content.title.clone(),
                html,
                images,
                links: region.links.clone(),
                fetched_at: page.fetched_at,
            };
            match self.writer.write(&record).await {
                Ok(_) => {
                    self.summary.records_written += 1;
                    written.push(record.output_path);
                }
                Err(e) => {
                    warn!("Failed to write record for {}: {}", entry.url, e);
                    write_error = Some(e);
                }
            }
        }

        if write_error.is_none() {
            match self.writer.prune_stale(&entry.url, &written).await {
                Ok(0) => {}
                Ok(n) => info!("Removed {} stale records for {}", n, entry.url),
                Err(e) => warn!("Failed to prune stale records for {}: {}", entry.url, e),
            }
        }

        let queued = self.enqueue_links(&content.links(), &page.url, entry.depth);
        debug!("Queued {} new links from {}", queued, entry.url);

        match write_error {
            Some(e) => ActivityRecord::new(&entry.url, entry.depth, Outcome::Failed)
                .with_reason(e.to_string())
                .with_records(written.len()),
            None => ActivityRecord::new(&entry.url, entry.depth, Outcome::Fetched)
                .with_records(written.len()),
        }
    }

    async fn resolve_images(&mut self, region: &ContentRegion, page_url: &Url) -> Vec<ImageReference> {
        let mut images = Vec::with_capacity(region.images.len());
        for candidate in &region.images {
            let reference = match self
                .assets
                .resolve(&self.fetcher, &candidate.original, page_url)
                .await
            {
                Ok(resolved) => {
                    if resolved.cached {
                        self.summary.assets_reused += 1;
                    } else {
                        self.summary.assets_downloaded += 1;
                    }
                    ImageReference {
                        original: candidate.original.clone(),
                        canonical_url: Some(resolved.url),
                        local_path: Some(resolved.local_path),
                    }
                }
                Err(e) => {
                    match e {
                        CrawlError::UnsupportedImage(_) => debug!("{}", e),
                        _ => {
                            self.summary.assets_failed += 1;
                            debug!("Leaving image unresolved: {}", e);
                        }
                    }
                    ImageReference {
                        original: candidate.original.clone(),
                        canonical_url: self.filter.canonical_asset_url(&candidate.original, page_url),
                        local_path: None,
                    }
                }
            };
            images.push(reference);
        }
        images
    }

    /// Admit outbound links at `depth + 1`; returns how many were queued
    fn enqueue_links(&mut self, links: &[Url], page_url: &Url, depth: u32) -> usize {
        if self.config.seed_only || self.page_cap_reached() {
            return 0;
        }
        let next_depth = depth + 1;
        if self.config.max_depth.is_some_and(|max| next_depth > max) {
            return 0;
        }

        let mut queued = 0;
        for link in links {
            match self.filter.admit(link.as_str(), page_url, self.frontier.visited()) {
                Ok(url) => {
                    if self.frontier.push(url, next_depth) {
                        queued += 1;
                    }
                }
                Err(rejection) => debug!("Not following {}: {}", link, rejection),
            }
        }
        queued
    }

    /// Canonical on-site URL a fetch ended up at, when it differs from the request
    fn redirect_target(&self, requested: &Url, final_url: &Url) -> Option<Url> {
        if requested == final_url {
            return None;
        }
        let target = self.filter.normalize(final_url.as_str(), final_url).ok()?;
        (target != *requested && self.filter.classify(&target) == UrlClass::Content).then_some(target)
    }

    fn page_cap_reached(&self) -> bool {
        self.config.max_pages.is_some_and(|max| self.attempts >= max)
    }

    fn cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|rx| *rx.borrow())
    }

    async fn transition(&mut self, state: CrawlState) {
        debug!("Crawl state {} -> {}", self.state, state);
        self.state = state;
        self.emit(CrawlEvent::StateChanged(state)).await;
    }

    async fn emit(&self, event: CrawlEvent) {
        if let Some(sender) = &self.progress {
            // a dropped receiver only means nobody is watching
            let _ = sender.send(event).await;
        }
    }
}

async fn ensure_writable(root: &std::path::Path) -> Result<(), CrawlError> {
    let unwritable = |e: std::io::Error| {
        CrawlError::Config(format!(
            "output directory {} is not writable: {}",
            root.display(),
            e
        ))
    };
    fs::create_dir_all(root).await.map_err(unwritable)?;
    let check = root.join(".gleaner-write-check");
    fs::write(&check, b"").await.map_err(unwritable)?;
    fs::remove_file(&check).await.map_err(unwritable)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::config::SiteProfile;
    use mockito::{Matcher, Server, ServerGuard};
    use std::path::Path;

    const PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

    fn config(server: &ServerGuard, output: &Path, seeds: &[&str]) -> CrawlerConfig {
        CrawlerConfig::builder()
            .site(SiteProfile::for_base_url(server.url()))
            .seeds(seeds.iter().copied())
            .output_dir(output)
            .delay_secs(0.0)
            .request_timeout_secs(5)
            .build()
    }

    async fn html_page(server: &mut ServerGuard, path: &str, body: &str) -> mockito::Mock {
        server
            .mock("GET", path)
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body(body)
            .create_async()
            .await
    }

    fn item_page(inner: &str) -> String {
        format!(
            "<html><head><title>Test</title></head><body><nav><a href=\"/nav-only\">nav</a></nav>\
             <div class=\"item-page\">{}</div></body></html>",
            inner
        )
    }

    #[tokio::test]
    async fn test_shared_image_is_downloaded_once() {
        let mut server = Server::new_async().await;
        let _a = html_page(
            &mut server,
            "/about/a",
            &item_page(r#"<p>A</p><img src="../img/x.png"><a href="/b">next</a>"#),
        )
        .await;
        let _b = html_page(&mut server, "/b", &item_page(r#"<p>B</p><img src="./img/x.png">"#)).await;
        let image = server
            .mock("GET", "/img/x.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(PNG)
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/about/a"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        image.assert_async().await;
        assert_eq!(summary.state, CrawlState::Draining);
        assert_eq!(crawler.state(), CrawlState::Stopped);
        assert_eq!(summary.fetched, 2);
        assert_eq!(summary.assets_downloaded, 1);
        assert_eq!(summary.assets_reused, 1);
        assert_eq!(crawler.assets().len(), 1);

        let stored = std::fs::read(dir.path().join("images/img/x.png")).unwrap();
        assert_eq!(stored, PNG);
        for record in ["about/a/item-page.html", "b/item-page.html"] {
            let text = std::fs::read_to_string(dir.path().join(record)).unwrap();
            assert!(text.contains(r#"src="images/img/x.png""#), "{}: {}", record, text);
            assert!(text.contains("data-original-src="));
        }
        // links outside content regions are never followed
        assert!(!crawler.visited().iter().any(|u| u.ends_with("/nav-only")));
    }

    #[tokio::test]
    async fn test_server_error_is_recorded_and_crawl_continues() {
        let mut server = Server::new_async().await;
        let _broken = server
            .mock("GET", "/broken")
            .with_status(500)
            .create_async()
            .await;
        let _ok = html_page(&mut server, "/ok", &item_page("<p>fine</p>")).await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/broken", "/ok"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.fetched, 1);
        assert!(!dir.path().join("broken").exists());
        assert!(dir.path().join("ok/item-page.html").exists());

        let log = ActivityLog::read_all(&dir.path().join(crate::crawler::activity::ACTIVITY_FILE))
            .await
            .unwrap();
        assert_eq!(log.len(), 2);
        assert_eq!(log[0].outcome, Outcome::Failed);
        assert_eq!(log[0].reason.as_deref(), Some("Unexpected status: 500"));
        assert_eq!(log[1].outcome, Outcome::Fetched);
    }

    #[tokio::test]
    async fn test_page_without_region_is_skipped() {
        let mut server = Server::new_async().await;
        let _plain = html_page(
            &mut server,
            "/plain",
            "<html><body><p>nothing</p><a href=\"/other\">x</a></body></html>",
        )
        .await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/plain"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records_written, 0);
        assert!(!dir.path().join("plain").exists());
        assert_eq!(crawler.visited().len(), 1);
    }

    #[tokio::test]
    async fn test_seed_only_visits_exactly_the_seeds() {
        let mut server = Server::new_async().await;
        let _one = html_page(&mut server, "/one", &item_page(r#"<a href="/deeper">d</a>"#)).await;
        let _two = html_page(&mut server, "/two", &item_page(r#"<a href="/deeper2">d</a>"#)).await;
        let deeper = server
            .mock("GET", Matcher::Regex("^/deeper".to_string()))
            .expect(0)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(&server, dir.path(), &["/one", "/two", "/one/"]);
        cfg.seed_only = true;
        let mut crawler = Crawler::new(cfg).await.unwrap();
        let summary = crawler.run().await.unwrap();

        deeper.assert_async().await;
        assert_eq!(summary.fetched, 2);
        let mut visited: Vec<&str> = crawler.visited().iter().collect();
        visited.sort();
        assert_eq!(visited.len(), 2);
        assert!(visited[0].ends_with("/one"));
        assert!(visited[1].ends_with("/two"));
    }

    #[tokio::test]
    async fn test_max_pages_caps_fetch_attempts() {
        let mut server = Server::new_async().await;
        let links: String = (1..=5).map(|i| format!(r#"<a href="/p{}">p</a>"#, i)).collect();
        let _root = html_page(&mut server, "/start", &item_page(&links)).await;
        let pages = server
            .mock("GET", Matcher::Regex(r"^/p\d$".to_string()))
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(item_page("<p>leaf</p>"))
            .expect(2)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlerConfig {
            max_pages: Some(3),
            ..config(&server, dir.path(), &["/start"])
        };
        let mut crawler = Crawler::new(cfg).await.unwrap();
        let summary = crawler.run().await.unwrap();

        pages.assert_async().await;
        assert_eq!(summary.state, CrawlState::MaxPagesReached);
        assert_eq!(summary.fetched + summary.skipped + summary.failed, 3);
    }

    #[tokio::test]
    async fn test_url_variants_are_fetched_once() {
        let mut server = Server::new_async().await;
        let body = item_page(
            r#"<a href="/target">1</a><a href="/target/">2</a><a href="/target#top">3</a>
               <a href="/target?utm_source=x">4</a><a href="/files/report.pdf">pdf</a>"#,
        );
        let _start = html_page(&mut server, "/", &body).await;
        let target = server
            .mock("GET", "/target")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(item_page("<p>target</p>"))
            .expect(1)
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &[""])).await.unwrap();
        let summary = crawler.run().await.unwrap();

        target.assert_async().await;
        assert_eq!(summary.fetched, 2);
        assert_eq!(crawler.visited().len(), 2);
        assert!(dir.path().join("_index/item-page.html").exists());
    }

    #[tokio::test]
    async fn test_redirect_target_is_not_fetched_again() {
        let mut server = Server::new_async().await;
        let target = format!("{}/new", server.url());
        let _old = server
            .mock("GET", "/old")
            .with_status(301)
            .with_header("location", &target)
            .create_async()
            .await;
        let new = server
            .mock("GET", "/new")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body(item_page(r#"<a href="/new">here</a><a href="/other">other</a>"#))
            .expect(1)
            .create_async()
            .await;
        let _other = html_page(&mut server, "/other", &item_page(r#"<a href="/new/">back</a>"#)).await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/old"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        new.assert_async().await;
        assert_eq!(summary.fetched, 2);
        assert!(crawler.visited().iter().any(|u| u.ends_with("/new")));
        assert!(dir.path().join("old/item-page.html").exists());
        assert!(!dir.path().join("new").exists());
    }

    #[tokio::test]
    async fn test_redirect_to_visited_page_is_skipped() {
        let mut server = Server::new_async().await;
        let target = format!("{}/new", server.url());
        let _old = server
            .mock("GET", "/old")
            .with_status(302)
            .with_header("location", &target)
            .create_async()
            .await;
        let _new = html_page(&mut server, "/new", &item_page("<p>moved here</p>")).await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/new", "/old"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.skipped, 1);
        assert_eq!(summary.records_written, 1);
        assert!(dir.path().join("new/item-page.html").exists());
        assert!(!dir.path().join("old").exists());
    }

    #[tokio::test]
    async fn test_broken_images_leave_record_intact() {
        let mut server = Server::new_async().await;
        let _page = html_page(
            &mut server,
            "/gallery",
            &item_page(r#"<p>Gallery</p><img src="/missing.png"><img src="/fake.png">"#),
        )
        .await;
        let _missing = server
            .mock("GET", "/missing.png")
            .with_status(404)
            .create_async()
            .await;
        let _fake = server
            .mock("GET", "/fake.png")
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html>not an image</html>")
            .create_async()
            .await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/gallery"]))
            .await
            .unwrap();
        let summary = crawler.run().await.unwrap();

        assert_eq!(summary.fetched, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(summary.records_written, 1);
        assert_eq!(summary.assets_downloaded, 0);
        assert_eq!(summary.assets_failed, 2);
        assert!(crawler.assets().is_empty());

        let text = std::fs::read_to_string(dir.path().join("gallery/item-page.html")).unwrap();
        assert!(text.contains(r#"src="/missing.png""#), "{}", text);
        assert!(text.contains(r#"src="/fake.png""#), "{}", text);
        assert!(!text.contains("data-original-src"));

        let log = ActivityLog::read_all(&dir.path().join(crate::crawler::activity::ACTIVITY_FILE))
            .await
            .unwrap();
        assert_eq!(log[0].outcome, Outcome::Fetched);
    }

    #[tokio::test]
    async fn test_max_depth_limits_link_following() {
        let mut server = Server::new_async().await;
        let _d0 = html_page(&mut server, "/d0", &item_page(r#"<a href="/d1">1</a>"#)).await;
        let _d1 = html_page(&mut server, "/d1", &item_page(r#"<a href="/d2">2</a>"#)).await;
        let d2 = server.mock("GET", "/d2").expect(0).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let cfg = CrawlerConfig {
            max_depth: Some(1),
            ..config(&server, dir.path(), &["/d0"])
        };
        let mut crawler = Crawler::new(cfg).await.unwrap();
        let summary = crawler.run().await.unwrap();

        d2.assert_async().await;
        assert_eq!(summary.fetched, 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_before_next_entry() {
        let mut server = Server::new_async().await;
        let any = server.mock("GET", Matcher::Any).expect(0).create_async().await;

        let dir = tempfile::tempdir().unwrap();
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (progress_tx, mut progress_rx) = mpsc::channel(16);
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/a", "/b"]))
            .await
            .unwrap()
            .with_cancellation(cancel_rx)
            .with_progress(progress_tx);
        cancel_tx.send(true).unwrap();

        let summary = crawler.run().await.unwrap();
        any.assert_async().await;
        assert_eq!(summary.state, CrawlState::Error);

        drop(crawler);
        let mut states = Vec::new();
        while let Some(event) = progress_rx.recv().await {
            if let CrawlEvent::StateChanged(state) = event {
                states.push(state);
            }
        }
        assert_eq!(
            states,
            vec![CrawlState::Running, CrawlState::Error, CrawlState::Stopped]
        );
    }

    #[tokio::test]
    async fn test_invalid_seeds_are_configuration_errors() {
        let server = Server::new_async().await;
        let dir = tempfile::tempdir().unwrap();

        let external = Crawler::new(config(&server, dir.path(), &["https://elsewhere.example/"])).await;
        assert!(matches!(external, Err(CrawlError::Config(_))));

        let excluded = Crawler::new(config(&server, dir.path(), &["/download/file"])).await;
        assert!(matches!(excluded, Err(CrawlError::Config(_))));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let mut server = Server::new_async().await;
        let _p = html_page(&mut server, "/p", &item_page("<p>x</p>")).await;

        let dir = tempfile::tempdir().unwrap();
        let mut crawler = Crawler::new(config(&server, dir.path(), &["/p"])).await.unwrap();
        crawler.run().await.unwrap();
        assert!(matches!(crawler.run().await, Err(CrawlError::Other(_))));
    }
}
