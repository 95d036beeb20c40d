//! HTTP fetching for pages and images
//!
//! Every request carries a bounded timeout. Page fetches additionally wait
//! on a direct rate limiter whose period is the configured politeness delay,
//! so consecutive page requests are spaced regardless of how the previous
//! one ended.

use chrono::{DateTime, Utc};
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::header::{ACCEPT, ACCEPT_LANGUAGE, CONTENT_TYPE, HeaderMap, HeaderValue};
use reqwest::{Client as ReqwestClient, Response};
use std::sync::Arc;
use std::time::Duration;
use tracing::{Instrument, debug, debug_span, instrument};
use url::Url;

use crate::crawler::assets::{AssetSource, FetchedAsset};
use crate::crawler::config::CrawlerConfig;
use crate::crawler::error::{CrawlError, FetchError};

/// A successfully fetched page
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// URL the response came from, after redirects
    pub url: Url,
    /// HTTP status code
    pub status: u16,
    /// Content-Type header, empty when absent
    pub content_type: String,
    /// Decoded response body
    pub body: String,
    /// When the response was received
    pub fetched_at: DateTime<Utc>,
}

impl FetchedPage {
    /// Check if this is HTML content
    pub fn is_html(&self) -> bool {
        let content_type = self.content_type.to_ascii_lowercase();
        content_type.contains("text/html") || content_type.contains("application/xhtml+xml")
    }
}

/// HTTP client shared by page and image downloads
#[derive(Clone)]
pub struct Fetcher {
    client: ReqwestClient,
    timeout: Duration,
    limiter: Option<Arc<DefaultDirectRateLimiter>>,
}

impl std::fmt::Debug for Fetcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Fetcher")
            .field("timeout", &self.timeout)
            .field("rate_limited", &self.limiter.is_some())
            .finish()
    }
}

impl Fetcher {
    /// Create a fetcher; a zero `delay` disables page rate limiting
    pub fn new(user_agent: &str, timeout: Duration, delay: Duration) -> Result<Self, CrawlError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));

        let client = ReqwestClient::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .timeout(timeout)
            .build()
            .map_err(|e| CrawlError::Config(format!("failed to create HTTP client: {}", e)))?;

        let limiter = Quota::with_period(delay).map(|quota| Arc::new(RateLimiter::direct(quota)));

        Ok(Self {
            client,
            timeout,
            limiter,
        })
    }

    /// Create a fetcher from crawler configuration
    pub fn from_config(config: &CrawlerConfig) -> Result<Self, CrawlError> {
        Self::new(&config.user_agent, config.request_timeout(), config.delay())
    }

    /// Fetch a page, waiting for the rate limiter first
    ///
    /// Non-HTML responses are returned as-is; callers decide what to do
    /// with them via [`FetchedPage::is_html`].
    #[instrument(skip(self), fields(url = %url), level = "debug")]
    pub async fn fetch_page(&self, url: &Url) -> Result<FetchedPage, FetchError> {
        if let Some(limiter) = &self.limiter {
            limiter.until_ready().instrument(debug_span!("limiter")).await;
        }

        let response = self.get(url, None).await?;
        let final_url = response.url().clone();
        let status = response.status().as_u16();
        let content_type = content_type(&response);
        let body = response.text().await.map_err(|e| self.classify(e))?;

        debug!("Fetched {} ({} bytes, {})", final_url, body.len(), content_type);
        Ok(FetchedPage {
            url: final_url,
            status,
            content_type,
            body,
            fetched_at: Utc::now(),
        })
    }

    async fn get(&self, url: &Url, accept: Option<&'static str>) -> Result<Response, FetchError> {
        let mut request = self.client.get(url.clone());
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }

        let response = request.send().await.map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        Ok(response)
    }

    fn classify(&self, err: reqwest::Error) -> FetchError {
        if err.is_timeout() {
            FetchError::Timeout(self.timeout)
        } else {
            FetchError::from(err)
        }
    }
}

impl AssetSource for Fetcher {
    #[instrument(skip(self), fields(url = %url), level = "debug")]
    async fn fetch_asset(&self, url: &Url) -> Result<FetchedAsset, FetchError> {
        let response = self.get(url, Some("image/*,*/*;q=0.8")).await?;
        let content_type = content_type(&response);
        let bytes = response.bytes().await.map_err(|e| self.classify(e))?;
        Ok(FetchedAsset {
            url: url.clone(),
            content_type,
            bytes: bytes.to_vec(),
        })
    }
}

fn content_type(response: &Response) -> String {
    response
        .headers()
        .get(CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use mockito::Server;
    use std::time::Instant;

    fn fetcher(delay: Duration) -> Fetcher {
        Fetcher::new("gleaner-test", Duration::from_secs(5), delay).unwrap()
    }

    fn url(server: &mockito::ServerGuard, path: &str) -> Url {
        Url::parse(&server.url()).unwrap().join(path).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_page_success() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/about")
            .match_header("user-agent", "gleaner-test")
            .with_status(200)
            .with_header("content-type", "text/html; charset=utf-8")
            .with_body("<html><body>hi</body></html>")
            .expect(1)
            .create_async()
            .await;

        let page = fetcher(Duration::ZERO)
            .fetch_page(&url(&server, "/about"))
            .await
            .unwrap();
        assert_eq!(page.status, 200);
        assert!(page.is_html());
        assert!(page.body.contains("hi"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_page_server_error() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/broken")
            .with_status(500)
            .with_body("oops")
            .create_async()
            .await;

        let result = fetcher(Duration::ZERO)
            .fetch_page(&url(&server, "/broken"))
            .await;
        assert!(matches!(result, Err(FetchError::Status(500))));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_non_html_page_is_returned() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", "/data")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{}")
            .create_async()
            .await;

        let page = fetcher(Duration::ZERO)
            .fetch_page(&url(&server, "/data"))
            .await
            .unwrap();
        assert!(!page.is_html());
    }

    #[tokio::test]
    async fn test_fetch_asset_bytes() {
        let mut server = Server::new_async().await;
        let mock = server
            .mock("GET", "/img/x.png")
            .with_status(200)
            .with_header("content-type", "image/png")
            .with_body(vec![0x89, b'P', b'N', b'G'])
            .expect(1)
            .create_async()
            .await;

        let asset = fetcher(Duration::ZERO)
            .fetch_asset(&url(&server, "/img/x.png"))
            .await
            .unwrap();
        assert_eq!(asset.content_type, "image/png");
        assert_eq!(asset.bytes, vec![0x89, b'P', b'N', b'G']);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_page_fetches_are_spaced_by_delay() {
        let mut server = Server::new_async().await;
        let _mock = server
            .mock("GET", mockito::Matcher::Any)
            .with_status(404)
            .expect(3)
            .create_async()
            .await;

        let fetcher = fetcher(Duration::from_millis(200));
        let start = Instant::now();
        for path in ["/a", "/b", "/c"] {
            // failures still consume the delay
            let _ = fetcher.fetch_page(&url(&server, path)).await;
        }
        assert!(start.elapsed() >= Duration::from_millis(380));
    }

    #[tokio::test]
    async fn test_timeout_is_fetch_failure() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let fetcher = Fetcher::new("gleaner-test", Duration::from_secs(1), Duration::ZERO).unwrap();
        let target = Url::parse(&format!("http://{}/slow", addr)).unwrap();
        let result = fetcher.fetch_page(&target).await;
        assert!(matches!(result, Err(FetchError::Timeout(_))));
    }
}
