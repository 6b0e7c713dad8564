use crate::browser::{SessionFactory, SessionPool};
use crate::error::{FetchError, Result};
use crate::result::{FetchMode, FetchedPage};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::{Arc, LazyLock};
use std::time::{Duration, Instant};
use tracing::debug;
use url::Url;

pub const DEFAULT_USER_AGENT: &str = "axescope/0.1 (+https://github.com/trapdoorsec/axescope)";

static SCRIPT_URL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"["'](https?://[^"'\s]+|/[^"'\s/][^"'\s]*)["']"#).unwrap());

/// Source of pages for the crawl engine.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage>;
}

#[async_trait]
impl<T: PageFetcher + ?Sized> PageFetcher for Arc<T> {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage> {
        (**self).fetch(url, mode).await
    }
}

/// Plain HTTP fetcher with link extraction.
#[derive(Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(timeout / 2)
            .pool_max_idle_per_host(50) // Connection pooling
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(60))
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()?;

        Ok(Self { client })
    }

    pub async fn fetch_http(&self, url: &str) -> Result<FetchedPage> {
        debug!("Fetching {}", url);

        let start = Instant::now();
        let response = self.client.get(url).send().await?;
        let response_time = start.elapsed();

        let status_code = response.status().as_u16();
        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string());

        if status_code == 429 || status_code >= 500 {
            return Err(FetchError::Status(status_code));
        }

        let body = response.text().await?;

        let mut page = FetchedPage::new(url.to_string(), FetchMode::HttpOnly);
        page.final_url = final_url;
        page.status_code = status_code;
        page.content_type = content_type;
        page.response_time = response_time;

        // Only parse HTML content
        if page.is_html() {
            page.links_found = extract_links(&body, &page.final_url);
        }
        page.body = body;

        Ok(page)
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str, _mode: FetchMode) -> Result<FetchedPage> {
        self.fetch_http(url).await
    }
}

/// Collects absolute http(s) links from anchors and inline scripts.
pub fn extract_links(html: &str, current_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let mut links = Vec::new();

    let link_selector = Selector::parse("a[href], area[href]").unwrap();
    for element in document.select(&link_selector) {
        if let Some(href) = element.value().attr("href")
            && let Some(absolute_url) = resolve_url(current_url, href)
        {
            links.push(absolute_url);
        }
    }

    // Single-page apps often keep their routes in inline scripts
    let script_selector = Selector::parse("script:not([src])").unwrap();
    for script in document.select(&script_selector) {
        let text: String = script.text().collect();
        for capture in SCRIPT_URL.captures_iter(&text) {
            if let Some(absolute_url) = resolve_url(current_url, &capture[1]) {
                links.push(absolute_url);
            }
        }
    }

    links.sort();
    links.dedup();
    links
}

pub fn resolve_url(base: &str, href: &str) -> Option<String> {
    let href = href.trim();
    // Skip empty, javascript:, mailto:, tel:, etc.
    if href.is_empty()
        || href.starts_with("javascript:")
        || href.starts_with("mailto:")
        || href.starts_with("tel:")
        || href.starts_with("data:")
        || href.starts_with('#')
    {
        return None;
    }

    let base_url = Url::parse(base).ok()?;
    let mut url = base_url.join(href).ok()?;
    if url.scheme() != "http" && url.scheme() != "https" {
        return None;
    }

    url.set_fragment(None);
    Some(url.to_string())
}

/// HTTP fetcher with an optional pool of browser sessions for rendered fetches.
pub struct HybridFetcher<F: SessionFactory> {
    http: HttpFetcher,
    browsers: Option<SessionPool<F>>,
}

impl<F: SessionFactory> HybridFetcher<F> {
    pub fn new(http: HttpFetcher, browsers: Option<SessionPool<F>>) -> Self {
        Self { http, browsers }
    }

    pub async fn shutdown(&self) {
        if let Some(pool) = &self.browsers {
            pool.shutdown().await;
        }
    }
}

#[async_trait]
impl<F: SessionFactory> PageFetcher for HybridFetcher<F> {
    async fn fetch(&self, url: &str, mode: FetchMode) -> Result<FetchedPage> {
        let pool = match (mode, &self.browsers) {
            (FetchMode::RenderedBrowser, Some(pool)) => pool,
            _ => return self.http.fetch_http(url).await,
        };

        let start = Instant::now();
        let body = pool.render(url).await?;

        let mut page = FetchedPage::new(url.to_string(), FetchMode::RenderedBrowser);
        page.status_code = 200;
        page.content_type = Some("text/html".to_string());
        page.response_time = start.elapsed();
        page.links_found = extract_links(&body, url);
        page.body = body;
        Ok(page)
    }
}
