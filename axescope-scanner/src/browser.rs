//! Browser-backed page rendering.
//!
//! A [`BrowserSession`] is one isolated browser process. Sessions are never
//! shared between tasks: the scan pool binds one to each worker, and the
//! crawl side leases them through a [`SessionPool`].

use crate::error::{FetchError, Result};
use async_trait::async_trait;
use chromiumoxide::Page;
use chromiumoxide::browser::{Browser, BrowserConfig};
use futures::StreamExt;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

#[async_trait]
pub trait BrowserSession: Send {
    /// Loads `url` and returns the rendered document.
    async fn navigate(&mut self, url: &str) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

#[async_trait]
pub trait SessionFactory: Send + Sync {
    type Session: BrowserSession + 'static;

    async fn create(&self) -> Result<Self::Session>;
}

#[derive(Debug, Clone)]
pub struct ChromeOptions {
    pub headless: bool,
    pub page_timeout: Duration,
    /// Extra wait after navigation so client-side rendering can settle.
    pub settle_time: Duration,
    pub user_agent: String,
}

impl Default for ChromeOptions {
    fn default() -> Self {
        Self {
            headless: true,
            page_timeout: Duration::from_secs(30),
            settle_time: Duration::from_millis(500),
            user_agent: crate::fetcher::DEFAULT_USER_AGENT.to_string(),
        }
    }
}

pub struct ChromeSession {
    browser: Browser,
    handler: JoinHandle<()>,
    options: ChromeOptions,
    /// Removed on close, or on drop if the session was never closed
    profile_dir: Option<PathBuf>,
}

async fn read_content(page: &Page, url: &str, options: &ChromeOptions) -> Result<String> {
    let timeout = options.page_timeout;

    // Best-effort: some pages never fire a clean navigation event
    let _ = tokio::time::timeout(timeout, page.wait_for_navigation()).await;

    if !options.settle_time.is_zero() {
        tokio::time::sleep(options.settle_time).await;
    }

    tokio::time::timeout(timeout, page.content())
        .await
        .map_err(|_| FetchError::Timeout(timeout))?
        .map_err(|e| FetchError::Render(format!("failed to read content of {}: {}", url, e)))
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str) -> Result<String> {
        let timeout = self.options.page_timeout;

        let page = tokio::time::timeout(timeout, self.browser.new_page(url))
            .await
            .map_err(|_| FetchError::Timeout(timeout))?
            .map_err(|e| FetchError::Render(format!("failed to open {}: {}", url, e)))?;

        let html = read_content(&page, url, &self.options).await;

        // Closed whether or not the content could be read
        if let Err(e) = page.close().await {
            debug!(url, error = %e, "Page close error");
        }

        html
    }

    async fn close(&mut self) -> Result<()> {
        let closed = self.browser.close().await;
        // The profile can only be removed once Chrome has let go of it
        match tokio::time::timeout(self.options.page_timeout, self.browser.wait()).await {
            Ok(Err(e)) => debug!(error = %e, "Browser exit wait error"),
            Err(_) => debug!("Browser did not exit in time"),
            Ok(Ok(_)) => {}
        }
        self.handler.abort();
        if let Some(dir) = self.profile_dir.take() {
            remove_profile_dir(&dir);
        }
        closed
            .map(|_| ())
            .map_err(|e| FetchError::Browser(format!("close failed: {}", e)))
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        self.handler.abort();
        if let Some(dir) = self.profile_dir.take() {
            remove_profile_dir(&dir);
        }
    }
}

/// Deletes a session's profile directory; a missing directory is fine.
fn remove_profile_dir(dir: &Path) {
    match std::fs::remove_dir_all(dir) {
        Ok(()) => debug!(path = %dir.display(), "Removed browser profile"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %dir.display(), error = %e, "Failed to remove browser profile"),
    }
}

/// Launches one headless Chrome per session, each with its own profile dir.
pub struct ChromeSessionFactory {
    options: ChromeOptions,
}

impl ChromeSessionFactory {
    pub fn new(options: ChromeOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl SessionFactory for ChromeSessionFactory {
    type Session = ChromeSession;

    async fn create(&self) -> Result<ChromeSession> {
        let profile_dir = std::env::temp_dir().join(format!("axescope-{}", Uuid::new_v4()));

        let mut builder = BrowserConfig::builder()
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-dev-shm-usage")
            .arg("--incognito")
            .arg(format!("--user-agent={}", self.options.user_agent))
            .user_data_dir(&profile_dir)
            .request_timeout(self.options.page_timeout);
        if !self.options.headless {
            builder = builder.with_head();
        }

        let config = builder
            .build()
            .map_err(|e| FetchError::Browser(format!("config error: {}", e)))?;

        let (browser, mut handler) = match Browser::launch(config).await {
            Ok(launched) => launched,
            Err(e) => {
                remove_profile_dir(&profile_dir);
                return Err(FetchError::Browser(format!("launch failed: {}", e)));
            }
        };

        let handler = tokio::spawn(async move { while handler.next().await.is_some() {} });
        debug!("Browser session launched");

        Ok(ChromeSession {
            browser,
            handler,
            options: self.options.clone(),
            profile_dir: Some(profile_dir),
        })
    }
}

/// Bounded set of sessions leased out one render at a time.
///
/// The channel holds one slot per session; an empty slot is filled lazily,
/// and a failed session is closed and its slot emptied so the next lease
/// starts a fresh browser.
pub struct SessionPool<F: SessionFactory> {
    factory: F,
    slots_tx: mpsc::Sender<Option<F::Session>>,
    slots_rx: Mutex<mpsc::Receiver<Option<F::Session>>>,
}

/// A slot taken from the pool. Dropping it without [`Lease::release`], for
/// instance when the render future is cancelled, returns an empty slot so
/// the pool keeps its size.
struct Lease<'a, S> {
    slots_tx: &'a mpsc::Sender<Option<S>>,
    returned: bool,
}

impl<S> Lease<'_, S> {
    fn release(mut self, slot: Option<S>) {
        self.returned = true;
        // The slot this lease took leaves room in the channel
        if self.slots_tx.try_send(slot).is_err() {
            warn!("Session pool closed while releasing a session");
        }
    }
}

impl<S> Drop for Lease<'_, S> {
    fn drop(&mut self) {
        if !self.returned && self.slots_tx.try_send(None).is_err() {
            warn!("Session pool closed while releasing an abandoned lease");
        }
    }
}

impl<F: SessionFactory> SessionPool<F> {
    pub fn new(factory: F, size: usize) -> Self {
        let size = size.max(1);
        let (slots_tx, slots_rx) = mpsc::channel(size);
        for _ in 0..size {
            // Cannot fail: capacity equals the number of slots sent
            let _ = slots_tx.try_send(None);
        }
        Self {
            factory,
            slots_tx,
            slots_rx: Mutex::new(slots_rx),
        }
    }

    async fn acquire(&self) -> Result<(Lease<'_, F::Session>, Option<F::Session>)> {
        let mut rx = self.slots_rx.lock().await;
        let slot = rx
            .recv()
            .await
            .ok_or_else(|| FetchError::Browser("session pool closed".to_string()))?;
        let lease = Lease {
            slots_tx: &self.slots_tx,
            returned: false,
        };
        Ok((lease, slot))
    }

    pub async fn render(&self, url: &str) -> Result<String> {
        let (lease, slot) = self.acquire().await?;
        let mut session = match slot {
            Some(session) => session,
            None => match self.factory.create().await {
                Ok(session) => session,
                Err(e) => {
                    lease.release(None);
                    return Err(e);
                }
            },
        };

        match session.navigate(url).await {
            Ok(html) => {
                lease.release(Some(session));
                Ok(html)
            }
            Err(e) => {
                if e.is_render_failure() {
                    debug!(url, "Recycling browser session after render failure");
                    if let Err(close_err) = session.close().await {
                        debug!(error = %close_err, "Session close error");
                    }
                    lease.release(None);
                } else {
                    lease.release(Some(session));
                }
                Err(e)
            }
        }
    }

    /// Closes every idle session. Leased sessions are closed by their holders.
    pub async fn shutdown(&self) {
        let mut rx = self.slots_rx.lock().await;
        while let Ok(slot) = rx.try_recv() {
            if let Some(mut session) = slot
                && let Err(e) = session.close().await
            {
                warn!(error = %e, "Browser close error");
            }
        }
    }
}
