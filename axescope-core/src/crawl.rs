//! Concurrent crawl driver.
//!
//! Workers share one FIFO backlog. Each dequeued URL is fetched in the mode
//! the [`FetchModePolicy`] picks for the current backlog depth, and the links
//! it yields are offered to the [`FrontierController`]. The frontier sits
//! behind a single mutex whose critical sections never await.

use crate::checkpoint::CheckpointStore;
use crate::config::AxeConfig;
use crate::error::{CoreError, Result, UrlError};
use crate::frontier::{Decision, FrontierController, FrontierStats};
use crate::model::RunStatus;
use crate::normalize::{NormalizedUrl, normalize};
use crate::policy::{FetchModePolicy, needs_javascript};
use crate::state::{CrawlCheckpoint, CrawlState, PendingFetch};
use axescope_scanner::{FetchError, FetchMode, FetchedPage, PageFetcher};
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const IDLE_POLL: Duration = Duration::from_millis(10);

/// Progress for one completed fetch
#[derive(Debug, Clone)]
pub struct CrawlProgress {
    pub url: String,
    pub fetched: usize,
    pub pending: usize,
}

/// Callback for reporting crawl progress
pub type CrawlProgressCallback = Arc<dyn Fn(CrawlProgress) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlSummary {
    pub domains: Vec<String>,
    pub pages_fetched: usize,
    pub rendered_fetches: usize,
    pub fetch_failures: usize,
    pub templates: usize,
    pub unique_pages: usize,
    pub decisions: FrontierStats,
    /// Fetches still queued when the crawl stopped
    pub pending: usize,
    pub resumed: bool,
    pub interrupted: bool,
}

impl CrawlSummary {
    /// Partial only when stopped with work still queued.
    pub fn status(&self) -> RunStatus {
        if self.interrupted && self.pending > 0 {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        }
    }
}

#[derive(Default)]
struct Backlog {
    queue: VecDeque<PendingFetch>,
    in_flight: Vec<PendingFetch>,
}

impl Backlog {
    fn finish(&mut self, task: &PendingFetch) {
        if let Some(pos) = self.in_flight.iter().position(|t| t.url == task.url) {
            self.in_flight.swap_remove(pos);
        }
    }

    /// In-flight work first so it is redone after a restart.
    fn snapshot(&self) -> Vec<PendingFetch> {
        self.in_flight
            .iter()
            .chain(self.queue.iter())
            .cloned()
            .collect()
    }
}

struct Shared {
    frontier: Mutex<FrontierController>,
    backlog: Mutex<Backlog>,
    fetched: AtomicUsize,
    rendered: AtomicUsize,
    failures: AtomicUsize,
    completed: AtomicUsize,
    /// Held from snapshot to rename so checkpoints land in snapshot order
    checkpoint: Mutex<()>,
}

pub struct CrawlEngine<P: PageFetcher> {
    config: Arc<AxeConfig>,
    fetcher: Arc<P>,
    policy: FetchModePolicy,
    store: CheckpointStore,
    progress_callback: Option<CrawlProgressCallback>,
}

impl<P: PageFetcher + 'static> CrawlEngine<P> {
    pub fn new(config: AxeConfig, fetcher: P) -> Self {
        Self {
            policy: FetchModePolicy::from_config(&config),
            store: CheckpointStore::from_config(&config),
            config: Arc::new(config),
            fetcher: Arc::new(fetcher),
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: CrawlProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Crawls every configured domain until the backlog drains or
    /// `shutdown` fires, then writes a final checkpoint.
    pub async fn run(&self, shutdown: CancellationToken) -> Result<(CrawlState, CrawlSummary)> {
        let seeds = resolve_seeds(&self.config.domains)?;

        let previous = if self.config.resume {
            self.store.load_crawl()?
        } else {
            None
        };
        let resumed = previous.is_some();
        let CrawlCheckpoint { state, pending } = previous.unwrap_or_default();
        if resumed {
            info!(
                unique_pages = state.unique_pages.len(),
                pending = pending.len(),
                "Resuming crawl from checkpoint"
            );
        }

        let mut frontier = FrontierController::with_state(&self.config, state);
        let mut backlog = Backlog {
            queue: pending.into(),
            in_flight: Vec::new(),
        };
        for seed in &seeds {
            if let (Decision::Accepted, Some(url)) = frontier.admit(&seed.domain, seed.url.as_str()) {
                backlog.queue.push_back(PendingFetch {
                    domain: seed.domain.clone(),
                    url,
                    depth: 0,
                });
            }
        }
        info!(
            domains = seeds.len(),
            queued = backlog.queue.len(),
            workers = self.config.crawl_concurrency,
            "Starting crawl"
        );

        let shared = Arc::new(Shared {
            frontier: Mutex::new(frontier),
            backlog: Mutex::new(backlog),
            fetched: AtomicUsize::new(0),
            rendered: AtomicUsize::new(0),
            failures: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            checkpoint: Mutex::new(()),
        });

        let mut handles = Vec::with_capacity(self.config.crawl_concurrency);
        for worker_id in 0..self.config.crawl_concurrency {
            let worker = Worker {
                id: worker_id,
                config: self.config.clone(),
                fetcher: self.fetcher.clone(),
                policy: self.policy,
                store: self.store.clone(),
                progress_callback: self.progress_callback.clone(),
                shared: shared.clone(),
                shutdown: shutdown.clone(),
            };
            handles.push(tokio::spawn(worker.run()));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Crawl worker panicked");
            }
        }

        let checkpoint = save_checkpoint(&shared, &self.store).await?;

        let decisions = shared.frontier.lock().await.stats();
        let summary = CrawlSummary {
            domains: seeds.into_iter().map(|s| s.domain).collect(),
            pages_fetched: shared.fetched.load(Ordering::Relaxed),
            rendered_fetches: shared.rendered.load(Ordering::Relaxed),
            fetch_failures: shared.failures.load(Ordering::Relaxed),
            templates: checkpoint.state.templates.len(),
            unique_pages: checkpoint.state.unique_pages.len(),
            decisions,
            pending: checkpoint.pending.len(),
            resumed,
            interrupted: shutdown.is_cancelled(),
        };
        info!(
            pages = summary.pages_fetched,
            templates = summary.templates,
            failures = summary.fetch_failures,
            "Crawl finished"
        );

        Ok((checkpoint.state, summary))
    }
}

#[derive(Debug, Clone, PartialEq)]
struct Seed {
    domain: String,
    url: NormalizedUrl,
}

/// A bare domain is crawled from `https://<domain>/`; a configured URL keeps
/// its scheme and port.
fn resolve_seeds(inputs: &[String]) -> Result<Vec<Seed>> {
    let mut seeds: Vec<Seed> = Vec::new();
    for input in inputs {
        let resolved = normalize(input, None).and_then(|url| {
            let domain = url
                .domain()
                .ok_or_else(|| UrlError::MissingHost(input.clone()))?;
            let mut root = url.to_url()?;
            root.set_path("/");
            root.set_query(None);
            Ok(Seed {
                domain,
                url: normalize(root.as_str(), None)?,
            })
        });
        match resolved {
            Ok(seed) if !seeds.iter().any(|s| s.domain == seed.domain) => seeds.push(seed),
            Ok(_) => {}
            Err(e) => warn!(domain = %input, error = %e, "Skipping unresolvable domain"),
        }
    }
    if seeds.is_empty() {
        return Err(CoreError::NoDomains);
    }
    Ok(seeds)
}

async fn save_checkpoint(shared: &Shared, store: &CheckpointStore) -> Result<CrawlCheckpoint> {
    let _ordered = shared.checkpoint.lock().await;
    let state = shared.frontier.lock().await.state().clone();
    let pending = shared.backlog.lock().await.snapshot();
    let checkpoint = CrawlCheckpoint { state, pending };
    store.save_crawl(&checkpoint)?;
    Ok(checkpoint)
}

struct Worker<P: PageFetcher> {
    id: usize,
    config: Arc<AxeConfig>,
    fetcher: Arc<P>,
    policy: FetchModePolicy,
    store: CheckpointStore,
    progress_callback: Option<CrawlProgressCallback>,
    shared: Arc<Shared>,
    shutdown: CancellationToken,
}

impl<P: PageFetcher> Worker<P> {
    async fn run(self) {
        debug!("Crawl worker {} started", self.id);
        loop {
            if self.shutdown.is_cancelled() {
                break;
            }

            let (task, backlog_depth, idle) = {
                let mut backlog = self.shared.backlog.lock().await;
                match backlog.queue.pop_front() {
                    Some(task) => {
                        backlog.in_flight.push(task.clone());
                        (Some(task), backlog.queue.len(), false)
                    }
                    None => (None, 0, backlog.in_flight.is_empty()),
                }
            };

            let Some(task) = task else {
                if idle {
                    break;
                }
                // Another worker may still enqueue links
                tokio::select! {
                    _ = self.shutdown.cancelled() => break,
                    _ = tokio::time::sleep(IDLE_POLL) => {}
                }
                continue;
            };

            let discovered = self.process(&task, backlog_depth).await;

            let pending = {
                let mut backlog = self.shared.backlog.lock().await;
                backlog.queue.extend(discovered);
                backlog.finish(&task);
                backlog.queue.len()
            };

            let completed = self.shared.completed.fetch_add(1, Ordering::Relaxed) + 1;
            if let Some(callback) = &self.progress_callback {
                callback(CrawlProgress {
                    url: task.url.to_string(),
                    fetched: self.shared.fetched.load(Ordering::Relaxed),
                    pending,
                });
            }
            if completed % self.config.checkpoint_interval == 0 {
                match save_checkpoint(&self.shared, &self.store).await {
                    Ok(_) => debug!(completed, "Periodic crawl checkpoint saved"),
                    Err(e) => warn!(error = %e, "Failed to save crawl checkpoint"),
                }
            }
        }
        debug!("Crawl worker {} finished", self.id);
    }

    /// Fetches one page and returns the newly accepted links.
    async fn process(&self, task: &PendingFetch, backlog_depth: usize) -> Vec<PendingFetch> {
        let mode = self.policy.select(backlog_depth);
        let page = match self.fetch(&task.url, mode).await {
            Ok(page) => page,
            Err(e) => {
                self.shared.failures.fetch_add(1, Ordering::Relaxed);
                warn!(url = %task.url, error = %e, "Fetch failed");
                return Vec::new();
            }
        };

        self.shared.fetched.fetch_add(1, Ordering::Relaxed);
        if page.mode == FetchMode::RenderedBrowser {
            self.shared.rendered.fetch_add(1, Ordering::Relaxed);
        }
        debug!(
            url = %task.url,
            status = page.status_code,
            mode = page.mode.as_str(),
            links = page.links_found.len(),
            "Fetched"
        );

        if self.config.depth_limit.is_some_and(|limit| task.depth >= limit) {
            return Vec::new();
        }

        let mut frontier = self.shared.frontier.lock().await;
        page.links_found
            .iter()
            .filter_map(|link| match frontier.admit(&task.domain, link) {
                (Decision::Accepted, Some(url)) => Some(PendingFetch {
                    domain: task.domain.clone(),
                    url,
                    depth: task.depth + 1,
                }),
                _ => None,
            })
            .collect()
    }

    async fn fetch(&self, url: &NormalizedUrl, mode: FetchMode) -> std::result::Result<FetchedPage, FetchError> {
        if mode == FetchMode::RenderedBrowser {
            match self.fetch_once(url, mode).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_render_failure() => {
                    debug!(url = %url, error = %e, "Render failed, falling back to HTTP");
                }
                Err(e) => return Err(e),
            }
        }

        let page = self.fetch_with_retries(url).await?;

        // Looks client-rendered and the backlog still allows a browser
        if mode == FetchMode::HttpOnly
            && self.policy.hybrid_mode()
            && page.is_html()
            && needs_javascript(&page.body)
        {
            let depth = self.shared.backlog.lock().await.queue.len();
            if self.policy.select(depth) == FetchMode::RenderedBrowser {
                match self.fetch_once(url, FetchMode::RenderedBrowser).await {
                    Ok(rendered) => return Ok(rendered),
                    Err(e) => debug!(url = %url, error = %e, "Re-render failed, keeping HTTP result"),
                }
            }
        }

        Ok(page)
    }

    async fn fetch_once(&self, url: &NormalizedUrl, mode: FetchMode) -> std::result::Result<FetchedPage, FetchError> {
        let timeout = self.config.fetch_timeout;
        match tokio::time::timeout(timeout, self.fetcher.fetch(url.as_str(), mode)).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    async fn fetch_with_retries(&self, url: &NormalizedUrl) -> std::result::Result<FetchedPage, FetchError> {
        let mut delay = self.config.retry_backoff;
        let mut attempt = 0;
        loop {
            match self.fetch_once(url, FetchMode::HttpOnly).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_retryable() && attempt < self.config.fetch_retries => {
                    attempt += 1;
                    debug!(url = %url, attempt, error = %e, "Retrying fetch");
                    tokio::select! {
                        _ = self.shutdown.cancelled() => return Err(e),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e),
            }
        }
    }
}
