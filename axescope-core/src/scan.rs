//! Resumable accessibility scan pool.
//!
//! Each worker owns one browser session for its whole life. Targets already
//! in the run's [`ResumeRecord`] are never scanned again; a target that keeps
//! failing is skipped with a [`ScanFailure`] marker and stays out of the
//! record so the next resumed run retries it.

use crate::checkpoint::CheckpointStore;
use crate::config::AxeConfig;
use crate::error::Result;
use crate::model::{Finding, ResumeRecord, RunStatus, ScanFailure, ScanTarget, SinkRecord};
use crate::monitor::ThrottleGate;
use crate::sink::FindingSink;
use axescope_scanner::{Auditor, BrowserSession, FetchError, SessionFactory, Violation};
use chrono::Utc;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Progress for one finished target
#[derive(Debug, Clone)]
pub struct ScanProgress {
    pub url: String,
    pub completed: usize,
    pub skipped: usize,
    pub remaining: usize,
}

/// Callback for reporting scan progress
pub type ScanProgressCallback = Arc<dyn Fn(ScanProgress) + Send + Sync>;

#[derive(Debug, Clone, Default, Serialize)]
pub struct ScanSummary {
    pub total_targets: usize,
    /// Targets found in the resume record and not scanned again
    pub already_scanned: usize,
    pub completed: usize,
    pub skipped: usize,
    pub findings: usize,
    pub interrupted: bool,
}

impl ScanSummary {
    pub fn status(&self) -> RunStatus {
        if self.skipped > 0 || self.interrupted {
            RunStatus::PartialSuccess
        } else {
            RunStatus::Success
        }
    }
}

struct Shared {
    queue: Mutex<VecDeque<ScanTarget>>,
    record: Mutex<ResumeRecord>,
    completed: AtomicUsize,
    skipped: AtomicUsize,
    findings: AtomicUsize,
}

pub struct ScanPool<F: SessionFactory> {
    config: Arc<AxeConfig>,
    factory: Arc<F>,
    store: CheckpointStore,
    auditor: Auditor,
    progress_callback: Option<ScanProgressCallback>,
}

impl<F: SessionFactory + 'static> ScanPool<F> {
    pub fn new(config: AxeConfig, factory: F) -> Self {
        Self {
            store: CheckpointStore::from_config(&config),
            config: Arc::new(config),
            factory: Arc::new(factory),
            auditor: Auditor::new(),
            progress_callback: None,
        }
    }

    pub fn with_progress_callback(mut self, callback: ScanProgressCallback) -> Self {
        self.progress_callback = Some(callback);
        self
    }

    /// Loads the resume record for this run, or starts a fresh one when
    /// resuming is off.
    pub fn load_record(&self) -> Result<ResumeRecord> {
        if !self.config.resume {
            return Ok(ResumeRecord::default());
        }
        Ok(self.store.load_resume()?.unwrap_or_default())
    }

    pub async fn run(
        &self,
        targets: Vec<ScanTarget>,
        sink: Arc<dyn FindingSink>,
        gate: ThrottleGate,
        shutdown: CancellationToken,
    ) -> Result<ScanSummary> {
        let record = self.load_record()?;
        let total_targets = targets.len();
        let queue: VecDeque<ScanTarget> = targets
            .into_iter()
            .filter(|target| !record.contains(&target.url))
            .collect();
        let already_scanned = total_targets - queue.len();

        info!(
            targets = total_targets,
            already_scanned,
            workers = self.config.pool_size,
            "Starting scan"
        );

        let shared = Arc::new(Shared {
            queue: Mutex::new(queue),
            record: Mutex::new(record),
            completed: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
            findings: AtomicUsize::new(0),
        });

        let mut handles = Vec::with_capacity(self.config.pool_size);
        for worker_id in 0..self.config.pool_size {
            let worker = ScanWorker {
                id: worker_id,
                factory: self.factory.clone(),
                auditor: self.auditor.clone(),
                progress_callback: self.progress_callback.clone(),
                gate: gate.clone(),
                shutdown: shutdown.clone(),
                ctx: ScanContext {
                    config: self.config.clone(),
                    store: self.store.clone(),
                    sink: sink.clone(),
                    shared: shared.clone(),
                },
                session: None,
            };
            handles.push(tokio::spawn(worker.run()));
        }
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Scan worker panicked");
            }
        }

        let record = shared.record.lock().await.clone();
        self.store.save_resume(&record)?;

        let summary = ScanSummary {
            total_targets,
            already_scanned,
            completed: shared.completed.load(Ordering::Relaxed),
            skipped: shared.skipped.load(Ordering::Relaxed),
            findings: shared.findings.load(Ordering::Relaxed),
            interrupted: shutdown.is_cancelled() && !shared.queue.lock().await.is_empty(),
        };
        info!(
            completed = summary.completed,
            skipped = summary.skipped,
            findings = summary.findings,
            "Scan finished"
        );
        Ok(summary)
    }
}

/// The parts of a worker that outcome bookkeeping needs. Kept apart from the
/// browser session, which is `Send` but not necessarily `Sync`, so that
/// borrowing it across an await keeps the worker future `Send`.
struct ScanContext {
    config: Arc<AxeConfig>,
    store: CheckpointStore,
    sink: Arc<dyn FindingSink>,
    shared: Arc<Shared>,
}

impl ScanContext {
    async fn complete(&self, target: &ScanTarget, violations: Vec<Violation>) {
        let scanned_at = Utc::now();
        let records: Vec<SinkRecord> = violations
            .into_iter()
            .map(|violation| SinkRecord::Finding(Finding::from_violation(target, violation, scanned_at)))
            .collect();
        let count = records.len();

        // One batch per target, so a failed write leaves nothing to duplicate
        if let Err(e) = self.sink.append_all(&records).await {
            // Leave it unvisited so a later run writes the findings again
            warn!(url = %target.url, error = %e, "Failed to write findings");
            self.shared.skipped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        self.shared.findings.fetch_add(count, Ordering::Relaxed);
        let completed = self.shared.completed.fetch_add(1, Ordering::Relaxed) + 1;
        debug!(url = %target.url, findings = count, "Target scanned");

        // Saved under the lock so saves land in the order the record grew
        let mut record = self.shared.record.lock().await;
        record.mark(target.url.clone());
        if completed % self.config.resume_save_interval == 0
            && let Err(e) = self.store.save_resume(&record)
        {
            warn!(error = %e, "Failed to save resume record");
        }
    }

    async fn skip(&self, target: &ScanTarget, error: FetchError, attempts: u32) {
        self.shared.skipped.fetch_add(1, Ordering::Relaxed);
        warn!(url = %target.url, attempts, error = %error, "Skipping target");

        let failure = ScanFailure {
            url: target.url.clone(),
            template_signature: target.template_signature.clone(),
            reason: error.to_string(),
            attempts,
        };
        if let Err(e) = self.sink.append(&SinkRecord::ScanFailure(failure)).await {
            warn!(url = %target.url, error = %e, "Failed to write scan failure");
        }
    }
}

struct ScanWorker<F: SessionFactory> {
    id: usize,
    factory: Arc<F>,
    auditor: Auditor,
    progress_callback: Option<ScanProgressCallback>,
    gate: ThrottleGate,
    shutdown: CancellationToken,
    ctx: ScanContext,
    session: Option<F::Session>,
}

impl<F: SessionFactory> ScanWorker<F> {
    async fn run(mut self) {
        debug!("Scan worker {} started", self.id);
        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = self.gate.wait_until_clear() => {}
            }
            if self.shutdown.is_cancelled() {
                break;
            }

            let Some(target) = self.ctx.shared.queue.lock().await.pop_front() else {
                break;
            };

            match self.scan(&target).await {
                Ok(violations) => self.ctx.complete(&target, violations).await,
                Err((error, attempts)) => self.ctx.skip(&target, error, attempts).await,
            }

            let remaining = self.ctx.shared.queue.lock().await.len();
            if let Some(callback) = &self.progress_callback {
                callback(ScanProgress {
                    url: target.url.to_string(),
                    completed: self.ctx.shared.completed.load(Ordering::Relaxed),
                    skipped: self.ctx.shared.skipped.load(Ordering::Relaxed),
                    remaining,
                });
            }
            if remaining == 0 {
                break;
            }

            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                _ = tokio::time::sleep(self.ctx.config.sleep_time) => {}
            }
        }

        if let Some(mut session) = self.session.take()
            && let Err(e) = session.close().await
        {
            debug!(error = %e, "Session close error");
        }
        debug!("Scan worker {} finished", self.id);
    }

    /// Renders and audits one target, recycling the session between
    /// attempts. Returns the last error and the attempt count on failure.
    async fn scan(&mut self, target: &ScanTarget) -> std::result::Result<Vec<Violation>, (FetchError, u32)> {
        let max_attempts = self.ctx.config.scan_retries + 1;
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.render(target).await {
                Ok(html) => return Ok(self.auditor.evaluate(&html)),
                Err(e) => {
                    warn!(url = %target.url, attempt, error = %e, "Scan attempt failed");
                    self.recycle().await;
                    if attempt >= max_attempts {
                        return Err((e, attempt));
                    }
                }
            }
        }
    }

    async fn render(&mut self, target: &ScanTarget) -> std::result::Result<String, FetchError> {
        if self.session.is_none() {
            self.session = Some(self.factory.create().await?);
        }
        let Some(session) = self.session.as_mut() else {
            return Err(FetchError::Browser("no session".to_string()));
        };

        let timeout = self.ctx.config.scan_timeout;
        match tokio::time::timeout(timeout, session.navigate(target.url.as_str())).await {
            Ok(result) => result,
            Err(_) => Err(FetchError::Timeout(timeout)),
        }
    }

    async fn recycle(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!("Worker {} recycling browser session", self.id);
            if let Err(e) = session.close().await {
                debug!(error = %e, "Session close error");
            }
        }
    }
}
