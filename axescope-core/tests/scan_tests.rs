// Tests for the scan worker pool

use async_trait::async_trait;
use axescope_core::{
    AxeConfig, CheckpointStore, FindingSink, MemorySink, ResourceMonitor, ResourceMonitoringConfig,
    ResourceSample, ResourceSampler, ScanPool, ScanTarget, SinkRecord, ThrottleGate, normalize,
};
use axescope_scanner::error::Result as FetchResult;
use axescope_scanner::{BrowserSession, FetchError, SessionFactory};
use std::cell::Cell;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

const PAGE_WITH_ISSUES: &str = r#"<html><head></head><body><img src="a.png"></body></html>"#;

/// Shared script for every fake session a factory hands out.
#[derive(Default)]
struct Script {
    navigations: Mutex<Vec<(String, Instant)>>,
    /// Remaining failures per URL
    failures: Mutex<HashMap<String, usize>>,
    cancel_after: Mutex<Option<(String, CancellationToken)>>,
    sessions_created: AtomicUsize,
    sessions_closed: AtomicUsize,
}

impl Script {
    fn visited(&self) -> Vec<String> {
        self.navigations
            .lock()
            .unwrap()
            .iter()
            .map(|(url, _)| url.clone())
            .collect()
    }
}

struct FakeSession {
    script: Arc<Script>,
}

#[async_trait]
impl BrowserSession for FakeSession {
    async fn navigate(&mut self, url: &str) -> FetchResult<String> {
        self.script
            .navigations
            .lock()
            .unwrap()
            .push((url.to_string(), Instant::now()));

        if let Some(remaining) = self.script.failures.lock().unwrap().get_mut(url)
            && *remaining > 0
        {
            *remaining -= 1;
            return Err(FetchError::Render("renderer crashed".to_string()));
        }

        if let Some((trigger, token)) = self.script.cancel_after.lock().unwrap().as_ref()
            && trigger == url
        {
            token.cancel();
        }
        Ok(PAGE_WITH_ISSUES.to_string())
    }

    async fn close(&mut self) -> FetchResult<()> {
        self.script.sessions_closed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

struct FakeFactory {
    script: Arc<Script>,
}

#[async_trait]
impl SessionFactory for FakeFactory {
    type Session = FakeSession;

    async fn create(&self) -> FetchResult<FakeSession> {
        self.script.sessions_created.fetch_add(1, Ordering::SeqCst);
        Ok(FakeSession {
            script: self.script.clone(),
        })
    }
}

fn config(dir: &TempDir, pool_size: usize) -> AxeConfig {
    AxeConfig {
        domains: vec!["x.com".to_string()],
        output_dir: dir.path().to_path_buf(),
        pool_size,
        sleep_time: Duration::ZERO,
        scan_timeout: Duration::from_secs(5),
        ..AxeConfig::default()
    }
}

fn target(url: &str) -> ScanTarget {
    let url = normalize(url, None).unwrap();
    ScanTarget {
        template_signature: format!("x.com:{}", url.path()).as_str().into(),
        url,
        domain: "x.com".to_string(),
    }
}

fn pool(config: AxeConfig, script: &Arc<Script>) -> ScanPool<FakeFactory> {
    ScanPool::new(
        config,
        FakeFactory {
            script: script.clone(),
        },
    )
}

fn findings(sink: &MemorySink) -> usize {
    sink.records()
        .iter()
        .filter(|r| matches!(r, SinkRecord::Finding(_)))
        .count()
}

// ============================================================================
// Basic Scanning
// ============================================================================

#[tokio::test]
async fn test_each_target_scanned_once() {
    let dir = TempDir::new().unwrap();
    let script = Arc::new(Script::default());
    let sink = MemorySink::new();
    let targets: Vec<ScanTarget> = (0..6).map(|i| target(&format!("https://x.com/t{}", i))).collect();

    let summary = pool(config(&dir, 3), &script)
        .run(targets, Arc::new(sink.clone()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    let mut visited = script.visited();
    visited.sort();
    visited.dedup();
    assert_eq!(visited.len(), 6);
    assert_eq!(script.visited().len(), 6);
    assert_eq!(summary.completed, 6);
    assert_eq!(summary.status().exit_code(), 0);

    // missing lang, missing title, image without alt
    assert_eq!(findings(&sink), 18);
    assert_eq!(summary.findings, 18);
    assert!(script.sessions_created.load(Ordering::SeqCst) <= 3);
}

#[tokio::test]
async fn test_findings_carry_target_identity() {
    let dir = TempDir::new().unwrap();
    let script = Arc::new(Script::default());
    let sink = MemorySink::new();

    pool(config(&dir, 1), &script)
        .run(
            vec![target("https://x.com/p/1")],
            Arc::new(sink.clone()),
            ThrottleGate::open(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    let records = sink.records();
    let SinkRecord::Finding(finding) = &records[0] else {
        panic!("expected a finding, got {:?}", records[0]);
    };
    assert_eq!(finding.url.as_str(), "https://x.com/p/1");
    assert_eq!(finding.template_signature.as_str(), "x.com:/p/1");
}

/// A session that may move between threads but not be shared, like a
/// browser handle holding a non-`Sync` connection.
struct PinnedSession {
    pages: Cell<usize>,
}

#[async_trait]
impl BrowserSession for PinnedSession {
    async fn navigate(&mut self, _url: &str) -> FetchResult<String> {
        self.pages.set(self.pages.get() + 1);
        Ok(PAGE_WITH_ISSUES.to_string())
    }

    async fn close(&mut self) -> FetchResult<()> {
        Ok(())
    }
}

struct PinnedFactory;

#[async_trait]
impl SessionFactory for PinnedFactory {
    type Session = PinnedSession;

    async fn create(&self) -> FetchResult<PinnedSession> {
        Ok(PinnedSession { pages: Cell::new(0) })
    }
}

#[tokio::test]
async fn test_pool_runs_with_non_sync_sessions() {
    let dir = TempDir::new().unwrap();
    let sink = MemorySink::new();
    let pool = ScanPool::new(config(&dir, 2), PinnedFactory);
    let targets = vec![target("https://x.com/a"), target("https://x.com/b")];
    let sink_for_run: Arc<dyn FindingSink> = Arc::new(sink.clone());

    // spawning requires the whole run future to be Send
    let summary = tokio::spawn(async move {
        pool.run(targets, sink_for_run, ThrottleGate::open(), CancellationToken::new())
            .await
    })
    .await
    .unwrap()
    .unwrap();

    assert_eq!(summary.completed, 2);
    assert_eq!(findings(&sink), 6);
}

// ============================================================================
// Resume
// ============================================================================

#[tokio::test]
async fn test_second_resumed_run_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 2);
    let targets = vec![target("https://x.com/a"), target("https://x.com/b")];

    let first_script = Arc::new(Script::default());
    let first_sink = MemorySink::new();
    pool(config.clone(), &first_script)
        .run(targets.clone(), Arc::new(first_sink.clone()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();
    let record_after_first = std::fs::read(config.resume_path()).unwrap();
    assert!(findings(&first_sink) > 0);

    let second_script = Arc::new(Script::default());
    let second_sink = MemorySink::new();
    let summary = pool(config.clone(), &second_script)
        .run(targets, Arc::new(second_sink.clone()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(findings(&second_sink), 0);
    assert!(second_script.visited().is_empty());
    assert_eq!(summary.already_scanned, 2);
    assert_eq!(std::fs::read(config.resume_path()).unwrap(), record_after_first);
}

#[tokio::test]
async fn test_interrupted_run_resumes_with_remaining_target() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1);
    let targets = vec![target("https://x.com/a"), target("https://x.com/b")];

    let shutdown = CancellationToken::new();
    let first_script = Arc::new(Script::default());
    *first_script.cancel_after.lock().unwrap() = Some(("https://x.com/a".to_string(), shutdown.clone()));
    let summary = pool(config.clone(), &first_script)
        .run(targets.clone(), Arc::new(MemorySink::new()), ThrottleGate::open(), shutdown)
        .await
        .unwrap();

    assert_eq!(first_script.visited(), vec!["https://x.com/a"]);
    assert!(summary.interrupted);
    assert_eq!(summary.status().exit_code(), 2);

    let second_script = Arc::new(Script::default());
    pool(config, &second_script)
        .run(targets, Arc::new(MemorySink::new()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(second_script.visited(), vec!["https://x.com/b"]);
}

#[tokio::test]
async fn test_resume_disabled_rescans_everything() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1);
    let targets = vec![target("https://x.com/a")];

    pool(config.clone(), &Arc::new(Script::default()))
        .run(targets.clone(), Arc::new(MemorySink::new()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    let script = Arc::new(Script::default());
    pool(AxeConfig { resume: false, ..config }, &script)
        .run(targets, Arc::new(MemorySink::new()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(script.visited(), vec!["https://x.com/a"]);
}

// ============================================================================
// Failures
// ============================================================================

#[tokio::test]
async fn test_crash_recycles_session_and_retries() {
    let dir = TempDir::new().unwrap();
    let script = Arc::new(Script::default());
    script
        .failures
        .lock()
        .unwrap()
        .insert("https://x.com/a".to_string(), 1);
    let sink = MemorySink::new();

    let summary = pool(config(&dir, 1), &script)
        .run(vec![target("https://x.com/a")], Arc::new(sink.clone()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.skipped, 0);
    assert_eq!(script.visited().len(), 2);
    assert_eq!(script.sessions_created.load(Ordering::SeqCst), 2);
    assert!(findings(&sink) > 0);
}

#[tokio::test]
async fn test_persistent_failure_skips_with_marker() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1);
    let script = Arc::new(Script::default());
    script
        .failures
        .lock()
        .unwrap()
        .insert("https://x.com/broken".to_string(), 10);
    let sink = MemorySink::new();

    let summary = pool(config.clone(), &script)
        .run(
            vec![target("https://x.com/broken"), target("https://x.com/ok")],
            Arc::new(sink.clone()),
            ThrottleGate::open(),
            CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(summary.skipped, 1);
    assert_eq!(summary.completed, 1);
    assert_eq!(summary.status().exit_code(), 2);

    let failures: Vec<_> = sink
        .records()
        .into_iter()
        .filter_map(|r| match r {
            SinkRecord::ScanFailure(f) => Some(f),
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].url.as_str(), "https://x.com/broken");
    assert_eq!(failures[0].attempts, 2);

    // the skipped target stays eligible for the next run
    let record = CheckpointStore::from_config(&config).load_resume().unwrap().unwrap();
    assert!(!record.contains(&normalize("https://x.com/broken", None).unwrap()));
    assert!(record.contains(&normalize("https://x.com/ok", None).unwrap()));
}

/// Rejects the first batch of findings whole, then accepts everything.
struct RejectOnceSink {
    inner: MemorySink,
    rejected: AtomicUsize,
}

#[async_trait]
impl FindingSink for RejectOnceSink {
    async fn append(&self, record: &SinkRecord) -> axescope_core::Result<()> {
        self.inner.append(record).await
    }

    async fn append_all(&self, records: &[SinkRecord]) -> axescope_core::Result<()> {
        if self.rejected.fetch_add(1, Ordering::SeqCst) == 0 {
            return Err(std::io::Error::other("disk full").into());
        }
        self.inner.append_all(records).await
    }
}

#[tokio::test]
async fn test_failed_finding_write_is_rewritten_once() {
    let dir = TempDir::new().unwrap();
    let config = config(&dir, 1);
    let targets = vec![target("https://x.com/a")];
    let sink = MemorySink::new();

    let first = pool(config.clone(), &Arc::new(Script::default()))
        .run(
            targets.clone(),
            Arc::new(RejectOnceSink {
                inner: sink.clone(),
                rejected: AtomicUsize::new(0),
            }),
            ThrottleGate::open(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(first.skipped, 1);
    assert_eq!(findings(&sink), 0);

    // the target stayed unvisited, so the resumed run writes its findings
    let second = pool(config, &Arc::new(Script::default()))
        .run(targets, Arc::new(sink.clone()), ThrottleGate::open(), CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(second.completed, 1);
    assert_eq!(findings(&sink), 3);

    let mut rules: Vec<String> = sink
        .records()
        .into_iter()
        .filter_map(|r| match r {
            SinkRecord::Finding(f) => Some(f.rule_id),
            _ => None,
        })
        .collect();
    rules.sort();
    rules.dedup();
    assert_eq!(rules.len(), 3);
}

// ============================================================================
// Throttling
// ============================================================================

struct CalmSampler;

impl ResourceSampler for CalmSampler {
    fn sample(&mut self) -> ResourceSample {
        ResourceSample {
            cpu_percent: 5.0,
            memory_percent: 5.0,
        }
    }
}

#[tokio::test(start_paused = true)]
async fn test_no_work_starts_while_throttled() {
    let dir = TempDir::new().unwrap();
    let monitoring = ResourceMonitoringConfig {
        enabled: true,
        cpu_threshold: 90.0,
        memory_threshold: 85.0,
        check_interval: Duration::from_secs(3),
        cool_down_time: Duration::from_secs(7),
    };
    let mut monitor = ResourceMonitor::new(monitoring.clone());
    let gate = monitor.gate();

    let start = Instant::now();
    monitor.observe(
        ResourceSample {
            cpu_percent: 99.0,
            memory_percent: 10.0,
        },
        start,
    );
    assert!(gate.is_throttled());

    let shutdown = CancellationToken::new();
    let handle = monitor.spawn(CalmSampler, shutdown.clone());

    let script = Arc::new(Script::default());
    pool(config(&dir, 2), &script)
        .run(
            vec![target("https://x.com/a"), target("https://x.com/b")],
            Arc::new(MemorySink::new()),
            gate,
            CancellationToken::new(),
        )
        .await
        .unwrap();
    shutdown.cancel();
    handle.await.unwrap();

    let navigations = script.navigations.lock().unwrap().clone();
    assert_eq!(navigations.len(), 2);
    for (url, at) in navigations {
        assert!(
            at.duration_since(start) >= monitoring.cool_down_time,
            "{} started {:?} after the breach",
            url,
            at.duration_since(start)
        );
    }
}
