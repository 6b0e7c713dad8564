use anyhow::{Context, Result, bail};
use axescope_core::sink::read_records;
use axescope_core::{
    AxeConfig, CheckpointStore, CrawlCheckpoint, CrawlEngine, CrawlProgress, CrawlProgressCallback,
    CrawlState, CrawlSummary, JsonLinesSink, ResourceMonitor, ResumeRecord, RunStatus, ScanPool,
    ScanProgress, ScanProgressCallback, ScanSummary, SinkRecord, SysinfoSampler, select_targets,
};
use axescope_scanner::{ChromeOptions, ChromeSessionFactory, HttpFetcher, HybridFetcher, SessionPool};
use clap::ArgMatches;
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;
use tracing_subscriber::EnvFilter;
use url::Url;

pub fn print_banner() {
    println!(
        "{} {}",
        "axescope".bright_cyan().bold(),
        format!("v{}", env!("CARGO_PKG_VERSION")).bright_black()
    );
    println!("{}", "template-sampling accessibility scanner".bright_black());
    println!();
}

/// Installs the fmt subscriber. `RUST_LOG` wins over the flags.
pub fn init_tracing(verbose: bool, quiet: bool) {
    let default = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

// Configuration

/// Command-line values layered over the config file.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Overrides {
    pub domains: Vec<String>,
    pub output_dir: Option<PathBuf>,
    pub run_id: Option<String>,
    pub fresh: bool,
    pub discard_corrupt: bool,
    pub threads: Option<usize>,
    pub max_urls: Option<usize>,
    pub depth: Option<usize>,
    pub no_hybrid: bool,
    pub pool_size: Option<usize>,
    pub max_templates: Option<usize>,
    pub headed: bool,
    pub no_monitor: bool,
}

impl Overrides {
    /// Reads whichever override flags the subcommand defines.
    pub fn from_matches(args: &ArgMatches) -> Self {
        Self {
            domains: args
                .try_get_many::<String>("domain")
                .ok()
                .flatten()
                .map(|values| values.cloned().collect())
                .unwrap_or_default(),
            output_dir: value(args, "output"),
            run_id: value(args, "run-id"),
            fresh: flag(args, "fresh"),
            discard_corrupt: flag(args, "discard-corrupt"),
            threads: value(args, "threads"),
            max_urls: value(args, "max-urls"),
            depth: value(args, "depth"),
            no_hybrid: flag(args, "no-hybrid"),
            pool_size: value(args, "pool-size"),
            max_templates: value(args, "max-templates"),
            headed: flag(args, "headed"),
            no_monitor: flag(args, "no-monitor"),
        }
    }

    pub fn apply(self, mut config: AxeConfig) -> AxeConfig {
        if !self.domains.is_empty() {
            config.domains = self.domains;
        }
        if let Some(dir) = self.output_dir {
            config.output_dir = dir;
        }
        if let Some(run_id) = self.run_id {
            config.run_id = run_id;
        }
        if self.fresh {
            config.resume = false;
        }
        if self.discard_corrupt {
            config.discard_corrupt_state = true;
        }
        if let Some(threads) = self.threads {
            config.crawl_concurrency = threads;
        }
        if let Some(max_urls) = self.max_urls {
            config.max_urls_per_domain = max_urls;
        }
        if let Some(depth) = self.depth {
            config.depth_limit = Some(depth);
        }
        if self.no_hybrid {
            config.hybrid_mode = false;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(max_templates) = self.max_templates {
            config.max_templates_per_domain = Some(max_templates);
        }
        if self.headed {
            config.headless = false;
        }
        if self.no_monitor {
            config.resource_monitoring.enabled = false;
        }
        config
    }
}

fn value<T: Clone + Send + Sync + 'static>(args: &ArgMatches, id: &str) -> Option<T> {
    args.try_get_one::<T>(id).ok().flatten().cloned()
}

fn flag(args: &ArgMatches, id: &str) -> bool {
    matches!(args.try_get_one::<bool>(id), Ok(Some(true)))
}

pub fn expand_path(path: &Path) -> PathBuf {
    PathBuf::from(shellexpand::tilde(&path.to_string_lossy()).as_ref())
}

/// Loads the JSON config at `path`, or the defaults when no file is given.
pub fn load_config(path: Option<&str>) -> Result<AxeConfig> {
    match path {
        Some(path) => {
            let expanded = expand_path(Path::new(path));
            AxeConfig::load(&expanded)
                .with_context(|| format!("Failed to load config {}", expanded.display()))
        }
        None => Ok(AxeConfig::default()),
    }
}

/// Config file, then command-line overrides, without validation.
pub fn configure(args: &ArgMatches) -> Result<AxeConfig> {
    let path = args.try_get_one::<String>("config").ok().flatten();
    let mut config = Overrides::from_matches(args).apply(load_config(path.map(String::as_str))?);
    config.output_dir = expand_path(&config.output_dir);
    Ok(config)
}

pub fn chrome_options(config: &AxeConfig) -> ChromeOptions {
    ChromeOptions {
        headless: config.headless,
        page_timeout: config.scan_timeout,
        user_agent: config.user_agent.clone(),
        ..ChromeOptions::default()
    }
}

/// Path of a URL for progress lines
pub fn extract_url_path(url: &str) -> String {
    Url::parse(url)
        .ok()
        .map(|u| {
            let path = u.path();
            if path.is_empty() { "/".to_string() } else { path.to_string() }
        })
        .unwrap_or_else(|| url.to_string())
}

/// Cancels the returned token on the first Ctrl-C.
pub fn shutdown_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, saving progress");
            trigger.cancel();
        }
    });
    token
}

fn spinner(quiet: bool) -> Result<ProgressBar> {
    if quiet {
        return Ok(ProgressBar::hidden());
    }
    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner:.cyan} {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(100));
    Ok(pb)
}

fn print_divider() {
    println!("{}", "═".repeat(60).bright_blue().bold());
}

fn print_heading(title: &str) {
    println!();
    print_divider();
    println!("{}", format!("  {}", title).bright_white().bold());
    print_divider();
}

fn print_status(status: RunStatus) {
    let label = match status {
        RunStatus::Success => status.as_str().green().bold(),
        RunStatus::PartialSuccess => status.as_str().yellow().bold(),
        RunStatus::Fatal => status.as_str().red().bold(),
    };
    println!("{} Status: {}", "→".blue(), label);
    println!();
}

/// Prints a failed run and maps it to a fatal status.
fn finish(result: Result<RunStatus>) -> RunStatus {
    match result {
        Ok(status) => status,
        Err(e) => {
            eprintln!("{} {:#}", "✗".red().bold(), e);
            RunStatus::Fatal
        }
    }
}

// Crawl

async fn crawl(
    config: &AxeConfig,
    shutdown: CancellationToken,
    quiet: bool,
) -> Result<(CrawlState, CrawlSummary)> {
    let http = HttpFetcher::new(config.fetch_timeout, &config.user_agent)
        .context("Failed to build HTTP client")?;
    let browsers = config.hybrid_mode.then(|| {
        SessionPool::new(
            ChromeSessionFactory::new(chrome_options(config)),
            config.pool_size.min(config.crawl_concurrency),
        )
    });
    let fetcher = Arc::new(HybridFetcher::new(http, browsers));

    let pb = spinner(quiet)?;
    let progress_pb = pb.clone();
    let callback: CrawlProgressCallback = Arc::new(move |progress: CrawlProgress| {
        progress_pb.set_message(format!(
            "[{} fetched, {} queued] {}",
            progress.fetched,
            progress.pending,
            extract_url_path(&progress.url)
        ));
    });

    let result = CrawlEngine::new(config.clone(), fetcher.clone())
        .with_progress_callback(callback)
        .run(shutdown)
        .await;
    fetcher.shutdown().await;
    pb.finish_and_clear();

    result.context("Crawl failed")
}

fn print_crawl_summary(config: &AxeConfig, state: &CrawlState, summary: &CrawlSummary) {
    print_heading("CRAWL SUMMARY");
    if summary.resumed {
        println!("{} Resumed from saved crawl state", "ℹ".blue());
    }
    println!(
        "{} Pages fetched: {} ({} rendered, {} failed)",
        "✓".green().bold(),
        summary.pages_fetched.to_string().cyan(),
        summary.rendered_fetches.to_string().cyan(),
        summary.fetch_failures.to_string().cyan()
    );
    println!(
        "{} Templates: {}  Unique pages: {}",
        "✓".green().bold(),
        summary.templates.to_string().cyan(),
        summary.unique_pages.to_string().cyan()
    );
    println!(
        "{} Links accepted: {}  rejected: {} ({} over template quota, {} capped, {} filtered)",
        "→".blue(),
        summary.decisions.accepted.to_string().cyan(),
        summary.decisions.rejected().to_string().cyan(),
        summary.decisions.quota_exceeded,
        summary.decisions.domain_cap + summary.decisions.global_cap,
        summary.decisions.filtered
    );

    for domain in &summary.domains {
        let templates = state.templates_for(domain).count();
        println!(
            "  {} {} {} templates, {} pages",
            "•".yellow(),
            domain.bright_white(),
            templates.to_string().cyan(),
            state.domain_count(domain).to_string().cyan()
        );
    }

    if summary.interrupted && summary.pending > 0 {
        println!(
            "{} Interrupted with {} pages queued; rerun to continue",
            "⚠".yellow().bold(),
            summary.pending.to_string().yellow()
        );
    }
    println!(
        "{} State: {}",
        "→".blue(),
        config.crawl_state_path().display().to_string().bright_white()
    );
    print_status(summary.status());
}

pub async fn handle_crawl(args: &ArgMatches, quiet: bool) -> RunStatus {
    finish(run_crawl(args, quiet).await)
}

async fn run_crawl(args: &ArgMatches, quiet: bool) -> Result<RunStatus> {
    let config = configure(args)?.validate().context("Invalid configuration")?;
    let shutdown = shutdown_on_ctrl_c();

    let (state, summary) = crawl(&config, shutdown, quiet).await?;
    if !quiet {
        print_crawl_summary(&config, &state, &summary);
    }
    Ok(summary.status())
}

// Scan

async fn scan(
    config: &AxeConfig,
    state: &CrawlState,
    shutdown: CancellationToken,
    quiet: bool,
) -> Result<ScanSummary> {
    let targets = select_targets(state, config.max_templates_per_domain);
    let findings_path = config.findings_path();
    let sink = JsonLinesSink::open(&findings_path, !config.resume)
        .await
        .with_context(|| format!("Failed to open {}", findings_path.display()))?;

    let monitor = ResourceMonitor::new(config.resource_monitoring.clone());
    let gate = monitor.gate();
    let monitor_shutdown = shutdown.child_token();
    let monitor_handle = monitor.spawn(SysinfoSampler::new(), monitor_shutdown.clone());

    let pb = spinner(quiet)?;
    let progress_pb = pb.clone();
    let callback: ScanProgressCallback = Arc::new(move |progress: ScanProgress| {
        progress_pb.set_message(format!(
            "[{} scanned, {} skipped, {} left] {}",
            progress.completed, progress.skipped, progress.remaining, progress.url
        ));
    });

    let result = ScanPool::new(config.clone(), ChromeSessionFactory::new(chrome_options(config)))
        .with_progress_callback(callback)
        .run(targets, Arc::new(sink), gate, shutdown)
        .await;

    monitor_shutdown.cancel();
    if let Err(e) = monitor_handle.await {
        warn!(error = %e, "Resource monitor task failed");
    }
    pb.finish_and_clear();

    result.context("Scan failed")
}

fn print_scan_summary(config: &AxeConfig, summary: &ScanSummary) {
    print_heading("SCAN SUMMARY");
    println!(
        "{} Targets: {} ({} already scanned)",
        "→".blue(),
        summary.total_targets.to_string().cyan(),
        summary.already_scanned.to_string().cyan()
    );
    println!(
        "{} Scanned: {}  Findings: {}",
        "✓".green().bold(),
        summary.completed.to_string().cyan(),
        summary.findings.to_string().cyan()
    );
    if summary.skipped > 0 {
        println!(
            "{} Skipped after retries: {}",
            "⚠".yellow().bold(),
            summary.skipped.to_string().yellow()
        );
    }
    if summary.interrupted {
        println!(
            "{} Interrupted; rerun with run id {} to resume",
            "⚠".yellow().bold(),
            config.run_id.bright_white()
        );
    }
    println!(
        "{} Findings: {}",
        "→".blue(),
        config.findings_path().display().to_string().bright_white()
    );
    print_status(summary.status());
}

fn require_crawl_state(config: &AxeConfig) -> Result<CrawlState> {
    let store = CheckpointStore::from_config(config);
    match store.load_crawl_state()? {
        Some(state) => Ok(state),
        None => bail!(
            "No crawl state at {}; run `axescope crawl` first",
            store.crawl_state_path().display()
        ),
    }
}

pub async fn handle_scan(args: &ArgMatches, quiet: bool) -> RunStatus {
    finish(run_scan(args, quiet).await)
}

async fn run_scan(args: &ArgMatches, quiet: bool) -> Result<RunStatus> {
    let config = configure(args)?.validate().context("Invalid configuration")?;
    let state = require_crawl_state(&config)?;
    let shutdown = shutdown_on_ctrl_c();

    let summary = scan(&config, &state, shutdown, quiet).await?;
    if !quiet {
        print_scan_summary(&config, &summary);
    }
    Ok(summary.status())
}

// Crawl then scan

pub async fn handle_run(args: &ArgMatches, quiet: bool) -> RunStatus {
    finish(run_all(args, quiet).await)
}

async fn run_all(args: &ArgMatches, quiet: bool) -> Result<RunStatus> {
    let config = configure(args)?.validate().context("Invalid configuration")?;
    let shutdown = shutdown_on_ctrl_c();

    let (state, crawl_summary) = crawl(&config, shutdown.clone(), quiet).await?;
    if !quiet {
        print_crawl_summary(&config, &state, &crawl_summary);
    }
    if shutdown.is_cancelled() {
        return Ok(crawl_summary.status().combine(RunStatus::PartialSuccess));
    }

    let scan_summary = scan(&config, &state, shutdown, quiet).await?;
    if !quiet {
        print_scan_summary(&config, &scan_summary);
    }
    Ok(crawl_summary.status().combine(scan_summary.status()))
}

// Status

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DomainStatus {
    pub templates: usize,
    pub unique_pages: usize,
}

/// What a run has left on disk.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusReport {
    pub crawled: bool,
    pub domains: BTreeMap<String, DomainStatus>,
    pub visited_urls: usize,
    pub pending: usize,
    pub targets: usize,
    pub scanned_targets: usize,
    pub findings: usize,
    pub scan_failures: usize,
}

pub fn status_report(
    checkpoint: Option<&CrawlCheckpoint>,
    record: &ResumeRecord,
    records: &[SinkRecord],
    max_templates_per_domain: Option<usize>,
) -> StatusReport {
    let mut report = StatusReport::default();
    for record in records {
        match record {
            SinkRecord::Finding(_) => report.findings += 1,
            SinkRecord::ScanFailure(_) => report.scan_failures += 1,
        }
    }

    let Some(checkpoint) = checkpoint else {
        return report;
    };
    let state = &checkpoint.state;
    report.crawled = true;
    report.visited_urls = state.visited_urls.len();
    report.pending = checkpoint.pending.len();
    for domain in state.domains() {
        report.domains.insert(
            domain.to_string(),
            DomainStatus {
                templates: state.templates_for(domain).count(),
                unique_pages: state.domain_count(domain),
            },
        );
    }

    let targets = select_targets(state, max_templates_per_domain);
    report.targets = targets.len();
    report.scanned_targets = targets.iter().filter(|t| record.contains(&t.url)).count();
    report
}

fn print_status_report(config: &AxeConfig, report: &StatusReport) {
    print_heading("RUN STATUS");
    println!(
        "{} Output: {}  Run id: {}",
        "→".blue(),
        config.output_dir.display().to_string().bright_white(),
        config.run_id.bright_white()
    );
    println!();

    if !report.crawled {
        println!("{} No crawl state saved yet", "ℹ".blue());
    } else {
        println!("{}", "CRAWL".bright_blue().bold());
        for (domain, status) in &report.domains {
            println!(
                "  {} {} {} templates, {} pages",
                "•".yellow(),
                domain.bright_white(),
                status.templates.to_string().cyan(),
                status.unique_pages.to_string().cyan()
            );
        }
        println!(
            "{} URLs seen: {}",
            "→".blue(),
            report.visited_urls.to_string().cyan()
        );
        if report.pending > 0 {
            println!(
                "{} Unfinished: {} pages queued",
                "⚠".yellow().bold(),
                report.pending.to_string().yellow()
            );
        }
        println!();
        println!("{}", "SCAN".bright_blue().bold());
        println!(
            "{} Targets scanned: {}/{}",
            "→".blue(),
            report.scanned_targets.to_string().cyan(),
            report.targets.to_string().cyan()
        );
    }

    println!(
        "{} Findings: {}  Scan failures: {}",
        "→".blue(),
        report.findings.to_string().cyan(),
        report.scan_failures.to_string().cyan()
    );
    println!();
}

pub async fn handle_status(args: &ArgMatches) -> RunStatus {
    finish(show_status(args).await)
}

async fn show_status(args: &ArgMatches) -> Result<RunStatus> {
    let config = configure(args)?;
    let store = CheckpointStore::from_config(&config);

    let checkpoint = store.load_crawl()?;
    let record = store.load_resume()?.unwrap_or_default();
    let findings_path = config.findings_path();
    let records = if findings_path.exists() {
        read_records(&findings_path)
            .await
            .with_context(|| format!("Failed to read {}", findings_path.display()))?
    } else {
        Vec::new()
    };

    let report = status_report(
        checkpoint.as_ref(),
        &record,
        &records,
        config.max_templates_per_domain,
    );
    print_status_report(&config, &report);
    Ok(RunStatus::Success)
}
