//! Host resource monitor.
//!
//! The monitor is the single writer of a `throttled` flag. Scan workers hold a
//! [`ThrottleGate`] and wait on it before taking new work; work already in
//! flight is never interrupted.

use crate::config::ResourceMonitoringConfig;
use sysinfo::System;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceSample {
    pub cpu_percent: f32,
    pub memory_percent: f32,
}

pub trait ResourceSampler: Send {
    fn sample(&mut self) -> ResourceSample;
}

/// Whole-host CPU and memory usage.
pub struct SysinfoSampler {
    system: System,
}

impl SysinfoSampler {
    pub fn new() -> Self {
        let mut system = System::new();
        // CPU usage is a delta; prime it so the first real sample is meaningful
        system.refresh_cpu_usage();
        system.refresh_memory();
        Self { system }
    }
}

impl Default for SysinfoSampler {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceSampler for SysinfoSampler {
    fn sample(&mut self) -> ResourceSample {
        self.system.refresh_cpu_usage();
        self.system.refresh_memory();

        let total = self.system.total_memory();
        let memory_percent = if total == 0 {
            0.0
        } else {
            (self.system.used_memory() as f64 / total as f64 * 100.0) as f32
        };

        ResourceSample {
            cpu_percent: self.system.global_cpu_usage(),
            memory_percent,
        }
    }
}

/// Read side of the throttle flag.
#[derive(Clone)]
pub struct ThrottleGate {
    rx: watch::Receiver<bool>,
}

impl ThrottleGate {
    /// A gate that is never closed.
    pub fn open() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_throttled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Returns once the flag is clear. A stopped monitor counts as clear.
    pub async fn wait_until_clear(&mut self) {
        let _ = self.rx.wait_for(|throttled| !*throttled).await;
    }
}

pub struct ResourceMonitor {
    config: ResourceMonitoringConfig,
    tx: watch::Sender<bool>,
    last_breach: Option<Instant>,
}

impl ResourceMonitor {
    pub fn new(config: ResourceMonitoringConfig) -> Self {
        let (tx, _rx) = watch::channel(false);
        Self {
            config,
            tx,
            last_breach: None,
        }
    }

    pub fn gate(&self) -> ThrottleGate {
        ThrottleGate {
            rx: self.tx.subscribe(),
        }
    }

    /// Applies one sample taken at `now` and returns the resulting flag.
    pub fn observe(&mut self, sample: ResourceSample, now: Instant) -> bool {
        let breached = sample.cpu_percent > self.config.cpu_threshold
            || sample.memory_percent > self.config.memory_threshold;
        if breached {
            self.last_breach = Some(now);
        }

        let throttled = self
            .last_breach
            .is_some_and(|at| now.duration_since(at) < self.config.cool_down_time);

        let was_throttled = *self.tx.borrow();
        if throttled && !was_throttled {
            warn!(
                cpu = sample.cpu_percent,
                memory = sample.memory_percent,
                "Resource threshold exceeded, pausing new work"
            );
        } else if !throttled && was_throttled {
            info!("Resource usage back to normal, resuming work");
        }
        self.tx.send_if_modified(|current| {
            let changed = *current != throttled;
            *current = throttled;
            changed
        });

        throttled
    }

    /// Samples every `check_interval` until `shutdown`. Does nothing when
    /// monitoring is disabled, so the flag is never raised.
    pub async fn run<S: ResourceSampler>(mut self, mut sampler: S, shutdown: CancellationToken) {
        if !self.config.enabled {
            debug!("Resource monitoring disabled");
            return;
        }

        let mut ticker = tokio::time::interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    let sample = sampler.sample();
                    debug!(cpu = sample.cpu_percent, memory = sample.memory_percent, "Resource sample");
                    self.observe(sample, Instant::now());
                }
            }
        }

        // Release anyone still waiting
        self.tx.send_replace(false);
    }

    pub fn spawn<S: ResourceSampler + 'static>(
        self,
        sampler: S,
        shutdown: CancellationToken,
    ) -> JoinHandle<()> {
        tokio::spawn(self.run(sampler, shutdown))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn config() -> ResourceMonitoringConfig {
        ResourceMonitoringConfig {
            enabled: true,
            cpu_threshold: 90.0,
            memory_threshold: 85.0,
            check_interval: Duration::from_secs(3),
            cool_down_time: Duration::from_secs(7),
        }
    }

    fn sample(cpu: f32, memory: f32) -> ResourceSample {
        ResourceSample {
            cpu_percent: cpu,
            memory_percent: memory,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_holds_for_cool_down_after_last_breach() {
        let mut monitor = ResourceMonitor::new(config());
        let gate = monitor.gate();
        let start = Instant::now();

        assert!(monitor.observe(sample(95.0, 10.0), start));
        assert!(gate.is_throttled());
        assert!(monitor.observe(sample(10.0, 90.0), start + Duration::from_secs(3)));
        // cool down restarts from the memory breach at 3s
        assert!(monitor.observe(sample(10.0, 10.0), start + Duration::from_secs(9)));
        assert!(!monitor.observe(sample(10.0, 10.0), start + Duration::from_secs(10)));
        assert!(!gate.is_throttled());
    }

    #[tokio::test]
    async fn test_thresholds_are_exclusive() {
        let mut monitor = ResourceMonitor::new(config());
        assert!(!monitor.observe(sample(90.0, 85.0), Instant::now()));
    }

    #[tokio::test]
    async fn test_open_gate_never_waits() {
        let mut gate = ThrottleGate::open();
        assert!(!gate.is_throttled());
        gate.wait_until_clear().await;
    }
}
