//! Run configuration.
//!
//! Every tunable lives in one [`AxeConfig`] value that is validated once and
//! then handed to each component at construction. Durations are written as
//! seconds (floats allowed) in the JSON form.

use crate::error::{CoreError, Result};
use axescope_scanner::fetcher::DEFAULT_USER_AGENT;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const CRAWL_STATE_FILE: &str = "crawl_state.json";
pub const FINDINGS_FILE: &str = "findings.jsonl";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AxeConfig {
    pub domains: Vec<String>,
    pub max_urls_per_domain: usize,
    /// Cap on unique pages across all domains
    pub max_total_urls: Option<usize>,
    /// Only the N most frequent templates per domain are scanned
    pub max_templates_per_domain: Option<usize>,
    /// Pages fetched per template before further matches are only counted
    pub max_samples_per_template: Option<usize>,
    pub max_static_segment_len: usize,
    pub depth_limit: Option<usize>,
    pub hybrid_mode: bool,
    pub pending_threshold: usize,
    pub crawl_concurrency: usize,
    #[serde(with = "secs")]
    pub fetch_timeout: Duration,
    pub fetch_retries: u32,
    #[serde(with = "secs")]
    pub retry_backoff: Duration,
    pub checkpoint_interval: usize,
    pub pool_size: usize,
    #[serde(with = "secs")]
    pub sleep_time: Duration,
    #[serde(with = "secs")]
    pub scan_timeout: Duration,
    pub scan_retries: u32,
    pub resume_save_interval: usize,
    pub headless: bool,
    pub resume: bool,
    /// Start from an empty state instead of failing on a corrupt checkpoint
    pub discard_corrupt_state: bool,
    pub run_id: String,
    pub output_dir: PathBuf,
    pub user_agent: String,
    pub resource_monitoring: ResourceMonitoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceMonitoringConfig {
    pub enabled: bool,
    pub cpu_threshold: f32,
    pub memory_threshold: f32,
    #[serde(with = "secs")]
    pub check_interval: Duration,
    #[serde(with = "secs")]
    pub cool_down_time: Duration,
}

impl Default for AxeConfig {
    fn default() -> Self {
        Self {
            domains: Vec::new(),
            max_urls_per_domain: 1000,
            max_total_urls: None,
            max_templates_per_domain: None,
            max_samples_per_template: None,
            max_static_segment_len: 40,
            depth_limit: Some(10),
            hybrid_mode: true,
            pending_threshold: 30,
            crawl_concurrency: 8,
            fetch_timeout: Duration::from_secs(30),
            fetch_retries: 3,
            retry_backoff: Duration::from_secs(1),
            checkpoint_interval: 50,
            pool_size: 4,
            sleep_time: Duration::from_secs(1),
            scan_timeout: Duration::from_secs(30),
            scan_retries: 1,
            resume_save_interval: 5,
            headless: true,
            resume: true,
            discard_corrupt_state: false,
            run_id: "default".to_string(),
            output_dir: PathBuf::from("output"),
            user_agent: DEFAULT_USER_AGENT.to_string(),
            resource_monitoring: ResourceMonitoringConfig::default(),
        }
    }
}

impl Default for ResourceMonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cpu_threshold: 90.0,
            memory_threshold: 85.0,
            check_interval: Duration::from_secs(3),
            cool_down_time: Duration::from_secs(7),
        }
    }
}

impl AxeConfig {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| CoreError::Configuration(e.to_string()))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CoreError::Configuration(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::from_json(&content)
    }

    /// Checks every threshold and trims the domain list.
    pub fn validate(mut self) -> Result<Self> {
        self.domains = self
            .domains
            .iter()
            .map(|d| d.trim().to_string())
            .filter(|d| !d.is_empty())
            .collect();
        if self.domains.is_empty() {
            return Err(CoreError::NoDomains);
        }

        let positive = [
            ("pool_size", self.pool_size),
            ("crawl_concurrency", self.crawl_concurrency),
            ("max_urls_per_domain", self.max_urls_per_domain),
            ("max_static_segment_len", self.max_static_segment_len),
            ("checkpoint_interval", self.checkpoint_interval),
            ("resume_save_interval", self.resume_save_interval),
        ];
        for (name, value) in positive {
            if value == 0 {
                return Err(CoreError::Configuration(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }

        let optional_caps = [
            ("max_total_urls", self.max_total_urls),
            ("max_templates_per_domain", self.max_templates_per_domain),
            ("max_samples_per_template", self.max_samples_per_template),
        ];
        for (name, value) in optional_caps {
            if value == Some(0) {
                return Err(CoreError::Configuration(format!(
                    "{} must be at least 1 when set",
                    name
                )));
            }
        }

        let monitoring = &self.resource_monitoring;
        for (name, value) in [
            ("cpu_threshold", monitoring.cpu_threshold),
            ("memory_threshold", monitoring.memory_threshold),
        ] {
            if !(value > 0.0 && value <= 100.0) {
                return Err(CoreError::Configuration(format!(
                    "{} must be within (0, 100], got {}",
                    name, value
                )));
            }
        }
        if monitoring.check_interval.is_zero() {
            return Err(CoreError::Configuration(
                "check_interval must be greater than zero".to_string(),
            ));
        }
        if self.fetch_timeout.is_zero() || self.scan_timeout.is_zero() {
            return Err(CoreError::Configuration(
                "timeouts must be greater than zero".to_string(),
            ));
        }

        if self.run_id.is_empty()
            || !self
                .run_id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(CoreError::Configuration(format!(
                "run_id '{}' may only contain letters, digits, '-' and '_'",
                self.run_id
            )));
        }

        Ok(self)
    }

    pub fn crawl_state_path(&self) -> PathBuf {
        self.output_dir.join(CRAWL_STATE_FILE)
    }

    pub fn resume_path(&self) -> PathBuf {
        self.output_dir.join(format!("resume_{}.json", self.run_id))
    }

    pub fn findings_path(&self) -> PathBuf {
        self.output_dir.join(FINDINGS_FILE)
    }
}

mod secs {
    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(D::Error::custom(format!(
                "duration must be a non-negative number of seconds, got {}",
                secs
            )));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn with_domain() -> AxeConfig {
        AxeConfig {
            domains: vec!["example.com".to_string()],
            ..AxeConfig::default()
        }
    }

    #[test]
    fn test_defaults_validate() {
        let config = with_domain().validate().unwrap();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.pending_threshold, 30);
        assert!(config.hybrid_mode);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = AxeConfig::from_json(
            r#"{"domains": ["a.com"], "sleep_time": 1.5,
                "resource_monitoring": {"cool_down_time": 2}}"#,
        )
        .unwrap();

        assert_eq!(config.sleep_time, Duration::from_millis(1500));
        assert_eq!(config.resource_monitoring.cool_down_time, Duration::from_secs(2));
        assert_eq!(config.resource_monitoring.cpu_threshold, 90.0);
        assert_eq!(config.max_urls_per_domain, 1000);
    }

    #[test]
    fn test_negative_pool_size_is_configuration_error() {
        let err = AxeConfig::from_json(r#"{"domains": ["a.com"], "pool_size": -1}"#).unwrap_err();
        assert!(matches!(err, CoreError::Configuration(_)));
    }

    #[test]
    fn test_zero_pool_size_rejected() {
        let config = AxeConfig {
            pool_size: 0,
            ..with_domain()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("pool_size"));
        assert!(err.is_fatal());
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let mut config = with_domain();
        config.resource_monitoring.memory_threshold = 120.0;
        assert!(matches!(
            config.validate(),
            Err(CoreError::Configuration(_))
        ));
    }

    #[test]
    fn test_blank_domains_are_no_domains() {
        let config = AxeConfig {
            domains: vec!["  ".to_string()],
            ..AxeConfig::default()
        };
        assert!(matches!(config.validate(), Err(CoreError::NoDomains)));
    }

    #[test]
    fn test_run_id_must_be_path_safe() {
        let config = AxeConfig {
            run_id: "../escape".to_string(),
            ..with_domain()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_paths_derive_from_output_dir() {
        let config = AxeConfig {
            output_dir: PathBuf::from("/tmp/axe"),
            run_id: "nightly".to_string(),
            ..with_domain()
        };
        assert_eq!(config.crawl_state_path(), PathBuf::from("/tmp/axe/crawl_state.json"));
        assert_eq!(config.resume_path(), PathBuf::from("/tmp/axe/resume_nightly.json"));
        assert_eq!(config.findings_path(), PathBuf::from("/tmp/axe/findings.jsonl"));
    }
}
