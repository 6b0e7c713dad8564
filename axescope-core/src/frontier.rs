//! Frontier controller: the only writer of [`CrawlState`].
//!
//! Every discovered link is offered here. The controller decides whether the
//! link is worth a fetch and records what it decided, so at most a bounded
//! number of pages per template and per domain is ever fetched.

use crate::config::AxeConfig;
use crate::filters;
use crate::normalize::{NormalizedUrl, normalize};
use crate::state::{CrawlState, TemplateRecord};
use crate::template::TemplateClassifier;
use serde::Serialize;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Accepted,
    DuplicateVisited,
    DuplicateTemplateQuotaExceeded,
    DomainCapExceeded,
    GlobalCapExceeded,
    /// Unparseable, filtered out, or on another domain
    Filtered,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Accepted => "accepted",
            Decision::DuplicateVisited => "duplicate_visited",
            Decision::DuplicateTemplateQuotaExceeded => "duplicate_template_quota_exceeded",
            Decision::DomainCapExceeded => "domain_cap_exceeded",
            Decision::GlobalCapExceeded => "global_cap_exceeded",
            Decision::Filtered => "filtered",
        }
    }
}

/// Count of each decision made since the controller was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrontierStats {
    pub accepted: usize,
    pub duplicate_visited: usize,
    pub quota_exceeded: usize,
    pub domain_cap: usize,
    pub global_cap: usize,
    pub filtered: usize,
}

impl FrontierStats {
    fn record(&mut self, decision: Decision) {
        let counter = match decision {
            Decision::Accepted => &mut self.accepted,
            Decision::DuplicateVisited => &mut self.duplicate_visited,
            Decision::DuplicateTemplateQuotaExceeded => &mut self.quota_exceeded,
            Decision::DomainCapExceeded => &mut self.domain_cap,
            Decision::GlobalCapExceeded => &mut self.global_cap,
            Decision::Filtered => &mut self.filtered,
        };
        *counter += 1;
    }

    pub fn rejected(&self) -> usize {
        self.duplicate_visited + self.quota_exceeded + self.domain_cap + self.global_cap + self.filtered
    }
}

#[derive(Debug, Clone, Copy)]
struct Limits {
    max_urls_per_domain: usize,
    max_total_urls: Option<usize>,
    max_samples_per_template: Option<usize>,
}

pub struct FrontierController {
    state: CrawlState,
    classifier: TemplateClassifier,
    limits: Limits,
    stats: FrontierStats,
}

impl FrontierController {
    pub fn new(config: &AxeConfig) -> Self {
        Self::with_state(config, CrawlState::new())
    }

    /// Continues from a previously persisted state.
    pub fn with_state(config: &AxeConfig, state: CrawlState) -> Self {
        Self {
            state,
            classifier: TemplateClassifier::new(config.max_static_segment_len),
            limits: Limits {
                max_urls_per_domain: config.max_urls_per_domain,
                max_total_urls: config.max_total_urls,
                max_samples_per_template: config.max_samples_per_template,
            },
            stats: FrontierStats::default(),
        }
    }

    pub fn offer(&mut self, domain: &str, raw_url: &str) -> Decision {
        self.admit(domain, raw_url).0
    }

    /// Same as [`offer`](Self::offer), also handing back the normalized URL
    /// so an accepted link can be queued for fetching.
    pub fn admit(&mut self, domain: &str, raw_url: &str) -> (Decision, Option<NormalizedUrl>) {
        let (decision, url) = self.decide(domain, raw_url);
        self.stats.record(decision);
        trace!(domain, url = raw_url, decision = decision.as_str(), "Frontier decision");
        (decision, url)
    }

    fn decide(&mut self, domain: &str, raw_url: &str) -> (Decision, Option<NormalizedUrl>) {
        if filters::check_raw(raw_url).is_some() {
            return (Decision::Filtered, None);
        }
        let Ok(url) = normalize(raw_url, None) else {
            return (Decision::Filtered, None);
        };
        let Ok(parsed) = url.to_url() else {
            return (Decision::Filtered, None);
        };
        if filters::check_url(&parsed).is_some() || url.domain().as_deref() != Some(domain) {
            return (Decision::Filtered, None);
        }

        if self.state.visited_urls.contains(&url) {
            return (Decision::DuplicateVisited, Some(url));
        }

        let signature = self.classifier.classify(domain, &url);

        if self.state.domain_count(domain) >= self.limits.max_urls_per_domain {
            return (Decision::DomainCapExceeded, Some(url));
        }
        if let Some(max_total) = self.limits.max_total_urls
            && self.state.unique_pages.len() >= max_total
        {
            return (Decision::GlobalCapExceeded, Some(url));
        }

        if let Some(max_samples) = self.limits.max_samples_per_template
            && let Some(record) = self.state.templates.get_mut(&signature)
            && record.sample_count >= max_samples
        {
            record.sample_count += 1;
            self.state.visited_urls.insert(url.clone());
            return (Decision::DuplicateTemplateQuotaExceeded, Some(url));
        }

        self.state.visited_urls.insert(url.clone());
        self.state.unique_pages.insert(url.clone());
        self.state
            .templates
            .entry(signature)
            .and_modify(|record| record.sample_count += 1)
            .or_insert_with(|| TemplateRecord {
                domain: domain.to_string(),
                representative_url: url.clone(),
                sample_count: 1,
            });
        *self
            .state
            .per_domain_counts
            .entry(domain.to_string())
            .or_insert(0) += 1;

        (Decision::Accepted, Some(url))
    }

    pub fn state(&self) -> &CrawlState {
        &self.state
    }

    pub fn into_state(self) -> CrawlState {
        self.state
    }

    pub fn stats(&self) -> FrontierStats {
        self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn controller(config: AxeConfig) -> FrontierController {
        FrontierController::new(&config)
    }

    fn config() -> AxeConfig {
        AxeConfig {
            domains: vec!["x.com".to_string()],
            ..AxeConfig::default()
        }
    }

    #[test]
    fn test_same_signature_counts_samples() {
        let mut frontier = controller(config());
        assert_eq!(frontier.offer("x.com", "https://x.com/p/1"), Decision::Accepted);
        assert_eq!(frontier.offer("x.com", "https://x.com/p/2"), Decision::Accepted);

        let state = frontier.state();
        assert_eq!(state.templates.len(), 1);
        let record = state.templates.values().next().unwrap();
        assert_eq!(record.sample_count, 2);
        assert_eq!(record.representative_url.as_str(), "https://x.com/p/1");
    }

    #[test]
    fn test_reoffer_is_duplicate() {
        let mut frontier = controller(config());
        frontier.offer("x.com", "https://x.com/a");
        assert_eq!(frontier.offer("x.com", "https://x.com/a#frag"), Decision::DuplicateVisited);
        assert_eq!(frontier.offer("x.com", "https://www.x.com/a"), Decision::Accepted);
        assert_eq!(frontier.stats().duplicate_visited, 1);
    }

    #[test]
    fn test_filtered_urls_are_not_visited() {
        let mut frontier = controller(config());
        assert_eq!(frontier.offer("x.com", "mailto:a@x.com"), Decision::Filtered);
        assert_eq!(frontier.offer("x.com", "https://other.com/"), Decision::Filtered);
        assert_eq!(frontier.offer("x.com", "https://x.com/logo.png"), Decision::Filtered);
        assert!(frontier.state().visited_urls.is_empty());
        assert_eq!(frontier.stats().filtered, 3);
    }

    #[test]
    fn test_domain_cap() {
        let mut frontier = controller(AxeConfig {
            max_urls_per_domain: 2,
            ..config()
        });
        frontier.offer("x.com", "https://x.com/a");
        frontier.offer("x.com", "https://x.com/b");
        assert_eq!(frontier.offer("x.com", "https://x.com/c"), Decision::DomainCapExceeded);
        assert!(!frontier.state().visited_urls.iter().any(|u| u.as_str().ends_with("/c")));
        assert_eq!(frontier.state().domain_count("x.com"), 2);
    }

    #[test]
    fn test_quota_marks_visited_and_counts() {
        let mut frontier = controller(AxeConfig {
            max_samples_per_template: Some(1),
            ..config()
        });
        assert_eq!(frontier.offer("x.com", "https://x.com/p/1"), Decision::Accepted);
        assert_eq!(
            frontier.offer("x.com", "https://x.com/p/2"),
            Decision::DuplicateTemplateQuotaExceeded
        );
        assert_eq!(frontier.offer("x.com", "https://x.com/p/2"), Decision::DuplicateVisited);

        let state = frontier.state();
        assert_eq!(state.unique_pages.len(), 1);
        assert_eq!(state.visited_urls.len(), 2);
        assert_eq!(state.domain_count("x.com"), 1);
        assert_eq!(state.templates.values().next().unwrap().sample_count, 2);
    }
}
