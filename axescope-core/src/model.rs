use crate::normalize::NormalizedUrl;
use crate::state::CrawlState;
use crate::template::TemplateSignature;
use axescope_scanner::{Severity, Violation};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};

/// One representative page per template, handed to the scan pool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanTarget {
    pub url: NormalizedUrl,
    pub template_signature: TemplateSignature,
    pub domain: String,
}

/// Scan targets, most frequent templates first within each domain.
///
/// With `max_templates_per_domain` set only that many templates per domain
/// are kept. A URL representing several templates is scanned once.
pub fn select_targets(state: &CrawlState, max_templates_per_domain: Option<usize>) -> Vec<ScanTarget> {
    let mut targets = Vec::new();
    let mut seen: HashSet<&NormalizedUrl> = HashSet::new();

    for domain in state.domains() {
        let mut templates: Vec<_> = state.templates_for(domain).collect();
        templates.sort_by(|(sig_a, a), (sig_b, b)| {
            b.sample_count.cmp(&a.sample_count).then_with(|| sig_a.cmp(sig_b))
        });
        if let Some(limit) = max_templates_per_domain {
            templates.truncate(limit);
        }

        for (signature, record) in templates {
            if !seen.insert(&record.representative_url) {
                continue;
            }
            targets.push(ScanTarget {
                url: record.representative_url.clone(),
                template_signature: signature.clone(),
                domain: domain.to_string(),
            });
        }
    }

    targets
}

/// URLs already scanned by a run, persisted between invocations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeRecord {
    pub visited_scan_urls: BTreeSet<NormalizedUrl>,
}

impl ResumeRecord {
    pub fn contains(&self, url: &NormalizedUrl) -> bool {
        self.visited_scan_urls.contains(url)
    }

    pub fn mark(&mut self, url: NormalizedUrl) -> bool {
        self.visited_scan_urls.insert(url)
    }

    pub fn len(&self) -> usize {
        self.visited_scan_urls.len()
    }

    pub fn is_empty(&self) -> bool {
        self.visited_scan_urls.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub url: NormalizedUrl,
    pub template_signature: TemplateSignature,
    pub rule_id: String,
    pub severity: Severity,
    pub details: String,
    pub scanned_at: DateTime<Utc>,
}

impl Finding {
    pub fn from_violation(target: &ScanTarget, violation: Violation, scanned_at: DateTime<Utc>) -> Self {
        Self {
            url: target.url.clone(),
            template_signature: target.template_signature.clone(),
            rule_id: violation.rule_id,
            severity: violation.severity,
            details: violation.details,
            scanned_at,
        }
    }
}

/// Marker left for a target that was given up on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScanFailure {
    pub url: NormalizedUrl,
    pub template_signature: TemplateSignature,
    pub reason: String,
    pub attempts: u32,
}

/// A line of the findings file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SinkRecord {
    Finding(Finding),
    ScanFailure(ScanFailure),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Success,
    /// Finished, but some targets were skipped or the run was interrupted
    PartialSuccess,
    Fatal,
}

impl RunStatus {
    pub fn exit_code(&self) -> i32 {
        match self {
            RunStatus::Success => 0,
            RunStatus::PartialSuccess => 2,
            RunStatus::Fatal => 1,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::PartialSuccess => "partial success",
            RunStatus::Fatal => "fatal",
        }
    }

    /// The worse of two outcomes.
    pub fn combine(self, other: RunStatus) -> RunStatus {
        match (self, other) {
            (RunStatus::Fatal, _) | (_, RunStatus::Fatal) => RunStatus::Fatal,
            (RunStatus::PartialSuccess, _) | (_, RunStatus::PartialSuccess) => {
                RunStatus::PartialSuccess
            }
            _ => RunStatus::Success,
        }
    }
}
