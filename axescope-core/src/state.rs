use crate::normalize::NormalizedUrl;
use crate::template::TemplateSignature;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// One page type. The signature is the key it is stored under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TemplateRecord {
    pub domain: String,
    /// First URL seen for the template; never replaced
    pub representative_url: NormalizedUrl,
    pub sample_count: usize,
}

/// Everything the frontier knows about a crawl.
///
/// Ordered collections keep the persisted form byte-stable between saves of
/// the same state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlState {
    pub templates: BTreeMap<TemplateSignature, TemplateRecord>,
    pub visited_urls: BTreeSet<NormalizedUrl>,
    pub unique_pages: BTreeSet<NormalizedUrl>,
    pub per_domain_counts: BTreeMap<String, usize>,
}

/// A queued fetch that had not completed when a checkpoint was taken.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingFetch {
    pub domain: String,
    pub url: NormalizedUrl,
    pub depth: usize,
}

/// What goes into `crawl_state.json`: the state plus the unfinished backlog,
/// which is empty once a crawl has run to completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlCheckpoint {
    #[serde(flatten)]
    pub state: CrawlState,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pending: Vec<PendingFetch>,
}

impl CrawlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn domain_count(&self, domain: &str) -> usize {
        self.per_domain_counts.get(domain).copied().unwrap_or(0)
    }

    pub fn templates_for<'a>(
        &'a self,
        domain: &'a str,
    ) -> impl Iterator<Item = (&'a TemplateSignature, &'a TemplateRecord)> + 'a {
        self.templates.iter().filter(move |(_, r)| r.domain == domain)
    }

    pub fn domains(&self) -> BTreeSet<&str> {
        self.templates.values().map(|r| r.domain.as_str()).collect()
    }

    /// Structural checks run on every loaded checkpoint.
    pub fn verify(&self, max_urls_per_domain: Option<usize>) -> Result<(), String> {
        if let Some(url) = self.unique_pages.difference(&self.visited_urls).next() {
            return Err(format!("unique page {} is not marked visited", url));
        }
        if let Some((sig, _)) = self.templates.iter().find(|(_, r)| r.sample_count == 0) {
            return Err(format!("template {} has a zero sample count", sig));
        }
        if let Some(max) = max_urls_per_domain
            && let Some((domain, count)) = self.per_domain_counts.iter().find(|(_, c)| **c > max)
        {
            return Err(format!(
                "domain {} has {} pages, above the cap of {}",
                domain, count, max
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::normalize::normalize;

    fn url(raw: &str) -> NormalizedUrl {
        normalize(raw, None).unwrap()
    }

    #[test]
    fn test_verify_detects_broken_invariants() {
        let mut state = CrawlState::new();
        state.unique_pages.insert(url("https://a.com/x"));
        assert!(state.verify(None).unwrap_err().contains("not marked visited"));

        state.visited_urls.insert(url("https://a.com/x"));
        state.per_domain_counts.insert("a.com".to_string(), 3);
        assert!(state.verify(None).is_ok());
        assert!(state.verify(Some(2)).is_err());
    }

    #[test]
    fn test_templates_for_domain() {
        let mut state = CrawlState::new();
        for (sig, domain) in [("a.com:/", "a.com"), ("b.com:/", "b.com"), ("a.com:/p", "a.com")] {
            state.templates.insert(
                TemplateSignature::from(sig),
                TemplateRecord {
                    domain: domain.to_string(),
                    representative_url: url(&format!("https://{}/", domain)),
                    sample_count: 1,
                },
            );
        }

        assert_eq!(state.templates_for("a.com").count(), 2);
        assert_eq!(state.domains().into_iter().collect::<Vec<_>>(), vec!["a.com", "b.com"]);
    }
}
