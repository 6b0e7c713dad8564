//! Structural page templates.
//!
//! Pages whose paths differ only in id-like segments share a
//! [`TemplateSignature`]; one of them is enough to represent the rest.

use crate::normalize::NormalizedUrl;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

pub const PLACEHOLDER: &str = "{var}";

static UUID: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^[0-9a-f]{8}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{4}-[0-9a-f]{12}$").unwrap()
});

static HEX_RUN: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)^[0-9a-f-]{8,}$").unwrap());

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateSignature(String);

impl TemplateSignature {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TemplateSignature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TemplateSignature {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

#[derive(Debug, Clone)]
pub struct TemplateClassifier {
    max_static_segment_len: usize,
}

impl Default for TemplateClassifier {
    fn default() -> Self {
        Self::new(40)
    }
}

impl TemplateClassifier {
    pub fn new(max_static_segment_len: usize) -> Self {
        Self {
            max_static_segment_len,
        }
    }

    /// `<domain>:/<seg>/...` with id-like segments replaced by `{var}`.
    /// The query string never contributes.
    pub fn classify(&self, domain: &str, url: &NormalizedUrl) -> TemplateSignature {
        let path = url.path();
        let segments: Vec<&str> = path
            .split('/')
            .filter(|s| !s.is_empty())
            .map(|s| if self.is_variable(s) { PLACEHOLDER } else { s })
            .collect();

        TemplateSignature(format!("{}:/{}", domain, segments.join("/")))
    }

    pub fn is_variable(&self, segment: &str) -> bool {
        if segment.chars().all(|c| c.is_ascii_digit()) {
            return true;
        }
        if UUID.is_match(segment) {
            return true;
        }
        if HEX_RUN.is_match(segment) && segment.chars().any(|c| c.is_ascii_digit()) {
            return true;
        }
        segment.chars().count() > self.max_static_segment_len
    }
}
