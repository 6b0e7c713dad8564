// Chooses between a plain HTTP fetch and a browser render for each dequeue

use crate::config::AxeConfig;
use axescope_scanner::FetchMode;
use regex::Regex;
use std::sync::LazyLock;

const SMALL_PAGE_BYTES: usize = 5000;
const NEAR_EMPTY_BODY_CHARS: usize = 200;

const SCRIPT_INDICATORS: &[&str] = &[
    "window.addEventListener",
    "document.addEventListener",
    "onclick=",
    "axios",
    "fetch(",
    "window.onload",
    "jQuery",
    "$(",
    "data-react",
    "data-vue",
];

const FRAMEWORK_MARKERS: &[&str] = &[
    "ng-app",
    "data-reactroot",
    "vue-app",
    "ember-app",
    "backbone",
    "svelte",
    "alpinejs",
];

static BODY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)<body[^>]*>(.*?)</body>").unwrap());

#[derive(Debug, Clone, Copy)]
pub struct FetchModePolicy {
    hybrid_mode: bool,
    pending_threshold: usize,
}

impl FetchModePolicy {
    pub fn new(hybrid_mode: bool, pending_threshold: usize) -> Self {
        Self {
            hybrid_mode,
            pending_threshold,
        }
    }

    pub fn from_config(config: &AxeConfig) -> Self {
        Self::new(config.hybrid_mode, config.pending_threshold)
    }

    /// Renders while the backlog is short, falls back to HTTP once it
    /// reaches the threshold.
    pub fn decide(&self, pending_backlog_depth: usize, hybrid_mode_enabled: bool) -> FetchMode {
        if hybrid_mode_enabled && pending_backlog_depth < self.pending_threshold {
            FetchMode::RenderedBrowser
        } else {
            FetchMode::HttpOnly
        }
    }

    pub fn select(&self, pending_backlog_depth: usize) -> FetchMode {
        self.decide(pending_backlog_depth, self.hybrid_mode)
    }

    pub fn hybrid_mode(&self) -> bool {
        self.hybrid_mode
    }
}

/// Guesses whether an HTTP-fetched page only shows its content after
/// client-side rendering.
pub fn needs_javascript(body: &str) -> bool {
    if body.len() < SMALL_PAGE_BYTES {
        if SCRIPT_INDICATORS.iter().any(|i| body.contains(i)) {
            return true;
        }
        if let Some(captures) = BODY.captures(body)
            && let Some(inner) = captures.get(1)
            && inner.as_str().trim().len() < NEAR_EMPTY_BODY_CHARS
        {
            return true;
        }
    }

    if FRAMEWORK_MARKERS.iter().any(|m| body.contains(m)) {
        return true;
    }

    body.contains("href=\"javascript:")
}
