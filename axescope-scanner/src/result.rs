use serde::{Deserialize, Serialize};
use std::time::Duration;

/// How a page was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FetchMode {
    HttpOnly,
    RenderedBrowser,
}

impl FetchMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            FetchMode::HttpOnly => "http",
            FetchMode::RenderedBrowser => "browser",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedPage {
    pub url: String,
    pub final_url: String,
    pub status_code: u16,
    pub content_type: Option<String>,
    pub response_time: Duration,
    pub mode: FetchMode,
    pub body: String,
    pub links_found: Vec<String>,
}

impl FetchedPage {
    pub fn new(url: String, mode: FetchMode) -> Self {
        Self {
            final_url: url.clone(),
            url,
            status_code: 0,
            content_type: None,
            response_time: Duration::from_secs(0),
            mode,
            body: String::new(),
            links_found: Vec::new(),
        }
    }

    pub fn is_html(&self) -> bool {
        self.content_type
            .as_ref()
            .map(|ct| ct.contains("text/html") || ct.contains("application/xhtml"))
            .unwrap_or(false)
    }
}
