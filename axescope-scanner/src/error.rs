use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Unexpected status {0}")]
    Status(u16),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Render failed: {0}")]
    Render(String),

    #[error("Browser unavailable: {0}")]
    Browser(String),

    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl FetchError {
    /// Whether another attempt at the same URL can reasonably succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            FetchError::Http(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            FetchError::Timeout(_) | FetchError::Render(_) => true,
            FetchError::Status(code) => *code == 429 || (500..600).contains(code),
            FetchError::InvalidUrl(_) | FetchError::Browser(_) | FetchError::Join(_) => false,
        }
    }

    /// Render-side failures mean the browser session should be recycled.
    pub fn is_render_failure(&self) -> bool {
        matches!(
            self,
            FetchError::Render(_) | FetchError::Browser(_) | FetchError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, FetchError>;
