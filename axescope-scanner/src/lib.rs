pub mod audit;
pub mod browser;
pub mod error;
pub mod fetcher;
pub mod result;

pub use audit::{Auditor, Severity, Violation};
pub use browser::{BrowserSession, ChromeOptions, ChromeSessionFactory, SessionFactory, SessionPool};
pub use error::FetchError;
pub use fetcher::{HttpFetcher, HybridFetcher, PageFetcher};
pub use result::{FetchMode, FetchedPage};
