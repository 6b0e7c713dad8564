pub mod checkpoint;
pub mod config;
pub mod crawl;
pub mod error;
pub mod filters;
pub mod frontier;
pub mod model;
pub mod monitor;
pub mod normalize;
pub mod policy;
pub mod scan;
pub mod sink;
pub mod state;
pub mod template;

pub use checkpoint::CheckpointStore;
pub use config::{AxeConfig, ResourceMonitoringConfig};
pub use crawl::{CrawlEngine, CrawlProgress, CrawlProgressCallback, CrawlSummary};
pub use error::{CoreError, Result, UrlError};
pub use frontier::{Decision, FrontierController, FrontierStats};
pub use model::{Finding, ResumeRecord, RunStatus, ScanFailure, ScanTarget, SinkRecord, select_targets};
pub use monitor::{ResourceMonitor, ResourceSample, ResourceSampler, SysinfoSampler, ThrottleGate};
pub use normalize::{NormalizedUrl, normalize};
pub use policy::FetchModePolicy;
pub use scan::{ScanPool, ScanProgress, ScanProgressCallback, ScanSummary};
pub use sink::{FindingSink, JsonLinesSink, MemorySink};
pub use state::{CrawlCheckpoint, CrawlState, PendingFetch, TemplateRecord};
pub use template::{TemplateClassifier, TemplateSignature};
