//! Durable crawl state and resume records.
//!
//! Both files are JSON objects carrying a `schema_version` next to their
//! fields. Every save writes a fresh temporary file next to the target and
//! renames it into place, so readers only ever see a complete checkpoint.

use crate::config::AxeConfig;
use crate::error::{CoreError, Result};
use crate::model::ResumeRecord;
use crate::state::{CrawlCheckpoint, CrawlState};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

pub const SCHEMA_VERSION: u64 = 1;

#[derive(Serialize)]
struct Envelope<'a, T> {
    schema_version: u64,
    #[serde(flatten)]
    body: &'a T,
}

/// Writes `value` to `path` atomically.
pub fn save_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)?;

    let envelope = Envelope {
        schema_version: SCHEMA_VERSION,
        body: value,
    };
    let json = serde_json::to_vec_pretty(&envelope)?;

    let mut tmp = NamedTempFile::new_in(parent)?;
    tmp.write_all(&json)?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| e.error)?;
    debug!(path = %path.display(), "Checkpoint written");
    Ok(())
}

/// Reads a checkpoint; a missing file is `Ok(None)`.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };

    let corrupt = |reason: String| CoreError::StateCorruption {
        path: path.to_path_buf(),
        reason,
    };

    let mut value: Value = serde_json::from_slice(&bytes).map_err(|e| corrupt(e.to_string()))?;
    let object = value
        .as_object_mut()
        .ok_or_else(|| corrupt("expected a JSON object".to_string()))?;

    match object.remove("schema_version").and_then(|v| v.as_u64()) {
        Some(SCHEMA_VERSION) => {}
        Some(other) => return Err(corrupt(format!("unsupported schema version {}", other))),
        None => return Err(corrupt("missing schema_version".to_string())),
    }

    serde_json::from_value(value)
        .map(Some)
        .map_err(|e| corrupt(e.to_string()))
}

/// Crawl state and resume record locations for one run.
///
/// Clones share a write lock, so saves through any clone never interleave.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    crawl_state_path: PathBuf,
    resume_path: PathBuf,
    discard_corrupt_state: bool,
    max_urls_per_domain: usize,
    write_lock: Arc<Mutex<()>>,
}

impl CheckpointStore {
    pub fn from_config(config: &AxeConfig) -> Self {
        Self {
            crawl_state_path: config.crawl_state_path(),
            resume_path: config.resume_path(),
            discard_corrupt_state: config.discard_corrupt_state,
            max_urls_per_domain: config.max_urls_per_domain,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn crawl_state_path(&self) -> &Path {
        &self.crawl_state_path
    }

    pub fn resume_path(&self) -> &Path {
        &self.resume_path
    }

    pub fn save_crawl(&self, checkpoint: &CrawlCheckpoint) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        save_json(&self.crawl_state_path, checkpoint)
    }

    /// Loads and verifies the crawl checkpoint.
    ///
    /// A corrupt file is an error unless `discard_corrupt_state` is set, in
    /// which case it is reported and treated as absent. Page counts above the
    /// current `max_urls_per_domain` are not corruption: the cap may have
    /// been lowered since the checkpoint was written.
    pub fn load_crawl(&self) -> Result<Option<CrawlCheckpoint>> {
        let loaded = load_json::<CrawlCheckpoint>(&self.crawl_state_path).and_then(|loaded| {
            match loaded {
                Some(checkpoint) => checkpoint
                    .state
                    .verify(None)
                    .map(|_| Some(checkpoint))
                    .map_err(|reason| CoreError::StateCorruption {
                        path: self.crawl_state_path.clone(),
                        reason,
                    }),
                None => Ok(None),
            }
        });
        let loaded = self.recover(loaded)?;

        if let Some(checkpoint) = &loaded {
            for (domain, count) in &checkpoint.state.per_domain_counts {
                if *count > self.max_urls_per_domain {
                    warn!(
                        domain = %domain,
                        pages = count,
                        cap = self.max_urls_per_domain,
                        "Saved crawl holds more pages than the current cap; no new pages will be accepted"
                    );
                }
            }
        }
        Ok(loaded)
    }

    pub fn load_crawl_state(&self) -> Result<Option<CrawlState>> {
        Ok(self.load_crawl()?.map(|checkpoint| checkpoint.state))
    }

    pub fn save_resume(&self, record: &ResumeRecord) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        save_json(&self.resume_path, record)
    }

    pub fn load_resume(&self) -> Result<Option<ResumeRecord>> {
        self.recover(load_json(&self.resume_path))
    }

    fn recover<T>(&self, loaded: Result<Option<T>>) -> Result<Option<T>> {
        match loaded {
            Err(CoreError::StateCorruption { path, reason }) if self.discard_corrupt_state => {
                warn!(path = %path.display(), reason = %reason, "Discarding corrupt state file");
                Ok(None)
            }
            other => other,
        }
    }
}
