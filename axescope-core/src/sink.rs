// Append-only destinations for scan output

use crate::error::Result;
use crate::model::SinkRecord;
use async_trait::async_trait;
use std::io::SeekFrom;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::fs::{File, OpenOptions};
use tokio::io::{AsyncSeekExt, AsyncWriteExt};
use tokio::sync::Mutex;
use tracing::warn;

#[async_trait]
pub trait FindingSink: Send + Sync {
    async fn append(&self, record: &SinkRecord) -> Result<()>;

    /// Appends a batch that belongs together, such as every finding for one
    /// target. Sinks that can should write all of it or none of it.
    async fn append_all(&self, records: &[SinkRecord]) -> Result<()> {
        for record in records {
            self.append(record).await?;
        }
        Ok(())
    }
}

/// One JSON object per line.
pub struct JsonLinesSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesSink {
    /// Opens `path` for appending; `truncate` starts the file over.
    pub async fn open(path: &Path, truncate: bool) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if truncate {
            options.write(true).truncate(true);
        } else {
            options.append(true);
        }
        let file = options.open(path).await?;

        Ok(Self {
            path: path.to_path_buf(),
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes `bytes` in one go; on failure the file is cut back to where it
    /// was so no partial lines remain.
    async fn write_atomic(&self, bytes: &[u8]) -> Result<()> {
        let mut file = self.file.lock().await;
        let start = file.seek(SeekFrom::End(0)).await?;

        let written = match file.write_all(bytes).await {
            Ok(()) => file.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            if let Err(rollback) = file.set_len(start).await {
                warn!(path = %self.path.display(), error = %rollback, "Failed to roll back partial write");
            }
            file.seek(SeekFrom::Start(start)).await?;
            return Err(e.into());
        }
        Ok(())
    }
}

fn encode_lines(records: &[SinkRecord]) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    for record in records {
        serde_json::to_writer(&mut buffer, record)?;
        buffer.push(b'\n');
    }
    Ok(buffer)
}

#[async_trait]
impl FindingSink for JsonLinesSink {
    async fn append(&self, record: &SinkRecord) -> Result<()> {
        self.append_all(std::slice::from_ref(record)).await
    }

    async fn append_all(&self, records: &[SinkRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }
        // Serialize everything before touching the file
        let buffer = encode_lines(records)?;
        self.write_atomic(&buffer).await
    }
}

/// Keeps records in memory.
#[derive(Clone, Default)]
pub struct MemorySink {
    records: Arc<StdMutex<Vec<SinkRecord>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<SinkRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl FindingSink for MemorySink {
    async fn append(&self, record: &SinkRecord) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.push(record.clone());
        }
        Ok(())
    }

    async fn append_all(&self, batch: &[SinkRecord]) -> Result<()> {
        if let Ok(mut records) = self.records.lock() {
            records.extend_from_slice(batch);
        }
        Ok(())
    }
}

/// Reads every record back from a JSON-lines file, skipping blank lines.
pub async fn read_records(path: &Path) -> Result<Vec<SinkRecord>> {
    let content = tokio::fs::read_to_string(path).await?;
    content
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str::<SinkRecord>(line).map_err(Into::into))
        .collect()
}
