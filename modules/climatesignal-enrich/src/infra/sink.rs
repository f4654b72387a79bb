//! JSON-lines storage handoff for enriched records and dead letters.
//!
//! Lines are buffered in memory and appended to the file once
//! `buffer_size` is reached, and again on `flush` at shutdown.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::Serialize;
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};

use climatesignal_common::Record;

use crate::traits::{DeadLetter, DeadLetterSink, RecordSink};

pub const DEFAULT_BUFFER_SIZE: usize = 1000;

struct Inner {
    file: File,
    buffer: Vec<String>,
    written: u64,
}

pub struct JsonLinesSink {
    path: PathBuf,
    buffer_size: usize,
    inner: Mutex<Inner>,
}

impl JsonLinesSink {
    /// Open `path` for appending, creating it if needed.
    pub async fn open(path: &Path, buffer_size: usize) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create output dir: {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await
            .with_context(|| format!("Failed to open output file: {}", path.display()))?;

        Ok(Self {
            path: path.to_path_buf(),
            buffer_size: buffer_size.max(1),
            inner: Mutex::new(Inner {
                file,
                buffer: Vec::with_capacity(buffer_size.max(1)),
                written: 0,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn written(&self) -> u64 {
        self.inner.lock().await.written
    }

    async fn push<T: Serialize>(&self, value: &T) -> Result<()> {
        let line = serde_json::to_string(value).context("Failed to serialize output line")?;
        let mut inner = self.inner.lock().await;
        inner.buffer.push(line);
        if inner.buffer.len() >= self.buffer_size {
            self.drain(&mut inner).await?;
        }
        Ok(())
    }

    async fn drain(&self, inner: &mut Inner) -> Result<()> {
        if inner.buffer.is_empty() {
            return Ok(());
        }
        let mut chunk = inner.buffer.join("\n");
        chunk.push('\n');
        inner
            .file
            .write_all(chunk.as_bytes())
            .await
            .with_context(|| format!("Failed to write to {}", self.path.display()))?;
        inner.file.flush().await?;

        let n = inner.buffer.len() as u64;
        inner.written += n;
        inner.buffer.clear();
        debug!(path = %self.path.display(), lines = n, total = inner.written, "Flushed output buffer");
        Ok(())
    }

    async fn flush_all(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        self.drain(&mut inner).await?;
        info!(path = %self.path.display(), total = inner.written, "Output flushed");
        Ok(())
    }
}

#[async_trait]
impl RecordSink for JsonLinesSink {
    async fn write(&self, record: &Record) -> Result<()> {
        self.push(record).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_all().await
    }
}

#[async_trait]
impl DeadLetterSink for JsonLinesSink {
    async fn reject(&self, letter: &DeadLetter) -> Result<()> {
        self.push(letter).await
    }

    async fn flush(&self) -> Result<()> {
        self.flush_all().await
    }
}
