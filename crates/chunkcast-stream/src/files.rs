//! File-backed fetcher and sink for replaying captured streams
//!
//! A capture directory holds one `<timestamp>.bin` file per chunk envelope and
//! optionally a `channels.json` listing the stream channels.

use crate::fetch::{ChunkFetcher, ChunkRequest, StreamChannel};
use crate::sink::MediaSink;
use async_trait::async_trait;
use bytes::Bytes;
use chunkcast_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

const CHANNELS_FILE: &str = "channels.json";
const CHUNK_EXTENSION: &str = "bin";

/// Serves chunks from a capture directory
#[derive(Debug, Clone)]
pub struct DirectoryFetcher {
    dir: PathBuf,
}

impl DirectoryFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn chunk_path(&self, timestamp_ms: i64) -> PathBuf {
        self.dir.join(format!("{}.{}", timestamp_ms, CHUNK_EXTENSION))
    }

    /// Earliest chunk timestamp present in the directory
    async fn first_timestamp(&self) -> Result<Option<i64>> {
        let mut entries = tokio::fs::read_dir(&self.dir).await?;
        let mut first: Option<i64> = None;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(CHUNK_EXTENSION) {
                continue;
            }
            let timestamp = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| s.parse::<i64>().ok());
            if let Some(timestamp) = timestamp {
                first = Some(first.map_or(timestamp, |f| f.min(timestamp)));
            }
        }
        Ok(first)
    }
}

#[async_trait]
impl ChunkFetcher for DirectoryFetcher {
    async fn stream_channels(&self, _call: &str) -> Result<Vec<StreamChannel>> {
        let listing = self.dir.join(CHANNELS_FILE);
        match tokio::fs::read_to_string(&listing).await {
            Ok(contents) => return Ok(serde_json::from_str(&contents)?),
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }

        let channels = self
            .first_timestamp()
            .await?
            .map(|timestamp| StreamChannel {
                channel: 1,
                scale: 0,
                last_timestamp_ms: timestamp,
            })
            .into_iter()
            .collect::<Vec<_>>();
        debug!("Derived {} channels from {}", channels.len(), self.dir.display());
        Ok(channels)
    }

    async fn fetch(&self, request: &ChunkRequest) -> Result<Bytes> {
        let path = self.chunk_path(request.timestamp_ms);
        let data = match tokio::fs::read(&path).await {
            Ok(data) => Bytes::from(data),
            Err(e) if e.kind() == ErrorKind::NotFound => return Err(Error::TimeTooBig),
            Err(e) => return Err(Error::Transport(format!("{}: {}", path.display(), e))),
        };

        let start = (request.offset as usize).min(data.len());
        let end = start.saturating_add(request.limit as usize).min(data.len());
        Ok(data.slice(start..end))
    }
}

/// Writes appended segments to a file, producing a fragmented MP4
pub struct FileSink {
    path: PathBuf,
    file: Option<tokio::fs::File>,
    written: u64,
}

impl FileSink {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: None,
            written: 0,
        }
    }

    /// Bytes appended so far
    pub fn written(&self) -> u64 {
        self.written
    }
}

#[async_trait]
impl MediaSink for FileSink {
    async fn opened(&mut self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        self.file = Some(tokio::fs::File::create(&self.path).await?);
        info!("Writing segments to {}", self.path.display());
        Ok(())
    }

    async fn append(&mut self, data: Bytes) -> Result<()> {
        let file = self.file.as_mut().ok_or(Error::SinkClosed)?;
        file.write_all(&data).await?;
        file.flush().await?;
        self.written += data.len() as u64;
        Ok(())
    }
}
