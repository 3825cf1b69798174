//! Configuration types for chunkcast

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// How raw chunks are turned into media segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RemuxStrategy {
    /// Let the mp4 demuxer derive samples, then patch the emitted fragment
    #[default]
    Delegate,
    /// Rebuild tfhd/tfdt/trun directly from the chunk's sample tables
    Manual,
}

impl std::str::FromStr for RemuxStrategy {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "delegate" | "demux" => Ok(RemuxStrategy::Delegate),
            "manual" | "sample-table" => Ok(RemuxStrategy::Manual),
            _ => Err(format!("Invalid remux strategy: {}. Use: delegate, manual", s)),
        }
    }
}

/// Streaming session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    /// Logical timestamp advance per delivered chunk, in milliseconds
    pub chunk_step_ms: i64,
    /// Delay between consecutive chunk requests
    #[serde(with = "millis")]
    pub poll_delay: Duration,
    /// Delay before retrying a chunk that is not available yet
    #[serde(with = "millis")]
    pub retry_delay: Duration,
    /// Multiplier applied to the retry delay after each consecutive miss (1.0 = fixed)
    pub backoff_factor: f64,
    /// Upper bound for the retry delay when backing off
    #[serde(with = "millis")]
    pub max_retry_delay: Duration,
    /// Consecutive not-yet-available retries before giving up (None = unbounded)
    pub max_retries: Option<u32>,
    /// Decode time added per remuxed chunk, in track timescale units
    pub decode_time_quantum: u64,
    /// Video channel requested from the stream
    pub video_channel: i32,
    /// Video quality requested from the stream
    pub video_quality: i32,
    /// Maximum bytes requested per chunk
    pub fetch_limit: u32,
    /// Pending segments allowed in the append queue (None = unbounded)
    pub max_queue_depth: Option<usize>,
    /// Media segment remux strategy
    pub strategy: RemuxStrategy,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            chunk_step_ms: 1000,
            poll_delay: Duration::from_millis(800),
            retry_delay: Duration::from_millis(900),
            backoff_factor: 1.0,
            max_retry_delay: Duration::from_secs(10),
            max_retries: None,
            decode_time_quantum: 16000,
            video_channel: 1,
            video_quality: 2,
            fetch_limit: 1024 * 1024,
            max_queue_depth: None,
            strategy: RemuxStrategy::Delegate,
        }
    }
}

impl StreamConfig {
    /// Create a new configuration with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Load a configuration from a JSON file; missing fields keep their defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let contents = std::fs::read_to_string(path.as_ref())?;
        let config: StreamConfig = serde_json::from_str(&contents)?;
        config.validate()?;
        debug!("Loaded stream config from {}", path.as_ref().display());
        Ok(config)
    }

    /// Check values that would stall or corrupt a session
    pub fn validate(&self) -> Result<()> {
        if self.chunk_step_ms <= 0 {
            return Err(Error::Config(format!(
                "chunk_step_ms must be positive, got {}",
                self.chunk_step_ms
            )));
        }
        if self.backoff_factor.is_nan() || self.backoff_factor < 1.0 {
            return Err(Error::Config(format!(
                "backoff_factor must be at least 1.0, got {}",
                self.backoff_factor
            )));
        }
        if self.fetch_limit == 0 {
            return Err(Error::Config("fetch_limit must be non-zero".to_string()));
        }
        if self.max_queue_depth == Some(0) {
            return Err(Error::Config("max_queue_depth must be non-zero".to_string()));
        }
        Ok(())
    }

    /// Builder pattern: set remux strategy
    pub fn with_strategy(mut self, strategy: RemuxStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Builder pattern: set poll delay
    pub fn with_poll_delay(mut self, delay: Duration) -> Self {
        self.poll_delay = delay;
        self
    }

    /// Builder pattern: set retry delay
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Builder pattern: set retry bound
    pub fn with_max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Builder pattern: set exponential backoff
    pub fn with_backoff(mut self, factor: f64, max_delay: Duration) -> Self {
        self.backoff_factor = factor;
        self.max_retry_delay = max_delay;
        self
    }

    /// Builder pattern: set decode time quantum
    pub fn with_decode_time_quantum(mut self, quantum: u64) -> Self {
        self.decode_time_quantum = quantum;
        self
    }

    /// Builder pattern: set append queue bound
    pub fn with_max_queue_depth(mut self, depth: Option<usize>) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Builder pattern: set video channel and quality
    pub fn with_video(mut self, channel: i32, quality: i32) -> Self {
        self.video_channel = channel;
        self.video_quality = quality;
        self
    }

    /// Delay before the given retry attempt (0-based)
    pub fn retry_delay_for(&self, attempt: u32) -> Duration {
        if self.backoff_factor <= 1.0 {
            return self.retry_delay;
        }
        let scaled = self.retry_delay.as_secs_f64() * self.backoff_factor.powi(attempt as i32);
        Duration::from_secs_f64(scaled.min(self.max_retry_delay.as_secs_f64()))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(deserializer)?))
    }
}
