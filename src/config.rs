// src/config.rs

use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Default lifetime of a CloudFront signed URL.
pub const DEFAULT_CLOUDFRONT_TTL: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid range '{0}': expected 'start:end', e.g. 0:1024, 100:, :1024")]
    InvalidRange(String),
}

/// Half-open byte range `[start, end)`. `None` on either side leaves that side open.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ByteRange {
    pub start: Option<u64>,
    pub end: Option<u64>,
}

impl ByteRange {
    pub fn new(start: Option<u64>, end: Option<u64>) -> Self {
        Self { start, end }
    }

    /// Value of the `Range` header for this range, or `None` when no header is sent.
    pub fn header_value(&self) -> Option<String> {
        match (self.start, self.end) {
            (None, None) => None,
            (None, Some(end)) => Some(format!("bytes=0-{}", end)),
            (Some(start), None) | (Some(start), Some(0)) => Some(format!("bytes={}-", start)),
            (Some(start), Some(end)) => Some(format!("bytes={}-{}", start, end - 1)),
        }
    }
}

impl FromStr for ByteRange {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (start, end) = s
            .split_once(':')
            .ok_or_else(|| ConfigError::InvalidRange(s.to_string()))?;
        let bound = |part: &str| -> Result<Option<u64>, ConfigError> {
            let part = part.trim();
            if part.is_empty() {
                return Ok(None);
            }
            part.parse::<u64>()
                .map(Some)
                .map_err(|_| ConfigError::InvalidRange(s.to_string()))
        };
        let range = Self {
            start: bound(start)?,
            end: bound(end)?,
        };
        // An end of 0 means "to the end of the object"; any other end must lie past start.
        if let (Some(start), Some(end)) = (range.start, range.end) {
            if end != 0 && end <= start {
                return Err(ConfigError::InvalidRange(s.to_string()));
            }
        }
        Ok(range)
    }
}

/// Size and range limits applied to every request of a connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Limits {
    pub range: ByteRange,
    /// Abort the transfer once more than this many bytes arrived. 0 means unlimited.
    pub recv_limit: u64,
}

impl Limits {
    pub fn recv_limit(&self) -> Option<u64> {
        (self.recv_limit > 0).then_some(self.recv_limit)
    }
}

/// Options controlling the probe loop.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Number of rounds to run.
    pub count: u64,
    /// Pause between rounds.
    pub interval: Duration,
    /// Keep probing until interrupted. Overrides `count`.
    pub repeat: bool,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            count: 1,
            interval: Duration::from_secs(1),
            repeat: false,
        }
    }
}

impl RunOptions {
    pub fn effective_count(&self) -> u64 {
        if self.repeat {
            u64::MAX
        } else {
            self.count
        }
    }
}
