// src/stats.rs

use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::transfer::{TransferError, TransferEvents};

const MICROS_PER_SEC: u32 = 1_000_000;
const BYTES_PER_MB: f64 = 1_048_576.0;

/// Request lifecycle events, in the order they normally occur.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventType {
    HeadersSendStart = 0,
    HeadersSendEnd,
    HeadersRecvStart,
    HeadersRecvEnd,
    DataRecvStart,
    DataRecvEnd,
}

const EVENT_COUNT: usize = EventType::DataRecvEnd as usize + 1;

/// Wall-clock time as seconds and microseconds since the unix epoch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: u64,
    pub micros: u32,
}

impl Timestamp {
    pub fn new(secs: u64, micros: u32) -> Self {
        Self { secs, micros }
    }

    /// `self - earlier`, borrowing a second when the microseconds would go negative.
    /// Saturates to zero if `earlier` is actually later.
    pub fn since(&self, earlier: &Timestamp) -> Elapsed {
        if self <= earlier {
            return Elapsed::default();
        }
        let mut secs = self.secs - earlier.secs;
        let micros = if self.micros < earlier.micros {
            secs -= 1;
            self.micros + MICROS_PER_SEC - earlier.micros
        } else {
            self.micros - earlier.micros
        };
        Elapsed { secs, micros }
    }
}

/// A duration split the same way as [`Timestamp`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Elapsed {
    pub secs: u64,
    pub micros: u32,
}

impl Elapsed {
    pub fn as_micros(&self) -> u64 {
        self.secs * MICROS_PER_SEC as u64 + self.micros as u64
    }

    pub fn as_msec(&self) -> f64 {
        self.secs as f64 * 1000.0 + self.micros as f64 / 1000.0
    }

    /// Throughput in MB/s for `size` bytes. Zero when no time elapsed.
    pub fn mb_per_sec(&self, size: u64) -> f64 {
        let micros = self.as_micros();
        if micros == 0 {
            return 0.0;
        }
        let secs = micros as f64 / MICROS_PER_SEC as f64;
        (size as f64 / BYTES_PER_MB) / secs
    }
}

/// Source of event timestamps.
pub trait Clock {
    fn now(&self) -> Timestamp;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let since_epoch = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp::new(since_epoch.as_secs(), since_epoch.subsec_micros())
    }
}

/// Timing and size of a single request attempt.
///
/// A fresh instance is created per attempt. An instance that never saw any event
/// (all zero) means the attempt was never started.
#[derive(Debug)]
pub struct Statistics<C: Clock = SystemClock> {
    clock: C,
    url: String,
    times: [Timestamp; EVENT_COUNT],
    recorded: [bool; EVENT_COUNT],
    data_size: u64,
    http_code: u16,
    failure: Option<String>,
}

impl Default for Statistics<SystemClock> {
    fn default() -> Self {
        Self::with_clock(SystemClock)
    }
}

impl Statistics<SystemClock> {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> Statistics<C> {
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            url: String::new(),
            times: [Timestamp::default(); EVENT_COUNT],
            recorded: [false; EVENT_COUNT],
            data_size: 0,
            http_code: 0,
            failure: None,
        }
    }

    pub fn set_url(&mut self, url: impl Into<String>) {
        self.url = url.into();
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn http_code(&self) -> u16 {
        self.http_code
    }

    pub fn data_size(&self) -> u64 {
        self.data_size
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// True once any lifecycle event was observed.
    pub fn started(&self) -> bool {
        self.recorded[EventType::HeadersSendStart as usize]
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.http_code) && self.failure.is_none()
    }

    pub fn event_time(&self, event: EventType) -> Option<Timestamp> {
        let slot = event as usize;
        self.recorded[slot].then(|| self.times[slot])
    }

    pub fn start_time(&self) -> Timestamp {
        self.times[EventType::HeadersSendStart as usize]
    }

    /// `DataRecvEnd - HeadersSendStart`. A response without a body ends at its last
    /// header instead.
    pub fn total_time(&self) -> Elapsed {
        let start = &self.times[EventType::HeadersSendStart as usize];
        let end = [
            EventType::DataRecvEnd,
            EventType::HeadersRecvEnd,
            EventType::HeadersRecvStart,
        ]
        .into_iter()
        .find_map(|event| self.event_time(event))
        .unwrap_or_default();
        end.since(start)
    }

    fn record_first(&mut self, event: EventType) -> bool {
        let slot = event as usize;
        if self.recorded[slot] {
            return false;
        }
        self.times[slot] = self.clock.now();
        self.recorded[slot] = true;
        true
    }

    fn record(&mut self, event: EventType) {
        let slot = event as usize;
        self.times[slot] = self.clock.now();
        self.recorded[slot] = true;
    }
}

impl<C: Clock> TransferEvents for Statistics<C> {
    fn on_send_headers(&mut self) {
        debug!("sending headers");
        self.record_first(EventType::HeadersSendStart);
    }

    fn on_recv_header(&mut self, size: usize) {
        debug!(size, "header received");
        if self.record_first(EventType::HeadersRecvStart) {
            // The request was fully written by the time the first response header arrived.
            let sent = EventType::HeadersSendEnd as usize;
            self.times[sent] = self.times[EventType::HeadersRecvStart as usize];
            self.recorded[sent] = true;
        } else {
            self.record(EventType::HeadersRecvEnd);
        }
    }

    fn on_recv_data(&mut self, size: usize) {
        debug!(size, "data received");
        self.record_first(EventType::DataRecvStart);
        self.record(EventType::DataRecvEnd);
        self.data_size += size as u64;
    }

    fn on_failure(&mut self, error: &TransferError) {
        debug!("transfer failed: {}", error);
        self.failure = Some(error.to_string());
    }

    fn on_complete(&mut self, status: u16) {
        debug!(http_code = status, "transfer complete");
        self.http_code = status;
    }
}
