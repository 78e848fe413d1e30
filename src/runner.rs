// src/runner.rs

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{Limits, RunOptions, DEFAULT_CLOUDFRONT_TTL};
use crate::connection::{new_connection, Connection};
use crate::context::ProbeContext;
use crate::stats::{Clock, Statistics};

/// Running count/min/max/mean over a stream of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Accumulator {
    count: u64,
    min: f64,
    max: f64,
    sum: f64,
}

impl Accumulator {
    pub fn add(&mut self, sample: f64) {
        if self.count == 0 {
            self.min = sample;
            self.max = sample;
        } else {
            self.min = self.min.min(sample);
            self.max = self.max.max(sample);
        }
        self.sum += sample;
        self.count += 1;
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.sum / self.count as f64
        }
    }
}

/// Totals for a whole run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RunSummary {
    pub rounds: u64,
    pub attempts: u64,
    /// Elapsed time per successful attempt, in milliseconds.
    pub time_ms: Accumulator,
    /// Throughput per successful attempt, in MB/s.
    pub speed_mbs: Accumulator,
}

impl RunSummary {
    /// Fold a finished attempt into the aggregates. Failed attempts only count as attempts.
    pub fn record<C: Clock>(&mut self, stat: &Statistics<C>) {
        self.attempts += 1;
        if !stat.is_success() {
            return;
        }
        let elapsed = stat.total_time();
        self.time_ms.add(elapsed.as_msec());
        self.speed_mbs.add(elapsed.mb_per_sec(stat.data_size()));
    }

    /// The closing min/avg/max report, if anything was measured.
    pub fn report(&self) -> Option<String> {
        if self.time_ms.count() == 0 {
            return None;
        }
        Some(format!(
            "time  min/avg/max = {:.2}/{:.2}/{:.2} ms\nspeed min/avg/max = {:.2}/{:.2}/{:.2} MB/s",
            self.time_ms.min(),
            self.time_ms.mean(),
            self.time_ms.max(),
            self.speed_mbs.min(),
            self.speed_mbs.mean(),
            self.speed_mbs.max(),
        ))
    }
}

/// One line describing a finished attempt.
pub fn format_report<C: Clock>(stat: &Statistics<C>) -> String {
    let start = stat.start_time();
    if stat.is_success() {
        let elapsed = stat.total_time();
        let speed = elapsed.mb_per_sec(stat.data_size());
        // Speed the same time would give for at least 1 MB, as a reference for small objects.
        let max_speed = elapsed.mb_per_sec(stat.data_size().max(1024 * 1024));
        format!(
            "[{}.{:06}] {} bytes from {} time={:.2} msec speed={:.2}[max {:.2}] mb/sec",
            start.secs,
            start.micros,
            stat.data_size(),
            stat.url(),
            elapsed.as_msec(),
            speed,
            max_speed
        )
    } else {
        format!(
            "[{}.{:06}] {} code={}",
            start.secs,
            start.micros,
            stat.url(),
            stat.http_code()
        )
    }
}

/// Probes every configured target once per round until the count runs out or a drain
/// is requested.
pub struct Prober {
    connections: Vec<Connection>,
    options: RunOptions,
    cloudfront_ttl: Duration,
}

impl Prober {
    pub fn new(options: RunOptions) -> Self {
        Self {
            connections: Vec::new(),
            options,
            cloudfront_ttl: DEFAULT_CLOUDFRONT_TTL,
        }
    }

    pub fn with_cloudfront_ttl(mut self, ttl: Duration) -> Self {
        self.cloudfront_ttl = ttl;
        self
    }

    /// Register a target. Returns false, after logging, when the url has no usable scheme.
    pub fn add_connection(&mut self, url: &str, auth: &str, limits: Limits) -> bool {
        info!("url={}", url);
        match new_connection(url, auth, limits) {
            Some(conn) => {
                self.connections.push(conn.with_ttl(self.cloudfront_ttl));
                true
            }
            None => {
                error!("skipping {}: unsupported or missing scheme", url);
                false
            }
        }
    }

    pub fn connections(&self) -> &[Connection] {
        &self.connections
    }

    /// Run rounds until done. `drain` is only checked between rounds, so a round that
    /// has started always probes every target.
    pub async fn run(&self, ctx: &ProbeContext, drain: &CancellationToken) -> RunSummary {
        let mut summary = RunSummary::default();
        let mut remaining = self.options.effective_count();

        while !drain.is_cancelled() && remaining > 0 {
            for conn in &self.connections {
                let mut stat = Statistics::new();
                conn.perform_get(ctx, &mut stat).await;
                summary.record(&stat);
                println!("{}", format_report(&stat));
            }
            summary.rounds += 1;

            tokio::select! {
                _ = tokio::time::sleep(self.options.interval) => {},
                _ = drain.cancelled() => {},
            }
            if !self.options.repeat {
                remaining -= 1;
            }
        }

        if drain.is_cancelled() {
            info!("stopped after {} rounds", summary.rounds);
        }
        if let Some(report) = summary.report() {
            println!("\n{}", report);
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stats::Timestamp;
    use crate::transfer::TransferEvents;
    use std::cell::RefCell;
    use std::collections::VecDeque;

    /// Hands out pre-arranged timestamps, in microseconds.
    struct ScriptedClock(RefCell<VecDeque<u64>>);

    impl Clock for ScriptedClock {
        fn now(&self) -> Timestamp {
            let micros = self.0.borrow_mut().pop_front().unwrap_or(0);
            Timestamp::new(micros / 1_000_000, (micros % 1_000_000) as u32)
        }
    }

    /// An attempt starting at t=1s that received `bytes` in one chunk after `elapsed_ms`.
    fn finished(elapsed_ms: u64, bytes: usize, status: u16) -> Statistics<ScriptedClock> {
        let start = 1_000_000;
        let script = [start, start + 500, start + elapsed_ms * 1000];
        let mut stat = Statistics::with_clock(ScriptedClock(RefCell::new(script.into())));
        stat.set_url("example.com/file");
        stat.on_send_headers();
        stat.on_recv_data(bytes);
        stat.on_complete(status);
        stat
    }

    #[test]
    fn accumulator_tracks_min_max_mean() {
        let mut acc = Accumulator::default();
        for sample in [10.0, 20.0, 30.0] {
            acc.add(sample);
        }
        assert_eq!(acc.count(), 3);
        assert_eq!(acc.min(), 10.0);
        assert_eq!(acc.max(), 30.0);
        assert_eq!(acc.mean(), 20.0);
    }

    #[test]
    fn summary_folds_elapsed_times() {
        let mut summary = RunSummary::default();
        for elapsed_ms in [10, 20, 30] {
            summary.record(&finished(elapsed_ms, 1024, 200));
        }
        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.time_ms.min(), 10.0);
        assert_eq!(summary.time_ms.max(), 30.0);
        assert_eq!(summary.time_ms.mean(), 20.0);
        let report = summary.report().unwrap();
        assert!(report.starts_with("time  min/avg/max = 10.00/20.00/30.00 ms"));
    }

    #[test]
    fn failures_are_counted_but_not_folded() {
        let mut summary = RunSummary::default();
        summary.record(&finished(10, 0, 404));
        summary.record(&Statistics::new());
        assert_eq!(summary.attempts, 2);
        assert_eq!(summary.report(), None);
    }

    #[test]
    fn report_lines() {
        let ok = finished(20, 2048, 200);
        assert_eq!(
            format_report(&ok),
            "[1.000000] 2048 bytes from example.com/file time=20.00 msec speed=0.10[max 50.00] mb/sec"
        );
        let failed = finished(5, 0, 403);
        assert_eq!(format_report(&failed), "[1.000000] example.com/file code=403");
    }

    #[test]
    fn invalid_targets_are_skipped() {
        let mut prober = Prober::new(RunOptions::default());
        assert!(!prober.add_connection("ftp://x", "", Limits::default()));
        assert!(prober.add_connection("http://example.com/a", "", Limits::default()));
        assert!(!prober.add_connection("no-scheme", "", Limits::default()));
        assert_eq!(prober.connections().len(), 1);
    }

    #[test]
    fn prober_applies_cloudfront_ttl() {
        let mut prober = Prober::new(RunOptions::default()).with_cloudfront_ttl(Duration::from_secs(5));
        prober.add_connection("cf://d1/x", "k:p", Limits::default());
        assert!(matches!(
            prober.connections()[0],
            Connection::CloudFront { ttl, .. } if ttl == Duration::from_secs(5)
        ));
    }
}
