//! Named timing accumulators
//!
//! Each server owns a [`Timings`] registry. Code sections are timed either with a
//! guard (`let _t = timings.start("mesh/update");`) or by recording a measured
//! duration directly.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use serde::Serialize;

/// Aggregate of all samples recorded under one name (seconds).
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TimingStats {
    pub count: u64,
    pub total_s: f64,
    pub min_s: f64,
    pub max_s: f64,
}

impl TimingStats {
    fn new(sample: f64) -> Self {
        Self {
            count: 1,
            total_s: sample,
            min_s: sample,
            max_s: sample,
        }
    }

    fn add(&mut self, sample: f64) {
        self.count += 1;
        self.total_s += sample;
        self.min_s = self.min_s.min(sample);
        self.max_s = self.max_s.max(sample);
    }

    pub fn mean_s(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.total_s / self.count as f64
        }
    }
}

#[derive(Debug, Default)]
pub struct Timings {
    entries: Mutex<BTreeMap<String, TimingStats>>,
}

impl Timings {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time a section until the returned guard is dropped.
    pub fn start<'a>(&'a self, name: &'a str) -> TimerGuard<'a> {
        TimerGuard {
            timings: self,
            name,
            started: Instant::now(),
        }
    }

    pub fn record(&self, name: &str, elapsed: Duration) {
        let sample = elapsed.as_secs_f64();
        let mut entries = self.entries.lock();
        match entries.get_mut(name) {
            Some(stats) => stats.add(sample),
            None => {
                entries.insert(name.to_string(), TimingStats::new(sample));
            }
        }
    }

    pub fn stats(&self, name: &str) -> Option<TimingStats> {
        self.entries.lock().get(name).copied()
    }

    /// Copy of all entries, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, TimingStats> {
        self.entries.lock().clone()
    }

    pub fn reset(&self) {
        self.entries.lock().clear();
    }

    /// One line per entry: name, count, mean, min, max (milliseconds).
    pub fn summary(&self) -> String {
        let entries = self.entries.lock();
        let mut out = String::from("timing (ms)          count      mean       min       max\n");
        for (name, stats) in entries.iter() {
            let _ = writeln!(
                out,
                "{:<20} {:>5} {:>9.3} {:>9.3} {:>9.3}",
                name,
                stats.count,
                stats.mean_s() * 1000.0,
                stats.min_s * 1000.0,
                stats.max_s * 1000.0
            );
        }
        out
    }
}

/// Records the elapsed time into its registry when dropped.
pub struct TimerGuard<'a> {
    timings: &'a Timings,
    name: &'a str,
    started: Instant,
}

impl TimerGuard<'_> {
    /// Stop early and return the measured duration.
    pub fn stop(self) -> Duration {
        self.started.elapsed()
    }
}

impl Drop for TimerGuard<'_> {
    fn drop(&mut self) {
        self.timings.record(self.name, self.started.elapsed());
    }
}

/// Current wall-clock time in seconds since the Unix epoch.
pub fn now_seconds() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}
