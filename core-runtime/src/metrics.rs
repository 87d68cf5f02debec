//! # Performance Metrics
//!
//! Rolling latency statistics shared by every session.
//!
//! [`PerformanceMonitor`] keeps the most recent samples per [`MetricKind`]
//! (a fixed-size window, oldest dropped first) and reports
//! count/min/max/avg over that window, plus lifetime sample totals and
//! process uptime. It is cheap to record from many tasks at once: each kind
//! sits behind its own `parking_lot` mutex and nothing is held across an
//! `.await`.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::time::{Duration, Instant};

/// Samples retained per metric.
pub const DEFAULT_SAMPLE_WINDOW: usize = 100;

/// What a latency sample measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// One call to the extraction collaborator.
    Extraction,
    /// Time from a session entering `Loading` to the backend playing.
    PlaybackStart,
    /// Time from receiving a command to producing its reply.
    CommandResponse,
}

impl MetricKind {
    pub const ALL: [MetricKind; 3] = [
        MetricKind::Extraction,
        MetricKind::PlaybackStart,
        MetricKind::CommandResponse,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Extraction => "extraction",
            MetricKind::PlaybackStart => "playback_start",
            MetricKind::CommandResponse => "command_response",
        }
    }

    fn index(self) -> usize {
        match self {
            MetricKind::Extraction => 0,
            MetricKind::PlaybackStart => 1,
            MetricKind::CommandResponse => 2,
        }
    }
}

impl fmt::Display for MetricKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics over the current sample window. All durations in seconds.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MetricSummary {
    pub count: usize,
    pub min_secs: f64,
    pub max_secs: f64,
    pub avg_secs: f64,
}

impl MetricSummary {
    fn from_samples(samples: &VecDeque<Duration>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }

        let (mut min, mut max, mut total) = (f64::MAX, 0.0_f64, 0.0_f64);
        for sample in samples {
            let secs = sample.as_secs_f64();
            min = min.min(secs);
            max = max.max(secs);
            total += secs;
        }

        Self {
            count: samples.len(),
            min_secs: min,
            max_secs: max,
            avg_secs: total / samples.len() as f64,
        }
    }
}

/// Point-in-time view of every metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub started_at: DateTime<Utc>,
    pub extraction: MetricSummary,
    pub playback_start: MetricSummary,
    pub command_response: MetricSummary,
    /// Samples recorded since start, per metric, including those that have
    /// left the window.
    pub total_extractions: u64,
    pub total_playback_starts: u64,
    pub total_commands: u64,
}

impl MetricsSnapshot {
    pub fn summary(&self, kind: MetricKind) -> &MetricSummary {
        match kind {
            MetricKind::Extraction => &self.extraction,
            MetricKind::PlaybackStart => &self.playback_start,
            MetricKind::CommandResponse => &self.command_response,
        }
    }
}

#[derive(Debug, Default)]
struct Series {
    samples: VecDeque<Duration>,
    total: u64,
}

/// Rolling latency recorder.
#[derive(Debug)]
pub struct PerformanceMonitor {
    window: usize,
    series: [Mutex<Series>; 3],
    started: Instant,
    started_at: DateTime<Utc>,
}

impl PerformanceMonitor {
    pub fn new() -> Self {
        Self::with_window(DEFAULT_SAMPLE_WINDOW)
    }

    /// Monitor keeping the last `window` samples per metric (at least one).
    pub fn with_window(window: usize) -> Self {
        Self {
            window: window.max(1),
            series: Default::default(),
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    pub fn record(&self, kind: MetricKind, elapsed: Duration) {
        let mut series = self.series[kind.index()].lock();
        if series.samples.len() == self.window {
            series.samples.pop_front();
        }
        series.samples.push_back(elapsed);
        series.total += 1;
    }

    pub fn summary(&self, kind: MetricKind) -> MetricSummary {
        MetricSummary::from_samples(&self.series[kind.index()].lock().samples)
    }

    pub fn uptime(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let total = |kind: MetricKind| self.series[kind.index()].lock().total;
        MetricsSnapshot {
            uptime_secs: self.uptime().as_secs(),
            started_at: self.started_at,
            extraction: self.summary(MetricKind::Extraction),
            playback_start: self.summary(MetricKind::PlaybackStart),
            command_response: self.summary(MetricKind::CommandResponse),
            total_extractions: total(MetricKind::Extraction),
            total_playback_starts: total(MetricKind::PlaybackStart),
            total_commands: total(MetricKind::CommandResponse),
        }
    }

    /// Drop every retained sample. Totals and uptime are kept.
    pub fn reset_window(&self) {
        for series in &self.series {
            series.lock().samples.clear();
        }
    }
}

impl Default for PerformanceMonitor {
    fn default() -> Self {
        Self::new()
    }
}
