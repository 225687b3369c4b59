//! Round-trip time and throughput measurement.
//!
//! Tracks `(frame_id, sent_at)` per source and pairs each response with
//! its send timestamp. Every `output_frequency` responses, one
//! [`IntervalMeasurement`] is produced for that source.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::config::MeasurementConfig;

// ── IntervalMeasurement ──────────────────────────────────────────

/// One periodic sample for a source.
#[derive(Debug, Clone, PartialEq)]
pub struct IntervalMeasurement {
    pub source_name: String,
    /// Mean round-trip time over the last window.
    pub interval_rtt: Duration,
    /// Mean round-trip time since the source started sending.
    pub overall_rtt: Duration,
    /// Responses per second over the last window.
    pub interval_fps: f64,
    /// Responses per second since the source started sending.
    pub overall_fps: f64,
}

// ── SourceMeasurement ────────────────────────────────────────────

#[derive(Debug)]
pub struct SourceMeasurement {
    name: String,
    output_frequency: u32,
    max_pending_sends: usize,
    /// Keyed by frame id; ids are increasing, so the first entry is the oldest.
    send_timestamps: BTreeMap<u64, Instant>,
    started_at: Instant,
    first_send: bool,
    window_start: Instant,
    window_count: u32,
    window_rtt_total: Duration,
    window_rtt_samples: u32,
    count: u64,
    rtt_total: Duration,
    rtt_samples: u64,
    last_receive: Option<Instant>,
}

impl SourceMeasurement {
    pub fn new(name: impl Into<String>, config: &MeasurementConfig, now: Instant) -> Self {
        Self {
            name: name.into(),
            output_frequency: config.output_frequency.max(1),
            max_pending_sends: config.max_pending_sends.max(1),
            send_timestamps: BTreeMap::new(),
            started_at: now,
            first_send: true,
            window_start: now,
            window_count: 0,
            window_rtt_total: Duration::ZERO,
            window_rtt_samples: 0,
            count: 0,
            rtt_total: Duration::ZERO,
            rtt_samples: 0,
            last_receive: None,
        }
    }

    /// Record that `frame_id` was sent at `when`.
    pub fn log_send_at(&mut self, frame_id: u64, when: Instant) {
        if self.first_send {
            self.first_send = false;
            if self.count == 0 {
                self.started_at = when;
                self.window_start = when;
            }
        }
        self.send_timestamps.insert(frame_id, when);
        while self.send_timestamps.len() > self.max_pending_sends {
            if let Some((evicted, _)) = self.send_timestamps.pop_first() {
                debug!(source = %self.name, frame_id = evicted, "evicted unanswered send timestamp");
            }
        }
    }

    /// Forget a send that never reached the transport.
    pub fn discard_send(&mut self, frame_id: u64) {
        self.send_timestamps.remove(&frame_id);
    }

    /// Record a response for `frame_id` received at `when`.
    ///
    /// Returns a sample when this response closes a window.
    pub fn log_receive_at(&mut self, frame_id: u64, when: Instant) -> Option<IntervalMeasurement> {
        self.count += 1;
        self.window_count += 1;
        self.last_receive = Some(when);

        match self.send_timestamps.remove(&frame_id) {
            Some(sent) => {
                let rtt = when.saturating_duration_since(sent);
                self.window_rtt_total += rtt;
                self.window_rtt_samples += 1;
                self.rtt_total += rtt;
                self.rtt_samples += 1;
            }
            None => warn!(source = %self.name, frame_id, "no send timestamp for response"),
        }

        if self.count % self.output_frequency as u64 != 0 {
            return None;
        }

        let sample = IntervalMeasurement {
            source_name: self.name.clone(),
            interval_rtt: mean(self.window_rtt_total, self.window_rtt_samples as u64),
            overall_rtt: self.overall_rtt(),
            interval_fps: fps(self.window_count as u64, when.saturating_duration_since(self.window_start)),
            overall_fps: self.overall_fps(),
        };
        self.window_start = when;
        self.window_count = 0;
        self.window_rtt_total = Duration::ZERO;
        self.window_rtt_samples = 0;
        Some(sample)
    }

    /// Mean round-trip time over every matched response so far.
    pub fn overall_rtt(&self) -> Duration {
        mean(self.rtt_total, self.rtt_samples)
    }

    /// Responses per second from the first send to the latest response.
    pub fn overall_fps(&self) -> f64 {
        match self.last_receive {
            Some(last) => fps(self.count, last.saturating_duration_since(self.started_at)),
            None => 0.0,
        }
    }

    pub fn pending_sends(&self) -> usize {
        self.send_timestamps.len()
    }

    pub fn received(&self) -> u64 {
        self.count
    }
}

fn mean(total: Duration, samples: u64) -> Duration {
    if samples == 0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(total.as_secs_f64() / samples as f64)
}

fn fps(frames: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { frames as f64 / secs } else { 0.0 }
}

// ── MeasurementLayer ─────────────────────────────────────────────

/// Measurement state for every source of a session.
///
/// Sources are registered once, when the Welcome is processed. Sends are
/// logged from producer threads and receives from the dispatch thread, so
/// each source sits behind its own mutex.
#[derive(Debug)]
pub struct MeasurementLayer {
    config: MeasurementConfig,
    sources: OnceLock<HashMap<String, Mutex<SourceMeasurement>>>,
}

impl MeasurementLayer {
    pub fn new(config: MeasurementConfig) -> Self {
        Self {
            config,
            sources: OnceLock::new(),
        }
    }

    /// Register the announced sources. Later calls are ignored.
    pub fn register_sources<'a>(&self, names: impl IntoIterator<Item = &'a str>) {
        let now = Instant::now();
        let sources = names
            .into_iter()
            .map(|name| {
                (
                    name.to_string(),
                    Mutex::new(SourceMeasurement::new(name, &self.config, now)),
                )
            })
            .collect();
        let _ = self.sources.set(sources);
    }

    pub fn log_send(&self, source: &str, frame_id: u64) {
        if let Some(mut m) = self.source(source) {
            m.log_send_at(frame_id, Instant::now());
        }
    }

    pub fn discard_send(&self, source: &str, frame_id: u64) {
        if let Some(mut m) = self.source(source) {
            m.discard_send(frame_id);
        }
    }

    pub fn log_receive_at(
        &self,
        source: &str,
        frame_id: u64,
        when: Instant,
    ) -> Option<IntervalMeasurement> {
        self.source(source)?.log_receive_at(frame_id, when)
    }

    pub fn overall_rtt(&self, source: &str) -> Option<Duration> {
        self.source(source).map(|m| m.overall_rtt())
    }

    pub fn overall_fps(&self, source: &str) -> Option<f64> {
        self.source(source).map(|m| m.overall_fps())
    }

    fn source(&self, name: &str) -> Option<MutexGuard<'_, SourceMeasurement>> {
        let source = self.sources.get()?.get(name)?;
        Some(
            source
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner()),
        )
    }
}

// ── Tests ────────────────────────────────────────────────────────
