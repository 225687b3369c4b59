//! Synthetic sensor producers.
//!
//! Each configured source gets its own OS thread that paces frames at the
//! configured rate and hands them to the session in the configured mode.
//! A producer exits when the session stops, when the server does not
//! consume its source, or after `max_frames`.

use std::thread;
use std::time::{Duration, Instant};

use bytes::Bytes;
use cogstream_core::{CogError, InputFrame, SendSupplierResult, Session};
use tracing::{debug, info, warn};

use crate::config::{SendMode, SourceConfig};

/// What one producer did before exiting.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProducerReport {
    pub source_name: String,
    /// Frames handed to the transport.
    pub sent: u64,
    /// Ticks that produced no frame: no free token in non-blocking mode,
    /// or an empty supplier.
    pub skipped: u64,
}

/// Deterministic payload generator for one source.
#[derive(Debug, Clone)]
pub struct SyntheticFrames {
    config: SourceConfig,
    produced: u64,
}

impl SyntheticFrames {
    pub fn new(config: SourceConfig) -> Self {
        Self {
            config,
            produced: 0,
        }
    }

    /// Next frame. In supplier mode every `empty_every`-th call yields
    /// nothing, like a sensor with no fresh reading.
    pub fn next_frame(&mut self) -> Option<InputFrame> {
        self.produced += 1;
        let every = self.config.empty_every;
        if every > 0 && self.produced % every == 0 {
            return None;
        }
        Some(self.build())
    }

    /// Like [`next_frame`](Self::next_frame) but never empty.
    pub fn next_full_frame(&mut self) -> InputFrame {
        self.produced += 1;
        self.build()
    }

    fn build(&self) -> InputFrame {
        let fill = (self.produced % 251) as u8;
        InputFrame::new(
            self.config.payload_type,
            Bytes::from(vec![fill; self.config.payload_size]),
        )
        .with_extras(Bytes::copy_from_slice(&self.produced.to_le_bytes()))
    }
}

/// Start one producer thread per source.
pub fn spawn_producers(
    session: &Session,
    sources: &[SourceConfig],
) -> std::io::Result<Vec<thread::JoinHandle<ProducerReport>>> {
    sources
        .iter()
        .map(|source| {
            let session = session.clone();
            let source = source.clone();
            thread::Builder::new()
                .name(format!("producer-{}", source.name))
                .spawn(move || run_producer(&session, source))
        })
        .collect()
}

/// Drive one source until the session ends or the frame budget is spent.
pub fn run_producer(session: &Session, config: SourceConfig) -> ProducerReport {
    let mut report = ProducerReport {
        source_name: config.name.clone(),
        ..ProducerReport::default()
    };
    if !session.accepts_source(&config.name) {
        if session.is_running() {
            warn!(source = %config.name, "server does not consume this source, producer idle");
        }
        return report;
    }
    info!(source = %config.name, mode = ?config.mode, fps = config.fps, "producer started");

    let period = (config.fps > 0).then(|| Duration::from_secs_f64(1.0 / config.fps as f64));
    let mut next_tick = Instant::now();
    let mut frames = SyntheticFrames::new(config.clone());

    while config.max_frames == 0 || report.sent < config.max_frames {
        if let Some(period) = period {
            let now = Instant::now();
            if next_tick > now {
                thread::sleep(next_tick - now);
            }
            next_tick += period;
        }

        let outcome = match config.mode {
            SendMode::Blocking => session
                .send_blocking(&config.name, || frames.next_full_frame())
                .map(|sent| if sent { Tick::Sent } else { Tick::NoToken }),
            SendMode::NonBlocking => session
                .send_non_blocking(&config.name, || frames.next_full_frame())
                .map(|sent| if sent { Tick::Sent } else { Tick::Skipped }),
            SendMode::Supplier => session
                .send_with_supplier(&config.name, || frames.next_frame())
                .map(|result| match result {
                    SendSupplierResult::Success => Tick::Sent,
                    SendSupplierResult::NullFromSupplier => Tick::Skipped,
                    SendSupplierResult::ErrorAcquiringToken => Tick::NoToken,
                }),
        };

        match outcome {
            Ok(Tick::Sent) => report.sent += 1,
            Ok(Tick::Skipped) => {
                report.skipped += 1;
                if !session.is_running() {
                    break;
                }
                if period.is_none() {
                    thread::sleep(Duration::from_millis(1));
                }
            }
            // Either the session stopped or an acquire timeout elapsed.
            Ok(Tick::NoToken) => {
                if !session.is_running() {
                    break;
                }
                debug!(source = %config.name, "no token, retrying");
            }
            Err(CogError::ChannelClosed) => break,
            Err(e) => {
                warn!(source = %config.name, error = %e, "send failed, producer exiting");
                break;
            }
        }
    }

    info!(
        source = %report.source_name,
        sent = report.sent,
        skipped = report.skipped,
        "producer finished"
    );
    report
}

enum Tick {
    Sent,
    Skipped,
    NoToken,
}
