//! Per-source token bucket.
//!
//! A [`Source`] bounds how many frames of one named channel may be in
//! flight (sent but not yet acknowledged). Each source owns its own
//! lock/condition pair; producers blocked on one source never contend with
//! another source's traffic.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, trace};

// ── Source ───────────────────────────────────────────────────────

#[derive(Debug)]
struct SourceState {
    tokens: u32,
    next_frame_id: u64,
    stopped: bool,
}

/// Token bucket and frame-id sequence for one named source.
#[derive(Debug)]
pub struct Source {
    name: String,
    state: Mutex<SourceState>,
    available: Condvar,
    acquire_timeout: Option<Duration>,
}

impl Source {
    /// Create a source holding `tokens` initial tokens.
    ///
    /// An allowance of zero is legal: the source blocks until a token is
    /// released into it.
    pub fn new(name: impl Into<String>, tokens: u32) -> Self {
        Self {
            name: name.into(),
            state: Mutex::new(SourceState {
                tokens,
                next_frame_id: 1,
                stopped: false,
            }),
            available: Condvar::new(),
            acquire_timeout: None,
        }
    }

    /// Give up blocking acquisitions after `timeout`.
    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Tokens currently available.
    pub fn token_count(&self) -> u32 {
        self.lock().tokens
    }

    /// Take a token if one is available. Never blocks on token state.
    pub fn try_acquire(&self) -> bool {
        let mut state = self.lock();
        if state.stopped || state.tokens == 0 {
            return false;
        }
        state.tokens -= 1;
        true
    }

    /// Wait until a token is available, then take it.
    ///
    /// Returns `false` if the source was stopped while waiting (or the
    /// configured acquire timeout elapsed). The caller must not send in
    /// that case.
    pub fn acquire_blocking(&self) -> bool {
        let deadline = self.acquire_timeout.map(|t| Instant::now() + t);
        let mut state = self.lock();
        while state.tokens == 0 && !state.stopped {
            trace!(source = %self.name, "waiting for token");
            state = match deadline {
                None => self
                    .available
                    .wait(state)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!(source = %self.name, "gave up waiting for token");
                        return false;
                    }
                    self.available
                        .wait_timeout(state, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
        if state.stopped {
            return false;
        }
        state.tokens -= 1;
        true
    }

    /// Return one token and wake a single waiter.
    pub fn release(&self) {
        let mut state = self.lock();
        state.tokens = state.tokens.saturating_add(1);
        drop(state);
        self.available.notify_one();
    }

    /// Id for the next frame sent from this source.
    ///
    /// Call only after a successful acquire. Ids start at 1 and never
    /// repeat within the lifetime of the source.
    pub fn next_frame_id(&self) -> u64 {
        let mut state = self.lock();
        let id = state.next_frame_id;
        state.next_frame_id += 1;
        id
    }

    /// Fail every current and future blocking acquisition.
    pub fn stop(&self) {
        self.lock().stopped = true;
        self.available.notify_all();
    }

    pub fn is_stopped(&self) -> bool {
        self.lock().stopped
    }

    fn lock(&self) -> MutexGuard<'_, SourceState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── SourceTable ──────────────────────────────────────────────────

/// Every source announced by the server for one session.
///
/// Built once from the Welcome message and never mutated afterwards, so
/// lookups need no lock.
#[derive(Debug, Default)]
pub struct SourceTable {
    sources: HashMap<String, Arc<Source>>,
}

impl SourceTable {
    /// Create one source per name, each holding `tokens` tokens.
    pub fn new<I, S>(names: I, tokens: u32, acquire_timeout: Option<Duration>) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let sources = names
            .into_iter()
            .map(|name| {
                let source = Source::new(name, tokens).with_acquire_timeout(acquire_timeout);
                (source.name().to_string(), Arc::new(source))
            })
            .collect();
        Self { sources }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Source>> {
        self.sources.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.sources.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sources.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub(crate) fn stop_all(&self) {
        for source in self.sources.values() {
            source.stop();
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;

    #[test]
    fn try_acquire_counts_down_to_zero() {
        let source = Source::new("cam", 2);
        assert!(source.try_acquire());
        assert!(source.try_acquire());
        assert!(!source.try_acquire());
        assert_eq!(source.token_count(), 0);

        source.release();
        assert!(source.try_acquire());
    }

    #[test]
    fn zero_allowance_blocks_until_released() {
        let source = Arc::new(Source::new("acc", 0));
        assert!(!source.try_acquire());

        let waiter = {
            let source = Arc::clone(&source);
            thread::spawn(move || source.acquire_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        source.release();
        assert!(waiter.join().unwrap());
        assert_eq!(source.token_count(), 0);
    }

    #[test]
    fn release_wakes_exactly_one_waiter() {
        let source = Arc::new(Source::new("cam", 0));
        let (done_tx, done_rx) = mpsc::channel();
        let waiters: Vec<_> = (0..2)
            .map(|_| {
                let source = Arc::clone(&source);
                let done_tx = done_tx.clone();
                thread::spawn(move || {
                    let got = source.acquire_blocking();
                    done_tx.send(got).unwrap();
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(20));
        source.release();
        assert!(done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        assert!(done_rx.recv_timeout(Duration::from_millis(50)).is_err());

        source.stop();
        assert!(!done_rx.recv_timeout(Duration::from_secs(5)).unwrap());
        for waiter in waiters {
            waiter.join().unwrap();
        }
    }

    #[test]
    fn stop_fails_blocked_acquire_promptly() {
        let source = Arc::new(Source::new("cam", 0));
        let waiter = {
            let source = Arc::clone(&source);
            thread::spawn(move || source.acquire_blocking())
        };
        thread::sleep(Duration::from_millis(20));
        source.stop();
        assert!(!waiter.join().unwrap());
        assert!(!source.try_acquire());
    }

    #[test]
    fn acquire_timeout_gives_up() {
        let source = Source::new("cam", 0).with_acquire_timeout(Some(Duration::from_millis(30)));
        let started = Instant::now();
        assert!(!source.acquire_blocking());
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn frame_ids_are_strictly_increasing() {
        let source = Source::new("cam", 1);
        let ids: Vec<u64> = (0..5).map(|_| source.next_frame_id()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn in_flight_never_exceeds_allowance() {
        let source = Arc::new(Source::new("cam", 3));
        let in_flight = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let max_seen = Arc::new(std::sync::atomic::AtomicU32::new(0));
        use std::sync::atomic::Ordering;

        let producers: Vec<_> = (0..4)
            .map(|_| {
                let source = Arc::clone(&source);
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                thread::spawn(move || {
                    for _ in 0..50 {
                        assert!(source.acquire_blocking());
                        let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        thread::yield_now();
                        in_flight.fetch_sub(1, Ordering::SeqCst);
                        source.release();
                    }
                })
            })
            .collect();
        for producer in producers {
            producer.join().unwrap();
        }
        assert!(max_seen.load(Ordering::SeqCst) <= 3);
        assert_eq!(source.token_count(), 3);
    }

    #[test]
    fn table_lookup_and_stop_all() {
        let table = SourceTable::new(["cam", "mic"], 2, None);
        assert_eq!(table.len(), 2);
        assert!(table.contains("cam"));
        assert!(table.get("gps").is_none());

        table.stop_all();
        assert!(table.get("mic").unwrap().is_stopped());
    }
}
