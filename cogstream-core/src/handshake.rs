//! Gate that holds every source-table lookup until the server's Welcome
//! has been processed.
//!
//! The table is installed exactly once per session. After that, readers
//! take the fast path through the `OnceLock` without touching the mutex.

use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock};
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::error::CogError;
use crate::message::Welcome;
use crate::source::{Source, SourceTable};

#[derive(Debug)]
pub struct Handshake {
    table: OnceLock<Arc<SourceTable>>,
    /// `true` once the session is stopped. Guards the wait/notify pairing.
    stopped: Mutex<bool>,
    completed: Condvar,
    token_limit: Option<u32>,
    wait_timeout: Option<Duration>,
}

impl Handshake {
    /// `token_limit` caps the allowance announced by the server;
    /// `wait_timeout` bounds both table waits and token waits.
    pub fn new(token_limit: Option<u32>, wait_timeout: Option<Duration>) -> Self {
        Self {
            table: OnceLock::new(),
            stopped: Mutex::new(false),
            completed: Condvar::new(),
            token_limit,
            wait_timeout,
        }
    }

    /// Build the source table from `welcome` and wake every waiter.
    ///
    /// A second Welcome for the same session is rejected and the existing
    /// table, with its outstanding token debt, stays in place.
    pub fn complete(&self, welcome: &Welcome) -> Result<Arc<SourceTable>, CogError> {
        let tokens = match self.token_limit {
            Some(limit) => welcome.num_tokens_per_source.min(limit),
            None => welcome.num_tokens_per_source,
        };

        let stopped = self.lock();
        if self.table.get().is_some() {
            return Err(CogError::ProtocolViolation("duplicate welcome message"));
        }
        let table = Arc::new(SourceTable::new(
            welcome.sources_consumed.iter().cloned(),
            tokens,
            self.wait_timeout,
        ));
        if *stopped {
            table.stop_all();
        }
        let _ = self.table.set(Arc::clone(&table));
        drop(stopped);
        self.completed.notify_all();

        info!(
            sources = ?welcome.sources_consumed,
            tokens,
            "handshake complete"
        );
        Ok(table)
    }

    pub fn is_complete(&self) -> bool {
        self.table.get().is_some()
    }

    /// The table, if the handshake already completed.
    pub fn table(&self) -> Option<&Arc<SourceTable>> {
        self.table.get()
    }

    /// Block until the handshake completes.
    ///
    /// Returns `None` if the session stops first (or the wait timeout
    /// elapses).
    pub fn await_table(&self) -> Option<Arc<SourceTable>> {
        if let Some(table) = self.table.get() {
            return Some(Arc::clone(table));
        }

        let deadline = self.wait_timeout.map(|t| Instant::now() + t);
        let mut stopped = self.lock();
        loop {
            if let Some(table) = self.table.get() {
                return Some(Arc::clone(table));
            }
            if *stopped {
                debug!("session stopped before welcome");
                return None;
            }
            debug!("waiting for welcome message");
            stopped = match deadline {
                None => self
                    .completed
                    .wait(stopped)
                    .unwrap_or_else(|poisoned| poisoned.into_inner()),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        debug!("gave up waiting for welcome message");
                        return None;
                    }
                    self.completed
                        .wait_timeout(stopped, deadline - now)
                        .unwrap_or_else(|poisoned| poisoned.into_inner())
                        .0
                }
            };
        }
    }

    /// Block until the handshake completes, then look up `name`.
    pub fn await_source(&self, name: &str) -> Option<Arc<Source>> {
        self.await_table()?.get(name).cloned()
    }

    /// Wake every waiter with a failure and stop every source.
    pub fn shutdown(&self) {
        let mut stopped = self.lock();
        *stopped = true;
        if let Some(table) = self.table.get() {
            table.stop_all();
        }
        drop(stopped);
        self.completed.notify_all();
    }

    fn lock(&self) -> MutexGuard<'_, bool> {
        self.stopped
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
