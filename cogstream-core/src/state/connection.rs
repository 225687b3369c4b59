//! Connection lifecycle state machine.
//!
//! Classifies transport events into a single terminal disconnect reason
//! and remembers whether the connection was ever established.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Instant;

use crate::error::CogError;

// ── DisconnectReason ─────────────────────────────────────────────

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DisconnectReason {
    /// The caller stopped the session.
    Graceful,
    /// The transport failed before it was ever opened.
    CouldNotConnect,
    /// The transport failed after having been open.
    ServerDisconnected,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graceful => write!(f, "graceful"),
            Self::CouldNotConnect => write!(f, "could not connect"),
            Self::ServerDisconnected => write!(f, "server disconnected"),
        }
    }
}

// ── ConnectionState ──────────────────────────────────────────────

/// ```text
///  NotConnected ──► Connecting ──► Open ──► Closed(reason)
///        │               │                      ▲
///        └───────────────┴──────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConnectionState {
    /// No connection attempt yet.
    #[default]
    NotConnected,

    /// Transport asked to connect, not yet opened.
    Connecting,

    /// Transport reported the connection open.
    Open {
        /// When the connection was opened.
        since: Instant,
    },

    /// Terminal state.
    Closed(DisconnectReason),
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotConnected => write!(f, "NotConnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::Open { .. } => write!(f, "Open"),
            Self::Closed(reason) => write!(f, "Closed({reason})"),
        }
    }
}

impl ConnectionState {
    pub fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }

    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed(_))
    }

    // ── Transitions ──────────────────────────────────────────────

    /// Transition to `Connecting`.
    ///
    /// Valid from: `NotConnected`.
    pub fn begin_connect(&mut self) -> Result<(), CogError> {
        match self {
            Self::NotConnected => {
                *self = Self::Connecting;
                Ok(())
            }
            _ => Err(CogError::ProtocolViolation(
                "cannot connect: not in NotConnected state",
            )),
        }
    }

    /// Transition to `Open`.
    ///
    /// Valid from: `NotConnected`, `Connecting`.
    pub fn open(&mut self) -> Result<(), CogError> {
        match self {
            Self::NotConnected | Self::Connecting => {
                *self = Self::Open {
                    since: Instant::now(),
                };
                Ok(())
            }
            _ => Err(CogError::ProtocolViolation(
                "cannot open: connection already open or closed",
            )),
        }
    }

    /// Transition to `Closed(reason)`.
    ///
    /// Valid from every non-terminal state.
    pub fn close(&mut self, reason: DisconnectReason) -> Result<(), CogError> {
        match self {
            Self::Closed(_) => Err(CogError::ProtocolViolation(
                "cannot close: connection already closed",
            )),
            _ => {
                *self = Self::Closed(reason);
                Ok(())
            }
        }
    }
}

// ── ConnectionLifecycle ──────────────────────────────────────────

/// Thread-safe wrapper driving [`ConnectionState`] from transport events.
#[derive(Debug, Default)]
pub struct ConnectionLifecycle {
    state: Mutex<ConnectionState>,
    ever_connected: AtomicBool,
}

impl ConnectionLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConnectionState {
        self.lock().clone()
    }

    /// Sticky: once the transport has opened, this stays `true`.
    pub fn ever_connected(&self) -> bool {
        self.ever_connected.load(Ordering::SeqCst)
    }

    pub fn is_running(&self) -> bool {
        !self.lock().is_closed()
    }

    pub fn begin_connect(&self) -> Result<(), CogError> {
        self.lock().begin_connect()
    }

    /// Record that the transport opened.
    pub fn on_opened(&self) -> Result<(), CogError> {
        let mut state = self.lock();
        state.open()?;
        self.ever_connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// Classify a transport failure.
    ///
    /// Returns the reason the first time the session reaches a terminal
    /// state and `None` afterwards, so the disconnect is reported exactly
    /// once (and never after a graceful stop).
    pub fn on_failure(&self) -> Option<DisconnectReason> {
        let mut state = self.lock();
        let reason = if self.ever_connected() {
            DisconnectReason::ServerDisconnected
        } else {
            DisconnectReason::CouldNotConnect
        };
        state.close(reason).ok().map(|()| reason)
    }

    /// Close gracefully. Returns `false` if already closed.
    pub fn close_graceful(&self) -> bool {
        self.lock().close(DisconnectReason::Graceful).is_ok()
    }

    fn lock(&self) -> MutexGuard<'_, ConnectionState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ── Tests ────────────────────────────────────────────────────────
