//! The streaming session: the public, blocking face of the engine.
//!
//! ```text
//!  producer threads ──send_*──► Session ──► Transport ──► server
//!                                  ▲                        │
//!                       Handshake / Source tokens           │
//!                                  ▲                        ▼
//!  owner ◄──SessionEvent── ResponseRouter ◄── dispatch thread
//! ```
//!
//! Producers call the `send_*` methods from their own threads. One
//! dispatch thread drains transport events, feeds inbound messages to the
//! [`ResponseRouter`] and classifies disconnects. The owner reads
//! [`SessionEvent`]s from the receiver returned by [`Session::start`].

use std::fmt;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use tokio::runtime::Handle;
use tracing::{debug, error, info, warn};

use crate::config::SessionConfig;
use crate::error::CogError;
use crate::event::{EventReceiver, EventSender, SessionEvent, event_channel};
use crate::handshake::Handshake;
use crate::measurement::MeasurementLayer;
use crate::message::{FromClient, InputFrame};
use crate::network::{
    Endpoint, TcpTransport, Transport, TransportEvent, TransportEventReceiver,
};
use crate::router::ResponseRouter;
use crate::source::Source;
use crate::state::{ConnectionLifecycle, ConnectionState};

/// Outcome of [`Session::send_with_supplier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendSupplierResult {
    Success,
    /// No token could be taken: the session stopped, the wait timed out,
    /// or the server does not consume the source.
    ErrorAcquiringToken,
    /// The supplier produced nothing. The token was returned.
    NullFromSupplier,
}

// ── Session ──────────────────────────────────────────────────────

/// Cheap to clone; every clone drives the same session.
#[derive(Clone)]
pub struct Session {
    inner: Arc<SessionInner>,
}

struct SessionInner {
    handshake: Arc<Handshake>,
    lifecycle: Arc<ConnectionLifecycle>,
    measurement: Option<Arc<MeasurementLayer>>,
    transport: Arc<dyn Transport>,
    dispatcher: Mutex<Option<thread::JoinHandle<()>>>,
}

impl Session {
    /// Start a session over an already-created transport.
    ///
    /// `inbound` must be the event receiver belonging to `transport`.
    pub fn start(
        config: SessionConfig,
        transport: Arc<dyn Transport>,
        inbound: TransportEventReceiver,
    ) -> Result<(Self, EventReceiver), CogError> {
        config.validate()?;

        let handshake = Arc::new(Handshake::new(config.token_limit, config.acquire_timeout()));
        let lifecycle = Arc::new(ConnectionLifecycle::new());
        lifecycle.begin_connect()?;
        let measurement = config
            .measurement
            .enabled
            .then(|| Arc::new(MeasurementLayer::new(config.measurement.clone())));

        let (events_tx, events_rx) = event_channel();
        let dispatcher = Dispatcher {
            router: ResponseRouter::new(
                Arc::clone(&handshake),
                measurement.clone(),
                events_tx.clone(),
            ),
            lifecycle: Arc::clone(&lifecycle),
            handshake: Arc::clone(&handshake),
            transport: Arc::clone(&transport),
            events: events_tx,
        };
        let handle = thread::Builder::new()
            .name("cogstream-dispatch".into())
            .spawn(move || dispatcher.run(inbound))?;

        let session = Self {
            inner: Arc::new(SessionInner {
                handshake,
                lifecycle,
                measurement,
                transport,
                dispatcher: Mutex::new(Some(handle)),
            }),
        };
        Ok((session, events_rx))
    }

    /// Connect over TCP, with transport tasks running on `runtime`.
    pub fn connect(
        endpoint: Endpoint,
        config: SessionConfig,
        runtime: &Handle,
    ) -> Result<(Self, EventReceiver), CogError> {
        info!(%endpoint, "connecting");
        let (transport, inbound) = TcpTransport::connect(endpoint, runtime);
        Self::start(config, Arc::new(transport), inbound)
    }

    // ── Sending ──────────────────────────────────────────────────

    /// Wait for a token for `source_name`, then build and send a frame.
    ///
    /// Returns `Ok(false)` without calling `build` if the session stops
    /// first, the acquire timeout elapses, or the server does not consume
    /// the source.
    pub fn send_blocking<F>(&self, source_name: &str, build: F) -> Result<bool, CogError>
    where
        F: FnOnce() -> InputFrame,
    {
        let Some(source) = self.await_source(source_name) else {
            return Ok(false);
        };
        if !source.acquire_blocking() {
            return Ok(false);
        }
        self.dispatch(&source, build())?;
        Ok(true)
    }

    /// Send only if a token is available right now. Never blocks, not even
    /// on the handshake.
    pub fn send_non_blocking<F>(&self, source_name: &str, build: F) -> Result<bool, CogError>
    where
        F: FnOnce() -> InputFrame,
    {
        let Some(table) = self.inner.handshake.table() else {
            return Ok(false);
        };
        let Some(source) = table.get(source_name) else {
            return Ok(false);
        };
        if !source.try_acquire() {
            return Ok(false);
        }
        self.dispatch(source, build())?;
        Ok(true)
    }

    /// Take a token first, then ask `supply` for the frame.
    ///
    /// Expensive encoding can live in `supply` without being wasted on a
    /// frame that could not have been sent.
    pub fn send_with_supplier<F>(
        &self,
        source_name: &str,
        supply: F,
    ) -> Result<SendSupplierResult, CogError>
    where
        F: FnOnce() -> Option<InputFrame>,
    {
        let Some(source) = self.await_source(source_name) else {
            return Ok(SendSupplierResult::ErrorAcquiringToken);
        };
        if !source.acquire_blocking() {
            return Ok(SendSupplierResult::ErrorAcquiringToken);
        }
        match supply() {
            Some(frame) => {
                self.dispatch(&source, frame)?;
                Ok(SendSupplierResult::Success)
            }
            None => {
                source.release();
                Ok(SendSupplierResult::NullFromSupplier)
            }
        }
    }

    /// Whether the server consumes `source_name`. Waits for the handshake.
    pub fn accepts_source(&self, source_name: &str) -> bool {
        self.inner
            .handshake
            .await_table()
            .is_some_and(|table| table.contains(source_name))
    }

    /// Source names announced by the server, once the handshake is done.
    pub fn sources(&self) -> Option<Vec<String>> {
        self.inner
            .handshake
            .table()
            .map(|table| table.names().map(str::to_string).collect())
    }

    fn await_source(&self, source_name: &str) -> Option<Arc<Source>> {
        let table = self.inner.handshake.await_table()?;
        match table.get(source_name) {
            Some(source) => Some(Arc::clone(source)),
            None => {
                warn!(source = source_name, "server does not consume this source");
                None
            }
        }
    }

    /// Stamp and send a frame for which a token is already held.
    fn dispatch(&self, source: &Source, frame: InputFrame) -> Result<(), CogError> {
        let frame_id = source.next_frame_id();
        let body = match FromClient::new(frame_id, source.name(), frame).encode() {
            Ok(body) => body,
            Err(e) => {
                source.release();
                return Err(e);
            }
        };

        if let Some(measurement) = &self.inner.measurement {
            measurement.log_send(source.name(), frame_id);
        }
        if let Err(e) = self.inner.transport.send(body) {
            warn!(source = source.name(), frame_id, error = %e, "send failed, returning token");
            if let Some(measurement) = &self.inner.measurement {
                measurement.discard_send(source.name(), frame_id);
            }
            source.release();
            return Err(e);
        }
        debug!(source = source.name(), frame_id, "frame sent");
        Ok(())
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Close the session. Every blocked sender wakes up and fails.
    /// Idempotent; no `Disconnected` event follows a local stop.
    pub fn stop(&self) {
        if self.inner.lifecycle.close_graceful() {
            info!("session stopped");
        }
        self.inner.handshake.shutdown();
        self.inner.transport.close();
    }

    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.lifecycle.state()
    }

    /// Wait for the dispatch thread to finish. Call after `stop()` or once
    /// a `Disconnected` event was seen.
    pub fn join(&self) {
        let handle = self
            .inner
            .dispatcher
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                error!("dispatch thread panicked");
            }
        }
    }

    // ── Measurement ──────────────────────────────────────────────

    /// Mean round-trip time for a source. `None` without measurement or
    /// before the handshake.
    pub fn overall_rtt(&self, source_name: &str) -> Option<Duration> {
        self.inner.measurement.as_ref()?.overall_rtt(source_name)
    }

    pub fn overall_fps(&self, source_name: &str) -> Option<f64> {
        self.inner.measurement.as_ref()?.overall_fps(source_name)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("state", &self.state())
            .field("handshake_complete", &self.inner.handshake.is_complete())
            .field("measuring", &self.inner.measurement.is_some())
            .finish_non_exhaustive()
    }
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        self.lifecycle.close_graceful();
        self.handshake.shutdown();
        self.transport.close();
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Sole consumer of transport events.
struct Dispatcher {
    router: ResponseRouter,
    lifecycle: Arc<ConnectionLifecycle>,
    handshake: Arc<Handshake>,
    transport: Arc<dyn Transport>,
    events: EventSender,
}

impl Dispatcher {
    fn run(self, mut inbound: TransportEventReceiver) {
        while let Some(event) = inbound.blocking_recv() {
            let terminal = event.is_terminal();
            match event {
                TransportEvent::Opened => {
                    if let Err(e) = self.lifecycle.on_opened() {
                        debug!(error = %e, "ignoring open event");
                    }
                }
                TransportEvent::Message(body) => {
                    if let Err(e) = self.router.route(&body) {
                        error!(error = %e, "fatal protocol error, closing connection");
                        self.fail();
                        return;
                    }
                }
                TransportEvent::Closed => debug!("transport closed"),
                TransportEvent::Failed(reason) => warn!(%reason, "transport failed"),
            }
            if terminal {
                self.fail();
                return;
            }
        }
        debug!("transport event channel closed");
        self.fail();
    }

    /// Classify the end of the connection and stop everything.
    ///
    /// After a local `stop()` the lifecycle is already closed, so no
    /// event is emitted.
    fn fail(&self) {
        let reason = self.lifecycle.on_failure();
        self.handshake.shutdown();
        self.transport.close();
        if let Some(reason) = reason {
            info!(%reason, "session disconnected");
            if self.events.send(SessionEvent::Disconnected(reason)).is_err() {
                debug!("event receiver dropped");
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
