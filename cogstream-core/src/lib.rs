//! # cogstream-core
//!
//! Client-side session engine for streaming sensor frames to a remote
//! cognitive engine.
//!
//! This crate contains:
//! - **Wire**: `FrameHeader`, `FrameCodec` and the `Welcome` / `Response` / `FromClient` messages
//! - **Flow control**: per-source token buckets (`Source`, `SourceTable`) gated by the `Handshake`
//! - **Routing**: `ResponseRouter` turning inbound messages into `SessionEvent`s
//! - **State**: `ConnectionLifecycle` classifying how a session ended
//! - **Measurement**: round-trip time and throughput per source
//! - **Network**: the `Transport` seam and its TCP implementation
//! - **Session**: `Session`, the blocking API used by producer threads
//! - **Error**: `CogError`, a `thiserror`-based error hierarchy

pub mod codec;
pub mod config;
pub mod error;
pub mod event;
pub mod handshake;
pub mod header;
pub mod measurement;
pub mod message;
pub mod network;
pub mod router;
pub mod session;
pub mod source;
pub mod state;

// ── Re-exports for ergonomic usage ───────────────────────────────

pub use codec::{FrameCodec, MAX_BODY_SIZE};
pub use config::{MeasurementConfig, SessionConfig};
pub use error::CogError;
pub use event::{EventReceiver, EventSender, FrameResult, SessionEvent};
pub use handshake::Handshake;
pub use header::{FrameHeader, HEADER_SIZE, MAGIC};
pub use measurement::{IntervalMeasurement, MeasurementLayer};
pub use message::{
    FromClient, InputFrame, MessageKind, PayloadType, Response, ResponseStatus, ToClient, Welcome,
};
pub use network::{
    DEFAULT_PORT, Endpoint, TcpTransport, Transport, TransportEvent, TransportEventReceiver,
    TransportEventSender, transport_channel,
};
pub use router::ResponseRouter;
pub use session::{SendSupplierResult, Session};
pub use source::{Source, SourceTable};
pub use state::{ConnectionLifecycle, ConnectionState, DisconnectReason};
