pub mod connection;

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::error::CogError;

pub use connection::{DEFAULT_PORT, Endpoint, TcpTransport};

/// What a transport reports to the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The connection is established.
    Opened,
    /// One complete message body.
    Message(Bytes),
    /// The peer closed the connection, or it was closed locally.
    Closed,
    /// Connecting failed, or the connection broke.
    Failed(String),
}

impl TransportEvent {
    /// `Closed` and `Failed` end the event stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TransportEvent::Closed | TransportEvent::Failed(_))
    }
}

pub type TransportEventSender = mpsc::UnboundedSender<TransportEvent>;
pub type TransportEventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

pub fn transport_channel() -> (TransportEventSender, TransportEventReceiver) {
    mpsc::unbounded_channel()
}

/// Outbound half of a message transport.
///
/// Inbound traffic and connection state arrive separately as
/// [`TransportEvent`]s on the receiver handed out when the transport was
/// created.
pub trait Transport: Send + Sync {
    /// Queue one message body. Must not block.
    fn send(&self, body: Bytes) -> Result<(), CogError>;

    /// Tear the connection down. Idempotent.
    fn close(&self);
}
