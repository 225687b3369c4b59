//! Events the session reports to its owner.
//!
//! The session never calls back into user code. Everything it observes
//! (results, engine errors, disconnects, measurement samples) is pushed
//! onto one unbounded channel which the owner drains at its own pace.

use bytes::Bytes;
use tokio::sync::mpsc;

use crate::measurement::IntervalMeasurement;
use crate::message::ResponseStatus;
use crate::state::DisconnectReason;

/// Sending half, owned by the session's dispatch thread.
pub type EventSender = mpsc::UnboundedSender<SessionEvent>;

/// Receiving half, handed to the session owner.
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// A successful engine result for one frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameResult {
    pub source_name: String,
    pub frame_id: u64,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The engine processed a frame.
    Result(FrameResult),

    /// The engine rejected a frame. The session itself keeps running until
    /// the owner calls `stop()`.
    ErrorResult {
        source_name: String,
        frame_id: u64,
        status: ResponseStatus,
    },

    /// The session ended. Reported at most once, and never after a local
    /// `stop()`.
    Disconnected(DisconnectReason),

    /// Periodic round-trip / throughput sample.
    Measurement(IntervalMeasurement),
}

impl SessionEvent {
    /// Events the owner should answer with `stop()`.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SessionEvent::Disconnected(_) | SessionEvent::ErrorResult { .. }
        )
    }
}

pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disconnects_and_engine_errors_are_fatal() {
        assert!(SessionEvent::Disconnected(DisconnectReason::ServerDisconnected).is_fatal());
        assert!(
            SessionEvent::ErrorResult {
                source_name: "cam".into(),
                frame_id: 3,
                status: ResponseStatus::EngineError,
            }
            .is_fatal()
        );
        assert!(
            !SessionEvent::Result(FrameResult {
                source_name: "cam".into(),
                frame_id: 1,
                payload: Bytes::from_static(b"ok"),
            })
            .is_fatal()
        );
    }
}
