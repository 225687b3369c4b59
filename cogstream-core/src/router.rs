//! Inbound message dispatch.
//!
//! The router decodes each message body delivered by the transport and
//! turns it into state changes (handshake, token release, measurement)
//! plus [`SessionEvent`]s for the owner. It holds no reference back into
//! the session facade.

use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use tracing::{debug, error, warn};

use crate::error::CogError;
use crate::event::{EventSender, FrameResult, SessionEvent};
use crate::handshake::Handshake;
use crate::measurement::MeasurementLayer;
use crate::message::{Response, ResponseStatus, ToClient, Welcome};

#[derive(Debug)]
pub struct ResponseRouter {
    handshake: Arc<Handshake>,
    measurement: Option<Arc<MeasurementLayer>>,
    events: EventSender,
}

impl ResponseRouter {
    pub fn new(
        handshake: Arc<Handshake>,
        measurement: Option<Arc<MeasurementLayer>>,
        events: EventSender,
    ) -> Self {
        Self {
            handshake,
            measurement,
            events,
        }
    }

    /// Process one message body.
    ///
    /// Only connection-fatal errors are returned. Malformed or unexpected
    /// messages are logged and dropped here.
    pub fn route(&self, body: &[u8]) -> Result<(), CogError> {
        let received_at = Instant::now();
        let message = match ToClient::decode(body) {
            Ok(message) => message,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, len = body.len(), "dropping malformed message");
                return Ok(());
            }
        };

        match message {
            ToClient::Welcome(welcome) => self.on_welcome(&welcome),
            ToClient::Response(response) => self.on_response(response, received_at),
        }
        Ok(())
    }

    fn on_welcome(&self, welcome: &Welcome) {
        // Registered first: completing the handshake releases senders.
        if let Some(measurement) = &self.measurement {
            measurement.register_sources(welcome.sources_consumed.iter().map(String::as_str));
        }
        if let Err(e) = self.handshake.complete(welcome) {
            warn!(error = %e, "ignoring welcome");
        }
    }

    fn on_response(&self, response: Response, received_at: Instant) {
        let Some(table) = self.handshake.table() else {
            warn!(
                source = %response.source_name,
                frame_id = response.frame_id,
                "response before welcome, dropping"
            );
            return;
        };
        let Some(source) = table.get(&response.source_name) else {
            warn!(
                source = %response.source_name,
                frame_id = response.frame_id,
                "response for unknown source, dropping"
            );
            return;
        };

        if response.return_token {
            source.release();
        }
        debug!(
            source = %response.source_name,
            frame_id = response.frame_id,
            status = ?response.status,
            returned = response.return_token,
            "response"
        );

        if let Some(measurement) = &self.measurement {
            if let Some(sample) =
                measurement.log_receive_at(&response.source_name, response.frame_id, received_at)
            {
                self.emit(SessionEvent::Measurement(sample));
            }
        }

        match response.status {
            ResponseStatus::Success => self.emit(SessionEvent::Result(FrameResult {
                source_name: response.source_name,
                frame_id: response.frame_id,
                payload: Bytes::from(response.result_payload),
            })),
            status if status.is_application_error() => {
                error!(
                    source = %response.source_name,
                    frame_id = response.frame_id,
                    ?status,
                    "engine reported an error"
                );
                self.emit(SessionEvent::ErrorResult {
                    source_name: response.source_name,
                    frame_id: response.frame_id,
                    status,
                });
            }
            status => warn!(
                source = %response.source_name,
                frame_id = response.frame_id,
                ?status,
                "unhandled response status, dropping"
            ),
        }
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!("event receiver dropped");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeasurementConfig;
    use crate::event::{EventReceiver, event_channel};

    fn router(measure: bool) -> (ResponseRouter, Arc<Handshake>, EventReceiver) {
        let handshake = Arc::new(Handshake::new(None, None));
        let measurement = measure.then(|| {
            Arc::new(MeasurementLayer::new(MeasurementConfig {
                enabled: true,
                output_frequency: 1,
                max_pending_sends: 16,
            }))
        });
        let (tx, rx) = event_channel();
        (
            ResponseRouter::new(Arc::clone(&handshake), measurement, tx),
            handshake,
            rx,
        )
    }

    fn welcome(tokens: u32) -> Bytes {
        ToClient::Welcome(Welcome {
            sources_consumed: vec!["cam".into(), "mic".into()],
            num_tokens_per_source: tokens,
        })
        .encode()
        .unwrap()
    }

    fn response(source: &str, frame_id: u64, status: ResponseStatus, return_token: bool) -> Bytes {
        ToClient::Response(Response {
            source_name: source.into(),
            frame_id,
            return_token,
            status,
            result_payload: b"label".to_vec(),
        })
        .encode()
        .unwrap()
    }

    #[test]
    fn welcome_installs_table() {
        let (router, handshake, _rx) = router(false);
        router.route(&welcome(2)).unwrap();
        let table = handshake.table().unwrap();
        assert!(table.contains("cam"));
        assert_eq!(table.get("mic").unwrap().token_count(), 2);
    }

    #[test]
    fn success_releases_token_and_emits_result() {
        let (router, handshake, mut rx) = router(false);
        router.route(&welcome(1)).unwrap();
        let cam = Arc::clone(handshake.table().unwrap().get("cam").unwrap());
        assert!(cam.try_acquire());
        assert!(!cam.try_acquire());

        router
            .route(&response("cam", 1, ResponseStatus::Success, true))
            .unwrap();
        assert_eq!(cam.token_count(), 1);
        match rx.try_recv().unwrap() {
            SessionEvent::Result(result) => {
                assert_eq!(result.source_name, "cam");
                assert_eq!(result.frame_id, 1);
                assert_eq!(&result.payload[..], b"label");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn engine_error_emits_error_result_only() {
        let (router, _handshake, mut rx) = router(false);
        router.route(&welcome(1)).unwrap();
        router
            .route(&response("cam", 4, ResponseStatus::EngineError, true))
            .unwrap();

        assert_eq!(
            rx.try_recv().unwrap(),
            SessionEvent::ErrorResult {
                source_name: "cam".into(),
                frame_id: 4,
                status: ResponseStatus::EngineError,
            }
        );
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unspecified_status_is_dropped() {
        let (router, _handshake, mut rx) = router(false);
        router.route(&welcome(1)).unwrap();
        router
            .route(&response("cam", 1, ResponseStatus::Unspecified, false))
            .unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_status_code_still_returns_token() {
        #[derive(serde::Serialize)]
        struct RawResponse {
            source_name: String,
            frame_id: u64,
            return_token: bool,
            status: u32,
            result_payload: Vec<u8>,
        }
        let (router, handshake, mut rx) = router(false);
        router.route(&welcome(1)).unwrap();
        let cam = Arc::clone(handshake.table().unwrap().get("cam").unwrap());
        assert!(cam.try_acquire());

        let mut body = vec![0x02];
        bincode::serialize_into(
            &mut body,
            &RawResponse {
                source_name: "cam".into(),
                frame_id: 1,
                return_token: true,
                status: 7,
                result_payload: Vec::new(),
            },
        )
        .unwrap();
        router.route(&body).unwrap();

        assert_eq!(cam.token_count(), 1);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unknown_source_is_dropped() {
        let (router, handshake, mut rx) = router(false);
        router.route(&welcome(1)).unwrap();
        router
            .route(&response("gps", 1, ResponseStatus::Success, true))
            .unwrap();
        assert!(rx.try_recv().is_err());
        assert_eq!(handshake.table().unwrap().get("cam").unwrap().token_count(), 1);
    }

    #[test]
    fn response_before_welcome_is_dropped() {
        let (router, handshake, mut rx) = router(false);
        router
            .route(&response("cam", 1, ResponseStatus::Success, true))
            .unwrap();
        assert!(!handshake.is_complete());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn duplicate_welcome_is_ignored() {
        let (router, handshake, _rx) = router(false);
        router.route(&welcome(2)).unwrap();
        assert!(handshake.table().unwrap().get("cam").unwrap().try_acquire());
        router.route(&welcome(7)).unwrap();
        assert_eq!(handshake.table().unwrap().get("cam").unwrap().token_count(), 1);
    }

    #[test]
    fn empty_body_is_fatal() {
        let (router, _handshake, _rx) = router(false);
        let err = router.route(&[]).unwrap_err();
        assert!(matches!(err, CogError::EmptyMessage));
    }

    #[test]
    fn malformed_bodies_are_dropped() {
        let (router, _handshake, mut rx) = router(false);
        assert!(router.route(&[0x7f, 1, 2, 3]).is_ok());
        assert!(router.route(&[0x02, 0xff]).is_ok());
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn measurement_sample_follows_response() {
        let (router, _handshake, mut rx) = router(true);
        router.route(&welcome(1)).unwrap();
        router
            .route(&response("cam", 1, ResponseStatus::Success, true))
            .unwrap();

        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Measurement(_)));
        assert!(matches!(rx.try_recv().unwrap(), SessionEvent::Result(_)));
    }
}
