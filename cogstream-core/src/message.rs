//! Messages exchanged with the cognitive-engine server.
//!
//! A message body is one discriminant byte ([`MessageKind`]) followed by a
//! bincode-encoded payload. Enums use `TryFrom`, so unknown values are
//! reported instead of panicking.

use std::fmt;

use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

use crate::error::CogError;

// ── MessageKind ──────────────────────────────────────────────────

/// Discriminant of a message body.
///
/// - `0x01..0x0F`: server → client
/// - `0x10..0x1F`: client → server
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageKind {
    /// Source table announcement, first message of a connection.
    Welcome = 0x01,
    /// Acknowledgment of one frame.
    Response = 0x02,
    /// A sensor frame sent by the client.
    FromClient = 0x10,
}

impl TryFrom<u8> for MessageKind {
    type Error = CogError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(MessageKind::Welcome),
            0x02 => Ok(MessageKind::Response),
            0x10 => Ok(MessageKind::FromClient),
            _ => Err(CogError::UnknownVariant {
                type_name: "MessageKind",
                value: value as u64,
            }),
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Enums ────────────────────────────────────────────────────────

/// What kind of sensor data a frame carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum PayloadType {
    #[default]
    Image,
    Audio,
    Accelerometer,
    Video,
    Other,
}

/// Outcome reported by the server for one frame.
///
/// Carried as a raw `u32` on the wire. Codes this client does not know
/// decode as `Unspecified`, so the rest of the Response still arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "u32", into = "u32")]
pub enum ResponseStatus {
    Success,
    /// The engine failed while processing the frame.
    EngineError,
    /// The engine could not interpret the payload.
    WrongInputFormat,
    /// No engine consumes frames from this source.
    NoEngineForSource,
    /// Any status this client does not act on.
    Unspecified,
}

impl ResponseStatus {
    /// Statuses that require the orchestrator to tear the session down.
    pub fn is_application_error(&self) -> bool {
        matches!(
            self,
            ResponseStatus::EngineError
                | ResponseStatus::WrongInputFormat
                | ResponseStatus::NoEngineForSource
        )
    }
}

impl From<u32> for ResponseStatus {
    fn from(code: u32) -> Self {
        match code {
            0 => ResponseStatus::Success,
            1 => ResponseStatus::EngineError,
            2 => ResponseStatus::WrongInputFormat,
            3 => ResponseStatus::NoEngineForSource,
            _ => ResponseStatus::Unspecified,
        }
    }
}

impl From<ResponseStatus> for u32 {
    fn from(status: ResponseStatus) -> Self {
        match status {
            ResponseStatus::Success => 0,
            ResponseStatus::EngineError => 1,
            ResponseStatus::WrongInputFormat => 2,
            ResponseStatus::NoEngineForSource => 3,
            ResponseStatus::Unspecified => 4,
        }
    }
}

impl fmt::Display for ResponseStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

// ── Server → client ──────────────────────────────────────────────

/// First message of every connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Welcome {
    /// Names of the sources the server has engines for.
    pub sources_consumed: Vec<String>,
    /// Initial token allowance for every source.
    pub num_tokens_per_source: u32,
}

/// Acknowledgment of one frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub source_name: String,
    pub frame_id: u64,
    /// Whether this response gives the frame's token back.
    pub return_token: bool,
    pub status: ResponseStatus,
    pub result_payload: Vec<u8>,
}

/// Any message the server may send.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToClient {
    Welcome(Welcome),
    Response(Response),
}

impl ToClient {
    /// Decode a message body received from the server.
    ///
    /// An empty body yields [`CogError::EmptyMessage`], which callers treat
    /// as fatal. Unknown kinds and undecodable payloads are per-message
    /// errors.
    pub fn decode(body: &[u8]) -> Result<Self, CogError> {
        let (&kind, rest) = body.split_first().ok_or(CogError::EmptyMessage)?;
        match MessageKind::try_from(kind)? {
            MessageKind::Welcome => Ok(ToClient::Welcome(bincode::deserialize(rest)?)),
            MessageKind::Response => Ok(ToClient::Response(bincode::deserialize(rest)?)),
            MessageKind::FromClient => Err(CogError::ProtocolViolation(
                "server sent a client-to-server message",
            )),
        }
    }

    pub fn encode(&self) -> Result<Bytes, CogError> {
        match self {
            ToClient::Welcome(welcome) => encode_body(MessageKind::Welcome, welcome),
            ToClient::Response(response) => encode_body(MessageKind::Response, response),
        }
    }
}

// ── Client → server ──────────────────────────────────────────────

/// Sensor data handed to the session by a producer.
///
/// The session adds the frame id and source name when it sends it.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InputFrame {
    pub payload_type: PayloadType,
    pub payload: Bytes,
    /// Engine-specific metadata, passed through untouched.
    pub extras: Bytes,
}

impl InputFrame {
    pub fn new(payload_type: PayloadType, payload: impl Into<Bytes>) -> Self {
        Self {
            payload_type,
            payload: payload.into(),
            extras: Bytes::new(),
        }
    }

    pub fn with_extras(mut self, extras: impl Into<Bytes>) -> Self {
        self.extras = extras.into();
        self
    }
}

/// The frame envelope as it travels to the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FromClient {
    pub frame_id: u64,
    pub source_name: String,
    pub payload_type: PayloadType,
    pub payload: Vec<u8>,
    pub extras: Vec<u8>,
}

impl FromClient {
    pub fn new(frame_id: u64, source_name: &str, frame: InputFrame) -> Self {
        Self {
            frame_id,
            source_name: source_name.to_string(),
            payload_type: frame.payload_type,
            payload: frame.payload.to_vec(),
            extras: frame.extras.to_vec(),
        }
    }

    pub fn encode(&self) -> Result<Bytes, CogError> {
        encode_body(MessageKind::FromClient, self)
    }

    /// Decode a frame on the server side.
    pub fn decode(body: &[u8]) -> Result<Self, CogError> {
        let (&kind, rest) = body.split_first().ok_or(CogError::EmptyMessage)?;
        match MessageKind::try_from(kind)? {
            MessageKind::FromClient => Ok(bincode::deserialize(rest)?),
            _ => Err(CogError::ProtocolViolation(
                "client sent a server-to-client message",
            )),
        }
    }
}

fn encode_body<T: Serialize>(kind: MessageKind, value: &T) -> Result<Bytes, CogError> {
    let size = bincode::serialized_size(value)? as usize;
    let mut buf = BytesMut::with_capacity(1 + size);
    buf.put_u8(kind as u8);
    bincode::serialize_into((&mut buf).writer(), value)?;
    Ok(buf.freeze())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn response(status: ResponseStatus) -> Response {
        Response {
            source_name: "cam".into(),
            frame_id: 7,
            return_token: true,
            status,
            result_payload: b"label: cup".to_vec(),
        }
    }

    #[test]
    fn welcome_survives_the_wire() {
        let welcome = ToClient::Welcome(Welcome {
            sources_consumed: vec!["cam".into(), "mic".into()],
            num_tokens_per_source: 2,
        });
        let body = welcome.encode().unwrap();
        assert_eq!(body[0], MessageKind::Welcome as u8);
        assert_eq!(ToClient::decode(&body).unwrap(), welcome);
    }

    #[test]
    fn response_survives_the_wire() {
        let msg = ToClient::Response(response(ResponseStatus::EngineError));
        assert_eq!(ToClient::decode(&msg.encode().unwrap()).unwrap(), msg);
    }

    #[test]
    fn empty_body_is_empty_message() {
        assert!(matches!(ToClient::decode(&[]), Err(CogError::EmptyMessage)));
    }

    #[test]
    fn unknown_kind_is_not_fatal() {
        let err = ToClient::decode(&[0x7f, 1, 2, 3]).unwrap_err();
        assert!(matches!(err, CogError::UnknownVariant { .. }));
        assert!(!err.is_fatal());
    }

    #[test]
    fn truncated_payload_is_encoding_error() {
        let body = ToClient::Response(response(ResponseStatus::Success))
            .encode()
            .unwrap();
        let err = ToClient::decode(&body[..body.len() / 2]).unwrap_err();
        assert!(matches!(err, CogError::Encoding(_)));
    }

    #[test]
    fn from_client_carries_envelope() {
        let frame = InputFrame::new(PayloadType::Audio, &b"pcm"[..]).with_extras(&b"16khz"[..]);
        let msg = FromClient::new(3, "mic", frame);
        let decoded = FromClient::decode(&msg.encode().unwrap()).unwrap();
        assert_eq!(decoded.frame_id, 3);
        assert_eq!(decoded.source_name, "mic");
        assert_eq!(decoded.payload_type, PayloadType::Audio);
        assert_eq!(decoded.payload, b"pcm");
        assert_eq!(decoded.extras, b"16khz");
    }

    #[test]
    fn client_rejects_its_own_message_kind() {
        let body = FromClient::new(1, "cam", InputFrame::default())
            .encode()
            .unwrap();
        assert!(matches!(
            ToClient::decode(&body),
            Err(CogError::ProtocolViolation(_))
        ));
    }

    #[test]
    fn unknown_status_code_decodes_as_unspecified() {
        #[derive(Serialize)]
        struct RawResponse {
            source_name: String,
            frame_id: u64,
            return_token: bool,
            status: u32,
            result_payload: Vec<u8>,
        }
        let raw = RawResponse {
            source_name: "cam".into(),
            frame_id: 9,
            return_token: true,
            status: 7,
            result_payload: Vec::new(),
        };
        let body = encode_body(MessageKind::Response, &raw).unwrap();
        match ToClient::decode(&body).unwrap() {
            ToClient::Response(response) => {
                assert_eq!(response.status, ResponseStatus::Unspecified);
                assert!(response.return_token);
                assert_eq!(response.frame_id, 9);
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[test]
    fn status_codes_are_stable() {
        for code in 0..=4u32 {
            assert_eq!(u32::from(ResponseStatus::from(code)), code);
        }
        assert_eq!(ResponseStatus::from(u32::MAX), ResponseStatus::Unspecified);
    }

    #[test]
    fn application_error_statuses() {
        assert!(ResponseStatus::EngineError.is_application_error());
        assert!(ResponseStatus::WrongInputFormat.is_application_error());
        assert!(ResponseStatus::NoEngineForSource.is_application_error());
        assert!(!ResponseStatus::Success.is_application_error());
        assert!(!ResponseStatus::Unspecified.is_application_error());
    }
}
