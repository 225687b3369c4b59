//! Loopback cognitive engine.
//!
//! `EngineServer` accepts any number of clients. Each connection is greeted
//! with a Welcome and every frame is answered with one Response that gives
//! the frame's token back.

use std::sync::Arc;
use std::time::Duration;

use cogstream_core::{
    CogError, FrameCodec, FromClient, Response, ResponseStatus, ToClient, Welcome,
};
use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

/// What the engine announces and how it behaves.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub sources: Vec<String>,
    pub tokens_per_source: u32,
    /// Simulated processing time per frame.
    pub delay: Duration,
    /// Every n-th frame is answered with `EngineError`. 0 disables.
    pub fail_every: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sources: vec!["cam".into(), "mic".into()],
            tokens_per_source: 2,
            delay: Duration::ZERO,
            fail_every: 0,
        }
    }
}

#[derive(Debug)]
pub struct EngineServer {
    listener: TcpListener,
    settings: Arc<EngineSettings>,
}

impl EngineServer {
    /// Bind the listener.
    pub async fn listen(addr: &str, settings: EngineSettings) -> Result<Self, std::io::Error> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            settings: Arc::new(settings),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<std::net::SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept clients forever, one task per connection.
    pub async fn run(self) -> Result<(), std::io::Error> {
        loop {
            let (stream, peer) = self.listener.accept().await?;
            info!(%peer, "client connected");
            let settings = Arc::clone(&self.settings);
            tokio::spawn(async move {
                match serve(stream, &settings).await {
                    Ok(frames) => info!(%peer, frames, "client disconnected"),
                    Err(e) => warn!(%peer, error = %e, "connection ended with error"),
                }
            });
        }
    }
}

/// Serve one client until it hangs up. Returns the number of frames answered.
pub async fn serve(stream: TcpStream, settings: &EngineSettings) -> Result<u64, CogError> {
    stream.set_nodelay(true)?;
    let mut framed = Framed::new(stream, FrameCodec);

    let welcome = ToClient::Welcome(Welcome {
        sources_consumed: settings.sources.clone(),
        num_tokens_per_source: settings.tokens_per_source,
    });
    framed.send(welcome.encode()?).await?;

    let mut answered = 0u64;
    while let Some(body) = framed.next().await {
        let frame = match FromClient::decode(&body?) {
            Ok(frame) => frame,
            Err(e) if e.is_fatal() => return Err(e),
            Err(e) => {
                warn!(error = %e, "dropping malformed frame");
                continue;
            }
        };
        if !settings.delay.is_zero() {
            tokio::time::sleep(settings.delay).await;
        }
        answered += 1;
        let response = respond(&frame, answered, settings);
        debug!(
            source = %frame.source_name,
            frame_id = frame.frame_id,
            status = ?response.status,
            "answering frame"
        );
        framed.send(ToClient::Response(response).encode()?).await?;
    }
    Ok(answered)
}

fn respond(frame: &FromClient, seq: u64, settings: &EngineSettings) -> Response {
    let status = if !settings.sources.contains(&frame.source_name) {
        ResponseStatus::NoEngineForSource
    } else if settings.fail_every > 0 && seq % settings.fail_every == 0 {
        ResponseStatus::EngineError
    } else {
        ResponseStatus::Success
    };
    let result_payload = match status {
        ResponseStatus::Success => {
            format!("{:?} frame of {} bytes", frame.payload_type, frame.payload.len()).into_bytes()
        }
        _ => Vec::new(),
    };
    Response {
        source_name: frame.source_name.clone(),
        frame_id: frame.frame_id,
        return_token: true,
        status,
        result_payload,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use cogstream_core::{InputFrame, PayloadType};

    async fn client(settings: EngineSettings) -> Framed<TcpStream, FrameCodec> {
        let server = EngineServer::listen("127.0.0.1:0", settings).await.unwrap();
        let addr = server.local_addr().unwrap();
        tokio::spawn(server.run());
        Framed::new(TcpStream::connect(addr).await.unwrap(), FrameCodec)
    }

    async fn next(framed: &mut Framed<TcpStream, FrameCodec>) -> ToClient {
        let body = tokio::time::timeout(Duration::from_secs(5), framed.next())
            .await
            .expect("timeout")
            .expect("connection closed")
            .unwrap();
        ToClient::decode(&body).unwrap()
    }

    fn frame(id: u64, source: &str) -> Bytes {
        FromClient::new(id, source, InputFrame::new(PayloadType::Image, vec![0u8; 10]))
            .encode()
            .unwrap()
    }

    #[tokio::test]
    async fn test_welcome_then_responses() {
        let mut framed = client(EngineSettings::default()).await;
        match next(&mut framed).await {
            ToClient::Welcome(welcome) => {
                assert_eq!(welcome.sources_consumed, vec!["cam", "mic"]);
                assert_eq!(welcome.num_tokens_per_source, 2);
            }
            other => panic!("expected welcome, got {other:?}"),
        }

        framed.send(frame(1, "cam")).await.unwrap();
        match next(&mut framed).await {
            ToClient::Response(response) => {
                assert_eq!(response.frame_id, 1);
                assert!(response.return_token);
                assert_eq!(response.status, ResponseStatus::Success);
                assert_eq!(response.result_payload, b"Image frame of 10 bytes");
            }
            other => panic!("expected response, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_error_injection_and_unknown_source() {
        let mut framed = client(EngineSettings {
            fail_every: 2,
            ..EngineSettings::default()
        })
        .await;
        next(&mut framed).await;

        let mut statuses = Vec::new();
        for (id, source) in [(1, "cam"), (2, "cam"), (3, "gps")] {
            framed.send(frame(id, source)).await.unwrap();
            if let ToClient::Response(response) = next(&mut framed).await {
                statuses.push(response.status);
            }
        }
        assert_eq!(
            statuses,
            vec![
                ResponseStatus::Success,
                ResponseStatus::EngineError,
                ResponseStatus::NoEngineForSource,
            ]
        );
    }
}
