use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, warn};

use super::{
    Transport, TransportEvent, TransportEventReceiver, TransportEventSender, transport_channel,
};
use crate::codec::FrameCodec;
use crate::error::CogError;

/// Port used when an endpoint string does not name one.
pub const DEFAULT_PORT: u16 = 9099;

// ── Endpoint ─────────────────────────────────────────────────────

/// Where the server listens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Parse `host`, `host:port`, `[v6]:port` or any of those behind a
    /// `tcp://` prefix. A missing port falls back to `default_port`.
    pub fn parse(input: &str, default_port: u16) -> Result<Self, CogError> {
        let invalid = |why: &str| CogError::InvalidEndpoint(format!("{input:?}: {why}"));

        let mut rest = input.trim();
        if let Some((scheme, after)) = rest.split_once("://") {
            if !scheme.eq_ignore_ascii_case("tcp") {
                return Err(invalid("unsupported scheme"));
            }
            rest = after;
        }
        let rest = rest.trim_end_matches('/');

        let (host, port) = if let Some(bracketed) = rest.strip_prefix('[') {
            let (host, after) = bracketed
                .split_once(']')
                .ok_or_else(|| invalid("unclosed '['"))?;
            match after {
                "" => (host, None),
                _ => (
                    host,
                    Some(after.strip_prefix(':').ok_or_else(|| invalid("junk after ']'"))?),
                ),
            }
        } else {
            match rest.rsplit_once(':') {
                // More than one colon without brackets: a bare IPv6 address.
                Some((host, _)) if host.contains(':') => (rest, None),
                Some((host, port)) => (host, Some(port)),
                None => (rest, None),
            }
        };

        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = match port {
            None => default_port,
            Some(port) => match port.parse::<u16>() {
                Ok(0) | Err(_) => return Err(invalid("invalid port")),
                Ok(port) => port,
            },
        };
        Ok(Self::new(host, port))
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

// ── TcpTransport ─────────────────────────────────────────────────

/// Framed TCP connection driven by tasks on a tokio runtime.
///
/// All methods are synchronous so the blocking session API can use the
/// transport from plain threads.
#[derive(Debug)]
pub struct TcpTransport {
    endpoint: Endpoint,
    outbound: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    events: TransportEventSender,
    driver: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl TcpTransport {
    /// Start connecting to `endpoint` on `runtime`.
    ///
    /// Returns immediately. The outcome arrives on the event receiver as
    /// `Opened` or `Failed`.
    pub fn connect(endpoint: Endpoint, runtime: &Handle) -> (Self, TransportEventReceiver) {
        let (events, event_rx) = transport_channel();
        let (out_tx, out_rx) = mpsc::unbounded_channel();

        let driver = runtime.spawn(drive(endpoint.clone(), out_rx, events.clone()));

        let transport = Self {
            endpoint,
            outbound: Mutex::new(Some(out_tx)),
            events,
            driver: Mutex::new(Some(driver)),
            closed: AtomicBool::new(false),
        };
        (transport, event_rx)
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    fn outbound(&self) -> MutexGuard<'_, Option<mpsc::UnboundedSender<Bytes>>> {
        self.outbound
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Transport for TcpTransport {
    fn send(&self, body: Bytes) -> Result<(), CogError> {
        match self.outbound().as_ref() {
            Some(tx) => Ok(tx.send(body)?),
            None => Err(CogError::ChannelClosed),
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        // Dropping the queue lets the writer flush what is left and exit.
        self.outbound().take();
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(driver) = driver {
            driver.abort();
        }
        let _ = self.events.send(TransportEvent::Closed);
        info!(endpoint = %self.endpoint, "transport closed");
    }
}

impl Drop for TcpTransport {
    fn drop(&mut self) {
        if let Ok(driver) = self.driver.get_mut() {
            if let Some(driver) = driver.take() {
                driver.abort();
            }
        }
    }
}

/// Connect, then pump frames until either side gives up.
async fn drive(
    endpoint: Endpoint,
    mut outbound: mpsc::UnboundedReceiver<Bytes>,
    events: TransportEventSender,
) {
    let stream = match TcpStream::connect((endpoint.host(), endpoint.port())).await {
        Ok(stream) => stream,
        Err(e) => {
            warn!(%endpoint, error = %e, "connect failed");
            let _ = events.send(TransportEvent::Failed(e.to_string()));
            return;
        }
    };
    if let Err(e) = stream.set_nodelay(true) {
        debug!(error = %e, "could not set TCP_NODELAY");
    }
    info!(%endpoint, "connected");
    let _ = events.send(TransportEvent::Opened);

    let (mut net_writer, mut net_reader) = Framed::new(stream, FrameCodec).split();

    // Writer task: session -> network
    let writer_events = events.clone();
    let writer = tokio::spawn(async move {
        while let Some(body) = outbound.recv().await {
            if let Err(e) = net_writer.send(body).await {
                warn!(error = %e, "network write error");
                let _ = writer_events.send(TransportEvent::Failed(e.to_string()));
                return;
            }
        }
        let _ = net_writer.close().await;
    });

    // Reader: network -> session
    let terminal = loop {
        match net_reader.next().await {
            Some(Ok(body)) => {
                if events.send(TransportEvent::Message(body)).is_err() {
                    // Nobody is listening anymore.
                    break None;
                }
            }
            Some(Err(e)) => {
                warn!(error = %e, "network read error");
                break Some(TransportEvent::Failed(e.to_string()));
            }
            None => {
                debug!("peer closed the connection");
                break Some(TransportEvent::Closed);
            }
        }
    };
    writer.abort();
    if let Some(event) = terminal {
        let _ = events.send(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_host_only() {
        let ep = Endpoint::parse("engine.local", 9099).unwrap();
        assert_eq!(ep.host(), "engine.local");
        assert_eq!(ep.port(), 9099);
    }

    #[test]
    fn parses_host_and_port() {
        let ep = Endpoint::parse("10.0.0.2:7000", 9099).unwrap();
        assert_eq!(ep, Endpoint::new("10.0.0.2", 7000));
        assert_eq!(ep.to_string(), "10.0.0.2:7000");
    }

    #[test]
    fn parses_tcp_scheme() {
        let ep = Endpoint::parse("tcp://localhost:1234/", 9099).unwrap();
        assert_eq!(ep, Endpoint::new("localhost", 1234));
        let ep = Endpoint::parse("TCP://localhost", 5).unwrap();
        assert_eq!(ep.port(), 5);
    }

    #[test]
    fn parses_ipv6() {
        let ep = Endpoint::parse("[::1]:8080", 9099).unwrap();
        assert_eq!(ep, Endpoint::new("::1", 8080));
        assert_eq!(ep.to_string(), "[::1]:8080");

        let ep = Endpoint::parse("fe80::1", 9099).unwrap();
        assert_eq!(ep, Endpoint::new("fe80::1", 9099));
    }

    #[test]
    fn rejects_bad_input() {
        for input in ["", ":80", "ws://host", "host:0", "host:99999", "host:abc", "[::1"] {
            assert!(
                matches!(Endpoint::parse(input, 9099), Err(CogError::InvalidEndpoint(_))),
                "accepted {input:?}"
            );
        }
    }
}
