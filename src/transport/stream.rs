//! Stream-multiplexed transport adapter over WebTransport.
//!
//! The two logical channels map onto the two QUIC delivery modes: each
//! control frame rides its own bidirectional stream (opened, written,
//! finished; the stream EOF delimits the message), while state frames go
//! out as datagrams and may be dropped by the network without ceremony.

use std::sync::Arc;

use futures::future::BoxFuture;
use tokio::sync::{mpsc, oneshot};
use wtransport::Connection;

use crate::core::TransportError;
use crate::core::constants::MAX_FRAME_SIZE;
use crate::negotiate::TransportKind;
use crate::protocol::{Channel, ChannelFrame};

use super::link::{LinkCounters, LinkEvent, TransportLink};
use super::{ConnectTarget, TransportAdapter};

/// Build the `https://` connect URL from the negotiated endpoint, or
/// derive one from the fallback endpoint's authority.
fn connect_url(negotiated: Option<&str>, fallback: &str) -> Result<String, TransportError> {
    if let Some(endpoint) = negotiated {
        let endpoint = endpoint.trim();
        if endpoint.starts_with("https://") {
            return Ok(endpoint.to_string());
        }
        if !endpoint.is_empty() && !endpoint.starts_with('/') && !endpoint.starts_with(':') {
            return Ok(format!("https://{endpoint}"));
        }
    }
    let authority = super::socket::resolve_endpoint(None, fallback)?;
    let path = negotiated.filter(|e| e.starts_with('/')).unwrap_or("");
    Ok(format!("https://{authority}{path}"))
}

/// QUIC stream + datagram transport adapter.
#[derive(Debug, Default)]
pub struct StreamAdapter {
    allow_insecure: bool,
}

impl StreamAdapter {
    /// Create a stream adapter validating server certificates against
    /// the platform trust store.
    pub fn new() -> Self {
        Self {
            allow_insecure: false,
        }
    }

    /// Create a stream adapter that skips certificate validation, for
    /// self-signed development servers.
    pub fn insecure() -> Self {
        Self {
            allow_insecure: true,
        }
    }
}

impl TransportAdapter for StreamAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::StreamMultiplexed
    }

    fn connect<'a>(
        &'a self,
        target: ConnectTarget,
    ) -> BoxFuture<'a, Result<TransportLink, TransportError>> {
        Box::pin(async move {
            let url = connect_url(target.endpoint.as_deref(), &target.fallback_endpoint)?;

            let config = if self.allow_insecure {
                wtransport::ClientConfig::builder()
                    .with_bind_default()
                    .with_no_cert_validation()
                    .build()
            } else {
                wtransport::ClientConfig::builder()
                    .with_bind_default()
                    .with_native_certs()
                    .build()
            };

            let endpoint = wtransport::Endpoint::client(config)
                .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

            let connection = tokio::time::timeout(target.timeout, endpoint.connect(&url))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::ConnectFailed(format!("{url}: {e}")))?;

            tracing::debug!(%url, "stream transport connected");

            let connection = Arc::new(connection);
            let (link, backend) = TransportLink::pair(TransportKind::StreamMultiplexed);

            tokio::spawn(write_loop(
                connection.clone(),
                backend.outbound,
                backend.shutdown,
                backend.counters.clone(),
            ));
            tokio::spawn(read_streams(
                connection.clone(),
                backend.events.clone(),
                backend.counters.clone(),
            ));
            tokio::spawn(read_datagrams(connection, backend.events, backend.counters));

            Ok(link)
        })
    }
}

async fn send_on_stream(connection: &Connection, bytes: &[u8]) -> Result<(), TransportError> {
    let opening = connection
        .open_bi()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    let (mut send, _recv) = opening
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    send.write_all(bytes)
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    send.finish()
        .await
        .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
    Ok(())
}

async fn write_loop(
    connection: Arc<Connection>,
    mut outbound: mpsc::Receiver<ChannelFrame>,
    mut shutdown: oneshot::Receiver<()>,
    counters: Arc<LinkCounters>,
) {
    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break };
                let bytes = match frame.encode() {
                    Ok(bytes) => bytes,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping unencodable frame");
                        continue;
                    }
                };
                match frame.channel {
                    Channel::Control => {
                        if send_on_stream(&connection, &bytes).await.is_err() {
                            break;
                        }
                        counters.record_sent(bytes.len() as u64);
                    }
                    Channel::State => match connection.send_datagram(&bytes) {
                        Ok(()) => counters.record_sent(bytes.len() as u64),
                        // State frames are droppable; a lost datagram is
                        // not a connection failure.
                        Err(err) => tracing::trace!(error = %err, "state datagram dropped"),
                    },
                }
            }
            _ = &mut shutdown => break,
        }
    }
}

async fn read_stream_frame(connection: &Connection) -> Result<(ChannelFrame, usize), String> {
    let (_send, mut recv) = connection.accept_bi().await.map_err(|e| e.to_string())?;

    let mut data = Vec::new();
    let mut buf = [0u8; 4096];
    while let Some(n) = recv.read(&mut buf).await.map_err(|e| e.to_string())? {
        data.extend_from_slice(&buf[..n]);
        if data.len() > MAX_FRAME_SIZE {
            return Err(format!("oversized frame ({} bytes)", data.len()));
        }
    }
    let frame = ChannelFrame::decode(&data).map_err(|e| e.to_string())?;
    Ok((frame, data.len()))
}

/// Control-frame receive path. Runs as its own task: a stream read in
/// progress holds partial frame bytes and must never be dropped because
/// a datagram arrived first.
async fn read_streams(
    connection: Arc<Connection>,
    events: mpsc::Sender<LinkEvent>,
    counters: Arc<LinkCounters>,
) {
    let reason = loop {
        match read_stream_frame(&connection).await {
            Ok((frame, len)) => {
                counters.record_received(len as u64);
                if events.send(LinkEvent::Frame(frame)).await.is_err() {
                    return;
                }
            }
            Err(reason) => break reason,
        }
    };
    let _ = events.send(LinkEvent::Closed { reason }).await;
}

/// State-frame receive path, independent of the stream path.
async fn read_datagrams(
    connection: Arc<Connection>,
    events: mpsc::Sender<LinkEvent>,
    counters: Arc<LinkCounters>,
) {
    let reason = loop {
        match connection.receive_datagram().await {
            Ok(data) => {
                counters.record_received(data.len() as u64);
                match ChannelFrame::decode(&data) {
                    Ok(frame) => {
                        if events.send(LinkEvent::Frame(frame)).await.is_err() {
                            return;
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "dropping undecodable datagram"),
                }
            }
            Err(err) => break err.to_string(),
        }
    };
    let _ = events.send(LinkEvent::Closed { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Payload;
    use std::time::Duration;

    #[test]
    fn test_connect_url_from_negotiated_endpoint() {
        assert_eq!(
            connect_url(Some("https://edge-3.example.com:4433"), "game.example:7777").unwrap(),
            "https://edge-3.example.com:4433"
        );
        assert_eq!(
            connect_url(Some("edge-3.example.com:4433"), "game.example:7777").unwrap(),
            "https://edge-3.example.com:4433"
        );
    }

    #[test]
    fn test_connect_url_path_against_fallback_authority() {
        assert_eq!(
            connect_url(Some("/wt"), "wss://game.example:7777/play").unwrap(),
            "https://game.example:7777/wt"
        );
    }

    #[test]
    fn test_connect_url_from_fallback_alone() {
        assert_eq!(
            connect_url(None, "game.example:7777").unwrap(),
            "https://game.example:7777"
        );
    }

    #[test]
    fn test_connect_url_rejects_unusable_fallback() {
        assert!(connect_url(None, "").is_err());
    }

    #[tokio::test]
    async fn test_control_frame_survives_datagram_burst() {
        let identity = wtransport::Identity::self_signed(["localhost", "127.0.0.1"]).unwrap();
        let server_config = wtransport::ServerConfig::builder()
            .with_bind_default(0)
            .with_identity(identity)
            .build();
        let server = wtransport::Endpoint::server(server_config).unwrap();
        let port = server.local_addr().unwrap().port();

        tokio::spawn(async move {
            let request = server.accept().await.await.unwrap();
            let connection = request.accept().await.unwrap();

            let state = ChannelFrame::new(Channel::State, 1, 0, Payload::Pong { nonce: 0 });
            let state_bytes = state.encode().unwrap();
            let control = ChannelFrame::new(Channel::Control, 1, 0, Payload::Ping { nonce: 42 });
            let control_bytes = control.encode().unwrap();

            // Write the control frame in halves with datagrams landing in
            // between, so the receiving stream sits mid-frame while state
            // traffic keeps arriving.
            let (mut send, _recv) = connection.open_bi().await.unwrap().await.unwrap();
            let (head, tail) = control_bytes.split_at(control_bytes.len() / 2);
            send.write_all(head).await.unwrap();
            for _ in 0..20 {
                let _ = connection.send_datagram(&state_bytes);
                tokio::time::sleep(Duration::from_millis(2)).await;
            }
            send.write_all(tail).await.unwrap();
            send.finish().await.unwrap();

            // Keep the connection alive until the client has read it all.
            tokio::time::sleep(Duration::from_secs(10)).await;
        });

        let adapter = StreamAdapter::insecure();
        let mut link = adapter
            .connect(ConnectTarget {
                endpoint: Some(format!("127.0.0.1:{port}")),
                fallback_endpoint: "127.0.0.1:0".to_string(),
                peer: None,
                timeout: Duration::from_secs(5),
            })
            .await
            .unwrap();

        let control = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match link.next_event().await {
                    Some(LinkEvent::Frame(frame)) if frame.channel == Channel::Control => {
                        break frame;
                    }
                    Some(LinkEvent::Frame(_)) => continue,
                    other => panic!("link ended before control frame: {other:?}"),
                }
            }
        })
        .await
        .unwrap();

        assert_eq!(control.message, Payload::Ping { nonce: 42 });
    }

    #[tokio::test]
    async fn test_refused_connection_fails_attempt() {
        let adapter = StreamAdapter::insecure();
        let result = adapter
            .connect(ConnectTarget {
                endpoint: None,
                fallback_endpoint: "127.0.0.1:9".to_string(),
                peer: None,
                timeout: Duration::from_secs(2),
            })
            .await;

        assert!(result.is_err());
    }
}
