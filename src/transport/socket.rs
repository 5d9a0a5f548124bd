//! Socket transport adapter.
//!
//! Length-framed JSON over TCP: 4-byte big-endian length prefix, then
//! one encoded [`ChannelFrame`]. Both channels share the one ordered
//! byte stream, so state frames lose their "may be dropped" property
//! here; that is the price of the lowest common denominator.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::{mpsc, oneshot};

use crate::core::TransportError;
use crate::core::constants::MAX_FRAME_SIZE;
use crate::negotiate::TransportKind;
use crate::protocol::ChannelFrame;

use super::link::{LinkEvent, TransportLink};
use super::{ConnectTarget, TransportAdapter};

/// Strip a scheme prefix and any path, leaving `host:port`.
fn authority_of(endpoint: &str) -> Option<&str> {
    let rest = match endpoint.split_once("://") {
        Some((_, rest)) => rest,
        None => endpoint,
    };
    let authority = rest.split('/').next()?.trim();
    (!authority.is_empty()).then_some(authority)
}

/// Host portion of an authority, without the port.
fn host_of(authority: &str) -> &str {
    match authority.rsplit_once(':') {
        Some((host, port)) if port.chars().all(|c| c.is_ascii_digit()) => host,
        _ => authority,
    }
}

/// Resolve the address to dial.
///
/// A fully qualified server-provided endpoint is used literally; a
/// port-only endpoint (`:7777`) resolves against the negotiated base
/// host; a path-only endpoint carries nothing a raw socket can use, so
/// it falls through to the base authority. With no negotiated endpoint
/// at all, the caller-supplied fallback wins.
pub(crate) fn resolve_endpoint(
    negotiated: Option<&str>,
    fallback: &str,
) -> Result<String, TransportError> {
    let fallback_authority = authority_of(fallback)
        .ok_or_else(|| TransportError::BadEndpoint(fallback.to_string()))?;

    let resolved = match negotiated {
        None => fallback_authority.to_string(),
        Some(e) if e.contains("://") => authority_of(e)
            .ok_or_else(|| TransportError::BadEndpoint(e.to_string()))?
            .to_string(),
        Some(e) if e.starts_with(':') => format!("{}{e}", host_of(fallback_authority)),
        Some(e) if e.starts_with('/') => fallback_authority.to_string(),
        Some(e) if !e.trim().is_empty() => e.trim().to_string(),
        Some(e) => return Err(TransportError::BadEndpoint(e.to_string())),
    };
    Ok(resolved)
}

/// Plain framed-TCP transport adapter.
#[derive(Debug, Default)]
pub struct SocketAdapter;

impl SocketAdapter {
    /// Create a socket adapter.
    pub fn new() -> Self {
        Self
    }
}

impl TransportAdapter for SocketAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::Socket
    }

    fn connect<'a>(
        &'a self,
        target: ConnectTarget,
    ) -> futures::future::BoxFuture<'a, Result<TransportLink, TransportError>> {
        Box::pin(async move {
            let addr = resolve_endpoint(target.endpoint.as_deref(), &target.fallback_endpoint)?;

            let stream = tokio::time::timeout(target.timeout, TcpStream::connect(&addr))
                .await
                .map_err(|_| TransportError::Timeout)?
                .map_err(|e| TransportError::ConnectFailed(format!("{addr}: {e}")))?;
            let _ = stream.set_nodelay(true);

            tracing::debug!(%addr, "socket transport connected");

            let (link, backend) = TransportLink::pair(TransportKind::Socket);
            let (read_half, write_half) = stream.into_split();

            tokio::spawn(write_loop(
                write_half,
                backend.outbound,
                backend.shutdown,
                backend.counters.clone(),
            ));
            tokio::spawn(read_loop(read_half, backend.events, backend.counters));

            Ok(link)
        })
    }
}

async fn write_loop(
    mut write_half: OwnedWriteHalf,
    mut outbound: mpsc::Receiver<ChannelFrame>,
    mut shutdown: oneshot::Receiver<()>,
    counters: std::sync::Arc<super::link::LinkCounters>,
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
                let len = (bytes.len() as u32).to_be_bytes();
                if write_half.write_all(&len).await.is_err()
                    || write_half.write_all(&bytes).await.is_err()
                {
                    break;
                }
                counters.record_sent(bytes.len() as u64 + 4);
            }
            _ = &mut shutdown => {
                let _ = write_half.shutdown().await;
                break;
            }
        }
    }
}

async fn read_loop(
    mut read_half: OwnedReadHalf,
    events: mpsc::Sender<LinkEvent>,
    counters: std::sync::Arc<super::link::LinkCounters>,
) {
    let reason = loop {
        let mut len_buf = [0u8; 4];
        if let Err(err) = read_half.read_exact(&mut len_buf).await {
            break err.to_string();
        }
        let len = u32::from_be_bytes(len_buf) as usize;
        if len > MAX_FRAME_SIZE {
            break format!("oversized frame ({len} bytes)");
        }

        let mut buf = vec![0u8; len];
        if let Err(err) = read_half.read_exact(&mut buf).await {
            break err.to_string();
        }
        counters.record_received(len as u64 + 4);

        match ChannelFrame::decode(&buf) {
            Ok(frame) => {
                if events.send(LinkEvent::Frame(frame)).await.is_err() {
                    // Link dropped; nobody is listening anymore.
                    return;
                }
            }
            Err(err) => tracing::warn!(error = %err, "dropping undecodable frame"),
        }
    };
    let _ = events.send(LinkEvent::Closed { reason }).await;
}
