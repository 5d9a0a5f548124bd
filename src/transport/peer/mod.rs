//! Peer-to-peer transport adapter.
//!
//! Connection setup runs through an HTTP rendezvous server: post an
//! offer with local UDP candidates, receive the remote answer and its
//! candidates, then probe candidate addresses until one answers. The
//! established link splits into two sub-channels over the one UDP
//! socket: a reliable, ordered control channel (acks plus
//! retransmission, see [`channel`]) and a fire-and-forget state channel.

mod channel;
mod signaling;

pub use channel::{DatagramError, PeerDatagram, ReliableInbound, ReliableOutbound};
pub use signaling::IceCandidate;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::net::{UdpSocket, lookup_host};

use crate::core::TransportError;
use crate::core::constants::{MAX_DATAGRAM_PAYLOAD, PEER_PROBE_INTERVAL};
use crate::negotiate::TransportKind;
use crate::protocol::{ChannelFrame, unix_timestamp_ms};

use super::link::{LinkBackend, LinkCounters, LinkEvent, TransportLink};
use super::timing::RttEstimator;
use super::{ConnectTarget, TransportAdapter};

use channel::PeerChannels;
use signaling::SignalingClient;

/// Everything the peer adapter needs that negotiation cannot supply.
#[derive(Debug, Clone)]
pub struct PeerConfig {
    /// Room both peers rendezvous in.
    pub room_id: String,
    /// This client's identity within the room.
    pub peer_id: String,
    /// Base URL of the rendezvous server.
    pub signaling_url: String,
    /// Relay addresses to advertise alongside the local candidate,
    /// resolved and trickled during setup.
    pub relay_servers: Vec<String>,
}

/// Direct peer link adapter.
#[derive(Debug, Default)]
pub struct PeerAdapter;

impl PeerAdapter {
    /// Create a peer adapter.
    pub fn new() -> Self {
        Self
    }
}

impl TransportAdapter for PeerAdapter {
    fn kind(&self) -> TransportKind {
        TransportKind::PeerToPeer
    }

    fn connect<'a>(
        &'a self,
        target: ConnectTarget,
    ) -> BoxFuture<'a, Result<TransportLink, TransportError>> {
        Box::pin(async move {
            let config = target.peer.clone().ok_or_else(|| {
                TransportError::ConnectFailed("no peer rendezvous configuration".to_string())
            })?;

            tokio::time::timeout(target.timeout, establish(config))
                .await
                .map_err(|_| TransportError::Timeout)?
        })
    }
}

async fn establish(config: PeerConfig) -> Result<TransportLink, TransportError> {
    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    let local_addr = socket.local_addr()?;

    // Both sub-channels exist, closed, before the offer goes out; frames
    // submitted while the handshake runs queue up and flush once open.
    let subchannels = SubChannels::default();

    let signaling = SignalingClient::new(&config.signaling_url);
    let sdp = signaling::build_offer_sdp(&config.peer_id, &[local_addr]);

    // Relay candidates resolve concurrently and trickle in while the
    // offer round-trip and probing run. The task is never cut short on
    // success: the remote side may need a late-resolving relay to reach
    // us. The overall connect timeout bounds it either way.
    let trickle = {
        let signaling = signaling.clone();
        let config = config.clone();
        tokio::spawn(async move {
            for server in &config.relay_servers {
                let addrs = match lookup_host(server.as_str()).await {
                    Ok(addrs) => addrs,
                    Err(err) => {
                        tracing::debug!(%server, error = %err, "relay lookup failed");
                        continue;
                    }
                };
                for addr in addrs {
                    let candidate = IceCandidate::from_addr(addr);
                    if let Err(err) = signaling
                        .post_candidate(&config.room_id, &config.peer_id, &candidate)
                        .await
                    {
                        tracing::debug!(%addr, error = %err, "candidate trickle failed");
                    }
                }
            }
        })
    };

    let handshake: Result<SocketAddr, TransportError> = async {
        let response = signaling
            .post_offer(&config.room_id, &config.peer_id, &sdp)
            .await
            .map_err(TransportError::Signaling)?;

        let mut candidates: Vec<SocketAddr> = Vec::new();
        if let Some(answer) = &response.answer {
            candidates.extend(signaling::parse_sdp_candidates(&answer.sdp));
        }
        for candidate in &response.ice_candidates {
            if let Some(addr) = signaling::parse_candidate_addr(&candidate.candidate)
                && !candidates.contains(&addr)
            {
                candidates.push(addr);
            }
        }
        if candidates.is_empty() {
            return Err(TransportError::Signaling(
                crate::core::SignalingError::NoRemoteCandidate,
            ));
        }

        let remote = probe_candidates(&socket, &candidates).await?;
        socket.connect(remote).await?;
        Ok(remote)
    }
    .await;

    let remote = match handshake {
        Ok(remote) => remote,
        Err(err) => {
            trickle.abort();
            return Err(err);
        }
    };

    // Remaining relay candidates still reach signaling before the link
    // is handed over.
    let _ = trickle.await;
    tracing::debug!(%remote, "peer transport connected");

    Ok(spawn_link(Arc::new(socket), subchannels))
}

/// State of both sub-channels, created before the offer is posted and
/// handed to the link driver once the socket is connected.
#[derive(Debug, Default)]
struct SubChannels {
    channels: PeerChannels,
    reliable_out: ReliableOutbound,
    reliable_in: ReliableInbound,
}

/// Probe each candidate address until one answers.
///
/// The overall connect timeout bounds this loop; with no reachable
/// candidate it simply never resolves.
async fn probe_candidates(
    socket: &UdpSocket,
    candidates: &[SocketAddr],
) -> Result<SocketAddr, TransportError> {
    let token = unix_timestamp_ms();
    let probe = PeerDatagram::Probe { token }.encode();
    let mut ticker = tokio::time::interval(PEER_PROBE_INTERVAL);
    let mut buf = [0u8; 2048];

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                for addr in candidates {
                    let _ = socket.send_to(&probe, addr).await;
                }
            }
            received = socket.recv_from(&mut buf) => {
                let (len, from) = received?;
                match PeerDatagram::decode(&buf[..len]) {
                    Ok(PeerDatagram::ProbeAck { token: t }) if t == token => return Ok(from),
                    Ok(PeerDatagram::Probe { token: t }) => {
                        // The remote side is probing us concurrently.
                        let ack = PeerDatagram::ProbeAck { token: t }.encode();
                        let _ = socket.send_to(&ack, from).await;
                    }
                    Ok(_) | Err(_) => {}
                }
            }
        }
    }
}

/// Start the link driver on an already-connected socket.
fn spawn_link(socket: Arc<UdpSocket>, subchannels: SubChannels) -> TransportLink {
    let (link, backend) = TransportLink::pair(TransportKind::PeerToPeer);
    tokio::spawn(drive(socket, backend, subchannels));
    link
}

async fn send_datagram(
    socket: &UdpSocket,
    counters: &LinkCounters,
    datagram: &PeerDatagram,
) -> std::io::Result<()> {
    let bytes = datagram.encode();
    socket.send(&bytes).await?;
    counters.record_sent(bytes.len() as u64);
    Ok(())
}

/// The single owner of both sub-channels' state.
///
/// Control frames go through [`ReliableOutbound`] and are retransmitted
/// until acknowledged; state frames are sent once and forgotten. Both
/// directions run here so sequencing and ack bookkeeping never need a
/// lock.
async fn drive(socket: Arc<UdpSocket>, backend: LinkBackend, subchannels: SubChannels) {
    let LinkBackend {
        mut outbound,
        events,
        counters,
        mut shutdown,
    } = backend;
    let SubChannels {
        mut channels,
        mut reliable_out,
        mut reliable_in,
    } = subchannels;
    let mut rtt = RttEstimator::new();

    let open_token = unix_timestamp_ms();
    if let Err(err) = send_datagram(
        &socket,
        &counters,
        &PeerDatagram::Probe { token: open_token },
    )
    .await
    {
        let _ = events
            .send(LinkEvent::Closed {
                reason: err.to_string(),
            })
            .await;
        return;
    }

    let mut resend_timer = tokio::time::interval(PEER_PROBE_INTERVAL);
    let mut buf = [0u8; 65536];

    let reason = loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else { break None };
                let Some(frame) = channels.submit(frame) else { continue };
                if let Err(err) = send_frame(
                    &socket, &counters, &mut reliable_out, frame,
                ).await {
                    break Some(err.to_string());
                }
            }
            received = socket.recv(&mut buf) => {
                let len = match received {
                    Ok(len) => len,
                    Err(err) => break Some(err.to_string()),
                };
                counters.record_received(len as u64);

                let datagram = match PeerDatagram::decode(&buf[..len]) {
                    Ok(datagram) => datagram,
                    Err(err) => {
                        tracing::warn!(error = %err, "dropping undecodable datagram");
                        continue;
                    }
                };
                match datagram {
                    PeerDatagram::Control { seq, payload } => {
                        for delivered in reliable_in.accept(seq, payload) {
                            match ChannelFrame::decode(&delivered) {
                                Ok(frame) => {
                                    if events.send(LinkEvent::Frame(frame)).await.is_err() {
                                        return;
                                    }
                                }
                                Err(err) => {
                                    tracing::warn!(error = %err, "dropping undecodable frame");
                                }
                            }
                        }
                        let ack = PeerDatagram::ControlAck {
                            cumulative: reliable_in.cumulative_ack(),
                        };
                        if let Err(err) = send_datagram(&socket, &counters, &ack).await {
                            break Some(err.to_string());
                        }
                    }
                    PeerDatagram::ControlAck { cumulative } => {
                        if let Some(sample) =
                            reliable_out.acknowledge(cumulative, Instant::now())
                        {
                            rtt.record(sample);
                        }
                    }
                    PeerDatagram::State { payload } => match ChannelFrame::decode(&payload) {
                        Ok(frame) => {
                            if events.send(LinkEvent::Frame(frame)).await.is_err() {
                                return;
                            }
                        }
                        Err(err) => tracing::warn!(error = %err, "dropping undecodable frame"),
                    },
                    PeerDatagram::Probe { token } => {
                        let ack = PeerDatagram::ProbeAck { token };
                        let _ = send_datagram(&socket, &counters, &ack).await;
                        if !channels.is_open()
                            && let Err(err) = open_channels(
                                &socket, &counters, &mut channels, &mut reliable_out,
                            ).await
                        {
                            break Some(err.to_string());
                        }
                    }
                    PeerDatagram::ProbeAck { .. } => {
                        if !channels.is_open()
                            && let Err(err) = open_channels(
                                &socket, &counters, &mut channels, &mut reliable_out,
                            ).await
                        {
                            break Some(err.to_string());
                        }
                    }
                }
            }
            _ = resend_timer.tick() => {
                if !channels.is_open() {
                    let probe = PeerDatagram::Probe { token: open_token };
                    let _ = send_datagram(&socket, &counters, &probe).await;
                    continue;
                }
                let due = reliable_out.resend_due(Instant::now(), rtt.rto());
                if !due.is_empty() {
                    rtt.backoff();
                }
                let mut send_error = None;
                for datagram in due {
                    if let Err(err) = send_datagram(&socket, &counters, &datagram).await {
                        send_error = Some(err.to_string());
                        break;
                    }
                }
                if let Some(reason) = send_error {
                    break Some(reason);
                }
                if reliable_out.is_dead() {
                    break Some("control channel retransmission budget exhausted".to_string());
                }
            }
            _ = &mut shutdown => break None,
        }
    };

    if let Some(reason) = reason {
        let _ = events.send(LinkEvent::Closed { reason }).await;
    }
}

/// Open both sub-channels and flush the pre-open queue in order.
async fn open_channels(
    socket: &UdpSocket,
    counters: &LinkCounters,
    channels: &mut PeerChannels,
    reliable_out: &mut ReliableOutbound,
) -> std::io::Result<()> {
    for frame in channels.mark_open() {
        send_frame(socket, counters, reliable_out, frame).await?;
    }
    Ok(())
}

async fn send_frame(
    socket: &UdpSocket,
    counters: &LinkCounters,
    reliable_out: &mut ReliableOutbound,
    frame: ChannelFrame,
) -> std::io::Result<()> {
    let bytes = match frame.encode() {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, "dropping unencodable frame");
            return Ok(());
        }
    };

    if frame.is_control_traffic() {
        let datagram = reliable_out.push(bytes, Instant::now());
        send_datagram(socket, counters, &datagram).await
    } else {
        if bytes.len() > MAX_DATAGRAM_PAYLOAD {
            tracing::warn!(len = bytes.len(), "oversized state frame sent anyway");
        }
        send_datagram(socket, counters, &PeerDatagram::State { payload: bytes }).await
    }
}
