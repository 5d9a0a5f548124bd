//! Session management.
//!
//! The session manager owns the connection lifecycle: negotiate
//! transport metadata (best effort), walk the fallback order attempting
//! one transport at a time, and hand the first success to a driver task
//! that stamps outgoing frames, answers heartbeats, and surfaces
//! inbound traffic. Adapters never retry; all retry policy lives here.

mod heartbeat;
mod state;
mod stats;

pub use state::{SessionState, SessionStateHandle};
pub use stats::SessionStats;

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use crate::codec::QuantizationConfig;
use crate::core::SessionError;
use crate::core::constants::{CONNECT_ATTEMPT_TIMEOUT, EVENT_QUEUE_DEPTH, HEARTBEAT_INTERVAL};
use crate::negotiate::{Credential, NegotiationClient, NegotiationPlan, TransportKind, resolve_order};
use crate::protocol::{Channel, ChannelFrame, ChannelSequencer, Payload};
use crate::transport::{
    ConnectTarget, LinkEvent, PeerConfig, TransportAdapter, TransportLink, default_adapters,
};

use heartbeat::Heartbeat;
use stats::SharedStats;

/// Everything a connection attempt can be told.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    /// Endpoint of last resort, and the host negotiation is derived from.
    pub fallback_endpoint: String,
    /// Caller override of the transport fallback order.
    pub preferred_order: Option<Vec<TransportKind>>,
    /// Peer rendezvous configuration. Without it the peer transport is
    /// skipped.
    pub peer: Option<PeerConfig>,
    /// Wall-clock bound per transport attempt.
    pub attempt_timeout: Duration,
    /// Interval between heartbeat pings.
    pub heartbeat_interval: Duration,
    /// Quantization factors to decode with when the server declares none.
    pub quantization: QuantizationConfig,
}

impl ConnectOptions {
    /// Options with defaults for everything but the fallback endpoint.
    pub fn new(fallback_endpoint: impl Into<String>) -> Self {
        Self {
            fallback_endpoint: fallback_endpoint.into(),
            preferred_order: None,
            peer: None,
            attempt_timeout: CONNECT_ATTEMPT_TIMEOUT,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            quantization: QuantizationConfig::default(),
        }
    }

    /// Override the transport fallback order.
    pub fn preferred_order(mut self, order: Vec<TransportKind>) -> Self {
        self.preferred_order = Some(order);
        self
    }

    /// Supply peer rendezvous configuration.
    pub fn peer(mut self, peer: PeerConfig) -> Self {
        self.peer = Some(peer);
        self
    }

    /// Override the per-attempt timeout.
    pub fn attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = timeout;
        self
    }

    /// Override the heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Override the default quantization factors.
    pub fn quantization(mut self, config: QuantizationConfig) -> Self {
        self.quantization = config;
        self
    }
}

/// What a session surfaces to its consumer.
#[derive(Debug)]
pub enum SessionEvent {
    /// An application frame arrived. Heartbeat traffic is absorbed before
    /// this point.
    Frame(ChannelFrame),
    /// The connection dropped. The session is finished.
    Disconnected {
        /// Human-readable cause, for logging only.
        reason: String,
    },
}

enum Command {
    Send {
        channel: Channel,
        payload: Payload,
        reply: oneshot::Sender<Result<(), SessionError>>,
    },
    Disconnect,
}

/// Walks the transport fallback order and produces sessions.
pub struct SessionManager {
    adapters: Vec<Box<dyn TransportAdapter>>,
    negotiator: NegotiationClient,
}

impl SessionManager {
    /// A manager offering every transport this build supports.
    pub fn new() -> Self {
        Self::with_adapters(default_adapters())
    }

    /// A manager restricted to the given adapters.
    pub fn with_adapters(adapters: Vec<Box<dyn TransportAdapter>>) -> Self {
        Self {
            adapters,
            negotiator: NegotiationClient::new(),
        }
    }

    /// Negotiate, then connect over the first transport that succeeds.
    pub async fn connect(&self, options: ConnectOptions) -> Result<Session, SessionError> {
        let state = SessionStateHandle::new();
        state.set(SessionState::Negotiating);

        let plan = self
            .negotiator
            .negotiate(
                options.preferred_order.as_deref(),
                &options.fallback_endpoint,
            )
            .await;
        if plan.is_none() {
            tracing::debug!("negotiation unavailable, using defaults");
        }

        self.connect_inner(options, plan, state).await
    }

    /// Connect with an already-obtained (or absent) negotiation plan,
    /// skipping the negotiation request.
    pub async fn connect_with_plan(
        &self,
        options: ConnectOptions,
        plan: Option<NegotiationPlan>,
    ) -> Result<Session, SessionError> {
        self.connect_inner(options, plan, SessionStateHandle::new())
            .await
    }

    async fn connect_inner(
        &self,
        options: ConnectOptions,
        plan: Option<NegotiationPlan>,
        state: SessionStateHandle,
    ) -> Result<Session, SessionError> {
        let order = resolve_order(options.preferred_order.as_deref(), plan.as_ref());
        let mut attempts = 0usize;

        for kind in order {
            if let Some(plan) = &plan
                && !plan.is_available(kind)
            {
                tracing::debug!(transport = %kind, "skipping unavailable transport");
                continue;
            }
            let Some(adapter) = self.adapters.iter().find(|a| a.kind() == kind) else {
                tracing::debug!(transport = %kind, "no adapter registered");
                continue;
            };

            state.set(SessionState::Connecting(kind));
            attempts += 1;

            let target = ConnectTarget {
                endpoint: plan
                    .as_ref()
                    .and_then(|p| p.endpoint_for(kind))
                    .map(str::to_string),
                fallback_endpoint: options.fallback_endpoint.clone(),
                peer: options.peer.clone(),
                timeout: options.attempt_timeout,
            };

            match adapter.connect(target).await {
                Ok(link) => {
                    tracing::info!(transport = %kind, "session connected");
                    state.set(SessionState::Connected(kind));
                    let quantization = plan
                        .as_ref()
                        .and_then(|p| p.quantization)
                        .unwrap_or(options.quantization);
                    let credential = plan.and_then(|p| p.auth);
                    return Ok(Session::spawn(
                        link,
                        state,
                        credential,
                        quantization,
                        options.heartbeat_interval,
                    ));
                }
                Err(err) => {
                    tracing::warn!(transport = %kind, error = %err, "transport attempt failed");
                }
            }
        }

        state.set(SessionState::Failed);
        Err(SessionError::NoTransportSucceeded { attempts })
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// One established connection, from the consumer's point of view.
///
/// Dropping the session tears down the driver task and, through it, the
/// transport link.
pub struct Session {
    kind: TransportKind,
    cmd_tx: mpsc::Sender<Command>,
    events: mpsc::Receiver<SessionEvent>,
    stats: Arc<SharedStats>,
    state: SessionStateHandle,
    credential: Option<Credential>,
    quantization: QuantizationConfig,
    driver: JoinHandle<()>,
}

impl Session {
    fn spawn(
        link: TransportLink,
        state: SessionStateHandle,
        credential: Option<Credential>,
        quantization: QuantizationConfig,
        heartbeat_interval: Duration,
    ) -> Self {
        let kind = link.kind();
        let stats = Arc::new(SharedStats::new(link.counters()));
        let (cmd_tx, cmd_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);

        let driver = tokio::spawn(drive(
            link,
            cmd_rx,
            event_tx,
            stats.clone(),
            state.clone(),
            heartbeat_interval,
        ));

        Self {
            kind,
            cmd_tx,
            events: event_rx,
            stats,
            state,
            credential,
            quantization,
            driver,
        }
    }

    /// Which transport carries this session.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Send a payload on the reliable control channel.
    pub async fn send_control(&self, payload: Payload) -> Result<(), SessionError> {
        self.send(Channel::Control, payload).await
    }

    /// Send a payload on the best-effort state channel.
    pub async fn send_state(&self, payload: Payload) -> Result<(), SessionError> {
        self.send(Channel::State, payload).await
    }

    async fn send(&self, channel: Channel, payload: Payload) -> Result<(), SessionError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.cmd_tx
            .send(Command::Send {
                channel,
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SessionError::Disconnected)?;
        reply_rx.await.map_err(|_| SessionError::Disconnected)?
    }

    /// Wait for the next session event. `None` after the disconnect
    /// event has been delivered.
    pub async fn recv(&mut self) -> Option<SessionEvent> {
        self.events.recv().await
    }

    /// Point-in-time statistics.
    pub fn stats(&self) -> SessionStats {
        self.stats.snapshot()
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state.current()
    }

    /// Observe lifecycle transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// Credential issued during negotiation, if any.
    pub fn credential(&self) -> Option<&Credential> {
        self.credential.as_ref()
    }

    /// Quantization factors in effect for this session.
    pub fn quantization(&self) -> QuantizationConfig {
        self.quantization
    }

    /// Close the connection intentionally. Does not count as a
    /// reconnect in the statistics.
    pub async fn disconnect(mut self) {
        let _ = self.cmd_tx.send(Command::Disconnect).await;
        let _ = (&mut self.driver).await;
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// The driver task: sole owner of the link, the sequencers, and the
/// heartbeat. Everything that must happen in order happens here.
async fn drive(
    mut link: TransportLink,
    mut cmd_rx: mpsc::Receiver<Command>,
    event_tx: mpsc::Sender<SessionEvent>,
    stats: Arc<SharedStats>,
    state: SessionStateHandle,
    heartbeat_interval: Duration,
) {
    let mut sequencer = ChannelSequencer::default();
    let mut heartbeat = Heartbeat::default();
    // First tick one full interval out, so consumer sends are never
    // preempted by an immediate ping.
    let mut ticker = tokio::time::interval_at(
        tokio::time::Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let nonce = heartbeat.ping(Instant::now());
                let frame = sequencer.frame(Channel::Control, Payload::Ping { nonce });
                if link.send(frame).await.is_err() {
                    finish(&event_tx, &stats, &state, "send failed".to_string()).await;
                    return;
                }
            }
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(Command::Send { channel, payload, reply }) => {
                        let frame = sequencer.frame(channel, payload);
                        let result = link
                            .send(frame)
                            .await
                            .map_err(|_| SessionError::Disconnected);
                        let _ = reply.send(result);
                    }
                    Some(Command::Disconnect) | None => {
                        stats.on_close();
                        state.set(SessionState::Disconnected);
                        link.close();
                        return;
                    }
                }
            }
            event = link.next_event() => {
                match event {
                    Some(LinkEvent::Frame(frame)) => match frame.message {
                        Payload::Pong { nonce } => {
                            if heartbeat.on_pong(nonce, Instant::now()).is_some()
                                && let Some(latency) = heartbeat.latency()
                            {
                                stats.set_latency(latency);
                            }
                        }
                        Payload::Ping { nonce } => {
                            let pong = sequencer.frame(Channel::Control, Payload::Pong { nonce });
                            if link.send(pong).await.is_err() {
                                finish(&event_tx, &stats, &state, "send failed".to_string()).await;
                                return;
                            }
                        }
                        _ => {
                            if event_tx.send(SessionEvent::Frame(frame)).await.is_err() {
                                // Session handle gone; nothing left to do.
                                return;
                            }
                        }
                    },
                    Some(LinkEvent::Closed { reason }) => {
                        finish(&event_tx, &stats, &state, reason).await;
                        return;
                    }
                    None => {
                        finish(&event_tx, &stats, &state, "transport tasks gone".to_string()).await;
                        return;
                    }
                }
            }
        }
    }
}

async fn finish(
    event_tx: &mpsc::Sender<SessionEvent>,
    stats: &SharedStats,
    state: &SessionStateHandle,
    reason: String,
) {
    tracing::info!(%reason, "session disconnected");
    stats.on_disconnect();
    state.set(SessionState::Disconnected);
    let _ = event_tx.send(SessionEvent::Disconnected { reason }).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TransportError;
    use crate::negotiate::TransportEntry;
    use crate::protocol::FrameKind;
    use crate::transport::LinkBackend;
    use futures::future::BoxFuture;
    use std::sync::Mutex;

    /// Scripted adapter: logs attempts, succeeds or fails on demand,
    /// and parks successful backends where tests can drive them.
    struct MockAdapter {
        kind: TransportKind,
        succeed: bool,
        log: Arc<Mutex<Vec<TransportKind>>>,
        backends: Arc<Mutex<Vec<LinkBackend>>>,
    }

    impl MockAdapter {
        fn boxed(
            kind: TransportKind,
            succeed: bool,
            log: &Arc<Mutex<Vec<TransportKind>>>,
            backends: &Arc<Mutex<Vec<LinkBackend>>>,
        ) -> Box<dyn TransportAdapter> {
            Box::new(Self {
                kind,
                succeed,
                log: log.clone(),
                backends: backends.clone(),
            })
        }
    }

    impl TransportAdapter for MockAdapter {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn connect<'a>(
            &'a self,
            _target: ConnectTarget,
        ) -> BoxFuture<'a, Result<TransportLink, TransportError>> {
            Box::pin(async move {
                self.log.lock().unwrap().push(self.kind);
                if self.succeed {
                    let (link, backend) = TransportLink::pair(self.kind);
                    self.backends.lock().unwrap().push(backend);
                    Ok(link)
                } else {
                    Err(TransportError::ConnectFailed("scripted failure".into()))
                }
            })
        }
    }

    fn harness() -> (
        Arc<Mutex<Vec<TransportKind>>>,
        Arc<Mutex<Vec<LinkBackend>>>,
    ) {
        (Arc::default(), Arc::default())
    }

    fn options() -> ConnectOptions {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
        // Long heartbeat so pings never interleave with test traffic.
        ConnectOptions::new("game.example:7777").heartbeat_interval(Duration::from_secs(600))
    }

    #[tokio::test]
    async fn test_fallback_walks_order_until_success() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![
            MockAdapter::boxed(TransportKind::StreamMultiplexed, false, &log, &backends),
            MockAdapter::boxed(TransportKind::PeerToPeer, false, &log, &backends),
            MockAdapter::boxed(TransportKind::Socket, true, &log, &backends),
        ]);

        let session = manager.connect_with_plan(options(), None).await.unwrap();

        assert_eq!(session.kind(), TransportKind::Socket);
        assert_eq!(
            *log.lock().unwrap(),
            vec![
                TransportKind::StreamMultiplexed,
                TransportKind::PeerToPeer,
                TransportKind::Socket,
            ]
        );
        assert_eq!(
            session.state(),
            SessionState::Connected(TransportKind::Socket)
        );
    }

    #[tokio::test]
    async fn test_unavailable_transport_is_never_attempted() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![
            MockAdapter::boxed(TransportKind::StreamMultiplexed, true, &log, &backends),
            MockAdapter::boxed(TransportKind::Socket, true, &log, &backends),
        ]);

        let plan = NegotiationPlan {
            transports: vec![TransportEntry {
                kind: TransportKind::StreamMultiplexed,
                available: false,
                endpoint: None,
            }],
            ..Default::default()
        };

        let session = manager
            .connect_with_plan(options(), Some(plan))
            .await
            .unwrap();

        assert_eq!(session.kind(), TransportKind::Socket);
        assert_eq!(*log.lock().unwrap(), vec![TransportKind::Socket]);
    }

    #[tokio::test]
    async fn test_exhausted_order_fails_with_attempt_count() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![
            MockAdapter::boxed(TransportKind::StreamMultiplexed, false, &log, &backends),
            MockAdapter::boxed(TransportKind::PeerToPeer, false, &log, &backends),
            MockAdapter::boxed(TransportKind::Socket, false, &log, &backends),
        ]);

        let result = manager.connect_with_plan(options(), None).await;

        assert!(matches!(
            result,
            Err(SessionError::NoTransportSucceeded { attempts: 3 })
        ));
    }

    #[tokio::test]
    async fn test_negotiated_credential_rides_on_the_session() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let plan = NegotiationPlan {
            auth: Some(Credential {
                access_token: "tok-456".to_string(),
                expires_in: 300,
            }),
            ..Default::default()
        };

        let session = manager
            .connect_with_plan(options(), Some(plan))
            .await
            .unwrap();

        assert_eq!(session.credential().unwrap().access_token, "tok-456");
    }

    #[tokio::test]
    async fn test_control_sequences_count_from_one() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let session = manager.connect_with_plan(options(), None).await.unwrap();

        for tick in 0..3 {
            session
                .send_control(Payload::Input {
                    tick,
                    data: serde_json::json!({ "move": [1, 0] }),
                })
                .await
                .unwrap();
        }

        let mut backend = backends.lock().unwrap().pop().unwrap();
        for expected in 1..=3u64 {
            let frame = backend.outbound.recv().await.unwrap();
            assert_eq!(frame.channel, Channel::Control);
            assert_eq!(frame.sequence, expected);
        }
    }

    #[tokio::test]
    async fn test_unexpected_drop_counts_as_reconnect() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let mut session = manager.connect_with_plan(options(), None).await.unwrap();

        let backend = backends.lock().unwrap().pop().unwrap();
        backend
            .events
            .send(LinkEvent::Closed {
                reason: "remote hung up".to_string(),
            })
            .await
            .unwrap();

        match session.recv().await.unwrap() {
            SessionEvent::Disconnected { reason } => assert_eq!(reason, "remote hung up"),
            other => panic!("expected disconnect, got {other:?}"),
        }

        let stats = session.stats();
        assert_eq!(stats.reconnect_count, 1);
        assert!(!stats.connected);
        assert_eq!(session.state(), SessionState::Disconnected);
    }

    #[tokio::test]
    async fn test_intentional_disconnect_is_not_a_reconnect() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let session = manager.connect_with_plan(options(), None).await.unwrap();
        let stats_probe = session.stats.clone();
        session.disconnect().await;

        assert_eq!(stats_probe.snapshot().reconnect_count, 0);
        assert!(!stats_probe.snapshot().connected);
    }

    #[tokio::test]
    async fn test_heartbeat_pings_and_measures_latency() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let opts =
            ConnectOptions::new("game.example:7777").heartbeat_interval(Duration::from_millis(20));
        let session = manager.connect_with_plan(opts, None).await.unwrap();

        let mut backend = backends.lock().unwrap().pop().unwrap();
        let ping = backend.outbound.recv().await.unwrap();
        assert_eq!(ping.kind, FrameKind::Ping);
        let Payload::Ping { nonce } = ping.message else {
            panic!("expected ping payload");
        };

        let pong = ChannelFrame::new(Channel::Control, 1, 0, Payload::Pong { nonce });
        backend.events.send(LinkEvent::Frame(pong)).await.unwrap();

        // The driver absorbs the pong; latency shows up in the stats.
        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                if session.stats().latency.is_some() {
                    break;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn test_inbound_ping_answered_with_pong() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        let _session = manager.connect_with_plan(options(), None).await.unwrap();

        let mut backend = backends.lock().unwrap().pop().unwrap();
        let ping = ChannelFrame::new(Channel::Control, 1, 0, Payload::Ping { nonce: 77 });
        backend.events.send(LinkEvent::Frame(ping)).await.unwrap();

        let reply = backend.outbound.recv().await.unwrap();
        assert_eq!(reply.message, Payload::Pong { nonce: 77 });
    }

    #[tokio::test]
    async fn test_failed_negotiation_still_connects() {
        let (log, backends) = harness();
        let manager = SessionManager::with_adapters(vec![MockAdapter::boxed(
            TransportKind::Socket,
            true,
            &log,
            &backends,
        )]);

        // Nothing listens on this port, so negotiation yields nothing and
        // the fallback order still runs.
        let opts = ConnectOptions::new("127.0.0.1:9").heartbeat_interval(Duration::from_secs(600));
        let session = manager.connect(opts).await.unwrap();
        assert_eq!(session.kind(), TransportKind::Socket);
    }
}
