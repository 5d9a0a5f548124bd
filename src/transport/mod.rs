//! Transport adapters.
//!
//! Three interchangeable implementations of one capability contract:
//!
//! - [`StreamAdapter`]: multiplexed streams + datagrams over QUIC
//!   (WebTransport, `webtransport` feature)
//! - [`PeerAdapter`]: direct peer link over UDP with HTTP signaling and
//!   an in-protocol reliable control sub-channel
//! - [`SocketAdapter`]: length-framed TCP, the lowest common denominator
//!
//! An adapter does exactly one connection attempt and never retries;
//! retry and fallback belong solely to the session manager. On success
//! it hands back a [`TransportLink`], the uniform queue-based handle the
//! session drives.

use std::time::Duration;

use futures::future::BoxFuture;

use crate::core::TransportError;
use crate::core::constants::CONNECT_ATTEMPT_TIMEOUT;
use crate::negotiate::TransportKind;

mod link;
pub mod peer;
mod socket;
#[cfg(feature = "webtransport")]
mod stream;
mod timing;

pub use link::{LinkBackend, LinkCounters, LinkEvent, TransportLink};
pub use peer::{PeerAdapter, PeerConfig};
pub use socket::SocketAdapter;
#[cfg(feature = "webtransport")]
pub use stream::StreamAdapter;
pub use timing::RttEstimator;

/// Everything an adapter may need for one connection attempt.
#[derive(Debug, Clone)]
pub struct ConnectTarget {
    /// Server-provided endpoint from the negotiation plan, possibly
    /// relative to the fallback endpoint's host.
    pub endpoint: Option<String>,
    /// Caller-supplied fallback endpoint; also the base host relative
    /// endpoints resolve against.
    pub fallback_endpoint: String,
    /// Peer adapter configuration, when the caller can supply one.
    pub peer: Option<PeerConfig>,
    /// Wall-clock bound on this attempt.
    pub timeout: Duration,
}

impl ConnectTarget {
    /// A target with no negotiated endpoint and the default timeout.
    pub fn to_fallback(fallback_endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: None,
            fallback_endpoint: fallback_endpoint.into(),
            peer: None,
            timeout: CONNECT_ATTEMPT_TIMEOUT,
        }
    }
}

/// One connection-establishment technology.
///
/// The session manager depends only on this contract, never on a
/// concrete adapter.
pub trait TransportAdapter: Send + Sync {
    /// Which transport this adapter implements.
    fn kind(&self) -> TransportKind;

    /// Attempt one connection. Success and failure are signaled by the
    /// underlying protocol's own open/error events; the returned future
    /// resolves accordingly.
    fn connect<'a>(
        &'a self,
        target: ConnectTarget,
    ) -> BoxFuture<'a, Result<TransportLink, TransportError>>;
}

/// The adapters this build can offer, in no particular order.
pub fn default_adapters() -> Vec<Box<dyn TransportAdapter>> {
    let mut adapters: Vec<Box<dyn TransportAdapter>> = Vec::new();
    #[cfg(feature = "webtransport")]
    adapters.push(Box::new(StreamAdapter::new()));
    adapters.push(Box::new(PeerAdapter::new()));
    adapters.push(Box::new(SocketAdapter::new()));
    adapters
}
