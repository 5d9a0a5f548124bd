//! The negotiation plan data model.

use serde::{Deserialize, Serialize};

use crate::codec::QuantizationConfig;

/// The connection-establishment technologies this client knows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransportKind {
    /// Multiplexed streams plus datagrams over one QUIC connection.
    #[serde(rename = "stream-multiplexed")]
    StreamMultiplexed,
    /// Direct peer link with HTTP signaling and relay candidates.
    #[serde(rename = "peer-to-peer")]
    PeerToPeer,
    /// Plain framed socket. The lowest common denominator.
    #[serde(rename = "socket")]
    Socket,
}

impl TransportKind {
    /// Wire name of this kind.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::StreamMultiplexed => "stream-multiplexed",
            Self::PeerToPeer => "peer-to-peer",
            Self::Socket => "socket",
        }
    }

    /// Parse a wire name. Unknown names yield `None` so newer servers can
    /// advertise kinds this client version does not know.
    pub fn from_wire(name: &str) -> Option<Self> {
        match name {
            "stream-multiplexed" => Some(Self::StreamMultiplexed),
            "peer-to-peer" => Some(Self::PeerToPeer),
            "socket" => Some(Self::Socket),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Built-in fallback order when neither caller nor server supplies one.
pub const DEFAULT_TRANSPORT_ORDER: [TransportKind; 3] = [
    TransportKind::StreamMultiplexed,
    TransportKind::PeerToPeer,
    TransportKind::Socket,
];

/// Server-declared availability and endpoint for one transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportEntry {
    /// Which transport this entry describes.
    pub kind: TransportKind,
    /// Server-declared availability. A transport can be client-capable
    /// yet administratively disabled.
    pub available: bool,
    /// Endpoint override, absolute or relative to the negotiated host.
    pub endpoint: Option<String>,
}

/// Ephemeral bearer credential attached to the established session.
///
/// This layer carries the token opaquely and never validates it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    /// Opaque bearer token.
    pub access_token: String,
    /// Seconds until the token expires.
    pub expires_in: u64,
}

/// The server's answer to a negotiation request.
///
/// Created fresh per connection attempt and never cached across attempts.
#[derive(Debug, Clone, Default)]
pub struct NegotiationPlan {
    /// Preferred transport order. Empty means "use the default".
    pub order: Vec<TransportKind>,
    /// Per-transport availability and endpoints.
    pub transports: Vec<TransportEntry>,
    /// Ephemeral credential, if the server issued one.
    pub auth: Option<Credential>,
    /// Quantization factor set declared by the server encoder.
    pub quantization: Option<QuantizationConfig>,
}

impl NegotiationPlan {
    /// Whether a transport may be attempted.
    ///
    /// Only an entry that explicitly says `available: false` blocks the
    /// attempt; an absent entry leaves the transport eligible.
    pub fn is_available(&self, kind: TransportKind) -> bool {
        self.transports
            .iter()
            .find(|t| t.kind == kind)
            .map(|t| t.available)
            .unwrap_or(true)
    }

    /// Server-provided endpoint for a transport, if any.
    pub fn endpoint_for(&self, kind: TransportKind) -> Option<&str> {
        self.transports
            .iter()
            .find(|t| t.kind == kind)
            .and_then(|t| t.endpoint.as_deref())
    }
}

/// Resolve the candidate order: explicit caller override, then the
/// server-provided order, then the built-in default.
pub fn resolve_order(
    preferred: Option<&[TransportKind]>,
    plan: Option<&NegotiationPlan>,
) -> Vec<TransportKind> {
    if let Some(order) = preferred
        && !order.is_empty()
    {
        return order.to_vec();
    }
    if let Some(plan) = plan
        && !plan.order.is_empty()
    {
        return plan.order.clone();
    }
    DEFAULT_TRANSPORT_ORDER.to_vec()
}

// Raw response shapes. Kinds arrive as strings so unknown values can be
// dropped instead of failing the whole body.

#[derive(Debug, Deserialize)]
pub(crate) struct RawNegotiateResponse {
    #[serde(default)]
    pub order: Option<Vec<String>>,
    #[serde(default)]
    pub transports: Option<Vec<RawTransportEntry>>,
    #[serde(default)]
    pub auth: Option<Credential>,
    #[serde(default)]
    pub quantization: Option<QuantizationConfig>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct RawTransportEntry {
    pub kind: String,
    #[serde(default = "default_true")]
    pub available: bool,
    #[serde(default)]
    pub endpoint: Option<String>,
}

fn default_true() -> bool {
    true
}

impl RawNegotiateResponse {
    pub(crate) fn into_plan(self) -> NegotiationPlan {
        let order = self
            .order
            .unwrap_or_default()
            .iter()
            .filter_map(|name| {
                let kind = TransportKind::from_wire(name);
                if kind.is_none() {
                    tracing::debug!(kind = %name, "ignoring unknown transport kind in order");
                }
                kind
            })
            .collect();

        let transports = self
            .transports
            .unwrap_or_default()
            .into_iter()
            .filter_map(|raw| {
                let Some(kind) = TransportKind::from_wire(&raw.kind) else {
                    tracing::debug!(kind = %raw.kind, "ignoring unknown transport kind");
                    return None;
                };
                Some(TransportEntry {
                    kind,
                    available: raw.available,
                    endpoint: raw.endpoint,
                })
            })
            .collect();

        NegotiationPlan {
            order,
            transports,
            auth: self.auth,
            quantization: self.quantization,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(TransportKind::StreamMultiplexed.as_str(), "stream-multiplexed");
        assert_eq!(
            TransportKind::from_wire("peer-to-peer"),
            Some(TransportKind::PeerToPeer)
        );
        assert_eq!(TransportKind::from_wire("carrier-pigeon"), None);
    }

    #[test]
    fn test_unknown_kinds_dropped_silently() {
        let raw: RawNegotiateResponse = serde_json::from_str(
            r#"{
                "order": ["quantum-tunnel", "socket", "peer-to-peer"],
                "transports": [
                    { "kind": "socket", "available": true },
                    { "kind": "quantum-tunnel", "available": true }
                ]
            }"#,
        )
        .unwrap();

        let plan = raw.into_plan();
        assert_eq!(
            plan.order,
            vec![TransportKind::Socket, TransportKind::PeerToPeer]
        );
        assert_eq!(plan.transports.len(), 1);
    }

    #[test]
    fn test_availability_defaults_to_eligible() {
        let plan = NegotiationPlan {
            transports: vec![TransportEntry {
                kind: TransportKind::Socket,
                available: false,
                endpoint: None,
            }],
            ..Default::default()
        };

        assert!(!plan.is_available(TransportKind::Socket));
        // No entry for these two, so they stay eligible.
        assert!(plan.is_available(TransportKind::PeerToPeer));
        assert!(plan.is_available(TransportKind::StreamMultiplexed));
    }

    #[test]
    fn test_order_resolution_precedence() {
        let plan = NegotiationPlan {
            order: vec![TransportKind::Socket, TransportKind::PeerToPeer],
            ..Default::default()
        };
        let override_order = [TransportKind::PeerToPeer];

        // Caller override wins.
        assert_eq!(
            resolve_order(Some(&override_order), Some(&plan)),
            vec![TransportKind::PeerToPeer]
        );
        // Then the server order.
        assert_eq!(
            resolve_order(None, Some(&plan)),
            vec![TransportKind::Socket, TransportKind::PeerToPeer]
        );
        // Then the built-in default.
        assert_eq!(
            resolve_order(None, None),
            DEFAULT_TRANSPORT_ORDER.to_vec()
        );
    }

    #[test]
    fn test_auth_and_quantization_parse() {
        let raw: RawNegotiateResponse = serde_json::from_str(
            r#"{
                "auth": { "access_token": "tok-123", "expires_in": 300 },
                "quantization": {
                    "position_factor": 0.01,
                    "rotation_factor": 0.0001,
                    "scale_factor": 0.001,
                    "velocity_factor": 0.01
                }
            }"#,
        )
        .unwrap();

        let plan = raw.into_plan();
        assert_eq!(plan.auth.unwrap().access_token, "tok-123");
        assert_eq!(plan.quantization.unwrap().position_factor, 0.01);
    }
}
