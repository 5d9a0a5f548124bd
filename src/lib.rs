//! # PLAYLINK
//!
//! **P**layer **L**ink — the network transport layer for a real-time
//! multiplayer game client. It provides:
//!
//! - **Negotiation**: Best-effort transport metadata from the server,
//!   with defaults when it is unreachable
//! - **Fallback**: An ordered walk over transports until one connects
//! - **Channels**: A reliable, ordered control channel and a best-effort
//!   state channel over every transport
//! - **Compactness**: Fixed-point quantized snapshot and delta decoding
//!
//! ## Feature Flags
//!
//! - `webtransport` (default): The stream-multiplexed transport over QUIC
//!
//! ## Modules
//!
//! - [`core`]: Constants and error types
//! - [`protocol`]: The channel frame envelope and sequencing
//! - [`codec`]: Quantized entity state decoding
//! - [`negotiate`]: The negotiation client and plan model
//! - [`transport`]: The transport adapters and link handle
//! - [`session`]: The session manager, driver, and statistics
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use playlink::prelude::*;
//! use serde_json::json;
//!
//! # async fn run() -> Result<(), PlaylinkError> {
//! let manager = SessionManager::new();
//! let mut session = manager
//!     .connect(ConnectOptions::new("wss://game.example.com:7777/play"))
//!     .await?;
//!
//! session
//!     .send_control(Payload::Input {
//!         tick: 42,
//!         data: json!({ "move": [1, 0] }),
//!     })
//!     .await?;
//!
//! while let Some(event) = session.recv().await {
//!     match event {
//!         SessionEvent::Frame(frame) => println!("got {:?}", frame.kind),
//!         SessionEvent::Disconnected { reason } => {
//!             println!("dropped: {reason}");
//!             break;
//!         }
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod codec;
pub mod core;
pub mod negotiate;
pub mod protocol;
pub mod session;
pub mod transport;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::codec::{
        DecodedDelta, DecodedSnapshot, QuantizationConfig, decode_quantized_delta,
        decode_quantized_snapshot,
    };
    pub use crate::core::{PlaylinkError, SessionError, TransportError};
    pub use crate::negotiate::{NegotiationClient, NegotiationPlan, TransportKind};
    pub use crate::protocol::{Channel, ChannelFrame, EventName, FrameKind, Payload};
    pub use crate::session::{
        ConnectOptions, Session, SessionEvent, SessionManager, SessionState, SessionStats,
    };
    pub use crate::transport::{PeerConfig, TransportAdapter, TransportLink};
}

// Re-export commonly used items at crate root
pub use codec::QuantizationConfig;
pub use core::PlaylinkError;
pub use negotiate::{NegotiationClient, NegotiationPlan, TransportKind};
pub use protocol::{Channel, ChannelFrame, Payload};
pub use session::{ConnectOptions, Session, SessionEvent, SessionManager, SessionState};
