//! Transport negotiation.
//!
//! Before connecting, the client asks the server which transports it
//! should try, in what order, and with what ephemeral credential. The
//! request is strictly best-effort: any failure yields no plan and the
//! caller proceeds with the built-in default order.

mod client;
mod plan;

pub use client::{NegotiationClient, negotiate_url};
pub use plan::{
    Credential, DEFAULT_TRANSPORT_ORDER, NegotiationPlan, TransportEntry, TransportKind,
    resolve_order,
};
