//! Core error types and protocol constants.

pub mod constants;
pub mod error;

pub use error::{FrameError, PlaylinkError, SessionError, SignalingError, TransportError};
