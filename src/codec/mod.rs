//! Quantization codec.
//!
//! High-frequency numeric fields (position, rotation, scale, velocity)
//! travel the wire as fixed-point integers scaled by a per-connection
//! factor set instead of floating point. This module holds the pure
//! scaling functions plus the typed decoding of quantized snapshot and
//! delta payloads into engine-ready entity state.
//!
//! The factor set is fixed for a connection's lifetime. The server may
//! declare it in the negotiation response and echo it inside quantized
//! payloads; see [`entity`] for how mismatches are handled.

mod entity;
mod quant;

pub use entity::{
    DecodedDelta, DecodedSnapshot, EntityState, QuantizedDelta, QuantizedEntity,
    QuantizedSnapshot, decode_quantized_delta, decode_quantized_snapshot,
};
pub use quant::{
    QuantizationConfig, dequantize_position, dequantize_rotation, dequantize_scale,
    dequantize_velocity, quantize_position, quantize_rotation, quantize_scale,
    quantize_velocity,
};
