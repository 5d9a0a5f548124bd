//! Quantized snapshot and delta decoding.
//!
//! A snapshot is the full encoding of all tracked entity state at a tick;
//! a delta carries only the entities changed since the previous tick.
//! Both arrive on the state channel as event payloads and decode into
//! floating-point [`EntityState`] values.

use serde::{Deserialize, Serialize};

use crate::core::FrameError;

use super::quant::{
    QuantizationConfig, dequantize_position, dequantize_rotation, dequantize_scale,
    dequantize_velocity,
};

/// One entity's fields as fixed-point wire integers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuantizedEntity {
    /// Entity identifier, stable across ticks.
    pub id: u64,
    /// Quantized position.
    pub position: [i32; 3],
    /// Quantized rotation quaternion.
    pub rotation: [i32; 4],
    /// Quantized scale, absent when unchanged from unit scale.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<[i32; 3]>,
    /// Quantized velocity, absent when at rest.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub velocity: Option<[i32; 3]>,
}

/// Wire payload of a `quantized_snapshot` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedSnapshot {
    /// Simulation tick this snapshot describes.
    pub tick: u64,
    /// All tracked entities at this tick.
    pub entities: Vec<QuantizedEntity>,
    /// Optional factor echo from the encoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factors: Option<QuantizationConfig>,
}

/// Wire payload of a `quantized_delta` event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuantizedDelta {
    /// Simulation tick this delta advances to.
    pub tick: u64,
    /// Entities changed since the previous tick.
    pub changed: Vec<QuantizedEntity>,
    /// Entities removed since the previous tick.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub removed: Vec<u64>,
    /// Optional factor echo from the encoder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub factors: Option<QuantizationConfig>,
}

/// One entity's fields in engine units.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityState {
    /// Entity identifier.
    pub id: u64,
    /// Position in world units.
    pub position: [f32; 3],
    /// Rotation quaternion.
    pub rotation: [f32; 4],
    /// Scale, `[1, 1, 1]` when the wire omitted it.
    pub scale: [f32; 3],
    /// Velocity in world units per second, zero when omitted.
    pub velocity: [f32; 3],
}

/// A decoded snapshot.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSnapshot {
    /// Simulation tick.
    pub tick: u64,
    /// All tracked entities.
    pub entities: Vec<EntityState>,
}

/// A decoded delta.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedDelta {
    /// Simulation tick.
    pub tick: u64,
    /// Changed entities.
    pub changed: Vec<EntityState>,
    /// Removed entity ids.
    pub removed: Vec<u64>,
}

/// Pick the factor set to decode with.
///
/// The encoder's echo wins over the session's configured set: decoding
/// with the wrong factors silently corrupts every value, so a mismatch is
/// logged and the echo is trusted.
fn effective_factors<'a>(
    echo: Option<&'a QuantizationConfig>,
    session: &'a QuantizationConfig,
) -> &'a QuantizationConfig {
    match echo {
        Some(echoed) if !echoed.agrees_with(session) => {
            tracing::warn!(
                ?echoed,
                configured = ?session,
                "quantization factor mismatch, trusting encoder echo"
            );
            echoed
        }
        Some(echoed) => echoed,
        None => session,
    }
}

fn decode_entity(wire: &QuantizedEntity, config: &QuantizationConfig) -> EntityState {
    EntityState {
        id: wire.id,
        position: dequantize_position(wire.position, config),
        rotation: dequantize_rotation(wire.rotation, config),
        scale: wire
            .scale
            .map(|s| dequantize_scale(s, config))
            .unwrap_or([1.0, 1.0, 1.0]),
        velocity: wire
            .velocity
            .map(|v| dequantize_velocity(v, config))
            .unwrap_or([0.0, 0.0, 0.0]),
    }
}

/// Decode a `quantized_snapshot` event payload.
pub fn decode_quantized_snapshot(
    payload: &serde_json::Value,
    config: &QuantizationConfig,
) -> Result<DecodedSnapshot, FrameError> {
    let wire: QuantizedSnapshot = serde_json::from_value(payload.clone())?;
    let factors = *effective_factors(wire.factors.as_ref(), config);

    Ok(DecodedSnapshot {
        tick: wire.tick,
        entities: wire
            .entities
            .iter()
            .map(|e| decode_entity(e, &factors))
            .collect(),
    })
}

/// Decode a `quantized_delta` event payload.
pub fn decode_quantized_delta(
    payload: &serde_json::Value,
    config: &QuantizationConfig,
) -> Result<DecodedDelta, FrameError> {
    let wire: QuantizedDelta = serde_json::from_value(payload.clone())?;
    let factors = *effective_factors(wire.factors.as_ref(), config);

    Ok(DecodedDelta {
        tick: wire.tick,
        changed: wire
            .changed
            .iter()
            .map(|e| decode_entity(e, &factors))
            .collect(),
        removed: wire.removed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_decode_snapshot() {
        let config = QuantizationConfig {
            position_factor: 0.01,
            rotation_factor: 0.0001,
            ..Default::default()
        };

        let payload = json!({
            "tick": 42,
            "entities": [
                { "id": 1, "position": [100, 200, 300], "rotation": [10000, 0, 0, 0] }
            ]
        });

        let decoded = decode_quantized_snapshot(&payload, &config).unwrap();
        assert_eq!(decoded.tick, 42);
        assert_eq!(decoded.entities.len(), 1);

        let e = &decoded.entities[0];
        assert_eq!(e.position, [1.0, 2.0, 3.0]);
        assert_eq!(e.rotation, [1.0, 0.0, 0.0, 0.0]);
        assert_eq!(e.scale, [1.0, 1.0, 1.0]);
        assert_eq!(e.velocity, [0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_decode_delta_with_removals() {
        let config = QuantizationConfig::default();

        let payload = json!({
            "tick": 43,
            "changed": [
                {
                    "id": 2,
                    "position": [0, 0, 0],
                    "rotation": [0, 0, 0, 10000],
                    "velocity": [100, 0, 0]
                }
            ],
            "removed": [7, 9]
        });

        let decoded = decode_quantized_delta(&payload, &config).unwrap();
        assert_eq!(decoded.tick, 43);
        assert_eq!(decoded.removed, vec![7, 9]);
        assert_eq!(decoded.changed[0].velocity, [1.0, 0.0, 0.0]);
    }

    #[test]
    fn test_factor_echo_wins_over_session_config() {
        // Session thinks 0.01, encoder says 0.1. The echo must win.
        let session = QuantizationConfig {
            position_factor: 0.01,
            ..Default::default()
        };

        let payload = json!({
            "tick": 1,
            "entities": [
                { "id": 1, "position": [10, 10, 10], "rotation": [0, 0, 0, 10000] }
            ],
            "factors": {
                "position_factor": 0.1,
                "rotation_factor": 0.0001,
                "scale_factor": 0.001,
                "velocity_factor": 0.01
            }
        });

        let decoded = decode_quantized_snapshot(&payload, &session).unwrap();
        assert_eq!(decoded.entities[0].position, [1.0, 1.0, 1.0]);
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let config = QuantizationConfig::default();
        let payload = json!({ "entities": "nope" });

        assert!(decode_quantized_snapshot(&payload, &config).is_err());
    }
}
