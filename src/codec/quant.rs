//! Fixed-point scaling functions.
//!
//! Decoding is `value * factor`, nothing more: no rounding, no clamping.
//! Precision loss, if any, already happened at encode time on the server.
//! The factor set must match between encoder and decoder; the protocol
//! carries an optional factor echo for detecting drift (see
//! [`super::entity`]) but does not hard-enforce agreement.

use serde::{Deserialize, Serialize};

/// Scaling factors for the four quantized field families.
///
/// Fixed for a connection's lifetime. The defaults match the reference
/// server encoder; a server that encodes with different factors is
/// expected to declare them in the negotiation response.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QuantizationConfig {
    /// Factor applied to position components.
    pub position_factor: f64,
    /// Factor applied to rotation (quaternion) components.
    pub rotation_factor: f64,
    /// Factor applied to scale components.
    pub scale_factor: f64,
    /// Factor applied to velocity components.
    pub velocity_factor: f64,
}

impl Default for QuantizationConfig {
    fn default() -> Self {
        Self {
            position_factor: 0.01,
            rotation_factor: 0.0001,
            scale_factor: 0.001,
            velocity_factor: 0.01,
        }
    }
}

impl QuantizationConfig {
    /// Whether two factor sets agree within floating-point noise.
    pub fn agrees_with(&self, other: &Self) -> bool {
        close(self.position_factor, other.position_factor)
            && close(self.rotation_factor, other.rotation_factor)
            && close(self.scale_factor, other.scale_factor)
            && close(self.velocity_factor, other.velocity_factor)
    }
}

fn close(a: f64, b: f64) -> bool {
    (a - b).abs() <= f64::EPSILON * a.abs().max(b.abs())
}

fn scale3(value: [i32; 3], factor: f64) -> [f32; 3] {
    [
        (value[0] as f64 * factor) as f32,
        (value[1] as f64 * factor) as f32,
        (value[2] as f64 * factor) as f32,
    ]
}

fn unscale3(value: [f32; 3], factor: f64) -> [i32; 3] {
    [
        (value[0] as f64 / factor).round() as i32,
        (value[1] as f64 / factor).round() as i32,
        (value[2] as f64 / factor).round() as i32,
    ]
}

/// Decode a quantized position triple.
pub fn dequantize_position(value: [i32; 3], config: &QuantizationConfig) -> [f32; 3] {
    scale3(value, config.position_factor)
}

/// Decode a quantized rotation quaternion.
pub fn dequantize_rotation(value: [i32; 4], config: &QuantizationConfig) -> [f32; 4] {
    [
        (value[0] as f64 * config.rotation_factor) as f32,
        (value[1] as f64 * config.rotation_factor) as f32,
        (value[2] as f64 * config.rotation_factor) as f32,
        (value[3] as f64 * config.rotation_factor) as f32,
    ]
}

/// Decode a quantized scale triple.
pub fn dequantize_scale(value: [i32; 3], config: &QuantizationConfig) -> [f32; 3] {
    scale3(value, config.scale_factor)
}

/// Decode a quantized velocity triple.
pub fn dequantize_velocity(value: [i32; 3], config: &QuantizationConfig) -> [f32; 3] {
    scale3(value, config.velocity_factor)
}

/// Encode a position triple. Server-side counterpart of
/// [`dequantize_position`], provided for loopback harnesses and tests.
pub fn quantize_position(value: [f32; 3], config: &QuantizationConfig) -> [i32; 3] {
    unscale3(value, config.position_factor)
}

/// Encode a rotation quaternion.
pub fn quantize_rotation(value: [f32; 4], config: &QuantizationConfig) -> [i32; 4] {
    [
        (value[0] as f64 / config.rotation_factor).round() as i32,
        (value[1] as f64 / config.rotation_factor).round() as i32,
        (value[2] as f64 / config.rotation_factor).round() as i32,
        (value[3] as f64 / config.rotation_factor).round() as i32,
    ]
}

/// Encode a scale triple.
pub fn quantize_scale(value: [f32; 3], config: &QuantizationConfig) -> [i32; 3] {
    unscale3(value, config.scale_factor)
}

/// Encode a velocity triple.
pub fn quantize_velocity(value: [f32; 3], config: &QuantizationConfig) -> [i32; 3] {
    unscale3(value, config.velocity_factor)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dequantize_position() {
        let config = QuantizationConfig {
            position_factor: 0.01,
            ..Default::default()
        };

        assert_eq!(
            dequantize_position([100, 200, 300], &config),
            [1.0, 2.0, 3.0]
        );
    }

    #[test]
    fn test_dequantize_negative() {
        let config = QuantizationConfig {
            position_factor: 0.01,
            ..Default::default()
        };

        assert_eq!(
            dequantize_position([-100, 0, 50], &config),
            [-1.0, 0.0, 0.5]
        );
    }

    #[test]
    fn test_dequantize_rotation() {
        let config = QuantizationConfig {
            rotation_factor: 0.0001,
            ..Default::default()
        };

        let quat = dequantize_rotation([10000, 0, 0, 0], &config);
        assert_eq!(quat, [1.0, 0.0, 0.0, 0.0]);
    }

    #[test]
    fn test_quantize_inverts_dequantize() {
        let config = QuantizationConfig::default();

        let pos = [12.34_f32, -56.78, 0.0];
        let wire = quantize_position(pos, &config);
        let back = dequantize_position(wire, &config);

        for (a, b) in pos.iter().zip(back.iter()) {
            assert!((a - b).abs() < config.position_factor as f32);
        }
    }

    #[test]
    fn test_velocity_uses_own_factor() {
        let config = QuantizationConfig {
            position_factor: 0.01,
            velocity_factor: 0.1,
            ..Default::default()
        };

        assert_eq!(dequantize_velocity([10, 20, 30], &config), [1.0, 2.0, 3.0]);
        assert_eq!(
            dequantize_position([10, 20, 30], &config),
            [0.1, 0.2, 0.3]
        );
    }

    #[test]
    fn test_factor_agreement() {
        let a = QuantizationConfig::default();
        let b = QuantizationConfig::default();
        assert!(a.agrees_with(&b));

        let c = QuantizationConfig {
            position_factor: 0.02,
            ..Default::default()
        };
        assert!(!a.agrees_with(&c));
    }
}
