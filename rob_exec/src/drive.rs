//! # Drivebase mixing
//!
//! Converts the driver's gamepad into demands for the four mecanum wheels, in the drivebase order
//! `{front right, back right, front left, back left}`.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use util::maths::{deadband, normalise};

use crate::eqpt::GamepadState;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriveParams {
    /// Deadband applied to the sticks and the trigger rotation demand
    pub deadband: f64,

    /// Gain of the drift correction, applied to the measured yaw rate while translating with no
    /// rotation demand.
    pub drift_k: f64,

    /// Share of each wheel's demand given to rotation
    pub rotation_const: f64,

    /// Multiplier applied while the left bumper is held
    pub throttle: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DriveParams {
    fn default() -> Self {
        Self {
            deadband: 0.1,
            drift_k: 0.005,
            rotation_const: 0.6,
            throttle: 0.5,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Mix the driver's inputs into wheel demands.
///
/// - Pushing the left stick away from the driver drives forwards.
/// - The right bumper locks out strafing.
/// - When `field_centric` is set the translation demand is rotated by the current heading so that
///   it is relative to the field rather than the robot.
///
/// The returned demands are normalised, then scaled by the throttle if the left bumper is held.
pub fn mix(
    pad: &GamepadState,
    heading_deg: f64,
    rate_dps: f64,
    field_centric: bool,
    params: &DriveParams,
) -> [f64; 4] {
    let mut x = deadband(pad.left_x, params.deadband);
    let y = deadband(-pad.left_y, params.deadband);
    let mut r = deadband(pad.trigger_diff(), params.deadband);

    if pad.right_bumper {
        x = 0.0;
    }

    // Hold the current heading while translating
    if r == 0.0 && x.abs() + y.abs() > 0.0 && rate_dps.is_finite() {
        r = -params.drift_k * rate_dps;
    }

    let mut t = Vector2::new(x, y);
    if field_centric && heading_deg.is_finite() {
        t = Rotation2::new(heading_deg.to_radians()) * t;
    }

    let rc = r * params.rotation_const;

    let mut speeds = [
        -t.x + t.y - rc,
        t.x + t.y - rc,
        t.x + t.y + rc,
        -t.x + t.y + rc,
    ];
    normalise(&mut speeds);

    if pad.left_bumper {
        for s in speeds.iter_mut() {
            *s *= params.throttle;
        }
    }

    speeds
}

#[cfg(test)]
mod test {
    use super::*;

    fn close(a: &[f64; 4], b: &[f64; 4]) -> bool {
        a.iter().zip(b.iter()).all(|(a, b)| (a - b).abs() < 1e-9)
    }

    #[test]
    fn test_idle() {
        let pad = GamepadState {
            left_x: 0.05,
            left_y: -0.08,
            right_trigger: 0.1,
            ..Default::default()
        };

        assert_eq!(mix(&pad, 0.0, 0.0, false, &DriveParams::default()), [0.0; 4]);
    }

    #[test]
    fn test_forward_and_strafe() {
        let params = DriveParams::default();

        let fwd = GamepadState {
            left_y: -0.5,
            ..Default::default()
        };
        assert!(close(&mix(&fwd, 0.0, 0.0, false, &params), &[0.5; 4]));

        let right = GamepadState {
            left_x: 0.5,
            ..Default::default()
        };
        assert!(close(
            &mix(&right, 0.0, 0.0, false, &params),
            &[-0.5, 0.5, 0.5, -0.5]
        ));

        // Drive straight removes the strafe
        let straight = GamepadState {
            left_x: 0.5,
            left_y: -0.5,
            right_bumper: true,
            ..Default::default()
        };
        assert!(close(&mix(&straight, 0.0, 0.0, false, &params), &[0.5; 4]));
    }

    #[test]
    fn test_rotation_normalised_and_throttled() {
        let params = DriveParams::default();

        let pad = GamepadState {
            left_y: -1.0,
            right_trigger: 1.0,
            ..Default::default()
        };
        let speeds = mix(&pad, 0.0, 0.0, false, &params);

        // {0.4, 0.4, 1.6, 1.6} scaled by 1.6
        assert!(close(&speeds, &[0.25, 0.25, 1.0, 1.0]));

        let slow = GamepadState {
            left_bumper: true,
            ..pad
        };
        assert!(close(
            &mix(&slow, 0.0, 0.0, false, &params),
            &[0.125, 0.125, 0.5, 0.5]
        ));
    }

    #[test]
    fn test_drift_correction() {
        let params = DriveParams::default();

        let pad = GamepadState {
            left_y: -0.5,
            ..Default::default()
        };

        // Drifting clockwise gives an anticlockwise correction
        let speeds = mix(&pad, 0.0, 10.0, false, &params);
        let rc = 0.005 * 10.0 * 0.6;
        assert!(close(&speeds, &[0.5 + rc, 0.5 + rc, 0.5 - rc, 0.5 - rc]));

        // No correction when stationary
        assert_eq!(mix(&GamepadState::default(), 0.0, 10.0, false, &params), [0.0; 4]);
    }

    #[test]
    fn test_field_centric() {
        let params = DriveParams::default();

        let pad = GamepadState {
            left_y: -0.5,
            ..Default::default()
        };

        // Robot facing 90 degrees, pushing forward moves along the field's forward direction,
        // which is the robot's left
        let speeds = mix(&pad, 90.0, 0.0, true, &params);
        assert!(close(&speeds, &[0.5, -0.5, -0.5, 0.5]));

        // Robot oriented mode ignores the heading
        assert!(close(&mix(&pad, 90.0, 0.0, false, &params), &[0.5; 4]));
    }
}
