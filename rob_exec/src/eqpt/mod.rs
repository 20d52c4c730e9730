//! # Equipment interfaces
//!
//! The control code never talks to hardware directly, instead it is handed trait objects for each
//! piece of equipment. The executable wires in the simulated equipment from [`sim`].

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

pub mod sim;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use comms_if::eqpt::gamepad::GamepadState;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// A translation axis of the robot.
///
/// `X` is strafing to the right, `Y` is driving forwards.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Axis {
    X,
    Y,
}

// ------------------------------------------------------------------------------------------------
// TRAITS
// ------------------------------------------------------------------------------------------------

/// A motor controller taking a normalised power demand.
pub trait Actuator: Send + Sync {
    /// Set the power of the actuator, in [-1, 1].
    ///
    /// Implementations clamp out of range values, callers should have normalised already.
    fn set_power(&self, power: f64);

    /// The last power which was commanded.
    fn power(&self) -> f64;
}

/// A positional servo.
pub trait Servo: Send + Sync {
    /// Command a position in [0, 1]. Implementations clamp out of range values.
    fn set_position(&self, position: f64);

    /// The last position which was commanded.
    fn position(&self) -> f64;
}

/// A yaw reporting heading sensor.
pub trait HeadingSensor: Send + Sync {
    /// Heading in degrees in (-180, 180], positive clockwise.
    ///
    /// A failed read is reported as `NaN`.
    fn heading_deg(&self) -> f64;

    /// Angular rate in degrees per second, positive clockwise.
    fn rate_dps(&self) -> f64;

    /// Displacement along the given axis since power on, in meters.
    fn displacement_m(&self, axis: Axis) -> f64;
}

/// A rotary encoder reporting a rate.
pub trait RateEncoder: Send + Sync {
    /// Rate in counts per second.
    fn rate(&self) -> f64;
}

/// The raw level of a digital input.
pub trait DigitalInput: Send + Sync {
    fn get(&self) -> bool;
}

/// A hard stop sensor.
///
/// `is_tripped` returning `true` always means the mechanism is at the stop, whatever the wiring
/// of the switch. Use [`ActiveLow`] or [`ActiveHigh`] to adapt a raw input.
pub trait LimitSwitch: Send + Sync {
    fn is_tripped(&self) -> bool;
}

/// A gamepad, read once per command cycle.
pub trait Gamepad: Send + Sync {
    fn state(&self) -> GamepadState;
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Limit switch wired so that the input reads low at the stop.
pub struct ActiveLow(pub Arc<dyn DigitalInput>);

/// Limit switch wired so that the input reads high at the stop.
pub struct ActiveHigh(pub Arc<dyn DigitalInput>);

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl LimitSwitch for ActiveLow {
    fn is_tripped(&self) -> bool {
        !self.0.get()
    }
}

impl LimitSwitch for ActiveHigh {
    fn is_tripped(&self) -> bool {
        self.0.get()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use sim::SimDigitalInput;

    #[test]
    fn test_limit_switch_polarity() {
        let input = Arc::new(SimDigitalInput::new(true));

        let low = ActiveLow(input.clone());
        let high = ActiveHigh(input.clone());

        assert!(!low.is_tripped());
        assert!(high.is_tripped());

        input.set(false);
        assert!(low.is_tripped());
        assert!(!high.is_tripped());
    }
}
