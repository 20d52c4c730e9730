//! # Gamepad Equipment Data
//!
//! A snapshot of a gamepad-style controller, read once per command cycle.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The state of every input on a gamepad at one instant.
///
/// Stick axes are in [-1, 1] with the hardware convention that pushing a stick away from the
/// driver gives a negative Y. Triggers are in [0, 1].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, Default, PartialEq)]
#[serde(default)]
pub struct GamepadState {
    pub left_x: f64,
    pub left_y: f64,
    pub right_x: f64,
    pub right_y: f64,

    pub left_trigger: f64,
    pub right_trigger: f64,

    pub a: bool,
    pub b: bool,
    pub x: bool,
    pub y: bool,

    pub left_bumper: bool,
    pub right_bumper: bool,

    pub back: bool,
    pub start: bool,

    pub left_stick: bool,
    pub right_stick: bool,

    /// Point of view hat angle in degrees (0 is up, clockwise), or `None` if released.
    pub pov_deg: Option<u16>,
}

/// A gamepad state addressed to one of the robot's gamepads.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct GamepadFrame {
    pub pad: PadId,
    pub state: GamepadState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The gamepads available to the operators.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum PadId {
    /// Primary driver, controls the drivebase.
    Driver,

    /// Secondary driver, controls the mechanisms.
    Mech,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl GamepadState {
    /// Right trigger minus left trigger, the rotation demand used by the drivebase.
    pub fn trigger_diff(&self) -> f64 {
        self.right_trigger - self.left_trigger
    }
}
