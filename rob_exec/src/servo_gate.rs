//! # Servo gate
//!
//! A servo positioned by the mechanism operator's point of view hat. Down sends it to the down
//! position and up to the up position; the position is latched, so releasing the hat or pressing
//! it sideways leaves the servo where it is.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::debug;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use util::module::Mechanism;

use crate::eqpt::Servo;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Hat angle of the up direction, in degrees.
const POV_UP_DEG: u16 = 0;

/// Hat angle of the down direction, in degrees.
const POV_DOWN_DEG: u16 = 180;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServoGateParams {
    /// Position commanded by pressing the hat up, also held from startup
    pub up_position: f64,

    /// Position commanded by pressing the hat down
    pub down_position: f64,
}

pub struct ServoGate {
    servo: Arc<dyn Servo>,

    params: ServoGateParams,

    position: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ServoGateStatusReport {
    pub position: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ServoGateParams {
    fn default() -> Self {
        Self {
            up_position: 0.7,
            down_position: 1.0,
        }
    }
}

impl ServoGate {
    pub fn new(servo: Arc<dyn Servo>, params: ServoGateParams) -> Self {
        let position = params.up_position;

        Self {
            servo,
            params,
            position,
        }
    }

    /// Latch a new position from the hat angle, if it is pressed up or down.
    pub fn update_pov(&mut self, pov_deg: Option<u16>) {
        let position = match pov_deg {
            Some(POV_UP_DEG) => self.params.up_position,
            Some(POV_DOWN_DEG) => self.params.down_position,
            _ => return,
        };

        if position != self.position {
            debug!("Servo gate moving to {:.2}", position);
            self.position = position;
        }
    }

    pub fn position(&self) -> f64 {
        self.position
    }
}

impl Mechanism for ServoGate {
    type StatusReport = ServoGateStatusReport;

    fn run(&mut self) -> Self::StatusReport {
        self.servo.set_position(self.position);

        ServoGateStatusReport {
            position: self.position,
        }
    }

    /// A servo holds its position unpowered, so making safe leaves the latched position alone.
    fn make_safe(&mut self) {}
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::sim::SimServo;

    #[test]
    fn test_pov_latching() {
        let servo = Arc::new(SimServo::new());
        let mut gate = ServoGate::new(servo.clone(), ServoGateParams::default());

        // Holds the up position from startup
        assert_eq!(gate.run().position, 0.7);
        assert_eq!(servo.position(), 0.7);

        gate.update_pov(Some(180));
        assert_eq!(gate.run().position, 1.0);
        assert_eq!(servo.position(), 1.0);

        // Released or sideways, the position is kept
        gate.update_pov(None);
        assert_eq!(gate.run().position, 1.0);
        gate.update_pov(Some(90));
        gate.update_pov(Some(225));
        assert_eq!(gate.run().position, 1.0);

        gate.update_pov(Some(0));
        assert_eq!(gate.run().position, 0.7);
        assert_eq!(servo.position(), 0.7);

        gate.make_safe();
        assert_eq!(gate.position(), 0.7);
    }
}
