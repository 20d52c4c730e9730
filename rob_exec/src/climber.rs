//! # Rope climber
//!
//! Winds the climbing rope while the operator holds the climb button. Either of the two hard stops
//! at the top of the climb stops the motor.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use util::module::Mechanism;

use crate::eqpt::{Actuator, LimitSwitch};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClimberParams {
    /// Motor power while climbing
    pub climb_power: f64,
}

pub struct RopeClimber {
    motor: Arc<dyn Actuator>,
    left_stop: Arc<dyn LimitSwitch>,
    right_stop: Arc<dyn LimitSwitch>,

    params: ClimberParams,

    enabled: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ClimberStatusReport {
    pub enabled: bool,
    pub at_stop: bool,
    pub power: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ClimberParams {
    fn default() -> Self {
        Self { climb_power: 1.0 }
    }
}

impl RopeClimber {
    pub fn new(
        motor: Arc<dyn Actuator>,
        left_stop: Arc<dyn LimitSwitch>,
        right_stop: Arc<dyn LimitSwitch>,
        params: ClimberParams,
    ) -> Self {
        Self {
            motor,
            left_stop,
            right_stop,
            params,
            enabled: false,
        }
    }

    /// Set whether the climber should be winding, latched until the next call.
    pub fn update_enable(&mut self, enable: bool) {
        self.enabled = enable;
    }
}

impl Mechanism for RopeClimber {
    type StatusReport = ClimberStatusReport;

    fn run(&mut self) -> Self::StatusReport {
        let at_stop = self.left_stop.is_tripped() || self.right_stop.is_tripped();

        let power = if self.enabled && !at_stop {
            self.params.climb_power
        }
        else {
            0.0
        };

        self.motor.set_power(power);

        ClimberStatusReport {
            enabled: self.enabled,
            at_stop,
            power,
        }
    }

    fn make_safe(&mut self) {
        self.enabled = false;
        self.motor.set_power(0.0);
    }
}
