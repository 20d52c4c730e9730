//! # Gear mechanism
//!
//! The gear mechanism is driven between two hard stops by a single motor. The operator toggles
//! whether the mechanism should be extended, and the state is re-derived every cycle from the
//! hard stops and that intent by [`next_state`].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use util::module::Mechanism;

use crate::eqpt::{Actuator, LimitSwitch};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters of the gear mechanism.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GearMechParams {
    /// Base motor power magnitude
    pub motor_speed: f64,

    /// Multiplier on the base power when extending, lifting needs more authority than lowering.
    /// Must be greater than one.
    pub up_multiplier: f64,
}

/// The gear mechanism.
pub struct GearMech {
    motor: Arc<dyn Actuator>,
    lower: Arc<dyn LimitSwitch>,
    upper: Arc<dyn LimitSwitch>,

    params: GearMechParams,

    desire_extended: bool,
    state: GearState,
}

/// Report of one cycle of the gear mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct GearStatusReport {
    pub state: GearState,
    pub desire_extended: bool,
    pub power: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// State of the gear mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GearState {
    Retracted,
    Extended,
    MovingToExtended,
    MovingToRetracted,
}

#[derive(Debug, thiserror::Error)]
pub enum GearMechError {
    #[error("The up multiplier must be greater than one, found {0}")]
    InvalidUpMultiplier(f64),

    #[error("The motor speed must be in (0, 1], found {0}")]
    InvalidMotorSpeed(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for GearMechParams {
    fn default() -> Self {
        Self {
            motor_speed: 0.25,
            up_multiplier: 1.5,
        }
    }
}

impl GearMech {
    /// Create a new gear mechanism, starting retracted with no desire to extend.
    pub fn new(
        motor: Arc<dyn Actuator>,
        lower: Arc<dyn LimitSwitch>,
        upper: Arc<dyn LimitSwitch>,
        params: GearMechParams,
    ) -> Result<Self, GearMechError> {
        if !(params.up_multiplier > 1.0) {
            return Err(GearMechError::InvalidUpMultiplier(params.up_multiplier));
        }
        if !(params.motor_speed > 0.0 && params.motor_speed <= 1.0) {
            return Err(GearMechError::InvalidMotorSpeed(params.motor_speed));
        }

        Ok(Self {
            motor,
            lower,
            upper,
            params,
            desire_extended: false,
            state: GearState::Retracted,
        })
    }

    /// Flip the desired position.
    ///
    /// The state only follows on the next call to `run`.
    pub fn toggle_state(&mut self) {
        self.desire_extended = !self.desire_extended;
        info!(
            "Gear mechanism demand: {}",
            if self.desire_extended { "extend" } else { "retract" }
        );
    }

    pub fn state(&self) -> GearState {
        self.state
    }

    pub fn desire_extended(&self) -> bool {
        self.desire_extended
    }

    /// Motor power for a state.
    pub fn output_for(&self, state: GearState) -> f64 {
        match state {
            GearState::Retracted | GearState::Extended => 0.0,
            GearState::MovingToExtended => self.params.motor_speed * self.params.up_multiplier,
            GearState::MovingToRetracted => -self.params.motor_speed,
        }
    }
}

impl Mechanism for GearMech {
    type StatusReport = GearStatusReport;

    fn run(&mut self) -> Self::StatusReport {
        let state = next_state(
            self.state,
            self.lower.is_tripped(),
            self.upper.is_tripped(),
            self.desire_extended,
        );

        if state != self.state {
            debug!("Gear mechanism {:?} -> {:?}", self.state, state);
        }
        self.state = state;

        let power = self.output_for(state);
        self.motor.set_power(power);

        GearStatusReport {
            state,
            desire_extended: self.desire_extended,
            power,
        }
    }

    fn make_safe(&mut self) {
        self.motor.set_power(0.0);
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Derive the state of the mechanism from the hard stops and the intent.
///
/// Rules are applied in order, each later rule overriding the earlier ones:
/// 1. lower stop tripped: `Retracted`
/// 2. extension desired and upper stop clear: `MovingToExtended`
/// 3. upper stop tripped: `Extended`
/// 4. retraction desired and lower stop clear: `MovingToRetracted`
///
/// If no rule fires the previous state is kept.
///
/// Rule 1 only wins while nothing later fires, so with the lower stop tripped and extension
/// desired the result is `MovingToExtended`: the mechanism is driven off the lower stop rather
/// than held against it.
pub fn next_state(
    prev: GearState,
    lower_tripped: bool,
    upper_tripped: bool,
    desire_extended: bool,
) -> GearState {
    let mut state = prev;

    if lower_tripped {
        state = GearState::Retracted;
    }
    if desire_extended && !upper_tripped {
        state = GearState::MovingToExtended;
    }
    if upper_tripped {
        state = GearState::Extended;
    }
    if !desire_extended && !lower_tripped {
        state = GearState::MovingToRetracted;
    }

    state
}
