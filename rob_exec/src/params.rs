//! # Robot Executable Parameters
//!
//! This module provides the parameters of the robot executable, loaded from `rob_exec.toml`. Any
//! table or key missing from the file takes its tuned default.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::{
    climber::ClimberParams,
    dispatch::DispatchParams,
    drive::DriveParams,
    eqpt::sim::{SimDrivebaseParams, SimFlywheelParams, SimTravelParams},
    gear_mech::GearMechParams,
    motion::MotionParams,
    servo_gate::ServoGateParams,
    shooter::ShooterParams,
    vision::VisionParams,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest accepted command cycle period, in seconds.
const MAX_CYCLE_PERIOD_S: f64 = 1.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RobExecParams {
    /// Period of the command cycle.
    ///
    /// Units: seconds
    pub cycle_period_s: f64,

    /// Number of consecutive cycle overruns after which everything is made safe
    pub max_consec_overruns: u64,

    pub motion: MotionParams,

    pub drive: DriveParams,

    pub gear: GearMechParams,

    pub climber: ClimberParams,

    pub shooter: ShooterParams,

    pub servo_gate: ServoGateParams,

    pub dispatch: DispatchParams,

    pub vision: VisionParams,

    pub sim: SimParams,
}

/// Parameters of the simulated equipment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SimParams {
    pub drivebase: SimDrivebaseParams,

    pub flywheel: SimFlywheelParams,

    pub gear: SimTravelParams,

    /// Travel from the bottom of the rope to the touch pad at the top
    pub climber: SimTravelParams,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ParamsError {
    #[error("The cycle period must be greater than 0 and at most {max} s, found {0}", max = MAX_CYCLE_PERIOD_S)]
    InvalidCyclePeriod(f64),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl RobExecParams {
    /// The command cycle period, checked to be a usable duration.
    pub fn cycle_period(&self) -> Result<Duration, ParamsError> {
        let p = self.cycle_period_s;

        if p.is_finite() && p > 0.0 && p <= MAX_CYCLE_PERIOD_S {
            Ok(Duration::from_secs_f64(p))
        }
        else {
            Err(ParamsError::InvalidCyclePeriod(p))
        }
    }
}

impl Default for RobExecParams {
    fn default() -> Self {
        Self {
            cycle_period_s: 0.02,
            max_consec_overruns: 25,
            motion: MotionParams::default(),
            drive: DriveParams::default(),
            gear: GearMechParams::default(),
            climber: ClimberParams::default(),
            shooter: ShooterParams::default(),
            servo_gate: ServoGateParams::default(),
            dispatch: DispatchParams::default(),
            vision: VisionParams::default(),
            sim: SimParams::default(),
        }
    }
}
