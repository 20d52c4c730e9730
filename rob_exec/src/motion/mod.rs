//! # Motion module
//!
//! Closed loop drivebase motions. A motion is started through the [`MotionArbiter`], which runs a
//! control task on its own thread to drive an [`ActuatorGroup`] toward a [`ControlSetpoint`].
//!
//! ## Ownership of the drivebase
//!
//! The motion flag holds the generation of the task which currently owns the drivebase, or zero
//! when no automatic motion is in progress. Every write to the drivebase, from a task or from
//! manual driving, is made while holding the write lock and only after checking the flag:
//!
//! - `start` installs a new generation under the lock, so the previous task can never write
//!   again once `start` has returned.
//! - `cancel` clears the flag and zeroes the drivebase under the lock.
//! - A task only clears the flag if it still holds its own generation.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod arbiter;
mod task;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};

use crate::{eqpt::Actuator, pid::PidGains};

pub use arbiter::*;
pub use crate::eqpt::Axis;
pub use task::{TaskOutcome, TaskReport};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A set of actuators driven together for one motion, each with a sign multiplier applied to the
/// controller output.
///
/// Validated on construction and immutable afterwards.
#[derive(Clone)]
pub struct ActuatorGroup {
    actuators: Vec<Arc<dyn Actuator>>,
    multipliers: Vec<f64>,
}

/// Tuning of one type of control task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub gains: PidGains,

    /// Whether the angular acceleration feedforward term is used
    pub feedforward: bool,

    /// Change in error between samples at or above which the integral term is suppressed.
    ///
    /// Units: degrees for rotation, meters for translation
    pub iterm_threshold: f64,

    /// Convergence tolerance.
    ///
    /// Units: degrees for rotation, meters for translation
    pub epsilon: f64,

    /// Scale applied to the normalised demands, keeps the drivebase away from saturation.
    pub damping: f64,

    /// Pause after each write while the error is still above epsilon, letting the drivebase catch
    /// up with the sensor.
    ///
    /// Units: milliseconds
    pub settle_delay_ms: u64,

    /// Number of consecutive failed sensor reads after which the task gives up.
    pub sensor_fault_limit: u32,
}

/// Parameters of the motion module.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MotionParams {
    pub rotate: TaskConfig,
    pub translate: TaskConfig,

    /// Drivebase multipliers for rotation, {front-right, back-right, front-left, back-left}
    pub rotate_multipliers: Vec<f64>,

    /// Drivebase multipliers for strafing along X
    pub translate_x_multipliers: Vec<f64>,

    /// Drivebase multipliers for driving along Y
    pub translate_y_multipliers: Vec<f64>,
}

/// The flag and the lock shared between the arbiter and its tasks.
pub(crate) struct Shared {
    flag: AtomicU64,
    next_generation: AtomicU64,
    write_lock: Mutex<()>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The goal of a control task.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ControlSetpoint {
    /// Rotate to an absolute heading in degrees
    RotateToHeading { heading_deg: f64 },

    /// Translate by a distance in meters along an axis, relative to where the task starts
    TranslateAlongAxis { distance_m: f64, axis: Axis },
}

#[derive(Debug, thiserror::Error)]
pub enum MotionError {
    #[error("An actuator group must contain at least one actuator")]
    EmptyGroup,

    #[error("Expected {expected} multipliers to match the actuators but found {found}")]
    MismatchedMultipliers { expected: usize, found: usize },

    #[error("Multiplier {0} is not a finite number")]
    InvalidMultiplier(f64),

    #[error("Expected {expected} demands for the drivebase but found {found}")]
    WrongDemandLength { expected: usize, found: usize },

    #[error("Manual demands rejected, automatic motion {0} owns the drivebase")]
    AutoMotionActive(u64),

    #[error("Could not spawn the control task thread: {0}")]
    SpawnFailed(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ActuatorGroup {
    /// Create a new group, failing if the group is empty or the multipliers do not match.
    pub fn new(
        actuators: Vec<Arc<dyn Actuator>>,
        multipliers: Vec<f64>,
    ) -> Result<Self, MotionError> {
        if actuators.is_empty() {
            return Err(MotionError::EmptyGroup);
        }

        if multipliers.len() != actuators.len() {
            return Err(MotionError::MismatchedMultipliers {
                expected: actuators.len(),
                found: multipliers.len(),
            });
        }

        if let Some(m) = multipliers.iter().find(|m| !m.is_finite()) {
            return Err(MotionError::InvalidMultiplier(*m));
        }

        Ok(Self {
            actuators,
            multipliers,
        })
    }

    pub fn len(&self) -> usize {
        self.actuators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actuators.is_empty()
    }

    pub fn multipliers(&self) -> &[f64] {
        &self.multipliers
    }

    /// Spread a scalar control output across the group by multiplier.
    pub fn distribute(&self, u: f64) -> Vec<f64> {
        self.multipliers.iter().map(|m| u * m).collect()
    }

    /// Write one demand to each actuator. The caller must hold the write lock.
    fn write(&self, demands: &[f64]) {
        for (a, d) in self.actuators.iter().zip(demands.iter()) {
            a.set_power(*d);
        }
    }

    /// Zero every actuator. The caller must hold the write lock.
    fn zero(&self) {
        for a in self.actuators.iter() {
            a.set_power(0.0);
        }
    }
}

impl std::fmt::Debug for ActuatorGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActuatorGroup")
            .field("len", &self.actuators.len())
            .field("multipliers", &self.multipliers)
            .finish()
    }
}

impl TaskConfig {
    /// The tuning used for rotating to a heading.
    pub fn rotate_default() -> Self {
        Self {
            gains: PidGains {
                k_p: 0.0071,
                k_i: 0.004,
                k_d: -0.0025,
                k_f: 0.002,
            },
            feedforward: true,
            iterm_threshold: crate::pid::DEFAULT_ITERM_THRESHOLD,
            epsilon: 5.0,
            damping: 0.6,
            settle_delay_ms: 500,
            sensor_fault_limit: 25,
        }
    }

    /// The tuning used for translating along an axis.
    pub fn translate_default() -> Self {
        Self {
            gains: PidGains {
                k_p: 4.0,
                k_i: 0.0,
                k_d: 0.0,
                k_f: 0.0,
            },
            feedforward: false,
            iterm_threshold: 0.05,
            epsilon: 0.05,
            damping: 0.4,
            settle_delay_ms: 10,
            sensor_fault_limit: 25,
        }
    }
}

impl Default for MotionParams {
    fn default() -> Self {
        Self {
            rotate: TaskConfig::rotate_default(),
            translate: TaskConfig::translate_default(),
            rotate_multipliers: vec![1.0, 1.0, -1.0, -1.0],
            translate_x_multipliers: vec![1.0, -1.0, -1.0, 1.0],
            translate_y_multipliers: vec![-1.0, -1.0, -1.0, -1.0],
        }
    }
}

impl Shared {
    fn new() -> Self {
        Self {
            flag: AtomicU64::new(0),
            next_generation: AtomicU64::new(1),
            write_lock: Mutex::new(()),
        }
    }

    /// Lock the drivebase for writing.
    ///
    /// The lock guards no data, so a panic while it was held leaves nothing inconsistent.
    fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The generation owning the drivebase, or zero.
    fn owner(&self) -> u64 {
        self.flag.load(Ordering::SeqCst)
    }

    fn holds(&self, generation: u64) -> bool {
        self.owner() == generation
    }

    /// Allocate a new generation and make it the owner, returning (new, previous).
    fn install(&self) -> (u64, u64) {
        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        let prev = self.flag.swap(generation, Ordering::SeqCst);
        (generation, prev)
    }

    /// Clear the flag whatever generation holds it, returning the previous owner.
    fn clear(&self) -> u64 {
        self.flag.swap(0, Ordering::SeqCst)
    }

    /// Clear the flag only if the given generation still holds it.
    fn release(&self, generation: u64) -> bool {
        self.flag
            .compare_exchange(generation, 0, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
    }
}
