//! # Control task
//!
//! The loop run on a control task's thread. A task owns its [`PidEngine`] and exits on
//! convergence, when it loses ownership of the drivebase, or after repeated sensor faults.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, trace, warn};
use serde::Serialize;
use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};
use util::maths::{normalise, wrap_deg_err};

use super::{ActuatorGroup, ControlSetpoint, Shared, TaskConfig};
use crate::{eqpt::HeadingSensor, pid::PidEngine};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Longest time a task sleeps between checks of the motion flag.
const FLAG_POLL_PERIOD: Duration = Duration::from_millis(10);

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A control task, consumed by [`ControlTask::run`].
pub(crate) struct ControlTask {
    pub generation: u64,
    pub setpoint: ControlSetpoint,
    pub config: TaskConfig,
    pub group: ActuatorGroup,
    pub sensor: Arc<dyn HeadingSensor>,
    pub shared: Arc<Shared>,
}

/// Summary of a finished control task, saved into the session.
#[derive(Debug, Clone, Serialize)]
pub struct TaskReport {
    pub generation: u64,
    pub setpoint: ControlSetpoint,
    pub outcome: TaskOutcome,

    /// Number of control law evaluations
    pub iterations: u64,

    /// The last error which was measured, `NaN` if none was
    pub final_error: f64,

    pub elapsed_s: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Why a control task finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TaskOutcome {
    /// The error came within epsilon
    Converged,

    /// The motion was cancelled
    Cancelled,

    /// A newer motion took over the drivebase
    Superseded,

    /// The sensor failed for too many consecutive reads
    SensorFault,
}

/// Result of a single feedback read.
enum Feedback {
    Valid { error: f64, rate: f64 },
    Fault,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ControlTask {
    /// Run the task to completion.
    pub fn run(self) -> TaskReport {
        let start = Instant::now();

        info!(
            "Motion {} started: {:?}",
            self.generation, self.setpoint
        );

        let mut pid = PidEngine::new(
            self.config.gains,
            self.config.iterm_threshold,
            self.config.feedforward,
        );

        // Translation is relative to where the task started
        let initial_disp = match self.setpoint {
            ControlSetpoint::TranslateAlongAxis { axis, .. } => self.sensor.displacement_m(axis),
            ControlSetpoint::RotateToHeading { .. } => 0.0,
        };

        let mut final_error = std::f64::NAN;
        let mut iterations = 0u64;
        let mut num_faults = 0u32;

        // The history is seeded from the first valid sample, however many faults come first
        let mut primed = false;

        let outcome = loop {
            // Cancellation and supersession are checked before anything else
            if let Some(o) = self.lost_ownership() {
                break o;
            }

            let (error, rate) = match self.feedback(initial_disp) {
                Feedback::Valid { error, rate } => {
                    num_faults = 0;
                    (error, rate)
                }
                Feedback::Fault => {
                    num_faults += 1;
                    warn!(
                        "Motion {}: sensor fault ({} of {})",
                        self.generation, num_faults, self.config.sensor_fault_limit
                    );

                    // Never hold a stale output while blind
                    {
                        let _lock = self.shared.lock();
                        if self.shared.holds(self.generation) {
                            self.group.zero();
                        }
                    }

                    if num_faults >= self.config.sensor_fault_limit {
                        break TaskOutcome::SensorFault;
                    }

                    match self.settle() {
                        Some(o) => break o,
                        None => continue,
                    }
                }
            };

            final_error = error;

            if error.abs() <= self.config.epsilon {
                break TaskOutcome::Converged;
            }

            if !primed {
                pid.prime(error, rate);
                primed = true;
            }

            let out = pid.step(error, rate);
            iterations += 1;

            let mut demands = self.group.distribute(out.u);
            normalise(&mut demands);
            for d in demands.iter_mut() {
                *d *= self.config.damping;
            }

            trace!(
                "Motion {}: err = {:.4}, rate = {:.4}, out = {:?}, dems = {:?}",
                self.generation, error, rate, out, demands
            );

            {
                let _lock = self.shared.lock();
                if let Some(o) = self.lost_ownership() {
                    break o;
                }
                self.group.write(&demands);
            }

            // Only pause if the drivebase has not already arrived
            if let Feedback::Valid { error, .. } = self.feedback(initial_disp) {
                final_error = error;
                if error.abs() <= self.config.epsilon {
                    continue;
                }
            }

            if let Some(o) = self.settle() {
                break o;
            }
        };

        // Exit path. A cancelled task's group was already zeroed by the cancel, and a superseded
        // task must not touch the group now that another task owns it.
        match outcome {
            TaskOutcome::Converged | TaskOutcome::SensorFault => {
                let _lock = self.shared.lock();
                if self.shared.holds(self.generation) {
                    self.group.zero();
                    self.shared.release(self.generation);
                }
            }
            TaskOutcome::Cancelled | TaskOutcome::Superseded => (),
        }

        let report = TaskReport {
            generation: self.generation,
            setpoint: self.setpoint,
            outcome,
            iterations,
            final_error,
            elapsed_s: start.elapsed().as_secs_f64(),
        };

        match outcome {
            TaskOutcome::SensorFault => warn!(
                "Motion {} stopped after {} consecutive sensor faults",
                self.generation, num_faults
            ),
            _ => info!(
                "Motion {} finished: {:?} after {} iterations (error {:.3})",
                self.generation, outcome, iterations, final_error
            ),
        }

        util::session::save(
            format!("motion/task_{:04}.json", self.generation),
            report.clone(),
        );

        report
    }

    /// Read the sensor and compute the signed error against the setpoint.
    fn feedback(&self, initial_disp: f64) -> Feedback {
        let (error, rate) = match self.setpoint {
            ControlSetpoint::RotateToHeading { heading_deg } => (
                wrap_deg_err(self.sensor.heading_deg(), heading_deg),
                self.sensor.rate_dps(),
            ),
            ControlSetpoint::TranslateAlongAxis { distance_m, axis } => (
                (self.sensor.displacement_m(axis) - initial_disp) - distance_m,
                0.0,
            ),
        };

        if error.is_finite() && rate.is_finite() {
            Feedback::Valid { error, rate }
        }
        else {
            Feedback::Fault
        }
    }

    /// If this task no longer owns the drivebase return why.
    fn lost_ownership(&self) -> Option<TaskOutcome> {
        match self.shared.owner() {
            g if g == self.generation => None,
            0 => {
                debug!("Motion {} observed cancellation", self.generation);
                Some(TaskOutcome::Cancelled)
            }
            g => {
                debug!("Motion {} superseded by {}", self.generation, g);
                Some(TaskOutcome::Superseded)
            }
        }
    }

    /// Wait for the settling delay, returning early if ownership is lost.
    fn settle(&self) -> Option<TaskOutcome> {
        let end = Instant::now() + Duration::from_millis(self.config.settle_delay_ms);

        loop {
            if let Some(o) = self.lost_ownership() {
                return Some(o);
            }

            let now = Instant::now();
            if now >= end {
                return None;
            }

            thread::sleep(FLAG_POLL_PERIOD.min(end - now));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eqpt::{Actuator, Axis},
        motion::TaskConfig,
        pid::PidGains,
    };
    use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

    /// A heading sensor which faults for a number of reads, then reports a fixed heading.
    struct FaultyThenFixed {
        faults_left: AtomicU32,
        heading_deg: f64,
    }

    /// An actuator remembering the largest demand it was ever given.
    #[derive(Default)]
    struct PeakMotor {
        peak_bits: AtomicU64,
    }

    impl HeadingSensor for FaultyThenFixed {
        fn heading_deg(&self) -> f64 {
            let left = self.faults_left.load(Ordering::SeqCst);
            if left > 0 {
                self.faults_left.store(left - 1, Ordering::SeqCst);
                std::f64::NAN
            }
            else {
                self.heading_deg
            }
        }

        fn rate_dps(&self) -> f64 {
            0.0
        }

        fn displacement_m(&self, _axis: Axis) -> f64 {
            0.0
        }
    }

    impl Actuator for PeakMotor {
        fn set_power(&self, power: f64) {
            if power.abs() > self.power() {
                self.peak_bits.store(power.abs().to_bits(), Ordering::SeqCst);
            }
        }

        fn power(&self) -> f64 {
            f64::from_bits(self.peak_bits.load(Ordering::SeqCst))
        }
    }

    #[test]
    fn test_primed_after_initial_faults() {
        let motor = Arc::new(PeakMotor::default());
        let group = ActuatorGroup::new(vec![motor.clone() as Arc<dyn Actuator>], vec![1.0]).unwrap();

        let shared = Arc::new(Shared::new());
        let (generation, _) = shared.install();

        // Derivative only, so any output at all would come from a step against empty history
        let task = ControlTask {
            generation,
            setpoint: ControlSetpoint::RotateToHeading { heading_deg: 60.0 },
            config: TaskConfig {
                gains: PidGains {
                    k_p: 0.0,
                    k_i: 0.0,
                    k_d: 1.0,
                    k_f: 0.0,
                },
                feedforward: false,
                iterm_threshold: 2.0,
                epsilon: 5.0,
                damping: 0.6,
                settle_delay_ms: 5,
                sensor_fault_limit: 10,
            },
            group,
            sensor: Arc::new(FaultyThenFixed {
                faults_left: AtomicU32::new(3),
                heading_deg: 0.0,
            }),
            shared: shared.clone(),
        };

        let jh = thread::spawn(move || task.run());

        thread::sleep(Duration::from_millis(100));
        shared.clear();

        let report = jh.join().unwrap();
        assert_eq!(report.outcome, TaskOutcome::Cancelled);
        assert!(report.iterations > 0);
        assert_eq!(report.final_error, -60.0);
        assert_eq!(motor.power(), 0.0);
    }
}
