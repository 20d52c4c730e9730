//! # Motion arbiter
//!
//! Owns the drivebase and the motion flag, and starts and cancels control tasks. Overlapping
//! starts follow a last caller wins policy: the newer motion takes the drivebase over and the
//! older task exits on its next check without writing again.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{info, warn};
use std::{
    sync::{
        mpsc::{channel, Receiver, TryRecvError},
        Arc,
    },
    thread::{self, JoinHandle},
};

use super::{
    task::{ControlTask, TaskReport},
    ActuatorGroup, ControlSetpoint, MotionError, MotionParams, Shared,
};
use crate::eqpt::{Actuator, Axis, HeadingSensor};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Arbitrates between manual driving and automatic motions on the drivebase.
pub struct MotionArbiter {
    shared: Arc<Shared>,

    sensor: Arc<dyn HeadingSensor>,

    /// Every drivebase actuator, used for manual demands and cancellation
    drivebase: ActuatorGroup,

    rotate_group: ActuatorGroup,
    translate_x_group: ActuatorGroup,
    translate_y_group: ActuatorGroup,

    params: MotionParams,

    tasks: Vec<(u64, JoinHandle<TaskReport>)>,
}

/// A handle on a started motion.
#[derive(Debug)]
pub struct MotionHandle {
    generation: u64,
    report_rx: Receiver<TaskReport>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl MotionArbiter {
    /// Create a new arbiter for the given drivebase actuators.
    ///
    /// Every multiplier set in `params` is checked against the actuators here, so a bad
    /// configuration fails at startup rather than at the first motion.
    pub fn new(
        actuators: Vec<Arc<dyn Actuator>>,
        sensor: Arc<dyn HeadingSensor>,
        params: MotionParams,
    ) -> Result<Self, MotionError> {
        let n = actuators.len();

        Ok(Self {
            shared: Arc::new(Shared::new()),
            sensor,
            drivebase: ActuatorGroup::new(actuators.clone(), vec![1.0; n])?,
            rotate_group: ActuatorGroup::new(actuators.clone(), params.rotate_multipliers.clone())?,
            translate_x_group: ActuatorGroup::new(
                actuators.clone(),
                params.translate_x_multipliers.clone(),
            )?,
            translate_y_group: ActuatorGroup::new(actuators, params.translate_y_multipliers.clone())?,
            params,
            tasks: Vec::new(),
        })
    }

    /// Start a new motion toward the setpoint.
    ///
    /// Any motion already running is superseded. Once this returns the previous task can no
    /// longer write to the drivebase.
    pub fn start(&mut self, setpoint: ControlSetpoint) -> Result<MotionHandle, MotionError> {
        let (group, config) = match setpoint {
            ControlSetpoint::RotateToHeading { .. } => {
                (self.rotate_group.clone(), self.params.rotate.clone())
            }
            ControlSetpoint::TranslateAlongAxis { axis: Axis::X, .. } => {
                (self.translate_x_group.clone(), self.params.translate.clone())
            }
            ControlSetpoint::TranslateAlongAxis { axis: Axis::Y, .. } => {
                (self.translate_y_group.clone(), self.params.translate.clone())
            }
        };

        let (report_tx, report_rx) = channel();

        let _lock = self.shared.lock();

        let (generation, prev) = self.shared.install();
        if prev != 0 {
            info!("Motion {} supersedes motion {}", generation, prev);
        }

        let task = ControlTask {
            generation,
            setpoint,
            config,
            group,
            sensor: self.sensor.clone(),
            shared: self.shared.clone(),
        };

        let spawn_result = thread::Builder::new()
            .name(format!("motion_{}", generation))
            .spawn(move || {
                let report = task.run();
                report_tx.send(report.clone()).ok();
                report
            });

        let jh = match spawn_result {
            Ok(jh) => jh,
            Err(e) => {
                // Nothing else will release the flag, so leave the drivebase stopped and free
                self.shared.release(generation);
                self.drivebase.zero();
                return Err(MotionError::SpawnFailed(e));
            }
        };

        self.tasks.push((generation, jh));

        Ok(MotionHandle {
            generation,
            report_rx,
        })
    }

    /// Cancel any running motion, zeroing the drivebase.
    ///
    /// Returns the generation which was cancelled, if any.
    pub fn cancel(&mut self) -> Option<u64> {
        let _lock = self.shared.lock();

        let prev = self.shared.clear();
        self.drivebase.zero();

        if prev != 0 {
            info!("Motion {} cancelled", prev);
            Some(prev)
        }
        else {
            None
        }
    }

    /// Whether an automatic motion currently owns the drivebase.
    pub fn is_active(&self) -> bool {
        self.shared.owner() != 0
    }

    /// The generation of the motion owning the drivebase, if any.
    pub fn active_generation(&self) -> Option<u64> {
        match self.shared.owner() {
            0 => None,
            g => Some(g),
        }
    }

    /// Write manual demands to the drivebase, rejected while an automatic motion is active.
    pub fn write_manual(&self, demands: &[f64]) -> Result<(), MotionError> {
        if demands.len() != self.drivebase.len() {
            return Err(MotionError::WrongDemandLength {
                expected: self.drivebase.len(),
                found: demands.len(),
            });
        }

        let _lock = self.shared.lock();

        match self.shared.owner() {
            0 => {
                self.drivebase.write(demands);
                Ok(())
            }
            g => Err(MotionError::AutoMotionActive(g)),
        }
    }

    /// Join the threads of finished tasks, returning their reports.
    pub fn reap(&mut self) -> Vec<TaskReport> {
        let mut reports = Vec::new();
        let mut running = Vec::with_capacity(self.tasks.len());

        for (generation, jh) in self.tasks.drain(..) {
            if jh.is_finished() {
                match jh.join() {
                    Ok(r) => reports.push(r),
                    Err(_) => warn!("Motion {} task panicked", generation),
                }
            }
            else {
                running.push((generation, jh));
            }
        }

        self.tasks = running;

        reports
    }

    /// Wait for every task thread to exit, returning their reports.
    ///
    /// Blocks until the running motion converges, so cancel first when shutting down.
    pub fn join_all(&mut self) -> Vec<TaskReport> {
        let mut reports = Vec::new();

        for (generation, jh) in self.tasks.drain(..) {
            match jh.join() {
                Ok(r) => reports.push(r),
                Err(_) => warn!("Motion {} task panicked", generation),
            }
        }

        reports
    }

    /// Number of task threads which have not been joined yet.
    pub fn num_tasks(&self) -> usize {
        self.tasks.len()
    }
}

impl Drop for MotionArbiter {
    fn drop(&mut self) {
        self.cancel();
        self.join_all();
    }
}

impl MotionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Block until the task finishes, returning its report.
    ///
    /// Returns `None` if the task thread died without reporting.
    pub fn wait(self) -> Option<TaskReport> {
        self.report_rx.recv().ok()
    }

    /// The task's report if it has finished.
    pub fn try_report(&self) -> Option<TaskReport> {
        match self.report_rx.try_recv() {
            Ok(r) => Some(r),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eqpt::sim::{SimDrivebase, SimDrivebaseParams},
        motion::{TaskConfig, TaskOutcome},
    };
    use std::time::{Duration, Instant};

    /// Drivebase model running ten times faster than real time, with the settling delay scaled
    /// to match so the loop sees the same dynamics as on the robot.
    fn fast_setup() -> (Arc<SimDrivebase>, MotionArbiter) {
        fast_setup_with(SimDrivebaseParams {
            time_scale: 10.0,
            ..Default::default()
        })
    }

    fn fast_setup_with(base_params: SimDrivebaseParams) -> (Arc<SimDrivebase>, MotionArbiter) {
        let base = SimDrivebase::new(base_params);

        let mut params = MotionParams::default();
        params.rotate.settle_delay_ms = 50;
        params.translate.settle_delay_ms = 5;
        params.rotate.sensor_fault_limit = 5;

        let arbiter = MotionArbiter::new(base.wheels(), base.clone(), params).unwrap();

        (base, arbiter)
    }

    fn all_zero(base: &SimDrivebase) -> bool {
        base.wheel_powers().iter().all(|p| *p == 0.0)
    }

    #[test]
    fn test_rotate_to_heading() {
        // Yaw follows the wheels without lag, so the drivebase stops turning as soon as the task
        // zeroes it
        let (base, mut arbiter) = fast_setup_with(SimDrivebaseParams {
            time_scale: 10.0,
            yaw_time_const_s: 0.0,
            ..Default::default()
        });

        let handle = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: 60.0 })
            .unwrap();
        assert!(arbiter.is_active());
        assert_eq!(arbiter.active_generation(), Some(handle.generation()));

        let report = handle.wait().unwrap();
        let heading = base.heading_deg();

        assert_eq!(report.outcome, TaskOutcome::Converged);
        assert!(report.final_error.abs() <= 5.0);
        assert!(heading >= 55.0 && heading <= 65.0, "heading = {}", heading);
        assert!(!arbiter.is_active());
        assert!(all_zero(&base));

        // Stopped, the heading stays put
        thread::sleep(Duration::from_millis(50));
        assert!((base.heading_deg() - heading).abs() < 1e-6);

        assert_eq!(arbiter.join_all().len(), 1);
    }

    #[test]
    fn test_rotate_across_wrap() {
        let (base, mut arbiter) = fast_setup();
        base.set_heading(170.0);

        let report = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: -160.0 })
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Converged);
        assert!(report.final_error.abs() <= 5.0);
    }

    #[test]
    fn test_translate_along_y() {
        let (base, mut arbiter) = fast_setup();

        let report = arbiter
            .start(ControlSetpoint::TranslateAlongAxis {
                distance_m: 0.5,
                axis: Axis::Y,
            })
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Converged);
        assert!((base.displacement_m(Axis::Y) - 0.5).abs() <= 0.06);
        assert!(base.displacement_m(Axis::X).abs() < 0.01);
        assert!(all_zero(&base));
    }

    #[test]
    fn test_translate_along_x() {
        let (base, mut arbiter) = fast_setup();

        let report = arbiter
            .start(ControlSetpoint::TranslateAlongAxis {
                distance_m: -0.3,
                axis: Axis::X,
            })
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::Converged);
        assert!((base.displacement_m(Axis::X) + 0.3).abs() <= 0.06);
    }

    #[test]
    fn test_cancel() {
        let (base, mut arbiter) = fast_setup();

        let handle = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: 120.0 })
            .unwrap();

        // Let the task make its first write
        thread::sleep(Duration::from_millis(20));

        let generation = handle.generation();
        assert_eq!(arbiter.cancel(), Some(generation));

        // The flag is clear and the drivebase stopped as soon as cancel returns
        assert!(!arbiter.is_active());
        assert!(all_zero(&base));

        let report = handle.wait().unwrap();
        assert_eq!(report.outcome, TaskOutcome::Cancelled);

        // The exited task left the drivebase alone
        assert!(all_zero(&base));
        assert_eq!(arbiter.cancel(), None);
    }

    #[test]
    fn test_last_caller_wins() {
        let (base, mut arbiter) = fast_setup();

        let first = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: 90.0 })
            .unwrap();
        thread::sleep(Duration::from_millis(20));

        let second = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: -90.0 })
            .unwrap();

        // Exactly one motion owns the drivebase, and it is the newest
        assert_eq!(arbiter.active_generation(), Some(second.generation()));

        let first_report = first.wait().unwrap();
        assert_eq!(first_report.outcome, TaskOutcome::Superseded);
        assert_eq!(arbiter.active_generation(), Some(second.generation()));

        let second_report = second.wait().unwrap();
        assert_eq!(second_report.outcome, TaskOutcome::Converged);
        assert!(!arbiter.is_active());
        assert!(all_zero(&base));

        assert_eq!(arbiter.reap().len() + arbiter.join_all().len(), 2);
        assert_eq!(arbiter.num_tasks(), 0);
    }

    #[test]
    fn test_manual_rejected_while_active() {
        let (base, mut arbiter) = fast_setup();

        arbiter.write_manual(&[0.2, 0.2, 0.2, 0.2]).unwrap();
        assert_eq!(base.wheel_powers(), [0.2; 4]);

        assert!(matches!(
            arbiter.write_manual(&[0.2, 0.2]),
            Err(MotionError::WrongDemandLength { expected: 4, found: 2 })
        ));

        let handle = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: 150.0 })
            .unwrap();

        assert!(matches!(
            arbiter.write_manual(&[1.0, 1.0, 1.0, 1.0]),
            Err(MotionError::AutoMotionActive(g)) if g == handle.generation()
        ));

        arbiter.cancel();
        arbiter.write_manual(&[0.0; 4]).unwrap();
        assert_eq!(handle.wait().unwrap().outcome, TaskOutcome::Cancelled);
    }

    #[test]
    fn test_sensor_fault() {
        let (base, mut arbiter) = fast_setup();
        base.set_sensor_fault(true);

        let start = Instant::now();
        let report = arbiter
            .start(ControlSetpoint::RotateToHeading { heading_deg: 60.0 })
            .unwrap()
            .wait()
            .unwrap();

        assert_eq!(report.outcome, TaskOutcome::SensorFault);
        assert_eq!(report.iterations, 0);
        assert!(report.final_error.is_nan());
        assert!(!arbiter.is_active());
        assert!(all_zero(&base));
        assert!(start.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_configuration() {
        let base = SimDrivebase::new(SimDrivebaseParams::default());

        let mut params = MotionParams::default();
        params.translate_x_multipliers = vec![1.0, -1.0];

        assert!(matches!(
            MotionArbiter::new(base.wheels(), base.clone(), params),
            Err(MotionError::MismatchedMultipliers { .. })
        ));
        assert!(matches!(
            MotionArbiter::new(Vec::new(), base, MotionParams::default()),
            Err(MotionError::EmptyGroup)
        ));
    }

    #[test]
    fn test_default_tuning() {
        let params = MotionParams::default();
        assert_eq!(params.rotate.epsilon, 5.0);
        assert_eq!(params.rotate.damping, 0.6);
        assert_eq!(params.rotate.settle_delay_ms, 500);
        assert_eq!(params.translate.damping, 0.4);
        assert!(TaskConfig::rotate_default().feedforward);
        assert!(!TaskConfig::translate_default().feedforward);
    }
}
