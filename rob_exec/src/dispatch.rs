//! # Command dispatch
//!
//! The entry point of each command cycle. Reads both gamepads, routes the driver's inputs to
//! either manual driving or the automatic motions, routes the mechanism operator's inputs to the
//! mechanisms, then services every mechanism.
//!
//! The mechanism operator's pad:
//!
//! - `B` shoots at a fixed power, with the agitator on the right bumper
//! - `Y` shoots at a fixed speed, feeding once the flywheel is up to speed
//! - `A` toggles the gear mechanism
//! - `X` climbs while held
//! - The hat positions the servo gate
//!
//! The cycle never blocks on a motion. Automatic motions run on their own threads under the
//! [`MotionArbiter`], and manual driving is locked out while one owns the drivebase.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::vision::ContourPoints;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{sync::Arc, time::Instant};
use util::module::Mechanism;

use crate::{
    climber::{ClimberStatusReport, RopeClimber},
    drive,
    eqpt::{
        Actuator, Axis, Gamepad, GamepadState, HeadingSensor, LimitSwitch, RateEncoder, Servo,
    },
    gear_mech::{GearMech, GearMechError, GearStatusReport},
    motion::{ControlSetpoint, MotionArbiter, MotionError, TaskReport},
    params::RobExecParams,
    servo_gate::{ServoGate, ServoGateStatusReport},
    shooter::{Shooter, ShooterStatusReport},
    vision::{closest_peg_heading, strafe_distance, CameraCalcs},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchParams {
    /// Longest an automatic motion may run before it is cancelled, `None` to never time out.
    ///
    /// Units: seconds
    pub auto_timeout_s: Option<f64>,

    /// Meters of strafe per unit of target offset in the scaled camera frame.
    pub strafe_m_per_unit: f64,

    /// Flywheel power while the operator holds the open loop shoot button
    pub shooter_open_loop_power: f64,

    /// Flywheel speed held while the operator holds the closed loop shoot button
    pub shooter_rpm: f64,
}

/// Every piece of equipment the dispatcher drives.
pub struct DispatchEqpt {
    pub driver_pad: Arc<dyn Gamepad>,
    pub mech_pad: Arc<dyn Gamepad>,

    /// Drivebase wheels, {front-right, back-right, front-left, back-left}
    pub wheels: Vec<Arc<dyn Actuator>>,
    pub heading: Arc<dyn HeadingSensor>,

    pub gear_motor: Arc<dyn Actuator>,
    pub gear_lower: Arc<dyn LimitSwitch>,
    pub gear_upper: Arc<dyn LimitSwitch>,

    pub climber_motor: Arc<dyn Actuator>,
    pub climber_left_stop: Arc<dyn LimitSwitch>,
    pub climber_right_stop: Arc<dyn LimitSwitch>,

    pub flywheel: Arc<dyn Actuator>,
    pub agitator: Arc<dyn Actuator>,
    pub flywheel_encoder: Arc<dyn RateEncoder>,

    pub gate_servo: Arc<dyn Servo>,
}

pub struct CmdDispatch {
    driver_pad: Arc<dyn Gamepad>,
    mech_pad: Arc<dyn Gamepad>,
    heading: Arc<dyn HeadingSensor>,

    arbiter: MotionArbiter,
    gear: GearMech,
    climber: RopeClimber,
    shooter: Shooter,
    servo_gate: ServoGate,

    drive_params: drive::DriveParams,
    params: DispatchParams,
    calcs: CameraCalcs,

    field_oriented: bool,

    prev_driver: GamepadState,
    prev_mech: GamepadState,

    /// When the running automatic motion was started
    auto_start: Option<Instant>,
}

/// What happened during one command cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    pub field_oriented: bool,

    /// Generation of the automatic motion owning the drivebase at the end of the cycle
    pub auto_generation: Option<u64>,

    /// Manual wheel demands written this cycle
    pub manual_demands: Option<[f64; 4]>,

    /// Reports of motions which finished since the last cycle
    pub finished: Vec<TaskReport>,

    pub gear: GearStatusReport,
    pub climber: ClimberStatusReport,
    pub shooter: ShooterStatusReport,
    pub servo_gate: ServoGateStatusReport,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("Could not create the motion arbiter: {0}")]
    MotionInitError(MotionError),

    #[error("Could not create the gear mechanism: {0}")]
    GearInitError(GearMechError),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for DispatchParams {
    fn default() -> Self {
        Self {
            auto_timeout_s: None,
            strafe_m_per_unit: 0.5,
            shooter_open_loop_power: 0.70,
            shooter_rpm: 3000.0,
        }
    }
}

impl CmdDispatch {
    pub fn new(eqpt: DispatchEqpt, params: &RobExecParams) -> Result<Self, DispatchError> {
        let arbiter = MotionArbiter::new(eqpt.wheels, eqpt.heading.clone(), params.motion.clone())
            .map_err(DispatchError::MotionInitError)?;

        let gear = GearMech::new(
            eqpt.gear_motor,
            eqpt.gear_lower,
            eqpt.gear_upper,
            params.gear.clone(),
        )
        .map_err(DispatchError::GearInitError)?;

        let climber = RopeClimber::new(
            eqpt.climber_motor,
            eqpt.climber_left_stop,
            eqpt.climber_right_stop,
            params.climber.clone(),
        );

        let shooter = Shooter::new(
            eqpt.flywheel,
            eqpt.agitator,
            eqpt.flywheel_encoder,
            params.shooter.clone(),
        );

        let servo_gate = ServoGate::new(eqpt.gate_servo, params.servo_gate.clone());

        Ok(Self {
            driver_pad: eqpt.driver_pad,
            mech_pad: eqpt.mech_pad,
            heading: eqpt.heading,
            arbiter,
            gear,
            climber,
            shooter,
            servo_gate,
            drive_params: params.drive.clone(),
            params: params.dispatch.clone(),
            calcs: CameraCalcs::new(params.vision.res[0], params.vision.res[1]),
            field_oriented: false,
            prev_driver: GamepadState::default(),
            prev_mech: GamepadState::default(),
            auto_start: None,
        })
    }

    /// Run one command cycle.
    ///
    /// `gear_target` is the latest gear target table from the vision coprocessor.
    pub fn cycle(&mut self, gear_target: &ContourPoints) -> CycleReport {
        let driver = self.driver_pad.state();
        let mech = self.mech_pad.state();

        let finished = self.arbiter.reap();

        self.check_timeout();

        let manual_demands = self.process_driver(&driver, gear_target);
        self.process_mech(&mech);

        self.prev_driver = driver;
        self.prev_mech = mech;

        CycleReport {
            field_oriented: self.field_oriented,
            auto_generation: self.arbiter.active_generation(),
            manual_demands,
            finished,
            gear: self.gear.run(),
            climber: self.climber.run(),
            shooter: self.shooter.run(),
            servo_gate: self.servo_gate.run(),
        }
    }

    /// Cancel any motion and stop every mechanism.
    pub fn make_safe(&mut self) {
        self.arbiter.cancel();
        self.auto_start = None;

        self.gear.make_safe();
        self.climber.make_safe();
        self.shooter.make_safe();
        self.servo_gate.make_safe();
    }

    /// Wait for every motion thread to exit. Call [`CmdDispatch::make_safe`] first.
    pub fn join_motions(&mut self) -> Vec<TaskReport> {
        self.arbiter.join_all()
    }

    pub fn is_field_oriented(&self) -> bool {
        self.field_oriented
    }

    pub fn is_auto(&self) -> bool {
        self.arbiter.is_active()
    }

    fn check_timeout(&mut self) {
        if !self.arbiter.is_active() {
            self.auto_start = None;
            return;
        }

        if let (Some(timeout), Some(start)) = (self.params.auto_timeout_s, self.auto_start) {
            if start.elapsed().as_secs_f64() > timeout {
                warn!("Automatic motion timed out after {:.2} s, cancelling", timeout);
                self.arbiter.cancel();
                self.auto_start = None;
            }
        }
    }

    /// Handle the driver's pad, returning the manual demands if any were written.
    fn process_driver(
        &mut self,
        pad: &GamepadState,
        gear_target: &ContourPoints,
    ) -> Option<[f64; 4]> {
        let prev = self.prev_driver;

        if pad.left_stick && !prev.left_stick {
            self.field_oriented = !self.field_oriented;
            info!(
                "Driving {}",
                if self.field_oriented { "field oriented" } else { "robot oriented" }
            );
        }

        if self.arbiter.is_active() {
            if pad.a {
                self.arbiter.cancel();
                self.auto_start = None;
                info!("Automatic motion cancelled by the driver");
            }
            return None;
        }

        let heading = self.heading.heading_deg();

        let setpoint = if pad.x && !prev.x {
            Some(ControlSetpoint::RotateToHeading { heading_deg: 60.0 })
        }
        else if pad.b && !prev.b {
            Some(ControlSetpoint::RotateToHeading { heading_deg: -60.0 })
        }
        else if pad.y && !prev.y {
            Some(ControlSetpoint::RotateToHeading { heading_deg: 0.0 })
        }
        else if pad.back && !prev.back {
            if heading.is_finite() {
                Some(ControlSetpoint::RotateToHeading {
                    heading_deg: closest_peg_heading(heading),
                })
            }
            else {
                warn!("No heading available, cannot align to the closest peg");
                None
            }
        }
        else if pad.start && !prev.start {
            match strafe_distance(gear_target, &self.calcs, self.params.strafe_m_per_unit) {
                Some(d) => Some(ControlSetpoint::TranslateAlongAxis {
                    distance_m: d,
                    axis: Axis::X,
                }),
                None => {
                    warn!("No gear target in view, cannot align");
                    None
                }
            }
        }
        else {
            None
        };

        if let Some(sp) = setpoint {
            match self.arbiter.start(sp) {
                Ok(handle) => {
                    info!("Automatic motion {} started: {:?}", handle.generation(), sp);
                    self.auto_start = Some(Instant::now());
                    return None;
                }
                Err(e) => error!("Could not start automatic motion: {}", e),
            }
        }

        let demands = drive::mix(
            pad,
            heading,
            self.heading.rate_dps(),
            self.field_oriented,
            &self.drive_params,
        );

        match self.arbiter.write_manual(&demands) {
            Ok(()) => Some(demands),
            Err(e) => {
                warn!("Manual demands rejected: {}", e);
                None
            }
        }
    }

    /// Handle the mechanism operator's pad.
    fn process_mech(&mut self, pad: &GamepadState) {
        if pad.b {
            self.shooter.set_power(self.params.shooter_open_loop_power);
            self.shooter.set_agitator(pad.right_bumper);
        }
        else if pad.y {
            if let Err(e) = self.shooter.set_rpm(self.params.shooter_rpm) {
                error!("Could not start the shooter velocity loop: {}", e);
            }
            self.shooter.set_agitator(self.shooter.is_up_to_speed());
        }
        else {
            self.shooter.set_power(0.0);
            self.shooter.set_agitator(false);
        }

        if pad.a && !self.prev_mech.a {
            self.gear.toggle_state();
        }

        self.climber.update_enable(pad.x);

        self.servo_gate.update_pov(pad.pov_deg);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        eqpt::{
            sim::{
                SimDigitalInput, SimDrivebase, SimDrivebaseParams, SimFlywheel, SimGamepad,
                SimMotor, SimServo,
            },
            ActiveHigh, ActiveLow,
        },
        gear_mech::GearState,
        motion::TaskOutcome,
        shooter::ShooterMode,
    };
    use std::{thread, time::Duration};

    struct Rig {
        driver: Arc<SimGamepad>,
        mech: Arc<SimGamepad>,
        base: Arc<SimDrivebase>,
        climber_motor: Arc<SimMotor>,
        agitator: Arc<SimMotor>,
        gate_servo: Arc<SimServo>,
        dispatch: CmdDispatch,
    }

    fn rig(params: RobExecParams) -> Rig {
        let driver = Arc::new(SimGamepad::new());
        let mech = Arc::new(SimGamepad::new());
        let base = SimDrivebase::new(SimDrivebaseParams {
            time_scale: 10.0,
            ..Default::default()
        });

        let climber_motor = Arc::new(SimMotor::new());
        let flywheel = Arc::new(SimMotor::new());
        let agitator = Arc::new(SimMotor::new());
        let gate_servo = Arc::new(SimServo::new());

        let eqpt = DispatchEqpt {
            driver_pad: driver.clone(),
            mech_pad: mech.clone(),
            wheels: base.wheels(),
            heading: base.clone(),
            gear_motor: Arc::new(SimMotor::new()),
            gear_lower: Arc::new(ActiveHigh(Arc::new(SimDigitalInput::new(true)))),
            gear_upper: Arc::new(ActiveHigh(Arc::new(SimDigitalInput::new(false)))),
            climber_motor: climber_motor.clone(),
            climber_left_stop: Arc::new(ActiveLow(Arc::new(SimDigitalInput::new(true)))),
            climber_right_stop: Arc::new(ActiveLow(Arc::new(SimDigitalInput::new(true)))),
            flywheel: flywheel.clone(),
            agitator: agitator.clone(),
            flywheel_encoder: Arc::new(SimFlywheel::new(flywheel, Default::default())),
            gate_servo: gate_servo.clone(),
        };

        Rig {
            driver,
            mech,
            base,
            climber_motor,
            agitator,
            gate_servo,
            dispatch: CmdDispatch::new(eqpt, &params).unwrap(),
        }
    }

    fn fast_params() -> RobExecParams {
        let mut params = RobExecParams::default();
        params.motion.rotate.settle_delay_ms = 50;
        params.motion.translate.settle_delay_ms = 5;
        params
    }

    #[test]
    fn test_manual_drive() {
        let mut r = rig(fast_params());

        r.driver.set(GamepadState {
            left_y: -0.5,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());

        assert_eq!(report.manual_demands, Some([0.5; 4]));
        assert_eq!(r.base.wheel_powers(), [0.5; 4]);
        assert_eq!(report.auto_generation, None);
    }

    #[test]
    fn test_auto_motion_and_cancel() {
        let mut r = rig(fast_params());

        // Rising edge of X starts the rotation
        r.driver.set(GamepadState {
            x: true,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());
        let generation = report.auto_generation.unwrap();
        assert_eq!(report.manual_demands, None);

        // Holding X doesn't restart it, and manual demands are ignored
        r.driver.set(GamepadState {
            x: true,
            left_y: -1.0,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.auto_generation, Some(generation));
        assert_eq!(report.manual_demands, None);

        // A cancels
        r.driver.set(GamepadState {
            a: true,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.auto_generation, None);
        assert!(r.base.wheel_powers().iter().all(|p| *p == 0.0));

        let reports = r.dispatch.join_motions();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].outcome, TaskOutcome::Cancelled);
    }

    #[test]
    fn test_motion_completes() {
        let mut r = rig(fast_params());
        r.base.set_heading(40.0);

        // Back aligns to the closest peg, which is the right hand one
        r.driver.set(GamepadState {
            back: true,
            ..Default::default()
        });
        r.dispatch.cycle(&ContourPoints::none());
        assert!(r.dispatch.is_auto());

        r.driver.set(GamepadState::default());
        let mut finished = Vec::new();
        for _ in 0..500 {
            let report = r.dispatch.cycle(&ContourPoints::none());
            finished.extend(report.finished);
            if !finished.is_empty() {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }

        assert_eq!(finished.len(), 1);
        assert_eq!(finished[0].outcome, TaskOutcome::Converged);
        assert_eq!(
            finished[0].setpoint,
            ControlSetpoint::RotateToHeading { heading_deg: 60.0 }
        );

        // Manual driving is back
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.manual_demands, Some([0.0; 4]));
    }

    #[test]
    fn test_timeout() {
        let mut params = fast_params();
        params.dispatch.auto_timeout_s = Some(0.05);
        let mut r = rig(params);

        r.base.set_heading(170.0);
        r.driver.set(GamepadState {
            y: true,
            ..Default::default()
        });
        r.dispatch.cycle(&ContourPoints::none());
        assert!(r.dispatch.is_auto());

        thread::sleep(Duration::from_millis(100));
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.auto_generation, None);
        assert!(!r.dispatch.is_auto());
    }

    #[test]
    fn test_vision_strafe() {
        let mut r = rig(fast_params());

        r.driver.set(GamepadState {
            start: true,
            ..Default::default()
        });

        // No target, nothing starts and manual driving continues
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.auto_generation, None);
        assert!(report.manual_demands.is_some());

        r.driver.set(GamepadState::default());
        r.dispatch.cycle(&ContourPoints::none());

        r.driver.set(GamepadState {
            start: true,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints([440.0, 200.0, 520.0, 280.0]));
        assert!(report.auto_generation.is_some());

        r.dispatch.make_safe();
        let reports = r.dispatch.join_motions();
        match reports[0].setpoint {
            ControlSetpoint::TranslateAlongAxis { distance_m, axis } => {
                assert_eq!(axis, Axis::X);
                assert!((distance_m - 0.25).abs() < 1e-9);
            }
            sp => panic!("Expected a strafe, got {:?}", sp),
        }
    }

    #[test]
    fn test_field_toggle() {
        let mut r = rig(fast_params());

        r.driver.set(GamepadState {
            left_stick: true,
            ..Default::default()
        });
        assert!(r.dispatch.cycle(&ContourPoints::none()).field_oriented);

        // Held, no second toggle
        assert!(r.dispatch.cycle(&ContourPoints::none()).field_oriented);

        r.driver.set(GamepadState::default());
        r.dispatch.cycle(&ContourPoints::none());
        r.driver.set(GamepadState {
            left_stick: true,
            ..Default::default()
        });
        assert!(!r.dispatch.cycle(&ContourPoints::none()).field_oriented);
    }

    #[test]
    fn test_mechanisms() {
        let mut r = rig(fast_params());

        r.mech.set(GamepadState {
            a: true,
            x: true,
            b: true,
            right_bumper: true,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());

        assert_eq!(report.gear.state, GearState::MovingToExtended);
        assert_eq!(report.climber.power, 1.0);
        assert_eq!(r.climber_motor.power(), 1.0);
        assert_eq!(report.shooter.mode, ShooterMode::OpenLoop { power: 0.7 });
        assert_eq!(r.agitator.power(), -0.45);

        // Holding A doesn't toggle the gear again
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert!(report.gear.desire_extended);

        // Closed loop shooting, the agitator waits for the flywheel
        r.mech.set(GamepadState {
            y: true,
            ..Default::default()
        });
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.shooter.mode, ShooterMode::Velocity { rpm: 3000.0 });
        assert!(!report.shooter.agitator_on);
        assert_eq!(report.climber.power, 0.0);

        r.mech.set(GamepadState::default());
        let report = r.dispatch.cycle(&ContourPoints::none());
        assert!(matches!(report.shooter.mode, ShooterMode::OpenLoop { .. }));

        r.dispatch.make_safe();
        assert_eq!(r.agitator.power(), 0.0);
        assert_eq!(r.climber_motor.power(), 0.0);
    }

    #[test]
    fn test_servo_gate() {
        let mut r = rig(fast_params());

        let report = r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(report.servo_gate.position, 0.7);
        assert_eq!(r.gate_servo.position(), 0.7);

        // Hat down moves the servo and it stays there once released
        r.mech.set(GamepadState {
            pov_deg: Some(180),
            ..Default::default()
        });
        assert_eq!(r.dispatch.cycle(&ContourPoints::none()).servo_gate.position, 1.0);

        r.mech.set(GamepadState::default());
        assert_eq!(r.dispatch.cycle(&ContourPoints::none()).servo_gate.position, 1.0);
        assert_eq!(r.gate_servo.position(), 1.0);

        r.mech.set(GamepadState {
            pov_deg: Some(0),
            ..Default::default()
        });
        r.dispatch.cycle(&ContourPoints::none());
        assert_eq!(r.gate_servo.position(), 0.7);
    }
}
