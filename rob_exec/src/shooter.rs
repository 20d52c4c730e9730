//! # Ball shooter
//!
//! The shooter flywheel is either driven open loop at a fixed power, or held at an RPM by a
//! velocity loop running on its own thread. The agitator feeding balls into the flywheel is
//! driven from the command cycle.
//!
//! While the velocity loop runs it is the only writer of the flywheel motor. Every open loop
//! command stops the loop first.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread::{self, JoinHandle},
    time::Duration,
};
use util::{maths::clamp, module::Mechanism};

use crate::{
    eqpt::{Actuator, RateEncoder},
    pid::{PidEngine, PidGains},
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShooterParams {
    /// Agitator power while feeding
    pub agitator_power: f64,

    /// Encoder counts per flywheel revolution
    pub counts_per_rev: f64,

    /// Rate error under which the flywheel is up to speed.
    ///
    /// Units: counts/second
    pub up_to_speed_epsilon_cps: f64,

    /// Change in RPM demand needed to restart the velocity loop.
    pub rpm_change_epsilon: f64,

    /// Velocity loop gains, on the rate error in counts/second
    pub gains: PidGains,

    /// Velocity loop period.
    ///
    /// Units: milliseconds
    pub loop_period_ms: u64,
}

pub struct Shooter {
    flywheel: Arc<dyn Actuator>,
    agitator: Arc<dyn Actuator>,
    encoder: Arc<dyn RateEncoder>,

    params: ShooterParams,

    /// RPM the velocity loop is holding, zero when open loop
    set_rpm: f64,

    agitator_on: bool,

    up_to_speed: Arc<AtomicBool>,

    velocity_loop: Option<VelocityLoop>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ShooterStatusReport {
    pub mode: ShooterMode,
    pub up_to_speed: bool,
    pub agitator_on: bool,
}

struct VelocityLoop {
    stop: Arc<AtomicBool>,
    jh: JoinHandle<()>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub enum ShooterMode {
    OpenLoop { power: f64 },
    Velocity { rpm: f64 },
}

#[derive(Debug, thiserror::Error)]
pub enum ShooterError {
    #[error("RPM demand must be a finite number, found {0}")]
    InvalidRpm(f64),

    #[error("Could not spawn the velocity loop thread: {0}")]
    SpawnFailed(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for ShooterParams {
    fn default() -> Self {
        Self {
            agitator_power: -0.45,
            counts_per_rev: 600.0,
            up_to_speed_epsilon_cps: 25.0,
            rpm_change_epsilon: 25.0,
            gains: PidGains {
                k_p: 5e-5,
                k_i: 2e-6,
                k_d: 0.0,
                k_f: 0.0,
            },
            loop_period_ms: 10,
        }
    }
}

impl Shooter {
    pub fn new(
        flywheel: Arc<dyn Actuator>,
        agitator: Arc<dyn Actuator>,
        encoder: Arc<dyn RateEncoder>,
        params: ShooterParams,
    ) -> Self {
        Self {
            flywheel,
            agitator,
            encoder,
            params,
            set_rpm: 0.0,
            agitator_on: false,
            up_to_speed: Arc::new(AtomicBool::new(false)),
            velocity_loop: None,
        }
    }

    /// Drive the flywheel open loop, stopping the velocity loop if it is running.
    pub fn set_power(&mut self, power: f64) {
        self.stop_loop();
        self.flywheel.set_power(power);
    }

    /// Hold the flywheel at the given RPM.
    ///
    /// A zero demand stops the loop. A running loop is only restarted if the demand has changed by
    /// more than the RPM change epsilon.
    pub fn set_rpm(&mut self, rpm: f64) -> Result<(), ShooterError> {
        if !rpm.is_finite() {
            return Err(ShooterError::InvalidRpm(rpm));
        }

        if rpm == 0.0 {
            self.stop_loop();
            self.flywheel.set_power(0.0);
            return Ok(());
        }

        if self.velocity_loop.is_some() && (rpm - self.set_rpm).abs() <= self.params.rpm_change_epsilon {
            return Ok(());
        }

        self.stop_loop();

        let desired_cps = rpm * self.params.counts_per_rev / 60.0;
        let stop = Arc::new(AtomicBool::new(false));

        let ctx = LoopContext {
            desired_cps,
            flywheel: self.flywheel.clone(),
            encoder: self.encoder.clone(),
            params: self.params.clone(),
            stop: stop.clone(),
            up_to_speed: self.up_to_speed.clone(),
        };

        let jh = thread::Builder::new()
            .name("shooter_velocity".into())
            .spawn(move || ctx.run())
            .map_err(ShooterError::SpawnFailed)?;

        info!("Shooter velocity loop started at {:.0} RPM", rpm);

        self.set_rpm = rpm;
        self.velocity_loop = Some(VelocityLoop { stop, jh });

        Ok(())
    }

    pub fn is_up_to_speed(&self) -> bool {
        self.up_to_speed.load(Ordering::Relaxed)
    }

    /// Set whether the agitator runs, applied on the next `run`.
    pub fn set_agitator(&mut self, enabled: bool) {
        self.agitator_on = enabled;
    }

    /// Stop the velocity loop and zero both motors.
    pub fn disable(&mut self) {
        self.stop_loop();
        self.agitator_on = false;
        self.flywheel.set_power(0.0);
        self.agitator.set_power(0.0);
    }

    pub fn mode(&self) -> ShooterMode {
        match self.velocity_loop {
            Some(_) => ShooterMode::Velocity { rpm: self.set_rpm },
            None => ShooterMode::OpenLoop {
                power: self.flywheel.power(),
            },
        }
    }

    fn stop_loop(&mut self) {
        if let Some(vl) = self.velocity_loop.take() {
            vl.stop.store(true, Ordering::Relaxed);
            if vl.jh.join().is_err() {
                warn!("Shooter velocity loop panicked");
            }
            debug!("Shooter velocity loop stopped");
        }

        self.set_rpm = 0.0;
        self.up_to_speed.store(false, Ordering::Relaxed);
    }
}

impl Mechanism for Shooter {
    type StatusReport = ShooterStatusReport;

    fn run(&mut self) -> Self::StatusReport {
        self.agitator.set_power(if self.agitator_on {
            self.params.agitator_power
        }
        else {
            0.0
        });

        ShooterStatusReport {
            mode: self.mode(),
            up_to_speed: self.is_up_to_speed(),
            agitator_on: self.agitator_on,
        }
    }

    fn make_safe(&mut self) {
        self.disable();
    }
}

impl Drop for Shooter {
    fn drop(&mut self) {
        self.stop_loop();
    }
}

/// Everything the velocity loop thread needs.
struct LoopContext {
    desired_cps: f64,
    flywheel: Arc<dyn Actuator>,
    encoder: Arc<dyn RateEncoder>,
    params: ShooterParams,
    stop: Arc<AtomicBool>,
    up_to_speed: Arc<AtomicBool>,
}

impl LoopContext {
    fn run(self) {
        // No integral suppression on the velocity loop
        let mut pid = PidEngine::new(self.params.gains, std::f64::INFINITY, false);
        let period = Duration::from_millis(self.params.loop_period_ms);

        let rate = self.encoder.rate();
        if rate.is_finite() {
            pid.prime(self.desired_cps - rate, 0.0);
        }

        while !self.stop.load(Ordering::Relaxed) {
            let rate = self.encoder.rate();

            if !rate.is_finite() {
                warn!("Shooter encoder returned an invalid rate");
                self.flywheel.set_power(0.0);
                self.up_to_speed.store(false, Ordering::Relaxed);
                thread::sleep(period);
                continue;
            }

            let error = self.desired_cps - rate;
            self.up_to_speed
                .store(error.abs() < self.params.up_to_speed_epsilon_cps, Ordering::Relaxed);

            let out = pid.step(error, 0.0);
            self.flywheel.set_power(clamp(&out.u, &-1.0, &1.0));

            thread::sleep(period);
        }

        self.flywheel.set_power(0.0);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::eqpt::sim::{SimFlywheel, SimFlywheelParams, SimMotor};
    use std::time::Instant;

    struct Rig {
        flywheel: Arc<SimMotor>,
        agitator: Arc<SimMotor>,
        shooter: Shooter,
    }

    fn rig() -> Rig {
        let flywheel = Arc::new(SimMotor::new());
        let agitator = Arc::new(SimMotor::new());
        let encoder = Arc::new(SimFlywheel::new(
            flywheel.clone(),
            SimFlywheelParams {
                time_scale: 5.0,
                ..Default::default()
            },
        ));

        let shooter = Shooter::new(
            flywheel.clone(),
            agitator.clone(),
            encoder,
            ShooterParams {
                loop_period_ms: 5,
                ..Default::default()
            },
        );

        Rig {
            flywheel,
            agitator,
            shooter,
        }
    }

    #[test]
    fn test_open_loop() {
        let mut r = rig();

        r.shooter.set_power(0.7);
        r.shooter.set_agitator(true);
        let report = r.shooter.run();

        assert_eq!(report.mode, ShooterMode::OpenLoop { power: 0.7 });
        assert_eq!(r.flywheel.power(), 0.7);
        assert_eq!(r.agitator.power(), -0.45);

        r.shooter.set_agitator(false);
        r.shooter.run();
        assert_eq!(r.agitator.power(), 0.0);
    }

    #[test]
    fn test_velocity_loop_reaches_speed() {
        let mut r = rig();

        r.shooter.set_rpm(3000.0).unwrap();
        assert_eq!(r.shooter.mode(), ShooterMode::Velocity { rpm: 3000.0 });

        let start = Instant::now();
        while !r.shooter.is_up_to_speed() {
            assert!(
                start.elapsed() < Duration::from_secs(10),
                "Flywheel never reached speed"
            );
            thread::sleep(Duration::from_millis(5));
        }

        assert!(r.flywheel.power() > 0.0 && r.flywheel.power() <= 1.0);

        // A small change doesn't restart the loop
        r.shooter.set_rpm(3010.0).unwrap();
        assert_eq!(r.shooter.mode(), ShooterMode::Velocity { rpm: 3000.0 });

        // A large change does
        r.shooter.set_rpm(1500.0).unwrap();
        assert_eq!(r.shooter.mode(), ShooterMode::Velocity { rpm: 1500.0 });
        assert!(!r.shooter.is_up_to_speed());
    }

    #[test]
    fn test_stop_and_disable() {
        let mut r = rig();

        r.shooter.set_rpm(2000.0).unwrap();
        thread::sleep(Duration::from_millis(20));

        r.shooter.set_rpm(0.0).unwrap();
        assert!(matches!(r.shooter.mode(), ShooterMode::OpenLoop { .. }));
        assert_eq!(r.flywheel.power(), 0.0);

        r.shooter.set_rpm(2000.0).unwrap();
        r.shooter.set_agitator(true);
        r.shooter.run();
        thread::sleep(Duration::from_millis(20));

        r.shooter.disable();
        assert_eq!(r.flywheel.power(), 0.0);
        assert_eq!(r.agitator.power(), 0.0);
        assert!(!r.shooter.is_up_to_speed());

        // Open loop demands take over from the loop
        r.shooter.set_rpm(2000.0).unwrap();
        r.shooter.set_power(0.5);
        assert_eq!(r.shooter.mode(), ShooterMode::OpenLoop { power: 0.5 });

        assert!(matches!(
            r.shooter.set_rpm(std::f64::NAN),
            Err(ShooterError::InvalidRpm(_))
        ));
    }
}
