//! # Simulated equipment
//!
//! Software stand-ins for every piece of equipment, used by the executable when no hardware is
//! present and by the closed loop tests.
//!
//! The drivebase and flywheel models are integrated lazily: every read or write first advances
//! the model from the last update to now, holding the wheel powers constant over that interval.
//! A `time_scale` greater than one runs the model faster than wall clock time.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use nalgebra::{Rotation2, Vector2};
use serde::{Deserialize, Serialize};
use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Instant,
};
use util::maths::{clamp, wrap_deg_err};

use super::{
    Actuator, Axis, DigitalInput, Gamepad, GamepadState, HeadingSensor, LimitSwitch, RateEncoder,
    Servo,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Number of wheels on the drivebase, in {front-right, back-right, front-left, back-left} order.
pub const NUM_WHEELS: usize = 4;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A motor controller which remembers the last power it was given.
#[derive(Debug, Default)]
pub struct SimMotor {
    power_bits: AtomicU64,
}

/// A servo which remembers the last position it was given.
#[derive(Debug, Default)]
pub struct SimServo {
    position_bits: AtomicU64,
}

/// A digital input whose level is set by the test or the simulation.
#[derive(Debug, Default)]
pub struct SimDigitalInput {
    level: AtomicBool,
}

/// A gamepad whose state is set by the input script or a test.
#[derive(Debug, Default)]
pub struct SimGamepad {
    state: Mutex<GamepadState>,
}

/// Parameters of the simulated drivebase.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimDrivebaseParams {
    /// Yaw rate with full opposing power on each side.
    ///
    /// Units: degrees/second
    pub max_yaw_rate_dps: f64,

    /// Time constant of the yaw rate response to a change in wheel power.
    ///
    /// Units: seconds
    pub yaw_time_const_s: f64,

    /// Speed with full power on every wheel.
    ///
    /// Units: meters/second
    pub max_speed_ms: f64,

    /// Simulated seconds per wall clock second.
    pub time_scale: f64,
}

/// A mecanum drivebase model, providing the wheel actuators and a heading sensor.
///
/// Yaw rate follows the difference between the left and right side powers through a first order
/// lag. Translation follows the mecanum wheel mixing instantly and is integrated in the field
/// frame.
#[derive(Debug)]
pub struct SimDrivebase {
    params: SimDrivebaseParams,
    state: Mutex<DrivebaseState>,
    sensor_fault: AtomicBool,
}

/// Parameters of the simulated shooter flywheel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimFlywheelParams {
    /// Encoder rate at full power.
    ///
    /// Units: counts/second
    pub max_rate_cps: f64,

    /// Time constant of the flywheel.
    ///
    /// Units: seconds
    pub time_const_s: f64,

    /// Simulated seconds per wall clock second.
    pub time_scale: f64,
}

/// A shooter flywheel driven by a [`SimMotor`] and read back through its encoder.
#[derive(Debug)]
pub struct SimFlywheel {
    motor: Arc<SimMotor>,
    params: SimFlywheelParams,
    state: Mutex<(Instant, f64)>,
}

/// Parameters of a simulated mechanism travelling between two hard stops.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimTravelParams {
    /// Time to travel from one stop to the other at full power.
    ///
    /// Units: seconds
    pub travel_time_s: f64,

    /// Simulated seconds per wall clock second.
    pub time_scale: f64,
}

/// A mechanism driven by a [`SimMotor`] between a lower and an upper hard stop, such as the gear
/// mechanism or the rope climber.
///
/// Position is normalised, 0 at the lower stop and 1 at the upper stop. Positive power drives it
/// up.
#[derive(Debug)]
pub struct SimTravel {
    motor: Arc<SimMotor>,
    params: SimTravelParams,
    state: Mutex<(Instant, f64)>,
}

/// One end of a [`SimTravel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TravelEnd {
    Lower,
    Upper,
}

#[derive(Debug)]
struct DrivebaseState {
    last_update: Instant,
    powers: [f64; NUM_WHEELS],
    heading_deg: f64,
    rate_dps: f64,
    position_m: Vector2<f64>,
}

/// One wheel of the simulated drivebase.
struct SimWheel {
    base: Arc<SimDrivebase>,
    index: usize,
}

/// A hard stop at one end of a [`SimTravel`].
struct SimStop {
    travel: Arc<SimTravel>,
    end: TravelEnd,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimMotor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Actuator for SimMotor {
    fn set_power(&self, power: f64) {
        let power = clamp(&power, &-1.0, &1.0);
        self.power_bits.store(power.to_bits(), Ordering::Relaxed);
    }

    fn power(&self) -> f64 {
        f64::from_bits(self.power_bits.load(Ordering::Relaxed))
    }
}

impl SimServo {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Servo for SimServo {
    fn set_position(&self, position: f64) {
        let position = clamp(&position, &0.0, &1.0);
        self.position_bits.store(position.to_bits(), Ordering::Relaxed);
    }

    fn position(&self) -> f64 {
        f64::from_bits(self.position_bits.load(Ordering::Relaxed))
    }
}

impl SimDigitalInput {
    pub fn new(level: bool) -> Self {
        Self {
            level: AtomicBool::new(level),
        }
    }

    pub fn set(&self, level: bool) {
        self.level.store(level, Ordering::Relaxed);
    }
}

impl DigitalInput for SimDigitalInput {
    fn get(&self) -> bool {
        self.level.load(Ordering::Relaxed)
    }
}

impl SimGamepad {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, state: GamepadState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }
}

impl Gamepad for SimGamepad {
    fn state(&self) -> GamepadState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for SimDrivebaseParams {
    fn default() -> Self {
        Self {
            max_yaw_rate_dps: 180.0,
            yaw_time_const_s: 0.1,
            max_speed_ms: 2.0,
            time_scale: 1.0,
        }
    }
}

impl SimDrivebase {
    /// Create a new drivebase at rest, at the origin and facing 0 degrees.
    pub fn new(params: SimDrivebaseParams) -> Arc<Self> {
        Arc::new(Self {
            params,
            state: Mutex::new(DrivebaseState {
                last_update: Instant::now(),
                powers: [0.0; NUM_WHEELS],
                heading_deg: 0.0,
                rate_dps: 0.0,
                position_m: Vector2::zeros(),
            }),
            sensor_fault: AtomicBool::new(false),
        })
    }

    /// The wheel actuators, in {front-right, back-right, front-left, back-left} order.
    pub fn wheels(self: &Arc<Self>) -> Vec<Arc<dyn Actuator>> {
        (0..NUM_WHEELS)
            .map(|index| {
                Arc::new(SimWheel {
                    base: self.clone(),
                    index,
                }) as Arc<dyn Actuator>
            })
            .collect()
    }

    /// Place the drivebase at the given heading.
    pub fn set_heading(&self, heading_deg: f64) {
        let mut state = self.advance();
        state.heading_deg = wrap_deg_err(heading_deg, 0.0);
    }

    /// While set every heading sensor read returns `NaN`.
    pub fn set_sensor_fault(&self, fault: bool) {
        self.sensor_fault.store(fault, Ordering::Relaxed);
    }

    /// The powers currently applied to the wheels.
    pub fn wheel_powers(&self) -> [f64; NUM_WHEELS] {
        self.advance().powers
    }

    /// Advance the model to now, returning the locked state.
    fn advance(&self) -> std::sync::MutexGuard<'_, DrivebaseState> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let dt = (now - state.last_update).as_secs_f64() * self.params.time_scale;
        state.last_update = now;

        if dt <= 0.0 {
            return state;
        }

        let [fr, br, fl, bl] = state.powers;

        // Rotation, exact solution of the first order lag with a constant target rate
        let target_rate = self.params.max_yaw_rate_dps * ((fl + bl) - (fr + br)) / 4.0;
        let tau = self.params.yaw_time_const_s.max(1e-6);
        let decay = (-dt / tau).exp();
        let rate_0 = state.rate_dps;

        let heading = state.heading_deg + target_rate * dt + (rate_0 - target_rate) * tau * (1.0 - decay);
        state.rate_dps = target_rate + (rate_0 - target_rate) * decay;

        // Translation, body frame velocity rotated into the field frame. Heading is positive
        // clockwise so the body to field rotation is by minus the heading.
        let vel_body = Vector2::new(-fr + br + fl - bl, fr + br + fl + bl) * (self.params.max_speed_ms / 4.0);
        let vel_field = Rotation2::new(-state.heading_deg.to_radians()) * vel_body;
        state.position_m += vel_field * dt;

        state.heading_deg = wrap_deg_err(heading, 0.0);

        state
    }

    /// Set every wheel at once, so the model never integrates a partial write.
    pub fn set_powers(&self, powers: [f64; NUM_WHEELS]) {
        let mut state = self.advance();
        for (p, d) in state.powers.iter_mut().zip(powers.iter()) {
            *p = clamp(d, &-1.0, &1.0);
        }
    }

    fn set_wheel(&self, index: usize, power: f64) {
        let mut state = self.advance();
        if let Some(p) = state.powers.get_mut(index) {
            *p = clamp(&power, &-1.0, &1.0);
        }
    }
}

impl HeadingSensor for SimDrivebase {
    fn heading_deg(&self) -> f64 {
        if self.sensor_fault.load(Ordering::Relaxed) {
            return std::f64::NAN;
        }
        self.advance().heading_deg
    }

    fn rate_dps(&self) -> f64 {
        if self.sensor_fault.load(Ordering::Relaxed) {
            return std::f64::NAN;
        }
        self.advance().rate_dps
    }

    fn displacement_m(&self, axis: Axis) -> f64 {
        if self.sensor_fault.load(Ordering::Relaxed) {
            return std::f64::NAN;
        }
        let state = self.advance();
        match axis {
            Axis::X => state.position_m.x,
            Axis::Y => state.position_m.y,
        }
    }
}

impl Actuator for SimWheel {
    fn set_power(&self, power: f64) {
        self.base.set_wheel(self.index, power);
    }

    fn power(&self) -> f64 {
        self.base.wheel_powers().get(self.index).copied().unwrap_or(0.0)
    }
}

impl Default for SimFlywheelParams {
    fn default() -> Self {
        Self {
            max_rate_cps: 60_000.0,
            time_const_s: 0.2,
            time_scale: 1.0,
        }
    }
}

impl SimFlywheel {
    pub fn new(motor: Arc<SimMotor>, params: SimFlywheelParams) -> Self {
        Self {
            motor,
            params,
            state: Mutex::new((Instant::now(), 0.0)),
        }
    }
}

impl RateEncoder for SimFlywheel {
    fn rate(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let dt = (now - state.0).as_secs_f64() * self.params.time_scale;
        let target = self.params.max_rate_cps * self.motor.power();
        let decay = (-dt / self.params.time_const_s.max(1e-6)).exp();

        state.0 = now;
        state.1 = target + (state.1 - target) * decay;

        state.1
    }
}

impl Default for SimTravelParams {
    fn default() -> Self {
        Self {
            travel_time_s: 1.0,
            time_scale: 1.0,
        }
    }
}

impl SimTravel {
    /// Create a new mechanism resting at the given end.
    pub fn new(motor: Arc<SimMotor>, start: TravelEnd, params: SimTravelParams) -> Arc<Self> {
        let position = match start {
            TravelEnd::Lower => 0.0,
            TravelEnd::Upper => 1.0,
        };

        Arc::new(Self {
            motor,
            params,
            state: Mutex::new((Instant::now(), position)),
        })
    }

    /// The hard stop at one end, tripped while the mechanism is against it.
    pub fn stop(self: &Arc<Self>, end: TravelEnd) -> Arc<dyn LimitSwitch> {
        Arc::new(SimStop {
            travel: self.clone(),
            end,
        })
    }

    /// Normalised position between the stops.
    pub fn position(&self) -> f64 {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);

        let now = Instant::now();
        let dt = (now - state.0).as_secs_f64() * self.params.time_scale;
        let speed = self.motor.power() / self.params.travel_time_s.max(1e-6);

        state.0 = now;
        state.1 = clamp(&(state.1 + speed * dt), &0.0, &1.0);

        state.1
    }
}

impl LimitSwitch for SimStop {
    fn is_tripped(&self) -> bool {
        let position = self.travel.position();
        match self.end {
            TravelEnd::Lower => position <= 0.0,
            TravelEnd::Upper => position >= 1.0,
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use std::{thread, time::Duration};

    #[test]
    fn test_motor_clamps() {
        let m = SimMotor::new();
        m.set_power(0.3);
        assert_eq!(m.power(), 0.3);
        m.set_power(-4.0);
        assert_eq!(m.power(), -1.0);

        let s = SimServo::new();
        s.set_position(0.7);
        assert_eq!(s.position(), 0.7);
        s.set_position(1.5);
        assert_eq!(s.position(), 1.0);
    }

    #[test]
    fn test_drivebase_rotation_sense() {
        let base = SimDrivebase::new(SimDrivebaseParams {
            time_scale: 10.0,
            ..Default::default()
        });

        // Right side backwards, left side forwards turns clockwise on the spot
        base.set_powers([-0.5, -0.5, 0.5, 0.5]);

        thread::sleep(Duration::from_millis(50));

        assert!(base.heading_deg() > 0.0);
        assert!(base.rate_dps() > 0.0);
        assert!(base.displacement_m(Axis::X).abs() < 1e-9);
        assert!(base.displacement_m(Axis::Y).abs() < 1e-9);
    }

    #[test]
    fn test_drivebase_translation_sense() {
        let base = SimDrivebase::new(SimDrivebaseParams {
            time_scale: 10.0,
            ..Default::default()
        });

        // Strafe right
        base.set_powers([-0.5, 0.5, 0.5, -0.5]);
        thread::sleep(Duration::from_millis(20));
        base.set_powers([0.0; NUM_WHEELS]);

        let x = base.displacement_m(Axis::X);
        assert!(x > 0.0);
        assert!(base.displacement_m(Axis::Y).abs() < 1e-9);
        assert!(base.heading_deg().abs() < 1e-9);

        // Stationary once the wheels stop
        thread::sleep(Duration::from_millis(10));
        assert_eq!(base.displacement_m(Axis::X), x);
    }

    #[test]
    fn test_wheel_by_wheel_writes() {
        let base = SimDrivebase::new(SimDrivebaseParams {
            time_scale: 10.0,
            ..Default::default()
        });
        let wheels = base.wheels();

        // Writes through the wheel actuators land on the model
        for (w, p) in wheels.iter().zip([-0.5, -0.5, 0.5, 0.5].iter()) {
            w.set_power(*p);
        }
        assert_eq!(base.wheel_powers(), [-0.5, -0.5, 0.5, 0.5]);
        assert_eq!(wheels[2].power(), 0.5);

        thread::sleep(Duration::from_millis(50));

        assert!(base.heading_deg() > 0.0);
        assert!(base.rate_dps() > 0.0);
    }

    #[test]
    fn test_flywheel_spins_up() {
        let motor = Arc::new(SimMotor::new());
        let wheel = SimFlywheel::new(motor.clone(), SimFlywheelParams {
            time_scale: 10.0,
            ..Default::default()
        });

        assert_eq!(wheel.rate(), 0.0);
        motor.set_power(0.5);
        thread::sleep(Duration::from_millis(200));

        // Two simulated seconds is ten time constants
        assert!((wheel.rate() - 30_000.0).abs() < 10.0);
    }

    #[test]
    fn test_travel_between_stops() {
        let motor = Arc::new(SimMotor::new());
        let travel = SimTravel::new(motor.clone(), TravelEnd::Lower, SimTravelParams {
            travel_time_s: 1.0,
            time_scale: 10.0,
        });
        let lower = travel.stop(TravelEnd::Lower);
        let upper = travel.stop(TravelEnd::Upper);

        assert!(lower.is_tripped());
        assert!(!upper.is_tripped());

        // Unpowered it stays put
        thread::sleep(Duration::from_millis(10));
        assert!(lower.is_tripped());

        motor.set_power(1.0);
        thread::sleep(Duration::from_millis(10));
        assert!(!lower.is_tripped());
        assert!(!upper.is_tripped());

        thread::sleep(Duration::from_millis(150));
        assert!(upper.is_tripped());
        assert_eq!(travel.position(), 1.0);

        motor.set_power(-1.0);
        thread::sleep(Duration::from_millis(150));
        assert!(lower.is_tripped());
    }
}
