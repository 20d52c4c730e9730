//! # Robot library.
//!
//! This library holds the motion and mechanism control of the robot, so that the executable, its
//! tests and any other crate in the workspace can drive the same code.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Rope climber - winds the rope while enabled and clear of the hard stops
pub mod climber;

/// Command dispatch - the per-cycle entry point reading the gamepads and driving everything else
pub mod dispatch;

/// Drivebase mixing - converts driver inputs into mecanum wheel demands
pub mod drive;

/// Equipment interfaces - the actuator, sensor and input traits plus their simulated versions
pub mod eqpt;

/// Gear mechanism - two hard stop state machine
pub mod gear_mech;

/// Motion arbitration - runs closed loop drivebase motions on their own threads
pub mod motion;

/// Executable parameters
pub mod params;

/// PID/PIDF control law
pub mod pid;

/// Servo gate - a servo latched to positions picked with the point of view hat
pub mod servo_gate;

/// Ball shooter - open loop power or a closed loop velocity loop
pub mod shooter;

/// Vision - camera geometry and the coprocessor client
pub mod vision;
