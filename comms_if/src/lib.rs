//! # Communications interface crate.
//!
//! Provides all common communications interfaces for the software: the
//! equipment data exchanged with the gamepads and the vision coprocessor, and
//! the networking used to receive it.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

/// Data definitions for equipment (gamepads, vision coprocessor)
pub mod eqpt;

/// Network module
pub mod net;
