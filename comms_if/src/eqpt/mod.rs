//! # Equipment Interface
//!
//! This module defines the interface structures which are exchanged with equipment outside the
//! control core.

// -----------------------------------------------------------------------------------------------
// MODULES
// -----------------------------------------------------------------------------------------------

pub mod gamepad;
pub mod vision;
