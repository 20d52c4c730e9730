//! # PID/PIDF control law
//!
//! A sample based control law: every call to [`PidEngine::step`] is one sample, so the gains
//! already include the loop period and no delta-time is taken.
//!
//! The law is
//!
//! ```text
//! u = k_p * e + i_term + k_d * (e_prev - e) - k_f * |rate - rate_prev|
//! ```
//!
//! where the integral accumulates `e` every sample but only contributes once the error has
//! stopped changing by more than the integral threshold, and the feedforward term is only present
//! when enabled. The output is unbounded, callers normalise it onto their actuators.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Default integral threshold, the change in error between two samples at or above which the
/// integral term is suppressed.
pub const DEFAULT_ITERM_THRESHOLD: f64 = 2.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// The gains of a controller. A gain left out of a parameter table is zero.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PidGains {
    pub k_p: f64,
    pub k_i: f64,
    pub k_d: f64,

    /// Feedforward gain on the magnitude of the change in rate between samples.
    pub k_f: f64,
}

/// A stateful PID/PIDF controller.
///
/// One engine is created per goal and dropped with it, integral and history never carry across
/// goals.
#[derive(Debug, Clone, Serialize)]
pub struct PidEngine {
    gains: PidGains,

    /// Change in error at or above which the integral term is suppressed
    iterm_threshold: f64,

    /// Whether the feedforward term is applied
    feedforward: bool,

    integral: f64,
    prev_error: f64,
    prev_rate: f64,
}

/// The output of one step, broken down by term.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct PidOutput {
    pub p_term: f64,
    pub i_term: f64,
    pub d_term: f64,
    pub f_term: f64,

    /// The total control output, the sum of the terms
    pub u: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl PidEngine {
    /// Create a new engine with zeroed history.
    pub fn new(gains: PidGains, iterm_threshold: f64, feedforward: bool) -> Self {
        Self {
            gains,
            iterm_threshold,
            feedforward,
            integral: 0.0,
            prev_error: 0.0,
            prev_rate: 0.0,
        }
    }

    /// Seed the previous error and rate with the first measurement, so that the first step sees
    /// no spurious derivative or feedforward kick.
    pub fn prime(&mut self, error: f64, rate: f64) {
        self.prev_error = error;
        self.prev_rate = rate;
    }

    /// Evaluate the control law for one sample.
    pub fn step(&mut self, error: f64, rate: f64) -> PidOutput {
        self.integral += error;

        let p_term = self.gains.k_p * error;

        let i_term = if (self.prev_error - error).abs() < self.iterm_threshold {
            self.gains.k_i * self.integral
        }
        else {
            0.0
        };

        let d_term = self.gains.k_d * (self.prev_error - error);

        let f_term = if self.feedforward {
            -self.gains.k_f * (rate - self.prev_rate).abs()
        }
        else {
            0.0
        };

        self.prev_error = error;
        self.prev_rate = rate;

        PidOutput {
            p_term,
            i_term,
            d_term,
            f_term,
            u: p_term + i_term + d_term + f_term,
        }
    }

    /// The accumulated integral.
    pub fn integral(&self) -> f64 {
        self.integral
    }
}
