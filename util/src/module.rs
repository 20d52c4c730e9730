//! Module interfaces
//!
//! Every mechanism driven from the command dispatch loop shall implement the
//! items in this module.

// ---------------------------------------------------------------------------
// MECHANISM
// ---------------------------------------------------------------------------

/// A mechanism which is serviced once per command cycle.
///
/// Demands (toggles, enables, setpoints) are latched by the mechanism's own
/// methods during the cycle, then `run` turns the latched demands and the
/// current sensor readings into actuator commands.
pub trait Mechanism {
    /// A report on the status of the cyclic processing.
    type StatusReport;

    /// Main cyclic processing function.
    ///
    /// # Outputs
    /// - A status report describing what the mechanism is doing this cycle.
    fn run(&mut self) -> Self::StatusReport;

    /// Bring the mechanism to a stop, zeroing every motor it owns.
    ///
    /// Must never fail, it is used on shutdown and when the loop overruns.
    fn make_safe(&mut self);
}
