//! # Input script interpreter
//!
//! Input scripts replace the physical gamepads with a timed list of gamepad frames, allowing a
//! whole match to be replayed against the simulated equipment. Each entry in the script has the
//! form
//!
//! ```text
//! <time_s>: <json GamepadFrame>;
//! ```
//!
//! for example `1.5: {"pad": "Driver", "state": {"x": true}};`. Anything outside of an entry is
//! ignored, so comments can be written on their own lines.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use regex::RegexBuilder;
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

// Internal
use comms_if::eqpt::gamepad::GamepadFrame;

// ---------------------------------------------------------------------------
// CONSTANTS
// ---------------------------------------------------------------------------

/// Pattern matching a single script entry, capturing the time and the frame payload.
const ENTRY_PATTERN: &str = r"^\s*(\d+(\.\d+)?)\s*:\s*([^;]*);";

// ---------------------------------------------------------------------------
// DATA STRUCTURES
// ---------------------------------------------------------------------------

/// A frame which is scripted to be applied at a specific time.
struct ScriptedFrame {
    /// Session time at which the frame becomes active
    exec_time_s: f64,

    frame: GamepadFrame,
}

/// A script interpreter.
///
/// After loading use `get_pending_frames` once per cycle to acquire the frames that have become
/// due.
pub struct ScriptInterpreter {
    _script_path: PathBuf,
    frames: VecDeque<ScriptedFrame>,
}

// ---------------------------------------------------------------------------
// ENUMERATIONS
// ---------------------------------------------------------------------------

#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("Could not find the script at {0:?}")]
    ScriptNotFound(PathBuf),

    #[error("Could not load the script: {0}")]
    ScriptLoadError(std::io::Error),

    #[error("The script is empty (or is so bad it can't be read)")]
    ScriptEmpty,

    #[error("Could not build the script pattern: {0}")]
    PatternError(regex::Error),

    #[error("Script contains an invalid timestamp: {0}. Should be a float (like 1.0)")]
    InvalidTimestamp(String),

    #[error("Script contains an invalid gamepad frame at {0} s: {1}")]
    InvalidFrame(f64, serde_json::Error),

    #[error("Script entries must be in time order, {0} s follows {1} s")]
    OutOfOrder(f64, f64),
}

/// Frames which are due to be applied.
#[derive(Debug, PartialEq)]
pub enum PendingFrames {
    None,
    Some(Vec<GamepadFrame>),
    EndOfScript,
}

// ---------------------------------------------------------------------------
// IMPLEMENTATIONS
// ---------------------------------------------------------------------------

impl ScriptInterpreter {
    /// Create a new interpreter from the given script path.
    pub fn new<P: AsRef<Path>>(script_path: P) -> Result<Self, ScriptError> {
        let path = PathBuf::from(script_path.as_ref());

        if !path.exists() {
            return Err(ScriptError::ScriptNotFound(path));
        }

        let script = fs::read_to_string(&path).map_err(ScriptError::ScriptLoadError)?;

        let frames = parse(&script)?;

        Ok(Self {
            _script_path: path,
            frames,
        })
    }

    /// Create a new interpreter from the script text itself.
    pub fn from_str(script: &str) -> Result<Self, ScriptError> {
        Ok(Self {
            _script_path: PathBuf::new(),
            frames: parse(script)?,
        })
    }

    /// Return the frames whose time is at or before `current_time_s`.
    pub fn get_pending_frames(&mut self, current_time_s: f64) -> PendingFrames {
        if self.frames.is_empty() {
            return PendingFrames::EndOfScript;
        }

        let mut due = Vec::new();

        while let Some(f) = self.frames.front() {
            if f.exec_time_s > current_time_s {
                break;
            }

            if let Some(f) = self.frames.pop_front() {
                due.push(f.frame);
            }
        }

        if due.is_empty() {
            PendingFrames::None
        }
        else {
            PendingFrames::Some(due)
        }
    }

    /// Get the number of frames remaining in the script
    pub fn get_num_frames(&self) -> usize {
        self.frames.len()
    }

    /// Get the length of the script in seconds
    pub fn get_duration(&self) -> f64 {
        match self.frames.back() {
            Some(f) => f.exec_time_s,
            None => 0f64,
        }
    }
}

// ---------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ---------------------------------------------------------------------------

fn parse(script: &str) -> Result<VecDeque<ScriptedFrame>, ScriptError> {
    let re = RegexBuilder::new(ENTRY_PATTERN)
        .multi_line(true)
        .build()
        .map_err(ScriptError::PatternError)?;

    let mut frames: VecDeque<ScriptedFrame> = VecDeque::new();

    for cap in re.captures_iter(script) {
        let time_str = cap.get(1).map(|m| m.as_str()).unwrap_or_default();
        let exec_time_s: f64 = time_str
            .parse()
            .map_err(|e| ScriptError::InvalidTimestamp(format!("{}", e)))?;

        if let Some(prev) = frames.back() {
            if exec_time_s < prev.exec_time_s {
                return Err(ScriptError::OutOfOrder(exec_time_s, prev.exec_time_s));
            }
        }

        let payload = cap.get(3).map(|m| m.as_str()).unwrap_or_default();
        let frame: GamepadFrame = serde_json::from_str(payload)
            .map_err(|e| ScriptError::InvalidFrame(exec_time_s, e))?;

        frames.push_back(ScriptedFrame { exec_time_s, frame });
    }

    if frames.is_empty() {
        return Err(ScriptError::ScriptEmpty);
    }

    Ok(frames)
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::gamepad::PadId;

    const SCRIPT: &str = r#"
        # Turn to the left peg then cancel
        0.0: {"pad": "Driver", "state": {}};
        1.5: {"pad": "Driver", "state": {"x": true}};
        1.5: {"pad": "Mech", "state": {"a": true}};
        4.0: {"pad": "Driver", "state": {"a": true, "left_y": -0.5}};
    "#;

    #[test]
    fn test_parse_script() {
        let si = ScriptInterpreter::from_str(SCRIPT).unwrap();
        assert_eq!(si.get_num_frames(), 4);
        assert_eq!(si.get_duration(), 4.0);
    }

    #[test]
    fn test_pending_frames() {
        let mut si = ScriptInterpreter::from_str(SCRIPT).unwrap();

        match si.get_pending_frames(0.5) {
            PendingFrames::Some(v) => assert_eq!(v.len(), 1),
            p => panic!("Expected one frame, got {:?}", p),
        }

        assert_eq!(si.get_pending_frames(1.0), PendingFrames::None);

        match si.get_pending_frames(2.0) {
            PendingFrames::Some(v) => {
                assert_eq!(v.len(), 2);
                assert_eq!(v[0].pad, PadId::Driver);
                assert!(v[0].state.x);
                assert_eq!(v[1].pad, PadId::Mech);
                assert!(v[1].state.a);
            }
            p => panic!("Expected two frames, got {:?}", p),
        }

        match si.get_pending_frames(10.0) {
            PendingFrames::Some(v) => assert_eq!(v[0].state.left_y, -0.5),
            p => panic!("Expected one frame, got {:?}", p),
        }

        assert_eq!(si.get_pending_frames(11.0), PendingFrames::EndOfScript);
    }

    #[test]
    fn test_invalid_scripts() {
        assert!(matches!(
            ScriptInterpreter::from_str("nothing here"),
            Err(ScriptError::ScriptEmpty)
        ));
        assert!(matches!(
            ScriptInterpreter::from_str("1.0: {\"pad\": \"Nobody\"};"),
            Err(ScriptError::InvalidFrame(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::from_str(
                "2.0: {\"pad\": \"Driver\", \"state\": {}};\n1.0: {\"pad\": \"Driver\", \"state\": {}};"
            ),
            Err(ScriptError::OutOfOrder(_, _))
        ));
        assert!(matches!(
            ScriptInterpreter::new("/definitely/not/a/script.txt"),
            Err(ScriptError::ScriptNotFound(_))
        ));
    }

    #[test]
    fn test_demo_script() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("../scripts/demo.txt");
        let si = ScriptInterpreter::new(path).unwrap();

        assert!(si.get_num_frames() > 10);
        assert_eq!(si.get_duration(), 34.0);
    }
}
