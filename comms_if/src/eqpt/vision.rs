//! # Vision Equipment Data
//!
//! The vision coprocessor publishes the two contour points it found for each target as a small
//! key-value table. Missing keys read as `-1`, and a negative value in the last slot means that no
//! target was detected.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Keys of the contour table, in slot order.
pub const CONTOUR_KEYS: [&str; 4] = ["pointOneX", "pointOneY", "pointTwoX", "pointTwoY"];

/// Value used for any key missing from a table.
pub const MISSING_VALUE: f64 = -1.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Raw contour tuple as delivered by the coprocessor.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ContourPoints(pub [f64; 4]);

/// A detected target, two 2D points in the coprocessor's image coordinates.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq)]
pub struct ContourPair {
    pub point_one: (f64, f64),
    pub point_two: (f64, f64),
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// The tables published by the coprocessor.
#[derive(Serialize, Deserialize, Debug, Hash, Eq, PartialEq, Copy, Clone)]
pub enum VisionTopic {
    Gear,
    Shooter,
}

/// Errors which can occur while parsing a vision message.
#[derive(thiserror::Error, Debug)]
pub enum VisionParseError {
    #[error("Message has no topic separator")]
    NoTopic,

    #[error("Unknown vision topic \"{0}\"")]
    UnknownTopic(String),

    #[error("Message contains an invalid table: {0}")]
    InvalidTable(serde_json::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl VisionTopic {
    /// The topic string the table is published under.
    pub fn as_str(&self) -> &'static str {
        match self {
            VisionTopic::Gear => "cameraData/gear",
            VisionTopic::Shooter => "cameraData/shooter",
        }
    }

    /// Parse a topic string.
    pub fn from_topic_str(s: &str) -> Option<Self> {
        match s {
            "cameraData/gear" => Some(VisionTopic::Gear),
            "cameraData/shooter" => Some(VisionTopic::Shooter),
            _ => None,
        }
    }
}

impl ContourPoints {
    /// The tuple reported when nothing has been received.
    pub fn none() -> Self {
        Self([MISSING_VALUE; 4])
    }

    /// Build the tuple from a key-value table, filling missing keys with `-1`.
    pub fn from_table(table: &HashMap<String, f64>) -> Self {
        let mut points = [MISSING_VALUE; 4];

        for (p, k) in points.iter_mut().zip(CONTOUR_KEYS.iter()) {
            if let Some(v) = table.get(*k) {
                *p = *v;
            }
        }

        Self(points)
    }

    /// Get the detected target, or `None` if the coprocessor found no target.
    ///
    /// Distance and angle calculations are undefined without a target so callers must handle
    /// `None` rather than use the raw values.
    pub fn target(&self) -> Option<ContourPair> {
        let p = self.0;

        if p[3] < 0.0 || p.iter().any(|v| !v.is_finite()) {
            return None;
        }

        Some(ContourPair {
            point_one: (p[0], p[1]),
            point_two: (p[2], p[3]),
        })
    }
}

/// Parse a published message of the form `<topic> <json table>`.
pub fn parse_message(msg: &str) -> Result<(VisionTopic, ContourPoints), VisionParseError> {
    let mut split = msg.splitn(2, ' ');

    let topic_str = split.next().ok_or(VisionParseError::NoTopic)?;
    let table_str = split.next().ok_or(VisionParseError::NoTopic)?;

    let topic = VisionTopic::from_topic_str(topic_str)
        .ok_or_else(|| VisionParseError::UnknownTopic(topic_str.to_string()))?;

    let table: HashMap<String, f64> =
        serde_json::from_str(table_str).map_err(VisionParseError::InvalidTable)?;

    Ok((topic, ContourPoints::from_table(&table)))
}

/// Format a table as a published message, used by publishers and tests.
pub fn format_message(topic: VisionTopic, points: &ContourPoints) -> String {
    let table: HashMap<&str, f64> = CONTOUR_KEYS
        .iter()
        .cloned()
        .zip(points.0.iter().cloned())
        .collect();

    // A map of finite floats always serialises
    format!(
        "{} {}",
        topic.as_str(),
        serde_json::to_string(&table).unwrap_or_else(|_| String::from("{}"))
    )
}
