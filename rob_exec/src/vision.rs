//! # Vision
//!
//! Camera geometry for the targets found by the vision coprocessor, and a client receiving the
//! coprocessor's contour tables.
//!
//! Image points are converted into a scaled frame with the origin at the image centre, `x` to the
//! right and `y` up, both in [-1, 1].

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::{
    eqpt::vision::{parse_message, ContourPoints, VisionTopic},
    net::{zmq, MonitoredSocket, MonitoredSocketError, SocketOptions},
};
use log::{trace, warn};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};
use util::maths::lin_map;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Headings of the pegs either side of the centre one, in degrees.
const SIDE_PEG_HEADING_DEG: f64 = 60.0;

/// Heading beyond which the robot is considered to be facing a side peg, in degrees.
const SIDE_PEG_THRESHOLD_DEG: f64 = 30.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct VisionParams {
    /// If false no client is created and the vision alignment has no target
    pub enabled: bool,

    /// Endpoint of the coprocessor's publisher
    pub endpoint: String,

    /// Camera resolution in pixels, `[x, y]`
    pub res: [f64; 2],
}

/// Geometry for a camera of a given resolution.
#[derive(Debug, Clone, Copy)]
pub struct CameraCalcs {
    res_x: f64,
    res_y: f64,
}

/// Receives the gear target tables published by the vision coprocessor.
pub struct VisionClient {
    socket: MonitoredSocket,

    gear_target: ContourPoints,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum VisionClientError {
    #[error("Socket error: {0}")]
    SocketError(MonitoredSocketError),

    #[error("Could not receive a message from the coprocessor: {0}")]
    RecvError(zmq::Error),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for VisionParams {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: String::from("tcp://localhost:5800"),
            res: [640.0, 480.0],
        }
    }
}

impl CameraCalcs {
    pub fn new(res_x: f64, res_y: f64) -> Self {
        Self { res_x, res_y }
    }

    /// Convert a point in image pixels into the scaled frame.
    pub fn raw_to_scaled(&self, raw: Point2<f64>) -> Point2<f64> {
        Point2::new(
            lin_map((0.0, self.res_x), (-1.0, 1.0), raw.x),
            lin_map((0.0, self.res_y), (1.0, -1.0), raw.y),
        )
    }

    /// Midpoint of two points.
    pub fn centre_point(&self, a: Point2<f64>, b: Point2<f64>) -> Point2<f64> {
        nalgebra::center(&a, &b)
    }

    /// Distance of a scaled point from the image centre.
    pub fn distance_to_centre(&self, p: Point2<f64>) -> f64 {
        p.coords.norm()
    }

    /// Angle of a scaled point about the image centre, anticlockwise from the `x` axis, in
    /// degrees in [0, 360).
    pub fn angle_deg(&self, p: Point2<f64>) -> f64 {
        let angle = p.y.atan2(p.x).to_degrees();

        if angle < 0.0 {
            angle + 360.0
        }
        else {
            angle
        }
    }

    /// Polar coordinates `(r, theta_deg)` of a scaled point.
    pub fn polar(&self, p: Point2<f64>) -> (f64, f64) {
        (self.distance_to_centre(p), self.angle_deg(p))
    }

    /// Centre of a detected target in the scaled frame, `None` if there is no target.
    pub fn target_centre(&self, points: &ContourPoints) -> Option<Point2<f64>> {
        let pair = points.target()?;

        Some(self.centre_point(
            self.raw_to_scaled(Point2::new(pair.point_one.0, pair.point_one.1)),
            self.raw_to_scaled(Point2::new(pair.point_two.0, pair.point_two.1)),
        ))
    }
}

impl VisionClient {
    /// Create a new client connected to the coprocessor.
    ///
    /// Does not block until the coprocessor is up, tables are picked up once it starts publishing.
    pub fn new(ctx: &zmq::Context, params: &VisionParams) -> Result<Self, VisionClientError> {
        let socket_options = SocketOptions {
            block_on_first_connect: false,
            subscribe: vec![VisionTopic::Gear.as_str().into()],
            connect_timeout: 1000,
            linger: 1,
            recv_timeout: 0,
            ..Default::default()
        };

        let socket = MonitoredSocket::new(ctx, zmq::SUB, socket_options, &params.endpoint)
            .map_err(VisionClientError::SocketError)?;

        Ok(Self {
            socket,
            gear_target: ContourPoints::none(),
        })
    }

    pub fn is_connected(&self) -> bool {
        self.socket.connected()
    }

    /// Receive every pending table, keeping the latest gear target.
    ///
    /// Returns the number of gear tables received. Malformed tables are logged and skipped.
    pub fn poll(&mut self) -> Result<usize, VisionClientError> {
        let mut num_received = 0;

        loop {
            let msg = match self.socket.recv_string(zmq::DONTWAIT) {
                Ok(Ok(s)) => s,
                Ok(Err(_)) => {
                    warn!("Vision coprocessor sent a message which was not valid UTF-8");
                    continue;
                }
                Err(zmq::Error::EAGAIN) => break,
                Err(e) => return Err(VisionClientError::RecvError(e)),
            };

            if let Some(points) = gear_table(&msg) {
                self.gear_target = points;
                num_received += 1;
            }
        }

        Ok(num_received)
    }

    /// The latest gear target table, or the no target table if none has been received.
    pub fn gear_target(&self) -> ContourPoints {
        self.gear_target
    }
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Heading of the peg the robot is most nearly facing.
pub fn closest_peg_heading(heading_deg: f64) -> f64 {
    if heading_deg > SIDE_PEG_THRESHOLD_DEG {
        SIDE_PEG_HEADING_DEG
    }
    else if heading_deg < -SIDE_PEG_THRESHOLD_DEG {
        -SIDE_PEG_HEADING_DEG
    }
    else {
        0.0
    }
}

/// Sideways distance to line the robot up with the gear target, positive to the right.
///
/// `m_per_unit` converts an offset in the scaled frame into meters at the peg. Returns `None` if
/// there is no target.
pub fn strafe_distance(points: &ContourPoints, calcs: &CameraCalcs, m_per_unit: f64) -> Option<f64> {
    calcs.target_centre(points).map(|c| c.x * m_per_unit)
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// The gear target carried by a message, `None` for any other topic or a malformed table.
fn gear_table(msg: &str) -> Option<ContourPoints> {
    match parse_message(msg) {
        Ok((VisionTopic::Gear, points)) => {
            trace!("Gear target: {:?}", points);
            Some(points)
        }
        Ok((topic, _)) => {
            trace!("Ignoring {:?} table", topic);
            None
        }
        Err(e) => {
            warn!("Invalid vision table: {}", e);
            None
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use comms_if::eqpt::vision::format_message;

    const EPS: f64 = 1e-9;

    #[test]
    fn test_raw_to_scaled() {
        let calcs = CameraCalcs::new(640.0, 480.0);

        let c = calcs.raw_to_scaled(Point2::new(320.0, 240.0));
        assert!(c.x.abs() < EPS && c.y.abs() < EPS);

        // Image top left is scaled (-1, 1)
        let tl = calcs.raw_to_scaled(Point2::new(0.0, 0.0));
        assert!((tl.x + 1.0).abs() < EPS && (tl.y - 1.0).abs() < EPS);

        let br = calcs.raw_to_scaled(Point2::new(640.0, 480.0));
        assert!((br.x - 1.0).abs() < EPS && (br.y + 1.0).abs() < EPS);
    }

    #[test]
    fn test_polar() {
        let calcs = CameraCalcs::new(640.0, 480.0);

        let (r, theta) = calcs.polar(Point2::new(0.0, 0.5));
        assert!((r - 0.5).abs() < EPS);
        assert!((theta - 90.0).abs() < EPS);

        // Below the x axis wraps into [0, 360)
        let theta = calcs.angle_deg(Point2::new(0.5, -0.5));
        assert!((theta - 315.0).abs() < EPS);

        let (r, _) = calcs.polar(Point2::new(0.3, 0.4));
        assert!((r - 0.5).abs() < EPS);

        let m = calcs.centre_point(Point2::new(-1.0, 0.0), Point2::new(0.5, 1.0));
        assert!((m.x + 0.25).abs() < EPS && (m.y - 0.5).abs() < EPS);
    }

    #[test]
    fn test_gear_table() {
        let points = ContourPoints([280.0, 240.0, 360.0, 240.0]);

        assert_eq!(
            gear_table(&format_message(VisionTopic::Gear, &points)),
            Some(points)
        );
        assert_eq!(gear_table(&format_message(VisionTopic::Shooter, &points)), None);
        assert_eq!(gear_table("cameraData/gear {not json"), None);
    }

    #[test]
    fn test_closest_peg() {
        assert_eq!(closest_peg_heading(45.0), 60.0);
        assert_eq!(closest_peg_heading(-31.0), -60.0);
        assert_eq!(closest_peg_heading(30.0), 0.0);
        assert_eq!(closest_peg_heading(-5.0), 0.0);
    }

    #[test]
    fn test_strafe_distance() {
        let calcs = CameraCalcs::new(640.0, 480.0);

        // Centred target needs no strafe
        let centred = ContourPoints([280.0, 240.0, 360.0, 240.0]);
        assert!(strafe_distance(&centred, &calcs, 0.5).unwrap().abs() < EPS);

        // Target centred at 480 px is half way to the right edge
        let right = ContourPoints([440.0, 200.0, 520.0, 280.0]);
        assert!((strafe_distance(&right, &calcs, 0.5).unwrap() - 0.25).abs() < EPS);

        assert_eq!(strafe_distance(&ContourPoints::none(), &calcs, 0.5), None);
    }
}
