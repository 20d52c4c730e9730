//! Vision table publisher
//!
//! Stands in for the vision coprocessor, publishing a fixed contour table for each topic at a
//! fixed rate so the robot executable can be exercised without a camera.

use comms_if::{
    eqpt::vision::{format_message, ContourPoints, VisionTopic},
    net::{zmq, MonitoredSocket, SocketOptions},
};
use structopt::StructOpt;

#[derive(Debug, StructOpt)]
#[structopt(name = "vision_pub", about = "Publish simulated vision contour tables")]
struct Opts {
    /// Endpoint to bind the publisher to
    #[structopt(short, long, default_value = "tcp://*:5800")]
    endpoint: String,

    /// Publishing period in milliseconds
    #[structopt(short, long, default_value = "100")]
    period_ms: u64,

    /// Publish "no target" tables instead of a centred target
    #[structopt(long)]
    no_target: bool,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let opts = Opts::from_args();

    let ctx = zmq::Context::new();

    let socket_options = SocketOptions {
        bind: true,
        block_on_first_connect: false,
        ..Default::default()
    };

    let socket = MonitoredSocket::new(&ctx, zmq::PUB, socket_options, &opts.endpoint)?;

    println!("Vision publisher open on {}", opts.endpoint);

    let points = if opts.no_target {
        ContourPoints::none()
    } else {
        // Two tape strips either side of the image centre
        ContourPoints([280.0, 240.0, 360.0, 240.0])
    };

    loop {
        for topic in [VisionTopic::Gear, VisionTopic::Shooter].iter() {
            if let Err(e) = socket.send(&format_message(*topic, &points), 0) {
                println!("Failed to send {} table: {}", topic.as_str(), e);
            }
        }

        std::thread::sleep(std::time::Duration::from_millis(opts.period_ms));
    }
}
