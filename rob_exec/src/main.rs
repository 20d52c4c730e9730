//! Main robot executable entry point.
//!
//! # Architecture
//!
//! The general execution methodology consists of:
//!
//!     - Initialise the session, logging and parameters
//!     - Build the simulated equipment and the command dispatcher
//!     - Main loop, at a fixed rate:
//!         - Input acquisition:
//!             - Gamepad frames from the input script
//!             - Target tables from the vision coprocessor
//!         - Command dispatch, which starts and cancels automatic motions and services every
//!           mechanism
//!         - Cycle management
//!     - Make everything safe and wait for the motion threads
//!
//! Without an input script the gamepads stay idle, so the robot holds still until the cycle limit
//! is reached.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{eyre::WrapErr, Report};
use log::{debug, info, warn};
use std::{
    path::PathBuf,
    sync::Arc,
    thread,
    time::Instant,
};
use structopt::StructOpt;

// Internal
use comms_if::eqpt::{
    gamepad::PadId,
    vision::ContourPoints,
};
use rob_lib::{
    dispatch::{CmdDispatch, DispatchEqpt},
    eqpt::sim::{
        SimDrivebase, SimFlywheel, SimGamepad, SimMotor, SimServo, SimTravel, TravelEnd,
    },
    params::RobExecParams,
    vision::VisionClient,
};
use util::{
    host,
    logger::{logger_init, LevelFilter},
    script::{PendingFrames, ScriptInterpreter},
    session::{self, Session},
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(name = "rob_exec", about = "Robot motion and mechanism control")]
struct Opts {
    /// Input script replacing the gamepads
    #[structopt(parse(from_os_str))]
    script: Option<PathBuf>,

    /// Stop after this many cycles
    #[structopt(short, long)]
    max_cycles: Option<u64>,

    /// Log at trace level, including every control task iteration
    #[structopt(short, long)]
    verbose: bool,
}

/// Handles on the simulated gamepads, fed from the input script.
struct SimPads {
    driver: Arc<SimGamepad>,
    mech: Arc<SimGamepad>,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session = Session::new("rob_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(
        if opts.verbose { LevelFilter::Trace } else { LevelFilter::Debug },
        &session,
    )
    .wrap_err("Failed to initialise logging")?;

    info!("Robot Executable\n");
    info!(
        "Running on: {:#?}",
        host::get_uname().wrap_err("Failed to get host information")?
    );
    info!("Session directory: {:?}\n", session.session_root);

    debug!("CLI options: {:?}", opts);

    // ---- LOAD PARAMETERS ----

    let params: RobExecParams =
        util::params::load("rob_exec.toml").wrap_err("Could not load exec params")?;

    let cycle_period = params.cycle_period().wrap_err("Invalid exec params")?;

    info!("Exec parameters loaded");
    session.save("params.json", params.clone());

    // ---- INITIALISE INPUT SOURCE ----

    let mut script = match opts.script {
        Some(ref path) => {
            info!("Loading script from {:?}", path);

            let si = ScriptInterpreter::new(path).wrap_err("Failed to load script")?;

            info!(
                "Loaded script lasts {:.02} s and contains {} frames\n",
                si.get_duration(),
                si.get_num_frames()
            );

            Some(si)
        }
        None => {
            info!("No script provided, the gamepads will stay idle\n");
            None
        }
    };

    // ---- INITIALISE EQUIPMENT ----

    info!("Initialising simulated equipment...");

    let pads = SimPads {
        driver: Arc::new(SimGamepad::new()),
        mech: Arc::new(SimGamepad::new()),
    };

    let base = SimDrivebase::new(params.sim.drivebase.clone());

    let gear_motor = Arc::new(SimMotor::new());
    let gear_travel = SimTravel::new(gear_motor.clone(), TravelEnd::Lower, params.sim.gear.clone());

    let climber_motor = Arc::new(SimMotor::new());
    let rope = SimTravel::new(
        climber_motor.clone(),
        TravelEnd::Lower,
        params.sim.climber.clone(),
    );

    let flywheel = Arc::new(SimMotor::new());
    let flywheel_encoder = Arc::new(SimFlywheel::new(flywheel.clone(), params.sim.flywheel.clone()));

    let eqpt = DispatchEqpt {
        driver_pad: pads.driver.clone(),
        mech_pad: pads.mech.clone(),
        wheels: base.wheels(),
        heading: base.clone(),
        gear_motor,
        gear_lower: gear_travel.stop(TravelEnd::Lower),
        gear_upper: gear_travel.stop(TravelEnd::Upper),
        climber_motor,
        climber_left_stop: rope.stop(TravelEnd::Upper),
        climber_right_stop: rope.stop(TravelEnd::Upper),
        flywheel,
        agitator: Arc::new(SimMotor::new()),
        flywheel_encoder,
        gate_servo: Arc::new(SimServo::new()),
    };

    let mut dispatch =
        CmdDispatch::new(eqpt, &params).wrap_err("Failed to initialise the command dispatcher")?;

    info!("Equipment initialisation complete\n");

    // ---- INITIALISE NETWORK ----

    let zmq_ctx = comms_if::net::zmq::Context::new();

    let mut vision = match params.vision.enabled {
        true => {
            let c = VisionClient::new(&zmq_ctx, &params.vision)
                .wrap_err("Failed to initialise the VisionClient")?;
            info!("VisionClient initialised on {}", params.vision.endpoint);
            Some(c)
        }
        false => {
            info!("Vision disabled");
            None
        }
    };

    // ---- MAIN LOOP ----

    let cycles_per_second = (1.0 / params.cycle_period_s).round().max(1.0) as u64;

    let mut num_cycles: u64 = 0;
    let mut num_consec_overruns: u64 = 0;

    info!("Beginning main loop\n");

    loop {
        let cycle_start = Instant::now();

        // ---- INPUT ACQUISITION ----

        if let Some(ref mut si) = script {
            match si.get_pending_frames(session::get_elapsed_seconds()) {
                PendingFrames::None => (),
                PendingFrames::Some(frames) => {
                    for frame in frames {
                        debug!("Gamepad frame: {:?}", frame);
                        match frame.pad {
                            PadId::Driver => pads.driver.set(frame.state),
                            PadId::Mech => pads.mech.set(frame.state),
                        }
                    }
                }
                PendingFrames::EndOfScript => {
                    info!("End of input script reached, stopping");
                    break;
                }
            }
        }

        let gear_target = match vision {
            Some(ref mut v) => {
                if let Err(e) = v.poll() {
                    warn!("Vision processing error: {}", e);
                }
                v.gear_target()
            }
            None => ContourPoints::none(),
        };

        // ---- COMMAND DISPATCH ----

        let report = dispatch.cycle(&gear_target);

        if num_cycles % cycles_per_second == 0 {
            session.save(format!("cycles/cycle_{:08}.json", num_cycles), report);
        }

        // ---- CYCLE MANAGEMENT ----

        num_cycles += 1;

        if let Some(max) = opts.max_cycles {
            if num_cycles >= max {
                info!("Cycle limit of {} reached, stopping", max);
                break;
            }
        }

        let cycle_dur = Instant::now() - cycle_start;

        match cycle_period.checked_sub(cycle_dur) {
            Some(d) => {
                num_consec_overruns = 0;
                thread::sleep(d);
            }
            None => {
                warn!(
                    "Cycle overran by {:.06} s",
                    cycle_dur.as_secs_f64() - cycle_period.as_secs_f64()
                );
                num_consec_overruns += 1;

                if num_consec_overruns == params.max_consec_overruns {
                    warn!(
                        "{} consecutive cycle overruns, making everything safe",
                        num_consec_overruns
                    );
                    dispatch.make_safe();
                }
            }
        }
    }

    // ---- SHUTDOWN ----

    info!("Making safe");

    dispatch.make_safe();
    let reports = dispatch.join_motions();
    info!("{} motion threads joined", reports.len());

    info!("End of execution after {} cycles", num_cycles);

    session.exit();

    Ok(())
}
