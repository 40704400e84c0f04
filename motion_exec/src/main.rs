//! Main motion executable entry point.
//!
//! # Architecture
//!
//! Each invocation executes a single command and exits:
//!
//!     - Initialise the session and the logger
//!     - Load the parameters
//!     - Install the interrupt handler, which cancels the root token
//!     - Connect the equipment (SDK tools, or simulated equipment with `--sim`)
//!     - Execute the command
//!
//! Every blocking wait inside a command observes the root token, so Ctrl+C stops a replay or a
//! sequence at the next suspension point and ends a recording normally. The arm's holding force is
//! never released on interrupt, use the `release` command for that.

// ---------------------------------------------------------------------------
// IMPORTS
// ---------------------------------------------------------------------------

// External
use color_eyre::{
    eyre::{eyre, WrapErr},
    Report,
};
use log::{debug, info, warn};
use std::path::Path;
use structopt::StructOpt;

// Internal
use comms_if::{
    eqpt::arm::{ArmChannel, JointPose},
    tc::traj::TrajCmd,
};
use motion_lib::{
    arm_seq::IkSolver,
    coord::{Coordinator, RunState, SequencePlan},
    ik::PlanarIk,
    lmtg::Tick,
    named_pose::{self, NamedPoseOutcome},
    params::MotionExecParams,
    recorder, replay,
    sdk_client::SdkArmChannel,
    sim::{SimArm, SimBase},
    traj::Trajectory,
};
use util::{
    archive::Archiver,
    cancel::CancelToken,
    host,
    logger::{logger_init, LevelFilter},
    session::Session,
};

// ---------------------------------------------------------------------------
// STRUCTS
// ---------------------------------------------------------------------------

#[derive(Debug, StructOpt)]
#[structopt(
    name = "motion_exec",
    about = "Record and replay arm trajectories, and run coordinated arm and base sequences"
)]
struct Opts {
    /// Use simulated equipment instead of the real arm.
    #[structopt(long)]
    sim: bool,

    /// Parameter file, relative to the params directory.
    #[structopt(long, default_value = "motion_exec.toml")]
    params: String,

    #[structopt(subcommand)]
    cmd: TrajCmd,
}

// ---------------------------------------------------------------------------
// FUNCTIONS
// ---------------------------------------------------------------------------

/// Executable main function, entry point.
fn main() -> Result<(), Report> {
    color_eyre::install()?;

    let opts = Opts::from_args();

    // ---- EARLY INITIALISATION ----

    let session =
        Session::new("motion_exec", "sessions").wrap_err("Failed to create the session")?;

    logger_init(LevelFilter::Debug, &session).wrap_err("Failed to initialise logging")?;

    info!("Pick and Place Motion Executable\n");
    info!("Session directory: {:?}\n", session.session_root);
    debug!("Command: {:?}", opts.cmd);

    // ---- LOAD PARAMETERS ----

    let params: MotionExecParams =
        util::params::load(&opts.params).wrap_err("Could not load motion params")?;
    params.validate().wrap_err("Invalid motion params")?;

    info!("Exec parameters loaded");

    // ---- INTERRUPT HANDLING ----

    let cancel = CancelToken::new();
    {
        let cancel = cancel.clone();
        ctrlc::set_handler(move || {
            warn!("Interrupt received, stopping");
            cancel.cancel();
        })
        .wrap_err("Failed to install the interrupt handler")?;
    }

    // ---- EQUIPMENT ----

    let arm: Box<dyn ArmChannel> = if opts.sim {
        info!("Using the simulated arm");
        Box::new(SimArm::new(JointPose::zeros(params.dof)))
    } else {
        Box::new(
            SdkArmChannel::new(&params.sdk, params.dof)
                .wrap_err("Failed to initialise the arm SDK client")?,
        )
    };

    // ---- EXECUTION ----

    exec(&opts.cmd, arm.as_ref(), &params, &session, &cancel)?;

    info!("End of execution");

    Ok(())
}

/// Execute a single command.
fn exec(
    cmd: &TrajCmd,
    arm: &dyn ArmChannel,
    params: &MotionExecParams,
    session: &Session,
    cancel: &CancelToken,
) -> Result<(), Report> {
    match cmd {
        TrajCmd::Record { path, rate_hz } => {
            let mut rec = params.record.clone();
            if let Some(r) = rate_hz {
                rec.rate_hz = *r;
            }

            recorder::record(arm, path, &rec, cancel).wrap_err("Recording failed")?;
        }

        TrajCmd::Play { path, speed, force } => {
            let traj = load_traj(path, params)?;

            let mut play = params.play.clone();
            if let Some(s) = speed {
                play.speed = *s;
            }
            if let Some(f) = force {
                play.force = *f;
            }
            play.validate().wrap_err("Invalid replay options")?;

            let report =
                replay::play(arm, &traj, &play, cancel).wrap_err("Resampled replay failed")?;
            save_report(session, "play_report.json", &report);
        }

        TrajCmd::PlayExact {
            path,
            force,
            burst_rate_hz,
            bursts,
        } => {
            let traj = load_traj(path, params)?;

            let mut exact = params.exact.clone();
            if let Some(f) = force {
                exact.force = *f;
            }
            if let Some(r) = burst_rate_hz {
                exact.burst_rate_hz = *r;
            }
            if let Some(b) = bursts {
                exact.bursts = *b;
            }
            exact.validate().wrap_err("Invalid replay options")?;

            let report = replay::play_exact(arm, &traj, &exact, cancel)
                .wrap_err("Exact replay failed")?;
            save_report(session, "play_exact_report.json", &report);
        }

        TrajCmd::PlaySmooth {
            path,
            speed,
            force,
            control_hz,
        } => {
            let traj = load_traj(path, params)?;

            let mut smooth = params.smooth.clone();
            if let Some(s) = speed {
                smooth.speed = *s;
            }
            if let Some(f) = force {
                smooth.force = *f;
            }
            if let Some(c) = control_hz {
                smooth.control_hz = *c;
            }
            smooth.validate().wrap_err("Invalid replay options")?;

            let mut arch = TickArchive::new(session, traj.dof())?;
            let report = replay::play_smooth(arm, &traj, &smooth, cancel, |t| arch.write(t))
                .wrap_err("Smooth replay failed")?;
            arch.close();

            save_report(session, "play_smooth_report.json", &report);
        }

        TrajCmd::Sequence { plan } => {
            let plan: SequencePlan =
                util::params::load(plan).wrap_err("Could not load the sequence plan")?;

            // Base transport is not wired in yet
            warn!("No base channel available, the base is simulated");
            let base = SimBase::new();
            let solver = PlanarIk::new(params.ik.clone());

            let mut coord = Coordinator::new(
                arm,
                &base,
                Some(&solver as &dyn IkSolver),
                params.converge.clone(),
                params.base.clone(),
            );
            let report = coord
                .run(&plan, cancel)
                .wrap_err("Could not start the sequence")?;
            save_report(session, "sequence_report.json", &report);

            if report.state != RunState::Completed {
                return Err(eyre!(
                    "Sequence aborted (arm: {:?}, base: {:?})",
                    report.arm,
                    report.base
                ));
            }
        }

        TrajCmd::Stow { force } => {
            match named_pose::stow(arm, *force, &params.named, cancel)
                .wrap_err("Stowing failed")?
            {
                NamedPoseOutcome::Reached { retried } => {
                    info!("Arm stowed{}", if retried { " after a retry" } else { "" })
                }
                NamedPoseOutcome::NotConfirmed { last_error } => warn!(
                    "Arm may not be stowed, last measured error {:?}",
                    last_error
                ),
            }
        }

        TrajCmd::Release => named_pose::release(arm).wrap_err("Could not release the arm")?,
    }

    Ok(())
}

/// Find, load and check a trajectory file.
fn load_traj(path: &Path, params: &MotionExecParams) -> Result<Trajectory, Report> {
    let root = host::get_sw_root().wrap_err("Cannot find the software root")?;
    let path = Trajectory::resolve_path(path, root.join(&params.traj_dir))
        .wrap_err("Could not find the trajectory")?;

    let traj = Trajectory::load(&path).wrap_err("Could not load the trajectory")?;
    traj.check_dof(params.dof)
        .wrap_err("The trajectory does not match the arm")?;

    info!(
        "Loaded {:?}: {} samples over {:.2} s at {:.1} Hz",
        path,
        traj.len(),
        traj.duration_s(),
        traj.sample_rate_hz()
    );

    Ok(traj)
}

fn save_report<T: serde::Serialize>(session: &Session, name: &str, report: &T) {
    match session.save_json(name, report) {
        Ok(p) => debug!("Report saved to {:?}", p),
        Err(e) => warn!("Could not save the report: {}", e),
    }
}

// ---------------------------------------------------------------------------
// TICK ARCHIVE
// ---------------------------------------------------------------------------

/// CSV archive of the ticks generated during smooth replay.
///
/// Archiving stops at the first write error, the replay itself carries on.
struct TickArchive {
    arch: Option<Archiver>,
    row: Vec<f64>,
}

impl TickArchive {
    fn new(session: &Session, dof: usize) -> Result<Self, Report> {
        let mut arch = Archiver::from_path(session, "smooth_ticks.csv")
            .wrap_err("Could not create the tick archive")?;

        let mut header = vec!["t".to_string(), "segment".to_string()];
        for prefix in &["q", "v", "a"] {
            header.extend((0..dof).map(|i| format!("{}{}", prefix, i)));
        }
        arch.write_header(&header)
            .wrap_err("Could not write the tick archive header")?;

        Ok(Self {
            arch: Some(arch),
            row: Vec::with_capacity(2 + 3 * dof),
        })
    }

    fn write(&mut self, tick: &Tick) {
        let arch = match self.arch.as_mut() {
            Some(a) => a,
            None => return,
        };

        self.row.clear();
        self.row.push(tick.t);
        self.row.push(tick.segment as f64);
        self.row.extend_from_slice(&tick.state.position);
        self.row.extend_from_slice(&tick.state.velocity);
        self.row.extend_from_slice(&tick.state.acceleration);

        if let Err(e) = arch.write_row(&self.row) {
            warn!("Tick archiving stopped: {}", e);
            self.arch = None;
        }
    }

    fn close(mut self) {
        if let Some(mut arch) = self.arch.take() {
            match arch.flush() {
                Ok(()) => info!("Ticks archived to {:?}", arch.path()),
                Err(e) => warn!("Could not flush the tick archive: {}", e),
            }
        }
    }
}
