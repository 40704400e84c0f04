//! # Replay engines
//!
//! Three ways of sending a recorded trajectory back to the arm:
//!
//! - [`play_exact`]: every recorded waypoint at its original timestamp, no interpolation.
//! - [`play`]: the trajectory resampled onto a uniform grid and paced by a speed factor.
//! - [`play_smooth`]: the waypoints decimated and fed through the limited-motion trajectory
//!   generator, one shaped pose per control tick.
//!
//! The command channel gives no acknowledgement and may drop commands, so each pose is sent as a
//! short burst of identical commands. Pacing is by deadline from the start of playback, so time
//! spent sending a burst is not added on top of the recorded timing.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

use crate::{
    lmtg::{
        decimate, detect_unit, LmtgError, MotionLimits, ProfileKind, ProfileShaper, Tick,
        TickGenerator,
    },
    traj::{resample, TrajError, Trajectory},
};
use comms_if::eqpt::{
    arm::{ArmChannel, ArmDems, AuxParams, JointPose},
    ChannelError,
};
use util::{
    cancel::{CancelToken, Cancelled},
    maths::clamp,
    time::{secs_to_duration, Throttle},
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Minimum period between two progress log lines.
const PROGRESS_LOG_PERIOD: Duration = Duration::from_millis(500);

/// Timeout of the pose read made at the end of playback.
const FINAL_READ_TIMEOUT: Duration = Duration::from_millis(1500);

/// Bounds on the rate at which smooth playback bursts are sent.
///
/// Units: Hz
const STREAM_HZ_BOUNDS: (f64, f64) = (20.0, 500.0);

/// Decimation keeps waypoints at least this many control ticks apart unless they differ.
const DECIMATION_TICKS: f64 = 3.0;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Repetition of one pose command.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Burst {
    /// Number of identical commands sent.
    pub count: u32,

    /// Rate at which the commands are sent.
    ///
    /// Units: Hz
    pub rate_hz: f64,
}

/// Parameters for exact replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExactParams {
    /// Holding force level applied before playback.
    pub force: u32,

    /// Identical commands sent per waypoint.
    pub bursts: u32,

    /// Rate of the commands in a burst.
    ///
    /// Units: Hz
    pub burst_rate_hz: f64,

    pub aux: AuxParams,

    /// Wait after locking before the first command.
    ///
    /// Units: seconds
    pub lock_settle_s: f64,

    /// Wait after the last command before reading the final pose.
    ///
    /// Units: seconds
    pub end_settle_s: f64,
}

/// Parameters for resampled replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayParams {
    /// Playback speed factor, 1 is the recorded speed.
    pub speed: f64,

    pub force: u32,
    pub bursts: u32,

    /// Units: Hz
    pub burst_rate_hz: f64,

    pub aux: AuxParams,

    /// Units: seconds
    pub lock_settle_s: f64,

    /// Units: seconds
    pub end_settle_s: f64,
}

/// Parameters for smooth replay.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SmoothParams {
    /// Playback speed factor, scales the motion limits.
    pub speed: f64,

    pub force: u32,

    /// Control tick rate.
    ///
    /// Units: Hz
    pub control_hz: f64,

    /// Identical commands sent per tick.
    pub stream_repeats: u32,

    /// Waypoints closer in time than three ticks are dropped if no joint moved more than this.
    pub min_delta: f64,

    /// Profile used by the shaper.
    pub profile: ProfileKind,

    /// Explicit limits, in the unit of the trajectory. Chosen from the unit when not given.
    pub limits: Option<MotionLimits>,

    pub aux: AuxParams,

    /// Units: seconds
    pub lock_settle_s: f64,

    /// Units: seconds
    pub end_settle_s: f64,
}

/// Summary of an exact or resampled replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReplayReport {
    /// Number of poses sent, each as one burst.
    pub poses_sent: usize,

    /// Wall clock time from the first command to the last one.
    ///
    /// Units: seconds
    pub duration_s: f64,

    /// Pose measured after playback, if it could be read.
    pub final_pose: Option<JointPose>,
}

/// Summary of a smooth replay.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SmoothReport {
    pub segments: usize,
    pub completed_segments: usize,
    pub skipped_segments: usize,
    pub ticks: usize,

    /// Units: seconds
    pub duration_s: f64,

    pub final_pose: Option<JointPose>,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("At least 2 waypoints are needed to replay a trajectory, found {0}")]
    TrajectoryTooShort(usize),

    #[error("Invalid trajectory: {0}")]
    TrajError(#[from] TrajError),

    #[error("Could not generate limited motion: {0}")]
    LmtgError(#[from] LmtgError),

    #[error("Could not lock the arm: {0}")]
    LockError(#[from] ChannelError),

    #[error("Replay interrupted")]
    Cancelled(#[from] Cancelled),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Burst {
    /// Time between two commands of the burst.
    pub fn period(&self) -> Duration {
        if self.rate_hz.is_finite() && self.rate_hz > 0.0 {
            secs_to_duration(1.0 / self.rate_hz)
        } else {
            Duration::from_secs(0)
        }
    }
}

impl Default for ExactParams {
    fn default() -> Self {
        Self {
            force: 50_000,
            bursts: 3,
            burst_rate_hz: 15.0,
            aux: AuxParams::default(),
            lock_settle_s: 0.2,
            end_settle_s: 0.3,
        }
    }
}

impl Default for PlayParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            force: 45_000,
            bursts: 5,
            burst_rate_hz: 15.0,
            aux: AuxParams::default(),
            lock_settle_s: 0.2,
            end_settle_s: 0.3,
        }
    }
}

impl Default for SmoothParams {
    fn default() -> Self {
        Self {
            speed: 1.0,
            force: 45_000,
            control_hz: 100.0,
            stream_repeats: 2,
            min_delta: 0.01,
            profile: ProfileKind::DoubleS,
            limits: None,
            aux: AuxParams::default(),
            lock_settle_s: 0.2,
            end_settle_s: 0.3,
        }
    }
}

impl SmoothParams {
    /// Rate at which the commands of each tick's burst are sent.
    pub fn stream_hz(&self) -> f64 {
        clamp(self.control_hz, STREAM_HZ_BOUNDS.0, STREAM_HZ_BOUNDS.1)
    }

    /// Limits for `traj` before speed scaling.
    ///
    /// Explicit limits win, then the trajectory's unit, then a guess from the magnitude of the
    /// first pose.
    pub fn base_limits(&self, traj: &Trajectory) -> MotionLimits {
        if let Some(ref l) = self.limits {
            return l.clone();
        }

        let unit = match traj.unit() {
            Some(u) => u,
            None => {
                let u = detect_unit(&traj.waypoints()[0].q);
                warn!(
                    "Trajectory has no unit, assuming {} from the magnitude of the first pose",
                    u
                );
                u
            }
        };

        MotionLimits::for_unit(unit, traj.dof())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Send the same demand `burst.count` times, `burst.period()` apart.
///
/// Failed sends are logged and the burst carries on, later repeats may still get through. Returns
/// the number of sends the channel accepted.
pub fn burst_send(
    arm: &dyn ArmChannel,
    dems: &ArmDems,
    burst: Burst,
    cancel: &CancelToken,
) -> Result<usize, Cancelled> {
    let mut accepted = 0;
    let period = burst.period();

    for i in 0..burst.count {
        cancel.check()?;

        match arm.send_pose(dems) {
            Ok(()) => accepted += 1,
            Err(e) => warn!("Pose command {} of burst failed: {}", i + 1, e),
        }

        if i + 1 < burst.count {
            cancel.sleep(period)?;
        }
    }

    Ok(accepted)
}

/// Replay every waypoint at its recorded timestamp.
///
/// After each waypoint's burst, sleeps until the next waypoint's offset from the start of playback.
/// If a burst overruns that offset the next waypoint is sent straight away.
pub fn play_exact(
    arm: &dyn ArmChannel,
    traj: &Trajectory,
    params: &ExactParams,
    cancel: &CancelToken,
) -> Result<ReplayReport, ReplayError> {
    check_replayable(arm, traj)?;

    lock(arm, params.force, params.lock_settle_s, cancel)?;

    let burst = Burst {
        count: params.bursts,
        rate_hz: params.burst_rate_hz,
    };
    let wps = traj.waypoints();
    let t0 = wps[0].t;

    info!(
        "Exact replay of {} waypoints over {:.2} s",
        wps.len(),
        traj.duration_s()
    );

    let start = Instant::now();
    let mut throttle = Throttle::new(PROGRESS_LOG_PERIOD);

    for (i, wp) in wps.iter().enumerate() {
        let dems = ArmDems {
            pose: wp.q.clone(),
            aux: params.aux,
        };
        burst_send(arm, &dems, burst, cancel)?;

        if throttle.ready() {
            info!("t = {:.2} s, waypoint {}/{}", wp.t - t0, i + 1, wps.len());
        }

        if let Some(next) = wps.get(i + 1) {
            cancel.sleep_until(start + secs_to_duration(next.t - t0))?;
        }
    }

    finish(arm, start, wps.len(), params.end_settle_s, cancel)
}

/// Replay the trajectory resampled onto a uniform grid, `speed` times faster than recorded.
pub fn play(
    arm: &dyn ArmChannel,
    traj: &Trajectory,
    params: &PlayParams,
    cancel: &CancelToken,
) -> Result<ReplayReport, ReplayError> {
    check_replayable(arm, traj)?;

    let resampled = resample(traj, params.speed)?;

    lock(arm, params.force, params.lock_settle_s, cancel)?;

    let burst = Burst {
        count: params.bursts,
        rate_hz: params.burst_rate_hz,
    };
    let wps = resampled.waypoints();

    info!(
        "Resampled replay of {} samples at {:.1} Hz, speed {:.2}",
        wps.len(),
        resampled.sample_rate_hz(),
        params.speed
    );

    let start = Instant::now();
    let mut throttle = Throttle::new(PROGRESS_LOG_PERIOD);

    for wp in wps.iter() {
        cancel.sleep_until(start + secs_to_duration(wp.t / params.speed))?;

        let dems = ArmDems {
            pose: wp.q.clone(),
            aux: params.aux,
        };
        burst_send(arm, &dems, burst, cancel)?;

        if throttle.ready() {
            info!("t = {:.2} s, q = {:.1?}", wp.t, wp.q.as_slice());
        }
    }

    finish(arm, start, wps.len(), params.end_settle_s, cancel)
}

/// Replay the trajectory through the limited-motion trajectory generator.
///
/// `on_tick` is called with every generated tick before it is streamed, which lets the caller
/// archive the generated motion.
pub fn play_smooth<F>(
    arm: &dyn ArmChannel,
    traj: &Trajectory,
    params: &SmoothParams,
    cancel: &CancelToken,
    mut on_tick: F,
) -> Result<SmoothReport, ReplayError>
where
    F: FnMut(&Tick),
{
    check_replayable(arm, traj)?;

    let shaper = ProfileShaper::new(params.profile, params.control_hz)?;
    let limits = params.base_limits(traj).scaled(params.speed);

    let min_dt = DECIMATION_TICKS / params.control_hz;
    let waypoints: Vec<JointPose> = decimate(traj.waypoints(), min_dt, params.min_delta)
        .into_iter()
        .map(|w| w.q)
        .collect();
    let mut gen = TickGenerator::new(shaper, waypoints, limits)?;

    info!(
        "Smooth replay of {} segments ({} recorded samples), {:.0} Hz control, speed {:.2}",
        gen.report().segments,
        traj.len(),
        params.control_hz,
        params.speed
    );

    lock(arm, params.force, params.lock_settle_s, cancel)?;

    let burst = Burst {
        count: params.stream_repeats,
        rate_hz: params.stream_hz(),
    };

    let start = Instant::now();
    let mut throttle = Throttle::new(PROGRESS_LOG_PERIOD);

    while let Some(tick) = gen.next() {
        on_tick(&tick);

        let dems = ArmDems {
            pose: tick.state.pose(),
            aux: params.aux,
        };
        burst_send(arm, &dems, burst, cancel)?;

        if throttle.ready() {
            info!(
                "Segment {}/{}, q = {:.2?}",
                tick.segment,
                gen.report().segments,
                tick.state.position
            );
        }

        cancel.sleep_until(start + secs_to_duration(tick.t))?;
    }

    let report = gen.report();
    let replay = finish(arm, start, report.ticks, params.end_settle_s, cancel)?;

    if report.skipped > 0 {
        warn!(
            "{} of {} segments were skipped after generation faults",
            report.skipped, report.segments
        );
    }

    Ok(SmoothReport {
        segments: report.segments,
        completed_segments: report.completed,
        skipped_segments: report.skipped,
        ticks: report.ticks,
        duration_s: replay.duration_s,
        final_pose: replay.final_pose,
    })
}

/// Fail early on trajectories which cannot be replayed on this arm.
fn check_replayable(arm: &dyn ArmChannel, traj: &Trajectory) -> Result<(), ReplayError> {
    if traj.len() < 2 {
        return Err(ReplayError::TrajectoryTooShort(traj.len()));
    }

    traj.check_dof(arm.dof())?;

    Ok(())
}

fn lock(
    arm: &dyn ArmChannel,
    force: u32,
    settle_s: f64,
    cancel: &CancelToken,
) -> Result<(), ReplayError> {
    debug!("Locking arm with force {}", force);
    arm.set_force(force)?;
    cancel.sleep(secs_to_duration(settle_s))?;
    Ok(())
}

/// Let the arm settle then log where it ended up.
fn finish(
    arm: &dyn ArmChannel,
    start: Instant,
    poses_sent: usize,
    settle_s: f64,
    cancel: &CancelToken,
) -> Result<ReplayReport, ReplayError> {
    let duration_s = start.elapsed().as_secs_f64();

    cancel.sleep(secs_to_duration(settle_s))?;

    let final_pose = arm.read_pose(FINAL_READ_TIMEOUT);
    match final_pose {
        Some(ref q) => info!("Replay finished in {:.2} s, final pose {:.1?}", duration_s, q.as_slice()),
        None => warn!("Replay finished in {:.2} s, final pose unavailable", duration_s),
    }

    Ok(ReplayReport {
        poses_sent,
        duration_s,
        final_pose,
    })
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{sim::SimArm, traj::Waypoint};

    fn traj(points: &[(f64, f64)], dof: usize) -> Trajectory {
        let wps = points
            .iter()
            .map(|(t, q)| Waypoint {
                t: *t,
                q: JointPose::new(vec![*q; dof]),
            })
            .collect();
        Trajectory::new(10.0, None, wps).unwrap()
    }

    fn fast_exact() -> ExactParams {
        ExactParams {
            bursts: 2,
            burst_rate_hz: 100.0,
            lock_settle_s: 0.0,
            end_settle_s: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_play_exact_keeps_time() {
        let arm = SimArm::new(JointPose::zeros(7));
        let t = traj(&[(0.0, 0.0), (1.0, 10.0), (2.0, 20.0)], 7);

        let report = play_exact(&arm, &t, &fast_exact(), &CancelToken::new()).unwrap();

        assert_eq!(report.poses_sent, 3);
        assert!(report.duration_s >= 2.0);
        assert_eq!(arm.force_log(), vec![50_000]);

        // Bursts in waypoint order, each burst starting no earlier than its timestamp
        let sent = arm.sent();
        assert_eq!(sent.len(), 6);
        let first = sent[0].at;
        for (i, chunk) in sent.chunks(2).enumerate() {
            assert!(chunk.iter().all(|s| s.dems.pose[0] == 10.0 * i as f64));
            let offset = chunk[0].at.duration_since(first).as_secs_f64();
            assert!(offset >= i as f64 - 1e-3);
            assert!(offset < i as f64 + 0.2);
        }

        assert_eq!(report.final_pose, Some(JointPose::new(vec![20.0; 7])));
    }

    #[test]
    fn test_play_exact_repeated_timestamps() {
        let arm = SimArm::new(JointPose::zeros(1));
        let t = traj(&[(0.0, 0.0), (0.2, 1.0), (0.2, 2.0), (0.4, 3.0)], 1);

        let report = play_exact(&arm, &t, &fast_exact(), &CancelToken::new()).unwrap();
        assert_eq!(report.poses_sent, 4);

        // Both waypoints at 0.2 s are sent in recorded order, back to back
        let sent = arm.sent();
        let poses: Vec<f64> = sent.iter().map(|s| s.dems.pose[0]).collect();
        assert_eq!(poses, vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0, 3.0, 3.0]);

        let gap = sent[4].at.duration_since(sent[3].at).as_secs_f64();
        assert!(gap < 0.1);
    }

    #[test]
    fn test_replay_rejects_short_and_mismatched() {
        let arm = SimArm::new(JointPose::zeros(7));
        let cancel = CancelToken::new();

        let short = traj(&[(0.0, 1.0)], 7);
        assert!(matches!(
            play_exact(&arm, &short, &fast_exact(), &cancel),
            Err(ReplayError::TrajectoryTooShort(1))
        ));
        assert!(matches!(
            play_smooth(&arm, &short, &SmoothParams::default(), &cancel, |_| ()),
            Err(ReplayError::TrajectoryTooShort(1))
        ));

        let wrong_dof = traj(&[(0.0, 1.0), (1.0, 2.0)], 6);
        assert!(matches!(
            play(&arm, &wrong_dof, &PlayParams::default(), &cancel),
            Err(ReplayError::TrajError(TrajError::DofMismatch { .. }))
        ));

        // Nothing was sent to the arm
        assert!(arm.sent().is_empty());
        assert!(arm.force_log().is_empty());
    }

    #[test]
    fn test_play_resampled_speed() {
        let arm = SimArm::new(JointPose::zeros(2));
        let t = traj(&[(0.0, 0.0), (0.5, 5.0), (1.0, 10.0)], 2);
        let params = PlayParams {
            speed: 2.0,
            bursts: 1,
            lock_settle_s: 0.0,
            end_settle_s: 0.0,
            ..Default::default()
        };

        let report = play(&arm, &t, &params, &CancelToken::new()).unwrap();

        // One second recorded, played in about half a second
        assert!(report.duration_s >= 0.5 - 1e-3);
        assert!(report.duration_s < 0.9);
        assert_eq!(report.final_pose, Some(JointPose::new(vec![10.0; 2])));

        let sent = arm.sent();
        assert_eq!(sent.len(), report.poses_sent);
        assert!(sent
            .windows(2)
            .all(|w| w[0].dems.pose[0] <= w[1].dems.pose[0]));
    }

    #[test]
    fn test_play_smooth_reaches_end() {
        let arm = SimArm::new(JointPose::zeros(2));
        let t = traj(&[(0.0, 0.0), (0.01, 0.005), (0.5, 3.0), (1.0, 4.0)], 2);
        let params = SmoothParams {
            control_hz: 200.0,
            stream_repeats: 1,
            limits: Some(MotionLimits::uniform(2, 20.0, 100.0, 2000.0).unwrap()),
            lock_settle_s: 0.0,
            end_settle_s: 0.0,
            ..Default::default()
        };

        let mut ticks = Vec::new();
        let report = play_smooth(&arm, &t, &params, &CancelToken::new(), |tick| {
            ticks.push(tick.clone())
        })
        .unwrap();

        // The near duplicate second sample is dropped
        assert_eq!(report.segments, 2);
        assert_eq!(report.completed_segments, 2);
        assert_eq!(report.skipped_segments, 0);
        assert_eq!(report.ticks, ticks.len());
        assert_eq!(arm.sent().len(), ticks.len());
        assert_eq!(report.final_pose, Some(JointPose::new(vec![4.0; 2])));

        // Paced at the control rate
        let expected_s = ticks.len() as f64 / 200.0;
        assert!(report.duration_s >= expected_s - 0.01);
    }

    #[test]
    fn test_cancel_stops_replay() {
        let arm = SimArm::new(JointPose::zeros(1));
        let t = traj(&[(0.0, 0.0), (5.0, 1.0), (10.0, 2.0)], 1);
        let cancel = CancelToken::new();

        let remote = cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(100));
            remote.cancel();
        });

        let start = Instant::now();
        let res = play_exact(&arm, &t, &fast_exact(), &cancel);
        stopper.join().unwrap();

        assert!(matches!(res, Err(ReplayError::Cancelled(_))));
        assert!(start.elapsed() < Duration::from_secs(2));

        // Holding force stays applied
        assert_eq!(arm.force(), 50_000);
    }
}
