//! Uniform resampling of trajectories

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use comms_if::eqpt::arm::JointPose;

use super::{TrajError, Trajectory, Waypoint};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Smallest time step of a resampled trajectory, in seconds.
pub const MIN_DT_FLOOR_S: f64 = 0.02;

/// Largest number of samples in a resampled trajectory, over five hours at the floor step.
pub const MAX_RESAMPLED_POINTS: usize = 1_000_000;

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Resample a trajectory onto a uniform time grid.
///
/// The step is `max(MIN_DT_FLOOR_S, avg_dt / speed)`, where `avg_dt` is the mean spacing of the
/// recording. Timestamps stay on the recording's time base, `speed` only sets the density, and the
/// last resampled waypoint is always exactly the recording's final timestamp and pose.
pub fn resample(traj: &Trajectory, speed: f64) -> Result<Trajectory, TrajError> {
    let wps = traj.waypoints();

    if wps.len() < 2 {
        return Err(TrajError::InsufficientSamples(wps.len()));
    }
    if !speed.is_finite() || speed <= 0.0 {
        return Err(TrajError::InvalidSpeed(speed));
    }

    let t_first = wps[0].t;
    let t_end = wps[wps.len() - 1].t;

    let avg_dt = (t_end - t_first) / (wps.len() - 1) as f64;
    let dt_play = f64::max(MIN_DT_FLOOR_S, avg_dt / speed);

    // Grid points strictly before the end, plus the final waypoint
    let points = (t_end / dt_play).ceil() + 1.0;
    if !points.is_finite() || points > MAX_RESAMPLED_POINTS as f64 {
        return Err(TrajError::TooManySamples {
            points,
            max: MAX_RESAMPLED_POINTS,
        });
    }

    let mut out = Vec::with_capacity(points as usize);

    // Stop short of the end by a fraction of a step so rounding can't add a near duplicate
    let mut k = 0usize;
    loop {
        let t = k as f64 * dt_play;
        if t >= t_end - dt_play * 1e-6 {
            break;
        }
        out.push(Waypoint {
            t,
            q: sample_at(wps, t),
        });
        k += 1;
    }

    out.push(wps[wps.len() - 1].clone());

    Trajectory::new(1.0 / dt_play, traj.unit(), out)
}

/// Pose at time `t` by linear interpolation between the bracketing waypoints.
///
/// Before the first waypoint the first pose is held, after the last the last pose is held.
pub fn sample_at(wps: &[Waypoint], t: f64) -> JointPose {
    let first = &wps[0];
    let last = &wps[wps.len() - 1];

    if t <= first.t {
        return first.q.clone();
    }
    if t >= last.t {
        return last.q.clone();
    }

    // Index of the last waypoint at or before t, guaranteed < len - 1 by the checks above
    let j = wps.partition_point(|w| w.t <= t) - 1;
    let (w0, w1) = (&wps[j], &wps[j + 1]);

    let span = w1.t - w0.t;
    if span <= 0.0 {
        return w1.q.clone();
    }

    w0.q.lerp(&w1.q, (t - w0.t) / span)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::traj::wp;

    #[test]
    fn test_final_waypoint_exact() {
        let traj = Trajectory::new(
            1.0,
            None,
            vec![wp(0.0, vec![0.0; 7]), wp(1.0, vec![70.0; 7])],
        )
        .unwrap();

        let out = resample(&traj, 1.0).unwrap();
        let wps = out.waypoints();

        assert_eq!(wps[0].t, 0.0);
        assert_eq!(wps[0].q, JointPose::zeros(7));
        assert_eq!(wps.last().unwrap(), &wp(1.0, vec![70.0; 7]));

        // avg_dt is 1 s so the grid is [0, 1]
        assert_eq!(wps.len(), 2);
    }

    #[test]
    fn test_min_dt_floor_and_bounds() {
        let traj = Trajectory::new(
            15.0,
            None,
            vec![
                wp(0.0, vec![0.0, 10.0]),
                wp(0.1, vec![5.0, 10.0]),
                wp(0.35, vec![-5.0, 20.0]),
                wp(0.5, vec![0.0, 0.0]),
            ],
        )
        .unwrap();

        // Very fast speed would give a tiny step, the floor applies
        let out = resample(&traj, 100.0).unwrap();
        let wps = out.waypoints();

        assert_eq!(wps.last().unwrap().t, 0.5);
        for pair in wps.windows(2) {
            let dt = pair[1].t - pair[0].t;
            assert!(dt > 0.0 && dt <= MIN_DT_FLOOR_S + 1e-12);
        }

        // Every pose lies between the bracketing recorded poses
        let src = traj.waypoints();
        for w in wps {
            let j = src.partition_point(|s| s.t <= w.t).max(1) - 1;
            let k = (j + 1).min(src.len() - 1);
            for d in 0..2 {
                let lo = f64::min(src[j].q[d], src[k].q[d]);
                let hi = f64::max(src[j].q[d], src[k].q[d]);
                assert!(w.q[d] >= lo - 1e-9 && w.q[d] <= hi + 1e-9);
            }
        }
    }

    #[test]
    fn test_insufficient_samples() {
        let traj = Trajectory::new(15.0, None, vec![wp(0.0, vec![0.0])]).unwrap();
        assert!(matches!(
            resample(&traj, 1.0),
            Err(TrajError::InsufficientSamples(1))
        ));
    }

    #[test]
    fn test_huge_duration_rejected() {
        // The grid starts at zero, so a late recording with a fine step is too dense
        for t in &[1e9, 1e300] {
            let traj = Trajectory::new(
                15.0,
                None,
                vec![wp(*t, vec![0.0]), wp(*t + 1.0, vec![1.0])],
            )
            .unwrap();
            assert!(matches!(
                resample(&traj, 1.0),
                Err(TrajError::TooManySamples { .. })
            ));
        }

        // Long but sparse recordings resample onto a coarse grid and stay within bounds
        let sparse = Trajectory::new(
            15.0,
            None,
            vec![wp(0.0, vec![0.0]), wp(3600.0, vec![1.0]), wp(7200.0, vec![2.0])],
        )
        .unwrap();
        let out = resample(&sparse, 1.0).unwrap();
        assert_eq!(out.len(), 3);
        assert_eq!(out.waypoints()[1].q, JointPose::new(vec![1.0]));
    }

    #[test]
    fn test_repeated_timestamps() {
        let traj = Trajectory::new(
            15.0,
            None,
            vec![
                wp(0.0, vec![0.0]),
                wp(0.5, vec![1.0]),
                wp(0.5, vec![2.0]),
                wp(1.0, vec![2.0]),
            ],
        )
        .unwrap();

        assert_eq!(sample_at(traj.waypoints(), 0.5), JointPose::new(vec![2.0]));

        let out = resample(&traj, 1.0).unwrap();
        assert_eq!(out.waypoints().last().unwrap(), &wp(1.0, vec![2.0]));
        assert!(out.waypoints().windows(2).all(|w| w[1].t > w[0].t));
    }

    #[test]
    fn test_sample_at_holds_ends() {
        let wps = vec![wp(1.0, vec![1.0]), wp(2.0, vec![3.0])];

        assert_eq!(sample_at(&wps, 0.0), JointPose::new(vec![1.0]));
        assert_eq!(sample_at(&wps, 1.5), JointPose::new(vec![2.0]));
        assert_eq!(sample_at(&wps, 5.0), JointPose::new(vec![3.0]));
    }
}
