//! Waypoint decimation

use crate::traj::Waypoint;

/// Drop waypoints that are both close in time and nearly identical to the last kept one.
///
/// A waypoint is kept if at least `min_dt` seconds separate it from the last kept waypoint, or if
/// any joint moved by at least `min_delta`. The first and last waypoints are always kept, so
/// decimating an already decimated list with the same thresholds changes nothing.
pub fn decimate(waypoints: &[Waypoint], min_dt: f64, min_delta: f64) -> Vec<Waypoint> {
    let first = match waypoints.first() {
        Some(w) => w,
        None => return Vec::new(),
    };

    let mut keep = vec![first.clone()];
    let mut last_idx = 0;

    for (i, w) in waypoints.iter().enumerate().skip(1) {
        let last = &waypoints[last_idx];

        if w.t - last.t < min_dt {
            let dq = w.q.max_abs_diff(&last.q).unwrap_or(std::f64::INFINITY);
            if dq < min_delta {
                continue;
            }
        }

        keep.push(w.clone());
        last_idx = i;
    }

    if last_idx != waypoints.len() - 1 {
        keep.push(waypoints[waypoints.len() - 1].clone());
    }

    keep
}
