//! # Profile shaper
//!
//! Rest-to-rest motion profiles evaluated online, one tick at a time.
//!
//! For every joint a seven phase double-S profile (jerk limited) or a three phase trapezoidal
//! profile (acceleration limited) is planned over the distance to the target. The slower joints
//! set the duration and every other joint's profile is stretched in time to finish together, which
//! scales its velocity, acceleration and jerk down by the stretch factor to the first, second and
//! third power. Each tick then samples the planned profiles, so consecutive samples differ by at
//! most `A * dt` in velocity and `J * dt` in acceleration.
//!
//! Profiles can only be planned from rest. If the shaper is handed a moving state which it did not
//! produce itself (a new target mid-motion, or a state from elsewhere) it first brakes to rest
//! under the same limits and then plans from there.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use serde::{Deserialize, Serialize};

use super::{
    KinematicState, LmtgError, MotionLimits, ShaperFault, ShaperStatus, TrajectoryShaper,
};
use comms_if::eqpt::arm::JointPose;
use util::maths::sign;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Distances below this are treated as already reached.
const MIN_DISTANCE: f64 = 1e-12;

/// Relative tolerance when checking a state against the one the shaper produced.
const STATE_MATCH_TOL: f64 = 1e-9;

/// Braking which takes longer than this is reported as a fault.
const MAX_BRAKE_TICKS: usize = 10_000;

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// Shape of the planned profiles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileKind {
    /// Jerk limited seven phase profile.
    DoubleS,

    /// Velocity and acceleration limited profile, the jerk limit is ignored.
    Trapezoid,
}

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Shaper which samples time-synchronised rest-to-rest profiles.
#[derive(Debug, Clone)]
pub struct ProfileShaper {
    kind: ProfileKind,
    dt: f64,
    plan: Option<Plan>,
    brake_ticks: usize,
}

/// Profiles of all joints towards one target.
#[derive(Debug, Clone)]
struct Plan {
    start: Vec<f64>,
    target: JointPose,
    axes: Vec<AxisProfile>,
    duration: f64,
    tick: usize,

    /// Last state returned, a different current state invalidates the plan.
    expected: KinematicState,
}

/// Rest-to-rest profile of one joint over the distance `h >= 0`.
///
/// `tj` is the duration of a jerk phase, `ta` of the whole acceleration half, `tv` of the cruise.
/// `time_scale` stretches the profile to the synchronised duration.
#[derive(Debug, Clone, Copy, Default)]
struct AxisProfile {
    dir: f64,
    h: f64,
    tj: f64,
    ta: f64,
    tv: f64,
    jerk: f64,
    a_peak: f64,
    v_peak: f64,
    time_scale: f64,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl ProfileShaper {
    /// Create a new shaper ticking at `control_hz`.
    pub fn new(kind: ProfileKind, control_hz: f64) -> Result<Self, LmtgError> {
        if !control_hz.is_finite() || control_hz <= 0.0 {
            return Err(LmtgError::InvalidControlRate(control_hz));
        }

        Ok(Self {
            kind,
            dt: 1.0 / control_hz,
            plan: None,
            brake_ticks: 0,
        })
    }

    pub fn kind(&self) -> ProfileKind {
        self.kind
    }

    /// Jerk limit actually applied for a joint.
    fn jerk_limit(&self, limits: &MotionLimits, i: usize) -> f64 {
        match self.kind {
            ProfileKind::DoubleS => limits.max_jerk()[i],
            ProfileKind::Trapezoid => std::f64::INFINITY,
        }
    }

    /// One tick of braking towards rest.
    ///
    /// Each joint decelerates along `a = -sign(v) * min(A, sqrt(2 J |v|))`, the fastest approach to
    /// rest that can still ramp the acceleration back to zero. The result is then bounded by the
    /// jerk limit and by the largest acceleration that can be ramped out before the velocity limit
    /// is hit. Once a joint is within one tick of rest it is stopped outright.
    fn brake(
        &mut self,
        current: &KinematicState,
        limits: &MotionLimits,
    ) -> (KinematicState, ShaperStatus) {
        self.brake_ticks += 1;
        if self.brake_ticks > MAX_BRAKE_TICKS {
            return (
                current.clone(),
                ShaperStatus::Fault(ShaperFault::BrakeTimeout(MAX_BRAKE_TICKS)),
            );
        }

        let dt = self.dt;
        let mut next = current.clone();

        for i in 0..current.dof() {
            let (p, v, a) = (
                current.position[i],
                current.velocity[i],
                current.acceleration[i],
            );
            let vm = limits.max_velocity()[i];
            let am = limits.max_acceleration()[i];
            let jm = self.jerk_limit(limits, i);

            if v.abs() <= am * dt && a.abs() <= jm * dt {
                next.velocity[i] = 0.0;
                next.acceleration[i] = 0.0;
                continue;
            }

            let a_des = if v != 0.0 {
                -sign(v) * f64::min(am, (2.0 * jm * v.abs()).sqrt())
            } else {
                0.0
            };

            let upper = f64::min(am, safe_acc(vm - v, jm, dt));
            let lower = f64::max(-am, -safe_acc(vm + v, jm, dt));

            // Manual bounds so an empty window can't panic
            let lo = f64::max(lower, a - jm * dt);
            let hi = f64::min(upper, a + jm * dt);
            let a_next = a_des.max(lo).min(hi);

            let v_next = v + a_next * dt;
            next.acceleration[i] = a_next;
            next.velocity[i] = v_next;
            next.position[i] = p + v_next * dt;
        }

        (next, ShaperStatus::Working)
    }
}

impl TrajectoryShaper for ProfileShaper {
    fn step(
        &mut self,
        current: &KinematicState,
        target: &JointPose,
        limits: &MotionLimits,
    ) -> (KinematicState, ShaperStatus) {
        let dof = target.dof();
        if !current.is_consistent() || current.dof() != dof || limits.dof() != dof {
            return (
                current.clone(),
                ShaperStatus::Fault(ShaperFault::DofMismatch),
            );
        }
        if !current.is_finite() || !target.is_finite() {
            return (current.clone(), ShaperStatus::Fault(ShaperFault::NonFinite));
        }

        let plan_valid = match self.plan {
            Some(ref p) => p.target == *target && states_match(&p.expected, current),
            None => false,
        };
        if !plan_valid {
            self.plan = None;
        }

        if self.plan.is_none() {
            if !current.is_at_rest() {
                return self.brake(current, limits);
            }
            self.brake_ticks = 0;

            let jerks: Vec<f64> = (0..dof).map(|i| self.jerk_limit(limits, i)).collect();
            match Plan::new(current, target, limits, &jerks) {
                Some(p) => self.plan = Some(p),
                None => return (KinematicState::at_rest(target), ShaperStatus::Finished),
            }
        }

        let dt = self.dt;
        let next = match self.plan {
            Some(ref mut plan) => {
                plan.tick += 1;
                let t = plan.tick as f64 * dt;

                if t >= plan.duration {
                    None
                } else {
                    let s = plan.sample(t);
                    plan.expected = s.clone();
                    Some(s)
                }
            }
            None => None,
        };

        match next {
            Some(s) => (s, ShaperStatus::Working),
            None => {
                self.plan = None;
                (KinematicState::at_rest(target), ShaperStatus::Finished)
            }
        }
    }

    fn reset(&mut self) {
        self.plan = None;
        self.brake_ticks = 0;
    }

    fn dt(&self) -> f64 {
        self.dt
    }
}

impl Plan {
    /// Plan from a state at rest, `None` if every joint is already at the target.
    fn new(
        current: &KinematicState,
        target: &JointPose,
        limits: &MotionLimits,
        jerks: &[f64],
    ) -> Option<Self> {
        let mut axes: Vec<AxisProfile> = (0..current.dof())
            .map(|i| {
                AxisProfile::plan(
                    target[i] - current.position[i],
                    limits.max_velocity()[i],
                    limits.max_acceleration()[i],
                    jerks[i],
                )
            })
            .collect();

        let duration = axes.iter().fold(0.0, |m, ax| f64::max(m, ax.duration()));
        if duration <= 0.0 {
            return None;
        }

        for ax in axes.iter_mut() {
            let d = ax.duration();
            ax.time_scale = if d > 0.0 { duration / d } else { 1.0 };
        }

        Some(Self {
            start: current.position.clone(),
            target: target.clone(),
            axes,
            duration,
            tick: 0,
            expected: current.clone(),
        })
    }

    fn sample(&self, t: f64) -> KinematicState {
        let dof = self.axes.len();
        let mut s = KinematicState {
            position: Vec::with_capacity(dof),
            velocity: Vec::with_capacity(dof),
            acceleration: Vec::with_capacity(dof),
        };

        for (ax, p0) in self.axes.iter().zip(self.start.iter()) {
            let k = ax.time_scale;
            let (p, v, a) = ax.sample(t / k);
            s.position.push(p0 + ax.dir * p);
            s.velocity.push(ax.dir * v / k);
            s.acceleration.push(ax.dir * a / (k * k));
        }

        s
    }
}

impl AxisProfile {
    /// Plan the minimum time profile over the signed distance `dist`.
    ///
    /// An infinite `jmax` gives a trapezoidal profile.
    fn plan(dist: f64, vmax: f64, amax: f64, jmax: f64) -> Self {
        let h = dist.abs();
        if h <= MIN_DISTANCE {
            return Self {
                time_scale: 1.0,
                ..Default::default()
            };
        }

        let (tj, ta, tv);

        if jmax.is_infinite() {
            let ta_full = vmax / amax;
            let tv_full = h / vmax - ta_full;

            if tv_full >= 0.0 {
                ta = ta_full;
                tv = tv_full;
            } else {
                ta = (h / amax).sqrt();
                tv = 0.0;
            }
            tj = 0.0;
        } else {
            // Acceleration half, assuming the velocity limit is reached
            let (tj_full, ta_full) = if vmax * jmax >= amax * amax {
                (amax / jmax, amax / jmax + vmax / amax)
            } else {
                let tj = (vmax / jmax).sqrt();
                (tj, 2.0 * tj)
            };
            let tv_full = h / vmax - ta_full;

            if tv_full >= 0.0 {
                tj = tj_full;
                ta = ta_full;
                tv = tv_full;
            } else if h >= 2.0 * amax.powi(3) / (jmax * jmax) {
                // Too short to cruise, acceleration limit still reached
                tj = amax / jmax;
                ta = tj / 2.0 + (tj * tj / 4.0 + h / amax).sqrt();
                tv = 0.0;
            } else {
                // Neither the velocity nor the acceleration limit is reached
                tj = (h / (2.0 * jmax)).cbrt();
                ta = 2.0 * tj;
                tv = 0.0;
            }
        }

        let a_peak = if tj > 0.0 { jmax * tj } else { amax };

        Self {
            dir: sign(dist),
            h,
            tj,
            ta,
            tv,
            jerk: jmax,
            a_peak,
            v_peak: a_peak * (ta - tj),
            time_scale: 1.0,
        }
    }

    fn duration(&self) -> f64 {
        2.0 * self.ta + self.tv
    }

    /// Distance, velocity and acceleration along the profile at unscaled time `t`.
    fn sample(&self, t: f64) -> (f64, f64, f64) {
        let total = self.duration();
        if total <= 0.0 {
            return (0.0, 0.0, 0.0);
        }

        let t = t.max(0.0).min(total);

        if t <= self.ta {
            self.sample_acc(t)
        } else if t <= self.ta + self.tv {
            (
                self.v_peak * self.ta / 2.0 + self.v_peak * (t - self.ta),
                self.v_peak,
                0.0,
            )
        } else {
            // The deceleration half mirrors the acceleration half
            let (p, v, a) = self.sample_acc(total - t);
            (self.h - p, v, -a)
        }
    }

    /// Acceleration half, `0 <= t <= ta`. Zero length jerk phases are never entered.
    fn sample_acc(&self, t: f64) -> (f64, f64, f64) {
        let (j, tj, ta, ap, vp) = (self.jerk, self.tj, self.ta, self.a_peak, self.v_peak);

        if t < tj {
            (j * t.powi(3) / 6.0, j * t * t / 2.0, j * t)
        } else if t <= ta - tj {
            (
                ap / 6.0 * (3.0 * t * t - 3.0 * tj * t + tj * tj),
                ap * (t - tj / 2.0),
                ap,
            )
        } else {
            let tau = ta - t;
            (
                vp * ta / 2.0 - vp * tau + j * tau.powi(3) / 6.0,
                vp - j * tau * tau / 2.0,
                j * tau,
            )
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Largest acceleration from which the acceleration can still be ramped down to zero, one jerk
/// limited tick at a time, while gaining no more than `margin` velocity, and which doesn't itself
/// overshoot `margin` in one tick.
///
/// Solves `g * (g + J dt) = 2 J margin` for `g`.
fn safe_acc(margin: f64, jmax: f64, dt: f64) -> f64 {
    let per_tick = margin / dt;

    if jmax.is_infinite() {
        return per_tick;
    }

    let jdt = jmax * dt;
    let disc = f64::max(0.0, jdt * jdt + 8.0 * jmax * margin);
    f64::min((-jdt + disc.sqrt()) / 2.0, per_tick)
}

/// True if the two states are equal up to rounding.
fn states_match(a: &KinematicState, b: &KinematicState) -> bool {
    let close = |x: &[f64], y: &[f64]| {
        x.len() == y.len()
            && x
                .iter()
                .zip(y.iter())
                .all(|(p, q)| (p - q).abs() <= STATE_MATCH_TOL * (1.0 + p.abs()))
    };

    close(&a.position, &b.position)
        && close(&a.velocity, &b.velocity)
        && close(&a.acceleration, &b.acceleration)
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    const TOL: f64 = 1e-9;

    /// Assert that going from `prev` to `next` respects the limits.
    fn check_transition(
        prev: &KinematicState,
        next: &KinematicState,
        limits: &MotionLimits,
        dt: f64,
        check_jerk: bool,
    ) {
        for i in 0..prev.dof() {
            let vm = limits.max_velocity()[i];
            let am = limits.max_acceleration()[i];
            let jm = limits.max_jerk()[i];

            assert!(
                next.velocity[i].abs() <= vm * (1.0 + TOL),
                "velocity {} above {}",
                next.velocity[i],
                vm
            );
            assert!(
                next.acceleration[i].abs() <= am * (1.0 + TOL),
                "acceleration {} above {}",
                next.acceleration[i],
                am
            );
            assert!(
                (next.position[i] - prev.position[i]).abs() <= vm * dt * (1.0 + TOL) + TOL,
                "position step {} above {}",
                next.position[i] - prev.position[i],
                vm * dt
            );
            assert!(
                (next.velocity[i] - prev.velocity[i]).abs() <= am * dt * (1.0 + TOL) + TOL,
                "velocity step {} above {}",
                next.velocity[i] - prev.velocity[i],
                am * dt
            );
            if check_jerk {
                assert!(
                    (next.acceleration[i] - prev.acceleration[i]).abs()
                        <= jm * dt * (1.0 + TOL) + TOL,
                    "acceleration step {} above {}",
                    next.acceleration[i] - prev.acceleration[i],
                    jm * dt
                );
            }
        }
    }

    /// Run the shaper to the target, checking every transition. Returns the number of ticks.
    fn run_to(
        shaper: &mut ProfileShaper,
        start: KinematicState,
        target: &JointPose,
        limits: &MotionLimits,
    ) -> (usize, KinematicState) {
        let check_jerk = shaper.kind() == ProfileKind::DoubleS;
        let mut state = start;

        for tick in 1..100_000 {
            let (next, status) = shaper.step(&state, target, limits);
            check_transition(&state, &next, limits, shaper.dt(), check_jerk);
            state = next;

            match status {
                ShaperStatus::Working => (),
                ShaperStatus::Finished => return (tick, state),
                ShaperStatus::Fault(f) => panic!("Shaper fault: {}", f),
            }
        }

        panic!("Shaper did not finish");
    }

    #[test]
    fn test_single_joint_converges_within_vmax() {
        let limits = MotionLimits::uniform(7, 5.0, 10.0, 100.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();
        let target = JointPose::new(vec![10.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);

        let (ticks, end) = run_to(
            &mut shaper,
            KinematicState::at_rest(&JointPose::zeros(7)),
            &target,
            &limits,
        );

        assert_eq!(end, KinematicState::at_rest(&target));

        // 10 at 5 per second takes at least 2 s, plus the ramps
        assert!(ticks > 200);
        assert!(ticks < 400);
    }

    #[test]
    fn test_short_moves() {
        let limits = MotionLimits::uniform(1, 80.0, 300.0, 4000.0).unwrap();

        // Acceleration limit reached without cruising, then neither limit reached
        for &d in &[5.0, 0.05, -0.001] {
            let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 200.0).unwrap();
            let target = JointPose::new(vec![d]);
            let (_, end) = run_to(
                &mut shaper,
                KinematicState::at_rest(&JointPose::zeros(1)),
                &target,
                &limits,
            );
            assert_eq!(end.position, vec![d]);
        }
    }

    #[test]
    fn test_axes_finish_together() {
        let limits = MotionLimits::uniform(2, 5.0, 10.0, 100.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();
        let target = JointPose::new(vec![10.0, -1.0]);

        let mut state = KinematicState::at_rest(&JointPose::zeros(2));
        let mut working = Vec::new();
        loop {
            let (next, status) = shaper.step(&state, &target, &limits);
            if status == ShaperStatus::Finished {
                break;
            }
            working.push(next.clone());
            state = next;
        }

        // Both profiles are symmetric and share one duration, so half way through each joint has
        // covered half of its distance
        let mid = &working[working.len() / 2];
        assert!((mid.position[0] - 5.0).abs() < 0.2);
        assert!((mid.position[1] + 0.5).abs() < 0.02);
        assert!(mid.velocity[1] < 0.0);
    }

    #[test]
    fn test_trapezoid() {
        let limits = MotionLimits::uniform(3, 2.0, 4.0, 1.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::Trapezoid, 50.0).unwrap();
        let target = JointPose::new(vec![3.0, -2.0, 0.5]);

        let (ticks, end) = run_to(
            &mut shaper,
            KinematicState::at_rest(&JointPose::zeros(3)),
            &target,
            &limits,
        );

        assert_eq!(end.position, target.as_slice().to_vec());

        // 0.5 s ramps and 1 s cruise for the longest joint
        assert!((ticks as i64 - 100).abs() <= 2);
    }

    #[test]
    fn test_retarget_mid_motion() {
        let limits = MotionLimits::uniform(2, 5.0, 10.0, 100.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();
        let first = JointPose::new(vec![10.0, 10.0]);
        let second = JointPose::new(vec![-5.0, 2.0]);

        let mut state = KinematicState::at_rest(&JointPose::zeros(2));
        for _ in 0..80 {
            let (next, status) = shaper.step(&state, &first, &limits);
            assert_eq!(status, ShaperStatus::Working);
            check_transition(&state, &next, &limits, shaper.dt(), true);
            state = next;
        }
        assert!(!state.is_at_rest());

        // Brakes from full motion then heads for the new target
        let (_, end) = run_to(&mut shaper, state, &second, &limits);
        assert_eq!(end, KinematicState::at_rest(&second));
    }

    #[test]
    fn test_brake_from_foreign_state() {
        let limits = MotionLimits::uniform(1, 5.0, 10.0, 100.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();

        let moving = KinematicState {
            position: vec![0.0],
            velocity: vec![-4.0],
            acceleration: vec![0.0],
        };
        let target = JointPose::new(vec![1.0]);

        let (_, end) = run_to(&mut shaper, moving, &target, &limits);
        assert_eq!(end.position, vec![1.0]);
    }

    #[test]
    fn test_already_there() {
        let limits = MotionLimits::uniform(2, 1.0, 1.0, 1.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();
        let pose = JointPose::new(vec![1.0, 2.0]);

        let (state, status) = shaper.step(&KinematicState::at_rest(&pose), &pose, &limits);
        assert_eq!(status, ShaperStatus::Finished);
        assert_eq!(state, KinematicState::at_rest(&pose));
    }

    #[test]
    fn test_faults() {
        let limits = MotionLimits::uniform(2, 1.0, 1.0, 1.0).unwrap();
        let mut shaper = ProfileShaper::new(ProfileKind::DoubleS, 100.0).unwrap();
        let state = KinematicState::at_rest(&JointPose::zeros(2));

        let (out, status) = shaper.step(&state, &JointPose::zeros(3), &limits);
        assert_eq!(status, ShaperStatus::Fault(ShaperFault::DofMismatch));
        assert_eq!(out, state);

        let (_, status) = shaper.step(
            &state,
            &JointPose::new(vec![std::f64::NAN, 0.0]),
            &limits,
        );
        assert_eq!(status, ShaperStatus::Fault(ShaperFault::NonFinite));

        assert!(ProfileShaper::new(ProfileKind::DoubleS, 0.0).is_err());
    }
}
