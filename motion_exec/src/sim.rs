//! # Simulated equipment
//!
//! In-process stand-ins for the arm and the legged base, used by the `--sim` executable mode and by
//! the tests. Both record every command they receive. The arm moves its measured pose towards the
//! last delivered demand while its holding force is applied, can drop commands deterministically to
//! mimic the lossy wire, and can be made unavailable to mimic a disconnected reader. The base can
//! be told to reject chosen commands.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::{
    mem::{discriminant, Discriminant},
    sync::{
        atomic::{AtomicBool, Ordering},
        Mutex, MutexGuard,
    },
    time::{Duration, Instant},
};

use comms_if::eqpt::{
    arm::{ArmChannel, ArmDems, JointPose, FORCE_RELEASED},
    base::{BaseChannel, BaseCmdKind, FootForce},
    ChannelError, LatestCell,
};

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// Foot force reported while standing.
const STANDING_FOOT_FORCE: FootForce = [60.0; 4];

/// Foot force reported while lying down.
const LYING_FOOT_FORCE: FootForce = [15.0; 4];

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A pose demand received by the simulated arm.
#[derive(Debug, Clone)]
pub struct SentPose {
    pub at: Instant,
    pub dems: ArmDems,

    /// False if the simulated wire dropped this command.
    pub delivered: bool,
}

/// Simulated arm.
pub struct SimArm {
    dof: usize,
    measured: LatestCell<JointPose>,

    /// Fraction of the remaining distance to the demand covered by each delivered command.
    tracking_gain: f64,

    /// Drop every n-th pose command.
    drop_every: Option<usize>,

    unavailable: AtomicBool,
    state: Mutex<SimArmState>,
}

#[derive(Debug, Default)]
struct SimArmState {
    force: u32,
    num_sends: usize,
    sent: Vec<SentPose>,
    force_log: Vec<u32>,
}

/// Simulated legged base.
pub struct SimBase {
    log: Mutex<Vec<(Instant, BaseCmdKind)>>,
    fail_on: Vec<Discriminant<BaseCmdKind>>,
    foot_force: LatestCell<FootForce>,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SimArm {
    /// Create a simulated arm resting at `initial`, which tracks demands exactly.
    pub fn new(initial: JointPose) -> Self {
        let measured = LatestCell::new();
        let dof = initial.dof();
        measured.publish(initial);

        Self {
            dof,
            measured,
            tracking_gain: 1.0,
            drop_every: None,
            unavailable: AtomicBool::new(false),
            state: Mutex::new(SimArmState::default()),
        }
    }

    /// Set the fraction of the remaining distance covered per delivered command, in (0, 1].
    pub fn with_tracking_gain(mut self, gain: f64) -> Self {
        self.tracking_gain = gain.max(1e-3).min(1.0);
        self
    }

    /// Drop every n-th pose command, `n >= 2`.
    pub fn with_drop_every(mut self, n: usize) -> Self {
        self.drop_every = Some(n.max(2));
        self
    }

    /// Make pose reads fail (or succeed again).
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Move the measured pose directly, as if the arm were pushed by hand.
    pub fn set_measured(&self, pose: JointPose) {
        self.measured.publish(pose);
    }

    /// Handle to the cell holding the measured pose.
    pub fn measured(&self) -> LatestCell<JointPose> {
        self.measured.clone()
    }

    /// All pose commands received so far.
    pub fn sent(&self) -> Vec<SentPose> {
        self.lock().sent.clone()
    }

    /// All holding force levels set so far, releases are recorded as `FORCE_RELEASED`.
    pub fn force_log(&self) -> Vec<u32> {
        self.lock().force_log.clone()
    }

    /// Current holding force level.
    pub fn force(&self) -> u32 {
        self.lock().force
    }

    fn lock(&self) -> MutexGuard<'_, SimArmState> {
        // A panicking test thread must not hide the log from the assertions that follow
        match self.state.lock() {
            Ok(g) => g,
            Err(p) => p.into_inner(),
        }
    }
}

impl ArmChannel for SimArm {
    fn dof(&self) -> usize {
        self.dof
    }

    fn set_force(&self, level: u32) -> Result<(), ChannelError> {
        let mut state = self.lock();
        state.force = level;
        state.force_log.push(level);
        Ok(())
    }

    fn release_force(&self) -> Result<(), ChannelError> {
        self.set_force(FORCE_RELEASED)
    }

    fn send_pose(&self, dems: &ArmDems) -> Result<(), ChannelError> {
        if dems.pose.dof() != self.dof {
            return Err(ChannelError::Rejected(format!(
                "expected {} joint angles, got {}",
                self.dof,
                dems.pose.dof()
            )));
        }

        let mut state = self.lock();
        state.num_sends += 1;

        let delivered = match self.drop_every {
            Some(n) => state.num_sends % n != 0,
            None => true,
        };

        state.sent.push(SentPose {
            at: Instant::now(),
            dems: dems.clone(),
            delivered,
        });

        // A released arm doesn't follow demands
        if delivered && state.force != FORCE_RELEASED {
            if let Some(current) = self.measured.latest() {
                self.measured
                    .publish(current.lerp(&dems.pose, self.tracking_gain));
            }
        }

        Ok(())
    }

    fn read_pose(&self, timeout: Duration) -> Option<JointPose> {
        if self.unavailable.load(Ordering::SeqCst) {
            std::thread::sleep(timeout);
            return None;
        }

        self.measured.latest()
    }
}

impl SimBase {
    pub fn new() -> Self {
        let foot_force = LatestCell::new();
        foot_force.publish(LYING_FOOT_FORCE);

        Self {
            log: Mutex::new(Vec::new()),
            fail_on: Vec::new(),
            foot_force,
        }
    }

    /// Reject every command of the same kind as `cmd`.
    pub fn failing_on(mut self, cmd: BaseCmdKind) -> Self {
        self.fail_on.push(discriminant(&cmd));
        self
    }

    /// All commands accepted so far.
    pub fn log(&self) -> Vec<(Instant, BaseCmdKind)> {
        match self.log.lock() {
            Ok(l) => l.clone(),
            Err(p) => p.into_inner().clone(),
        }
    }

    /// Accepted commands without their timestamps.
    pub fn commands(&self) -> Vec<BaseCmdKind> {
        self.log().into_iter().map(|(_, c)| c).collect()
    }
}

impl Default for SimBase {
    fn default() -> Self {
        Self::new()
    }
}

impl BaseChannel for SimBase {
    fn command(&self, cmd: BaseCmdKind) -> Result<(), ChannelError> {
        if self.fail_on.contains(&discriminant(&cmd)) {
            return Err(ChannelError::Rejected(format!("{:?} rejected", cmd)));
        }

        match cmd {
            BaseCmdKind::StandUp | BaseCmdKind::RecoveryStand => {
                self.foot_force.publish(STANDING_FOOT_FORCE)
            }
            BaseCmdKind::StandDown => self.foot_force.publish(LYING_FOOT_FORCE),
            BaseCmdKind::Damp => self.foot_force.publish([0.0; 4]),
            _ => (),
        }

        match self.log.lock() {
            Ok(mut l) => l.push((Instant::now(), cmd)),
            Err(p) => p.into_inner().push((Instant::now(), cmd)),
        }

        Ok(())
    }

    fn foot_force(&self) -> Option<FootForce> {
        self.foot_force.latest()
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_sim_arm_tracks_when_locked() {
        let arm = SimArm::new(JointPose::zeros(2));
        let dems = ArmDems::from_pose(JointPose::new(vec![10.0, -10.0]));

        // Released, the demand is logged but ignored
        arm.send_pose(&dems).unwrap();
        assert_eq!(arm.read_pose(Duration::from_millis(1)), Some(JointPose::zeros(2)));

        arm.set_force(50000).unwrap();
        arm.send_pose(&dems).unwrap();
        assert_eq!(arm.read_pose(Duration::from_millis(1)), Some(dems.pose.clone()));
        assert_eq!(arm.sent().len(), 2);
        assert_eq!(arm.force_log(), vec![50000]);
    }

    #[test]
    fn test_sim_arm_drops_and_unavailable() {
        let arm = SimArm::new(JointPose::zeros(1)).with_drop_every(2);
        arm.set_force(1).unwrap();

        for i in 0..4 {
            arm.send_pose(&ArmDems::from_pose(JointPose::new(vec![i as f64])))
                .unwrap();
        }
        let delivered: Vec<bool> = arm.sent().iter().map(|s| s.delivered).collect();
        assert_eq!(delivered, vec![true, false, true, false]);

        arm.set_unavailable(true);
        assert_eq!(arm.read_pose(Duration::from_millis(1)), None);
    }

    #[test]
    fn test_sim_base_fail_on() {
        let base = SimBase::new().failing_on(BaseCmdKind::StandDown);

        base.stand_up().unwrap();
        assert_eq!(base.foot_force(), Some(STANDING_FOOT_FORCE));
        assert!(base.stand_down().is_err());
        assert_eq!(base.commands(), vec![BaseCmdKind::StandUp]);
    }
}
