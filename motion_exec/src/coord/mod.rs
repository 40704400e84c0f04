//! # Multi-actuator coordinator
//!
//! Runs the arm's pose sequence and the base's actions as two concurrent tasks. The tasks only
//! synchronise at milestones: the arm raises a signal when it reaches a milestone's pose, and the
//! base either waits for that signal or for a fixed delay from the start of the run before
//! performing the milestone's action. A milestone can also hold the arm until the base is done.
//!
//! If either task fails the other is cancelled through a child of the caller's token, and the run
//! ends `Aborted`. Outside milestones the two tasks' commands interleave freely.

// ------------------------------------------------------------------------------------------------
// MODULES
// ------------------------------------------------------------------------------------------------

mod rendezvous;

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::{collections::HashSet, time::Instant};

use crate::{
    arm_seq::{self, ArmTarget, IkSolver, ResolvedSequence, SequenceError},
    base_ctrl::{self, BaseAction, BaseError, BaseParams},
    monitor::{ConvergeError, ConvergeParams},
};
use comms_if::eqpt::{
    arm::{ArmChannel, AuxParams},
    base::BaseChannel,
    ChannelError,
};
use util::{
    cancel::{CancelToken, Cancelled},
    time::secs_to_duration,
};

pub use rendezvous::{MilestoneEvent, Rendezvous};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// A coordinated arm and base sequence, as loaded from a plan file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequencePlan {
    /// Holding force the arm is locked with for the whole sequence.
    #[serde(default = "SequencePlan::default_force")]
    pub force: u32,

    /// Units: seconds
    #[serde(default = "SequencePlan::default_lock_settle_s")]
    pub lock_settle_s: f64,

    /// Skip unreachable Cartesian targets instead of refusing the plan.
    #[serde(default)]
    pub skip_unreachable: bool,

    /// Put the base in a recovery stand before the first milestone.
    #[serde(default)]
    pub prepare_base: bool,

    /// Park the base once the run is over, whatever its outcome.
    #[serde(default)]
    pub rest_base: bool,

    #[serde(default = "SequencePlan::default_aux")]
    pub aux: AuxParams,

    pub targets: Vec<ArmTarget>,

    #[serde(default)]
    pub milestones: Vec<Milestone>,
}

/// A named point of the arm sequence at which the base acts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    pub name: String,

    /// Index of the arm target the milestone is attached to.
    pub pose_index: usize,

    #[serde(default)]
    pub trigger: MilestoneTrigger,

    pub action: BaseAction,

    /// Keep the arm at the milestone's pose until the base action has finished.
    #[serde(default)]
    pub hold_arm: bool,
}

/// Summary of a coordinated run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub state: RunState,
    pub arm: TaskEnd,
    pub base: TaskEnd,

    /// Units: seconds
    pub duration_s: f64,

    pub milestones_fired: usize,
}

/// Runs sequence plans on one arm and one base.
pub struct Coordinator<'a> {
    arm: &'a dyn ArmChannel,
    base: &'a dyn BaseChannel,
    solver: Option<&'a dyn IkSolver>,
    converge: ConvergeParams,
    base_params: BaseParams,
    state: RunState,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// What starts a milestone's base action.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum MilestoneTrigger {
    /// The arm reaching the milestone's pose.
    ArmReached,

    /// A fixed delay from the start of the run.
    AfterDelay { delay_s: f64 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunState {
    NotStarted,
    Running,
    Completed,
    Aborted,
}

/// How one task of a run ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum TaskEnd {
    Completed,
    Cancelled,
    Failed(String),
}

#[derive(Debug, thiserror::Error)]
pub enum CoordError {
    #[error("Invalid sequence plan: {0}")]
    InvalidPlan(String),

    #[error("This coordinator has already run")]
    AlreadyRun,

    #[error(transparent)]
    Sequence(#[from] SequenceError),
}

/// Error ending one task of a run.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error("Could not lock the arm: {0}")]
    Lock(#[from] ChannelError),

    #[error(transparent)]
    Arm(#[from] SequenceError),

    #[error(transparent)]
    Base(#[from] BaseError),

    #[error("Task interrupted")]
    Cancelled(#[from] Cancelled),

    #[error("Task panicked")]
    Panicked,
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl SequencePlan {
    fn default_force() -> u32 {
        60_000
    }

    fn default_lock_settle_s() -> f64 {
        0.5
    }

    fn default_aux() -> AuxParams {
        AuxParams {
            mode: 1,
            habr: 20,
            ply: 3,
        }
    }

    /// Check milestone references and names before anything moves.
    pub fn validate(&self) -> Result<(), CoordError> {
        if self.targets.is_empty() {
            return Err(CoordError::InvalidPlan("the plan has no arm targets".into()));
        }

        let mut names = HashSet::new();
        for m in &self.milestones {
            if !names.insert(m.name.as_str()) {
                return Err(CoordError::InvalidPlan(format!(
                    "milestone name {:?} is used twice",
                    m.name
                )));
            }

            if m.pose_index >= self.targets.len() {
                return Err(CoordError::InvalidPlan(format!(
                    "milestone {:?} refers to target {} but there are only {}",
                    m.name,
                    m.pose_index,
                    self.targets.len()
                )));
            }

            if let MilestoneTrigger::AfterDelay { delay_s } = m.trigger {
                if !delay_s.is_finite() || delay_s < 0.0 {
                    return Err(CoordError::InvalidPlan(format!(
                        "milestone {:?} has an invalid delay of {} s",
                        m.name, delay_s
                    )));
                }
            }
        }

        Ok(())
    }
}

impl Default for MilestoneTrigger {
    fn default() -> Self {
        MilestoneTrigger::ArmReached
    }
}

impl TaskError {
    /// True if the task stopped because it was told to rather than because it failed.
    pub fn is_cancellation(&self) -> bool {
        match self {
            TaskError::Cancelled(_) => true,
            TaskError::Arm(SequenceError::NotReached {
                source: ConvergeError::Cancelled(_),
                ..
            }) => true,
            TaskError::Base(BaseError::Cancelled(_)) => true,
            _ => false,
        }
    }
}

impl<T> From<&Result<T, TaskError>> for TaskEnd {
    fn from(res: &Result<T, TaskError>) -> Self {
        match res {
            Ok(_) => TaskEnd::Completed,
            Err(e) if e.is_cancellation() => TaskEnd::Cancelled,
            Err(e) => TaskEnd::Failed(e.to_string()),
        }
    }
}

impl<'a> Coordinator<'a> {
    pub fn new(
        arm: &'a dyn ArmChannel,
        base: &'a dyn BaseChannel,
        solver: Option<&'a dyn IkSolver>,
        converge: ConvergeParams,
        base_params: BaseParams,
    ) -> Self {
        Self {
            arm,
            base,
            solver,
            converge,
            base_params,
            state: RunState::NotStarted,
        }
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Run a plan to completion.
    ///
    /// The plan is validated and every arm target resolved before anything moves, a problem there
    /// is returned as an error and the coordinator stays `NotStarted`. Once running, the outcome
    /// of each task is reported in the returned [`RunReport`].
    pub fn run(
        &mut self,
        plan: &SequencePlan,
        cancel: &CancelToken,
    ) -> Result<RunReport, CoordError> {
        if self.state != RunState::NotStarted {
            return Err(CoordError::AlreadyRun);
        }

        plan.validate()?;
        let seq = arm_seq::resolve(
            &plan.targets,
            self.solver,
            self.arm.dof(),
            plan.skip_unreachable,
        )?;

        info!(
            "Starting sequence of {} arm targets with {} milestones",
            seq.len(),
            plan.milestones.len()
        );
        self.state = RunState::Running;

        let start = Instant::now();
        let run_cancel = cancel.child();
        let rv = Rendezvous::new();
        let mut milestones_fired = 0;

        let (arm_res, base_res) = {
            let this = &*self;
            let fired = &mut milestones_fired;

            std::thread::scope(|s| {
                let arm = s.spawn(|| {
                    let res = this.arm_task(plan, &seq, &rv, &run_cancel);
                    cancel_on_failure("Arm", &res, &run_cancel);
                    res
                });
                let base = s.spawn(|| {
                    let res = this.base_task(plan, &rv, start, &run_cancel, fired);
                    cancel_on_failure("Base", &res, &run_cancel);
                    res
                });

                (
                    arm.join().unwrap_or(Err(TaskError::Panicked)),
                    base.join().unwrap_or(Err(TaskError::Panicked)),
                )
            })
        };

        if plan.rest_base {
            if let Err(e) = base_ctrl::safe_rest(self.base, &self.base_params) {
                warn!("Base could not be fully parked: {}", e);
            }
        }

        let report = RunReport {
            state: match (&arm_res, &base_res) {
                (Ok(_), Ok(_)) => RunState::Completed,
                _ => RunState::Aborted,
            },
            arm: TaskEnd::from(&arm_res),
            base: TaskEnd::from(&base_res),
            duration_s: start.elapsed().as_secs_f64(),
            milestones_fired,
        };
        self.state = report.state;

        match report.state {
            RunState::Completed => info!("Sequence completed in {:.2} s", report.duration_s),
            _ => warn!(
                "Sequence aborted after {:.2} s (arm: {:?}, base: {:?})",
                report.duration_s, report.arm, report.base
            ),
        }

        Ok(report)
    }

    fn arm_task(
        &self,
        plan: &SequencePlan,
        seq: &ResolvedSequence,
        rv: &Rendezvous,
        cancel: &CancelToken,
    ) -> Result<(), TaskError> {
        self.arm.set_force(plan.force)?;
        cancel.sleep(secs_to_duration(plan.lock_settle_s))?;

        for index in 0..seq.len() {
            arm_seq::drive_to(self.arm, seq, index, plan.aux, &self.converge, cancel)?;

            for m in plan.milestones.iter().filter(|m| m.pose_index == index) {
                rv.signal(&m.name, MilestoneEvent::ArmReached);

                if m.hold_arm {
                    info!("Arm holding at milestone {} until the base is done", m.name);
                    rv.wait(&m.name, MilestoneEvent::BaseDone, cancel)?;
                }
            }
        }

        Ok(())
    }

    fn base_task(
        &self,
        plan: &SequencePlan,
        rv: &Rendezvous,
        start: Instant,
        cancel: &CancelToken,
        fired: &mut usize,
    ) -> Result<(), TaskError> {
        if plan.prepare_base {
            base_ctrl::prepare(self.base, &self.base_params, cancel)?;
        }

        let mut order: Vec<&Milestone> = plan.milestones.iter().collect();
        order.sort_by_key(|m| m.pose_index);

        for m in order {
            match m.trigger {
                MilestoneTrigger::ArmReached => {
                    rv.wait(&m.name, MilestoneEvent::ArmReached, cancel)?
                }
                MilestoneTrigger::AfterDelay { delay_s } => {
                    cancel.sleep_until(start + secs_to_duration(delay_s))?
                }
            }

            info!("Milestone {}: base {:?}", m.name, m.action);
            base_ctrl::execute(self.base, m.action, &self.base_params, cancel)?;
            rv.signal(&m.name, MilestoneEvent::BaseDone);
            *fired += 1;
        }

        Ok(())
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Cancel the sibling task if this one failed.
fn cancel_on_failure<T>(task: &str, res: &Result<T, TaskError>, run_cancel: &CancelToken) {
    if let Err(e) = res {
        if !e.is_cancellation() {
            error!("{} task failed: {}", task, e);
            run_cancel.cancel();
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        arm_seq::{test::ReachSolver, CartesianTarget},
        ik::{IkParams, PlanarIk},
        sim::{SimArm, SimBase},
    };
    use comms_if::eqpt::{arm::JointPose, base::BaseCmdKind};
    use std::time::Duration;

    fn converge() -> ConvergeParams {
        ConvergeParams {
            tolerance: 0.5,
            interval_s: 0.001,
            max_attempts: 20,
            read_timeout_s: 0.001,
        }
    }

    fn base_params() -> BaseParams {
        BaseParams {
            cmd_period_s: 0.01,
            stop_wait_s: 0.0,
            stand_down_wait_s: 0.0,
            settle_s: 0.0,
            ..Default::default()
        }
    }

    fn joints(v: f64) -> ArmTarget {
        ArmTarget::Joint {
            joints: JointPose::new(vec![v; 7]),
        }
    }

    fn milestone(name: &str, pose_index: usize, action: BaseAction, hold_arm: bool) -> Milestone {
        Milestone {
            name: name.into(),
            pose_index,
            trigger: MilestoneTrigger::ArmReached,
            action,
            hold_arm,
        }
    }

    fn plan(milestones: Vec<Milestone>) -> SequencePlan {
        SequencePlan {
            force: 60_000,
            lock_settle_s: 0.0,
            skip_unreachable: false,
            prepare_base: false,
            rest_base: false,
            aux: SequencePlan::default_aux(),
            targets: vec![joints(10.0), joints(20.0), joints(30.0), joints(40.0)],
            milestones,
        }
    }

    #[test]
    fn test_run_completes_in_order() {
        let arm = SimArm::new(JointPose::zeros(7));
        let base = SimBase::new();
        let mut milestones = vec![
            milestone("down", 1, BaseAction::StandDown, true),
            milestone("up", 3, BaseAction::StandUp, false),
        ];
        milestones.push(Milestone {
            trigger: MilestoneTrigger::AfterDelay { delay_s: 0.05 },
            ..milestone("stop", 0, BaseAction::StopMove, false)
        });

        let mut coord = Coordinator::new(&arm, &base, None, converge(), base_params());
        let start = Instant::now();
        let report = coord.run(&plan(milestones), &CancelToken::new()).unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(coord.state(), RunState::Completed);
        assert_eq!(report.arm, TaskEnd::Completed);
        assert_eq!(report.base, TaskEnd::Completed);
        assert_eq!(report.milestones_fired, 3);
        assert_eq!(arm.force_log(), vec![60_000]);

        let log = base.log();
        assert_eq!(
            log.iter().map(|(_, c)| *c).collect::<Vec<_>>(),
            vec![
                BaseCmdKind::StopMove,
                BaseCmdKind::StandDown,
                BaseCmdKind::StandUp
            ]
        );
        assert!(log[0].0 >= start + Duration::from_millis(50));

        // The arm reached target 1 before the base went down, and held there until it had
        let down_at = log[1].0;
        let sent = arm.sent();
        let sent_to = |v: f64| sent.iter().filter(move |s| s.dems.pose[0] == v);
        assert!(sent_to(20.0).all(|s| s.at < down_at));
        assert!(sent_to(30.0).all(|s| s.at > down_at));
        assert!(sent_to(40.0).all(|s| s.at < log[2].0));
        assert_eq!(arm.measured().latest(), Some(JointPose::new(vec![40.0; 7])));
    }

    #[test]
    fn test_base_failure_aborts_and_cancels_arm() {
        let arm = SimArm::new(JointPose::zeros(7));
        let base = SimBase::new().failing_on(BaseCmdKind::StandDown);
        let cancel = CancelToken::new();

        let mut coord = Coordinator::new(&arm, &base, None, converge(), base_params());
        let report = coord
            .run(
                &plan(vec![milestone("down", 1, BaseAction::StandDown, true)]),
                &cancel,
            )
            .unwrap();

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.arm, TaskEnd::Cancelled);
        assert!(matches!(report.base, TaskEnd::Failed(_)));
        assert_eq!(report.milestones_fired, 0);

        // The arm never went past the milestone, and the caller's token is untouched
        assert!(arm.sent().iter().all(|s| s.dems.pose[0] <= 20.0));
        assert!(!cancel.is_cancelled());

        assert!(matches!(
            coord.run(&plan(vec![]), &cancel),
            Err(CoordError::AlreadyRun)
        ));
    }

    #[test]
    fn test_operator_cancel() {
        let arm = SimArm::new(JointPose::zeros(7));
        let base = SimBase::new();
        let cancel = CancelToken::new();
        let remote = cancel.clone();

        // The base waits far longer than the test lasts
        let m = Milestone {
            trigger: MilestoneTrigger::AfterDelay { delay_s: 60.0 },
            ..milestone("late", 0, BaseAction::StandUp, true)
        };

        let canceller = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let mut coord = Coordinator::new(&arm, &base, None, converge(), base_params());
        let report = coord.run(&plan(vec![m]), &cancel).unwrap();
        canceller.join().unwrap();

        assert_eq!(report.state, RunState::Aborted);
        assert_eq!(report.arm, TaskEnd::Cancelled);
        assert_eq!(report.base, TaskEnd::Cancelled);
        assert!(base.commands().is_empty());
        assert!(report.duration_s < 5.0);
    }

    #[test]
    fn test_invalid_plans() {
        let arm = SimArm::new(JointPose::zeros(7));
        let base = SimBase::new();

        let bad_plans = vec![
            SequencePlan {
                targets: vec![],
                ..plan(vec![])
            },
            plan(vec![milestone("far", 4, BaseAction::StandUp, false)]),
            plan(vec![
                milestone("twice", 0, BaseAction::StandUp, false),
                milestone("twice", 1, BaseAction::StandDown, false),
            ]),
            plan(vec![Milestone {
                trigger: MilestoneTrigger::AfterDelay { delay_s: -1.0 },
                ..milestone("neg", 0, BaseAction::StandUp, false)
            }]),
        ];

        for p in &bad_plans {
            let mut coord = Coordinator::new(&arm, &base, None, converge(), base_params());
            assert!(matches!(
                coord.run(p, &CancelToken::new()),
                Err(CoordError::InvalidPlan(_))
            ));
            assert_eq!(coord.state(), RunState::NotStarted);
        }

        // Unreachable targets are refused before the arm is even locked
        let mut unreachable = plan(vec![]);
        unreachable.targets.push(ArmTarget::Cartesian(CartesianTarget {
            position: [2.0, 0.0, 0.0],
            orientation: [0.0, 0.0, -1.0],
            gripper: None,
        }));
        let solver: &dyn IkSolver = &ReachSolver;
        let mut coord = Coordinator::new(&arm, &base, Some(solver), converge(), base_params());
        assert!(matches!(
            coord.run(&unreachable, &CancelToken::new()),
            Err(CoordError::Sequence(SequenceError::Unreachable { index: 4, .. }))
        ));
        assert!(arm.force_log().is_empty());
        assert!(arm.sent().is_empty());
    }

    #[test]
    fn test_skipped_target_still_fires_milestone() {
        let arm = SimArm::new(JointPose::zeros(7));
        let base = SimBase::new();
        let solver: &dyn IkSolver = &ReachSolver;

        let mut p = plan(vec![milestone("grasp", 1, BaseAction::StandDown, true)]);
        p.skip_unreachable = true;
        p.rest_base = true;
        p.targets[1] = ArmTarget::Cartesian(CartesianTarget {
            position: [2.0, 0.0, 0.0],
            orientation: [0.0, 0.0, -1.0],
            gripper: None,
        });

        let mut coord = Coordinator::new(&arm, &base, Some(solver), converge(), base_params());
        let report = coord.run(&p, &CancelToken::new()).unwrap();

        assert_eq!(report.state, RunState::Completed);
        assert_eq!(report.milestones_fired, 1);
        assert_eq!(
            base.commands(),
            vec![
                BaseCmdKind::StandDown,
                BaseCmdKind::StopMove,
                BaseCmdKind::StandDown,
                BaseCmdKind::Damp
            ]
        );
    }

    #[test]
    fn test_plan_from_toml() {
        let p: SequencePlan = util::params::from_str(
            r#"
            skip_unreachable = true

            [[targets]]
            joints = [0.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]

            [[targets]]
            position = [0.3, 0.0, 0.02]
            orientation = [0.0, 0.0, -1.0]
            gripper = 20.0

            [[milestones]]
            name = "base_down"
            pose_index = 1
            hold_arm = true
            action = { kind = "StandDown" }

            [[milestones]]
            name = "walk"
            pose_index = 1
            trigger = { kind = "AfterDelay", delay_s = 2.5 }
            action = { kind = "Move", dx_m = 0.5 }
            "#,
        )
        .unwrap();

        assert_eq!(p.force, 60_000);
        assert_eq!(p.lock_settle_s, 0.5);
        assert_eq!(p.aux, SequencePlan::default_aux());
        assert!(p.skip_unreachable);
        assert_eq!(p.targets.len(), 2);
        assert_eq!(
            p.milestones[0],
            milestone("base_down", 1, BaseAction::StandDown, true)
        );
        assert_eq!(
            p.milestones[1].trigger,
            MilestoneTrigger::AfterDelay { delay_s: 2.5 }
        );
        assert!(p.validate().is_ok());
    }

    #[test]
    fn test_shipped_plan_resolves() {
        let p: SequencePlan =
            util::params::from_str(include_str!("../../../params/pick_place.toml")).unwrap();
        p.validate().unwrap();

        let ik = PlanarIk::new(IkParams::default());
        let seq = arm_seq::resolve(&p.targets, Some(&ik as &dyn IkSolver), 7, false).unwrap();

        assert_eq!(seq.len(), 4);
        assert!(seq.poses.iter().all(|q| q.is_some()));
    }
}
