//! # Base control
//!
//! Executes high level actions on the legged base. Posture changes are single commands, while a
//! relative move is turned into a constant body velocity held for long enough to cover the
//! distance, since the sport controller only accepts velocity demands which must be refreshed.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::time::Instant;

use comms_if::eqpt::{
    base::{BaseChannel, BaseVel},
    ChannelError,
};
use util::{
    cancel::{CancelToken, Cancelled},
    time::secs_to_duration,
};

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// Parameters for base control.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseParams {
    /// Largest forward speed used for moves.
    ///
    /// Units: meters/second
    pub max_vx_ms: f64,

    /// Largest sideways speed used for moves.
    ///
    /// Units: meters/second
    pub max_vy_ms: f64,

    /// Largest yaw rate used for moves.
    ///
    /// Units: radians/second
    pub max_vyaw_rads: f64,

    /// Period at which the velocity demand is refreshed during a move.
    ///
    /// Units: seconds
    pub cmd_period_s: f64,

    /// Wait after a stop before changing posture.
    ///
    /// Units: seconds
    pub stop_wait_s: f64,

    /// Time given to the body to reach the ground when standing down.
    ///
    /// Units: seconds
    pub stand_down_wait_s: f64,

    /// Wait for a posture change to settle.
    ///
    /// Units: seconds
    pub settle_s: f64,
}

/// A relative move in the body frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct BaseMove {
    /// Units: meters
    pub dx_m: f64,

    /// Units: meters
    pub dy_m: f64,

    /// Units: radians
    pub dyaw_rad: f64,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

/// An action the base can be asked to perform.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum BaseAction {
    StandDown,
    StandUp,
    RecoveryStand,
    Damp,
    StopMove,
    Move(BaseMove),
}

#[derive(Debug, thiserror::Error)]
pub enum BaseError {
    #[error("Base command failed: {0}")]
    CommandFailed(#[from] ChannelError),

    #[error("Base action interrupted")]
    Cancelled(#[from] Cancelled),
}

// ------------------------------------------------------------------------------------------------
// IMPLS
// ------------------------------------------------------------------------------------------------

impl Default for BaseParams {
    fn default() -> Self {
        Self {
            max_vx_ms: 0.35,
            max_vy_ms: 0.5,
            max_vyaw_rads: 2.5,
            cmd_period_s: 0.1,
            stop_wait_s: 0.1,
            stand_down_wait_s: 1.0,
            settle_s: 0.8,
        }
    }
}

impl BaseMove {
    /// Time needed for the move with every axis at most at its speed limit.
    ///
    /// Units: seconds
    pub fn move_time_s(&self, params: &BaseParams) -> f64 {
        [
            (self.dx_m / params.max_vx_ms).abs(),
            (self.dy_m / params.max_vy_ms).abs(),
            (self.dyaw_rad / params.max_vyaw_rads).abs(),
        ]
        .iter()
        .fold(0.0, |m: f64, t| if t.is_finite() { m.max(*t) } else { m })
    }

    /// Constant velocity covering the move in `move_time_s`, all axes arriving together.
    pub fn velocity(&self, move_time_s: f64) -> BaseVel {
        if move_time_s <= 0.0 {
            return BaseVel::default();
        }

        BaseVel {
            vx_ms: self.dx_m / move_time_s,
            vy_ms: self.dy_m / move_time_s,
            vyaw_rads: self.dyaw_rad / move_time_s,
        }
    }
}

// ------------------------------------------------------------------------------------------------
// FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Execute a single action.
///
/// Posture changes return once the command has been sent. A move returns once its time budget is
/// spent and the base has been told to stop. If a move is cancelled a stop is still attempted.
pub fn execute(
    base: &dyn BaseChannel,
    action: BaseAction,
    params: &BaseParams,
    cancel: &CancelToken,
) -> Result<(), BaseError> {
    debug!("Base action {:?}", action);

    match action {
        BaseAction::StandDown => base.stand_down()?,
        BaseAction::StandUp => base.stand_up()?,
        BaseAction::RecoveryStand => base.recovery_stand()?,
        BaseAction::Damp => base.damp()?,
        BaseAction::StopMove => base.stop_move()?,
        BaseAction::Move(mv) => move_relative(base, mv, params, cancel)?,
    }

    Ok(())
}

/// Hold the velocity for `mv` until its time budget runs out, then stop.
fn move_relative(
    base: &dyn BaseChannel,
    mv: BaseMove,
    params: &BaseParams,
    cancel: &CancelToken,
) -> Result<(), BaseError> {
    let move_time_s = mv.move_time_s(params);
    if move_time_s <= 0.0 {
        debug!("Empty base move ignored");
        return Ok(());
    }

    let vel = mv.velocity(move_time_s);
    info!(
        "Base move {:?} over {:.2} s at ({:.2} m/s, {:.2} m/s, {:.2} rad/s)",
        mv, move_time_s, vel.vx_ms, vel.vy_ms, vel.vyaw_rads
    );

    if let Err(e) = hold_velocity(base, vel, move_time_s, params, cancel) {
        warn!("Base move aborted ({}), stopping", e);
        if let Err(stop_err) = base.stop_move() {
            warn!("Could not stop the base: {}", stop_err);
        }
        return Err(e);
    }

    base.stop_move()?;
    Ok(())
}

/// Refresh the velocity demand every command period for `duration_s`.
fn hold_velocity(
    base: &dyn BaseChannel,
    vel: BaseVel,
    duration_s: f64,
    params: &BaseParams,
    cancel: &CancelToken,
) -> Result<(), BaseError> {
    let start = Instant::now();
    let end = start + secs_to_duration(duration_s);
    let period = secs_to_duration(params.cmd_period_s);

    let mut next = start;
    while Instant::now() < end {
        base.move_vel(vel)?;
        next += period;
        cancel.sleep_until(next.min(end))?;
    }

    Ok(())
}

/// Bring the base into a balanced stand ready to move.
pub fn prepare(
    base: &dyn BaseChannel,
    params: &BaseParams,
    cancel: &CancelToken,
) -> Result<(), BaseError> {
    if let Err(e) = base.stop_move() {
        warn!("Stop before recovery stand failed: {}", e);
    }
    base.recovery_stand()?;
    cancel.sleep(secs_to_duration(params.settle_s))?;

    Ok(())
}

/// Park the base: stop, lie down and damp the motors.
///
/// Each step is attempted even if an earlier one failed, the first failure is returned at the end.
/// The waits are not cancellable so that the base is never left half parked.
pub fn safe_rest(base: &dyn BaseChannel, params: &BaseParams) -> Result<(), BaseError> {
    let mut first_err = None;
    let mut note = |r: Result<(), ChannelError>, what: &str| {
        if let Err(e) = r {
            warn!("{} failed while parking the base: {}", what, e);
            if first_err.is_none() {
                first_err = Some(e);
            }
        }
    };

    note(base.stop_move(), "StopMove");
    std::thread::sleep(secs_to_duration(params.stop_wait_s));

    note(base.stand_down(), "StandDown");
    std::thread::sleep(secs_to_duration(
        params.stand_down_wait_s + params.settle_s,
    ));

    note(base.damp(), "Damp");

    match first_err {
        Some(e) => Err(BaseError::CommandFailed(e)),
        None => {
            info!("Base parked in damping mode");
            Ok(())
        }
    }
}

// ------------------------------------------------------------------------------------------------
// TESTS
// ------------------------------------------------------------------------------------------------

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimBase;
    use comms_if::eqpt::base::BaseCmdKind;
    use std::time::Duration;

    fn fast_params() -> BaseParams {
        BaseParams {
            cmd_period_s: 0.02,
            stop_wait_s: 0.0,
            stand_down_wait_s: 0.0,
            settle_s: 0.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_move_time_and_velocity() {
        let params = BaseParams::default();
        let mv = BaseMove {
            dx_m: 0.2,
            dy_m: -1.0,
            dyaw_rad: 0.0,
        };

        // Sideways is the slowest axis
        let t = mv.move_time_s(&params);
        assert!((t - 2.0).abs() < 1e-12);

        let v = mv.velocity(t);
        assert!((v.vx_ms - 0.1).abs() < 1e-12);
        assert!((v.vy_ms + 0.5).abs() < 1e-12);
        assert_eq!(v.vyaw_rads, 0.0);

        assert_eq!(BaseMove::default().move_time_s(&params), 0.0);
    }

    #[test]
    fn test_execute_move() {
        let base = SimBase::new();
        let mv = BaseMove {
            dx_m: 0.035,
            ..Default::default()
        };

        let start = Instant::now();
        execute(&base, BaseAction::Move(mv), &fast_params(), &CancelToken::new()).unwrap();
        let elapsed = start.elapsed();

        // 0.1 s at full forward speed, velocity refreshed every 0.02 s
        assert!(elapsed >= Duration::from_millis(95));
        let cmds = base.commands();
        assert!(cmds.len() >= 5);
        assert_eq!(cmds.last(), Some(&BaseCmdKind::StopMove));
        assert!(cmds[..cmds.len() - 1].iter().all(|c| match c {
            BaseCmdKind::Move(v) => (v.vx_ms - 0.35).abs() < 1e-9,
            _ => false,
        }));
    }

    #[test]
    fn test_cancelled_move_stops() {
        let base = SimBase::new();
        let cancel = CancelToken::new();
        let mv = BaseMove {
            dyaw_rad: 25.0,
            ..Default::default()
        };

        let remote = cancel.clone();
        let stopper = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            remote.cancel();
        });

        let res = execute(&base, BaseAction::Move(mv), &fast_params(), &cancel);
        stopper.join().unwrap();

        assert!(matches!(res, Err(BaseError::Cancelled(_))));
        assert_eq!(base.commands().last(), Some(&BaseCmdKind::StopMove));
    }

    #[test]
    fn test_safe_rest_continues_after_failure() {
        let base = SimBase::new().failing_on(BaseCmdKind::StandDown);

        assert!(safe_rest(&base, &fast_params()).is_err());
        assert_eq!(
            base.commands(),
            vec![BaseCmdKind::StopMove, BaseCmdKind::Damp]
        );
        assert_eq!(base.foot_force(), Some([0.0; 4]));
    }

    #[test]
    fn test_prepare() {
        let base = SimBase::new();
        prepare(&base, &fast_params(), &CancelToken::new()).unwrap();

        assert_eq!(
            base.commands(),
            vec![BaseCmdKind::StopMove, BaseCmdKind::RecoveryStand]
        );
    }

    #[test]
    fn test_action_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            actions: Vec<BaseAction>,
        }

        let w: Wrapper = toml::from_str(
            r#"
            actions = [
                { kind = "StandDown" },
                { kind = "Move", dy_m = -1.0 },
            ]
            "#,
        )
        .unwrap();

        assert_eq!(
            w.actions,
            vec![
                BaseAction::StandDown,
                BaseAction::Move(BaseMove {
                    dx_m: 0.0,
                    dy_m: -1.0,
                    dyaw_rad: 0.0
                })
            ]
        );
    }
}
