// Attack: chase a hostile and strike it until it is gone.
//
// Guards enter this instead of Flee when the threat monitor spots a hostile;
// any agent can be ordered into it. The hostile moves, so the chase target
// is refreshed every `combat.repath_interval_ms`. Within
// `combat.attack_range` the agent stops and strikes every
// `combat.attack_cooldown_ms`. A hostile that dies or despawns ends the
// attack; one the agent cannot reach sends it fleeing.

use super::{Behavior, EnterFailure, Outcome, StateCtx, StateKind, StateRequest};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::nav::{NavStatus, NavTarget};
use crate::types::{HostileId, Vec2};
use tracing::{debug, info};

#[derive(Debug)]
pub struct Attack {
    target: HostileId,
    repath: Deadline,
    next_strike: Deadline,
}

impl Attack {
    pub fn enter(target: HostileId, ctx: &mut StateCtx<'_>) -> Result<Self, EnterFailure> {
        let Some(position) = ctx.world.hostiles.get(target).map(|h| h.position) else {
            return Err(EnterFailure::new(
                StateKind::Attack,
                Unobtainable::TargetGone,
                StateRequest::Resume,
            ));
        };
        debug!(agent = %ctx.agent, %target, "engaging");
        let mut state = Self {
            target,
            repath: Deadline::UNSET,
            next_strike: Deadline::UNSET,
        };
        state.chase(position, ctx);
        Ok(state)
    }

    pub fn target(&self) -> HostileId {
        self.target
    }

    fn chase(&mut self, position: Vec2, ctx: &mut StateCtx<'_>) {
        let range = ctx.world.config.combat.attack_range;
        ctx.navigate(NavTarget::point(position).with_clearance(range * 0.5));
        self.repath = Deadline::after(ctx.now(), ctx.world.config.combat.repath_interval_ms);
    }
}

impl Behavior for Attack {
    fn kind(&self) -> StateKind {
        StateKind::Attack
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let Some(position) = ctx.world.hostiles.get(self.target).map(|h| h.position) else {
            debug!(agent = %ctx.agent, target = %self.target, "target gone");
            return Outcome::Transition(StateRequest::Resume);
        };
        let now = ctx.now();
        let combat = ctx.world.config.combat.clone();

        if ctx.body.pose.position.distance(position) <= combat.attack_range {
            if !ctx.body.nav.is_idle() {
                ctx.body.nav.stop();
            }
            if self.next_strike.is_active(now) {
                return Outcome::Continue;
            }
            self.next_strike = Deadline::after(now, combat.attack_cooldown_ms);
            if ctx.world.hostiles.damage(self.target, combat.attack_damage) == Some(true) {
                info!(agent = %ctx.agent, hostile = %self.target, "hostile defeated");
                ctx.world.emit(SimEventKind::HostileDefeated {
                    hostile: self.target,
                    by: ctx.agent,
                });
                return Outcome::Transition(StateRequest::Resume);
            }
            return Outcome::Continue;
        }

        if ctx.body.nav.status() == NavStatus::Unreachable {
            ctx.report_unobtainable(StateKind::Attack, Unobtainable::NavigationStuck);
            return Outcome::Transition(StateRequest::Flee);
        }
        if ctx.body.nav.is_idle() || ctx.body.nav.has_arrived() || self.repath.is_due(now) {
            self.chase(position, ctx);
        }
        Outcome::Continue
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.attack
    }
}
