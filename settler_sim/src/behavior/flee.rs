// Flee: get to a bunker, or at least away from the threat.
//
// Entered by threat preemption (civilians) or as a fallback. Two sub-phases:
// - `SeekingBunker`: heading for the nearest bunker with a free slot. On
//   arrival the slot is checked again; if the bunker filled up meanwhile it
//   goes on the `tried` list and the next-nearest bunker with space is
//   targeted. With room, the agent asks to be sheltered.
// - `Escaping`: no bunker has space. Run `threat.flee_distance` directly away
//   from the last known threat position, and re-check bunkers every
//   `threat.bunker_recheck_ms` with a cleared `tried` list, so a slot that
//   frees up later is found.
//
// Standing down is a single rule for both phases: once the agent's threat
// memory is older than `threat.cooldown_ms`, it resumes. A hostile flickering
// in and out of detection range keeps refreshing the memory, so the agent
// does not thrash between Flee and its previous state.

use super::{Behavior, Outcome, StateCtx, StateKind, StateRequest};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::nav::{NavStatus, NavTarget};
use crate::types::{BunkerId, Vec2};
use rand::Rng;
use smallvec::SmallVec;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    SeekingBunker { bunker: BunkerId },
    Escaping { recheck: Deadline },
}

#[derive(Debug)]
pub struct Flee {
    phase: Phase,
    /// Bunkers found full on arrival (or unreachable) during this seek.
    tried: SmallVec<[BunkerId; 4]>,
}

impl Flee {
    pub fn enter(ctx: &mut StateCtx<'_>) -> Self {
        let mut state = Self {
            phase: Phase::Escaping {
                recheck: Deadline::UNSET,
            },
            tried: SmallVec::new(),
        };
        state.seek(ctx);
        state
    }

    /// Target the nearest untried bunker with space, or start escaping.
    fn seek(&mut self, ctx: &mut StateCtx<'_>) {
        let from = ctx.body.pose.position;
        match ctx.world.bunkers.nearest_with_space(from, &self.tried) {
            Some(bunker) => {
                let Some((position, footprint)) =
                    ctx.world.bunkers.get(bunker).map(|b| (b.position, b.footprint))
                else {
                    return;
                };
                debug!(agent = %ctx.agent, %bunker, "seeking bunker");
                let clearance = ctx.world.config.navigation.default_clearance;
                ctx.navigate(
                    NavTarget::point(position)
                        .with_footprint(footprint)
                        .with_clearance(clearance),
                );
                self.phase = Phase::SeekingBunker { bunker };
            }
            None => {
                let tried = self.tried.len();
                debug!(agent = %ctx.agent, tried, "no bunker with space, escaping");
                self.escape(ctx);
            }
        }
    }

    fn escape(&mut self, ctx: &mut StateCtx<'_>) {
        let here = ctx.body.pose.position;
        let distance = ctx.world.config.threat.flee_distance;
        let away = ctx
            .body
            .threat
            .last_position
            .and_then(|threat| (here - threat).normalized())
            .unwrap_or_else(|| {
                let angle = ctx.world.rng.random_range(0.0..std::f32::consts::TAU);
                Vec2::new(angle.cos(), angle.sin())
            });
        let goal = here + away * distance;
        let world = &mut *ctx.world;
        let point = if world.planner.is_walkable(goal) {
            Some(goal)
        } else {
            world
                .planner
                .sample_walkable_point(goal, distance * 0.5, &mut world.rng)
        };
        match point {
            Some(point) => ctx.navigate(NavTarget::point(point)),
            None => ctx.body.nav.stop(),
        }
        let recheck = ctx.world.config.threat.bunker_recheck_ms;
        self.phase = Phase::Escaping {
            recheck: Deadline::after(ctx.now(), recheck),
        };
    }
}

impl Behavior for Flee {
    fn kind(&self) -> StateKind {
        StateKind::Flee
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let now = ctx.now();
        let cooldown = ctx.world.config.threat.cooldown_ms;
        if !ctx.body.threat.is_fresh(now, cooldown) {
            debug!(agent = %ctx.agent, "threat cooled down");
            return Outcome::Transition(StateRequest::Resume);
        }

        match self.phase {
            Phase::SeekingBunker { bunker } => {
                let has_space = ctx.world.bunkers.get(bunker).map(|b| b.has_space());
                match (has_space, ctx.body.nav.status()) {
                    // Removed while we were on the way.
                    (None, _) => self.seek(ctx),
                    (Some(true), NavStatus::Arrived) => {
                        return Outcome::Transition(StateRequest::Shelter { bunker });
                    }
                    (Some(false), NavStatus::Arrived) => {
                        debug!(agent = %ctx.agent, %bunker, "bunker full on arrival, retargeting");
                        self.tried.push(bunker);
                        self.seek(ctx);
                    }
                    (Some(_), NavStatus::Unreachable) => {
                        ctx.report_unobtainable(StateKind::Flee, Unobtainable::NavigationStuck);
                        self.tried.push(bunker);
                        self.seek(ctx);
                    }
                    _ => {}
                }
            }
            Phase::Escaping { recheck } => {
                if recheck.is_due(now) {
                    self.tried.clear();
                    self.seek(ctx);
                } else if matches!(
                    ctx.body.nav.status(),
                    NavStatus::Arrived | NavStatus::Unreachable | NavStatus::Idle
                ) {
                    // Keep running; `escape` resets the recheck timer, so
                    // restore it.
                    self.escape(ctx);
                    self.phase = Phase::Escaping { recheck };
                }
            }
        }
        Outcome::Continue
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.flee
    }
}
