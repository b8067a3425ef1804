// Eat: take a seat at a stocked canteen and have a meal.
//
// Canteen seats are `TaskKind::Meal` tasks owned by canteen structures. On
// enter the agent claims the nearest free seat in a canteen that still has
// food. No such seat: the attempt is put on `schedule.eat_retry_cooldown_ms`
// (so need-driven selection does not bounce straight back here) and the
// agent resumes. The meal itself is taken on arrival, so a canteen that
// runs dry while the agent is walking is handled the same way. An agent
// pushed off its seat mid-meal walks back and starts the meal over without
// taking a second portion.

use super::{Behavior, EnterFailure, Outcome, StateCtx, StateKind, StateRequest};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::nav::{NavStatus, NavTarget};
use crate::task::TaskKind;
use crate::types::{StructureId, TaskId};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Travelling,
    Eating { until: Deadline },
}

#[derive(Debug)]
pub struct Eat {
    seat: Option<TaskId>,
    canteen: StructureId,
    /// A portion has already been taken from the canteen.
    served: bool,
    phase: Phase,
}

impl Eat {
    pub fn enter(ctx: &mut StateCtx<'_>) -> Result<Self, EnterFailure> {
        let stocked = ctx.world.structures.stocked_canteens();
        let from = ctx.body.pose.position;
        let seat = ctx.world.tasks.acquire_nearest(ctx.agent, TaskKind::Meal, from, |t| {
            t.structure.is_some_and(|s| stocked.contains(&s))
        });
        let site_and_canteen = seat.and_then(|id| {
            let task = ctx.world.tasks.get(id)?;
            Some((id, task.site, task.structure?))
        });
        let Some((seat, site, canteen)) = site_and_canteen else {
            if let Some(id) = seat {
                ctx.world.release_task(id, ctx.agent);
            }
            set_cooldown(ctx);
            return Err(EnterFailure::new(
                StateKind::Eat,
                Unobtainable::NoFood,
                StateRequest::Resume,
            ));
        };

        debug!(agent = %ctx.agent, %seat, %canteen, "heading to canteen");
        let clearance = ctx.world.config.navigation.default_clearance;
        ctx.navigate(
            NavTarget::point(site.point)
                .with_footprint(site.footprint)
                .with_clearance(clearance)
                .with_precise(site.precise),
        );
        Ok(Self {
            seat: Some(seat),
            canteen,
            served: false,
            phase: Phase::Travelling,
        })
    }
}

fn set_cooldown(ctx: &mut StateCtx<'_>) {
    let cooldown = ctx.world.config.schedule.eat_retry_cooldown_ms;
    ctx.body.eat_cooldown = Deadline::after(ctx.now(), cooldown);
}

impl Behavior for Eat {
    fn kind(&self) -> StateKind {
        StateKind::Eat
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let Some(seat) = self.seat else {
            return Outcome::Transition(StateRequest::Resume);
        };
        let still_held = ctx
            .world
            .tasks
            .get(seat)
            .is_some_and(|t| t.occupant() == Some(ctx.agent));
        if !still_held {
            self.seat = None;
            return Outcome::Transition(StateRequest::Resume);
        }

        let now = ctx.now();
        match self.phase {
            Phase::Travelling => match ctx.body.nav.status() {
                NavStatus::Arrived => {
                    if !self.served {
                        if !ctx.world.structures.take_meal(self.canteen) {
                            set_cooldown(ctx);
                            ctx.report_unobtainable(StateKind::Eat, Unobtainable::NoFood);
                            return Outcome::Transition(StateRequest::Resume);
                        }
                        self.served = true;
                    }
                    let duration = ctx.world.config.schedule.meal_duration_ms;
                    self.phase = Phase::Eating {
                        until: Deadline::after(now, duration),
                    };
                    Outcome::Continue
                }
                NavStatus::Unreachable => {
                    set_cooldown(ctx);
                    ctx.report_unobtainable(StateKind::Eat, Unobtainable::NavigationStuck);
                    Outcome::Transition(StateRequest::Resume)
                }
                _ => Outcome::Continue,
            },
            Phase::Eating { .. } if ctx.body.nav.status() != NavStatus::Arrived => {
                debug!(agent = %ctx.agent, %seat, "displaced from seat mid-meal");
                self.phase = Phase::Travelling;
                Outcome::Continue
            }
            Phase::Eating { until } => {
                if !until.is_due(now) {
                    return Outcome::Continue;
                }
                ctx.body.vitals.eat();
                ctx.world.emit(SimEventKind::MealEaten { agent: ctx.agent });
                Outcome::Transition(StateRequest::Resume)
            }
        }
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        if let Some(seat) = self.seat.take() {
            ctx.world.release_task(seat, ctx.agent);
        }
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.eat
    }

    fn reserved_task(&self) -> Option<TaskId> {
        self.seat
    }
}
