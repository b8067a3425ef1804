// Wander: the idle state and the fallback of last resort.
//
// A wandering agent strolls between random walkable points near its home,
// pausing between legs. It is the only state subscribed to task
// availability, which makes wanderers the candidates for direct handoff when
// a worker releases a task with work left (see `World::release_task`).
//
// Signals handled on update:
// - `TaskHandedOff(t)`: the agent already holds `t`; go work it.
// - `TaskAvailable(t)`: try to take `t`.
//
// Every `schedule.decision_interval_ms` the agent re-runs `choose_next` so
// hunger, sickness, nightfall, or work posted before it started listening
// are not missed.
//
// Entering never fails, which is what lets the controller always terminate
// its fallback chain here.

use super::{Behavior, Outcome, StateCtx, StateKind, StateRequest, choose_next};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::nav::{NavStatus, NavTarget};
use crate::signal::{Signal, Subscription, Topic};
use crate::types::TaskId;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Walking,
    Pausing { until: Deadline },
}

#[derive(Debug)]
pub struct Wander {
    subscription: Option<Subscription>,
    phase: Phase,
    next_decision: Deadline,
}

impl Wander {
    pub fn enter(ctx: &mut StateCtx<'_>) -> Self {
        let subscription = ctx.world.signals.subscribe(ctx.agent, Topic::TaskAvailable);
        let now = ctx.now();
        let mut state = Self {
            subscription: Some(subscription),
            phase: Phase::Pausing {
                until: Deadline::UNSET,
            },
            next_decision: Deadline::after(now, ctx.world.config.schedule.decision_interval_ms),
        };
        state.start_leg(ctx);
        state
    }

    fn start_leg(&mut self, ctx: &mut StateCtx<'_>) {
        let radius = ctx.world.config.schedule.wander_radius;
        let home = ctx.body.home;
        let world = &mut *ctx.world;
        match world
            .planner
            .sample_walkable_point(home, radius, &mut world.rng)
        {
            Some(point) => {
                ctx.navigate(NavTarget::point(point));
                self.phase = Phase::Walking;
            }
            None => self.pause(ctx),
        }
    }

    fn pause(&mut self, ctx: &mut StateCtx<'_>) {
        ctx.body.nav.stop();
        self.phase = Phase::Pausing {
            until: Deadline::after(ctx.now(), ctx.world.config.schedule.wander_pause_ms),
        };
    }
}

impl Behavior for Wander {
    fn kind(&self) -> StateKind {
        StateKind::Wander
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let mut handed: Option<TaskId> = None;
        let mut available: Option<TaskId> = None;
        for signal in ctx.world.signals.take(ctx.agent) {
            match signal {
                Signal::TaskHandedOff(task) if handed.is_none() => handed = Some(task),
                // Only one task can be worked; give extra handoffs back.
                Signal::TaskHandedOff(task) => {
                    ctx.world.release_task(task, ctx.agent);
                }
                Signal::TaskAvailable(task) => {
                    available.get_or_insert(task);
                }
                Signal::DayStarted | Signal::BunkerEvacuated(_) => {}
            }
        }
        if let Some(task) = handed {
            debug!(agent = %ctx.agent, %task, "picking up handed-off task");
            return Outcome::Transition(StateRequest::Work { task: Some(task) });
        }
        if let Some(task) = available {
            return Outcome::Transition(StateRequest::Work { task: Some(task) });
        }

        let now = ctx.now();
        if self.next_decision.is_due(now) {
            self.next_decision =
                Deadline::after(now, ctx.world.config.schedule.decision_interval_ms);
            let next = choose_next(ctx);
            if next != StateRequest::Wander {
                return Outcome::Transition(next);
            }
        }

        match self.phase {
            Phase::Walking => match ctx.body.nav.status() {
                NavStatus::Arrived | NavStatus::Unreachable => self.pause(ctx),
                _ => {}
            },
            Phase::Pausing { until } => {
                if until.is_due(now) {
                    self.start_leg(ctx);
                }
            }
        }
        Outcome::Continue
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        // A handoff may have landed after the last update; hand it back.
        for signal in ctx.world.signals.take(ctx.agent) {
            if let Signal::TaskHandedOff(task) = signal {
                ctx.world.release_task(task, ctx.agent);
            }
        }
        if let Some(subscription) = self.subscription.take() {
            ctx.world.signals.unsubscribe(subscription);
        }
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.wander
    }

    fn expected_subscriptions(&self) -> usize {
        1
    }
}
