// Sleep: claim a bed (or lie down where you stand) until morning.
//
// The bed comes from `BedRegistry::claim`, which prefers the agent's own bed
// and otherwise picks the nearest unowned free bed within
// `beds.search_radius`, reading through the TTL cache. No bed means sleeping
// in place: navigation is stopped and the agent rests immediately. A bed
// that turns out to be unreachable, or is removed while the agent walks to
// it, degrades to the same thing. A sleeper knocked out of bed walks back to
// it.
//
// The agent wakes on the global `DayStarted` signal, or by day once stamina
// is full (agents that went to bed exhausted in the afternoon).

use super::{Behavior, Outcome, StateCtx, StateKind, StateRequest};
use crate::agent::VitalsMode;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::nav::{NavStatus, NavTarget};
use crate::signal::{Signal, Subscription, Topic};
use crate::types::BedId;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Travelling,
    Asleep,
}

#[derive(Debug)]
pub struct Sleep {
    subscription: Option<Subscription>,
    bed: Option<BedId>,
    phase: Phase,
}

impl Sleep {
    pub fn enter(ctx: &mut StateCtx<'_>) -> Self {
        let subscription = ctx.world.signals.subscribe(ctx.agent, Topic::DayStarted);
        let radius = ctx.world.config.beds.search_radius;
        let from = ctx.body.pose.position;
        let world = &mut *ctx.world;
        let bed = world.beds.claim(ctx.agent, from, radius, &world.clock);
        let target = bed.and_then(|id| ctx.world.beds.get(id)).map(|b| (b.pose, b.footprint));

        let mut state = Self {
            subscription: Some(subscription),
            bed,
            phase: Phase::Asleep,
        };
        match (bed, target) {
            (Some(bed), Some((pose, footprint))) => {
                debug!(agent = %ctx.agent, %bed, "heading to bed");
                // The footprint only shapes where the coarse approach stops;
                // the precise lock then lays the agent on the bed.
                ctx.navigate(
                    NavTarget::point(pose.position)
                        .with_footprint(footprint)
                        .with_precise(Some(pose)),
                );
                state.phase = Phase::Travelling;
            }
            _ => {
                debug!(agent = %ctx.agent, "no bed, sleeping in place");
                state.bed = None;
                ctx.body.nav.stop();
            }
        }
        state
    }

    pub fn bed(&self) -> Option<BedId> {
        self.bed
    }

    fn sleep_in_place(&mut self, ctx: &mut StateCtx<'_>) {
        if let Some(bed) = self.bed.take() {
            ctx.world.beds.release(bed, ctx.agent);
        }
        ctx.body.nav.stop();
        self.phase = Phase::Asleep;
    }
}

impl Behavior for Sleep {
    fn kind(&self) -> StateKind {
        StateKind::Sleep
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let dawn = ctx
            .world
            .signals
            .take(ctx.agent)
            .contains(&Signal::DayStarted);
        let rested_by_day =
            !ctx.world.is_night && ctx.body.vitals.is_rested(&ctx.world.config.vitals);
        if dawn || rested_by_day {
            return Outcome::Transition(StateRequest::Resume);
        }

        if let Some(bed) = self.bed {
            let still_mine = ctx
                .world
                .beds
                .get(bed)
                .is_some_and(|b| b.occupant() == Some(ctx.agent));
            if !still_mine {
                debug!(agent = %ctx.agent, %bed, "bed lost, sleeping in place");
                self.bed = None;
                self.sleep_in_place(ctx);
                return Outcome::Continue;
            }
        }

        match self.phase {
            Phase::Travelling => match ctx.body.nav.status() {
                NavStatus::Arrived => self.phase = Phase::Asleep,
                NavStatus::Unreachable => {
                    ctx.report_unobtainable(StateKind::Sleep, Unobtainable::NoBed);
                    self.sleep_in_place(ctx);
                }
                _ => {}
            },
            Phase::Asleep => {
                if self.bed.is_some() && ctx.body.nav.status() != NavStatus::Arrived {
                    debug!(agent = %ctx.agent, "knocked out of bed, walking back");
                    self.phase = Phase::Travelling;
                }
            }
        }
        Outcome::Continue
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        if let Some(bed) = self.bed.take() {
            ctx.world.beds.release(bed, ctx.agent);
        }
        if let Some(subscription) = self.subscription.take() {
            ctx.world.signals.unsubscribe(subscription);
        }
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.sleep
    }

    fn vitals_mode(&self) -> VitalsMode {
        match self.phase {
            Phase::Travelling => VitalsMode::Active,
            Phase::Asleep => VitalsMode::Resting,
        }
    }

    fn expected_subscriptions(&self) -> usize {
        1
    }
}
