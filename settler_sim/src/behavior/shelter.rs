// Shelter: inside a bunker, out of the simulation.
//
// Entered only from Flee on arrival at a bunker. The slot is taken here
// (`BunkerRegistry::admit`); if the bunker filled up in the same tick the
// enter fails back to Flee, which seeks elsewhere. While sheltered the
// agent does not move (max speed zero), its vitals are suspended, and the
// threat monitor skips it. It leaves when its bunker is evacuated (signal)
// or removed, stepping out at the bunker's edge.

use super::{Behavior, EnterFailure, Outcome, StateCtx, StateKind, StateRequest};
use crate::agent::VitalsMode;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::signal::{Signal, Subscription, Topic};
use crate::types::{BunkerId, Vec2};
use rand::Rng;
use tracing::{debug, info};

#[derive(Debug)]
pub struct Shelter {
    bunker: BunkerId,
    position: Vec2,
    footprint: f32,
    subscription: Option<Subscription>,
}

impl Shelter {
    pub fn enter(bunker: BunkerId, ctx: &mut StateCtx<'_>) -> Result<Self, EnterFailure> {
        let Some((position, footprint)) = ctx
            .world
            .bunkers
            .get(bunker)
            .map(|b| (b.position, b.footprint))
        else {
            return Err(EnterFailure::new(
                StateKind::Shelter,
                Unobtainable::NoBunker,
                StateRequest::Flee,
            ));
        };
        if let Err(err) = ctx.world.bunkers.admit(bunker, ctx.agent) {
            debug!(agent = %ctx.agent, %err, "bunker admission refused");
            return Err(EnterFailure::new(
                StateKind::Shelter,
                Unobtainable::NoBunker,
                StateRequest::Flee,
            ));
        }

        let subscription = ctx
            .world
            .signals
            .subscribe(ctx.agent, Topic::BunkerEvacuated);
        ctx.body.nav.stop();
        ctx.body.pose.position = position;
        ctx.body.sheltered_in = Some(bunker);
        info!(agent = %ctx.agent, %bunker, "sheltered");
        ctx.world.emit(SimEventKind::Sheltered {
            agent: ctx.agent,
            bunker,
        });
        Ok(Self {
            bunker,
            position,
            footprint,
            subscription: Some(subscription),
        })
    }

    pub fn bunker(&self) -> BunkerId {
        self.bunker
    }
}

impl Behavior for Shelter {
    fn kind(&self) -> StateKind {
        StateKind::Shelter
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let evacuated = ctx
            .world
            .signals
            .take(ctx.agent)
            .contains(&Signal::BunkerEvacuated(self.bunker));
        if evacuated || ctx.world.bunkers.get(self.bunker).is_none() {
            return Outcome::Transition(StateRequest::Resume);
        }
        Outcome::Continue
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        ctx.world.bunkers.release(self.bunker, ctx.agent);
        if let Some(subscription) = self.subscription.take() {
            ctx.world.signals.unsubscribe(subscription);
        }
        ctx.body.sheltered_in = None;

        let angle = ctx.world.rng.random_range(0.0..std::f32::consts::TAU);
        let clearance = ctx.world.config.navigation.default_clearance;
        let out = Vec2::new(angle.cos(), angle.sin()) * (self.footprint + clearance);
        ctx.body.pose.position = self.position + out;
        ctx.body.nav.stop();
    }

    fn max_speed(&self, _speeds: &SpeedConfig) -> f32 {
        0.0
    }

    fn vitals_mode(&self) -> VitalsMode {
        VitalsMode::Suspended
    }

    fn expected_subscriptions(&self) -> usize {
        1
    }
}
