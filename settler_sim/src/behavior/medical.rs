// MedicalTreatment: occupy a treatment slot until cured.
//
// Treatment slots are `TaskKind::Treatment` tasks, normally owned by medical
// bays. Entering requires the agent to be sick and a slot to be free; a
// missing slot puts the attempt on `schedule.medical_retry_cooldown_ms` and
// the agent resumes whatever else it should be doing. Treatment takes
// `schedule.treatment_duration_ms` once the agent is in the slot, and starts
// over if the agent is pushed out of it.

use super::{Behavior, EnterFailure, Outcome, StateCtx, StateKind, StateRequest};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::nav::{NavStatus, NavTarget};
use crate::task::TaskKind;
use crate::types::TaskId;
use tracing::{debug, info};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Travelling,
    Treating { until: Deadline },
}

#[derive(Debug)]
pub struct Medical {
    slot: Option<TaskId>,
    phase: Phase,
}

impl Medical {
    pub fn enter(ctx: &mut StateCtx<'_>) -> Result<Self, EnterFailure> {
        if !ctx.body.vitals.sick {
            return Err(EnterFailure::new(
                StateKind::MedicalTreatment,
                Unobtainable::NotSick,
                StateRequest::Resume,
            ));
        }
        let from = ctx.body.pose.position;
        let slot = ctx
            .world
            .tasks
            .acquire_nearest(ctx.agent, TaskKind::Treatment, from, |_| true);
        let Some((slot, site)) = slot.and_then(|id| Some((id, ctx.world.tasks.get(id)?.site)))
        else {
            let cooldown = ctx.world.config.schedule.medical_retry_cooldown_ms;
            ctx.body.medical_cooldown = Deadline::after(ctx.now(), cooldown);
            return Err(EnterFailure::new(
                StateKind::MedicalTreatment,
                Unobtainable::NoTreatmentSlot,
                StateRequest::Resume,
            ));
        };

        debug!(agent = %ctx.agent, %slot, "heading to treatment");
        let clearance = ctx.world.config.navigation.default_clearance;
        ctx.navigate(
            NavTarget::point(site.point)
                .with_footprint(site.footprint)
                .with_clearance(clearance)
                .with_precise(site.precise),
        );
        Ok(Self {
            slot: Some(slot),
            phase: Phase::Travelling,
        })
    }
}

impl Behavior for Medical {
    fn kind(&self) -> StateKind {
        StateKind::MedicalTreatment
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let Some(slot) = self.slot else {
            return Outcome::Transition(StateRequest::Resume);
        };
        let still_held = ctx
            .world
            .tasks
            .get(slot)
            .is_some_and(|t| t.occupant() == Some(ctx.agent));
        if !still_held {
            self.slot = None;
            return Outcome::Transition(StateRequest::Resume);
        }

        let now = ctx.now();
        match self.phase {
            Phase::Travelling => match ctx.body.nav.status() {
                NavStatus::Arrived => {
                    let duration = ctx.world.config.schedule.treatment_duration_ms;
                    self.phase = Phase::Treating {
                        until: Deadline::after(now, duration),
                    };
                    Outcome::Continue
                }
                NavStatus::Unreachable => {
                    let cooldown = ctx.world.config.schedule.medical_retry_cooldown_ms;
                    ctx.body.medical_cooldown = Deadline::after(now, cooldown);
                    ctx.report_unobtainable(
                        StateKind::MedicalTreatment,
                        Unobtainable::NavigationStuck,
                    );
                    Outcome::Transition(StateRequest::Resume)
                }
                _ => Outcome::Continue,
            },
            Phase::Treating { .. } if ctx.body.nav.status() != NavStatus::Arrived => {
                debug!(agent = %ctx.agent, %slot, "displaced from treatment slot");
                self.phase = Phase::Travelling;
                Outcome::Continue
            }
            Phase::Treating { until } => {
                if !until.is_due(now) {
                    return Outcome::Continue;
                }
                ctx.body.vitals.sick = false;
                info!(agent = %ctx.agent, "treated");
                ctx.world.emit(SimEventKind::Treated { agent: ctx.agent });
                Outcome::Transition(StateRequest::Resume)
            }
        }
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        if let Some(slot) = self.slot.take() {
            ctx.world.release_task(slot, ctx.agent);
        }
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.medical
    }

    fn reserved_task(&self) -> Option<TaskId> {
        self.slot
    }
}
