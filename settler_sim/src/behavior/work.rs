// Work: acquire a task, walk to it, and process its queued jobs.
//
// Acquisition order on enter:
//   1. the requested task (from a signal or `choose_next`),
//   2. the agent's assigned task, if it still validates,
//   3. any free task with queued work (`TaskRegistry::acquire`).
// A candidate that fails validation and was the assigned reference is
// cleared (StaleReference). If nothing is obtainable the state does not
// fail: it waits `schedule.work_retry_grace_ms` and retries once, then
// wanders.
//
// Sub-phases: `Retrying` (holding nothing), `Travelling` (two-phase approach
// to the task site), `Working` (one job at a time, each a `Deadline`). A
// worker knocked off the site mid-job walks back and restarts that job. When
// the queue empties the assignment is cleared and the agent resumes;
// `exit` releases the task, so an interrupted worker's remaining jobs go
// straight to a waiting wanderer or are announced.
//
// `assigned_task` survives `exit`: it is the weak reference an interrupted
// worker uses to come back.

use super::{Behavior, Outcome, StateCtx, StateKind, StateRequest, clear_stale_assignment};
use crate::clock::Deadline;
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::nav::{NavStatus, NavTarget};
use crate::types::TaskId;
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Retrying { retry_at: Deadline },
    Travelling,
    Working { until: Deadline },
}

#[derive(Debug)]
pub struct Work {
    task: Option<TaskId>,
    phase: Phase,
}

impl Work {
    pub fn enter(requested: Option<TaskId>, ctx: &mut StateCtx<'_>) -> Self {
        let mut state = Self {
            task: None,
            phase: Phase::Retrying {
                retry_at: Deadline::UNSET,
            },
        };
        if !state.try_acquire(requested, ctx) {
            let grace = ctx.world.config.schedule.work_retry_grace_ms;
            debug!(agent = %ctx.agent, grace, "no task available, retrying after grace");
            state.phase = Phase::Retrying {
                retry_at: Deadline::after(ctx.now(), grace),
            };
        }
        state
    }

    pub fn task(&self) -> Option<TaskId> {
        self.task
    }

    fn try_acquire(&mut self, requested: Option<TaskId>, ctx: &mut StateCtx<'_>) -> bool {
        let assigned = ctx.body.assigned_task.filter(|t| Some(*t) != requested);
        for task in [requested, assigned].into_iter().flatten() {
            match ctx.world.tasks.acquire_specific(ctx.agent, task) {
                Ok(()) => {
                    self.start(task, ctx);
                    return true;
                }
                Err(err) => {
                    debug!(agent = %ctx.agent, %err, "candidate task unavailable");
                    if ctx.body.assigned_task == Some(task) {
                        clear_stale_assignment(ctx, task);
                    }
                }
            }
        }
        match ctx.world.tasks.acquire(ctx.agent) {
            Some(task) => {
                self.start(task, ctx);
                true
            }
            None => false,
        }
    }

    fn start(&mut self, task: TaskId, ctx: &mut StateCtx<'_>) {
        self.task = Some(task);
        ctx.body.assigned_task = Some(task);
        ctx.world.emit(SimEventKind::TaskAcquired {
            agent: ctx.agent,
            task,
        });
        debug!(agent = %ctx.agent, %task, "task acquired");

        let clearance = ctx.world.config.navigation.default_clearance;
        let Some(site) = ctx.world.tasks.get(task).map(|t| t.site) else {
            return;
        };
        ctx.navigate(
            NavTarget::point(site.point)
                .with_footprint(site.footprint)
                .with_clearance(clearance)
                .with_precise(site.precise),
        );
        self.phase = Phase::Travelling;
    }

    /// Start the front job, or finish if the queue is empty.
    fn begin_unit(&mut self, task: TaskId, ctx: &mut StateCtx<'_>) -> Outcome {
        let duration = ctx
            .world
            .tasks
            .get(task)
            .and_then(|t| t.front_unit())
            .map(|unit| unit.duration_ms);
        match duration {
            Some(ms) => {
                self.phase = Phase::Working {
                    until: Deadline::after(ctx.now(), ms),
                };
                Outcome::Continue
            }
            None => self.finish(task, ctx),
        }
    }

    fn finish(&mut self, task: TaskId, ctx: &mut StateCtx<'_>) -> Outcome {
        debug!(agent = %ctx.agent, %task, "task queue empty");
        if ctx.body.assigned_task == Some(task) {
            ctx.body.assigned_task = None;
        }
        Outcome::Transition(StateRequest::Resume)
    }
}

impl Behavior for Work {
    fn kind(&self) -> StateKind {
        StateKind::Work
    }

    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        let now = ctx.now();
        let Some(task) = self.task else {
            if let Phase::Retrying { retry_at } = self.phase
                && retry_at.is_due(now)
            {
                if self.try_acquire(None, ctx) {
                    return Outcome::Continue;
                }
                ctx.report_unobtainable(StateKind::Work, Unobtainable::NoTask);
                return Outcome::Transition(StateRequest::Wander);
            }
            return Outcome::Continue;
        };

        let still_held = ctx
            .world
            .tasks
            .get(task)
            .is_some_and(|t| t.occupant() == Some(ctx.agent));
        if !still_held {
            self.task = None;
            clear_stale_assignment(ctx, task);
            return Outcome::Transition(StateRequest::Resume);
        }

        match self.phase {
            Phase::Retrying { .. } => Outcome::Continue,
            Phase::Travelling => match ctx.body.nav.status() {
                NavStatus::Arrived => self.begin_unit(task, ctx),
                NavStatus::Unreachable => {
                    ctx.report_unobtainable(StateKind::Work, Unobtainable::NavigationStuck);
                    ctx.body.assigned_task = None;
                    Outcome::Transition(StateRequest::Wander)
                }
                _ => Outcome::Continue,
            },
            Phase::Working { .. } if ctx.body.nav.status() != NavStatus::Arrived => {
                debug!(agent = %ctx.agent, %task, "displaced from task site, walking back");
                self.phase = Phase::Travelling;
                Outcome::Continue
            }
            Phase::Working { until } => {
                if !until.is_due(now) {
                    return Outcome::Continue;
                }
                match ctx.world.tasks.complete_unit(task, ctx.agent) {
                    Ok(remaining) => {
                        ctx.world.emit(SimEventKind::WorkUnitCompleted {
                            agent: ctx.agent,
                            task,
                            remaining,
                        });
                        if remaining > 0 {
                            self.begin_unit(task, ctx)
                        } else {
                            self.finish(task, ctx)
                        }
                    }
                    Err(err) => {
                        debug!(agent = %ctx.agent, %err, "lost task mid-job");
                        self.task = None;
                        clear_stale_assignment(ctx, task);
                        Outcome::Transition(StateRequest::Resume)
                    }
                }
            }
        }
    }

    fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        if let Some(task) = self.task.take() {
            ctx.world.release_task(task, ctx.agent);
        }
        ctx.body.nav.stop();
    }

    fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        speeds.work
    }

    fn reserved_task(&self) -> Option<TaskId> {
        self.task
    }
}
