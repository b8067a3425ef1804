// Behavior states: the contract, the dispatcher, and need-driven selection.
//
// Every autonomous mode of an agent is one variant of `BehaviorState`. Each
// variant is a plain struct holding its own sub-phase and reservations, and
// implements `Behavior`:
//
// - enter (an associated `enter` fn per state, dispatched by `enter` below)
//   takes every reservation the state needs (task occupancy, bed, bunker
//   slot, signal subscription) and starts navigation. If the goal cannot be
//   obtained it returns an `EnterFailure` naming the reason and the state to
//   try instead, and holds nothing.
// - `update` runs once per tick and either continues or asks the controller
//   for a transition. States never switch themselves.
// - `exit` releases every reservation, unsubscribes, and stops navigation.
//   It must be safe at any sub-phase, since preemption can land anywhere.
// - `max_speed` caps the navigation handle while the state is active.
//
// `StateRequest::Resume` means "whatever the agent should do next" and is
// resolved by `choose_next`: threat, sickness, hunger, sleep, the assigned
// task, any available work, wandering, in that order.
//
// Waiting (for arrival, for a meal to finish, for a retry grace delay) is
// always a `Deadline` or a `NavStatus` checked in `update`, never a blocking
// call.
//
// See also: `agent.rs` for the controller that drives transitions, one file
// per state in this directory.

pub mod attack;
pub mod eat;
pub mod flee;
pub mod medical;
pub mod shelter;
pub mod sleep;
pub mod wander;
pub mod work;

use crate::agent::{AgentBody, VitalsMode};
use crate::config::SpeedConfig;
use crate::error::Unobtainable;
use crate::event::SimEventKind;
use crate::nav::NavTarget;
use crate::types::{AgentId, BedId, BunkerId, HostileId, Role, TaskId};
use crate::world::World;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::warn;

/// Which variant is active, without its data.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StateKind {
    Wander,
    Work,
    Eat,
    Sleep,
    Flee,
    Shelter,
    MedicalTreatment,
    Attack,
}

impl fmt::Display for StateKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            StateKind::Wander => "wander",
            StateKind::Work => "work",
            StateKind::Eat => "eat",
            StateKind::Sleep => "sleep",
            StateKind::Flee => "flee",
            StateKind::Shelter => "shelter",
            StateKind::MedicalTreatment => "medical",
            StateKind::Attack => "attack",
        };
        f.write_str(name)
    }
}

/// A request to the controller to switch states.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StateRequest {
    Wander,
    /// Work on `task` if given (validated on enter), else take any free task.
    Work { task: Option<TaskId> },
    Eat,
    Sleep,
    Flee,
    Shelter { bunker: BunkerId },
    MedicalTreatment,
    Attack { target: HostileId },
    /// Let need-driven selection decide.
    Resume,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Outcome {
    Continue,
    Transition(StateRequest),
}

/// Why an enter failed and what to try instead.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EnterFailure {
    pub state: StateKind,
    pub reason: Unobtainable,
    pub fallback: StateRequest,
}

impl EnterFailure {
    pub fn new(state: StateKind, reason: Unobtainable, fallback: StateRequest) -> Self {
        Self {
            state,
            reason,
            fallback,
        }
    }
}

/// What a state gets to touch while it runs: its own agent's body and the
/// shared world.
pub struct StateCtx<'a> {
    pub agent: AgentId,
    pub body: &'a mut AgentBody,
    pub world: &'a mut World,
}

impl StateCtx<'_> {
    pub fn now(&self) -> u64 {
        self.world.now()
    }

    /// Start a coarse approach toward `target`.
    pub fn navigate(&mut self, target: NavTarget) {
        let now = self.world.now();
        self.body.nav.set_destination(
            target,
            self.world.planner.as_ref(),
            self.body.pose.position,
            now,
        );
    }

    /// Log and report a goal failure detected during `update`.
    pub fn report_unobtainable(&mut self, state: StateKind, reason: Unobtainable) {
        warn!(agent = %self.agent, %state, %reason, "goal unobtainable");
        self.world.emit(SimEventKind::GoalUnobtainable {
            agent: self.agent,
            state,
            reason,
        });
    }
}

/// The per-state contract. Entering is an associated function on each state
/// because each takes different arguments.
pub trait Behavior {
    fn kind(&self) -> StateKind;
    fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome;
    fn exit(&mut self, ctx: &mut StateCtx<'_>);
    fn max_speed(&self, speeds: &SpeedConfig) -> f32;

    fn vitals_mode(&self) -> VitalsMode {
        VitalsMode::Active
    }

    /// Task this state holds in the registry.
    fn reserved_task(&self) -> Option<TaskId> {
        None
    }

    /// Signal subscriptions this state keeps while active.
    fn expected_subscriptions(&self) -> usize {
        0
    }
}

#[derive(Debug)]
pub enum BehaviorState {
    Wander(wander::Wander),
    Work(work::Work),
    Eat(eat::Eat),
    Sleep(sleep::Sleep),
    Flee(flee::Flee),
    Shelter(shelter::Shelter),
    MedicalTreatment(medical::Medical),
    Attack(attack::Attack),
}

impl BehaviorState {
    fn behavior(&self) -> &dyn Behavior {
        match self {
            BehaviorState::Wander(s) => s,
            BehaviorState::Work(s) => s,
            BehaviorState::Eat(s) => s,
            BehaviorState::Sleep(s) => s,
            BehaviorState::Flee(s) => s,
            BehaviorState::Shelter(s) => s,
            BehaviorState::MedicalTreatment(s) => s,
            BehaviorState::Attack(s) => s,
        }
    }

    fn behavior_mut(&mut self) -> &mut dyn Behavior {
        match self {
            BehaviorState::Wander(s) => s,
            BehaviorState::Work(s) => s,
            BehaviorState::Eat(s) => s,
            BehaviorState::Sleep(s) => s,
            BehaviorState::Flee(s) => s,
            BehaviorState::Shelter(s) => s,
            BehaviorState::MedicalTreatment(s) => s,
            BehaviorState::Attack(s) => s,
        }
    }

    pub fn kind(&self) -> StateKind {
        self.behavior().kind()
    }

    pub fn update(&mut self, ctx: &mut StateCtx<'_>) -> Outcome {
        self.behavior_mut().update(ctx)
    }

    pub fn exit(&mut self, ctx: &mut StateCtx<'_>) {
        self.behavior_mut().exit(ctx);
    }

    pub fn max_speed(&self, speeds: &SpeedConfig) -> f32 {
        self.behavior().max_speed(speeds)
    }

    pub fn vitals_mode(&self) -> VitalsMode {
        self.behavior().vitals_mode()
    }

    pub fn reserved_task(&self) -> Option<TaskId> {
        self.behavior().reserved_task()
    }

    pub fn expected_subscriptions(&self) -> usize {
        self.behavior().expected_subscriptions()
    }

    /// Bed occupied by a sleeping agent.
    pub fn bed(&self) -> Option<BedId> {
        match self {
            BehaviorState::Sleep(s) => s.bed(),
            _ => None,
        }
    }

    pub fn bunker(&self) -> Option<BunkerId> {
        match self {
            BehaviorState::Shelter(s) => Some(s.bunker()),
            _ => None,
        }
    }
}

/// Enter the state named by `request`. `Resume` is resolved first.
pub fn enter(request: StateRequest, ctx: &mut StateCtx<'_>) -> Result<BehaviorState, EnterFailure> {
    let request = match request {
        StateRequest::Resume => choose_next(ctx),
        other => other,
    };
    match request {
        StateRequest::Wander => Ok(BehaviorState::Wander(wander::Wander::enter(ctx))),
        StateRequest::Work { task } => Ok(BehaviorState::Work(work::Work::enter(task, ctx))),
        StateRequest::Eat => eat::Eat::enter(ctx).map(BehaviorState::Eat),
        StateRequest::Sleep => Ok(BehaviorState::Sleep(sleep::Sleep::enter(ctx))),
        StateRequest::Flee => Ok(BehaviorState::Flee(flee::Flee::enter(ctx))),
        StateRequest::Shelter { bunker } => {
            shelter::Shelter::enter(bunker, ctx).map(BehaviorState::Shelter)
        }
        StateRequest::MedicalTreatment => {
            medical::Medical::enter(ctx).map(BehaviorState::MedicalTreatment)
        }
        StateRequest::Attack { target } => {
            attack::Attack::enter(target, ctx).map(BehaviorState::Attack)
        }
        // `choose_next` never returns Resume.
        StateRequest::Resume => Ok(BehaviorState::Wander(wander::Wander::enter(ctx))),
    }
}

/// Pick what the agent should do next from its needs and surroundings.
/// Clears the assigned-task reference if it no longer validates.
pub fn choose_next(ctx: &mut StateCtx<'_>) -> StateRequest {
    let now = ctx.world.now();
    let cfg = &ctx.world.config;
    let body = &*ctx.body;

    if body.threat.is_fresh(now, cfg.threat.cooldown_ms) {
        match body.role {
            Role::Civilian => return StateRequest::Flee,
            Role::Guard => {
                if let Some(target) = body.threat.last_hostile
                    && ctx.world.hostiles.get(target).is_some()
                {
                    return StateRequest::Attack { target };
                }
            }
        }
    }
    if body.vitals.sick && !body.medical_cooldown.is_active(now) {
        return StateRequest::MedicalTreatment;
    }
    if body.vitals.is_hungry(&cfg.vitals) && !body.eat_cooldown.is_active(now) {
        return StateRequest::Eat;
    }
    if ctx.world.is_night || body.vitals.is_tired(&cfg.vitals) {
        return StateRequest::Sleep;
    }

    if let Some(task) = body.assigned_task {
        if ctx.world.tasks.can_resume(task, ctx.agent) {
            return StateRequest::Work { task: Some(task) };
        }
        clear_stale_assignment(ctx, task);
    }
    if ctx.world.tasks.has_available_work() {
        return StateRequest::Work { task: None };
    }
    StateRequest::Wander
}

/// Drop an assigned-task reference that failed validation.
pub(crate) fn clear_stale_assignment(ctx: &mut StateCtx<'_>, task: TaskId) {
    if ctx.body.assigned_task == Some(task) {
        ctx.body.assigned_task = None;
    }
    warn!(agent = %ctx.agent, %task, "stale task reference cleared");
    ctx.world.emit(SimEventKind::StaleReferenceCleared {
        agent: ctx.agent,
        task,
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Agent;
    use crate::config::SimConfig;
    use crate::planner::OpenFieldPlanner;
    use crate::task::{TaskKind, TaskSite, WorkUnit};
    use crate::types::Vec2;

    /// Helper: an empty world with default config.
    fn world() -> World {
        World::new(7, SimConfig::default(), Box::new(OpenFieldPlanner::new()))
    }

    /// Helper: run `choose_next` for a freshly spawned civilian after `setup`
    /// edits its body.
    fn choose_for(world: &mut World, setup: impl FnOnce(&mut AgentBody)) -> StateRequest {
        let mut agent = Agent::spawn(AgentId(0), Role::Civilian, Vec2::ZERO, world);
        setup(&mut agent.body);
        let request = {
            let mut ctx = StateCtx {
                agent: agent.id,
                body: &mut agent.body,
                world: &mut *world,
            };
            choose_next(&mut ctx)
        };
        agent.despawn(world);
        request
    }

    #[test]
    fn idle_agent_wanders() {
        let mut world = world();
        assert_eq!(choose_for(&mut world, |_| {}), StateRequest::Wander);
    }

    #[test]
    fn threat_beats_every_need() {
        let mut world = world();
        let request = choose_for(&mut world, |body| {
            body.vitals.sick = true;
            body.vitals.hunger = 99.0;
            body.threat.record(HostileId(0), Vec2::ZERO, 0);
        });
        assert_eq!(request, StateRequest::Flee);
    }

    #[test]
    fn sickness_then_hunger_then_sleep() {
        let mut world = world();
        let sick = choose_for(&mut world, |body| {
            body.vitals.sick = true;
            body.vitals.hunger = 99.0;
        });
        assert_eq!(sick, StateRequest::MedicalTreatment);

        let hungry = choose_for(&mut world, |body| body.vitals.hunger = 99.0);
        assert_eq!(hungry, StateRequest::Eat);

        world.is_night = true;
        assert_eq!(choose_for(&mut world, |_| {}), StateRequest::Sleep);
    }

    #[test]
    fn cooldown_suppresses_eat() {
        let mut world = world();
        let request = choose_for(&mut world, |body| {
            body.vitals.hunger = 99.0;
            body.eat_cooldown = crate::clock::Deadline::after(0, 10_000);
        });
        assert_eq!(request, StateRequest::Wander);
    }

    #[test]
    fn stale_assignment_is_cleared() {
        let mut world = world();
        let request = choose_for(&mut world, |body| body.assigned_task = Some(TaskId(77)));
        assert_eq!(request, StateRequest::Wander);
        assert!(world.take_events().iter().any(|e| matches!(
            e.kind,
            SimEventKind::StaleReferenceCleared {
                task: TaskId(77),
                ..
            }
        )));
    }

    #[test]
    fn available_work_is_chosen() {
        let mut world = world();
        let task = world
            .tasks
            .register(TaskKind::Work, TaskSite::at(Vec2::new(3.0, 0.0)), None, None);
        world
            .tasks
            .enqueue(task, WorkUnit { duration_ms: 500 })
            .unwrap();
        // Spawning already resolves Resume, so the agent takes the task.
        let agent = Agent::spawn(AgentId(0), Role::Civilian, Vec2::ZERO, &mut world);
        assert_eq!(agent.kind(), StateKind::Work);
        assert_eq!(agent.state().reserved_task(), Some(task));
        assert_eq!(agent.body.assigned_task, Some(task));
    }
}
