// Agent controller: vitals, body, and the single active behavior state.
//
// An `Agent` is split in two so the behavior layer can borrow it in pieces:
// - `AgentBody` is everything a state may read or write: pose, role,
//   vitals, the navigation handle, the weak `assigned_task` reference,
//   retry cooldowns, threat memory, and the bunker it is sheltered in.
// - `state` is the one active `BehaviorState`.
//
// Each tick `Agent::update` runs, in order:
//   1. vitals (drain, recovery, or nothing while sheltered),
//   2. the navigation handle, at the active state's max speed,
//   3. the active state's `update`, applying any requested transition.
//
// `transition` is the only place states change. It exits the old state
// first, then enters the requested one. If the enter fails, the failure's
// fallback is entered instead, up to `MAX_FALLBACKS` times, after which the
// agent wanders (Wander's enter cannot fail). So every transition completes
// within the call and exactly one state is active afterwards.
//
// See also: `behavior/mod.rs` for the state contract and need-driven
// selection, `sim.rs` for the per-tick agent loop and threat preemption.
//
// **Critical constraint: determinism.** Vitals integrate the fixed tick
// `dt`; agents are updated in `AgentId` order by the sim.

use crate::behavior::wander::Wander;
use crate::behavior::{self, BehaviorState, StateCtx, StateKind, StateRequest};
use crate::clock::Deadline;
use crate::config::VitalsConfig;
use crate::event::SimEventKind;
use crate::nav::NavAgent;
use crate::threat::ThreatMemory;
use crate::types::{AgentId, BunkerId, Pose, Role, TaskId, Vec2};
use crate::world::World;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Failed enters followed before the controller gives up and wanders.
pub const MAX_FALLBACKS: usize = 4;

// ---------------------------------------------------------------------------
// Vitals
// ---------------------------------------------------------------------------

/// How vitals change this tick, chosen by the active state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VitalsMode {
    /// Awake: stamina drains, hunger rises.
    Active,
    /// Asleep: stamina recovers, hunger rises.
    Resting,
    /// Sheltered: nothing changes.
    Suspended,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vitals {
    pub stamina: f32,
    pub hunger: f32,
    pub sick: bool,
    /// When hunger first hit its maximum, if it is still there.
    starving_since_ms: Option<u64>,
}

impl Vitals {
    pub fn new(cfg: &VitalsConfig) -> Self {
        Self {
            stamina: cfg.max_stamina,
            hunger: 0.0,
            sick: false,
            starving_since_ms: None,
        }
    }

    /// Advance one tick. Returns true if the agent fell sick this tick.
    pub fn tick(
        &mut self,
        mode: VitalsMode,
        cfg: &VitalsConfig,
        dt_secs: f32,
        now_ms: u64,
    ) -> bool {
        match mode {
            VitalsMode::Suspended => return false,
            VitalsMode::Active => {
                self.stamina = (self.stamina - cfg.stamina_drain_per_sec * dt_secs).max(0.0);
            }
            VitalsMode::Resting => {
                self.stamina =
                    (self.stamina + cfg.stamina_recovery_per_sec * dt_secs).min(cfg.max_stamina);
            }
        }
        self.hunger = (self.hunger + cfg.hunger_per_sec * dt_secs).min(cfg.max_hunger);

        if self.hunger < cfg.max_hunger {
            self.starving_since_ms = None;
            return false;
        }
        let since = *self.starving_since_ms.get_or_insert(now_ms);
        if !self.sick && now_ms.saturating_sub(since) >= cfg.starvation_sickness_ms {
            self.sick = true;
            return true;
        }
        false
    }

    pub fn is_hungry(&self, cfg: &VitalsConfig) -> bool {
        self.hunger >= cfg.hungry_threshold
    }

    pub fn is_tired(&self, cfg: &VitalsConfig) -> bool {
        self.stamina <= cfg.tired_threshold
    }

    pub fn is_rested(&self, cfg: &VitalsConfig) -> bool {
        self.stamina >= cfg.max_stamina
    }

    pub fn eat(&mut self) {
        self.hunger = 0.0;
        self.starving_since_ms = None;
    }

    /// Multiplier on movement speed.
    pub fn speed_factor(&self, cfg: &VitalsConfig) -> f32 {
        if self.stamina <= 0.0 {
            cfg.exhausted_speed_factor
        } else {
            1.0
        }
    }
}

// ---------------------------------------------------------------------------
// Agent
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct AgentBody {
    pub role: Role,
    pub pose: Pose,
    /// Spawn point; wandering stays near it.
    pub home: Vec2,
    pub vitals: Vitals,
    pub nav: NavAgent,
    /// Task this agent should resume after an interruption. Non-owning:
    /// validate against the registry before use.
    pub assigned_task: Option<TaskId>,
    pub eat_cooldown: Deadline,
    pub medical_cooldown: Deadline,
    pub threat: ThreatMemory,
    pub sheltered_in: Option<BunkerId>,
}

#[derive(Debug)]
pub struct Agent {
    pub id: AgentId,
    pub body: AgentBody,
    state: BehaviorState,
}

impl Agent {
    /// Create an agent at `position` and enter its first state.
    pub fn spawn(id: AgentId, role: Role, position: Vec2, world: &mut World) -> Self {
        let mut body = AgentBody {
            role,
            pose: Pose::at(position),
            home: position,
            vitals: Vitals::new(&world.config.vitals),
            nav: NavAgent::new(),
            assigned_task: None,
            eat_cooldown: Deadline::UNSET,
            medical_cooldown: Deadline::UNSET,
            threat: ThreatMemory::default(),
            sheltered_in: None,
        };
        let mut ctx = StateCtx {
            agent: id,
            body: &mut body,
            world,
        };
        let state = enter_with_fallbacks(StateRequest::Resume, &mut ctx);
        debug!(agent = %id, state = %state.kind(), "agent spawned");
        Self { id, body, state }
    }

    pub fn state(&self) -> &BehaviorState {
        &self.state
    }

    pub fn kind(&self) -> StateKind {
        self.state.kind()
    }

    /// Exit the active state and enter `request` (or its fallbacks).
    pub fn transition(&mut self, request: StateRequest, world: &mut World) {
        let from = self.state.kind();
        let mut ctx = StateCtx {
            agent: self.id,
            body: &mut self.body,
            world,
        };
        self.state.exit(&mut ctx);
        self.state = enter_with_fallbacks(request, &mut ctx);
        let to = self.state.kind();
        debug!(agent = %self.id, %from, %to, "state transition");
        ctx.world.emit(SimEventKind::StateChanged {
            agent: self.id,
            from,
            to,
        });
    }

    /// One tick: vitals, navigation, then the active state.
    pub fn update(&mut self, world: &mut World) {
        let now = world.now();
        let dt = world.clock.dt_secs();

        let mode = self.state.vitals_mode();
        if self.body.vitals.tick(mode, &world.config.vitals, dt, now) {
            warn!(agent = %self.id, "fell sick from starvation");
            world.emit(SimEventKind::BecameSick { agent: self.id });
        }

        let speed = self.state.max_speed(&world.config.speeds)
            * self.body.vitals.speed_factor(&world.config.vitals);
        self.body.nav.tick(
            &mut self.body.pose,
            speed,
            world.planner.as_mut(),
            now,
            dt,
            &world.config.navigation,
        );

        let mut ctx = StateCtx {
            agent: self.id,
            body: &mut self.body,
            world: &mut *world,
        };
        if let behavior::Outcome::Transition(request) = self.state.update(&mut ctx) {
            self.transition(request, world);
        }
    }

    /// Exit the active state for good, releasing everything it holds.
    pub fn despawn(mut self, world: &mut World) {
        let mut ctx = StateCtx {
            agent: self.id,
            body: &mut self.body,
            world,
        };
        self.state.exit(&mut ctx);
        ctx.world.beds.forget_owner(self.id);
        ctx.world.emit(SimEventKind::AgentDespawned { agent: self.id });
    }
}

/// Enter `request`, following fallbacks on failure. Never fails.
fn enter_with_fallbacks(request: StateRequest, ctx: &mut StateCtx<'_>) -> BehaviorState {
    let mut request = request;
    for _ in 0..MAX_FALLBACKS {
        match behavior::enter(request, ctx) {
            Ok(state) => return state,
            Err(failure) => {
                warn!(
                    agent = %ctx.agent,
                    state = %failure.state,
                    reason = %failure.reason,
                    fallback = ?failure.fallback,
                    "goal unobtainable"
                );
                ctx.world.emit(SimEventKind::GoalUnobtainable {
                    agent: ctx.agent,
                    state: failure.state,
                    reason: failure.reason,
                });
                request = failure.fallback;
            }
        }
    }
    warn!(agent = %ctx.agent, "fallback chain exhausted, wandering");
    BehaviorState::Wander(Wander::enter(ctx))
}
