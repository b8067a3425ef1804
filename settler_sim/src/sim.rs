// Core simulation state and tick loop.
//
// `SimState` is the single source of truth for a settlement's behavior
// layer. It owns the shared `World` (registries, signal bus, planner, clock,
// RNG), every `Agent`, and the timer queue. The sim is a pure function:
// `(state, commands) -> (new_state, events)`.
//
// ## Tick order
//
// `step` advances one tick at a time. For each tick:
//
//   1. the world clock moves to the tick,
//   2. host commands due at or before the tick are applied (`apply_command`),
//   3. scheduled system events due at the tick fire (`process_event`): the
//      threat scan and the day/night cycle,
//   4. every agent updates, in `AgentId` order (`Agent::update`: vitals,
//      navigation, then the active behavior).
//
// Nothing runs between these steps, so a registry acquisition, a threat scan
// and a state transition each complete before anything else observes the
// world. That is the whole concurrency model.
//
// ## Threat preemption
//
// The `ThreatScan` event is the only place a behavior is interrupted from
// outside. It scans every agent that is not sheltered, records hits in the
// agent's threat memory, and forces civilians into Flee and guards into
// Attack unless they are already reacting. Standing down is left to the
// states themselves (Flee checks `ThreatMemory::is_fresh`). Once nobody has
// seen a threat for `threat.cooldown_ms`, occupied bunkers are evacuated if
// `threat.auto_evacuate` is set.
//
// ## Evictions
//
// Destroying a structure, unregistering a task, removing a bed or a bunker
// pulls the current holder out through a normal transition to `Resume`. The
// holder's `exit` finds its reservation gone and releases nothing; the
// resume path then re-validates the assigned task reference and clears it.
//
// See also: `agent.rs` for the per-agent controller, `world.rs` for the
// shared services, `command.rs` for the host commands, `event.rs` for the
// timer queue and narrative events.
//
// **Critical constraint: determinism.** Agents update in id order, timers
// fire in `(tick, sequence)` order, and the only randomness is the world's
// seeded RNG. Two sims built from the same seed, config and planner and fed
// the same commands produce identical snapshots and events.

use crate::agent::{Agent, Vitals};
use crate::behavior::{StateKind, StateRequest};
use crate::command::{SimAction, SimCommand};
use crate::config::SimConfig;
use crate::error::{InvariantViolation, RegistryError};
use crate::event::{EventQueue, ScheduledEventKind, SimEvent, SimEventKind};
use crate::nav::NavStatus;
use crate::planner::{OpenFieldPlanner, PathPlanner};
use crate::signal::Signal;
use crate::structure::StructureKind;
use crate::task::{TaskKind, TaskSite, WorkUnit};
use crate::threat::ThreatSource;
use crate::types::*;
use crate::world::World;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

/// Top-level simulation state.
pub struct SimState {
    /// Current simulation tick.
    pub tick: u64,

    /// Seed the world RNG was built from.
    pub seed: u64,

    /// Shared services: config, clock, registries, signals, planner, RNG.
    pub world: World,

    /// All agents, keyed by ID. BTreeMap for deterministic iteration.
    pub agents: BTreeMap<AgentId, Agent>,

    /// System timers (threat scans, day/night cycle).
    pub event_queue: EventQueue,

    agent_ids: IdCounter,
}

/// The result of processing commands and advancing the simulation.
pub struct StepResult {
    /// Narrative events emitted during this step, for the host's log or UI.
    pub events: Vec<SimEvent>,
}

/// Serializable view of one agent, for host save systems and tooling.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AgentSnapshot {
    pub id: AgentId,
    pub role: Role,
    pub state: StateKind,
    pub position: Vec2,
    pub facing: f32,
    pub vitals: Vitals,
    pub assigned_task: Option<TaskId>,
    /// Task the active state holds in the registry.
    pub held_task: Option<TaskId>,
    pub nav: NavStatus,
    pub sheltered_in: Option<BunkerId>,
}

impl SimState {
    /// Create a new simulation with default config and the given seed.
    pub fn new(seed: u64) -> Self {
        Self::with_config(seed, SimConfig::default())
    }

    /// Create a new simulation over open, obstacle-free ground.
    pub fn with_config(seed: u64, config: SimConfig) -> Self {
        Self::with_planner(seed, config, Box::new(OpenFieldPlanner::new()))
    }

    /// Create a new simulation routing through `planner`. Hosts loading
    /// config from outside should `validate` it first; an invalid config is
    /// logged and run as-is.
    pub fn with_planner(seed: u64, config: SimConfig, planner: Box<dyn PathPlanner>) -> Self {
        if let Err(err) = config.validate() {
            warn!(%err, "starting with invalid config");
        }
        let world = World::new(seed, config, planner);
        let mut state = Self {
            tick: 0,
            seed,
            world,
            agents: BTreeMap::new(),
            event_queue: EventQueue::new(),
            agent_ids: IdCounter::default(),
        };

        let scan = state.ticks_for(state.world.config.threat.scan_interval_ms);
        state
            .event_queue
            .schedule(scan, ScheduledEventKind::ThreatScan);
        state.schedule_next_phase(0);

        state
    }

    fn ticks_for(&self, ms: u64) -> u64 {
        self.world.clock.ticks_for(ms)
    }

    /// Apply a batch of commands and advance the sim to the target tick.
    ///
    /// Commands must be sorted by tick. A command is applied at the start of
    /// the first tick at or after its own (so commands for the current tick
    /// land on the next one). Commands with tick > `target_tick` are ignored
    /// (caller error).
    pub fn step(&mut self, commands: &[SimCommand], target_tick: u64) -> StepResult {
        // Index into the sorted command slice.
        let mut cmd_idx = 0;

        while self.tick < target_tick {
            self.tick += 1;
            self.world.clock.advance_to(self.tick);

            // Apply commands at this tick.
            while cmd_idx < commands.len() && commands[cmd_idx].tick <= self.tick {
                let cmd = &commands[cmd_idx];
                cmd_idx += 1;
                self.apply_command(cmd);
            }

            // Process scheduled events at this tick.
            while let Some(event) = self.event_queue.pop_if_ready(self.tick) {
                self.process_event(event.kind);
            }

            self.update_agents();
        }

        StepResult {
            events: self.world.take_events(),
        }
    }

    /// Run every agent's tick in id order.
    fn update_agents(&mut self) {
        let ids: Vec<AgentId> = self.agents.keys().copied().collect();
        for id in ids {
            if let Some(agent) = self.agents.get_mut(&id) {
                agent.update(&mut self.world);
            }
        }
    }

    /// Apply a single command to the simulation. Commands naming entities
    /// that no longer exist are no-ops.
    fn apply_command(&mut self, cmd: &SimCommand) {
        match &cmd.action {
            SimAction::SpawnAgent { role, position } => {
                self.spawn_agent(*role, *position);
            }
            SimAction::DespawnAgent { agent } => {
                self.despawn_agent(*agent);
            }
            SimAction::AddStructure {
                kind,
                position,
                footprint,
            } => {
                self.add_structure(*kind, *position, *footprint);
            }
            SimAction::DestroyStructure { structure } => {
                self.destroy_structure(*structure);
            }
            SimAction::RegisterTask {
                kind,
                site,
                structure,
                animation,
            } => {
                self.register_task(*kind, *site, *structure, animation.clone());
            }
            SimAction::UnregisterTask { task } => {
                self.unregister_task(*task);
            }
            SimAction::EnqueueWork {
                task,
                duration_ms,
                count,
            } => {
                if let Err(err) = self.enqueue_work(*task, *duration_ms, *count) {
                    warn!(tick = cmd.tick, %err, "enqueue rejected");
                }
            }
            SimAction::StockFood { structure, meals } => {
                if !self.stock_food(*structure, *meals) {
                    warn!(tick = cmd.tick, %structure, "not a canteen");
                }
            }
            SimAction::AddBed {
                pose,
                footprint,
                structure,
            } => {
                self.add_bed(*pose, *footprint, *structure);
            }
            SimAction::RemoveBed { bed } => {
                self.remove_bed(*bed);
            }
            SimAction::AssignBed { bed, agent } => {
                if let Err(err) = self.assign_bed(*bed, *agent) {
                    warn!(tick = cmd.tick, %err, "bed assignment rejected");
                }
            }
            SimAction::AddBunker {
                position,
                footprint,
                capacity,
            } => {
                self.add_bunker(*position, *footprint, *capacity);
            }
            SimAction::RemoveBunker { bunker } => {
                self.remove_bunker(*bunker);
            }
            SimAction::EvacuateBunker { bunker } => {
                self.evacuate_bunker(*bunker);
            }
            SimAction::SpawnHostile { position, health } => {
                self.spawn_hostile(*position, *health);
            }
            SimAction::MoveHostile { hostile, position } => {
                self.move_hostile(*hostile, *position);
            }
            SimAction::RemoveHostile { hostile } => {
                self.remove_hostile(*hostile);
            }
            SimAction::SetSick { agent, sick } => {
                self.set_sick(*agent, *sick);
            }
            SimAction::Push { agent, offset } => {
                self.push_agent(*agent, *offset);
            }
            SimAction::OrderAttack { agent, target } => {
                self.order_attack(*agent, *target);
            }
        }
    }

    /// Process a single scheduled event.
    fn process_event(&mut self, kind: ScheduledEventKind) {
        match kind {
            ScheduledEventKind::ThreatScan => {
                self.threat_scan();
                let interval = self.world.config.threat.scan_interval_ms;
                let next_tick = self.tick + self.ticks_for(interval);
                self.event_queue
                    .schedule(next_tick, ScheduledEventKind::ThreatScan);
            }
            ScheduledEventKind::DayStarted => {
                info!(tick = self.tick, "day started");
                self.world.is_night = false;
                self.world.signals.publish(Signal::DayStarted);
                self.world.emit(SimEventKind::DayStarted);
                self.schedule_next_phase(self.tick);
            }
            ScheduledEventKind::NightStarted => {
                info!(tick = self.tick, "night started");
                self.world.is_night = true;
                self.world.emit(SimEventKind::NightStarted);
                self.schedule_next_phase(self.tick);
            }
        }
    }

    /// Schedule the end of the current day or night phase.
    fn schedule_next_phase(&mut self, from_tick: u64) {
        let day = &self.world.config.day;
        let (length, next) = if self.world.is_night {
            (day.night_length_ms, ScheduledEventKind::DayStarted)
        } else {
            (day.day_length_ms, ScheduledEventKind::NightStarted)
        };
        let at = from_tick + self.ticks_for(length);
        self.event_queue.schedule(at, next);
    }

    fn threat_scan(&mut self) {
        let now = self.world.now();
        let radius = self.world.config.threat.detection_radius;
        let exposed: Vec<(AgentId, Vec2)> = self
            .agents
            .values()
            .filter(|a| a.body.sheltered_in.is_none())
            .map(|a| (a.id, a.body.pose.position))
            .collect();
        let detections = self
            .world
            .monitor
            .scan(&self.world.hostiles, exposed, radius, now);

        for hit in detections {
            let Some(agent) = self.agents.get_mut(&hit.agent) else {
                continue;
            };
            agent.body.threat.record(hit.hostile, hit.position, now);
            let request = match (agent.body.role, agent.kind()) {
                (_, StateKind::Flee | StateKind::Shelter) => None,
                (Role::Civilian, _) => Some(StateRequest::Flee),
                (Role::Guard, StateKind::Attack) => None,
                (Role::Guard, _) => Some(StateRequest::Attack {
                    target: hit.hostile,
                }),
            };
            if let Some(request) = request {
                info!(agent = %hit.agent, hostile = %hit.hostile, "threat detected, preempting");
                self.world.emit(SimEventKind::ThreatDetected {
                    agent: hit.agent,
                    hostile: hit.hostile,
                });
                agent.transition(request, &mut self.world);
            }
        }

        let cooldown = self.world.config.threat.cooldown_ms;
        if self.world.config.threat.auto_evacuate && self.world.monitor.all_clear(now, cooldown) {
            // Sheltered agents are not scanned, so check the doors directly.
            let safe: Vec<BunkerId> = self
                .world
                .bunkers
                .occupied()
                .filter(|&id| {
                    self.world.bunkers.get(id).is_some_and(|b| {
                        self.world
                            .hostiles
                            .nearest_within(b.position, radius)
                            .is_none()
                    })
                })
                .collect();
            for bunker in safe {
                self.evacuate_bunker(bunker);
            }
        }
    }

    /// Pull `agent` out of whatever it is doing and let it re-decide.
    fn evict(&mut self, agent: AgentId) {
        if let Some(a) = self.agents.get_mut(&agent) {
            debug!(%agent, state = %a.kind(), "evicted");
            a.transition(StateRequest::Resume, &mut self.world);
        }
    }

    // -----------------------------------------------------------------------
    // Agents
    // -----------------------------------------------------------------------

    pub fn spawn_agent(&mut self, role: Role, position: Vec2) -> AgentId {
        let id = AgentId(self.agent_ids.allocate());
        self.world
            .emit(SimEventKind::AgentSpawned { agent: id, role });
        let agent = Agent::spawn(id, role, position, &mut self.world);
        self.agents.insert(id, agent);
        id
    }

    /// Remove an agent, releasing its task, bed, bunker slot and
    /// subscriptions.
    pub fn despawn_agent(&mut self, agent: AgentId) -> bool {
        match self.agents.remove(&agent) {
            Some(a) => {
                a.despawn(&mut self.world);
                true
            }
            None => false,
        }
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    pub fn agents(&self) -> impl Iterator<Item = &Agent> {
        self.agents.values()
    }

    /// Exit the agent's state and enter `request`, as the controller would.
    pub fn force_transition(&mut self, agent: AgentId, request: StateRequest) -> bool {
        match self.agents.get_mut(&agent) {
            Some(a) => {
                a.transition(request, &mut self.world);
                true
            }
            None => false,
        }
    }

    pub fn set_sick(&mut self, agent: AgentId, sick: bool) -> bool {
        let Some(a) = self.agents.get_mut(&agent) else {
            return false;
        };
        let became_sick = sick && !a.body.vitals.sick;
        a.body.vitals.sick = sick;
        if became_sick {
            self.world.emit(SimEventKind::BecameSick { agent });
        }
        true
    }

    /// Displace an agent. Navigation notices on its next tick.
    pub fn push_agent(&mut self, agent: AgentId, offset: Vec2) -> bool {
        match self.agents.get_mut(&agent) {
            Some(a) => {
                a.body.pose.position += offset;
                true
            }
            None => false,
        }
    }

    pub fn order_attack(&mut self, agent: AgentId, target: HostileId) -> bool {
        if self.world.hostiles.get(target).is_none() {
            debug!(%agent, %target, "attack order on missing hostile");
            return false;
        }
        self.force_transition(agent, StateRequest::Attack { target })
    }

    // -----------------------------------------------------------------------
    // Structures and tasks
    // -----------------------------------------------------------------------

    pub fn add_structure(
        &mut self,
        kind: StructureKind,
        position: Vec2,
        footprint: f32,
    ) -> StructureId {
        self.world.structures.add(kind, position, footprint)
    }

    /// Destroy a structure with its tasks and beds, evicting their holders.
    pub fn destroy_structure(&mut self, structure: StructureId) -> bool {
        if self.world.structures.remove(structure).is_none() {
            return false;
        }
        let mut evicted: Vec<AgentId> = Vec::new();
        for task in self.world.tasks.unregister_structure(structure) {
            evicted.extend(task.occupant());
        }
        for bed in self.world.beds.remove_structure(structure) {
            evicted.extend(bed.occupant());
        }
        evicted.sort();
        evicted.dedup();
        info!(%structure, evicted = evicted.len(), "structure destroyed");
        for agent in evicted {
            self.evict(agent);
        }
        self.world
            .emit(SimEventKind::StructureDestroyed { structure });
        true
    }

    /// Register a task. Returns `None` if the owning structure is unknown.
    pub fn register_task(
        &mut self,
        kind: TaskKind,
        site: TaskSite,
        structure: Option<StructureId>,
        animation: Option<String>,
    ) -> Option<TaskId> {
        if let Some(s) = structure
            && self.world.structures.get(s).is_none()
        {
            warn!(structure = %s, "task registered for unknown structure");
            return None;
        }
        Some(self.world.tasks.register(kind, site, structure, animation))
    }

    /// Remove a task, evicting its holder.
    pub fn unregister_task(&mut self, task: TaskId) -> bool {
        let Some(removed) = self.world.tasks.unregister(task) else {
            return false;
        };
        if let Some(holder) = removed.occupant() {
            self.evict(holder);
        }
        true
    }

    /// Queue `count` jobs of `duration_ms` on a work task, announcing it if
    /// it is free.
    pub fn enqueue_work(
        &mut self,
        task: TaskId,
        duration_ms: u64,
        count: u32,
    ) -> Result<(), RegistryError> {
        let mut announce = false;
        for _ in 0..count {
            announce |= self.world.tasks.enqueue(task, WorkUnit { duration_ms })?;
        }
        if announce {
            self.world.announce_task(task);
        }
        Ok(())
    }

    pub fn stock_food(&mut self, structure: StructureId, meals: u32) -> bool {
        self.world.structures.stock_food(structure, meals)
    }

    // -----------------------------------------------------------------------
    // Beds and bunkers
    // -----------------------------------------------------------------------

    pub fn add_bed(&mut self, pose: Pose, footprint: f32, structure: Option<StructureId>) -> BedId {
        self.world.beds.add(pose, footprint, structure)
    }

    pub fn remove_bed(&mut self, bed: BedId) -> bool {
        let Some(removed) = self.world.beds.remove(bed) else {
            return false;
        };
        if let Some(sleeper) = removed.occupant() {
            self.evict(sleeper);
        }
        true
    }

    pub fn assign_bed(&mut self, bed: BedId, agent: AgentId) -> Result<(), RegistryError> {
        self.world.beds.assign_owner(bed, agent)
    }

    pub fn add_bunker(&mut self, position: Vec2, footprint: f32, capacity: u32) -> BunkerId {
        self.world.bunkers.add(position, footprint, capacity)
    }

    /// Remove a bunker, turning its occupants out.
    pub fn remove_bunker(&mut self, bunker: BunkerId) -> bool {
        let Some(removed) = self.world.bunkers.remove(bunker) else {
            return false;
        };
        for &agent in removed.occupants() {
            self.evict(agent);
        }
        true
    }

    /// Signal everyone in `bunker` to leave. They step out on their next
    /// update.
    pub fn evacuate_bunker(&mut self, bunker: BunkerId) -> bool {
        if self.world.bunkers.get(bunker).is_none() {
            return false;
        }
        info!(%bunker, "bunker evacuated");
        self.world.signals.publish(Signal::BunkerEvacuated(bunker));
        self.world.emit(SimEventKind::BunkerEvacuated { bunker });
        true
    }

    // -----------------------------------------------------------------------
    // Hostiles
    // -----------------------------------------------------------------------

    /// Spawn a hostile. `health` defaults to `combat.hostile_health`.
    pub fn spawn_hostile(&mut self, position: Vec2, health: Option<f32>) -> HostileId {
        let health = health.unwrap_or(self.world.config.combat.hostile_health);
        self.world.hostiles.spawn(position, health)
    }

    pub fn move_hostile(&mut self, hostile: HostileId, position: Vec2) -> bool {
        self.world.hostiles.move_to(hostile, position)
    }

    pub fn remove_hostile(&mut self, hostile: HostileId) -> bool {
        self.world.hostiles.remove(hostile).is_some()
    }

    // -----------------------------------------------------------------------
    // Inspection
    // -----------------------------------------------------------------------

    /// Cross-check every reservation against the registries. Any violation
    /// is a scheduler bug.
    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        let world = &self.world;

        for agent in self.agents.values() {
            let state = agent.state();

            if let Some(task) = state.reserved_task() {
                let holder = world.tasks.get(task).and_then(|t| t.occupant());
                if holder != Some(agent.id) {
                    return Err(InvariantViolation::DoubleAcquisition {
                        task,
                        holder,
                        claimant: agent.id,
                    });
                }
            }

            let found = world.signals.subscription_count(agent.id);
            let expected = state.expected_subscriptions();
            if found != expected {
                return Err(InvariantViolation::LeakedSubscription {
                    agent: agent.id,
                    state: state.kind(),
                    found,
                    expected,
                });
            }

            let listed = |b: BunkerId| {
                world
                    .bunkers
                    .get(b)
                    .is_some_and(|bunker| bunker.occupants().contains(&agent.id))
            };
            match (agent.body.sheltered_in, state.bunker()) {
                (None, None) => {}
                (Some(a), Some(b)) if a == b && listed(a) => {}
                (Some(bunker), _) | (None, Some(bunker)) => {
                    return Err(InvariantViolation::ShelterMismatch {
                        agent: agent.id,
                        bunker,
                    });
                }
            }
        }

        for task in world.tasks.iter() {
            let Some(holder) = task.occupant() else {
                continue;
            };
            let held = self.agents.get(&holder).is_some_and(|a| {
                a.state().reserved_task() == Some(task.id)
                    || world
                        .signals
                        .pending(holder)
                        .contains(&Signal::TaskHandedOff(task.id))
            });
            if !held {
                return Err(InvariantViolation::OrphanedOccupancy {
                    task: task.id,
                    agent: holder,
                });
            }
        }

        for bed in world.beds.iter() {
            let Some(sleeper) = bed.occupant() else {
                continue;
            };
            let held = self
                .agents
                .get(&sleeper)
                .is_some_and(|a| a.state().bed() == Some(bed.id));
            if !held {
                return Err(InvariantViolation::OrphanedBed {
                    bed: bed.id,
                    agent: sleeper,
                });
            }
        }

        for bunker in world.bunkers.iter() {
            for &agent in bunker.occupants() {
                let inside = self
                    .agents
                    .get(&agent)
                    .is_some_and(|a| a.body.sheltered_in == Some(bunker.id));
                if !inside {
                    return Err(InvariantViolation::ShelterMismatch {
                        agent,
                        bunker: bunker.id,
                    });
                }
            }
        }

        Ok(())
    }

    pub fn snapshot(&self) -> Vec<AgentSnapshot> {
        self.agents
            .values()
            .map(|a| AgentSnapshot {
                id: a.id,
                role: a.body.role,
                state: a.kind(),
                position: a.body.pose.position,
                facing: a.body.pose.facing,
                vitals: a.body.vitals,
                assigned_task: a.body.assigned_task,
                held_task: a.state().reserved_task(),
                nav: a.body.nav.status(),
                sheltered_in: a.body.sheltered_in,
            })
            .collect()
    }

    pub fn snapshot_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.snapshot())
    }

    /// Number of agents currently in `kind`.
    pub fn count_in(&self, kind: StateKind) -> usize {
        self.agents.values().filter(|a| a.kind() == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Helper: a sim that starts in daylight with slow vitals, so agents
    /// only react to what a test sets up.
    fn calm_sim() -> SimState {
        let mut config = SimConfig::default();
        config.vitals.hunger_per_sec = 0.0;
        config.vitals.stamina_drain_per_sec = 0.0;
        SimState::with_config(42, config)
    }

    /// Helper: a work task at `pos` with `units` jobs of 500 ms.
    fn work_at(sim: &mut SimState, pos: Vec2, units: u32) -> TaskId {
        let task = sim
            .register_task(TaskKind::Work, TaskSite::at(pos), None, None)
            .unwrap();
        sim.enqueue_work(task, 500, units).unwrap();
        task
    }

    #[test]
    fn step_advances_tick_and_clock() {
        let mut sim = SimState::new(42);
        sim.step(&[], 100);
        assert_eq!(sim.tick, 100);
        assert_eq!(sim.world.now(), 100 * sim.world.config.tick_duration_ms);
    }

    #[test]
    fn zero_tick_duration_does_not_panic() {
        let config = SimConfig {
            tick_duration_ms: 0,
            ..SimConfig::default()
        };
        assert!(config.validate().is_err());
        let mut sim = SimState::with_config(42, config);
        sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        sim.step(&[], 20);
        assert_eq!(sim.tick, 20);
        assert_eq!(sim.world.now(), 20);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn spawn_command_adds_agent() {
        let mut sim = calm_sim();
        let cmd = SimCommand {
            tick: 5,
            action: SimAction::SpawnAgent {
                role: Role::Civilian,
                position: Vec2::new(1.0, 1.0),
            },
        };
        let result = sim.step(&[cmd], 10);
        assert_eq!(sim.agents.len(), 1);
        assert!(result.events.iter().any(|e| matches!(
            e.kind,
            SimEventKind::AgentSpawned {
                role: Role::Civilian,
                ..
            }
        )));
        sim.check_invariants().unwrap();
    }

    #[test]
    fn idle_agent_wanders() {
        let mut sim = calm_sim();
        let a = sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        assert_eq!(sim.agent(a).unwrap().kind(), StateKind::Wander);
        for t in 1..=50 {
            sim.step(&[], t);
            sim.check_invariants().unwrap();
        }
        assert_eq!(sim.agent(a).unwrap().kind(), StateKind::Wander);
    }

    #[test]
    fn threat_scan_reschedules() {
        let mut sim = calm_sim();
        let interval = sim.ticks_for(sim.world.config.threat.scan_interval_ms);
        sim.step(&[], interval * 3);
        assert_eq!(sim.world.monitor.scans(), 3);
    }

    #[test]
    fn day_cycle_alternates() {
        let mut config = SimConfig::default();
        config.day.day_length_ms = 1_000;
        config.day.night_length_ms = 500;
        let mut sim = SimState::with_config(1, config);
        assert!(!sim.world.is_night);

        let events = sim.step(&[], 10).events;
        assert!(sim.world.is_night);
        assert!(events.iter().any(|e| e.kind == SimEventKind::NightStarted));

        let events = sim.step(&[], 15).events;
        assert!(!sim.world.is_night);
        assert!(events.iter().any(|e| e.kind == SimEventKind::DayStarted));
    }

    #[test]
    fn unregister_task_evicts_worker_and_clears_reference() {
        let mut sim = calm_sim();
        let task = work_at(&mut sim, Vec2::new(30.0, 0.0), 3);
        let a = sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        assert_eq!(sim.agent(a).unwrap().kind(), StateKind::Work);
        assert_eq!(sim.agent(a).unwrap().body.assigned_task, Some(task));

        assert!(sim.unregister_task(task));
        let agent = sim.agent(a).unwrap();
        assert_eq!(agent.kind(), StateKind::Wander);
        assert_eq!(agent.body.assigned_task, None);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn destroy_structure_removes_its_tasks() {
        let mut sim = calm_sim();
        let shop = sim.add_structure(StructureKind::Workshop, Vec2::new(10.0, 0.0), 1.0);
        let task = sim
            .register_task(
                TaskKind::Work,
                TaskSite::at(Vec2::new(10.0, 0.0)),
                Some(shop),
                None,
            )
            .unwrap();
        sim.enqueue_work(task, 500, 2).unwrap();
        let a = sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        assert_eq!(sim.agent(a).unwrap().kind(), StateKind::Work);

        assert!(sim.destroy_structure(shop));
        assert!(sim.world.tasks.get(task).is_none());
        assert_ne!(sim.agent(a).unwrap().kind(), StateKind::Work);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn register_task_rejects_unknown_structure() {
        let mut sim = calm_sim();
        let task = sim.register_task(
            TaskKind::Work,
            TaskSite::at(Vec2::ZERO),
            Some(StructureId(77)),
            None,
        );
        assert!(task.is_none());
    }

    #[test]
    fn despawn_releases_task() {
        let mut sim = calm_sim();
        let task = work_at(&mut sim, Vec2::new(5.0, 0.0), 2);
        let a = sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        assert_eq!(sim.world.tasks.get(task).unwrap().occupant(), Some(a));

        assert!(sim.despawn_agent(a));
        assert_eq!(sim.world.tasks.get(task).unwrap().occupant(), None);
        assert_eq!(sim.world.signals.subscription_count(a), 0);
        sim.check_invariants().unwrap();
    }

    #[test]
    fn determinism_same_seed_same_snapshot() {
        let run = || {
            let mut sim = calm_sim();
            for i in 0..4 {
                sim.spawn_agent(Role::Civilian, Vec2::new(i as f32 * 3.0, 0.0));
            }
            work_at(&mut sim, Vec2::new(20.0, 5.0), 3);
            sim.step(&[], 300);
            sim.snapshot_json().unwrap()
        };
        assert_eq!(run(), run());
    }

    #[test]
    fn snapshot_reports_held_task() {
        let mut sim = calm_sim();
        let task = work_at(&mut sim, Vec2::new(5.0, 0.0), 1);
        let a = sim.spawn_agent(Role::Civilian, Vec2::ZERO);
        let snap = sim.snapshot();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap[0].id, a);
        assert_eq!(snap[0].state, StateKind::Work);
        assert_eq!(snap[0].held_task, Some(task));
    }
}
