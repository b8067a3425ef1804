// settler_sim — deterministic behavior core for autonomous settlers.
//
// This crate contains the behavior layer of a settlement simulation: agents
// with vitals and one active behavior state each, a single-owner task
// registry, two-phase navigation, bed and bunker reservations, and the
// threat monitor that preempts everything else. It has no engine
// dependencies: path planning and hostiles come in through traits, and the
// host drives it with commands.
//
// Module overview:
// - `sim.rs`:       Top-level SimState, tick loop, command/event processing,
//                   invariant checker, agent snapshots.
// - `agent.rs`:     Agent controller: vitals, body, state transitions.
// - `behavior/`:    The eight behavior states and need-driven selection.
// - `world.rs`:     Shared services every state works against; task release.
// - `task.rs`:      Task registry: work queues and single-owner occupancy.
// - `bed.rs`:       Bed registry with a TTL location cache.
// - `shelter.rs`:   Capacity-bounded bunkers.
// - `threat.rs`:    Hostiles, threat memory, the periodic threat monitor.
// - `structure.rs`: Buildings owning tasks and beds; canteen food stock.
// - `signal.rs`:    Scoped subscriptions for global notifications.
// - `nav.rs`:       Per-agent navigation: coarse approach, precise lock, stuck
//                   detection.
// - `planner.rs`:   PathPlanner trait + open-field planner.
// - `grid.rs`:      A* grid planner.
// - `command.rs`:   SimCommand / SimAction — all host mutations.
// - `event.rs`:     EventQueue (system timers) + narrative SimEvents.
// - `clock.rs`:     Tick clock and deadlines.
// - `config.rs`:    SimConfig — all tunable parameters.
// - `error.rs`:     Error and invariant-violation types.
// - `types.rs`:     Vec2, Pose, entity IDs, roles.
//
// The companion crate `settler_headless` runs JSON scenarios against this
// library from the command line.
//
// **Critical constraint: determinism.** The simulation is a pure function:
// `(state, commands) -> (new_state, events)`. All randomness comes from one
// seeded `SmallRng` owned by the world. No `HashMap` iteration, no system
// time, no OS entropy. Use `BTreeMap` for ordered collections.

pub mod agent;
pub mod bed;
pub mod behavior;
pub mod clock;
pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod grid;
pub mod nav;
pub mod planner;
pub mod shelter;
pub mod signal;
pub mod sim;
pub mod structure;
pub mod task;
pub mod threat;
pub mod types;
pub mod world;
