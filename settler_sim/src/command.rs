// Commands that mutate simulation state.
//
// All external mutations to the simulation go through `SimCommand`: the host
// registering buildings and their tasks, stocking canteens, adding beds and
// bunkers, spawning settlers and hostiles, knocking agents around. The sim
// is a pure function `(state, commands) -> (new_state, events)`; commands
// are the input. Each command carries the tick it applies at; `step`
// applies it before that tick's timers and agent updates.
//
// Every action has a matching method on `SimState` (`spawn_agent`,
// `destroy_structure`, ...) for hosts that embed the sim directly; the
// command path just dispatches to those.
//
// See also: `sim.rs` for `apply_command()`, the headless runner's scenario
// files, which are lists of these in JSON.
//
// **Critical constraint: determinism.** Commands are the sole external input
// to the sim. Internal state changes come from scheduled events (see
// `event.rs`) and agent updates.

use crate::structure::StructureKind;
use crate::task::{TaskKind, TaskSite};
use crate::types::*;
use serde::{Deserialize, Serialize};

/// A host-issued command targeting a specific simulation tick.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SimCommand {
    pub tick: u64,
    pub action: SimAction,
}

/// The specific action a command performs.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum SimAction {
    SpawnAgent {
        #[serde(default)]
        role: Role,
        position: Vec2,
    },
    /// Remove an agent, releasing everything it holds.
    DespawnAgent { agent: AgentId },
    AddStructure {
        kind: StructureKind,
        position: Vec2,
        #[serde(default)]
        footprint: f32,
    },
    /// Destroy a structure, unregistering its tasks and beds and evicting
    /// their holders.
    DestroyStructure { structure: StructureId },
    RegisterTask {
        kind: TaskKind,
        site: TaskSite,
        #[serde(default)]
        structure: Option<StructureId>,
        #[serde(default)]
        animation: Option<String>,
    },
    UnregisterTask { task: TaskId },
    /// Queue `count` jobs of `duration_ms` each on a work task.
    EnqueueWork {
        task: TaskId,
        duration_ms: u64,
        #[serde(default = "one")]
        count: u32,
    },
    StockFood { structure: StructureId, meals: u32 },
    AddBed {
        pose: Pose,
        #[serde(default)]
        footprint: f32,
        #[serde(default)]
        structure: Option<StructureId>,
    },
    RemoveBed { bed: BedId },
    /// Make `agent` the owner of `bed`.
    AssignBed { bed: BedId, agent: AgentId },
    AddBunker {
        position: Vec2,
        #[serde(default)]
        footprint: f32,
        capacity: u32,
    },
    RemoveBunker { bunker: BunkerId },
    EvacuateBunker { bunker: BunkerId },
    /// `health` defaults to `combat.hostile_health`.
    SpawnHostile {
        position: Vec2,
        #[serde(default)]
        health: Option<f32>,
    },
    MoveHostile { hostile: HostileId, position: Vec2 },
    RemoveHostile { hostile: HostileId },
    SetSick { agent: AgentId, sick: bool },
    /// Displace an agent (knockback).
    Push { agent: AgentId, offset: Vec2 },
    OrderAttack { agent: AgentId, target: HostileId },
}

fn one() -> u32 {
    1
}
