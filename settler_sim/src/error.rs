// Error and failure types for the settler sim.
//
// Four families, each with a different audience:
// - `ConfigError`: loading or validating `SimConfig` (host-facing).
// - `RegistryError`: a registry refused an acquire/release/admit. Callers in
//   the behavior layer translate these into fallbacks; they never bubble up
//   to the host.
// - `Unobtainable`: why a behavior could not reach its goal. Every variant
//   maps to a named fallback in `behavior/`, and shows up in
//   `SimEventKind::GoalUnobtainable`.
// - `InvariantViolation`: a scheduler bug detected by
//   `SimState::check_invariants`. These never occur in a correct sim; tests
//   call the checker every tick.

use crate::behavior::StateKind;
use crate::types::{AgentId, BedId, BunkerId, TaskId};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("{0} does not exist")]
    UnknownTask(TaskId),
    #[error("{task} is held by {holder}")]
    Occupied { task: TaskId, holder: AgentId },
    #[error("{task} is not held by {agent}")]
    NotHolder { task: TaskId, agent: AgentId },
    #[error("{0} has no queued work")]
    NoWork(TaskId),
    #[error("{0} does not exist")]
    UnknownBed(BedId),
    #[error("{0} does not exist")]
    UnknownBunker(BunkerId),
    #[error("{0} is full")]
    BunkerFull(BunkerId),
}

/// Why a behavior gave up on its goal.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
pub enum Unobtainable {
    #[error("no free task")]
    NoTask,
    #[error("assigned task no longer valid")]
    StaleReference,
    #[error("no canteen has food")]
    NoFood,
    #[error("no bed available")]
    NoBed,
    #[error("no bunker with space")]
    NoBunker,
    #[error("no free treatment slot")]
    NoTreatmentSlot,
    #[error("not sick")]
    NotSick,
    #[error("destination unreachable")]
    NavigationStuck,
    #[error("target is gone")]
    TargetGone,
}

#[derive(Clone, Debug, PartialEq, thiserror::Error)]
pub enum InvariantViolation {
    #[error("{task} is held by {holder:?} in the registry but {claimant} believes it holds it")]
    DoubleAcquisition {
        task: TaskId,
        holder: Option<AgentId>,
        claimant: AgentId,
    },
    #[error("{task} is occupied by {agent}, whose active state does not hold it")]
    OrphanedOccupancy { task: TaskId, agent: AgentId },
    #[error("{bed} is occupied by {agent}, whose active state does not hold it")]
    OrphanedBed { bed: BedId, agent: AgentId },
    #[error("{agent} is sheltered in {bunker} but the bunker does not list it")]
    ShelterMismatch { agent: AgentId, bunker: BunkerId },
    #[error("{agent} in state {state} holds {found} signal subscriptions, expected {expected}")]
    LeakedSubscription {
        agent: AgentId,
        state: StateKind,
        found: usize,
        expected: usize,
    },
}
