// Simulation events: the internal timer queue and the narrative output.
//
// Per-agent behavior runs every tick, but a few system-wide processes run on
// coarser timers: the threat scan and the day/night cycle. Those are
// scheduled into a priority queue ordered by `(tick, sequence)` and fired by
// the tick loop before agents update.
//
// This file defines two related but distinct concepts:
// - `ScheduledEvent`: internal timers in the priority queue.
// - `SimEvent`: narrative events emitted as output (transitions,
//   acquisitions, threats), returned from `SimState::step`.
//
// See also: `sim.rs` for the tick loop that processes scheduled events,
// `world.rs` for `World::emit`.
//
// **Critical constraint: determinism.** The `(tick, sequence)` key provides
// a total order, so two sims fed the same commands fire timers identically.

use crate::behavior::StateKind;
use crate::error::Unobtainable;
use crate::types::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

// ---------------------------------------------------------------------------
// Internal scheduled events (priority queue)
// ---------------------------------------------------------------------------

/// An event scheduled for future processing by the simulation.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledEvent {
    /// The tick at which this event should fire.
    pub tick: u64,
    /// Unique ordering key for deterministic tiebreaking within a tick.
    /// Lower values are processed first.
    pub sequence: u64,
    /// What should happen when this event fires.
    pub kind: ScheduledEventKind,
}

/// The system timers the sim schedules.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduledEventKind {
    /// Periodic hostile-proximity scan (reschedules itself).
    ThreatScan,
    /// Dawn. Publishes the day-started signal.
    DayStarted,
    /// Dusk.
    NightStarted,
}

// We want a min-heap: lowest (tick, sequence) fires first.
// Rust's BinaryHeap is a max-heap, so we reverse the ordering.
impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.tick == other.tick && self.sequence == other.sequence
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reverse: smallest (tick, sequence) should be "greatest" for the max-heap.
        other
            .tick
            .cmp(&self.tick)
            .then_with(|| other.sequence.cmp(&self.sequence))
    }
}

/// Priority queue of scheduled events. Wraps a `BinaryHeap` with reversed
/// ordering to give us a min-heap (earliest tick fires first).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct EventQueue {
    heap: BinaryHeap<ScheduledEvent>,
    /// Monotonic counter for deterministic ordering within a tick.
    next_sequence: u64,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule an event at the given tick.
    pub fn schedule(&mut self, tick: u64, kind: ScheduledEventKind) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        self.heap.push(ScheduledEvent {
            tick,
            sequence,
            kind,
        });
    }

    /// Peek at the next event without removing it.
    pub fn peek_tick(&self) -> Option<u64> {
        self.heap.peek().map(|e| e.tick)
    }

    /// Pop the next event if its tick is <= `up_to_tick`.
    pub fn pop_if_ready(&mut self, up_to_tick: u64) -> Option<ScheduledEvent> {
        if self.heap.peek().is_some_and(|e| e.tick <= up_to_tick) {
            self.heap.pop()
        } else {
            None
        }
    }

    /// Number of pending events.
    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Narrative events (output)
// ---------------------------------------------------------------------------

/// A narrative event emitted by the simulation for the host's log or UI.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SimEvent {
    pub tick: u64,
    pub kind: SimEventKind,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum SimEventKind {
    AgentSpawned { agent: AgentId, role: Role },
    AgentDespawned { agent: AgentId },
    /// Old state exited, new state entered.
    StateChanged {
        agent: AgentId,
        from: StateKind,
        to: StateKind,
    },
    /// A state could not obtain its goal and fell back.
    GoalUnobtainable {
        agent: AgentId,
        state: StateKind,
        reason: Unobtainable,
    },
    TaskAcquired { agent: AgentId, task: TaskId },
    TaskReleased { agent: AgentId, task: TaskId },
    /// A released task passed directly to a waiting agent.
    TaskHandedOff {
        task: TaskId,
        from: AgentId,
        to: AgentId,
    },
    /// A task with queued work became free.
    TaskAvailable { task: TaskId },
    WorkUnitCompleted {
        agent: AgentId,
        task: TaskId,
        remaining: usize,
    },
    /// An assigned-task reference failed validation and was dropped.
    StaleReferenceCleared { agent: AgentId, task: TaskId },
    ThreatDetected { agent: AgentId, hostile: HostileId },
    Sheltered { agent: AgentId, bunker: BunkerId },
    BunkerEvacuated { bunker: BunkerId },
    HostileDefeated { hostile: HostileId, by: AgentId },
    MealEaten { agent: AgentId },
    BecameSick { agent: AgentId },
    Treated { agent: AgentId },
    StructureDestroyed { structure: StructureId },
    DayStarted,
    NightStarted,
}
