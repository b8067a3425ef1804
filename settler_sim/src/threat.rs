// Threat detection: hostiles, per-agent threat memory, and the monitor.
//
// The threat monitor is the only thing in the sim that interrupts a behavior
// from outside. It runs on its own timer (`threat.scan_interval_ms`, driven
// by a `ThreatScan` scheduled event, see `sim.rs`) and checks every active
// agent against a `ThreatSource` using one canonical detection radius. A hit
// is written into the agent's `ThreatMemory`; the sim then preempts the
// agent (civilians into Flee, guards into Attack) unless it is already
// fleeing, sheltered, or fighting.
//
// Standing down is the Flee behavior's job: it keeps running until
// `ThreatMemory::is_fresh` turns false, i.e. no scan has seen a hostile near
// the agent for `threat.cooldown_ms`.
//
// `HostileRegistry` is the bundled threat source. Hosts with their own enemy
// simulation implement `ThreatSource` instead.
//
// **Critical constraint: determinism.** Scans visit agents and hostiles in
// id order and report the nearest hostile, ties broken by `HostileId`.

use crate::types::{AgentId, HostileId, IdCounter, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Anything the threat monitor can query for hostiles.
pub trait ThreatSource {
    /// Hostiles within `radius` of `at`, with their positions.
    fn hostiles_within(&self, at: Vec2, radius: f32) -> Vec<(HostileId, Vec2)>;

    fn nearest_within(&self, at: Vec2, radius: f32) -> Option<(HostileId, Vec2)> {
        self.hostiles_within(at, radius)
            .into_iter()
            .min_by(|a, b| {
                at.distance(a.1)
                    .total_cmp(&at.distance(b.1))
                    .then(a.0.cmp(&b.0))
            })
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Hostile {
    pub id: HostileId,
    pub position: Vec2,
    pub health: f32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct HostileRegistry {
    hostiles: BTreeMap<HostileId, Hostile>,
    ids: IdCounter,
}

impl HostileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn spawn(&mut self, position: Vec2, health: f32) -> HostileId {
        let id = HostileId(self.ids.allocate());
        self.hostiles.insert(
            id,
            Hostile {
                id,
                position,
                health,
            },
        );
        id
    }

    pub fn get(&self, id: HostileId) -> Option<&Hostile> {
        self.hostiles.get(&id)
    }

    pub fn move_to(&mut self, id: HostileId, position: Vec2) -> bool {
        match self.hostiles.get_mut(&id) {
            Some(h) => {
                h.position = position;
                true
            }
            None => false,
        }
    }

    pub fn remove(&mut self, id: HostileId) -> Option<Hostile> {
        self.hostiles.remove(&id)
    }

    /// Apply damage. Returns `Some(true)` if the hostile died (and was
    /// removed), `None` if it does not exist.
    pub fn damage(&mut self, id: HostileId, amount: f32) -> Option<bool> {
        let hostile = self.hostiles.get_mut(&id)?;
        hostile.health -= amount;
        if hostile.health <= 0.0 {
            self.hostiles.remove(&id);
            Some(true)
        } else {
            Some(false)
        }
    }

    pub fn len(&self) -> usize {
        self.hostiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hostiles.is_empty()
    }
}

impl ThreatSource for HostileRegistry {
    fn hostiles_within(&self, at: Vec2, radius: f32) -> Vec<(HostileId, Vec2)> {
        self.hostiles
            .values()
            .filter(|h| h.position.distance(at) <= radius)
            .map(|h| (h.id, h.position))
            .collect()
    }
}

/// What an agent last knew about a threat.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ThreatMemory {
    pub last_seen_ms: Option<u64>,
    pub last_position: Option<Vec2>,
    pub last_hostile: Option<HostileId>,
}

impl ThreatMemory {
    pub fn record(&mut self, hostile: HostileId, position: Vec2, now_ms: u64) {
        self.last_seen_ms = Some(now_ms);
        self.last_position = Some(position);
        self.last_hostile = Some(hostile);
    }

    /// A threat was seen less than `cooldown_ms` ago.
    pub fn is_fresh(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        self.last_seen_ms
            .is_some_and(|t| now_ms.saturating_sub(t) < cooldown_ms)
    }
}

/// One agent seeing one hostile during a scan.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Detection {
    pub agent: AgentId,
    pub hostile: HostileId,
    pub position: Vec2,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ThreatMonitor {
    scans: u64,
    last_detection_ms: Option<u64>,
}

impl ThreatMonitor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Check each `(agent, position)` pair against `source`.
    pub fn scan(
        &mut self,
        source: &dyn ThreatSource,
        agents: impl IntoIterator<Item = (AgentId, Vec2)>,
        radius: f32,
        now_ms: u64,
    ) -> Vec<Detection> {
        self.scans += 1;
        let detections: Vec<Detection> = agents
            .into_iter()
            .filter_map(|(agent, pos)| {
                source
                    .nearest_within(pos, radius)
                    .map(|(hostile, position)| Detection {
                        agent,
                        hostile,
                        position,
                    })
            })
            .collect();
        if !detections.is_empty() {
            self.last_detection_ms = Some(now_ms);
        }
        detections
    }

    pub fn scans(&self) -> u64 {
        self.scans
    }

    /// No agent has seen a threat for `cooldown_ms` (or ever).
    pub fn all_clear(&self, now_ms: u64, cooldown_ms: u64) -> bool {
        self.last_detection_ms
            .is_none_or(|t| now_ms.saturating_sub(t) >= cooldown_ms)
    }
}
