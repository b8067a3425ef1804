// Bunkers: capacity-bounded shelters for fleeing agents.
//
// A fleeing agent heads for the nearest bunker with a free slot. Admission
// happens on arrival (`admit`), not when the agent sets off, so a bunker can
// fill up while someone is on the way; the Flee behavior then retargets the
// next-nearest bunker with space. Occupants stay listed until their Shelter
// state exits and calls `release`. Evacuation is a signal, not a
// mutation here: the sim publishes `BunkerEvacuated` and each sheltered
// agent leaves on its next update.
//
// **Critical constraint: determinism.** "Nearest" ties break by `BunkerId`.

use crate::error::RegistryError;
use crate::types::{AgentId, BunkerId, IdCounter, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bunker {
    pub id: BunkerId,
    pub position: Vec2,
    pub footprint: f32,
    pub capacity: u32,
    occupants: BTreeSet<AgentId>,
}

impl Bunker {
    pub fn occupants(&self) -> &BTreeSet<AgentId> {
        &self.occupants
    }

    pub fn free_slots(&self) -> u32 {
        self.capacity.saturating_sub(self.occupants.len() as u32)
    }

    pub fn has_space(&self) -> bool {
        self.free_slots() > 0
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BunkerRegistry {
    bunkers: BTreeMap<BunkerId, Bunker>,
    ids: IdCounter,
}

impl BunkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, position: Vec2, footprint: f32, capacity: u32) -> BunkerId {
        let id = BunkerId(self.ids.allocate());
        self.bunkers.insert(
            id,
            Bunker {
                id,
                position,
                footprint,
                capacity,
                occupants: BTreeSet::new(),
            },
        );
        id
    }

    /// Remove a bunker, returning it so the caller can force its occupants
    /// out.
    pub fn remove(&mut self, id: BunkerId) -> Option<Bunker> {
        self.bunkers.remove(&id)
    }

    pub fn get(&self, id: BunkerId) -> Option<&Bunker> {
        self.bunkers.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bunker> {
        self.bunkers.values()
    }

    /// Nearest bunker with a free slot, skipping `exclude`.
    pub fn nearest_with_space(&self, from: Vec2, exclude: &[BunkerId]) -> Option<BunkerId> {
        self.bunkers
            .values()
            .filter(|b| b.has_space() && !exclude.contains(&b.id))
            .min_by(|a, b| {
                from.distance(a.position)
                    .total_cmp(&from.distance(b.position))
                    .then(a.id.cmp(&b.id))
            })
            .map(|b| b.id)
    }

    /// Take a slot. Admitting an agent that is already inside is a no-op.
    pub fn admit(&mut self, id: BunkerId, agent: AgentId) -> Result<(), RegistryError> {
        let bunker = self
            .bunkers
            .get_mut(&id)
            .ok_or(RegistryError::UnknownBunker(id))?;
        if bunker.occupants.contains(&agent) {
            return Ok(());
        }
        if !bunker.has_space() {
            return Err(RegistryError::BunkerFull(id));
        }
        bunker.occupants.insert(agent);
        Ok(())
    }

    /// Give up a slot. No-op if the agent is not inside.
    pub fn release(&mut self, id: BunkerId, agent: AgentId) {
        if let Some(bunker) = self.bunkers.get_mut(&id) {
            bunker.occupants.remove(&agent);
        }
    }

    pub fn shelter_of(&self, agent: AgentId) -> Option<BunkerId> {
        self.bunkers
            .values()
            .find(|b| b.occupants.contains(&agent))
            .map(|b| b.id)
    }

    pub fn occupied(&self) -> impl Iterator<Item = BunkerId> + '_ {
        self.bunkers
            .values()
            .filter(|b| !b.occupants.is_empty())
            .map(|b| b.id)
    }
}
