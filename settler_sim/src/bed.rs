// Bed registry with a time-bounded location cache.
//
// Sleepers look for a bed in priority order: a bed already owned by the
// agent (any distance), else the nearest bed with no owner and no occupant
// within `beds.search_radius`. Scanning every bed for every sleeper each
// night is the expensive part, so the registry keeps a `BedCache`: a
// snapshot of bed ids and positions that is rebuilt on read once it is older
// than `beds.cache_ttl_ms`, measured against an injected `Clock`. Beds added
// or removed since the last refresh are invisible to the lookup (or
// rejected at claim time) until the cache expires.
//
// `claim` is the only way to occupy a bed and it validates the live bed
// before writing, so a stale cache entry can never hand out a removed or
// occupied bed. Claiming an unowned bed also makes the claimant its owner;
// ownership outlives the night, occupancy does not.
//
// See also: `behavior/sleep.rs` for the consumer, `clock.rs` for `Clock`.

use crate::clock::Clock;
use crate::error::RegistryError;
use crate::types::{AgentId, BedId, IdCounter, Pose, StructureId, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Bed {
    pub id: BedId,
    /// Where the sleeper lies; used as the precise pose.
    pub pose: Pose,
    pub footprint: f32,
    pub structure: Option<StructureId>,
    owner: Option<AgentId>,
    occupant: Option<AgentId>,
}

impl Bed {
    pub fn owner(&self) -> Option<AgentId> {
        self.owner
    }

    pub fn occupant(&self) -> Option<AgentId> {
        self.occupant
    }
}

#[derive(Clone, Copy, Debug)]
struct CacheEntry {
    id: BedId,
    position: Vec2,
}

#[derive(Clone, Debug, Default)]
struct BedCache {
    entries: Vec<CacheEntry>,
    refreshed_at: Option<u64>,
    refreshes: u64,
}

#[derive(Clone, Debug, Default)]
pub struct BedRegistry {
    beds: BTreeMap<BedId, Bed>,
    cache: BedCache,
    ids: IdCounter,
    ttl_ms: u64,
}

impl BedRegistry {
    pub fn new(ttl_ms: u64) -> Self {
        Self {
            ttl_ms,
            ..Self::default()
        }
    }

    pub fn add(&mut self, pose: Pose, footprint: f32, structure: Option<StructureId>) -> BedId {
        let id = BedId(self.ids.allocate());
        self.beds.insert(
            id,
            Bed {
                id,
                pose,
                footprint,
                structure,
                owner: None,
                occupant: None,
            },
        );
        id
    }

    /// Remove a bed. The returned bed's `occupant()` is the evicted sleeper.
    pub fn remove(&mut self, id: BedId) -> Option<Bed> {
        self.beds.remove(&id)
    }

    pub fn remove_structure(&mut self, structure: StructureId) -> Vec<Bed> {
        let ids: Vec<BedId> = self
            .beds
            .values()
            .filter(|b| b.structure == Some(structure))
            .map(|b| b.id)
            .collect();
        ids.into_iter().filter_map(|id| self.beds.remove(&id)).collect()
    }

    pub fn get(&self, id: BedId) -> Option<&Bed> {
        self.beds.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Bed> {
        self.beds.values()
    }

    /// Make `agent` the owner of `id`, taking ownership from anyone else.
    pub fn assign_owner(&mut self, id: BedId, agent: AgentId) -> Result<(), RegistryError> {
        let bed = self.beds.get_mut(&id).ok_or(RegistryError::UnknownBed(id))?;
        bed.owner = Some(agent);
        Ok(())
    }

    /// Drop every ownership held by `agent` (used on despawn).
    pub fn forget_owner(&mut self, agent: AgentId) {
        for bed in self.beds.values_mut() {
            if bed.owner == Some(agent) {
                bed.owner = None;
            }
        }
    }

    /// How many times the location cache has been rebuilt.
    pub fn cache_refreshes(&self) -> u64 {
        self.cache.refreshes
    }

    fn refresh_if_stale(&mut self, now_ms: u64) {
        let fresh = self
            .cache
            .refreshed_at
            .is_some_and(|t| now_ms.saturating_sub(t) < self.ttl_ms);
        if fresh {
            return;
        }
        self.cache.entries = self
            .beds
            .values()
            .map(|b| CacheEntry {
                id: b.id,
                position: b.pose.position,
            })
            .collect();
        self.cache.refreshed_at = Some(now_ms);
        self.cache.refreshes += 1;
        debug!(beds = self.cache.entries.len(), "bed cache refreshed");
    }

    /// Find and occupy a bed for `agent` at `from`. Prefers the agent's own
    /// bed, then the nearest free unowned bed within `radius`.
    pub fn claim(
        &mut self,
        agent: AgentId,
        from: Vec2,
        radius: f32,
        clock: &dyn Clock,
    ) -> Option<BedId> {
        self.refresh_if_stale(clock.now_ms());

        let owned = self.cache.entries.iter().find(|e| {
            self.beds
                .get(&e.id)
                .is_some_and(|b| b.owner == Some(agent) && b.occupant.is_none())
        });
        let chosen = match owned {
            Some(entry) => Some(entry.id),
            None => self
                .cache
                .entries
                .iter()
                .filter(|e| e.position.distance(from) <= radius)
                .filter(|e| {
                    self.beds
                        .get(&e.id)
                        .is_some_and(|b| b.owner.is_none() && b.occupant.is_none())
                })
                .min_by(|a, b| {
                    a.position
                        .distance(from)
                        .total_cmp(&b.position.distance(from))
                        .then(a.id.cmp(&b.id))
                })
                .map(|e| e.id),
        }?;

        let bed = self.beds.get_mut(&chosen)?;
        bed.occupant = Some(agent);
        bed.owner.get_or_insert(agent);
        Some(chosen)
    }

    /// Vacate a bed. No-op if `agent` is not the occupant.
    pub fn release(&mut self, id: BedId, agent: AgentId) {
        if let Some(bed) = self.beds.get_mut(&id)
            && bed.occupant == Some(agent)
        {
            bed.occupant = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::SimClock;

    const TTL: u64 = 1_000;

    /// Helper: a clock at `ms` (100 ms ticks).
    fn clock_at(ms: u64) -> SimClock {
        let mut clock = SimClock::new(100);
        clock.advance_to(ms / 100);
        clock
    }

    #[test]
    fn claims_nearest_free_bed_within_radius() {
        let mut beds = BedRegistry::new(TTL);
        let far = beds.add(Pose::at(Vec2::new(30.0, 0.0)), 1.0, None);
        let near = beds.add(Pose::at(Vec2::new(5.0, 0.0)), 1.0, None);
        let clock = clock_at(0);

        assert_eq!(beds.claim(AgentId(1), Vec2::ZERO, 20.0, &clock), Some(near));
        // Far bed is outside the radius.
        assert_eq!(beds.claim(AgentId(2), Vec2::ZERO, 20.0, &clock), None);
        assert_eq!(beds.claim(AgentId(2), Vec2::ZERO, 40.0, &clock), Some(far));
        assert_eq!(beds.get(near).unwrap().owner(), Some(AgentId(1)));
    }

    #[test]
    fn own_bed_preferred_regardless_of_distance() {
        let mut beds = BedRegistry::new(TTL);
        let _close = beds.add(Pose::at(Vec2::new(1.0, 0.0)), 1.0, None);
        let mine = beds.add(Pose::at(Vec2::new(500.0, 0.0)), 1.0, None);
        beds.assign_owner(mine, AgentId(9)).unwrap();
        let clock = clock_at(0);
        assert_eq!(beds.claim(AgentId(9), Vec2::ZERO, 10.0, &clock), Some(mine));
    }

    #[test]
    fn owned_beds_are_not_given_to_others() {
        let mut beds = BedRegistry::new(TTL);
        let bed = beds.add(Pose::at(Vec2::new(1.0, 0.0)), 1.0, None);
        beds.assign_owner(bed, AgentId(1)).unwrap();
        let clock = clock_at(0);
        assert_eq!(beds.claim(AgentId(2), Vec2::ZERO, 10.0, &clock), None);
    }

    #[test]
    fn cache_refreshes_only_after_ttl() {
        let mut beds = BedRegistry::new(TTL);
        beds.add(Pose::at(Vec2::new(1.0, 0.0)), 1.0, None);
        let a = beds.claim(AgentId(1), Vec2::ZERO, 10.0, &clock_at(0));
        assert!(a.is_some());
        assert_eq!(beds.cache_refreshes(), 1);

        // A bed added now is invisible until the cache expires.
        let added = beds.add(Pose::at(Vec2::new(2.0, 0.0)), 1.0, None);
        assert_eq!(beds.claim(AgentId(2), Vec2::ZERO, 10.0, &clock_at(500)), None);
        assert_eq!(beds.cache_refreshes(), 1);

        assert_eq!(
            beds.claim(AgentId(2), Vec2::ZERO, 10.0, &clock_at(1_000)),
            Some(added)
        );
        assert_eq!(beds.cache_refreshes(), 2);
    }

    #[test]
    fn stale_entry_for_removed_bed_is_skipped() {
        let mut beds = BedRegistry::new(TTL);
        let gone = beds.add(Pose::at(Vec2::new(1.0, 0.0)), 1.0, None);
        let other = beds.add(Pose::at(Vec2::new(3.0, 0.0)), 1.0, None);
        // Warm the cache, then remove a bed it still lists.
        assert!(beds.claim(AgentId(1), Vec2::ZERO, 10.0, &clock_at(0)).is_some());
        beds.release(gone, AgentId(1));
        beds.remove(gone);
        assert_eq!(
            beds.claim(AgentId(2), Vec2::ZERO, 10.0, &clock_at(100)),
            Some(other)
        );
    }

    #[test]
    fn release_keeps_ownership() {
        let mut beds = BedRegistry::new(TTL);
        let bed = beds.add(Pose::at(Vec2::ZERO), 1.0, None);
        beds.claim(AgentId(1), Vec2::ZERO, 10.0, &clock_at(0));
        beds.release(bed, AgentId(1));
        let b = beds.get(bed).unwrap();
        assert_eq!(b.occupant(), None);
        assert_eq!(b.owner(), Some(AgentId(1)));
        beds.forget_owner(AgentId(1));
        assert_eq!(beds.get(bed).unwrap().owner(), None);
    }
}
