// Structures: the buildings that own tasks and beds.
//
// The behavior core only needs a thin view of buildings: where they are,
// what kind they are, and (for canteens) how much food is left. Tasks and
// beds point back at their structure by `StructureId`; destroying a
// structure goes through `SimState::destroy_structure`, which removes the
// structure here and then unregisters its tasks and beds, evicting anyone
// holding them.
//
// Canteen food is the one piece of building state the core mutates, and
// only through `take_meal` when a seated agent actually eats.

use crate::types::{IdCounter, StructureId, Vec2};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StructureKind {
    Workshop,
    Canteen,
    MedicalBay,
    Dormitory,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Structure {
    pub id: StructureId,
    pub kind: StructureKind,
    pub position: Vec2,
    pub footprint: f32,
    /// Meals in stock. Only meaningful for canteens.
    pub food: u32,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StructureRegistry {
    structures: BTreeMap<StructureId, Structure>,
    ids: IdCounter,
}

impl StructureRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, kind: StructureKind, position: Vec2, footprint: f32) -> StructureId {
        let id = StructureId(self.ids.allocate());
        self.structures.insert(
            id,
            Structure {
                id,
                kind,
                position,
                footprint,
                food: 0,
            },
        );
        id
    }

    pub fn remove(&mut self, id: StructureId) -> Option<Structure> {
        self.structures.remove(&id)
    }

    pub fn get(&self, id: StructureId) -> Option<&Structure> {
        self.structures.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Structure> {
        self.structures.values()
    }

    /// Add meals to a canteen. Returns false for unknown or non-canteen
    /// structures.
    pub fn stock_food(&mut self, id: StructureId, meals: u32) -> bool {
        match self.structures.get_mut(&id) {
            Some(s) if s.kind == StructureKind::Canteen => {
                s.food = s.food.saturating_add(meals);
                true
            }
            _ => false,
        }
    }

    pub fn has_food(&self, id: StructureId) -> bool {
        self.structures
            .get(&id)
            .is_some_and(|s| s.kind == StructureKind::Canteen && s.food > 0)
    }

    /// Consume one meal. False if the canteen ran out (or is gone).
    pub fn take_meal(&mut self, id: StructureId) -> bool {
        match self.structures.get_mut(&id) {
            Some(s) if s.kind == StructureKind::Canteen && s.food > 0 => {
                s.food -= 1;
                true
            }
            _ => false,
        }
    }

    pub fn stocked_canteens(&self) -> Vec<StructureId> {
        self.structures
            .values()
            .filter(|s| s.kind == StructureKind::Canteen && s.food > 0)
            .map(|s| s.id)
            .collect()
    }
}
