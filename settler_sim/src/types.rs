// Core types shared across the settler simulation.
//
// Defines planar positions (`Vec2`), oriented poses (`Pose`), strongly-typed
// entity identifiers, and the small enums (`Role`) that several modules
// agree on. All types derive `Serialize` and `Deserialize` so commands,
// events, and agent snapshots can cross the JSON boundary.
//
// Positions are continuous (`f32`, world units) rather than grid cells: the
// navigation protocol interpolates agents onto exact poses, so a cell grid
// would lose the precision it needs. Grid planners convert at their edge
// (see `grid.rs`).
//
// **Critical constraint: determinism.** Entity IDs are sequential `u32`
// counters owned by the registry that creates the entity. Never derive an ID
// from a hash, an address, or wall-clock time.

use serde::{Deserialize, Serialize};
use std::f32::consts::{PI, TAU};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Sub};

/// Distances below this are treated as zero when normalizing.
const EPSILON: f32 = 1e-5;

// ---------------------------------------------------------------------------
// Spatial types
// ---------------------------------------------------------------------------

/// A position (or displacement) on the ground plane, in world units.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0 };

    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn length(self) -> f32 {
        (self.x * self.x + self.y * self.y).sqrt()
    }

    pub fn distance(self, other: Self) -> f32 {
        (other - self).length()
    }

    /// Unit vector in the same direction, or `None` for a (near) zero vector.
    pub fn normalized(self) -> Option<Self> {
        let len = self.length();
        if len < EPSILON {
            None
        } else {
            Some(Self::new(self.x / len, self.y / len))
        }
    }

    /// Linear interpolation; `t` is clamped to `[0, 1]`.
    pub fn lerp(self, other: Self, t: f32) -> Self {
        let t = t.clamp(0.0, 1.0);
        self + (other - self) * t
    }

    /// Step toward `target` by at most `max_step`, never overshooting.
    pub fn move_towards(self, target: Self, max_step: f32) -> Self {
        let delta = target - self;
        let dist = delta.length();
        if dist <= max_step || dist < EPSILON {
            target
        } else {
            self + delta * (max_step / dist)
        }
    }

    /// Heading angle of this vector in radians, measured from +X toward +Y.
    pub fn heading(self) -> f32 {
        self.y.atan2(self.x)
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y)
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, rhs: Self) {
        self.x += rhs.x;
        self.y += rhs.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y)
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, rhs: f32) -> Self {
        Self::new(self.x * rhs, self.y * rhs)
    }
}

impl fmt::Display for Vec2 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.2}, {:.2})", self.x, self.y)
    }
}

/// A position plus a facing angle (radians). Used for agents and for the
/// exact spots some tasks require (a chair at a canteen table, a bed).
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Vec2,
    pub facing: f32,
}

impl Pose {
    pub const fn new(position: Vec2, facing: f32) -> Self {
        Self { position, facing }
    }

    pub const fn at(position: Vec2) -> Self {
        Self {
            position,
            facing: 0.0,
        }
    }
}

/// Wrap an angle into `(-PI, PI]`.
pub fn wrap_angle(angle: f32) -> f32 {
    let mut a = angle % TAU;
    if a <= -PI {
        a += TAU;
    } else if a > PI {
        a -= TAU;
    }
    a
}

/// Absolute angular distance along the shorter arc.
pub fn angle_between(a: f32, b: f32) -> f32 {
    wrap_angle(b - a).abs()
}

/// Interpolate from angle `a` toward `b` along the shorter arc.
pub fn lerp_angle(a: f32, b: f32, t: f32) -> f32 {
    wrap_angle(a + wrap_angle(b - a) * t.clamp(0.0, 1.0))
}

// ---------------------------------------------------------------------------
// Entity IDs
// ---------------------------------------------------------------------------

/// Declare a sequential entity ID newtype. Each registry hands these out
/// from its own counter, so two sims fed the same commands agree on every ID.
macro_rules! entity_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(
            Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
        )]
        pub struct $name(pub u32);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, "#{}"), self.0)
            }
        }
    };
}

entity_id!(
    /// An autonomous settler.
    AgentId,
    "agent"
);
entity_id!(
    /// A schedulable unit of work, a canteen seat, or a treatment slot.
    TaskId,
    "task"
);
entity_id!(
    /// A bed in the bed registry.
    BedId,
    "bed"
);
entity_id!(
    /// A capacity-bounded shelter.
    BunkerId,
    "bunker"
);
entity_id!(
    /// A building owning tasks and beds (workshop, canteen, ...).
    StructureId,
    "structure"
);
entity_id!(
    /// A hostile entity visible to the threat monitor.
    HostileId,
    "hostile"
);

/// Hands out sequential raw IDs. Registries wrap the value in their typed ID.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize)]
pub struct IdCounter {
    next: u32,
}

impl IdCounter {
    pub fn allocate(&mut self) -> u32 {
        let id = self.next;
        self.next += 1;
        id
    }
}

// ---------------------------------------------------------------------------
// Roles
// ---------------------------------------------------------------------------

/// How an agent reacts when the threat monitor spots a hostile: civilians
/// run for shelter, guards engage.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    #[default]
    Civilian,
    Guard,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn move_towards_never_overshoots() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert_eq!(a.move_towards(b, 10.0), b);
        let mid = a.move_towards(b, 2.5);
        assert!((mid.distance(a) - 2.5).abs() < 1e-5);
        assert!((mid.distance(b) - 2.5).abs() < 1e-5);
    }

    #[test]
    fn normalized_zero_is_none() {
        assert!(Vec2::ZERO.normalized().is_none());
        let n = Vec2::new(0.0, -2.0).normalized().unwrap();
        assert!((n.y + 1.0).abs() < 1e-6);
    }

    #[test]
    fn lerp_angle_takes_short_arc() {
        // From just below +PI to just above -PI should cross the seam, not
        // sweep through zero.
        let a = PI - 0.1;
        let b = -PI + 0.1;
        let half = lerp_angle(a, b, 0.5);
        assert!(angle_between(half, PI) < 1e-4, "got {half}");
    }

    #[test]
    fn wrap_angle_range() {
        for raw in [-10.0f32, -PI, 0.0, PI, 7.0, 100.0] {
            let w = wrap_angle(raw);
            assert!(w > -PI - 1e-6 && w <= PI + 1e-6, "{raw} -> {w}");
        }
    }

    #[test]
    fn id_counter_is_sequential() {
        let mut ids = IdCounter::default();
        assert_eq!(ids.allocate(), 0);
        assert_eq!(ids.allocate(), 1);
        assert_eq!(TaskId(7).to_string(), "task#7");
    }
}
