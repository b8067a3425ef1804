// Path planner interface.
//
// The behavior core consumes path planning, it does not own it. A
// `PathPlanner` turns a start and destination into a `Route` of waypoints,
// reports how large the obstacle at a point is (used for the effective
// stopping distance), and samples walkable points for wandering and
// fleeing. Route following, arrival, precise positioning, and stuck
// detection live in `nav.rs` on top of this trait.
//
// Two planners ship with the crate: `OpenFieldPlanner` below (everything is
// walkable, routes are straight lines) and `NavGrid` in `grid.rs` (A* over
// a walkability grid). Hosts with a real navigation mesh implement the trait
// themselves.
//
// **Critical constraint: determinism.** Planners receive the world's seeded
// RNG for sampling and must not keep their own entropy source.

use crate::types::Vec2;
use rand::{Rng, RngCore};
use smallvec::SmallVec;

/// Waypoints to visit in order, ending at the requested destination. The
/// start position is not included.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Route {
    pub waypoints: SmallVec<[Vec2; 8]>,
}

impl Route {
    pub fn direct(to: Vec2) -> Self {
        let mut waypoints = SmallVec::new();
        waypoints.push(to);
        Self { waypoints }
    }

    /// Path length from `from` through every remaining waypoint.
    pub fn length_from(&self, from: Vec2) -> f32 {
        let mut total = 0.0;
        let mut prev = from;
        for &wp in &self.waypoints {
            total += prev.distance(wp);
            prev = wp;
        }
        total
    }

    pub fn is_empty(&self) -> bool {
        self.waypoints.is_empty()
    }

    pub fn destination(&self) -> Option<Vec2> {
        self.waypoints.last().copied()
    }
}

pub trait PathPlanner {
    /// Compute a walkable route, or `None` if the destination cannot be
    /// reached from `from`.
    fn find_route(&mut self, from: Vec2, to: Vec2) -> Option<Route>;

    /// A random walkable point within `radius` of `near`, if one exists.
    fn sample_walkable_point(
        &self,
        near: Vec2,
        radius: f32,
        rng: &mut dyn RngCore,
    ) -> Option<Vec2>;

    fn is_walkable(&self, point: Vec2) -> bool;

    /// Radius of the obstacle occupying `point`, or zero if there is none.
    fn footprint_at(&self, _point: Vec2) -> f32 {
        0.0
    }
}

/// Uniform sample inside a disc. Shared by the bundled planners.
pub(crate) fn sample_in_disc(center: Vec2, radius: f32, rng: &mut dyn RngCore) -> Vec2 {
    let angle = rng.random_range(0.0..std::f32::consts::TAU);
    let r = radius * rng.random::<f32>().sqrt();
    center + Vec2::new(angle.cos(), angle.sin()) * r
}

/// A planner for unobstructed ground. Every point is walkable and routes
/// are a single straight segment.
#[derive(Clone, Debug, Default)]
pub struct OpenFieldPlanner {
    /// Circular obstacles reported through `footprint_at`. They do not
    /// block movement.
    footprints: Vec<(Vec2, f32)>,
}

impl OpenFieldPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_footprint(&mut self, center: Vec2, radius: f32) {
        self.footprints.push((center, radius));
    }
}

impl PathPlanner for OpenFieldPlanner {
    fn find_route(&mut self, _from: Vec2, to: Vec2) -> Option<Route> {
        Some(Route::direct(to))
    }

    fn sample_walkable_point(
        &self,
        near: Vec2,
        radius: f32,
        rng: &mut dyn RngCore,
    ) -> Option<Vec2> {
        Some(sample_in_disc(near, radius, rng))
    }

    fn is_walkable(&self, _point: Vec2) -> bool {
        true
    }

    fn footprint_at(&self, point: Vec2) -> f32 {
        self.footprints
            .iter()
            .filter(|(center, radius)| center.distance(point) <= *radius)
            .map(|&(_, radius)| radius)
            .fold(0.0, f32::max)
    }
}
