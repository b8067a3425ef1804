// Per-agent navigation: coarse approach, precise lock, stuck detection.
//
// Every agent owns a `NavAgent`. Behaviors call `set_destination` with a
// `NavTarget` and then read `status()` each tick; the agent controller calls
// `tick` once per tick to move the agent. Movement happens in two phases:
//
//   1. **Coarse approach.** The planner produces a route (one tick after
//      `set_destination`, mirroring an asynchronous path request: the handle
//      reports `Pending` until then). The agent follows it at the speed its
//      behavior allows and stops at the *effective stopping distance*: the
//      destination's footprint (the larger of the target's own and what the
//      planner reports) plus the caller's clearance. Arrival is declared when
//      the remaining route length is within that distance and no recalculation
//      is pending.
//   2. **Precise lock.** If the target carries an exact `Pose` (a chair, a bed,
//      a workbench spot), path following is switched off and position and
//      facing are interpolated toward it at `precise_lerp_rate` until within
//      tolerance, then snapped. If the agent is observed moving *away* from
//      the pose (pushed, knocked back), during the lock or after the snap,
//      path following is re-enabled and the approach restarts.
//
// Stuck detection samples displacement over `stuck_window_ms`. Too little
// movement triggers a path recalculation; after `stuck_max_retries`
// recalculations (or failed route requests) the handle reports
// `Unreachable` and the behavior applies its own fallback.
//
// See also: `planner.rs` for the route source, `behavior/` for the states
// that issue destinations, `agent.rs` for the per-tick call order.
//
// **Critical constraint: determinism.** All motion is integrated from the
// sim clock's fixed `dt`; nothing here reads wall-clock time.

use crate::config::NavConfig;
use crate::planner::{PathPlanner, Route};
use crate::types::{Pose, Vec2, angle_between, lerp_angle};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Slack for float error when comparing remaining distance to the stopping
/// distance.
const ARRIVAL_EPSILON: f32 = 1e-4;

/// Where a behavior wants its agent to go.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NavTarget {
    pub point: Vec2,
    /// Radius of the physical object at `point`.
    pub footprint: f32,
    /// Extra gap the caller wants between agent and footprint.
    pub clearance: f32,
    /// Exact pose to lock onto after the coarse approach.
    pub precise: Option<Pose>,
}

impl NavTarget {
    pub fn point(point: Vec2) -> Self {
        Self {
            point,
            footprint: 0.0,
            clearance: 0.0,
            precise: None,
        }
    }

    pub fn with_footprint(mut self, footprint: f32) -> Self {
        self.footprint = footprint;
        self
    }

    pub fn with_clearance(mut self, clearance: f32) -> Self {
        self.clearance = clearance;
        self
    }

    pub fn with_precise(mut self, pose: Option<Pose>) -> Self {
        self.precise = pose;
        self
    }
}

/// What the navigation handle is doing, as observed by behaviors.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum NavStatus {
    /// No destination.
    #[default]
    Idle,
    /// A route request is outstanding.
    Pending,
    /// Following a route (coarse approach).
    Moving,
    /// Interpolating onto the precise pose.
    Locking,
    /// At the destination (and on the precise pose, if there was one).
    Arrived,
    /// Retries exhausted; the destination is unobtainable.
    Unreachable,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
enum Phase {
    #[default]
    Idle,
    Approach,
    PreciseLock,
    Arrived,
    Failed,
}

/// Stopping distance for a destination with the given footprint and the
/// caller's clearance.
pub fn effective_stopping_distance(footprint: f32, clearance: f32) -> f32 {
    (footprint.max(0.0) + clearance).max(0.0)
}

#[derive(Clone, Debug, Default)]
pub struct NavAgent {
    target: Option<NavTarget>,
    route: Option<Route>,
    path_pending: bool,
    auto_follow: bool,
    stopping_distance: f32,
    phase: Phase,
    status: NavStatus,
    retries: u32,
    stuck_origin: Vec2,
    stuck_since_ms: u64,
    /// Distance to the precise pose after the previous lock step.
    lock_distance: Option<f32>,
}

impl NavAgent {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new coarse approach toward `target`, discarding whatever the
    /// handle was doing.
    pub fn set_destination(
        &mut self,
        target: NavTarget,
        planner: &dyn PathPlanner,
        position: Vec2,
        now_ms: u64,
    ) {
        let footprint = target.footprint.max(planner.footprint_at(target.point));
        *self = Self {
            target: Some(target),
            route: None,
            path_pending: true,
            auto_follow: true,
            stopping_distance: effective_stopping_distance(footprint, target.clearance),
            phase: Phase::Approach,
            status: NavStatus::Pending,
            retries: 0,
            stuck_origin: position,
            stuck_since_ms: now_ms,
            lock_distance: None,
        };
    }

    /// Drop the destination and return every field to its default, so the
    /// next behavior starts without a stale stopping distance or a disabled
    /// auto-follow flag.
    pub fn stop(&mut self) {
        *self = Self::default();
    }

    pub fn status(&self) -> NavStatus {
        self.status
    }

    pub fn target(&self) -> Option<&NavTarget> {
        self.target.as_ref()
    }

    pub fn is_path_pending(&self) -> bool {
        self.path_pending
    }

    pub fn stopping_distance(&self) -> f32 {
        self.stopping_distance
    }

    /// Whether the agent is currently following its route. False during the
    /// precise lock.
    pub fn auto_follow(&self) -> bool {
        self.auto_follow
    }

    pub fn retries(&self) -> u32 {
        self.retries
    }

    pub fn has_arrived(&self) -> bool {
        self.phase == Phase::Arrived
    }

    pub fn is_idle(&self) -> bool {
        self.phase == Phase::Idle
    }

    /// Remaining route length from `position`. Infinite while a route is
    /// pending, zero without a destination.
    pub fn remaining_distance(&self, position: Vec2) -> f32 {
        match (&self.target, &self.route) {
            (None, _) => 0.0,
            (Some(_), _) if self.path_pending => f32::INFINITY,
            (Some(_), Some(route)) => route.length_from(position),
            (Some(target), None) => position.distance(target.point),
        }
    }

    /// Advance one tick. Moves `pose` and returns the new status.
    pub fn tick(
        &mut self,
        pose: &mut Pose,
        speed: f32,
        planner: &mut dyn PathPlanner,
        now_ms: u64,
        dt_secs: f32,
        cfg: &NavConfig,
    ) -> NavStatus {
        let status = match self.phase {
            Phase::Idle => NavStatus::Idle,
            Phase::Arrived => self.tick_arrived(pose, now_ms, cfg),
            Phase::Failed => NavStatus::Unreachable,
            Phase::Approach => self.tick_approach(pose, speed, planner, now_ms, dt_secs, cfg),
            Phase::PreciseLock => self.tick_lock(pose, now_ms, dt_secs, cfg),
        };
        self.status = status;
        status
    }

    fn tick_approach(
        &mut self,
        pose: &mut Pose,
        speed: f32,
        planner: &mut dyn PathPlanner,
        now_ms: u64,
        dt_secs: f32,
        cfg: &NavConfig,
    ) -> NavStatus {
        let Some(target) = self.target else {
            self.phase = Phase::Idle;
            return NavStatus::Idle;
        };

        if self.path_pending {
            self.path_pending = false;
            match planner.find_route(pose.position, target.point) {
                Some(route) => self.route = Some(route),
                None => {
                    debug!(point = %target.point, "no route to destination");
                    return self.register_failure(pose.position, now_ms, cfg);
                }
            }
            self.reset_stuck(pose.position, now_ms);
        }

        let remaining = self.remaining_distance(pose.position);
        if remaining <= self.stopping_distance + ARRIVAL_EPSILON {
            return self.arrive_coarse(target);
        }

        if self.auto_follow && speed > 0.0 {
            let budget = (speed * dt_secs).min(remaining - self.stopping_distance);
            self.advance(pose, budget);
            if self.remaining_distance(pose.position) <= self.stopping_distance + ARRIVAL_EPSILON
            {
                return self.arrive_coarse(target);
            }
        }

        if now_ms.saturating_sub(self.stuck_since_ms) >= cfg.stuck_window_ms {
            let moved = pose.position.distance(self.stuck_origin);
            if moved < cfg.stuck_min_displacement {
                warn!(
                    point = %target.point,
                    moved,
                    retries = self.retries,
                    "navigation stuck, recalculating"
                );
                return self.register_failure(pose.position, now_ms, cfg);
            }
            self.reset_stuck(pose.position, now_ms);
        }

        NavStatus::Moving
    }

    fn tick_lock(
        &mut self,
        pose: &mut Pose,
        now_ms: u64,
        dt_secs: f32,
        cfg: &NavConfig,
    ) -> NavStatus {
        let Some(goal) = self.target.and_then(|t| t.precise) else {
            self.phase = Phase::Arrived;
            return NavStatus::Arrived;
        };

        let dist = pose.position.distance(goal.position);
        if let Some(prev) = self.lock_distance
            && dist > prev + cfg.lock_breakaway_epsilon
        {
            debug!(dist, prev, "moved away from precise pose, resuming approach");
            return self.break_away(pose.position, now_ms);
        }

        let t = (cfg.precise_lerp_rate * dt_secs).min(1.0);
        pose.position = pose.position.lerp(goal.position, t);
        pose.facing = lerp_angle(pose.facing, goal.facing, t);

        let dist = pose.position.distance(goal.position);
        if dist <= cfg.precise_position_tolerance
            && angle_between(pose.facing, goal.facing) <= cfg.precise_angle_tolerance
        {
            *pose = goal;
            self.phase = Phase::Arrived;
            self.lock_distance = None;
            return NavStatus::Arrived;
        }

        self.lock_distance = Some(dist);
        NavStatus::Locking
    }

    /// Hold the arrival. An agent snapped onto a precise pose that has since
    /// been displaced off it is no longer in place.
    fn tick_arrived(&mut self, pose: &Pose, now_ms: u64, cfg: &NavConfig) -> NavStatus {
        let Some(goal) = self.target.and_then(|t| t.precise) else {
            return NavStatus::Arrived;
        };
        let dist = pose.position.distance(goal.position);
        if dist > cfg.precise_position_tolerance + cfg.lock_breakaway_epsilon {
            debug!(dist, "displaced off precise pose, resuming approach");
            return self.break_away(pose.position, now_ms);
        }
        NavStatus::Arrived
    }

    fn break_away(&mut self, position: Vec2, now_ms: u64) -> NavStatus {
        self.auto_follow = true;
        self.phase = Phase::Approach;
        self.path_pending = true;
        self.lock_distance = None;
        self.reset_stuck(position, now_ms);
        NavStatus::Pending
    }

    fn arrive_coarse(&mut self, target: NavTarget) -> NavStatus {
        if target.precise.is_some() {
            self.phase = Phase::PreciseLock;
            self.auto_follow = false;
            self.lock_distance = None;
            NavStatus::Locking
        } else {
            self.phase = Phase::Arrived;
            NavStatus::Arrived
        }
    }

    /// Count a failed route request or a stuck window. Schedules a
    /// recalculation, or gives up once retries are exhausted.
    fn register_failure(&mut self, position: Vec2, now_ms: u64, cfg: &NavConfig) -> NavStatus {
        self.retries += 1;
        if self.retries > cfg.stuck_max_retries {
            warn!(retries = self.retries, "destination unreachable");
            self.phase = Phase::Failed;
            self.route = None;
            self.path_pending = false;
            return NavStatus::Unreachable;
        }
        self.path_pending = true;
        self.reset_stuck(position, now_ms);
        NavStatus::Pending
    }

    fn reset_stuck(&mut self, position: Vec2, now_ms: u64) {
        self.stuck_origin = position;
        self.stuck_since_ms = now_ms;
    }

    /// Walk `budget` units along the route.
    fn advance(&mut self, pose: &mut Pose, mut budget: f32) {
        let Some(route) = self.route.as_mut() else {
            return;
        };
        let start = pose.position;
        while budget > 0.0 {
            let Some(&next) = route.waypoints.first() else {
                break;
            };
            let d = pose.position.distance(next);
            if d <= budget {
                pose.position = next;
                budget -= d;
                // Keep the final waypoint: remaining distance is measured
                // against it.
                if route.waypoints.len() > 1 {
                    route.waypoints.remove(0);
                } else {
                    break;
                }
            } else {
                pose.position = pose.position.move_towards(next, budget);
                budget = 0.0;
            }
        }
        if let Some(dir) = (pose.position - start).normalized() {
            pose.facing = dir.heading();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::OpenFieldPlanner;
    use rand::RngCore;

    const DT: f32 = 0.1;
    const DT_MS: u64 = 100;

    /// Helper: a planner that never finds a route.
    struct NoRoutePlanner;

    impl PathPlanner for NoRoutePlanner {
        fn find_route(&mut self, _from: Vec2, _to: Vec2) -> Option<Route> {
            None
        }
        fn sample_walkable_point(
            &self,
            _near: Vec2,
            _radius: f32,
            _rng: &mut dyn RngCore,
        ) -> Option<Vec2> {
            None
        }
        fn is_walkable(&self, _point: Vec2) -> bool {
            false
        }
    }

    /// Helper: tick until the status is terminal or `max_ticks` pass.
    /// Returns the status history.
    fn run(
        nav: &mut NavAgent,
        pose: &mut Pose,
        speed: f32,
        planner: &mut dyn PathPlanner,
        max_ticks: u64,
    ) -> Vec<NavStatus> {
        let cfg = NavConfig::default();
        let mut history = Vec::new();
        for tick in 1..=max_ticks {
            let status = nav.tick(pose, speed, planner, tick * DT_MS, DT, &cfg);
            history.push(status);
            if matches!(status, NavStatus::Arrived | NavStatus::Unreachable) {
                break;
            }
        }
        history
    }

    #[test]
    fn stopping_distance_adds_clearance_to_footprint() {
        assert_eq!(effective_stopping_distance(1.5, 0.25), 1.75);
        assert_eq!(effective_stopping_distance(-1.0, 0.25), 0.25);
        assert_eq!(effective_stopping_distance(0.0, -1.0), 0.0);
    }

    #[test]
    fn path_pending_until_first_tick() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        nav.set_destination(
            NavTarget::point(Vec2::new(10.0, 0.0)),
            &planner,
            pose.position,
            0,
        );
        assert!(nav.is_path_pending());
        assert_eq!(nav.remaining_distance(pose.position), f32::INFINITY);
        let status = nav.tick(
            &mut pose,
            1.0,
            &mut planner,
            DT_MS,
            DT,
            &NavConfig::default(),
        );
        assert_eq!(status, NavStatus::Moving);
        assert!(!nav.is_path_pending());
    }

    #[test]
    fn coarse_approach_stops_at_footprint_edge() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        let target = NavTarget::point(Vec2::new(10.0, 0.0))
            .with_footprint(2.0)
            .with_clearance(0.5);
        nav.set_destination(target, &planner, pose.position, 0);
        let history = run(&mut nav, &mut pose, 3.0, &mut planner, 200);
        assert_eq!(history.last(), Some(&NavStatus::Arrived));
        assert!(
            (pose.position.x - 7.5).abs() < 1e-3,
            "should stop 2.5 short, at {}",
            pose.position
        );
    }

    #[test]
    fn planner_footprint_extends_stopping_distance() {
        let mut planner = OpenFieldPlanner::new();
        planner.add_footprint(Vec2::new(10.0, 0.0), 3.0);
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        nav.set_destination(
            NavTarget::point(Vec2::new(10.0, 0.0)).with_footprint(1.0),
            &planner,
            pose.position,
            0,
        );
        assert_eq!(nav.stopping_distance(), 3.0);
    }

    #[test]
    fn precise_lock_only_after_coarse_arrival_and_terminates() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        let seat = Pose::new(Vec2::new(5.0, 1.0), 1.2);
        let target = NavTarget::point(Vec2::new(5.0, 0.0))
            .with_footprint(1.0)
            .with_precise(Some(seat));
        nav.set_destination(target, &planner, pose.position, 0);

        let history = run(&mut nav, &mut pose, 2.0, &mut planner, 500);
        let first_lock = history
            .iter()
            .position(|s| *s == NavStatus::Locking)
            .expect("never entered precise lock");
        assert!(
            history[..first_lock]
                .iter()
                .all(|s| matches!(s, NavStatus::Moving | NavStatus::Pending)),
            "lock began before coarse arrival: {history:?}"
        );
        assert_eq!(history.last(), Some(&NavStatus::Arrived));
        assert_eq!(pose, seat, "lock should snap exactly onto the pose");
        assert!(nav.has_arrived());
    }

    #[test]
    fn auto_follow_disabled_during_lock() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::new(4.0, 0.0));
        let target = NavTarget::point(Vec2::new(5.0, 0.0))
            .with_footprint(1.0)
            .with_precise(Some(Pose::new(Vec2::new(5.0, 0.0), 0.0)));
        nav.set_destination(target, &planner, pose.position, 0);
        let cfg = NavConfig::default();
        // Already inside the stopping distance: first tick computes the
        // route and arrives coarsely.
        let status = nav.tick(&mut pose, 1.0, &mut planner, DT_MS, DT, &cfg);
        assert_eq!(status, NavStatus::Locking);
        assert!(!nav.auto_follow());
    }

    #[test]
    fn pushed_away_during_lock_resumes_path_following() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::new(3.9, 0.0));
        let seat = Pose::new(Vec2::new(5.0, 0.0), 0.0);
        let target = NavTarget::point(seat.position)
            .with_footprint(1.0)
            .with_precise(Some(seat));
        nav.set_destination(target, &planner, pose.position, 0);

        // Slow lerp, so the lock spans several ticks.
        let cfg = NavConfig {
            precise_lerp_rate: 1.0,
            ..NavConfig::default()
        };
        let mut tick = 1;
        let mut step = |nav: &mut NavAgent, pose: &mut Pose| {
            let s = nav.tick(pose, 1.0, &mut planner, tick * DT_MS, DT, &cfg);
            tick += 1;
            s
        };
        assert_eq!(step(&mut nav, &mut pose), NavStatus::Locking);
        assert_eq!(step(&mut nav, &mut pose), NavStatus::Locking);

        // Knockback.
        pose.position = Vec2::new(-3.0, 0.0);
        assert_eq!(step(&mut nav, &mut pose), NavStatus::Pending);
        assert!(nav.auto_follow());
        assert_eq!(step(&mut nav, &mut pose), NavStatus::Moving);
    }

    #[test]
    fn pushed_off_snapped_pose_resumes_path_following() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        let bench = Pose::new(Vec2::new(6.0, 0.5), 0.0);
        let target = NavTarget::point(Vec2::new(6.0, 0.0))
            .with_footprint(0.5)
            .with_precise(Some(bench));
        nav.set_destination(target, &planner, pose.position, 0);
        let history = run(&mut nav, &mut pose, 2.0, &mut planner, 500);
        assert_eq!(history.last(), Some(&NavStatus::Arrived));
        assert!(!nav.auto_follow());

        let cfg = NavConfig::default();
        // Sitting still keeps the arrival.
        assert_eq!(
            nav.tick(&mut pose, 2.0, &mut planner, 60_000, DT, &cfg),
            NavStatus::Arrived
        );

        pose.position = pose.position + Vec2::new(-15.0, 0.0);
        assert_eq!(
            nav.tick(&mut pose, 2.0, &mut planner, 60_100, DT, &cfg),
            NavStatus::Pending
        );
        assert!(nav.auto_follow());
        assert!(!nav.has_arrived());

        let history = run(&mut nav, &mut pose, 2.0, &mut planner, 500);
        assert_eq!(history.last(), Some(&NavStatus::Arrived));
        assert_eq!(pose, bench);
    }

    #[test]
    fn unreachable_after_capped_retries() {
        let mut planner = NoRoutePlanner;
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        nav.set_destination(
            NavTarget::point(Vec2::new(5.0, 5.0)),
            &planner,
            pose.position,
            0,
        );
        let history = run(&mut nav, &mut pose, 1.0, &mut planner, 50);
        let max = NavConfig::default().stuck_max_retries as usize;
        assert_eq!(history.len(), max + 1, "history: {history:?}");
        assert_eq!(history.last(), Some(&NavStatus::Unreachable));
        // Stays failed until a new destination is set.
        let cfg = NavConfig::default();
        assert_eq!(
            nav.tick(&mut pose, 1.0, &mut planner, 99_999, DT, &cfg),
            NavStatus::Unreachable
        );
    }

    #[test]
    fn no_movement_is_detected_as_stuck() {
        let mut planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        let mut pose = Pose::at(Vec2::ZERO);
        nav.set_destination(
            NavTarget::point(Vec2::new(50.0, 0.0)),
            &planner,
            pose.position,
            0,
        );
        // Zero speed: the agent never moves, so every window trips.
        let history = run(&mut nav, &mut pose, 0.0, &mut planner, 1_000);
        assert_eq!(history.last(), Some(&NavStatus::Unreachable));
        assert!(
            history.contains(&NavStatus::Pending),
            "should recalculate before giving up"
        );
        assert_eq!(
            nav.retries(),
            NavConfig::default().stuck_max_retries + 1
        );
    }

    #[test]
    fn stop_resets_to_defaults() {
        let planner = OpenFieldPlanner::new();
        let mut nav = NavAgent::new();
        nav.set_destination(
            NavTarget::point(Vec2::new(1.0, 1.0)).with_footprint(4.0),
            &planner,
            Vec2::ZERO,
            0,
        );
        assert!(nav.stopping_distance() > 0.0);
        nav.stop();
        assert_eq!(nav.stopping_distance(), 0.0);
        assert!(nav.is_idle());
        assert!(!nav.is_path_pending());
        assert_eq!(nav.status(), NavStatus::Idle);
        assert!(nav.target().is_none());
    }
}
