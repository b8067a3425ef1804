// Walkability grid planner with A* search.
//
// `NavGrid` rasterizes the ground plane into square cells, each either open
// or blocked (walls, water, cliffs). Routes are found with A* over the
// 8-connected cell graph: orthogonal steps cost one cell width, diagonals
// `sqrt(2)` cell widths, and a diagonal is only allowed when both adjacent
// orthogonal cells are open, so agents never clip wall corners. The open set
// is a `BinaryHeap` with reversed ordering (min-heap), the same pattern as
// the `EventQueue`; per-cell scores live in `FxHashMap`s because searches
// usually touch a small fraction of a large grid.
//
// The resulting cell path is turned into waypoints at cell centers with
// collinear runs collapsed, and the final waypoint is replaced by the exact
// requested destination so arrival math in `nav.rs` works in world units.
//
// Building footprints do not block cells: agents stop at a footprint's edge
// through the effective stopping distance. `footprint_at` reports them.
//
// See also: `planner.rs` for the `PathPlanner` trait, `nav.rs` for route
// following.
//
// **Critical constraint: determinism.** A* is a pure function of the grid
// and the endpoints. Heap ties break on cell coordinates; hash maps are
// only probed, never iterated.

use crate::planner::{PathPlanner, Route, sample_in_disc};
use crate::types::Vec2;
use rand::RngCore;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BinaryHeap;

/// Attempts made by `sample_walkable_point` before giving up.
const SAMPLE_ATTEMPTS: usize = 24;

/// Integer cell coordinate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Cell {
    pub x: i32,
    pub y: i32,
}

impl Cell {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// An axis-aligned block of cells, used to describe walls in scenarios.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CellRect {
    pub x: i32,
    pub y: i32,
    pub w: i32,
    pub h: i32,
}

/// Serializable description of a grid, for scenario files.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: i32,
    pub height: i32,
    pub cell_size: f32,
    #[serde(default)]
    pub origin: Vec2,
    #[serde(default)]
    pub walls: Vec<CellRect>,
}

#[derive(Clone, Debug)]
pub struct NavGrid {
    width: i32,
    height: i32,
    cell_size: f32,
    origin: Vec2,
    blocked: Vec<bool>,
    footprints: Vec<(Vec2, f32)>,
}

impl NavGrid {
    pub fn new(width: i32, height: i32, cell_size: f32, origin: Vec2) -> Self {
        let width = width.max(1);
        let height = height.max(1);
        Self {
            width,
            height,
            cell_size,
            origin,
            blocked: vec![false; (width * height) as usize],
            footprints: Vec::new(),
        }
    }

    pub fn from_spec(spec: &GridSpec) -> Self {
        let mut grid = Self::new(spec.width, spec.height, spec.cell_size, spec.origin);
        for rect in &spec.walls {
            grid.block_rect(*rect);
        }
        grid
    }

    pub fn block_rect(&mut self, rect: CellRect) {
        for y in rect.y..rect.y + rect.h {
            for x in rect.x..rect.x + rect.w {
                self.set_blocked(Cell::new(x, y), true);
            }
        }
    }

    /// Out-of-bounds cells are ignored.
    pub fn set_blocked(&mut self, cell: Cell, blocked: bool) {
        if let Some(i) = self.index(cell) {
            self.blocked[i] = blocked;
        }
    }

    pub fn add_footprint(&mut self, center: Vec2, radius: f32) {
        self.footprints.push((center, radius));
    }

    pub fn cell_of(&self, point: Vec2) -> Option<Cell> {
        let local = point - self.origin;
        let cell = Cell::new(
            (local.x / self.cell_size).floor() as i32,
            (local.y / self.cell_size).floor() as i32,
        );
        self.index(cell).map(|_| cell)
    }

    pub fn cell_center(&self, cell: Cell) -> Vec2 {
        self.origin
            + Vec2::new(
                (cell.x as f32 + 0.5) * self.cell_size,
                (cell.y as f32 + 0.5) * self.cell_size,
            )
    }

    fn index(&self, cell: Cell) -> Option<usize> {
        if cell.x < 0 || cell.y < 0 || cell.x >= self.width || cell.y >= self.height {
            None
        } else {
            Some((cell.y * self.width + cell.x) as usize)
        }
    }

    fn is_open(&self, cell: Cell) -> bool {
        self.index(cell).is_some_and(|i| !self.blocked[i])
    }

    /// Open neighbors of `cell` with their step costs (in cell widths).
    fn neighbors(&self, cell: Cell) -> impl Iterator<Item = (Cell, f32)> + '_ {
        const STEPS: [(i32, i32); 8] = [
            (1, 0),
            (-1, 0),
            (0, 1),
            (0, -1),
            (1, 1),
            (1, -1),
            (-1, 1),
            (-1, -1),
        ];
        STEPS.iter().filter_map(move |&(dx, dy)| {
            let next = Cell::new(cell.x + dx, cell.y + dy);
            if !self.is_open(next) {
                return None;
            }
            if dx != 0 && dy != 0 {
                let side_a = Cell::new(cell.x + dx, cell.y);
                let side_b = Cell::new(cell.x, cell.y + dy);
                if !self.is_open(side_a) || !self.is_open(side_b) {
                    return None;
                }
                Some((next, std::f32::consts::SQRT_2))
            } else {
                Some((next, 1.0))
            }
        })
    }

    /// A* from `start` to `goal`. Returns the cell path, inclusive.
    pub fn astar(&self, start: Cell, goal: Cell) -> Option<Vec<Cell>> {
        if !self.is_open(start) || !self.is_open(goal) {
            return None;
        }
        if start == goal {
            return Some(vec![start]);
        }

        let mut g_score: FxHashMap<Cell, f32> = FxHashMap::default();
        let mut came_from: FxHashMap<Cell, Cell> = FxHashMap::default();
        let mut closed: FxHashSet<Cell> = FxHashSet::default();

        g_score.insert(start, 0.0);
        let mut open = BinaryHeap::new();
        open.push(OpenEntry {
            cell: start,
            f_score: octile(start, goal),
        });

        while let Some(current) = open.pop() {
            let cell = current.cell;
            if cell == goal {
                return Some(reconstruct(&came_from, start, goal));
            }
            if !closed.insert(cell) {
                continue;
            }
            let current_g = g_score.get(&cell).copied().unwrap_or(f32::INFINITY);

            for (next, cost) in self.neighbors(cell) {
                if closed.contains(&next) {
                    continue;
                }
                let tentative = current_g + cost;
                if tentative < g_score.get(&next).copied().unwrap_or(f32::INFINITY) {
                    g_score.insert(next, tentative);
                    came_from.insert(next, cell);
                    open.push(OpenEntry {
                        cell: next,
                        f_score: tentative + octile(next, goal),
                    });
                }
            }
        }

        None
    }
}

impl PathPlanner for NavGrid {
    fn find_route(&mut self, from: Vec2, to: Vec2) -> Option<Route> {
        let start = self.cell_of(from)?;
        let goal = self.cell_of(to)?;
        let cells = self.astar(start, goal)?;

        let mut route = Route::default();
        // Keep only the cells where the path turns; the last cell is replaced
        // by the exact destination.
        for i in 1..cells.len().saturating_sub(1) {
            let before = (cells[i].x - cells[i - 1].x, cells[i].y - cells[i - 1].y);
            let after = (cells[i + 1].x - cells[i].x, cells[i + 1].y - cells[i].y);
            if before != after {
                route.waypoints.push(self.cell_center(cells[i]));
            }
        }
        route.waypoints.push(to);
        Some(route)
    }

    fn sample_walkable_point(
        &self,
        near: Vec2,
        radius: f32,
        rng: &mut dyn RngCore,
    ) -> Option<Vec2> {
        (0..SAMPLE_ATTEMPTS)
            .map(|_| sample_in_disc(near, radius, rng))
            .find(|&p| self.is_walkable(p))
    }

    fn is_walkable(&self, point: Vec2) -> bool {
        self.cell_of(point).is_some_and(|c| self.is_open(c))
    }

    fn footprint_at(&self, point: Vec2) -> f32 {
        self.footprints
            .iter()
            .filter(|(center, radius)| center.distance(point) <= *radius)
            .map(|&(_, radius)| radius)
            .fold(0.0, f32::max)
    }
}

/// Entry in the A* open set (min-heap via reversed ordering).
struct OpenEntry {
    cell: Cell,
    f_score: f32,
}

impl PartialEq for OpenEntry {
    fn eq(&self, other: &Self) -> bool {
        self.f_score.total_cmp(&other.f_score) == Ordering::Equal && self.cell == other.cell
    }
}

impl Eq for OpenEntry {}

impl PartialOrd for OpenEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for OpenEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .f_score
            .total_cmp(&self.f_score)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

/// Admissible heuristic for 8-connected movement.
fn octile(a: Cell, b: Cell) -> f32 {
    let dx = (a.x - b.x).abs() as f32;
    let dy = (a.y - b.y).abs() as f32;
    let (lo, hi) = if dx < dy { (dx, dy) } else { (dy, dx) };
    hi + (std::f32::consts::SQRT_2 - 1.0) * lo
}

fn reconstruct(came_from: &FxHashMap<Cell, Cell>, start: Cell, goal: Cell) -> Vec<Cell> {
    let mut cells = vec![goal];
    let mut current = goal;
    while current != start {
        match came_from.get(&current) {
            Some(&prev) => {
                cells.push(prev);
                current = prev;
            }
            None => break,
        }
    }
    cells.reverse();
    cells
}
