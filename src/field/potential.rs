//! Exit potentials
//!
//! Shortest open-path distance from every cell to an exit, computed with
//! Dijkstra over the 8-neighbour grid. Diagonal steps may not cut wall
//! corners. Unreachable cells keep `f32::INFINITY`.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use super::grid::GridSpec;
use crate::hazard::geometry::distance;
use crate::hazard::Point;

/// Lattice neighbour offsets, counter-clockwise from east.
pub const NEIGHBOURS: [(i32, i32); 8] = [
    (1, 0),
    (1, 1),
    (0, 1),
    (-1, 1),
    (-1, 0),
    (-1, -1),
    (0, -1),
    (1, -1),
];

/// Unit vectors of [`NEIGHBOURS`].
pub const DIRECTIONS: [[f32; 2]; 8] = {
    const D: f32 = std::f32::consts::FRAC_1_SQRT_2;
    [
        [1.0, 0.0],
        [D, D],
        [0.0, 1.0],
        [-D, D],
        [-1.0, 0.0],
        [-D, -D],
        [0.0, -1.0],
        [D, -D],
    ]
};

/// Neighbour index pointing the opposite way.
#[inline]
pub fn opposite(k: usize) -> usize {
    (k + 4) % 8
}

/// Length of neighbour step `k` in cells.
#[inline]
pub fn step_length(k: usize) -> f32 {
    if k % 2 == 1 {
        std::f32::consts::SQRT_2
    } else {
        1.0
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct Frontier {
    cost: f32,
    cell: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        // Min-heap on cost, ties broken by cell index for determinism.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.cell.cmp(&self.cell))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Neighbour reached by stepping `(dx, dy)` from `(x, y)`, if open and not
/// cutting a wall corner.
#[inline]
pub fn step(spec: &GridSpec, walls: &[bool], x: usize, y: usize, dx: i32, dy: i32) -> Option<usize> {
    let n = spec.offset(x, y, dx, dy)?;
    if walls[n] {
        return None;
    }
    if dx != 0 && dy != 0 {
        let side_x = spec.offset(x, y, dx, 0)?;
        let side_y = spec.offset(x, y, 0, dy)?;
        if walls[side_x] || walls[side_y] {
            return None;
        }
    }
    Some(n)
}

/// Open cells serving as the sink of `exit`: every cell whose centre lies
/// within `radius`, and always the cell containing the exit.
pub fn exit_cells(spec: &GridSpec, walls: &[bool], exit: Point, radius: f32) -> Vec<usize> {
    let (ex, ey) = spec.cell_of(exit);
    let mut cells = vec![spec.index(ex, ey)];
    for y in 0..spec.height {
        for x in 0..spec.width {
            let idx = spec.index(x, y);
            if !walls[idx] && idx != cells[0] && distance(spec.center(x, y), exit) <= radius {
                cells.push(idx);
            }
        }
    }
    cells
}

pub fn distance_field(spec: &GridSpec, walls: &[bool], sources: &[usize]) -> Vec<f32> {
    let mut dist = vec![f32::INFINITY; spec.len()];
    let mut heap = BinaryHeap::new();
    for &s in sources {
        dist[s] = 0.0;
        heap.push(Frontier { cost: 0.0, cell: s });
    }

    let diagonal = spec.cell_size * std::f32::consts::SQRT_2;
    while let Some(Frontier { cost, cell }) = heap.pop() {
        if cost > dist[cell] {
            continue;
        }
        let (x, y) = spec.coords(cell);
        for (dx, dy) in NEIGHBOURS {
            let Some(n) = step(spec, walls, x, y, dx, dy) else {
                continue;
            };
            let len = if dx != 0 && dy != 0 { diagonal } else { spec.cell_size };
            let next = cost + len;
            if next < dist[n] {
                dist[n] = next;
                heap.push(Frontier { cost: next, cell: n });
            }
        }
    }
    dist
}

/// Potential drop per metre toward each open neighbour of (`x`, `y`), in
/// [`NEIGHBOURS`] order; zero for uphill steps. All zero on unreachable
/// cells and at local minima.
pub fn descent_weights(spec: &GridSpec, walls: &[bool], phi: &[f32], x: usize, y: usize) -> [f32; 8] {
    let mut w = [0.0; 8];
    let here = phi[spec.index(x, y)];
    if !here.is_finite() {
        return w;
    }
    for (k, &(dx, dy)) in NEIGHBOURS.iter().enumerate() {
        if let Some(n) = step(spec, walls, x, y, dx, dy) {
            let drop = here - phi[n];
            if drop > 0.0 {
                w[k] = drop / (step_length(k) * spec.cell_size);
            }
        }
    }
    w
}

/// One distance field per exit on a shared grid.
#[derive(Clone, Debug)]
pub struct ExitPotentials {
    pub spec: GridSpec,
    fields: Vec<Vec<f32>>,
    sinks: Vec<Vec<usize>>,
}

impl ExitPotentials {
    pub fn build(spec: GridSpec, walls: &[bool], exits: &[Point], exit_radius: f32) -> Self {
        let sinks: Vec<Vec<usize>> = exits
            .iter()
            .map(|&e| exit_cells(&spec, walls, e, exit_radius))
            .collect();
        let fields = sinks
            .iter()
            .map(|cells| distance_field(&spec, walls, cells))
            .collect();
        Self { spec, fields, sinks }
    }

    pub fn exit_count(&self) -> usize {
        self.fields.len()
    }

    pub fn field(&self, exit: usize) -> &[f32] {
        &self.fields[exit]
    }

    pub fn sink_cells(&self, exit: usize) -> &[usize] {
        &self.sinks[exit]
    }

    /// Path distance from the cell containing `p` to `exit`. A point whose
    /// own cell was rasterized as wall borrows the best neighbouring value.
    pub fn distance_at(&self, exit: usize, p: Point) -> f32 {
        let spec = &self.spec;
        let field = &self.fields[exit];
        let (x, y) = spec.cell_of(p);
        let here = field[spec.index(x, y)];
        if here.is_finite() {
            return here;
        }
        let diagonal = spec.cell_size * std::f32::consts::SQRT_2;
        NEIGHBOURS
            .iter()
            .filter_map(|&(dx, dy)| {
                let n = spec.offset(x, y, dx, dy)?;
                let len = if dx != 0 && dy != 0 { diagonal } else { spec.cell_size };
                Some(field[n] + len)
            })
            .fold(f32::INFINITY, f32::min)
    }

    /// `min_e (φ_e − offset_e)`: the potential toward the most attractive exit
    /// once routing offsets (metres) are applied.
    pub fn combined(&self, offsets: &[f32]) -> Vec<f32> {
        let mut out = vec![f32::INFINITY; self.spec.len()];
        for (e, field) in self.fields.iter().enumerate() {
            let offset = offsets.get(e).copied().unwrap_or(0.0);
            for (o, &d) in out.iter_mut().zip(field) {
                if d.is_finite() {
                    *o = o.min(d - offset);
                }
            }
        }
        out
    }

    /// Unit direction toward the neighbour of `p`'s cell with the lowest
    /// value of `exit`'s potential. `None` when no neighbour improves on it.
    pub fn descent(&self, exit: usize, walls: &[bool], p: Point) -> Option<[f32; 2]> {
        let spec = &self.spec;
        let field = &self.fields[exit];
        let (x, y) = spec.cell_of(p);
        let mut best = field[spec.index(x, y)];
        let mut target = None;
        for (dx, dy) in NEIGHBOURS {
            if let Some(n) = step(spec, walls, x, y, dx, dy) {
                if field[n] < best {
                    best = field[n];
                    target = Some(n);
                }
            }
        }
        let (tx, ty) = spec.coords(target?);
        let c = spec.center(tx, ty);
        let (vx, vy) = (c[0] - p[0], c[1] - p[1]);
        let len = (vx * vx + vy * vy).sqrt();
        (len > 1e-6).then(|| [vx / len, vy / len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_room_distances_increase_away_from_exit() {
        let spec = GridSpec::for_domain([10.0, 10.0], 10).unwrap();
        let walls = vec![false; spec.len()];
        let pots = ExitPotentials::build(spec, &walls, &[[0.5, 0.5]], 0.0);
        let f = pots.field(0);
        assert_eq!(f[spec.index(0, 0)], 0.0);
        assert!((f[spec.index(3, 0)] - 3.0).abs() < 1e-5);
        assert!((f[spec.index(3, 3)] - 3.0 * std::f32::consts::SQRT_2).abs() < 1e-4);
    }

    #[test]
    fn wall_forces_a_detour_and_sealed_cells_are_unreachable() {
        let spec = GridSpec::for_domain([10.0, 10.0], 10).unwrap();
        let mut walls = vec![false; spec.len()];
        // Vertical wall at x = 5 with a gap at the top row.
        for y in 0..9 {
            walls[spec.index(5, y)] = true;
        }
        let field = distance_field(&spec, &walls, &[spec.index(0, 0)]);
        let straight = 9.0;
        assert!(field[spec.index(9, 0)] > straight);

        for y in 0..10 {
            walls[spec.index(5, y)] = true;
        }
        let sealed = distance_field(&spec, &walls, &[spec.index(0, 0)]);
        assert!(sealed[spec.index(9, 0)].is_infinite());
    }

    #[test]
    fn no_corner_cutting_between_diagonal_walls() {
        let spec = GridSpec::for_domain([3.0, 3.0], 3).unwrap();
        let mut walls = vec![false; spec.len()];
        walls[spec.index(1, 0)] = true;
        walls[spec.index(0, 1)] = true;
        assert_eq!(step(&spec, &walls, 0, 0, 1, 1), None);
    }

    #[test]
    fn offsets_shift_the_combined_potential() {
        let spec = GridSpec::for_domain([10.0, 2.0], 10).unwrap();
        let walls = vec![false; spec.len()];
        let pots = ExitPotentials::build(spec, &walls, &[[0.5, 0.5], [9.5, 0.5]], 0.0);
        let mid = spec.index(3, 0);
        let plain = pots.combined(&[0.0, 0.0]);
        assert!((plain[mid] - 3.0).abs() < 1e-5);
        let boosted = pots.combined(&[0.0, 5.0]);
        assert!((boosted[mid] - 1.0).abs() < 1e-5);
    }

    #[test]
    fn descent_weights_favour_the_straight_step() {
        let spec = GridSpec::for_domain([10.0, 10.0], 10).unwrap();
        let walls = vec![false; spec.len()];
        let pots = ExitPotentials::build(spec, &walls, &[[9.5, 5.5]], 0.0);
        let w = descent_weights(&spec, &walls, pots.field(0), 2, 5);
        assert!((w[0] - 1.0).abs() < 1e-5);
        assert!(w[1] > 0.0 && w[1] < w[0]);
        assert_eq!(w[4], 0.0);
        assert_eq!(opposite(1), 5);
        let sum: f32 = DIRECTIONS.iter().map(|d| d[0]).sum();
        assert!(sum.abs() < 1e-6);
    }

    #[test]
    fn descent_points_toward_exit() {
        let spec = GridSpec::for_domain([10.0, 10.0], 10).unwrap();
        let walls = vec![false; spec.len()];
        let pots = ExitPotentials::build(spec, &walls, &[[9.5, 5.5]], 0.0);
        let d = pots.descent(0, &walls, [2.5, 5.5]).unwrap();
        assert!(d[0] > 0.99);
    }
}
