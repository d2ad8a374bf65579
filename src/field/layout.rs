//! Grid layout shared by the field engines.
//!
//! Rasterized walls, per-exit potentials and sink ownership for one scenario
//! at one resolution, plus deposition of the initial population.

use std::collections::VecDeque;

use super::grid::{FieldGrid, GridSpec};
use super::potential::ExitPotentials;
use crate::core::{ConfigError, Placement, RoutingBias, Scenario};
use crate::hazard::geometry::distance;
use crate::hazard::Point;

#[derive(Clone, Debug)]
pub struct GridLayout {
    pub spec: GridSpec,
    pub walls: Vec<bool>,
    pub potentials: ExitPotentials,
    /// Exit draining each cell, if any. A cell inside several sink discs
    /// belongs to the nearest exit.
    pub sink_owner: Vec<Option<usize>>,
    pub exits: Vec<Point>,
}

impl GridLayout {
    pub fn build(scenario: &Scenario, resolution: usize, exit_radius: f32) -> Result<Self, ConfigError> {
        let spec = GridSpec::for_domain(scenario.domain, resolution)?;
        let walls = scenario.geometry().rasterize(&spec, &scenario.exits, 0.5 * exit_radius);
        let potentials = ExitPotentials::build(spec, &walls, &scenario.exits, exit_radius);

        let mut sink_owner: Vec<Option<usize>> = vec![None; spec.len()];
        for (e, &exit) in scenario.exits.iter().enumerate() {
            for &cell in potentials.sink_cells(e) {
                let (x, y) = spec.coords(cell);
                let c = spec.center(x, y);
                let closer = match sink_owner[cell] {
                    Some(o) => distance(c, exit) < distance(c, scenario.exits[o]),
                    None => true,
                };
                if closer {
                    sink_owner[cell] = Some(e);
                }
            }
        }

        Ok(Self {
            spec,
            walls,
            potentials,
            sink_owner,
            exits: scenario.exits.clone(),
        })
    }

    pub fn exit_count(&self) -> usize {
        self.exits.len()
    }

    pub fn open_cells(&self) -> usize {
        self.walls.iter().filter(|&&w| !w).count()
    }

    /// One person per placement, splatted bilinearly. Mass that lands in a
    /// wall cell moves to the nearest open cell.
    pub fn initial_density(&self, placements: &[Placement]) -> FieldGrid {
        let mut grid = FieldGrid::zeros(self.spec);
        for p in placements {
            grid.deposit(p.position, 1.0);
        }
        for cell in 0..self.spec.len() {
            if !self.walls[cell] || grid.data[cell] == 0.0 {
                continue;
            }
            let mass = std::mem::take(&mut grid.data[cell]);
            if let Some(open) = self.nearest_open(cell) {
                grid.data[open] += mass;
            }
        }
        grid
    }

    /// Breadth-first search over 4-neighbours, walls included.
    fn nearest_open(&self, from: usize) -> Option<usize> {
        let spec = &self.spec;
        let mut seen = vec![false; spec.len()];
        let mut queue = VecDeque::from([from]);
        seen[from] = true;
        while let Some(cell) = queue.pop_front() {
            if !self.walls[cell] {
                return Some(cell);
            }
            let (x, y) = spec.coords(cell);
            for (dx, dy) in [(1, 0), (0, 1), (-1, 0), (0, -1)] {
                if let Some(n) = spec.offset(x, y, dx, dy) {
                    if !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                }
            }
        }
        None
    }

    /// Exit each cell would head for under `offsets`, if any is reachable.
    pub fn preferred_exit(&self, cell: usize, offsets: &[f32]) -> Option<usize> {
        (0..self.exit_count())
            .map(|e| {
                let d = self.potentials.field(e)[cell];
                (e, d - offsets.get(e).copied().unwrap_or(0.0))
            })
            .filter(|(_, c)| c.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, _)| e)
    }

    /// Share of the remaining mass currently routed to each exit.
    pub fn assignment_shares(&self, density: &[f32], offsets: &[f32]) -> Vec<f32> {
        let mut shares = vec![0.0f32; self.exit_count()];
        let mut total = 0.0;
        for (cell, &rho) in density.iter().enumerate() {
            if rho <= 0.0 {
                continue;
            }
            if let Some(e) = self.preferred_exit(cell, offsets) {
                shares[e] += rho;
                total += rho;
            }
        }
        if total > 0.0 {
            shares.iter_mut().for_each(|s| *s /= total);
        }
        shares
    }
}

/// Combined exit potential for the routing offsets in force. Rebuilt only
/// when the offsets change.
#[derive(Clone, Debug)]
pub struct RoutedPotential {
    offsets: Vec<f32>,
    pub phi: Vec<f32>,
}

impl RoutedPotential {
    pub fn new(layout: &GridLayout) -> Self {
        let offsets = vec![0.0; layout.exit_count()];
        Self {
            phi: layout.potentials.combined(&offsets),
            offsets,
        }
    }

    pub fn offsets(&self) -> &[f32] {
        &self.offsets
    }

    /// Returns `true` when the potential was rebuilt.
    pub fn update(&mut self, layout: &GridLayout, bias: &RoutingBias) -> bool {
        let wanted: Vec<f32> = (0..layout.exit_count()).map(|e| bias.weight(e)).collect();
        if wanted == self.offsets {
            return false;
        }
        self.phi = layout.potentials.combined(&wanted);
        self.offsets = wanted;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn two_exit_corridor() -> Scenario {
        Scenario::open_room(vec![[1.0, 10.0], [19.0, 10.0]], 10, 10)
    }

    #[test]
    fn wall_mass_moves_to_an_open_cell() {
        let scenario = two_exit_corridor().with_wall([10.0, 0.0], [10.0, 20.0]);
        let layout = GridLayout::build(&scenario, 20, 1.0).unwrap();
        let placements = vec![Placement { position: [10.0, 10.0], preferred_exit: None }];
        let grid = layout.initial_density(&placements);
        assert!((grid.total_mass() - 1.0).abs() < 1e-5);
        for (cell, &v) in grid.data.iter().enumerate() {
            if layout.walls[cell] {
                assert_eq!(v, 0.0);
            }
        }
    }

    #[test]
    fn sink_cells_belong_to_their_nearest_exit() {
        let scenario = Scenario::open_room(vec![[9.0, 10.0], [11.0, 10.0]], 1, 1);
        let layout = GridLayout::build(&scenario, 20, 1.5).unwrap();
        let left = layout.spec.index(8, 9);
        let right = layout.spec.index(11, 9);
        assert_eq!(layout.sink_owner[left], Some(0));
        assert_eq!(layout.sink_owner[right], Some(1));
        assert_eq!(layout.sink_owner[layout.spec.index(0, 0)], None);
    }

    #[test]
    fn offsets_reassign_mass_between_exits() {
        let layout = GridLayout::build(&two_exit_corridor(), 20, 1.0).unwrap();
        let mut density = vec![0.0; layout.spec.len()];
        density[layout.spec.index(7, 10)] = 2.0;
        assert_eq!(layout.assignment_shares(&density, &[0.0, 0.0]), vec![1.0, 0.0]);
        assert_eq!(layout.assignment_shares(&density, &[0.0, 10.0]), vec![0.0, 1.0]);

        let mut routed = RoutedPotential::new(&layout);
        assert!(!routed.update(&layout, &RoutingBias::neutral(2)));
        assert!(routed.update(&layout, &RoutingBias::boost(2, 1, 10.0)));
        assert_eq!(routed.offsets(), &[0.0, 10.0]);
    }
}
