//! Coupled fire field
//!
//! Fed every step from the fire hazards, so a source appears once its onset
//! has passed, and grown on the grid by a 3×3 spread stencil. Values stay in
//! [0, 1] and are zero inside walls.

use crate::field::model::channel_frame;
use crate::field::{FieldGrid, GridLayout};
use crate::hazard::{HazardField, HazardKind};

/// Neighbour weights of the spread stencil, row-major around the cell.
const SPREAD_KERNEL: [[f32; 3]; 3] = [[0.05, 0.2, 0.05], [0.2, 0.0, 0.2], [0.05, 0.2, 0.05]];

/// Stencil gain per unit of hazard spread rate.
const GAIN_PER_SPREAD: f32 = 2.0;

#[derive(Clone, Debug)]
pub struct FireField {
    grid: FieldGrid,
    gain: f32,
}

impl FireField {
    pub fn ignite(layout: &GridLayout, fires: &HazardField, spread_rate: f32) -> Self {
        let mut field = Self {
            grid: FieldGrid {
                spec: layout.spec,
                data: vec![0.0; layout.spec.len()],
            },
            gain: GAIN_PER_SPREAD * spread_rate,
        };
        field.feed(layout, fires, 0.0);
        field
    }

    /// Raise every cell to at least the hazard model's fire intensity at `t`.
    pub fn feed(&mut self, layout: &GridLayout, fires: &HazardField, t: f32) {
        if fires.is_empty() {
            return;
        }
        let sources = channel_frame(layout, fires, HazardKind::Fire, t);
        for (v, s) in self.grid.data.iter_mut().zip(sources) {
            *v = v.max(s);
        }
    }

    pub fn data(&self) -> &[f32] {
        &self.grid.data
    }

    #[inline]
    pub fn at(&self, cell: usize) -> f32 {
        self.grid.data[cell]
    }

    pub fn gradient(&self, x: usize, y: usize) -> [f32; 2] {
        self.grid.gradient(x, y)
    }

    pub fn is_burning(&self) -> bool {
        self.grid.data.iter().any(|&v| v > 0.0)
    }

    /// One growth step: `F += gain · (K ∗ F)`, clamped to [0, 1], walls
    /// zeroed.
    pub fn advance(&mut self, walls: &[bool]) {
        if self.gain <= 0.0 || !self.is_burning() {
            return;
        }
        let spec = self.grid.spec;
        let old = &self.grid.data;
        let mut next = old.clone();
        for y in 0..spec.height {
            for x in 0..spec.width {
                let cell = spec.index(x, y);
                if walls[cell] {
                    next[cell] = 0.0;
                    continue;
                }
                let mut spread = 0.0;
                for (row, weights) in SPREAD_KERNEL.iter().enumerate() {
                    for (col, &w) in weights.iter().enumerate() {
                        if w == 0.0 {
                            continue;
                        }
                        let dx = col as i32 - 1;
                        let dy = row as i32 - 1;
                        if let Some(n) = spec.offset(x, y, dx, dy) {
                            spread += w * old[n];
                        }
                    }
                }
                next[cell] = (old[cell] + self.gain * spread).clamp(0.0, 1.0);
            }
        }
        self.grid.data = next;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Scenario;
    use crate::hazard::Hazard;

    fn setup(spread: f32) -> (GridLayout, FireField) {
        let fire = Hazard::Fire {
            position: [10.0, 10.0],
            radius: 2.0,
            intensity: 0.6,
            spread_rate: Some(spread),
            onset: 0.0,
        };
        let scenario = Scenario::open_room(vec![[1.0, 1.0]], 1, 1)
            .with_wall([14.0, 0.0], [14.0, 20.0])
            .with_hazard(fire);
        let layout = GridLayout::build(&scenario, 40, 1.0).unwrap();
        let fires = HazardField::new(&scenario.hazards, &scenario.geometry(), 0.1, 0.0, 0);
        let field = FireField::ignite(&layout, &fires, spread);
        (layout, field)
    }

    #[test]
    fn fire_spreads_but_stays_bounded_and_out_of_walls() {
        let (layout, mut fire) = setup(0.05);
        let lit = fire.data().iter().filter(|&&v| v > 0.0).count();
        for _ in 0..200 {
            fire.advance(&layout.walls);
        }
        let lit_after = fire.data().iter().filter(|&&v| v > 0.0).count();
        assert!(lit_after > lit);
        for (cell, &v) in fire.data().iter().enumerate() {
            assert!((0.0..=1.0).contains(&v));
            if layout.walls[cell] {
                assert_eq!(v, 0.0);
            }
        }
        let spec = layout.spec;
        let far_side = spec.index(spec.width - 1, spec.height / 2);
        assert_eq!(fire.at(far_side), 0.0, "fire jumped the wall");
    }

    #[test]
    fn delayed_source_lights_only_after_onset() {
        let fire = Hazard::Fire {
            position: [10.0, 10.0],
            radius: 2.0,
            intensity: 0.6,
            spread_rate: Some(0.05),
            onset: 1.0,
        };
        let scenario = Scenario::open_room(vec![[1.0, 1.0]], 1, 1).with_hazard(fire);
        let layout = GridLayout::build(&scenario, 40, 1.0).unwrap();
        let fires = HazardField::new(&scenario.hazards, &scenario.geometry(), 0.1, 0.0, 0);
        let mut field = FireField::ignite(&layout, &fires, 0.05);
        assert!(!field.is_burning());
        field.feed(&layout, &fires, 0.5);
        field.advance(&layout.walls);
        assert!(!field.is_burning());
        field.feed(&layout, &fires, 1.0);
        let centre = layout.spec.index(layout.spec.width / 2, layout.spec.height / 2);
        assert!(field.at(centre) > 0.3);
    }

    #[test]
    fn zero_spread_leaves_the_fire_in_place() {
        let (layout, mut fire) = setup(0.0);
        let before = fire.data().to_vec();
        fire.advance(&layout.walls);
        assert_eq!(fire.data(), &before[..]);
        assert!(fire.is_burning());
    }
}
