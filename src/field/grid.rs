//! Flat scalar grids over the scenario domain.
//!
//! Row-major `width × height` cells of uniform size. Deposition splats mass
//! bilinearly onto the four nearest cell centres, so the deposited total is
//! exact.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};

use crate::core::error::ConfigError;
use crate::hazard::Point;

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct GridSpec {
    pub width: usize,
    pub height: usize,
    pub cell_size: f32,
}

impl GridSpec {
    /// Square cells, `resolution` along the longer side of the domain.
    pub fn for_domain(domain: [f32; 2], resolution: usize) -> Result<Self, ConfigError> {
        if resolution < 2 {
            return Err(ConfigError::invalid("grid resolution", "must be at least 2 cells"));
        }
        let longest = domain[0].max(domain[1]);
        let cell_size = longest / resolution as f32;
        Ok(Self {
            width: ((domain[0] / cell_size).round() as usize).max(1),
            height: ((domain[1] / cell_size).round() as usize).max(1),
            cell_size,
        })
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.width * self.height
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[inline]
    pub fn index(&self, x: usize, y: usize) -> usize {
        y * self.width + x
    }

    #[inline]
    pub fn coords(&self, idx: usize) -> (usize, usize) {
        (idx % self.width, idx / self.width)
    }

    pub fn cell_area(&self) -> f32 {
        self.cell_size * self.cell_size
    }

    /// Cell containing `p`, clamped onto the grid.
    pub fn cell_of(&self, p: Point) -> (usize, usize) {
        let cx = (p[0] / self.cell_size).floor().max(0.0) as usize;
        let cy = (p[1] / self.cell_size).floor().max(0.0) as usize;
        (cx.min(self.width - 1), cy.min(self.height - 1))
    }

    pub fn center(&self, x: usize, y: usize) -> Point {
        [
            (x as f32 + 0.5) * self.cell_size,
            (y as f32 + 0.5) * self.cell_size,
        ]
    }

    /// Neighbour at offset (`dx`, `dy`) if it is on the grid.
    #[inline]
    pub fn offset(&self, x: usize, y: usize, dx: i32, dy: i32) -> Option<usize> {
        let nx = x as i64 + dx as i64;
        let ny = y as i64 + dy as i64;
        if nx < 0 || ny < 0 || nx >= self.width as i64 || ny >= self.height as i64 {
            None
        } else {
            Some(self.index(nx as usize, ny as usize))
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FieldGrid {
    pub spec: GridSpec,
    pub data: Vec<f32>,
}

impl FieldGrid {
    pub fn zeros(spec: GridSpec) -> Self {
        Self {
            spec,
            data: vec![0.0; spec.len()],
        }
    }

    #[inline]
    pub fn get(&self, x: usize, y: usize) -> f32 {
        self.data[self.spec.index(x, y)]
    }

    #[inline]
    pub fn set(&mut self, x: usize, y: usize, value: f32) {
        let idx = self.spec.index(x, y);
        self.data[idx] = value;
    }

    /// Cell-centred bilinear weights around `p`: base cell, neighbour step and
    /// fractional offsets, with edges clamped.
    fn bilinear(&self, p: Point) -> (usize, usize, usize, usize, f32, f32) {
        let s = &self.spec;
        let gx = (p[0] / s.cell_size - 0.5).clamp(0.0, (s.width - 1) as f32);
        let gy = (p[1] / s.cell_size - 0.5).clamp(0.0, (s.height - 1) as f32);
        let cx = gx.floor() as usize;
        let cy = gy.floor() as usize;
        let nx = (cx + 1).min(s.width - 1);
        let ny = (cy + 1).min(s.height - 1);
        (cx, cy, nx, ny, gx - cx as f32, gy - cy as f32)
    }

    /// Adds `mass` at `p` as density (mass per cell area).
    pub fn deposit(&mut self, p: Point, mass: f32) {
        let (cx, cy, nx, ny, fx, fy) = self.bilinear(p);
        let rho = mass / self.spec.cell_area();
        let w = self.spec.width;
        self.data[cy * w + cx] += rho * (1.0 - fx) * (1.0 - fy);
        self.data[cy * w + nx] += rho * fx * (1.0 - fy);
        self.data[ny * w + cx] += rho * (1.0 - fx) * fy;
        self.data[ny * w + nx] += rho * fx * fy;
    }

    /// Bilinear interpolation of the field at `p`.
    pub fn sample(&self, p: Point) -> f32 {
        let (cx, cy, nx, ny, fx, fy) = self.bilinear(p);
        let w = self.spec.width;
        self.data[cy * w + cx] * (1.0 - fx) * (1.0 - fy)
            + self.data[cy * w + nx] * fx * (1.0 - fy)
            + self.data[ny * w + cx] * (1.0 - fx) * fy
            + self.data[ny * w + nx] * fx * fy
    }

    /// Central-difference gradient at cell (x, y), one-sided at the edges.
    pub fn gradient(&self, x: usize, y: usize) -> [f32; 2] {
        let s = &self.spec;
        let here = self.get(x, y);
        let gx = match (x > 0, x + 1 < s.width) {
            (true, true) => (self.get(x + 1, y) - self.get(x - 1, y)) / (2.0 * s.cell_size),
            (false, true) => (self.get(x + 1, y) - here) / s.cell_size,
            (true, false) => (here - self.get(x - 1, y)) / s.cell_size,
            (false, false) => 0.0,
        };
        let gy = match (y > 0, y + 1 < s.height) {
            (true, true) => (self.get(x, y + 1) - self.get(x, y - 1)) / (2.0 * s.cell_size),
            (false, true) => (self.get(x, y + 1) - here) / s.cell_size,
            (true, false) => (here - self.get(x, y - 1)) / s.cell_size,
            (false, false) => 0.0,
        };
        [gx, gy]
    }

    /// Σ value · cell area, accumulated in f64.
    pub fn total_mass(&self) -> f64 {
        let area = self.spec.cell_area() as f64;
        self.data.iter().map(|&v| v as f64).sum::<f64>() * area
    }

    /// Replaces NaN and negative cells with zero; returns how many were fixed.
    pub fn clamp_non_negative(&mut self) -> u64 {
        let mut fixed = 0;
        for v in self.data.iter_mut() {
            if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
                fixed += 1;
            }
        }
        fixed
    }

    pub fn max(&self) -> f32 {
        self.data.iter().copied().fold(0.0, f32::max)
    }
}

/// Explicit flux-form diffusion over open 4-neighbours. Exchanges between a
/// pair of cells are antisymmetric, so mass is conserved exactly (up to
/// rounding) and walls see zero flux. `rate` is `D·dt/dx²` and must already be
/// clamped to at most 0.25 for positivity.
pub fn diffuse(spec: &GridSpec, values: &[f32], walls: &[bool], rate: f32, out: &mut [f32]) {
    if rate <= 0.0 {
        out.copy_from_slice(values);
        return;
    }
    // Each cell gathers the flux of its four faces, so rows are independent.
    out.par_chunks_mut(spec.width).enumerate().for_each(|(y, row)| {
        for (x, cell) in row.iter_mut().enumerate() {
            let a = spec.index(x, y);
            *cell = values[a];
            if walls[a] {
                continue;
            }
            for (dx, dy) in [(1, 0), (0, 1), (-1, 0), (0, -1)] {
                if let Some(b) = spec.offset(x, y, dx, dy).filter(|&b| !walls[b]) {
                    *cell += rate * (values[b] - values[a]);
                }
            }
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> GridSpec {
        GridSpec::for_domain([20.0, 20.0], 10).unwrap()
    }

    #[test]
    fn spec_covers_rectangular_domain_with_square_cells() {
        let s = GridSpec::for_domain([30.0, 15.0], 60).unwrap();
        assert_eq!((s.width, s.height), (60, 30));
        assert!((s.cell_size - 0.5).abs() < 1e-6);
        assert_eq!(s.cell_of([29.99, 14.99]), (59, 29));
        assert_eq!(s.cell_of([30.0, 15.0]), (59, 29));
        assert!(GridSpec::for_domain([20.0, 20.0], 0).is_err());
    }

    #[test]
    fn deposit_preserves_mass_everywhere() {
        let mut g = FieldGrid::zeros(spec());
        for p in [[0.0, 0.0], [3.3, 7.1], [19.99, 19.99], [10.0, 0.5]] {
            g.deposit(p, 1.0);
        }
        assert!((g.total_mass() - 4.0).abs() < 1e-4);
        assert!(g.data.iter().all(|&v| v >= 0.0));
    }

    #[test]
    fn sample_recovers_cell_centre_values() {
        let mut g = FieldGrid::zeros(spec());
        g.set(4, 6, 2.5);
        let c = g.spec.center(4, 6);
        assert!((g.sample(c) - 2.5).abs() < 1e-6);
    }

    #[test]
    fn gradient_of_linear_ramp() {
        let s = spec();
        let mut g = FieldGrid::zeros(s);
        for y in 0..s.height {
            for x in 0..s.width {
                g.set(x, y, 3.0 * x as f32 * s.cell_size);
            }
        }
        let [gx, gy] = g.gradient(5, 5);
        assert!((gx - 3.0).abs() < 1e-4);
        assert!(gy.abs() < 1e-6);
        let [edge, _] = g.gradient(0, 0);
        assert!((edge - 3.0).abs() < 1e-4);
    }

    #[test]
    fn diffusion_conserves_mass_and_respects_walls() {
        let s = spec();
        let mut walls = vec![false; s.len()];
        for y in 0..s.height {
            walls[s.index(5, y)] = true;
        }
        let mut values = vec![0.0; s.len()];
        values[s.index(2, 2)] = 10.0;
        let mut out = vec![0.0; s.len()];
        for _ in 0..50 {
            diffuse(&s, &values, &walls, 0.24, &mut out);
            std::mem::swap(&mut values, &mut out);
        }
        let total: f32 = values.iter().sum();
        assert!((total - 10.0).abs() < 1e-3);
        assert!(values.iter().all(|&v| v >= 0.0));
        for y in 0..s.height {
            for x in 5..s.width {
                assert_eq!(values[s.index(x, y)], 0.0);
            }
        }
    }

    #[test]
    fn row_parallel_diffusion_matches_pairwise_exchange() {
        let s = GridSpec::for_domain([20.0, 20.0], 64).unwrap();
        let walls: Vec<bool> = (0..s.len()).map(|c| c % 7 == 3).collect();
        let values: Vec<f32> = (0..s.len())
            .map(|c| if walls[c] { 0.0 } else { (c % 13) as f32 * 0.5 })
            .collect();
        let mut out = vec![0.0; s.len()];
        diffuse(&s, &values, &walls, 0.2, &mut out);

        let mut expected = values.clone();
        for y in 0..s.height {
            for x in 0..s.width {
                let a = s.index(x, y);
                for (dx, dy) in [(1, 0), (0, 1)] {
                    if let Some(b) = s.offset(x, y, dx, dy) {
                        if !walls[a] && !walls[b] {
                            let flux = 0.2 * (values[a] - values[b]);
                            expected[a] -= flux;
                            expected[b] += flux;
                        }
                    }
                }
            }
        }
        for (got, want) in out.iter().zip(&expected) {
            assert!((got - want).abs() < 1e-4);
        }
    }
}
