//! Grid Fields
//!
//! Shared numerics of the grid engines: flat scalar grids, conservative
//! diffusion, exit potentials, the grid layout of a scenario, time series of
//! frames and the run loop common to the field models.

pub mod grid;
pub mod layout;
pub mod model;
pub mod potential;

use serde::ser::{Serialize, Serializer};

pub use grid::{diffuse, FieldGrid, GridSpec};
pub use layout::{GridLayout, RoutedPotential};
pub use model::{run_model, FieldModel, FieldResult, FieldStepReport, MassLedger};
pub use potential::{descent_weights, ExitPotentials, DIRECTIONS, NEIGHBOURS};

/// Time series of grid frames, serialized as nested `[t][y][x]` arrays.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSeries {
    spec: GridSpec,
    frames: Vec<Vec<f32>>,
}

impl FieldSeries {
    pub fn new(spec: GridSpec, capacity: usize) -> Self {
        Self {
            spec,
            frames: Vec::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, frame: &[f32]) {
        debug_assert_eq!(frame.len(), self.spec.len());
        self.frames.push(frame.to_vec());
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, t: usize) -> &[f32] {
        &self.frames[t]
    }

    pub fn frames(&self) -> impl Iterator<Item = &[f32]> {
        self.frames.iter().map(Vec::as_slice)
    }

    pub fn at(&self, t: usize, x: usize, y: usize) -> f32 {
        self.frames[t][self.spec.index(x, y)]
    }

    pub fn spec(&self) -> GridSpec {
        self.spec
    }
}

struct Rows<'a> {
    frame: &'a [f32],
    width: usize,
}

impl Serialize for Rows<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_seq(self.frame.chunks(self.width))
    }
}

impl Serialize for FieldSeries {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let width = self.spec.width;
        serializer.collect_seq(self.frames.iter().map(|frame| Rows { frame, width }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn series_serializes_time_row_column() {
        let spec = GridSpec::for_domain([3.0, 2.0], 3).unwrap();
        let mut series = FieldSeries::new(spec, 2);
        series.push(&[0.0, 1.0, 2.0, 3.0, 4.0, 5.0]);
        series.push(&[6.0; 6]);
        let v = serde_json::to_value(&series).unwrap();
        assert_eq!(v[0][1][2], 5.0);
        assert_eq!(v[0].as_array().unwrap().len(), 2);
        assert_eq!(v[1][0][0], 6.0);
        assert_eq!(series.at(0, 1, 1), 4.0);
    }
}
