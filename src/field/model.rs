//! Field model seam
//!
//! The mesoscopic and macroscopic engines both advance a density grid one
//! step at a time. [`FieldModel`] is what the shared run loop, the recorder
//! and the training environment need from either of them.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};

use super::layout::GridLayout;
use super::FieldSeries;
use crate::core::progress::finished_outcome;
use crate::core::{
    Diagnostics, EngineKind, ProgressObserver, RoutingBias, RunBudget, RunControl, RunOutcome,
    StepProgress,
};
use crate::hazard::{HazardField, HazardKind};

/// Remaining mass below this many persons counts as an empty building.
pub const CLEAR_MASS: f32 = 0.5;

/// Where the mass of a run has gone so far.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct MassLedger {
    pub population: f32,
    pub evacuated: f32,
    pub per_exit: Vec<f32>,
    pub hazard_removed: f32,
    pub step: usize,
    pub diagnostics: Diagnostics,
}

impl MassLedger {
    pub fn new(population: f32, exits: usize) -> Self {
        Self {
            population,
            per_exit: vec![0.0; exits],
            ..Self::default()
        }
    }

    pub fn remaining(&self) -> f32 {
        (self.population - self.evacuated - self.hazard_removed).max(0.0)
    }

    pub fn is_clear(&self) -> bool {
        self.remaining() < CLEAR_MASS
    }

    /// Books `mass` leaving through `exit`, never more than is left.
    pub fn record_exit(&mut self, exit: usize, mass: f32) -> f32 {
        let mass = mass.min(self.remaining()).max(0.0);
        self.evacuated += mass;
        self.per_exit[exit] += mass;
        mass
    }

    pub fn record_casualties(&mut self, mass: f32) -> f32 {
        let mass = mass.min(self.remaining()).max(0.0);
        self.hazard_removed += mass;
        mass
    }
}

/// Mass removed during one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FieldStepReport {
    pub evacuated: f32,
    pub per_exit: Vec<f32>,
    pub hazard_removed: f32,
}

pub trait FieldModel: Sync {
    type State: Send;

    fn engine(&self) -> EngineKind;
    fn layout(&self) -> &GridLayout;
    fn dt(&self) -> f32;
    fn time_steps(&self) -> usize;
    fn stop_when_clear(&self) -> bool;

    fn init_state(&self) -> Self::State;
    fn step(&self, state: &mut Self::State, bias: &RoutingBias) -> FieldStepReport;

    fn ledger<'a>(&self, state: &'a Self::State) -> &'a MassLedger;
    fn density<'a>(&self, state: &'a Self::State) -> &'a [f32];
    fn velocity(&self, state: &Self::State) -> (Vec<f32>, Vec<f32>);
    /// Per-exit potential offsets currently applied by routing guidance.
    fn route_offsets<'a>(&self, state: &'a Self::State) -> &'a [f32];

    /// Share of the remaining mass whose preferred exit is each exit.
    fn assignment_shares(&self, state: &Self::State) -> Vec<f32> {
        self.layout()
            .assignment_shares(self.density(state), self.route_offsets(state))
    }

    /// Hazard channels worth exporting for this run.
    fn hazard_kinds(&self) -> Vec<HazardKind>;
    fn hazard_frame(&self, state: &Self::State, kind: HazardKind) -> Vec<f32>;
}

/// Intensity of `kind` at every cell centre at time `t`; zero in walls.
pub fn channel_frame(layout: &GridLayout, hazards: &HazardField, kind: HazardKind, t: f32) -> Vec<f32> {
    let spec = layout.spec;
    (0..spec.len())
        .into_par_iter()
        .map(|cell| {
            if layout.walls[cell] {
                return 0.0;
            }
            let (x, y) = spec.coords(cell);
            hazards.channel(kind, spec.center(x, y), t)
        })
        .collect()
}

#[derive(Clone, Debug, Serialize)]
pub struct FieldResult {
    pub engine: EngineKind,
    pub density: FieldSeries,
    pub velocity_x: FieldSeries,
    pub velocity_y: FieldSeries,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fire: Option<FieldSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub flood: Option<FieldSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub earthquake: Option<FieldSeries>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structural: Option<FieldSeries>,
    /// Cumulative persons evacuated after each step.
    pub evacuated_count: Vec<f32>,
    /// Cumulative persons removed by hazards after each step.
    pub hazard_removed: Vec<f32>,
    /// Persons still in the building after each step.
    pub total_occupancy: Vec<f32>,
    pub exit_usage: Vec<f32>,
    pub initial_population: f32,
    /// Cells along the longer side of the domain.
    pub grid_size: usize,
    pub cell_size: f32,
    pub dt: f32,
    pub time_steps: usize,
    pub outcome: RunOutcome,
    pub diagnostics: Diagnostics,
}

impl FieldResult {
    pub fn evacuated(&self) -> f32 {
        self.evacuated_count.last().copied().unwrap_or(0.0)
    }

    /// `occupancy − (initial − evacuated − removed)` after step `t`.
    pub fn mass_balance_error(&self, t: usize) -> f32 {
        self.total_occupancy[t]
            - (self.initial_population - self.evacuated_count[t] - self.hazard_removed[t])
    }
}

struct Recorder {
    density: FieldSeries,
    velocity_x: FieldSeries,
    velocity_y: FieldSeries,
    hazards: Vec<(HazardKind, FieldSeries)>,
    evacuated_count: Vec<f32>,
    hazard_removed: Vec<f32>,
    total_occupancy: Vec<f32>,
}

impl Recorder {
    fn new<M: FieldModel>(model: &M, capacity: usize) -> Self {
        let spec = model.layout().spec;
        Self {
            density: FieldSeries::new(spec, capacity),
            velocity_x: FieldSeries::new(spec, capacity),
            velocity_y: FieldSeries::new(spec, capacity),
            hazards: model
                .hazard_kinds()
                .into_iter()
                .map(|k| (k, FieldSeries::new(spec, capacity)))
                .collect(),
            evacuated_count: Vec::with_capacity(capacity),
            hazard_removed: Vec::with_capacity(capacity),
            total_occupancy: Vec::with_capacity(capacity),
        }
    }

    fn record<M: FieldModel>(&mut self, model: &M, state: &M::State) {
        let area = model.layout().spec.cell_area() as f64;
        let density = model.density(state);
        self.density.push(density);
        let (vx, vy) = model.velocity(state);
        self.velocity_x.push(&vx);
        self.velocity_y.push(&vy);
        for (kind, series) in self.hazards.iter_mut() {
            series.push(&model.hazard_frame(state, *kind));
        }
        let ledger = model.ledger(state);
        self.evacuated_count.push(ledger.evacuated);
        self.hazard_removed.push(ledger.hazard_removed);
        let mass: f64 = density.iter().map(|&v| v as f64).sum::<f64>() * area;
        self.total_occupancy.push(mass as f32);
    }

    fn take(&mut self, kind: HazardKind) -> Option<FieldSeries> {
        let at = self.hazards.iter().position(|(k, _)| *k == kind)?;
        Some(self.hazards.swap_remove(at).1)
    }
}

/// Runs `model` for its step count under `budget`, recording a frame after
/// every step.
pub fn run_model<M: FieldModel>(
    model: &M,
    budget: &RunBudget,
    observer: &mut dyn ProgressObserver,
) -> FieldResult {
    let engine = model.engine();
    let tag = match engine {
        EngineKind::Mesoscopic => "[Meso]",
        EngineKind::Macroscopic => "[Macro]",
        EngineKind::Microscopic => "[Micro]",
    };
    let requested = model.time_steps();
    let limit = budget.step_limit(requested);
    let clock = budget.start();
    let neutral = RoutingBias::neutral(model.layout().exit_count());

    let mut state = model.init_state();
    let population = model.ledger(&state).population;
    let mut recorder = Recorder::new(model, limit);
    let mut interrupted = None;

    for k in 0..limit {
        if clock.expired() {
            interrupted = Some(RunOutcome::WallClockExceeded);
            break;
        }
        model.step(&mut state, &neutral);
        recorder.record(model, &state);

        let ledger = model.ledger(&state);
        if k % 10 == 0 {
            debug!(
                "{} step {}/{}: {:.1}/{:.1} evacuated, {:.2} lost to hazards",
                tag,
                k + 1,
                limit,
                ledger.evacuated,
                population,
                ledger.hazard_removed
            );
        }
        let progress = StepProgress {
            engine,
            step: k + 1,
            total_steps: limit,
            evacuated: ledger.evacuated,
            population,
        };
        if observer.on_step(&progress) == RunControl::Abort {
            interrupted = Some(RunOutcome::Cancelled);
            break;
        }
        if model.stop_when_clear() && ledger.is_clear() {
            break;
        }
    }

    let ledger = model.ledger(&state).clone();
    let ran = recorder.evacuated_count.len();
    let outcome = interrupted.unwrap_or_else(|| {
        if ledger.is_clear() {
            RunOutcome::Completed
        } else {
            finished_outcome(ran, requested)
        }
    });
    if ledger.diagnostics.clamped_values > 0 {
        warn!(
            "{} {} negative or non-finite cell values were clamped",
            tag, ledger.diagnostics.clamped_values
        );
    }
    info!(
        "{} Run finished after {} steps: {:.1}/{:.1} evacuated, {:.2} lost ({:?}, {:?})",
        tag,
        ran,
        ledger.evacuated,
        population,
        ledger.hazard_removed,
        outcome,
        clock.elapsed()
    );

    let spec = model.layout().spec;
    FieldResult {
        engine,
        fire: recorder.take(HazardKind::Fire),
        flood: recorder.take(HazardKind::Flood),
        earthquake: recorder.take(HazardKind::Earthquake),
        structural: recorder.take(HazardKind::Structural),
        density: recorder.density,
        velocity_x: recorder.velocity_x,
        velocity_y: recorder.velocity_y,
        evacuated_count: recorder.evacuated_count,
        hazard_removed: recorder.hazard_removed,
        total_occupancy: recorder.total_occupancy,
        exit_usage: ledger.per_exit,
        initial_population: population,
        grid_size: spec.width.max(spec.height),
        cell_size: spec.cell_size,
        dt: model.dt(),
        time_steps: ran,
        outcome,
        diagnostics: ledger.diagnostics,
    }
}
