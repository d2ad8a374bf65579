//! Continuity solver
//!
//! `∂ρ/∂t + ∇·(ρv) = D∇²ρ − sinks` on cell faces. Face velocities are the
//! mean of the two cell velocities; the donor cell supplies the density.
//! Walls and the domain edge carry no flux, and an outflow limiter scales a
//! cell's outgoing transfers so it never goes negative.

use rayon::prelude::*;
use tracing::info;

use super::fire::FireField;
use super::MacroParams;
use crate::core::{EngineKind, Placement, Result, RoutingBias, Scenario};
use crate::field::model::channel_frame;
use crate::field::{
    descent_weights, diffuse, FieldModel, FieldStepReport, GridLayout, MassLedger,
    RoutedPotential, DIRECTIONS,
};
use crate::hazard::{Hazard, HazardEffects, HazardField, HazardKind};

/// Largest explicit diffusion number used per sub-step.
pub const MAX_DIFFUSION_NUMBER: f32 = 0.24;

/// Speed penalty per unit of coupled fire intensity.
const FIRE_SPEED_PENALTY: f32 = 0.6;

pub struct MacroscopicEngine {
    params: MacroParams,
    layout: GridLayout,
    /// Every hazard except fire, which lives on the grid.
    others: HazardField,
    fires: HazardField,
    fire_spread: f32,
    placements: Vec<Placement>,
    time_steps: usize,
    substeps: usize,
    diffusion_number: f32,
    clamped_diffusion: Option<f32>,
}

pub struct MacroState {
    rho: Vec<f32>,
    scratch: Vec<f32>,
    fire: FireField,
    routed: RoutedPotential,
    /// Unit walking direction per cell for the current routing.
    heading: Vec<[f32; 2]>,
    velocity_x: Vec<f32>,
    velocity_y: Vec<f32>,
    ledger: MassLedger,
}

impl MacroState {
    pub fn ledger(&self) -> &MassLedger {
        &self.ledger
    }

    pub fn density(&self) -> &[f32] {
        &self.rho
    }

    pub fn fire(&self) -> &FireField {
        &self.fire
    }
}

impl MacroscopicEngine {
    pub fn new(scenario: &Scenario, params: &MacroParams) -> Result<Self> {
        scenario.validate()?;
        params.validate()?;

        let layout = GridLayout::build(scenario, params.grid_resolution, params.exit_radius)?;
        let geometry = scenario.geometry();
        let (fire_hazards, other_hazards): (Vec<Hazard>, Vec<Hazard>) = scenario
            .hazards
            .iter()
            .cloned()
            .partition(|h| h.kind() == HazardKind::Fire);
        let build = |hazards: &[Hazard]| {
            HazardField::new(hazards, &geometry, params.dt, params.fire_spread_rate, scenario.seed)
        };
        let fires = build(&fire_hazards);
        let others = build(&other_hazards);
        let fire_spread = fires
            .max_growth(HazardKind::Fire)
            .unwrap_or(params.fire_spread_rate);
        let placements = scenario.place_agents(params.cluster_spread);

        let dx = layout.spec.cell_size;
        let courant = params.free_speed * params.dt / dx;
        let diffusion = params.diffusion_coefficient * params.dt / (dx * dx);
        let wanted = (courant / params.max_courant)
            .ceil()
            .max((diffusion / MAX_DIFFUSION_NUMBER).ceil()) as usize;
        let substeps = wanted.clamp(1, params.max_substeps);
        let h = params.dt / substeps as f32;
        let requested = params.diffusion_coefficient * h / (dx * dx);
        let (diffusion_number, clamped_diffusion) = if requested > MAX_DIFFUSION_NUMBER {
            (MAX_DIFFUSION_NUMBER, Some(MAX_DIFFUSION_NUMBER * dx * dx / h))
        } else {
            (requested, None)
        };

        info!(
            "[Macro] Engine ready: {}x{} cells of {:.2} m, {} agents, {} exits, {} sub-steps, fire spread {:.3}",
            layout.spec.width,
            layout.spec.height,
            dx,
            placements.len(),
            layout.exit_count(),
            substeps,
            fire_spread
        );

        Ok(Self {
            params: params.clone(),
            layout,
            others,
            fires,
            fire_spread,
            placements,
            time_steps: scenario.time_steps,
            substeps,
            diffusion_number,
            clamped_diffusion,
        })
    }

    pub fn params(&self) -> &MacroParams {
        &self.params
    }

    pub fn substeps(&self) -> usize {
        self.substeps
    }

    /// Normalised descent direction of the routed potential in every cell.
    fn headings(&self, phi: &[f32]) -> Vec<[f32; 2]> {
        let spec = self.layout.spec;
        let walls = &self.layout.walls;
        (0..spec.len())
            .into_par_iter()
            .map(|cell| {
                if walls[cell] {
                    return [0.0, 0.0];
                }
                let (x, y) = spec.coords(cell);
                let w = descent_weights(&spec, walls, phi, x, y);
                let mut d = [0.0f32; 2];
                for (k, wk) in w.iter().enumerate() {
                    d[0] += wk * DIRECTIONS[k][0];
                    d[1] += wk * DIRECTIONS[k][1];
                }
                normalised(d)
            })
            .collect()
    }

    fn other_effects(&self, t: f32) -> Vec<HazardEffects> {
        if self.others.is_empty() {
            return Vec::new();
        }
        let spec = self.layout.spec;
        (0..spec.len())
            .into_par_iter()
            .map(|cell| {
                if self.layout.walls[cell] {
                    return HazardEffects::default();
                }
                let (x, y) = spec.coords(cell);
                self.others.effects_at(spec.center(x, y), t)
            })
            .collect()
    }

    /// Cell velocities: Greenshields speed along the routed heading, turned
    /// away from rising fire.
    fn update_velocity(&self, state: &mut MacroState, effects: &[HazardEffects]) {
        let p = &self.params;
        let spec = self.layout.spec;
        let walls = &self.layout.walls;
        let fire = &state.fire;
        let burning = fire.is_burning();
        let rho = &state.rho;
        let heading = &state.heading;
        let (vx, vy): (Vec<f32>, Vec<f32>) = (0..spec.len())
            .into_par_iter()
            .map(|cell| {
                if walls[cell] {
                    return (0.0, 0.0);
                }
                let mut dir = heading[cell];
                let f = fire.at(cell);
                if burning && f > 0.0 {
                    let (x, y) = spec.coords(cell);
                    let toward = normalised(fire.gradient(x, y));
                    dir = normalised([
                        dir[0] - p.fire_deflection * f * toward[0],
                        dir[1] - p.fire_deflection * f * toward[1],
                    ]);
                }
                let jam = (1.0 - rho[cell] / p.jam_density).max(p.min_speed_fraction);
                let penalty = effects
                    .get(cell)
                    .map_or(0.0, |fx| fx.speed_penalty)
                    .max(FIRE_SPEED_PENALTY * f);
                let speed = p.free_speed * jam * (1.0 - penalty).clamp(0.0, 1.0);
                (speed * dir[0], speed * dir[1])
            })
            .unzip();
        state.velocity_x = vx;
        state.velocity_y = vy;
    }

    /// Upwind face transfers for one sub-step, limited so no cell sends more
    /// than it holds.
    fn advect(&self, state: &mut MacroState, h: f32) {
        let spec = self.layout.spec;
        let walls = &self.layout.walls;
        let ratio = h / spec.cell_size;
        let rho = &state.rho;
        let (vx, vy) = (&state.velocity_x, &state.velocity_y);

        // Transfer across the east and north face of every cell, positive
        // when mass leaves the cell.
        let mut east = vec![0.0f32; spec.len()];
        let mut north = vec![0.0f32; spec.len()];
        for y in 0..spec.height {
            for x in 0..spec.width {
                let a = spec.index(x, y);
                if walls[a] {
                    continue;
                }
                if let Some(b) = spec.offset(x, y, 1, 0).filter(|&b| !walls[b]) {
                    let u = 0.5 * (vx[a] + vx[b]);
                    east[a] = if u > 0.0 { u * rho[a] } else { u * rho[b] } * ratio;
                }
                if let Some(b) = spec.offset(x, y, 0, 1).filter(|&b| !walls[b]) {
                    let v = 0.5 * (vy[a] + vy[b]);
                    north[a] = if v > 0.0 { v * rho[a] } else { v * rho[b] } * ratio;
                }
            }
        }

        let mut outflow = vec![0.0f32; spec.len()];
        for y in 0..spec.height {
            for x in 0..spec.width {
                let a = spec.index(x, y);
                if east[a] > 0.0 {
                    outflow[a] += east[a];
                } else if east[a] < 0.0 {
                    outflow[a + 1] -= east[a];
                }
                if north[a] > 0.0 {
                    outflow[a] += north[a];
                } else if north[a] < 0.0 {
                    outflow[a + spec.width] -= north[a];
                }
            }
        }
        let limit: Vec<f32> = outflow
            .iter()
            .zip(rho.iter())
            .map(|(&out, &r)| if out > r { r / out } else { 1.0 })
            .collect();

        let next = &mut state.scratch;
        next.copy_from_slice(rho);
        for y in 0..spec.height {
            for x in 0..spec.width {
                let a = spec.index(x, y);
                if east[a] != 0.0 {
                    let b = a + 1;
                    let t = if east[a] > 0.0 { east[a] * limit[a] } else { east[a] * limit[b] };
                    next[a] -= t;
                    next[b] += t;
                }
                if north[a] != 0.0 {
                    let b = a + spec.width;
                    let t = if north[a] > 0.0 { north[a] * limit[a] } else { north[a] * limit[b] };
                    next[a] -= t;
                    next[b] += t;
                }
            }
        }
        std::mem::swap(&mut state.rho, &mut state.scratch);
    }

    fn drain(&self, state: &mut MacroState, effects: &[HazardEffects], h: f32, report: &mut FieldStepReport) {
        let area = self.layout.spec.cell_area();
        let exit_share = (self.params.evacuation_coefficient * h).min(1.0);
        for cell in 0..state.rho.len() {
            let rho = state.rho[cell];
            if rho <= 0.0 {
                continue;
            }
            let mut keep = rho;
            if let Some(e) = self.layout.sink_owner[cell] {
                let booked = state.ledger.record_exit(e, rho * exit_share * area);
                report.evacuated += booked;
                report.per_exit[e] += booked;
                keep -= booked / area;
            }
            let rate = self.params.fire_coupling * state.fire.at(cell)
                + effects.get(cell).map_or(0.0, |fx| fx.casualty_rate);
            if rate > 0.0 {
                let share = (rate * h).min(1.0);
                let booked = state.ledger.record_casualties(keep * share * area);
                report.hazard_removed += booked;
                keep -= booked / area;
            }
            state.rho[cell] = keep.max(0.0);
        }
    }

    fn clamp(state: &mut MacroState, walls: &[bool]) {
        let mut fixed = 0;
        for (v, &wall) in state.rho.iter_mut().zip(walls) {
            if wall {
                *v = 0.0;
            } else if !v.is_finite() || *v < 0.0 {
                *v = 0.0;
                fixed += 1;
            }
        }
        state.ledger.diagnostics.clamped_values += fixed;
    }
}

fn normalised(v: [f32; 2]) -> [f32; 2] {
    let len = (v[0] * v[0] + v[1] * v[1]).sqrt();
    if len > 1e-9 {
        [v[0] / len, v[1] / len]
    } else {
        [0.0, 0.0]
    }
}

impl FieldModel for MacroscopicEngine {
    type State = MacroState;

    fn engine(&self) -> EngineKind {
        EngineKind::Macroscopic
    }

    fn layout(&self) -> &GridLayout {
        &self.layout
    }

    fn dt(&self) -> f32 {
        self.params.dt
    }

    fn time_steps(&self) -> usize {
        self.time_steps
    }

    fn stop_when_clear(&self) -> bool {
        self.params.stop_when_clear
    }

    fn init_state(&self) -> MacroState {
        let initial = self.layout.initial_density(&self.placements);
        let population = initial.total_mass() as f32;
        let routed = RoutedPotential::new(&self.layout);
        let heading = self.headings(&routed.phi);
        let n = initial.data.len();
        let mut ledger = MassLedger::new(population, self.layout.exit_count());
        ledger.diagnostics.substeps = self.substeps;
        ledger.diagnostics.clamped_diffusion = self.clamped_diffusion;
        MacroState {
            rho: initial.data,
            scratch: vec![0.0; n],
            fire: FireField::ignite(&self.layout, &self.fires, self.fire_spread),
            routed,
            heading,
            velocity_x: vec![0.0; n],
            velocity_y: vec![0.0; n],
            ledger,
        }
    }

    fn step(&self, state: &mut MacroState, bias: &RoutingBias) -> FieldStepReport {
        let t = state.ledger.step as f32 * self.params.dt;
        let h = self.params.dt / self.substeps as f32;
        if state.routed.update(&self.layout, bias) {
            state.heading = self.headings(&state.routed.phi);
        }
        let effects = self.other_effects(t);
        state.fire.feed(&self.layout, &self.fires, t);

        let mut report = FieldStepReport {
            per_exit: vec![0.0; self.layout.exit_count()],
            ..FieldStepReport::default()
        };
        for _ in 0..self.substeps {
            self.update_velocity(state, &effects);
            self.advect(state, h);
            if self.diffusion_number > 0.0 {
                diffuse(
                    &self.layout.spec,
                    &state.rho,
                    &self.layout.walls,
                    self.diffusion_number,
                    &mut state.scratch,
                );
                std::mem::swap(&mut state.rho, &mut state.scratch);
            }
            self.drain(state, &effects, h, &mut report);
        }
        state.fire.advance(&self.layout.walls);
        Self::clamp(state, &self.layout.walls);
        state.ledger.step += 1;
        report
    }

    fn ledger<'a>(&self, state: &'a MacroState) -> &'a MassLedger {
        &state.ledger
    }

    fn density<'a>(&self, state: &'a MacroState) -> &'a [f32] {
        &state.rho
    }

    fn velocity(&self, state: &MacroState) -> (Vec<f32>, Vec<f32>) {
        (state.velocity_x.clone(), state.velocity_y.clone())
    }

    fn route_offsets<'a>(&self, state: &'a MacroState) -> &'a [f32] {
        state.routed.offsets()
    }

    fn hazard_kinds(&self) -> Vec<HazardKind> {
        HazardKind::DYNAMIC
            .into_iter()
            .filter(|&k| match k {
                HazardKind::Fire => self.fires.has(k),
                _ => self.others.has(k),
            })
            .collect()
    }

    fn hazard_frame(&self, state: &MacroState, kind: HazardKind) -> Vec<f32> {
        match kind {
            HazardKind::Fire => state.fire.data().to_vec(),
            _ => {
                let t = state.ledger.step as f32 * self.params.dt;
                channel_frame(&self.layout, &self.others, kind, t)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn substeps_cover_both_advection_and_diffusion() {
        let scenario = Scenario::open_room(vec![[10.0, 10.0]], 10, 5);
        let engine = MacroscopicEngine::new(&scenario, &MacroParams::default()).unwrap();
        // 0.2 m cells: diffusion 0.8·0.1/0.04 = 2 needs 9 sub-steps.
        assert_eq!(engine.substeps(), 9);
        assert!(engine.init_state().ledger().diagnostics.clamped_diffusion.is_none());
    }

    #[test]
    fn headings_point_down_the_potential() {
        let scenario = Scenario::open_room(vec![[19.0, 10.0]], 10, 5);
        let engine = MacroscopicEngine::new(&scenario, &MacroParams::default()).unwrap();
        let state = engine.init_state();
        let spec = engine.layout().spec;
        let d = state.heading[spec.index(10, spec.height / 2)];
        assert!(d[0] > 0.9);
    }

    #[test]
    fn limiter_keeps_a_single_loaded_cell_non_negative() {
        let params = MacroParams { diffusion_coefficient: 0.0, ..MacroParams::default() };
        let scenario = Scenario::open_room(vec![[19.0, 10.0]], 1, 5)
            .with_cluster(5.0, 10.0, 1, None);
        let engine = MacroscopicEngine::new(&scenario, &params).unwrap();
        let mut state = engine.init_state();
        let before: f32 = state.density().iter().sum();
        for _ in 0..5 {
            engine.step(&mut state, &RoutingBias::neutral(1));
            assert!(state.density().iter().all(|&v| v >= 0.0));
        }
        let after: f32 = state.density().iter().sum();
        assert!((before - after).abs() < 1e-3 * before);
    }
}
