//! Mesoscopic step loop
//!
//! Per sub-step: relax every open cell toward its equilibrium, stream, smooth
//! with conservative diffusion, then drain exit and hazard sinks. Hazard
//! effects are evaluated once per output step at the cell centres.

use rayon::prelude::*;
use tracing::info;

use super::lattice::{self, Populations, Q, REST};
use super::MesoParams;
use crate::core::{EngineKind, Placement, Result, RoutingBias, Scenario};
use crate::field::model::channel_frame;
use crate::field::potential::step;
use crate::field::{
    descent_weights, diffuse, FieldGrid, FieldModel, FieldStepReport, GridLayout, MassLedger,
    RoutedPotential, DIRECTIONS, NEIGHBOURS,
};
use crate::hazard::{HazardEffects, HazardField, HazardKind};

/// Largest stable explicit diffusion number on the 4-neighbour stencil,
/// kept just under the 0.25 limit.
pub const MAX_DIFFUSION_NUMBER: f32 = 0.24;

/// Largest Courant number accepted before sub-stepping.
const MAX_COURANT: f32 = 0.9;

pub struct MesoscopicEngine {
    params: MesoParams,
    layout: GridLayout,
    hazards: HazardField,
    placements: Vec<Placement>,
    time_steps: usize,
    substeps: usize,
    courant: [f32; 8],
    diffusion_number: f32,
    clamped_diffusion: Option<f32>,
}

pub struct MesoState {
    f: Vec<Populations>,
    scratch: Vec<Populations>,
    density: Vec<f32>,
    routed: RoutedPotential,
    ledger: MassLedger,
}

impl MesoState {
    pub fn ledger(&self) -> &MassLedger {
        &self.ledger
    }

    pub fn density(&self) -> &[f32] {
        &self.density
    }

    pub fn offsets(&self) -> &[f32] {
        self.routed.offsets()
    }
}

impl MesoscopicEngine {
    pub fn new(scenario: &Scenario, params: &MesoParams) -> Result<Self> {
        scenario.validate()?;
        params.validate()?;

        let layout = GridLayout::build(scenario, params.grid_size, params.exit_radius)?;
        let hazards = HazardField::new(
            &scenario.hazards,
            &scenario.geometry(),
            params.dt,
            params.fire_spread_rate,
            scenario.seed,
        );
        let placements = scenario.place_agents(params.cluster_spread);

        let dx = layout.spec.cell_size;
        let axis = params.free_speed * params.dt / dx;
        let substeps = ((axis / MAX_COURANT).ceil() as usize).clamp(1, params.max_substeps);
        let h = params.dt / substeps as f32;
        let mut courant = [0.0; 8];
        for (k, c) in courant.iter_mut().enumerate() {
            let len = if k % 2 == 1 { std::f32::consts::SQRT_2 } else { 1.0 };
            *c = (params.free_speed * h / (dx * len)).min(1.0);
        }

        let requested = params.diffusion_coefficient * h / (dx * dx);
        let (diffusion_number, clamped_diffusion) = if requested > MAX_DIFFUSION_NUMBER {
            let effective = MAX_DIFFUSION_NUMBER * dx * dx / h;
            (MAX_DIFFUSION_NUMBER, Some(effective))
        } else {
            (requested, None)
        };

        info!(
            "[Meso] Engine ready: {}x{} cells of {:.2} m, {} agents, {} exits, {} sub-steps",
            layout.spec.width,
            layout.spec.height,
            dx,
            placements.len(),
            layout.exit_count(),
            substeps
        );
        if let Some(d) = clamped_diffusion {
            info!(
                "[Meso] Diffusion {:.3} m²/s clamped to {:.3} m²/s for stability",
                params.diffusion_coefficient, d
            );
        }

        Ok(Self {
            params: params.clone(),
            layout,
            hazards,
            placements,
            time_steps: scenario.time_steps,
            substeps,
            courant,
            diffusion_number,
            clamped_diffusion,
        })
    }

    pub fn params(&self) -> &MesoParams {
        &self.params
    }

    pub fn substeps(&self) -> usize {
        self.substeps
    }

    fn hazard_effects(&self, t: f32) -> Vec<HazardEffects> {
        if self.hazards.is_empty() {
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
                self.hazards.effects_at(spec.center(x, y), t)
            })
            .collect()
    }

    /// Equilibrium direction weights: potential descent, pushed away from
    /// rising hazard intensity and along flood drift.
    fn direction_weights(
        &self,
        phi: &[f32],
        cell: usize,
        effects: Option<&HazardEffects>,
        danger: Option<&FieldGrid>,
    ) -> [f32; 8] {
        let spec = &self.layout.spec;
        let walls = &self.layout.walls;
        let (x, y) = spec.coords(cell);
        let mut w = descent_weights(spec, walls, phi, x, y);
        let (Some(fx), Some(danger)) = (effects, danger) else {
            return w;
        };
        let grad = danger.gradient(x, y);
        for (k, &(dx, dy)) in NEIGHBOURS.iter().enumerate() {
            if step(spec, walls, x, y, dx, dy).is_none() {
                continue;
            }
            let e = DIRECTIONS[k];
            let away = -(e[0] * grad[0] + e[1] * grad[1]);
            let along = e[0] * fx.drift[0] + e[1] * fx.drift[1];
            w[k] += self.params.hazard_avoidance * away.max(0.0) + along.max(0.0);
        }
        w
    }

    fn relax(&self, state: &mut MesoState, effects: &[HazardEffects], danger: Option<&FieldGrid>) {
        let p = &self.params;
        let walls = &self.layout.walls;
        let phi = &state.routed.phi;
        state.f.par_iter_mut().enumerate().for_each(|(cell, f)| {
            if walls[cell] {
                return;
            }
            let rho = lattice::density(f);
            if rho <= 0.0 {
                return;
            }
            let fx = effects.get(cell);
            let hazard_speed = fx.map_or(1.0, HazardEffects::speed_factor);
            let moving = lattice::speed_fraction(
                rho,
                p.density_threshold,
                p.jam_density,
                p.min_speed_fraction,
            ) * hazard_speed;
            let weights = self.direction_weights(phi, cell, fx, danger);
            let feq = lattice::equilibrium(rho, moving, &weights);
            lattice::collide(f, &feq, lattice::relaxation_time(rho, p.density_threshold));
        });
    }

    fn smooth(&self, state: &mut MesoState) {
        if self.diffusion_number <= 0.0 {
            return;
        }
        let rho: Vec<f32> = state.f.iter().map(lattice::density).collect();
        let mut next = vec![0.0; rho.len()];
        diffuse(&self.layout.spec, &rho, &self.layout.walls, self.diffusion_number, &mut next);
        state.f.par_iter_mut().enumerate().for_each(|(cell, f)| {
            let (old, new) = (rho[cell], next[cell]);
            if old > 1e-12 {
                let k = new / old;
                f.iter_mut().for_each(|v| *v *= k);
            } else {
                *f = [0.0; Q];
                f[REST] = new;
            }
        });
    }

    /// Exit and hazard sinks for one sub-step of length `h`.
    fn drain(&self, state: &mut MesoState, effects: &[HazardEffects], h: f32, report: &mut FieldStepReport) {
        let area = self.layout.spec.cell_area();
        let exit_share = (self.params.evacuation_coefficient * h).min(1.0);
        for cell in 0..state.f.len() {
            let rho = lattice::density(&state.f[cell]);
            if rho <= 0.0 {
                continue;
            }
            let mut keep = 1.0;
            if let Some(e) = self.layout.sink_owner[cell] {
                let booked = state.ledger.record_exit(e, rho * exit_share * area);
                report.evacuated += booked;
                report.per_exit[e] += booked;
                keep -= booked / (rho * area);
            }
            if let Some(fx) = effects.get(cell) {
                let share = (fx.casualty_rate * h).min(1.0) * keep;
                if share > 0.0 {
                    let booked = state.ledger.record_casualties(rho * share * area);
                    report.hazard_removed += booked;
                    keep -= booked / (rho * area);
                }
            }
            if keep < 1.0 {
                let keep = keep.max(0.0);
                state.f[cell].iter_mut().for_each(|v| *v *= keep);
            }
        }
    }

    fn clamp(state: &mut MesoState) {
        let mut fixed = 0u64;
        for f in state.f.iter_mut() {
            for v in f.iter_mut() {
                if !v.is_finite() || *v < 0.0 {
                    *v = 0.0;
                    fixed += 1;
                }
            }
        }
        state.ledger.diagnostics.clamped_values += fixed;
    }
}

impl FieldModel for MesoscopicEngine {
    type State = MesoState;

    fn engine(&self) -> EngineKind {
        EngineKind::Mesoscopic
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

    fn init_state(&self) -> MesoState {
        let initial = self.layout.initial_density(&self.placements);
        let population = initial.total_mass() as f32;
        let f: Vec<Populations> = initial
            .data
            .iter()
            .map(|&rho| {
                let mut f = [0.0; Q];
                f[REST] = rho;
                f
            })
            .collect();
        let mut ledger = MassLedger::new(population, self.layout.exit_count());
        ledger.diagnostics.substeps = self.substeps;
        ledger.diagnostics.clamped_diffusion = self.clamped_diffusion;
        MesoState {
            scratch: vec![[0.0; Q]; f.len()],
            f,
            density: initial.data,
            routed: RoutedPotential::new(&self.layout),
            ledger,
        }
    }

    fn step(&self, state: &mut MesoState, bias: &RoutingBias) -> FieldStepReport {
        let t = state.ledger.step as f32 * self.params.dt;
        let h = self.params.dt / self.substeps as f32;
        state.routed.update(&self.layout, bias);

        let effects = self.hazard_effects(t);
        let danger = (!effects.is_empty()).then(|| FieldGrid {
            spec: self.layout.spec,
            data: effects.iter().map(|fx| fx.intensity).collect(),
        });

        let mut report = FieldStepReport {
            per_exit: vec![0.0; self.layout.exit_count()],
            ..FieldStepReport::default()
        };
        for _ in 0..self.substeps {
            self.relax(state, &effects, danger.as_ref());
            lattice::stream(
                &self.layout.spec,
                &self.layout.walls,
                &self.courant,
                &state.f,
                &mut state.scratch,
            );
            std::mem::swap(&mut state.f, &mut state.scratch);
            self.smooth(state);
            self.drain(state, &effects, h, &mut report);
        }

        Self::clamp(state);
        state.density = state.f.iter().map(lattice::density).collect();
        state.ledger.step += 1;
        report
    }

    fn ledger<'a>(&self, state: &'a MesoState) -> &'a MassLedger {
        &state.ledger
    }

    fn density<'a>(&self, state: &'a MesoState) -> &'a [f32] {
        &state.density
    }

    fn velocity(&self, state: &MesoState) -> (Vec<f32>, Vec<f32>) {
        let v0 = self.params.free_speed;
        state
            .f
            .par_iter()
            .map(|f| {
                let rho = lattice::density(f);
                if rho <= 1e-9 {
                    return (0.0, 0.0);
                }
                let j = lattice::flux(f);
                (v0 * j[0] / rho, v0 * j[1] / rho)
            })
            .unzip()
    }

    fn hazard_kinds(&self) -> Vec<HazardKind> {
        HazardKind::DYNAMIC
            .into_iter()
            .filter(|&k| self.hazards.has(k))
            .collect()
    }

    fn route_offsets<'a>(&self, state: &'a MesoState) -> &'a [f32] {
        state.routed.offsets()
    }

    fn hazard_frame(&self, state: &MesoState, kind: HazardKind) -> Vec<f32> {
        let t = state.ledger.step as f32 * self.params.dt;
        channel_frame(&self.layout, &self.hazards, kind, t)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn coarse_grid_needs_one_substep_and_clamps_diffusion() {
        let scenario = Scenario::open_room(vec![[10.0, 10.0]], 20, 10);
        let engine = MesoscopicEngine::new(&scenario, &MesoParams::default()).unwrap();
        assert_eq!(engine.substeps(), 1);
        let state = engine.init_state();
        let d = state.ledger().diagnostics.clamped_diffusion.unwrap();
        assert!(d < 0.8);
        assert!((state.ledger().population - 20.0).abs() < 1e-3);
    }

    #[test]
    fn mass_heads_toward_the_exit() {
        let scenario = Scenario::open_room(vec![[18.0, 10.0]], 10, 20).with_cluster(6.0, 10.0, 10, None);
        let engine = MesoscopicEngine::new(&scenario, &MesoParams::default()).unwrap();
        let mut state = engine.init_state();
        let centroid = |s: &MesoState| {
            let spec = engine.layout().spec;
            let (mut m, mut mx) = (0.0, 0.0);
            for (cell, &rho) in s.density().iter().enumerate() {
                let (x, y) = spec.coords(cell);
                m += rho;
                mx += rho * spec.center(x, y)[0];
            }
            mx / m
        };
        let before = centroid(&state);
        for _ in 0..20 {
            engine.step(&mut state, &RoutingBias::neutral(1));
        }
        let (vx, _) = engine.velocity(&state);
        let mean_vx: f32 = vx.iter().sum::<f32>();
        assert!(centroid(&state) > before + 1.0);
        assert!(mean_vx > 0.0);
    }

    #[test]
    fn routing_offsets_shift_assignment() {
        let scenario = Scenario::open_room(vec![[2.0, 10.0], [18.0, 10.0]], 30, 10)
            .with_cluster(8.0, 10.0, 30, None);
        let engine = MesoscopicEngine::new(&scenario, &MesoParams::default()).unwrap();
        let mut state = engine.init_state();
        engine.step(&mut state, &RoutingBias::neutral(2));
        let plain = engine.assignment_shares(&state);
        assert!(plain[0] > 0.9);
        engine.step(&mut state, &RoutingBias::boost(2, 1, 10.0));
        let boosted = engine.assignment_shares(&state);
        assert!(boosted[1] > 0.9);
    }
}
