//! Microscopic step loop
//!
//! One step: capture agents already at an exit, take up routing guidance,
//! re-pick goals, rebuild the neighbour grid, compute velocities in parallel,
//! then move agents serially (wall reverts, domain clamp) and capture again.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use super::forces::{approach_point, ForceContext, SocialForceKernel, VelocityUpdate};
use super::grid::SpatialHashGrid;
use super::pool::AgentPool;
use super::{MicroParams, MicroscopicResult, RoutingBias};
use crate::core::progress::finished_outcome;
use crate::core::{
    Diagnostics, EngineKind, Placement, ProgressObserver, Result, RunBudget, RunControl,
    RunOutcome, Scenario, StepProgress,
};
use crate::field::{ExitPotentials, GridSpec};
use crate::hazard::geometry::distance;
use crate::hazard::{Geometry, HazardField, Point};

/// Seed offset of the compliance/guidance stream, kept apart from placement.
const GUIDANCE_STREAM: u64 = 0x5EED_0F_C0_4D_1A_11;

/// Capture does not require line of sight this close to an exit.
const CAPTURE_SIGHT_EXEMPT: f32 = 0.3;

pub struct MicroscopicEngine {
    params: MicroParams,
    kernel: SocialForceKernel,
    panic: f32,
    time_steps: usize,
    exits: Vec<Point>,
    geometry: Geometry,
    hazards: HazardField,
    nav: ExitPotentials,
    nav_walls: Vec<bool>,
    placements: Vec<Placement>,
    seed: u64,
}

pub struct MicroState {
    pub pool: AgentPool,
    grid: SpatialHashGrid,
    next: Vec<VelocityUpdate>,
    rng: StdRng,
    step: usize,
    evacuated: usize,
    exit_usage: Vec<usize>,
    diagnostics: Diagnostics,
}

impl MicroState {
    pub fn step_index(&self) -> usize {
        self.step
    }

    pub fn evacuated(&self) -> usize {
        self.evacuated
    }

    pub fn exit_usage(&self) -> &[usize] {
        &self.exit_usage
    }

    pub fn is_clear(&self) -> bool {
        self.evacuated == self.pool.n_agents
    }

    pub fn diagnostics(&self) -> &Diagnostics {
        &self.diagnostics
    }

    /// Active agents currently heading to each exit.
    pub fn goal_counts(&self, exits: usize) -> Vec<usize> {
        let mut counts = vec![0; exits];
        for i in 0..self.pool.n_agents {
            if let (true, Some(e)) = (self.pool.is_active(i), self.pool.goal[i]) {
                counts[e] += 1;
            }
        }
        counts
    }
}

/// Evacuations during one step.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StepReport {
    pub newly_evacuated: usize,
    pub per_exit: Vec<usize>,
}

impl MicroscopicEngine {
    pub fn new(scenario: &Scenario, params: &MicroParams) -> Result<Self> {
        scenario.validate()?;
        params.validate()?;

        let geometry = scenario.geometry();
        let longest = scenario.domain[0].max(scenario.domain[1]);
        let resolution = ((longest / params.nav_cell).ceil() as usize).max(2);
        let spec = GridSpec::for_domain(scenario.domain, resolution)?;
        let nav_walls = geometry.rasterize(&spec, &scenario.exits, 0.5 * params.capture_radius);
        let nav = ExitPotentials::build(spec, &nav_walls, &scenario.exits, params.capture_radius);
        let hazards = HazardField::new(
            &scenario.hazards,
            &geometry,
            params.dt,
            params.fire_spread_rate,
            scenario.seed,
        );
        let placements = scenario.place_agents(params.cluster_spread);

        info!(
            "[Micro] Engine ready: {} agents, {} exits, {} walls, nav grid {}x{}",
            placements.len(),
            scenario.exits.len(),
            scenario.walls.len(),
            spec.width,
            spec.height
        );

        Ok(Self {
            kernel: SocialForceKernel::from_params(params),
            params: params.clone(),
            panic: scenario.panic_factor,
            time_steps: scenario.time_steps,
            exits: scenario.exits.clone(),
            geometry,
            hazards,
            nav,
            nav_walls,
            placements,
            seed: scenario.seed,
        })
    }

    pub fn exit_count(&self) -> usize {
        self.exits.len()
    }

    pub fn exits(&self) -> &[Point] {
        &self.exits
    }

    pub fn population(&self) -> usize {
        self.placements.len()
    }

    pub fn domain(&self) -> [f32; 2] {
        [self.geometry.width, self.geometry.height]
    }

    pub fn params(&self) -> &MicroParams {
        &self.params
    }

    pub fn init_state(&self) -> MicroState {
        let mut rng = StdRng::seed_from_u64(self.seed ^ GUIDANCE_STREAM);
        let pool = AgentPool::from_placements(&self.placements, &mut rng);
        let n = pool.n_agents;
        let mut state = MicroState {
            pool,
            grid: SpatialHashGrid::for_agents(n, self.params.neighbor_radius),
            next: vec![VelocityUpdate::default(); n],
            rng,
            step: 0,
            evacuated: 0,
            exit_usage: vec![0; self.exits.len()],
            diagnostics: Diagnostics::default(),
        };
        for i in 0..n {
            state.pool.goal[i] = self.choose_goal(&state.pool, i);
        }
        state
    }

    /// Path length to `exit` less familiarity and guidance credit;
    /// infinite when unreachable.
    fn route_cost(&self, pool: &AgentPool, i: usize, exit: usize) -> f32 {
        let d = self.nav.distance_at(exit, pool.position(i));
        if !d.is_finite() {
            return f32::INFINITY;
        }
        let mut cost = d;
        if pool.preferred[i] == Some(exit) {
            cost -= self.params.familiarity_bonus;
        }
        if pool.guided[i] == Some(exit) {
            cost -= self.params.guidance_bias;
        }
        cost
    }

    fn choose_goal(&self, pool: &AgentPool, i: usize) -> Option<usize> {
        (0..self.exits.len())
            .map(|e| (e, self.route_cost(pool, i, e)))
            .filter(|(_, c)| c.is_finite())
            .min_by(|a, b| a.1.total_cmp(&b.1))
            .map(|(e, _)| e)
    }

    fn capture(&self, state: &mut MicroState, report: &mut StepReport) {
        let step = state.step + 1;
        for i in 0..state.pool.n_agents {
            if !state.pool.is_active(i) {
                continue;
            }
            let p = state.pool.position(i);
            let reached = self
                .exits
                .iter()
                .enumerate()
                .map(|(e, &x)| (e, distance(p, x)))
                .filter(|&(e, d)| {
                    d <= self.params.capture_radius
                        && (d < CAPTURE_SIGHT_EXEMPT
                            || self.geometry.line_of_sight(p, approach_point(self.exits[e], p)))
                })
                .min_by(|a, b| a.1.total_cmp(&b.1));
            if let Some((e, _)) = reached {
                state.pool.evacuate(i, e, step);
                state.evacuated += 1;
                state.exit_usage[e] += 1;
                report.newly_evacuated += 1;
                report.per_exit[e] += 1;
            }
        }
    }

    pub fn step(&self, state: &mut MicroState, bias: &RoutingBias) -> StepReport {
        let dt = self.params.dt;
        let time = state.step as f32 * dt;
        let n = state.pool.n_agents;
        let mut report = StepReport {
            newly_evacuated: 0,
            per_exit: vec![0; self.exits.len()],
        };

        self.capture(state, &mut report);

        if let Some(favoured) = bias.favoured() {
            let uptake = self.params.guidance_uptake;
            for i in 0..n {
                if state.pool.is_active(i) && state.rng.gen::<f32>() < uptake * state.pool.compliance[i] {
                    state.pool.guided[i] = Some(favoured);
                }
            }
        }

        let goals: Vec<Option<usize>> = (0..n)
            .into_par_iter()
            .map(|i| {
                if state.pool.is_active(i) {
                    self.choose_goal(&state.pool, i)
                } else {
                    None
                }
            })
            .collect();
        state.pool.goal = goals;

        state.grid.rebuild(&state.pool);
        {
            let ctx = ForceContext {
                pool: &state.pool,
                grid: &state.grid,
                geometry: &self.geometry,
                hazards: &self.hazards,
                nav: &self.nav,
                nav_walls: &self.nav_walls,
                exits: &self.exits,
                panic: self.panic,
                time,
            };
            let kernel = &self.kernel;
            state.next.par_iter_mut().enumerate().for_each(|(i, out)| {
                *out = if ctx.pool.is_active(i) {
                    kernel.velocity(&ctx, i)
                } else {
                    VelocityUpdate::default()
                };
            });
        }

        for i in 0..n {
            if !state.pool.is_active(i) {
                continue;
            }
            let update = state.next[i];
            if update.capped {
                state.diagnostics.speed_caps += 1;
            }
            let p = state.pool.position(i);
            let mut v = [update.vx, update.vy];
            let mut q = self.geometry.clamp([p[0] + v[0] * dt, p[1] + v[1] * dt], 0.0);

            if let Some(wall) = self.geometry.first_crossed(p, q) {
                // Slide along the wall; stay put if that still crosses.
                let n_hat = Geometry::contact(wall, p).normal;
                let vn = v[0] * n_hat[0] + v[1] * n_hat[1];
                v = [v[0] - vn * n_hat[0], v[1] - vn * n_hat[1]];
                q = self.geometry.clamp([p[0] + v[0] * dt, p[1] + v[1] * dt], 0.0);
                if self.geometry.first_crossed(p, q).is_some() {
                    q = p;
                    v = [0.0, 0.0];
                }
                state.diagnostics.wall_reverts += 1;
            }

            if !(q[0].is_finite() && q[1].is_finite()) {
                q = p;
                v = [0.0, 0.0];
                state.diagnostics.clamped_values += 1;
            }
            state.pool.x[i] = q[0];
            state.pool.y[i] = q[1];
            state.pool.vx[i] = v[0];
            state.pool.vy[i] = v[1];
        }

        self.capture(state, &mut report);
        state.step += 1;
        report
    }

    pub fn run(&self, budget: &RunBudget, observer: &mut dyn ProgressObserver) -> MicroscopicResult {
        let requested = self.time_steps;
        let limit = budget.step_limit(requested);
        let clock = budget.start();
        let neutral = RoutingBias::neutral(self.exits.len());
        let mut state = self.init_state();
        let n = state.pool.n_agents;

        let mut positions = Vec::with_capacity(limit);
        let mut velocities = Vec::with_capacity(limit);
        let mut evacuated_count = Vec::with_capacity(limit);
        let mut interrupted = None;

        for k in 0..limit {
            if clock.expired() {
                interrupted = Some(RunOutcome::WallClockExceeded);
                break;
            }
            self.step(&mut state, &neutral);
            positions.push(state.pool.position_frame());
            velocities.push(state.pool.velocity_frame());
            evacuated_count.push(state.evacuated);

            if k % 10 == 0 {
                debug!("[Micro] step {}/{}: {}/{} evacuated", k + 1, limit, state.evacuated, n);
            }
            let progress = StepProgress {
                engine: EngineKind::Microscopic,
                step: k + 1,
                total_steps: limit,
                evacuated: state.evacuated as f32,
                population: n as f32,
            };
            if observer.on_step(&progress) == RunControl::Abort {
                interrupted = Some(RunOutcome::Cancelled);
                break;
            }
            if self.params.stop_when_clear && state.is_clear() {
                break;
            }
        }

        let ran = evacuated_count.len();
        let outcome = interrupted.unwrap_or_else(|| {
            if state.is_clear() {
                RunOutcome::Completed
            } else {
                finished_outcome(ran, requested)
            }
        });
        if state.diagnostics.clamped_values > 0 {
            warn!(
                "[Micro] {} non-finite agent states were reset",
                state.diagnostics.clamped_values
            );
        }
        info!(
            "[Micro] Run finished after {} steps: {}/{} evacuated ({:?}, {:?})",
            ran,
            state.evacuated,
            n,
            outcome,
            clock.elapsed()
        );

        MicroscopicResult {
            positions,
            velocities,
            evacuated_count,
            exit_usage: state.exit_usage.clone(),
            evacuation_steps: state.pool.evacuated_at.clone(),
            num_agents: n,
            time_steps: ran,
            dt: self.params.dt,
            panic_factor: self.panic,
            outcome,
            diagnostics: state.diagnostics,
        }
    }
}
