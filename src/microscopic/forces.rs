//! Social-force kernel
//!
//! Per-agent velocity update: goal attraction scaled by panic, exponential
//! agent and wall repulsion, hazard push/drift, then the speed cap. Reads
//! shared state only, so agents are processed in parallel.

use super::grid::SpatialHashGrid;
use super::pool::AgentPool;
use super::MicroParams;
use crate::field::ExitPotentials;
use crate::hazard::geometry::distance;
use crate::hazard::{Geometry, HazardField, Point};

/// Everything the kernel reads during one step.
pub struct ForceContext<'a> {
    pub pool: &'a AgentPool,
    pub grid: &'a SpatialHashGrid,
    pub geometry: &'a Geometry,
    pub hazards: &'a HazardField,
    pub nav: &'a ExitPotentials,
    pub nav_walls: &'a [bool],
    pub exits: &'a [Point],
    pub panic: f32,
    pub time: f32,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct VelocityUpdate {
    pub vx: f32,
    pub vy: f32,
    pub capped: bool,
}

pub struct SocialForceKernel {
    pub desired_speed: f32,
    pub relaxation_time: f32,
    pub agent_strength: f32,
    pub agent_range: f32,
    pub neighbor_radius: f32,
    pub wall_strength: f32,
    pub wall_range: f32,
    pub wall_cutoff: f32,
    pub density_radius: f32,
    pub density_threshold: f32,
    pub jam_density: f32,
    pub min_crowd_factor: f32,
    pub dt: f32,
}

impl SocialForceKernel {
    pub fn from_params(p: &MicroParams) -> Self {
        Self {
            desired_speed: p.desired_speed,
            relaxation_time: p.relaxation_time,
            agent_strength: p.agent_strength,
            agent_range: p.agent_range,
            neighbor_radius: p.neighbor_radius,
            wall_strength: p.wall_strength,
            wall_range: p.wall_range,
            wall_cutoff: p.wall_cutoff,
            density_radius: p.density_radius,
            density_threshold: p.density_threshold,
            jam_density: p.jam_density,
            min_crowd_factor: p.min_crowd_factor,
            dt: p.dt,
        }
    }

    /// Linear fall from 1 at `density_threshold` to `min_crowd_factor` at
    /// `jam_density` (persons/m²).
    pub fn crowd_factor(&self, density: f32) -> f32 {
        if density <= self.density_threshold {
            return 1.0;
        }
        let span = self.jam_density - self.density_threshold;
        if span <= 0.0 {
            return self.min_crowd_factor;
        }
        let t = ((density - self.density_threshold) / span).min(1.0);
        1.0 - t * (1.0 - self.min_crowd_factor)
    }

    /// Unit heading toward `exit`: straight when visible, otherwise down the
    /// exit's navigation potential.
    pub fn heading(&self, ctx: &ForceContext<'_>, p: Point, exit: usize) -> [f32; 2] {
        let target = ctx.exits[exit];
        let d = distance(p, target);
        if d < 1e-6 {
            return [0.0, 0.0];
        }
        let straight = [(target[0] - p[0]) / d, (target[1] - p[1]) / d];
        if ctx.geometry.line_of_sight(p, approach_point(target, p)) {
            return straight;
        }
        ctx.nav.descent(exit, ctx.nav_walls, p).unwrap_or(straight)
    }

    pub fn velocity(&self, ctx: &ForceContext<'_>, i: usize) -> VelocityUpdate {
        let pool = ctx.pool;
        let p = pool.position(i);
        let (vx, vy) = (pool.vx[i], pool.vy[i]);

        let hazard = ctx.hazards.effects_at(p, ctx.time);
        let alpha = ctx.panic * hazard.panic_multiplier;

        // Goal attraction.
        let dir = pool.goal[i].map_or([0.0, 0.0], |e| self.heading(ctx, p, e));
        let v_goal = self.desired_speed * alpha;
        let mut fx = (v_goal * dir[0] - vx) / self.relaxation_time;
        let mut fy = (v_goal * dir[1] - vy) / self.relaxation_time;

        // Agent repulsion and local density.
        let mut near = 0u32;
        ctx.grid.query_neighbors(i as u32, p[0], p[1], self.neighbor_radius, |j| {
            let j = j as usize;
            let dx = p[0] - pool.x[j];
            let dy = p[1] - pool.y[j];
            let d = (dx * dx + dy * dy).sqrt();
            if d >= self.neighbor_radius {
                return;
            }
            if d < self.density_radius {
                near += 1;
            }
            let (nx, ny) = if d > 1e-6 {
                (dx / d, dy / d)
            } else {
                // Coincident agents: split deterministically by index.
                if i < j { (1.0, 0.0) } else { (-1.0, 0.0) }
            };
            let m = alpha * self.agent_strength * (-d / self.agent_range).exp();
            fx += m * nx;
            fy += m * ny;
        });

        ctx.geometry.for_each_wall_within(p, self.wall_cutoff, |c| {
            let m = self.wall_strength * (-c.distance / self.wall_range).exp();
            fx += m * c.normal[0];
            fy += m * c.normal[1];
        });

        fx += alpha * hazard.repulsion[0] + hazard.drift[0];
        fy += alpha * hazard.repulsion[1] + hazard.drift[1];

        // Semi-implicit Euler, then the speed cap.
        let mut nvx = vx + fx * self.dt;
        let mut nvy = vy + fy * self.dt;
        if !(nvx.is_finite() && nvy.is_finite()) {
            return VelocityUpdate { vx: 0.0, vy: 0.0, capped: true };
        }

        let area = std::f32::consts::PI * self.density_radius * self.density_radius;
        let density = (near + 1) as f32 / area;
        let v_max = self.desired_speed
            * (1.0 + 0.5 * alpha)
            * hazard.speed_factor()
            * self.crowd_factor(density);
        let speed = (nvx * nvx + nvy * nvy).sqrt();
        let capped = speed > v_max;
        if capped {
            let k = if speed > 0.0 { v_max / speed } else { 0.0 };
            nvx *= k;
            nvy *= k;
        }
        VelocityUpdate { vx: nvx, vy: nvy, capped }
    }
}

/// Point just in front of `exit` on the side of `from`. Exits usually sit on
/// a wall line; sighting this point keeps that wall from hiding its own exit.
pub fn approach_point(exit: Point, from: Point) -> Point {
    const SETBACK: f32 = 0.25;
    let d = distance(exit, from);
    if d <= SETBACK {
        return from;
    }
    let k = SETBACK / d;
    [exit[0] + (from[0] - exit[0]) * k, exit[1] + (from[1] - exit[1]) * k]
}
