//! Discrete-velocity lattice
//!
//! Each cell carries nine populations: one per neighbour direction (in
//! `NEIGHBOURS` order) plus a resting population. Collision relaxes them
//! toward an equilibrium that sends the moving share of the local mass down
//! the exit potential; streaming moves a Courant fraction of each moving
//! population into the next cell, bouncing it back where the face is closed.

use rayon::prelude::*;

use crate::field::potential::{opposite, step};
use crate::field::{GridSpec, DIRECTIONS, NEIGHBOURS};

pub const Q: usize = 9;
pub const REST: usize = 8;

pub type Populations = [f32; Q];

#[inline]
pub fn density(f: &Populations) -> f32 {
    f.iter().sum()
}

/// Σ f_k ê_k over the moving populations, in lattice units.
pub fn flux(f: &Populations) -> [f32; 2] {
    let mut j = [0.0; 2];
    for k in 0..REST {
        j[0] += f[k] * DIRECTIONS[k][0];
        j[1] += f[k] * DIRECTIONS[k][1];
    }
    j
}

/// Walking speed as a fraction of free speed: 1 up to `threshold`, then a
/// linear fall to `floor` at `jam` (persons/m²).
pub fn speed_fraction(rho: f32, threshold: f32, jam: f32, floor: f32) -> f32 {
    if rho <= threshold {
        return 1.0;
    }
    if jam <= threshold {
        return floor;
    }
    let t = ((rho - threshold) / (jam - threshold)).min(1.0);
    1.0 - t * (1.0 - floor)
}

/// Congested cells relax more slowly.
#[inline]
pub fn relaxation_time(rho: f32, threshold: f32) -> f32 {
    if rho > threshold {
        2.0
    } else {
        1.0
    }
}

/// `moving · rho` split over the directions in proportion to `weights`; the
/// rest stays. Everything rests when no direction has weight.
pub fn equilibrium(rho: f32, moving: f32, weights: &[f32; 8]) -> Populations {
    let mut feq = [0.0; Q];
    let total: f32 = weights.iter().sum();
    if rho <= 0.0 || total <= 0.0 || !total.is_finite() {
        feq[REST] = rho.max(0.0);
        return feq;
    }
    let m = rho * moving.clamp(0.0, 1.0);
    for k in 0..REST {
        feq[k] = m * weights[k] / total;
    }
    feq[REST] = rho - m;
    feq
}

/// BGK relaxation `f += (f_eq − f)/τ`. With τ ≥ 1 the result stays
/// non-negative.
#[inline]
pub fn collide(f: &mut Populations, feq: &Populations, tau: f32) {
    let inv = 1.0 / tau;
    for k in 0..Q {
        f[k] += (feq[k] - f[k]) * inv;
    }
}

/// Gather-form streaming. `courant[k]` is the share of population `k` that
/// crosses a face per sub-step. Population arriving at a closed face (wall,
/// domain edge or a wall corner) reverses into the opposite direction in
/// place, so mass is conserved exactly.
pub fn stream(
    spec: &GridSpec,
    walls: &[bool],
    courant: &[f32; 8],
    f: &[Populations],
    out: &mut [Populations],
) {
    out.par_iter_mut().enumerate().for_each(|(cell, next)| {
        if walls[cell] {
            *next = [0.0; Q];
            return;
        }
        let (x, y) = spec.coords(cell);
        let here = &f[cell];
        let mut acc = [0.0; Q];
        acc[REST] = here[REST];
        for k in 0..REST {
            let c = courant[k];
            let (dx, dy) = NEIGHBOURS[k];
            let mut v = (1.0 - c) * here[k];
            if let Some(up) = step(spec, walls, x, y, -dx, -dy) {
                v += c * f[up][k];
            }
            let o = opposite(k);
            let (ox, oy) = NEIGHBOURS[o];
            if step(spec, walls, x, y, ox, oy).is_none() {
                v += courant[o] * here[o];
            }
            acc[k] = v;
        }
        *next = acc;
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn total(f: &[Populations]) -> f32 {
        f.iter().map(density).sum()
    }

    #[test]
    fn equilibrium_keeps_mass_and_rests_without_direction() {
        let mut w = [0.0; 8];
        w[0] = 3.0;
        w[1] = 1.0;
        let feq = equilibrium(2.0, 0.5, &w);
        assert!((density(&feq) - 2.0).abs() < 1e-6);
        assert!((feq[0] - 0.75).abs() < 1e-6);
        assert!((feq[REST] - 1.0).abs() < 1e-6);

        let still = equilibrium(2.0, 0.5, &[0.0; 8]);
        assert_eq!(still[REST], 2.0);
    }

    #[test]
    fn speed_fraction_ramps_down_past_threshold() {
        assert_eq!(speed_fraction(1.0, 3.5, 5.4, 0.2), 1.0);
        assert!((speed_fraction(5.4, 3.5, 5.4, 0.2) - 0.2).abs() < 1e-6);
        assert!(speed_fraction(4.5, 3.5, 5.4, 0.2) < 1.0);
    }

    #[test]
    fn collision_with_slow_relaxation_moves_halfway() {
        let mut f = [0.0; Q];
        f[REST] = 1.0;
        let mut feq = [0.0; Q];
        feq[0] = 1.0;
        collide(&mut f, &feq, relaxation_time(5.0, 3.5));
        assert_eq!(f[0], 0.5);
        assert_eq!(f[REST], 0.5);
    }

    #[test]
    fn streaming_moves_mass_and_bounces_off_edges() {
        let spec = GridSpec::for_domain([4.0, 1.0], 4).unwrap();
        let walls = vec![false; spec.len()];
        let mut f = vec![[0.0; Q]; spec.len()];
        f[0][0] = 1.0; // eastward at the west end
        f[3][0] = 1.0; // eastward against the east edge
        let courant = [0.5; 8];
        let mut out = vec![[0.0; Q]; spec.len()];
        stream(&spec, &walls, &courant, &f, &mut out);
        assert!((total(&out) - 2.0).abs() < 1e-6);
        assert_eq!(out[1][0], 0.5);
        assert_eq!(out[0][0], 0.5);
        assert_eq!(out[3][0], 0.5);
        assert_eq!(out[3][4], 0.5, "blocked share reverses");
    }

    #[test]
    fn streaming_never_enters_walls() {
        let spec = GridSpec::for_domain([3.0, 3.0], 3).unwrap();
        let mut walls = vec![false; spec.len()];
        walls[spec.index(1, 1)] = true;
        let mut f = vec![[0.1; Q]; spec.len()];
        f[spec.index(1, 1)] = [0.0; Q];
        let courant = [0.7, 0.5, 0.7, 0.5, 0.7, 0.5, 0.7, 0.5];
        let mut out = vec![[0.0; Q]; spec.len()];
        stream(&spec, &walls, &courant, &f, &mut out);
        assert_eq!(density(&out[spec.index(1, 1)]), 0.0);
        assert!((total(&out) - total(&f)).abs() < 1e-5);
        assert!(out.iter().flatten().all(|&v| v >= 0.0));
    }
}
