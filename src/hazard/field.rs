//! Hazard Field
//!
//! Evaluates every scenario hazard at a point and time. Each hazard produces
//! effects on a fixed set of channels; overlapping hazards (of the same kind
//! or not) combine by taking the per-channel maximum.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::geometry::{distance, Geometry, Point};
use super::{Hazard, HazardKind};

const FIRE_RADIUS_CAP: f32 = 3.0;
const FLOOD_RADIUS_CAP: f32 = 2.0;
/// Repulsion reaches this many current radii from a hazard centre.
const REPULSION_REACH: f32 = 2.0;
const FIRE_REPULSION: f32 = 5.0;
const STRUCTURAL_REPULSION: f32 = 3.0;
const FLOOD_REPULSION: f32 = 1.0;
const FLOOD_DRIFT: f32 = 0.8;
const AFTERSHOCKS: usize = 3;

/// Local effect of the hazards at one point.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct HazardEffects {
    /// Strongest local intensity in [0, 1].
    pub intensity: f32,
    /// Fraction of free speed lost, in [0, 1].
    pub speed_penalty: f32,
    /// Multiplier on the panic factor, >= 1.
    pub panic_multiplier: f32,
    /// Fraction of local population removed per second.
    pub casualty_rate: f32,
    /// Acceleration pushing away from hazard centres.
    pub repulsion: [f32; 2],
    /// Acceleration along flood flow.
    pub drift: [f32; 2],
    pub dominant: Option<HazardKind>,
}

impl Default for HazardEffects {
    fn default() -> Self {
        Self {
            intensity: 0.0,
            speed_penalty: 0.0,
            panic_multiplier: 1.0,
            casualty_rate: 0.0,
            repulsion: [0.0; 2],
            drift: [0.0; 2],
            dominant: None,
        }
    }
}

impl HazardEffects {
    /// Channel-wise maximum; vectors keep the larger magnitude.
    pub fn combine(&mut self, other: &HazardEffects) {
        if other.intensity > self.intensity {
            self.intensity = other.intensity;
            self.dominant = other.dominant;
        }
        self.speed_penalty = self.speed_penalty.max(other.speed_penalty);
        self.panic_multiplier = self.panic_multiplier.max(other.panic_multiplier);
        self.casualty_rate = self.casualty_rate.max(other.casualty_rate);
        if norm(other.repulsion) > norm(self.repulsion) {
            self.repulsion = other.repulsion;
        }
        if norm(other.drift) > norm(self.drift) {
            self.drift = other.drift;
        }
    }

    /// Remaining share of free speed.
    pub fn speed_factor(&self) -> f32 {
        (1.0 - self.speed_penalty).clamp(0.0, 1.0)
    }
}

#[inline]
fn norm(v: [f32; 2]) -> f32 {
    (v[0] * v[0] + v[1] * v[1]).sqrt()
}

#[derive(Clone, Debug)]
struct Pulse {
    start: f32,
    end: f32,
    intensity: f32,
}

#[derive(Clone, Debug)]
struct Source {
    kind: HazardKind,
    center: Point,
    radius: f32,
    intensity: f32,
    /// Intensity gained per step (fire spread, flood rise).
    growth: f32,
    radius_cap: f32,
    onset: f32,
    duration: Option<f32>,
    pulses: Vec<Pulse>,
    flow: [f32; 2],
}

#[derive(Clone, Debug)]
pub struct HazardField {
    sources: Vec<Source>,
    geometry: Geometry,
    dt: f32,
}

impl HazardField {
    /// `default_spread` is used for fires without their own `spread_rate`.
    /// Aftershock timing is drawn from `seed`.
    pub fn new(
        hazards: &[Hazard],
        geometry: &Geometry,
        dt: f32,
        default_spread: f32,
        seed: u64,
    ) -> Self {
        let mut sources = Vec::with_capacity(hazards.len());
        for (index, hazard) in hazards.iter().enumerate() {
            let source = match hazard {
                Hazard::Fire { position, radius, intensity, spread_rate, onset } => Source {
                    kind: HazardKind::Fire,
                    center: *position,
                    radius: *radius,
                    intensity: *intensity,
                    growth: spread_rate.unwrap_or(default_spread),
                    radius_cap: FIRE_RADIUS_CAP,
                    onset: *onset,
                    duration: None,
                    pulses: Vec::new(),
                    flow: [0.0; 2],
                },
                Hazard::Flood { position, radius, intensity, rise_rate, flow_direction, onset } => {
                    let len = norm(*flow_direction);
                    let flow = if len > 1e-6 {
                        [flow_direction[0] / len, flow_direction[1] / len]
                    } else {
                        [0.0; 2]
                    };
                    Source {
                        kind: HazardKind::Flood,
                        center: *position,
                        radius: *radius,
                        intensity: *intensity,
                        growth: *rise_rate,
                        radius_cap: FLOOD_RADIUS_CAP,
                        onset: *onset,
                        duration: None,
                        pulses: Vec::new(),
                        flow,
                    }
                }
                Hazard::Earthquake { position, radius, intensity, duration, aftershocks, onset } => {
                    let pulses = if *aftershocks {
                        let mut rng = StdRng::seed_from_u64(
                            seed ^ (index as u64 + 1).wrapping_mul(0x9E37_79B9_7F4A_7C15),
                        );
                        (0..AFTERSHOCKS)
                            .map(|k| {
                                let start = duration * (1.0 + k as f32)
                                    + rng.gen_range(0.0..duration * 0.5);
                                Pulse {
                                    start,
                                    end: start + duration / 4.0,
                                    intensity: 0.5 * intensity,
                                }
                            })
                            .collect()
                    } else {
                        Vec::new()
                    };
                    Source {
                        kind: HazardKind::Earthquake,
                        center: *position,
                        radius: *radius,
                        intensity: *intensity,
                        growth: 0.0,
                        radius_cap: 1.0,
                        onset: *onset,
                        duration: Some(*duration),
                        pulses,
                        flow: [0.0; 2],
                    }
                }
                Hazard::Structural { position, radius, intensity } => Source {
                    kind: HazardKind::Structural,
                    center: *position,
                    radius: *radius,
                    intensity: *intensity,
                    growth: 0.0,
                    radius_cap: 1.0,
                    onset: 0.0,
                    duration: None,
                    pulses: Vec::new(),
                    flow: [0.0; 2],
                },
                // Passive elements carry no dynamics.
                _ => continue,
            };
            sources.push(source);
        }

        Self {
            sources,
            geometry: geometry.clone(),
            dt,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }

    pub fn has(&self, kind: HazardKind) -> bool {
        self.sources.iter().any(|s| s.kind == kind)
    }

    /// Largest growth rate among hazards of `kind`.
    pub fn max_growth(&self, kind: HazardKind) -> Option<f32> {
        self.sources
            .iter()
            .filter(|s| s.kind == kind)
            .map(|s| s.growth)
            .reduce(f32::max)
    }

    /// Core intensity and radius of every source at time `t` (seconds).
    pub fn states(&self, t: f32) -> Vec<(HazardKind, f32, f32)> {
        self.sources
            .iter()
            .map(|s| {
                let (i, r) = self.source_state(s, t);
                (s.kind, i, r)
            })
            .collect()
    }

    fn source_state(&self, s: &Source, t: f32) -> (f32, f32) {
        let elapsed = t - s.onset;
        if elapsed < 0.0 {
            return (0.0, s.radius);
        }
        let steps = elapsed / self.dt;
        match s.kind {
            HazardKind::Fire | HazardKind::Flood => {
                let intensity = (s.intensity + s.growth * steps).min(1.0);
                let radius = s.radius * (1.0 + s.growth * steps).min(s.radius_cap);
                (intensity, radius)
            }
            HazardKind::Earthquake => {
                let main = s.duration.unwrap_or(f32::INFINITY);
                let intensity = if elapsed < main {
                    s.intensity
                } else {
                    s.pulses
                        .iter()
                        .filter(|p| elapsed >= p.start && elapsed < p.end)
                        .map(|p| p.intensity)
                        .fold(0.0, f32::max)
                };
                (intensity, s.radius)
            }
            HazardKind::Structural => (s.intensity, s.radius),
            HazardKind::Element => (0.0, s.radius),
        }
    }

    fn local(&self, s: &Source, p: Point, t: f32) -> Option<HazardEffects> {
        let (intensity, radius) = self.source_state(s, t);
        if intensity <= 0.0 {
            return None;
        }
        let d = distance(p, s.center);
        let reach = match s.kind {
            HazardKind::Fire | HazardKind::Structural | HazardKind::Flood => radius * REPULSION_REACH,
            _ => radius,
        };
        if d >= reach {
            return None;
        }
        if s.kind.blocked_by_walls() && !self.geometry.line_of_sight(s.center, p) {
            return None;
        }

        let level = if d < radius { intensity * (1.0 - d / radius) } else { 0.0 };
        let away = if d > 1e-6 {
            [(p[0] - s.center[0]) / d, (p[1] - s.center[1]) / d]
        } else {
            [1.0, 0.0]
        };
        let push = |coeff: f32| {
            let m = intensity * (-d / radius).exp() * coeff;
            [away[0] * m, away[1] * m]
        };

        let mut fx = HazardEffects {
            intensity: level,
            dominant: (level > 0.0).then_some(s.kind),
            ..HazardEffects::default()
        };
        match s.kind {
            HazardKind::Fire => {
                fx.speed_penalty = 0.6 * level;
                fx.casualty_rate = 0.2 * level;
                fx.repulsion = push(FIRE_REPULSION);
            }
            HazardKind::Flood => {
                fx.speed_penalty = 0.5 * level;
                fx.casualty_rate = 0.05 * level;
                fx.repulsion = push(FLOOD_REPULSION);
                fx.drift = [s.flow[0] * level * FLOOD_DRIFT, s.flow[1] * level * FLOOD_DRIFT];
            }
            HazardKind::Earthquake => {
                fx.panic_multiplier = 1.0 + 0.5 * level;
                fx.speed_penalty = 0.2 * level;
            }
            HazardKind::Structural => {
                fx.speed_penalty = 0.7 * level;
                fx.repulsion = push(STRUCTURAL_REPULSION);
            }
            HazardKind::Element => return None,
        }
        Some(fx)
    }

    pub fn effects_at(&self, p: Point, t: f32) -> HazardEffects {
        let mut combined = HazardEffects::default();
        for s in &self.sources {
            if let Some(fx) = self.local(s, p, t) {
                combined.combine(&fx);
            }
        }
        combined
    }

    /// Strongest local intensity of hazards of `kind` at `p`.
    pub fn channel(&self, kind: HazardKind, p: Point, t: f32) -> f32 {
        self.sources
            .iter()
            .filter(|s| s.kind == kind)
            .filter_map(|s| self.local(s, p, t))
            .map(|fx| fx.intensity)
            .fold(0.0, f32::max)
    }
}
