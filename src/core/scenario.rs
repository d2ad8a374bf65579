//! Scenario description
//!
//! The in-memory (and JSON) contract every engine consumes. A scenario is
//! validated once, up front; engines assume a valid scenario.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use serde::{Deserialize, Serialize};

use super::config::ParameterPreset;
use super::error::ScenarioError;
use crate::hazard::{Geometry, Hazard, Point};

fn default_domain() -> [f32; 2] {
    [20.0, 20.0]
}

fn default_panic() -> f32 {
    1.2
}

fn default_cluster_count() -> usize {
    10
}

/// Group of agents starting around a point.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Cluster {
    pub x: f32,
    pub y: f32,
    #[serde(default = "default_cluster_count")]
    pub count: usize,
    /// Exit these agents know and favour.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_exit: Option<usize>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Scenario {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Width and height in metres.
    #[serde(default = "default_domain")]
    pub domain: [f32; 2],
    #[serde(default)]
    pub walls: Vec<[Point; 2]>,
    pub exits: Vec<Point>,
    #[serde(default)]
    pub initial_positions: Vec<Cluster>,
    #[serde(default)]
    pub hazards: Vec<Hazard>,
    pub num_agents: usize,
    #[serde(default = "default_panic")]
    pub panic_factor: f32,
    pub time_steps: usize,
    #[serde(default)]
    pub seed: u64,
}

/// One placed agent.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Placement {
    pub position: Point,
    pub preferred_exit: Option<usize>,
}

impl Scenario {
    /// Empty 20 m square room with the given exits and no clusters.
    pub fn open_room(exits: Vec<Point>, num_agents: usize, time_steps: usize) -> Self {
        Self {
            name: None,
            domain: default_domain(),
            walls: Vec::new(),
            exits,
            initial_positions: Vec::new(),
            hazards: Vec::new(),
            num_agents,
            panic_factor: default_panic(),
            time_steps,
            seed: 0,
        }
    }

    pub fn with_wall(mut self, a: Point, b: Point) -> Self {
        self.walls.push([a, b]);
        self
    }

    pub fn with_cluster(mut self, x: f32, y: f32, count: usize, preferred_exit: Option<usize>) -> Self {
        self.initial_positions.push(Cluster { x, y, count, preferred_exit });
        self
    }

    pub fn with_hazard(mut self, hazard: Hazard) -> Self {
        self.hazards.push(hazard);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Parse and validate.
    pub fn from_json(json: &str) -> Result<Self, ScenarioError> {
        let scenario: Scenario = serde_json::from_str(json)?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Copy of this scenario populated with `preset`'s crowd: its agent count
    /// and panic factor. Agents beyond the clusters are scattered uniformly.
    pub fn with_preset(&self, preset: &ParameterPreset) -> Self {
        Self {
            num_agents: preset.agent_count,
            panic_factor: preset.panic_factor,
            ..self.clone()
        }
    }

    pub fn geometry(&self) -> Geometry {
        Geometry::new(&self.walls, self.domain)
    }

    pub fn validate(&self) -> Result<(), ScenarioError> {
        let [width, height] = self.domain;
        if !(width.is_finite() && height.is_finite() && width > 0.0 && height > 0.0) {
            return Err(ScenarioError::InvalidField {
                field: "domain",
                reason: format!("expected positive extents, got {width}x{height}"),
            });
        }
        if self.exits.is_empty() {
            return Err(ScenarioError::NoExits);
        }
        if self.num_agents == 0 {
            return Err(ScenarioError::InvalidField {
                field: "num_agents",
                reason: "must be positive".into(),
            });
        }
        if self.time_steps == 0 {
            return Err(ScenarioError::InvalidField {
                field: "time_steps",
                reason: "must be positive".into(),
            });
        }
        if !(self.panic_factor.is_finite() && self.panic_factor > 0.0) {
            return Err(ScenarioError::InvalidField {
                field: "panic_factor",
                reason: format!("expected a finite value > 0, got {}", self.panic_factor),
            });
        }

        let inside = |what: String, p: Point| -> Result<(), ScenarioError> {
            let ok = p.iter().all(|c| c.is_finite())
                && (0.0..=width).contains(&p[0])
                && (0.0..=height).contains(&p[1]);
            if ok {
                Ok(())
            } else {
                Err(ScenarioError::OutOfBounds { what, x: p[0], y: p[1], width, height })
            }
        };

        for (i, [a, b]) in self.walls.iter().enumerate() {
            inside(format!("wall #{i} start"), *a)?;
            inside(format!("wall #{i} end"), *b)?;
        }
        for (i, e) in self.exits.iter().enumerate() {
            inside(format!("exit #{i}"), *e)?;
        }
        for (i, c) in self.initial_positions.iter().enumerate() {
            inside(format!("cluster #{i}"), [c.x, c.y])?;
            if let Some(pref) = c.preferred_exit {
                if pref >= self.exits.len() {
                    return Err(ScenarioError::InvalidField {
                        field: "initial_positions",
                        reason: format!(
                            "cluster #{i} prefers exit {pref} but only {} exits exist",
                            self.exits.len()
                        ),
                    });
                }
            }
        }
        for (i, h) in self.hazards.iter().enumerate() {
            inside(format!("hazard #{i}"), h.position())?;
            h.validate(i)?;
        }
        Ok(())
    }

    /// Seeded initial population. Clusters fill in order with a Normal
    /// scatter of `spread` metres until `num_agents` is reached; any
    /// remainder is spread uniformly over the domain. Points inside walls
    /// are redrawn a few times before being accepted.
    pub fn place_agents(&self, spread: f32) -> Vec<Placement> {
        let mut rng = StdRng::seed_from_u64(self.seed);
        let geometry = self.geometry();
        let margin = 0.1_f32.min(self.domain[0].min(self.domain[1]) * 0.5);
        let scatter = Normal::new(0.0_f32, spread.max(0.0)).ok();
        let mut placed = Vec::with_capacity(self.num_agents);

        'clusters: for cluster in &self.initial_positions {
            for _ in 0..cluster.count {
                if placed.len() == self.num_agents {
                    break 'clusters;
                }
                let mut p = [cluster.x, cluster.y];
                for _attempt in 0..8 {
                    let (dx, dy) = match &scatter {
                        Some(n) => (n.sample(&mut rng), n.sample(&mut rng)),
                        None => (0.0, 0.0),
                    };
                    p = geometry.clamp([cluster.x + dx, cluster.y + dy], margin);
                    if !geometry.blocked(p) {
                        break;
                    }
                }
                placed.push(Placement { position: p, preferred_exit: cluster.preferred_exit });
            }
        }

        while placed.len() < self.num_agents {
            let mut p = [0.0, 0.0];
            for _attempt in 0..8 {
                p = geometry.clamp(
                    [
                        rng.gen_range(0.0..self.domain[0]),
                        rng.gen_range(0.0..self.domain[1]),
                    ],
                    margin,
                );
                if !geometry.blocked(p) {
                    break;
                }
            }
            placed.push(Placement { position: p, preferred_exit: None });
        }
        placed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::PresetOverrides;

    const OFFICE: &str = r#"{
        "walls": [[[2, 2], [18, 2]], [[18, 2], [18, 18]], [[18, 18], [2, 18]], [[2, 18], [2, 2]]],
        "exits": [[10, 18]],
        "initial_positions": [{"x": 5, "y": 5, "count": 30}, {"x": 15, "y": 15, "count": 20}],
        "hazards": [{"type": "fire", "position": [8, 8], "radius": 2.0, "intensity": 0.8}],
        "num_agents": 50,
        "time_steps": 200
    }"#;

    #[test]
    fn parses_with_defaults() {
        let s = Scenario::from_json(OFFICE).unwrap();
        assert_eq!(s.domain, [20.0, 20.0]);
        assert_eq!(s.panic_factor, 1.2);
        assert_eq!(s.seed, 0);
        assert_eq!(s.walls.len(), 4);
    }

    #[test]
    fn rejects_missing_exits() {
        let mut s = Scenario::from_json(OFFICE).unwrap();
        s.exits.clear();
        assert!(matches!(s.validate(), Err(ScenarioError::NoExits)));
    }

    #[test]
    fn rejects_out_of_bounds_exit() {
        let mut s = Scenario::from_json(OFFICE).unwrap();
        s.exits.push([25.0, 5.0]);
        assert!(matches!(s.validate(), Err(ScenarioError::OutOfBounds { .. })));
    }

    #[test]
    fn rejects_zero_agents_and_unknown_hazard() {
        let mut s = Scenario::from_json(OFFICE).unwrap();
        s.num_agents = 0;
        assert!(s.validate().is_err());

        let bad = OFFICE.replace("\"fire\"", "\"plague\"");
        assert!(matches!(Scenario::from_json(&bad), Err(ScenarioError::Malformed(_))));
    }

    #[test]
    fn rejects_dangling_preferred_exit() {
        let s = Scenario::open_room(vec![[1.0, 1.0]], 5, 10).with_cluster(5.0, 5.0, 5, Some(2));
        assert!(matches!(
            s.validate(),
            Err(ScenarioError::InvalidField { field: "initial_positions", .. })
        ));
    }

    #[test]
    fn placement_is_seeded_and_fills_the_population() {
        let s = Scenario::from_json(OFFICE).unwrap();
        let a = s.place_agents(1.0);
        let b = s.place_agents(1.0);
        assert_eq!(a, b);
        assert_eq!(a.len(), 50);
        let other = s.clone().with_seed(9).place_agents(1.0);
        assert_ne!(a, other);
        let g = s.geometry();
        assert!(a.iter().all(|p| g.contains(p.position)));
    }

    #[test]
    fn clusters_truncate_and_remainder_is_uniform() {
        let s = Scenario::open_room(vec![[10.0, 10.0]], 12, 10)
            .with_cluster(3.0, 3.0, 8, Some(0))
            .with_cluster(17.0, 17.0, 8, None);
        let placed = s.place_agents(0.5);
        assert_eq!(placed.len(), 12);
        assert_eq!(placed.iter().filter(|p| p.preferred_exit == Some(0)).count(), 8);

        let sparse = Scenario::open_room(vec![[10.0, 10.0]], 10, 10).with_cluster(3.0, 3.0, 4, None);
        assert_eq!(sparse.place_agents(0.5).len(), 10);
    }

    #[test]
    fn preset_sets_the_crowd_and_placement_fills_it() {
        let scenario = Scenario::from_json(OFFICE).unwrap();
        let crowded = scenario.with_preset(&ParameterPreset::named("crowded").unwrap());
        assert_eq!(crowded.num_agents, 300);
        assert_eq!(crowded.panic_factor, 1.2);
        assert_eq!(crowded.initial_positions, scenario.initial_positions);
        crowded.validate().unwrap();
        let placed = crowded.place_agents(0.5);
        assert_eq!(placed.len(), 300);
        assert!(placed.iter().all(|p| !crowded.geometry().blocked(p.position)));

        let calm = ParameterPreset::named("emergency")
            .unwrap()
            .with_overrides(&PresetOverrides { agent_count: Some(10), panic_factor: Some(1.0), ..Default::default() });
        let small = scenario.with_preset(&calm);
        assert_eq!(small.num_agents, 10);
        assert_eq!(small.panic_factor, 1.0);
        assert_eq!(small.place_agents(0.5).len(), 10);
    }
}
