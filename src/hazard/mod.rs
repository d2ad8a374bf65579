//! Hazard Model
//!
//! Closed set of hazard kinds shared by every engine. A scenario lists
//! hazards in JSON (`{"type": "fire", ...}`); [`HazardField`] turns them into
//! time-dependent local effects.

pub mod field;
pub mod geometry;

use serde::{Deserialize, Serialize};

use crate::core::error::ScenarioError;

pub use field::{HazardEffects, HazardField};
pub use geometry::{Geometry, Point, Wall, WallContact};

fn default_radius() -> f32 {
    2.0
}

fn default_intensity() -> f32 {
    1.0
}

fn default_quake_duration() -> f32 {
    10.0
}

fn default_rise_rate() -> f32 {
    0.02
}

fn default_flow() -> [f32; 2] {
    [1.0, 0.0]
}

/// Scenario hazard. Unknown `type` tags fail deserialization.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Hazard {
    Fire {
        position: Point,
        #[serde(default = "default_radius")]
        radius: f32,
        #[serde(default = "default_intensity")]
        intensity: f32,
        /// Per-step growth; falls back to the preset's `fire_spread_rate`.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        spread_rate: Option<f32>,
        /// Seconds before ignition.
        #[serde(default)]
        onset: f32,
    },
    Earthquake {
        position: Point,
        #[serde(default = "default_radius")]
        radius: f32,
        #[serde(default = "default_intensity")]
        intensity: f32,
        /// Seconds of main shock.
        #[serde(default = "default_quake_duration")]
        duration: f32,
        #[serde(default)]
        aftershocks: bool,
        #[serde(default)]
        onset: f32,
    },
    Flood {
        position: Point,
        #[serde(default = "default_radius")]
        radius: f32,
        #[serde(default = "default_intensity")]
        intensity: f32,
        #[serde(default = "default_rise_rate")]
        rise_rate: f32,
        #[serde(default = "default_flow")]
        flow_direction: [f32; 2],
        #[serde(default)]
        onset: f32,
    },
    Structural {
        position: Point,
        #[serde(default = "default_radius")]
        radius: f32,
        #[serde(default = "default_intensity")]
        intensity: f32,
    },
    Window(Element),
    Door(Element),
    Floor(Element),
    Ceiling(Element),
    Soil(Element),
    Grass(Element),
    Chair(Element),
    Table(Element),
}

/// Passive scenery. Carried through for geometry consumers, no dynamics.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Element {
    pub position: Point,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub radius: Option<f32>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HazardKind {
    Fire,
    Earthquake,
    Flood,
    Structural,
    Element,
}

impl HazardKind {
    pub const DYNAMIC: [HazardKind; 4] = [
        HazardKind::Fire,
        HazardKind::Earthquake,
        HazardKind::Flood,
        HazardKind::Structural,
    ];

    /// Whether walls shield a point from this kind of hazard.
    pub fn blocked_by_walls(self) -> bool {
        matches!(self, HazardKind::Fire | HazardKind::Structural)
    }
}

impl Hazard {
    pub fn kind(&self) -> HazardKind {
        match self {
            Hazard::Fire { .. } => HazardKind::Fire,
            Hazard::Earthquake { .. } => HazardKind::Earthquake,
            Hazard::Flood { .. } => HazardKind::Flood,
            Hazard::Structural { .. } => HazardKind::Structural,
            _ => HazardKind::Element,
        }
    }

    pub fn position(&self) -> Point {
        match self {
            Hazard::Fire { position, .. }
            | Hazard::Earthquake { position, .. }
            | Hazard::Flood { position, .. }
            | Hazard::Structural { position, .. } => *position,
            Hazard::Window(e)
            | Hazard::Door(e)
            | Hazard::Floor(e)
            | Hazard::Ceiling(e)
            | Hazard::Soil(e)
            | Hazard::Grass(e)
            | Hazard::Chair(e)
            | Hazard::Table(e) => e.position,
        }
    }

    /// Parameter range checks; position bounds are checked by the scenario.
    pub fn validate(&self, index: usize) -> Result<(), ScenarioError> {
        let bad = |reason: String| ScenarioError::InvalidHazard { index, reason };
        let check_core = |radius: f32, intensity: f32| -> Result<(), ScenarioError> {
            if !(radius.is_finite() && radius > 0.0) {
                return Err(bad(format!("radius must be > 0, got {radius}")));
            }
            if !(0.0..=1.0).contains(&intensity) {
                return Err(bad(format!("intensity must lie in [0, 1], got {intensity}")));
            }
            Ok(())
        };
        let check_onset = |onset: f32| -> Result<(), ScenarioError> {
            if onset.is_finite() && onset >= 0.0 {
                Ok(())
            } else {
                Err(bad(format!("onset must be >= 0, got {onset}")))
            }
        };

        match self {
            Hazard::Fire { radius, intensity, spread_rate, onset, .. } => {
                check_core(*radius, *intensity)?;
                check_onset(*onset)?;
                if let Some(rate) = spread_rate {
                    if !(rate.is_finite() && *rate >= 0.0) {
                        return Err(bad(format!("spread_rate must be >= 0, got {rate}")));
                    }
                }
            }
            Hazard::Earthquake { radius, intensity, duration, onset, .. } => {
                check_core(*radius, *intensity)?;
                check_onset(*onset)?;
                if !(duration.is_finite() && *duration > 0.0) {
                    return Err(bad(format!("duration must be > 0, got {duration}")));
                }
            }
            Hazard::Flood { radius, intensity, rise_rate, flow_direction, onset, .. } => {
                check_core(*radius, *intensity)?;
                check_onset(*onset)?;
                if !(rise_rate.is_finite() && *rise_rate >= 0.0) {
                    return Err(bad(format!("rise_rate must be >= 0, got {rise_rate}")));
                }
                if !flow_direction.iter().all(|c| c.is_finite()) {
                    return Err(bad("flow_direction must be finite".to_string()));
                }
            }
            Hazard::Structural { radius, intensity, .. } => check_core(*radius, *intensity)?,
            Hazard::Window(e)
            | Hazard::Door(e)
            | Hazard::Floor(e)
            | Hazard::Ceiling(e)
            | Hazard::Soil(e)
            | Hazard::Grass(e)
            | Hazard::Chair(e)
            | Hazard::Table(e) => {
                if let Some(r) = e.radius {
                    if !(r.is_finite() && r >= 0.0) {
                        return Err(bad(format!("radius must be >= 0, got {r}")));
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_fire_with_defaults() {
        let h: Hazard =
            serde_json::from_str(r#"{"type": "fire", "position": [3.0, 4.0]}"#).unwrap();
        match h {
            Hazard::Fire { radius, intensity, spread_rate, onset, .. } => {
                assert_eq!(radius, 2.0);
                assert_eq!(intensity, 1.0);
                assert_eq!(spread_rate, None);
                assert_eq!(onset, 0.0);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn parses_passive_elements() {
        let h: Hazard =
            serde_json::from_str(r#"{"type": "chair", "position": [1.0, 1.0]}"#).unwrap();
        assert_eq!(h.kind(), HazardKind::Element);
        assert_eq!(h.position(), [1.0, 1.0]);
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err = serde_json::from_str::<Hazard>(r#"{"type": "meteor", "position": [1.0, 1.0]}"#);
        assert!(err.is_err());
    }

    #[test]
    fn out_of_range_intensity_fails_validation() {
        let h = Hazard::Structural { position: [1.0, 1.0], radius: 1.0, intensity: 1.5 };
        assert!(matches!(h.validate(3), Err(ScenarioError::InvalidHazard { index: 3, .. })));
    }

    #[test]
    fn serializes_with_type_tag() {
        let h = Hazard::Flood {
            position: [2.0, 2.0],
            radius: 3.0,
            intensity: 0.4,
            rise_rate: 0.01,
            flow_direction: [0.0, 1.0],
            onset: 0.0,
        };
        let v = serde_json::to_value(&h).unwrap();
        assert_eq!(v["type"], "flood");
        let back: Hazard = serde_json::from_value(v).unwrap();
        assert_eq!(back, h);
    }
}
