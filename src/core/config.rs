use serde::{Deserialize, Serialize};

use super::error::ConfigError;

/// Names accepted by [`ParameterPreset::named`].
pub const PRESET_NAMES: [&str; 6] = [
    "standard",
    "emergency",
    "crowded",
    "high_density",
    "fire_scenario",
    "high_detail",
];

/// Named bundle of engine options shared by all three scales.
///
/// `grid_size` drives the mesoscopic lattice, `grid_resolution` the
/// macroscopic solver. `agent_count` and `panic_factor` populate the scenario
/// a run is started on (see [`Scenario::with_preset`](super::Scenario::with_preset)).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ParameterPreset {
    pub name: String,
    pub grid_size: usize,
    pub grid_resolution: usize,
    pub agent_count: usize,
    pub panic_factor: f32,
    pub density_threshold: f32,
    pub diffusion_coefficient: f32,
    pub fire_spread_rate: f32,
    pub evacuation_coefficient: f32,
}

impl ParameterPreset {
    #[allow(clippy::too_many_arguments)]
    fn new(
        name: &str,
        grid_size: usize,
        grid_resolution: usize,
        agent_count: usize,
        panic_factor: f32,
        density_threshold: f32,
        diffusion_coefficient: f32,
        fire_spread_rate: f32,
        evacuation_coefficient: f32,
    ) -> Self {
        Self {
            name: name.to_string(),
            grid_size,
            grid_resolution,
            agent_count,
            panic_factor,
            density_threshold,
            diffusion_coefficient,
            fire_spread_rate,
            evacuation_coefficient,
        }
    }

    pub fn named(name: &str) -> Result<Self, ConfigError> {
        let preset = match name {
            "standard" => Self::new(name, 50, 100, 100, 1.2, 3.5, 0.8, 0.0, 1.0),
            "emergency" => Self::new(name, 50, 100, 100, 1.5, 3.5, 0.8, 0.03, 1.5),
            "crowded" => Self::new(name, 50, 100, 300, 1.2, 3.0, 0.6, 0.0, 1.0),
            "high_density" => Self::new(name, 50, 100, 100, 1.2, 5.0, 0.5, 0.0, 1.0),
            "fire_scenario" => Self::new(name, 60, 120, 100, 1.5, 3.0, 1.0, 0.05, 1.5),
            "high_detail" => Self::new(name, 80, 200, 100, 1.2, 3.5, 0.8, 0.03, 1.2),
            other => return Err(ConfigError::UnknownPreset(other.to_string())),
        };
        Ok(preset)
    }

    /// Resolve a preset by name (default `standard`) and apply overrides.
    pub fn resolve(name: Option<&str>, overrides: &PresetOverrides) -> Result<Self, ConfigError> {
        let preset = Self::named(name.unwrap_or("standard"))?.with_overrides(overrides);
        preset.validate()?;
        Ok(preset)
    }

    pub fn with_overrides(mut self, overrides: &PresetOverrides) -> Self {
        if let Some(v) = overrides.grid_size {
            self.grid_size = v;
        }
        if let Some(v) = overrides.grid_resolution {
            self.grid_resolution = v;
        }
        if let Some(v) = overrides.agent_count {
            self.agent_count = v;
        }
        if let Some(v) = overrides.panic_factor {
            self.panic_factor = v;
        }
        if let Some(v) = overrides.density_threshold {
            self.density_threshold = v;
        }
        if let Some(v) = overrides.diffusion_coefficient {
            self.diffusion_coefficient = v;
        }
        if let Some(v) = overrides.fire_spread_rate {
            self.fire_spread_rate = v;
        }
        if let Some(v) = overrides.evacuation_coefficient {
            self.evacuation_coefficient = v;
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.grid_size < 2 {
            return Err(ConfigError::invalid("grid_size", "must be at least 2 cells"));
        }
        if self.grid_resolution < 2 {
            return Err(ConfigError::invalid("grid_resolution", "must be at least 2 cells"));
        }
        if self.agent_count == 0 {
            return Err(ConfigError::invalid("agent_count", "must be positive"));
        }
        positive("panic_factor", self.panic_factor)?;
        positive("density_threshold", self.density_threshold)?;
        non_negative("diffusion_coefficient", self.diffusion_coefficient)?;
        non_negative("fire_spread_rate", self.fire_spread_rate)?;
        non_negative("evacuation_coefficient", self.evacuation_coefficient)?;
        Ok(())
    }
}

impl Default for ParameterPreset {
    fn default() -> Self {
        Self::new("standard", 50, 100, 100, 1.2, 3.5, 0.8, 0.0, 1.0)
    }
}

/// Caller-supplied replacements for any subset of a preset.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PresetOverrides {
    pub grid_size: Option<usize>,
    pub grid_resolution: Option<usize>,
    pub agent_count: Option<usize>,
    pub panic_factor: Option<f32>,
    pub density_threshold: Option<f32>,
    pub diffusion_coefficient: Option<f32>,
    pub fire_spread_rate: Option<f32>,
    pub evacuation_coefficient: Option<f32>,
}

pub(crate) fn positive(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("expected a finite value > 0, got {value}")))
    }
}

pub(crate) fn non_negative(name: &'static str, value: f32) -> Result<(), ConfigError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::invalid(name, format!("expected a finite value >= 0, got {value}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_listed_preset_resolves_and_validates() {
        for name in PRESET_NAMES {
            let preset = ParameterPreset::named(name).unwrap();
            assert_eq!(preset.name, name);
            preset.validate().unwrap();
        }
    }

    #[test]
    fn fire_scenario_values() {
        let p = ParameterPreset::named("fire_scenario").unwrap();
        assert_eq!(p.grid_size, 60);
        assert_eq!(p.grid_resolution, 120);
        assert_eq!(p.panic_factor, 1.5);
        assert_eq!(p.fire_spread_rate, 0.05);
        assert_eq!(p.evacuation_coefficient, 1.5);
    }

    #[test]
    fn overrides_replace_only_given_fields() {
        let overrides = PresetOverrides {
            grid_size: Some(32),
            panic_factor: Some(2.0),
            ..Default::default()
        };
        let p = ParameterPreset::resolve(Some("crowded"), &overrides).unwrap();
        assert_eq!(p.grid_size, 32);
        assert_eq!(p.panic_factor, 2.0);
        assert_eq!(p.agent_count, 300);
        assert_eq!(p.grid_resolution, 100);
    }

    #[test]
    fn unknown_preset_is_rejected() {
        let err = ParameterPreset::named("turbo").unwrap_err();
        assert!(matches!(err, ConfigError::UnknownPreset(ref n) if n == "turbo"));
    }

    #[test]
    fn zero_resolution_is_fatal() {
        let overrides = PresetOverrides {
            grid_resolution: Some(0),
            ..Default::default()
        };
        let err = ParameterPreset::resolve(None, &overrides).unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidParameter { name: "grid_resolution", .. }
        ));
    }

    #[test]
    fn overrides_deserialize_from_partial_json() {
        let o: PresetOverrides = serde_json::from_str(r#"{"fire_spread_rate": 0.1}"#).unwrap();
        assert_eq!(o.fire_spread_rate, Some(0.1));
        assert_eq!(o.grid_size, None);
    }
}
