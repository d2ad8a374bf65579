//! Core types
//!
//! Scenario schema and validation, parameter presets, the error taxonomy,
//! progress reporting, run budgets and routing guidance.

pub mod config;
pub mod error;
pub mod progress;
pub mod routing;
pub mod samples;
pub mod scenario;

use serde::{Deserialize, Serialize};

pub use config::{ParameterPreset, PresetOverrides, PRESET_NAMES};
pub use error::{ConfigError, EvacError, Result, ScenarioError, TrainingError};
pub use progress::{
    ChannelObserver, EpisodeProgress, FnObserver, NoopObserver, ProgressEvent, ProgressObserver,
    RunBudget, RunControl, RunOutcome, SharedProgress, StepProgress,
};
pub use routing::RoutingBias;
pub use scenario::{Cluster, Placement, Scenario};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Microscopic,
    Mesoscopic,
    Macroscopic,
}

impl std::str::FromStr for EngineKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "micro" | "microscopic" => Ok(EngineKind::Microscopic),
            "meso" | "mesoscopic" => Ok(EngineKind::Mesoscopic),
            "macro" | "macroscopic" => Ok(EngineKind::Macroscopic),
            other => Err(ConfigError::invalid("engine", format!("unknown engine `{other}`"))),
        }
    }
}

/// Numerical events a run absorbed instead of failing.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Diagnostics {
    /// Cells (or agents) whose state was NaN/negative and got reset.
    pub clamped_values: u64,
    /// Agent speeds cut to the panic/crowd cap.
    pub speed_caps: u64,
    /// Agent moves reverted because they crossed a wall.
    pub wall_reverts: u64,
    /// Inner sub-steps per output step chosen for CFL stability.
    pub substeps: usize,
    /// Diffusion coefficient actually used when the requested one was
    /// clamped for stability.
    pub clamped_diffusion: Option<f32>,
}

impl Diagnostics {
    pub fn is_clean(&self) -> bool {
        self.clamped_values == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn engine_kind_parses_short_and_long_names() {
        assert_eq!("meso".parse::<EngineKind>().unwrap(), EngineKind::Mesoscopic);
        assert_eq!("macroscopic".parse::<EngineKind>().unwrap(), EngineKind::Macroscopic);
        assert!("nano".parse::<EngineKind>().is_err());
        assert_eq!(serde_json::to_string(&EngineKind::Microscopic).unwrap(), "\"microscopic\"");
    }
}
