//! Error taxonomy
//!
//! Validation problems surface before any engine step executes. Numerical
//! trouble inside a run is never an error (it is clamped and counted in
//! [`Diagnostics`](super::Diagnostics)); only configuration that makes a run
//! meaningless is fatal.

use thiserror::Error;

/// Scenario rejected by validation or deserialization.
#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error("scenario has no exits")]
    NoExits,
    #[error("{what} at ({x:.2}, {y:.2}) lies outside the {width}x{height} domain")]
    OutOfBounds {
        what: String,
        x: f32,
        y: f32,
        width: f32,
        height: f32,
    },
    #[error("invalid hazard #{index}: {reason}")]
    InvalidHazard { index: usize, reason: String },
    #[error("invalid scenario field `{field}`: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("malformed scenario: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Unusable engine or preset configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown parameter preset `{0}` (known: {known})", known = super::config::PRESET_NAMES.join(", "))]
    UnknownPreset(String),
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter { name: &'static str, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}

/// Failures of the policy network or its checkpoints.
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("tensor backend error: {0}")]
    Tensor(#[from] candle_core::Error),
    #[error("environment exposes an empty action space")]
    EmptyActionSpace,
    #[error("observation has {got} features, policy expects {expected}")]
    ObservationShape { expected: usize, got: usize },
    #[error("checkpoint is missing tensor `{0}`")]
    MissingTensor(String),
}

/// Umbrella error returned by the public run/train entry points.
#[derive(Debug, Error)]
pub enum EvacError {
    #[error(transparent)]
    Scenario(#[from] ScenarioError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Training(#[from] TrainingError),
}

impl From<candle_core::Error> for EvacError {
    fn from(err: candle_core::Error) -> Self {
        EvacError::Training(TrainingError::Tensor(err))
    }
}

pub type Result<T, E = EvacError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_preset_lists_known_names() {
        let msg = ConfigError::UnknownPreset("turbo".into()).to_string();
        assert!(msg.contains("turbo"));
        assert!(msg.contains("standard"));
    }

    #[test]
    fn scenario_errors_convert_into_umbrella() {
        let err: EvacError = ScenarioError::NoExits.into();
        assert!(matches!(err, EvacError::Scenario(ScenarioError::NoExits)));
        assert_eq!(err.to_string(), "scenario has no exits");
    }
}
