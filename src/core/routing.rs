//! Routing guidance shared by the engines and the trainer.

use serde::{Deserialize, Serialize};

/// Per-exit attraction weights set by a routing controller, in metres of
/// path length. All-zero means no guidance.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RoutingBias {
    pub weights: Vec<f32>,
}

impl RoutingBias {
    pub fn neutral(exits: usize) -> Self {
        Self { weights: vec![0.0; exits] }
    }

    pub fn boost(exits: usize, exit: usize, weight: f32) -> Self {
        let mut bias = Self::neutral(exits);
        if let Some(w) = bias.weights.get_mut(exit) {
            *w = weight;
        }
        bias
    }

    /// Exit with the largest positive weight.
    pub fn favoured(&self) -> Option<usize> {
        self.weights
            .iter()
            .enumerate()
            .filter(|(_, w)| **w > 0.0)
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(e, _)| e)
    }

    pub fn weight(&self, exit: usize) -> f32 {
        self.weights.get(exit).copied().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn routing_bias_favours_largest_weight() {
        assert_eq!(RoutingBias::neutral(3).favoured(), None);
        let b = RoutingBias::boost(3, 2, 6.0);
        assert_eq!(b.favoured(), Some(2));
        assert_eq!(b.weight(2), 6.0);
        assert_eq!(b.weight(7), 0.0);
    }
}
