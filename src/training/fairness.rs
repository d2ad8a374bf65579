//! Exit-usage fairness
//!
//! Gini coefficient over per-exit evacuation counts and the way its penalty
//! is charged to the per-step reward.

use serde::{Deserialize, Serialize};

/// Gini coefficient of non-negative `values`: 0 for an even spread,
/// `(n − 1)/n` when everything sits in one bucket. Empty or all-zero input is
/// perfectly fair.
pub fn gini(values: &[f32]) -> f32 {
    let n = values.len();
    let total: f64 = values.iter().map(|&v| v.max(0.0) as f64).sum();
    if n == 0 || total <= 0.0 {
        return 0.0;
    }
    let mut sorted: Vec<f64> = values.iter().map(|&v| v.max(0.0) as f64).collect();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let weighted: f64 = sorted
        .iter()
        .enumerate()
        .map(|(i, &x)| (2.0 * (i + 1) as f64 - n as f64 - 1.0) * x)
        .sum();
    ((weighted / (n as f64 * total)) as f32).clamp(0.0, 1.0)
}

/// How the fairness penalty enters the per-step reward.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FairnessCharge {
    /// Charge the change in Gini since the previous step, so an episode's
    /// total penalty equals the weight times its final Gini.
    #[default]
    Incremental,
    /// Charge the current Gini on every step while agents remain.
    PerStep,
}

/// Per-episode bookkeeping for the fairness term.
#[derive(Clone, Debug, Default)]
pub struct FairnessTracker {
    charge: FairnessCharge,
    last: f32,
}

impl FairnessTracker {
    pub fn new(charge: FairnessCharge) -> Self {
        Self { charge, last: 0.0 }
    }

    pub fn reset(&mut self) {
        self.last = 0.0;
    }

    /// Unweighted penalty for a step that ended with `usage`.
    pub fn penalty(&mut self, usage: &[f32]) -> f32 {
        let current = gini(usage);
        let charged = match self.charge {
            FairnessCharge::Incremental => current - self.last,
            FairnessCharge::PerStep => current,
        };
        self.last = current;
        charged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_usage_is_perfectly_fair() {
        assert_eq!(gini(&[5.0, 5.0, 5.0, 5.0]), 0.0);
        assert_eq!(gini(&[]), 0.0);
        assert_eq!(gini(&[0.0, 0.0]), 0.0);
    }

    #[test]
    fn single_exit_usage_approaches_one() {
        assert!((gini(&[0.0, 10.0]) - 0.5).abs() < 1e-6);
        let mut many = vec![0.0; 99];
        many.push(42.0);
        assert!((gini(&many) - 0.99).abs() < 1e-5);
    }

    #[test]
    fn gini_ignores_order() {
        let a = gini(&[1.0, 2.0, 7.0]);
        let b = gini(&[7.0, 1.0, 2.0]);
        assert!((a - b).abs() < 1e-6);
        assert!(a > 0.0 && a < 2.0 / 3.0);
    }

    #[test]
    fn incremental_charges_telescope_to_final_gini() {
        let mut tracker = FairnessTracker::new(FairnessCharge::Incremental);
        let steps = [[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [3.0, 3.0]];
        let total: f32 = steps.iter().map(|u| tracker.penalty(u)).sum();
        assert!((total - gini(&[3.0, 3.0])).abs() < 1e-6);

        let mut per_step = FairnessTracker::new(FairnessCharge::PerStep);
        assert_eq!(per_step.penalty(&[1.0, 0.0]), 0.5);
        assert_eq!(per_step.penalty(&[1.0, 0.0]), 0.5);
    }
}
