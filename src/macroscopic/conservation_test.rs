//! Mass-balance and coupling tests for the macroscopic engine.
//!
//! Run: cargo test macroscopic::conservation_test -- --nocapture

#[cfg(test)]
mod tests {
    use crate::core::{NoopObserver, RunBudget, RunOutcome, Scenario};
    use crate::field::FieldResult;
    use crate::hazard::Hazard;
    use crate::macroscopic::{run, run_with, MacroParams};

    fn coarse() -> MacroParams {
        MacroParams { grid_resolution: 50, ..MacroParams::default() }
    }

    fn assert_conserved(result: &FieldResult) {
        let pop = result.initial_population;
        for t in 0..result.time_steps {
            assert!(result.density.frame(t).iter().all(|&v| v >= 0.0 && v.is_finite()));
            let err = result.mass_balance_error(t).abs();
            assert!(err < 5e-3 * pop.max(1.0), "mass balance off by {err} at step {t}");
        }
        for pair in result.total_occupancy.windows(2) {
            assert!(pair[1] <= pair[0] + 1e-3);
        }
        for pair in result.evacuated_count.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(result.evacuated() <= pop);
    }

    #[test]
    fn central_exit_drains_the_room() {
        let scenario = Scenario::open_room(vec![[10.0, 10.0]], 50, 300).with_seed(2);
        let result = run(&scenario, &coarse()).unwrap();
        assert_conserved(&result);
        println!(
            "[Macro] evacuated {:.1}/{:.1}",
            result.evacuated(),
            result.initial_population
        );
        assert!(result.evacuated() > 0.7 * result.initial_population);
        assert_eq!(result.exit_usage.len(), 1);
    }

    #[test]
    fn fire_field_grows_and_removes_people() {
        let scenario = Scenario::open_room(vec![[19.0, 10.0]], 60, 80)
            .with_cluster(8.0, 10.0, 60, None)
            .with_hazard(Hazard::Fire {
                position: [12.0, 10.0],
                radius: 1.5,
                intensity: 0.7,
                spread_rate: Some(0.05),
                onset: 0.0,
            });
        let result = run(&scenario, &coarse()).unwrap();
        assert_conserved(&result);

        let fire = result.fire.as_ref().expect("fire series");
        let lit = |t: usize| fire.frame(t).iter().filter(|&&v| v > 0.0).count();
        assert!(lit(result.time_steps - 1) > lit(0));
        assert!(fire.frames().all(|f| f.iter().all(|&v| (0.0..=1.0).contains(&v))));
        assert!(result.hazard_removed.last().copied().unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn delayed_fire_ignites_at_its_onset() {
        let scenario = Scenario::open_room(vec![[19.0, 10.0]], 60, 80)
            .with_cluster(8.0, 10.0, 60, None)
            .with_hazard(Hazard::Fire {
                position: [12.0, 10.0],
                radius: 1.5,
                intensity: 0.7,
                spread_rate: Some(0.05),
                onset: 1.0,
            });
        let result = run(&scenario, &coarse()).unwrap();
        assert_conserved(&result);

        let fire = result.fire.as_ref().expect("fire series");
        let lit = |t: usize| fire.frame(t).iter().filter(|&&v| v > 0.0).count();
        assert_eq!(lit(5), 0, "fire burning before its onset");
        assert!(lit(result.time_steps - 1) > 0);
        assert_eq!(result.hazard_removed[5], 0.0);
        assert!(result.hazard_removed.last().copied().unwrap_or(0.0) > 0.0);
    }

    #[test]
    fn evacuation_never_exceeds_the_population() {
        let params = MacroParams {
            evacuation_coefficient: 100.0,
            ..coarse()
        };
        let scenario = Scenario::open_room(vec![[10.0, 10.0]], 10, 60)
            .with_cluster(10.0, 10.0, 10, None);
        let result = run(&scenario, &params).unwrap();
        assert_conserved(&result);
        assert!(result.evacuated() > 0.95 * result.initial_population);
    }

    #[test]
    fn walls_stop_the_flow() {
        // Exit sealed off behind a full-height wall.
        let scenario = Scenario::open_room(vec![[18.0, 10.0]], 30, 50)
            .with_wall([12.0, 0.0], [12.0, 20.0])
            .with_cluster(5.0, 10.0, 30, None);
        let result = run(&scenario, &coarse()).unwrap();
        assert_conserved(&result);
        assert_eq!(result.evacuated(), 0.0);
        let spec = result.density.spec();
        let last = result.density.frame(result.time_steps - 1);
        for y in 0..spec.height {
            for x in 0..spec.width {
                if spec.center(x, y)[0] > 12.5 {
                    assert_eq!(last[spec.index(x, y)], 0.0);
                }
            }
        }
    }

    #[test]
    fn step_budget_returns_partial_frames() {
        let scenario = Scenario::open_room(vec![[10.0, 10.0]], 20, 100);
        let result = run_with(&scenario, &coarse(), &RunBudget::steps(7), &mut NoopObserver).unwrap();
        assert_eq!(result.time_steps, 7);
        assert_eq!(result.density.len(), 7);
        assert_eq!(result.outcome, RunOutcome::StepBudgetExhausted);
    }
}
