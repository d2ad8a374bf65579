//! Scenario-level tests for the microscopic engine.
//!
//! Run: cargo test microscopic::evacuation_test -- --nocapture

#[cfg(test)]
mod tests {
    use crate::core::{NoopObserver, RunBudget, RunOutcome, Scenario};
    use crate::hazard::Hazard;
    use crate::microscopic::{run, run_with, MicroParams, MicroscopicResult};

    /// 20 m open square, one central exit, 50 agents spread uniformly.
    fn central_exit() -> Scenario {
        Scenario::open_room(vec![[10.0, 10.0]], 50, 100).with_seed(11)
    }

    fn assert_monotone(result: &MicroscopicResult) {
        for pair in result.evacuated_count.windows(2) {
            assert!(pair[1] >= pair[0]);
        }
        assert!(result.evacuated() <= result.num_agents);
    }

    #[test]
    fn open_room_clears_before_the_step_budget() {
        let result = run(&central_exit(), &MicroParams::default()).unwrap();
        assert_monotone(&result);
        assert_eq!(result.evacuated_count.len(), 100);
        let done = result
            .completion_step()
            .expect("every agent should reach the exit");
        println!("[Micro] central exit cleared after {} steps", done + 1);
        assert!(done < 99, "cleared only at step {}", done + 1);
        assert_eq!(result.exit_usage, vec![50]);
        assert_eq!(result.outcome, RunOutcome::Completed);
        assert!(result.positions.last().unwrap().iter().all(Option::is_none));
    }

    #[test]
    fn fire_on_the_approach_makes_evacuation_worse() {
        let baseline = run(&central_exit(), &MicroParams::default()).unwrap();
        let fire = Hazard::Fire {
            position: [11.5, 10.0],
            radius: 1.5,
            intensity: 0.5,
            spread_rate: Some(0.05),
            onset: 0.0,
        };
        let burning = run(&central_exit().with_hazard(fire), &MicroParams::default()).unwrap();
        assert_monotone(&burning);

        let slower = match (baseline.completion_step(), burning.completion_step()) {
            (Some(a), Some(b)) => b > a,
            (Some(_), None) => true,
            _ => false,
        };
        assert!(
            slower || burning.evacuated() < baseline.evacuated(),
            "baseline {:?}/{}, fire {:?}/{}",
            baseline.completion_step(),
            baseline.evacuated(),
            burning.completion_step(),
            burning.evacuated()
        );
    }

    #[test]
    fn delayed_fire_only_acts_after_its_onset() {
        let fire = |onset: f32| Hazard::Fire {
            position: [11.5, 10.0],
            radius: 1.5,
            intensity: 0.5,
            spread_rate: Some(0.05),
            onset,
        };
        let baseline = run(&central_exit(), &MicroParams::default()).unwrap();
        let never = run(&central_exit().with_hazard(fire(1.0e4)), &MicroParams::default()).unwrap();
        assert_eq!(never.positions, baseline.positions);

        let delayed = run(&central_exit().with_hazard(fire(2.0)), &MicroParams::default()).unwrap();
        assert_monotone(&delayed);
        assert_eq!(delayed.positions[..15], baseline.positions[..15]);
        assert_ne!(delayed.positions, baseline.positions);
    }

    #[test]
    fn agent_spawned_on_an_exit_leaves_in_the_first_step() {
        let scenario = Scenario::open_room(vec![[4.0, 4.0], [16.0, 16.0]], 1, 5)
            .with_cluster(16.0, 16.0, 1, None);
        let params = MicroParams { cluster_spread: 0.0, ..MicroParams::default() };
        let result = run(&scenario, &params).unwrap();
        assert_eq!(result.evacuated_count[0], 1);
        assert_eq!(result.exit_usage, vec![0, 1]);
        assert_eq!(result.evacuation_steps, vec![Some(1)]);
        assert_eq!(result.positions[0], vec![None]);
    }

    #[test]
    fn identical_inputs_give_identical_trajectories() {
        let scenario = central_exit().with_cluster(4.0, 4.0, 20, None);
        let a = run(&scenario, &MicroParams::default()).unwrap();
        let b = run(&scenario, &MicroParams::default()).unwrap();
        assert_eq!(a.positions, b.positions);
        assert_eq!(a.evacuated_count, b.evacuated_count);
    }

    #[test]
    fn step_budget_truncates_and_reports_it() {
        let result = run_with(
            &central_exit(),
            &MicroParams::default(),
            &RunBudget::steps(10),
            &mut NoopObserver,
        )
        .unwrap();
        assert_eq!(result.evacuated_count.len(), 10);
        assert_eq!(result.outcome, RunOutcome::StepBudgetExhausted);
        assert!(result.evacuated() < 50);
    }

    #[test]
    fn observer_abort_cancels_the_run() {
        use crate::core::{FnObserver, ProgressEvent, RunControl};
        let mut stop_at_five = FnObserver(|e: ProgressEvent| match e {
            ProgressEvent::Step(s) if s.step == 5 => RunControl::Abort,
            _ => RunControl::Continue,
        });
        let result =
            run_with(&central_exit(), &MicroParams::default(), &RunBudget::unlimited(), &mut stop_at_five)
                .unwrap();
        assert_eq!(result.outcome, RunOutcome::Cancelled);
        assert_eq!(result.evacuated_count.len(), 5);
    }

    #[test]
    fn invalid_scenario_fails_before_running() {
        let mut scenario = central_exit();
        scenario.exits.clear();
        assert!(run(&scenario, &MicroParams::default()).is_err());
    }
}
