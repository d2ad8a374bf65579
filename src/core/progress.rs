//! Progress reporting, cancellation and run budgets
//!
//! Engines and the trainer report through a [`ProgressObserver`] passed in by
//! the caller. There is no global status; an observer that wants to publish
//! to other threads uses a channel or [`SharedProgress`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use super::EngineKind;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunControl {
    Continue,
    Abort,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct StepProgress {
    pub engine: EngineKind,
    pub step: usize,
    pub total_steps: usize,
    pub evacuated: f32,
    pub population: f32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EpisodeProgress {
    pub episode: usize,
    pub total_episodes: usize,
    pub reward: f32,
    pub evacuation_time: f32,
    pub gini: f32,
    pub evacuated: f32,
    pub diverged: bool,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub enum ProgressEvent {
    Step(StepProgress),
    Episode(EpisodeProgress),
}

pub trait ProgressObserver {
    fn on_step(&mut self, _progress: &StepProgress) -> RunControl {
        RunControl::Continue
    }

    fn on_episode(&mut self, _progress: &EpisodeProgress) -> RunControl {
        RunControl::Continue
    }
}

pub struct NoopObserver;

impl ProgressObserver for NoopObserver {}

/// Adapts a closure over [`ProgressEvent`].
pub struct FnObserver<F>(pub F);

impl<F> ProgressObserver for FnObserver<F>
where
    F: FnMut(ProgressEvent) -> RunControl,
{
    fn on_step(&mut self, progress: &StepProgress) -> RunControl {
        (self.0)(ProgressEvent::Step(progress.clone()))
    }

    fn on_episode(&mut self, progress: &EpisodeProgress) -> RunControl {
        (self.0)(ProgressEvent::Episode(progress.clone()))
    }
}

/// Forwards events over an mpsc channel. Step events are thinned to every
/// `step_stride`-th step; a dropped receiver does not stop the run.
pub struct ChannelObserver {
    tx: Sender<ProgressEvent>,
    step_stride: usize,
}

impl ChannelObserver {
    pub fn new(tx: Sender<ProgressEvent>, step_stride: usize) -> Self {
        Self {
            tx,
            step_stride: step_stride.max(1),
        }
    }
}

impl ProgressObserver for ChannelObserver {
    fn on_step(&mut self, progress: &StepProgress) -> RunControl {
        if progress.step % self.step_stride == 0 || progress.step == progress.total_steps {
            let _ = self.tx.send(ProgressEvent::Step(progress.clone()));
        }
        RunControl::Continue
    }

    fn on_episode(&mut self, progress: &EpisodeProgress) -> RunControl {
        let _ = self.tx.send(ProgressEvent::Episode(progress.clone()));
        RunControl::Continue
    }
}

/// Latest progress, readable from other threads.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub last_step: Option<StepProgress>,
    pub last_episode: Option<EpisodeProgress>,
    pub episodes_seen: usize,
}

/// Clonable handle: one clone observes the run, others read the snapshot or
/// request cancellation.
#[derive(Clone, Default)]
pub struct SharedProgress {
    snapshot: Arc<RwLock<ProgressSnapshot>>,
    cancelled: Arc<AtomicBool>,
}

impl SharedProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.read().clone()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    fn control(&self) -> RunControl {
        if self.is_cancelled() {
            RunControl::Abort
        } else {
            RunControl::Continue
        }
    }
}

impl ProgressObserver for SharedProgress {
    fn on_step(&mut self, progress: &StepProgress) -> RunControl {
        self.snapshot.write().last_step = Some(progress.clone());
        self.control()
    }

    fn on_episode(&mut self, progress: &EpisodeProgress) -> RunControl {
        {
            let mut snap = self.snapshot.write();
            snap.last_episode = Some(progress.clone());
            snap.episodes_seen += 1;
        }
        self.control()
    }
}

/// Why a run stopped.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunOutcome {
    /// Ran every requested step.
    Completed,
    /// Stopped early by `max_steps`.
    StepBudgetExhausted,
    WallClockExceeded,
    Cancelled,
}

/// Hard limits on a run. Partial results are always returned.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunBudget {
    pub max_steps: Option<usize>,
    pub wall_clock: Option<Duration>,
}

impl RunBudget {
    pub fn unlimited() -> Self {
        Self::default()
    }

    pub fn steps(max_steps: usize) -> Self {
        Self { max_steps: Some(max_steps), wall_clock: None }
    }

    pub fn wall_clock(limit: Duration) -> Self {
        Self { max_steps: None, wall_clock: Some(limit) }
    }

    /// Steps to run for a scenario asking for `requested`.
    pub fn step_limit(&self, requested: usize) -> usize {
        self.max_steps.map_or(requested, |m| m.min(requested))
    }

    pub fn start(&self) -> BudgetClock {
        BudgetClock {
            started: Instant::now(),
            limit: self.wall_clock,
        }
    }
}

pub struct BudgetClock {
    started: Instant,
    limit: Option<Duration>,
}

impl BudgetClock {
    pub fn expired(&self) -> bool {
        self.limit.is_some_and(|limit| self.started.elapsed() >= limit)
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }
}

/// Outcome for a run that executed `ran` of `requested` steps without being
/// interrupted.
pub fn finished_outcome(ran: usize, requested: usize) -> RunOutcome {
    if ran < requested {
        RunOutcome::StepBudgetExhausted
    } else {
        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    fn step(step: usize) -> StepProgress {
        StepProgress {
            engine: EngineKind::Microscopic,
            step,
            total_steps: 10,
            evacuated: step as f32,
            population: 10.0,
        }
    }

    #[test]
    fn fn_observer_can_abort() {
        let mut obs = FnObserver(|event: ProgressEvent| match event {
            ProgressEvent::Step(s) if s.step >= 3 => RunControl::Abort,
            _ => RunControl::Continue,
        });
        assert_eq!(obs.on_step(&step(1)), RunControl::Continue);
        assert_eq!(obs.on_step(&step(3)), RunControl::Abort);
    }

    #[test]
    fn channel_observer_thins_steps() {
        let (tx, rx) = mpsc::channel();
        let mut obs = ChannelObserver::new(tx, 5);
        for s in 1..=10 {
            obs.on_step(&step(s));
        }
        let got: Vec<usize> = rx
            .try_iter()
            .map(|e| match e {
                ProgressEvent::Step(s) => s.step,
                ProgressEvent::Episode(_) => usize::MAX,
            })
            .collect();
        assert_eq!(got, vec![5, 10]);
    }

    #[test]
    fn shared_progress_publishes_and_cancels() {
        let shared = SharedProgress::new();
        let mut observer = shared.clone();
        assert_eq!(observer.on_step(&step(2)), RunControl::Continue);
        assert_eq!(shared.snapshot().last_step.map(|s| s.step), Some(2));
        shared.cancel();
        assert_eq!(observer.on_step(&step(3)), RunControl::Abort);
    }

    #[test]
    fn budget_limits_steps() {
        assert_eq!(RunBudget::steps(5).step_limit(100), 5);
        assert_eq!(RunBudget::unlimited().step_limit(100), 100);
        assert!(RunBudget::wall_clock(Duration::ZERO).start().expired());
        assert_eq!(finished_outcome(5, 100), RunOutcome::StepBudgetExhausted);
    }
}
