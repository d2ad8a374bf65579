//! Struct-of-arrays agent storage, allocated once per run.

use rand::Rng;
use serde::Serialize;

use crate::core::Placement;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Active,
    Evacuated,
}

pub struct AgentPool {
    pub n_agents: usize,

    pub x: Vec<f32>,
    pub y: Vec<f32>,
    pub vx: Vec<f32>,
    pub vy: Vec<f32>,

    pub status: Vec<AgentStatus>,
    /// Exit currently steered toward.
    pub goal: Vec<Option<usize>>,
    /// Exit the agent knows from its cluster.
    pub preferred: Vec<Option<usize>>,
    /// Exit the agent was last directed to by routing guidance.
    pub guided: Vec<Option<usize>>,
    /// Probability weight of following guidance, in [0, 1).
    pub compliance: Vec<f32>,

    pub exit_used: Vec<Option<usize>>,
    pub evacuated_at: Vec<Option<usize>>,
}

impl AgentPool {
    pub fn from_placements<R: Rng>(placements: &[Placement], rng: &mut R) -> Self {
        let n = placements.len();
        Self {
            n_agents: n,
            x: placements.iter().map(|p| p.position[0]).collect(),
            y: placements.iter().map(|p| p.position[1]).collect(),
            vx: vec![0.0; n],
            vy: vec![0.0; n],
            status: vec![AgentStatus::Active; n],
            goal: vec![None; n],
            preferred: placements.iter().map(|p| p.preferred_exit).collect(),
            guided: vec![None; n],
            compliance: (0..n).map(|_| rng.gen::<f32>()).collect(),
            exit_used: vec![None; n],
            evacuated_at: vec![None; n],
        }
    }

    #[inline]
    pub fn is_active(&self, i: usize) -> bool {
        self.status[i] == AgentStatus::Active
    }

    #[inline]
    pub fn position(&self, i: usize) -> [f32; 2] {
        [self.x[i], self.y[i]]
    }

    pub fn active_count(&self) -> usize {
        self.status.iter().filter(|s| **s == AgentStatus::Active).count()
    }

    pub fn evacuate(&mut self, i: usize, exit: usize, step: usize) {
        self.status[i] = AgentStatus::Evacuated;
        self.exit_used[i] = Some(exit);
        self.evacuated_at[i] = Some(step);
        self.vx[i] = 0.0;
        self.vy[i] = 0.0;
    }

    /// Positions with evacuated agents as `None`.
    pub fn position_frame(&self) -> Vec<Option<[f32; 2]>> {
        (0..self.n_agents)
            .map(|i| self.is_active(i).then(|| [self.x[i], self.y[i]]))
            .collect()
    }

    pub fn velocity_frame(&self) -> Vec<Option<[f32; 2]>> {
        (0..self.n_agents)
            .map(|i| self.is_active(i).then(|| [self.vx[i], self.vy[i]]))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn evacuated_agents_vanish_from_frames() {
        let placements = vec![
            Placement { position: [1.0, 1.0], preferred_exit: None },
            Placement { position: [2.0, 2.0], preferred_exit: Some(0) },
        ];
        let mut pool = AgentPool::from_placements(&placements, &mut StdRng::seed_from_u64(1));
        assert_eq!(pool.active_count(), 2);
        assert_eq!(pool.preferred[1], Some(0));
        assert!(pool.compliance.iter().all(|c| (0.0..1.0).contains(c)));

        pool.evacuate(0, 0, 3);
        assert_eq!(pool.position_frame(), vec![None, Some([2.0, 2.0])]);
        assert_eq!(pool.evacuated_at[0], Some(3));
        assert_eq!(pool.active_count(), 1);
    }
}
