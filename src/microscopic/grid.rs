//! Neighbour lookup for the social-force loop
//!
//! Buckets are as wide as the interaction radius, so one query visits at most
//! 3×3 cells. Rebuilt every step by counting then scattering active agents;
//! evacuated agents never enter the table.

use super::pool::AgentPool;

pub struct SpatialHashGrid {
    counts: Vec<u32>,  // [table_size] agents per bucket (cursor during scatter)
    offsets: Vec<u32>, // [table_size] start of each bucket in `data`
    data: Vec<u32>,    // [active]     agent indices, packed
    table_size: usize, // power of two
    mask: usize,
    pub cell_size: f32,
}

impl SpatialHashGrid {
    /// Table sized to at least twice `capacity` agents.
    pub fn for_agents(capacity: usize, cell_size: f32) -> Self {
        let table_size = (capacity * 2).next_power_of_two().max(64);
        SpatialHashGrid {
            counts: vec![0; table_size],
            offsets: vec![0; table_size],
            data: Vec::with_capacity(capacity),
            table_size,
            mask: table_size - 1,
            cell_size,
        }
    }

    /// Fibonacci hash of a cell coordinate.
    #[inline(always)]
    fn bucket(&self, cx: i32, cy: i32) -> usize {
        let key = (cx as u64).wrapping_mul(2654435761) ^ (cy as u64).wrapping_mul(2246822519);
        let shift = 64 - self.table_size.trailing_zeros();
        (key.wrapping_mul(11400714819323198485) >> shift) as usize & self.mask
    }

    #[inline(always)]
    pub fn cell_of(&self, x: f32, y: f32) -> (i32, i32) {
        ((x / self.cell_size).floor() as i32, (y / self.cell_size).floor() as i32)
    }

    fn agent_bucket(&self, pool: &AgentPool, i: usize) -> usize {
        let (cx, cy) = self.cell_of(pool.x[i], pool.y[i]);
        self.bucket(cx, cy)
    }

    pub fn rebuild(&mut self, pool: &AgentPool) {
        let n = pool.n_agents;
        if self.data.len() < n {
            self.data.resize(n, 0);
        }

        self.counts.fill(0);
        for i in (0..n).filter(|&i| pool.is_active(i)) {
            let b = self.agent_bucket(pool, i);
            self.counts[b] += 1;
        }

        let mut start = 0u32;
        for (offset, &count) in self.offsets.iter_mut().zip(&self.counts) {
            *offset = start;
            start += count;
        }

        self.counts.fill(0);
        for i in (0..n).filter(|&i| pool.is_active(i)) {
            let b = self.agent_bucket(pool, i);
            self.data[(self.offsets[b] + self.counts[b]) as usize] = i as u32;
            self.counts[b] += 1;
        }
    }

    /// Calls `callback` for every candidate within radius `r` of (qx, qy).
    /// Hash collisions can add extras; callers still check exact distance.
    /// A bucket shared by two visited cells is reported once.
    #[inline]
    pub fn query_radius<F>(&self, qx: f32, qy: f32, r: f32, mut callback: F)
    where
        F: FnMut(u32),
    {
        let (cx0, cy0) = self.cell_of(qx - r, qy - r);
        let (cx1, cy1) = self.cell_of(qx + r, qy + r);

        let mut seen = [usize::MAX; 9];
        let mut n_seen = 0;
        for cy in cy0..=cy1 {
            for cx in cx0..=cx1 {
                let b = self.bucket(cx, cy);
                if seen[..n_seen].contains(&b) {
                    continue;
                }
                if n_seen < seen.len() {
                    seen[n_seen] = b;
                    n_seen += 1;
                }
                let start = self.offsets[b] as usize;
                let end = start + self.counts[b] as usize;
                for &idx in &self.data[start..end] {
                    callback(idx);
                }
            }
        }
    }

    /// Same as `query_radius` but skips `self_idx`.
    #[inline]
    pub fn query_neighbors<F>(&self, self_idx: u32, qx: f32, qy: f32, r: f32, mut callback: F)
    where
        F: FnMut(u32),
    {
        self.query_radius(qx, qy, r, |idx| {
            if idx != self_idx {
                callback(idx)
            }
        });
    }
}
