//! 随机分配器：从空闲节点中均匀无放回抽样

use super::{AllocInfo, Allocator};
use crate::error::Result;
use crate::job::Job;
use crate::machine::{FreeNodes, Machine};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use std::sync::Arc;

pub const DEFAULT_SEED: u64 = 42;

#[derive(Debug, Clone)]
pub struct RandomAllocator {
    rng: StdRng,
    seed: u64,
}

impl RandomAllocator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }
}

impl Default for RandomAllocator {
    fn default() -> Self {
        Self::new(DEFAULT_SEED)
    }
}

impl Allocator for RandomAllocator {
    fn name(&self) -> &'static str {
        "random"
    }

    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>> {
        let need = mach.nodes_for(job.procs);
        if need > free.num_free() {
            return Ok(None);
        }
        let pool = free.free_list();
        let nodes = pool.choose_multiple(&mut self.rng, need).copied().collect();
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }

    fn setup_info(&self) -> String {
        format!("random allocator (seed {})", self.seed)
    }
}
