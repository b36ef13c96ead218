use super::{TaskMapInfo, TaskMapper};
use crate::alloc::AllocInfo;
use crate::error::Result;
use crate::machine::{Machine, NodeId};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;

/// 随机映射：每个节点展开成 `cores_per_node` 个槽位后打乱
#[derive(Debug)]
pub struct RandomTaskMapper {
    rng: StdRng,
    seed: u64,
}

impl RandomTaskMapper {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            seed,
        }
    }
}

impl Default for RandomTaskMapper {
    fn default() -> Self {
        Self::new(crate::alloc::DEFAULT_SEED)
    }
}

impl TaskMapper for RandomTaskMapper {
    fn name(&self) -> &'static str {
        "random"
    }

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        let mut slots: Vec<NodeId> = alloc
            .nodes
            .iter()
            .flat_map(|&n| std::iter::repeat_n(n, mach.cores_per_node))
            .collect();
        slots.shuffle(&mut self.rng);
        slots.truncate(alloc.job.num_tasks());
        TaskMapInfo::new(mach, alloc.clone(), slots)
    }

    fn setup_info(&self) -> String {
        format!("random task mapper (seed {})", self.seed)
    }
}
