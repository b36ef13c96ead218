use super::{TaskMapInfo, TaskMapper};
use crate::alloc::AllocInfo;
use crate::error::Result;
use crate::machine::Machine;

/// task i -> nodes[i / cores_per_node]
#[derive(Debug, Default)]
pub struct SimpleTaskMapper;

impl TaskMapper for SimpleTaskMapper {
    fn name(&self) -> &'static str {
        "simple"
    }

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        let cpn = mach.cores_per_node.max(1);
        let mapping = (0..alloc.job.num_tasks())
            .map(|t| alloc.nodes[t / cpn])
            .collect();
        TaskMapInfo::new(mach, alloc.clone(), mapping)
    }
}
