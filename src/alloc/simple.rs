//! 最简单的分配器：按下标取前 N 个空闲节点

use super::{AllocInfo, Allocator};
use crate::error::Result;
use crate::job::Job;
use crate::machine::{FreeNodes, Machine};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Default, Clone)]
pub struct SimpleAllocator;

impl Allocator for SimpleAllocator {
    fn name(&self) -> &'static str {
        "simple"
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
        let nodes: Vec<_> = free.iter_free().take(need).collect();
        trace!(job = %job.id, ?nodes, "按下标顺序分配");
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }
}
