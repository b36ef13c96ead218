//! 分配器
//!
//! 分配器为作业选出一组空闲节点。它们只读 [`FreeNodes`]，不修改占用状态；
//! 节点数不足时返回 `Ok(None)`，只有配置或内部一致性问题才返回 `Err`。

mod constraint;
mod curve;
mod dragonfly;
mod energy;
mod linear;
mod lp;
mod mbs;
mod nearest;
mod nearest_amap;
mod random;
mod simple;
mod spectral;

pub use constraint::ConstraintAllocator;
pub use curve::{CurveKind, CurveOrder};
pub use dragonfly::{DflyRrnAllocator, DflySlurmAllocator, SimpleSpreadAllocator};
pub use energy::EnergyAllocator;
pub use linear::{LinearAllocator, LinearStrategy};
pub use lp::{LinearProgram, LpOutcome, Relation};
pub use mbs::{MbsAllocator, MbsVariant};
pub use nearest::{CenterGenerator, NearestAllocator, PointCollector, Scorer, Tiebreak};
pub use nearest_amap::NearestAllocMapper;
pub use random::{DEFAULT_SEED, RandomAllocator};
pub use simple::SimpleAllocator;
pub use spectral::SpectralAllocMapper;

use crate::error::Result;
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use std::fmt;
use std::sync::Arc;

/// 一次分配的结果
#[derive(Debug, Clone)]
pub struct AllocInfo {
    pub job: Arc<Job>,
    /// 分到的节点，长度恰为 ceil(procs / cores_per_node)
    pub nodes: Vec<NodeId>,
    /// 分配映射器在分配时一并算出的任务放置（task -> node）
    pub placement: Option<Vec<NodeId>>,
}

impl AllocInfo {
    pub fn new(job: Arc<Job>, nodes: Vec<NodeId>) -> Self {
        Self {
            job,
            nodes,
            placement: None,
        }
    }

    pub fn with_placement(mut self, placement: Vec<NodeId>) -> Self {
        self.placement = Some(placement);
        self
    }

    pub fn nodes_needed(&self) -> usize {
        self.nodes.len()
    }
}

/// 分配策略
pub trait Allocator: fmt::Debug {
    fn name(&self) -> &'static str;

    /// 为作业选择节点；空闲节点不足时返回 `Ok(None)`
    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>>;

    /// 作业结束、节点归还之后调用；有内部记账的分配器在此更新
    fn deallocate(&mut self, _alloc: &AllocInfo) -> Result<()> {
        Ok(())
    }

    /// 仿真结束
    fn done(&mut self) {}

    fn setup_info(&self) -> String {
        format!("{} allocator", self.name())
    }
}

/// 作业是否可能被放下（只看空闲节点数）
pub fn can_allocate(mach: &Machine, free: &FreeNodes, job: &Job) -> bool {
    mach.nodes_for(job.procs) <= free.num_free()
}
