//! Dragonfly 专用分配器

use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{Dragonfly, FreeNodes, Machine, NodeId};
use std::sync::Arc;
use tracing::trace;

fn require_dragonfly<'a>(mach: &'a Machine, who: &str) -> Result<&'a Dragonfly> {
    mach.dragonfly()
        .ok_or_else(|| Error::config(format!("{who} requires a dragonfly machine")))
}

fn free_of_router(dfly: &Dragonfly, free: &FreeNodes, router: usize) -> Vec<NodeId> {
    dfly.nodes_of_router(router).filter(|n| free.is_free(*n)).collect()
}

/// 轮流从各组取节点：每轮每组取一个
#[derive(Debug, Default)]
pub struct DflyRrnAllocator;

impl DflyRrnAllocator {
    pub fn new(mach: &Machine) -> Result<Self> {
        require_dragonfly(mach, "dflyrrn")?;
        Ok(Self)
    }
}

impl Allocator for DflyRrnAllocator {
    fn name(&self) -> &'static str {
        "dflyrrn"
    }

    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>> {
        let dfly = require_dragonfly(mach, "dflyrrn")?;
        let need = mach.nodes_for(job.procs);
        if need > free.num_free() {
            return Ok(None);
        }
        let mut per_group: Vec<std::vec::IntoIter<NodeId>> = (0..dfly.num_groups())
            .map(|g| {
                dfly.routers_of_group(g)
                    .flat_map(|r| free_of_router(dfly, free, r))
                    .collect::<Vec<_>>()
                    .into_iter()
            })
            .collect();

        let mut nodes = Vec::with_capacity(need);
        while nodes.len() < need {
            let before = nodes.len();
            for group in per_group.iter_mut() {
                if nodes.len() == need {
                    break;
                }
                if let Some(n) = group.next() {
                    nodes.push(n);
                }
            }
            if nodes.len() == before {
                return Err(Error::Internal(format!(
                    "dflyrrn ran out of free nodes for {}",
                    job.id
                )));
            }
        }
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }
}

/// 先在单个路由器内 best-fit，放不下再按组轮流整路由器地取
#[derive(Debug, Default)]
pub struct DflySlurmAllocator;

impl DflySlurmAllocator {
    pub fn new(mach: &Machine) -> Result<Self> {
        require_dragonfly(mach, "dflyslurm")?;
        Ok(Self)
    }
}

impl Allocator for DflySlurmAllocator {
    fn name(&self) -> &'static str {
        "dflyslurm"
    }

    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>> {
        let dfly = require_dragonfly(mach, "dflyslurm")?;
        let need = mach.nodes_for(job.procs);
        if need > free.num_free() {
            return Ok(None);
        }

        let routers: Vec<Vec<NodeId>> = (0..dfly.num_routers())
            .map(|r| free_of_router(dfly, free, r))
            .collect();
        let best = routers
            .iter()
            .enumerate()
            .filter(|(_, nodes)| nodes.len() >= need)
            .min_by_key(|(r, nodes)| (nodes.len(), *r));
        if let Some((r, nodes)) = best {
            trace!(router = r, "单路由器放下");
            return Ok(Some(AllocInfo::new(
                Arc::clone(job),
                nodes[..need].to_vec(),
            )));
        }

        // 第 k 轮取每组的第 k 个路由器
        let a = dfly.opts().routers_per_group;
        let mut nodes = Vec::with_capacity(need);
        'outer: for k in 0..a {
            for g in 0..dfly.num_groups() {
                let r = g * a + k;
                for &n in &routers[r] {
                    nodes.push(n);
                    if nodes.len() == need {
                        break 'outer;
                    }
                }
            }
        }
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }
}

/// 每轮每个路由器取一个节点，尽量分散
#[derive(Debug, Default)]
pub struct SimpleSpreadAllocator;

impl SimpleSpreadAllocator {
    pub fn new(mach: &Machine) -> Result<Self> {
        require_dragonfly(mach, "simplespread")?;
        Ok(Self)
    }
}

impl Allocator for SimpleSpreadAllocator {
    fn name(&self) -> &'static str {
        "simplespread"
    }

    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>> {
        let dfly = require_dragonfly(mach, "simplespread")?;
        let need = mach.nodes_for(job.procs);
        if need > free.num_free() {
            return Ok(None);
        }
        let routers: Vec<Vec<NodeId>> = (0..dfly.num_routers())
            .map(|r| free_of_router(dfly, free, r))
            .collect();
        let depth = routers.iter().map(Vec::len).max().unwrap_or(0);
        let nodes: Vec<NodeId> = (0..depth)
            .flat_map(|k| routers.iter().filter_map(move |r| r.get(k).copied()))
            .take(need)
            .collect();
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }
}
