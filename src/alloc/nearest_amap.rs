//! 最近邻分配映射器
//!
//! 先把任务按每节点容量分成节点级的组，得到组间通信图。从中心组出发，
//! 按与已放置组的通信量从大到小依次取出下一组（最大堆，过期条目惰性丢弃），
//! 给它挑一个尚未使用的候选节点，使 Σ 通信量 × 距离 最小。
//! 作分配器时候选集是全部空闲节点；作映射器时候选集是已分配的节点。

use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use crate::taskmap::{TaskMapInfo, TaskMapper, partition};
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Arc;
use tracing::{debug, trace};

/// 节点级分组：`part[task]` 与组间通信图
pub(crate) fn task_groups(job: &Job, groups: usize) -> Result<(Vec<usize>, Vec<Vec<(usize, f64)>>)> {
    let adj = job.comm.adjacency();
    let tasks = job.num_tasks();
    if adj.len() != tasks {
        return Err(Error::Internal(format!(
            "{}: communication graph has {} tasks, job has {tasks}",
            job.id,
            adj.len()
        )));
    }
    let loads = crate::taskmap::balanced_loads(tasks, groups);
    let part = partition(&adj, &loads);
    let mut w = vec![vec![0.0; groups]; groups];
    for (i, nbrs) in adj.iter().enumerate() {
        for &(j, wt) in nbrs {
            if part[i] != part[j] {
                w[part[i]][part[j]] += wt;
            }
        }
    }
    let reduced = w
        .into_iter()
        .map(|row| row.into_iter().enumerate().filter(|(_, x)| *x > 0.0).collect())
        .collect();
    Ok((part, reduced))
}

/// 离其余 `need - 1` 个最近候选点总距离最小的中心；返回中心与按距离排好的最近 `need` 个点
pub(crate) fn center_and_pool(mach: &Machine, pool: &[NodeId], need: usize) -> Option<(NodeId, Vec<NodeId>)> {
    let mut best: Option<(usize, NodeId, Vec<NodeId>)> = None;
    for &c in pool {
        let mut near = pool.to_vec();
        near.sort_by_key(|&n| (mach.distance(c, n), n));
        near.truncate(need);
        let score: usize = near.iter().map(|&n| mach.distance(c, n)).sum();
        if best.as_ref().is_none_or(|(s, _, _)| score < *s) {
            best = Some((score, c, near));
        }
    }
    best.map(|(_, c, near)| (c, near))
}

#[derive(Debug, PartialEq)]
struct Frontier {
    weight: f64,
    group: usize,
}

impl Eq for Frontier {}

impl Ord for Frontier {
    fn cmp(&self, other: &Self) -> Ordering {
        self.weight
            .total_cmp(&other.weight)
            .then_with(|| other.group.cmp(&self.group))
    }
}

impl PartialOrd for Frontier {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// 组 `g` 放置后，更新其未放置邻居与已放置部分的连接量
fn attach(
    reduced: &[Vec<(usize, f64)>],
    g: usize,
    node_of: &[Option<NodeId>],
    attached: &mut [f64],
    heap: &mut BinaryHeap<Frontier>,
) {
    for &(h, w) in &reduced[g] {
        if node_of[h].is_none() {
            attached[h] += w;
            heap.push(Frontier {
                weight: attached[h],
                group: h,
            });
        }
    }
}

#[derive(Debug, Default)]
pub struct NearestAllocMapper;

impl NearestAllocMapper {
    pub fn new() -> Self {
        Self
    }

    /// 返回 `node_of_group`
    fn grow(
        &self,
        mach: &Machine,
        reduced: &[Vec<(usize, f64)>],
        center_group: usize,
        center_node: NodeId,
        pool: &[NodeId],
    ) -> Result<Vec<NodeId>> {
        let k = reduced.len();
        let mut node_of: Vec<Option<NodeId>> = vec![None; k];
        let mut used: Vec<NodeId> = Vec::with_capacity(k);
        let mut attached = vec![0.0f64; k];
        let mut heap = BinaryHeap::new();

        node_of[center_group] = Some(center_node);
        used.push(center_node);
        attach(reduced, center_group, &node_of, &mut attached, &mut heap);

        while used.len() < k {
            let g = loop {
                match heap.pop() {
                    Some(f) if node_of[f.group].is_none() && f.weight >= attached[f.group] => {
                        break f.group;
                    }
                    Some(_) => continue,
                    // 与已放置部分不连通：取编号最小的未放置组
                    None => match (0..k).find(|&g| node_of[g].is_none()) {
                        Some(g) => break g,
                        None => return Err(Error::Internal("group growth lost track of groups".into())),
                    },
                }
            };

            let cost = |n: NodeId| -> f64 {
                let c: f64 = reduced[g]
                    .iter()
                    .filter_map(|&(h, w)| node_of[h].map(|m| w * mach.distance(n, m) as f64))
                    .sum();
                // 与已放置组无通信时，靠近中心
                c + 1e-6 * mach.distance(center_node, n) as f64
            };
            let Some(n) = pool
                .iter()
                .copied()
                .filter(|n| !used.contains(n))
                .min_by(|&a, &b| cost(a).total_cmp(&cost(b)).then(a.cmp(&b)))
            else {
                return Err(Error::Internal(format!(
                    "ran out of candidate nodes after placing {} of {k} groups",
                    used.len()
                )));
            };
            trace!(group = g, node = n.0, "放置组");
            node_of[g] = Some(n);
            used.push(n);
            attach(reduced, g, &node_of, &mut attached, &mut heap);
        }
        Ok(node_of.into_iter().flatten().collect())
    }

    fn run(&self, mach: &Machine, job: &Job, pool: &[NodeId], need: usize) -> Result<Option<(Vec<NodeId>, Vec<NodeId>)>> {
        if need == 0 {
            return Ok(Some((Vec::new(), Vec::new())));
        }
        let Some((center_node, _)) = center_and_pool(mach, pool, need) else {
            return Ok(None);
        };
        let (part, reduced) = task_groups(job, need)?;
        let center_group = job
            .comm
            .center_task
            .filter(|&t| t < part.len())
            .map(|t| part[t])
            .unwrap_or_else(|| {
                (0..need)
                    .max_by(|&a, &b| {
                        let wa: f64 = reduced[a].iter().map(|(_, w)| w).sum();
                        let wb: f64 = reduced[b].iter().map(|(_, w)| w).sum();
                        wa.total_cmp(&wb).then(b.cmp(&a))
                    })
                    .unwrap_or(0)
            });
        let node_of_group = self.grow(mach, &reduced, center_group, center_node, pool)?;
        let placement = part.iter().map(|&g| node_of_group[g]).collect();
        debug!(center = center_node.0, center_group, "分配映射完成");
        Ok(Some((node_of_group, placement)))
    }
}

impl Allocator for NearestAllocMapper {
    fn name(&self) -> &'static str {
        "nearestamap"
    }

    #[tracing::instrument(skip(self, mach, free, job), fields(job = %job.id))]
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
        Ok(self
            .run(mach, job, &pool, need)?
            .map(|(nodes, placement)| AllocInfo::new(Arc::clone(job), nodes).with_placement(placement)))
    }
}

impl TaskMapper for NearestAllocMapper {
    fn name(&self) -> &'static str {
        "nearestamap"
    }

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        if let Some(p) = &alloc.placement {
            return TaskMapInfo::new(mach, alloc.clone(), p.clone());
        }
        let (_, placement) = self
            .run(mach, &alloc.job, &alloc.nodes, alloc.nodes.len())?
            .ok_or(Error::AllocationFailed { job: alloc.job.id })?;
        TaskMapInfo::new(mach, alloc.clone(), placement)
    }
}
