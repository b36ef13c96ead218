//! 任务映射
//!
//! 映射器把作业的逻辑任务放到已分配的节点上，每个节点最多放
//! `cores_per_node` 个任务。结果 [`TaskMapInfo`] 带有按需计算、计算一次后缓存的
//! 通信局部性指标。

mod partition;
mod random;
mod rcb;
mod rcm;
mod simple;
mod topo;

pub use partition::{partition, rebalance};
pub use random::RandomTaskMapper;
pub use rcb::RcbTaskMapper;
pub use rcm::{RcmTaskMapper, rcm_order};
pub use simple::SimpleTaskMapper;
pub use topo::{TopoMapper, TopoMode};

use crate::alloc::AllocInfo;
use crate::error::{Error, Result};
use crate::machine::{LinkId, Machine, NodeId};
use serde::Serialize;
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;

/// 映射的通信指标
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MapMetrics {
    /// 通信边的平均跳数
    pub avg_hop_dist: f64,
    /// Σ 权重 × 跳数
    pub hop_bytes: f64,
    /// 每条链路上的累计通信量
    pub link_traffic: BTreeMap<LinkId, f64>,
    /// 最繁忙链路上的通信量
    pub max_congestion: f64,
}

#[derive(Debug, Clone)]
pub struct TaskMapInfo {
    pub alloc: AllocInfo,
    /// task -> node
    task_to_node: Vec<NodeId>,
    metrics: OnceCell<MapMetrics>,
}

impl TaskMapInfo {
    /// 校验：长度等于任务数，节点都在分配内，且每个节点不超过核数
    pub fn new(mach: &Machine, alloc: AllocInfo, task_to_node: Vec<NodeId>) -> Result<Self> {
        let tasks = alloc.job.num_tasks();
        if task_to_node.len() != tasks {
            return Err(Error::Internal(format!(
                "{}: mapping has {} entries for {tasks} tasks",
                alloc.job.id,
                task_to_node.len()
            )));
        }
        let mut load: BTreeMap<NodeId, usize> = alloc.nodes.iter().map(|&n| (n, 0)).collect();
        for &n in &task_to_node {
            let slot = load.get_mut(&n).ok_or_else(|| {
                Error::Internal(format!("{}: task mapped to unallocated {n:?}", alloc.job.id))
            })?;
            *slot += 1;
            if *slot > mach.cores_per_node {
                return Err(Error::Internal(format!(
                    "{}: {n:?} holds more than {} tasks",
                    alloc.job.id, mach.cores_per_node
                )));
            }
        }
        Ok(Self {
            alloc,
            task_to_node,
            metrics: OnceCell::new(),
        })
    }

    pub fn node_of(&self, task: usize) -> NodeId {
        self.task_to_node[task]
    }

    pub fn task_to_node(&self) -> &[NodeId] {
        &self.task_to_node
    }

    pub fn metrics(&self, mach: &Machine) -> &MapMetrics {
        self.metrics.get_or_init(|| self.compute_metrics(mach))
    }

    pub fn avg_hop_dist(&self, mach: &Machine) -> f64 {
        self.metrics(mach).avg_hop_dist
    }

    pub fn hop_bytes(&self, mach: &Machine) -> f64 {
        self.metrics(mach).hop_bytes
    }

    pub fn max_congestion(&self, mach: &Machine) -> f64 {
        self.metrics(mach).max_congestion
    }

    fn compute_metrics(&self, mach: &Machine) -> MapMetrics {
        let adj = self.alloc.job.comm.adjacency();
        let mut edges = 0usize;
        let mut hops_total = 0usize;
        let mut m = MapMetrics::default();
        for (i, nbrs) in adj.iter().enumerate() {
            for &(j, w) in nbrs.iter().filter(|(j, _)| *j > i) {
                let (a, b) = (self.task_to_node[i], self.task_to_node[j]);
                edges += 1;
                if a == b {
                    continue;
                }
                let hops = mach.distance(a, b);
                hops_total += hops;
                m.hop_bytes += w * hops as f64;
                for link in mach.route(a, b) {
                    *m.link_traffic.entry(link).or_default() += w;
                }
            }
        }
        if edges > 0 {
            m.avg_hop_dist = hops_total as f64 / edges as f64;
        }
        m.max_congestion = m.link_traffic.values().copied().fold(0.0, f64::max);
        m
    }
}

/// 映射策略
pub trait TaskMapper: fmt::Debug {
    fn name(&self) -> &'static str;

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo>;

    fn setup_info(&self) -> String {
        format!("{} task mapper", self.name())
    }
}

/// 任务数在各节点间均分后的容量：前 `T % k` 个节点多放一个
pub(crate) fn balanced_loads(tasks: usize, nodes: usize) -> Vec<usize> {
    if nodes == 0 {
        return Vec::new();
    }
    let (base, extra) = (tasks / nodes, tasks % nodes);
    (0..nodes).map(|i| base + usize::from(i < extra)).collect()
}

/// 按容量把节点展开成槽位序列
pub(crate) fn slots(nodes: &[NodeId], loads: &[usize]) -> Vec<NodeId> {
    nodes
        .iter()
        .zip(loads)
        .flat_map(|(&n, &k)| std::iter::repeat_n(n, k))
        .collect()
}

/// 已分配节点之间的物理邻接图（距离为单位距离的节点对相连）
pub(crate) fn physical_graph(mach: &Machine, nodes: &[NodeId]) -> Vec<Vec<(usize, f64)>> {
    let unit = mach.unit_distance();
    (0..nodes.len())
        .map(|i| {
            (0..nodes.len())
                .filter(|&j| j != i && mach.distance(nodes[i], nodes[j]) <= unit)
                .map(|j| (j, 1.0))
                .collect()
        })
        .collect()
}

/// 节点坐标；没有网格坐标的机器用下标代替
pub(crate) fn node_point(mach: &Machine, n: NodeId) -> [f64; 3] {
    match mach.coord(n) {
        Some(c) => [c.x as f64, c.y as f64, c.z as f64],
        None => [n.0 as f64, 0.0, 0.0],
    }
}
