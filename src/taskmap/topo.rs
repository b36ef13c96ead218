//! 拓扑感知映射
//!
//! 先把通信图按每节点容量划分成与节点数相同的组，得到组间的约简通信图；
//! 再把约简图放到已分配节点的物理邻接图上：
//! - `Rcm`：两张图各自做 RCM 排序，按名次配对；
//! - `Recursive`：物理图与约简图交替二分，直到一组对一个节点。

use super::rcm::unweighted;
use super::{TaskMapInfo, TaskMapper, balanced_loads, partition, physical_graph, rcm_order};
use crate::alloc::AllocInfo;
use crate::error::{Error, Result};
use crate::machine::{Machine, NodeId};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TopoMode {
    Rcm,
    #[default]
    Recursive,
}

impl TopoMode {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "rcm" => Some(Self::Rcm),
            "recursive" | "bisect" => Some(Self::Recursive),
            _ => None,
        }
    }
}

#[derive(Debug, Default)]
pub struct TopoMapper {
    mode: TopoMode,
}

/// 诱导子图，顶点按 `verts` 重新编号
fn induced(adj: &[Vec<(usize, f64)>], verts: &[usize]) -> Vec<Vec<(usize, f64)>> {
    let mut local = vec![usize::MAX; adj.len()];
    for (i, &v) in verts.iter().enumerate() {
        local[v] = i;
    }
    verts
        .iter()
        .map(|&v| {
            adj[v]
                .iter()
                .filter(|(u, _)| local[*u] != usize::MAX)
                .map(|&(u, w)| (local[u], w))
                .collect()
        })
        .collect()
}

/// 组间通信图
fn reduce(adj: &[Vec<(usize, f64)>], part: &[usize], k: usize) -> Vec<Vec<(usize, f64)>> {
    let mut w = vec![vec![0.0; k]; k];
    for (i, nbrs) in adj.iter().enumerate() {
        for &(j, wt) in nbrs {
            if part[i] != part[j] {
                w[part[i]][part[j]] += wt;
            }
        }
    }
    w.into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .filter(|(_, x)| *x > 0.0)
                .collect()
        })
        .collect()
}

fn halves(adj: &[Vec<(usize, f64)>], verts: &[usize]) -> (Vec<usize>, Vec<usize>) {
    let n = verts.len();
    let part = partition(&induced(adj, verts), &[n / 2, n - n / 2]);
    let (mut left, mut right) = (Vec::new(), Vec::new());
    for (i, &v) in verts.iter().enumerate() {
        if part[i] == 0 {
            left.push(v);
        } else {
            right.push(v);
        }
    }
    (left, right)
}

fn bisect_match(
    logical: &[Vec<(usize, f64)>],
    groups: &[usize],
    physical: &[Vec<(usize, f64)>],
    nodes: &[usize],
    out: &mut [usize],
) {
    match groups.len() {
        0 => {}
        1 => out[groups[0]] = nodes[0],
        _ => {
            let (pl, pr) = halves(physical, nodes);
            let (gl, gr) = halves(logical, groups);
            bisect_match(logical, &gl, physical, &pl, out);
            bisect_match(logical, &gr, physical, &pr, out);
        }
    }
}

impl TopoMapper {
    pub fn new(mode: TopoMode) -> Self {
        Self { mode }
    }
}

impl TaskMapper for TopoMapper {
    fn name(&self) -> &'static str {
        "topo"
    }

    #[tracing::instrument(skip(self, mach, alloc), fields(job = %alloc.job.id, mode = ?self.mode))]
    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        let tasks = alloc.job.num_tasks();
        let k = alloc.nodes.len();
        let adj = alloc.job.comm.adjacency();
        if adj.len() != tasks {
            return Err(Error::Internal(format!(
                "{}: communication graph has {} tasks, job has {tasks}",
                alloc.job.id,
                adj.len()
            )));
        }
        let part = partition(&adj, &balanced_loads(tasks, k));
        let reduced = reduce(&adj, &part, k);
        let physical = physical_graph(mach, &alloc.nodes);

        // group -> alloc.nodes 下标
        let mut node_of_group = vec![0usize; k];
        match self.mode {
            TopoMode::Rcm => {
                let g_order = rcm_order(&unweighted(&reduced));
                let n_order = rcm_order(&unweighted(&physical));
                for (g, n) in g_order.into_iter().zip(n_order) {
                    node_of_group[g] = n;
                }
            }
            TopoMode::Recursive => {
                let all: Vec<usize> = (0..k).collect();
                bisect_match(&reduced, &all, &physical, &all, &mut node_of_group);
            }
        }
        debug!(groups = k, "组已放置");

        let mapping: Vec<NodeId> = part
            .iter()
            .map(|&g| alloc.nodes[node_of_group[g]])
            .collect();
        TaskMapInfo::new(mach, alloc.clone(), mapping)
    }

    fn setup_info(&self) -> String {
        format!("topo task mapper ({:?})", self.mode)
    }
}
