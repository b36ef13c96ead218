//! 逆 Cuthill-McKee 排序
//!
//! 每个连通分量先找伪外围点作为根（反复 BFS，取最后一层中度最小的点，直到离心率
//! 不再增大），再逐层 BFS 编号，同层邻居按度升序；最后整体反转。

use super::{TaskMapInfo, TaskMapper, balanced_loads, physical_graph, slots};
use crate::alloc::AllocInfo;
use crate::error::Result;
use crate::machine::{Machine, NodeId};
use std::collections::VecDeque;

/// BFS 分层；返回各层
fn level_sets(adj: &[Vec<usize>], root: usize) -> Vec<Vec<usize>> {
    let mut seen = vec![false; adj.len()];
    seen[root] = true;
    let mut levels = vec![vec![root]];
    loop {
        let mut next = Vec::new();
        for &u in levels.last().into_iter().flatten() {
            for &v in &adj[u] {
                if !seen[v] {
                    seen[v] = true;
                    next.push(v);
                }
            }
        }
        if next.is_empty() {
            return levels;
        }
        levels.push(next);
    }
}

fn pseudo_peripheral(adj: &[Vec<usize>], start: usize) -> usize {
    let mut root = start;
    let mut ecc = level_sets(adj, root).len();
    loop {
        let levels = level_sets(adj, root);
        let Some(candidate) = levels
            .last()
            .and_then(|last| last.iter().copied().min_by_key(|&v| (adj[v].len(), v)))
        else {
            return root;
        };
        let e = level_sets(adj, candidate).len();
        if e > ecc {
            root = candidate;
            ecc = e;
        } else {
            return root;
        }
    }
}

/// 返回新次序：`order[k]` 是排在第 k 位的顶点
pub fn rcm_order(adj: &[Vec<usize>]) -> Vec<usize> {
    let n = adj.len();
    let mut visited = vec![false; n];
    let mut order = Vec::with_capacity(n);

    while order.len() < n {
        let Some(start) = (0..n)
            .filter(|&v| !visited[v])
            .min_by_key(|&v| (adj[v].len(), v))
        else {
            break;
        };
        let root = pseudo_peripheral(adj, start);
        visited[root] = true;
        let mut q = VecDeque::from([root]);
        while let Some(u) = q.pop_front() {
            order.push(u);
            let mut nbrs: Vec<usize> = adj[u].iter().copied().filter(|&v| !visited[v]).collect();
            nbrs.sort_by_key(|&v| (adj[v].len(), v));
            nbrs.dedup();
            for v in nbrs {
                visited[v] = true;
                q.push_back(v);
            }
        }
    }
    order.reverse();
    order
}

pub(crate) fn unweighted(adj: &[Vec<(usize, f64)>]) -> Vec<Vec<usize>> {
    adj.iter()
        .map(|nb| nb.iter().map(|&(v, _)| v).collect())
        .collect()
}

/// 任务与节点各自按 RCM 排序，再按名次配对
#[derive(Debug, Default)]
pub struct RcmTaskMapper;

impl TaskMapper for RcmTaskMapper {
    fn name(&self) -> &'static str {
        "rcm"
    }

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        let tasks = alloc.job.num_tasks();
        let task_order = rcm_order(&unweighted(&alloc.job.comm.adjacency()));
        let node_order = rcm_order(&unweighted(&physical_graph(mach, &alloc.nodes)));
        let ordered: Vec<NodeId> = node_order.iter().map(|&i| alloc.nodes[i]).collect();
        let slot_nodes = slots(&ordered, &balanced_loads(tasks, ordered.len()));

        let mut mapping = vec![NodeId(0); tasks];
        for (rank, &t) in task_order.iter().enumerate() {
            mapping[t] = slot_nodes[rank];
        }
        TaskMapInfo::new(mach, alloc.clone(), mapping)
    }
}
