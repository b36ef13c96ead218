//! 谱方法分配映射器
//!
//! 候选对是（节点级任务组, 节点）。两对 `(g, n)`、`(h, m)` 的相容度为
//! `w(g, h) / (1 + dist(n, m))`，其中 g ≠ h 且 n ≠ m。用幂迭代求相容矩阵的主特征向量，
//! 每轮取分量最大的候选对确定下来，并删去与之冲突（同组或同节点）的候选对。

use super::nearest_amap::{center_and_pool, task_groups};
use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use crate::taskmap::{TaskMapInfo, TaskMapper};
use std::sync::Arc;
use tracing::{debug, trace};

const MAX_ITERS: usize = 100;
const TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone)]
pub struct SpectralAllocMapper {
    /// 分配时候选节点数与所需节点数之比
    pool_factor: usize,
}

impl Default for SpectralAllocMapper {
    fn default() -> Self {
        Self { pool_factor: 2 }
    }
}

impl SpectralAllocMapper {
    pub fn new() -> Self {
        Self::default()
    }

    /// 主特征向量；`x[g * P + i]` 对应（组 g, 候选节点 i）
    fn dominant_vector(&self, mach: &Machine, reduced: &[Vec<(usize, f64)>], pool: &[NodeId]) -> Vec<f64> {
        let (k, p) = (reduced.len(), pool.len());
        let affinity: Vec<Vec<f64>> = pool
            .iter()
            .map(|&a| {
                pool.iter()
                    .map(|&b| if a == b { 0.0 } else { 1.0 / (1.0 + mach.distance(a, b) as f64) })
                    .collect()
            })
            .collect();

        let mut x = vec![1.0 / ((k * p) as f64).sqrt(); k * p];
        for iter in 0..MAX_ITERS {
            // z[h * P + i] = Σ_j affinity[i][j] · x[h * P + j]
            let mut z = vec![0.0; k * p];
            for h in 0..k {
                for i in 0..p {
                    z[h * p + i] = (0..p).map(|j| affinity[i][j] * x[h * p + j]).sum();
                }
            }
            let mut y = vec![0.0; k * p];
            for g in 0..k {
                for &(h, w) in &reduced[g] {
                    for i in 0..p {
                        y[g * p + i] += w * z[h * p + i];
                    }
                }
            }
            let norm = y.iter().map(|v| v * v).sum::<f64>().sqrt();
            if norm <= TOLERANCE {
                // 没有组间通信：保持均匀向量
                return x;
            }
            for v in &mut y {
                *v /= norm;
            }
            let delta: f64 = x.iter().zip(&y).map(|(a, b)| (a - b).abs()).sum();
            x = y;
            if delta < TOLERANCE {
                trace!(iter, "幂迭代收敛");
                break;
            }
        }
        x
    }

    /// 贪心选取：返回 `node_of_group`
    fn assign(&self, x: &[f64], k: usize, pool: &[NodeId]) -> Result<Vec<NodeId>> {
        let p = pool.len();
        let mut group_done = vec![false; k];
        let mut node_used = vec![false; p];
        let mut node_of = vec![NodeId(0); k];
        for _ in 0..k {
            let best = (0..k * p)
                .filter(|&c| !group_done[c / p] && !node_used[c % p])
                .max_by(|&a, &b| x[a].total_cmp(&x[b]).then(b.cmp(&a)));
            let Some(c) = best else {
                return Err(Error::Internal("spectral assignment ran out of candidates".into()));
            };
            let (g, i) = (c / p, c % p);
            group_done[g] = true;
            node_used[i] = true;
            node_of[g] = pool[i];
        }
        Ok(node_of)
    }

    fn run(&self, mach: &Machine, job: &Job, pool: &[NodeId], need: usize) -> Result<(Vec<NodeId>, Vec<NodeId>)> {
        if need == 0 {
            return Ok((Vec::new(), Vec::new()));
        }
        let (part, reduced) = task_groups(job, need)?;
        let x = self.dominant_vector(mach, &reduced, pool);
        let node_of_group = self.assign(&x, need, pool)?;
        let placement = part.iter().map(|&g| node_of_group[g]).collect();
        Ok((node_of_group, placement))
    }
}

impl Allocator for SpectralAllocMapper {
    fn name(&self) -> &'static str {
        "spectralamap"
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
        let free_list = free.free_list();
        let size = (need * self.pool_factor).min(free_list.len());
        let Some((center, pool)) = center_and_pool(mach, &free_list, size) else {
            return Ok(None);
        };
        debug!(center = center.0, pool = pool.len(), "候选节点集");
        let (nodes, placement) = self.run(mach, job, &pool, need)?;
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes).with_placement(placement)))
    }
}

impl TaskMapper for SpectralAllocMapper {
    fn name(&self) -> &'static str {
        "spectralamap"
    }

    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        if let Some(p) = &alloc.placement {
            return TaskMapInfo::new(mach, alloc.clone(), p.clone());
        }
        let (_, placement) = self.run(mach, &alloc.job, &alloc.nodes, alloc.nodes.len())?;
        TaskMapInfo::new(mach, alloc.clone(), placement)
    }
}
