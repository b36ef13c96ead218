//! 热感知分配
//!
//! 线性规划：对每个空闲节点 i 取分数变量 `x_i ∈ [0, 1]`，`Σ x_i = N`，
//! 最小化各节点入口温升的最大值
//! `t ≥ Σ_{busy} D[j][i] + Σ_{free} D[j][i]·x_i`。
//! 取值最大的 N 个节点作为结果。

use super::lp::{LinearProgram, LpOutcome, Relation};
use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use std::sync::Arc;
use tracing::debug;

/// 每个节点的 LP 取值（忙节点为 0）
pub(crate) fn recirculation_weights(
    mach: &Machine,
    free: &FreeNodes,
    need: usize,
) -> Result<Vec<f64>> {
    let heat = mach
        .heat
        .as_ref()
        .ok_or_else(|| Error::config("no heat recirculation matrix loaded"))?;
    let n = mach.num_nodes();
    let free_nodes = free.free_list();
    let k = free_nodes.len();
    let t = k;

    let mut lp = LinearProgram::new(k + 1);
    lp.minimize(t, 1.0);
    for j in 0..n {
        let busy_heat: f64 = (0..n)
            .filter(|&i| !free.is_free(NodeId(i)))
            .map(|i| heat.d[j][i])
            .sum();
        let mut terms: Vec<(usize, f64)> = free_nodes
            .iter()
            .enumerate()
            .map(|(v, node)| (v, heat.d[j][node.0]))
            .collect();
        terms.push((t, -1.0));
        lp.constrain(&terms, Relation::Le, -busy_heat);
    }
    let all: Vec<(usize, f64)> = (0..k).map(|v| (v, 1.0)).collect();
    lp.constrain(&all, Relation::Eq, need as f64);
    for v in 0..k {
        lp.upper_bound(v, 1.0);
    }

    match lp.solve() {
        LpOutcome::Optimal { x, objective } => {
            debug!(objective, free = k, need, "热回流 LP 求解完成");
            let mut weights = vec![0.0; n];
            for (v, node) in free_nodes.iter().enumerate() {
                weights[node.0] = x[v];
            }
            Ok(weights)
        }
        other => Err(Error::Internal(format!(
            "heat recirculation LP failed: {other:?}"
        ))),
    }
}

#[derive(Debug, Default)]
pub struct EnergyAllocator;

impl EnergyAllocator {
    pub fn new(mach: &Machine) -> Result<Self> {
        if mach.heat.is_none() {
            return Err(Error::config(
                "energy allocator needs a heat recirculation matrix (dMatrixFile)",
            ));
        }
        Ok(Self)
    }
}

impl Allocator for EnergyAllocator {
    fn name(&self) -> &'static str {
        "energy"
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
        let weights = recirculation_weights(mach, free, need)?;
        let mut ranked = free.free_list();
        ranked.sort_by(|a, b| weights[b.0].total_cmp(&weights[a.0]).then(a.cmp(b)));
        ranked.truncate(need);
        Ok(Some(AllocInfo::new(Arc::clone(job), ranked)))
    }
}
