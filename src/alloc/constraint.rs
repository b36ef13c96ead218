//! 依赖约束分配器
//!
//! 依赖文件每行 `u v1 v2 ...` 给出内部节点 u 的依赖集合 `D[u]`；
//! 约束文件每行是一组风险节点。叶子（`|D[v]| == 1`）对应计算节点，
//! 名字是节点下标的十进制串。对每一行约束依次尝试：分配至少要用到一个
//! 不受约束的节点，同时至少用到一个依赖于被移除风险节点的节点。
//! 所有约束都无法满足时，从下标最大的空闲节点往下取。

use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Default)]
pub struct ConstraintAllocator {
    deps: HashMap<String, BTreeSet<String>>,
    constraints: Vec<Vec<String>>,
}

impl ConstraintAllocator {
    pub fn parse(deps: &str, constraints: &str) -> Self {
        let mut dep_map: HashMap<String, BTreeSet<String>> = HashMap::new();
        for line in deps.lines() {
            let mut toks = line.split_whitespace();
            let Some(u) = toks.next() else { continue };
            dep_map
                .entry(u.to_string())
                .or_default()
                .extend(toks.map(str::to_string));
        }
        let constraints = constraints
            .lines()
            .map(|l| l.split_whitespace().map(str::to_string).collect::<Vec<_>>())
            .filter(|c| !c.is_empty())
            .collect();
        Self {
            deps: dep_map,
            constraints,
        }
    }

    pub fn load(deps_path: &Path, constraints_path: &Path) -> Result<Self> {
        let deps = std::fs::read_to_string(deps_path).map_err(|e| Error::io(deps_path, e))?;
        let cons = std::fs::read_to_string(constraints_path)
            .map_err(|e| Error::io(constraints_path, e))?;
        Ok(Self::parse(&deps, &cons))
    }

    pub fn num_constraints(&self) -> usize {
        self.constraints.len()
    }

    /// 风险节点下属的计算节点名
    fn leaves_of(&self, risk: &str) -> BTreeSet<&str> {
        self.deps
            .get(risk)
            .into_iter()
            .flatten()
            .filter(|child| self.deps.get(*child).is_some_and(|d| d.len() == 1))
            .map(String::as_str)
            .collect()
    }

    fn allocate_constrained(
        &self,
        free: &[NodeId],
        line: &[String],
        need: usize,
    ) -> Option<Vec<NodeId>> {
        let mut sets: Vec<Vec<NodeId>> = Vec::with_capacity(line.len());
        let mut unconstrained: BTreeSet<NodeId> = free.iter().copied().collect();
        for risk in line {
            let leaves = self.leaves_of(risk);
            let dependent: Vec<NodeId> = free
                .iter()
                .copied()
                .filter(|n| leaves.contains(n.0.to_string().as_str()))
                .collect();
            for n in &dependent {
                unconstrained.remove(n);
            }
            sets.push(dependent);
        }

        let constrained_needed = if unconstrained.len() >= need {
            1
        } else {
            need - unconstrained.len()
        };
        if !remove_constraint_set(constrained_needed, &mut sets) {
            return None;
        }
        while remove_constraint_set(constrained_needed, &mut sets) {}

        let mut constrained = BTreeSet::new();
        for set in &sets {
            for &n in set.iter().rev() {
                if constrained.len() >= need {
                    break;
                }
                constrained.insert(n);
            }
        }
        let mut picked_free = BTreeSet::new();
        for &n in unconstrained.iter().rev() {
            if constrained.len() + picked_free.len() >= need {
                break;
            }
            picked_free.insert(n);
        }
        if constrained.len() + picked_free.len() < need {
            return None;
        }
        Some(picked_free.into_iter().chain(constrained).collect())
    }
}

/// 移除一个风险节点：要么清掉空集合，要么去掉一个移除后剩余节点仍够用的集合
fn remove_constraint_set(needed: usize, sets: &mut Vec<Vec<NodeId>>) -> bool {
    if sets.len() == 1 {
        return false;
    }
    let before = sets.len();
    sets.retain(|s| !s.is_empty());
    let union: BTreeSet<NodeId> = sets.iter().flatten().copied().collect();
    if union.is_empty() {
        return false;
    }
    if sets.len() < before {
        return true;
    }
    let Some(idx) = sets
        .iter()
        .position(|s| union.len().saturating_sub(s.len()) >= needed)
    else {
        return false;
    };
    let removed = sets.remove(idx);
    for s in sets.iter_mut() {
        s.retain(|n| !removed.contains(n));
    }
    true
}

impl Allocator for ConstraintAllocator {
    fn name(&self) -> &'static str {
        "constraint"
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
        for (i, line) in self.constraints.iter().enumerate() {
            if let Some(nodes) = self.allocate_constrained(&free_list, line, need) {
                debug!(constraint = i, "约束满足");
                return Ok(Some(AllocInfo::new(Arc::clone(job), nodes)));
            }
            trace!(constraint = i, "约束无法满足");
        }
        debug!("所有约束均无法满足，从高下标取节点");
        let nodes = free_list.into_iter().rev().take(need).collect();
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }

    fn setup_info(&self) -> String {
        format!("constraint allocator ({} constraint lines)", self.constraints.len())
    }
}
