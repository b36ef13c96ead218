//! 曲线分配器（FirstFit / BestFit / SortedFreeList）
//!
//! 空闲节点按曲线秩排序后切成若干“区间”（秩连续的最长段）。
//! 找不到足够长的区间时，退回到最小跨度：在空闲节点序列中取 N 个连续元素，
//! 使首尾秩之差最小。

use super::curve::{CurveKind, CurveOrder};
use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinearStrategy {
    /// 第一个足够长的区间
    FirstFit,
    /// 最短的足够长区间
    BestFit,
    /// 曲线序中的前 N 个空闲节点
    SortedFreeList,
}

#[derive(Debug, Clone)]
pub struct LinearAllocator {
    strategy: LinearStrategy,
    curve: CurveOrder,
}

impl LinearAllocator {
    pub fn new(
        mach: &Machine,
        strategy: LinearStrategy,
        kind: CurveKind,
        sort_dims: bool,
    ) -> Result<Self> {
        let grid = mach
            .grid()
            .ok_or_else(|| Error::config("linear allocators require a mesh or torus machine"))?;
        Ok(Self {
            strategy,
            curve: CurveOrder::build(grid, kind, sort_dims),
        })
    }

    /// 解析 `[sort|nosort, hilbert|snake]`，默认 nosort + snake
    pub fn from_args(mach: &Machine, strategy: LinearStrategy, args: &[String]) -> Result<Self> {
        let mut sort_dims = false;
        let mut kind = CurveKind::Snake;
        for a in args {
            match a.as_str() {
                "sort" => sort_dims = true,
                "nosort" => sort_dims = false,
                "hilbert" => kind = CurveKind::Hilbert,
                "snake" => kind = CurveKind::Snake,
                other => {
                    return Err(Error::config(format!(
                        "unknown linear allocator argument {other:?} (expected sort/nosort, hilbert/snake)"
                    )));
                }
            }
        }
        Self::new(mach, strategy, kind, sort_dims)
    }

    pub fn curve(&self) -> &CurveOrder {
        &self.curve
    }

    /// 空闲节点按秩排序
    fn sorted_free(&self, free: &FreeNodes) -> Vec<NodeId> {
        let mut nodes = free.free_list();
        self.curve.sort_by_rank(&mut nodes);
        nodes
    }

    /// 把排好序的空闲节点切成秩连续的区间
    pub fn intervals(&self, free: &FreeNodes) -> Vec<Vec<NodeId>> {
        let mut out: Vec<Vec<NodeId>> = Vec::new();
        let mut prev: Option<usize> = None;
        for n in self.sorted_free(free) {
            let r = self.curve.rank(n);
            match (prev, out.last_mut()) {
                (Some(p), Some(cur)) if p + 1 == r => cur.push(n),
                _ => out.push(vec![n]),
            }
            prev = Some(r);
        }
        out
    }

    /// 首尾秩差最小的 N 个连续空闲节点
    fn min_span(&self, sorted: &[NodeId], need: usize) -> Vec<NodeId> {
        let mut best = 0;
        let mut best_span = usize::MAX;
        for start in 0..=(sorted.len() - need) {
            let span = self.curve.rank(sorted[start + need - 1]) - self.curve.rank(sorted[start]);
            if span < best_span {
                best_span = span;
                best = start;
            }
        }
        sorted[best..best + need].to_vec()
    }
}

impl Allocator for LinearAllocator {
    fn name(&self) -> &'static str {
        match self.strategy {
            LinearStrategy::FirstFit => "firstfit",
            LinearStrategy::BestFit => "bestfit",
            LinearStrategy::SortedFreeList => "sortedfreelist",
        }
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
        if need == 0 {
            return Ok(Some(AllocInfo::new(Arc::clone(job), Vec::new())));
        }

        let nodes = match self.strategy {
            LinearStrategy::SortedFreeList => {
                self.sorted_free(free).into_iter().take(need).collect()
            }
            LinearStrategy::FirstFit | LinearStrategy::BestFit => {
                let intervals = self.intervals(free);
                let mut fits = intervals.iter().filter(|iv| iv.len() >= need);
                let chosen = match self.strategy {
                    LinearStrategy::FirstFit => fits.next(),
                    _ => fits.min_by_key(|iv| iv.len()),
                };
                match chosen {
                    Some(iv) => {
                        trace!(job = %job.id, interval_len = iv.len(), "区间满足请求");
                        iv[..need].to_vec()
                    }
                    None => {
                        trace!(job = %job.id, intervals = intervals.len(), "无足够长区间，取最小跨度");
                        self.min_span(&self.sorted_free(free), need)
                    }
                }
            }
        };
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }

    fn setup_info(&self) -> String {
        format!(
            "{} allocator ({:?} curve, {})",
            self.name(),
            self.curve.kind(),
            if self.curve.sorted() { "sorted dimensions" } else { "unsorted dimensions" }
        )
    }
}
