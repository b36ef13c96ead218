//! 最近邻分配器族
//!
//! 由三部分组合而成：中心生成器给出候选中心，点收集器从中心向外逐层
//! 收集最近的 N 个空闲节点，打分器给候选集合打分；取得分最低的组合。
//! 预设组合：GenAlg、MM、MC1x1、Hybrid。

use super::curve::{CurveKind, CurveOrder};
use super::energy;
use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{FreeNodes, Machine, NodeId};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tracing::{debug, trace};

/// 候选中心
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CenterGenerator {
    /// 所有节点
    All,
    /// 所有空闲节点
    Free,
    /// 空闲节点坐标在各轴上取值的所有组合（网格线交点）
    Intersection,
    /// 热回流线性规划中取值为正的节点
    Energy,
}

/// 收集离中心最近的空闲节点所用的距离
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PointCollector {
    L1,
    LInf,
}

/// 得分相同时的次级比较
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tiebreak {
    None,
    /// 与候选集相邻的空闲节点越少越好
    FreeSpace,
    /// 贴着机器边界越多越好
    Walls,
    /// 与已占用节点相邻越多越好
    Allocated,
    /// 在蛇形曲线上的跨度越小越好
    Curve,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scorer {
    /// 两两 L1 距离之和
    Pairwise,
    /// 到中心的 L1 距离之和
    L1Center,
    /// 到中心的 L∞ 距离之和，附带次级比较
    LInf(Tiebreak),
}

#[derive(Debug, Clone)]
pub struct NearestAllocator {
    label: &'static str,
    centers: CenterGenerator,
    collector: PointCollector,
    scorer: Scorer,
    snake: Option<CurveOrder>,
}

type Score = (u64, i64);

impl NearestAllocator {
    pub fn new(
        mach: &Machine,
        centers: CenterGenerator,
        collector: PointCollector,
        scorer: Scorer,
    ) -> Result<Self> {
        Self::labelled(mach, "nearest", centers, collector, scorer)
    }

    fn labelled(
        mach: &Machine,
        label: &'static str,
        centers: CenterGenerator,
        collector: PointCollector,
        scorer: Scorer,
    ) -> Result<Self> {
        if centers == CenterGenerator::Energy && mach.heat.is_none() {
            return Err(Error::config(
                "energy-biased centers need a heat recirculation matrix (dMatrixFile)",
            ));
        }
        let snake = match scorer {
            Scorer::LInf(Tiebreak::Curve) => {
                let grid = mach.grid().ok_or_else(|| {
                    Error::config("the curve tie-breaker requires a mesh or torus machine")
                })?;
                Some(CurveOrder::build(grid, CurveKind::Snake, false))
            }
            _ => None,
        };
        Ok(Self {
            label,
            centers,
            collector,
            scorer,
            snake,
        })
    }

    pub fn gen_alg(mach: &Machine) -> Result<Self> {
        Self::labelled(
            mach,
            "genalg",
            CenterGenerator::Free,
            PointCollector::L1,
            Scorer::Pairwise,
        )
    }

    pub fn mm(mach: &Machine) -> Result<Self> {
        Self::labelled(
            mach,
            "mm",
            CenterGenerator::Intersection,
            PointCollector::L1,
            Scorer::Pairwise,
        )
    }

    pub fn mc1x1(mach: &Machine) -> Result<Self> {
        Self::labelled(
            mach,
            "mc1x1",
            CenterGenerator::Free,
            PointCollector::LInf,
            Scorer::LInf(Tiebreak::Allocated),
        )
    }

    pub fn hybrid(mach: &Machine) -> Result<Self> {
        Self::labelled(
            mach,
            "hybrid",
            CenterGenerator::Energy,
            PointCollector::L1,
            Scorer::Pairwise,
        )
    }

    /// `nearest[center,collector,scorer(,tiebreak)]`
    pub fn from_args(mach: &Machine, args: &[String]) -> Result<Self> {
        let arg = |i: usize, default: &str| args.get(i).map(String::as_str).unwrap_or(default).to_string();
        let centers = match arg(0, "free").as_str() {
            "all" => CenterGenerator::All,
            "free" => CenterGenerator::Free,
            "intersect" | "intersection" => CenterGenerator::Intersection,
            "energy" => CenterGenerator::Energy,
            other => return Err(Error::config(format!("unknown center generator {other:?}"))),
        };
        let collector = match arg(1, "l1").as_str() {
            "l1" => PointCollector::L1,
            "linf" => PointCollector::LInf,
            other => return Err(Error::config(format!("unknown point collector {other:?}"))),
        };
        let tiebreak = match arg(3, "none").as_str() {
            "none" => Tiebreak::None,
            "free" => Tiebreak::FreeSpace,
            "walls" => Tiebreak::Walls,
            "allocated" => Tiebreak::Allocated,
            "curve" => Tiebreak::Curve,
            other => return Err(Error::config(format!("unknown tie-breaker {other:?}"))),
        };
        let scorer = match arg(2, "pairwise").as_str() {
            "pairwise" => Scorer::Pairwise,
            "l1" => Scorer::L1Center,
            "linf" => Scorer::LInf(tiebreak),
            other => return Err(Error::config(format!("unknown scorer {other:?}"))),
        };
        Self::new(mach, centers, collector, scorer)
    }

    fn candidate_centers(&self, mach: &Machine, free: &FreeNodes, need: usize) -> Result<Vec<NodeId>> {
        let centers = match self.centers {
            CenterGenerator::All => (0..mach.num_nodes()).map(NodeId).collect(),
            CenterGenerator::Free => free.free_list(),
            CenterGenerator::Intersection => match mach.grid() {
                Some(g) => {
                    let mut axes: [BTreeSet<usize>; 3] = Default::default();
                    for n in free.iter_free() {
                        let c = g.coord(n).as_array();
                        for a in 0..3 {
                            axes[a].insert(c[a]);
                        }
                    }
                    let mut out = Vec::new();
                    for &z in &axes[2] {
                        for &y in &axes[1] {
                            for &x in &axes[0] {
                                out.push(g.node_at(crate::machine::Coord::new(x, y, z)));
                            }
                        }
                    }
                    out
                }
                None => free.free_list(),
            },
            CenterGenerator::Energy => {
                let weights = energy::recirculation_weights(mach, free, need)?;
                let picked: Vec<NodeId> = weights
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| **w > 1e-9)
                    .map(|(i, _)| NodeId(i))
                    .collect();
                if picked.is_empty() { free.free_list() } else { picked }
            }
        };
        Ok(centers)
    }

    /// 从中心向外逐层收集，凑够 `need` 个为止
    fn collect(&self, mach: &Machine, free: &FreeNodes, center: NodeId, need: usize) -> Option<Vec<NodeId>> {
        let mut out = Vec::with_capacity(need);
        for d in 0..=mach.diameter() {
            let shell = match self.collector {
                PointCollector::L1 => mach.free_at_distance(free, center, d),
                PointCollector::LInf => mach.free_at_linf_distance(free, center, d),
            };
            for n in shell {
                out.push(n);
                if out.len() == need {
                    return Some(out);
                }
            }
        }
        None
    }

    fn score(&self, mach: &Machine, free: &FreeNodes, center: NodeId, nodes: &[NodeId]) -> Score {
        match self.scorer {
            Scorer::Pairwise => {
                let mut s = 0u64;
                for (i, &a) in nodes.iter().enumerate() {
                    for &b in &nodes[i + 1..] {
                        s += mach.distance(a, b) as u64;
                    }
                }
                (s, 0)
            }
            Scorer::L1Center => (
                nodes.iter().map(|&n| mach.distance(center, n) as u64).sum(),
                0,
            ),
            Scorer::LInf(tb) => {
                let primary = nodes
                    .iter()
                    .map(|&n| mach.linf_distance(center, n) as u64)
                    .sum();
                (primary, self.tiebreak(tb, mach, free, nodes))
            }
        }
    }

    fn tiebreak(&self, tb: Tiebreak, mach: &Machine, free: &FreeNodes, nodes: &[NodeId]) -> i64 {
        let Some(grid) = mach.grid() else { return 0 };
        let chosen: HashSet<NodeId> = nodes.iter().copied().collect();
        match tb {
            Tiebreak::None => 0,
            Tiebreak::FreeSpace => nodes
                .iter()
                .flat_map(|&n| grid.neighbors(n))
                .filter(|nb| free.is_free(*nb) && !chosen.contains(nb))
                .count() as i64,
            Tiebreak::Walls => {
                let full = nodes.len() * 2 * (0..3).filter(|&a| grid.max_axis_delta(a) > 0).count();
                let inside: usize = nodes.iter().map(|&n| grid.neighbors(n).len()).sum();
                -((full.saturating_sub(inside)) as i64)
            }
            Tiebreak::Allocated => -(nodes
                .iter()
                .flat_map(|&n| grid.neighbors(n))
                .filter(|nb| !free.is_free(*nb))
                .count() as i64),
            Tiebreak::Curve => match &self.snake {
                Some(curve) => {
                    let ranks = nodes.iter().map(|&n| curve.rank(n));
                    let (lo, hi) = ranks.fold((usize::MAX, 0), |(lo, hi), r| (lo.min(r), hi.max(r)));
                    hi.saturating_sub(lo) as i64
                }
                None => 0,
            },
        }
    }
}

impl Allocator for NearestAllocator {
    fn name(&self) -> &'static str {
        self.label
    }

    #[tracing::instrument(skip(self, mach, free, job), fields(job = %job.id, procs = job.procs))]
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

        let mut best: Option<(Score, NodeId, Vec<NodeId>)> = None;
        for center in self.candidate_centers(mach, free, need)? {
            let Some(nodes) = self.collect(mach, free, center, need) else {
                continue;
            };
            let score = self.score(mach, free, center, &nodes);
            trace!(center = center.0, ?score, "候选中心");
            if best.as_ref().is_none_or(|(b, _, _)| score < *b) {
                best = Some((score, center, nodes));
            }
        }

        Ok(best.map(|(score, center, nodes)| {
            debug!(center = center.0, ?score, "选中中心");
            AllocInfo::new(Arc::clone(job), nodes)
        }))
    }

    fn setup_info(&self) -> String {
        format!(
            "{} allocator ({:?} centers, {:?} collector, {:?} scorer)",
            self.label, self.centers, self.collector, self.scorer
        )
    }
}
