//! 递归坐标二分（RCB）
//!
//! 每一层只选一根轴：任务点集和节点槽位点集各自算出最宽轴及其归一化跨度，
//! 归一化跨度大的一方说了算，相同时比较最宽/最窄轴之比，仍相同时听节点的。
//! 两个点集都沿这根轴排序、从中间切开，两半分别配对递归，直到只剩一个任务。
//! 没有坐标的任务按下标排成一条线。

use super::{TaskMapInfo, TaskMapper, balanced_loads, node_point, slots};
use crate::alloc::AllocInfo;
use crate::error::Result;
use crate::machine::{Machine, NodeId};
use tracing::trace;

#[derive(Debug, Default)]
pub struct RcbTaskMapper;

type Point = [f64; 3];

/// 各轴跨度
fn spread(points: &[Point], idx: &[usize]) -> [f64; 3] {
    let mut lo = [f64::INFINITY; 3];
    let mut hi = [f64::NEG_INFINITY; 3];
    for &i in idx {
        for a in 0..3 {
            lo[a] = lo[a].min(points[i][a]);
            hi[a] = hi[a].max(points[i][a]);
        }
    }
    [hi[0] - lo[0], hi[1] - lo[1], hi[2] - lo[2]]
}

/// 点集的形状：最宽轴、该轴占总跨度的比例、最宽与最窄（非零）轴之比
#[derive(Debug, Clone, Copy)]
struct Shape {
    axis: usize,
    share: f64,
    ratio: f64,
}

fn shape(s: [f64; 3]) -> Shape {
    let mut axis = 0;
    for a in 1..3 {
        if s[a] > s[axis] {
            axis = a;
        }
    }
    let total: f64 = s.iter().sum();
    let share = if total > 0.0 { s[axis] / total } else { 0.0 };
    let narrowest = s
        .iter()
        .copied()
        .filter(|&v| v > 0.0)
        .fold(f64::INFINITY, f64::min);
    let ratio = if narrowest.is_finite() {
        s[axis] / narrowest
    } else {
        1.0
    };
    Shape { axis, share, ratio }
}

const EPS: f64 = 1e-9;

/// 两个点集共用的切分轴
fn split_axis(tasks: [f64; 3], nodes: [f64; 3]) -> usize {
    let (t, n) = (shape(tasks), shape(nodes));
    if t.share > n.share + EPS {
        t.axis
    } else if n.share > t.share + EPS {
        n.axis
    } else if t.ratio > n.ratio + EPS {
        t.axis
    } else {
        n.axis
    }
}

/// 沿 `axis` 排序，另外两轴依次作为次级键，最后按下标
fn sort_along(points: &[Point], idx: &mut [usize], axis: usize) {
    let (b, c) = ((axis + 1) % 3, (axis + 2) % 3);
    idx.sort_by(|&i, &j| {
        points[i][axis]
            .total_cmp(&points[j][axis])
            .then(points[i][b].total_cmp(&points[j][b]))
            .then(points[i][c].total_cmp(&points[j][c]))
            .then(i.cmp(&j))
    });
}

fn bisect(
    tasks: &[Point],
    task_idx: &mut [usize],
    nodes: &[Point],
    node_idx: &mut [usize],
    out: &mut [usize],
) {
    debug_assert_eq!(task_idx.len(), node_idx.len());
    match task_idx.len() {
        0 => {}
        1 => out[task_idx[0]] = node_idx[0],
        n => {
            let axis = split_axis(spread(tasks, task_idx), spread(nodes, node_idx));
            sort_along(tasks, task_idx, axis);
            sort_along(nodes, node_idx, axis);
            let mid = n / 2;
            let (tl, tr) = task_idx.split_at_mut(mid);
            let (nl, nr) = node_idx.split_at_mut(mid);
            bisect(tasks, tl, nodes, nl, out);
            bisect(tasks, tr, nodes, nr, out);
        }
    }
}

impl TaskMapper for RcbTaskMapper {
    fn name(&self) -> &'static str {
        "rcb"
    }

    #[tracing::instrument(skip(self, mach, alloc), fields(job = %alloc.job.id))]
    fn map_tasks(&mut self, mach: &Machine, alloc: &AllocInfo) -> Result<TaskMapInfo> {
        let tasks = alloc.job.num_tasks();
        let task_points: Vec<Point> = alloc
            .job
            .comm
            .task_coords()
            .filter(|c| c.len() == tasks)
            .unwrap_or_else(|| (0..tasks).map(|i| [i as f64, 0.0, 0.0]).collect());

        let slot_nodes: Vec<NodeId> = slots(&alloc.nodes, &balanced_loads(tasks, alloc.nodes.len()));
        let slot_points: Vec<Point> = slot_nodes.iter().map(|&n| node_point(mach, n)).collect();

        let mut task_idx: Vec<usize> = (0..tasks).collect();
        let mut slot_idx: Vec<usize> = (0..slot_nodes.len()).collect();
        let mut out = vec![0usize; tasks];
        bisect(&task_points, &mut task_idx, &slot_points, &mut slot_idx, &mut out);
        trace!(tasks, "RCB 完成");

        let mapping = out.into_iter().map(|s| slot_nodes[s]).collect();
        TaskMapInfo::new(mach, alloc.clone(), mapping)
    }
}
