//! 带容量的图划分
//!
//! 贪心生长：每个分区从最小的未分配顶点出发，反复吸收与本区连接最紧的顶点直到
//! 填满；随后做几轮不考虑容量的局部移动，最后用 [`rebalance`] 把超额的分区
//! 挪回目标大小。

use tracing::trace;

const REFINE_PASSES: usize = 4;

fn conn_to(adj: &[Vec<(usize, f64)>], part: &[usize], v: usize, p: usize) -> f64 {
    adj[v]
        .iter()
        .filter(|(u, _)| part[*u] == p)
        .map(|(_, w)| *w)
        .sum()
}

/// 划分为 `sizes.len()` 个分区，分区 p 恰有 `sizes[p]` 个顶点；返回 `part[v]`
pub fn partition(adj: &[Vec<(usize, f64)>], sizes: &[usize]) -> Vec<usize> {
    let n = adj.len();
    debug_assert_eq!(sizes.iter().sum::<usize>(), n);
    const UNASSIGNED: usize = usize::MAX;
    let mut part = vec![UNASSIGNED; n];

    for (p, &size) in sizes.iter().enumerate() {
        let mut gain = vec![0.0f64; n];
        for _ in 0..size {
            let Some(v) = (0..n)
                .filter(|&v| part[v] == UNASSIGNED)
                .max_by(|&a, &b| gain[a].total_cmp(&gain[b]).then(b.cmp(&a)))
            else {
                break;
            };
            part[v] = p;
            for &(u, w) in &adj[v] {
                gain[u] += w;
            }
        }
    }
    // 容量之和不足时，剩余顶点放进最后一个分区，由 rebalance 兜底
    let last = sizes.len().saturating_sub(1);
    for p in part.iter_mut().filter(|p| **p == UNASSIGNED) {
        *p = last;
    }

    for pass in 0..REFINE_PASSES {
        let mut moved = 0;
        for v in 0..n {
            let here = part[v];
            let stay = conn_to(adj, &part, v, here);
            let best = (0..sizes.len())
                .filter(|&q| q != here)
                .map(|q| (q, conn_to(adj, &part, v, q)))
                .max_by(|a, b| a.1.total_cmp(&b.1).then(b.0.cmp(&a.0)));
            if let Some((q, c)) = best
                && c > stay
            {
                part[v] = q;
                moved += 1;
            }
        }
        trace!(pass, moved, "划分细化");
        if moved == 0 {
            break;
        }
    }

    rebalance(adj, &mut part, sizes);
    part
}

/// 把超出目标大小的分区中的顶点挪到不足的分区，每次挪动损失最小的那个
pub fn rebalance(adj: &[Vec<(usize, f64)>], part: &mut [usize], sizes: &[usize]) {
    let mut count = vec![0usize; sizes.len()];
    for &p in part.iter() {
        count[p] += 1;
    }
    loop {
        let Some(over) = (0..sizes.len()).find(|&p| count[p] > sizes[p]) else {
            return;
        };
        let Some(under) = (0..sizes.len()).find(|&p| count[p] < sizes[p]) else {
            return;
        };
        let Some(v) = (0..part.len())
            .filter(|&v| part[v] == over)
            .max_by(|&a, &b| {
                let ga = conn_to(adj, part, a, under) - conn_to(adj, part, a, over);
                let gb = conn_to(adj, part, b, under) - conn_to(adj, part, b, over);
                ga.total_cmp(&gb).then(b.cmp(&a))
            })
        else {
            return;
        };
        part[v] = under;
        count[over] -= 1;
        count[under] += 1;
    }
}
