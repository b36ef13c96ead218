//! 空间填充曲线：把网格节点排成一条线
//!
//! Hilbert 曲线在能覆盖网格的最小 2^k 立方体上计算，再按曲线值排序压缩为
//! `0..N-1` 的秩，因此无论维度是否为 2 的幂，得到的都是全体节点上的双射。

use crate::machine::{Grid, NodeId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurveKind {
    Hilbert,
    /// 蛇形（boustrophedon）：相邻的秩总是物理相邻
    Snake,
}

/// 节点的线性次序
#[derive(Debug, Clone)]
pub struct CurveOrder {
    kind: CurveKind,
    sorted: bool,
    /// rank[node]
    rank: Vec<usize>,
    /// order[rank] = node
    order: Vec<NodeId>,
}

impl CurveOrder {
    /// `sort_dims` 为 true 时曲线坐标轴按维度大小升序排列
    pub fn build(grid: &dyn Grid, kind: CurveKind, sort_dims: bool) -> Self {
        let dims = grid.dims();
        let mut perm = [0usize, 1, 2];
        if sort_dims {
            perm.sort_by_key(|&a| dims[a]);
        }
        let cdims = [dims[perm[0]], dims[perm[1]], dims[perm[2]]];
        let n = grid.num_nodes();

        let order: Vec<NodeId> = match kind {
            CurveKind::Snake => snake_coords(cdims)
                .into_iter()
                .map(|c| node_of(grid, &perm, c))
                .collect(),
            CurveKind::Hilbert => {
                let mut keyed: Vec<(u64, NodeId)> = (0..n)
                    .map(|i| {
                        let node = NodeId(i);
                        let mc = grid.coord(node).as_array();
                        let c = [mc[perm[0]], mc[perm[1]], mc[perm[2]]];
                        (hilbert_key(cdims, c), node)
                    })
                    .collect();
                keyed.sort();
                keyed.into_iter().map(|(_, node)| node).collect()
            }
        };

        let mut rank = vec![0; n];
        for (r, node) in order.iter().enumerate() {
            rank[node.0] = r;
        }
        Self {
            kind,
            sorted: sort_dims,
            rank,
            order,
        }
    }

    pub fn kind(&self) -> CurveKind {
        self.kind
    }

    pub fn sorted(&self) -> bool {
        self.sorted
    }

    pub fn rank(&self, node: NodeId) -> usize {
        self.rank[node.0]
    }

    pub fn node_at_rank(&self, r: usize) -> NodeId {
        self.order[r]
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// 按秩排序
    pub fn sort_by_rank(&self, nodes: &mut [NodeId]) {
        nodes.sort_by_key(|n| self.rank[n.0]);
    }
}

fn node_of(grid: &dyn Grid, perm: &[usize; 3], c: [usize; 3]) -> NodeId {
    let mut mc = [0usize; 3];
    for k in 0..3 {
        mc[perm[k]] = c[k];
    }
    grid.node_at(crate::machine::Coord::new(mc[0], mc[1], mc[2]))
}

/// 蛇形遍历：层内行方向交替，层间 y 方向交替
fn snake_coords(dims: [usize; 3]) -> Vec<[usize; 3]> {
    let [dx, dy, dz] = dims;
    let mut out = Vec::with_capacity(dx * dy * dz);
    let mut row = 0usize;
    for z in 0..dz {
        for yi in 0..dy {
            let y = if z % 2 == 0 { yi } else { dy - 1 - yi };
            for xi in 0..dx {
                let x = if row % 2 == 0 { xi } else { dx - 1 - xi };
                out.push([x, y, z]);
            }
            row += 1;
        }
    }
    out
}

/// 曲线值：只有非退化（长度大于 1）的轴参与
fn hilbert_key(dims: [usize; 3], c: [usize; 3]) -> u64 {
    let axes: Vec<usize> = (0..3).filter(|&a| dims[a] > 1).collect();
    let side = axes.iter().map(|&a| dims[a]).max().unwrap_or(1);
    let bits = usize::BITS - (side - 1).leading_zeros();
    match axes.len() {
        0 => 0,
        1 => c[axes[0]] as u64,
        2 => hilbert_2d(bits, c[axes[0]] as u64, c[axes[1]] as u64),
        _ => hilbert_3d(bits, [c[0] as u64, c[1] as u64, c[2] as u64]),
    }
}

/// 二维 Hilbert：逐级判断象限，并对子正方形做旋转/镜像
fn hilbert_2d(bits: u32, mut x: u64, mut y: u64) -> u64 {
    let mut d = 0u64;
    let mut s = if bits == 0 { 0 } else { 1u64 << (bits - 1) };
    while s > 0 {
        let rx = u64::from(x & s != 0);
        let ry = u64::from(y & s != 0);
        d += s * s * ((3 * rx) ^ ry);
        if ry == 0 {
            if rx == 1 {
                x = s.wrapping_sub(1).wrapping_sub(x) & (s - 1);
                y = s.wrapping_sub(1).wrapping_sub(y) & (s - 1);
            }
            std::mem::swap(&mut x, &mut y);
        }
        s >>= 1;
    }
    d
}

/// 三维 Hilbert：坐标先转成“转置”形式（Skilling 变换），再交错各位
fn hilbert_3d(bits: u32, mut x: [u64; 3]) -> u64 {
    if bits == 0 {
        return 0;
    }
    let m = 1u64 << (bits - 1);

    let mut q = m;
    while q > 1 {
        let p = q - 1;
        for i in 0..3 {
            if x[i] & q != 0 {
                x[0] ^= p;
            } else {
                let t = (x[0] ^ x[i]) & p;
                x[0] ^= t;
                x[i] ^= t;
            }
        }
        q >>= 1;
    }

    for i in 1..3 {
        x[i] ^= x[i - 1];
    }
    let mut t = 0u64;
    let mut q = m;
    while q > 1 {
        if x[2] & q != 0 {
            t ^= q - 1;
        }
        q >>= 1;
    }
    for v in &mut x {
        *v ^= t;
    }

    let mut h = 0u64;
    for b in (0..bits).rev() {
        for v in &x {
            h = (h << 1) | ((v >> b) & 1);
        }
    }
    h
}
