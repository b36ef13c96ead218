//! 三维网格拓扑（mesh / torus 的公共部分）
//!
//! 节点下标按 x 最快变化的行主序展开：`idx = x + X * (y + Y * z)`。
//! 链路编号为 `axis * N + idx(owner)`，owner 是链路沿正方向的起点，
//! 因而编号稀疏（mesh 边界上的正向链路不存在）。

use super::free::FreeNodes;
use super::id::{Coord, LinkId, NodeId};
use std::fmt;

/// 网格拓扑：具体实现只需给出单轴上的几何，其余查询由默认方法完成。
pub trait Grid: fmt::Debug + Send + Sync {
    fn dims(&self) -> [usize; 3];

    /// 是否在各维度回绕
    fn wraps(&self) -> bool;

    /// 单轴上从 `a` 到 `b` 的跳数
    fn axis_delta(&self, axis: usize, a: usize, b: usize) -> usize;

    /// 单轴上与 `c` 相距恰好 `delta` 的所有坐标（无重复）
    fn axis_positions(&self, axis: usize, c: usize, delta: usize) -> Vec<usize>;

    /// 单轴上可能出现的最大跳数
    fn max_axis_delta(&self, axis: usize) -> usize;

    /// 单轴上从 `a` 走到 `b` 的每一步：(链路 owner 坐标, 下一坐标)
    fn axis_steps(&self, axis: usize, a: usize, b: usize) -> Vec<(usize, usize)>;

    /// 物理链路总数
    fn num_links(&self) -> usize;

    fn num_nodes(&self) -> usize {
        self.dims().iter().product()
    }

    fn coord(&self, node: NodeId) -> Coord {
        let [x, y, _] = self.dims();
        Coord::new(node.0 % x, (node.0 / x) % y, node.0 / (x * y))
    }

    fn node_at(&self, c: Coord) -> NodeId {
        let [x, y, _] = self.dims();
        NodeId(c.x + x * (c.y + y * c.z))
    }

    /// L1 距离（torus 上逐轴取回绕后的较短方向）
    fn distance(&self, a: NodeId, b: NodeId) -> usize {
        let (ca, cb) = (self.coord(a), self.coord(b));
        (0..3).map(|ax| self.axis_delta(ax, ca.get(ax), cb.get(ax))).sum()
    }

    /// L∞ 距离
    fn linf_distance(&self, a: NodeId, b: NodeId) -> usize {
        let (ca, cb) = (self.coord(a), self.coord(b));
        (0..3)
            .map(|ax| self.axis_delta(ax, ca.get(ax), cb.get(ax)))
            .max()
            .unwrap_or(0)
    }

    fn diameter(&self) -> usize {
        (0..3).map(|ax| self.max_axis_delta(ax)).sum()
    }

    /// 无边界格点上 L1 壳层的节点数，用于估计半径对应的体积
    fn nodes_at_distance(&self, d: usize) -> usize {
        if d == 0 {
            1
        } else if self.dims()[2] == 1 {
            4 * d
        } else {
            4 * d * d + 2
        }
    }

    /// 与 `center` 的 L1 距离恰好为 `d` 的空闲节点
    fn free_at_distance(&self, free: &FreeNodes, center: NodeId, d: usize) -> Vec<NodeId> {
        let c = self.coord(center);
        let mut out = Vec::new();
        for dx in 0..=d.min(self.max_axis_delta(0)) {
            for x in self.axis_positions(0, c.x, dx) {
                let rest = d - dx;
                for dy in 0..=rest.min(self.max_axis_delta(1)) {
                    let dz = rest - dy;
                    if dz > self.max_axis_delta(2) {
                        continue;
                    }
                    for y in self.axis_positions(1, c.y, dy) {
                        for z in self.axis_positions(2, c.z, dz) {
                            let n = self.node_at(Coord::new(x, y, z));
                            if free.is_free(n) {
                                out.push(n);
                            }
                        }
                    }
                }
            }
        }
        out
    }

    /// 与 `center` 的 L∞ 距离恰好为 `d` 的空闲节点（六个面、十二条棱、八个角）
    fn free_at_linf_distance(&self, free: &FreeNodes, center: NodeId, d: usize) -> Vec<NodeId> {
        let c = self.coord(center);
        let mut out = Vec::new();
        for dx in 0..=d.min(self.max_axis_delta(0)) {
            for dy in 0..=d.min(self.max_axis_delta(1)) {
                for dz in 0..=d.min(self.max_axis_delta(2)) {
                    if dx.max(dy).max(dz) != d {
                        continue;
                    }
                    for x in self.axis_positions(0, c.x, dx) {
                        for y in self.axis_positions(1, c.y, dy) {
                            for z in self.axis_positions(2, c.z, dz) {
                                let n = self.node_at(Coord::new(x, y, z));
                                if free.is_free(n) {
                                    out.push(n);
                                }
                            }
                        }
                    }
                }
            }
        }
        out
    }

    fn link_id(&self, owner: Coord, axis: usize) -> LinkId {
        LinkId(axis * self.num_nodes() + self.node_at(owner).0)
    }

    /// 维序路由：先 x，再 y，最后 z
    fn route(&self, a: NodeId, b: NodeId) -> Vec<LinkId> {
        let mut cur = self.coord(a);
        let dst = self.coord(b);
        let mut links = Vec::with_capacity(self.distance(a, b));
        for axis in 0..3 {
            for (owner, next) in self.axis_steps(axis, cur.get(axis), dst.get(axis)) {
                links.push(self.link_id(cur.with(axis, owner), axis));
                cur = cur.with(axis, next);
            }
        }
        links
    }

    /// 距离为 1 的邻居
    fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        let c = self.coord(node);
        let mut out = Vec::with_capacity(6);
        for axis in 0..3 {
            if self.max_axis_delta(axis) == 0 {
                continue;
            }
            for p in self.axis_positions(axis, c.get(axis), 1) {
                out.push(self.node_at(c.with(axis, p)));
            }
        }
        out
    }
}
