//! 机器模型
//!
//! 拓扑只提供纯几何查询（距离、壳层、路由）；节点占用由 [`FreeNodes`]
//! 单独持有，并显式传给分配器。

mod dragonfly;
mod free;
mod grid;
mod id;
mod mesh;
mod torus;

pub use dragonfly::{Dragonfly, DragonflyOpts, GlobalTopology};
pub use free::FreeNodes;
pub use grid::Grid;
pub use id::{Coord, LinkId, NodeId};
pub use mesh::Mesh3D;
pub use torus::Torus3D;

use crate::error::{Error, Result};
use std::path::Path;

/// 互连拓扑
#[derive(Debug, Clone)]
pub enum Topology {
    /// 单交换机：任意两节点经过各自的节点链路相连
    Simple { num_nodes: usize },
    Mesh(Mesh3D),
    Torus(Torus3D),
    Dragonfly(Dragonfly),
}

/// 热回流矩阵：`d[i][j]` 为节点 j 的发热对节点 i 入口温度的贡献系数
#[derive(Debug, Clone, PartialEq)]
pub struct HeatMatrix {
    pub d: Vec<Vec<f64>>,
}

impl HeatMatrix {
    /// 每行一行矩阵，空白分隔
    pub fn parse(text: &str, num_nodes: usize) -> Result<Self> {
        let mut d = Vec::with_capacity(num_nodes);
        for (lineno, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let row = line
                .split_whitespace()
                .map(|t| {
                    t.parse::<f64>()
                        .map_err(|_| Error::parse(lineno + 1, format!("bad number {t:?}")))
                })
                .collect::<Result<Vec<_>>>()?;
            if row.len() != num_nodes {
                return Err(Error::parse(
                    lineno + 1,
                    format!("expected {num_nodes} columns, found {}", row.len()),
                ));
            }
            d.push(row);
        }
        if d.len() != num_nodes {
            return Err(Error::config(format!(
                "heat matrix has {} rows but the machine has {num_nodes} nodes",
                d.len()
            )));
        }
        Ok(Self { d })
    }

    pub fn load(path: &Path, num_nodes: usize) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&text, num_nodes)
    }
}

#[derive(Debug, Clone)]
pub struct Machine {
    pub topology: Topology,
    pub cores_per_node: usize,
    pub heat: Option<HeatMatrix>,
}

impl Machine {
    pub fn new(topology: Topology, cores_per_node: usize) -> Self {
        Self {
            topology,
            cores_per_node: cores_per_node.max(1),
            heat: None,
        }
    }

    pub fn simple(num_nodes: usize, cores_per_node: usize) -> Self {
        Self::new(Topology::Simple { num_nodes }, cores_per_node)
    }

    pub fn mesh(x: usize, y: usize, z: usize, cores_per_node: usize) -> Self {
        Self::new(Topology::Mesh(Mesh3D::new(x, y, z)), cores_per_node)
    }

    pub fn torus(x: usize, y: usize, z: usize, cores_per_node: usize) -> Self {
        Self::new(Topology::Torus(Torus3D::new(x, y, z)), cores_per_node)
    }

    pub fn with_heat(mut self, heat: HeatMatrix) -> Self {
        self.heat = Some(heat);
        self
    }

    pub fn num_nodes(&self) -> usize {
        match &self.topology {
            Topology::Simple { num_nodes } => *num_nodes,
            Topology::Mesh(g) => g.num_nodes(),
            Topology::Torus(g) => g.num_nodes(),
            Topology::Dragonfly(d) => d.num_nodes(),
        }
    }

    pub fn num_cores(&self) -> usize {
        self.num_nodes() * self.cores_per_node
    }

    /// 作业需要的节点数：ceil(procs / cores_per_node)
    pub fn nodes_for(&self, procs: usize) -> usize {
        procs.div_ceil(self.cores_per_node)
    }

    pub fn all_free(&self) -> FreeNodes {
        FreeNodes::all_free(self.num_nodes())
    }

    /// mesh / torus 的网格视图
    pub fn grid(&self) -> Option<&dyn Grid> {
        match &self.topology {
            Topology::Mesh(g) => Some(g as &dyn Grid),
            Topology::Torus(g) => Some(g as &dyn Grid),
            _ => None,
        }
    }

    pub fn dragonfly(&self) -> Option<&Dragonfly> {
        match &self.topology {
            Topology::Dragonfly(d) => Some(d),
            _ => None,
        }
    }

    pub fn coord(&self, node: NodeId) -> Option<Coord> {
        self.grid().map(|g| g.coord(node))
    }

    pub fn distance(&self, a: NodeId, b: NodeId) -> usize {
        match &self.topology {
            Topology::Simple { .. } => {
                if a == b {
                    0
                } else {
                    2
                }
            }
            Topology::Mesh(g) => g.distance(a, b),
            Topology::Torus(g) => g.distance(a, b),
            Topology::Dragonfly(d) => d.distance(a, b),
        }
    }

    /// 非网格拓扑没有 L∞ 的概念，退化为跳数距离
    pub fn linf_distance(&self, a: NodeId, b: NodeId) -> usize {
        match self.grid() {
            Some(g) => g.linf_distance(a, b),
            None => self.distance(a, b),
        }
    }

    /// 相邻节点之间的最小非零距离
    pub fn unit_distance(&self) -> usize {
        if self.grid().is_some() { 1 } else { 2 }
    }

    pub fn diameter(&self) -> usize {
        match &self.topology {
            Topology::Simple { num_nodes } => {
                if *num_nodes > 1 {
                    2
                } else {
                    0
                }
            }
            Topology::Mesh(g) => g.diameter(),
            Topology::Torus(g) => g.diameter(),
            Topology::Dragonfly(d) => d.diameter(),
        }
    }

    /// 以某节点为中心、距离恰为 `d` 的节点数（网格为无边界近似，其他拓扑从 0 号节点实际统计）
    pub fn nodes_at_distance(&self, d: usize) -> usize {
        match self.grid() {
            Some(g) => g.nodes_at_distance(d),
            None => {
                let origin = NodeId(0);
                (0..self.num_nodes())
                    .filter(|&i| self.distance(origin, NodeId(i)) == d)
                    .count()
            }
        }
    }

    pub fn free_at_distance(&self, free: &FreeNodes, center: NodeId, d: usize) -> Vec<NodeId> {
        match self.grid() {
            Some(g) => g.free_at_distance(free, center, d),
            None => free
                .iter_free()
                .filter(|&n| self.distance(center, n) == d)
                .collect(),
        }
    }

    pub fn free_at_linf_distance(
        &self,
        free: &FreeNodes,
        center: NodeId,
        d: usize,
    ) -> Vec<NodeId> {
        match self.grid() {
            Some(g) => g.free_at_linf_distance(free, center, d),
            None => self.free_at_distance(free, center, d),
        }
    }

    pub fn route(&self, a: NodeId, b: NodeId) -> Vec<LinkId> {
        match &self.topology {
            Topology::Simple { .. } => {
                if a == b {
                    Vec::new()
                } else {
                    vec![LinkId(a.0), LinkId(b.0)]
                }
            }
            Topology::Mesh(g) => g.route(a, b),
            Topology::Torus(g) => g.route(a, b),
            Topology::Dragonfly(d) => d.route(a, b),
        }
    }

    pub fn num_links(&self) -> usize {
        match &self.topology {
            Topology::Simple { num_nodes } => *num_nodes,
            Topology::Mesh(g) => g.num_links(),
            Topology::Torus(g) => g.num_links(),
            Topology::Dragonfly(d) => d.num_links(),
        }
    }

    /// 机器描述，用于日志与统计文件头
    pub fn setup_info(&self) -> String {
        let shape = match &self.topology {
            Topology::Simple { num_nodes } => format!("simple machine with {num_nodes} nodes"),
            Topology::Mesh(g) => {
                let [x, y, z] = g.dims();
                format!("{x}x{y}x{z} mesh")
            }
            Topology::Torus(g) => {
                let [x, y, z] = g.dims();
                format!("{x}x{y}x{z} torus")
            }
            Topology::Dragonfly(d) => {
                let o = d.opts();
                format!(
                    "dragonfly: {} groups x {} routers x {} nodes, {:?} global links",
                    d.num_groups(),
                    o.routers_per_group,
                    o.nodes_per_router,
                    o.global
                )
            }
        };
        format!("{shape}, {} cores per node", self.cores_per_node)
    }
}
