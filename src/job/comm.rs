//! 任务间通信描述（TaskCommInfo）

use serde::{Deserialize, Serialize};

/// 任务通信图
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommGraph {
    /// 每对任务之间权重为 1
    AllToAll,
    /// 规则网格形虚拟拓扑，相邻任务之间权重为 1
    Mesh { x: usize, y: usize, z: usize },
    /// 一般加权图：`adj[i]` 为 (邻居, 权重)
    Custom { adj: Vec<Vec<(usize, f64)>> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskCommInfo {
    pub size: usize,
    pub graph: CommGraph,
    /// 每个任务的坐标（可选）
    #[serde(default)]
    pub coords: Option<Vec<[f64; 3]>>,
    /// 指定的中心任务（可选）
    #[serde(default)]
    pub center_task: Option<usize>,
}

impl TaskCommInfo {
    pub fn all_to_all(size: usize) -> Self {
        Self {
            size,
            graph: CommGraph::AllToAll,
            coords: None,
            center_task: None,
        }
    }

    pub fn mesh(x: usize, y: usize, z: usize) -> Self {
        Self {
            size: x * y * z,
            graph: CommGraph::Mesh { x, y, z },
            coords: None,
            center_task: None,
        }
    }

    /// 由方阵构造；非对称矩阵按 `m[i][j] + m[j][i]` 对称化，对角线忽略
    pub fn from_matrix(m: &[Vec<f64>]) -> Self {
        let n = m.len();
        let mut adj = vec![Vec::new(); n];
        for i in 0..n {
            for j in (i + 1)..n {
                let w = m[i].get(j).copied().unwrap_or(0.0) + m[j].get(i).copied().unwrap_or(0.0);
                if w > 0.0 {
                    adj[i].push((j, w));
                    adj[j].push((i, w));
                }
            }
        }
        Self {
            size: n,
            graph: CommGraph::Custom { adj },
            coords: None,
            center_task: None,
        }
    }

    pub fn with_coords(mut self, coords: Vec<[f64; 3]>, center_task: Option<usize>) -> Self {
        self.coords = Some(coords);
        self.center_task = center_task;
        self
    }

    fn mesh_pos(i: usize, x: usize, y: usize) -> [usize; 3] {
        [i % x, (i / x) % y, i / (x * y)]
    }

    /// 物化的对称邻接表
    pub fn adjacency(&self) -> Vec<Vec<(usize, f64)>> {
        match &self.graph {
            CommGraph::AllToAll => (0..self.size)
                .map(|i| (0..self.size).filter(|&j| j != i).map(|j| (j, 1.0)).collect())
                .collect(),
            CommGraph::Mesh { x, y, z } => {
                let (x, y, z) = (*x, *y, *z);
                (0..self.size)
                    .map(|i| {
                        let p = Self::mesh_pos(i, x, y);
                        let dims = [x, y, z];
                        let mut nb = Vec::with_capacity(6);
                        for axis in 0..3 {
                            let stride = match axis {
                                0 => 1,
                                1 => x,
                                _ => x * y,
                            };
                            if p[axis] > 0 {
                                nb.push((i - stride, 1.0));
                            }
                            if p[axis] + 1 < dims[axis] {
                                nb.push((i + stride, 1.0));
                            }
                        }
                        nb
                    })
                    .collect()
            }
            CommGraph::Custom { adj } => adj.clone(),
        }
    }

    /// 任务坐标：显式给出的坐标，或网格通信图中的位置
    pub fn task_coords(&self) -> Option<Vec<[f64; 3]>> {
        if let Some(c) = &self.coords {
            return Some(c.clone());
        }
        match &self.graph {
            CommGraph::Mesh { x, y, .. } => Some(
                (0..self.size)
                    .map(|i| {
                        let p = Self::mesh_pos(i, *x, *y);
                        [p[0] as f64, p[1] as f64, p[2] as f64]
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    /// 总通信量（每条无向边计一次）
    pub fn total_weight(&self) -> f64 {
        self.adjacency()
            .iter()
            .enumerate()
            .flat_map(|(i, nb)| nb.iter().filter(move |(j, _)| *j > i).map(|(_, w)| *w))
            .sum()
    }
}
