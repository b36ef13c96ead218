//! 标识符类型
//!
//! 定义计算节点、链路的唯一标识符以及网格坐标。

use serde::{Deserialize, Serialize};

/// 计算节点标识符（机器内的线性下标）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

/// 链路标识符
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(pub usize);

/// 三维网格坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Coord {
    pub x: usize,
    pub y: usize,
    pub z: usize,
}

impl Coord {
    pub const fn new(x: usize, y: usize, z: usize) -> Self {
        Self { x, y, z }
    }

    pub fn get(&self, axis: usize) -> usize {
        match axis {
            0 => self.x,
            1 => self.y,
            _ => self.z,
        }
    }

    pub fn with(mut self, axis: usize, v: usize) -> Self {
        match axis {
            0 => self.x = v,
            1 => self.y = v,
            _ => self.z = v,
        }
        self
    }

    pub fn as_array(&self) -> [usize; 3] {
        [self.x, self.y, self.z]
    }
}
