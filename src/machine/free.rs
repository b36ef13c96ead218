//! 节点占用位图
//!
//! 机器上唯一的占用状态来源。分配器只读它；只有仿真驱动在作业
//! 开始/结束时通过 `occupy` / `release` 修改它。

use super::id::NodeId;
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct FreeNodes {
    is_free: Vec<bool>,
    num_free: usize,
}

impl FreeNodes {
    /// 全部空闲
    pub fn all_free(num_nodes: usize) -> Self {
        Self {
            is_free: vec![true; num_nodes],
            num_free: num_nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.is_free.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_free.is_empty()
    }

    pub fn is_free(&self, node: NodeId) -> bool {
        self.is_free.get(node.0).copied().unwrap_or(false)
    }

    pub fn num_free(&self) -> usize {
        self.num_free
    }

    pub fn num_busy(&self) -> usize {
        self.is_free.len() - self.num_free
    }

    /// 按下标升序遍历空闲节点
    pub fn iter_free(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.is_free
            .iter()
            .enumerate()
            .filter(|(_, f)| **f)
            .map(|(i, _)| NodeId(i))
    }

    pub fn free_list(&self) -> Vec<NodeId> {
        self.iter_free().collect()
    }

    /// 标记为占用；任一节点已被占用、重复或越界则整体失败且不做修改
    pub fn occupy(&mut self, nodes: &[NodeId]) -> Result<()> {
        for (k, n) in nodes.iter().enumerate() {
            if !self.is_free(*n) {
                for m in &nodes[..k] {
                    self.is_free[m.0] = true;
                }
                return Err(Error::Internal(format!("node {} is not free", n.0)));
            }
            self.is_free[n.0] = false;
        }
        self.num_free -= nodes.len();
        Ok(())
    }

    /// 释放；任一节点本来空闲、重复或越界则整体失败且不做修改
    pub fn release(&mut self, nodes: &[NodeId]) -> Result<()> {
        for (k, n) in nodes.iter().enumerate() {
            if n.0 >= self.is_free.len() || self.is_free[n.0] {
                for m in &nodes[..k] {
                    self.is_free[m.0] = false;
                }
                return Err(Error::Internal(format!("node {} is not busy", n.0)));
            }
            self.is_free[n.0] = true;
        }
        self.num_free += nodes.len();
        Ok(())
    }
}
