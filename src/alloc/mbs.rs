//! MBS（多伙伴系统）分配器
//!
//! 机器被切成边长为 2 的幂的块，块之间有父子关系。空闲块登记在 FBR
//! （Free Block Registry）中，按“秩”（块大小从小到大的序号）分组。
//! 分配时先把请求分解为 RBR（每个秩需要几块），缺哪种块就拆更大的块，
//! 实在没有就把请求拆成下一级更小的块；归还时逐级尝试与兄弟块合并。
//!
//! 块存放在下标池中，合并时子块的槽位回收进空闲链表，之后拆分时复用。

use super::{AllocInfo, Allocator};
use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::{Coord, FreeNodes, Grid, Machine, NodeId};
use std::collections::{BTreeSet, HashMap};
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MbsVariant {
    /// 每个 z 层按二维正方形从角上铺满，剩余部分递归处理；四分拆分
    Layered,
    /// 从单节点块出发，逐层把对齐的四个同尺寸正方形合并为父块
    Granular,
    /// 三维立方块，八分拆分
    Octet,
    /// 与 Layered 相同的块，但请求尽量放在单个（向上取整的）块内
    RoundUp,
}

impl MbsVariant {
    fn split_axes(self) -> usize {
        match self {
            MbsVariant::Octet => 3,
            _ => 2,
        }
    }

    fn name(self) -> &'static str {
        match self {
            MbsVariant::Layered => "mbs",
            MbsVariant::Granular => "granularmbs",
            MbsVariant::Octet => "octetmbs",
            MbsVariant::RoundUp => "roundupmbs",
        }
    }
}

#[derive(Debug, Clone)]
struct Block {
    corner: Coord,
    dims: [usize; 3],
    parent: Option<usize>,
    children: Vec<usize>,
    in_fbr: bool,
}

impl Block {
    fn size(&self) -> usize {
        self.dims.iter().product()
    }
}

#[derive(Debug, Clone)]
pub struct MbsAllocator {
    variant: MbsVariant,
    dims: [usize; 3],
    blocks: Vec<Block>,
    free_slots: Vec<usize>,
    /// 各秩对应的块大小，升序
    ordering: Vec<usize>,
    /// 每个秩上的空闲块，按 (块角节点下标, 槽位) 排序
    fbr: Vec<BTreeSet<(usize, usize)>>,
    grants: HashMap<JobId, Vec<usize>>,
}

impl MbsAllocator {
    pub fn new(mach: &Machine, variant: MbsVariant) -> Result<Self> {
        let grid = mach
            .grid()
            .ok_or_else(|| Error::config("MBS allocators require a mesh or torus machine"))?;
        let dims = grid.dims();
        let mut mbs = Self {
            variant,
            dims,
            blocks: Vec::new(),
            free_slots: Vec::new(),
            ordering: Vec::new(),
            fbr: Vec::new(),
            grants: HashMap::new(),
        };

        let base: usize = if variant == MbsVariant::Octet { 8 } else { 4 };
        let max_side = match variant {
            MbsVariant::Octet => dims.iter().copied().min().unwrap_or(1),
            _ => dims[0].min(dims[1]),
        };
        let mut size = 1;
        let mut side = 1;
        while side <= max_side {
            mbs.ordering.push(size);
            mbs.fbr.push(BTreeSet::new());
            side *= 2;
            size *= base;
        }

        match variant {
            MbsVariant::Layered | MbsVariant::RoundUp => {
                mbs.tile_layers(Coord::default(), dims)?
            }
            MbsVariant::Octet => mbs.tile_cubes(Coord::default(), dims)?,
            MbsVariant::Granular => mbs.merge_from_units()?,
        }
        mbs.verify()?;
        debug!(
            variant = ?variant,
            ranks = mbs.ordering.len(),
            blocks = mbs.free_block_count(),
            "MBS 初始化完成"
        );
        Ok(mbs)
    }

    fn node_index(&self, c: Coord) -> usize {
        c.x + self.dims[0] * (c.y + self.dims[1] * c.z)
    }

    fn new_block(&mut self, corner: Coord, dims: [usize; 3], parent: Option<usize>) -> usize {
        let b = Block {
            corner,
            dims,
            parent,
            children: Vec::new(),
            in_fbr: false,
        };
        match self.free_slots.pop() {
            Some(slot) => {
                self.blocks[slot] = b;
                slot
            }
            None => {
                self.blocks.push(b);
                self.blocks.len() - 1
            }
        }
    }

    fn rank_of(&self, size: usize) -> Option<usize> {
        self.ordering.binary_search(&size).ok()
    }

    fn insert_free(&mut self, idx: usize) -> Result<()> {
        let size = self.blocks[idx].size();
        let rank = self.rank_of(size).ok_or_else(|| Error::BlockRegistry {
            reason: format!("no rank for block size {size}"),
            dump: self.dump(),
        })?;
        let key = (self.node_index(self.blocks[idx].corner), idx);
        self.fbr[rank].insert(key);
        self.blocks[idx].in_fbr = true;
        Ok(())
    }

    fn remove_free(&mut self, idx: usize) {
        let size = self.blocks[idx].size();
        if let Some(rank) = self.rank_of(size) {
            let key = (self.node_index(self.blocks[idx].corner), idx);
            self.fbr[rank].remove(&key);
        }
        self.blocks[idx].in_fbr = false;
    }

    fn largest_pow2(n: usize) -> usize {
        if n == 0 {
            0
        } else {
            1 << (usize::BITS - 1 - n.leading_zeros())
        }
    }

    /// 每个 z 层用尽可能大的正方形铺满，剩下的两个矩形递归处理
    fn tile_layers(&mut self, corner: Coord, dims: [usize; 3]) -> Result<()> {
        if dims.contains(&0) {
            return Ok(());
        }
        let side = Self::largest_pow2(dims[0].min(dims[1]));
        let (nx, ny) = (dims[0] / side, dims[1] / side);
        for z in 0..dims[2] {
            for j in 0..ny {
                for i in 0..nx {
                    let c = Coord::new(corner.x + i * side, corner.y + j * side, corner.z + z);
                    let b = self.new_block(c, [side, side, 1], None);
                    self.insert_free(b)?;
                }
            }
        }
        self.tile_layers(
            Coord::new(corner.x + nx * side, corner.y, corner.z),
            [dims[0] - nx * side, dims[1], dims[2]],
        )?;
        self.tile_layers(
            Coord::new(corner.x, corner.y + ny * side, corner.z),
            [nx * side, dims[1] - ny * side, dims[2]],
        )
    }

    /// 用尽可能大的立方体铺满，剩下的三个长方体递归处理
    fn tile_cubes(&mut self, corner: Coord, dims: [usize; 3]) -> Result<()> {
        if dims.contains(&0) {
            return Ok(());
        }
        let side = Self::largest_pow2(dims.iter().copied().min().unwrap_or(1));
        let n = [dims[0] / side, dims[1] / side, dims[2] / side];
        for k in 0..n[2] {
            for j in 0..n[1] {
                for i in 0..n[0] {
                    let c = Coord::new(
                        corner.x + i * side,
                        corner.y + j * side,
                        corner.z + k * side,
                    );
                    let b = self.new_block(c, [side, side, side], None);
                    self.insert_free(b)?;
                }
            }
        }
        let used = [n[0] * side, n[1] * side, n[2] * side];
        self.tile_cubes(
            Coord::new(corner.x + used[0], corner.y, corner.z),
            [dims[0] - used[0], dims[1], dims[2]],
        )?;
        self.tile_cubes(
            Coord::new(corner.x, corner.y + used[1], corner.z),
            [used[0], dims[1] - used[1], dims[2]],
        )?;
        self.tile_cubes(
            Coord::new(corner.x, corner.y, corner.z + used[2]),
            [used[0], used[1], dims[2] - used[2]],
        )
    }

    /// 单节点块出发，反复把对齐且都空闲的四个同尺寸正方形合并
    fn merge_from_units(&mut self) -> Result<()> {
        for z in 0..self.dims[2] {
            for y in 0..self.dims[1] {
                for x in 0..self.dims[0] {
                    let b = self.new_block(Coord::new(x, y, z), [1, 1, 1], None);
                    self.insert_free(b)?;
                }
            }
        }
        for rank in 0..self.ordering.len().saturating_sub(1) {
            let side = 1usize << rank;
            let by_corner: HashMap<Coord, usize> = self.fbr[rank]
                .iter()
                .map(|&(_, idx)| (self.blocks[idx].corner, idx))
                .collect();
            let mut corners: Vec<Coord> = by_corner.keys().copied().collect();
            corners.sort();
            for c in corners {
                if c.x % (2 * side) != 0 || c.y % (2 * side) != 0 {
                    continue;
                }
                let quad = [
                    c,
                    Coord::new(c.x + side, c.y, c.z),
                    Coord::new(c.x, c.y + side, c.z),
                    Coord::new(c.x + side, c.y + side, c.z),
                ];
                let kids: Option<Vec<usize>> =
                    quad.iter().map(|q| by_corner.get(q).copied()).collect();
                let Some(kids) = kids else { continue };
                let parent = self.new_block(c, [2 * side, 2 * side, 1], None);
                for &k in &kids {
                    self.remove_free(k);
                    self.blocks[k].parent = Some(parent);
                }
                self.blocks[parent].children = kids;
                self.insert_free(parent)?;
            }
        }
        Ok(())
    }

    /// 把块拆成子块并登记进 FBR
    fn split(&mut self, idx: usize) -> Result<Vec<usize>> {
        let Block { corner, dims, .. } = self.blocks[idx].clone();
        let axes = self.variant.split_axes();
        let half: Vec<usize> = (0..3)
            .map(|a| if a < axes && dims[a] > 1 { dims[a] / 2 } else { dims[a] })
            .collect();
        let parts: Vec<usize> = (0..3).map(|a| dims[a] / half[a]).collect();
        if parts.iter().product::<usize>() <= 1 {
            return Err(Error::BlockRegistry {
                reason: format!("cannot split block at {corner:?} with dims {dims:?}"),
                dump: self.dump(),
            });
        }
        self.remove_free(idx);
        // 初始合并留下的整棵子树都已不在 FBR 中，槽位回收给新子块复用
        let mut stale = std::mem::take(&mut self.blocks[idx].children);
        while let Some(k) = stale.pop() {
            stale.append(&mut self.blocks[k].children);
            self.free_slots.push(k);
        }
        let mut kids = Vec::new();
        for k in 0..parts[2] {
            for j in 0..parts[1] {
                for i in 0..parts[0] {
                    let c = Coord::new(
                        corner.x + i * half[0],
                        corner.y + j * half[1],
                        corner.z + k * half[2],
                    );
                    let kid = self.new_block(c, [half[0], half[1], half[2]], Some(idx));
                    self.insert_free(kid)?;
                    kids.push(kid);
                }
            }
        }
        self.blocks[idx].children = kids.clone();
        trace!(block = idx, children = kids.len(), "拆分块");
        Ok(kids)
    }

    /// 拆更大的块直到秩 `rank` 上出现空闲块；没有更大的空闲块时返回 false
    fn split_larger(&mut self, rank: usize) -> Result<bool> {
        loop {
            if !self.fbr[rank].is_empty() {
                return Ok(true);
            }
            let Some(bigger) = ((rank + 1)..self.fbr.len()).find(|&r| !self.fbr[r].is_empty())
            else {
                return Ok(false);
            };
            let Some(&(_, idx)) = self.fbr[bigger].iter().next() else {
                return Ok(false);
            };
            self.split(idx)?;
        }
    }

    /// 子块全部空闲时合并回父块，并继续向上
    fn merge_up(&mut self, idx: usize) -> Result<()> {
        let Some(parent) = self.blocks[idx].parent else {
            return Ok(());
        };
        let kids = self.blocks[parent].children.clone();
        if kids.is_empty() || !kids.iter().all(|&k| self.blocks[k].in_fbr) {
            return Ok(());
        }
        for &k in &kids {
            self.remove_free(k);
            self.free_slots.push(k);
        }
        self.blocks[parent].children.clear();
        self.insert_free(parent)?;
        trace!(block = parent, "合并子块");
        self.merge_up(parent)
    }

    /// 贪心分解：从大到小，每个秩取能放下的最多块数
    fn factor_request(&self, need: usize) -> Vec<usize> {
        let mut rbr = vec![0; self.ordering.len()];
        let mut left = need;
        for r in (0..self.ordering.len()).rev() {
            rbr[r] = left / self.ordering[r];
            left %= self.ordering[r];
        }
        rbr
    }

    fn take_first(&mut self, rank: usize) -> Option<usize> {
        let &(_, idx) = self.fbr[rank].iter().next()?;
        self.remove_free(idx);
        Some(idx)
    }

    fn grant_by_factoring(&mut self, need: usize) -> Result<Vec<usize>> {
        let mut rbr = self.factor_request(need);
        let mut granted = Vec::new();
        for r in (0..rbr.len()).rev() {
            while rbr[r] > 0 {
                if let Some(idx) = self.take_first(r) {
                    granted.push(idx);
                    rbr[r] -= 1;
                } else if self.split_larger(r)? {
                    continue;
                } else if r > 0 {
                    let ratio = self.ordering[r] / self.ordering[r - 1];
                    rbr[r - 1] += rbr[r] * ratio;
                    rbr[r] = 0;
                } else {
                    return Err(Error::BlockRegistry {
                        reason: format!("ran out of unit blocks while placing {need} nodes"),
                        dump: self.dump(),
                    });
                }
            }
        }
        Ok(granted)
    }

    /// 在一个块内部精确切出 `need` 个节点；用不完的子块留在 FBR
    fn carve(&mut self, idx: usize, need: usize, granted: &mut Vec<usize>) -> Result<()> {
        if need == self.blocks[idx].size() {
            self.remove_free(idx);
            granted.push(idx);
            return Ok(());
        }
        let kids = self.split(idx)?;
        let mut left = need;
        for k in kids {
            if left == 0 {
                break;
            }
            let size = self.blocks[k].size();
            if left >= size {
                self.remove_free(k);
                granted.push(k);
                left -= size;
            } else {
                self.carve(k, left, granted)?;
                left = 0;
            }
        }
        Ok(())
    }

    fn grant_round_up(&mut self, need: usize) -> Result<Option<Vec<usize>>> {
        let Some(rank) = self.ordering.iter().position(|&s| s >= need) else {
            return Ok(None);
        };
        if !self.split_larger(rank)? {
            return Ok(None);
        }
        let Some(&(_, idx)) = self.fbr[rank].iter().next() else {
            return Ok(None);
        };
        let mut granted = Vec::new();
        self.carve(idx, need, &mut granted)?;
        Ok(Some(granted))
    }

    fn block_nodes(&self, idx: usize, out: &mut Vec<NodeId>) {
        let b = &self.blocks[idx];
        for z in 0..b.dims[2] {
            for y in 0..b.dims[1] {
                for x in 0..b.dims[0] {
                    let c = Coord::new(b.corner.x + x, b.corner.y + y, b.corner.z + z);
                    out.push(NodeId(self.node_index(c)));
                }
            }
        }
    }

    /// 块表的槽位数，包括等待复用的空槽
    pub fn block_slots(&self) -> usize {
        self.blocks.len()
    }

    pub fn free_block_count(&self) -> usize {
        self.fbr.iter().map(BTreeSet::len).sum()
    }

    /// FBR 中的节点总数
    pub fn free_capacity(&self) -> usize {
        self.fbr
            .iter()
            .zip(&self.ordering)
            .map(|(set, size)| set.len() * size)
            .sum()
    }

    /// FBR 快照：每个秩上空闲块的 (角, 尺寸)
    pub fn snapshot(&self) -> Vec<Vec<(Coord, [usize; 3])>> {
        self.fbr
            .iter()
            .map(|set| {
                set.iter()
                    .map(|&(_, idx)| (self.blocks[idx].corner, self.blocks[idx].dims))
                    .collect()
            })
            .collect()
    }

    /// FBR 文本转储，用于一致性错误诊断
    pub fn dump(&self) -> String {
        let mut s = String::new();
        for (rank, set) in self.fbr.iter().enumerate() {
            let size = self.ordering.get(rank).copied().unwrap_or(0);
            let _ = write!(s, "rank {rank} (size {size}):");
            for &(_, idx) in set {
                let b = &self.blocks[idx];
                let _ = write!(
                    s,
                    " [({},{},{}) {}x{}x{}]",
                    b.corner.x, b.corner.y, b.corner.z, b.dims[0], b.dims[1], b.dims[2]
                );
            }
            s.push('\n');
        }
        s
    }

    /// 检查 FBR 与 ordering 一致
    pub fn verify(&self) -> Result<()> {
        if self.fbr.len() != self.ordering.len() {
            return Err(Error::BlockRegistry {
                reason: format!(
                    "{} FBR ranks but {} block sizes",
                    self.fbr.len(),
                    self.ordering.len()
                ),
                dump: self.dump(),
            });
        }
        for (rank, set) in self.fbr.iter().enumerate() {
            for &(_, idx) in set {
                if self.blocks[idx].size() != self.ordering[rank] {
                    return Err(Error::BlockRegistry {
                        reason: format!(
                            "block of size {} registered at rank {rank} (size {})",
                            self.blocks[idx].size(),
                            self.ordering[rank]
                        ),
                        dump: self.dump(),
                    });
                }
            }
        }
        Ok(())
    }
}

impl Allocator for MbsAllocator {
    fn name(&self) -> &'static str {
        self.variant.name()
    }

    #[tracing::instrument(skip(self, mach, free, job), fields(job = %job.id, procs = job.procs))]
    fn allocate(
        &mut self,
        mach: &Machine,
        free: &FreeNodes,
        job: &Arc<Job>,
    ) -> Result<Option<AllocInfo>> {
        let need = mach.nodes_for(job.procs);
        if need > free.num_free() || need > self.free_capacity() {
            return Ok(None);
        }

        let granted = match self.variant {
            MbsVariant::RoundUp => match self.grant_round_up(need)? {
                Some(g) => g,
                None => self.grant_by_factoring(need)?,
            },
            _ => self.grant_by_factoring(need)?,
        };
        self.verify()?;

        let mut nodes = Vec::with_capacity(need);
        for &idx in &granted {
            self.block_nodes(idx, &mut nodes);
        }
        debug!(blocks = granted.len(), nodes = nodes.len(), "MBS 分配完成");
        self.grants.insert(job.id, granted);
        Ok(Some(AllocInfo::new(Arc::clone(job), nodes)))
    }

    fn deallocate(&mut self, alloc: &AllocInfo) -> Result<()> {
        let Some(granted) = self.grants.remove(&alloc.job.id) else {
            return Err(Error::BlockRegistry {
                reason: format!("{} was never allocated by this MBS allocator", alloc.job.id),
                dump: self.dump(),
            });
        };
        for idx in granted {
            self.insert_free(idx)?;
            self.merge_up(idx)?;
        }
        self.verify()
    }

    fn setup_info(&self) -> String {
        let [x, y, z] = self.dims;
        format!("{} allocator on {x}x{y}x{z}", self.name())
    }
}
