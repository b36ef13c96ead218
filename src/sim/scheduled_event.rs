//! 调度事件
//!
//! 定义调度事件结构及其优先级比较。

use super::event::{Event, EventClass};
use super::time::SimTime;
use std::cmp::Ordering;

/// 调度事件，包含执行时间、同刻类别、序列号和事件对象。
pub struct ScheduledEvent {
    pub(crate) at: SimTime,
    pub(crate) class: EventClass,
    pub(crate) seq: u64,
    pub(crate) ev: Box<dyn Event>,
}

impl ScheduledEvent {
    fn key(&self) -> (SimTime, EventClass, u64) {
        (self.at, self.class, self.seq)
    }
}

// BinaryHeap 是 max-heap；我们需要 (时间, 类别, 序号) 最小者优先，因此反向比较。
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key()).reverse()
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for ScheduledEvent {}
