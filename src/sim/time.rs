//! 仿真时间类型
//!
//! 调度仿真使用整数时间单位（与作业 trace 中的单位一致，通常为秒）。

use serde::{Deserialize, Serialize};
use std::fmt;

/// 仿真时间（trace 时间单位）。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(u64::MAX);

    /// 在当前时间之后经过 `dt` 个时间单位
    pub fn after(self, dt: u64) -> SimTime {
        SimTime(self.0.saturating_add(dt))
    }

    /// 两个时间点之间的间隔，`earlier` 晚于自身时返回 0
    pub fn since(self, earlier: SimTime) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
