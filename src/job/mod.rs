//! 作业描述
//!
//! 作业到达后不可变；开始/结束时间由调度器与仿真驱动各自记录。

mod comm;
mod trace;

pub use comm::{CommGraph, TaskCommInfo};
pub use trace::{parse_trace, read_trace, validate_jobs};

use crate::sim::SimTime;
use std::fmt;

/// 作业编号（按到达顺序分配）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "job {}", self.0)
    }
}

#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub arrival: SimTime,
    /// 需要的处理器（核）数，也是任务数
    pub procs: usize,
    /// 实际运行时长
    pub actual_runtime: u64,
    /// 用户给出的预估运行时长
    pub est_runtime: u64,
    pub comm: TaskCommInfo,
}

impl Job {
    /// 全互连通信的作业
    pub fn new(id: u64, arrival: u64, procs: usize, actual_runtime: u64, est_runtime: u64) -> Self {
        Self {
            id: JobId(id),
            arrival: SimTime(arrival),
            procs,
            actual_runtime,
            est_runtime,
            comm: TaskCommInfo::all_to_all(procs),
        }
    }

    pub fn with_comm(mut self, comm: TaskCommInfo) -> Self {
        self.comm = comm;
        self
    }

    pub fn num_tasks(&self) -> usize {
        self.procs
    }
}
