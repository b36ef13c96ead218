//! 调度器
//!
//! 调度器决定排队作业的启动次序与时刻。驱动在每批到达/结束事件之后反复调用
//! [`Scheduler::try_to_start`]，拿到作业就完成分配与映射，再用
//! [`Scheduler::start_next`] 提交，直到返回 `None`。
//! 调度器以节点为单位记账：作业占 `ceil(procs / cores_per_node)` 个节点。

mod comparator;
mod easy;
mod pq;
mod stateful;

pub use comparator::{JobComparator, JobQueue};
pub use easy::EasyScheduler;
pub use pq::PqScheduler;
pub use stateful::{
    ConservativeManager, DelayedCompressionManager, EstSchedule, EvenLessManager, Manager,
    Plan, PrioritizeCompressionManager, Reservation, StatefulScheduler,
};

use crate::error::Result;
use crate::job::Job;
use crate::machine::{FreeNodes, Machine};
use crate::sim::SimTime;
use std::fmt;
use std::sync::Arc;

pub trait Scheduler: fmt::Debug {
    fn name(&self) -> &'static str;

    /// 作业到达
    fn job_arrives(
        &mut self,
        job: Arc<Job>,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<()>;

    /// 作业结束；调用时其节点已经归还
    fn job_finishes(
        &mut self,
        job: &Arc<Job>,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<()>;

    /// 现在可以启动的作业；只是查看，提交要调用 [`Scheduler::start_next`]
    fn try_to_start(
        &mut self,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<Option<Arc<Job>>>;

    /// 提交上一次 `try_to_start` 返回的作业；调用时其节点已经被占用
    fn start_next(&mut self, time: SimTime, mach: &Machine, free: &FreeNodes)
    -> Result<Arc<Job>>;

    /// 此后需要再次尝试启动的时刻（预约在没有事件的时刻开始时需要）
    fn next_wakeup(&self, _now: SimTime) -> Option<SimTime> {
        None
    }

    /// 排队中（尚未启动）的作业数
    fn queued(&self) -> usize;

    fn done(&mut self) {}

    fn setup_info(&self) -> String;
}
