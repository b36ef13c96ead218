//! 集群仿真
//!
//! 三种事件驱动调度循环：作业结束（归还节点、通知分配器与调度器）、作业到达
//! （交给调度器），以及同一时刻最后执行的启动尝试（调度器放行 → 分配 → 映射 →
//! 占用 → 提交 → 安排结束事件）。

mod arrival;
mod completion;
mod runtime;
mod start;
mod world;

pub use arrival::{ARRIVAL_CLASS, JobArrival};
pub use completion::{COMPLETION_CLASS, JobCompletion};
pub use runtime::{RuntimeModel, TimePerDistance};
pub use start::{START_CLASS, StartJobs};
pub use world::ClusterWorld;

use crate::error::Result;
use crate::job::Job;
use crate::sim::Simulator;
use crate::stats::Summary;
use std::sync::Arc;
use tracing::info;

/// 为每个作业安排到达事件
pub fn submit(sim: &mut Simulator, jobs: impl IntoIterator<Item = Job>) -> usize {
    let mut n = 0;
    for job in jobs {
        let at = job.arrival;
        sim.schedule(at, JobArrival { job: Arc::new(job) });
        n += 1;
    }
    n
}

/// 跑完整个作业序列并返回摘要
pub fn run(world: &mut ClusterWorld, jobs: Vec<Job>) -> Result<Summary> {
    info!(
        machine = %world.machine.setup_info(),
        scheduler = %world.scheduler.setup_info(),
        allocator = %world.allocator.setup_info(),
        mapper = %world.mapper.setup_info(),
        "集群配置"
    );
    let mut sim = Simulator::default();
    let n = submit(&mut sim, jobs);
    info!(jobs = n, "作业已提交");
    sim.run(world);
    world.finish()
}
