//! 集群世界
//!
//! 持有机器、占用状态、调度器、分配器、映射器和统计。只有这里会修改
//! [`FreeNodes`]：分配器给出节点，这里负责占用和归还。

use super::{JobCompletion, RuntimeModel, StartJobs, TimePerDistance};
use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::{FreeNodes, Machine};
use crate::sched::Scheduler;
use crate::sim::{SimTime, Simulator, World};
use crate::stats::{Stats, Summary};
use crate::taskmap::{TaskMapInfo, TaskMapper};
use std::any::Any;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, error, info};

pub struct ClusterWorld {
    pub machine: Machine,
    pub free: FreeNodes,
    pub scheduler: Box<dyn Scheduler>,
    pub allocator: Box<dyn Allocator>,
    pub mapper: Box<dyn TaskMapper>,
    pub stats: Stats,
    running: HashMap<JobId, TaskMapInfo>,
    /// 已经安排了启动尝试的时刻
    start_requests: BTreeSet<SimTime>,
    /// 为空时作业按实际时长运行
    runtime: Option<RuntimeModel>,
    arrived: usize,
    finished: usize,
    error: Option<Error>,
}

impl ClusterWorld {
    pub fn new(
        machine: Machine,
        scheduler: Box<dyn Scheduler>,
        allocator: Box<dyn Allocator>,
        mapper: Box<dyn TaskMapper>,
    ) -> Self {
        let free = machine.all_free();
        Self {
            machine,
            free,
            scheduler,
            allocator,
            mapper,
            stats: Stats::new(),
            running: HashMap::new(),
            start_requests: BTreeSet::new(),
            runtime: None,
            arrived: 0,
            finished: 0,
            error: None,
        }
    }

    /// 运行时间随映射的通信距离放大
    pub fn with_time_per_distance(mut self, tpd: TimePerDistance) -> Self {
        self.runtime = Some(RuntimeModel::new(tpd));
        self
    }

    pub fn running(&self) -> usize {
        self.running.len()
    }

    pub fn finished(&self) -> usize {
        self.finished
    }

    pub fn error(&self) -> Option<&Error> {
        self.error.as_ref()
    }

    /// 运行结束后取出致命错误
    pub fn take_error(&mut self) -> Option<Error> {
        self.error.take()
    }

    /// 记录致命错误；仿真器随后停止派发事件
    pub(crate) fn fail(&mut self, now: SimTime, e: Error) {
        error!(now = ?now, "{e}");
        if self.error.is_none() {
            self.error = Some(e);
        }
    }

    /// 在 `at` 时刻安排一次启动尝试（同一时刻只安排一次）
    pub(crate) fn request_start(&mut self, sim: &mut Simulator, at: SimTime) {
        if self.start_requests.insert(at) {
            sim.schedule(at, StartJobs);
        }
    }

    pub(crate) fn on_arrival(&mut self, job: Arc<Job>, sim: &mut Simulator) -> Result<()> {
        let now = sim.now();
        debug!(job = %job.id, procs = job.procs, "作业到达");
        self.arrived += 1;
        self.stats.job_arrives(now);
        self.scheduler
            .job_arrives(job, now, &self.machine, &self.free)?;
        self.request_start(sim, now);
        Ok(())
    }

    pub(crate) fn on_completion(&mut self, id: JobId, sim: &mut Simulator) -> Result<()> {
        let now = sim.now();
        let tmi = self
            .running
            .remove(&id)
            .ok_or_else(|| Error::Internal(format!("{id} completed but is not running")))?;
        self.free.release(&tmi.alloc.nodes)?;
        self.allocator.deallocate(&tmi.alloc)?;
        let job = Arc::clone(&tmi.alloc.job);
        self.scheduler
            .job_finishes(&job, now, &self.machine, &self.free)?;
        self.stats.job_finishes(&job, now)?;
        self.finished += 1;
        debug!(job = %id, free = self.free.num_free(), "作业结束");
        self.request_start(sim, now);
        Ok(())
    }

    /// 反复询问调度器，直到它不再给出作业
    #[tracing::instrument(skip(self, sim), fields(now = ?sim.now()))]
    pub(crate) fn start_jobs(&mut self, sim: &mut Simulator) -> Result<()> {
        let now = sim.now();
        self.start_requests.remove(&now);
        while let Some(job) = self
            .scheduler
            .try_to_start(now, &self.machine, &self.free)?
        {
            let alloc = self
                .allocator
                .allocate(&self.machine, &self.free, &job)?
                .ok_or(Error::AllocationFailed { job: job.id })?;
            let tmi = self.mapper.map_tasks(&self.machine, &alloc)?;
            let run = match &mut self.runtime {
                Some(model) => model.runtime(&self.machine, &tmi)?,
                None => job.actual_runtime,
            };
            self.free.occupy(&alloc.nodes)?;
            self.scheduler
                .start_next(now, &self.machine, &self.free)?;
            self.stats.job_starts(&self.machine, &tmi, now);
            debug!(
                job = %job.id,
                nodes = alloc.nodes.len(),
                wait = now.since(job.arrival),
                run,
                "作业启动"
            );
            sim.schedule(
                now.after(run),
                JobCompletion { job: job.id },
            );
            self.running.insert(job.id, tmi);
        }
        if let Some(at) = self.scheduler.next_wakeup(now) {
            self.request_start(sim, at);
        }
        Ok(())
    }

    /// 收尾：通知各组件并汇总统计
    pub fn finish(&mut self) -> Result<Summary> {
        if let Some(e) = self.error.take() {
            return Err(e);
        }
        self.scheduler.done();
        self.allocator.done();
        if self.finished != self.arrived {
            return Err(Error::Internal(format!(
                "{} of {} jobs never finished ({} still queued)",
                self.arrived - self.finished,
                self.arrived,
                self.scheduler.queued()
            )));
        }
        let summary = self.stats.summary(&self.machine);
        info!(
            jobs = summary.jobs,
            makespan = summary.makespan,
            mean_wait = summary.mean_wait,
            utilization = summary.utilization,
            "仿真统计"
        );
        Ok(summary)
    }
}

impl World for ClusterWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn halted(&self) -> bool {
        self.error.is_some()
    }
}
