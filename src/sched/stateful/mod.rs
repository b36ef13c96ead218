//! 带预估调度表的调度器
//!
//! 每个排队作业到达时就在预估调度表里拿到一个预约：最早的、在整个预估时长内
//! 节点都够用的时刻。预约开始时刻一到就启动。作业提前结束留下的空档如何利用，
//! 由 [`Manager`] 决定。

mod manager;
mod schedule;

pub use manager::{
    ConservativeManager, DelayedCompressionManager, EvenLessManager, Manager,
    PrioritizeCompressionManager,
};
pub use schedule::{EstSchedule, Reservation};

use super::{JobComparator, Scheduler};
use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::{FreeNodes, Machine};
use crate::sim::SimTime;
use std::sync::Arc;
use tracing::{debug, trace};

/// 预估调度表与空闲节点计数，交给 [`Manager`] 操作
#[derive(Debug, Clone)]
pub struct Plan {
    pub est: EstSchedule,
    pub free_procs: usize,
    pub num_procs: usize,
    cores_per_node: usize,
}

impl Plan {
    pub fn new(num_procs: usize, cores_per_node: usize) -> Self {
        Self {
            est: EstSchedule::new(),
            free_procs: num_procs,
            num_procs,
            cores_per_node: cores_per_node.max(1),
        }
    }

    pub fn nodes_for(&self, job: &Job) -> usize {
        job.procs.div_ceil(self.cores_per_node)
    }

    /// 在给定调度表中为作业找最早开始时刻
    pub fn find_time_in(&self, sched: &EstSchedule, job: &Job, time: SimTime) -> Result<SimTime> {
        sched.find_time(self.free_procs, job, self.nodes_for(job), time)
    }

    pub fn find_time(&self, job: &Job, time: SimTime) -> Result<SimTime> {
        self.find_time_in(&self.est, job, time)
    }

    /// 把作业放进预估调度表最早的位置，返回开始时刻
    pub fn schedule(&mut self, job: &Arc<Job>, time: SimTime) -> Result<SimTime> {
        let start = self.find_time(job, time)?;
        let nodes = self.nodes_for(job);
        self.est.insert(Reservation::new(Arc::clone(job), nodes, start));
        trace!(job = %job.id, start = ?start, nodes, "预约");
        Ok(start)
    }

    /// 把作业从表中取出再重新预约；返回（原开始时刻, 新开始时刻）
    pub fn reschedule(&mut self, id: JobId, time: SimTime) -> Result<(SimTime, SimTime)> {
        let old = self
            .est
            .remove(id)
            .ok_or_else(|| Error::Internal(format!("{id} has no reservation")))?;
        let start = self.schedule(&old.job, time)?;
        Ok((old.start, start))
    }

    /// 压缩：所有未开始的作业按原先的开始次序重新预约；任何作业都不得被推迟
    pub fn compress(&mut self, time: SimTime) -> Result<()> {
        let pending = self.est.pending();
        for r in &pending {
            self.est.remove(r.job.id);
        }
        for r in pending {
            let start = self.schedule(&r.job, time)?;
            if start > r.start {
                return Err(Error::ScheduleInconsistent {
                    time,
                    reason: format!(
                        "compression delayed {} from {} to {start}",
                        r.job.id, r.start
                    ),
                    dump: self.dump(),
                });
            }
        }
        debug!(time = ?time, jobs = self.est.num_pending(), "压缩完成");
        Ok(())
    }

    pub fn is_feasible(&self, sched: &EstSchedule) -> bool {
        sched.is_feasible(self.free_procs, self.num_procs)
    }

    /// 检查记账约束
    pub fn verify(&self) -> Result<()> {
        match self.est.violation(self.free_procs, self.num_procs) {
            None => Ok(()),
            Some((time, reason)) => Err(Error::ScheduleInconsistent {
                time,
                reason,
                dump: self.dump(),
            }),
        }
    }

    pub fn dump(&self) -> String {
        self.est.dump(self.free_procs)
    }
}

#[derive(Debug)]
pub struct StatefulScheduler {
    comp: JobComparator,
    plan: Plan,
    manager: Box<dyn Manager>,
    next: Option<(JobId, SimTime)>,
}

impl StatefulScheduler {
    pub fn new(mach: &Machine, comp: JobComparator, manager: Box<dyn Manager>) -> Self {
        Self {
            comp,
            plan: Plan::new(mach.num_nodes(), mach.cores_per_node),
            manager,
            next: None,
        }
    }

    pub fn conservative(mach: &Machine, comp: JobComparator) -> Self {
        Self::new(mach, comp, Box::new(ConservativeManager))
    }

    pub fn prioritize(mach: &Machine, comp: JobComparator, fill_times: usize) -> Self {
        Self::new(mach, comp, Box::new(PrioritizeCompressionManager::new(comp, fill_times)))
    }

    pub fn delayed(mach: &Machine, comp: JobComparator) -> Self {
        Self::new(mach, comp, Box::new(DelayedCompressionManager::new(comp)))
    }

    pub fn even_less(mach: &Machine, comp: JobComparator, bf_times: usize) -> Self {
        Self::new(mach, comp, Box::new(EvenLessManager::new(comp, bf_times)))
    }

    pub fn plan(&self) -> &Plan {
        &self.plan
    }

    pub fn manager(&self) -> &dyn Manager {
        self.manager.as_ref()
    }

    pub fn comparator(&self) -> JobComparator {
        self.comp
    }
}

impl Scheduler for StatefulScheduler {
    fn name(&self) -> &'static str {
        self.manager.name()
    }

    #[tracing::instrument(skip(self, job, _mach, _free), fields(job = %job.id))]
    fn job_arrives(
        &mut self,
        job: Arc<Job>,
        time: SimTime,
        _mach: &Machine,
        _free: &FreeNodes,
    ) -> Result<()> {
        self.plan.schedule(&job, time)?;
        self.manager.arrival(&mut self.plan, &job, time)?;
        self.plan.verify()
    }

    fn job_finishes(
        &mut self,
        job: &Arc<Job>,
        time: SimTime,
        _mach: &Machine,
        _free: &FreeNodes,
    ) -> Result<()> {
        let r = match self.plan.est.remove(job.id) {
            Some(r) if r.running => r,
            Some(_) => {
                return Err(Error::Internal(format!(
                    "{} finished before it was started",
                    job.id
                )));
            }
            None => {
                return Err(Error::Internal(format!("{} finished but has no reservation", job.id)));
            }
        };
        self.plan.free_procs += r.nodes;
        if r.end() == time {
            self.manager.on_time_finish(&mut self.plan, job, time)?;
        } else {
            debug!(job = %job.id, expected = ?r.end(), "提前结束");
            self.manager.early_finish(&mut self.plan, job, time)?;
        }
        self.plan.verify()
    }

    #[tracing::instrument(skip(self, _mach, free))]
    fn try_to_start(
        &mut self,
        time: SimTime,
        _mach: &Machine,
        free: &FreeNodes,
    ) -> Result<Option<Arc<Job>>> {
        self.next = None;
        self.manager.before_start(&mut self.plan, time)?;
        let pending = self.plan.est.pending();
        let Some(first) = pending.first() else {
            return Ok(None);
        };
        if first.start < time {
            return Err(Error::ScheduleInconsistent {
                time,
                reason: format!("{} was due at {} and never started", first.job.id, first.start),
                dump: self.plan.dump(),
            });
        }
        if first.start > time || free.num_free() < first.nodes {
            return Ok(None);
        }
        self.next = Some((first.job.id, time));
        Ok(Some(Arc::clone(&first.job)))
    }

    #[tracing::instrument(skip(self, _mach, _free))]
    fn start_next(&mut self, time: SimTime, _mach: &Machine, _free: &FreeNodes) -> Result<Arc<Job>> {
        let Some((id, at)) = self.next.take() else {
            return Err(Error::Internal(format!("start_next at {time} without a pending job")));
        };
        if at != time {
            return Err(Error::Internal(format!(
                "{id} was offered at {at} but committed at {time}"
            )));
        }
        let (job, nodes) = self
            .plan
            .est
            .mark_running(id, time)
            .map(|r| (Arc::clone(&r.job), r.nodes))
            .ok_or_else(|| Error::Internal(format!("{id} has no reservation")))?;
        let Some(left) = self.plan.free_procs.checked_sub(nodes) else {
            return Err(Error::ScheduleInconsistent {
                time,
                reason: format!("{id} needs {nodes} nodes, {} free", self.plan.free_procs),
                dump: self.plan.dump(),
            });
        };
        self.plan.free_procs = left;
        self.manager.start(&mut self.plan, &job, time)?;
        debug!(job = %id, nodes, "启动");
        self.plan.verify()?;
        Ok(job)
    }

    fn next_wakeup(&self, now: SimTime) -> Option<SimTime> {
        self.plan
            .est
            .iter()
            .filter(|r| !r.running && r.start > now)
            .map(|r| r.start)
            .min()
    }

    fn queued(&self) -> usize {
        self.plan.est.num_pending()
    }

    fn done(&mut self) {
        self.manager.done();
    }

    fn setup_info(&self) -> String {
        format!(
            "stateful scheduler ({} manager, {})",
            self.manager.name(),
            self.comp
        )
    }
}
