//! EASY 回填调度
//!
//! 队首作业拿到一个保证开始时刻：现在就放得下则为现在，否则按预估结束时间依次
//! 累加运行中作业的节点，首次够用时那个作业的预估结束时刻。队首后面的作业可以
//! 插队，前提是不会把队首推迟到保证时刻之后：要么自己在保证时刻前结束，要么
//! 保证时刻的空闲节点扣掉它之后仍然够队首用。

use super::{JobComparator, JobQueue, Scheduler};
use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::{FreeNodes, Machine};
use crate::sim::SimTime;
use std::fmt::Write as _;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug, Clone)]
struct Running {
    job: JobId,
    nodes: usize,
    est_end: SimTime,
}

#[derive(Debug)]
pub struct EasyScheduler {
    queue: JobQueue<Arc<Job>>,
    /// 按 (预估结束时刻, 作业) 排序
    running: Vec<Running>,
    guaranteed_start: SimTime,
    /// 上一次拿到保证的队首
    prev_first: Option<JobId>,
    next: Option<(JobId, SimTime)>,
}

impl EasyScheduler {
    pub fn new(comp: JobComparator) -> Self {
        Self {
            queue: JobQueue::new(comp),
            running: Vec::new(),
            guaranteed_start: SimTime::ZERO,
            prev_first: None,
            next: None,
        }
    }

    pub fn comparator(&self) -> JobComparator {
        self.queue.comparator()
    }

    /// 当前队首与其保证开始时刻
    pub fn guarantee(&self) -> Option<(JobId, SimTime)> {
        self.queue.first().map(|j| (j.id, self.guaranteed_start))
    }

    fn dump(&self) -> String {
        let mut out = String::from("running:");
        for r in &self.running {
            let _ = write!(out, " ({} nodes={} est_end={})", r.job, r.nodes, r.est_end);
        }
        out.push_str("\nqueued:");
        for j in self.queue.iter() {
            let _ = write!(out, " {}", j.id);
        }
        out
    }

    fn give_guarantee(&mut self, time: SimTime, mach: &Machine, free: &FreeNodes) -> Result<()> {
        let Some(first) = self.queue.first() else {
            return Ok(());
        };
        let (first_id, size) = (first.id, mach.nodes_for(first.procs));
        let last = self.guaranteed_start;

        let mut future_free = free.num_free();
        let mut found = (future_free >= size).then_some(time);
        if found.is_none() {
            for r in &self.running {
                future_free += r.nodes;
                if future_free >= size {
                    found = Some(r.est_end);
                    break;
                }
            }
        }
        let Some(guarantee) = found else {
            return Err(Error::ScheduleInconsistent {
                time,
                reason: format!("no reservation possible for {first_id} ({size} nodes)"),
                dump: self.dump(),
            });
        };

        if self.prev_first == Some(first_id) && last > SimTime::ZERO && last.after(1) < guarantee {
            debug!(job = %first_id, "保证时刻变差\n{}", self.dump());
            return Err(Error::GuaranteeRegressed {
                job: first_id,
                previous: last,
                new: guarantee,
            });
        }
        trace!(job = %first_id, guarantee = ?guarantee, "给出保证");
        self.guaranteed_start = guarantee;
        self.prev_first = Some(first_id);
        Ok(())
    }
}

impl Scheduler for EasyScheduler {
    fn name(&self) -> &'static str {
        "easy"
    }

    #[tracing::instrument(skip(self, job, mach, free), fields(job = %job.id))]
    fn job_arrives(
        &mut self,
        job: Arc<Job>,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<()> {
        let id = job.id;
        self.queue.insert(job);
        if self.queue.first().is_some_and(|f| f.id == id) {
            self.give_guarantee(time, mach, free)?;
        }
        Ok(())
    }

    fn job_finishes(
        &mut self,
        job: &Arc<Job>,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<()> {
        let Some(at) = self.running.iter().position(|r| r.job == job.id) else {
            return Err(Error::Internal(format!("{} finished but was not running", job.id)));
        };
        self.running.remove(at);
        self.give_guarantee(time, mach, free)
    }

    #[tracing::instrument(skip(self, mach, free))]
    fn try_to_start(
        &mut self,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<Option<Arc<Job>>> {
        self.next = None;
        // 有作业恰好此刻预估结束时先不回填
        if self.running.first().is_some_and(|r| r.est_end == time) {
            return Ok(None);
        }
        let Some(first) = self.queue.first() else {
            return Ok(None);
        };
        if time > self.guaranteed_start {
            return Err(Error::ScheduleInconsistent {
                time,
                reason: format!(
                    "{} missed its guaranteed start {}",
                    first.id, self.guaranteed_start
                ),
                dump: self.dump(),
            });
        }

        let avail = free.num_free();
        let first_need = mach.nodes_for(first.procs);
        let chosen = if avail >= first_need {
            Some(Arc::clone(first))
        } else {
            // 保证时刻之前预计会释放的节点
            let at_guarantee = avail
                + self
                    .running
                    .iter()
                    .take_while(|r| r.est_end <= self.guaranteed_start)
                    .map(|r| r.nodes)
                    .sum::<usize>();
            self.queue
                .iter()
                .skip(1)
                .find(|j| {
                    let need = mach.nodes_for(j.procs);
                    avail >= need
                        && (time.after(j.est_runtime) <= self.guaranteed_start
                            || at_guarantee >= need + first_need)
                })
                .cloned()
        };

        if let Some(job) = &chosen {
            trace!(job = %job.id, backfill = job.id != first.id, "可以启动");
            self.next = Some((job.id, time));
        }
        Ok(chosen)
    }

    #[tracing::instrument(skip(self, mach, free))]
    fn start_next(&mut self, time: SimTime, mach: &Machine, free: &FreeNodes) -> Result<Arc<Job>> {
        let Some((id, at)) = self.next.take() else {
            return Err(Error::Internal(format!("start_next at {time} without a pending job")));
        };
        if at != time {
            return Err(Error::Internal(format!(
                "{id} was offered at {at} but committed at {time}"
            )));
        }
        let was_first = self.queue.first().is_some_and(|f| f.id == id);
        let job = self
            .queue
            .remove(id)
            .ok_or_else(|| Error::Internal(format!("{id} is not queued")))?;
        let r = Running {
            job: id,
            nodes: mach.nodes_for(job.procs),
            est_end: time.after(job.est_runtime),
        };
        let pos = self
            .running
            .partition_point(|x| (x.est_end, x.job) < (r.est_end, r.job));
        self.running.insert(pos, r);
        if was_first {
            self.give_guarantee(time, mach, free)?;
        }
        debug!(job = %id, first = was_first, "启动");
        Ok(job)
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn setup_info(&self) -> String {
        format!("EASY scheduler ({})", self.comparator())
    }
}
