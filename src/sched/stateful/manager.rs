//! 预估调度表的维护策略
//!
//! 各策略只在“什么时候、多激进地把作业往前挪”上不同；任何一次挪动都不允许把
//! 已有预约推迟。

use super::{EstSchedule, Plan, Reservation};
use crate::error::{Error, Result};
use crate::job::Job;
use crate::sched::{JobComparator, JobQueue};
use crate::sim::SimTime;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, trace};

pub trait Manager: fmt::Debug {
    fn name(&self) -> &'static str;

    /// 作业到达；调用时作业已经按最早位置预约
    fn arrival(&mut self, _plan: &mut Plan, _job: &Arc<Job>, _time: SimTime) -> Result<()> {
        Ok(())
    }

    /// 作业启动；调用时其预约已标记为运行、空闲计数已扣除
    fn start(&mut self, _plan: &mut Plan, _job: &Arc<Job>, _time: SimTime) -> Result<()> {
        Ok(())
    }

    /// 作业恰好在预估时刻结束
    fn on_time_finish(&mut self, _plan: &mut Plan, _job: &Arc<Job>, _time: SimTime) -> Result<()> {
        Ok(())
    }

    /// 作业早于预估结束，留下了空档
    fn early_finish(&mut self, plan: &mut Plan, job: &Arc<Job>, time: SimTime) -> Result<()>;

    /// 每次尝试启动之前
    fn before_start(&mut self, _plan: &mut Plan, _time: SimTime) -> Result<()> {
        Ok(())
    }

    fn done(&mut self) {}
}

fn delayed_error(plan: &Plan, job: &Job, old: SimTime, new: SimTime, time: SimTime) -> Error {
    Error::ScheduleInconsistent {
        time,
        reason: format!("backfilling moved {} from {old} to later {new}", job.id),
        dump: plan.dump(),
    }
}

/// 每次提前结束都压缩
#[derive(Debug, Default, Clone, Copy)]
pub struct ConservativeManager;

impl Manager for ConservativeManager {
    fn name(&self) -> &'static str {
        "cons"
    }

    fn early_finish(&mut self, plan: &mut Plan, _job: &Arc<Job>, time: SimTime) -> Result<()> {
        plan.compress(time)
    }
}

/// 提前结束时先按优先级逐个尝试回填，连续成功 `fill_times` 轮才压缩
#[derive(Debug)]
pub struct PrioritizeCompressionManager {
    fill_times: usize,
    backfill: JobQueue<Arc<Job>>,
    /// `streaks[k]`：连续回填成功 k 轮后停下的次数
    streaks: Vec<u64>,
}

impl PrioritizeCompressionManager {
    pub fn new(comp: JobComparator, fill_times: usize) -> Self {
        Self {
            fill_times,
            backfill: JobQueue::new(comp),
            streaks: vec![0; fill_times + 1],
        }
    }

    pub fn streaks(&self) -> &[u64] {
        &self.streaks
    }
}

impl Manager for PrioritizeCompressionManager {
    fn name(&self) -> &'static str {
        "prioritize"
    }

    fn arrival(&mut self, _plan: &mut Plan, job: &Arc<Job>, _time: SimTime) -> Result<()> {
        self.backfill.insert(Arc::clone(job));
        Ok(())
    }

    fn start(&mut self, _plan: &mut Plan, job: &Arc<Job>, _time: SimTime) -> Result<()> {
        self.backfill.remove(job.id);
        Ok(())
    }

    fn early_finish(&mut self, plan: &mut Plan, _job: &Arc<Job>, time: SimTime) -> Result<()> {
        if self.fill_times == 0 {
            return plan.compress(time);
        }
        let candidates: Vec<Arc<Job>> = self.backfill.iter().cloned().collect();
        let mut rounds = 0;
        let mut cut_off = false;
        while rounds < self.fill_times {
            let mut improved = false;
            for job in &candidates {
                let (old, new) = plan.reschedule(job.id, time)?;
                if new > old {
                    return Err(delayed_error(plan, job, old, new, time));
                }
                if new < old {
                    trace!(job = %job.id, old = ?old, new = ?new, "回填成功");
                    improved = true;
                    break;
                }
            }
            cut_off = improved;
            if !improved {
                break;
            }
            rounds += 1;
        }
        self.streaks[rounds] += 1;
        if cut_off {
            plan.compress(time)?;
        }
        Ok(())
    }

    fn done(&mut self) {
        for (k, n) in self.streaks.iter().enumerate().filter(|(_, n)| **n > 0) {
            debug!(rounds = k, times = n, "连续回填统计");
        }
    }
}

/// 不主动压缩：到达时看有没有别的作业能填进新作业前面的空档，
/// 其余时候只把能立即开始的作业挪到现在
#[derive(Debug)]
pub struct DelayedCompressionManager {
    backfill: JobQueue<Arc<Job>>,
    moved: u64,
}

impl DelayedCompressionManager {
    pub fn new(comp: JobComparator) -> Self {
        Self {
            backfill: JobQueue::new(comp),
            moved: 0,
        }
    }

    /// 被挪到当前时刻开始的次数
    pub fn moved(&self) -> u64 {
        self.moved
    }

    fn fill(&mut self, plan: &mut Plan, time: SimTime) -> Result<()> {
        let candidates: Vec<Arc<Job>> = self.backfill.iter().cloned().collect();
        for job in candidates {
            let Some(old) = plan.est.remove(job.id) else {
                continue;
            };
            if plan.find_time(&job, time)? == time && old.start != time {
                plan.schedule(&job, time)?;
                self.moved += 1;
                trace!(job = %job.id, from = ?old.start, "挪到现在");
            } else {
                plan.est.insert(old);
            }
        }
        Ok(())
    }
}

impl Manager for DelayedCompressionManager {
    fn name(&self) -> &'static str {
        "delayed"
    }

    fn arrival(&mut self, plan: &mut Plan, job: &Arc<Job>, time: SimTime) -> Result<()> {
        let Some(placed) = plan.est.remove(job.id) else {
            return Err(Error::Internal(format!("{} arrived without a reservation", job.id)));
        };
        self.backfill.insert(Arc::clone(job));
        let window_end = placed.start.after(job.est_runtime);
        let mut moved = false;

        let candidates: Vec<Arc<Job>> = self.backfill.iter().cloned().collect();
        for other in candidates {
            let is_new = other.id == job.id;
            let old = if is_new {
                None
            } else {
                match plan.est.remove(other.id) {
                    Some(r) => Some(r),
                    None => continue,
                }
            };
            let old_start = old.as_ref().map_or(placed.start, |r| r.start);
            let t = plan.find_time(&other, time)?;
            if t <= window_end && t != old_start {
                plan.schedule(&other, time)?;
                moved |= is_new;
            } else if let Some(r) = old {
                plan.est.insert(r);
            }
        }
        if !moved {
            plan.schedule(job, time)?;
        }
        Ok(())
    }

    fn start(&mut self, _plan: &mut Plan, job: &Arc<Job>, _time: SimTime) -> Result<()> {
        self.backfill.remove(job.id);
        Ok(())
    }

    fn early_finish(&mut self, plan: &mut Plan, _job: &Arc<Job>, time: SimTime) -> Result<()> {
        self.fill(plan, time)
    }

    fn before_start(&mut self, plan: &mut Plan, time: SimTime) -> Result<()> {
        self.fill(plan, time)
    }
}

/// 另外维护一份“保证”调度表。回填只有在保证表仍然可行时才不动它，
/// 否则用当前预估表整体替换保证表。
#[derive(Debug)]
pub struct EvenLessManager {
    bf_times: usize,
    backfill: JobQueue<Arc<Job>>,
    guarantee: EstSchedule,
}

impl EvenLessManager {
    pub fn new(comp: JobComparator, bf_times: usize) -> Self {
        Self {
            bf_times,
            backfill: JobQueue::new(comp),
            guarantee: EstSchedule::new(),
        }
    }

    pub fn guarantee(&self) -> &EstSchedule {
        &self.guarantee
    }

    fn backfill_pass(&mut self, plan: &mut Plan, time: SimTime) -> Result<()> {
        let candidates: Vec<Arc<Job>> = self.backfill.iter().cloned().collect();
        for _ in 0..self.bf_times {
            for job in &candidates {
                let (old, new) = plan.reschedule(job.id, time)?;
                if new == time && old != time {
                    // 现在就开始：检查保证表是否还能成立
                    let saved = self.guarantee.remove(job.id);
                    let nodes = plan.nodes_for(job);
                    self.guarantee
                        .insert(Reservation::new(Arc::clone(job), nodes, new));
                    let ok = plan.is_feasible(&self.guarantee);
                    self.guarantee.remove(job.id);
                    if let Some(s) = saved {
                        self.guarantee.insert(s);
                    }
                    if !ok {
                        trace!(job = %job.id, "保证表不可行，改用预估表");
                        self.guarantee = plan.est.clone();
                    }
                }
                if new < old {
                    break;
                }
                if new > old {
                    return Err(delayed_error(plan, job, old, new, time));
                }
            }
        }
        plan.compress(time)
    }
}

impl Manager for EvenLessManager {
    fn name(&self) -> &'static str {
        "elc"
    }

    fn arrival(&mut self, plan: &mut Plan, job: &Arc<Job>, time: SimTime) -> Result<()> {
        let start = plan.find_time_in(&self.guarantee, job, time)?;
        let nodes = plan.nodes_for(job);
        self.guarantee
            .insert(Reservation::new(Arc::clone(job), nodes, start));
        self.backfill.insert(Arc::clone(job));
        plan.est = self.guarantee.clone();
        self.backfill_pass(plan, time)
    }

    fn start(&mut self, plan: &mut Plan, job: &Arc<Job>, time: SimTime) -> Result<()> {
        self.backfill.remove(job.id);
        self.guarantee.remove(job.id);
        let mut r = Reservation::new(Arc::clone(job), plan.nodes_for(job), time);
        r.running = true;
        self.guarantee.insert(r);
        if !plan.is_feasible(&self.guarantee) {
            trace!(job = %job.id, "启动后保证表不可行，改用预估表");
            self.guarantee = plan.est.clone();
        }
        Ok(())
    }

    fn on_time_finish(&mut self, _plan: &mut Plan, job: &Arc<Job>, _time: SimTime) -> Result<()> {
        self.guarantee
            .remove(job.id)
            .map(|_| ())
            .ok_or_else(|| Error::Internal(format!("{} missing from the guarantee", job.id)))
    }

    fn early_finish(&mut self, plan: &mut Plan, job: &Arc<Job>, time: SimTime) -> Result<()> {
        self.guarantee.remove(job.id);
        plan.est = self.guarantee.clone();
        self.backfill_pass(plan, time)
    }
}
