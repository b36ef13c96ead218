//! 预估调度表
//!
//! 每个作业一条预约记录（开始时刻、节点数、是否已在运行），不再拆成互相指向的
//! 开始/结束两个变更。需要时间线时按时刻汇总：同一时刻先算正长度作业的结束，
//! 再算开始，最后算零长度作业的结束。运行中的作业只贡献结束。

use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::sim::SimTime;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Reservation {
    pub job: Arc<Job>,
    pub nodes: usize,
    pub start: SimTime,
    pub running: bool,
}

impl Reservation {
    pub fn new(job: Arc<Job>, nodes: usize, start: SimTime) -> Self {
        Self {
            job,
            nodes,
            start,
            running: false,
        }
    }

    /// 预估结束时刻
    pub fn end(&self) -> SimTime {
        self.start.after(self.job.est_runtime)
    }

    fn zero_length(&self) -> bool {
        self.job.est_runtime == 0
    }

    /// 同刻开始的作业按 (预估时长, 编号) 排序
    fn start_key(&self) -> (SimTime, u64, JobId) {
        (self.start, self.job.est_runtime, self.job.id)
    }
}

/// 某一时刻汇总后的空闲节点数
#[derive(Debug, Clone, Copy)]
struct Step {
    time: SimTime,
    /// 结束与开始都处理完、零长度作业尚未结束时的水位（该时刻的最低点）
    low: i64,
    /// 该时刻全部变更处理完之后
    after: i64,
}

#[derive(Debug, Clone, Default)]
pub struct EstSchedule {
    res: BTreeMap<JobId, Reservation>,
}

impl EstSchedule {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.res.len()
    }

    pub fn is_empty(&self) -> bool {
        self.res.is_empty()
    }

    pub fn get(&self, id: JobId) -> Option<&Reservation> {
        self.res.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Reservation> {
        self.res.values()
    }

    pub fn insert(&mut self, r: Reservation) {
        self.res.insert(r.job.id, r);
    }

    pub fn remove(&mut self, id: JobId) -> Option<Reservation> {
        self.res.remove(&id)
    }

    pub fn mark_running(&mut self, id: JobId, time: SimTime) -> Option<&Reservation> {
        let r = self.res.get_mut(&id)?;
        r.start = time;
        r.running = true;
        Some(r)
    }

    /// 尚未开始的预约，按开始时刻排序
    pub fn pending(&self) -> Vec<Reservation> {
        let mut v: Vec<Reservation> = self.res.values().filter(|r| !r.running).cloned().collect();
        v.sort_by_key(Reservation::start_key);
        v
    }

    pub fn num_pending(&self) -> usize {
        self.res.values().filter(|r| !r.running).count()
    }

    fn steps(&self, free_procs: usize) -> Vec<Step> {
        // [正长度结束, 开始, 零长度结束]
        let mut changes: BTreeMap<SimTime, [i64; 3]> = BTreeMap::new();
        for r in self.res.values() {
            let n = r.nodes as i64;
            let end_slot = if r.zero_length() { 2 } else { 0 };
            changes.entry(r.end()).or_default()[end_slot] += n;
            if !r.running {
                changes.entry(r.start).or_default()[1] -= n;
            }
        }
        let mut level = free_procs as i64;
        changes
            .into_iter()
            .map(|(time, [ends, starts, zero_ends])| {
                level += ends + starts;
                let low = level;
                level += zero_ends;
                Step {
                    time,
                    low,
                    after: level,
                }
            })
            .collect()
    }

    /// 作业（不在表中）最早可以开始的时刻
    pub fn find_time(
        &self,
        free_procs: usize,
        job: &Job,
        need: usize,
        time: SimTime,
    ) -> Result<SimTime> {
        let earliest = time.max(job.arrival);
        let steps = self.steps(free_procs);
        let need = need as i64;
        let est = job.est_runtime;

        let fits = |anchor: SimTime| -> bool {
            let i = steps.partition_point(|s| s.time < anchor);
            let (level, rest) = match steps.get(i) {
                Some(s) if s.time == anchor => (s.low, i + 1),
                _ => (i.checked_sub(1).map_or(free_procs as i64, |p| steps[p].after), i),
            };
            if level < need {
                return false;
            }
            if est == 0 {
                return true;
            }
            let end = anchor.after(est);
            steps[rest..]
                .iter()
                .take_while(|s| s.time < end)
                .all(|s| s.low >= need)
        };

        let later = steps.iter().map(|s| s.time).filter(|&t| t > earliest);
        // 最后一刻被零长度作业占满时，紧随其后总能放下
        let tail = steps.last().map(|s| s.time.after(1)).filter(|&t| t > earliest);
        std::iter::once(earliest)
            .chain(later)
            .chain(tail)
            .find(|&a| fits(a))
            .ok_or_else(|| Error::ScheduleInconsistent {
                time,
                reason: format!("no slot for {} needing {need} nodes", job.id),
                dump: self.dump(free_procs),
            })
    }

    /// 第一处违反记账约束的地方：水位为负，或末尾没有回到总节点数
    pub fn violation(&self, free_procs: usize, num_procs: usize) -> Option<(SimTime, String)> {
        let steps = self.steps(free_procs);
        for s in &steps {
            if s.low < 0 || s.after < 0 {
                return Some((s.time, format!("{} nodes free", s.low.min(s.after))));
            }
        }
        let (t, last) = steps
            .last()
            .map_or((SimTime::ZERO, free_procs as i64), |s| (s.time, s.after));
        (last != num_procs as i64)
            .then(|| (t, format!("schedule ends with {last} of {num_procs} nodes free")))
    }

    pub fn is_feasible(&self, free_procs: usize, num_procs: usize) -> bool {
        self.violation(free_procs, num_procs).is_none()
    }

    pub fn dump(&self, free_procs: usize) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "free now: {free_procs}");
        for s in self.steps(free_procs) {
            let _ = writeln!(out, "  t={} low={} after={}", s.time, s.low, s.after);
        }
        let mut rs: Vec<&Reservation> = self.res.values().collect();
        rs.sort_by_key(|r| r.start_key());
        for r in rs {
            let _ = writeln!(
                out,
                "  {} nodes={} {}..{}{}",
                r.job.id,
                r.nodes,
                r.start,
                r.end(),
                if r.running { " (running)" } else { "" }
            );
        }
        out
    }
}
