mod allocators;
mod config;
mod simulator;
mod taskmap;
mod trace;

use crate::alloc::{AllocInfo, Allocator, SimpleAllocator};
use crate::job::{Job, JobId};
use crate::machine::{FreeNodes, Machine};
use crate::sched::Scheduler;
use crate::sim::SimTime;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

/// 全互连通信的测试作业
pub(crate) fn job(id: u64, arrival: u64, procs: usize, actual: u64, est: u64) -> Arc<Job> {
    Arc::new(Job::new(id, arrival, procs, actual, est))
}

/// 随机作业序列：到达时间非降，实际时长不超过预估时长，含零长度作业
pub(crate) fn random_jobs(seed: u64, n: usize, max_procs: usize) -> Vec<Arc<Job>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut t = 0;
    (0..n as u64)
        .map(|id| {
            t += rng.gen_range(0..6);
            let actual = if rng.gen_bool(0.1) { 0 } else { rng.gen_range(1..=20) };
            let est = actual + rng.gen_range(0..=10);
            job(id, t, rng.gen_range(1..=max_procs), actual, est)
        })
        .collect()
}

/// 不经过事件队列直接驱动调度器；分配一律用 [`SimpleAllocator`]
pub(crate) struct Bench<S: Scheduler> {
    pub mach: Machine,
    pub free: FreeNodes,
    pub sched: S,
    alloc: SimpleAllocator,
    /// 结束时刻与分配
    running: BTreeMap<JobId, (SimTime, AllocInfo)>,
    pub starts: BTreeMap<JobId, SimTime>,
}

impl<S: Scheduler> Bench<S> {
    pub fn new(mach: Machine, sched: S) -> Self {
        Self {
            free: mach.all_free(),
            mach,
            sched,
            alloc: SimpleAllocator,
            running: BTreeMap::new(),
            starts: BTreeMap::new(),
        }
    }

    pub fn arrive(&mut self, job: &Arc<Job>, t: SimTime) {
        self.sched
            .job_arrives(Arc::clone(job), t, &self.mach, &self.free)
            .expect("job_arrives");
    }

    pub fn finish(&mut self, id: JobId, t: SimTime) {
        let (_, info) = self.running.remove(&id).expect("job is running");
        self.free.release(&info.nodes).expect("release");
        self.sched
            .job_finishes(&info.job, t, &self.mach, &self.free)
            .expect("job_finishes");
    }

    /// 反复启动，直到调度器不再给出作业
    pub fn start_all(&mut self, t: SimTime) -> Vec<JobId> {
        let mut out = Vec::new();
        while let Some(job) = self
            .sched
            .try_to_start(t, &self.mach, &self.free)
            .expect("try_to_start")
        {
            let info = self
                .alloc
                .allocate(&self.mach, &self.free, &job)
                .expect("allocate")
                .expect("scheduler admitted a job that does not fit");
            self.free.occupy(&info.nodes).expect("occupy");
            let started = self
                .sched
                .start_next(t, &self.mach, &self.free)
                .expect("start_next");
            assert_eq!(started.id, job.id);
            self.running
                .insert(job.id, (t.after(job.actual_runtime), info));
            self.starts.insert(job.id, t);
            out.push(job.id);
        }
        out
    }

    /// 按时间顺序跑完全部作业：先结束、再到达、最后启动；每一步之后调用 `check`
    pub fn run(&mut self, jobs: &[Arc<Job>], mut check: impl FnMut(&mut Self, SimTime)) -> SimTime {
        let mut pending: VecDeque<Arc<Job>> = jobs.iter().cloned().collect();
        let mut now = SimTime::ZERO;
        loop {
            let next_arrival = pending.front().map(|j| j.arrival);
            let next_finish = self.running.values().map(|(t, _)| *t).min();
            let wake = self.sched.next_wakeup(now);
            let Some(t) = [next_arrival, next_finish, wake].into_iter().flatten().min() else {
                break;
            };
            now = t;
            let done: Vec<JobId> = self
                .running
                .iter()
                .filter(|(_, (end, _))| *end == t)
                .map(|(id, _)| *id)
                .collect();
            for id in done {
                self.finish(id, t);
                check(self, t);
            }
            while pending.front().is_some_and(|j| j.arrival == t) {
                let j = pending.pop_front().expect("front exists");
                self.arrive(&j, t);
                check(self, t);
            }
            self.start_all(t);
            check(self, t);
        }
        assert!(self.running.is_empty(), "jobs still running at the end");
        assert_eq!(self.sched.queued(), 0, "jobs never started");
        assert_eq!(self.starts.len(), jobs.len());
        now
    }
}
