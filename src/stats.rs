//! 运行统计
//!
//! 每个作业一条时间记录（到达、开始、结束、等待、响应）与一条分配记录
//! （平均跳数、最大链路拥塞、hop-bytes），另有按时间记录的占用处理器数和排队作业数。
//! 时间线只在取值变化时追加；同一时刻多次变化只保留最后的值。

use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::Machine;
use crate::sim::SimTime;
use crate::taskmap::TaskMapInfo;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize)]
pub struct JobRecord {
    pub job: u64,
    pub arrival: SimTime,
    pub start: SimTime,
    pub end: SimTime,
    pub run: u64,
    pub wait: u64,
    pub response: u64,
    pub procs: usize,
    pub nodes: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct AllocRecord {
    pub job: u64,
    pub procs: usize,
    pub actual_time: u64,
    pub avg_hop_dist: f64,
    pub max_congestion: f64,
    pub hop_bytes: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub time: SimTime,
    pub value: usize,
}

/// 只记录变化的时间线
#[derive(Debug, Clone, Default, Serialize)]
#[serde(transparent)]
pub struct Timeline(Vec<Sample>);

impl Timeline {
    pub fn record(&mut self, time: SimTime, value: usize) {
        if let Some(last) = self.0.last_mut()
            && last.time == time
        {
            last.value = value;
            let n = self.0.len();
            if n >= 2 && self.0[n - 2].value == value {
                self.0.pop();
            }
            return;
        }
        if self.0.last().is_some_and(|s| s.value == value) {
            return;
        }
        self.0.push(Sample { time, value });
    }

    pub fn samples(&self) -> &[Sample] {
        &self.0
    }

    /// 以 `until` 为终点的时间积分
    pub fn integral(&self, until: SimTime) -> u128 {
        self.0
            .iter()
            .zip(self.0.iter().skip(1).map(|s| s.time).chain(std::iter::once(until)))
            .map(|(s, next)| next.since(s.time) as u128 * s.value as u128)
            .sum()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Summary {
    pub jobs: usize,
    pub makespan: u64,
    pub mean_wait: f64,
    pub max_wait: u64,
    pub mean_response: f64,
    /// 占用处理器时间 / (总处理器数 × makespan)
    pub utilization: f64,
    pub mean_hop_bytes: f64,
    pub mean_avg_hop_dist: f64,
}

#[derive(Debug, Default, Serialize)]
pub struct Stats {
    pub jobs: Vec<JobRecord>,
    pub allocs: Vec<AllocRecord>,
    pub utilization: Timeline,
    pub waiting: Timeline,
    #[serde(skip)]
    started: HashMap<JobId, (SimTime, usize)>,
    #[serde(skip)]
    procs_used: usize,
    #[serde(skip)]
    num_waiting: usize,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn job_arrives(&mut self, time: SimTime) {
        self.num_waiting += 1;
        self.waiting.record(time, self.num_waiting);
    }

    pub fn job_starts(&mut self, mach: &Machine, tmi: &TaskMapInfo, time: SimTime) {
        let job = &tmi.alloc.job;
        self.allocs.push(AllocRecord {
            job: job.id.0,
            procs: job.procs,
            actual_time: job.actual_runtime,
            avg_hop_dist: tmi.avg_hop_dist(mach),
            max_congestion: tmi.max_congestion(mach),
            hop_bytes: tmi.hop_bytes(mach),
        });
        self.started.insert(job.id, (time, tmi.alloc.nodes.len()));
        self.procs_used += job.procs;
        self.utilization.record(time, self.procs_used);
        self.num_waiting = self.num_waiting.saturating_sub(1);
        self.waiting.record(time, self.num_waiting);
    }

    pub fn job_finishes(&mut self, job: &Job, time: SimTime) -> Result<()> {
        let (start, nodes) = self
            .started
            .remove(&job.id)
            .ok_or_else(|| Error::Internal(format!("{} finished without a start record", job.id)))?;
        self.jobs.push(JobRecord {
            job: job.id.0,
            arrival: job.arrival,
            start,
            end: time,
            run: time.since(start),
            wait: start.since(job.arrival),
            response: time.since(job.arrival),
            procs: job.procs,
            nodes,
        });
        self.procs_used = self.procs_used.saturating_sub(job.procs);
        self.utilization.record(time, self.procs_used);
        Ok(())
    }

    pub fn summary(&self, mach: &Machine) -> Summary {
        let n = self.jobs.len();
        let mean = |f: &dyn Fn(&JobRecord) -> u64| -> f64 {
            if n == 0 {
                0.0
            } else {
                self.jobs.iter().map(f).sum::<u64>() as f64 / n as f64
            }
        };
        let first = self.jobs.iter().map(|r| r.arrival).min().unwrap_or_default();
        let last = self.jobs.iter().map(|r| r.end).max().unwrap_or_default();
        let makespan = last.since(first);
        let busy = self.utilization.integral(last);
        let capacity = mach.num_cores() as u128 * makespan as u128;
        let mean_alloc = |f: &dyn Fn(&AllocRecord) -> f64| -> f64 {
            if self.allocs.is_empty() {
                0.0
            } else {
                self.allocs.iter().map(f).sum::<f64>() / self.allocs.len() as f64
            }
        };
        Summary {
            jobs: n,
            makespan,
            mean_wait: mean(&|r| r.wait),
            max_wait: self.jobs.iter().map(|r| r.wait).max().unwrap_or(0),
            mean_response: mean(&|r| r.response),
            utilization: if capacity == 0 {
                0.0
            } else {
                busy as f64 / capacity as f64
            },
            mean_hop_bytes: mean_alloc(&|a| a.hop_bytes),
            mean_avg_hop_dist: mean_alloc(&|a| a.avg_hop_dist),
        }
    }

    /// 制表符分隔的作业时间日志
    pub fn time_log(&self) -> String {
        let mut out = String::from("# Job\tArrival\tStart\tEnd\tRun\tWait\tResp.\tProcs\n");
        let mut rows: Vec<&JobRecord> = self.jobs.iter().collect();
        rows.sort_by_key(|r| r.job);
        for r in rows {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{}\t{}\t{}\t{}\t{}",
                r.job, r.arrival, r.start, r.end, r.run, r.wait, r.response, r.procs
            );
        }
        out
    }

    pub fn alloc_log(&self) -> String {
        let mut out =
            String::from("# Job\tProcs\tActual Time\tAvg Hop Distance\tJob Congestion\tHop-Bytes\n");
        for a in &self.allocs {
            let _ = writeln!(
                out,
                "{}\t{}\t{}\t{:.6}\t{:.6}\t{:.6}",
                a.job, a.procs, a.actual_time, a.avg_hop_dist, a.max_congestion, a.hop_bytes
            );
        }
        out
    }

    pub fn write_time_log(&self, path: &Path) -> Result<()> {
        fs::write(path, self.time_log()).map_err(|e| Error::io(path, e))
    }

    pub fn write_alloc_log(&self, path: &Path) -> Result<()> {
        fs::write(path, self.alloc_log()).map_err(|e| Error::io(path, e))
    }

    /// 统计与摘要一起写成 JSON
    pub fn write_json(&self, path: &Path, summary: &Summary) -> Result<()> {
        let value = serde_json::json!({
            "summary": summary,
            "jobs": self.jobs,
            "allocs": self.allocs,
            "utilization": self.utilization,
            "waiting": self.waiting,
        });
        let text = serde_json::to_string_pretty(&value)
            .map_err(|e| Error::Internal(format!("cannot serialize statistics: {e}")))?;
        fs::write(path, text).map_err(|e| Error::io(path, e))
    }
}
