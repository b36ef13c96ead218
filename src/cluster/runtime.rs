//! 与通信距离相关的运行时间
//!
//! 开启后，作业的运行时间按实际映射的 hop-bytes 放大：
//! `actual * (1 + coefficient * (hop_bytes / baseline) ^ (exponent + jitter))`。
//! baseline 是同一作业顺序映射到空机器最前面若干节点时的 hop-bytes；
//! jitter 在 `[-jitter, jitter]` 内均匀抽取。baseline 为 0（单节点或无通信）时不放大。

use crate::alloc::AllocInfo;
use crate::error::{Error, Result};
use crate::job::Job;
use crate::machine::{Machine, NodeId};
use crate::taskmap::{SimpleTaskMapper, TaskMapInfo, TaskMapper};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimePerDistance {
    pub coefficient: f64,
    pub exponent: f64,
    #[serde(default)]
    pub jitter: f64,
    #[serde(default)]
    pub seed: u64,
}

impl TimePerDistance {
    /// `coefficient,exponent[,jitter]`
    pub fn parse(spec: &str, seed: u64) -> Result<Self> {
        let parts: Vec<&str> = spec.split(',').map(str::trim).collect();
        if !(2..=3).contains(&parts.len()) {
            return Err(Error::config(format!(
                "time per distance takes coefficient,exponent[,jitter], got {spec:?}"
            )));
        }
        let number = |i: usize| -> Result<f64> {
            parts[i]
                .parse::<f64>()
                .ok()
                .filter(|v| v.is_finite())
                .ok_or_else(|| {
                    Error::config(format!("time per distance: {:?} is not a number", parts[i]))
                })
        };
        let tpd = Self {
            coefficient: number(0)?,
            exponent: number(1)?,
            jitter: if parts.len() == 3 { number(2)? } else { 0.0 },
            seed,
        };
        tpd.check()?;
        Ok(tpd)
    }

    pub fn check(&self) -> Result<()> {
        if self.coefficient < 0.0 || self.jitter < 0.0 {
            return Err(Error::config(format!(
                "time per distance coefficient and jitter must be non-negative: {self:?}"
            )));
        }
        Ok(())
    }
}

#[derive(Debug)]
pub struct RuntimeModel {
    tpd: TimePerDistance,
    rng: StdRng,
}

impl RuntimeModel {
    pub fn new(tpd: TimePerDistance) -> Self {
        Self {
            rng: StdRng::seed_from_u64(tpd.seed),
            tpd,
        }
    }

    pub fn params(&self) -> &TimePerDistance {
        &self.tpd
    }

    /// 作业放在空机器最前面 `nodes_for(procs)` 个节点上时的 hop-bytes
    pub fn baseline_hop_bytes(mach: &Machine, job: &Arc<Job>) -> Result<f64> {
        let nodes: Vec<NodeId> = (0..mach.nodes_for(job.procs)).map(NodeId).collect();
        let tmi = SimpleTaskMapper.map_tasks(mach, &AllocInfo::new(Arc::clone(job), nodes))?;
        Ok(tmi.hop_bytes(mach))
    }

    /// 作业在这份映射下的运行时间
    pub fn runtime(&mut self, mach: &Machine, tmi: &TaskMapInfo) -> Result<u64> {
        let job = &tmi.alloc.job;
        let baseline = Self::baseline_hop_bytes(mach, job)?;
        if baseline <= 0.0 || job.actual_runtime == 0 {
            return Ok(job.actual_runtime);
        }
        let jitter = if self.tpd.jitter > 0.0 {
            self.rng.gen_range(-self.tpd.jitter..=self.tpd.jitter)
        } else {
            0.0
        };
        let ratio = tmi.hop_bytes(mach) / baseline;
        let factor = 1.0 + self.tpd.coefficient * ratio.powf(self.tpd.exponent + jitter);
        let runtime = (job.actual_runtime as f64 * factor).round() as u64;
        trace!(job = %job.id, ratio, factor, runtime, "按通信距离放大运行时间");
        if runtime > job.est_runtime {
            return Err(Error::RuntimeExceedsEstimate {
                job: job.id,
                runtime,
                estimate: job.est_runtime,
            });
        }
        Ok(runtime)
    }
}
