//! JSON 工作负载描述
//!
//! 一份文件同时给出机器、调度器/分配器/映射器选择和作业列表；命令行参数可以覆盖
//! 其中的组件选择。

use crate::cluster::TimePerDistance;
use crate::config;
use crate::error::{Error, Result};
use crate::job::{Job, TaskCommInfo};
use crate::machine::Machine;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const SCHEMA_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadSpec {
    pub schema_version: u32,
    #[serde(default)]
    pub meta: Option<WorkloadMeta>,
    pub machine: MachineSpec,
    #[serde(default = "default_cores_per_node")]
    pub cores_per_node: usize,
    #[serde(default)]
    pub scheduler: Option<String>,
    #[serde(default)]
    pub allocator: Option<String>,
    #[serde(default)]
    pub task_mapper: Option<String>,
    /// 运行时间随通信距离放大；缺省时按实际时长运行
    #[serde(default)]
    pub time_per_distance: Option<TimePerDistance>,
    pub jobs: Vec<JobSpec>,
}

fn default_cores_per_node() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkloadMeta {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

fn one() -> usize {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MachineSpec {
    Simple {
        nodes: usize,
    },
    Mesh {
        x: usize,
        y: usize,
        #[serde(default = "one")]
        z: usize,
    },
    Torus {
        x: usize,
        y: usize,
        #[serde(default = "one")]
        z: usize,
    },
    Dragonfly {
        routers_per_group: usize,
        ports_per_router: usize,
        opticals_per_router: usize,
        nodes_per_router: usize,
        #[serde(default)]
        global: Option<String>,
    },
}

impl MachineSpec {
    /// 等价的 `name[args]` 配置字符串
    pub fn to_config(&self) -> String {
        match self {
            MachineSpec::Simple { nodes } => format!("simple[{nodes}]"),
            MachineSpec::Mesh { x, y, z } => format!("mesh[{x},{y},{z}]"),
            MachineSpec::Torus { x, y, z } => format!("torus[{x},{y},{z}]"),
            MachineSpec::Dragonfly {
                routers_per_group,
                ports_per_router,
                opticals_per_router,
                nodes_per_router,
                global,
            } => format!(
                "dragonfly[{routers_per_group},{ports_per_router},{opticals_per_router},{nodes_per_router},all_to_all,{}]",
                global.as_deref().unwrap_or("absolute")
            ),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobSpec {
    pub arrival: u64,
    pub procs: usize,
    pub runtime: u64,
    /// 缺省或不为正时取 `2 * runtime`
    #[serde(default)]
    pub est_runtime: Option<i64>,
    #[serde(default)]
    pub comm: Option<CommSpec>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CommSpec {
    AllToAll,
    Mesh {
        x: usize,
        y: usize,
        #[serde(default = "one")]
        z: usize,
    },
    Matrix {
        weights: Vec<Vec<f64>>,
    },
}

impl WorkloadSpec {
    pub fn parse(text: &str) -> Result<Self> {
        let spec: WorkloadSpec =
            serde_json::from_str(text).map_err(|e| Error::parse(e.line(), e.to_string()))?;
        if spec.schema_version != SCHEMA_VERSION {
            return Err(Error::config(format!(
                "unsupported workload schema_version {} (expected {SCHEMA_VERSION})",
                spec.schema_version
            )));
        }
        if let Some(tpd) = &spec.time_per_distance {
            tpd.check()?;
        }
        Ok(spec)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::parse(&text)
    }

    pub fn build_machine(&self) -> Result<Machine> {
        config::build_machine(&self.machine.to_config(), self.cores_per_node)
    }

    /// 作业编号按列表顺序分配；报错时的行号为作业在列表中的序号（从 1 开始）
    pub fn jobs(&self) -> Result<Vec<Job>> {
        self.jobs
            .iter()
            .enumerate()
            .map(|(i, j)| {
                let entry = i + 1;
                if j.procs == 0 {
                    return Err(Error::parse(entry, "a job needs at least one processor"));
                }
                let est = match j.est_runtime {
                    Some(e) if e > 0 => e as u64,
                    _ => 2 * j.runtime,
                };
                let comm = match &j.comm {
                    None | Some(CommSpec::AllToAll) => TaskCommInfo::all_to_all(j.procs),
                    Some(CommSpec::Mesh { x, y, z }) => {
                        if x * y * z != j.procs {
                            return Err(Error::parse(
                                entry,
                                format!(
                                    "communication mesh {x}x{y}x{z} does not match {} processors",
                                    j.procs
                                ),
                            ));
                        }
                        TaskCommInfo::mesh(*x, *y, *z)
                    }
                    Some(CommSpec::Matrix { weights }) => {
                        if weights.len() != j.procs || weights.iter().any(|r| r.len() != j.procs) {
                            return Err(Error::parse(
                                entry,
                                format!("communication matrix is not {0}x{0}", j.procs),
                            ));
                        }
                        TaskCommInfo::from_matrix(weights)
                    }
                };
                Ok(Job::new(i as u64, j.arrival, j.procs, j.runtime, est).with_comm(comm))
            })
            .collect()
    }
}
