//! 配置字符串
//!
//! 各组件都用 `name[arg,arg,...]` 的形式指定，例如 `easy[largefirst]`、
//! `torus[4,4,4]`、`firstfit[sort,hilbert]`。名称不区分大小写。

use crate::alloc::{
    Allocator, ConstraintAllocator, DEFAULT_SEED, DflyRrnAllocator, DflySlurmAllocator,
    EnergyAllocator, LinearAllocator, LinearStrategy, MbsAllocator, MbsVariant,
    NearestAllocMapper, NearestAllocator, RandomAllocator, SimpleAllocator,
    SimpleSpreadAllocator, SpectralAllocMapper,
};
use crate::error::{Error, Result};
use crate::machine::{Dragonfly, DragonflyOpts, GlobalTopology, Machine, Topology};
use crate::sched::{EasyScheduler, JobComparator, PqScheduler, Scheduler, StatefulScheduler};
use crate::taskmap::{
    RandomTaskMapper, RcbTaskMapper, RcmTaskMapper, SimpleTaskMapper, TaskMapper, TopoMapper,
    TopoMode,
};
use std::path::PathBuf;
use std::str::FromStr;

/// 解析后的配置项
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Params {
    pub name: String,
    pub args: Vec<String>,
}

impl Params {
    fn arity(&self, min: usize, max: usize) -> Result<()> {
        if self.args.len() < min || self.args.len() > max {
            let expected = if min == max {
                format!("{min}")
            } else {
                format!("{min} to {max}")
            };
            return Err(Error::config(format!(
                "{} takes {expected} arguments, got {}",
                self.name,
                self.args.len()
            )));
        }
        Ok(())
    }

    fn number<T: FromStr>(&self, i: usize) -> Result<T> {
        let raw = self
            .args
            .get(i)
            .ok_or_else(|| Error::config(format!("{}: missing argument {}", self.name, i + 1)))?;
        raw.parse().map_err(|_| {
            Error::config(format!(
                "{}: argument {} ({raw:?}) is not a valid number",
                self.name,
                i + 1
            ))
        })
    }

    fn number_or<T: FromStr>(&self, i: usize, default: T) -> Result<T> {
        if i < self.args.len() {
            self.number(i)
        } else {
            Ok(default)
        }
    }

    fn comparator_at(&self, i: usize) -> Result<JobComparator> {
        match self.args.get(i) {
            None => Ok(JobComparator::default()),
            Some(s) => JobComparator::parse(s).ok_or_else(|| {
                Error::config(format!(
                    "{}: unknown job comparator {s:?} (expected one of {})",
                    self.name,
                    JobComparator::ALL
                        .iter()
                        .map(|c| c.as_str())
                        .collect::<Vec<_>>()
                        .join(", ")
                ))
            }),
        }
    }
}

/// `name[a,b]` -> `Params { name, args: [a, b] }`
pub fn parse_params(spec: &str) -> Result<Params> {
    let spec = spec.trim().to_ascii_lowercase();
    let (name, rest) = match spec.find('[') {
        Some(i) => (&spec[..i], Some(&spec[i + 1..])),
        None => (spec.as_str(), None),
    };
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::config(format!("missing component name in {spec:?}")));
    }
    let args = match rest {
        None => Vec::new(),
        Some(rest) => {
            let inner = rest
                .strip_suffix(']')
                .ok_or_else(|| Error::config(format!("unbalanced brackets in {spec:?}")))?;
            if inner.contains('[') || inner.contains(']') {
                return Err(Error::config(format!("nested brackets in {spec:?}")));
            }
            if inner.trim().is_empty() {
                Vec::new()
            } else {
                inner.split(',').map(|a| a.trim().to_string()).collect()
            }
        }
    };
    Ok(Params {
        name: name.to_string(),
        args,
    })
}

fn grid_dims(p: &Params) -> Result<(usize, usize, usize)> {
    p.arity(2, 3)?;
    let x = p.number(0)?;
    let y = p.number(1)?;
    let z = p.number_or(2, 1)?;
    if x == 0 || y == 0 || z == 0 {
        return Err(Error::config(format!(
            "{}: dimensions must be positive, got {x}x{y}x{z}",
            p.name
        )));
    }
    Ok((x, y, z))
}

#[tracing::instrument]
pub fn build_machine(spec: &str, cores_per_node: usize) -> Result<Machine> {
    if cores_per_node == 0 {
        return Err(Error::config("cores per node must be positive"));
    }
    let p = parse_params(spec)?;
    match p.name.as_str() {
        "simple" => {
            p.arity(1, 1)?;
            let n: usize = p.number(0)?;
            if n == 0 {
                return Err(Error::config("simple machine needs at least one node"));
            }
            Ok(Machine::simple(n, cores_per_node))
        }
        "mesh" => {
            let (x, y, z) = grid_dims(&p)?;
            Ok(Machine::mesh(x, y, z, cores_per_node))
        }
        "torus" => {
            let (x, y, z) = grid_dims(&p)?;
            Ok(Machine::torus(x, y, z, cores_per_node))
        }
        "dragonfly" => {
            p.arity(0, 6)?;
            let d = DragonflyOpts::default();
            let intra = p.args.get(4).map(String::as_str).unwrap_or("all_to_all");
            if intra != "all_to_all" {
                return Err(Error::config(format!(
                    "dragonfly: unsupported intra-group topology {intra:?} (only all_to_all)"
                )));
            }
            let global = match p.args.get(5) {
                None => d.global,
                Some(s) => GlobalTopology::parse(s).ok_or_else(|| {
                    Error::config(format!(
                        "dragonfly: unknown global link arrangement {s:?} (absolute, circulant, relative)"
                    ))
                })?,
            };
            let opts = DragonflyOpts {
                routers_per_group: p.number_or(0, d.routers_per_group)?,
                ports_per_router: p.number_or(1, d.ports_per_router)?,
                opticals_per_router: p.number_or(2, d.opticals_per_router)?,
                nodes_per_router: p.number_or(3, d.nodes_per_router)?,
                global,
            };
            Ok(Machine::new(
                Topology::Dragonfly(Dragonfly::new(opts)?),
                cores_per_node,
            ))
        }
        other => Err(Error::config(format!("unknown machine type {other:?}"))),
    }
}

#[tracing::instrument(skip(mach))]
pub fn build_scheduler(spec: &str, mach: &Machine) -> Result<Box<dyn Scheduler>> {
    let p = parse_params(spec)?;
    let sched: Box<dyn Scheduler> = match p.name.as_str() {
        "pqueue" | "fifo" => {
            p.arity(0, 1)?;
            let comp = if p.name == "fifo" {
                JobComparator::Fifo
            } else {
                p.comparator_at(0)?
            };
            Box::new(PqScheduler::new(comp))
        }
        "easy" => {
            p.arity(0, 1)?;
            Box::new(EasyScheduler::new(p.comparator_at(0)?))
        }
        "cons" => {
            p.arity(0, 1)?;
            Box::new(StatefulScheduler::conservative(mach, p.comparator_at(0)?))
        }
        "prioritize" => {
            p.arity(1, 2)?;
            Box::new(StatefulScheduler::prioritize(
                mach,
                p.comparator_at(1)?,
                p.number(0)?,
            ))
        }
        "delayed" => {
            p.arity(0, 1)?;
            Box::new(StatefulScheduler::delayed(mach, p.comparator_at(0)?))
        }
        "elc" => {
            p.arity(1, 2)?;
            Box::new(StatefulScheduler::even_less(
                mach,
                p.comparator_at(1)?,
                p.number(0)?,
            ))
        }
        other => return Err(Error::config(format!("unknown scheduler {other:?}"))),
    };
    Ok(sched)
}

/// 个别分配器在构造时读取的外部文件
#[derive(Debug, Clone, Default)]
pub struct AllocatorFiles {
    pub constraint_deps: Option<PathBuf>,
    pub constraint_clusters: Option<PathBuf>,
}

#[tracing::instrument(skip(mach, files))]
pub fn build_allocator(
    spec: &str,
    mach: &Machine,
    files: &AllocatorFiles,
) -> Result<Box<dyn Allocator>> {
    let p = parse_params(spec)?;
    let no_args = |p: &Params| p.arity(0, 0);
    let alloc: Box<dyn Allocator> = match p.name.as_str() {
        "simple" => {
            no_args(&p)?;
            Box::new(SimpleAllocator::default())
        }
        "random" => {
            p.arity(0, 1)?;
            Box::new(RandomAllocator::new(p.number_or(0, DEFAULT_SEED)?))
        }
        "nearest" => {
            p.arity(0, 4)?;
            Box::new(NearestAllocator::from_args(mach, &p.args)?)
        }
        "genalg" => {
            no_args(&p)?;
            Box::new(NearestAllocator::gen_alg(mach)?)
        }
        "mm" => {
            no_args(&p)?;
            Box::new(NearestAllocator::mm(mach)?)
        }
        "mc1x1" => {
            no_args(&p)?;
            Box::new(NearestAllocator::mc1x1(mach)?)
        }
        "hybrid" => {
            no_args(&p)?;
            Box::new(NearestAllocator::hybrid(mach)?)
        }
        "energy" => {
            no_args(&p)?;
            Box::new(EnergyAllocator::new(mach)?)
        }
        "mbs" | "granularmbs" | "octetmbs" | "roundupmbs" => {
            no_args(&p)?;
            let variant = match p.name.as_str() {
                "mbs" => MbsVariant::Layered,
                "granularmbs" => MbsVariant::Granular,
                "octetmbs" => MbsVariant::Octet,
                _ => MbsVariant::RoundUp,
            };
            Box::new(MbsAllocator::new(mach, variant)?)
        }
        "firstfit" | "bestfit" | "sortedfreelist" => {
            p.arity(0, 2)?;
            let strategy = match p.name.as_str() {
                "firstfit" => LinearStrategy::FirstFit,
                "bestfit" => LinearStrategy::BestFit,
                _ => LinearStrategy::SortedFreeList,
            };
            Box::new(LinearAllocator::from_args(mach, strategy, &p.args)?)
        }
        "constraint" => {
            no_args(&p)?;
            let (Some(deps), Some(clusters)) = (&files.constraint_deps, &files.constraint_clusters)
            else {
                return Err(Error::config(
                    "constraint allocator needs both a dependency file and a cluster file",
                ));
            };
            Box::new(ConstraintAllocator::load(deps, clusters)?)
        }
        "nearestamap" => {
            no_args(&p)?;
            Box::new(NearestAllocMapper::new())
        }
        "spectralamap" => {
            no_args(&p)?;
            Box::new(SpectralAllocMapper::new())
        }
        "simplespread" => {
            no_args(&p)?;
            Box::new(SimpleSpreadAllocator::new(mach)?)
        }
        "dflyrrn" => {
            no_args(&p)?;
            Box::new(DflyRrnAllocator::new(mach)?)
        }
        "dflyslurm" => {
            no_args(&p)?;
            Box::new(DflySlurmAllocator::new(mach)?)
        }
        other => return Err(Error::config(format!("unknown allocator {other:?}"))),
    };
    Ok(alloc)
}

/// 分配映射器兼任分配器时，映射器默认取同一种
fn default_mapper(allocator_spec: &str) -> &'static str {
    match parse_params(allocator_spec).map(|p| p.name) {
        Ok(name) if name == "nearestamap" => "nearestamap",
        Ok(name) if name == "spectralamap" => "spectralamap",
        _ => "simple",
    }
}

/// `spec` 为空或 `default` 时按分配器选择映射器
#[tracing::instrument]
pub fn build_task_mapper(spec: &str, allocator_spec: &str) -> Result<Box<dyn TaskMapper>> {
    let spec = match spec.trim() {
        "" | "default" => default_mapper(allocator_spec),
        s => s,
    };
    let p = parse_params(spec)?;
    let mapper: Box<dyn TaskMapper> = match p.name.as_str() {
        "simple" => {
            p.arity(0, 0)?;
            Box::new(SimpleTaskMapper)
        }
        "random" => {
            p.arity(0, 1)?;
            Box::new(RandomTaskMapper::new(p.number_or(0, DEFAULT_SEED)?))
        }
        "rcb" => {
            p.arity(0, 0)?;
            Box::new(RcbTaskMapper)
        }
        "rcm" => {
            p.arity(0, 0)?;
            Box::new(RcmTaskMapper)
        }
        "topo" => {
            p.arity(0, 1)?;
            let mode = match p.args.first() {
                None => TopoMode::default(),
                Some(m) => TopoMode::parse(m).ok_or_else(|| {
                    Error::config(format!("topo: unknown mode {m:?} (rcm, recursive)"))
                })?,
            };
            Box::new(TopoMapper::new(mode))
        }
        "nearestamap" => {
            p.arity(0, 0)?;
            Box::new(NearestAllocMapper::new())
        }
        "spectralamap" => {
            p.arity(0, 0)?;
            Box::new(SpectralAllocMapper::new())
        }
        other => return Err(Error::config(format!("unknown task mapper {other:?}"))),
    };
    Ok(mapper)
}
