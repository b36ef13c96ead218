use clap::Parser;
use schedsim_rs::alloc::Allocator;
use schedsim_rs::cluster::{self, ClusterWorld, TimePerDistance};
use schedsim_rs::config::{self, AllocatorFiles};
use schedsim_rs::job::{Job, read_trace, validate_jobs};
use schedsim_rs::machine::{HeatMatrix, Machine};
use schedsim_rs::sched::Scheduler;
use schedsim_rs::sim::WorkloadSpec;
use schedsim_rs::stats::Summary;
use schedsim_rs::taskmap::TaskMapper;
use schedsim_rs::{Error, Result};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(
    name = "sched-sim",
    about = "Simulate job scheduling, node allocation and task mapping on an HPC machine"
)]
struct Args {
    /// Path to workload.json (machine, components and jobs)
    #[arg(long, conflicts_with = "trace")]
    workload: Option<PathBuf>,

    /// Text job trace: `arrival procs runtime est_runtime [comm]` per line
    #[arg(long)]
    trace: Option<PathBuf>,

    /// Machine, e.g. torus[4,4,4] or dragonfly[4,7,1,2,all_to_all,absolute]
    #[arg(long)]
    machine: Option<String>,

    #[arg(long)]
    cores_per_node: Option<usize>,

    /// Scheduler, e.g. easy[largefirst] or elc[2,fifo]
    #[arg(long)]
    scheduler: Option<String>,

    /// Allocator, e.g. mbs or firstfit[sort,hilbert]
    #[arg(long)]
    allocator: Option<String>,

    /// Task mapper; defaults to the allocator's own mapping when it has one
    #[arg(long)]
    task_mapper: Option<String>,

    /// Write summary and per-job statistics as JSON
    #[arg(long)]
    stats_json: Option<PathBuf>,

    /// Write the tab-separated job timing log
    #[arg(long)]
    time_log: Option<PathBuf>,

    /// Write the tab-separated allocation locality log
    #[arg(long)]
    alloc_log: Option<PathBuf>,

    /// Heat recirculation matrix used by the energy-aware allocators
    #[arg(long)]
    dmatrix: Option<PathBuf>,

    /// Constraint allocator: job dependency file
    #[arg(long)]
    constraint_deps: Option<PathBuf>,

    /// Constraint allocator: node cluster file
    #[arg(long)]
    constraint_clusters: Option<PathBuf>,

    /// Stretch runtimes with communication distance: `coefficient,exponent[,jitter]`
    #[arg(long)]
    time_per_distance: Option<String>,

    /// Seed for the runtime jitter drawn with --time-per-distance
    #[arg(long, default_value_t = 0)]
    running_time_seed: u64,
}

struct Setup {
    machine: Machine,
    jobs: Vec<Job>,
    scheduler: String,
    allocator: String,
    task_mapper: String,
    time_per_distance: Option<TimePerDistance>,
}

fn setup(args: &Args) -> Result<Setup> {
    let (machine, jobs, sched, alloc, mapper, tpd) = match (&args.workload, &args.trace) {
        (Some(path), _) => {
            let mut w = WorkloadSpec::load(path)?;
            if let Some(cpn) = args.cores_per_node {
                w.cores_per_node = cpn;
            }
            let machine = match &args.machine {
                Some(m) => config::build_machine(m, w.cores_per_node)?,
                None => w.build_machine()?,
            };
            (
                machine,
                w.jobs()?,
                w.scheduler.clone(),
                w.allocator.clone(),
                w.task_mapper.clone(),
                w.time_per_distance,
            )
        }
        (None, Some(path)) => {
            let spec = args
                .machine
                .as_deref()
                .ok_or_else(|| Error::config("--machine is required with --trace"))?;
            let machine = config::build_machine(spec, args.cores_per_node.unwrap_or(1))?;
            (machine, read_trace(path)?, None, None, None, None)
        }
        (None, None) => return Err(Error::config("either --workload or --trace is required")),
    };
    let machine = match &args.dmatrix {
        Some(path) => {
            let n = machine.num_nodes();
            machine.with_heat(HeatMatrix::load(path, n)?)
        }
        None => machine,
    };
    validate_jobs(&jobs, &machine)?;
    Ok(Setup {
        machine,
        jobs,
        scheduler: args.scheduler.clone().or(sched).unwrap_or_else(|| "pqueue".into()),
        allocator: args.allocator.clone().or(alloc).unwrap_or_else(|| "simple".into()),
        task_mapper: args.task_mapper.clone().or(mapper).unwrap_or_default(),
        time_per_distance: match &args.time_per_distance {
            Some(spec) => Some(TimePerDistance::parse(spec, args.running_time_seed)?),
            None => tpd,
        },
    })
}

fn run(args: &Args) -> Result<()> {
    let s = setup(args)?;
    let files = AllocatorFiles {
        constraint_deps: args.constraint_deps.clone(),
        constraint_clusters: args.constraint_clusters.clone(),
    };
    let scheduler = config::build_scheduler(&s.scheduler, &s.machine)?;
    let allocator = config::build_allocator(&s.allocator, &s.machine, &files)?;
    let mapper = config::build_task_mapper(&s.task_mapper, &s.allocator)?;

    let mut world = ClusterWorld::new(s.machine, scheduler, allocator, mapper);
    if let Some(tpd) = s.time_per_distance {
        info!(?tpd, "运行时间随通信距离放大");
        world = world.with_time_per_distance(tpd);
    }
    let summary = cluster::run(&mut world, s.jobs)?;
    print_report(&world, &summary);

    if let Some(path) = &args.time_log {
        world.stats.write_time_log(path)?;
        info!(path = %path.display(), "已写出作业时间日志");
    }
    if let Some(path) = &args.alloc_log {
        world.stats.write_alloc_log(path)?;
        info!(path = %path.display(), "已写出分配日志");
    }
    if let Some(path) = &args.stats_json {
        world.stats.write_json(path, &summary)?;
        info!(path = %path.display(), "已写出统计 JSON");
    }
    Ok(())
}

fn print_report(world: &ClusterWorld, summary: &Summary) {
    let mut jobs: Vec<_> = world.stats.jobs.iter().collect();
    jobs.sort_by_key(|r| r.job);
    for r in jobs {
        println!(
            "job id={} arrival={} start={} end={} wait={} procs={} nodes={}",
            r.job, r.arrival, r.start, r.end, r.wait, r.procs, r.nodes
        );
    }
    println!(
        "summary scheduler={} allocator={} mapper={} jobs={} makespan={} mean_wait={:.3} max_wait={} mean_response={:.3} utilization={:.6} mean_hop_bytes={:.3} mean_avg_hop_dist={:.6}",
        world.scheduler.name(),
        world.allocator.name(),
        world.mapper.name(),
        summary.jobs,
        summary.makespan,
        summary.mean_wait,
        summary.max_wait,
        summary.mean_response,
        summary.utilization,
        summary.mean_hop_bytes,
        summary.mean_avg_hop_dist
    );
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .init();

    let args = Args::parse();
    match run(&args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
