use crate::error::Error;
use crate::job::{CommGraph, JobId, parse_trace, read_trace, validate_jobs};
use crate::machine::Machine;
use crate::sim::{CommSpec, MachineSpec, SimTime, WorkloadSpec};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0);
    let dir = std::env::temp_dir().join(format!("{prefix}-{}-{nanos}", std::process::id()));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

#[test]
fn trace_lines_become_jobs_in_order() {
    let text = "\
# arrival procs runtime est
0 4 100 150

5 2 30 -1
7 6 10 0 mesh 3 2 1
   9 1 1 1 alltoall
";
    let jobs = parse_trace(text, Path::new(".")).expect("valid trace");
    assert_eq!(jobs.len(), 4);
    assert_eq!(jobs[0].id, JobId(0));
    assert_eq!(jobs[0].est_runtime, 150);
    // 预估不为正时取实际时长的两倍
    assert_eq!(jobs[1].est_runtime, 60);
    assert_eq!(jobs[2].est_runtime, 20);
    assert_eq!(jobs[2].comm.graph, CommGraph::Mesh { x: 3, y: 2, z: 1 });
    assert_eq!(jobs[3].arrival, SimTime(9));
    assert_eq!(jobs[3].id, JobId(3));
}

#[test]
fn trace_errors_carry_the_line_number() {
    for (text, bad_line) in [
        ("0 4 10 10\n1 x 10 10\n", 2),
        ("0 4 10\n", 1),
        ("# c\n\n0 0 10 10\n", 3),
        ("0 6 10 10 mesh 2 2 1\n", 1),
        ("0 4 10 10 ring\n", 1),
        ("0 4 10 10 matrix\n", 1),
    ] {
        match parse_trace(text, Path::new(".")) {
            Err(Error::Parse { line, .. }) => assert_eq!(line, bad_line, "{text:?}"),
            other => panic!("{text:?}: expected a parse error, got {other:?}"),
        }
    }
}

#[test]
fn trace_reads_matrix_and_coordinate_files_next_to_it() {
    let dir = unique_temp_dir("schedsim-trace");
    std::fs::write(dir.join("m.txt"), "0 1 0\n1 0 2\n0 0 0\n").expect("write matrix");
    std::fs::write(dir.join("c.txt"), "0 0\n1 0\n0 1\n").expect("write coords");
    std::fs::write(
        dir.join("trace.txt"),
        "0 3 10 10 matrix m.txt\n1 3 10 10 coord c.txt 1\n",
    )
    .expect("write trace");

    let jobs = read_trace(&dir.join("trace.txt")).expect("valid trace");
    let adj = jobs[0].comm.adjacency();
    assert_eq!(adj[0], vec![(1, 2.0)]);
    assert_eq!(adj[1], vec![(0, 2.0), (2, 2.0)]);
    assert_eq!(jobs[1].comm.center_task, Some(1));
    assert_eq!(
        jobs[1].comm.task_coords().expect("coords"),
        vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]
    );

    std::fs::write(dir.join("bad.txt"), "0 3 10 10 matrix missing.txt\n").expect("write");
    assert!(matches!(
        read_trace(&dir.join("bad.txt")),
        Err(Error::Io { .. })
    ));
    let _ = std::fs::remove_dir_all(&dir);
}

#[test]
fn validation_rejects_oversized_and_underestimated_jobs() {
    let m = Machine::simple(4, 2);
    let ok = parse_trace("0 8 10 10\n", Path::new(".")).expect("trace");
    validate_jobs(&ok, &m).expect("fits exactly");

    let too_big = parse_trace("0 1 1 1\n0 9 10 10\n", Path::new(".")).expect("trace");
    assert!(matches!(
        validate_jobs(&too_big, &m),
        Err(Error::Parse { line: 2, .. })
    ));
    let under = parse_trace("0 1 20 10\n", Path::new(".")).expect("trace");
    assert!(matches!(
        validate_jobs(&under, &m),
        Err(Error::Parse { line: 1, .. })
    ));
}

const WORKLOAD: &str = r#"{
  "schema_version": 1,
  "meta": { "source": "unit test" },
  "machine": { "kind": "torus", "x": 4, "y": 2 },
  "cores_per_node": 2,
  "scheduler": "easy[fifo]",
  "jobs": [
    { "arrival": 0, "procs": 4, "runtime": 10, "est_runtime": 12 },
    { "arrival": 3, "procs": 6, "runtime": 5, "comm": { "kind": "mesh", "x": 3, "y": 2 } },
    { "arrival": 3, "procs": 2, "runtime": 5, "est_runtime": 0,
      "comm": { "kind": "matrix", "weights": [[0, 1], [1, 0]] } }
  ]
}"#;

#[test]
fn workload_json_describes_machine_components_and_jobs() {
    let w = WorkloadSpec::parse(WORKLOAD).expect("valid workload");
    assert_eq!(w.machine, MachineSpec::Torus { x: 4, y: 2, z: 1 });
    assert_eq!(w.machine.to_config(), "torus[4,2,1]");
    assert_eq!(w.scheduler.as_deref(), Some("easy[fifo]"));
    assert!(w.allocator.is_none());

    let m = w.build_machine().expect("machine");
    assert_eq!(m.num_cores(), 16);

    let jobs = w.jobs().expect("jobs");
    assert_eq!(jobs.len(), 3);
    assert_eq!(jobs[0].est_runtime, 12);
    assert_eq!(jobs[1].est_runtime, 10);
    assert_eq!(jobs[1].comm.graph, CommGraph::Mesh { x: 3, y: 2, z: 1 });
    assert_eq!(jobs[2].est_runtime, 10);
    assert_eq!(jobs[2].comm.adjacency()[0], vec![(1, 2.0)]);
    validate_jobs(&jobs, &m).expect("all jobs fit");
}

#[test]
fn workload_errors() {
    assert!(matches!(
        WorkloadSpec::parse(&WORKLOAD.replace("\"schema_version\": 1", "\"schema_version\": 2")),
        Err(Error::Config(_))
    ));
    assert!(matches!(
        WorkloadSpec::parse("{ \"schema_version\": 1,\n \"machine\": 3 }"),
        Err(Error::Parse { line: 2, .. })
    ));

    let mut w = WorkloadSpec::parse(WORKLOAD).expect("valid workload");
    w.jobs[1].comm = Some(CommSpec::Mesh { x: 2, y: 2, z: 1 });
    assert!(matches!(w.jobs(), Err(Error::Parse { line: 2, .. })));

    w.jobs[1].comm = None;
    w.jobs[2].comm = Some(CommSpec::Matrix {
        weights: vec![vec![0.0, 1.0]],
    });
    assert!(matches!(w.jobs(), Err(Error::Parse { line: 3, .. })));

    w.jobs[2].comm = None;
    w.jobs[0].procs = 0;
    assert!(matches!(w.jobs(), Err(Error::Parse { line: 1, .. })));
}

#[test]
fn workload_can_stretch_runtimes_with_distance() {
    assert!(WorkloadSpec::parse(WORKLOAD).expect("valid").time_per_distance.is_none());

    let with = WORKLOAD.replace(
        "\"cores_per_node\": 2,",
        "\"cores_per_node\": 2,\n  \"time_per_distance\": { \"coefficient\": 0.5, \"exponent\": 1, \"seed\": 3 },",
    );
    let tpd = WorkloadSpec::parse(&with)
        .expect("valid")
        .time_per_distance
        .expect("present");
    assert_eq!((tpd.coefficient, tpd.exponent, tpd.jitter, tpd.seed), (0.5, 1.0, 0.0, 3));

    let negative = with.replace("\"coefficient\": 0.5", "\"coefficient\": -0.5");
    assert!(matches!(WorkloadSpec::parse(&negative), Err(Error::Config(_))));
}

#[test]
fn dragonfly_workload_machine_round_trips_through_config() {
    let spec = MachineSpec::Dragonfly {
        routers_per_group: 4,
        ports_per_router: 7,
        opticals_per_router: 1,
        nodes_per_router: 2,
        global: Some("relative".into()),
    };
    assert_eq!(spec.to_config(), "dragonfly[4,7,1,2,all_to_all,relative]");
    let m = crate::config::build_machine(&spec.to_config(), 1).expect("dragonfly");
    assert_eq!(m.num_nodes(), 40);
}
