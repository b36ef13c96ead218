use serde_json::Value;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Output};
use std::time::{SystemTime, UNIX_EPOCH};

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("time went backwards")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!(
        "schedsim-rs-{prefix}-{}-{nanos}",
        std::process::id()
    ));
    fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

fn write_file(dir: &PathBuf, name: &str, contents: &str) -> PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).expect("write temp file");
    path
}

fn sched_sim(args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_sched_sim"))
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("run sched_sim")
}

fn job_lines(stdout: &str) -> Vec<&str> {
    stdout.lines().filter(|l| l.starts_with("job id=")).collect()
}

fn summary_field<'a>(stdout: &'a str, key: &str) -> Option<&'a str> {
    let line = stdout.lines().find(|l| l.starts_with("summary "))?;
    line.split_whitespace()
        .filter_map(|kv| kv.split_once('='))
        .find(|(k, _)| *k == key)
        .map(|(_, v)| v)
}

const TRACE: &str = "\
# arrival procs runtime estimate
0 3 10 10
1 2 5 5
2 1 5 5
";

#[test]
fn trace_run_prints_one_line_per_job_and_a_summary() {
    let dir = unique_temp_dir("trace");
    let trace = write_file(&dir, "jobs.txt", TRACE);

    let output = sched_sim(&[
        "--trace",
        trace.to_str().unwrap(),
        "--machine",
        "simple[4]",
    ]);
    assert!(
        output.status.success(),
        "sched_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    let jobs = job_lines(&stdout);
    assert_eq!(jobs.len(), 3, "stdout={stdout}");
    assert!(jobs[1].contains("start=10"), "{}", jobs[1]);
    assert!(jobs[2].contains("wait=8"), "{}", jobs[2]);

    assert_eq!(summary_field(&stdout, "scheduler"), Some("pqueue"));
    assert_eq!(summary_field(&stdout, "allocator"), Some("simple"));
    assert_eq!(summary_field(&stdout, "mapper"), Some("simple"));
    assert_eq!(summary_field(&stdout, "jobs"), Some("3"));
    assert_eq!(summary_field(&stdout, "makespan"), Some("15"));
    assert_eq!(summary_field(&stdout, "max_wait"), Some("9"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn easy_backfills_the_small_job_from_the_command_line() {
    let dir = unique_temp_dir("easy");
    let trace = write_file(&dir, "jobs.txt", TRACE);

    let output = sched_sim(&[
        "--trace",
        trace.to_str().unwrap(),
        "--machine",
        "mesh[2,2]",
        "--scheduler",
        "easy",
        "--allocator",
        "firstfit",
    ]);
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    // 第三个作业在保证时刻 10 之前结束，可以插队
    let third = job_lines(&stdout)[2];
    assert!(third.contains("start=2"), "{third}");
    assert_eq!(summary_field(&stdout, "scheduler"), Some("easy"));
    assert_eq!(summary_field(&stdout, "allocator"), Some("firstfit"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn workload_json_run_writes_stats_and_logs() {
    let dir = unique_temp_dir("workload");
    let workload = write_file(
        &dir,
        "workload.json",
        r#"
{
    "schema_version": 1,
    "meta": { "description": "two mesh jobs on a torus" },
    "machine": { "kind": "torus", "x": 4, "y": 4, "z": 2 },
    "cores_per_node": 2,
    "scheduler": "cons",
    "allocator": "mbs",
    "jobs": [
        { "arrival": 0, "procs": 8, "runtime": 20, "comm": { "kind": "mesh", "x": 2, "y": 2, "z": 2 } },
        { "arrival": 0, "procs": 60, "runtime": 10, "est_runtime": 30 },
        { "arrival": 5, "procs": 4, "runtime": 5 }
    ]
}
        "#,
    );
    let stats = dir.join("stats.json");
    let time_log = dir.join("time.log");
    let alloc_log = dir.join("alloc.log");

    let output = sched_sim(&[
        "--workload",
        workload.to_str().unwrap(),
        "--stats-json",
        stats.to_str().unwrap(),
        "--time-log",
        time_log.to_str().unwrap(),
        "--alloc-log",
        alloc_log.to_str().unwrap(),
    ]);
    assert!(
        output.status.success(),
        "sched_sim failed: stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(summary_field(&stdout, "scheduler"), Some("cons"));
    assert_eq!(summary_field(&stdout, "allocator"), Some("mbs"));

    let raw = fs::read_to_string(&stats).expect("read stats.json");
    let v: Value = serde_json::from_str(&raw).expect("parse stats.json");
    assert_eq!(v["summary"]["jobs"], 3);
    let jobs = v["jobs"].as_array().expect("jobs array");
    assert_eq!(jobs.len(), 3);
    for j in jobs {
        let start = j["start"].as_u64().expect("start");
        let arrival = j["arrival"].as_u64().expect("arrival");
        assert!(start >= arrival);
    }
    assert_eq!(v["allocs"].as_array().map(Vec::len), Some(3));

    let time = fs::read_to_string(&time_log).expect("read time log");
    assert!(time.starts_with("# Job\t"));
    assert_eq!(time.lines().count(), 4);
    let alloc = fs::read_to_string(&alloc_log).expect("read alloc log");
    assert_eq!(alloc.lines().count(), 4);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn command_line_overrides_workload_components() {
    let dir = unique_temp_dir("override");
    let workload = write_file(
        &dir,
        "workload.json",
        r#"{
    "schema_version": 1,
    "machine": { "kind": "simple", "nodes": 8 },
    "scheduler": "cons",
    "allocator": "simple",
    "jobs": [ { "arrival": 0, "procs": 2, "runtime": 3 } ]
}"#,
    );
    let output = sched_sim(&[
        "--workload",
        workload.to_str().unwrap(),
        "--scheduler",
        "delayed",
        "--machine",
        "mesh[2,4]",
        "--allocator",
        "nearestamap",
    ]);
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(summary_field(&stdout, "scheduler"), Some("delayed"));
    assert_eq!(summary_field(&stdout, "allocator"), Some("nearestamap"));
    assert_eq!(summary_field(&stdout, "mapper"), Some("nearestamap"));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn time_per_distance_stretches_spread_jobs() {
    let dir = unique_temp_dir("tpd");
    // 作业 3 在第 2 个时刻拿到不相邻的节点 1 和 3
    let trace = write_file(
        &dir,
        "jobs.txt",
        "0 1 20 20\n0 1 2 2\n0 1 20 20\n1 2 4 20\n",
    );
    let t = trace.to_str().unwrap();

    let plain = sched_sim(&["--trace", t, "--machine", "mesh[4,1]"]);
    assert!(plain.status.success());
    let plain = String::from_utf8_lossy(&plain.stdout).to_string();
    assert!(job_lines(&plain)[3].contains("end=6"), "{plain}");

    let stretched = sched_sim(&[
        "--trace",
        t,
        "--machine",
        "mesh[4,1]",
        "--time-per-distance",
        "0.5,1",
    ]);
    assert!(
        stretched.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&stretched.stderr)
    );
    let stretched = String::from_utf8_lossy(&stretched.stdout).to_string();
    assert!(job_lines(&stretched)[3].contains("end=10"), "{stretched}");

    let bad = sched_sim(&["--trace", t, "--machine", "mesh[4,1]", "--time-per-distance", "0.5"]);
    assert!(!bad.status.success());
    assert!(String::from_utf8_lossy(&bad.stderr).contains("error: "));

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn bad_inputs_fail_with_a_message() {
    let dir = unique_temp_dir("errors");
    let trace = write_file(&dir, "jobs.txt", TRACE);
    let bad_trace = write_file(&dir, "bad.txt", "0 2 10 10\n1 two 5 5\n");
    let t = trace.to_str().unwrap();

    for args in [
        vec!["--trace", t],
        vec!["--trace", t, "--machine", "hypercube[4]"],
        vec!["--trace", t, "--machine", "simple[4]", "--scheduler", "easy[lifo]"],
        vec!["--trace", t, "--machine", "simple[4]", "--allocator", "mbs"],
        vec!["--trace", t, "--machine", "simple[2]"],
        vec!["--trace", bad_trace.to_str().unwrap(), "--machine", "simple[4]"],
    ] {
        let output = sched_sim(&args);
        assert!(!output.status.success(), "{args:?} should fail");
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("error: "), "{args:?}: stderr={stderr}");
    }

    let _ = fs::remove_dir_all(&dir);
}
