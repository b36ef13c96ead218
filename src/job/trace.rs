//! 文本作业 trace
//!
//! 每行一个作业：`arrival procs actual_runtime est_runtime [通信描述]`，
//! 通信描述可为 `alltoall`、`mesh x y z`、`matrix <file>` 或
//! `coord <file> <center>`；省略时为全互连。`#` 开头的行与空行忽略。
//! 作业编号按行序从 0 开始分配。

use super::{Job, TaskCommInfo};
use crate::error::{Error, Result};
use crate::machine::Machine;
use std::path::Path;
use tracing::debug;

fn num<T: std::str::FromStr>(tok: Option<&str>, line: usize, what: &str) -> Result<T> {
    let tok = tok.ok_or_else(|| Error::parse(line, format!("missing {what}")))?;
    tok.parse()
        .map_err(|_| Error::parse(line, format!("invalid {what}: {tok:?}")))
}

fn read_matrix(path: &Path, line: usize) -> Result<Vec<Vec<f64>>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let mut rows = Vec::new();
    for l in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
        let row = l
            .split_whitespace()
            .map(|t| num::<f64>(Some(t), line, "matrix entry"))
            .collect::<Result<Vec<_>>>()?;
        rows.push(row);
    }
    Ok(rows)
}

/// 解析 trace 文本；`base` 用于解析行内引用的相对路径
pub fn parse_trace(text: &str, base: &Path) -> Result<Vec<Job>> {
    let mut jobs = Vec::new();
    for (idx, raw) in text.lines().enumerate() {
        let line = idx + 1;
        let raw = raw.trim();
        if raw.is_empty() || raw.starts_with('#') {
            continue;
        }
        let mut toks = raw.split_whitespace();
        let arrival: u64 = num(toks.next(), line, "arrival time")?;
        let procs: usize = num(toks.next(), line, "processor count")?;
        let actual: u64 = num(toks.next(), line, "running time")?;
        let est: i64 = num(toks.next(), line, "estimated running time")?;
        if procs == 0 {
            return Err(Error::parse(line, "a job needs at least one processor"));
        }
        // 未给出预估时长时取实际时长的两倍
        let est = if est <= 0 { 2 * actual } else { est as u64 };

        let comm = match toks.next() {
            None | Some("alltoall") => TaskCommInfo::all_to_all(procs),
            Some("mesh") => {
                let x: usize = num(toks.next(), line, "mesh x")?;
                let y: usize = num(toks.next(), line, "mesh y")?;
                let z: usize = num(toks.next(), line, "mesh z")?;
                if x * y * z != procs {
                    return Err(Error::parse(
                        line,
                        format!("communication mesh {x}x{y}x{z} does not match {procs} processors"),
                    ));
                }
                TaskCommInfo::mesh(x, y, z)
            }
            Some("matrix") => {
                let file = toks
                    .next()
                    .ok_or_else(|| Error::parse(line, "missing matrix file"))?;
                let m = read_matrix(&base.join(file), line)?;
                if m.iter().any(|r| r.len() != m.len()) {
                    return Err(Error::parse(line, format!("matrix in {file} is not square")));
                }
                if m.len() != procs {
                    return Err(Error::parse(
                        line,
                        format!("matrix in {file} does not match the job size"),
                    ));
                }
                TaskCommInfo::from_matrix(&m)
            }
            Some("coord") => {
                let file = toks
                    .next()
                    .ok_or_else(|| Error::parse(line, "missing coordinate file"))?;
                let center: usize = num(toks.next(), line, "center task")?;
                let rows = read_matrix(&base.join(file), line)?;
                if rows.len() != procs || rows.iter().any(|r| r.is_empty() || r.len() > 3) {
                    return Err(Error::parse(
                        line,
                        format!("coordinates in {file} do not match the job size"),
                    ));
                }
                let coords = rows
                    .iter()
                    .map(|r| {
                        let mut c = [0.0; 3];
                        c[..r.len()].copy_from_slice(r);
                        c
                    })
                    .collect();
                TaskCommInfo::all_to_all(procs).with_coords(coords, Some(center))
            }
            Some(other) => {
                return Err(Error::parse(
                    line,
                    format!("unknown communication type {other:?}"),
                ));
            }
        };

        let job = Job::new(jobs.len() as u64, arrival, procs, actual, est).with_comm(comm);
        debug!(job = %job.id, arrival, procs, actual, est, "读入作业");
        jobs.push(job);
    }
    Ok(jobs)
}

pub fn read_trace(path: &Path) -> Result<Vec<Job>> {
    let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    let base = path.parent().unwrap_or_else(|| Path::new("."));
    parse_trace(&text, base)
}

/// 拒绝超过整机处理器数、或实际时长超过预估时长的作业
pub fn validate_jobs(jobs: &[Job], mach: &Machine) -> Result<()> {
    for (i, j) in jobs.iter().enumerate() {
        if j.actual_runtime > j.est_runtime {
            return Err(Error::parse(
                i + 1,
                format!(
                    "{} has running time {}, longer than its estimated running time {}",
                    j.id, j.actual_runtime, j.est_runtime
                ),
            ));
        }
        if j.procs > mach.num_cores() {
            return Err(Error::parse(
                i + 1,
                format!(
                    "{} requires {} processors but only {} are in the machine",
                    j.id,
                    j.procs,
                    mach.num_cores()
                ),
            ));
        }
    }
    Ok(())
}
