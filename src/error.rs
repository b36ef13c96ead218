//! 错误类型
//!
//! “资源不足”不是错误：分配器返回 `Ok(None)`，调度器返回 `Ok(None)`。
//! 这里只收录致命错误：配置非法、输入格式错误，以及内部一致性被破坏。

use crate::job::JobId;
use crate::sim::SimTime;
use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// 构造参数缺失或非法（未知名称、参数个数不对、维度与节点数不符等）
    #[error("invalid configuration: {0}")]
    Config(String),

    /// 输入文件中某一行格式不对
    #[error("parse error at line {line}: {msg}")]
    Parse { line: usize, msg: String },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 预估调度表的空闲处理器累计值为负，或末端没有回到总数
    #[error("schedule inconsistent at {time:?}: {reason}\n{dump}")]
    ScheduleInconsistent {
        time: SimTime,
        reason: String,
        dump: String,
    },

    /// EASY 对同一个队首作业给出了更晚的保证时间
    #[error("guarantee for {job:?} regressed from {previous:?} to {new:?}")]
    GuaranteeRegressed {
        job: JobId,
        previous: SimTime,
        new: SimTime,
    },

    /// MBS 的 FBR 与 ordering 不一致
    #[error("block registry corrupted: {reason}\n{dump}")]
    BlockRegistry { reason: String, dump: String },

    /// 调度器放行了作业，但分配器找不到节点
    #[error("scheduler admitted {job:?} but the allocator could not place it")]
    AllocationFailed { job: JobId },

    /// 按通信距离放大后的运行时间超过了用户给出的预估
    #[error("{job:?} would run {runtime} with its placement, beyond its estimate {estimate}")]
    RuntimeExceedsEstimate {
        job: JobId,
        runtime: u64,
        estimate: u64,
    },

    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    pub fn parse(line: usize, msg: impl Into<String>) -> Self {
        Error::Parse {
            line,
            msg: msg.into(),
        }
    }

    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
