//! 作业优先级比较器
//!
//! 所有比较最终都以作业编号收尾，因此不同作业永不相等。

use crate::job::{Job, JobId};
use std::cmp::Ordering;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobComparator {
    /// 到达时间早者优先
    #[default]
    Fifo,
    /// 处理器多者优先
    LargeFirst,
    SmallFirst,
    /// 预估时长长者优先
    LongFirst,
    ShortFirst,
    /// 处理器多者优先，其次预估时长长者，再次到达早者
    BetterFit,
}

impl JobComparator {
    pub const ALL: [JobComparator; 6] = [
        JobComparator::Fifo,
        JobComparator::LargeFirst,
        JobComparator::SmallFirst,
        JobComparator::LongFirst,
        JobComparator::ShortFirst,
        JobComparator::BetterFit,
    ];

    pub fn parse(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "fifo" => Some(Self::Fifo),
            "largefirst" => Some(Self::LargeFirst),
            "smallfirst" => Some(Self::SmallFirst),
            "longfirst" => Some(Self::LongFirst),
            "shortfirst" => Some(Self::ShortFirst),
            "betterfit" => Some(Self::BetterFit),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Fifo => "fifo",
            Self::LargeFirst => "largefirst",
            Self::SmallFirst => "smallfirst",
            Self::LongFirst => "longfirst",
            Self::ShortFirst => "shortfirst",
            Self::BetterFit => "betterfit",
        }
    }

    /// `Less` 表示 `a` 排在 `b` 前面
    pub fn compare(&self, a: &Job, b: &Job) -> Ordering {
        let by_arrival = a.arrival.cmp(&b.arrival);
        let primary = match self {
            Self::Fifo => Ordering::Equal,
            Self::LargeFirst => b.procs.cmp(&a.procs),
            Self::SmallFirst => a.procs.cmp(&b.procs),
            Self::LongFirst => b.est_runtime.cmp(&a.est_runtime),
            Self::ShortFirst => a.est_runtime.cmp(&b.est_runtime),
            Self::BetterFit => b
                .procs
                .cmp(&a.procs)
                .then(b.est_runtime.cmp(&a.est_runtime)),
        };
        primary.then(by_arrival).then(a.id.cmp(&b.id))
    }
}

impl fmt::Display for JobComparator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 按比较器保持有序的作业队列
#[derive(Debug, Clone)]
pub struct JobQueue<J> {
    comp: JobComparator,
    jobs: Vec<J>,
}

impl<J: AsRef<Job>> JobQueue<J> {
    pub fn new(comp: JobComparator) -> Self {
        Self {
            comp,
            jobs: Vec::new(),
        }
    }

    pub fn comparator(&self) -> JobComparator {
        self.comp
    }

    pub fn insert(&mut self, job: J) {
        let comp = self.comp;
        let at = self
            .jobs
            .partition_point(|q| comp.compare(q.as_ref(), job.as_ref()) == Ordering::Less);
        self.jobs.insert(at, job);
    }

    /// 按作业编号移除
    pub fn remove(&mut self, id: JobId) -> Option<J> {
        let at = self.jobs.iter().position(|q| q.as_ref().id == id)?;
        Some(self.jobs.remove(at))
    }

    pub fn first(&self) -> Option<&J> {
        self.jobs.first()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, J> {
        self.jobs.iter()
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }
}
