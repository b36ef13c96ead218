//! 优先队列调度：只看队首，不回填

use super::{JobComparator, JobQueue, Scheduler};
use crate::error::{Error, Result};
use crate::job::{Job, JobId};
use crate::machine::{FreeNodes, Machine};
use crate::sim::SimTime;
use std::sync::Arc;
use tracing::{debug, trace};

#[derive(Debug)]
pub struct PqScheduler {
    queue: JobQueue<Arc<Job>>,
    next: Option<(JobId, SimTime)>,
}

impl PqScheduler {
    pub fn new(comp: JobComparator) -> Self {
        Self {
            queue: JobQueue::new(comp),
            next: None,
        }
    }

    pub fn comparator(&self) -> JobComparator {
        self.queue.comparator()
    }
}

impl Default for PqScheduler {
    fn default() -> Self {
        Self::new(JobComparator::Fifo)
    }
}

impl Scheduler for PqScheduler {
    fn name(&self) -> &'static str {
        "pqueue"
    }

    fn job_arrives(
        &mut self,
        job: Arc<Job>,
        time: SimTime,
        _mach: &Machine,
        _free: &FreeNodes,
    ) -> Result<()> {
        trace!(job = %job.id, time = ?time, "入队");
        self.queue.insert(job);
        Ok(())
    }

    fn job_finishes(
        &mut self,
        _job: &Arc<Job>,
        _time: SimTime,
        _mach: &Machine,
        _free: &FreeNodes,
    ) -> Result<()> {
        Ok(())
    }

    fn try_to_start(
        &mut self,
        time: SimTime,
        mach: &Machine,
        free: &FreeNodes,
    ) -> Result<Option<Arc<Job>>> {
        self.next = None;
        let Some(head) = self.queue.first() else {
            return Ok(None);
        };
        if mach.nodes_for(head.procs) > free.num_free() {
            trace!(job = %head.id, free = free.num_free(), "队首放不下");
            return Ok(None);
        }
        self.next = Some((head.id, time));
        Ok(Some(Arc::clone(head)))
    }

    fn start_next(&mut self, time: SimTime, _mach: &Machine, _free: &FreeNodes) -> Result<Arc<Job>> {
        let Some((id, at)) = self.next.take() else {
            return Err(Error::Internal(format!("start_next at {time} without a pending job")));
        };
        if at != time {
            return Err(Error::Internal(format!(
                "{id} was offered at {at} but committed at {time}"
            )));
        }
        let job = self
            .queue
            .remove(id)
            .ok_or_else(|| Error::Internal(format!("{id} is not queued")))?;
        debug!(job = %job.id, time = ?time, "启动");
        Ok(job)
    }

    fn queued(&self) -> usize {
        self.queue.len()
    }

    fn setup_info(&self) -> String {
        format!("priority queue scheduler ({})", self.comparator())
    }
}
