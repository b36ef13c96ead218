//! 作业结束事件

use super::world::ClusterWorld;
use crate::job::JobId;
use crate::sim::{Event, EventClass, Simulator, World};

pub const COMPLETION_CLASS: EventClass = 0;

#[derive(Debug)]
pub struct JobCompletion {
    pub job: JobId,
}

impl Event for JobCompletion {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let JobCompletion { job } = *self;
        let w = world
            .as_any_mut()
            .downcast_mut::<ClusterWorld>()
            .expect("world must be ClusterWorld");
        if let Err(e) = w.on_completion(job, sim) {
            w.fail(sim.now(), e);
        }
    }

    fn class(&self) -> EventClass {
        COMPLETION_CLASS
    }
}
