//! 作业到达事件

use super::world::ClusterWorld;
use crate::job::Job;
use crate::sim::{Event, EventClass, Simulator, World};
use std::sync::Arc;

/// 同一时刻：结束先于到达
pub const ARRIVAL_CLASS: EventClass = 1;

#[derive(Debug)]
pub struct JobArrival {
    pub job: Arc<Job>,
}

impl Event for JobArrival {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let JobArrival { job } = *self;
        let w = world
            .as_any_mut()
            .downcast_mut::<ClusterWorld>()
            .expect("world must be ClusterWorld");
        if let Err(e) = w.on_arrival(job, sim) {
            w.fail(sim.now(), e);
        }
    }

    fn class(&self) -> EventClass {
        ARRIVAL_CLASS
    }
}
