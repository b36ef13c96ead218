//! 启动尝试事件
//!
//! 排在同一时刻的所有结束与到达之后执行，因此调度器看到的是该时刻处理完毕的状态。

use super::world::ClusterWorld;
use crate::sim::{Event, EventClass, Simulator, World};

pub const START_CLASS: EventClass = 2;

#[derive(Debug)]
pub struct StartJobs;

impl Event for StartJobs {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World) {
        let w = world
            .as_any_mut()
            .downcast_mut::<ClusterWorld>()
            .expect("world must be ClusterWorld");
        if let Err(e) = w.start_jobs(sim) {
            w.fail(sim.now(), e);
        }
    }

    fn class(&self) -> EventClass {
        START_CLASS
    }
}
