//! 事件 trait
//!
//! 定义仿真事件接口。

use super::simulator::Simulator;
use super::world::World;

/// 同一时刻的事件按类别先后执行：数值越小越先执行。
pub type EventClass = u8;

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
pub trait Event: Send + 'static {
    fn execute(self: Box<Self>, sim: &mut Simulator, world: &mut dyn World);

    /// 同一时刻内的执行类别（默认 0）
    fn class(&self) -> EventClass {
        0
    }
}
