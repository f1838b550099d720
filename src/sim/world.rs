//! 世界 trait
//!
//! 定义仿真世界接口：模型状态以 `&mut dyn World` 注入每个事件。

use super::simulator::Simulator;
use std::any::Any;

/// 仿真世界：由业务层实现（例如拓扑、统计、场景记录等）。
pub trait World: Any {
    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// 每个事件成功执行后调用。
    fn on_tick(&mut self, _sim: &mut Simulator) {}
}

/// 不需要模型状态时使用的空世界。
impl World for () {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
