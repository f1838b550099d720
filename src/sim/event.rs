//! 事件 trait
//!
//! 定义仿真事件接口，以及把闭包包装成事件的适配器。

use super::id::Context;
use super::simulator::Simulator;
use super::world::World;
use std::error::Error;

/// 事件执行失败时返回的错误；调度器不捕获，直接从 `run` 传出。
pub type EventError = Box<dyn Error + Send + Sync + 'static>;

pub type EventResult = Result<(), EventError>;

/// 事件：可被调度执行。使用 `self: Box<Self>` 以支持 move/所有权转移。
///
/// `cx` 是调度时记录的上下文（无上下文时为 [`Context::NONE`]）。
/// `Send` 约束使实时模式下其他线程也能投递事件。
pub trait Event: Send + 'static {
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult;
}

/// 闭包事件。
///
/// 直接用元组构造时闭包参数无法推断，请用 [`FnEvent::new`] 或
/// [`Simulator::schedule_fn`]。
pub struct FnEvent<F>(F);

impl<F> FnEvent<F>
where
    F: FnOnce(Context, &mut Simulator, &mut dyn World) -> EventResult + Send + 'static,
{
    pub fn new(f: F) -> Self {
        FnEvent(f)
    }
}

impl<F> Event for FnEvent<F>
where
    F: FnOnce(Context, &mut Simulator, &mut dyn World) -> EventResult + Send + 'static,
{
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult {
        (self.0)(cx, sim, world)
    }
}
