//! 仿真核心模块
//!
//! 此模块包含事件驱动仿真的核心组件：仿真时间、事件与句柄、世界、
//! 调度器及其实时同步变体。

// 子模块声明
mod config;
mod error;
mod event;
mod id;
mod realtime;
mod scheduled_event;
mod simulator;
mod time;
mod world;

// 重新导出公共接口
pub use config::{SchedulerMode, SimConfig};
pub use error::{Phase, SimError};
pub use event::{Event, EventError, EventResult, FnEvent};
pub use id::{Context, EventId};
pub use realtime::{RealtimeHandle, SyncMode};
pub use simulator::Simulator;
pub use time::{Resolution, SimTime};
pub use world::World;
