//! 调度器错误类型

use super::event::EventError;
use super::id::EventId;
use super::time::SimTime;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// 调度器的生命周期阶段。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    /// 可以调度、运行。
    Ready,
    /// `run` / `run_until` 正在分发事件。
    Running,
    /// `destroy` 正在执行 destroy 动作。
    Destroying,
    /// 已销毁，需要 `reinitialize` 后才能再次调度。
    Destroyed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Ready => "ready",
            Phase::Running => "running",
            Phase::Destroying => "destroying",
            Phase::Destroyed => "destroyed",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Error)]
pub enum SimError {
    /// 参数非法，例如负延迟；队列保持不变。
    #[error("invalid argument `{what}`: {value}")]
    InvalidArgument { what: &'static str, value: String },

    /// 当前阶段不允许该操作。
    #[error("`{op}` is not allowed while the simulator is {phase}")]
    InvalidState { op: &'static str, phase: Phase },

    /// 事件执行失败；其余未执行事件仍在队列中。
    #[error("event {} failed at {at}", event.uid())]
    Action {
        at: SimTime,
        event: EventId,
        #[source]
        source: EventError,
    },

    /// 实时模式落后墙钟超过硬限制；超时事件仍在队列中。
    #[error("realtime overrun at {at}: {lag:?} behind wall clock (limit {limit:?})")]
    RealtimeOverrun {
        at: SimTime,
        lag: Duration,
        limit: Duration,
    },

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Config(#[from] serde_json::Error),
}

impl SimError {
    pub(crate) fn negative(what: &'static str, value: SimTime) -> SimError {
        SimError::InvalidArgument {
            what,
            value: value.to_string(),
        }
    }

    pub fn is_invalid_argument(&self) -> bool {
        matches!(self, SimError::InvalidArgument { .. })
    }

    pub fn is_invalid_state(&self) -> bool {
        matches!(self, SimError::InvalidState { .. })
    }
}
