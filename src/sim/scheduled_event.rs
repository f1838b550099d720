//! 调度事件
//!
//! 定义事件队列中的条目及其优先级比较。

use super::event::Event;
use super::id::Context;
use super::time::SimTime;
use std::cmp::Ordering;

/// 队列条目：触发时刻、入队序号、句柄 uid、上下文和事件对象。
///
/// 排序键只有 `(at, seq)`；`seq` 在进入队列时分配，严格递增，
/// 因此同一时刻的事件按入队顺序（FIFO）出队。
pub(crate) struct ScheduledEvent {
    pub(crate) at: SimTime,
    pub(crate) seq: u64,
    pub(crate) uid: u64,
    pub(crate) context: Context,
    pub(crate) ev: Box<dyn Event>,
}

// BinaryHeap 是 max-heap；我们需要最小时间优先，因此反向比较。
impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.at, self.seq).cmp(&(other.at, other.seq)).reverse()
    }
}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

/// 通过 `schedule_destroy` 登记、由 `destroy` 按登记顺序执行的动作。
pub(crate) struct DestroyEntry {
    pub(crate) uid: u64,
    pub(crate) ev: Box<dyn Event>,
}
