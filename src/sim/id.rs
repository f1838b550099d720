//! 事件句柄与上下文标识

use super::time::SimTime;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

/// 事件上下文：通常是产生该事件的仿真节点编号。
///
/// 分发时作为显式参数交给事件，而不是放在全局变量里。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Context(pub u32);

impl Context {
    /// “无上下文”哨兵值。
    pub const NONE: Context = Context(u32::MAX);

    pub fn is_none(self) -> bool {
        self == Context::NONE
    }
}

impl Default for Context {
    fn default() -> Self {
        Context::NONE
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_none() {
            f.write_str("none")
        } else {
            write!(f, "{}", self.0)
        }
    }
}

/// 调度返回的不透明句柄，用于取消与查询。
///
/// `EventId::default()` 是空句柄：永远视为已过期，取消它是无操作。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EventId {
    /// 签发该句柄的调度器；空句柄为 0。
    pub(crate) owner: u64,
    pub(crate) uid: u64,
    pub(crate) at: SimTime,
    pub(crate) context: Context,
}

impl EventId {
    /// 空句柄的 uid；真实事件从 1 开始编号。
    pub(crate) const NULL_UID: u64 = 0;

    pub fn uid(&self) -> u64 {
        self.uid
    }

    /// 计划触发时刻（destroy 事件为登记时的时刻）。
    pub fn at(&self) -> SimTime {
        self.at
    }

    pub fn context(&self) -> Context {
        self.context
    }

    pub fn is_null(&self) -> bool {
        self.uid == Self::NULL_UID
    }
}

static NEXT_OWNER: AtomicU64 = AtomicU64::new(1);

/// 单调递增的 uid 分配器；实时模式下与外部投递者共享。
///
/// `owner` 在进程内唯一，别的调度器签发的句柄因此不会命中本调度器的事件。
#[derive(Debug, Clone)]
pub(crate) struct UidGen {
    owner: u64,
    next: Arc<AtomicU64>,
}

impl Default for UidGen {
    fn default() -> Self {
        Self {
            owner: NEXT_OWNER.fetch_add(1, AtomicOrdering::Relaxed),
            next: Arc::new(AtomicU64::new(0)),
        }
    }
}

impl UidGen {
    pub(crate) fn next_uid(&self) -> u64 {
        self.next.fetch_add(1, AtomicOrdering::Relaxed) + 1
    }

    pub(crate) fn id(&self, uid: u64, at: SimTime, context: Context) -> EventId {
        EventId {
            owner: self.owner,
            uid,
            at,
            context,
        }
    }

    /// 句柄非空且由本分配器签发。
    pub(crate) fn issued(&self, id: EventId) -> bool {
        !id.is_null() && id.owner == self.owner
    }
}
