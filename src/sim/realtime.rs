//! 实时同步
//!
//! 实时模式下逻辑时间按固定倍速跟随墙钟：
//!
//! ```text
//! real_deadline = epoch_wall + (firing_time - epoch_logical) / rate
//! ```
//!
//! 分发线程在 `Condvar` 上带超时等待截止时间；外部线程通过
//! [`RealtimeHandle`] 把事件投进受 `Mutex` 保护的收件箱并唤醒分发线程，
//! 因此更早的新事件可以打断当前等待。落后墙钟时的处理由 [`SyncMode`] 显式决定。

use super::error::{Phase, SimError};
use super::event::Event;
use super::id::{Context, EventId, UidGen};
use super::time::{Resolution, SimTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, trace};

/// 落后墙钟时的策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SyncMode {
    /// 尽力追赶：迟到的事件立即分发，只记录日志。
    #[default]
    BestEffort,
    /// 落后超过 `limit_ms` 毫秒时 `run` 返回 [`SimError::RealtimeOverrun`]。
    HardLimit { limit_ms: u64 },
}

impl SyncMode {
    pub fn hard_limit(limit: Duration) -> Self {
        SyncMode::HardLimit {
            limit_ms: u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
        }
    }

    pub(crate) fn limit(self) -> Option<Duration> {
        match self {
            SyncMode::BestEffort => None,
            SyncMode::HardLimit { limit_ms } => Some(Duration::from_millis(limit_ms)),
        }
    }
}

/// 逻辑时间与墙钟之间的仿射映射，每次 `run` 开始时重新锚定。
#[derive(Debug, Clone, Copy)]
pub(crate) struct Pacer {
    wall: Instant,
    logical: SimTime,
    rate: f64,
}

impl Pacer {
    pub(crate) fn start(logical: SimTime, rate: f64) -> Self {
        Self {
            wall: Instant::now(),
            logical,
            rate,
        }
    }

    /// 逻辑时刻 `t` 对应的墙钟截止时间；超出 `Instant` 表示范围时返回 `None`。
    pub(crate) fn deadline(&self, t: SimTime) -> Option<Instant> {
        let secs = ((t - self.logical).as_secs_f64() / self.rate).max(0.0);
        let d = Duration::try_from_secs_f64(secs).ok()?;
        self.wall.checked_add(d)
    }

    pub(crate) fn logical_now(&self) -> SimTime {
        self.logical + SimTime::from_secs_f64(self.wall.elapsed().as_secs_f64() * self.rate)
    }
}

/// 外部线程投递、尚未并入主队列的事件。
pub(crate) struct Inbound {
    pub(crate) uid: u64,
    pub(crate) at: SimTime,
    pub(crate) context: Context,
    pub(crate) ev: Box<dyn Event>,
}

pub(crate) struct Inbox {
    pub(crate) events: Vec<Inbound>,
    pub(crate) stop: bool,
    /// `destroy` 之后关闭，`reinitialize` 重新打开。
    pub(crate) closed: bool,
    /// 分发线程最近一次推进后的逻辑时间。
    pub(crate) now: SimTime,
    pub(crate) pacer: Option<Pacer>,
    /// 存活的 [`RealtimeHandle`] 数量。
    pub(crate) producers: usize,
}

impl Inbox {
    pub(crate) fn realtime_now(&self) -> SimTime {
        match &self.pacer {
            Some(p) => p.logical_now().max(self.now),
            None => self.now,
        }
    }

    pub(crate) fn contains(&self, uid: u64) -> bool {
        self.events.iter().any(|e| e.uid == uid)
    }

    pub(crate) fn remove(&mut self, uid: u64) -> bool {
        let before = self.events.len();
        self.events.retain(|e| e.uid != uid);
        self.events.len() != before
    }
}

pub(crate) struct Shared {
    inbox: Mutex<Inbox>,
    pub(crate) wake: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            inbox: Mutex::new(Inbox {
                events: Vec::new(),
                stop: false,
                closed: false,
                now: SimTime::ZERO,
                pacer: None,
                producers: 0,
            }),
            wake: Condvar::new(),
        }
    }

    /// 锁被污染时直接接管。
    pub(crate) fn lock(&self) -> MutexGuard<'_, Inbox> {
        self.inbox.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// 实时模式下调度器持有的同步状态。
pub(crate) struct Realtime {
    pub(crate) shared: Arc<Shared>,
    pub(crate) rate: f64,
    pub(crate) sync: SyncMode,
}

impl Realtime {
    pub(crate) fn new(rate: f64, sync: SyncMode) -> Self {
        Self {
            shared: Arc::new(Shared::new()),
            rate,
            sync,
        }
    }
}

/// 外部投递句柄：可跨线程克隆，向实时调度器插入事件或请求停止。
///
/// 只要还有句柄存活，实时 `run` 在队列为空时会等待新事件而不是返回。
pub struct RealtimeHandle {
    shared: Arc<Shared>,
    uids: UidGen,
    resolution: Resolution,
}

impl RealtimeHandle {
    pub(crate) fn new(shared: Arc<Shared>, uids: UidGen, resolution: Resolution) -> Self {
        shared.lock().producers += 1;
        Self {
            shared,
            uids,
            resolution,
        }
    }

    /// 当前墙钟对应的逻辑时间（未运行时为调度器的 `now`）。
    pub fn realtime_now(&self) -> SimTime {
        self.shared.lock().realtime_now()
    }

    /// 在 `realtime_now() + delay` 触发，无上下文。
    pub fn schedule<E: Event>(&self, delay: SimTime, ev: E) -> Result<EventId, SimError> {
        self.schedule_with_context(Context::NONE, delay, ev)
    }

    pub fn schedule_now<E: Event>(&self, ev: E) -> Result<EventId, SimError> {
        self.schedule_with_context(Context::NONE, SimTime::ZERO, ev)
    }

    pub fn schedule_with_context<E: Event>(
        &self,
        context: Context,
        delay: SimTime,
        ev: E,
    ) -> Result<EventId, SimError> {
        if delay.is_negative() {
            return Err(SimError::negative("delay", delay));
        }
        let delay = delay.truncate_to(self.resolution);

        let mut inbox = self.shared.lock();
        if inbox.closed {
            return Err(SimError::InvalidState {
                op: "schedule",
                phase: Phase::Destroyed,
            });
        }
        // 外部时刻按分辨率向上取整，不会落在调度器时钟之前
        let at = (inbox.realtime_now() + delay).ceil_to(self.resolution);
        let uid = self.uids.next_uid();
        inbox.events.push(Inbound {
            uid,
            at,
            context,
            ev: Box::new(ev),
        });
        trace!(uid, at = %at, %context, "外部线程投递事件");
        drop(inbox);

        self.shared.wake.notify_all();
        Ok(self.uids.id(uid, at, context))
    }

    /// 请求正在运行的 `run` 在当前事件结束后返回。
    pub fn stop(&self) {
        self.shared.lock().stop = true;
        self.shared.wake.notify_all();
        debug!("外部线程请求停止");
    }
}

impl fmt::Debug for RealtimeHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RealtimeHandle")
            .field("resolution", &self.resolution)
            .finish_non_exhaustive()
    }
}

impl Clone for RealtimeHandle {
    fn clone(&self) -> Self {
        Self::new(Arc::clone(&self.shared), self.uids.clone(), self.resolution)
    }
}

impl Drop for RealtimeHandle {
    fn drop(&mut self) {
        let mut inbox = self.shared.lock();
        inbox.producers = inbox.producers.saturating_sub(1);
        drop(inbox);
        self.shared.wake.notify_all();
    }
}
