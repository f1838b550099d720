//! 仿真器
//!
//! 定义事件驱动仿真器，维护逻辑时钟、事件队列与分发循环。
//!
//! 队列按 `(at, seq)` 升序出队。取消采用惰性删除：句柄 uid 从 `pending`
//! 集合移除后，残留在堆里的条目在到达队头时被丢弃，永远不会执行。

use super::config::{SchedulerMode, SimConfig};
use super::error::{Phase, SimError};
use super::event::{Event, EventResult, FnEvent};
use super::id::{Context, EventId, UidGen};
use super::realtime::{Pacer, Realtime, RealtimeHandle};
use super::scheduled_event::{DestroyEntry, ScheduledEvent};
use super::time::SimTime;
use super::world::World;
use std::collections::{BinaryHeap, HashSet, VecDeque};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

/// 分发循环结束的原因。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Exit {
    /// 队列已空（实时模式下还要求没有存活的外部句柄）。
    Drained,
    /// 下一个事件晚于 `run_until` 的上限。
    Limit,
    /// `stop()` 或到达 `stop_after` 的截止时间。
    Stopped,
}

/// 下一步要等待的目标。
#[derive(Debug, Clone, Copy)]
enum Target {
    Event(SimTime),
    StopAt(SimTime),
    Until(SimTime),
}

fn realtime_for(config: &SimConfig) -> Option<Realtime> {
    match config.mode {
        SchedulerMode::Default => None,
        SchedulerMode::Realtime { rate, sync } => Some(Realtime::new(rate, sync)),
    }
}

/// 事件驱动仿真器：维护当前时间与事件队列。
pub struct Simulator {
    config: SimConfig,
    phase: Phase,
    now: SimTime,
    next_seq: u64,
    uids: UidGen,
    q: BinaryHeap<ScheduledEvent>,
    /// 主队列中仍处于 Pending 的 uid。
    pending: HashSet<u64>,
    destroy_q: VecDeque<DestroyEntry>,
    /// 正在分发的事件的上下文。
    context: Context,
    stop_requested: bool,
    stop_at: Option<SimTime>,
    event_count: u64,
    /// 自构造/销毁以来是否调度过事件；决定还能否修改配置。
    scheduled_any: bool,
    realtime: Option<Realtime>,
}

impl Default for Simulator {
    fn default() -> Self {
        Self::build(SimConfig::default())
    }
}

impl Simulator {
    /// 按配置构造；实时倍速非法时返回 `InvalidArgument`。
    pub fn new(config: SimConfig) -> Result<Self, SimError> {
        config.validate()?;
        Ok(Self::build(config))
    }

    fn build(config: SimConfig) -> Self {
        let realtime = realtime_for(&config);
        Self {
            config,
            phase: Phase::Ready,
            now: SimTime::ZERO,
            next_seq: 0,
            uids: UidGen::default(),
            q: BinaryHeap::new(),
            pending: HashSet::new(),
            destroy_q: VecDeque::new(),
            context: Context::NONE,
            stop_requested: false,
            stop_at: None,
            event_count: 0,
            scheduled_any: false,
            realtime,
        }
    }

    pub fn config(&self) -> &SimConfig {
        &self.config
    }

    /// 替换配置。只能在第一次调度之前（或 `destroy` 之后）调用；
    /// 旧的实时句柄随之失效。
    pub fn configure(&mut self, config: SimConfig) -> Result<(), SimError> {
        if matches!(self.phase, Phase::Running | Phase::Destroying) || self.scheduled_any {
            return Err(SimError::InvalidState {
                op: "configure",
                phase: self.phase,
            });
        }
        config.validate()?;
        // 旧句柄失效
        self.close_inbox();
        self.realtime = realtime_for(&config);
        self.config = config;
        // Destroyed 下新收件箱同样关闭，直到 reinitialize
        if self.phase == Phase::Destroyed {
            self.close_inbox();
        }
        info!(config = ?self.config, "调度器配置已更新");
        Ok(())
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// 获取当前仿真时间
    pub fn now(&self) -> SimTime {
        self.now
    }

    /// 正在分发的事件的上下文；分发之外为 [`Context::NONE`]。
    pub fn context(&self) -> Context {
        self.context
    }

    /// 自构造（或上次 `destroy`）以来已执行的事件数。
    pub fn event_count(&self) -> u64 {
        self.event_count
    }

    /// 仍待执行的事件数（不含 destroy 动作）。
    pub fn pending_events(&self) -> usize {
        let inbound = self
            .realtime
            .as_ref()
            .map_or(0, |rt| rt.shared.lock().events.len());
        self.pending.len() + inbound
    }

    pub fn is_finished(&self) -> bool {
        self.pending_events() == 0
    }

    /// 最早的待执行事件的触发时刻。
    pub fn next_event_time(&mut self) -> Option<SimTime> {
        self.peek_live()
    }

    /// 调度事件在 `now() + delay` 执行，继承当前上下文。
    pub fn schedule<E: Event>(&mut self, delay: SimTime, ev: E) -> Result<EventId, SimError> {
        let context = self.context;
        self.schedule_with_context(context, delay, ev)
    }

    /// 在当前时刻、所有已入队的同刻事件之后执行。
    pub fn schedule_now<E: Event>(&mut self, ev: E) -> Result<EventId, SimError> {
        self.schedule(SimTime::ZERO, ev)
    }

    /// 调度闭包事件。
    pub fn schedule_fn<F>(&mut self, delay: SimTime, f: F) -> Result<EventId, SimError>
    where
        F: FnOnce(Context, &mut Simulator, &mut dyn World) -> EventResult + Send + 'static,
    {
        self.schedule(delay, FnEvent::new(f))
    }

    #[tracing::instrument(
        level = "trace",
        skip(self, ev),
        fields(event_type = std::any::type_name::<E>(), delay = %delay, context = %context)
    )]
    pub fn schedule_with_context<E: Event>(
        &mut self,
        context: Context,
        delay: SimTime,
        ev: E,
    ) -> Result<EventId, SimError> {
        self.ensure_schedulable("schedule")?;
        if delay.is_negative() {
            return Err(SimError::negative("delay", delay));
        }
        let at = self.now + delay.truncate_to(self.config.resolution);
        let uid = self.uids.next_uid();
        self.push(at, uid, context, Box::new(ev));
        Ok(self.uids.id(uid, at, context))
    }

    /// 登记一个在 `destroy` 时按登记顺序执行的动作。
    pub fn schedule_destroy<E: Event>(&mut self, ev: E) -> Result<EventId, SimError> {
        if matches!(self.phase, Phase::Destroyed) {
            return Err(SimError::InvalidState {
                op: "schedule_destroy",
                phase: self.phase,
            });
        }
        let uid = self.uids.next_uid();
        self.destroy_q.push_back(DestroyEntry {
            uid,
            ev: Box::new(ev),
        });
        debug!(uid, pending_destroy = self.destroy_q.len(), "登记 destroy 动作");
        Ok(self.uids.id(uid, self.now, Context::NONE))
    }

    /// 取消事件。已执行、已取消、未知、空句柄或别的调度器签发的句柄都是无操作。
    ///
    /// 主队列里的条目惰性删除；残留条目超过有效事件数两倍时整体压缩一次。
    pub fn cancel(&mut self, id: EventId) {
        if !self.uids.issued(id) {
            trace!(uid = id.uid, "句柄不属于本调度器，忽略");
            return;
        }
        let removed = self.pending.remove(&id.uid)
            || self.remove_destroy(id.uid)
            || self
                .realtime
                .as_ref()
                .is_some_and(|rt| rt.shared.lock().remove(id.uid));
        if removed {
            debug!(uid = id.uid, at = %id.at, "事件已取消");
            self.compact_if_sparse();
        } else {
            trace!(uid = id.uid, "取消已过期的事件，忽略");
        }
    }

    /// 事件已执行或已取消（以及空句柄）时返回 `true`。
    pub fn is_expired(&self, id: EventId) -> bool {
        if !self.uids.issued(id) {
            return true;
        }
        let live = self.pending.contains(&id.uid)
            || self.destroy_q.iter().any(|e| e.uid == id.uid)
            || self
                .realtime
                .as_ref()
                .is_some_and(|rt| rt.shared.lock().contains(id.uid));
        !live
    }

    /// 距离事件触发还剩多少逻辑时间；已过期返回零。
    pub fn delay_left(&self, id: EventId) -> SimTime {
        if self.is_expired(id) {
            SimTime::ZERO
        } else {
            (id.at - self.now).max(SimTime::ZERO)
        }
    }

    /// 请求分发循环在当前事件结束后返回。只在 `run` 期间有效：
    /// 每次 `run` 开始都会清除上一次的立即停止请求。
    pub fn stop(&mut self) {
        self.stop_requested = true;
        debug!(now = %self.now, "请求停止");
    }

    /// 逻辑时间到达 `now() + delay` 时停止；触发时刻不早于截止时间的事件留在队列中。
    /// 多次调用取最早的截止时间。
    pub fn stop_after(&mut self, delay: SimTime) -> Result<(), SimError> {
        self.ensure_schedulable("stop_after")?;
        if delay.is_negative() {
            return Err(SimError::negative("stop delay", delay));
        }
        let at = self.now + delay.truncate_to(self.config.resolution);
        self.stop_at = Some(self.stop_at.map_or(at, |prev| prev.min(at)));
        debug!(stop_at = %at, "设置停止截止时间");
        Ok(())
    }

    /// 实时模式下获取外部投递句柄。
    pub fn realtime_handle(&self) -> Result<RealtimeHandle, SimError> {
        match &self.realtime {
            Some(rt) => Ok(RealtimeHandle::new(
                Arc::clone(&rt.shared),
                self.uids.clone(),
                self.config.resolution,
            )),
            None => Err(SimError::InvalidState {
                op: "realtime_handle",
                phase: self.phase,
            }),
        }
    }

    /// 运行所有事件直到队列为空或被停止。
    ///
    /// 事件返回错误时立即返回 [`SimError::Action`]，其余事件保留在队列中，
    /// 可以再次 `run` 或 `destroy`。
    #[tracing::instrument(skip(self, world))]
    pub fn run(&mut self, world: &mut dyn World) -> Result<(), SimError> {
        self.dispatch(world, None)
    }

    /// 运行直到事件队列为空或到达 `until`（包含恰好在 `until` 的事件），
    /// 未被停止时把时钟推进到 `until`。
    #[tracing::instrument(skip(self, world))]
    pub fn run_until(&mut self, until: SimTime, world: &mut dyn World) -> Result<(), SimError> {
        let until = until.truncate_to(self.config.resolution);
        self.dispatch(world, Some(until))
    }

    /// 丢弃所有待执行事件（不执行），按登记顺序执行 destroy 动作，
    /// 然后把时钟归零并清空状态。重复调用是安全的。
    ///
    /// 某个 destroy 动作失败不会阻止其余动作执行，返回第一个错误。
    pub fn destroy(&mut self, world: &mut dyn World) -> Result<(), SimError> {
        match self.phase {
            Phase::Running | Phase::Destroying => {
                return Err(SimError::InvalidState {
                    op: "destroy",
                    phase: self.phase,
                });
            }
            Phase::Destroyed => {
                debug!("调度器已销毁，忽略");
                return Ok(());
            }
            Phase::Ready => {}
        }

        self.phase = Phase::Destroying;
        let discarded = self.pending.len();
        self.q.clear();
        self.pending.clear();
        self.close_inbox();
        self.context = Context::NONE;

        let mut first_err = None;
        let mut destroyed = 0usize;
        while let Some(entry) = self.destroy_q.pop_front() {
            destroyed += 1;
            let at = self.now;
            if let Err(source) = entry.ev.execute(Context::NONE, self, world) {
                warn!(uid = entry.uid, error = %source, "destroy 动作失败");
                first_err.get_or_insert(SimError::Action {
                    at,
                    event: self.uids.id(entry.uid, at, Context::NONE),
                    source,
                });
            }
        }

        info!(
            discarded_events = discarded,
            destroy_actions = destroyed,
            final_time = %self.now,
            "🧹 仿真已销毁"
        );

        self.now = SimTime::ZERO;
        self.next_seq = 0;
        self.stop_requested = false;
        self.stop_at = None;
        self.event_count = 0;
        self.scheduled_any = false;
        self.phase = Phase::Destroyed;

        first_err.map_or(Ok(()), Err)
    }

    /// 离开 `Destroyed` 阶段，允许从零时刻开始新的仿真。
    pub fn reinitialize(&mut self) -> Result<(), SimError> {
        match self.phase {
            Phase::Destroyed => {
                if let Some(rt) = &self.realtime {
                    let mut inbox = rt.shared.lock();
                    inbox.closed = false;
                    inbox.stop = false;
                    inbox.now = SimTime::ZERO;
                }
                self.stop_at = None;
                self.stop_requested = false;
                self.phase = Phase::Ready;
                debug!("调度器已重新初始化");
                Ok(())
            }
            Phase::Ready => Ok(()),
            phase => Err(SimError::InvalidState {
                op: "reinitialize",
                phase,
            }),
        }
    }

    fn ensure_schedulable(&self, op: &'static str) -> Result<(), SimError> {
        match self.phase {
            Phase::Ready | Phase::Running => Ok(()),
            phase => Err(SimError::InvalidState { op, phase }),
        }
    }

    fn push(&mut self, at: SimTime, uid: u64, context: Context, ev: Box<dyn Event>) {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.pending.insert(uid);
        self.scheduled_any = true;
        self.q.push(ScheduledEvent {
            at,
            seq,
            uid,
            context,
            ev,
        });
        trace!(now = %self.now, at = %at, seq, uid, queue_size = self.q.len(), "事件已加入队列");
    }

    fn remove_destroy(&mut self, uid: u64) -> bool {
        let before = self.destroy_q.len();
        self.destroy_q.retain(|e| e.uid != uid);
        self.destroy_q.len() != before
    }

    fn close_inbox(&mut self) {
        if let Some(rt) = &self.realtime {
            let mut inbox = rt.shared.lock();
            inbox.events.clear();
            inbox.closed = true;
            inbox.stop = false;
            inbox.pacer = None;
            drop(inbox);
            rt.shared.wake.notify_all();
        }
    }

    fn compact_if_sparse(&mut self) {
        if self.q.len() <= 2 * self.pending.len().max(16) {
            return;
        }
        let before = self.q.len();
        let pending = &self.pending;
        self.q.retain(|e| pending.contains(&e.uid));
        trace!(before, after = self.q.len(), "压缩事件队列");
    }

    /// 丢弃队头已取消的条目，返回下一个有效事件的触发时刻。
    fn peek_live(&mut self) -> Option<SimTime> {
        while let Some(top) = self.q.peek() {
            if self.pending.contains(&top.uid) {
                return Some(top.at);
            }
            self.q.pop();
        }
        None
    }

    /// 决定下一步：执行事件、在停止截止时间处停下，或到达 `until` 上限。
    fn next_target(&mut self, until: Option<SimTime>) -> Option<Target> {
        let next = self.peek_live();
        if let Some(stop_at) = self.stop_at {
            let before_next = next.is_none_or(|t| stop_at <= t);
            let within = until.is_none_or(|u| stop_at <= u);
            if before_next && within {
                return Some(Target::StopAt(stop_at));
            }
        }
        match (next, until) {
            (Some(t), Some(u)) if t > u => Some(Target::Until(u)),
            (Some(t), _) => Some(Target::Event(t)),
            (None, Some(u)) => Some(Target::Until(u)),
            (None, None) => None,
        }
    }

    fn dispatch(&mut self, world: &mut dyn World, until: Option<SimTime>) -> Result<(), SimError> {
        if self.phase != Phase::Ready {
            return Err(SimError::InvalidState {
                op: "run",
                phase: self.phase,
            });
        }
        self.phase = Phase::Running;
        self.stop_requested = false;

        info!("▶️  开始运行仿真");
        debug!(now = %self.now, queue_size = self.pending.len(), "初始状态");

        let start_count = self.event_count;
        let result = if self.realtime.is_some() {
            self.run_realtime(world, until)
        } else {
            self.run_default(world, until)
        };
        self.phase = Phase::Ready;
        self.context = Context::NONE;

        match result {
            Ok(exit) => {
                if exit != Exit::Stopped {
                    if let Some(u) = until {
                        self.now = self.now.max(u);
                    }
                }
                info!(
                    total_events = self.event_count - start_count,
                    final_time = %self.now,
                    ?exit,
                    "✅ 仿真完成"
                );
                Ok(())
            }
            Err(e) => {
                warn!(
                    now = %self.now,
                    remaining_queue = self.pending.len(),
                    error = %e,
                    "仿真中断"
                );
                Err(e)
            }
        }
    }

    fn run_default(
        &mut self,
        world: &mut dyn World,
        until: Option<SimTime>,
    ) -> Result<Exit, SimError> {
        loop {
            if self.stop_requested {
                return Ok(Exit::Stopped);
            }
            match self.next_target(until) {
                None => return Ok(Exit::Drained),
                Some(Target::Until(_)) => return Ok(Exit::Limit),
                Some(Target::StopAt(at)) => {
                    self.reach_stop_deadline(at);
                    return Ok(Exit::Stopped);
                }
                Some(Target::Event(_)) => self.dispatch_next(world)?,
            }
        }
    }

    fn run_realtime(
        &mut self,
        world: &mut dyn World,
        until: Option<SimTime>,
    ) -> Result<Exit, SimError> {
        let (shared, rate, limit) = match &self.realtime {
            Some(rt) => (Arc::clone(&rt.shared), rt.rate, rt.sync.limit()),
            None => return self.run_default(world, until),
        };
        let pacer = Pacer::start(self.now, rate);
        {
            let mut inbox = shared.lock();
            inbox.pacer = Some(pacer);
            inbox.stop = false;
            inbox.now = self.now;
        }
        debug!(rate, ?limit, "实时同步已锚定");

        let mut warned_lag = false;
        let result = loop {
            let mut inbox = shared.lock();
            let incoming = std::mem::take(&mut inbox.events);
            for ib in incoming {
                let at = ib.at.max(self.now);
                self.push(at, ib.uid, ib.context, ib.ev);
            }
            if inbox.stop || self.stop_requested {
                inbox.stop = false;
                break Ok(Exit::Stopped);
            }

            let target = match self.next_target(until) {
                Some(t) => t,
                None if inbox.producers == 0 => break Ok(Exit::Drained),
                None => {
                    trace!("队列为空，等待外部事件");
                    drop(shared.wake.wait(inbox).unwrap_or_else(|e| e.into_inner()));
                    continue;
                }
            };
            let t = match target {
                Target::Event(t) | Target::StopAt(t) | Target::Until(t) => t,
            };

            let wall_now = Instant::now();
            match pacer.deadline(t) {
                Some(deadline) if deadline > wall_now => {
                    let (guard, _) = shared
                        .wake
                        .wait_timeout(inbox, deadline - wall_now)
                        .unwrap_or_else(|e| e.into_inner());
                    drop(guard);
                    continue;
                }
                None => {
                    drop(shared.wake.wait(inbox).unwrap_or_else(|e| e.into_inner()));
                    continue;
                }
                Some(deadline) => {
                    drop(inbox);
                    match target {
                        Target::StopAt(at) => {
                            self.reach_stop_deadline(at);
                            break Ok(Exit::Stopped);
                        }
                        Target::Until(_) => break Ok(Exit::Limit),
                        Target::Event(at) => {
                            let lag = wall_now.duration_since(deadline);
                            if let Some(limit) = limit {
                                if lag > limit {
                                    break Err(SimError::RealtimeOverrun { at, lag, limit });
                                }
                            }
                            if !lag.is_zero() {
                                if !warned_lag && lag.as_millis() > 0 {
                                    warn!(at = %at, ?lag, "实时分发落后墙钟，尽力追赶");
                                    warned_lag = true;
                                }
                                debug!(at = %at, ?lag, "迟到事件");
                            }
                            if let Err(e) = self.dispatch_next(world) {
                                break Err(e);
                            }
                            shared.lock().now = self.now;
                        }
                    }
                }
            }
        };

        let mut inbox = shared.lock();
        inbox.pacer = None;
        inbox.now = self.now;
        result
    }

    fn reach_stop_deadline(&mut self, at: SimTime) {
        self.now = self.now.max(at);
        self.stop_at = None;
        info!(now = %self.now, "到达停止截止时间");
    }

    /// 弹出并执行队头事件（调用前 `peek_live` 已保证队头有效）。
    fn dispatch_next(&mut self, world: &mut dyn World) -> Result<(), SimError> {
        let Some(item) = self.q.pop() else {
            return Ok(());
        };
        self.pending.remove(&item.uid);
        self.now = item.at;
        self.event_count += 1;

        debug!(
            event_num = self.event_count,
            now = %self.now,
            seq = item.seq,
            uid = item.uid,
            context = %item.context,
            remaining_queue = self.pending.len(),
            "执行事件"
        );

        let prev = std::mem::replace(&mut self.context, item.context);
        let res = item.ev.execute(item.context, self, world);
        self.context = prev;

        match res {
            Ok(()) => {
                world.on_tick(self);
                Ok(())
            }
            Err(source) => Err(SimError::Action {
                at: item.at,
                event: self.uids.id(item.uid, item.at, item.context),
                source,
            }),
        }
    }
}
