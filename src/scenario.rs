//! 场景描述与运行
//!
//! 用 JSON 描述一组带标签的事件（延迟、上下文、取消关系、子事件）和
//! destroy 动作，在调度器上运行并记录分发轨迹。

use crate::sim::{
    Context, Event, EventId, EventResult, SimConfig, SimError, SimTime, Simulator, World,
};
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::error::Error as StdError;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Instant;
use thiserror::Error;
use tracing::{info, warn};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ScenarioSpec {
    #[serde(default)]
    pub config: Option<SimConfig>,
    #[serde(default)]
    pub events: Vec<EventSpec>,
    /// 按顺序登记的 destroy 动作标签。
    #[serde(default)]
    pub destroy: Vec<String>,
    /// `stop_after` 的截止时间（毫秒）。
    #[serde(default)]
    pub stop_ms: Option<f64>,
    /// 改用 `run_until`（毫秒）。
    #[serde(default)]
    pub until_ms: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventSpec {
    pub label: String,
    #[serde(default)]
    pub delay_ms: Option<f64>,
    /// 优先于 `delay_ms`。
    #[serde(default)]
    pub delay_ns: Option<i64>,
    /// 缺省时继承调度者的上下文。
    #[serde(default)]
    pub context: Option<u32>,
    /// 调度后立即取消。
    #[serde(default)]
    pub cancel: bool,
    /// 触发时取消这些标签对应的事件。
    #[serde(default)]
    pub cancels: Vec<String>,
    /// 触发时返回错误。
    #[serde(default)]
    pub fail: bool,
    /// 触发时请求停止。
    #[serde(default)]
    pub stop: bool,
    /// 触发时调度的子事件，延迟相对于触发时刻。
    #[serde(default)]
    pub then: Vec<EventSpec>,
}

impl EventSpec {
    pub fn delay(&self) -> SimTime {
        match (self.delay_ns, self.delay_ms) {
            (Some(ns), _) => SimTime::from_nanos(ns),
            (None, Some(ms)) => ms_to_time(ms),
            (None, None) => SimTime::ZERO,
        }
    }
}

fn ms_to_time(ms: f64) -> SimTime {
    SimTime::from_secs_f64(ms / 1e3)
}

#[derive(Debug, Error)]
pub enum ScenarioError {
    #[error(transparent)]
    Sim(#[from] SimError),
    #[error("failed to read scenario {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ScenarioSpec {
    pub fn from_json_str(s: &str) -> Result<Self, ScenarioError> {
        Ok(serde_json::from_str(s)?)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ScenarioError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|source| ScenarioError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TraceKind {
    Fired,
    Destroyed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEntry {
    pub label: String,
    pub kind: TraceKind,
    pub at_ns: i64,
    pub context: Option<u32>,
    /// 距场景开始的墙钟时间（微秒）。
    pub wall_us: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioReport {
    pub trace: Vec<TraceEntry>,
    pub final_time_ns: i64,
    pub dispatched: u64,
    pub pending_after_run: usize,
    #[serde(default)]
    pub error: Option<String>,
}

impl ScenarioReport {
    /// 已触发事件的标签（不含 destroy 动作）。
    pub fn fired_labels(&self) -> Vec<&str> {
        self.trace
            .iter()
            .filter(|e| e.kind == TraceKind::Fired)
            .map(|e| e.label.as_str())
            .collect()
    }
}

/// 场景世界：记录标签到句柄的映射和分发轨迹。
pub struct ScenarioWorld {
    ids: HashMap<String, EventId>,
    trace: Vec<TraceEntry>,
    started: Instant,
}

impl Default for ScenarioWorld {
    fn default() -> Self {
        Self {
            ids: HashMap::new(),
            trace: Vec::new(),
            started: Instant::now(),
        }
    }
}

impl ScenarioWorld {
    pub fn trace(&self) -> &[TraceEntry] {
        &self.trace
    }

    pub fn id_of(&self, label: &str) -> Option<EventId> {
        self.ids.get(label).copied()
    }

    fn record(&mut self, label: &str, kind: TraceKind, at: SimTime, cx: Context) {
        let wall_us = u64::try_from(self.started.elapsed().as_micros()).unwrap_or(u64::MAX);
        self.trace.push(TraceEntry {
            label: label.to_string(),
            kind,
            at_ns: at.as_nanos(),
            context: (!cx.is_none()).then_some(cx.0),
            wall_us,
        });
    }
}

impl World for ScenarioWorld {
    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn scenario_world(world: &mut dyn World) -> Result<&mut ScenarioWorld, &'static str> {
    world
        .as_any_mut()
        .downcast_mut::<ScenarioWorld>()
        .ok_or("world must be ScenarioWorld")
}

/// 带标签的场景事件。
struct FireLabel {
    spec: EventSpec,
}

impl Event for FireLabel {
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult {
        let spec = self.spec;
        let w = scenario_world(world)?;
        w.record(&spec.label, TraceKind::Fired, sim.now(), cx);

        if spec.fail {
            return Err(format!("event `{}` failed", spec.label).into());
        }
        for label in &spec.cancels {
            if let Some(id) = w.id_of(label) {
                sim.cancel(id);
            }
        }
        if spec.stop {
            sim.stop();
        }
        for child in spec.then {
            schedule_spec(sim, w, child)?;
        }
        Ok(())
    }
}

struct DestroyLabel {
    label: String,
}

impl Event for DestroyLabel {
    fn execute(
        self: Box<Self>,
        cx: Context,
        sim: &mut Simulator,
        world: &mut dyn World,
    ) -> EventResult {
        scenario_world(world)?.record(&self.label, TraceKind::Destroyed, sim.now(), cx);
        Ok(())
    }
}

/// 调度一个场景事件并记录它的句柄。
pub fn schedule_spec(
    sim: &mut Simulator,
    world: &mut ScenarioWorld,
    spec: EventSpec,
) -> Result<EventId, SimError> {
    let delay = spec.delay();
    let label = spec.label.clone();
    let cancel = spec.cancel;
    let id = match spec.context {
        Some(c) => sim.schedule_with_context(Context(c), delay, FireLabel { spec })?,
        None => sim.schedule(delay, FireLabel { spec })?,
    };
    world.ids.insert(label, id);
    if cancel {
        sim.cancel(id);
    }
    Ok(id)
}

fn error_chain(e: &dyn StdError) -> String {
    let mut msg = e.to_string();
    let mut cur = e.source();
    while let Some(src) = cur {
        msg.push_str(": ");
        msg.push_str(&src.to_string());
        cur = src.source();
    }
    msg
}

/// 运行场景：调度全部事件、运行、销毁，返回轨迹。
///
/// 事件失败不会让本函数失败，错误记录在 [`ScenarioReport::error`] 中；
/// 配置或调度参数非法才返回 `Err`。
pub fn run_scenario(spec: &ScenarioSpec) -> Result<ScenarioReport, ScenarioError> {
    let mut sim = Simulator::new(spec.config.clone().unwrap_or_default())?;
    let mut world = ScenarioWorld::default();

    for ev in &spec.events {
        schedule_spec(&mut sim, &mut world, ev.clone())?;
    }
    for label in &spec.destroy {
        sim.schedule_destroy(DestroyLabel {
            label: label.clone(),
        })?;
    }
    if let Some(ms) = spec.stop_ms {
        sim.stop_after(ms_to_time(ms))?;
    }

    info!(
        events = spec.events.len(),
        destroy_actions = spec.destroy.len(),
        realtime = sim.config().is_realtime(),
        "运行场景"
    );

    let outcome = match spec.until_ms {
        Some(ms) => sim.run_until(ms_to_time(ms), &mut world),
        None => sim.run(&mut world),
    };
    let error = outcome.err().map(|e| {
        let msg = error_chain(&e);
        warn!(error = %msg, "场景运行失败");
        msg
    });

    let final_time_ns = sim.now().as_nanos();
    let dispatched = sim.event_count();
    let pending_after_run = sim.pending_events();
    sim.destroy(&mut world)?;

    Ok(ScenarioReport {
        trace: world.trace,
        final_time_ns,
        dispatched,
        pending_after_run,
        error,
    })
}
