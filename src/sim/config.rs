//! 调度器配置
//!
//! 运行模式与时钟分辨率必须在第一次调度之前确定。

use super::error::SimError;
use super::realtime::SyncMode;
use super::time::Resolution;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SimConfig {
    #[serde(default)]
    pub mode: SchedulerMode,
    #[serde(default)]
    pub resolution: Resolution,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SchedulerMode {
    /// 纯逻辑时钟，尽可能快地分发。
    #[default]
    Default,
    /// 逻辑时间按 `rate` 倍速跟随墙钟（`rate = 2.0` 表示 1 秒墙钟推进 2 秒逻辑时间）。
    Realtime {
        #[serde(default = "default_rate")]
        rate: f64,
        #[serde(default)]
        sync: SyncMode,
    },
}

fn default_rate() -> f64 {
    1.0
}

impl SimConfig {
    pub fn realtime(rate: f64, sync: SyncMode) -> Self {
        Self {
            mode: SchedulerMode::Realtime { rate, sync },
            ..Self::default()
        }
    }

    pub fn with_resolution(mut self, resolution: Resolution) -> Self {
        self.resolution = resolution;
        self
    }

    pub fn is_realtime(&self) -> bool {
        matches!(self.mode, SchedulerMode::Realtime { .. })
    }

    pub fn validate(&self) -> Result<(), SimError> {
        if let SchedulerMode::Realtime { rate, .. } = self.mode {
            if !rate.is_finite() || rate <= 0.0 {
                return Err(SimError::InvalidArgument {
                    what: "rate",
                    value: rate.to_string(),
                });
            }
        }
        Ok(())
    }

    pub fn from_json_str(s: &str) -> Result<Self, SimError> {
        let cfg: SimConfig = serde_json::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, SimError> {
        let raw = fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }
}
