//! 仿真时间类型
//!
//! 定义仿真时间（有符号纳秒刻度）、时钟分辨率及其单位转换。

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Add, AddAssign, Mul, Neg, Sub, SubAssign};
use std::time::Duration;

/// 仿真时间（纳秒）。
///
/// 既表示绝对的逻辑时刻，也表示相对延迟。负值只会以非法延迟的形式出现，
/// 调度时被拒绝。所有算术均为饱和运算。
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(pub i64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    pub const MAX: SimTime = SimTime(i64::MAX);

    pub fn from_nanos(ns: i64) -> SimTime {
        SimTime(ns)
    }
    pub fn from_micros(us: i64) -> SimTime {
        SimTime(us.saturating_mul(1_000))
    }
    pub fn from_millis(ms: i64) -> SimTime {
        SimTime(ms.saturating_mul(1_000_000))
    }
    pub fn from_secs(s: i64) -> SimTime {
        SimTime(s.saturating_mul(1_000_000_000))
    }

    /// 从浮点秒构造，四舍五入到纳秒；NaN 视为零，越界饱和。
    pub fn from_secs_f64(s: f64) -> SimTime {
        // `as` 对越界浮点数饱和、对 NaN 取 0
        SimTime((s * 1e9).round() as i64)
    }

    /// 从墙钟时长构造（饱和）。
    pub fn from_duration(d: Duration) -> SimTime {
        SimTime(i64::try_from(d.as_nanos()).unwrap_or(i64::MAX))
    }

    pub fn as_nanos(self) -> i64 {
        self.0
    }
    pub fn as_micros(self) -> i64 {
        self.0 / 1_000
    }
    pub fn as_millis(self) -> i64 {
        self.0 / 1_000_000
    }
    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1e9
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    /// 转为墙钟时长；负值返回 `None`。
    pub fn to_duration(self) -> Option<Duration> {
        u64::try_from(self.0).ok().map(Duration::from_nanos)
    }

    /// 向零截断到 `res` 的整数倍。
    pub fn truncate_to(self, res: Resolution) -> SimTime {
        let unit = res.unit_nanos();
        SimTime(self.0 / unit * unit)
    }

    /// 向上取整到分辨率的整数倍（用于绝对时刻，保证不早于原值）。
    pub fn ceil_to(self, res: Resolution) -> SimTime {
        let unit = res.unit_nanos();
        match self.0.rem_euclid(unit) {
            0 => self,
            r => SimTime((self.0 - r).saturating_add(unit)),
        }
    }
}

impl Add for SimTime {
    type Output = SimTime;
    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for SimTime {
    fn add_assign(&mut self, rhs: SimTime) {
        *self = *self + rhs;
    }
}

impl Sub for SimTime {
    type Output = SimTime;
    fn sub(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl SubAssign for SimTime {
    fn sub_assign(&mut self, rhs: SimTime) {
        *self = *self - rhs;
    }
}

impl Neg for SimTime {
    type Output = SimTime;
    fn neg(self) -> SimTime {
        SimTime(self.0.saturating_neg())
    }
}

impl Mul<i64> for SimTime {
    type Output = SimTime;
    fn mul(self, rhs: i64) -> SimTime {
        SimTime(self.0.saturating_mul(rhs))
    }
}

/// 以秒显示，例如 `+1.500000000s`、`-0.000001000s`。
impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { '-' } else { '+' };
        let abs = self.0.unsigned_abs();
        write!(
            f,
            "{sign}{}.{:09}s",
            abs / 1_000_000_000,
            abs % 1_000_000_000
        )
    }
}

/// 时钟分辨率：所有调度延迟都会被截断到该单位的整数倍。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    #[default]
    Nanos,
    Micros,
    Millis,
    Secs,
}

impl Resolution {
    pub fn unit_nanos(self) -> i64 {
        match self {
            Resolution::Nanos => 1,
            Resolution::Micros => 1_000,
            Resolution::Millis => 1_000_000,
            Resolution::Secs => 1_000_000_000,
        }
    }
}
