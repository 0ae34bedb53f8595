//! 캔들 데이터를 위한 타임프레임 정의.
//!
//! 이 모듈은 Upbit이 지원하는 시간 간격을 나타내는 타임프레임 타입을 정의합니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// 캔들 타임프레임.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Timeframe {
    /// 1초봉
    S1,
    /// 1분봉
    M1,
    /// 3분봉
    M3,
    /// 5분봉
    M5,
    /// 10분봉
    M10,
    /// 15분봉
    M15,
    /// 30분봉
    M30,
    /// 1시간봉
    H1,
    /// 4시간봉
    H4,
    /// 일봉
    D1,
    /// 주봉
    W1,
    /// 월봉
    MN1,
}

impl Timeframe {
    /// 이 타임프레임의 기간을 반환합니다.
    pub fn duration(&self) -> Duration {
        match self {
            Timeframe::S1 => Duration::from_secs(1),
            Timeframe::M1 => Duration::from_secs(60),
            Timeframe::M3 => Duration::from_secs(3 * 60),
            Timeframe::M5 => Duration::from_secs(5 * 60),
            Timeframe::M10 => Duration::from_secs(10 * 60),
            Timeframe::M15 => Duration::from_secs(15 * 60),
            Timeframe::M30 => Duration::from_secs(30 * 60),
            Timeframe::H1 => Duration::from_secs(60 * 60),
            Timeframe::H4 => Duration::from_secs(4 * 60 * 60),
            Timeframe::D1 => Duration::from_secs(24 * 60 * 60),
            Timeframe::W1 => Duration::from_secs(7 * 24 * 60 * 60),
            Timeframe::MN1 => Duration::from_secs(30 * 24 * 60 * 60), // 근사값
        }
    }

    /// 이 타임프레임의 초 단위 값을 반환합니다.
    pub fn as_secs(&self) -> i64 {
        self.duration().as_secs() as i64
    }

    /// 분 단위 미만(초봉) 타임프레임인지 확인합니다.
    ///
    /// 초봉은 체결이 없는 구간이 정상적으로 존재할 수 있어
    /// 갭 판정 정책의 별도 검증 대상입니다.
    pub fn is_sub_minute(&self) -> bool {
        matches!(self, Timeframe::S1)
    }

    /// 분봉 엔드포인트의 unit 값을 반환합니다 (분봉 계열만).
    pub fn minute_unit(&self) -> Option<u32> {
        match self {
            Timeframe::M1 => Some(1),
            Timeframe::M3 => Some(3),
            Timeframe::M5 => Some(5),
            Timeframe::M10 => Some(10),
            Timeframe::M15 => Some(15),
            Timeframe::M30 => Some(30),
            Timeframe::H1 => Some(60),
            Timeframe::H4 => Some(240),
            _ => None,
        }
    }

    /// 간격 문자열로 변환합니다.
    pub fn as_interval(&self) -> &'static str {
        match self {
            Timeframe::S1 => "1s",
            Timeframe::M1 => "1m",
            Timeframe::M3 => "3m",
            Timeframe::M5 => "5m",
            Timeframe::M10 => "10m",
            Timeframe::M15 => "15m",
            Timeframe::M30 => "30m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
            Timeframe::W1 => "1w",
            Timeframe::MN1 => "1M",
        }
    }

    /// 간격 문자열에서 파싱합니다.
    pub fn from_interval(s: &str) -> Option<Self> {
        match s {
            "1s" => Some(Timeframe::S1),
            "1m" => Some(Timeframe::M1),
            "3m" => Some(Timeframe::M3),
            "5m" => Some(Timeframe::M5),
            "10m" => Some(Timeframe::M10),
            "15m" => Some(Timeframe::M15),
            "30m" => Some(Timeframe::M30),
            "1h" => Some(Timeframe::H1),
            "4h" => Some(Timeframe::H4),
            "1d" => Some(Timeframe::D1),
            "1w" => Some(Timeframe::W1),
            "1M" => Some(Timeframe::MN1),
            _ => None,
        }
    }

    /// 지원하는 모든 타임프레임을 반환합니다.
    pub fn all() -> [Timeframe; 12] {
        [
            Timeframe::S1,
            Timeframe::M1,
            Timeframe::M3,
            Timeframe::M5,
            Timeframe::M10,
            Timeframe::M15,
            Timeframe::M30,
            Timeframe::H1,
            Timeframe::H4,
            Timeframe::D1,
            Timeframe::W1,
            Timeframe::MN1,
        ]
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_interval())
    }
}

impl FromStr for Timeframe {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_interval(s).ok_or_else(|| format!("Invalid timeframe: {}", s))
    }
}
