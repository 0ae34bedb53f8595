//! 캔들 요청 및 범위 타입.
//!
//! 이 모듈은 호출자 요청과 외부 API 청크 요청을 정의합니다:
//! - `TimeRange` - 시작 포함 / 끝 제외 epoch 초 구간
//! - `CandleRequest` - 최근 N개 또는 명시적 범위 요청
//! - `ApiRequest` - 200개 이하로 제한된 단일 청크 요청

use crate::error::{CandleError, Result};
use crate::types::{Market, Timeframe};
use serde::{Deserialize, Serialize};
use std::fmt;

/// 외부 API가 한 번의 호출로 허용하는 최대 캔들 수.
pub const CHUNK_LIMIT: usize = 200;

/// epoch 초 구간. 시작은 포함, 끝은 제외입니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TimeRange {
    /// 시작 시간 (포함)
    pub start: i64,
    /// 끝 시간 (제외)
    pub end: i64,
}

impl TimeRange {
    /// 새 구간을 생성합니다.
    pub fn new(start: i64, end: i64) -> Self {
        Self { start, end }
    }

    /// 빈 구간인지 확인합니다.
    pub fn is_empty(&self) -> bool {
        self.start >= self.end
    }

    /// 타임스탬프가 구간 안에 있는지 확인합니다.
    pub fn contains(&self, ts: i64) -> bool {
        ts >= self.start && ts < self.end
    }

    /// 구간에 포함되는 정렬 버킷 수를 반환합니다.
    ///
    /// 구간 경계가 이미 타임프레임에 정렬되어 있다고 가정합니다.
    pub fn bucket_count(&self, timeframe: Timeframe) -> i64 {
        if self.is_empty() {
            return 0;
        }
        (self.end - self.start) / timeframe.as_secs()
    }

    /// 구간의 마지막 버킷 시작 시간을 반환합니다 (포함).
    pub fn last_bucket(&self, timeframe: Timeframe) -> i64 {
        self.end - timeframe.as_secs()
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start, self.end)
    }
}

/// 요청 구간 지정 방식.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestSpan {
    /// 가장 최근 N개
    Count(usize),
    /// 명시적 [from, to) 구간
    Range(TimeRange),
}

/// 호출자가 제공자에 전달하는 캔들 요청.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CandleRequest {
    /// 마켓 코드
    pub market: Market,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 요청 구간
    pub span: RequestSpan,
}

impl CandleRequest {
    /// 최근 N개 요청을 생성합니다.
    pub fn recent(market: Market, timeframe: Timeframe, count: usize) -> Self {
        Self {
            market,
            timeframe,
            span: RequestSpan::Count(count),
        }
    }

    /// 명시적 범위 요청을 생성합니다.
    pub fn range(market: Market, timeframe: Timeframe, start: i64, end: i64) -> Self {
        Self {
            market,
            timeframe,
            span: RequestSpan::Range(TimeRange::new(start, end)),
        }
    }

    /// 요청이 유효한지 검증합니다. I/O 없이 실패합니다.
    pub fn validate(&self) -> Result<()> {
        if !self.market.is_valid() {
            return Err(CandleError::Validation(format!(
                "invalid market code: {}",
                self.market
            )));
        }
        match self.span {
            RequestSpan::Count(0) => {
                Err(CandleError::Validation("count must be positive".into()))
            }
            RequestSpan::Count(_) => Ok(()),
            RequestSpan::Range(range) => {
                if range.start < 0 {
                    Err(CandleError::Validation(format!(
                        "range start must not be negative: {}",
                        range
                    )))
                } else if range.is_empty() {
                    Err(CandleError::Validation(format!("empty range: {}", range)))
                } else {
                    Ok(())
                }
            }
        }
    }
}

/// 외부 API에 전달할 단일 청크 요청.
///
/// `anchor`는 첫 번째로 원하는 캔들의 한 단위 앞 경계(제외)이며,
/// 요청은 `(anchor, anchor + count * tf]` 구간의 버킷 `count`개를
/// 커버합니다. 커서 한 단위 앞에 앵커를 두어 경계 캔들이 유실되지
/// 않도록 합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApiRequest {
    /// 마켓 코드
    pub market: Market,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 제외 하한 경계 (epoch 초, 경계 정렬)
    pub anchor: i64,
    /// 요청 캔들 수 (1..=200)
    pub count: usize,
}

impl ApiRequest {
    /// 새 청크 요청을 생성합니다.
    pub fn new(market: Market, timeframe: Timeframe, anchor: i64, count: usize) -> Self {
        Self {
            market,
            timeframe,
            anchor,
            count,
        }
    }

    /// 요청이 커버하는 첫 번째 버킷 시작 시간.
    pub fn first_timestamp(&self) -> i64 {
        self.anchor + self.timeframe.as_secs()
    }

    /// 요청이 커버하는 마지막 버킷 시작 시간 (포함).
    pub fn last_timestamp(&self) -> i64 {
        self.anchor + self.count as i64 * self.timeframe.as_secs()
    }

    /// 요청이 커버하는 구간을 반환합니다.
    pub fn window(&self) -> TimeRange {
        TimeRange::new(
            self.first_timestamp(),
            self.last_timestamp() + self.timeframe.as_secs(),
        )
    }
}
