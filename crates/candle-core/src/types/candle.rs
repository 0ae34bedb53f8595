//! 캔들(OHLCV) 데이터 타입.
//!
//! 이 모듈은 하나의 시간 버킷에 대한 시가/고가/저가/종가/거래량
//! 레코드를 정의합니다. 마감된 캔들은 저장 이후 절대 수정되지 않습니다.

use crate::types::{Market, Timeframe};
use chrono::{TimeZone, Utc};
use chrono_tz::Asia::Seoul;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// OHLCV 캔들 데이터.
///
/// `timestamp`는 타임프레임 경계에 정렬된 epoch 초이며,
/// (마켓, 타임프레임) 내에서 캔들의 유일한 식별자입니다.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// 마켓 코드
    pub market: Market,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 버킷 시작 시간 (epoch 초, 경계 정렬)
    pub timestamp: i64,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량 (기준 자산 단위)
    pub volume: Decimal,
}

impl Candle {
    /// 새 캔들을 생성합니다.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        market: Market,
        timeframe: Timeframe,
        timestamp: i64,
        open: Decimal,
        high: Decimal,
        low: Decimal,
        close: Decimal,
        volume: Decimal,
    ) -> Self {
        Self {
            market,
            timeframe,
            timestamp,
            open,
            high,
            low,
            close,
            volume,
        }
    }

    /// OHLCV 값과 타임스탬프 정렬이 모두 올바른지 확인합니다.
    ///
    /// 배치 내 캔들 하나라도 이 검증에 실패하면 배치 전체를 거부합니다.
    pub fn is_well_formed(&self) -> bool {
        self.timestamp > 0
            && self.timestamp % self.timeframe.as_secs() == 0
            && self.low <= self.high
            && self.open >= self.low
            && self.open <= self.high
            && self.close >= self.low
            && self.close <= self.high
            && self.volume >= Decimal::ZERO
    }

    /// 표시용 시간 문자열을 반환합니다 (KST).
    ///
    /// 저장/정렬 키가 아닌 파생 값입니다.
    pub fn display_time(&self) -> String {
        match Utc.timestamp_opt(self.timestamp, 0).single() {
            Some(t) => t
                .with_timezone(&Seoul)
                .format("%Y-%m-%d %H:%M:%S")
                .to_string(),
            None => String::new(),
        }
    }

    /// 양봉(종가 > 시가)인지 확인합니다.
    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    /// 캔들 범위(고가 - 저가)를 반환합니다.
    pub fn range(&self) -> Decimal {
        self.high - self.low
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(timestamp: i64) -> Candle {
        Candle::new(
            Market::new("KRW", "BTC"),
            Timeframe::M1,
            timestamp,
            dec!(100),
            dec!(110),
            dec!(95),
            dec!(105),
            dec!(1.5),
        )
    }

    #[test]
    fn test_well_formed() {
        let c = candle(1_700_000_040);
        assert!(c.is_well_formed());
        assert!(c.is_bullish());
        assert_eq!(c.range(), dec!(15));
    }

    #[test]
    fn test_rejects_unaligned_timestamp() {
        let c = candle(1_700_000_041);
        assert!(!c.is_well_formed());
    }

    #[test]
    fn test_rejects_inverted_prices() {
        let mut c = candle(1_700_000_040);
        c.low = dec!(120);
        assert!(!c.is_well_formed());
    }

    #[test]
    fn test_display_time_is_kst() {
        // 2023-11-14 22:14:00 UTC = 2023-11-15 07:14:00 KST
        let c = candle(1_700_000_040);
        assert_eq!(c.display_time(), "2023-11-15 07:14:00");
    }
}
