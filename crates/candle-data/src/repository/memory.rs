//! 인메모리 캔들 저장소.
//!
//! PostgreSQL 저장소와 동일한 계약을 `BTreeMap` 위에서 구현합니다.
//! 최적화기/제공자 테스트와 시뮬레이션에서 사용합니다.

use super::CandleRepository;
use async_trait::async_trait;
use candle_core::{Candle, Market, Result, Timeframe};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;

type TableKey = (String, Timeframe);

/// 인메모리 캔들 저장소.
#[derive(Default)]
pub struct MemoryCandleRepository {
    tables: RwLock<HashMap<TableKey, BTreeMap<i64, Candle>>>,
}

impl MemoryCandleRepository {
    /// 빈 저장소를 생성합니다.
    pub fn new() -> Self {
        Self::default()
    }

    fn key(market: &Market, timeframe: Timeframe) -> TableKey {
        (market.code(), timeframe)
    }
}

#[async_trait]
impl CandleRepository for MemoryCandleRepository {
    async fn upsert(
        &self,
        market: &Market,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        let mut tables = self.tables.write().await;
        let table = tables.entry(Self::key(market, timeframe)).or_default();

        let mut inserted = 0;
        for candle in candles {
            // 기존 타임스탬프 재삽입은 no-op (캔들은 불변)
            if !table.contains_key(&candle.timestamp) {
                table.insert(candle.timestamp, candle.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    async fn exists_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<bool> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&Self::key(market, timeframe))
            .map(|t| t.range(start..=end_inclusive).next().is_some())
            .unwrap_or(false))
    }

    async fn count_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<i64> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&Self::key(market, timeframe))
            .map(|t| t.range(start..=end_inclusive).count() as i64)
            .unwrap_or(0))
    }

    async fn timestamps_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<Vec<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&Self::key(market, timeframe))
            .map(|t| t.range(start..=end_inclusive).map(|(ts, _)| *ts).collect())
            .unwrap_or_default())
    }

    async fn candles_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<Vec<Candle>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&Self::key(market, timeframe))
            .map(|t| t.range(start..=end_inclusive).map(|(_, c)| c.clone()).collect())
            .unwrap_or_default())
    }

    async fn latest_timestamp(
        &self,
        market: &Market,
        timeframe: Timeframe,
    ) -> Result<Option<i64>> {
        let tables = self.tables.read().await;
        Ok(tables
            .get(&Self::key(market, timeframe))
            .and_then(|t| t.keys().next_back().copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn candle(ts: i64) -> Candle {
        Candle::new(
            Market::new("KRW", "BTC"),
            Timeframe::M1,
            ts,
            dec!(100),
            dec!(101),
            dec!(99),
            dec!(100),
            dec!(1),
        )
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent() {
        let repo = MemoryCandleRepository::new();
        let market = Market::new("KRW", "BTC");
        let batch = vec![candle(0), candle(60), candle(120)];

        let first = repo.upsert(&market, Timeframe::M1, &batch).await.unwrap();
        let second = repo.upsert(&market, Timeframe::M1, &batch).await.unwrap();

        assert_eq!(first, 3);
        assert_eq!(second, 0);
        assert_eq!(
            repo.count_in_range(&market, Timeframe::M1, 0, 120).await.unwrap(),
            3
        );
    }

    #[tokio::test]
    async fn test_range_queries() {
        let repo = MemoryCandleRepository::new();
        let market = Market::new("KRW", "BTC");
        repo.upsert(&market, Timeframe::M1, &[candle(0), candle(60), candle(240)])
            .await
            .unwrap();

        assert!(repo.exists_in_range(&market, Timeframe::M1, 0, 60).await.unwrap());
        assert!(!repo.exists_in_range(&market, Timeframe::M1, 120, 180).await.unwrap());
        assert_eq!(
            repo.timestamps_in_range(&market, Timeframe::M1, 0, 300).await.unwrap(),
            vec![0, 60, 240]
        );
        assert_eq!(
            repo.latest_timestamp(&market, Timeframe::M1).await.unwrap(),
            Some(240)
        );

        let other = Market::new("KRW", "ETH");
        assert!(!repo.exists_in_range(&other, Timeframe::M1, 0, 300).await.unwrap());
    }

    #[tokio::test]
    async fn test_ordered_gaps_default_impl() {
        let repo = MemoryCandleRepository::new();
        let market = Market::new("KRW", "BTC");
        repo.upsert(
            &market,
            Timeframe::M1,
            &[candle(0), candle(60), candle(240), candle(300)],
        )
        .await
        .unwrap();

        let gaps = repo
            .ordered_gaps(&market, Timeframe::M1, 0, 300, 90)
            .await
            .unwrap();
        assert_eq!(gaps.len(), 1);
        assert_eq!(gaps[0].prev, 60);
        assert_eq!(gaps[0].next, 240);
    }
}
