//! PostgreSQL 캔들 저장소.
//!
//! (마켓, 타임프레임)마다 하나의 테이블을 사용합니다. 기본 키는
//! epoch 타임스탬프이고, 쓰기는 `ON CONFLICT DO NOTHING`으로 멱등하게
//! 처리합니다. 마감된 캔들은 수정하지 않습니다.

use super::CandleRepository;
use async_trait::async_trait;
use candle_core::{Candle, CandleError, DatabaseConfig, Market, Result, Timeframe};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{FromRow, Row};
use std::collections::HashSet;
use tokio::sync::RwLock;
use tracing::{debug, info};

/// 캔들 데이터베이스 레코드.
#[derive(Debug, Clone, FromRow)]
struct CandleRecord {
    timestamp: i64,
    open: Decimal,
    high: Decimal,
    low: Decimal,
    close: Decimal,
    volume: Decimal,
}

impl CandleRecord {
    /// 도메인 캔들로 변환.
    fn to_candle(&self, market: &Market, timeframe: Timeframe) -> Candle {
        Candle::new(
            market.clone(),
            timeframe,
            self.timestamp,
            self.open,
            self.high,
            self.low,
            self.close,
            self.volume,
        )
    }
}

/// PostgreSQL 캔들 저장소.
pub struct PgCandleRepository {
    pool: PgPool,
    /// DDL을 이미 수행한 테이블 이름 (프로세스 단위 메모)
    ensured: RwLock<HashSet<String>>,
}

impl PgCandleRepository {
    /// 기존 연결 풀로 저장소를 생성합니다.
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            ensured: RwLock::new(HashSet::new()),
        }
    }

    /// 설정으로부터 새 연결 풀을 만들어 저장소를 생성합니다.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        info!(url = %config.url, "Connecting to candle database...");

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(std::time::Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        Ok(Self::new(pool))
    }

    /// (마켓, 타임프레임)에 대응하는 테이블 이름.
    ///
    /// 월봉은 분봉("1m")과의 소문자 충돌을 피하기 위해 "1mo"를 사용합니다.
    fn table_name(market: &Market, timeframe: Timeframe) -> String {
        let tf = match timeframe {
            Timeframe::MN1 => "1mo".to_string(),
            tf => tf.as_interval().to_lowercase(),
        };
        format!(
            "candles_{}_{}",
            market.code().to_lowercase().replace('-', "_"),
            tf
        )
    }

    /// 테이블이 없으면 생성합니다. 테이블 이름 단위로 메모됩니다.
    async fn ensure_table(&self, table: &str) -> Result<()> {
        {
            let ensured = self.ensured.read().await;
            if ensured.contains(table) {
                return Ok(());
            }
        }

        let ddl = format!(
            r#"
            CREATE TABLE IF NOT EXISTS {table} (
                timestamp    BIGINT PRIMARY KEY,
                open         NUMERIC(30, 8) NOT NULL,
                high         NUMERIC(30, 8) NOT NULL,
                low          NUMERIC(30, 8) NOT NULL,
                close        NUMERIC(30, 8) NOT NULL,
                volume       NUMERIC(30, 8) NOT NULL,
                display_time TEXT,
                created_at   TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                updated_at   TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#
        );

        sqlx::query(&ddl)
            .execute(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        debug!(table = table, "candle table ensured");
        self.ensured.write().await.insert(table.to_string());
        Ok(())
    }
}

#[async_trait]
impl CandleRepository for PgCandleRepository {
    async fn upsert(
        &self,
        market: &Market,
        timeframe: Timeframe,
        candles: &[Candle],
    ) -> Result<usize> {
        if candles.is_empty() {
            return Ok(0);
        }

        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let mut inserted = 0;
        for chunk in candles.chunks(500) {
            let mut query = format!(
                "INSERT INTO {} (timestamp, open, high, low, close, volume, display_time) VALUES ",
                table
            );

            let value_tuples: Vec<String> = chunk
                .iter()
                .enumerate()
                .map(|(i, _)| {
                    let base = i * 7;
                    format!(
                        "(${}, ${}, ${}, ${}, ${}, ${}, ${})",
                        base + 1,
                        base + 2,
                        base + 3,
                        base + 4,
                        base + 5,
                        base + 6,
                        base + 7
                    )
                })
                .collect();
            query.push_str(&value_tuples.join(", "));

            // 이미 존재하는 타임스탬프는 조용히 무시한다 (캔들은 불변)
            query.push_str(" ON CONFLICT (timestamp) DO NOTHING");

            let mut sql_query = sqlx::query(&query);
            for candle in chunk {
                sql_query = sql_query
                    .bind(candle.timestamp)
                    .bind(candle.open)
                    .bind(candle.high)
                    .bind(candle.low)
                    .bind(candle.close)
                    .bind(candle.volume)
                    .bind(candle.display_time());
            }

            let result = sql_query
                .execute(&self.pool)
                .await
                .map_err(|e| CandleError::Persistence(e.to_string()))?;

            inserted += result.rows_affected() as usize;
        }

        debug!(
            market = %market,
            timeframe = %timeframe,
            received = candles.len(),
            inserted = inserted,
            "캔들 배치 저장"
        );

        Ok(inserted)
    }

    async fn exists_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<bool> {
        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let query = format!(
            "SELECT 1 FROM {} WHERE timestamp BETWEEN $1 AND $2 LIMIT 1",
            table
        );

        let row = sqlx::query(&query)
            .bind(start)
            .bind(end_inclusive)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        Ok(row.is_some())
    }

    async fn count_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<i64> {
        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let query = format!(
            "SELECT COUNT(*) AS cnt FROM {} WHERE timestamp BETWEEN $1 AND $2",
            table
        );

        let row = sqlx::query(&query)
            .bind(start)
            .bind(end_inclusive)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        row.try_get::<i64, _>("cnt")
            .map_err(|e| CandleError::Persistence(e.to_string()))
    }

    async fn timestamps_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<Vec<i64>> {
        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let query = format!(
            "SELECT timestamp FROM {} WHERE timestamp BETWEEN $1 AND $2 ORDER BY timestamp ASC",
            table
        );

        let rows = sqlx::query(&query)
            .bind(start)
            .bind(end_inclusive)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        rows.iter()
            .map(|r| {
                r.try_get::<i64, _>("timestamp")
                    .map_err(|e| CandleError::Persistence(e.to_string()))
            })
            .collect()
    }

    async fn candles_in_range(
        &self,
        market: &Market,
        timeframe: Timeframe,
        start: i64,
        end_inclusive: i64,
    ) -> Result<Vec<Candle>> {
        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let query = format!(
            r#"
            SELECT timestamp, open, high, low, close, volume
            FROM {}
            WHERE timestamp BETWEEN $1 AND $2
            ORDER BY timestamp ASC
            "#,
            table
        );

        let records: Vec<CandleRecord> = sqlx::query_as(&query)
            .bind(start)
            .bind(end_inclusive)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        Ok(records
            .iter()
            .map(|r| r.to_candle(market, timeframe))
            .collect())
    }

    async fn latest_timestamp(
        &self,
        market: &Market,
        timeframe: Timeframe,
    ) -> Result<Option<i64>> {
        let table = Self::table_name(market, timeframe);
        self.ensure_table(&table).await?;

        let query = format!(
            "SELECT timestamp FROM {} ORDER BY timestamp DESC LIMIT 1",
            table
        );

        let row = sqlx::query(&query)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CandleError::Persistence(e.to_string()))?;

        row.map(|r| {
            r.try_get::<i64, _>("timestamp")
                .map_err(|e| CandleError::Persistence(e.to_string()))
        })
        .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_table_name() {
        let market = Market::new("KRW", "BTC");
        assert_eq!(
            PgCandleRepository::table_name(&market, Timeframe::M1),
            "candles_krw_btc_1m"
        );
        assert_eq!(
            PgCandleRepository::table_name(&market, Timeframe::H4),
            "candles_krw_btc_4h"
        );
    }

    #[test]
    fn test_table_name_month_does_not_collide_with_minute() {
        let market = Market::new("KRW", "ETH");
        let minute = PgCandleRepository::table_name(&market, Timeframe::M1);
        let month = PgCandleRepository::table_name(&market, Timeframe::MN1);
        assert_eq!(minute, "candles_krw_eth_1m");
        assert_eq!(month, "candles_krw_eth_1mo");
        assert_ne!(minute, month);
    }
}
