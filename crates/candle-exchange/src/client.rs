//! Upbit 캔들 API 클라이언트.
//!
//! 외부 API의 호출당 200개 상한을 클라이언트가 직접 강제합니다.
//! 상한을 넘는 요청은 잘라내지 않고 거부하며, 분할은 호출자의 책임입니다.
//! 손상된 배치는 부분 수용 없이 전체를 거부합니다.

use crate::error::{ApiError, ApiResult};
use async_trait::async_trait;
use candle_core::{ApiRequest, Candle, Timeframe, CHUNK_LIMIT};
use chrono::{NaiveDateTime, TimeZone, Utc};
use reqwest::Client;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use serde::Deserialize;
use tracing::debug;

// ============================================================================
// 설정
// ============================================================================

/// Upbit 클라이언트 설정.
#[derive(Debug, Clone)]
pub struct UpbitConfig {
    /// REST API 기본 URL
    pub base_url: String,
    /// 요청 타임아웃 (초)
    pub timeout_secs: u64,
}

impl Default for UpbitConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.upbit.com".to_string(),
            timeout_secs: 10,
        }
    }
}

impl UpbitConfig {
    /// 기본 URL을 변경합니다 (테스트용).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

// ============================================================================
// API 응답 타입
// ============================================================================

#[derive(Debug, Deserialize)]
struct UpbitCandle {
    market: String,
    candle_date_time_utc: String,
    opening_price: f64,
    high_price: f64,
    low_price: f64,
    trade_price: f64,
    candle_acc_trade_volume: f64,
}

// ============================================================================
// CandleSource trait
// ============================================================================

/// 단일 청크 조회 primitive.
///
/// 구현체는 요청 구간의 캔들을 오름차순으로 반환하거나 타입이 있는
/// 에러를 반환합니다. 한 번의 호출은 최대 200개 캔들만 다룹니다.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// 데이터 소스 이름.
    fn name(&self) -> &str;

    /// 청크 하나를 조회합니다.
    async fn fetch(&self, request: &ApiRequest) -> ApiResult<Vec<Candle>>;
}

// ============================================================================
// Upbit 클라이언트
// ============================================================================

/// Upbit 캔들 API 클라이언트.
pub struct UpbitCandleClient {
    config: UpbitConfig,
    client: Client,
}

impl UpbitCandleClient {
    /// 새 클라이언트를 생성합니다.
    ///
    /// # Errors
    /// HTTP 클라이언트 생성에 실패하면 `ApiError::Network`를 반환합니다.
    pub fn new(config: UpbitConfig) -> ApiResult<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ApiError::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { config, client })
    }

    /// 타임프레임별 캔들 엔드포인트 경로.
    fn endpoint_path(timeframe: Timeframe) -> String {
        match timeframe {
            Timeframe::S1 => "/v1/candles/seconds".to_string(),
            Timeframe::D1 => "/v1/candles/days".to_string(),
            Timeframe::W1 => "/v1/candles/weeks".to_string(),
            Timeframe::MN1 => "/v1/candles/months".to_string(),
            tf => {
                // 나머지는 전부 분봉 계열
                let unit = tf.minute_unit().unwrap_or(1);
                format!("/v1/candles/minutes/{}", unit)
            }
        }
    }

    /// epoch 초를 `to` 파라미터 형식으로 변환.
    fn format_to(ts: i64) -> String {
        Utc.timestamp_opt(ts, 0)
            .single()
            .map(|t| t.format("%Y-%m-%dT%H:%M:%SZ").to_string())
            .unwrap_or_default()
    }

    /// 응답 캔들 하나를 도메인 타입으로 변환.
    fn to_candle(raw: &UpbitCandle, request: &ApiRequest) -> ApiResult<Candle> {
        if raw.market != request.market.code() {
            return Err(ApiError::Malformed(format!(
                "unexpected market in payload: {}",
                raw.market
            )));
        }

        let timestamp = NaiveDateTime::parse_from_str(&raw.candle_date_time_utc, "%Y-%m-%dT%H:%M:%S")
            .map_err(|e| {
                ApiError::Malformed(format!(
                    "bad candle time {}: {}",
                    raw.candle_date_time_utc, e
                ))
            })?
            .and_utc()
            .timestamp();

        let decimal = |v: f64, field: &str| {
            Decimal::from_f64(v)
                .ok_or_else(|| ApiError::Malformed(format!("non-finite {}: {}", field, v)))
        };

        let candle = Candle::new(
            request.market.clone(),
            request.timeframe,
            timestamp,
            decimal(raw.opening_price, "opening_price")?,
            decimal(raw.high_price, "high_price")?,
            decimal(raw.low_price, "low_price")?,
            decimal(raw.trade_price, "trade_price")?,
            decimal(raw.candle_acc_trade_volume, "volume")?,
        );

        if !candle.is_well_formed() {
            return Err(ApiError::Malformed(format!(
                "inconsistent OHLCV at {}",
                raw.candle_date_time_utc
            )));
        }

        Ok(candle)
    }

    /// API 응답 처리.
    async fn handle_response(&self, response: reqwest::Response) -> ApiResult<Vec<UpbitCandle>> {
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ApiError::Network(e.to_string()))?;

        if status.as_u16() == 429 {
            return Err(ApiError::RateLimited);
        }
        if !status.is_success() {
            return Err(ApiError::Api {
                status: status.as_u16(),
                message: body,
            });
        }

        serde_json::from_str(&body).map_err(|e| ApiError::Malformed(e.to_string()))
    }
}

#[async_trait]
impl CandleSource for UpbitCandleClient {
    fn name(&self) -> &str {
        "upbit"
    }

    async fn fetch(&self, request: &ApiRequest) -> ApiResult<Vec<Candle>> {
        if request.count > CHUNK_LIMIT {
            return Err(ApiError::ChunkTooLarge {
                requested: request.count,
                limit: CHUNK_LIMIT,
            });
        }
        if request.count == 0 {
            return Err(ApiError::Malformed("empty chunk request".to_string()));
        }

        // `to`는 제외 상한이므로 마지막 버킷의 다음 경계를 전달한다.
        let to = Self::format_to(request.last_timestamp() + request.timeframe.as_secs());
        let url = format!(
            "{}{}",
            self.config.base_url,
            Self::endpoint_path(request.timeframe)
        );

        debug!(
            market = %request.market,
            timeframe = %request.timeframe,
            to = %to,
            count = request.count,
            "GET {}",
            url
        );

        let response = self
            .client
            .get(&url)
            .query(&[
                ("market", request.market.code()),
                ("to", to),
                ("count", request.count.to_string()),
            ])
            .send()
            .await?;

        let raw = self.handle_response(response).await?;

        let mut candles = raw
            .iter()
            .map(|r| Self::to_candle(r, request))
            .collect::<ApiResult<Vec<_>>>()?;

        // 응답은 최신순이므로 오름차순으로 정렬 후 요청 구간만 남긴다.
        candles.sort_by_key(|c| c.timestamp);
        candles.retain(|c| {
            c.timestamp >= request.first_timestamp() && c.timestamp <= request.last_timestamp()
        });

        debug!(
            market = %request.market,
            returned = candles.len(),
            "chunk fetched"
        );

        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Market;
    use rust_decimal_macros::dec;

    fn krw_btc() -> Market {
        Market::new("KRW", "BTC")
    }

    fn candle_json(time_utc: &str, open: f64, high: f64, low: f64, close: f64, vol: f64) -> String {
        format!(
            r#"{{"market":"KRW-BTC","candle_date_time_utc":"{}","candle_date_time_kst":"{}","opening_price":{},"high_price":{},"low_price":{},"trade_price":{},"timestamp":0,"candle_acc_trade_price":0.0,"candle_acc_trade_volume":{},"unit":1}}"#,
            time_utc, time_utc, open, high, low, close, vol
        )
    }

    async fn client_for(server: &mockito::ServerGuard) -> UpbitCandleClient {
        UpbitCandleClient::new(UpbitConfig::default().with_base_url(server.url())).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_returns_ascending_batch() {
        let mut server = mockito::Server::new_async().await;
        // 최신순 응답 (00:02, 00:01)
        let body = format!(
            "[{},{}]",
            candle_json("1970-01-01T00:02:00", 101.0, 103.0, 100.0, 102.0, 2.5),
            candle_json("1970-01-01T00:01:00", 100.0, 102.0, 99.0, 101.0, 1.5),
        );
        let mock = server
            .mock("GET", "/v1/candles/minutes/1")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::M1, 0, 2);
        let candles = client.fetch(&request).await.unwrap();

        assert_eq!(candles.len(), 2);
        assert_eq!(candles[0].timestamp, 60);
        assert_eq!(candles[1].timestamp, 120);
        assert_eq!(candles[0].open, dec!(100));
        assert_eq!(candles[1].close, dec!(102));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_rejects_oversized_chunk_without_io() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", mockito::Matcher::Any)
            .expect(0)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::M1, 0, 201);
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(
            err,
            ApiError::ChunkTooLarge { requested: 201, limit: 200 }
        ));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_fetch_maps_rate_limit() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/candles/minutes/1")
            .match_query(mockito::Matcher::Any)
            .with_status(429)
            .with_body(r#"{"error":"too many requests"}"#)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::M1, 0, 1);
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ApiError::RateLimited));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_fetch_rejects_malformed_body() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/v1/candles/minutes/1")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body("not json")
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::M1, 0, 1);
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_fetch_rejects_batch_with_inconsistent_candle() {
        let mut server = mockito::Server::new_async().await;
        // 고가 < 저가인 캔들 하나가 섞이면 배치 전체를 거부한다.
        let body = format!(
            "[{},{}]",
            candle_json("1970-01-01T00:02:00", 101.0, 103.0, 100.0, 102.0, 2.5),
            candle_json("1970-01-01T00:01:00", 100.0, 90.0, 99.0, 95.0, 1.0),
        );
        server
            .mock("GET", "/v1/candles/minutes/1")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::M1, 0, 2);
        let err = client.fetch(&request).await.unwrap_err();

        assert!(matches!(err, ApiError::Malformed(_)));
    }

    #[tokio::test]
    async fn test_daily_endpoint_routing() {
        let mut server = mockito::Server::new_async().await;
        let body = format!(
            "[{}]",
            candle_json("1970-01-02T00:00:00", 100.0, 110.0, 95.0, 105.0, 10.0)
        );
        let mock = server
            .mock("GET", "/v1/candles/days")
            .match_query(mockito::Matcher::Any)
            .with_status(200)
            .with_body(body)
            .create_async()
            .await;

        let client = client_for(&server).await;
        let request = ApiRequest::new(krw_btc(), Timeframe::D1, 0, 1);
        let candles = client.fetch(&request).await.unwrap();

        assert_eq!(candles.len(), 1);
        assert_eq!(candles[0].timestamp, 86_400);
        mock.assert_async().await;
    }
}
