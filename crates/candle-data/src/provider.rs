//! 캔들 데이터 제공자.
//!
//! 호출자 요청을 캐시 → 최적화 계획 → API 실행 → 저장 → 조립 순서로
//! 처리하는 진입점입니다.
//!
//! # 동작 흐름
//!
//! ```text
//! 요청 (market, timeframe, count 또는 [from, to))
//!         │
//!         ▼
//! ┌─────────────────────┐
//! │ 1. 검증 (I/O 없음)   │
//! └──────────┬──────────┘
//! ┌──────────▼──────────┐
//! │ 2. 캐시 조회         │ ← 적중 시 즉시 반환
//! └──────────┬──────────┘
//! ┌──────────▼──────────┐
//! │ 3. 키별 잠금 획득     │ ← 같은 (마켓, TF)는 하나만 조회
//! └──────────┬──────────┘
//! ┌──────────▼──────────┐
//! │ 4. 겹침 최적화 계획   │
//! └──────────┬──────────┘
//! ┌──────────▼──────────┐
//! │ 5. 청크 조회+저장     │ ← 제한된 동시성, 재시도/백오프
//! └──────────┬──────────┘
//! ┌──────────▼──────────┐
//! │ 6. 재조회·조립·캐시   │
//! └─────────────────────┘
//! ```

use crate::cache::{CacheKey, CandleCache};
use crate::optimizer::{OverlapOptimizer, PlannedFetch};
use crate::repository::CandleRepository;
use candle_core::{
    timeutils, ApiRequest, Candle, CandleError, CandleRequest, EngineConfig, FetchConfig, Market,
    RequestSpan, Result, TimeRange, Timeframe,
};
use candle_exchange::CandleSource;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// (마켓, 타임프레임)별 조회 상태를 추적하는 잠금 맵.
type FetchLockMap = Arc<RwLock<HashMap<String, Arc<RwLock<()>>>>>;

/// 캔들 데이터 제공자.
///
/// 캐시와 저장소는 여러 요청이 공유하지만, 캐시는 인스턴스에 주입되는
/// 성능 레이어일 뿐입니다. 캐시를 비활성화해도 모든 경로가 올바르게
/// 동작합니다.
pub struct CandleDataProvider {
    repository: Arc<dyn CandleRepository>,
    source: Arc<dyn CandleSource>,
    cache: CandleCache,
    optimizer: OverlapOptimizer,
    fetch: FetchConfig,
    fetch_locks: FetchLockMap,
}

impl CandleDataProvider {
    /// 새 제공자를 생성합니다.
    pub fn new(
        repository: Arc<dyn CandleRepository>,
        source: Arc<dyn CandleSource>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            optimizer: OverlapOptimizer::new(repository.clone(), config.optimizer.clone()),
            cache: CandleCache::new(&config.cache),
            repository,
            source,
            fetch: config.fetch.clone(),
            fetch_locks: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// 캔들 데이터를 조회합니다.
    ///
    /// 응답은 타임스탬프 오름차순이며 중복이 없습니다. 일부 청크가
    /// 재시도 후에도 실패하면 짧은 시리즈를 돌려주는 대신
    /// `CandleError::Upstream`으로 미확보 구간을 명시해 실패합니다.
    pub async fn get_candles(&self, request: &CandleRequest) -> Result<Vec<Candle>> {
        // 1. 검증: 네트워크/저장소에 닿기 전에 거부
        request.validate()?;

        let range = Self::resolve_range(request, Utc::now().timestamp());
        let key = CacheKey::from_request(request);

        // 2. 캐시 조회 (적중 시 API/DB 접근 없음)
        if let Some(candles) = self.cache.get(&key).await {
            debug!(market = %request.market, timeframe = %request.timeframe, "캐시 적중");
            return Ok(candles);
        }

        // 3. 키별 잠금: 겹치는 구간의 동시 요청이 중복 조회하지 않도록
        let lock = self
            .lock_for(&request.market, request.timeframe)
            .await;
        let _guard = lock.write().await;

        // 잠금 대기 중 앞선 요청이 캐시를 채웠을 수 있다
        if let Some(candles) = self.cache.get(&key).await {
            return Ok(candles);
        }

        // 4~6. 시간 예산 안에서 계획/실행/조립
        let budget = Duration::from_secs(self.fetch.request_budget_secs);
        let candles = tokio::time::timeout(budget, self.fill_range(request, range))
            .await
            .map_err(|_| {
                CandleError::Timeout(format!(
                    "request budget exceeded ({}s) for {} {}",
                    self.fetch.request_budget_secs, request.market, request.timeframe
                ))
            })??;

        self.cache.put(key, candles.clone()).await;
        Ok(candles)
    }

    /// 캐시 통계를 반환합니다.
    pub fn cache_stats(&self) -> crate::cache::CacheStats {
        self.cache.stats()
    }

    /// 요청 구간을 정렬된 버킷 경계로 해석합니다.
    ///
    /// 최근 N개 요청은 현재 버킷을 마지막으로 하는 구간이 됩니다.
    fn resolve_range(request: &CandleRequest, now: i64) -> TimeRange {
        let tf = request.timeframe;
        let secs = tf.as_secs();
        match request.span {
            RequestSpan::Count(n) => {
                let end = timeutils::align(now, tf) + secs;
                TimeRange::new(end - n as i64 * secs, end)
            }
            RequestSpan::Range(range) => {
                let start = timeutils::align(range.start, tf);
                let end = timeutils::align(range.end - 1, tf) + secs;
                TimeRange::new(start, end)
            }
        }
    }

    /// 계획을 수립하고 실행한 뒤 전체 구간을 조립합니다.
    async fn fill_range(&self, request: &CandleRequest, range: TimeRange) -> Result<Vec<Candle>> {
        let market = &request.market;
        let timeframe = request.timeframe;

        let plan = self.optimizer.plan(market, timeframe, range).await?;

        for warning in &plan.warnings {
            warn!(
                market = %warning.market,
                timeframe = %warning.timeframe,
                window = %warning.window,
                gap_count = warning.gap_count,
                "단편화 감지, 연결 끝부터 재조회로 해소"
            );
        }

        if !plan.is_fully_satisfied() {
            info!(
                market = %market,
                timeframe = %timeframe,
                range = %range,
                api_calls = plan.fetches.len(),
                "저장소 부족분 조회 시작"
            );

            // 청크 실행은 제한된 동시성으로, 저장은 도착하는 대로
            let results: Vec<Result<()>> =
                stream::iter(plan.fetches.iter().map(|f| self.execute_fetch(f)))
                    .buffer_unordered(self.fetch.max_concurrency.max(1))
                    .collect()
                    .await;
            for result in results {
                result?;
            }
        }

        // 병합 전략: 멱등 upsert 이후 전체 구간 재조회로 정렬 응답 조립
        let assembled = self
            .repository
            .candles_in_range(market, timeframe, range.start, range.last_bucket(timeframe))
            .await?;

        self.audit_contiguity(market, timeframe, &assembled);

        debug!(
            market = %market,
            timeframe = %timeframe,
            returned = assembled.len(),
            expected = plan.expected_total,
            "캔들 응답 조립"
        );

        Ok(assembled)
    }

    /// 계획된 청크 하나를 조회하고 저장합니다.
    async fn execute_fetch(&self, planned: &PlannedFetch) -> Result<()> {
        let request = &planned.request;
        let batch = self.fetch_with_retry(request).await?;

        self.repository
            .upsert(&request.market, request.timeframe, &batch)
            .await?;
        Ok(())
    }

    /// 재시도/백오프와 함께 청크를 조회합니다.
    ///
    /// 재시도 가능 실패는 상한까지 지수 백오프로 재시도하고, 소진되면
    /// 해당 청크 구간을 미확보 구간으로 명시한 `Upstream` 에러가 됩니다.
    async fn fetch_with_retry(&self, request: &ApiRequest) -> Result<Vec<Candle>> {
        let mut attempt: u32 = 0;
        loop {
            match self.source.fetch(request).await {
                Ok(batch) => return Ok(batch),
                Err(e) if e.is_retryable() && attempt < self.fetch.max_retries => {
                    let base = e.retry_delay_ms().unwrap_or(self.fetch.retry_base_delay_ms);
                    let delay = base.saturating_mul(1 << attempt.min(6));
                    attempt += 1;

                    warn!(
                        market = %request.market,
                        timeframe = %request.timeframe,
                        attempt = attempt,
                        delay_ms = delay,
                        error = %e,
                        "청크 조회 실패, 재시도"
                    );
                    tokio::time::sleep(Duration::from_millis(delay)).await;
                }
                Err(e) => {
                    return Err(CandleError::Upstream {
                        message: format!("{} fetch failed: {}", self.source.name(), e),
                        missing: request.window(),
                    });
                }
            }
        }
    }

    /// 조립된 응답의 연속성을 점검합니다.
    ///
    /// 업스트림 자체에 데이터가 없는 구간은 정상일 수 있으므로 경고만
    /// 남깁니다.
    fn audit_contiguity(&self, market: &Market, timeframe: Timeframe, candles: &[Candle]) {
        let secs = timeframe.as_secs();
        let holes = candles
            .windows(2)
            .filter(|w| w[1].timestamp - w[0].timestamp != secs)
            .count();

        if holes > 0 {
            warn!(
                market = %market,
                timeframe = %timeframe,
                holes = holes,
                "응답에 업스트림 공백이 남아 있음 (거래 공백이면 정상)"
            );
        }
    }

    /// 동시성 제어를 위한 잠금 획득 또는 생성.
    async fn lock_for(&self, market: &Market, timeframe: Timeframe) -> Arc<RwLock<()>> {
        let key = format!("{}:{}", market, timeframe);

        let locks = self.fetch_locks.read().await;
        if let Some(lock) = locks.get(&key) {
            return lock.clone();
        }
        drop(locks);

        let mut locks = self.fetch_locks.write().await;
        locks
            .entry(key)
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }
}
