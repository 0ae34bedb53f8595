//! 겹침 최적화기.
//!
//! 요청 구간을 청크(최대 200캔들) 단위로 전진하며, 각 청크에 대해
//! 저장소 상태를 보고 네 가지 조건을 엄격한 우선순위로 평가합니다.
//! 첫 번째로 일치한 조건이 행동을 결정하고 커서가 다음 청크로
//! 이동합니다. 결과는 실행 전의 "계획"이며, 조회된 배치의 병합은
//! 멱등 upsert 후 전체 구간 재조회로 수행합니다.
//!
//! # 조건 우선순위
//!
//! 1. **StartOverlap** - 청크 안에 저장 캔들이 있지만 청크 시작 버킷이
//!    비어 있음 → 청크 전체 조회 (멱등 upsert가 겹침을 흡수)
//! 2. **CompleteOverlap** - 저장 수 == 기대 수 → API 호출 생략
//! 3. **Fragmentation** - 임계값 초과 간격이 기준 수 이상 → 연결 끝
//!    다음부터 재개 (첫 갭 위치를 스캔 중 포착해 재사용, 재스캔 없음)
//! 4. **ConnectedEnd** (기본) - 연속 prefix 다음부터 재개, 또는 완전히
//!    빈 구간이면 청크 전체 조회. 기본 경로이며 에러가 아님.

use crate::repository::{scan_gaps, CandleRepository};
use candle_core::{
    timeutils, ApiRequest, CandleError, Market, OptimizerConfig, Result, TimeRange, Timeframe,
    CHUNK_LIMIT,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// 청크 평가 결과로 선택된 조건.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationStep {
    /// 청크 내부에 데이터가 있으나 시작 버킷이 비어 있음
    StartOverlap,
    /// 청크가 이미 완전히 채워져 있음
    CompleteOverlap,
    /// 저장 데이터가 임계값 기준으로 단편화됨
    Fragmentation,
    /// 연속 prefix 이후부터 채우면 됨 (빈 구간 포함, 기본 경로)
    ConnectedEnd,
}

/// 조건에 따라 취할 행동.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    /// API 호출 생략
    Skip,
    /// 청크 전체 조회
    FetchChunk,
    /// 지정 경계 다음부터 조회 재개
    ResumeFrom(i64),
}

/// 계획된 단일 청크 조회.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedFetch {
    /// 실행할 API 요청
    pub request: ApiRequest,
    /// 이 요청을 만들어낸 조건
    pub step: OptimizationStep,
}

/// 청크별 판정 기록.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkDecision {
    /// 청크 구간 ([start, end))
    pub window: TimeRange,
    /// 선택된 조건
    pub step: OptimizationStep,
    /// 취한 행동
    pub action: StepAction,
}

/// 단편화 감지 기록. 해결되면 정보성이며 요청을 실패시키지 않습니다.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityWarning {
    /// 마켓 코드
    pub market: Market,
    /// 타임프레임
    pub timeframe: Timeframe,
    /// 단편화가 감지된 청크 구간
    pub window: TimeRange,
    /// 임계값 초과 갭 수
    pub gap_count: usize,
}

/// 최적화 계획.
#[derive(Debug, Clone)]
pub struct OptimizationResult {
    /// 실행할 조회 (시간 오름차순, 비어 있을 수 있음)
    pub fetches: Vec<PlannedFetch>,
    /// 청크별 판정 기록
    pub decisions: Vec<ChunkDecision>,
    /// 단편화 감지 기록
    pub warnings: Vec<IntegrityWarning>,
    /// 구간 전체의 기대 캔들 수
    pub expected_total: i64,
}

impl OptimizationResult {
    /// 저장소만으로 요청을 충족할 수 있는지 확인합니다.
    pub fn is_fully_satisfied(&self) -> bool {
        self.fetches.is_empty()
    }
}

/// 겹침 최적화기.
///
/// 요청과 저장소의 현재 상태로부터 최소한의 API 청크 요청 목록을
/// 만들어냅니다. 청크별 판정에 필요한 저장소 질의는 요청 안에서
/// 순차로 수행됩니다.
pub struct OverlapOptimizer {
    repository: Arc<dyn CandleRepository>,
    config: OptimizerConfig,
}

impl OverlapOptimizer {
    /// 새 최적화기를 생성합니다.
    pub fn new(repository: Arc<dyn CandleRepository>, config: OptimizerConfig) -> Self {
        Self { repository, config }
    }

    /// `[range.start, range.end)` 구간에 대한 조회 계획을 수립합니다.
    ///
    /// 구간 경계는 이미 타임프레임에 정렬되어 있어야 합니다.
    /// 반복 횟수가 상한을 넘으면 `CandleError::Timeout`으로 중단합니다.
    pub async fn plan(
        &self,
        market: &Market,
        timeframe: Timeframe,
        range: TimeRange,
    ) -> Result<OptimizationResult> {
        // 모든 단계가 같은 메모된 초 단위 값과 임계값을 사용한다.
        // 정수 델타에 대한 `delta > 배수×초` 판정은 내림으로 보존된다.
        let secs = timeutils::timeframe_seconds(timeframe.as_interval())?;
        let threshold = (secs as f64 * self.config.gap_threshold_multiplier).floor() as i64;

        if timeframe.is_sub_minute() {
            // 초봉은 체결 공백이 정상일 수 있어 고정 배수 갭 정책이
            // 과대 판정할 수 있다. 별도 검증 대상으로 표시만 한다.
            warn!(
                market = %market,
                timeframe = %timeframe,
                multiplier = self.config.gap_threshold_multiplier,
                "sub-minute timeframe: fixed-multiplier gap policy may misclassify sparse trading"
            );
        }

        let last = range.last_bucket(timeframe);
        let mut cursor = range.start;
        let mut iterations = 0u32;

        let mut fetches = Vec::new();
        let mut decisions = Vec::new();
        let mut warnings = Vec::new();

        while cursor <= last {
            iterations += 1;
            if iterations > self.config.max_iterations {
                return Err(CandleError::Timeout(format!(
                    "optimizer exceeded {} iterations for {} {} {}",
                    self.config.max_iterations, market, timeframe, range
                )));
            }

            let remaining = (last - cursor) / secs + 1;
            let chunk_len = remaining.min(CHUNK_LIMIT as i64);
            let window_end = cursor + (chunk_len - 1) * secs;

            let (step, action) = self
                .evaluate_chunk(market, timeframe, cursor, window_end, threshold, &mut warnings)
                .await?;

            match action {
                StepAction::Skip => {}
                StepAction::FetchChunk => {
                    fetches.push(PlannedFetch {
                        request: ApiRequest::new(
                            market.clone(),
                            timeframe,
                            cursor - secs,
                            chunk_len as usize,
                        ),
                        step,
                    });
                }
                StepAction::ResumeFrom(connected_end) => {
                    let fetch_count = (window_end - connected_end) / secs;
                    if fetch_count > 0 {
                        fetches.push(PlannedFetch {
                            request: ApiRequest::new(
                                market.clone(),
                                timeframe,
                                connected_end,
                                fetch_count as usize,
                            ),
                            step,
                        });
                    }
                }
            }

            debug!(
                market = %market,
                timeframe = %timeframe,
                window_start = cursor,
                window_end = window_end,
                step = ?step,
                action = ?action,
                "청크 판정"
            );

            decisions.push(ChunkDecision {
                window: TimeRange::new(cursor, window_end + secs),
                step,
                action,
            });

            cursor = window_end + secs;
        }

        Ok(OptimizationResult {
            fetches,
            decisions,
            warnings,
            expected_total: timeutils::expected_count(range.start, last, timeframe),
        })
    }

    /// 청크 하나를 평가해 조건과 행동을 결정합니다.
    async fn evaluate_chunk(
        &self,
        market: &Market,
        timeframe: Timeframe,
        cursor: i64,
        window_end: i64,
        threshold: i64,
        warnings: &mut Vec<IntegrityWarning>,
    ) -> Result<(OptimizationStep, StepAction)> {
        let any = self
            .repository
            .exists_in_range(market, timeframe, cursor, window_end)
            .await?;
        if !any {
            // 완전히 빈 구간: 청크 전체 조회가 기본 경로다
            return Ok((OptimizationStep::ConnectedEnd, StepAction::FetchChunk));
        }

        let count = self
            .repository
            .count_in_range(market, timeframe, cursor, window_end)
            .await?;
        let expected = timeutils::expected_count(cursor, window_end, timeframe);
        if count == expected {
            return Ok((OptimizationStep::CompleteOverlap, StepAction::Skip));
        }

        let stored = self
            .repository
            .timestamps_in_range(market, timeframe, cursor, window_end)
            .await?;

        let last_stored = match stored.last() {
            Some(&ts) => ts,
            // 존재 프로브와 불일치하면 청크 전체 조회로 처리
            None => return Ok((OptimizationStep::ConnectedEnd, StepAction::FetchChunk)),
        };

        if stored.first().copied() != Some(cursor) {
            // 시작 버킷이 비어 있으므로 선두 구멍까지 포함해 전체를 다시 받는다
            return Ok((OptimizationStep::StartOverlap, StepAction::FetchChunk));
        }

        let gaps = scan_gaps(&stored, threshold);
        // 첫 갭의 왼쪽 경계가 곧 연결 끝이다. 갭이 없으면 꼬리만 비어 있다.
        let connected_end = gaps.first().map(|g| g.prev).unwrap_or(last_stored);

        if gaps.len() >= self.config.min_gaps_for_fragmentation {
            warnings.push(IntegrityWarning {
                market: market.clone(),
                timeframe,
                window: TimeRange::new(cursor, window_end + timeframe.as_secs()),
                gap_count: gaps.len(),
            });
            return Ok((
                OptimizationStep::Fragmentation,
                StepAction::ResumeFrom(connected_end),
            ));
        }

        Ok((
            OptimizationStep::ConnectedEnd,
            StepAction::ResumeFrom(connected_end),
        ))
    }
}
