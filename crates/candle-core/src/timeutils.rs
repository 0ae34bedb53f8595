//! 타임프레임 시간 연산 유틸리티.
//!
//! 순수 함수만 제공합니다. 경계 정렬과 기대 캔들 수 계산은
//! 엔진의 모든 단계가 이 모듈을 통해 수행하며, 동일한 산술이
//! 여러 곳에 중복 구현되지 않도록 합니다.

use crate::error::{CandleError, Result};
use crate::types::Timeframe;
use std::collections::HashMap;
use std::sync::OnceLock;

/// 간격 문자열 → 초 단위 변환 테이블 (최초 접근 시 1회 구축).
static SECONDS_BY_INTERVAL: OnceLock<HashMap<&'static str, i64>> = OnceLock::new();

/// 간격 문자열을 초 단위 값으로 변환합니다.
///
/// 알 수 없는 간격 문자열은 `CandleError::Validation`으로 거부합니다.
pub fn timeframe_seconds(interval: &str) -> Result<i64> {
    let table = SECONDS_BY_INTERVAL.get_or_init(|| {
        Timeframe::all()
            .into_iter()
            .map(|tf| (tf.as_interval(), tf.as_secs()))
            .collect()
    });

    table
        .get(interval)
        .copied()
        .ok_or_else(|| CandleError::Validation(format!("unknown timeframe: {}", interval)))
}

/// 타임스탬프를 타임프레임 경계로 내림 정렬합니다.
pub fn align(timestamp: i64, timeframe: Timeframe) -> i64 {
    let secs = timeframe.as_secs();
    timestamp - timestamp.rem_euclid(secs)
}

/// `[start, end]` (양 끝 포함, 경계 정렬) 구간의 기대 캔들 수를 반환합니다.
pub fn expected_count(start: i64, end_inclusive: i64, timeframe: Timeframe) -> i64 {
    if end_inclusive < start {
        return 0;
    }
    (end_inclusive - start) / timeframe.as_secs() + 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_timeframe_seconds_lookup() {
        assert_eq!(timeframe_seconds("1m").unwrap(), 60);
        assert_eq!(timeframe_seconds("1h").unwrap(), 3600);
        assert!(timeframe_seconds("7m").is_err());
    }

    #[test]
    fn test_align() {
        assert_eq!(align(125, Timeframe::M1), 120);
        assert_eq!(align(120, Timeframe::M1), 120);
        assert_eq!(align(3_599, Timeframe::H1), 0);
        assert_eq!(align(3_600, Timeframe::H1), 3_600);
    }

    #[test]
    fn test_expected_count() {
        // 00:00 ~ 00:05 (포함) = 6개
        assert_eq!(expected_count(0, 300, Timeframe::M1), 6);
        assert_eq!(expected_count(300, 300, Timeframe::M1), 1);
        assert_eq!(expected_count(300, 0, Timeframe::M1), 0);
    }

    proptest! {
        #[test]
        fn align_is_idempotent_and_not_after(ts in 0i64..=4_102_444_800) {
            for tf in Timeframe::all() {
                let aligned = align(ts, tf);
                prop_assert!(aligned <= ts);
                prop_assert_eq!(aligned % tf.as_secs(), 0);
                prop_assert_eq!(align(aligned, tf), aligned);
            }
        }

        #[test]
        fn expected_count_matches_bucket_walk(start in 0i64..10_000, buckets in 1i64..500) {
            let tf = Timeframe::M1;
            let start = align(start, tf);
            let end_inclusive = start + (buckets - 1) * tf.as_secs();
            prop_assert_eq!(expected_count(start, end_inclusive, tf), buckets);
        }
    }
}
