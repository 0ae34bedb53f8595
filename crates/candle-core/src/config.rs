//! 설정 관리.
//!
//! 이 모듈은 엔진 설정을 정의하고 TOML 파일과 환경 변수에서 로드합니다.

use serde::{Deserialize, Serialize};
use std::path::Path;

/// 엔진 설정.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct EngineConfig {
    /// 데이터베이스 설정
    #[serde(default)]
    pub database: DatabaseConfig,
    /// 캐시 설정
    #[serde(default)]
    pub cache: CacheConfig,
    /// 외부 API 호출 설정
    #[serde(default)]
    pub fetch: FetchConfig,
    /// 겹침 최적화 설정
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    /// 로깅 설정
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// 데이터베이스 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// 연결 URL
    pub url: String,
    /// 최대 연결 수
    pub max_connections: u32,
    /// 연결 타임아웃 (초)
    pub connect_timeout_secs: u64,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "postgres://localhost:5432/candles".to_string(),
            max_connections: 10,
            connect_timeout_secs: 30,
        }
    }
}

/// 캐시 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CacheConfig {
    /// 항목 TTL (초). 0이면 캐시를 비활성화합니다.
    pub ttl_secs: u64,
    /// 최대 항목 수
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 60,
            max_entries: 256,
        }
    }
}

/// 외부 API 호출 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct FetchConfig {
    /// 재시도 가능한 실패의 최대 재시도 횟수
    pub max_retries: u32,
    /// 재시도 기본 대기 시간 (밀리초, 지수 백오프의 시작값)
    pub retry_base_delay_ms: u64,
    /// 단일 HTTP 요청 타임아웃 (초)
    pub timeout_secs: u64,
    /// 청크 요청 동시 실행 상한
    pub max_concurrency: usize,
    /// 요청 전체의 시간 예산 (초)
    pub request_budget_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 500,
            timeout_secs: 10,
            max_concurrency: 4,
            request_budget_secs: 30,
        }
    }
}

/// 겹침 최적화 설정.
///
/// 갭 판정 정책은 상수가 아니라 설정입니다. 초봉처럼 체결 공백이
/// 정상인 타임프레임에서는 고정 배수 정책이 과소/과대 판정할 수
/// 있으므로 배수와 단편화 기준을 조정할 수 있어야 합니다.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OptimizerConfig {
    /// 갭 판정 임계값 배수 (타임프레임 초 × 배수)
    pub gap_threshold_multiplier: f64,
    /// 단편화로 판정할 최소 갭 수
    pub min_gaps_for_fragmentation: usize,
    /// 청크 루프의 최대 반복 횟수 (폭주 방지)
    pub max_iterations: u32,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            gap_threshold_multiplier: 1.5,
            min_gaps_for_fragmentation: 2,
            max_iterations: 1_000,
        }
    }
}

/// 로깅 설정.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    /// 로그 레벨
    pub level: String,
    /// 로그 형식 (pretty, json, compact)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

impl EngineConfig {
    /// 파일과 환경 변수에서 설정을 로드합니다.
    ///
    /// 파일이 없으면 기본값을 사용하며, `CANDLE_` 접두사 환경 변수가
    /// 파일 값을 덮어씁니다 (예: `CANDLE_CACHE__TTL_SECS=30`).
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from(path.as_ref()).required(false))
            .add_source(config::Environment::with_prefix("CANDLE").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// 기본 위치(`candle.toml`)에서 설정을 로드합니다.
    pub fn load_default() -> Result<Self, config::ConfigError> {
        let path =
            std::env::var("CANDLE_CONFIG").unwrap_or_else(|_| "candle.toml".to_string());
        Self::load(path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.optimizer.gap_threshold_multiplier, 1.5);
        assert_eq!(config.optimizer.min_gaps_for_fragmentation, 2);
        assert_eq!(config.optimizer.max_iterations, 1_000);
        assert_eq!(config.fetch.max_retries, 3);
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let config = EngineConfig::load("/nonexistent/candle.toml").unwrap();
        assert_eq!(config.cache.max_entries, 256);
        assert_eq!(config.logging.level, "info");
    }
}
