//! 캔들 API 에러 타입.

use thiserror::Error;

/// 외부 캔들 API 관련 에러.
#[derive(Debug, Error)]
pub enum ApiError {
    /// 네트워크/연결 에러
    #[error("Network error: {0}")]
    Network(String),

    /// 요청 타임아웃
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// 요청 한도 초과
    #[error("Rate limit exceeded")]
    RateLimited,

    /// 손상된 응답 페이로드 (배치 전체 거부)
    #[error("Malformed payload: {0}")]
    Malformed(String),

    /// 청크 상한 초과 요청 (호출자가 분할해야 함)
    #[error("Chunk size {requested} exceeds per-call limit {limit}")]
    ChunkTooLarge {
        /// 요청된 캔들 수
        requested: usize,
        /// 호출당 허용 상한
        limit: usize,
    },

    /// 업스트림 HTTP 에러 응답
    #[error("API error {status}: {message}")]
    Api {
        /// HTTP 상태 코드
        status: u16,
        /// 응답 본문
        message: String,
    },
}

/// 캔들 API 작업을 위한 Result 타입.
pub type ApiResult<T> = Result<T, ApiError>;

impl ApiError {
    /// 재시도 가능한 에러인지 확인.
    pub fn is_retryable(&self) -> bool {
        match self {
            ApiError::Network(_) | ApiError::Timeout(_) | ApiError::RateLimited => true,
            ApiError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// 권장 재시도 대기 시간(밀리초) 반환.
    pub fn retry_delay_ms(&self) -> Option<u64> {
        match self {
            ApiError::RateLimited => Some(1_000),
            ApiError::Network(_) => Some(1_000),
            ApiError::Timeout(_) => Some(500),
            ApiError::Api { status, .. } if *status >= 500 => Some(2_000),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ApiError::Timeout(err.to_string())
        } else {
            ApiError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_retryable() {
        assert!(ApiError::RateLimited.is_retryable());
        assert!(ApiError::Network("reset".into()).is_retryable());
        assert!(ApiError::Api { status: 503, message: String::new() }.is_retryable());
        assert!(!ApiError::Api { status: 404, message: String::new() }.is_retryable());
        assert!(!ApiError::Malformed("bad json".into()).is_retryable());
        assert!(!ApiError::ChunkTooLarge { requested: 300, limit: 200 }.is_retryable());
    }

    #[test]
    fn test_rate_limit_backs_off_longer_than_timeout() {
        let rate = ApiError::RateLimited.retry_delay_ms().unwrap();
        let timeout = ApiError::Timeout("slow".into()).retry_delay_ms().unwrap();
        assert!(rate > timeout);
    }
}
