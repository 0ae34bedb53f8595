//! 인메모리 캔들 캐시.
//!
//! (마켓, 타임프레임, 구간) 키에 대한 짧은 TTL의 읽기 경유 캐시입니다.
//! 캐시는 성능 레이어일 뿐 진실의 원천이 아닙니다. 미스나 만료는 항상
//! 저장소/API 경로로 되돌아가며, 기본값으로 대체하지 않습니다.
//! 전역 상태 없이 제공자 인스턴스마다 주입됩니다.

use candle_core::{CacheConfig, Candle, CandleRequest, RequestSpan, Timeframe};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;
use tracing::debug;

/// 캐시 키.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    market: String,
    timeframe: Timeframe,
    span: RequestSpan,
}

impl CacheKey {
    /// 요청에서 캐시 키를 만듭니다.
    pub fn from_request(request: &CandleRequest) -> Self {
        Self {
            market: request.market.code(),
            timeframe: request.timeframe,
            span: request.span,
        }
    }
}

struct CacheEntry {
    candles: Vec<Candle>,
    stored_at: Instant,
}

/// 캐시 통계.
#[derive(Debug, Default, Clone, Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
}

/// 인메모리 캔들 캐시.
pub struct CandleCache {
    entries: RwLock<HashMap<CacheKey, CacheEntry>>,
    ttl: Duration,
    max_entries: usize,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CandleCache {
    /// 설정으로부터 캐시를 생성합니다. TTL 0은 캐시 비활성화를 뜻합니다.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_ttl(Duration::from_secs(config.ttl_secs), config.max_entries)
    }

    /// TTL과 용량을 직접 지정해 캐시를 생성합니다.
    pub fn with_ttl(ttl: Duration, max_entries: usize) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            ttl,
            max_entries,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// 항상 미스를 반환하는 비활성 캐시.
    pub fn disabled() -> Self {
        Self::with_ttl(Duration::ZERO, 0)
    }

    fn enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// 캐시에서 값을 가져옵니다. 만료된 항목은 미스로 처리합니다.
    pub async fn get(&self, key: &CacheKey) -> Option<Vec<Candle>> {
        if !self.enabled() {
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        let entries = self.entries.read().await;
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Some(entry.candles.clone())
            }
            _ => {
                // 만료 항목 제거는 put 시점의 정리로 미룬다
                self.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// 값을 캐시에 저장합니다.
    pub async fn put(&self, key: CacheKey, candles: Vec<Candle>) {
        if !self.enabled() {
            return;
        }

        let mut entries = self.entries.write().await;

        // 만료 항목 정리
        let ttl = self.ttl;
        entries.retain(|_, e| e.stored_at.elapsed() < ttl);

        // 용량 초과 시 가장 오래된 항목 제거
        while entries.len() >= self.max_entries {
            let oldest = entries
                .iter()
                .min_by_key(|(_, e)| e.stored_at)
                .map(|(k, _)| k.clone());
            match oldest {
                Some(k) => entries.remove(&k),
                None => break,
            };
        }

        debug!(count = candles.len(), "캐시 저장");
        entries.insert(
            key,
            CacheEntry {
                candles,
                stored_at: Instant::now(),
            },
        );
    }

    /// 캐시 통계를 가져옵니다.
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            hits as f64 / total as f64
        } else {
            0.0
        };

        CacheStats {
            hits,
            misses,
            hit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Market;
    use rust_decimal_macros::dec;

    fn request(count: usize) -> CandleRequest {
        CandleRequest::recent(Market::new("KRW", "BTC"), Timeframe::M1, count)
    }

    fn candles(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                Candle::new(
                    Market::new("KRW", "BTC"),
                    Timeframe::M1,
                    (i as i64 + 1) * 60,
                    dec!(100),
                    dec!(101),
                    dec!(99),
                    dec!(100),
                    dec!(1),
                )
            })
            .collect()
    }

    #[tokio::test]
    async fn test_put_get_roundtrip() {
        let cache = CandleCache::with_ttl(Duration::from_secs(60), 16);
        let key = CacheKey::from_request(&request(3));

        assert!(cache.get(&key).await.is_none());
        cache.put(key.clone(), candles(3)).await;

        let hit = cache.get(&key).await.unwrap();
        assert_eq!(hit.len(), 3);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_expired_entry_is_a_miss() {
        let cache = CandleCache::with_ttl(Duration::from_millis(20), 16);
        let key = CacheKey::from_request(&request(3));

        cache.put(key.clone(), candles(3)).await;
        assert!(cache.get(&key).await.is_some());

        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_disabled_cache_never_hits() {
        let cache = CandleCache::disabled();
        let key = CacheKey::from_request(&request(3));

        cache.put(key.clone(), candles(3)).await;
        assert!(cache.get(&key).await.is_none());
    }

    #[tokio::test]
    async fn test_capacity_evicts_oldest() {
        let cache = CandleCache::with_ttl(Duration::from_secs(60), 2);
        let first = CacheKey::from_request(&request(1));
        let second = CacheKey::from_request(&request(2));
        let third = CacheKey::from_request(&request(3));

        cache.put(first.clone(), candles(1)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(second.clone(), candles(2)).await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.put(third.clone(), candles(3)).await;

        assert!(cache.get(&first).await.is_none());
        assert!(cache.get(&second).await.is_some());
        assert!(cache.get(&third).await.is_some());
    }
}
