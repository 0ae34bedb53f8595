//! 마켓 코드 정의.
//!
//! 이 모듈은 거래 마켓을 나타내는 타입을 정의합니다.
//! 마켓 코드는 Upbit 표기("호가통화-기준자산", 예: `KRW-BTC`)를 따릅니다.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// 거래 가능한 마켓.
///
/// 기준 자산과 호가 통화로 구성됩니다. 예: BTC를 KRW로 거래하는
/// 마켓은 `KRW-BTC`로 표기합니다.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Market {
    /// 기준 자산 (예: BTC, ETH)
    pub base: String,
    /// 호가 통화 (예: KRW, USDT)
    pub quote: String,
}

impl Market {
    /// 새 마켓을 생성합니다.
    pub fn new(quote: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// 마켓 코드 문자열을 반환합니다 (예: `KRW-BTC`).
    pub fn code(&self) -> String {
        format!("{}-{}", self.quote, self.base)
    }

    /// 마켓 코드가 유효한 형식인지 확인합니다.
    ///
    /// 호가 통화는 3~4자, 기준 자산은 1~10자의 영대문자/숫자만 허용합니다.
    pub fn is_valid(&self) -> bool {
        let ok = |s: &str, min: usize, max: usize| {
            s.len() >= min
                && s.len() <= max
                && s.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        };
        ok(&self.quote, 3, 4) && ok(&self.base, 1, 10)
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.quote, self.base)
    }
}

impl FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (quote, base) = s
            .split_once('-')
            .ok_or_else(|| format!("Invalid market code: {}", s))?;
        let market = Market::new(quote, base);
        if !market.is_valid() {
            return Err(format!("Invalid market code: {}", s));
        }
        Ok(market)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_market_code() {
        let market = Market::new("KRW", "BTC");
        assert_eq!(market.code(), "KRW-BTC");
        assert_eq!(market.to_string(), "KRW-BTC");
    }

    #[test]
    fn test_market_parse() {
        let market: Market = "KRW-BTC".parse().unwrap();
        assert_eq!(market.quote, "KRW");
        assert_eq!(market.base, "BTC");

        assert!("KRWBTC".parse::<Market>().is_err());
        assert!("kr-".parse::<Market>().is_err());
        assert!("K-BTC".parse::<Market>().is_err());
    }

    #[test]
    fn test_market_normalizes_case() {
        let market = Market::new("krw", "btc");
        assert_eq!(market.code(), "KRW-BTC");
        assert!(market.is_valid());
    }
}
