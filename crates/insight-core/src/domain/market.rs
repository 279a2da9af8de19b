//! 시장 구분 타입.

use serde::{Deserialize, Serialize};

/// 분석 대상 시장 구분.
///
/// 데이터 소스 선택과 심볼 해석에 사용됩니다.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Market {
    /// 국내 주식 (A주)
    DomesticEquity,
    /// 역외 상장 주식 (홍콩 등)
    CrossBorderEquity,
    /// 미국 주식
    UsEquity,
}

impl Market {
    /// 문자열로 변환.
    pub fn as_str(&self) -> &'static str {
        match self {
            Market::DomesticEquity => "domestic-equity",
            Market::CrossBorderEquity => "cross-border-equity",
            Market::UsEquity => "us-equity",
        }
    }

    /// 모든 시장 구분 목록.
    pub fn all() -> [Market; 3] {
        [
            Market::DomesticEquity,
            Market::CrossBorderEquity,
            Market::UsEquity,
        ]
    }
}

impl std::fmt::Display for Market {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Market {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "domestic-equity" => Ok(Market::DomesticEquity),
            "cross-border-equity" => Ok(Market::CrossBorderEquity),
            "us-equity" => Ok(Market::UsEquity),
            _ => Err(format!("Unknown market hint: {}", s)),
        }
    }
}
