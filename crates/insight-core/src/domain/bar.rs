//! 일봉 데이터 타입.
//!
//! 데이터 소스가 반환하는 원시 레코드를 표준화한 형태입니다.
//! resolver가 가장 최근 k건으로 잘라낸 뒤 분석 단계로 넘깁니다.

use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// 표준화된 일봉 레코드.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyBar {
    /// 거래일
    pub date: NaiveDate,
    /// 시가
    pub open: Decimal,
    /// 고가
    pub high: Decimal,
    /// 저가
    pub low: Decimal,
    /// 종가
    pub close: Decimal,
    /// 거래량
    pub volume: Decimal,
    /// 전일 대비 등락률 (%)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pct_change: Option<Decimal>,
}

/// 데이터 소스 resolution 결과.
///
/// 어느 소스에서 데이터를 얻었는지와 함께 잘라낸 일봉 목록을 담습니다.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedResult {
    /// 데이터를 제공한 소스 이름
    pub source: String,
    /// 종목 코드
    pub symbol: String,
    /// 조회 구간 시작일
    pub window_start: NaiveDate,
    /// 조회 구간 종료일
    pub window_end: NaiveDate,
    /// 일봉 목록 (날짜 오름차순)
    pub bars: Vec<DailyBar>,
}

impl NormalizedResult {
    /// 가장 최근 일봉을 반환합니다.
    pub fn latest(&self) -> Option<&DailyBar> {
        self.bars.last()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn bar(day: u32, close: Decimal) -> DailyBar {
        DailyBar {
            date: NaiveDate::from_ymd_opt(2025, 6, day).unwrap(),
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1000),
            pct_change: None,
        }
    }

    #[test]
    fn test_latest_bar() {
        let result = NormalizedResult {
            source: "tushare".to_string(),
            symbol: "000001".to_string(),
            window_start: NaiveDate::from_ymd_opt(2025, 6, 1).unwrap(),
            window_end: NaiveDate::from_ymd_opt(2025, 6, 11).unwrap(),
            bars: vec![bar(9, dec!(10.1)), bar(10, dec!(10.4)), bar(11, dec!(10.2))],
        };

        assert_eq!(result.latest().unwrap().close, dec!(10.2));
    }
}
