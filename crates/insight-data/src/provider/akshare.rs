//! AKShare HTTP 브리지 클라이언트.
//!
//! AKTools가 노출하는 `/api/public/{interface}` 형태의 REST 브리지를
//! 호출합니다. 응답은 중국어 컬럼명을 가진 레코드 배열이므로
//! 표준 컬럼명으로 매핑합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::DailyBar;
use rust_decimal::Decimal;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

use super::DataProvider;
use crate::error::{DataError, Result};

/// AKShare provider.
pub struct AkshareProvider {
    client: reqwest::Client,
    base_url: String,
}

impl AkshareProvider {
    /// 새 provider를 생성합니다.
    ///
    /// `base_url`은 AKTools 서버 주소입니다 (예: `http://127.0.0.1:8080`).
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: base_url.into(),
        }
    }

    /// 레코드에서 표준/중국어 컬럼명 어느 쪽이든 값을 찾습니다.
    fn column<'a>(record: &'a HashMap<String, Value>, names: &[&str]) -> Option<&'a Value> {
        names.iter().find_map(|name| record.get(*name))
    }

    fn decimal_column(record: &HashMap<String, Value>, names: &[&str]) -> Result<Decimal> {
        Self::column(record, names)
            .and_then(value_as_decimal)
            .ok_or_else(|| DataError::ParseError(format!("missing numeric column {:?}", names)))
    }
}

fn value_as_decimal(value: &Value) -> Option<Decimal> {
    match value {
        Value::Number(n) => n
            .as_f64()
            .and_then(|f| Decimal::try_from(f).ok())
            .or_else(|| n.as_i64().map(Decimal::from)),
        Value::String(s) => s.parse().ok(),
        _ => None,
    }
}

#[async_trait]
impl DataProvider for AkshareProvider {
    fn name(&self) -> &str {
        "akshare"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        let url = format!("{}/api/public/stock_zh_a_hist", self.base_url);

        let records: Vec<HashMap<String, Value>> = self
            .client
            .get(&url)
            .query(&[
                ("symbol", symbol),
                ("period", "daily"),
                ("start_date", &start.format("%Y%m%d").to_string()),
                ("end_date", &end.format("%Y%m%d").to_string()),
                ("adjust", "qfq"),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut bars = Vec::with_capacity(records.len());
        for record in &records {
            let date_value = Self::column(record, &["日期", "date"])
                .and_then(|v| v.as_str())
                .ok_or_else(|| DataError::ParseError("missing date column".to_string()))?;
            // "2025-06-20" 또는 "2025-06-20T00:00:00" 형태 허용
            let date_str = &date_value[..date_value.len().min(10)];
            let date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
                .map_err(|e| DataError::ParseError(format!("invalid date {}: {}", date_value, e)))?;

            bars.push(DailyBar {
                date,
                open: Self::decimal_column(record, &["开盘", "open"])?,
                high: Self::decimal_column(record, &["最高", "high"])?,
                low: Self::decimal_column(record, &["最低", "low"])?,
                close: Self::decimal_column(record, &["收盘", "close"])?,
                volume: Self::decimal_column(record, &["成交量", "volume", "vol"])?,
                pct_change: Self::column(record, &["涨跌幅", "pct_change"])
                    .and_then(value_as_decimal),
            });
        }

        bars.sort_by_key(|b| b.date);

        debug!(symbol = %symbol, count = bars.len(), "Fetched daily bars from akshare");
        Ok(bars)
    }
}
