//! Tushare Pro API 클라이언트.
//!
//! Tushare Pro는 단일 엔드포인트에 `api_name`과 파라미터를 POST하는
//! JSON API입니다. 토큰 인증이 필요합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::DailyBar;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tracing::debug;

use super::DataProvider;
use crate::error::{DataError, Result};

const DEFAULT_BASE_URL: &str = "https://api.tushare.pro";

/// Tushare Pro provider.
pub struct TushareProvider {
    client: reqwest::Client,
    base_url: String,
    token: String,
}

/// Tushare 응답 envelope.
#[derive(Debug, Deserialize)]
struct TushareResponse {
    code: i64,
    msg: Option<String>,
    data: Option<TushareData>,
}

/// 필드 이름 목록과 행 배열로 구성된 Tushare 데이터 블록.
#[derive(Debug, Deserialize)]
struct TushareData {
    fields: Vec<String>,
    items: Vec<Vec<Value>>,
}

impl TushareProvider {
    /// 새 provider를 생성합니다.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(30))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            token: token.into(),
        }
    }

    /// 기본 URL을 변경합니다 (테스트용).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 종목 코드를 Tushare `ts_code` 형식으로 변환합니다.
    ///
    /// 접미사가 이미 있으면 그대로 사용하고, 없으면 코드 첫 자리로
    /// 거래소를 추정합니다 (6→상해, 8/4→북경, 그 외→심천).
    fn to_ts_code(symbol: &str) -> String {
        if symbol.contains('.') {
            return symbol.to_uppercase();
        }
        let suffix = match symbol.chars().next() {
            Some('6') => "SH",
            Some('8') | Some('4') => "BJ",
            _ => "SZ",
        };
        format!("{}.{}", symbol, suffix)
    }

    fn field_index(fields: &[String], name: &str) -> Result<usize> {
        fields
            .iter()
            .position(|f| f == name)
            .ok_or_else(|| DataError::ParseError(format!("missing field in response: {}", name)))
    }
}

/// JSON 값을 Decimal로 변환합니다 (숫자/문자열 모두 허용).
fn value_to_decimal(value: &Value) -> Option<Decimal> {
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
impl DataProvider for TushareProvider {
    fn name(&self) -> &str {
        "tushare"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        let body = json!({
            "api_name": "daily",
            "token": self.token,
            "params": {
                "ts_code": Self::to_ts_code(symbol),
                "start_date": start.format("%Y%m%d").to_string(),
                "end_date": end.format("%Y%m%d").to_string(),
            },
            "fields": "trade_date,open,high,low,close,vol,pct_chg",
        });

        let response: TushareResponse = self
            .client
            .post(&self.base_url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if response.code != 0 {
            return Err(DataError::FetchError(format!(
                "tushare returned code {}: {}",
                response.code,
                response.msg.unwrap_or_default()
            )));
        }

        let data = match response.data {
            Some(data) => data,
            None => return Ok(Vec::new()),
        };

        let date_idx = Self::field_index(&data.fields, "trade_date")?;
        let open_idx = Self::field_index(&data.fields, "open")?;
        let high_idx = Self::field_index(&data.fields, "high")?;
        let low_idx = Self::field_index(&data.fields, "low")?;
        let close_idx = Self::field_index(&data.fields, "close")?;
        let vol_idx = Self::field_index(&data.fields, "vol")?;
        let pct_idx = data.fields.iter().position(|f| f == "pct_chg");

        let mut bars = Vec::with_capacity(data.items.len());
        for row in &data.items {
            let date_str = row
                .get(date_idx)
                .and_then(|v| v.as_str())
                .ok_or_else(|| DataError::ParseError("trade_date is not a string".to_string()))?;
            let date = NaiveDate::parse_from_str(date_str, "%Y%m%d")
                .map_err(|e| DataError::ParseError(format!("invalid trade_date {}: {}", date_str, e)))?;

            let field = |idx: usize| -> Result<Decimal> {
                row.get(idx)
                    .and_then(value_to_decimal)
                    .ok_or_else(|| DataError::ParseError(format!("non-numeric field at index {}", idx)))
            };

            bars.push(DailyBar {
                date,
                open: field(open_idx)?,
                high: field(high_idx)?,
                low: field(low_idx)?,
                close: field(close_idx)?,
                volume: field(vol_idx)?,
                pct_change: pct_idx.and_then(|i| row.get(i)).and_then(value_to_decimal),
            });
        }

        // Tushare는 최신순으로 반환하므로 날짜 오름차순으로 정렬
        bars.sort_by_key(|b| b.date);

        debug!(symbol = %symbol, count = bars.len(), "Fetched daily bars from tushare");
        Ok(bars)
    }
}
