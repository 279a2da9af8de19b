//! Sina 금융 시세 클라이언트.
//!
//! 인증이 필요 없는 공개 K선 API를 사용합니다. 일반 브라우저 요청으로
//! 보이도록 User-Agent와 Referer 헤더를 설정합니다.

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::DailyBar;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::DataProvider;
use crate::error::{DataError, Result};

const DEFAULT_BASE_URL: &str =
    "https://quotes.sina.cn/cn/api/json_v2.php/CN_MarketDataService.getKLineData";

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

/// Sina provider.
pub struct SinaProvider {
    client: reqwest::Client,
    base_url: String,
}

/// Sina K선 레코드.
#[derive(Debug, Deserialize)]
struct SinaKline {
    day: String,
    open: String,
    high: String,
    low: String,
    close: String,
    volume: String,
}

impl SinaProvider {
    /// 새 provider를 생성합니다.
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            base_url: DEFAULT_BASE_URL.to_string(),
        }
    }

    /// 기본 URL을 변경합니다 (테스트용).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// 종목 코드를 Sina 심볼 형식으로 변환합니다 (예: `000001` → `sz000001`).
    fn to_sina_symbol(symbol: &str) -> String {
        if symbol.starts_with("sh") || symbol.starts_with("sz") || symbol.starts_with("bj") {
            return symbol.to_string();
        }
        let prefix = match symbol.chars().next() {
            Some('6') => "sh",
            Some('8') | Some('4') => "bj",
            _ => "sz",
        };
        format!("{}{}", prefix, symbol)
    }
}

impl Default for SinaProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DataProvider for SinaProvider {
    fn name(&self) -> &str {
        "sina"
    }

    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>> {
        // Sina API는 구간 파라미터가 없어 최근 N건을 요청한 뒤 필터링
        let span_days = (end - start).num_days().max(1) as usize;
        let datalen = (span_days + 5).to_string();

        let klines: Vec<SinaKline> = self
            .client
            .get(&self.base_url)
            .header(reqwest::header::USER_AGENT, USER_AGENT)
            .header(reqwest::header::REFERER, "https://finance.sina.com.cn")
            .query(&[
                ("symbol", Self::to_sina_symbol(symbol).as_str()),
                ("scale", "240"),
                ("ma", "no"),
                ("datalen", datalen.as_str()),
            ])
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut bars = Vec::with_capacity(klines.len());
        for k in &klines {
            let date = NaiveDate::parse_from_str(&k.day[..k.day.len().min(10)], "%Y-%m-%d")
                .map_err(|e| DataError::ParseError(format!("invalid day {}: {}", k.day, e)))?;
            if date < start || date > end {
                continue;
            }

            let parse = |field: &str, value: &str| {
                value.parse().map_err(|_| {
                    DataError::ParseError(format!("non-numeric {} value: {}", field, value))
                })
            };

            bars.push(DailyBar {
                date,
                open: parse("open", &k.open)?,
                high: parse("high", &k.high)?,
                low: parse("low", &k.low)?,
                close: parse("close", &k.close)?,
                volume: parse("volume", &k.volume)?,
                pct_change: None,
            });
        }

        bars.sort_by_key(|b| b.date);

        debug!(symbol = %symbol, count = bars.len(), "Fetched daily bars from sina");
        Ok(bars)
    }
}
