//! 데이터 소스 resolver.
//!
//! 우선순위 내림차순으로 후보를 시도하고, 실패/타임아웃/빈 결과는
//! 다음 후보로 폴백합니다. 모든 후보가 소진됐을 때만 실패를
//! 호출자에게 보고합니다. 성공한 결과는 분석 단계에 넘기기 전에
//! 가장 최근 `max_records`건으로 잘라냅니다.

use chrono::NaiveDate;
use std::sync::Arc;
use tracing::{info, warn};

use insight_core::{Market, NormalizedResult};

use crate::error::{DataError, Result};
use crate::source::SourceRegistry;
use crate::window::QueryWindow;

/// 데이터 소스 resolver.
pub struct DataSourceResolver {
    registry: Arc<SourceRegistry>,
    /// 분석 단계로 넘길 최대 레코드 수.
    ///
    /// over-fetch한 구간과 무관하게 payload 크기를 제한합니다.
    max_records: usize,
}

impl DataSourceResolver {
    /// 새 resolver를 생성합니다.
    pub fn new(registry: Arc<SourceRegistry>, max_records: usize) -> Self {
        Self {
            registry,
            max_records: max_records.max(1),
        }
    }

    /// registry 참조를 반환합니다.
    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    /// 구간 내 일봉 데이터를 가져옵니다.
    ///
    /// 후보 순회는 결정적입니다: 고정된 구성 스냅샷과 고정된 외부
    /// 응답에 대해 항상 같은 순서로 시도하고 첫 성공을 반환합니다.
    pub async fn fetch(
        &self,
        symbol: &str,
        market: Market,
        window: QueryWindow,
    ) -> Result<NormalizedResult> {
        let candidates = self.registry.candidates(market).await;

        if candidates.is_empty() {
            warn!(symbol = %symbol, market = %market, "No data sources configured for market");
            return Err(DataError::NoDataAvailable(symbol.to_string()));
        }

        for candidate in &candidates {
            let source = &candidate.config.name;
            let attempt = tokio::time::timeout(
                candidate.config.timeout,
                candidate.provider.fetch_daily(symbol, window.start, window.end),
            )
            .await;

            match attempt {
                Ok(Ok(bars)) if !bars.is_empty() => {
                    info!(
                        symbol = %symbol,
                        source = %source,
                        count = bars.len(),
                        "Data source resolved"
                    );
                    return Ok(self.normalize(source, symbol, window, bars));
                }
                Ok(Ok(_)) => {
                    warn!(symbol = %symbol, source = %source, "Empty result, trying next source");
                }
                Ok(Err(e)) => {
                    warn!(symbol = %symbol, source = %source, error = %e, "Source failed, trying next source");
                }
                Err(_) => {
                    warn!(
                        symbol = %symbol,
                        source = %source,
                        timeout_secs = candidate.config.timeout.as_secs(),
                        "Source timed out, trying next source"
                    );
                }
            }
        }

        warn!(symbol = %symbol, tried = candidates.len(), "All data sources exhausted");
        Err(DataError::NoDataAvailable(symbol.to_string()))
    }

    /// 결과를 표준화하고 가장 최근 레코드만 남깁니다.
    fn normalize(
        &self,
        source: &str,
        symbol: &str,
        window: QueryWindow,
        mut bars: Vec<insight_core::DailyBar>,
    ) -> NormalizedResult {
        bars.sort_by_key(|b| b.date);

        if bars.len() > self.max_records {
            let dropped = bars.len() - self.max_records;
            bars.drain(..dropped);
            info!(
                symbol = %symbol,
                kept = self.max_records,
                dropped = dropped,
                "Trimmed result to most recent records"
            );
        }

        NormalizedResult {
            source: source.to_string(),
            symbol: symbol.to_string(),
            window_start: window.start,
            window_end: window.end,
            bars,
        }
    }
}

/// resolver가 사용할 구간 끝을 오늘 날짜로 계산하는 헬퍼.
pub fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}
