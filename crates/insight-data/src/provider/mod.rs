//! 데이터 Provider 모듈.
//!
//! 다양한 외부 소스에서 일봉 데이터를 가져오는 provider들을 정의합니다.
//!
//! ## Tushare
//! - `TushareProvider`: Tushare Pro HTTP API 클라이언트 (토큰 필요)
//! - 국내 A주 일봉, 안정적인 우선 소스
//!
//! ## AKShare
//! - `AkshareProvider`: AKTools 스타일 HTTP 브리지 클라이언트
//! - 국내/역외/미국 주식 커버리지가 넓은 보조 소스
//!
//! ## Sina
//! - `SinaProvider`: Sina 금융 공개 시세 API
//! - 인증 불필요, 최후의 폴백
//!
//! ## Scripted
//! - `ScriptedProvider`: 테스트용 provider (시나리오 응답 재생)

pub mod akshare;
pub mod scripted;
pub mod sina;
pub mod tushare;

pub use akshare::AkshareProvider;
pub use scripted::ScriptedProvider;
pub use sina::SinaProvider;
pub use tushare::TushareProvider;

use async_trait::async_trait;
use chrono::NaiveDate;
use insight_core::DailyBar;

use crate::error::Result;

/// 일봉 데이터 provider 인터페이스.
///
/// 구현체는 표준화된 `DailyBar`를 날짜 오름차순으로 반환해야 합니다.
/// 빈 결과는 에러가 아니며, resolver가 다음 후보로 폴백합니다.
#[async_trait]
pub trait DataProvider: Send + Sync {
    /// provider 이름 (설정의 소스 이름과 일치).
    fn name(&self) -> &str;

    /// 구간 내 일봉을 조회합니다.
    async fn fetch_daily(
        &self,
        symbol: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyBar>>;
}
