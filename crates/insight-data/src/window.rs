//! 조회 구간 계산.
//!
//! 거래 캘린더에는 주말/휴일 공백이 있고 소스에 따라 하루 정도
//! 지연이 있을 수 있습니다. 캘린더를 모델링하는 대신 고정 길이
//! 구간을 over-fetch하여 유효한 데이터가 반드시 포함되도록 하고,
//! 이후 resolver가 최근 몇 건만 남기고 잘라냅니다.

use chrono::{Duration, NaiveDate};
use tracing::warn;

/// 데이터 조회 구간.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueryWindow {
    /// 시작일 (포함)
    pub start: NaiveDate,
    /// 종료일 (포함)
    pub end: NaiveDate,
}

/// 조회 구간을 계산합니다.
///
/// - `target`이 없으면 `today`를 기준일로 사용합니다.
/// - 미래 기준일은 잘못된 입력으로 보고 `today`로 보정합니다 (거부하지 않음).
/// - `lookback_days`는 1 이상이어야 하며, 0은 1로 보정합니다.
pub fn resolve_window(target: Option<NaiveDate>, today: NaiveDate, lookback_days: u32) -> QueryWindow {
    let end = match target {
        Some(date) if date > today => {
            warn!(
                target_date = %date,
                today = %today,
                "Target date is in the future, clamping to today"
            );
            today
        }
        Some(date) => date,
        None => today,
    };

    let lookback = if lookback_days == 0 {
        warn!("lookback_days must be >= 1, correcting to 1");
        1
    } else {
        lookback_days
    };

    QueryWindow {
        start: end - Duration::days(lookback as i64),
        end,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn test_window_default_lookback() {
        let today = day(2025, 6, 20);
        let window = resolve_window(Some(today), today, 10);

        assert_eq!(window.end, today);
        assert_eq!(window.start, day(2025, 6, 10));
    }

    #[test]
    fn test_window_no_target_uses_today() {
        let today = day(2025, 6, 20);
        let window = resolve_window(None, today, 10);
        assert_eq!(window.end, today);
    }

    #[test]
    fn test_window_future_target_clamped() {
        let today = day(2025, 6, 20);
        let window = resolve_window(Some(day(2025, 7, 1)), today, 10);

        assert_eq!(window.end, today);
        assert_eq!(window.start, day(2025, 6, 10));
    }

    #[test]
    fn test_window_sunday_target() {
        // 일요일 제출: 10일 구간은 직전 거래일들을 충분히 덮음
        let sunday = day(2025, 6, 22);
        let window = resolve_window(Some(sunday), day(2025, 6, 23), 10);

        assert_eq!(window.end, sunday);
        assert_eq!(window.start, day(2025, 6, 12));
    }

    #[test]
    fn test_window_zero_lookback_corrected() {
        let today = day(2025, 6, 20);
        let window = resolve_window(Some(today), today, 0);
        assert_eq!(window.start, day(2025, 6, 19));
    }

    proptest::proptest! {
        #[test]
        fn prop_window_end_never_future_and_span_exact(
            target_offset in -400i64..400,
            lookback in 1u32..60,
        ) {
            let today = day(2025, 6, 20);
            let target = today + Duration::days(target_offset);
            let window = resolve_window(Some(target), today, lookback);

            proptest::prop_assert!(window.end <= today);
            proptest::prop_assert_eq!(window.end, target.min(today));
            proptest::prop_assert_eq!(window.end - window.start, Duration::days(lookback as i64));
        }
    }
}
