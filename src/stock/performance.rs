//! Price-change arithmetic over a daily series.

use chrono::{Duration, NaiveDate};

use super::DailySeries;
use crate::scheduler::DATE_FORMAT;

/// How far (in days) to look around a target date for a trading day.
const MAX_DATE_DISTANCE: i64 = 6;

/// Finds the trading day closest to `target`.
///
/// Tries the target itself, then `+1, -1, +2, -2, ...` up to six days away,
/// so a later day wins a tie.
pub fn find_nearest_valid_date(series: &DailySeries, target: NaiveDate) -> Option<String> {
    for delta in 0..=MAX_DATE_DISTANCE {
        for sign in [1, -1] {
            if delta == 0 && sign == -1 {
                continue;
            }
            let candidate = (target + Duration::days(sign * delta))
                .format(DATE_FORMAT)
                .to_string();
            if series.contains_key(&candidate) {
                return Some(candidate);
            }
        }
    }
    None
}

/// Closing price on the trading day nearest `target`.
pub fn nearest_close(series: &DailySeries, target: NaiveDate) -> Option<f64> {
    let day = find_nearest_valid_date(series, target)?;
    series.get(&day)?.close_price()
}

/// Percentage change of the close between `first_day` and `last_day`.
///
/// Missing days, unparsable prices and a zero start price give `0.0`.
pub fn calculate_performance(series: &DailySeries, first_day: NaiveDate, last_day: NaiveDate) -> f64 {
    let (Some(start), Some(end)) = (
        nearest_close(series, first_day),
        nearest_close(series, last_day),
    ) else {
        return 0.0;
    };

    if start == 0.0 {
        return 0.0;
    }

    let change = (end - start) / start * 100.0;
    if change.is_finite() {
        change
    } else {
        0.0
    }
}
