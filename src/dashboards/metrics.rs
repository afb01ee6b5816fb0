use chrono::{DateTime, Duration, FixedOffset, NaiveDate, Offset, Utc};
use serde::{Deserialize, Serialize};

use crate::core::shared::models::Stage;

pub const DAY_BUCKETS: i64 = 7;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageCount {
    pub stage: i32,
    pub label: String,
    pub count: usize,
    /// Percentage of the previous stage's count; `None` for the first stage or
    /// when the previous stage is empty.
    pub conversion_from_previous: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunnelReport {
    pub stages: Vec<StageCount>,
    pub total: usize,
    pub qualified: usize,
    pub closed: usize,
    pub qualification_rate: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DayBucket {
    pub date: NaiveDate,
    pub count: usize,
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Counts leads per stage from their stored ordinals.
pub fn funnel<I>(stored_stages: I) -> FunnelReport
where
    I: IntoIterator<Item = Option<i32>>,
{
    let mut counts = [0usize; 4];
    for stored in stored_stages {
        let stage = Stage::from_stored(stored);
        counts[(stage.ordinal() - 1) as usize] += 1;
    }

    let stages = Stage::ALL
        .iter()
        .enumerate()
        .map(|(i, stage)| {
            let conversion_from_previous = match i {
                0 => None,
                _ if counts[i - 1] == 0 => None,
                _ => Some(round2(counts[i] as f64 / counts[i - 1] as f64 * 100.0)),
            };
            StageCount {
                stage: stage.ordinal(),
                label: stage.label().to_string(),
                count: counts[i],
                conversion_from_previous,
            }
        })
        .collect();

    let total: usize = counts.iter().sum();
    let qualified = counts[2] + counts[3];
    let closed = counts[3];
    let qualification_rate = if total == 0 {
        0
    } else {
        (qualified as f64 / total as f64 * 100.0).round() as u32
    };

    FunnelReport {
        stages,
        total,
        qualified,
        closed,
        qualification_rate,
    }
}

/// Seven day buckets ending today in the viewer's offset, oldest first.
/// `None` entries (timestamps that failed to parse) are skipped, as are
/// timestamps outside the window.
pub fn day_buckets<I>(timestamps: I, now: DateTime<Utc>, offset: FixedOffset) -> Vec<DayBucket>
where
    I: IntoIterator<Item = Option<DateTime<Utc>>>,
{
    let today = now.with_timezone(&offset).date_naive();
    let first = today - Duration::days(DAY_BUCKETS - 1);
    let mut buckets: Vec<DayBucket> = (0..DAY_BUCKETS)
        .map(|i| DayBucket {
            date: first + Duration::days(i),
            count: 0,
        })
        .collect();

    for ts in timestamps.into_iter().flatten() {
        let day = ts.with_timezone(&offset).date_naive();
        let index = (day - first).num_days();
        if (0..DAY_BUCKETS).contains(&index) {
            buckets[index as usize].count += 1;
        }
    }
    buckets
}

/// Builds an offset from minutes east of UTC, falling back to UTC when out of range.
pub fn viewer_offset(minutes: Option<i32>) -> FixedOffset {
    minutes
        .and_then(|m| m.checked_mul(60))
        .and_then(FixedOffset::east_opt)
        .unwrap_or_else(|| Utc.fix())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::shared::utils::parse_timestamp;
    use chrono::TimeZone;

    #[test]
    fn test_funnel_counts_sum_and_default_bucket() {
        let stages = vec![None, Some(0), Some(7), Some(1), Some(2), Some(3), Some(4), Some(4)];
        let report = funnel(stages.clone());

        let sum: usize = report.stages.iter().map(|s| s.count).sum();
        assert_eq!(sum, stages.len());
        assert_eq!(report.total, stages.len());
        assert_eq!(report.stages[0].count, 4);
        assert_eq!(report.qualified, 3);
        assert_eq!(report.closed, 2);
        assert_eq!(report.qualification_rate, 38);
    }

    #[test]
    fn test_conversion_none_when_previous_empty() {
        let report = funnel(vec![Some(1), Some(3)]);
        assert_eq!(report.stages[0].conversion_from_previous, None);
        assert_eq!(report.stages[1].conversion_from_previous, Some(0.0));
        assert_eq!(report.stages[2].conversion_from_previous, None);
        assert_eq!(report.stages[3].conversion_from_previous, Some(0.0));
    }

    #[test]
    fn test_rate_bounds() {
        assert_eq!(funnel(Vec::<Option<i32>>::new()).qualification_rate, 0);
        assert_eq!(funnel(vec![Some(4), Some(3)]).qualification_rate, 100);
        assert_eq!(funnel(vec![Some(1), Some(2)]).qualification_rate, 0);
    }

    #[test]
    fn test_day_buckets_cover_today_and_six_before() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 12, 0, 0).unwrap();
        let raw = [
            "2024-05-10T08:00:00Z",
            "2024-05-04T00:00:00Z",
            "2024-05-03T23:59:59Z",
            "not a date",
            "1715342400",
        ];
        let buckets = day_buckets(raw.iter().map(|s| parse_timestamp(s)), now, viewer_offset(None));

        assert_eq!(buckets.len(), 7);
        assert_eq!(buckets[6].date, NaiveDate::from_ymd_opt(2024, 5, 10).unwrap());
        assert_eq!(buckets[0].date, NaiveDate::from_ymd_opt(2024, 5, 4).unwrap());
        assert_eq!(buckets[6].count, 2);
        assert_eq!(buckets[0].count, 1);
        assert_eq!(buckets.iter().map(|b| b.count).sum::<usize>(), 3);
    }

    #[test]
    fn test_day_buckets_respect_offset() {
        let now = Utc.with_ymd_and_hms(2024, 5, 10, 1, 0, 0).unwrap();
        let sao_paulo = viewer_offset(Some(-180));
        let buckets = day_buckets(vec![Some(now)], now, sao_paulo);
        assert_eq!(buckets[6].date, NaiveDate::from_ymd_opt(2024, 5, 9).unwrap());
        assert_eq!(buckets[6].count, 1);
    }
}
