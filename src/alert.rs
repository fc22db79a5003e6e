use crate::bins::{Bucket, TimeBin};

#[derive(Clone, Debug, PartialEq)]
pub struct Evaluation {
    /// Ascending by start.
    pub bins: Vec<TimeBin>,
    pub attack_detected: bool,
    pub first_alert_bin: Option<f64>,
    pub last_alert_bin: Option<f64>,
}

fn is_alert(count: u64, threshold: i64) -> bool {
    i64::try_from(count).map_or(true, |count| count >= threshold)
}

/// Flag every bucket whose count reaches `threshold`.
///
/// A non-positive threshold flags every bucket.
pub fn evaluate(mut buckets: Vec<Bucket>, threshold: i64) -> Evaluation {
    buckets.sort_by(|a, b| a.start.total_cmp(&b.start));

    let bins: Vec<TimeBin> = buckets
        .into_iter()
        .map(|bucket| TimeBin {
            alert: is_alert(bucket.count, threshold),
            start: bucket.start,
            count: bucket.count,
            unique_sources: bucket.unique_sources,
            top_sources: bucket.top_sources,
        })
        .collect();

    let mut alerts = bins.iter().filter(|bin| bin.alert).map(|bin| bin.start);
    let first_alert_bin = alerts.next();
    let last_alert_bin = alerts.last().or(first_alert_bin);

    Evaluation {
        attack_detected: first_alert_bin.is_some(),
        bins,
        first_alert_bin,
        last_alert_bin,
    }
}
