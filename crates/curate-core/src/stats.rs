//! Derived curation metrics.
//!
//! Everything here is a pure function of [`ProductCounts`]. The flags are
//! presentation hints only; nothing in scheduling or transitions reads them.

use serde::{Deserialize, Serialize};

use crate::ProductCounts;

/// Rejection rate above which the dashboard raises the "high rejection" badge.
pub const HIGH_REJECTION_THRESHOLD: f64 = 0.20;

/// Average-confidence movement smaller than this is reported as steady.
pub const CONFIDENCE_TREND_EPSILON: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfidenceTrend {
    Rising,
    Falling,
    Steady,
    #[default]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CurationStats {
    pub completion_rate: f64,
    pub rejection_rate: f64,
    pub high_rejection: bool,
    pub needs_attention: bool,
    pub confidence_trend: ConfidenceTrend,
    pub avg_confidence: Option<f64>,
    pub daily_velocity: f64,
    pub today_curated: u64,
    pub week_curated: u64,
    pub month_curated: u64,
}

fn ratio(numerator: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (numerator as f64 / total as f64).clamp(0.0, 1.0)
}

pub fn confidence_trend(current: Option<f64>, previous: Option<f64>) -> ConfidenceTrend {
    match (current, previous) {
        (Some(now), Some(before)) if now.is_finite() && before.is_finite() => {
            let delta = now - before;
            if delta.abs() < CONFIDENCE_TREND_EPSILON {
                ConfidenceTrend::Steady
            } else if delta > 0.0 {
                ConfidenceTrend::Rising
            } else {
                ConfidenceTrend::Falling
            }
        }
        _ => ConfidenceTrend::Unknown,
    }
}

/// Compute the dashboard metrics for `counts`, using `previous` (the counts of
/// the prior snapshot, if any) for the confidence trend.
pub fn aggregate(counts: &ProductCounts, previous: Option<&ProductCounts>) -> CurationStats {
    let completion_rate = ratio(counts.curated.saturating_add(counts.sent_to_pim), counts.total);
    let rejection_rate = ratio(counts.rejected, counts.total);
    let avg_confidence = counts.avg_confidence.filter(|v| v.is_finite());

    CurationStats {
        completion_rate,
        rejection_rate,
        high_rejection: rejection_rate > HIGH_REJECTION_THRESHOLD,
        needs_attention: counts.pending > 0,
        confidence_trend: confidence_trend(
            avg_confidence,
            previous.and_then(|p| p.avg_confidence),
        ),
        avg_confidence,
        daily_velocity: counts.week_curated as f64 / 7.0,
        today_curated: counts.today_curated,
        week_curated: counts.week_curated,
        month_curated: counts.month_curated,
    }
}
