//! Performance metric computation and risk scoring for campaigns.
//!
//! [`compute_metrics`] is a pure function from raw delivery counters to
//! normalized ratios; every denominator is floored so zero counters yield
//! zero metrics, never NaN or infinity.

pub mod risk;

use adpilot_core::types::{CampaignCounters, PerformanceMetrics};

pub use risk::{RiskAssessment, RiskScorer, RiskTier};

/// Denominator floor for ratio metrics.
const EPSILON: f64 = 1e-9;

/// `numerator / denominator` with the denominator floored; returns 0.0
/// when the denominator carries no data.
fn guarded_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator <= EPSILON {
        0.0
    } else {
        numerator / denominator
    }
}

/// Compute normalized performance metrics from raw counters.
pub fn compute_metrics(counters: &CampaignCounters) -> PerformanceMetrics {
    let impressions = counters.impressions as f64;
    let clicks = counters.clicks as f64;
    let conversions = counters.conversions as f64;

    PerformanceMetrics {
        roas: guarded_ratio(counters.revenue, counters.spend),
        ctr: guarded_ratio(clicks, impressions) * 100.0,
        cpc: guarded_ratio(counters.spend, clicks),
        conversion_rate: guarded_ratio(conversions, clicks) * 100.0,
        spend: counters.spend,
        revenue: counters.revenue,
        impressions: counters.impressions,
        clicks: counters.clicks,
        conversions: counters.conversions,
        frequency: guarded_ratio(impressions, counters.reach as f64),
        cpm: guarded_ratio(counters.spend, impressions) * 1000.0,
        cpa: guarded_ratio(counters.spend, conversions),
    }
}

/// Look up a metric by the name rules refer to it by.
pub fn metric_by_name(metrics: &PerformanceMetrics, name: &str) -> Option<f64> {
    match name {
        "roas" => Some(metrics.roas),
        "ctr" => Some(metrics.ctr),
        "cpc" => Some(metrics.cpc),
        "conversion_rate" | "cvr" => Some(metrics.conversion_rate),
        "spend" => Some(metrics.spend),
        "revenue" => Some(metrics.revenue),
        "impressions" => Some(metrics.impressions as f64),
        "clicks" => Some(metrics.clicks as f64),
        "conversions" => Some(metrics.conversions as f64),
        "frequency" => Some(metrics.frequency),
        "cpm" => Some(metrics.cpm),
        "cpa" => Some(metrics.cpa),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn counters(impressions: u64, clicks: u64, conversions: u64, spend: f64, revenue: f64) -> CampaignCounters {
        CampaignCounters {
            impressions,
            clicks,
            conversions,
            spend,
            revenue,
            reach: impressions / 2,
        }
    }

    // 1. Ratio correctness ---------------------------------------------------

    #[test]
    fn test_basic_ratios() {
        let m = compute_metrics(&counters(10_000, 200, 10, 100.0, 400.0));

        assert!((m.roas - 4.0).abs() < 1e-9);
        assert!((m.ctr - 2.0).abs() < 1e-9);
        assert!((m.cpc - 0.5).abs() < 1e-9);
        assert!((m.conversion_rate - 5.0).abs() < 1e-9);
        assert!((m.cpm - 10.0).abs() < 1e-9);
        assert!((m.cpa - 10.0).abs() < 1e-9);
        assert!((m.frequency - 2.0).abs() < 1e-9);
    }

    // 2. Zero counters never produce NaN/Infinity ----------------------------

    #[test]
    fn test_all_zero_counters_yield_finite_zeros() {
        let m = compute_metrics(&CampaignCounters::default());

        for v in [
            m.roas,
            m.ctr,
            m.cpc,
            m.conversion_rate,
            m.frequency,
            m.cpm,
            m.cpa,
        ] {
            assert!(v.is_finite());
            assert_eq!(v, 0.0);
        }
    }

    #[test]
    fn test_spend_without_clicks_is_finite() {
        let m = compute_metrics(&counters(1_000, 0, 0, 50.0, 0.0));
        assert!(m.cpc.is_finite());
        assert_eq!(m.cpc, 0.0);
        assert_eq!(m.conversion_rate, 0.0);
    }

    // 3. Metric lookup -------------------------------------------------------

    #[test]
    fn test_metric_by_name() {
        let m = compute_metrics(&counters(1_000, 50, 5, 25.0, 100.0));
        assert_eq!(metric_by_name(&m, "roas"), Some(4.0));
        assert_eq!(metric_by_name(&m, "clicks"), Some(50.0));
        assert_eq!(metric_by_name(&m, "nope"), None);
    }
}
