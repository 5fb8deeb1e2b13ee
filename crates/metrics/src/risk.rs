//! Risk scoring — blends live metrics with an optional predictive risk
//! estimate and exposes the emergency-pause predicate.

use adpilot_core::config::GlobalSettings;
use adpilot_core::types::PerformanceMetrics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskTier {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskAssessment {
    pub score: f64,
    pub tier: RiskTier,
    pub emergency_pause: bool,
    pub evaluated_at: DateTime<Utc>,
}

/// Cut points are tunable policy, not a hard contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskScorer {
    pub high_cutoff: f64,
    pub medium_cutoff: f64,
}

impl Default for RiskScorer {
    fn default() -> Self {
        Self {
            high_cutoff: 0.7,
            medium_cutoff: 0.4,
        }
    }
}

impl RiskScorer {
    /// Combine live metrics and an optional model-supplied risk estimate
    /// into a bounded 0–1 score plus the emergency-pause predicate.
    ///
    /// The emergency predicate must be checked before any rule or agent
    /// logic each cycle: `roas < emergency_pause_roas && spend >
    /// emergency_min_spend` bypasses cooldowns entirely.
    pub fn assess(
        &self,
        metrics: &PerformanceMetrics,
        predicted_risk: Option<f64>,
        settings: &GlobalSettings,
    ) -> RiskAssessment {
        let mut score: f64 = 0.0;

        // Losing money is the dominant signal.
        if metrics.spend > 0.0 && metrics.roas < 1.0 {
            score += 0.4 * (1.0 - metrics.roas).clamp(0.0, 1.0);
        }
        // Weak engagement relative to a ~1% CTR baseline.
        if metrics.impressions > 1_000 && metrics.ctr < 1.0 {
            score += 0.2 * (1.0 - metrics.ctr).clamp(0.0, 1.0);
        }
        // Creative fatigue.
        if metrics.frequency > 3.0 {
            score += 0.1 * ((metrics.frequency - 3.0) / 3.0).clamp(0.0, 1.0);
        }
        // No conversions despite meaningful click volume.
        if metrics.clicks > 50 && metrics.conversions == 0 {
            score += 0.15;
        }

        if let Some(model_risk) = predicted_risk {
            score = 0.6 * score + 0.4 * model_risk.clamp(0.0, 1.0);
        }

        let score = score.clamp(0.0, 1.0);
        let tier = if score >= self.high_cutoff {
            RiskTier::High
        } else if score >= self.medium_cutoff {
            RiskTier::Medium
        } else {
            RiskTier::Low
        };

        RiskAssessment {
            score,
            tier,
            emergency_pause: metrics.roas < settings.emergency_pause_roas
                && metrics.spend > settings.emergency_min_spend,
            evaluated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn metrics(roas: f64, spend: f64) -> PerformanceMetrics {
        PerformanceMetrics {
            roas,
            spend,
            ..Default::default()
        }
    }

    // 1. Emergency predicate -------------------------------------------------

    #[test]
    fn test_emergency_pause_requires_both_conditions() {
        let scorer = RiskScorer::default();
        let settings = GlobalSettings::default(); // roas < 0.5 && spend > 100

        assert!(scorer.assess(&metrics(0.3, 150.0), None, &settings).emergency_pause);
        // Low ROAS but not enough spend
        assert!(!scorer.assess(&metrics(0.3, 50.0), None, &settings).emergency_pause);
        // Enough spend but healthy ROAS
        assert!(!scorer.assess(&metrics(2.0, 500.0), None, &settings).emergency_pause);
    }

    #[test]
    fn test_emergency_pause_boundary_is_strict() {
        let scorer = RiskScorer::default();
        let settings = GlobalSettings::default();

        // roas == threshold is not below it; spend == guard is not above it
        assert!(!scorer.assess(&metrics(0.5, 150.0), None, &settings).emergency_pause);
        assert!(!scorer.assess(&metrics(0.3, 100.0), None, &settings).emergency_pause);
    }

    // 2. Score bounds and tiers ----------------------------------------------

    #[test]
    fn test_score_bounded_and_tiered() {
        let scorer = RiskScorer::default();
        let settings = GlobalSettings::default();

        let bad = PerformanceMetrics {
            roas: 0.0,
            spend: 1_000.0,
            impressions: 100_000,
            ctr: 0.1,
            clicks: 200,
            conversions: 0,
            frequency: 9.0,
            ..Default::default()
        };
        let a = scorer.assess(&bad, Some(1.0), &settings);
        assert!(a.score <= 1.0);
        assert_eq!(a.tier, RiskTier::High);

        let healthy = scorer.assess(&metrics(4.0, 100.0), None, &settings);
        assert_eq!(healthy.tier, RiskTier::Low);
    }

    #[test]
    fn test_predicted_risk_blends_in() {
        let scorer = RiskScorer::default();
        let settings = GlobalSettings::default();
        let m = metrics(4.0, 100.0);

        let without = scorer.assess(&m, None, &settings);
        let with = scorer.assess(&m, Some(1.0), &settings);
        assert!(with.score > without.score);
    }
}
