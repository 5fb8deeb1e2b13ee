//! Recommendation merging — one tagged union for the three candidate
//! sources, a single normalization function, and the confidence-filtered
//! priority ranking that feeds job creation.

use crate::ports::Prediction;
use adpilot_core::config::GlobalSettings;
use adpilot_core::types::{CampaignSnapshot, JobPriority, OptimizationType, PerformanceMetrics};
use adpilot_rl_engine::agent::{ActionSelection, AgentAction};
use adpilot_rules::engine::RuleFiring;
use adpilot_rules::types::ProposedChange;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// The concrete mutation a job will perform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlannedAction {
    SetBudget(f64),
    SetBid(f64),
    AdjustAudience(String),
    RotateCreative(String),
    UpdateSchedule(String),
    UpdatePlacement(String),
    Pause,
    Activate,
}

/// A candidate recommendation, discriminated by source. Each variant
/// carries only what its producer actually knows.
#[derive(Debug, Clone)]
pub enum Recommendation {
    Rule(RuleFiring),
    Rl {
        shop: String,
        campaign_id: String,
        selection: ActionSelection,
        /// Bandit-ranked creative to rotate in, when the selected action
        /// is a rotation and the campaign has variants.
        creative_variant: Option<String>,
    },
    Predictive {
        shop: String,
        campaign_id: String,
        optimization_type: OptimizationType,
        planned: PlannedAction,
        current_value: f64,
        confidence: f64,
        expected_improvement: f64,
        reasoning: String,
    },
}

/// The common shape every source is reduced to before aggregation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NormalizedRecommendation {
    pub shop: String,
    pub campaign_id: String,
    pub optimization_type: OptimizationType,
    pub priority: JobPriority,
    pub planned: PlannedAction,
    pub current_value: String,
    pub recommended_value: String,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// Set for rule-sourced items so the engine's execution budget is
    /// only consumed once a job exists.
    pub rule_id: Option<Uuid>,
    /// Set for agent-sourced items so executed outcomes can be fed back
    /// as rewards.
    pub agent_action: Option<AgentAction>,
}

/// Reduce any source's candidate to the common shape.
pub fn normalize(
    rec: Recommendation,
    campaign: &CampaignSnapshot,
    settings: &GlobalSettings,
) -> NormalizedRecommendation {
    match rec {
        Recommendation::Rule(firing) => {
            let planned = plan_from_proposed(&firing.proposed, firing.rule_type);
            let current = firing.current_value;
            NormalizedRecommendation {
                shop: firing.shop,
                campaign_id: firing.campaign_id,
                optimization_type: firing.rule_type,
                priority: firing.priority,
                current_value: format_value(&planned, current, true),
                recommended_value: format_value(&planned, current, false),
                expected_improvement: improvement_estimate(&planned, current),
                confidence: firing.confidence,
                reasoning: firing.reasoning,
                rule_id: Some(firing.rule_id),
                agent_action: None,
                planned,
            }
        }
        Recommendation::Rl {
            shop,
            campaign_id,
            selection,
            creative_variant,
        } => {
            let (planned, current) =
                plan_from_agent(&selection, campaign, settings, creative_variant);
            NormalizedRecommendation {
                shop,
                campaign_id,
                optimization_type: selection.optimization_type,
                priority: if selection.action == AgentAction::PauseCampaign {
                    JobPriority::High
                } else {
                    JobPriority::Medium
                },
                current_value: format_value(&planned, current, true),
                recommended_value: format_value(&planned, current, false),
                expected_improvement: selection.expected_reward.max(0.0),
                confidence: selection.confidence,
                reasoning: format!(
                    "Agent {} ({}, magnitude {:.2}, expected reward {:.3})",
                    selection.action.key(),
                    if selection.explored { "exploring" } else { "exploiting" },
                    selection.magnitude,
                    selection.expected_reward
                ),
                rule_id: None,
                agent_action: Some(selection.action),
                planned,
            }
        }
        Recommendation::Predictive {
            shop,
            campaign_id,
            optimization_type,
            planned,
            current_value,
            confidence,
            expected_improvement,
            reasoning,
        } => NormalizedRecommendation {
            shop,
            campaign_id,
            optimization_type,
            priority: JobPriority::Medium,
            current_value: format_value(&planned, current_value, true),
            recommended_value: format_value(&planned, current_value, false),
            expected_improvement,
            confidence,
            reasoning,
            rule_id: None,
            agent_action: None,
            planned,
        },
    }
}

/// Turn the optional predictive signal into at most one candidate.
pub fn predictive_recommendation(
    shop: &str,
    campaign: &CampaignSnapshot,
    metrics: &PerformanceMetrics,
    prediction: &Prediction,
    settings: &GlobalSettings,
) -> Option<Recommendation> {
    if prediction.risk_score > 0.7 {
        let target = (campaign.daily_budget * 0.8)
            .max(campaign.daily_budget * (1.0 - settings.max_budget_change_pct));
        return Some(Recommendation::Predictive {
            shop: shop.to_string(),
            campaign_id: campaign.campaign_id.clone(),
            optimization_type: OptimizationType::Budget,
            planned: PlannedAction::SetBudget(target),
            current_value: campaign.daily_budget,
            confidence: prediction.confidence,
            expected_improvement: prediction.risk_score * 0.2,
            reasoning: format!(
                "Model risk {:.2} above 0.70; scaling budget back",
                prediction.risk_score
            ),
        });
    }
    if metrics.roas > 0.0 && prediction.predicted_roas > metrics.roas * 1.2 {
        let target = (campaign.daily_budget * 1.1)
            .min(campaign.daily_budget * (1.0 + settings.max_budget_change_pct));
        return Some(Recommendation::Predictive {
            shop: shop.to_string(),
            campaign_id: campaign.campaign_id.clone(),
            optimization_type: OptimizationType::Budget,
            planned: PlannedAction::SetBudget(target),
            current_value: campaign.daily_budget,
            confidence: prediction.confidence,
            expected_improvement: (prediction.predicted_roas / metrics.roas - 1.0).min(1.0),
            reasoning: format!(
                "Model projects ROAS {:.2} vs current {:.2}",
                prediction.predicted_roas, metrics.roas
            ),
        });
    }
    None
}

/// Confidence filter, `(campaign, type)` dedupe keeping the most
/// confident item, then rank by `priority weight x confidence`
/// descending (stable, so creation order breaks ties).
pub fn aggregate(
    recs: Vec<NormalizedRecommendation>,
    min_confidence: f64,
) -> Vec<NormalizedRecommendation> {
    let mut kept: Vec<NormalizedRecommendation> = Vec::new();
    for rec in recs {
        if rec.confidence < min_confidence {
            continue;
        }
        match kept.iter_mut().find(|k| {
            k.campaign_id == rec.campaign_id && k.optimization_type == rec.optimization_type
        }) {
            Some(existing) => {
                if rec.confidence > existing.confidence {
                    *existing = rec;
                }
            }
            None => kept.push(rec),
        }
    }

    kept.sort_by(|a, b| {
        let score_a = a.priority.weight() * a.confidence;
        let score_b = b.priority.weight() * b.confidence;
        score_b
            .partial_cmp(&score_a)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    kept
}

fn plan_from_proposed(proposed: &ProposedChange, rule_type: OptimizationType) -> PlannedAction {
    match proposed {
        ProposedChange::Pause => PlannedAction::Pause,
        ProposedChange::Activate => PlannedAction::Activate,
        ProposedChange::Test => match rule_type {
            OptimizationType::Audience => PlannedAction::AdjustAudience("test_split".to_string()),
            _ => PlannedAction::RotateCreative("test_variant".to_string()),
        },
        ProposedChange::SetValue(v) => match rule_type {
            OptimizationType::Budget => PlannedAction::SetBudget(*v),
            OptimizationType::Bid => PlannedAction::SetBid(*v),
            OptimizationType::Audience => {
                PlannedAction::AdjustAudience(format!("scale:{:.2}", v))
            }
            OptimizationType::Creative => {
                PlannedAction::RotateCreative(format!("refresh:{:.2}", v))
            }
            OptimizationType::Schedule => {
                PlannedAction::UpdateSchedule(format!("target:{:.2}", v))
            }
            OptimizationType::Placement => {
                PlannedAction::UpdatePlacement(format!("target:{:.2}", v))
            }
        },
    }
}

fn plan_from_agent(
    selection: &ActionSelection,
    campaign: &CampaignSnapshot,
    settings: &GlobalSettings,
    creative_variant: Option<String>,
) -> (PlannedAction, f64) {
    let m = selection.magnitude;
    match selection.action {
        AgentAction::IncreaseBudget => {
            let target = campaign.daily_budget
                * (1.0 + m.min(settings.max_budget_change_pct));
            (PlannedAction::SetBudget(target), campaign.daily_budget)
        }
        AgentAction::DecreaseBudget => {
            let target = campaign.daily_budget
                * (1.0 - m.min(settings.max_budget_change_pct));
            (PlannedAction::SetBudget(target.max(0.0)), campaign.daily_budget)
        }
        AgentAction::IncreaseBid => {
            let target = campaign.bid_amount * (1.0 + m.min(settings.max_bid_change_pct));
            (PlannedAction::SetBid(target), campaign.bid_amount)
        }
        AgentAction::DecreaseBid => {
            let target = campaign.bid_amount * (1.0 - m.min(settings.max_bid_change_pct));
            (PlannedAction::SetBid(target.max(0.0)), campaign.bid_amount)
        }
        AgentAction::RotateCreative => (
            PlannedAction::RotateCreative(
                creative_variant.unwrap_or_else(|| "agent_rotation".to_string()),
            ),
            campaign.daily_budget,
        ),
        AgentAction::NarrowAudience => (
            PlannedAction::AdjustAudience("narrow".to_string()),
            campaign.daily_budget,
        ),
        AgentAction::PauseCampaign => (PlannedAction::Pause, campaign.daily_budget),
    }
}

fn format_value(planned: &PlannedAction, current: f64, is_current: bool) -> String {
    if is_current {
        return format!("{:.2}", current);
    }
    match planned {
        PlannedAction::SetBudget(v) | PlannedAction::SetBid(v) => format!("{:.2}", v),
        PlannedAction::AdjustAudience(d)
        | PlannedAction::RotateCreative(d)
        | PlannedAction::UpdateSchedule(d)
        | PlannedAction::UpdatePlacement(d) => d.clone(),
        PlannedAction::Pause => "PAUSED".to_string(),
        PlannedAction::Activate => "ACTIVE".to_string(),
    }
}

fn improvement_estimate(planned: &PlannedAction, current: f64) -> f64 {
    match planned {
        PlannedAction::SetBudget(v) | PlannedAction::SetBid(v) => {
            if current > f64::EPSILON {
                ((v - current) / current).abs()
            } else {
                0.0
            }
        }
        PlannedAction::Pause => 0.0,
        _ => 0.05,
    }
}
