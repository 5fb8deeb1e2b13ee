//! Rule evaluation — gates each rule on activity, execution cap, and
//! cooldown, then applies its action bounded by the rule's own
//! `max_change` and the engine-wide swing caps.

use crate::types::{
    OptimizationRule, OptimizationStrategy, ProposedChange, RuleAction, RuleActionKind,
    RuleActionUnit,
};
use adpilot_core::config::GlobalSettings;
use adpilot_core::types::{CampaignSnapshot, JobPriority, OptimizationType, PerformanceMetrics};
use adpilot_metrics::metric_by_name;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::{debug, warn};
use uuid::Uuid;

/// A rule whose condition held: the proposed change plus enough context
/// for the aggregator to turn it into a job. Producing a firing does not
/// consume the rule's budget; the caller confirms with
/// [`RuleEngine::mark_fired`] once a job has actually been created.
#[derive(Debug, Clone)]
pub struct RuleFiring {
    pub rule_id: Uuid,
    pub rule_name: String,
    pub rule_type: OptimizationType,
    pub shop: String,
    pub campaign_id: String,
    pub priority: JobPriority,
    pub current_value: f64,
    pub proposed: ProposedChange,
    pub confidence: f64,
    pub reasoning: String,
}

/// Evaluates per-shop strategies against live campaign metrics.
pub struct RuleEngine {
    strategies: DashMap<String, Vec<OptimizationStrategy>>,
}

impl RuleEngine {
    pub fn new() -> Self {
        Self {
            strategies: DashMap::new(),
        }
    }

    /// Load a shop's strategies, dropping malformed rules. A bad rule is
    /// logged and skipped; the rest of the strategy still runs.
    ///
    /// Reloading preserves runtime execution state (counts, cooldown
    /// timestamps) for rules whose id survives, so a config refresh
    /// between cycles cannot launder a cooldown or an exhausted cap.
    pub fn load_strategies(&self, shop: &str, mut strategies: Vec<OptimizationStrategy>) {
        for strategy in &mut strategies {
            strategy.rules.retain(|rule| match validate_rule(rule) {
                Ok(()) => true,
                Err(reason) => {
                    warn!(
                        shop = %shop,
                        rule = %rule.name,
                        rule_id = %rule.id,
                        %reason,
                        "Skipping malformed rule"
                    );
                    false
                }
            });
        }

        let prior_state: Vec<(Uuid, u32, Option<DateTime<Utc>>)> = self
            .strategies
            .get(shop)
            .map(|existing| {
                existing
                    .iter()
                    .flat_map(|s| s.rules.iter())
                    .map(|r| (r.id, r.execution_count, r.last_executed_at))
                    .collect()
            })
            .unwrap_or_default();
        for strategy in &mut strategies {
            for rule in &mut strategy.rules {
                if let Some((_, count, last)) =
                    prior_state.iter().find(|(id, _, _)| *id == rule.id)
                {
                    rule.execution_count = rule.execution_count.max(*count);
                    rule.last_executed_at = rule.last_executed_at.max(*last);
                }
            }
        }
        self.strategies.insert(shop.to_string(), strategies);
    }

    /// Evaluate every eligible rule against the campaign's current metrics.
    pub fn evaluate_campaign(
        &self,
        shop: &str,
        campaign: &CampaignSnapshot,
        metrics: &PerformanceMetrics,
        settings: &GlobalSettings,
    ) -> Vec<RuleFiring> {
        self.evaluate_campaign_at(Utc::now(), shop, campaign, metrics, settings)
    }

    pub fn evaluate_campaign_at(
        &self,
        now: DateTime<Utc>,
        shop: &str,
        campaign: &CampaignSnapshot,
        metrics: &PerformanceMetrics,
        settings: &GlobalSettings,
    ) -> Vec<RuleFiring> {
        let strategies = match self.strategies.get(shop) {
            Some(s) => s,
            None => return Vec::new(),
        };

        let mut firings = Vec::new();
        for strategy in strategies.iter().filter(|s| s.is_active) {
            for rule in &strategy.rules {
                if !rule.is_active || rule.is_exhausted() || !rule.cooldown_elapsed(now) {
                    continue;
                }

                let value = match metric_by_name(metrics, &rule.condition.metric) {
                    Some(v) => v,
                    None => continue,
                };
                if !rule.condition.operator.compare(value, rule.condition.threshold) {
                    continue;
                }

                let current_value = match rule.rule_type {
                    OptimizationType::Bid => campaign.bid_amount,
                    _ => campaign.daily_budget,
                };
                let proposed =
                    apply_action(&rule.action, rule.rule_type, current_value, settings);

                debug!(
                    shop = %shop,
                    campaign_id = %campaign.campaign_id,
                    rule = %rule.name,
                    metric = %rule.condition.metric,
                    value,
                    "Rule condition met"
                );

                firings.push(RuleFiring {
                    rule_id: rule.id,
                    rule_name: rule.name.clone(),
                    rule_type: rule.rule_type,
                    shop: shop.to_string(),
                    campaign_id: campaign.campaign_id.clone(),
                    priority: rule.priority,
                    current_value,
                    proposed,
                    confidence: volume_confidence(
                        metrics.impressions,
                        rule.condition.min_data_points,
                    ),
                    reasoning: format!(
                        "Rule '{}': {} {} {:.2} (observed {:.2})",
                        rule.name,
                        rule.condition.metric,
                        operator_symbol(rule),
                        rule.condition.threshold,
                        value
                    ),
                });
            }
        }
        firings
    }

    /// Consume the rule's execution budget after its job was created.
    /// Called only once a job exists, so a failed job creation never
    /// burns the rule's cap or restarts its cooldown.
    pub fn mark_fired(&self, shop: &str, rule_id: Uuid) {
        self.mark_fired_at(Utc::now(), shop, rule_id);
    }

    pub fn mark_fired_at(&self, now: DateTime<Utc>, shop: &str, rule_id: Uuid) {
        if let Some(mut strategies) = self.strategies.get_mut(shop) {
            for strategy in strategies.iter_mut() {
                for rule in &mut strategy.rules {
                    if rule.id == rule_id {
                        rule.execution_count += 1;
                        rule.last_executed_at = Some(now);
                        return;
                    }
                }
            }
        }
    }

    /// Operator reset: the only way out of the `Exhausted` state.
    pub fn reset_rule(&self, shop: &str, rule_id: Uuid) {
        if let Some(mut strategies) = self.strategies.get_mut(shop) {
            for strategy in strategies.iter_mut() {
                for rule in &mut strategy.rules {
                    if rule.id == rule_id {
                        rule.execution_count = 0;
                        rule.last_executed_at = None;
                        return;
                    }
                }
            }
        }
    }
}

impl Default for RuleEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Apply the rule's action to the current value, bounded by the rule's
/// `max_change` and the engine-wide per-type swing cap.
fn apply_action(
    action: &RuleAction,
    rule_type: OptimizationType,
    current: f64,
    settings: &GlobalSettings,
) -> ProposedChange {
    match action.kind {
        RuleActionKind::Pause => return ProposedChange::Pause,
        RuleActionKind::Activate => return ProposedChange::Activate,
        RuleActionKind::Test => return ProposedChange::Test,
        RuleActionKind::Increase | RuleActionKind::Decrease | RuleActionKind::Set => {}
    }

    let raw = match (action.kind, action.unit) {
        (RuleActionKind::Increase, RuleActionUnit::Percentage) => {
            current * (1.0 + action.magnitude)
        }
        (RuleActionKind::Decrease, RuleActionUnit::Percentage) => {
            current * (1.0 - action.magnitude)
        }
        (RuleActionKind::Increase, RuleActionUnit::Absolute) => current + action.magnitude,
        (RuleActionKind::Decrease, RuleActionUnit::Absolute) => current - action.magnitude,
        (_, RuleActionUnit::Multiplier) => current * action.magnitude,
        (RuleActionKind::Set, _) => action.magnitude,
        _ => current,
    };

    let global_cap = match rule_type {
        OptimizationType::Budget => settings.max_budget_change_pct,
        OptimizationType::Bid => settings.max_bid_change_pct,
        _ => settings.max_budget_change_pct,
    };
    let cap = action.max_change.min(global_cap);

    let bounded = raw
        .clamp(current * (1.0 - cap), current * (1.0 + cap))
        .max(0.0);
    ProposedChange::SetValue(bounded)
}

/// Map data volume to confidence; thin campaigns get a score below the
/// aggregator's default threshold instead of an error.
fn volume_confidence(impressions: u64, min_data_points: u64) -> f64 {
    if min_data_points == 0 {
        return 0.9;
    }
    let ratio = (impressions as f64 / min_data_points as f64).min(1.0);
    0.4 + 0.5 * ratio
}

fn validate_rule(rule: &OptimizationRule) -> Result<(), String> {
    if rule.condition.metric.is_empty()
        || metric_by_name(&PerformanceMetrics::default(), &rule.condition.metric).is_none()
    {
        return Err(format!("unknown metric '{}'", rule.condition.metric));
    }
    if !rule.condition.threshold.is_finite() {
        return Err("non-finite threshold".to_string());
    }
    if rule.cooldown_hours < 0 {
        return Err("negative cooldown".to_string());
    }
    if rule.max_executions == 0 {
        return Err("max_executions must be at least 1".to_string());
    }
    match rule.action.kind {
        RuleActionKind::Increase | RuleActionKind::Decrease | RuleActionKind::Set => {
            if !(rule.action.magnitude.is_finite() && rule.action.magnitude > 0.0) {
                return Err("non-positive magnitude".to_string());
            }
            if !(rule.action.max_change.is_finite() && rule.action.max_change > 0.0) {
                return Err("non-positive max_change".to_string());
            }
        }
        _ => {}
    }
    Ok(())
}

fn operator_symbol(rule: &OptimizationRule) -> &'static str {
    use crate::types::ConditionOperator::*;
    match rule.condition.operator {
        GreaterThan => ">",
        LessThan => "<",
        GreaterOrEqual => ">=",
        LessOrEqual => "<=",
        Equal => "==",
        NotEqual => "!=",
    }
}
