use adpilot_core::types::{JobPriority, OptimizationType};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single declarative optimization rule.
///
/// Invariants: `execution_count <= max_executions`, and a rule that has
/// reached the cap is inert until an operator resets it; a rule may not
/// fire again until `cooldown_hours` have elapsed since `last_executed_at`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationRule {
    pub id: Uuid,
    pub name: String,
    pub rule_type: OptimizationType,
    pub condition: RuleCondition,
    pub action: RuleAction,
    pub is_active: bool,
    pub priority: JobPriority,
    pub cooldown_hours: i64,
    pub max_executions: u32,
    #[serde(default)]
    pub execution_count: u32,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    /// Metric name as exposed by `adpilot_metrics::metric_by_name`.
    pub metric: String,
    pub operator: ConditionOperator,
    pub threshold: f64,
    /// Evaluation window the counters are expected to cover. Advisory.
    pub timeframe_hours: u32,
    /// Minimum impressions before the rule's output is trustworthy;
    /// campaigns below it get low confidence rather than an error.
    pub min_data_points: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    #[serde(rename = ">")]
    GreaterThan,
    #[serde(rename = "<")]
    LessThan,
    #[serde(rename = ">=")]
    GreaterOrEqual,
    #[serde(rename = "<=")]
    LessOrEqual,
    #[serde(rename = "==")]
    Equal,
    #[serde(rename = "!=")]
    NotEqual,
}

impl ConditionOperator {
    pub fn compare(&self, value: f64, threshold: f64) -> bool {
        match self {
            ConditionOperator::GreaterThan => value > threshold,
            ConditionOperator::LessThan => value < threshold,
            ConditionOperator::GreaterOrEqual => value >= threshold,
            ConditionOperator::LessOrEqual => value <= threshold,
            ConditionOperator::Equal => (value - threshold).abs() < f64::EPSILON,
            ConditionOperator::NotEqual => (value - threshold).abs() >= f64::EPSILON,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleAction {
    pub kind: RuleActionKind,
    /// For `percentage`, a fraction of the current value (0.2 = 20%);
    /// for `absolute`, a delta in the value's own unit; for `multiplier`,
    /// the factor applied to the current value.
    pub magnitude: f64,
    pub unit: RuleActionUnit,
    /// Hard bound on the relative effect: the new value always lands in
    /// `[current * (1 - max_change), current * (1 + max_change)]`.
    pub max_change: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionKind {
    Increase,
    Decrease,
    Set,
    Pause,
    Activate,
    Test,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleActionUnit {
    Percentage,
    Absolute,
    Multiplier,
}

/// What a fired rule proposes to do to the campaign.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposedChange {
    SetValue(f64),
    Pause,
    Activate,
    Test,
}

/// Named, orderable bundle of rules. The `aggressiveness` and
/// `risk_tolerance` tags are informational only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationStrategy {
    pub id: Uuid,
    pub name: String,
    pub is_active: bool,
    pub rules: Vec<OptimizationRule>,
    pub aggressiveness: String,
    pub risk_tolerance: String,
}

/// Per-rule lifecycle state. `Exhausted` is terminal until an operator
/// reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleState {
    Idle,
    Eligible,
    Fired,
    Exhausted,
}

impl OptimizationRule {
    /// Whether the cap has been reached (terminal until reset).
    pub fn is_exhausted(&self) -> bool {
        self.execution_count >= self.max_executions
    }

    /// Whether the cooldown window has elapsed as of `now`.
    pub fn cooldown_elapsed(&self, now: DateTime<Utc>) -> bool {
        match self.last_executed_at {
            None => true,
            Some(last) => now - last >= chrono::Duration::hours(self.cooldown_hours),
        }
    }

    pub fn state(&self, now: DateTime<Utc>) -> RuleState {
        if self.is_exhausted() {
            RuleState::Exhausted
        } else if self.is_active && self.cooldown_elapsed(now) {
            RuleState::Eligible
        } else {
            RuleState::Idle
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operator_compare() {
        assert!(ConditionOperator::GreaterThan.compare(3.1, 3.0));
        assert!(!ConditionOperator::GreaterThan.compare(3.0, 3.0));
        assert!(ConditionOperator::GreaterOrEqual.compare(3.0, 3.0));
        assert!(ConditionOperator::LessThan.compare(0.4, 0.5));
        assert!(ConditionOperator::Equal.compare(1.0, 1.0));
        assert!(ConditionOperator::NotEqual.compare(1.0, 2.0));
    }

    #[test]
    fn test_operator_serde_symbols() {
        let op: ConditionOperator = serde_json::from_str("\">=\"").unwrap();
        assert_eq!(op, ConditionOperator::GreaterOrEqual);
        assert_eq!(serde_json::to_string(&ConditionOperator::LessThan).unwrap(), "\"<\"");
    }
}
