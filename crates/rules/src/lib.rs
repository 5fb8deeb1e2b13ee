//! Declarative optimization rules — threshold conditions, bounded actions,
//! cooldowns, and execution caps.

pub mod engine;
pub mod types;

pub use engine::{RuleEngine, RuleFiring};
pub use types::{
    ConditionOperator, OptimizationRule, OptimizationStrategy, ProposedChange, RuleAction,
    RuleActionKind, RuleActionUnit, RuleCondition, RuleState,
};
