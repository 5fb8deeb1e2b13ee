//! Tabular epsilon-greedy Q-learning, one state-action table per campaign.
//!
//! All learner state lives in an explicit arena keyed by campaign id, so
//! persistence and parallel cycles need no hidden globals. Epsilon is
//! per-campaign: a heavily optimized campaign decaying its exploration
//! never starves a cold-start one.

use adpilot_core::types::{OptimizationType, PerformanceMetrics};
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

const ALPHA: f64 = 0.1;
const GAMMA: f64 = 0.95;
const EPSILON_INITIAL: f64 = 0.1;
const EPSILON_DECAY: f64 = 0.995;
const EPSILON_FLOOR: f64 = 0.01;

/// Discrete actions the agent can recommend for a campaign.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentAction {
    IncreaseBudget,
    DecreaseBudget,
    IncreaseBid,
    DecreaseBid,
    RotateCreative,
    NarrowAudience,
    PauseCampaign,
}

impl AgentAction {
    pub fn key(&self) -> &'static str {
        match self {
            AgentAction::IncreaseBudget => "increase_budget",
            AgentAction::DecreaseBudget => "decrease_budget",
            AgentAction::IncreaseBid => "increase_bid",
            AgentAction::DecreaseBid => "decrease_bid",
            AgentAction::RotateCreative => "rotate_creative",
            AgentAction::NarrowAudience => "narrow_audience",
            AgentAction::PauseCampaign => "pause_campaign",
        }
    }

    pub fn optimization_type(&self) -> OptimizationType {
        match self {
            AgentAction::IncreaseBudget | AgentAction::DecreaseBudget => OptimizationType::Budget,
            AgentAction::IncreaseBid | AgentAction::DecreaseBid => OptimizationType::Bid,
            AgentAction::RotateCreative => OptimizationType::Creative,
            AgentAction::NarrowAudience => OptimizationType::Audience,
            AgentAction::PauseCampaign => OptimizationType::Schedule,
        }
    }
}

/// The agent's chosen action for one campaign this cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionSelection {
    pub action: AgentAction,
    pub optimization_type: OptimizationType,
    /// Relative size of the move; uniform in [0.1, 0.6) for exploratory
    /// picks, a conservative fixed step otherwise.
    pub magnitude: f64,
    pub expected_reward: f64,
    pub confidence: f64,
    pub explored: bool,
}

/// Per-campaign learner state.
#[derive(Debug, Clone, Default)]
struct AgentState {
    /// state key -> action key -> estimated value.
    q: HashMap<String, HashMap<&'static str, f64>>,
    /// (state key, action key) -> observation count, for confidence.
    visits: HashMap<(String, &'static str), u64>,
    epsilon: f64,
    updates: u64,
}

impl AgentState {
    fn new() -> Self {
        Self {
            epsilon: EPSILON_INITIAL,
            ..Default::default()
        }
    }

    fn q_value(&self, state: &str, action: AgentAction) -> f64 {
        self.q
            .get(state)
            .and_then(|actions| actions.get(action.key()))
            .copied()
            .unwrap_or(0.0)
    }

    fn max_q(&self, state: &str) -> f64 {
        self.q
            .get(state)
            .map(|actions| actions.values().copied().fold(0.0_f64, f64::max))
            .unwrap_or(0.0)
    }
}

/// Epsilon-greedy Q-learning over coarse campaign states. Tables are
/// created lazily on first lookup and never deleted; archival is outside
/// the optimizer.
pub struct QLearningAgent {
    states: DashMap<String, AgentState>,
}

impl QLearningAgent {
    pub fn new() -> Self {
        Self {
            states: DashMap::new(),
        }
    }

    /// Deterministic bounded-cardinality state key from coarse buckets of
    /// ROAS (width 0.1), CTR (width 1%) and spend (per $100).
    pub fn encode_state(metrics: &PerformanceMetrics) -> String {
        let roas_bucket = ((metrics.roas * 10.0).floor() as i64).clamp(0, 100);
        let ctr_bucket = (metrics.ctr.floor() as i64).clamp(0, 20);
        let spend_bucket = ((metrics.spend / 100.0).floor() as i64).clamp(0, 100);
        format!("r{}:c{}:s{}", roas_bucket, ctr_bucket, spend_bucket)
    }

    /// Pick an action epsilon-greedily. Ties between equal Q-values go to
    /// the action listed first in `available`.
    pub fn select_action(
        &self,
        campaign_id: &str,
        metrics: &PerformanceMetrics,
        available: &[AgentAction],
    ) -> Option<ActionSelection> {
        self.select_action_with_rng(campaign_id, metrics, available, &mut rand::thread_rng())
    }

    pub fn select_action_with_rng(
        &self,
        campaign_id: &str,
        metrics: &PerformanceMetrics,
        available: &[AgentAction],
        rng: &mut impl Rng,
    ) -> Option<ActionSelection> {
        if available.is_empty() {
            return None;
        }

        let state_key = Self::encode_state(metrics);
        let state = self
            .states
            .entry(campaign_id.to_string())
            .or_insert_with(AgentState::new);

        let explored = rng.gen::<f64>() < state.epsilon;
        let action = if explored {
            available[rng.gen_range(0..available.len())]
        } else {
            let mut best = available[0];
            let mut best_q = state.q_value(&state_key, best);
            for &candidate in &available[1..] {
                let q = state.q_value(&state_key, candidate);
                if q > best_q {
                    best_q = q;
                    best = candidate;
                }
            }
            best
        };

        let visits = state
            .visits
            .get(&(state_key.clone(), action.key()))
            .copied()
            .unwrap_or(0);

        debug!(
            campaign_id = %campaign_id,
            state = %state_key,
            action = action.key(),
            explored,
            "Agent action selected"
        );

        Some(ActionSelection {
            action,
            optimization_type: action.optimization_type(),
            magnitude: if explored {
                rng.gen_range(0.1..0.6)
            } else {
                0.2
            },
            expected_reward: state.q_value(&state_key, action),
            // Grows with observations of this state/action, from 0.6
            // toward 0.95.
            confidence: 0.6 + visits as f64 / (visits as f64 + 10.0) * 0.35,
            explored,
        })
    }

    /// Standard Q-learning update, then per-campaign epsilon decay.
    pub fn update(
        &self,
        campaign_id: &str,
        prior_metrics: &PerformanceMetrics,
        action: AgentAction,
        reward: f64,
        new_metrics: &PerformanceMetrics,
    ) {
        let state_key = Self::encode_state(prior_metrics);
        let next_key = Self::encode_state(new_metrics);

        let mut state = self
            .states
            .entry(campaign_id.to_string())
            .or_insert_with(AgentState::new);

        let max_next = state.max_q(&next_key);
        let entry = state
            .q
            .entry(state_key.clone())
            .or_default()
            .entry(action.key())
            .or_insert(0.0);
        *entry += ALPHA * (reward + GAMMA * max_next - *entry);

        *state
            .visits
            .entry((state_key, action.key()))
            .or_insert(0) += 1;
        state.updates += 1;
        state.epsilon = (state.epsilon * EPSILON_DECAY).max(EPSILON_FLOOR);
    }

    pub fn epsilon(&self, campaign_id: &str) -> f64 {
        self.states
            .get(campaign_id)
            .map(|s| s.epsilon)
            .unwrap_or(EPSILON_INITIAL)
    }

    pub fn q_value(&self, campaign_id: &str, metrics: &PerformanceMetrics, action: AgentAction) -> f64 {
        let key = Self::encode_state(metrics);
        self.states
            .get(campaign_id)
            .map(|s| s.q_value(&key, action))
            .unwrap_or(0.0)
    }
}

impl Default for QLearningAgent {
    fn default() -> Self {
        Self::new()
    }
}
