use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Raw delivery counters for a campaign over the evaluation window.
///
/// These come straight from the campaign store; absent data is represented
/// as zeros, never as an error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct CampaignCounters {
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    pub spend: f64,
    pub revenue: f64,
    /// Unique users reached; used for the frequency metric.
    pub reach: u64,
}

/// Normalized performance metrics, recomputed every cycle from
/// [`CampaignCounters`]. Never persisted by the optimizer itself.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct PerformanceMetrics {
    /// Revenue / spend.
    pub roas: f64,
    /// Clicks / impressions × 100.
    pub ctr: f64,
    /// Spend / clicks.
    pub cpc: f64,
    /// Conversions / clicks × 100.
    pub conversion_rate: f64,
    pub spend: f64,
    pub revenue: f64,
    pub impressions: u64,
    pub clicks: u64,
    pub conversions: u64,
    /// Impressions / reach.
    pub frequency: f64,
    /// Spend / impressions × 1000.
    pub cpm: f64,
    /// Spend / conversions.
    pub cpa: f64,
}

/// A campaign as seen by the optimizer for one cycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CampaignSnapshot {
    pub campaign_id: String,
    pub shop: String,
    pub name: String,
    pub status: CampaignStatus,
    pub daily_budget: f64,
    pub bid_amount: f64,
    /// Creative variants available for rotation; the bandit ranks these.
    #[serde(default)]
    pub creative_variants: Vec<String>,
    pub counters: CampaignCounters,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CampaignStatus {
    Active,
    Paused,
    Archived,
}

/// What aspect of a campaign an optimization touches. Shared by rules,
/// recommendations, and jobs; deduplication keys on `(campaign_id, this)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OptimizationType {
    Budget,
    Bid,
    Audience,
    Creative,
    Schedule,
    Placement,
}

/// Job priority. Ordering for the queue is by [`JobPriority::weight`],
/// critical first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobPriority {
    Critical,
    High,
    Medium,
    Low,
}

impl JobPriority {
    pub fn weight(&self) -> f64 {
        match self {
            JobPriority::Critical => 4.0,
            JobPriority::High => 3.0,
            JobPriority::Medium => 2.0,
            JobPriority::Low => 1.0,
        }
    }
}
