//! External collaborator contracts. The optimizer core owns no wire or
//! file format; everything behind these traits is an opaque service.

use adpilot_core::config::GlobalSettings;
use adpilot_core::error::OptimizerResult;
use adpilot_core::types::{CampaignSnapshot, CampaignStatus, PerformanceMetrics};
use adpilot_rules::OptimizationStrategy;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Acknowledgement from the advertising platform; a mutation may mint a
/// new remote identifier (e.g. a fresh ad set).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlatformAck {
    pub remote_id: Option<String>,
}

/// Campaign read/write access per shop.
#[async_trait]
pub trait CampaignStore: Send + Sync {
    async fn list_active_campaigns(&self, shop: &str) -> OptimizerResult<Vec<CampaignSnapshot>>;
    async fn update_budget(&self, campaign_id: &str, value: f64) -> OptimizerResult<()>;
    async fn update_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> OptimizerResult<()>;
}

/// Remote mutation surface, one method per action kind. Calls may fail
/// transiently; failures are recorded per job, never propagated.
#[async_trait]
pub trait AdsPlatformClient: Send + Sync {
    async fn set_budget(&self, campaign_id: &str, value: f64) -> OptimizerResult<PlatformAck>;
    async fn set_bid(&self, campaign_id: &str, value: f64) -> OptimizerResult<PlatformAck>;
    async fn adjust_audience(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck>;
    async fn rotate_creative(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck>;
    async fn update_schedule(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck>;
    async fn update_placement(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck>;
    async fn pause_campaign(&self, campaign_id: &str) -> OptimizerResult<PlatformAck>;
    async fn activate_campaign(&self, campaign_id: &str) -> OptimizerResult<PlatformAck>;
}

/// Output of the optional predictive-model service. The optimizer treats
/// it purely as one more recommendation source; correctness never
/// depends on it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prediction {
    pub predicted_roas: f64,
    pub predicted_ctr: f64,
    pub predicted_cvr: f64,
    pub predicted_cpc: f64,
    pub confidence: f64,
    pub risk_score: f64,
}

#[async_trait]
pub trait PredictiveModel: Send + Sync {
    async fn predict(
        &self,
        campaign: &CampaignSnapshot,
        metrics: &PerformanceMetrics,
    ) -> OptimizerResult<Prediction>;
}

/// Fire-and-forget human-readable summaries for notable improvements.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, shop: &str, targets: &[String], summary: &str);
}

/// Per-shop optimization configuration supplied by the strategy store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopConfig {
    pub is_enabled: bool,
    pub strategies: Vec<OptimizationStrategy>,
    pub settings: GlobalSettings,
    pub notification_targets: Vec<String>,
}

#[async_trait]
pub trait ConfigStore: Send + Sync {
    async fn list_shops(&self) -> OptimizerResult<Vec<String>>;
    async fn shop_config(&self, shop: &str) -> OptimizerResult<ShopConfig>;
}
