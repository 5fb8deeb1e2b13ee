//! Local collaborators for the daemon: JSON files on disk stand in for
//! the shop configuration and campaign stores, and a dry-run platform
//! client logs every mutation instead of calling an ad network.

use adpilot_core::error::OptimizerResult;
use adpilot_core::types::{CampaignSnapshot, CampaignStatus};
use adpilot_orchestrator::{
    AdsPlatformClient, CampaignStore, ConfigStore, NotificationSink, PlatformAck, ShopConfig,
};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::info;

/// On-disk shape of `<data_dir>/<shop>.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShopFile {
    pub config: ShopConfig,
    #[serde(default)]
    pub campaigns: Vec<CampaignSnapshot>,
}

/// One JSON file per shop under a data directory. Writes rewrite the
/// whole file; at per-shop scale that is plenty.
pub struct JsonShopStore {
    data_dir: PathBuf,
}

impl JsonShopStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    fn shop_path(&self, shop: &str) -> PathBuf {
        self.data_dir.join(format!("{}.json", shop))
    }

    async fn read_shop(&self, shop: &str) -> OptimizerResult<ShopFile> {
        let raw = tokio::fs::read(self.shop_path(shop)).await?;
        Ok(serde_json::from_slice(&raw)?)
    }

    async fn write_shop(&self, shop: &str, file: &ShopFile) -> OptimizerResult<()> {
        let raw = serde_json::to_vec_pretty(file)?;
        tokio::fs::write(self.shop_path(shop), raw).await?;
        Ok(())
    }

    async fn shops(&self) -> OptimizerResult<Vec<String>> {
        let mut shops = Vec::new();
        let mut entries = tokio::fs::read_dir(&self.data_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().map_or(false, |ext| ext == "json") {
                if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                    shops.push(stem.to_string());
                }
            }
        }
        shops.sort();
        Ok(shops)
    }

    /// Apply `mutate` to the campaign wherever it lives.
    async fn mutate_campaign(
        &self,
        campaign_id: &str,
        mutate: impl Fn(&mut CampaignSnapshot),
    ) -> OptimizerResult<()> {
        for shop in self.shops().await? {
            let mut file = self.read_shop(&shop).await?;
            if let Some(campaign) = file
                .campaigns
                .iter_mut()
                .find(|c| c.campaign_id == campaign_id)
            {
                mutate(campaign);
                return self.write_shop(&shop, &file).await;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl ConfigStore for JsonShopStore {
    async fn list_shops(&self) -> OptimizerResult<Vec<String>> {
        self.shops().await
    }

    async fn shop_config(&self, shop: &str) -> OptimizerResult<ShopConfig> {
        Ok(self.read_shop(shop).await?.config)
    }
}

#[async_trait]
impl CampaignStore for JsonShopStore {
    async fn list_active_campaigns(&self, shop: &str) -> OptimizerResult<Vec<CampaignSnapshot>> {
        let file = self.read_shop(shop).await?;
        Ok(file
            .campaigns
            .into_iter()
            .filter(|c| c.status == CampaignStatus::Active)
            .collect())
    }

    async fn update_budget(&self, campaign_id: &str, value: f64) -> OptimizerResult<()> {
        self.mutate_campaign(campaign_id, |c| c.daily_budget = value)
            .await
    }

    async fn update_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> OptimizerResult<()> {
        self.mutate_campaign(campaign_id, |c| c.status = status)
            .await
    }
}

/// Logs every would-be platform mutation and acknowledges it.
pub struct DryRunPlatform;

impl DryRunPlatform {
    fn ack(campaign_id: &str, action: &str, detail: String) -> OptimizerResult<PlatformAck> {
        info!(campaign_id = %campaign_id, action, detail = %detail, "Dry-run platform call");
        Ok(PlatformAck::default())
    }
}

#[async_trait]
impl AdsPlatformClient for DryRunPlatform {
    async fn set_budget(&self, campaign_id: &str, value: f64) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "set_budget", format!("{:.2}", value))
    }
    async fn set_bid(&self, campaign_id: &str, value: f64) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "set_bid", format!("{:.2}", value))
    }
    async fn adjust_audience(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "adjust_audience", directive.to_string())
    }
    async fn rotate_creative(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "rotate_creative", directive.to_string())
    }
    async fn update_schedule(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "update_schedule", directive.to_string())
    }
    async fn update_placement(
        &self,
        campaign_id: &str,
        directive: &str,
    ) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "update_placement", directive.to_string())
    }
    async fn pause_campaign(&self, campaign_id: &str) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "pause_campaign", String::new())
    }
    async fn activate_campaign(&self, campaign_id: &str) -> OptimizerResult<PlatformAck> {
        Self::ack(campaign_id, "activate_campaign", String::new())
    }
}

/// Notification sink that writes summaries to the structured log.
pub struct LogNotifier;

#[async_trait]
impl NotificationSink for LogNotifier {
    async fn notify(&self, shop: &str, targets: &[String], summary: &str) {
        info!(shop = %shop, targets = ?targets, summary = %summary, "Optimization notification");
    }
}
