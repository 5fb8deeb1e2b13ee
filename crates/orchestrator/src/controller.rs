//! The outer control loop — iterates shops on a fixed cadence, runs the
//! per-campaign recommendation pipeline, drains the job queue, and feeds
//! executed outcomes back into the learners.
//!
//! Nothing here is fatal: a shop, campaign, or job failure is contained
//! and the cycle continues.

use crate::ports::{
    AdsPlatformClient, CampaignStore, ConfigStore, NotificationSink, PredictiveModel,
};
use crate::queue::{JobStatus, OptimizationJob, OptimizationJobQueue};
use crate::recommend::{
    aggregate, normalize, predictive_recommendation, PlannedAction, Recommendation,
};
use adpilot_core::config::AppConfig;
use adpilot_core::types::PerformanceMetrics;
use adpilot_metrics::{compute_metrics, RiskScorer};
use adpilot_rl_engine::agent::{AgentAction, QLearningAgent};
use adpilot_rl_engine::bandits::ThompsonSampler;
use adpilot_rules::RuleEngine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Actions offered to the agent each cycle. Pausing stays out of the
/// set; the emergency path owns pausing.
const AGENT_ACTIONS: &[AgentAction] = &[
    AgentAction::IncreaseBudget,
    AgentAction::DecreaseBudget,
    AgentAction::IncreaseBid,
    AgentAction::DecreaseBid,
    AgentAction::RotateCreative,
    AgentAction::NarrowAudience,
];

/// Per-cycle execution report, the controller's observable output.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CycleReport {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub shops_processed: usize,
    pub campaigns_processed: usize,
    pub jobs_created: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub emergency_pauses: usize,
}

/// External collaborators the controller is wired to.
pub struct ControllerDeps {
    pub config_store: Arc<dyn ConfigStore>,
    pub campaign_store: Arc<dyn CampaignStore>,
    pub platform: Arc<dyn AdsPlatformClient>,
    pub predictive: Option<Arc<dyn PredictiveModel>>,
    pub notifier: Arc<dyn NotificationSink>,
}

struct ShopOutcome {
    campaigns: usize,
    emergency_pauses: usize,
    executed: Vec<OptimizationJob>,
}

impl ShopOutcome {
    fn empty() -> Self {
        Self {
            campaigns: 0,
            emergency_pauses: 0,
            executed: Vec::new(),
        }
    }
}

pub struct OptimizationController {
    config: AppConfig,
    deps: ControllerDeps,
    rule_engine: Arc<RuleEngine>,
    agent: Arc<QLearningAgent>,
    sampler: Arc<ThompsonSampler>,
    risk_scorer: RiskScorer,
}

impl OptimizationController {
    pub fn new(config: AppConfig, deps: ControllerDeps) -> Arc<Self> {
        Arc::new(Self {
            config,
            deps,
            rule_engine: Arc::new(RuleEngine::new()),
            agent: Arc::new(QLearningAgent::new()),
            sampler: Arc::new(ThompsonSampler::new()),
            risk_scorer: RiskScorer::default(),
        })
    }

    /// For operator tooling (rule resets) and tests.
    pub fn rule_engine(&self) -> &Arc<RuleEngine> {
        &self.rule_engine
    }

    pub fn agent(&self) -> &Arc<QLearningAgent> {
        &self.agent
    }

    pub fn sampler(&self) -> &Arc<ThompsonSampler> {
        &self.sampler
    }

    /// Run cycles on the configured cadence, starting immediately. The
    /// stop signal halts new cycles; the in-flight cycle always finishes
    /// so no platform mutation is abandoned midway.
    pub async fn run(self: Arc<Self>, mut stop: watch::Receiver<bool>) {
        let cadence = Duration::from_secs(self.config.defaults.cycle_hours * 3600);
        loop {
            let report = self.run_cycle().await;
            info!(
                shops = report.shops_processed,
                campaigns = report.campaigns_processed,
                created = report.jobs_created,
                completed = report.jobs_completed,
                failed = report.jobs_failed,
                emergencies = report.emergency_pauses,
                "Optimization cycle finished"
            );

            if cadence_or_stop(cadence, &mut stop).await {
                info!("Stop signal received; no further cycles");
                break;
            }
        }
    }

    /// One bounded batch over every shop.
    pub async fn run_cycle(self: &Arc<Self>) -> CycleReport {
        let mut report = CycleReport {
            started_at: Some(Utc::now()),
            ..Default::default()
        };

        let shops = match self.deps.config_store.list_shops().await {
            Ok(shops) => shops,
            Err(e) => {
                warn!(error = %e, "Could not list shops; skipping cycle");
                report.finished_at = Some(Utc::now());
                return report;
            }
        };

        let semaphore = Arc::new(Semaphore::new(self.config.optimizer.shop_concurrency.max(1)));
        let mut tasks = JoinSet::new();
        for shop in shops {
            let this = self.clone();
            let semaphore = semaphore.clone();
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                this.process_shop(&shop).await
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(outcome) => {
                    report.shops_processed += 1;
                    report.campaigns_processed += outcome.campaigns;
                    report.emergency_pauses += outcome.emergency_pauses;
                    report.jobs_created += outcome.executed.len();
                    for job in &outcome.executed {
                        match job.status {
                            JobStatus::Completed => report.jobs_completed += 1,
                            JobStatus::Failed => report.jobs_failed += 1,
                            _ => {}
                        }
                    }
                }
                Err(e) => warn!(error = %e, "Shop task panicked"),
            }
        }

        report.finished_at = Some(Utc::now());
        report
    }

    async fn process_shop(&self, shop: &str) -> ShopOutcome {
        let config = match self.deps.config_store.shop_config(shop).await {
            Ok(config) => config,
            Err(e) => {
                warn!(shop = %shop, error = %e, "No optimization config; skipping shop");
                return ShopOutcome::empty();
            }
        };
        if !config.is_enabled {
            debug!(shop = %shop, "Optimization disabled");
            return ShopOutcome::empty();
        }

        self.rule_engine
            .load_strategies(shop, config.strategies.clone());

        let campaigns = match self.deps.campaign_store.list_active_campaigns(shop).await {
            Ok(campaigns) => campaigns,
            Err(e) => {
                warn!(shop = %shop, error = %e, "Could not list campaigns; skipping shop");
                return ShopOutcome::empty();
            }
        };

        // Fresh queue per shop per cycle: pending jobs never survive a cycle.
        let queue = OptimizationJobQueue::new(Duration::from_secs(
            self.config.optimizer.platform_call_timeout_secs,
        ));
        let mut outcome = ShopOutcome::empty();
        let mut candidates = Vec::new();
        let mut metrics_by_campaign: Vec<(String, PerformanceMetrics)> = Vec::new();

        for campaign in &campaigns {
            outcome.campaigns += 1;
            let metrics = compute_metrics(&campaign.counters);
            metrics_by_campaign.push((campaign.campaign_id.clone(), metrics));

            let prediction = match &self.deps.predictive {
                Some(model) => match model.predict(campaign, &metrics).await {
                    Ok(p) => Some(p),
                    Err(e) => {
                        debug!(
                            shop = %shop,
                            campaign_id = %campaign.campaign_id,
                            error = %e,
                            "Predictive model unavailable"
                        );
                        None
                    }
                },
                None => None,
            };

            // Safety first: the emergency predicate runs before any rule
            // or agent logic and ignores cooldowns.
            let risk = self.risk_scorer.assess(
                &metrics,
                prediction.as_ref().map(|p| p.risk_score),
                &config.settings,
            );
            if risk.emergency_pause {
                queue.enqueue_emergency_pause(
                    shop,
                    &campaign.campaign_id,
                    campaign.daily_budget,
                    metrics,
                );
                outcome.emergency_pauses += 1;
            }

            for firing in self.rule_engine.evaluate_campaign(
                shop,
                campaign,
                &metrics,
                &config.settings,
            ) {
                candidates.push(normalize(
                    Recommendation::Rule(firing),
                    campaign,
                    &config.settings,
                ));
            }

            if let Some(selection) =
                self.agent
                    .select_action(&campaign.campaign_id, &metrics, AGENT_ACTIONS)
            {
                let creative_variant = if selection.action == AgentAction::RotateCreative {
                    self.top_creative_variant(&campaign.campaign_id, &campaign.creative_variants)
                } else {
                    None
                };
                candidates.push(normalize(
                    Recommendation::Rl {
                        shop: shop.to_string(),
                        campaign_id: campaign.campaign_id.clone(),
                        selection,
                        creative_variant,
                    },
                    campaign,
                    &config.settings,
                ));
            }

            if let Some(p) = &prediction {
                if let Some(rec) =
                    predictive_recommendation(shop, campaign, &metrics, p, &config.settings)
                {
                    candidates.push(normalize(rec, campaign, &config.settings));
                }
            }
        }

        let ranked = aggregate(candidates, config.settings.min_confidence_threshold);
        for rec in ranked {
            let metrics_before = metrics_by_campaign
                .iter()
                .find(|(id, _)| *id == rec.campaign_id)
                .map(|(_, m)| *m)
                .unwrap_or_default();
            let rule_id = rec.rule_id;
            let campaign_id = rec.campaign_id.clone();
            queue.enqueue(rec, metrics_before);
            // Consume the rule's budget only now that its job exists.
            if let Some(rule_id) = rule_id {
                self.rule_engine.mark_fired(shop, rule_id);
            }
            debug!(shop = %shop, campaign_id = %campaign_id, "Job queued");
        }

        outcome.executed = queue
            .drain(
                self.deps.platform.clone(),
                self.deps.campaign_store.clone(),
                self.deps.notifier.clone(),
                &config.notification_targets,
                config.settings.notify_threshold,
            )
            .await;

        self.feed_back(&outcome.executed);
        outcome
    }

    /// Rank the campaign's variants through the bandit and pick the top
    /// draw as the rotation target.
    fn top_creative_variant(&self, campaign_id: &str, variants: &[String]) -> Option<String> {
        if variants.is_empty() {
            return None;
        }
        self.sampler
            .sample(campaign_id, variants)
            .into_iter()
            .next()
            .map(|s| s.variant)
    }

    /// Executed outcomes become rewards for the agent and trial outcomes
    /// for the bandit. The reward is the ROAS movement observed between
    /// the job's before/after metrics, and the refreshed metrics become
    /// the follow-up state; a failed job earns a fixed penalty.
    fn feed_back(&self, executed: &[OptimizationJob]) {
        for job in executed {
            let result = match &job.result {
                Some(result) => result,
                None => continue,
            };

            if let Some(action) = job.agent_action {
                let (reward, next_metrics) = if result.success {
                    (
                        result.actual_improvement.unwrap_or(0.0),
                        result.metrics_after.unwrap_or(job.metrics_before),
                    )
                } else {
                    (-0.5, job.metrics_before)
                };
                self.agent.update(
                    &job.campaign_id,
                    &job.metrics_before,
                    action,
                    reward,
                    &next_metrics,
                );
            }

            // A rotation that never went live teaches the bandit nothing;
            // only applied variants with an observed outcome count.
            if let PlannedAction::RotateCreative(variant) = &job.planned {
                if result.success {
                    if let Some(improvement) = result.actual_improvement {
                        self.sampler
                            .record_outcome(&job.campaign_id, variant, improvement > 0.0);
                    }
                }
            }
        }
    }
}

/// Sleep for one cadence, waking early only on a true stop signal or a
/// dropped sender. Spurious `false` notifications resume the same sleep
/// rather than cutting the cadence short. Returns true when stopping.
async fn cadence_or_stop(cadence: Duration, stop: &mut watch::Receiver<bool>) -> bool {
    let sleep = tokio::time::sleep(cadence);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            _ = &mut sleep => return false,
            changed = stop.changed() => {
                if changed.is_err() || *stop.borrow() {
                    return true;
                }
            }
        }
    }
}

/// Convenience wrapper used by the binary: spawn the controller and get
/// a stop handle back.
pub fn spawn_controller(
    controller: Arc<OptimizationController>,
) -> (watch::Sender<bool>, tokio::task::JoinHandle<()>) {
    let (stop_tx, stop_rx) = watch::channel(false);
    let handle = tokio::spawn(controller.run(stop_rx));
    (stop_tx, handle)
}

#[cfg(test)]
mod tests {
    use super::*;

    // 1. Cadence vs stop signal ----------------------------------------------

    #[tokio::test]
    async fn test_false_signal_resumes_cadence_sleep() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            for _ in 0..3 {
                tokio::time::sleep(Duration::from_millis(15)).await;
                let _ = tx.send(false);
            }
            // Keep the sender alive past the cadence window.
            tokio::time::sleep(Duration::from_millis(300)).await;
            drop(tx);
        });

        let started = tokio::time::Instant::now();
        let stopped = cadence_or_stop(Duration::from_millis(120), &mut rx).await;
        assert!(!stopped);
        assert!(started.elapsed() >= Duration::from_millis(120));
    }

    #[tokio::test]
    async fn test_true_signal_interrupts_cadence() {
        let (tx, mut rx) = watch::channel(false);
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            let _ = tx.send(true);
        });

        let started = tokio::time::Instant::now();
        let stopped = cadence_or_stop(Duration::from_secs(3600), &mut rx).await;
        assert!(stopped);
        assert!(started.elapsed() < Duration::from_secs(60));
    }

    #[tokio::test]
    async fn test_dropped_sender_counts_as_stop() {
        let (tx, mut rx) = watch::channel(false);
        drop(tx);
        assert!(cadence_or_stop(Duration::from_secs(3600), &mut rx).await);
    }
}
