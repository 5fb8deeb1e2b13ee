//! Durable-for-the-cycle job queue. Jobs are the unit of work and of
//! audit: every automated change runs through here exactly once, with
//! before metrics and the outcome recorded on the job itself.
//!
//! The queue exclusively owns status transitions. Producers hand in
//! recommendations and never touch a job again. A failed job is recorded
//! and discarded, never retried — the next cycle re-derives its intent
//! from fresh metrics.

use crate::ports::{AdsPlatformClient, CampaignStore, NotificationSink};
use crate::recommend::{NormalizedRecommendation, PlannedAction};
use adpilot_core::error::{OptimizerError, OptimizerResult};
use adpilot_core::types::{
    CampaignStatus, JobPriority, OptimizationType, PerformanceMetrics,
};
use adpilot_metrics::compute_metrics;
use adpilot_rl_engine::agent::AgentAction;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// Outcome of one execution attempt. Immutable once set.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationResult {
    pub success: bool,
    pub old_value: String,
    pub new_value: String,
    /// Observed relative ROAS movement between `metrics_before` and
    /// `metrics_after`; `None` when the campaign could not be re-read.
    pub actual_improvement: Option<f64>,
    pub error: Option<String>,
    pub metrics_before: PerformanceMetrics,
    /// Metrics recomputed from the store right after a successful
    /// mutation.
    pub metrics_after: Option<PerformanceMetrics>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizationJob {
    pub id: Uuid,
    pub shop: String,
    pub job_type: OptimizationType,
    pub priority: JobPriority,
    pub status: JobStatus,
    pub campaign_id: String,
    pub planned: PlannedAction,
    pub current_value: String,
    pub recommended_value: String,
    pub expected_improvement: f64,
    pub confidence: f64,
    pub reasoning: String,
    /// Rule that produced this job, if any.
    pub rule_id: Option<Uuid>,
    /// Agent action that produced this job, if any; used for reward feedback.
    pub agent_action: Option<AgentAction>,
    pub metrics_before: PerformanceMetrics,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub result: Option<OptimizationResult>,
    seq: u64,
}

/// Priority queue with per-campaign serialization.
///
/// Drain order is descending `priority weight x confidence`, FIFO within
/// ties. Different campaigns execute concurrently; two jobs for the same
/// campaign never run at once.
pub struct OptimizationJobQueue {
    pending: std::sync::Mutex<Vec<OptimizationJob>>,
    campaign_locks: DashMap<String, Arc<tokio::sync::Mutex<()>>>,
    seq: AtomicU64,
    platform_timeout: Duration,
}

impl OptimizationJobQueue {
    pub fn new(platform_timeout: Duration) -> Self {
        Self {
            pending: std::sync::Mutex::new(Vec::new()),
            campaign_locks: DashMap::new(),
            seq: AtomicU64::new(0),
            platform_timeout,
        }
    }

    /// Create a `pending` job from an aggregated recommendation.
    pub fn enqueue(
        &self,
        rec: NormalizedRecommendation,
        metrics_before: PerformanceMetrics,
    ) -> Uuid {
        let job = OptimizationJob {
            id: Uuid::new_v4(),
            shop: rec.shop,
            job_type: rec.optimization_type,
            priority: rec.priority,
            status: JobStatus::Pending,
            campaign_id: rec.campaign_id,
            planned: rec.planned,
            current_value: rec.current_value,
            recommended_value: rec.recommended_value,
            expected_improvement: rec.expected_improvement,
            confidence: rec.confidence,
            reasoning: rec.reasoning,
            rule_id: rec.rule_id,
            agent_action: rec.agent_action,
            metrics_before,
            created_at: Utc::now(),
            executed_at: None,
            result: None,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let id = job.id;
        self.pending.lock().expect("queue lock poisoned").push(job);
        id
    }

    /// Safety override path: a `critical` pause job created ahead of all
    /// rule and agent output, bypassing cooldowns.
    pub fn enqueue_emergency_pause(
        &self,
        shop: &str,
        campaign_id: &str,
        current_budget: f64,
        metrics_before: PerformanceMetrics,
    ) -> Uuid {
        let job = OptimizationJob {
            id: Uuid::new_v4(),
            shop: shop.to_string(),
            job_type: OptimizationType::Budget,
            priority: JobPriority::Critical,
            status: JobStatus::Pending,
            campaign_id: campaign_id.to_string(),
            planned: PlannedAction::Pause,
            current_value: format!("{:.2}", current_budget),
            recommended_value: "PAUSED".to_string(),
            expected_improvement: 0.0,
            confidence: 1.0,
            reasoning: format!(
                "Emergency pause: ROAS {:.2} with spend {:.2} past the loss guard",
                metrics_before.roas, metrics_before.spend
            ),
            rule_id: None,
            agent_action: None,
            metrics_before,
            created_at: Utc::now(),
            executed_at: None,
            result: None,
            seq: self.seq.fetch_add(1, Ordering::Relaxed),
        };
        let id = job.id;
        warn!(shop = %shop, campaign_id = %campaign_id, "Emergency pause queued");
        self.pending.lock().expect("queue lock poisoned").push(job);
        id
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().expect("queue lock poisoned").len()
    }

    /// Execute everything currently pending. Never raises: each failure
    /// is recorded on its job and the drain proceeds.
    pub async fn drain(
        &self,
        platform: Arc<dyn AdsPlatformClient>,
        store: Arc<dyn CampaignStore>,
        notifier: Arc<dyn NotificationSink>,
        notification_targets: &[String],
        notify_threshold: f64,
    ) -> Vec<OptimizationJob> {
        let mut jobs = {
            let mut pending = self.pending.lock().expect("queue lock poisoned");
            std::mem::take(&mut *pending)
        };

        jobs.sort_by(|a, b| {
            let score_a = a.priority.weight() * a.confidence;
            let score_b = b.priority.weight() * b.confidence;
            score_b
                .partial_cmp(&score_a)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.seq.cmp(&b.seq))
        });

        // Partition into per-campaign lanes, preserving the global order
        // inside each lane.
        let mut lanes: Vec<(String, Vec<OptimizationJob>)> = Vec::new();
        for job in jobs {
            match lanes.iter_mut().find(|(cid, _)| *cid == job.campaign_id) {
                Some((_, lane)) => lane.push(job),
                None => lanes.push((job.campaign_id.clone(), vec![job])),
            }
        }

        let mut handles = Vec::new();
        for (campaign_id, lane) in lanes {
            let lock = self
                .campaign_locks
                .entry(campaign_id.clone())
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
                .clone();
            let platform = platform.clone();
            let store = store.clone();
            let notifier = notifier.clone();
            let targets = notification_targets.to_vec();
            let timeout = self.platform_timeout;

            handles.push(tokio::spawn(async move {
                let _guard = lock.lock().await;
                let mut done = Vec::with_capacity(lane.len());
                for mut job in lane {
                    execute_job(&mut job, platform.as_ref(), store.as_ref(), timeout).await;
                    maybe_notify(&job, notifier.as_ref(), &targets, notify_threshold).await;
                    done.push(job);
                }
                done
            }));
        }

        let mut executed = Vec::new();
        for handle in handles {
            match handle.await {
                Ok(done) => executed.extend(done),
                Err(e) => warn!(error = %e, "Job lane task panicked"),
            }
        }
        executed.sort_by_key(|j| j.seq);
        executed
    }
}

async fn execute_job(
    job: &mut OptimizationJob,
    platform: &dyn AdsPlatformClient,
    store: &dyn CampaignStore,
    timeout: Duration,
) {
    job.status = JobStatus::Running;
    job.executed_at = Some(Utc::now());

    let outcome = apply_planned(job, platform, store, timeout).await;
    match outcome {
        Ok(()) => {
            let metrics_after = refreshed_metrics(store, &job.shop, &job.campaign_id).await;
            let actual_improvement =
                metrics_after.map(|after| observed_improvement(&job.metrics_before, &after));
            job.status = JobStatus::Completed;
            job.result = Some(OptimizationResult {
                success: true,
                old_value: job.current_value.clone(),
                new_value: job.recommended_value.clone(),
                actual_improvement,
                error: None,
                metrics_before: job.metrics_before,
                metrics_after,
            });
            info!(
                shop = %job.shop,
                campaign_id = %job.campaign_id,
                job_id = %job.id,
                recommended = %job.recommended_value,
                "Optimization applied"
            );
        }
        Err(e) => {
            job.status = JobStatus::Failed;
            job.result = Some(OptimizationResult {
                success: false,
                old_value: job.current_value.clone(),
                new_value: job.current_value.clone(),
                actual_improvement: None,
                error: Some(e.to_string()),
                metrics_before: job.metrics_before,
                metrics_after: None,
            });
            warn!(
                shop = %job.shop,
                campaign_id = %job.campaign_id,
                job_id = %job.id,
                error = %e,
                "Optimization failed"
            );
        }
    }
}

async fn apply_planned(
    job: &OptimizationJob,
    platform: &dyn AdsPlatformClient,
    store: &dyn CampaignStore,
    timeout: Duration,
) -> OptimizerResult<()> {
    let campaign_id = job.campaign_id.as_str();
    let call = async {
        match &job.planned {
            PlannedAction::SetBudget(v) => platform.set_budget(campaign_id, *v).await,
            PlannedAction::SetBid(v) => platform.set_bid(campaign_id, *v).await,
            PlannedAction::AdjustAudience(d) => platform.adjust_audience(campaign_id, d).await,
            PlannedAction::RotateCreative(d) => platform.rotate_creative(campaign_id, d).await,
            PlannedAction::UpdateSchedule(d) => platform.update_schedule(campaign_id, d).await,
            PlannedAction::UpdatePlacement(d) => platform.update_placement(campaign_id, d).await,
            PlannedAction::Pause => platform.pause_campaign(campaign_id).await,
            PlannedAction::Activate => platform.activate_campaign(campaign_id).await,
        }
    };

    match tokio::time::timeout(timeout, call).await {
        Err(_) => return Err(OptimizerError::PlatformTimeout(timeout.as_secs())),
        Ok(Err(e)) => return Err(e),
        Ok(Ok(_ack)) => {}
    }

    // Mirror the accepted change into the campaign store. The platform
    // already holds the truth, so a store error downgrades to a warning.
    let mirror = match &job.planned {
        PlannedAction::SetBudget(v) => store.update_budget(campaign_id, *v).await,
        PlannedAction::Pause => store.update_status(campaign_id, CampaignStatus::Paused).await,
        PlannedAction::Activate => {
            store.update_status(campaign_id, CampaignStatus::Active).await
        }
        _ => Ok(()),
    };
    if let Err(e) = mirror {
        warn!(campaign_id = %campaign_id, error = %e, "Store mirror failed");
    }
    Ok(())
}

/// Re-read the campaign after a successful mutation. A paused campaign
/// drops out of the active list, so a pause job simply yields `None`.
async fn refreshed_metrics(
    store: &dyn CampaignStore,
    shop: &str,
    campaign_id: &str,
) -> Option<PerformanceMetrics> {
    match store.list_active_campaigns(shop).await {
        Ok(campaigns) => campaigns
            .iter()
            .find(|c| c.campaign_id == campaign_id)
            .map(|c| compute_metrics(&c.counters)),
        Err(e) => {
            warn!(
                campaign_id = %campaign_id,
                error = %e,
                "Could not refresh metrics after execution"
            );
            None
        }
    }
}

/// Relative ROAS movement between the execution bookends.
fn observed_improvement(before: &PerformanceMetrics, after: &PerformanceMetrics) -> f64 {
    if before.roas > f64::EPSILON {
        (after.roas - before.roas) / before.roas
    } else {
        after.roas
    }
}

async fn maybe_notify(
    job: &OptimizationJob,
    notifier: &dyn NotificationSink,
    targets: &[String],
    threshold: f64,
) {
    let improvement = job
        .result
        .as_ref()
        .and_then(|r| r.actual_improvement)
        .unwrap_or(0.0);
    if improvement > threshold {
        notifier
            .notify(
                &job.shop,
                targets,
                &format!(
                    "Campaign {}: {} {} -> {} ({:+.0}% observed)",
                    job.campaign_id,
                    job.reasoning,
                    job.current_value,
                    job.recommended_value,
                    improvement * 100.0
                ),
            )
            .await;
    }
}
