//! End-to-end optimization cycle scenarios with in-memory collaborators.

use adpilot_core::config::{AppConfig, GlobalSettings};
use adpilot_core::error::OptimizerResult;
use adpilot_core::types::{
    CampaignCounters, CampaignSnapshot, CampaignStatus, JobPriority, OptimizationType,
};
use adpilot_orchestrator::{
    AdsPlatformClient, CampaignStore, ConfigStore, ControllerDeps, NotificationSink,
    OptimizationController, PlatformAck, ShopConfig,
};
use adpilot_rl_engine::agent::AgentAction;
use adpilot_rl_engine::bandits::ThompsonSampler;
use adpilot_rules::types::{
    ConditionOperator, OptimizationRule, OptimizationStrategy, RuleAction, RuleActionKind,
    RuleActionUnit, RuleCondition,
};
use adpilot_rules::{ProposedChange, RuleEngine};
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

struct FakeConfigStore {
    shops: Vec<String>,
    configs: HashMap<String, ShopConfig>,
}

#[async_trait]
impl ConfigStore for FakeConfigStore {
    async fn list_shops(&self) -> OptimizerResult<Vec<String>> {
        Ok(self.shops.clone())
    }
    async fn shop_config(&self, shop: &str) -> OptimizerResult<ShopConfig> {
        Ok(self.configs.get(shop).cloned().expect("shop configured"))
    }
}

#[derive(Default)]
struct FakeCampaignStore {
    campaigns: Mutex<Vec<CampaignSnapshot>>,
    statuses: Mutex<HashMap<String, CampaignStatus>>,
    budgets: Mutex<HashMap<String, f64>>,
    /// Relative revenue bump applied whenever a budget update lands,
    /// simulating a campaign that responds to the change.
    uplift_on_budget: Mutex<f64>,
}

#[async_trait]
impl CampaignStore for FakeCampaignStore {
    async fn list_active_campaigns(&self, shop: &str) -> OptimizerResult<Vec<CampaignSnapshot>> {
        Ok(self
            .campaigns
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.shop == shop)
            .cloned()
            .collect())
    }
    async fn update_budget(&self, campaign_id: &str, value: f64) -> OptimizerResult<()> {
        self.budgets
            .lock()
            .unwrap()
            .insert(campaign_id.to_string(), value);
        let uplift = *self.uplift_on_budget.lock().unwrap();
        if uplift > 0.0 {
            let mut campaigns = self.campaigns.lock().unwrap();
            if let Some(c) = campaigns.iter_mut().find(|c| c.campaign_id == campaign_id) {
                c.counters.revenue *= 1.0 + uplift;
            }
        }
        Ok(())
    }
    async fn update_status(
        &self,
        campaign_id: &str,
        status: CampaignStatus,
    ) -> OptimizerResult<()> {
        self.statuses
            .lock()
            .unwrap()
            .insert(campaign_id.to_string(), status);
        Ok(())
    }
}

#[derive(Default)]
struct RecordingPlatform {
    calls: Mutex<Vec<String>>,
}

impl RecordingPlatform {
    fn record(&self, entry: String) -> OptimizerResult<PlatformAck> {
        self.calls.lock().unwrap().push(entry);
        Ok(PlatformAck::default())
    }
}

#[async_trait]
impl AdsPlatformClient for RecordingPlatform {
    async fn set_budget(&self, c: &str, v: f64) -> OptimizerResult<PlatformAck> {
        self.record(format!("budget:{}:{:.2}", c, v))
    }
    async fn set_bid(&self, c: &str, v: f64) -> OptimizerResult<PlatformAck> {
        self.record(format!("bid:{}:{:.2}", c, v))
    }
    async fn adjust_audience(&self, c: &str, d: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("audience:{}:{}", c, d))
    }
    async fn rotate_creative(&self, c: &str, d: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("creative:{}:{}", c, d))
    }
    async fn update_schedule(&self, c: &str, d: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("schedule:{}:{}", c, d))
    }
    async fn update_placement(&self, c: &str, d: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("placement:{}:{}", c, d))
    }
    async fn pause_campaign(&self, c: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("pause:{}", c))
    }
    async fn activate_campaign(&self, c: &str) -> OptimizerResult<PlatformAck> {
        self.record(format!("activate:{}", c))
    }
}

#[derive(Default)]
struct NullNotifier {
    messages: Mutex<Vec<String>>,
}

#[async_trait]
impl NotificationSink for NullNotifier {
    async fn notify(&self, _shop: &str, _targets: &[String], summary: &str) {
        self.messages.lock().unwrap().push(summary.to_string());
    }
}

// ---------------------------------------------------------------------------
// Builders
// ---------------------------------------------------------------------------

fn campaign(shop: &str, id: &str, counters: CampaignCounters) -> CampaignSnapshot {
    CampaignSnapshot {
        campaign_id: id.to_string(),
        shop: shop.to_string(),
        name: format!("campaign {}", id),
        status: CampaignStatus::Active,
        daily_budget: 100.0,
        bid_amount: 1.5,
        creative_variants: Vec::new(),
        counters,
        fetched_at: Utc::now(),
    }
}

fn scale_winners_rule() -> OptimizationRule {
    OptimizationRule {
        id: Uuid::new_v4(),
        name: "scale-winners".to_string(),
        rule_type: OptimizationType::Budget,
        condition: RuleCondition {
            metric: "roas".to_string(),
            operator: ConditionOperator::GreaterThan,
            threshold: 3.0,
            timeframe_hours: 24,
            min_data_points: 100,
        },
        action: RuleAction {
            kind: RuleActionKind::Increase,
            magnitude: 0.35,
            unit: RuleActionUnit::Percentage,
            max_change: 0.5,
        },
        is_active: true,
        priority: JobPriority::Medium,
        cooldown_hours: 24,
        max_executions: 3,
        execution_count: 0,
        last_executed_at: None,
    }
}

fn shop_config(rules: Vec<OptimizationRule>) -> ShopConfig {
    ShopConfig {
        is_enabled: true,
        strategies: vec![OptimizationStrategy {
            id: Uuid::new_v4(),
            name: "default".to_string(),
            is_active: true,
            rules,
            aggressiveness: "moderate".to_string(),
            risk_tolerance: "medium".to_string(),
        }],
        settings: GlobalSettings::default(),
        notification_targets: vec!["ops@shop".to_string()],
    }
}

struct Harness {
    controller: Arc<OptimizationController>,
    platform: Arc<RecordingPlatform>,
    store: Arc<FakeCampaignStore>,
}

fn harness(shop: &str, campaigns: Vec<CampaignSnapshot>, config: ShopConfig) -> Harness {
    let store = Arc::new(FakeCampaignStore::default());
    store.campaigns.lock().unwrap().extend(campaigns);

    let platform = Arc::new(RecordingPlatform::default());
    let mut configs = HashMap::new();
    configs.insert(shop.to_string(), config);

    let controller = OptimizationController::new(
        AppConfig::default(),
        ControllerDeps {
            config_store: Arc::new(FakeConfigStore {
                shops: vec![shop.to_string()],
                configs,
            }),
            campaign_store: store.clone(),
            platform: platform.clone(),
            predictive: None,
            notifier: Arc::new(NullNotifier::default()),
        },
    );
    Harness {
        controller,
        platform,
        store,
    }
}

// ---------------------------------------------------------------------------
// 1. Emergency pause scenario
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_emergency_pause_emits_exactly_one_critical_job() {
    // roas = 45 / 150 = 0.3 < 0.5, spend 150 > 100: emergency territory.
    let counters = CampaignCounters {
        impressions: 10_000,
        clicks: 200,
        conversions: 5,
        spend: 150.0,
        revenue: 45.0,
        reach: 4_000,
    };
    // A rule that also matches this campaign; the safety override must
    // still win and fire exactly once.
    let cut_losers = OptimizationRule {
        name: "cut-losers".to_string(),
        condition: RuleCondition {
            metric: "roas".to_string(),
            operator: ConditionOperator::LessThan,
            threshold: 0.5,
            timeframe_hours: 24,
            min_data_points: 100,
        },
        action: RuleAction {
            kind: RuleActionKind::Decrease,
            magnitude: 0.3,
            unit: RuleActionUnit::Percentage,
            max_change: 0.5,
        },
        ..scale_winners_rule()
    };
    let h = harness(
        "shop-1",
        vec![campaign("shop-1", "c-1", counters)],
        shop_config(vec![scale_winners_rule(), cut_losers]),
    );

    let report = h.controller.run_cycle().await;

    assert_eq!(report.emergency_pauses, 1);
    let calls = h.platform.calls.lock().unwrap().clone();
    assert_eq!(
        calls.iter().filter(|c| c.starts_with("pause:")).count(),
        1,
        "calls: {:?}",
        calls
    );
    // Critical priority outranks everything else for this campaign.
    assert_eq!(calls[0], "pause:c-1");
    assert_eq!(
        h.store.statuses.lock().unwrap().get("c-1"),
        Some(&CampaignStatus::Paused)
    );
}

#[tokio::test]
async fn test_no_emergency_when_spend_below_guard() {
    // Same terrible ROAS but only $50 spent: not enough signal to pause.
    let counters = CampaignCounters {
        impressions: 3_000,
        clicks: 60,
        conversions: 1,
        spend: 50.0,
        revenue: 15.0,
        reach: 1_500,
    };
    let h = harness(
        "shop-1",
        vec![campaign("shop-1", "c-1", counters)],
        shop_config(vec![scale_winners_rule()]),
    );

    let report = h.controller.run_cycle().await;

    assert_eq!(report.emergency_pauses, 0);
    let calls = h.platform.calls.lock().unwrap().clone();
    assert!(calls.iter().all(|c| !c.starts_with("pause:")));
}

// ---------------------------------------------------------------------------
// 2. Rule cooldown + execution cap over simulated cycles
// ---------------------------------------------------------------------------

#[test]
fn test_capped_rule_fires_thrice_then_goes_silent() {
    let engine = RuleEngine::new();
    let rule = scale_winners_rule();
    let rule_id = rule.id;
    engine.load_strategies("shop-1", vec![shop_config(vec![rule]).strategies.remove(0)]);

    let counters = CampaignCounters {
        impressions: 50_000,
        clicks: 1_000,
        conversions: 80,
        spend: 100.0,
        revenue: 400.0,
        reach: 20_000,
    };
    let c = campaign("shop-1", "c-1", counters);
    let metrics = adpilot_metrics::compute_metrics(&c.counters);
    let settings = GlobalSettings::default();
    let t0 = Utc::now();

    // Four eligible cycles, 25h apart so cooldown never blocks.
    for cycle in 0..4 {
        let now = t0 + ChronoDuration::hours(25 * cycle);
        let firings = engine.evaluate_campaign_at(now, "shop-1", &c, &metrics, &settings);
        if cycle < 3 {
            assert_eq!(firings.len(), 1, "cycle {} should fire", cycle);
            match firings[0].proposed {
                ProposedChange::SetValue(v) => {
                    assert!(v <= c.daily_budget * 1.5 + 1e-9, "cycle {}: {}", cycle, v)
                }
                ref other => panic!("expected SetValue, got {:?}", other),
            }
            engine.mark_fired_at(now, "shop-1", rule_id);
        } else {
            // Cap of 3 reached: eligible by time, silent by exhaustion.
            assert!(firings.is_empty(), "cycle {} must not fire", cycle);
        }
    }
}

#[tokio::test]
async fn test_rule_cooldown_holds_across_controller_cycles() {
    let counters = CampaignCounters {
        impressions: 50_000,
        clicks: 1_000,
        conversions: 80,
        spend: 100.0,
        revenue: 400.0,
        reach: 20_000,
    };
    // Threshold above the agent's cold-start confidence, so only rule
    // output reaches the queue in this scenario.
    let mut config = shop_config(vec![scale_winners_rule()]);
    config.settings.min_confidence_threshold = 0.7;
    let h = harness("shop-1", vec![campaign("shop-1", "c-1", counters)], config);

    h.controller.run_cycle().await;
    let first_budget_sets = h
        .platform
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.starts_with("budget:c-1:135"))
        .count();
    assert_eq!(first_budget_sets, 1);

    // Immediately re-running leaves the rule inside its 24h cooldown,
    // even though the shop config is re-loaded from the store.
    h.platform.calls.lock().unwrap().clear();
    h.controller.run_cycle().await;
    let second_budget_sets = h
        .platform
        .calls
        .lock()
        .unwrap()
        .iter()
        .filter(|c| c.starts_with("budget:"))
        .count();
    assert_eq!(second_budget_sets, 0);
}

// ---------------------------------------------------------------------------
// 3. Thompson sampling allocation
// ---------------------------------------------------------------------------

#[test]
fn test_thompson_prefers_strong_variant_across_repeated_draws() {
    let sampler = ThompsonSampler::new();
    for i in 0..100 {
        sampler.record_outcome("c-1", "variant-a", i < 80);
        sampler.record_outcome("c-1", "variant-b", i < 20);
    }

    let variants = ["variant-a".to_string(), "variant-b".to_string()];
    let mut rng = StdRng::seed_from_u64(2024);
    let mut a_first = 0;
    for _ in 0..100 {
        let ranking = sampler.sample_with_rng("c-1", &variants, &mut rng);
        if ranking[0].variant == "variant-a" {
            a_first += 1;
        }
    }
    assert!(a_first >= 90, "a_first = {}", a_first);
}

// ---------------------------------------------------------------------------
// 4. Learner feedback from executed jobs
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_observed_improvement_becomes_agent_reward() {
    // roas 2.0; a budget change makes the store report 50% more revenue,
    // so the executed job carries a positive observed improvement.
    let counters = CampaignCounters {
        impressions: 40_000,
        clicks: 800,
        conversions: 60,
        spend: 100.0,
        revenue: 200.0,
        reach: 15_000,
    };
    let c = campaign("shop-1", "c-1", counters);
    let starting_metrics = adpilot_metrics::compute_metrics(&c.counters);

    let h = harness("shop-1", vec![c], shop_config(Vec::new()));
    *h.store.uplift_on_budget.lock().unwrap() = 0.5;

    // With an untrained table the greedy pick is a budget move; a few
    // cycles absorb the occasional exploratory detour.
    let budget_actions = [AgentAction::IncreaseBudget, AgentAction::DecreaseBudget];
    let mut learned = 0.0_f64;
    for _ in 0..10 {
        h.controller.run_cycle().await;
        learned = budget_actions
            .iter()
            .map(|&a| h.controller.agent().q_value("c-1", &starting_metrics, a))
            .fold(f64::MIN, f64::max);
        if learned > 0.0 {
            break;
        }
    }
    assert!(
        learned > 0.0,
        "agent never earned a positive value from an applied change: {}",
        learned
    );
}

#[tokio::test]
async fn test_creative_rotation_targets_bandit_ranked_variant() {
    let counters = CampaignCounters {
        impressions: 40_000,
        clicks: 800,
        conversions: 60,
        spend: 100.0,
        revenue: 200.0,
        reach: 15_000,
    };
    let mut c = campaign("shop-1", "c-1", counters);
    c.creative_variants = vec!["var-a".to_string(), "var-b".to_string()];
    let starting_metrics = adpilot_metrics::compute_metrics(&c.counters);

    let h = harness("shop-1", vec![c], shop_config(Vec::new()));

    // Make rotation the agent's dominant action at this state.
    for _ in 0..1_000 {
        h.controller.agent().update(
            "c-1",
            &starting_metrics,
            AgentAction::RotateCreative,
            1.0,
            &starting_metrics,
        );
    }
    // var-a has a flawless record, var-b a hopeless one.
    for _ in 0..100 {
        h.controller.sampler().record_outcome("c-1", "var-a", true);
        h.controller.sampler().record_outcome("c-1", "var-b", false);
    }

    let mut rotation = None;
    for _ in 0..10 {
        h.controller.run_cycle().await;
        rotation = h
            .platform
            .calls
            .lock()
            .unwrap()
            .iter()
            .find(|entry| entry.starts_with("creative:c-1:"))
            .cloned();
        if rotation.is_some() {
            break;
        }
    }
    assert_eq!(rotation.as_deref(), Some("creative:c-1:var-a"));
    // The applied rotation itself counts as a new trial for the variant.
    assert!(h.controller.sampler().outcomes("c-1", "var-a").trials > 100);
}

// ---------------------------------------------------------------------------
// 5. Cycle reports and containment
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_cycle_report_counts_executions() {
    let counters = CampaignCounters {
        impressions: 50_000,
        clicks: 1_000,
        conversions: 80,
        spend: 100.0,
        revenue: 400.0,
        reach: 20_000,
    };
    let h = harness(
        "shop-1",
        vec![campaign("shop-1", "c-1", counters)],
        shop_config(vec![scale_winners_rule()]),
    );

    let report = h.controller.run_cycle().await;

    assert_eq!(report.shops_processed, 1);
    assert_eq!(report.campaigns_processed, 1);
    assert!(report.jobs_created >= 1);
    assert_eq!(report.jobs_completed, report.jobs_created);
    assert_eq!(report.jobs_failed, 0);
    assert!(report.finished_at >= report.started_at);
}

#[tokio::test]
async fn test_disabled_shop_is_skipped() {
    let counters = CampaignCounters {
        impressions: 50_000,
        clicks: 1_000,
        conversions: 80,
        spend: 100.0,
        revenue: 400.0,
        reach: 20_000,
    };
    let mut config = shop_config(vec![scale_winners_rule()]);
    config.is_enabled = false;
    let h = harness(
        "shop-1",
        vec![campaign("shop-1", "c-1", counters)],
        config,
    );

    let report = h.controller.run_cycle().await;

    assert_eq!(report.campaigns_processed, 0);
    assert_eq!(report.jobs_created, 0);
    assert!(h.platform.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_shop_with_failing_store_does_not_abort_others() {
    struct FlakyConfigStore;

    #[async_trait]
    impl ConfigStore for FlakyConfigStore {
        async fn list_shops(&self) -> OptimizerResult<Vec<String>> {
            Ok(vec!["broken".to_string(), "healthy".to_string()])
        }
        async fn shop_config(&self, shop: &str) -> OptimizerResult<ShopConfig> {
            if shop == "broken" {
                return Err(adpilot_core::error::OptimizerError::Config(
                    "missing config".to_string(),
                ));
            }
            Ok(shop_config(vec![scale_winners_rule()]))
        }
    }

    let counters = CampaignCounters {
        impressions: 50_000,
        clicks: 1_000,
        conversions: 80,
        spend: 100.0,
        revenue: 400.0,
        reach: 20_000,
    };
    let store = Arc::new(FakeCampaignStore::default());
    store
        .campaigns
        .lock()
        .unwrap()
        .push(campaign("healthy", "c-h", counters));
    let platform = Arc::new(RecordingPlatform::default());

    let controller = OptimizationController::new(
        AppConfig::default(),
        ControllerDeps {
            config_store: Arc::new(FlakyConfigStore),
            campaign_store: store,
            platform: platform.clone(),
            predictive: None,
            notifier: Arc::new(NullNotifier::default()),
        },
    );

    let report = controller.run_cycle().await;

    // Both shops were visited; the healthy one still produced work.
    assert_eq!(report.shops_processed, 2);
    assert!(platform
        .calls
        .lock()
        .unwrap()
        .iter()
        .any(|c| c.contains("c-h")));
}
