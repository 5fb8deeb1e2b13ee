use serde::{Deserialize, Serialize};

/// Root application configuration. Loaded from environment variables
/// with the prefix `ADPILOT__` and optional TOML config files.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_node_id")]
    pub node_id: String,
    #[serde(default)]
    pub optimizer: OptimizerConfig,
    #[serde(default)]
    pub defaults: GlobalSettings,
}

/// Process-level optimizer tuning.
#[derive(Debug, Clone, Deserialize)]
pub struct OptimizerConfig {
    /// How many shops are optimized concurrently within a cycle.
    #[serde(default = "default_shop_concurrency")]
    pub shop_concurrency: usize,
    /// Bound on a single ad-platform call; an expired call is recorded
    /// as a failed job so the per-campaign lock is always released.
    #[serde(default = "default_platform_timeout_secs")]
    pub platform_call_timeout_secs: u64,
}

/// Engine-wide guard rails and thresholds, used as the fallback when a
/// shop's own settings are absent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GlobalSettings {
    /// Largest budget swing allowed in one cycle, as a fraction (0.5 = ±50%).
    #[serde(default = "default_max_budget_change_pct")]
    pub max_budget_change_pct: f64,
    /// Largest bid swing allowed in one cycle, as a fraction.
    #[serde(default = "default_max_bid_change_pct")]
    pub max_bid_change_pct: f64,
    /// Recommendations below this confidence are dropped before job creation.
    #[serde(default = "default_min_confidence_threshold")]
    pub min_confidence_threshold: f64,
    /// Wall-clock cadence of the optimization loop.
    #[serde(default = "default_cycle_hours")]
    pub cycle_hours: u64,
    /// ROAS below this (with spend above the guard) triggers an emergency pause.
    #[serde(default = "default_emergency_pause_roas")]
    pub emergency_pause_roas: f64,
    /// Minimum spend before the emergency-pause predicate can fire.
    #[serde(default = "default_emergency_min_spend")]
    pub emergency_min_spend: f64,
    /// Actual improvement above this dispatches a notification.
    #[serde(default = "default_notify_threshold")]
    pub notify_threshold: f64,
}

impl AppConfig {
    pub fn load() -> Result<Self, config::ConfigError> {
        let builder = config::Config::builder()
            .add_source(config::File::with_name("adpilot").required(false))
            .add_source(
                config::Environment::with_prefix("ADPILOT")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(","),
            );

        let config = builder.build()?;
        config.try_deserialize()
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            node_id: default_node_id(),
            optimizer: OptimizerConfig::default(),
            defaults: GlobalSettings::default(),
        }
    }
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            shop_concurrency: default_shop_concurrency(),
            platform_call_timeout_secs: default_platform_timeout_secs(),
        }
    }
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            max_budget_change_pct: default_max_budget_change_pct(),
            max_bid_change_pct: default_max_bid_change_pct(),
            min_confidence_threshold: default_min_confidence_threshold(),
            cycle_hours: default_cycle_hours(),
            emergency_pause_roas: default_emergency_pause_roas(),
            emergency_min_spend: default_emergency_min_spend(),
            notify_threshold: default_notify_threshold(),
        }
    }
}

fn default_node_id() -> String {
    "adpilot-01".to_string()
}

fn default_shop_concurrency() -> usize {
    8
}

fn default_platform_timeout_secs() -> u64 {
    30
}

fn default_max_budget_change_pct() -> f64 {
    0.5
}

fn default_max_bid_change_pct() -> f64 {
    0.3
}

fn default_min_confidence_threshold() -> f64 {
    0.6
}

fn default_cycle_hours() -> u64 {
    1
}

fn default_emergency_pause_roas() -> f64 {
    0.5
}

fn default_emergency_min_spend() -> f64 {
    100.0
}

fn default_notify_threshold() -> f64 {
    0.1
}
