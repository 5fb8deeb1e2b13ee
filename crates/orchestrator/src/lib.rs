//! The optimization control plane — merges rule, agent, and predictive
//! recommendations, turns them into audited jobs, and drives the
//! per-shop optimization cycle.

pub mod controller;
pub mod ports;
pub mod queue;
pub mod recommend;

pub use controller::{spawn_controller, ControllerDeps, CycleReport, OptimizationController};
pub use ports::{
    AdsPlatformClient, CampaignStore, ConfigStore, NotificationSink, PlatformAck, PredictiveModel,
    Prediction, ShopConfig,
};
pub use queue::{JobStatus, OptimizationJob, OptimizationJobQueue, OptimizationResult};
pub use recommend::{aggregate, NormalizedRecommendation, PlannedAction, Recommendation};
