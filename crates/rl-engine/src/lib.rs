//! Learning engines for campaign optimization — a per-campaign tabular
//! Q-learning agent for action selection and a Thompson-sampling bandit
//! for creative/audience variant allocation.

pub mod agent;
pub mod bandits;

pub use agent::{ActionSelection, AgentAction, QLearningAgent};
pub use bandits::{ThompsonSampler, VariantOutcomes, VariantSample};
