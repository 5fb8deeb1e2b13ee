//! Thompson Sampling over creative/audience variants.
//!
//! Each variant carries a Beta-Bernoulli posterior built from observed
//! `{successes, trials}`; a draw from every posterior produces the
//! allocation ranking. This is a signal only — nothing here executes a
//! change.

use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::trace;

/// Observed outcomes for one variant within a decision context.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct VariantOutcomes {
    pub successes: u64,
    pub trials: u64,
}

impl Default for VariantOutcomes {
    /// Weak prior used when a variant has no history yet.
    fn default() -> Self {
        Self {
            successes: 1,
            trials: 2,
        }
    }
}

/// One posterior draw for a variant, ready for allocation ranking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariantSample {
    pub variant: String,
    /// The Thompson draw itself; ranking key.
    pub probability: f64,
    /// Posterior mean `alpha / (alpha + beta)`.
    pub expected_value: f64,
    /// 95% credible interval from the posterior's normal approximation.
    pub confidence_interval: (f64, f64),
}

/// Beta-Bernoulli Thompson sampler keyed by `(context, variant)`.
/// Contexts are typically a campaign id plus decision kind.
pub struct ThompsonSampler {
    stats: DashMap<(String, String), VariantOutcomes>,
}

impl ThompsonSampler {
    pub fn new() -> Self {
        Self {
            stats: DashMap::new(),
        }
    }

    /// Record one observed trial outcome for a variant.
    pub fn record_outcome(&self, context: &str, variant: &str, success: bool) {
        let mut entry = self
            .stats
            .entry((context.to_string(), variant.to_string()))
            .or_insert(VariantOutcomes {
                successes: 0,
                trials: 0,
            });
        entry.trials += 1;
        if success {
            entry.successes += 1;
        }
    }

    pub fn outcomes(&self, context: &str, variant: &str) -> VariantOutcomes {
        self.stats
            .get(&(context.to_string(), variant.to_string()))
            .map(|v| *v)
            .unwrap_or_default()
    }

    /// Draw from every variant's posterior and rank descending by the
    /// sampled probability.
    pub fn sample(&self, context: &str, variants: &[String]) -> Vec<VariantSample> {
        self.sample_with_rng(context, variants, &mut rand::thread_rng())
    }

    pub fn sample_with_rng(
        &self,
        context: &str,
        variants: &[String],
        rng: &mut impl Rng,
    ) -> Vec<VariantSample> {
        let mut samples: Vec<VariantSample> = variants
            .iter()
            .map(|variant| {
                let outcomes = self.outcomes(context, variant);
                let alpha = outcomes.successes as f64 + 1.0;
                let beta = (outcomes.trials - outcomes.successes) as f64 + 1.0;

                let draw = sample_beta(rng, alpha, beta);
                let mean = alpha / (alpha + beta);
                let variance =
                    (alpha * beta) / ((alpha + beta).powi(2) * (alpha + beta + 1.0));
                let half_width = 1.96 * variance.sqrt();

                trace!(context = %context, variant = %variant, draw, mean, "Thompson draw");

                VariantSample {
                    variant: variant.clone(),
                    probability: draw,
                    expected_value: mean,
                    confidence_interval: (
                        (mean - half_width).max(0.0),
                        (mean + half_width).min(1.0),
                    ),
                }
            })
            .collect();

        samples.sort_by(|a, b| {
            b.probability
                .partial_cmp(&a.probability)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        samples
    }
}

impl Default for ThompsonSampler {
    fn default() -> Self {
        Self::new()
    }
}

/// Beta(alpha, beta) via two gamma draws normalized to the same scale.
fn sample_beta(rng: &mut impl Rng, alpha: f64, beta: f64) -> f64 {
    let x = sample_gamma(rng, alpha);
    let y = sample_gamma(rng, beta);
    if x + y <= 0.0 {
        return 0.5;
    }
    x / (x + y)
}

/// Marsaglia–Tsang rejection sampling for Gamma(shape, 1).
fn sample_gamma(rng: &mut impl Rng, shape: f64) -> f64 {
    if shape < 1.0 {
        // Boost: Gamma(a) = Gamma(a + 1) * U^(1/a).
        let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        return sample_gamma(rng, shape + 1.0) * u.powf(1.0 / shape);
    }

    let d = shape - 1.0 / 3.0;
    let c = 1.0 / (9.0 * d).sqrt();
    loop {
        let z = sample_standard_normal(rng);
        let v = (1.0 + c * z).powi(3);
        if v <= 0.0 {
            continue;
        }
        let u: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
        if u < 1.0 - 0.0331 * z.powi(4) {
            return d * v;
        }
        if u.ln() < 0.5 * z * z + d * (1.0 - v + v.ln()) {
            return d * v;
        }
    }
}

/// Box–Muller standard normal draw.
fn sample_standard_normal(rng: &mut impl Rng) -> f64 {
    let u1: f64 = rng.gen_range(f64::MIN_POSITIVE..1.0);
    let u2: f64 = rng.gen::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
