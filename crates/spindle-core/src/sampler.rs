//! Next-token selection from processed scores

use crate::{
    logits::{log_softmax_at, softmax},
    sampling::SamplingConfig,
    CoreError, Result,
};
use rand::{distributions::WeightedIndex, prelude::Distribution, rngs::StdRng, SeedableRng};

/// Outcome of one selection step.
///
/// Two candidates are drawn per step; only `token` is appended to the
/// output. `spare` is the runner-up (greedy) or the second draw without
/// replacement (sampling) and is reported for diagnostics only.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TokenSelection {
    pub token: u32,
    pub spare: Option<u32>,
    /// Log-probability of `token` under the processed distribution
    pub logprob: f32,
}

/// Chooses the next token from processed scores
pub trait Sampler: Send {
    fn select(&mut self, scores: &[f32]) -> Result<TokenSelection>;
}

/// Build the sampler matching a resolved configuration
pub fn sampler_for(config: &SamplingConfig) -> Box<dyn Sampler> {
    if config.is_greedy() {
        Box::new(GreedySampler)
    } else {
        Box::new(MultinomialSampler::new(config.seed))
    }
}

/// Highest-scoring token, with the runner-up as spare
#[derive(Debug, Default, Clone, Copy)]
pub struct GreedySampler;

impl Sampler for GreedySampler {
    fn select(&mut self, scores: &[f32]) -> Result<TokenSelection> {
        let mut first: Option<(usize, f32)> = None;
        let mut second: Option<(usize, f32)> = None;

        for (i, &v) in scores.iter().enumerate() {
            if v.is_nan() {
                continue;
            }
            match first {
                Some((_, best)) if v <= best => {
                    if second.map_or(true, |(_, s)| v > s) {
                        second = Some((i, v));
                    }
                }
                _ => {
                    second = first;
                    first = Some((i, v));
                }
            }
        }

        let (token, _) = first.ok_or_else(|| {
            CoreError::generation(
                "SAMPLING_FAILED",
                "Failed to find maximum logit",
                "Greedy selection",
                "Check that logits contain valid float values",
            )
        })?;

        Ok(TokenSelection {
            token: token as u32,
            spare: second.map(|(i, _)| i as u32),
            logprob: log_softmax_at(scores, token),
        })
    }
}

/// Draws from the softmax distribution of the scores
#[derive(Debug)]
pub struct MultinomialSampler {
    rng: StdRng,
}

impl MultinomialSampler {
    /// Seeded samplers are reproducible; unseeded ones draw from OS entropy
    pub fn new(seed: Option<u64>) -> Self {
        let rng = match seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self { rng }
    }
}

impl Sampler for MultinomialSampler {
    fn select(&mut self, scores: &[f32]) -> Result<TokenSelection> {
        if scores.is_empty() {
            return Err(CoreError::generation(
                "EMPTY_DISTRIBUTION",
                "Cannot sample from empty probability distribution",
                "Multinomial selection",
                "Check that probabilities are properly computed",
            ));
        }

        let probs = softmax(scores);
        let mut dist = WeightedIndex::new(&probs).map_err(|e| {
            CoreError::generation(
                "INVALID_DISTRIBUTION",
                format!("Cannot build sampling distribution: {}", e),
                "Multinomial selection",
                "Check that the processed logits are finite",
            )
        })?;

        let token = dist.sample(&mut self.rng);

        // Second draw without replacement; absent when nothing else has mass.
        let spare = match dist.update_weights(&[(token, &0.0)]) {
            Ok(()) => Some(dist.sample(&mut self.rng) as u32),
            Err(_) => None,
        };

        Ok(TokenSelection {
            token: token as u32,
            spare,
            logprob: log_softmax_at(scores, token),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greedy_top_two() {
        let logits = vec![0.1, 0.2, 0.3, 0.15, 0.1, 0.8];
        let selection = GreedySampler.select(&logits).unwrap();
        assert_eq!(selection.token, 5);
        assert_eq!(selection.spare, Some(2));
    }

    #[test]
    fn test_greedy_single_candidate() {
        let logits = vec![f32::NEG_INFINITY, 1.0];
        let selection = GreedySampler.select(&logits).unwrap();
        assert_eq!(selection.token, 1);
        assert_eq!(selection.spare, Some(0));
        assert!((selection.logprob - 0.0).abs() < 1e-6);
    }

    #[test]
    fn test_greedy_rejects_nan_only() {
        assert!(GreedySampler.select(&[f32::NAN, f32::NAN]).is_err());
    }

    #[test]
    fn test_multinomial_respects_mask() {
        let mut sampler = MultinomialSampler::new(Some(7));
        let logits = vec![f32::NEG_INFINITY, 0.0, f32::NEG_INFINITY];
        for _ in 0..20 {
            let selection = sampler.select(&logits).unwrap();
            assert_eq!(selection.token, 1);
            assert_eq!(selection.spare, None);
        }
    }

    #[test]
    fn test_multinomial_draws_distinct_spare() {
        let mut sampler = MultinomialSampler::new(Some(11));
        let logits = vec![0.0, 0.0, 0.0, 0.0];
        for _ in 0..20 {
            let selection = sampler.select(&logits).unwrap();
            assert_ne!(Some(selection.token), selection.spare);
        }
    }

    #[test]
    fn test_multinomial_seed_reproducible() {
        let logits: Vec<f32> = (0..32).map(|i| (i % 7) as f32 * 0.3).collect();
        let mut a = MultinomialSampler::new(Some(42));
        let mut b = MultinomialSampler::new(Some(42));
        for _ in 0..16 {
            assert_eq!(a.select(&logits).unwrap(), b.select(&logits).unwrap());
        }
    }

    #[test]
    fn test_sampler_for_config() {
        let greedy = SamplingConfig {
            temperature: 0.0,
            ..Default::default()
        };
        let mut sampler = sampler_for(&greedy);
        assert_eq!(sampler.select(&[0.0, 3.0, 1.0]).unwrap().token, 1);
    }
}
