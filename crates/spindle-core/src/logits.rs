//! Logits processing pipeline
//!
//! Scores for the next token go through a fixed sequence of stages:
//! repetition penalty (only when a history is supplied), temperature
//! scaling, top-k filtering and top-p (nucleus) filtering. Filtered
//! candidates are set to negative infinity. A stage never leaves the
//! distribution empty: if it would, only the highest-scoring candidate from
//! before that stage is kept.

use crate::{sampling::SamplingConfig, CoreError, Result};
use std::collections::HashSet;
use std::fmt;
use tracing::warn;

/// A single transformation applied to next-token scores
pub trait LogitsStage: Send + Sync + fmt::Debug {
    /// Stage name used in diagnostics
    fn name(&self) -> &'static str;

    /// Transform `scores` in place
    fn apply(&self, history: Option<&[u32]>, scores: &mut [f32]);
}

/// Penalize tokens that already occur in the history
#[derive(Debug, Clone, Copy)]
pub struct RepetitionPenalty(pub f32);

impl LogitsStage for RepetitionPenalty {
    fn name(&self) -> &'static str {
        "repetition_penalty"
    }

    fn apply(&self, history: Option<&[u32]>, scores: &mut [f32]) {
        let Some(history) = history else {
            return;
        };

        // Each distinct token is penalized once, however often it occurs.
        let seen: HashSet<u32> = history.iter().copied().collect();
        for token in seen {
            if let Some(score) = scores.get_mut(token as usize) {
                if *score > 0.0 {
                    *score /= self.0;
                } else {
                    *score *= self.0;
                }
            }
        }
    }
}

/// Divide every score by the temperature
#[derive(Debug, Clone, Copy)]
pub struct Temperature(pub f32);

impl LogitsStage for Temperature {
    fn name(&self) -> &'static str {
        "temperature"
    }

    fn apply(&self, _history: Option<&[u32]>, scores: &mut [f32]) {
        for score in scores.iter_mut() {
            *score /= self.0;
        }
    }
}

/// Keep only the `k` highest-scoring candidates
#[derive(Debug, Clone, Copy)]
pub struct TopK(pub usize);

impl LogitsStage for TopK {
    fn name(&self) -> &'static str {
        "top_k"
    }

    fn apply(&self, _history: Option<&[u32]>, scores: &mut [f32]) {
        if self.0 == 0 || self.0 >= scores.len() {
            return;
        }

        let sorted = sorted_indices_desc(scores);
        for &idx in sorted.iter().skip(self.0) {
            scores[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Keep the smallest set of candidates whose cumulative probability reaches `p`
#[derive(Debug, Clone, Copy)]
pub struct TopP(pub f32);

impl LogitsStage for TopP {
    fn name(&self) -> &'static str {
        "top_p"
    }

    fn apply(&self, _history: Option<&[u32]>, scores: &mut [f32]) {
        let sorted = sorted_indices_desc(scores);
        let sorted_scores: Vec<f32> = sorted.iter().map(|&i| scores[i]).collect();
        let sorted_probs = softmax(&sorted_scores);

        let mut cumulative = 0.0;
        let mut cutoff = sorted_probs.len();
        for (i, &prob) in sorted_probs.iter().enumerate() {
            cumulative += prob;
            if cumulative >= self.0 {
                cutoff = i + 1;
                break;
            }
        }

        for &idx in sorted.iter().skip(cutoff) {
            scores[idx] = f32::NEG_INFINITY;
        }
    }
}

/// Ordered composition of [`LogitsStage`]s
#[derive(Debug, Default)]
pub struct LogitsProcessor {
    stages: Vec<Box<dyn LogitsStage>>,
}

impl LogitsProcessor {
    /// Build the pipeline for a resolved sampling configuration.
    ///
    /// Stages that would be no-ops are left out: the penalty when it is not
    /// above 1.0, the temperature when it selects greedy decoding or equals
    /// 1.0, top-k when it is 0 and top-p when it is 1.0 or selects greedy.
    pub fn from_config(config: &SamplingConfig) -> Self {
        let mut stages: Vec<Box<dyn LogitsStage>> = Vec::with_capacity(4);

        if config.repetition_penalty > 1.0 {
            stages.push(Box::new(RepetitionPenalty(config.repetition_penalty)));
        }
        if config.temperature >= crate::sampling::GREEDY_TEMPERATURE_THRESHOLD
            && config.temperature != 1.0
        {
            stages.push(Box::new(Temperature(config.temperature)));
        }
        if config.top_k > 0 {
            stages.push(Box::new(TopK(config.top_k)));
        }
        if config.top_p >= crate::sampling::GREEDY_TOP_P_THRESHOLD && config.top_p < 1.0 {
            stages.push(Box::new(TopP(config.top_p)));
        }

        Self { stages }
    }

    /// Build a pipeline from explicit stages, applied in the given order
    pub fn with_stages(stages: Vec<Box<dyn LogitsStage>>) -> Self {
        Self { stages }
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Names of the configured stages, in application order
    pub fn stage_names(&self) -> Vec<&'static str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Apply every stage to a copy of `raw_scores`
    pub fn process(&self, history: Option<&[u32]>, raw_scores: &[f32]) -> Result<Vec<f32>> {
        if raw_scores.is_empty() {
            return Err(CoreError::generation(
                "EMPTY_LOGITS",
                "Cannot process empty logits",
                "Logits processing",
                "Check that the model forward pass produces valid logits",
            ));
        }

        let mut scores = raw_scores.to_vec();
        for stage in &self.stages {
            let best = argmax(&scores);
            stage.apply(history, &mut scores);

            if !has_candidate(&scores) {
                // Fail closed on the best candidate seen before this stage.
                warn!(
                    stage = stage.name(),
                    "logits stage removed every candidate, keeping the best one"
                );
                let (idx, value) = best;
                scores.iter_mut().for_each(|s| *s = f32::NEG_INFINITY);
                scores[idx] = if value.is_finite() { value } else { 0.0 };
            }
        }

        Ok(scores)
    }
}

/// Numerically stable softmax; falls back to uniform when nothing is finite
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    if !max_logit.is_finite() {
        return vec![1.0 / logits.len() as f32; logits.len()];
    }

    let exp_logits: Vec<f32> = logits.iter().map(|&x| (x - max_logit).exp()).collect();
    let sum_exp: f32 = exp_logits.iter().sum();

    if sum_exp > 0.0 {
        exp_logits.iter().map(|&x| x / sum_exp).collect()
    } else {
        vec![1.0 / logits.len() as f32; logits.len()]
    }
}

/// Log-probability of `index` under the softmax of `logits`
pub fn log_softmax_at(logits: &[f32], index: usize) -> f32 {
    let max_logit = logits.iter().fold(f32::NEG_INFINITY, |acc, &x| acc.max(x));
    if !max_logit.is_finite() {
        return -(logits.len() as f32).ln();
    }
    let log_sum = logits
        .iter()
        .map(|&x| (x - max_logit).exp())
        .sum::<f32>()
        .ln();
    logits.get(index).map_or(f32::NEG_INFINITY, |&x| x - max_logit - log_sum)
}

/// Index and value of the highest score; NaN never wins
pub fn argmax(scores: &[f32]) -> (usize, f32) {
    scores
        .iter()
        .copied()
        .enumerate()
        .fold((0, f32::NEG_INFINITY), |best, (i, v)| {
            if v > best.1 {
                (i, v)
            } else {
                best
            }
        })
}

fn has_candidate(scores: &[f32]) -> bool {
    scores.iter().any(|s| s.is_finite())
}

fn sorted_indices_desc(scores: &[f32]) -> Vec<usize> {
    let mut indices: Vec<usize> = (0..scores.len()).collect();
    indices.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    indices
}
