//! Resolved sampling configuration and the override merge rule

use crate::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Temperatures below this select greedy decoding.
pub const GREEDY_TEMPERATURE_THRESHOLD: f32 = 1e-5;

/// Top-p values below this select greedy decoding.
pub const GREEDY_TOP_P_THRESHOLD: f32 = 1e-8;

/// Fully resolved generation parameters consumed by the decode engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingConfig {
    /// Maximum number of tokens to generate
    pub max_new_tokens: usize,

    /// Temperature for sampling (below 1e-5 = greedy)
    pub temperature: f32,

    /// Top-p (nucleus) sampling threshold
    pub top_p: f32,

    /// Top-k sampling parameter (0 disables the filter)
    pub top_k: usize,

    /// Repetition penalty (1.0 = no penalty)
    pub repetition_penalty: f32,

    /// Default stop strings, used when a request does not carry its own
    pub stop: Vec<String>,

    /// Random seed for reproducible sampled generation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            max_new_tokens: 512,
            temperature: 0.7,
            top_p: 0.9,
            top_k: 50,
            repetition_penalty: 1.0,
            stop: vec![],
            seed: None,
        }
    }
}

impl SamplingConfig {
    /// Merge model defaults, per-request defaults and call-time overrides.
    ///
    /// Precedence is call-time value > per-request default > model default,
    /// applied once, and the result is validated before it is returned.
    pub fn resolve(
        model_defaults: &SamplingConfig,
        request_defaults: &SamplingOverrides,
        call: &SamplingOverrides,
    ) -> Result<Self> {
        let merged = call.apply_to(request_defaults.apply_to(model_defaults.clone()));
        merged.validate()?;
        Ok(merged)
    }

    /// Whether token selection takes the highest-scoring candidates.
    ///
    /// The two thresholds are independent; either one selects greedy.
    pub fn is_greedy(&self) -> bool {
        self.temperature < GREEDY_TEMPERATURE_THRESHOLD || self.top_p < GREEDY_TOP_P_THRESHOLD
    }

    /// Whether the logits processor needs the token history
    pub fn uses_history(&self) -> bool {
        self.repetition_penalty > 1.0
    }

    /// Validate parameter ranges
    pub fn validate(&self) -> Result<()> {
        if !self.temperature.is_finite() || self.temperature < 0.0 {
            return Err(CoreError::invalid_parameter(
                "INVALID_TEMPERATURE",
                format!("Temperature {} is out of range", self.temperature),
                "Sampling configuration validation",
                "Use a finite, non-negative temperature",
                "temperature",
                self.temperature.to_string(),
                "[0.0, inf)",
            ));
        }

        if !(0.0..=1.0).contains(&self.top_p) {
            return Err(CoreError::invalid_parameter(
                "INVALID_TOP_P",
                format!("Top-p {} is out of range", self.top_p),
                "Sampling configuration validation",
                "Use a top-p value between 0.0 and 1.0",
                "top_p",
                self.top_p.to_string(),
                "[0.0, 1.0]",
            ));
        }

        if !self.repetition_penalty.is_finite() || self.repetition_penalty <= 0.0 {
            return Err(CoreError::invalid_parameter(
                "INVALID_REPETITION_PENALTY",
                format!("Repetition penalty {} is out of range", self.repetition_penalty),
                "Sampling configuration validation",
                "Use a positive repetition penalty (1.0 disables it)",
                "repetition_penalty",
                self.repetition_penalty.to_string(),
                "(0.0, inf)",
            ));
        }

        Ok(())
    }
}

/// Optional per-field overrides layered over a [`SamplingConfig`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SamplingOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_new_tokens: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub top_k: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repetition_penalty: Option<f32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stop: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl SamplingOverrides {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_new_tokens(mut self, value: usize) -> Self {
        self.max_new_tokens = Some(value);
        self
    }

    pub fn temperature(mut self, value: f32) -> Self {
        self.temperature = Some(value);
        self
    }

    pub fn top_p(mut self, value: f32) -> Self {
        self.top_p = Some(value);
        self
    }

    pub fn top_k(mut self, value: usize) -> Self {
        self.top_k = Some(value);
        self
    }

    pub fn repetition_penalty(mut self, value: f32) -> Self {
        self.repetition_penalty = Some(value);
        self
    }

    pub fn stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }

    pub fn seed(mut self, value: u64) -> Self {
        self.seed = Some(value);
        self
    }

    /// Overlay every set field onto `base`
    pub fn apply_to(&self, mut base: SamplingConfig) -> SamplingConfig {
        if let Some(v) = self.max_new_tokens {
            base.max_new_tokens = v;
        }
        if let Some(v) = self.temperature {
            base.temperature = v;
        }
        if let Some(v) = self.top_p {
            base.top_p = v;
        }
        if let Some(v) = self.top_k {
            base.top_k = v;
        }
        if let Some(v) = self.repetition_penalty {
            base.repetition_penalty = v;
        }
        if let Some(ref v) = self.stop {
            base.stop = v.clone();
        }
        if let Some(v) = self.seed {
            base.seed = Some(v);
        }
        base
    }
}
