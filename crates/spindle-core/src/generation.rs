//! Generation requests and the events emitted while decoding

use crate::{sampling::SamplingConfig, stop::StopSequences, CoreError, Result};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reason why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    /// A stop string matched
    Stop,
    /// `max_new_tokens` tokens were generated
    Length,
}

impl FinishReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stop => "stop",
            Self::Length => "length",
        }
    }
}

impl std::fmt::Display for FinishReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated completion as of some step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletionChunk {
    /// Zero-based output index
    pub index: usize,
    /// Decoded text of the generated region only, stop string excluded
    pub text: String,
    /// Generated token ids so far
    pub token_ids: Vec<u32>,
    /// Summed log-probability of the chosen tokens
    pub cumulative_logprob: f64,
    /// Set on the terminal chunk only
    pub finish_reason: Option<FinishReason>,
}

/// One emitted generation event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationOutput {
    /// Prompt text; left empty since the engine only sees token ids
    #[serde(default)]
    pub prompt: String,
    pub finished: bool,
    pub outputs: Vec<CompletionChunk>,
    pub prompt_token_ids: Vec<u32>,
    pub request_id: String,
}

impl GenerationOutput {
    /// Non-terminal event carrying the text generated so far
    pub fn partial(
        request: &GenerationRequest,
        text: String,
        token_ids: Vec<u32>,
        cumulative_logprob: f64,
    ) -> Self {
        Self::single(request, text, token_ids, cumulative_logprob, None)
    }

    /// Terminal event
    pub fn terminal(
        request: &GenerationRequest,
        text: String,
        token_ids: Vec<u32>,
        cumulative_logprob: f64,
        reason: FinishReason,
    ) -> Self {
        Self::single(request, text, token_ids, cumulative_logprob, Some(reason))
    }

    fn single(
        request: &GenerationRequest,
        text: String,
        token_ids: Vec<u32>,
        cumulative_logprob: f64,
        finish_reason: Option<FinishReason>,
    ) -> Self {
        Self {
            prompt: String::new(),
            finished: finish_reason.is_some(),
            outputs: vec![CompletionChunk {
                index: 0,
                text,
                token_ids,
                cumulative_logprob,
                finish_reason,
            }],
            prompt_token_ids: request.prompt_token_ids().to_vec(),
            request_id: request.request_id().to_string(),
        }
    }

    /// The first completion of this event
    pub fn chunk(&self) -> Option<&CompletionChunk> {
        self.outputs.first()
    }

    /// Finish reason of the first completion
    pub fn finish_reason(&self) -> Option<FinishReason> {
        self.chunk().and_then(|c| c.finish_reason)
    }

    /// Serialize as a single JSON object
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| {
            CoreError::generation(
                "OUTPUT_SERIALIZATION_FAILED",
                format!("Failed to serialize generation output: {}", e),
                "Generation output serialization",
                "Check that generated text is valid UTF-8",
            )
        })
    }
}

/// Immutable description of one generation
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    request_id: String,
    prompt_token_ids: Vec<u32>,
    adapter: Option<String>,
    stop: StopSequences,
    sampling: SamplingConfig,
}

impl GenerationRequest {
    pub fn builder(prompt_token_ids: Vec<u32>) -> GenerationRequestBuilder {
        GenerationRequestBuilder::new(prompt_token_ids)
    }

    pub fn request_id(&self) -> &str {
        &self.request_id
    }

    pub fn prompt_token_ids(&self) -> &[u32] {
        &self.prompt_token_ids
    }

    pub fn adapter(&self) -> Option<&str> {
        self.adapter.as_deref()
    }

    pub fn stop(&self) -> &StopSequences {
        &self.stop
    }

    pub fn sampling(&self) -> &SamplingConfig {
        &self.sampling
    }
}

/// Builder for [`GenerationRequest`]
#[derive(Debug, Clone)]
pub struct GenerationRequestBuilder {
    prompt_token_ids: Vec<u32>,
    request_id: Option<String>,
    adapter: Option<String>,
    stop: Option<Vec<String>>,
    sampling: SamplingConfig,
}

impl GenerationRequestBuilder {
    pub fn new(prompt_token_ids: Vec<u32>) -> Self {
        Self {
            prompt_token_ids,
            request_id: None,
            adapter: None,
            stop: None,
            sampling: SamplingConfig::default(),
        }
    }

    /// Caller-supplied correlation id; a UUID is generated when absent
    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.request_id = Some(id.into());
        self
    }

    pub fn adapter(mut self, name: impl Into<String>) -> Self {
        self.adapter = Some(name.into());
        self
    }

    /// Stop strings for this call; replaces the sampling config's defaults
    pub fn stop<I, S>(mut self, stop: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.stop = Some(stop.into_iter().map(Into::into).collect());
        self
    }

    pub fn sampling(mut self, sampling: SamplingConfig) -> Self {
        self.sampling = sampling;
        self
    }

    pub fn build(self) -> Result<GenerationRequest> {
        if self.prompt_token_ids.is_empty() {
            return Err(CoreError::invalid_input(
                "EMPTY_PROMPT",
                "Prompt token sequence is empty",
                "Generation request validation",
                "Provide at least one prompt token",
            ));
        }
        self.sampling.validate()?;

        let stop = match self.stop {
            Some(stop) => StopSequences::new(stop),
            None => StopSequences::new(self.sampling.stop.iter().cloned()),
        };

        Ok(GenerationRequest {
            request_id: self
                .request_id
                .unwrap_or_else(|| Uuid::new_v4().to_string()),
            prompt_token_ids: self.prompt_token_ids,
            adapter: self.adapter.filter(|name| !name.is_empty()),
            stop,
            sampling: self.sampling,
        })
    }
}
