//! Contract for external engines that schedule and batch many requests

use crate::error::{RunnerError, RunnerResult};
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use spindle_core::{
    config::BackendKind, sampling::GREEDY_TEMPERATURE_THRESHOLD, GenerationOutput,
    GenerationRequest, SamplingConfig,
};

/// Event stream produced by a batched engine
pub type BatchedStream = BoxStream<'static, anyhow::Result<GenerationOutput>>;

/// Request handed to a [`BatchedEngine`].
///
/// `sampling.stop` holds the request's normalized stop strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchedRequest {
    pub request_id: String,
    pub prompt_token_ids: Vec<u32>,
    pub sampling: SamplingConfig,
}

impl BatchedRequest {
    /// Translate a generation request for a batched engine.
    ///
    /// Adapters cannot be selected per request on this path. Greedy
    /// temperatures disable nucleus filtering.
    pub fn prepare(request: &GenerationRequest) -> RunnerResult<Self> {
        if let Some(adapter) = request.adapter() {
            return Err(RunnerError::AdapterUnsupported {
                adapter: adapter.to_string(),
                backend: BackendKind::Batched,
            });
        }

        let mut sampling = request.sampling().clone();
        sampling.stop = request.stop().iter().map(str::to_string).collect();
        if sampling.temperature <= GREEDY_TEMPERATURE_THRESHOLD {
            sampling.top_p = 1.0;
        }

        Ok(Self {
            request_id: request.request_id().to_string(),
            prompt_token_ids: request.prompt_token_ids().to_vec(),
            sampling,
        })
    }
}

/// An external engine that runs many generations together
#[async_trait]
pub trait BatchedEngine: Send + Sync {
    /// Engine name used in diagnostics
    fn name(&self) -> &str;

    /// Submit a request; the returned stream follows the same event contract
    /// as the in-process decode engine.
    async fn generate(&self, request: BatchedRequest) -> anyhow::Result<BatchedStream>;
}
