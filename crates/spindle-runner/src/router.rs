//! Backend selection and request dispatch

use crate::{
    batched::{BatchedEngine, BatchedRequest},
    error::{RunnerError, RunnerResult},
};
use futures::stream::{BoxStream, StreamExt};
use spindle_core::{
    config::{BackendKind, EngineConfig, BACKEND_ENV},
    model::LanguageModel,
    sampling::SamplingOverrides,
    DecodeEngine, GenerationOutput, GenerationRequest, SamplingConfig,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

/// Stream of generation events returned by the router
pub type OutputStream = BoxStream<'static, RunnerResult<GenerationOutput>>;

/// Stream of serialized generation events, one JSON object per item
pub type JsonStream = BoxStream<'static, RunnerResult<String>>;

/// Pick a backend: explicit choice, then the environment, then batched
/// when an engine is available, otherwise direct.
pub fn select_backend<F>(
    explicit: Option<BackendKind>,
    lookup: F,
    batched_available: bool,
) -> RunnerResult<BackendKind>
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(kind) = explicit {
        return Ok(kind);
    }
    if let Some(value) = lookup(BACKEND_ENV).filter(|v| !v.trim().is_empty()) {
        return Ok(value.parse()?);
    }
    Ok(if batched_available {
        BackendKind::Batched
    } else {
        BackendKind::Direct
    })
}

/// Routes generation requests to the batched engine or the in-process
/// decode engine
pub struct DispatchRouter<M: LanguageModel> {
    backend: BackendKind,
    defaults: SamplingConfig,
    direct: DecodeEngine<M>,
    batched: Option<Arc<dyn BatchedEngine>>,
}

impl<M: LanguageModel + 'static> DispatchRouter<M> {
    /// Build a router, resolving the backend from `config` and the process
    /// environment
    pub fn new(
        config: &EngineConfig,
        direct: DecodeEngine<M>,
        batched: Option<Arc<dyn BatchedEngine>>,
    ) -> RunnerResult<Self> {
        Self::with_lookup(config, direct, batched, |key| std::env::var(key).ok())
    }

    /// Like [`DispatchRouter::new`] with an explicit variable lookup
    pub fn with_lookup<F>(
        config: &EngineConfig,
        direct: DecodeEngine<M>,
        batched: Option<Arc<dyn BatchedEngine>>,
        lookup: F,
    ) -> RunnerResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        config.validate()?;
        let backend = select_backend(config.backend, lookup, batched.is_some())?;
        if backend == BackendKind::Batched && batched.is_none() {
            return Err(RunnerError::BackendUnavailable(backend));
        }

        info!(
            backend = %backend,
            model = direct.model().name(),
            batched_engine = batched.as_ref().map(|e| e.name()),
            "dispatch router ready"
        );

        Ok(Self {
            backend,
            defaults: config.sampling.clone(),
            direct,
            batched,
        })
    }

    pub fn backend(&self) -> BackendKind {
        self.backend
    }

    /// Model-level sampling defaults
    pub fn defaults(&self) -> &SamplingConfig {
        &self.defaults
    }

    /// Merge per-request defaults and call-time overrides over the model defaults
    pub fn resolve_sampling(
        &self,
        request_defaults: &SamplingOverrides,
        call: &SamplingOverrides,
    ) -> RunnerResult<SamplingConfig> {
        Ok(SamplingConfig::resolve(&self.defaults, request_defaults, call)?)
    }

    /// Start a generation on the selected backend
    pub async fn generate(&self, request: GenerationRequest) -> RunnerResult<OutputStream> {
        self.generate_with_cancel(request, CancellationToken::new()).await
    }

    /// Start a generation that stops when `cancel` fires.
    ///
    /// Cancellation is observed by the in-process engine; a batched engine
    /// stops producing once the returned stream is dropped.
    pub async fn generate_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> RunnerResult<OutputStream> {
        debug!(
            request_id = request.request_id(),
            backend = %self.backend,
            "dispatching generation"
        );

        match self.backend {
            BackendKind::Direct => {
                let stream = self.direct.decode_with_cancel(request, cancel)?;
                Ok(stream.into_stream().map(|r| r.map_err(RunnerError::from)).boxed())
            }
            BackendKind::Batched => {
                let engine = self
                    .batched
                    .as_ref()
                    .ok_or(RunnerError::BackendUnavailable(BackendKind::Batched))?;
                let prepared = BatchedRequest::prepare(&request)?;
                let stream = engine
                    .generate(prepared)
                    .await
                    .map_err(RunnerError::Batched)?;
                Ok(stream.map(|r| r.map_err(RunnerError::Batched)).boxed())
            }
        }
    }

    /// Start a generation and serialize every event as one JSON object
    pub async fn generate_iterator(&self, request: GenerationRequest) -> RunnerResult<JsonStream> {
        let events = self.generate(request).await?;
        Ok(events
            .map(|event| event.and_then(|output| Ok(serde_json::to_string(&output)?)))
            .boxed())
    }
}
