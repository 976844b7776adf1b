//! Decode engine: entry point that turns requests into decode streams

use crate::{
    generation::GenerationRequest,
    model::LanguageModel,
    stream::DecodeStream,
    tokenizer::Tokenizer,
    CoreError, Result,
};
use parking_lot::Mutex;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Default)]
struct AdapterState {
    active: Option<String>,
    in_flight: usize,
}

/// Held by every in-flight generation, with or without an adapter; while any
/// lease is alive the active adapter cannot be switched.
#[derive(Debug)]
pub struct AdapterLease {
    state: Arc<Mutex<AdapterState>>,
}

impl Drop for AdapterLease {
    fn drop(&mut self) {
        let mut state = self.state.lock();
        state.in_flight = state.in_flight.saturating_sub(1);
    }
}

/// Runs single-request decode loops against a shared model.
///
/// The engine holds a reference to the model and tokenizer; it never owns
/// their lifecycle. All per-request state lives in the returned
/// [`DecodeStream`].
pub struct DecodeEngine<M: LanguageModel> {
    model: Arc<M>,
    tokenizer: Arc<dyn Tokenizer>,
    adapters: Arc<Mutex<AdapterState>>,
}

impl<M: LanguageModel> Clone for DecodeEngine<M> {
    fn clone(&self) -> Self {
        Self {
            model: Arc::clone(&self.model),
            tokenizer: Arc::clone(&self.tokenizer),
            adapters: Arc::clone(&self.adapters),
        }
    }
}

impl<M: LanguageModel + 'static> DecodeEngine<M> {
    pub fn new(model: Arc<M>, tokenizer: Arc<dyn Tokenizer>) -> Self {
        if model.vocab_size() != tokenizer.vocab_size() {
            warn!(
                model = model.name(),
                model_vocab = model.vocab_size(),
                tokenizer_vocab = tokenizer.vocab_size(),
                "model and tokenizer vocabulary sizes differ"
            );
        }

        Self {
            model,
            tokenizer,
            adapters: Arc::new(Mutex::new(AdapterState::default())),
        }
    }

    pub fn model(&self) -> &Arc<M> {
        &self.model
    }

    pub fn tokenizer(&self) -> &Arc<dyn Tokenizer> {
        &self.tokenizer
    }

    /// Whether the underlying model can switch adapters
    pub fn supports_adapters(&self) -> bool {
        self.model.supports_adapters()
    }

    /// Name of the adapter most recently activated
    pub fn active_adapter(&self) -> Option<String> {
        self.adapters.lock().active.clone()
    }

    /// Start a generation that can only end by completion, error or drop
    pub fn decode(&self, request: GenerationRequest) -> Result<DecodeStream<M>> {
        self.decode_with_cancel(request, CancellationToken::new())
    }

    /// Start a generation that also ends when `cancel` fires.
    ///
    /// Configuration problems (an unsupported adapter, or an adapter switch
    /// while other generations are in flight) are reported here,
    /// before the model is invoked.
    pub fn decode_with_cancel(
        &self,
        request: GenerationRequest,
        cancel: CancellationToken,
    ) -> Result<DecodeStream<M>> {
        let lease = self.acquire_lease(request.adapter(), request.request_id())?;

        info!(
            request_id = request.request_id(),
            model = self.model.name(),
            prompt_tokens = request.prompt_token_ids().len(),
            max_new_tokens = request.sampling().max_new_tokens,
            greedy = request.sampling().is_greedy(),
            stop_sequences = request.stop().len(),
            "starting generation"
        );

        Ok(DecodeStream::new(
            request,
            Arc::clone(&self.model),
            Arc::clone(&self.tokenizer),
            cancel,
            lease,
        ))
    }

    /// Register a generation as in flight, activating `adapter` first when it
    /// differs from the active one and nothing else is running.
    fn acquire_lease(&self, adapter: Option<&str>, request_id: &str) -> Result<AdapterLease> {
        if let Some(name) = adapter {
            if !self.model.supports_adapters() {
                warn!(
                    request_id,
                    adapter = name,
                    "adapter requested on a model without adapter support"
                );
                return Err(CoreError::configuration(
                    "ADAPTER_UNSUPPORTED",
                    format!("Model '{}' does not support adapters", self.model.name()),
                    format!("Adapter '{}' requested by '{}'", name, request_id),
                    "Remove the adapter from the request or load a model with adapters",
                ));
            }
        }

        let mut state = self.adapters.lock();
        if let Some(name) = adapter {
            let active = state.active.clone();
            match active.as_deref() {
                Some(active) if active == name => {}
                active if state.in_flight > 0 => {
                    let active = active.unwrap_or("base model");
                    warn!(
                        request_id,
                        adapter = name,
                        active,
                        in_flight = state.in_flight,
                        "adapter switch rejected while generations are in flight"
                    );
                    return Err(CoreError::configuration(
                        "ADAPTER_SWITCH_IN_FLIGHT",
                        format!(
                            "Cannot switch to adapter '{}' while {} generation(s) run on '{}'",
                            name, state.in_flight, active
                        ),
                        format!("Adapter selection for '{}'", request_id),
                        "Retry once in-flight generations finish",
                    ));
                }
                _ => {
                    self.model.set_adapter(name)?;
                    debug!(request_id, adapter = name, "activated adapter");
                    state.active = Some(name.to_string());
                }
            }
        }
        state.in_flight += 1;

        Ok(AdapterLease {
            state: Arc::clone(&self.adapters),
        })
    }
}
