//! Model seam and incremental cache ownership

use crate::{CoreError, Result};
use std::sync::Arc;
use tracing::debug;

/// Output of one forward pass
pub struct ModelOutput<C> {
    /// Next-token scores for the last input position, one per vocabulary entry
    pub logits: Vec<f32>,
    /// Incremental cache covering every position seen so far
    pub cache: C,
}

/// Core trait for causal language models driven by the decode engine.
///
/// Implementations hold read-only weights shared by every request; all
/// per-request state lives in the `Cache` values they hand out.
pub trait LanguageModel: Send + Sync {
    /// Opaque incremental (key/value) cache
    type Cache: Send;

    /// Get the model name
    fn name(&self) -> &str;

    /// Get vocabulary size
    fn vocab_size(&self) -> usize;

    /// Run the model over `input_ids`, continuing from `past` when given.
    ///
    /// Prefill passes the whole prompt and no cache; every later step passes
    /// only the newest token. `past` is left untouched; the returned cache
    /// replaces it.
    fn forward(
        &self,
        input_ids: &[u32],
        past: Option<&Self::Cache>,
    ) -> Result<ModelOutput<Self::Cache>>;

    /// Give a cache back to the model (device memory, pooled buffers, ...)
    fn release_cache(&self, cache: Self::Cache) {
        drop(cache);
    }

    /// Check if the model can switch between fine-tuned adapters
    fn supports_adapters(&self) -> bool {
        false
    }

    /// Activate the named adapter for subsequent forward passes
    fn set_adapter(&self, name: &str) -> Result<()> {
        Err(CoreError::configuration(
            "ADAPTER_UNSUPPORTED",
            format!("Model '{}' does not support adapter '{}'", self.name(), name),
            "Adapter selection",
            "Remove the adapter from the request or load a model with adapters",
        ))
    }
}

/// Exclusive owner of one request's incremental cache.
///
/// The cache goes back to the model when it is replaced, when
/// [`CacheSlot::release`] is called, or when the slot is dropped, so every
/// exit path of a generation gives it back exactly once.
pub struct CacheSlot<M: LanguageModel> {
    model: Arc<M>,
    cache: Option<M::Cache>,
}

impl<M: LanguageModel> CacheSlot<M> {
    pub fn new(model: Arc<M>) -> Self {
        Self { model, cache: None }
    }

    pub fn get(&self) -> Option<&M::Cache> {
        self.cache.as_ref()
    }

    pub fn is_held(&self) -> bool {
        self.cache.is_some()
    }

    /// Store an updated cache, releasing the previous one
    pub fn replace(&mut self, cache: M::Cache) {
        if let Some(old) = self.cache.replace(cache) {
            self.model.release_cache(old);
        }
    }

    /// Release the held cache, if any
    pub fn release(&mut self) {
        if let Some(cache) = self.cache.take() {
            debug!(model = self.model.name(), "releasing incremental cache");
            self.model.release_cache(cache);
        }
    }
}

impl<M: LanguageModel> Drop for CacheSlot<M> {
    fn drop(&mut self) {
        self.release();
    }
}
