//! Pull-driven decode loop for a single request
//!
//! A [`DecodeStream`] performs no work until it is polled. Each call to
//! [`DecodeStream::next`] runs decode steps until one produces an event
//! (steps whose text may still grow into a stop string are withheld), so a
//! consumer that stops pulling stops the computation. Dropping the stream at
//! any point gives the incremental cache back to the model.

use crate::{
    engine::AdapterLease,
    generation::{FinishReason, GenerationOutput, GenerationRequest},
    logits::LogitsProcessor,
    model::{CacheSlot, LanguageModel},
    sampler::{sampler_for, Sampler},
    stop::StopOutcome,
    tokenizer::{DecodeOptions, Tokenizer},
    CoreError, Result,
};
use futures::Stream;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

/// Mutable state owned by one in-flight generation
struct DecodeState<M: LanguageModel> {
    /// Prompt followed by every generated token
    tokens: Vec<u32>,
    prompt_len: usize,
    cache: CacheSlot<M>,
    step: usize,
    last_token: Option<u32>,
    /// Latest decoded (and stop-truncated) text of the generated region
    text: String,
    cumulative_logprob: f64,
}

impl<M: LanguageModel> DecodeState<M> {
    fn new(model: Arc<M>, prompt: &[u32], max_new_tokens: usize) -> Self {
        let mut tokens = Vec::with_capacity(prompt.len() + max_new_tokens);
        tokens.extend_from_slice(prompt);
        Self {
            tokens,
            prompt_len: prompt.len(),
            cache: CacheSlot::new(model),
            step: 0,
            last_token: None,
            text: String::new(),
            cumulative_logprob: 0.0,
        }
    }

    /// Generated token ids, prompt excluded
    fn generated(&self) -> &[u32] {
        &self.tokens[self.prompt_len..]
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Running,
    Finishing(FinishReason),
    Done,
}

enum StepOutcome {
    Emit(GenerationOutput),
    Withheld,
}

/// Lazy, finite sequence of [`GenerationOutput`] events for one request
pub struct DecodeStream<M: LanguageModel> {
    request: GenerationRequest,
    model: Arc<M>,
    tokenizer: Arc<dyn Tokenizer>,
    processor: LogitsProcessor,
    sampler: Box<dyn Sampler>,
    cancel: CancellationToken,
    state: Option<DecodeState<M>>,
    phase: Phase,
    lease: Option<AdapterLease>,
    started: Instant,
}

impl<M: LanguageModel + 'static> DecodeStream<M> {
    pub(crate) fn new(
        request: GenerationRequest,
        model: Arc<M>,
        tokenizer: Arc<dyn Tokenizer>,
        cancel: CancellationToken,
        lease: AdapterLease,
    ) -> Self {
        let sampling = request.sampling();
        let processor = LogitsProcessor::from_config(sampling);
        let sampler = sampler_for(sampling);
        let state = DecodeState::new(
            Arc::clone(&model),
            request.prompt_token_ids(),
            sampling.max_new_tokens,
        );

        Self {
            request,
            model,
            tokenizer,
            processor,
            sampler,
            cancel,
            state: Some(state),
            phase: Phase::Running,
            lease: Some(lease),
            started: Instant::now(),
        }
    }

    pub fn request(&self) -> &GenerationRequest {
        &self.request
    }

    /// Whether the terminal event (or an error) has been produced
    pub fn is_finished(&self) -> bool {
        self.phase == Phase::Done
    }

    /// Whether an incremental cache is currently held
    pub fn holds_cache(&self) -> bool {
        self.state.as_ref().map_or(false, |s| s.cache.is_held())
    }

    /// Produce the next event, or `None` once the terminal event was returned
    pub async fn next(&mut self) -> Option<Result<GenerationOutput>> {
        loop {
            match self.phase {
                Phase::Done => return None,
                Phase::Finishing(reason) => return Some(Ok(self.finish(reason))),
                Phase::Running => {
                    let exhausted = self
                        .state
                        .as_ref()
                        .map_or(true, |s| s.step >= self.request.sampling().max_new_tokens);
                    if exhausted {
                        return Some(Ok(self.finish(FinishReason::Length)));
                    }

                    match self.step().await {
                        Ok(StepOutcome::Emit(output)) => return Some(Ok(output)),
                        Ok(StepOutcome::Withheld) => {
                            tokio::task::yield_now().await;
                        }
                        Err(err) => {
                            self.abort(&err);
                            return Some(Err(err));
                        }
                    }
                }
            }
        }
    }

    /// Drain the stream and return the terminal event
    pub async fn collect_final(mut self) -> Result<GenerationOutput> {
        let mut last = None;
        while let Some(output) = self.next().await {
            last = Some(output?);
        }
        last.ok_or_else(|| {
            CoreError::generation(
                "STREAM_ALREADY_CONSUMED",
                "Decode stream produced no events",
                "Collecting generation output",
                "Start a new decode for the request",
            )
        })
    }

    /// Adapt into a [`futures::Stream`]
    pub fn into_stream(self) -> impl Stream<Item = Result<GenerationOutput>> + Send
    where
        M::Cache: 'static,
    {
        futures::stream::unfold(self, |mut stream| async move {
            stream.next().await.map(|item| (item, stream))
        })
    }

    async fn step(&mut self) -> Result<StepOutcome> {
        let Some(state) = self.state.as_mut() else {
            return Err(CoreError::generation(
                "STATE_RELEASED",
                "Decode state was already released",
                "Decode step",
                "Start a new decode for the request",
            ));
        };
        let step = state.step;

        if self.cancel.is_cancelled() {
            return Err(CoreError::cancelled(self.request.request_id(), step));
        }

        let output = match state.last_token {
            None => {
                debug!(
                    request_id = self.request.request_id(),
                    prompt_tokens = state.prompt_len,
                    "prefill"
                );
                self.model.forward(&state.tokens, None)
            }
            Some(token) => self.model.forward(&[token], state.cache.get()),
        }
        .map_err(|e| e.at_step(step))?;
        state.cache.replace(output.cache);

        let sampling = self.request.sampling();
        let history = if sampling.uses_history() {
            Some(state.tokens.as_slice())
        } else {
            None
        };
        let scores = self.processor.process(history, &output.logits)?;
        drop(output.logits);

        let selection = self.sampler.select(&scores)?;
        state.tokens.push(selection.token);
        state.last_token = Some(selection.token);
        state.cumulative_logprob += f64::from(selection.logprob);
        state.step += 1;

        let generated = &state.tokens[state.prompt_len..];
        let mut text = self
            .tokenizer
            .decode(generated, &DecodeOptions::GENERATION)
            .await?;

        let outcome = self.request.stop().evaluate(&text);
        trace!(
            request_id = self.request.request_id(),
            step,
            token = selection.token,
            spare = ?selection.spare,
            outcome = ?outcome,
            "decode step"
        );

        let withheld = match outcome {
            StopOutcome::Stopped { at } => {
                text.truncate(at);
                self.phase = Phase::Finishing(FinishReason::Stop);
                false
            }
            StopOutcome::Pending => true,
            StopOutcome::Clear => false,
        };
        state.text = text;

        if withheld {
            return Ok(StepOutcome::Withheld);
        }

        Ok(StepOutcome::Emit(GenerationOutput::partial(
            &self.request,
            state.text.clone(),
            generated.to_vec(),
            state.cumulative_logprob,
        )))
    }

    fn finish(&mut self, reason: FinishReason) -> GenerationOutput {
        self.phase = Phase::Done;
        self.lease.take();

        let (text, token_ids, logprob) = match self.state.take() {
            Some(mut state) => {
                state.cache.release();
                let token_ids = state.generated().to_vec();
                (std::mem::take(&mut state.text), token_ids, state.cumulative_logprob)
            }
            None => (String::new(), Vec::new(), 0.0),
        };

        info!(
            request_id = self.request.request_id(),
            finish_reason = %reason,
            tokens_generated = token_ids.len(),
            elapsed_ms = self.started.elapsed().as_millis() as u64,
            "generation finished"
        );

        GenerationOutput::terminal(&self.request, text, token_ids, logprob, reason)
    }

    fn abort(&mut self, err: &CoreError) {
        self.phase = Phase::Done;
        self.lease.take();
        if let Some(mut state) = self.state.take() {
            state.cache.release();
        }

        if err.is_cancelled() {
            warn!(request_id = self.request.request_id(), "generation cancelled");
        } else {
            warn!(request_id = self.request.request_id(), error = %err, "generation failed");
        }
    }
}
