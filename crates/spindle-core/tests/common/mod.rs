//! Shared fixtures: an instrumented fake model and a small vocabulary

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use spindle_core::{
    model::{LanguageModel, ModelOutput},
    tokenizer::{Tokenizer, VocabTokenizer, Vocabulary},
    CoreError, Result,
};

pub const VOCAB_SIZE: usize = 64;

pub const HELLO: u32 = 10;
pub const ST: u32 = 11;
pub const OP: u32 = 12;
pub const THERE: u32 = 13;
pub const A: u32 = 42;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// `▁w<id>` for every id, with a few readable pieces on top
pub fn tokenizer() -> Arc<dyn Tokenizer> {
    let mut vocab = Vocabulary::new();
    for id in 0..VOCAB_SIZE as u32 {
        vocab.add_token(format!("\u{2581}w{}", id), id);
    }
    vocab.add_special_token("</s>", 1);
    vocab.add_token("\u{2581}Hello", HELLO);
    vocab.add_token("\u{2581}ST", ST);
    vocab.add_token("OP", OP);
    vocab.add_token("\u{2581}there", THERE);
    vocab.add_token("A", A);
    Arc::new(VocabTokenizer::new(vocab))
}

/// What the fake model scores highest
#[derive(Debug, Clone)]
pub enum Script {
    /// The n-th forward call favors the n-th token; the last one repeats
    Tokens(Vec<u32>),
    /// The same logits on every call
    Fixed(Vec<f32>),
    /// Deterministic pseudo-random logits derived from position and last input
    Noise,
}

#[derive(Debug)]
pub struct FakeCache {
    pub positions: usize,
}

/// Fake model counting outstanding cache handles
pub struct FakeModel {
    script: Script,
    fail_on_call: Option<usize>,
    adapters: bool,
    live_caches: AtomicUsize,
    inputs: Mutex<Vec<Vec<u32>>>,
    adapter_calls: Mutex<Vec<String>>,
}

impl FakeModel {
    pub fn new(script: Script) -> Self {
        Self {
            script,
            fail_on_call: None,
            adapters: false,
            live_caches: AtomicUsize::new(0),
            inputs: Mutex::new(Vec::new()),
            adapter_calls: Mutex::new(Vec::new()),
        }
    }

    pub fn repeating(token: u32) -> Self {
        Self::new(Script::Tokens(vec![token]))
    }

    /// Fail the forward call with this zero-based index (0 is prefill)
    pub fn failing_on(mut self, call: usize) -> Self {
        self.fail_on_call = Some(call);
        self
    }

    pub fn with_adapters(mut self) -> Self {
        self.adapters = true;
        self
    }

    pub fn live_caches(&self) -> usize {
        self.live_caches.load(Ordering::SeqCst)
    }

    /// Input ids of every forward call, in order
    pub fn inputs(&self) -> Vec<Vec<u32>> {
        self.inputs.lock().unwrap().clone()
    }

    pub fn forward_calls(&self) -> usize {
        self.inputs.lock().unwrap().len()
    }

    pub fn adapter_calls(&self) -> Vec<String> {
        self.adapter_calls.lock().unwrap().clone()
    }

    fn logits(&self, call: usize, positions: usize, last: u32) -> Vec<f32> {
        match &self.script {
            Script::Tokens(tokens) => {
                let token = tokens[call.min(tokens.len() - 1)];
                let mut logits = vec![0.0; VOCAB_SIZE];
                logits[token as usize] = 10.0;
                logits
            }
            Script::Fixed(logits) => logits.clone(),
            Script::Noise => (0..VOCAB_SIZE as u64)
                .map(|i| {
                    let mixed = (i * 2_654_435_761) ^ (last as u64 * 97 + positions as u64 * 13);
                    (mixed % 1000) as f32 / 100.0
                })
                .collect(),
        }
    }
}

impl LanguageModel for FakeModel {
    type Cache = FakeCache;

    fn name(&self) -> &str {
        "fake"
    }

    fn vocab_size(&self) -> usize {
        VOCAB_SIZE
    }

    fn forward(
        &self,
        input_ids: &[u32],
        past: Option<&FakeCache>,
    ) -> Result<ModelOutput<FakeCache>> {
        let call = {
            let mut inputs = self.inputs.lock().unwrap();
            inputs.push(input_ids.to_vec());
            inputs.len() - 1
        };

        if self.fail_on_call == Some(call) {
            return Err(CoreError::model(
                "FAKE_FORWARD_FAILED",
                "Simulated device failure",
                "Fake forward pass",
                "None",
            ));
        }

        let positions = past.map_or(0, |c| c.positions) + input_ids.len();
        let last = input_ids.last().copied().unwrap_or(0);
        self.live_caches.fetch_add(1, Ordering::SeqCst);

        Ok(ModelOutput {
            logits: self.logits(call, positions, last),
            cache: FakeCache { positions },
        })
    }

    fn release_cache(&self, _cache: FakeCache) {
        self.live_caches.fetch_sub(1, Ordering::SeqCst);
    }

    fn supports_adapters(&self) -> bool {
        self.adapters
    }

    fn set_adapter(&self, name: &str) -> Result<()> {
        self.adapter_calls.lock().unwrap().push(name.to_string());
        Ok(())
    }
}
