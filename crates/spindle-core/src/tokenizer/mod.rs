//! Detokenizer seam consumed by the decode engine
//!
//! The engine only ever maps generated token ids back to text, always with
//! the same settings, so the trait is limited to decoding.

pub mod vocab;

pub use vocab::{Vocabulary, VocabTokenizer};

use crate::Result;
use async_trait::async_trait;

/// Settings applied when turning token ids into text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DecodeOptions {
    /// Drop special tokens (BOS, EOS, padding, ...) from the output
    pub skip_special_tokens: bool,
    /// Put a space between adjacent special tokens that are kept
    pub spaces_between_special_tokens: bool,
    /// Remove artifacts such as the space before punctuation
    pub clean_up_tokenization_spaces: bool,
}

impl DecodeOptions {
    /// Settings used for every step of a generation
    pub const GENERATION: Self = Self {
        skip_special_tokens: true,
        spaces_between_special_tokens: false,
        clean_up_tokenization_spaces: true,
    };
}

impl Default for DecodeOptions {
    fn default() -> Self {
        Self::GENERATION
    }
}

/// Maps token ids back to text
#[async_trait]
pub trait Tokenizer: Send + Sync {
    /// Decode a sequence of token ids. Must be a pure function of its inputs.
    async fn decode(&self, tokens: &[u32], options: &DecodeOptions) -> Result<String>;

    /// Get the vocabulary size
    fn vocab_size(&self) -> usize;

    /// Check if a token id is a special token
    fn is_special_token(&self, id: u32) -> bool;
}

/// Remove tokenization spaces before punctuation and inside English contractions
pub fn clean_up_tokenization(text: &str) -> String {
    const RULES: [(&str, &str); 10] = [
        (" .", "."),
        (" ?", "?"),
        (" !", "!"),
        (" ,", ","),
        (" ' ", "'"),
        (" n't", "n't"),
        (" 'm", "'m"),
        (" 's", "'s"),
        (" 've", "'ve"),
        (" 're", "'re"),
    ];

    RULES
        .iter()
        .fold(text.to_string(), |acc, (from, to)| acc.replace(from, to))
}
