//! Vocabulary tables and a table-driven detokenizer
//!
//! `VocabTokenizer` decodes SentencePiece-style pieces (`▁` marks a word
//! boundary) straight from an id → piece table.

use super::{clean_up_tokenization, DecodeOptions, Tokenizer};
use crate::{CoreError, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};

/// Word-boundary marker used by SentencePiece vocabularies
pub const WORD_BOUNDARY: char = '\u{2581}';

/// Id ↔ piece mappings plus the set of special ids
#[derive(Debug, Clone, Default)]
pub struct Vocabulary {
    token_to_id: HashMap<String, u32>,
    id_to_token: HashMap<u32, String>,
    special_ids: HashSet<u32>,
}

impl Vocabulary {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_token(&mut self, token: impl Into<String>, id: u32) {
        let token = token.into();
        self.token_to_id.insert(token.clone(), id);
        self.id_to_token.insert(id, token);
    }

    pub fn add_special_token(&mut self, token: impl Into<String>, id: u32) {
        self.add_token(token, id);
        self.special_ids.insert(id);
    }

    pub fn token_to_id(&self, token: &str) -> Option<u32> {
        self.token_to_id.get(token).copied()
    }

    pub fn id_to_token(&self, id: u32) -> Option<&str> {
        self.id_to_token.get(&id).map(String::as_str)
    }

    pub fn is_special_id(&self, id: u32) -> bool {
        self.special_ids.contains(&id)
    }

    pub fn size(&self) -> usize {
        self.id_to_token.len()
    }
}

/// Table-driven detokenizer over a [`Vocabulary`]
#[derive(Debug, Clone)]
pub struct VocabTokenizer {
    vocab: Vocabulary,
}

impl VocabTokenizer {
    pub fn new(vocab: Vocabulary) -> Self {
        Self { vocab }
    }

    pub fn vocabulary(&self) -> &Vocabulary {
        &self.vocab
    }

    /// Turn a run of regular pieces into text
    fn pieces_to_text(pieces: &str, leading: bool) -> String {
        let text: String = pieces
            .chars()
            .map(|c| if c == WORD_BOUNDARY { ' ' } else { c })
            .collect();

        match text.strip_prefix(' ') {
            Some(stripped) if leading => stripped.to_string(),
            _ => text,
        }
    }
}

#[async_trait]
impl Tokenizer for VocabTokenizer {
    async fn decode(&self, tokens: &[u32], options: &DecodeOptions) -> Result<String> {
        let mut sub_texts: Vec<String> = Vec::new();
        let mut current = String::new();

        for &id in tokens {
            let piece = self.vocab.id_to_token(id).ok_or_else(|| {
                CoreError::tokenizer(
                    "TOKENIZER_UNKNOWN_ID",
                    format!("Token id {} is not in the vocabulary", id),
                    "Detokenizing generated tokens",
                    "Check that the model and tokenizer share a vocabulary",
                )
            })?;

            if self.vocab.is_special_id(id) {
                if options.skip_special_tokens {
                    continue;
                }
                if !current.is_empty() {
                    let leading = sub_texts.is_empty();
                    sub_texts.push(Self::pieces_to_text(&current, leading));
                    current.clear();
                }
                sub_texts.push(piece.to_string());
            } else {
                current.push_str(piece);
            }
        }

        if !current.is_empty() {
            let leading = sub_texts.is_empty();
            sub_texts.push(Self::pieces_to_text(&current, leading));
        }

        let separator = if options.spaces_between_special_tokens { " " } else { "" };
        let text = sub_texts.join(separator);

        Ok(if options.clean_up_tokenization_spaces {
            clean_up_tokenization(&text)
        } else {
            text
        })
    }

    fn vocab_size(&self) -> usize {
        self.vocab.size()
    }

    fn is_special_token(&self, id: u32) -> bool {
        self.vocab.is_special_id(id)
    }
}
