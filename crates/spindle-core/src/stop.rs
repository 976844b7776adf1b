//! Stop-sequence detection over detokenized text
//!
//! Matching works on text rather than token ids because detokenization can
//! merge or normalize characters across token boundaries. Every step scans
//! the full generated text again from offset 0.

use serde::{Deserialize, Serialize};

/// Result of scanning text for one stop string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopMatch {
    /// The stop string occurs verbatim; the offset is the leftmost match start
    Full(usize),
    /// The text ends with a non-empty proper prefix of the stop string
    Partial,
    NoMatch,
}

/// Scan `text` for `stop`, considering only matches starting at or after `search_from`.
///
/// An empty `stop` never matches.
pub fn find_stop(text: &str, stop: &str, search_from: usize) -> StopMatch {
    if stop.is_empty() {
        return StopMatch::NoMatch;
    }

    if let Some(tail) = text.get(search_from..) {
        if let Some(pos) = tail.find(stop) {
            return StopMatch::Full(search_from + pos);
        }
    }

    if is_partial_stop(text, stop) {
        StopMatch::Partial
    } else {
        StopMatch::NoMatch
    }
}

/// Whether `text` ends with a non-empty proper prefix of `stop`
pub fn is_partial_stop(text: &str, stop: &str) -> bool {
    stop.char_indices()
        .skip(1)
        .any(|(end, _)| text.ends_with(&stop[..end]))
}

/// Combined verdict over every configured stop string
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// A stop string matched; the text must be truncated at `at`
    Stopped { at: usize },
    /// The text may still grow into a stop string; withhold this step's chunk
    Pending,
    Clear,
}

/// Normalized set of stop strings: empty entries dropped, duplicates removed,
/// insertion order kept
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<String>", into = "Vec<String>")]
pub struct StopSequences {
    sequences: Vec<String>,
}

impl StopSequences {
    pub fn new<I, S>(stops: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut sequences: Vec<String> = Vec::new();
        for stop in stops {
            let stop = stop.into();
            if !stop.is_empty() && !sequences.contains(&stop) {
                sequences.push(stop);
            }
        }
        Self { sequences }
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sequences.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.sequences.iter().map(String::as_str)
    }

    /// Evaluate every stop string against the current text.
    ///
    /// Any full match wins over partial matches; when several stop strings
    /// match fully the earliest match start is used. Otherwise the first
    /// partial match in insertion order makes the outcome pending.
    pub fn evaluate(&self, text: &str) -> StopOutcome {
        let mut earliest: Option<usize> = None;
        let mut pending = false;

        for stop in &self.sequences {
            match find_stop(text, stop, 0) {
                StopMatch::Full(at) => {
                    earliest = Some(earliest.map_or(at, |e| e.min(at)));
                }
                StopMatch::Partial => pending = true,
                StopMatch::NoMatch => {}
            }
        }

        match earliest {
            Some(at) => StopOutcome::Stopped { at },
            None if pending => StopOutcome::Pending,
            None => StopOutcome::Clear,
        }
    }
}

impl From<Vec<String>> for StopSequences {
    fn from(stops: Vec<String>) -> Self {
        Self::new(stops)
    }
}

impl From<StopSequences> for Vec<String> {
    fn from(stops: StopSequences) -> Self {
        stops.sequences
    }
}
