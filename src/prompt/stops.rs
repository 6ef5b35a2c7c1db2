//! Stop-sequence registry
//!
//! Per-architecture default stop strings plus caller additions, with a
//! matcher that handles sequences spanning the boundary between already
//! emitted text and the newest fragment.

use crate::types::ModelArchitecture;

/// A detected stop sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StopMatch {
    /// The stop sequence that matched
    pub sequence: String,
    /// Bytes of the new fragment to keep (everything before the match)
    pub keep: usize,
}

/// The active stop-sequence set for one instance.
///
/// Computed once per instance: architecture defaults plus caller-supplied
/// additions.
#[derive(Debug, Clone, Default)]
pub struct StopRegistry {
    sequences: Vec<String>,
    max_len: usize,
}

impl StopRegistry {
    /// Registry with no sequences (speak mode).
    pub fn empty() -> Self {
        Self::default()
    }

    /// Default stop strings for a model family.
    pub fn for_architecture(architecture: ModelArchitecture) -> Self {
        let defaults: &[&str] = match architecture {
            ModelArchitecture::Llama3 => &["<|eot_id|>", "<|start_header_id|>"],
            ModelArchitecture::Llama2 | ModelArchitecture::Mistral => &["</s>", "[INST]"],
            ModelArchitecture::Gemma => &["<end_of_turn>"],
            ModelArchitecture::Phi => &["<|end|>", "<|user|>"],
            ModelArchitecture::Qwen | ModelArchitecture::Generic => {
                &["<|im_end|>", "<|im_start|>"]
            }
        };
        let mut registry = Self::default();
        for s in defaults {
            registry.push(s);
        }
        registry
    }

    /// Add caller-supplied stop sequences.
    pub fn with_additions<I, S>(mut self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for s in extra {
            let s = s.into();
            self.push(&s);
        }
        self
    }

    fn push(&mut self, sequence: &str) {
        if sequence.is_empty() || self.sequences.iter().any(|s| s == sequence) {
            return;
        }
        self.max_len = self.max_len.max(sequence.len());
        self.sequences.push(sequence.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.sequences.is_empty()
    }

    /// Longest registered sequence in bytes. The generation loop keeps a
    /// rolling tail of `max_len - 1` bytes of emitted text so spanning
    /// matches stay detectable.
    pub fn max_len(&self) -> usize {
        self.max_len
    }

    /// Check `tail + fragment` for a stop sequence that ends inside the new
    /// fragment. Matches wholly inside `tail` were already reported when
    /// those bytes were the fragment.
    ///
    /// Returns the earliest match; `keep` is how many bytes of `fragment`
    /// precede it.
    pub fn check(&self, tail: &str, fragment: &str) -> Option<StopMatch> {
        if self.sequences.is_empty() || fragment.is_empty() {
            return None;
        }

        let mut window = String::with_capacity(tail.len() + fragment.len());
        window.push_str(tail);
        window.push_str(fragment);

        let mut best: Option<(usize, &str)> = None;
        for sequence in &self.sequences {
            let step = sequence.chars().next().map_or(1, char::len_utf8);
            let mut from = 0;
            while let Some(offset) = window[from..].find(sequence.as_str()) {
                let start = from + offset;
                let end = start + sequence.len();
                if end > tail.len() {
                    let better = match best {
                        Some((best_start, best_seq)) => {
                            start < best_start
                                || (start == best_start && sequence.len() > best_seq.len())
                        }
                        None => true,
                    };
                    if better {
                        best = Some((start, sequence));
                    }
                    break;
                }
                // Skip past the match start, staying on a char boundary.
                from = start + step;
            }
        }

        best.map(|(start, sequence)| StopMatch {
            sequence: sequence.to_string(),
            keep: start.saturating_sub(tail.len()),
        })
    }
}
