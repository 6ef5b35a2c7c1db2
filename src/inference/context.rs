//! Incremental context management
//!
//! Owns the logical token history for one instance and reconciles it with
//! the engine's KV cache when a new prompt arrives, so only the suffix
//! beyond the longest shared prefix needs decoding.

use crate::engine::{InferenceEngine, TokenId};
use crate::inference::InstanceError;

/// The logical token history of one instance.
///
/// Invariant: outside of an in-flight generation call, `tokens().len()`
/// equals the number of positions resident in the engine KV cache for
/// sequence 0. [`ContextState::reconcile`] sets the target state; the
/// generation loop restores the invariant by decoding the prompt suffix
/// before sampling.
#[derive(Debug, Default)]
pub struct ContextState {
    tokens: Vec<TokenId>,
}

impl ContextState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Tokens the KV cache is expected to hold, in position order.
    pub fn tokens(&self) -> &[TokenId] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Length of the longest prefix shared with `prompt`.
    pub fn common_prefix_len(&self, prompt: &[TokenId]) -> usize {
        self.tokens
            .iter()
            .zip(prompt)
            .take_while(|(a, b)| a == b)
            .count()
    }

    /// Reconcile the resident cache with a new prompt.
    ///
    /// Computes the shared prefix, evicts the stale tail of the cache, and
    /// replaces the logical history with the full prompt. Returns the
    /// prefix length; the caller must decode `prompt[prefix..]` before
    /// sampling.
    ///
    /// A prompt that does not fit the effective context aborts before any
    /// cache mutation beyond a full clear; this is a configuration error,
    /// not a retryable failure.
    pub fn reconcile(
        &mut self,
        engine: &mut dyn InferenceEngine,
        prompt: &[TokenId],
        max_context: u32,
    ) -> Result<usize, InstanceError> {
        if prompt.is_empty() {
            return Err(InstanceError::InvalidConfiguration(
                "prompt produced no tokens".into(),
            ));
        }

        if prompt.len() as u32 >= max_context {
            engine.clear_cache();
            self.tokens.clear();
            return Err(InstanceError::InvalidConfiguration(format!(
                "prompt is {} tokens but the context holds only {}",
                prompt.len(),
                max_context
            )));
        }

        // Keep at least the final prompt position undecoded so the decode
        // of the suffix always refreshes the logits we sample from.
        let prefix = self.common_prefix_len(prompt).min(prompt.len() - 1);

        if prefix < self.tokens.len() {
            engine.evict_cache_range(prefix as u32, self.tokens.len() as u32)?;
            tracing::debug!(
                "Evicted cache positions [{}, {}), reusing {} prefix tokens",
                prefix,
                self.tokens.len(),
                prefix
            );
        } else if prefix > 0 {
            tracing::debug!("Reusing {} cached prefix tokens", prefix);
        }

        self.tokens = prompt.to_vec();
        Ok(prefix)
    }

    /// Record one generated token appended to the cache.
    pub fn push(&mut self, token: TokenId) {
        self.tokens.push(token);
    }

    /// Drop the logical history and the engine cache together.
    pub fn clear(&mut self, engine: &mut dyn InferenceEngine) {
        engine.clear_cache();
        self.tokens.clear();
    }
}
