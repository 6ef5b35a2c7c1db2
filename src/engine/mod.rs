//! Inference engine boundary
//!
//! The narrow contract the orchestration layer consumes: model/context/batch
//! lifecycle, tokenization, batch decoding, logits access, and KV-cache
//! manipulation. The production implementation wraps llama.cpp (see
//! [`llama`]); tests drive the same trait with a scripted engine.

use std::path::Path;

use thiserror::Error;

use crate::types::InstanceSettings;

pub mod gguf;
pub mod llama;
#[cfg(test)]
pub(crate) mod mock;

pub use gguf::{is_gguf_file, validate_gguf, GgufError, GgufMetadata, GGUF_MAGIC};
pub use llama::LlamaCppEngine;

/// Raw vocabulary token id
pub type TokenId = i32;

/// Errors surfaced by an engine implementation
#[derive(Debug, Error, Clone)]
pub enum EngineError {
    #[error("Failed to initialize backend: {0}")]
    BackendInit(String),

    #[error("Failed to load model: {0}")]
    ModelLoad(String),

    #[error("Failed to create context: {0}")]
    ContextCreate(String),

    #[error("Failed to create batch: {0}")]
    BatchCreate(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Decode failed: {0}")]
    Decode(String),

    #[error("KV cache eviction failed: {0}")]
    CacheEviction(String),

    #[error("Engine not ready: {0}")]
    NotReady(&'static str),
}

/// Information about a loaded model
#[derive(Debug, Clone)]
pub struct ModelInfo {
    /// Path the model was loaded from
    pub path: String,
    /// Vocabulary size
    pub vocab_size: usize,
    /// Embedding dimension
    pub embedding_dim: i32,
    /// Context length the model was trained with
    pub trained_context: u32,
    /// Total parameter count
    pub param_count: u64,
    /// Model size in bytes
    pub size_bytes: u64,
}

/// The engine contract consumed by the orchestration layer.
///
/// Implementations are stateful: they own at most one loaded model, one
/// decoding context, and one reusable batch buffer. All positions refer to
/// KV-cache sequence 0. Implementations are not required to be `Send`;
/// every call is serialized through the owning instance's worker thread.
pub trait InferenceEngine {
    /// Load a model from `path`. Replaces any previously loaded model.
    fn load_model(&mut self, path: &Path, settings: &InstanceSettings)
        -> Result<ModelInfo, EngineError>;

    /// Create the decoding context. Returns the effective context length,
    /// which is the requested length clamped to the model's trained
    /// maximum.
    fn create_context(&mut self, settings: &InstanceSettings) -> Result<u32, EngineError>;

    /// Create the reusable batch buffer holding up to `capacity` tokens.
    fn create_batch(&mut self, capacity: u32) -> Result<(), EngineError>;

    /// Tokenize `text`. `add_bos` prepends the beginning-of-sequence
    /// token; `parse_special` lets special-token markup in the text map to
    /// its reserved ids.
    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError>;

    /// Raw bytes of one token's text piece (may be an incomplete UTF-8
    /// fragment).
    fn token_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError>;

    /// Display form of one token, rendering special tokens by name. Used
    /// for vocabulary probing; lossy on purpose.
    fn token_text(&self, token: TokenId) -> String;

    /// Decode `tokens` at consecutive cache positions starting at
    /// `first_position`, requesting logits for the final position only.
    /// `tokens` must fit in the batch buffer.
    fn decode(&mut self, tokens: &[TokenId], first_position: u32) -> Result<(), EngineError>;

    /// Logits for the last position decoded with logits enabled, or `None`
    /// if no such decode has happened yet.
    fn last_logits(&self) -> Option<Vec<f32>>;

    /// Whether the model treats `token` as an end-of-generation token.
    fn is_end_of_generation(&self, token: TokenId) -> bool;

    /// The beginning-of-sequence token, if the model defines one.
    fn bos_token(&self) -> Option<TokenId>;

    /// Vocabulary size of the loaded model (0 before load).
    fn vocab_size(&self) -> usize;

    /// Effective context length of the created context (0 before
    /// creation).
    fn max_context(&self) -> u32;

    /// Drop all KV-cache entries.
    fn clear_cache(&mut self);

    /// Drop KV-cache entries for sequence 0 in positions `[from, to)`.
    fn evict_cache_range(&mut self, from: u32, to: u32) -> Result<(), EngineError>;

    /// Release batch, context, and model, in that dependency order.
    /// Idempotent.
    fn release(&mut self);

    /// True once model, context, and batch all exist.
    fn is_ready(&self) -> bool;
}
