//! Locution
//!
//! Generation orchestration for on-device language models. An external
//! llama.cpp-style engine owns the weights and the forward pass; this crate
//! owns everything between a conversation and its token stream: prompt
//! templating per model family, incremental KV-cache reuse across turns,
//! the per-token stop-condition loop, a constrained speak mode for
//! audio-code generation, and cancellable streaming with structured
//! completion reasons.

pub mod engine;
pub mod inference;
pub mod prompt;
pub mod registry;
pub mod sampling;
pub mod types;

// Re-export the main surface for convenience
pub use engine::{EngineError, InferenceEngine, LlamaCppEngine, ModelInfo, TokenId};
pub use inference::{
    CompletionReason, GenerationRequest, GenerationStream, Instance, InstanceError,
    InstanceOptions, LoadProgress, LoadStage, SpeakConfig, StreamEvent, TextStream,
    SPEAK_SYSTEM_PROMPT,
};
pub use prompt::{PromptFormatter, StopRegistry, TemplateFormatter};
pub use registry::{InstancePool, Lease};
pub use types::{
    InstanceSettings, ModelArchitecture, ModelProfile, PredictionConfig, Role, Turn,
};
