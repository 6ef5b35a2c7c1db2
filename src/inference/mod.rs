//! Generation orchestration
//!
//! Everything between a dialogue and its token stream: the incremental
//! context manager, the per-token generation loop, the speak-mode
//! constrained decoder, the load lifecycle, and the instance worker that
//! owns the engine resources.

use thiserror::Error;

use crate::engine::{EngineError, GgufError};

pub mod context;
pub mod events;
pub mod generation;
pub mod instance;
pub mod lifecycle;
pub mod speak;

pub use context::ContextState;
pub use events::{CompletionReason, LoadStage, StreamEvent};
pub use generation::GenerationRequest;
pub use instance::{GenerationStream, Instance, InstanceOptions, LoadProgress, TextStream};
pub use speak::{SpeakConfig, SpeakTokenSpec, SPEAK_SYSTEM_PROMPT};

/// Errors surfaced by the orchestration layer
#[derive(Debug, Error, Clone)]
pub enum InstanceError {
    #[error("Model file inaccessible: {0}")]
    ModelFileInaccessible(String),

    #[error("Model initialization failed: {0}")]
    ModelInit(String),

    #[error("Context creation failed: {0}")]
    ContextCreation(String),

    #[error("Batch creation failed: {0}")]
    BatchCreation(String),

    #[error("Tokenization failed: {0}")]
    Tokenization(String),

    #[error("Prediction failed: {0}")]
    Prediction(String),

    #[error("Instance is not ready")]
    NotReady,

    #[error("Operation interrupted")]
    Interrupted,

    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Unsupported model architecture: {message}. {suggestion}")]
    UnsupportedArchitecture {
        message: String,
        /// Human-actionable remediation hint
        suggestion: String,
    },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl From<EngineError> for InstanceError {
    fn from(e: EngineError) -> Self {
        match e {
            EngineError::BackendInit(m) | EngineError::ModelLoad(m) => InstanceError::ModelInit(m),
            EngineError::ContextCreate(m) => InstanceError::ContextCreation(m),
            EngineError::BatchCreate(m) => InstanceError::BatchCreation(m),
            EngineError::Tokenization(m) => InstanceError::Tokenization(m),
            EngineError::Decode(m) | EngineError::CacheEviction(m) => InstanceError::Prediction(m),
            EngineError::NotReady(_) => InstanceError::NotReady,
        }
    }
}

impl From<GgufError> for InstanceError {
    fn from(e: GgufError) -> Self {
        InstanceError::ModelFileInaccessible(e.to_string())
    }
}
