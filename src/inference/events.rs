//! Streaming events
//!
//! The units emitted by a generation call and by the load lifecycle.

use serde::{Deserialize, Serialize};

use crate::engine::TokenId;
use crate::inference::InstanceError;

/// Why a generation ended
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CompletionReason {
    /// The engine signaled natural end of generation
    Natural,
    /// The max-output-tokens budget was exhausted
    MaxTokensReached,
    /// The context window filled up
    ContextWindowFull,
    /// The caller interrupted the stream
    UserStopped,
    /// A stop sequence appeared in the output
    StopSequenceFound(String),
    /// Generation aborted on an engine failure
    Error(String),
}

impl CompletionReason {
    /// Whether a UI can sensibly offer "continue generating" after this
    /// reason. True only for budget and context exhaustion.
    pub fn can_continue(&self) -> bool {
        matches!(
            self,
            CompletionReason::MaxTokensReached | CompletionReason::ContextWindowFull
        )
    }
}

/// One emitted generation unit.
///
/// Non-terminal events carry a text fragment (possibly empty — some tokens
/// detokenize to pending UTF-8 bytes) and the raw token id for token-level
/// consumers. The terminal event carries the completion reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Text fragment, possibly empty
    pub text: String,
    /// True on the final event of the stream
    pub complete: bool,
    /// Populated iff `complete`
    pub reason: Option<CompletionReason>,
    /// Raw token id, populated on token-bearing events
    pub token: Option<TokenId>,
}

impl StreamEvent {
    /// A non-terminal fragment event.
    pub fn fragment(text: impl Into<String>, token: TokenId) -> Self {
        Self {
            text: text.into(),
            complete: false,
            reason: None,
            token: Some(token),
        }
    }

    /// A non-terminal fragment without a token id (trailing UTF-8 flush).
    pub fn flush(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            complete: false,
            reason: None,
            token: None,
        }
    }

    /// The terminal event.
    pub fn completed(reason: CompletionReason) -> Self {
        Self {
            text: String::new(),
            complete: true,
            reason: Some(reason),
            token: None,
        }
    }
}

/// Stages of the load lifecycle, emitted in order.
///
/// The progress stream closes after `Ready` or `Failed`.
#[derive(Debug, Clone)]
pub enum LoadStage {
    /// Validating settings and inputs
    Preparing,
    /// Checking and reading the model file
    ReadingModel,
    /// Creating the decoding context (and batch)
    CreatingContext,
    /// Running one trivial decode to force lazy backend initialization
    Prewarming,
    /// The instance can serve generation calls
    Ready,
    /// Loading failed; the instance is unusable
    Failed(InstanceError),
}

impl LoadStage {
    /// True for `Ready` and `Failed`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, LoadStage::Ready | LoadStage::Failed(_))
    }
}
