//! Conversation turns
//!
//! Defines the role-tagged dialogue units consumed by the generation layer.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a turn's author
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// System prompt
    System,
    /// Message from the user
    User,
    /// Message from the model
    Assistant,
}

/// A single turn in a dialogue
///
/// Turns are immutable once created; a dialogue is an ordered slice of
/// turns, insertion order chronological.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    /// Stable identity of this turn
    pub id: Uuid,
    /// Who authored the turn
    pub role: Role,
    /// The turn's text content
    pub text: String,
    /// When the turn was created
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    /// Create a new turn with a fresh id and the current timestamp
    pub fn new(role: Role, text: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    /// Convenience constructor for a system turn
    pub fn system(text: impl Into<String>) -> Self {
        Self::new(Role::System, text)
    }

    /// Convenience constructor for a user turn
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(Role::User, text)
    }

    /// Convenience constructor for an assistant turn
    pub fn assistant(text: impl Into<String>) -> Self {
        Self::new(Role::Assistant, text)
    }
}
