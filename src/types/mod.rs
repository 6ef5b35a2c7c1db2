//! Core data types
//!
//! Conversation turns, instance/sampling configuration, and model profiles.

pub mod profile;
pub mod settings;
pub mod turn;

pub use profile::{ModelArchitecture, ModelProfile};
pub use settings::{InstanceSettings, MirostatMode, PredictionConfig, UNLIMITED_TOKENS};
pub use turn::{Role, Turn};
