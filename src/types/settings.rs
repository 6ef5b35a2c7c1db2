//! Instance and sampling configuration
//!
//! Settings for one loaded model instance and the per-call prediction
//! (sampling) configuration.

use serde::{Deserialize, Serialize};

/// Sentinel for `PredictionConfig::max_tokens`: generate until a stop
/// condition or the context window ends the stream.
pub const UNLIMITED_TOKENS: i32 = -1;

/// Configuration for one loaded model instance
///
/// Mutable only through explicit reconfiguration
/// ([`crate::inference::Instance::update_settings`]). Changing
/// `context_length`, `batch_size` or `gpu_layers` after load requires a
/// reload of the context-dependent resources; this is documented, not
/// automatic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceSettings {
    /// Context window size in tokens
    pub context_length: u32,
    /// Processing batch size (tokens per decode call)
    pub batch_size: u32,
    /// Number of layers to offload to GPU (0 = CPU only)
    pub gpu_layers: u32,
    /// CPU threads used for decoding (0 = backend default)
    pub threads: u32,
    /// Memory-map the model file instead of reading it fully
    pub memory_map: bool,
    /// Lock model memory to prevent swapping
    pub memory_lock: bool,
    /// Inference seed (0 = derive from system entropy)
    pub seed: u32,
    /// Enable flash attention in the backend where supported
    pub flash_attention: bool,
}

impl Default for InstanceSettings {
    fn default() -> Self {
        Self {
            context_length: 4096,
            batch_size: 512,
            gpu_layers: 99,
            threads: 0,
            memory_map: true,
            memory_lock: false,
            seed: 0,
            flash_attention: false,
        }
    }
}

impl InstanceSettings {
    /// Validate settings values
    ///
    /// Ensures all parameters are within acceptable ranges
    pub fn validate(&mut self) {
        if self.context_length < 512 {
            self.context_length = 512;
        }

        if self.batch_size == 0 {
            self.batch_size = 512;
        }

        // A batch larger than the context is never usable
        if self.batch_size > self.context_length {
            self.batch_size = self.context_length;
        }
    }

    /// Reduced configuration used for the single automatic retry after a
    /// failed context creation: smaller context, smaller batch, no GPU
    /// offload.
    pub fn fallback(&self) -> Self {
        Self {
            context_length: 2048,
            batch_size: 256,
            gpu_layers: 0,
            ..self.clone()
        }
    }
}

/// Mirostat sampling mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirostatMode {
    /// Mirostat disabled
    Disabled,
    /// Mirostat v2 (target-surprise feedback loop)
    V2,
}

/// Sampling configuration for one generation call
///
/// Value type; copied per call. Callers may override per call without
/// mutating the instance default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionConfig {
    /// Temperature for sampling (below 0.05 selects greedy arg-max)
    pub temperature: f32,
    /// Top-k sampling parameter (0 = disabled)
    pub top_k: u32,
    /// Top-p (nucleus) sampling parameter (1.0 = disabled)
    pub top_p: f32,
    /// Min-p sampling parameter (0.0 = disabled)
    pub min_p: f32,
    /// Typical-p sampling parameter (1.0 = disabled)
    pub typical_p: f32,
    /// Repetition penalty (1.0 = disabled)
    pub repeat_penalty: f32,
    /// How many recent tokens the repetition penalty considers
    pub repeat_window: usize,
    /// Frequency penalty (0.0 = disabled)
    pub frequency_penalty: f32,
    /// Presence penalty (0.0 = disabled)
    pub presence_penalty: f32,
    /// Mirostat mode
    pub mirostat: MirostatMode,
    /// Mirostat target surprise
    pub mirostat_tau: f32,
    /// Mirostat learning rate
    pub mirostat_eta: f32,
    /// Maximum output tokens; [`UNLIMITED_TOKENS`] means until a stop
    /// condition or the context window is exhausted
    pub max_tokens: i32,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            temperature: 0.0,
            top_k: 40,
            top_p: 0.95,
            min_p: 0.0,
            typical_p: 1.0,
            repeat_penalty: 1.1,
            repeat_window: 64,
            frequency_penalty: 0.0,
            presence_penalty: 0.0,
            mirostat: MirostatMode::Disabled,
            mirostat_tau: 5.0,
            mirostat_eta: 0.1,
            max_tokens: UNLIMITED_TOKENS,
        }
    }
}

impl PredictionConfig {
    /// Validate configuration values
    pub fn validate(&mut self) {
        self.temperature = self.temperature.clamp(0.0, 2.0);
        self.top_p = self.top_p.clamp(0.0, 1.0);
        self.min_p = self.min_p.clamp(0.0, 1.0);
        self.typical_p = self.typical_p.clamp(0.0, 1.0);

        if self.repeat_penalty < 1.0 {
            self.repeat_penalty = 1.0;
        }

        if self.max_tokens < UNLIMITED_TOKENS || self.max_tokens == 0 {
            self.max_tokens = UNLIMITED_TOKENS;
        }
    }

    /// True when this configuration selects deterministic arg-max
    pub fn is_greedy(&self) -> bool {
        self.temperature < 0.05 && self.mirostat == MirostatMode::Disabled
    }
}
