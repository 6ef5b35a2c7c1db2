//! Speak-mode constrained decoding
//!
//! An alternate generation mode producing audio-codec symbol tokens instead
//! of text. Audio symbols cycle through a fixed number of steps per frame;
//! each step only admits the token ids that encode that step's symbol
//! range. The decoder tracks how many symbols have been accepted, keeps the
//! stream locked through a priming window, and ends the stream near a
//! length budget estimated from the request text.

use serde::{Deserialize, Serialize};

use crate::engine::{InferenceEngine, TokenId};
use crate::inference::InstanceError;
use crate::sampling::argmax;

/// Reserved system-prompt value that switches a generation call into speak
/// mode (the dialogue's last turn must be a user turn).
pub const SPEAK_SYSTEM_PROMPT: &str = "::speak::";

/// Markup wrapped around a speak request. The model was trained to answer
/// this shape with audio symbols.
const REQUEST_PREFIX: &str = "<custom_token_3>";
const REQUEST_SUFFIX: &str = "<custom_token_4><custom_token_5>";

/// How audio symbols map onto the vocabulary.
///
/// Symbol tokens follow the `<custom_token_N>` naming convention. For a
/// token with payload `N`, the encoded symbol is
/// `N - payload_base - step * symbols_per_step`, valid iff it lies in
/// `0..symbols_per_step`. The defaults match the supported audio models;
/// they are configuration, not constants of nature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakTokenSpec {
    /// Payload of the first audio symbol token
    pub payload_base: u32,
    /// Symbol range per cyclic step
    pub symbols_per_step: usize,
    /// Cyclic steps per audio frame
    pub steps_per_frame: usize,
    /// Frames that must complete before the stream may end
    pub unlock_frames: usize,
    /// Display name of the end-of-speech marker token
    pub end_marker: String,
}

impl Default for SpeakTokenSpec {
    fn default() -> Self {
        Self {
            payload_base: 10,
            symbols_per_step: 4096,
            steps_per_frame: 7,
            unlock_frames: 4,
            end_marker: "<custom_token_2>".to_string(),
        }
    }
}

impl SpeakTokenSpec {
    /// Accepted symbols required before the stream may end.
    pub fn unlock_threshold(&self) -> usize {
        self.unlock_frames * self.steps_per_frame
    }
}

/// Speak-mode configuration.
///
/// The frame budget derived from the request text is a heuristic proxy for
/// spoken duration; the constants are empirical starting points and
/// deliberately tunable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakConfig {
    /// Voice identifier embedded in the request markup
    pub voice: String,
    /// Vocabulary mapping of audio symbols
    pub token_spec: SpeakTokenSpec,
    /// Estimated frames per word of request text
    pub frames_per_word: f32,
    /// Estimated frames per character of request text
    pub frames_per_char: f32,
    /// Lower clamp of the frame budget
    pub min_frames: usize,
    /// Upper clamp of the frame budget
    pub max_frames: usize,
    /// Frames past the budget before the end marker is forced
    pub grace_frames: usize,
    /// Absolute cap on accepted symbols, independent of the budget
    pub max_symbols: usize,
}

impl Default for SpeakConfig {
    fn default() -> Self {
        Self {
            voice: "tara".to_string(),
            token_spec: SpeakTokenSpec::default(),
            frames_per_word: 5.0,
            frames_per_char: 1.0,
            min_frames: 28,
            max_frames: 1024,
            grace_frames: 14,
            max_symbols: 4096,
        }
    }
}

impl SpeakConfig {
    /// Render the fixed audio-request markup for `text`.
    pub fn request_prompt(&self, text: &str) -> String {
        format!("{REQUEST_PREFIX}{}: {text}{REQUEST_SUFFIX}", self.voice)
    }

    /// Frame budget for a request: the larger of the word- and
    /// character-derived estimates, clamped.
    pub fn estimate_target_frames(&self, text: &str) -> usize {
        let words = text.split_whitespace().count() as f32;
        let chars = text.chars().filter(|c| !c.is_whitespace()).count() as f32;
        let estimate = (words * self.frames_per_word).max(chars * self.frames_per_char);
        (estimate.ceil() as usize).clamp(self.min_frames, self.max_frames)
    }
}

/// Per-step table of valid audio symbol token ids for one loaded model.
///
/// Built once per model by scanning the vocabulary for the naming
/// convention, then cached for the model's lifetime.
#[derive(Debug, Clone)]
pub struct StepTable {
    steps: Vec<Vec<TokenId>>,
    end_marker: TokenId,
}

impl StepTable {
    /// Scan the engine's vocabulary and resolve every step's symbol ids.
    ///
    /// A step missing any symbol id (or a missing end marker) is a
    /// configuration error for speak mode, never a silent gap.
    pub fn build(engine: &dyn InferenceEngine, spec: &SpeakTokenSpec) -> Result<Self, InstanceError> {
        let mut steps = vec![vec![-1; spec.symbols_per_step]; spec.steps_per_frame];
        let mut end_marker = None;

        for id in 0..engine.vocab_size() as TokenId {
            let piece = engine.token_text(id);
            if piece == spec.end_marker {
                end_marker = Some(id);
                continue;
            }
            let Some(payload) = parse_payload(&piece) else {
                continue;
            };
            let Some(offset) = payload.checked_sub(spec.payload_base) else {
                continue;
            };
            let step = offset as usize / spec.symbols_per_step;
            let symbol = offset as usize % spec.symbols_per_step;
            if step < spec.steps_per_frame {
                steps[step][symbol] = id;
            }
        }

        let end_marker = end_marker.ok_or_else(|| {
            InstanceError::InvalidConfiguration(format!(
                "speak mode: end marker {} not in vocabulary",
                spec.end_marker
            ))
        })?;

        for (step, ids) in steps.iter().enumerate() {
            let resolved = ids.iter().filter(|&&id| id >= 0).count();
            if resolved != spec.symbols_per_step {
                return Err(InstanceError::InvalidConfiguration(format!(
                    "speak mode: step {} resolved {}/{} symbol tokens",
                    step, resolved, spec.symbols_per_step
                )));
            }
        }

        tracing::debug!(
            "Speak step table built: {} steps x {} symbols",
            spec.steps_per_frame,
            spec.symbols_per_step
        );

        Ok(Self { steps, end_marker })
    }

    /// Valid token ids for a cyclic step.
    pub fn candidates(&self, step: usize) -> &[TokenId] {
        &self.steps[step]
    }

    pub fn end_marker(&self) -> TokenId {
        self.end_marker
    }
}

fn parse_payload(piece: &str) -> Option<u32> {
    piece
        .strip_prefix("<custom_token_")?
        .strip_suffix('>')?
        .parse()
        .ok()
}

/// What the decoder picked for one position.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeakSelection {
    /// A valid audio symbol (or the unmasked fallback token)
    Symbol(TokenId),
    /// End the stream
    End,
}

/// The constrained decoding state machine for one speak call.
pub struct SpeakDecoder<'a> {
    table: &'a StepTable,
    config: &'a SpeakConfig,
    accepted: usize,
    target_frames: usize,
}

impl<'a> SpeakDecoder<'a> {
    pub fn new(table: &'a StepTable, config: &'a SpeakConfig, request_text: &str) -> Self {
        let target_frames = config.estimate_target_frames(request_text);
        tracing::debug!("Speak budget: {} frames", target_frames);
        Self {
            table,
            config,
            accepted: 0,
            target_frames,
        }
    }

    /// Symbols accepted so far this call.
    pub fn accepted(&self) -> usize {
        self.accepted
    }

    /// Cyclic position within the current frame.
    pub fn step(&self) -> usize {
        self.accepted % self.config.token_spec.steps_per_frame
    }

    /// True once the priming window has completed and the stream may end.
    pub fn unlocked(&self) -> bool {
        self.accepted >= self.config.token_spec.unlock_threshold()
    }

    /// True once the absolute symbol cap is hit.
    pub fn exhausted(&self) -> bool {
        self.accepted >= self.config.max_symbols
    }

    /// The frame budget in effect for this call.
    pub fn target_frames(&self) -> usize {
        self.target_frames
    }

    /// Pick the next token from `logits`.
    ///
    /// Restricts candidates to the current step's symbol ids; lets the end
    /// marker compete at frame boundaries once the budget is approached and
    /// forces it once the grace window is exceeded. Falls back to the end
    /// marker (when permitted) and then to the global arg-max if masking
    /// eliminates every candidate; an index-0 default would silently
    /// corrupt the audio stream, so exhaustion is a hard error instead.
    pub fn select(&mut self, logits: &[f32]) -> Result<SpeakSelection, InstanceError> {
        let steps_per_frame = self.config.token_spec.steps_per_frame;
        let frames_done = self.accepted / steps_per_frame;
        let at_frame_boundary = self.step() == 0;
        let unlocked = self.unlocked();

        if unlocked && at_frame_boundary && frames_done >= self.target_frames + self.config.grace_frames
        {
            return Ok(SpeakSelection::End);
        }

        let mut best: Option<(TokenId, f32)> = None;
        for &id in self.table.candidates(self.step()) {
            let Some(&logit) = logits.get(id as usize) else {
                continue;
            };
            if logit == f32::NEG_INFINITY {
                continue;
            }
            match best {
                Some((_, b)) if logit <= b => {}
                _ => best = Some((id, logit)),
            }
        }

        if unlocked && at_frame_boundary && frames_done >= self.target_frames {
            let end_logit = logits
                .get(self.table.end_marker() as usize)
                .copied()
                .unwrap_or(f32::NEG_INFINITY);
            let best_logit = best.map(|(_, l)| l).unwrap_or(f32::NEG_INFINITY);
            if end_logit >= best_logit {
                return Ok(SpeakSelection::End);
            }
        }

        let token = match best {
            Some((id, _)) => id,
            None if unlocked => return Ok(SpeakSelection::End),
            None => argmax(logits).ok_or_else(|| {
                InstanceError::Prediction("speak mode: no viable token in logits".into())
            })?,
        };

        self.accepted += 1;
        Ok(SpeakSelection::Symbol(token))
    }
}
