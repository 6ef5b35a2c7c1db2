//! The per-token generation loop
//!
//! Drives one generation call: formats and tokenizes the prompt, reconciles
//! the KV cache, then repeatedly reads logits, selects a token, classifies
//! it against the active stop conditions, and emits a stream event.
//! Interruption is cooperative, observed once per token iteration.

use std::sync::atomic::{AtomicBool, Ordering};

use crate::engine::{InferenceEngine, TokenId};
use crate::inference::context::ContextState;
use crate::inference::events::{CompletionReason, StreamEvent};
use crate::inference::speak::{
    SpeakConfig, SpeakDecoder, SpeakSelection, StepTable, SPEAK_SYSTEM_PROMPT,
};
use crate::inference::InstanceError;
use crate::prompt::{PromptFormatter, StopRegistry};
use crate::sampling::TokenSampler;
use crate::types::{InstanceSettings, PredictionConfig, Role, Turn, UNLIMITED_TOKENS};

/// One generation call: the dialogue plus per-call overrides.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Ordered dialogue turns
    pub turns: Vec<Turn>,
    /// Replaces the dialogue's system turn for this call. The reserved
    /// [`SPEAK_SYSTEM_PROMPT`] value switches the call into speak mode.
    pub system_prompt: Option<String>,
    /// Overrides the instance's default sampling configuration
    pub prediction: Option<PredictionConfig>,
    /// Caps the effective context for this call (never grows it past the
    /// created context)
    pub context_length: Option<u32>,
}

impl GenerationRequest {
    pub fn new(turns: Vec<Turn>) -> Self {
        Self {
            turns,
            system_prompt: None,
            prediction: None,
            context_length: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn with_prediction(mut self, config: PredictionConfig) -> Self {
        self.prediction = Some(config);
        self
    }

    pub fn with_context_length(mut self, length: u32) -> Self {
        self.context_length = Some(length);
        self
    }

    /// Whether this request activates the speak-mode decoder: the reserved
    /// system prompt plus a trailing user turn.
    pub fn is_speak(&self) -> bool {
        self.system_prompt.as_deref() == Some(SPEAK_SYSTEM_PROMPT)
            && self.turns.last().is_some_and(|t| t.role == Role::User)
    }
}

/// Borrowed instance state the loop operates on.
pub(crate) struct GenerationScope<'a> {
    pub engine: &'a mut dyn InferenceEngine,
    pub state: &'a mut ContextState,
    /// Lazily built per-model speak step table
    pub speak_table: &'a mut Option<StepTable>,
    pub formatter: &'a dyn PromptFormatter,
    pub stops: &'a StopRegistry,
    pub prediction: &'a PredictionConfig,
    pub speak: &'a SpeakConfig,
    pub settings: &'a InstanceSettings,
}

fn abort(
    emit: &mut dyn FnMut(StreamEvent),
    err: InstanceError,
) -> Result<(), InstanceError> {
    emit(StreamEvent::completed(CompletionReason::Error(
        err.to_string(),
    )));
    Err(err)
}

/// Run one generation call to completion.
///
/// Every outcome emits a terminal event carrying its [`CompletionReason`];
/// failures additionally propagate as `Err` so awaiting callers see a hard
/// error (dual signaling).
pub(crate) fn run_generation(
    scope: GenerationScope<'_>,
    request: &GenerationRequest,
    interrupt: &AtomicBool,
    emit: &mut dyn FnMut(StreamEvent),
) -> Result<(), InstanceError> {
    let GenerationScope {
        engine,
        state,
        speak_table,
        formatter,
        stops,
        prediction,
        speak,
        settings,
    } = scope;

    if !engine.is_ready() {
        return abort(emit, InstanceError::NotReady);
    }

    let mut prediction = request.prediction.clone().unwrap_or_else(|| prediction.clone());
    prediction.validate();

    let speak_mode = request.is_speak();
    let speak_text = request
        .turns
        .last()
        .map(|t| t.text.clone())
        .unwrap_or_default();

    // Speak calls never reuse conversational context and bypass the
    // formatter in favor of the fixed audio-request markup, without a BOS
    // token.
    let (prompt, add_bos) = if speak_mode {
        state.clear(engine);
        (speak.request_prompt(&speak_text), false)
    } else {
        (
            formatter.format(&request.turns, request.system_prompt.as_deref()),
            formatter.add_bos(),
        )
    };

    let prompt_tokens = match engine.tokenize(&prompt, add_bos, true) {
        Ok(tokens) => tokens,
        Err(e) => return abort(emit, e.into()),
    };

    let effective_ctx = request
        .context_length
        .unwrap_or(settings.context_length)
        .min(engine.max_context());

    let prefix = match state.reconcile(engine, &prompt_tokens, effective_ctx) {
        Ok(prefix) => prefix,
        Err(e) => return abort(emit, e),
    };

    // Feed the undecoded prompt suffix, at most one batch per decode call.
    let suffix = state.tokens()[prefix..].to_vec();
    let mut position = prefix as u32;
    for chunk in suffix.chunks(settings.batch_size.max(1) as usize) {
        if let Err(e) = engine.decode(chunk, position) {
            return abort(emit, e.into());
        }
        position += chunk.len() as u32;
    }

    tracing::debug!(
        "Prompt reconciled: {} tokens, {} reused, {} decoded",
        prompt_tokens.len(),
        prefix,
        suffix.len()
    );

    // Stop sequences are suppressed in speak mode; the end marker token is
    // the only terminator there.
    let no_stops = StopRegistry::empty();
    let stops = if speak_mode { &no_stops } else { stops };

    let mut speak_decoder = if speak_mode {
        if speak_table.is_none() {
            match StepTable::build(engine, &speak.token_spec) {
                Ok(table) => *speak_table = Some(table),
                Err(e) => return abort(emit, e),
            }
        }
        speak_table
            .as_ref()
            .map(|table| SpeakDecoder::new(table, speak, &speak_text))
    } else {
        None
    };

    let mut sampler = TokenSampler::new(prediction.clone(), settings.seed);

    let remaining = effective_ctx - position;
    let budget = if prediction.max_tokens == UNLIMITED_TOKENS {
        remaining
    } else {
        (prediction.max_tokens as u32).min(remaining)
    };

    let mut generated: Vec<TokenId> = Vec::new();
    let mut utf8_buffer: Vec<u8> = Vec::new();
    let mut tail = String::new();
    let mut emitted: u32 = 0;

    let reason = loop {
        // Interruption is sampled at iteration granularity; cancellation
        // latency is bounded by one decode call.
        if interrupt.load(Ordering::Relaxed) {
            break CompletionReason::UserStopped;
        }

        if speak_decoder.as_ref().is_some_and(|d| d.exhausted()) {
            break CompletionReason::MaxTokensReached;
        }

        let Some(logits) = engine.last_logits() else {
            return abort(
                emit,
                InstanceError::Prediction("logits unavailable after decode".into()),
            );
        };

        let token = match speak_decoder.as_mut() {
            Some(decoder) => match decoder.select(&logits) {
                Ok(SpeakSelection::Symbol(token)) => token,
                Ok(SpeakSelection::End) => break CompletionReason::Natural,
                Err(e) => return abort(emit, e),
            },
            None => match sampler.select(&logits, &generated) {
                Ok(token) => token,
                Err(e) => return abort(emit, InstanceError::Prediction(e.to_string())),
            },
        };

        // The speak decoder suppresses end-of-generation signaling itself;
        // the standard path honors it here, before the token reaches the
        // cache.
        if speak_decoder.is_none() && engine.is_end_of_generation(token) {
            break CompletionReason::Natural;
        }

        let fragment = if speak_decoder.is_some() {
            // Audio symbols stream as raw ids; their display pieces are
            // markup, not output text.
            String::new()
        } else {
            match engine.token_bytes(token) {
                Ok(bytes) => {
                    utf8_buffer.extend_from_slice(&bytes);
                    take_valid_utf8_prefix(&mut utf8_buffer)
                }
                Err(e) => return abort(emit, e.into()),
            }
        };

        if !fragment.is_empty() {
            if let Some(found) = stops.check(&tail, &fragment) {
                let kept = &fragment[..found.keep];
                if !kept.is_empty() {
                    emit(StreamEvent::fragment(kept, token));
                }
                break CompletionReason::StopSequenceFound(found.sequence);
            }
        }

        emit(StreamEvent::fragment(fragment.clone(), token));
        if !fragment.is_empty() {
            tail.push_str(&fragment);
            trim_tail(&mut tail, stops.max_len().saturating_sub(1));
        }
        generated.push(token);

        // Feed the token back at the next position, logits enabled, then
        // record it in the logical history.
        if let Err(e) = engine.decode(&[token], position) {
            return abort(emit, e.into());
        }
        state.push(token);
        position += 1;

        if position >= effective_ctx {
            break CompletionReason::ContextWindowFull;
        }

        emitted += 1;
        if emitted >= budget {
            break CompletionReason::MaxTokensReached;
        }
    };

    // Flush a trailing fragment the UTF-8 buffer was still holding, except
    // after a stop-sequence trim.
    if !matches!(reason, CompletionReason::StopSequenceFound(_)) && !utf8_buffer.is_empty() {
        if let Ok(rest) = std::str::from_utf8(&utf8_buffer) {
            if !rest.is_empty() {
                emit(StreamEvent::flush(rest));
            }
        }
    }

    tracing::debug!("Generation finished: {:?}", reason);
    emit(StreamEvent::completed(reason));
    Ok(())
}

/// Pop the longest valid UTF-8 prefix off `buffer`.
///
/// A token can end mid-codepoint; the incomplete suffix stays buffered for
/// the next token. A buffer that cannot become valid anymore (more than
/// four pending bytes) is discarded as a replacement character.
fn take_valid_utf8_prefix(buffer: &mut Vec<u8>) -> String {
    match std::str::from_utf8(buffer) {
        Ok(s) => {
            let s = s.to_string();
            buffer.clear();
            s
        }
        Err(e) => {
            let valid = e.valid_up_to();
            if valid == 0 {
                if buffer.len() > 4 {
                    buffer.clear();
                    return "\u{FFFD}".to_string();
                }
                return String::new();
            }
            let s = String::from_utf8_lossy(&buffer[..valid]).into_owned();
            buffer.drain(..valid);
            s
        }
    }
}

/// Keep at most `max` trailing bytes of `tail`, respecting char
/// boundaries.
fn trim_tail(tail: &mut String, max: usize) {
    if tail.len() <= max {
        return;
    }
    let mut cut = tail.len() - max;
    while cut < tail.len() && !tail.is_char_boundary(cut) {
        cut += 1;
    }
    tail.drain(..cut);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::mock::MockEngine;
    use crate::inference::speak::SpeakTokenSpec;
    use crate::prompt::TemplateFormatter;
    use crate::types::ModelArchitecture;

    struct Harness {
        engine: MockEngine,
        state: ContextState,
        speak_table: Option<StepTable>,
        stops: StopRegistry,
        speak: SpeakConfig,
        settings: InstanceSettings,
        interrupt: AtomicBool,
    }

    impl Harness {
        fn new(engine: MockEngine) -> Self {
            Self {
                engine,
                state: ContextState::new(),
                speak_table: None,
                stops: StopRegistry::empty(),
                speak: SpeakConfig::default(),
                settings: InstanceSettings::default(),
                interrupt: AtomicBool::new(false),
            }
        }

        fn run(&mut self, request: &GenerationRequest) -> (Vec<StreamEvent>, Result<(), InstanceError>) {
            let formatter = TemplateFormatter::new(ModelArchitecture::Generic);
            let mut events = Vec::new();
            let result = run_generation(
                GenerationScope {
                    engine: &mut self.engine,
                    state: &mut self.state,
                    speak_table: &mut self.speak_table,
                    formatter: &formatter,
                    stops: &self.stops,
                    prediction: &PredictionConfig::default(),
                    speak: &self.speak,
                    settings: &self.settings,
                },
                request,
                &self.interrupt,
                &mut |event| events.push(event),
            );
            (events, result)
        }

        /// Token count of the formatted prompt for `turns` under the
        /// generic formatter (interning makes this stable across calls).
        fn prompt_len(&self, request: &GenerationRequest) -> u32 {
            let formatter = TemplateFormatter::new(ModelArchitecture::Generic);
            let prompt = formatter.format(&request.turns, request.system_prompt.as_deref());
            self.engine.tokenize(&prompt, false, true).unwrap().len() as u32
        }
    }

    fn hi_request() -> GenerationRequest {
        GenerationRequest::new(vec![Turn::user("Hi")])
    }

    #[test]
    fn test_hello_then_eos_scenario() {
        let mut engine = MockEngine::new();
        let hello = engine.push_token("Hello");
        let eos = engine.push_eog("<eos>");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        harness.engine.winner_at(p, hello);
        harness.engine.winner_at(p + 1, eos);

        let (events, result) = harness.run(&request);
        result.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::fragment("Hello", hello));
        assert_eq!(events[1], StreamEvent::completed(CompletionReason::Natural));

        // The EOG token never reaches the cache.
        assert_eq!(harness.state.len() as u32, p + 1);
        assert_eq!(harness.engine.cache_len(), p + 1);
    }

    #[test]
    fn test_max_tokens_budget() {
        let mut engine = MockEngine::new();
        let word = engine.push_token("word");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let mut config = PredictionConfig::default();
        config.max_tokens = 2;
        let request = hi_request().with_prediction(config);
        let p = harness.prompt_len(&request);
        for offset in 0..8 {
            harness.engine.winner_at(p + offset, word);
        }

        let (events, result) = harness.run(&request);
        result.unwrap();

        assert_eq!(events.len(), 3);
        assert!(!events[0].complete);
        assert!(!events[1].complete);
        assert_eq!(
            events[2],
            StreamEvent::completed(CompletionReason::MaxTokensReached)
        );
        assert_eq!(harness.state.len() as u32, harness.engine.cache_len());
    }

    #[test]
    fn test_interrupt_after_first_token() {
        let mut engine = MockEngine::new();
        let word = engine.push_token("word");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        for offset in 0..8 {
            harness.engine.winner_at(p + offset, word);
        }
        // The flag flips while the first token's logits are being served.
        let shared = std::sync::Arc::new(AtomicBool::new(false));
        harness.engine.interrupt_at_position = Some((p, shared.clone()));

        let formatter = TemplateFormatter::new(ModelArchitecture::Generic);
        let mut events = Vec::new();
        let result = run_generation(
            GenerationScope {
                engine: &mut harness.engine,
                state: &mut harness.state,
                speak_table: &mut harness.speak_table,
                formatter: &formatter,
                stops: &harness.stops,
                prediction: &PredictionConfig::default(),
                speak: &harness.speak,
                settings: &harness.settings,
            },
            &request,
            &shared,
            &mut |event| events.push(event),
        );
        result.unwrap();

        assert_eq!(events.len(), 2);
        assert!(!events[0].complete);
        assert_eq!(
            events[1],
            StreamEvent::completed(CompletionReason::UserStopped)
        );
        // One prompt decode plus exactly one generated token; nothing after
        // the flag was observed.
        assert_eq!(harness.engine.decode_calls.len(), 2);
    }

    #[test]
    fn test_context_window_full_exact_budget() {
        let mut engine = MockEngine::new();
        let word = engine.push_token("word");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        for offset in 0..8 {
            harness.engine.winner_at(p + offset, word);
        }
        // Room for exactly two generated tokens.
        let request = request.with_context_length(p + 2);

        let (events, result) = harness.run(&request);
        result.unwrap();

        let fragments = events.iter().filter(|e| !e.complete).count();
        assert_eq!(fragments, 2);
        assert_eq!(
            events.last().unwrap().reason,
            Some(CompletionReason::ContextWindowFull)
        );
        assert_eq!(harness.state.len() as u32, p + 2);
        assert_eq!(harness.engine.cache_len(), p + 2);
    }

    #[test]
    fn test_prompt_too_long_aborts_before_decode() {
        let mut engine = MockEngine::new();
        engine.ready(4, 32);

        let mut harness = Harness::new(engine);
        let request = GenerationRequest::new(vec![Turn::user("a b c d e f g h")]);

        let (events, result) = harness.run(&request);
        assert!(matches!(
            result,
            Err(InstanceError::InvalidConfiguration(_))
        ));
        assert_eq!(harness.engine.decode_calls.len(), 0);
        assert_eq!(harness.engine.cache_len(), 0);
        assert!(harness.state.is_empty());
        assert_eq!(events.len(), 1);
        assert!(matches!(
            events[0].reason,
            Some(CompletionReason::Error(_))
        ));
    }

    #[test]
    fn test_stop_sequence_spanning_fragments() {
        let mut engine = MockEngine::new();
        let st = engine.push_token("ST");
        let op = engine.push_token("OP");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        harness.stops = StopRegistry::empty().with_additions(["STOP"]);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        harness.engine.winner_at(p, st);
        harness.engine.winner_at(p + 1, op);

        let (events, result) = harness.run(&request);
        result.unwrap();

        // "ST" is emitted before the spanning match resolves; no partial
        // sequence leaks after it.
        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::fragment("ST", st));
        assert_eq!(
            events[1],
            StreamEvent::completed(CompletionReason::StopSequenceFound("STOP".into()))
        );

        // The token completing the stop sequence never reached the cache.
        assert_eq!(harness.state.len() as u32, p + 1);
        assert_eq!(harness.engine.cache_len(), p + 1);
    }

    #[test]
    fn test_stop_sequence_trims_fragment() {
        let mut engine = MockEngine::new();
        let tok = engine.push_token("done!</s>junk");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        harness.stops = StopRegistry::empty().with_additions(["</s>"]);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        harness.engine.winner_at(p, tok);

        let (events, result) = harness.run(&request);
        result.unwrap();

        assert_eq!(events.len(), 2);
        assert_eq!(events[0], StreamEvent::fragment("done!", tok));
        assert_eq!(
            events[1],
            StreamEvent::completed(CompletionReason::StopSequenceFound("</s>".into()))
        );
    }

    #[test]
    fn test_empty_fragment_still_carries_token_id() {
        let mut engine = MockEngine::new();
        let silent = engine.push_token("");
        let eos = engine.push_eog("<eos>");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        harness.engine.winner_at(p, silent);
        harness.engine.winner_at(p + 1, eos);

        let (events, result) = harness.run(&request);
        result.unwrap();

        assert_eq!(events[0].text, "");
        assert_eq!(events[0].token, Some(silent));
    }

    #[test]
    fn test_prefix_reuse_across_calls() {
        let mut engine = MockEngine::new();
        let hello = engine.push_token("Hello");
        let eos = engine.push_eog("<eos>");
        engine.ready(256, 32);

        let mut harness = Harness::new(engine);
        let first = hi_request();
        let p1 = harness.prompt_len(&first);
        harness.engine.winner_at(p1, hello);
        harness.engine.winner_at(p1 + 1, eos);
        harness.run(&first).1.unwrap();

        let old_len = harness.state.len() as u32;
        assert_eq!(old_len, p1 + 1);

        // The follow-up dialogue extends the first; its formatted prompt
        // shares the first prompt's tokens as a prefix.
        let second = GenerationRequest::new(vec![
            Turn::user("Hi"),
            Turn::assistant("Hello"),
            Turn::user("More"),
        ]);
        let p2 = harness.prompt_len(&second);
        harness.engine.winner_at(p2, hello);
        harness.engine.winner_at(p2 + 1, eos);

        let calls_before = harness.engine.decode_calls.len();
        harness.run(&second).1.unwrap();

        // The stale tail was evicted exactly once, at the divergence point.
        assert_eq!(harness.engine.evictions.len(), 1);
        let (from, to) = harness.engine.evictions[0];
        assert_eq!(to, old_len);
        assert!(from < old_len);

        // Only the new suffix was decoded, then one token per generated
        // token.
        let (suffix, at) = &harness.engine.decode_calls[calls_before];
        assert_eq!(*at, from);
        assert_eq!(suffix.len() as u32, p2 - from);

        assert_eq!(harness.state.len() as u32, harness.engine.cache_len());
    }

    #[test]
    fn test_decode_failure_dual_signals() {
        let mut engine = MockEngine::new();
        let word = engine.push_token("word");
        engine.ready(128, 32);

        let mut harness = Harness::new(engine);
        let request = hi_request();
        let p = harness.prompt_len(&request);
        harness.engine.winner_at(p, word);
        // Prompt decode is call 0; the first generated token is call 1.
        harness.engine.fail_decode_at_call = Some(1);

        let (events, result) = harness.run(&request);
        assert!(matches!(result, Err(InstanceError::Prediction(_))));
        assert!(matches!(
            events.last().unwrap().reason,
            Some(CompletionReason::Error(_))
        ));
    }

    #[test]
    fn test_speak_mode_clears_cache_and_streams_symbol_ids() {
        let mut engine = MockEngine::new();
        let end = engine.push_token("<custom_token_2>");
        let ids = engine.push_audio_vocab(10, 7, 4);
        engine.ready(256, 32);

        let mut harness = Harness::new(engine);
        harness.speak = SpeakConfig {
            token_spec: SpeakTokenSpec {
                symbols_per_step: 4,
                ..SpeakTokenSpec::default()
            },
            min_frames: 4,
            max_frames: 64,
            grace_frames: 2,
            ..SpeakConfig::default()
        };

        // Empty request text clamps the frame budget up to min_frames (4),
        // so the end marker can compete right at the unlock boundary.
        let request = GenerationRequest::new(vec![Turn::user("")])
            .with_system_prompt(SPEAK_SYSTEM_PROMPT);
        assert!(request.is_speak());

        let prompt = harness.speak.request_prompt("");
        let p = harness.engine.tokenize(&prompt, false, true).unwrap().len() as u32;

        // 28 priming symbols, then the end marker wins the boundary.
        for offset in 0..28u32 {
            let step = (offset % 7) as usize;
            harness.engine.winner_at(p + offset, ids[step][0]);
        }
        harness.engine.winner_at(p + 28, end);

        let (events, result) = harness.run(&request);
        result.unwrap();

        // The cache was forced clean before the call.
        assert!(harness.engine.clear_count >= 1);

        let fragments: Vec<_> = events.iter().filter(|e| !e.complete).collect();
        assert_eq!(fragments.len(), 28);
        for (offset, event) in fragments.iter().enumerate() {
            assert_eq!(event.text, "");
            assert_eq!(event.token, Some(ids[offset % 7][0]));
        }
        assert_eq!(
            events.last().unwrap().reason,
            Some(CompletionReason::Natural)
        );
        assert_eq!(harness.state.len() as u32, harness.engine.cache_len());
    }

    #[test]
    fn test_utf8_buffer_reassembles_split_codepoints() {
        // "é" is 0xC3 0xA9; a token can end after the lead byte.
        let mut buffer = vec![0xC3];
        assert_eq!(take_valid_utf8_prefix(&mut buffer), "");
        buffer.push(0xA9);
        assert_eq!(take_valid_utf8_prefix(&mut buffer), "é");
        assert!(buffer.is_empty());

        // A valid prefix is released while the incomplete suffix stays.
        let mut mixed = b"ab\xE2\x82".to_vec();
        assert_eq!(take_valid_utf8_prefix(&mut mixed), "ab");
        assert_eq!(mixed, vec![0xE2, 0x82]);

        // A buffer that can never become valid collapses to U+FFFD.
        let mut junk = vec![0xC3, 0xC3, 0xC3, 0xC3, 0xC3];
        assert_eq!(take_valid_utf8_prefix(&mut junk), "\u{FFFD}");
        assert!(junk.is_empty());
    }

    #[test]
    fn test_trim_tail_respects_char_boundaries() {
        let mut tail = String::from("ααββ");
        trim_tail(&mut tail, 3);
        assert_eq!(tail, "β");
    }
}
