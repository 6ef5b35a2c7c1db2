//! Scripted engine for orchestration tests
//!
//! Serves position-keyed logits, interns whitespace-split words as tokens,
//! and records every decode/eviction/clear so tests can assert exactly what
//! the orchestration layer asked of the engine.

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::engine::{EngineError, InferenceEngine, ModelInfo, TokenId};
use crate::types::InstanceSettings;

pub(crate) struct MockEngine {
    vocab: RefCell<Vec<String>>,
    word_ids: RefCell<HashMap<String, TokenId>>,
    eog: Vec<TokenId>,
    bos: Option<TokenId>,
    trained_context: u32,
    effective_context: u32,
    batch_capacity: u32,
    loaded: bool,
    has_batch: bool,
    position: u32,
    has_logits: bool,

    /// Logits served for a given cache length (sparse: the rest of the
    /// vocabulary sits at the floor value).
    logits_by_position: HashMap<u32, Vec<(TokenId, f32)>>,
    /// Set this flag as a side effect of serving logits at/after the given
    /// cache length (models a user pressing stop mid-stream).
    pub interrupt_at_position: Option<(u32, Arc<AtomicBool>)>,

    /// Fail every `load_model` call with this message.
    pub fail_load: Option<String>,
    /// Fail the first N `create_context` calls.
    pub fail_context_creates: usize,
    /// Fail the decode call with this index (0-based).
    pub fail_decode_at_call: Option<usize>,
    /// Fail every tokenize call.
    pub fail_tokenize: bool,

    // Recorders
    pub decode_calls: Vec<(Vec<TokenId>, u32)>,
    pub evictions: Vec<(u32, u32)>,
    pub clear_count: usize,
    pub release_count: Arc<AtomicUsize>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self {
            vocab: RefCell::new(Vec::new()),
            word_ids: RefCell::new(HashMap::new()),
            eog: Vec::new(),
            bos: None,
            trained_context: 4096,
            effective_context: 0,
            batch_capacity: 0,
            loaded: false,
            has_batch: false,
            position: 0,
            has_logits: false,
            logits_by_position: HashMap::new(),
            interrupt_at_position: None,
            fail_load: None,
            fail_context_creates: 0,
            fail_decode_at_call: None,
            fail_tokenize: false,
            decode_calls: Vec::new(),
            evictions: Vec::new(),
            clear_count: 0,
            release_count: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn with_trained_context(mut self, n: u32) -> Self {
        self.trained_context = n;
        self
    }

    /// Add a token with the given piece text; returns its id.
    pub fn push_token(&mut self, piece: &str) -> TokenId {
        let mut vocab = self.vocab.borrow_mut();
        let id = vocab.len() as TokenId;
        vocab.push(piece.to_string());
        id
    }

    /// Add a beginning-of-sequence token.
    pub fn push_bos(&mut self) -> TokenId {
        let id = self.push_token("<s>");
        self.bos = Some(id);
        id
    }

    /// Add an end-of-generation token.
    pub fn push_eog(&mut self, piece: &str) -> TokenId {
        let id = self.push_token(piece);
        self.eog.push(id);
        id
    }

    /// Add one `<custom_token_N>` entry per audio symbol for `steps`
    /// cyclic steps of `symbols` each, starting at payload `base`.
    /// Returns `table[step][symbol] = id`.
    pub fn push_audio_vocab(&mut self, base: u32, steps: usize, symbols: usize) -> Vec<Vec<TokenId>> {
        let mut table = vec![Vec::with_capacity(symbols); steps];
        for (step, row) in table.iter_mut().enumerate() {
            for sym in 0..symbols {
                let payload = base as usize + step * symbols + sym;
                row.push(self.push_token(&format!("<custom_token_{payload}>")));
            }
        }
        table
    }

    /// When the resident cache holds `position` tokens, make `winner` the
    /// arg-max of the served logits.
    pub fn winner_at(&mut self, position: u32, winner: TokenId) {
        self.logits_by_position.insert(position, vec![(winner, 10.0)]);
    }

    /// Full sparse control over the logits served at one cache length.
    pub fn logits_at(&mut self, position: u32, pairs: Vec<(TokenId, f32)>) {
        self.logits_by_position.insert(position, pairs);
    }

    /// Tokens currently resident in the mock KV cache.
    pub fn cache_len(&self) -> u32 {
        self.position
    }

    /// Mark the engine ready without going through the lifecycle
    /// controller (direct generation-loop tests).
    pub fn ready(&mut self, context_length: u32, batch_size: u32) {
        self.loaded = true;
        self.effective_context = context_length.min(self.trained_context);
        self.batch_capacity = batch_size;
        self.has_batch = true;
    }

    fn intern(&self, word: &str) -> TokenId {
        if let Some(id) = self.word_ids.borrow().get(word) {
            return *id;
        }
        let mut vocab = self.vocab.borrow_mut();
        let id = vocab.len() as TokenId;
        vocab.push(word.to_string());
        self.word_ids.borrow_mut().insert(word.to_string(), id);
        id
    }
}

impl InferenceEngine for MockEngine {
    fn load_model(
        &mut self,
        path: &Path,
        _settings: &InstanceSettings,
    ) -> Result<ModelInfo, EngineError> {
        if let Some(message) = &self.fail_load {
            return Err(EngineError::ModelLoad(message.clone()));
        }
        self.loaded = true;
        Ok(ModelInfo {
            path: path.to_string_lossy().to_string(),
            vocab_size: self.vocab.borrow().len(),
            embedding_dim: 32,
            trained_context: self.trained_context,
            param_count: 1,
            size_bytes: 1,
        })
    }

    fn create_context(&mut self, settings: &InstanceSettings) -> Result<u32, EngineError> {
        if !self.loaded {
            return Err(EngineError::NotReady("no model loaded"));
        }
        if self.fail_context_creates > 0 {
            self.fail_context_creates -= 1;
            return Err(EngineError::ContextCreate("scripted failure".into()));
        }
        self.effective_context = settings.context_length.min(self.trained_context);
        self.position = 0;
        Ok(self.effective_context)
    }

    fn create_batch(&mut self, capacity: u32) -> Result<(), EngineError> {
        self.batch_capacity = capacity;
        self.has_batch = true;
        Ok(())
    }

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        _parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError> {
        if self.fail_tokenize {
            return Err(EngineError::Tokenization("scripted failure".into()));
        }
        let mut tokens = Vec::new();
        if add_bos {
            if let Some(bos) = self.bos {
                tokens.push(bos);
            }
        }
        tokens.extend(text.split_whitespace().map(|w| self.intern(w)));
        Ok(tokens)
    }

    fn token_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError> {
        Ok(self
            .vocab
            .borrow()
            .get(token as usize)
            .map(|s| s.as_bytes().to_vec())
            .unwrap_or_default())
    }

    fn token_text(&self, token: TokenId) -> String {
        self.vocab
            .borrow()
            .get(token as usize)
            .cloned()
            .unwrap_or_default()
    }

    fn decode(&mut self, tokens: &[TokenId], first_position: u32) -> Result<(), EngineError> {
        if tokens.is_empty() {
            return Ok(());
        }
        if !self.has_batch {
            return Err(EngineError::NotReady("no batch created"));
        }
        if tokens.len() > self.batch_capacity as usize {
            return Err(EngineError::Decode("batch overflow".into()));
        }
        if first_position != self.position {
            return Err(EngineError::Decode(format!(
                "non-contiguous decode: at {} but cache ends at {}",
                first_position, self.position
            )));
        }
        if let Some(fail_at) = self.fail_decode_at_call {
            if self.decode_calls.len() == fail_at {
                return Err(EngineError::Decode("scripted failure".into()));
            }
        }

        self.decode_calls.push((tokens.to_vec(), first_position));
        self.position += tokens.len() as u32;
        self.has_logits = true;
        Ok(())
    }

    fn last_logits(&self) -> Option<Vec<f32>> {
        if !self.has_logits {
            return None;
        }
        if let Some((at, flag)) = &self.interrupt_at_position {
            if self.position >= *at {
                flag.store(true, Ordering::Relaxed);
            }
        }

        let mut logits = vec![0.0f32; self.vocab.borrow().len()];
        if let Some(pairs) = self.logits_by_position.get(&self.position) {
            for (id, value) in pairs {
                if let Some(slot) = logits.get_mut(*id as usize) {
                    *slot = *value;
                }
            }
        }
        Some(logits)
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.eog.contains(&token)
    }

    fn bos_token(&self) -> Option<TokenId> {
        self.bos
    }

    fn vocab_size(&self) -> usize {
        self.vocab.borrow().len()
    }

    fn max_context(&self) -> u32 {
        self.effective_context
    }

    fn clear_cache(&mut self) {
        self.position = 0;
        self.has_logits = false;
        self.clear_count += 1;
    }

    fn evict_cache_range(&mut self, from: u32, to: u32) -> Result<(), EngineError> {
        if from > self.position || to < from {
            return Err(EngineError::CacheEviction(format!(
                "bad range [{from}, {to}) with cache at {}",
                self.position
            )));
        }
        self.evictions.push((from, to));
        // Orchestration only ever trims the tail.
        self.position = from;
        Ok(())
    }

    fn release(&mut self) {
        if self.loaded || self.has_batch {
            self.release_count.fetch_add(1, Ordering::SeqCst);
        }
        self.loaded = false;
        self.has_batch = false;
        self.position = 0;
        self.has_logits = false;
        self.effective_context = 0;
    }

    fn is_ready(&self) -> bool {
        self.loaded && self.effective_context > 0 && self.has_batch
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_word_interning_is_stable() {
        let engine = MockEngine::new();
        let a = engine.tokenize("hello world", false, false).unwrap();
        let b = engine.tokenize("hello there", false, false).unwrap();
        assert_eq!(a[0], b[0]);
        assert_ne!(a[1], b[1]);
    }

    #[test]
    fn test_decode_must_be_contiguous() {
        let mut engine = MockEngine::new();
        engine.ready(128, 32);
        engine.decode(&[1, 2, 3], 0).unwrap();
        assert!(engine.decode(&[4], 5).is_err());
        engine.decode(&[4], 3).unwrap();
        assert_eq!(engine.cache_len(), 4);
    }

    #[test]
    fn test_eviction_trims_tail() {
        let mut engine = MockEngine::new();
        engine.ready(128, 32);
        engine.decode(&[1, 2, 3, 4], 0).unwrap();
        engine.evict_cache_range(2, 4).unwrap();
        assert_eq!(engine.cache_len(), 2);
        assert_eq!(engine.evictions, vec![(2, 4)]);
    }

    #[test]
    fn test_logits_follow_script() {
        let mut engine = MockEngine::new();
        let hello = engine.push_token("Hello");
        engine.ready(128, 32);
        engine.winner_at(1, hello);
        engine.decode(&[hello], 0).unwrap();

        let logits = engine.last_logits().unwrap();
        assert_eq!(logits[hello as usize], 10.0);
    }
}
