//! llama.cpp engine adapter
//!
//! Implements [`InferenceEngine`] on top of `llama-cpp-2`. The wrapped
//! types (`LlamaModel`, `LlamaContext`, `LlamaBatch`) contain raw pointers
//! and are not `Send`; instances of this adapter are created and driven
//! entirely on one worker thread.

use std::num::NonZeroU32;
use std::path::Path;

use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::context::LlamaContext;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel, Special};
use llama_cpp_2::token::LlamaToken;
use once_cell::sync::OnceCell;

use crate::engine::{EngineError, InferenceEngine, ModelInfo, TokenId};
use crate::types::InstanceSettings;

/// Process-wide backend handle. llama.cpp refuses double initialization,
/// and every loaded instance shares the same backend.
static BACKEND: OnceCell<LlamaBackend> = OnceCell::new();

fn backend() -> Result<&'static LlamaBackend, EngineError> {
    BACKEND.get_or_try_init(|| {
        LlamaBackend::init().map_err(|e| EngineError::BackendInit(e.to_string()))
    })
}

/// [`InferenceEngine`] backed by llama.cpp.
pub struct LlamaCppEngine {
    // Field order is load-bearing: the batch and context must drop before
    // the model they reference.
    batch: Option<LlamaBatch>,
    context: Option<LlamaContext<'static>>,
    model: Option<Box<LlamaModel>>,
    batch_capacity: u32,
    effective_context: u32,
    has_logits: bool,
}

impl LlamaCppEngine {
    /// Create an adapter with nothing loaded.
    pub fn new() -> Self {
        Self {
            batch: None,
            context: None,
            model: None,
            batch_capacity: 0,
            effective_context: 0,
            has_logits: false,
        }
    }

    fn model_ref(&self) -> Result<&LlamaModel, EngineError> {
        self.model
            .as_deref()
            .ok_or(EngineError::NotReady("no model loaded"))
    }
}

impl Default for LlamaCppEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl InferenceEngine for LlamaCppEngine {
    fn load_model(
        &mut self,
        path: &Path,
        settings: &InstanceSettings,
    ) -> Result<ModelInfo, EngineError> {
        // A replacement load invalidates everything downstream of the model.
        self.release();

        let backend = backend()?;
        let model_params = LlamaModelParams::default().with_n_gpu_layers(settings.gpu_layers);

        let model = LlamaModel::load_from_file(backend, path, &model_params)
            .map_err(|e| EngineError::ModelLoad(e.to_string()))?;

        let info = ModelInfo {
            path: path.to_string_lossy().to_string(),
            vocab_size: model.n_vocab() as usize,
            embedding_dim: model.n_embd(),
            trained_context: model.n_ctx_train(),
            param_count: model.n_params() as u64,
            size_bytes: model.size() as u64,
        };

        tracing::info!(
            "Model loaded: {} ({} params, {} vocab, {} trained ctx)",
            info.path,
            info.param_count,
            info.vocab_size,
            info.trained_context
        );

        self.model = Some(Box::new(model));
        Ok(info)
    }

    fn create_context(&mut self, settings: &InstanceSettings) -> Result<u32, EngineError> {
        // Recreating the context drops all cached state.
        self.context = None;
        self.has_logits = false;

        let backend = backend()?;
        let model = self
            .model
            .as_deref()
            .ok_or(EngineError::NotReady("no model loaded"))?;

        // Clamp to the trained maximum; a silent downgrade, not an error.
        let requested = settings.context_length.max(1);
        let n_ctx = requested.min(model.n_ctx_train().max(1));
        if n_ctx < requested {
            tracing::warn!(
                "Requested context {} exceeds trained maximum, clamping to {}",
                requested,
                n_ctx
            );
        }

        let mut ctx_params = LlamaContextParams::default()
            .with_n_ctx(NonZeroU32::new(n_ctx))
            .with_n_batch(settings.batch_size);

        if settings.threads > 0 {
            ctx_params = ctx_params
                .with_n_threads(settings.threads as i32)
                .with_n_threads_batch(settings.threads as i32);
        }

        // SAFETY: the context never outlives the model. The model lives in
        // a Box (stable address even if the engine struct moves), is only
        // dropped by `release`/`Drop`, and both paths drop the context
        // first (field declaration order enforces this for `Drop`).
        let model_ref: &'static LlamaModel =
            unsafe { std::mem::transmute::<&LlamaModel, &'static LlamaModel>(model) };

        let context = model_ref
            .new_context(backend, ctx_params)
            .map_err(|e| EngineError::ContextCreate(e.to_string()))?;

        self.effective_context = context.n_ctx();
        self.context = Some(context);

        tracing::debug!("Context created with {} positions", self.effective_context);
        Ok(self.effective_context)
    }

    fn create_batch(&mut self, capacity: u32) -> Result<(), EngineError> {
        if capacity == 0 {
            return Err(EngineError::BatchCreate("capacity must be non-zero".into()));
        }
        self.batch = Some(LlamaBatch::new(capacity as usize, 1));
        self.batch_capacity = capacity;
        Ok(())
    }

    fn tokenize(
        &self,
        text: &str,
        add_bos: bool,
        _parse_special: bool,
    ) -> Result<Vec<TokenId>, EngineError> {
        // llama-cpp-2 parses special-token markup itself; the flag is part
        // of the boundary for engines that need it spelled out.
        let model = self.model_ref()?;
        let add = if add_bos { AddBos::Always } else { AddBos::Never };

        let tokens = model
            .str_to_token(text, add)
            .map_err(|e| EngineError::Tokenization(e.to_string()))?;

        Ok(tokens.into_iter().map(|t| t.0).collect())
    }

    fn token_bytes(&self, token: TokenId) -> Result<Vec<u8>, EngineError> {
        let model = self.model_ref()?;
        model
            .token_to_bytes(LlamaToken(token), Special::Tokenize)
            .map_err(|e| EngineError::Tokenization(e.to_string()))
    }

    fn token_text(&self, token: TokenId) -> String {
        match self.model.as_deref() {
            Some(model) => model
                .token_to_str(LlamaToken(token), Special::Tokenize)
                .unwrap_or_default(),
            None => String::new(),
        }
    }

    fn decode(&mut self, tokens: &[TokenId], first_position: u32) -> Result<(), EngineError> {
        if tokens.is_empty() {
            return Ok(());
        }

        let context = self
            .context
            .as_mut()
            .ok_or(EngineError::NotReady("no context created"))?;
        let batch = self
            .batch
            .as_mut()
            .ok_or(EngineError::NotReady("no batch created"))?;

        if tokens.len() > self.batch_capacity as usize {
            return Err(EngineError::Decode(format!(
                "batch overflow: {} tokens into capacity {}",
                tokens.len(),
                self.batch_capacity
            )));
        }

        batch.clear();
        for (i, token) in tokens.iter().enumerate() {
            let is_last = i == tokens.len() - 1;
            batch
                .add(LlamaToken(*token), first_position as i32 + i as i32, &[0], is_last)
                .map_err(|e| EngineError::Decode(e.to_string()))?;
        }

        context
            .decode(batch)
            .map_err(|e| EngineError::Decode(e.to_string()))?;

        self.has_logits = true;
        Ok(())
    }

    fn last_logits(&self) -> Option<Vec<f32>> {
        if !self.has_logits {
            return None;
        }
        self.context.as_ref().map(|ctx| ctx.get_logits().to_vec())
    }

    fn is_end_of_generation(&self, token: TokenId) -> bool {
        self.model
            .as_deref()
            .is_some_and(|m| m.is_eog_token(LlamaToken(token)))
    }

    fn bos_token(&self) -> Option<TokenId> {
        let model = self.model.as_deref()?;
        let bos = model.token_bos();
        (bos.0 >= 0).then_some(bos.0)
    }

    fn vocab_size(&self) -> usize {
        self.model.as_deref().map_or(0, |m| m.n_vocab() as usize)
    }

    fn max_context(&self) -> u32 {
        self.effective_context
    }

    fn clear_cache(&mut self) {
        if let Some(ctx) = self.context.as_mut() {
            ctx.clear_kv_cache();
        }
        self.has_logits = false;
    }

    fn evict_cache_range(&mut self, from: u32, to: u32) -> Result<(), EngineError> {
        let context = self
            .context
            .as_mut()
            .ok_or(EngineError::NotReady("no context created"))?;

        context
            .clear_kv_cache_seq(Some(0), Some(from), Some(to))
            .map_err(|e| EngineError::CacheEviction(e.to_string()))?;
        Ok(())
    }

    fn release(&mut self) {
        // Dependency order: batch, then context, then model.
        let had_model = self.model.is_some();
        self.batch = None;
        self.context = None;
        self.model = None;
        self.batch_capacity = 0;
        self.effective_context = 0;
        self.has_logits = false;

        if had_model {
            tracing::info!("Engine resources released");
        }
    }

    fn is_ready(&self) -> bool {
        self.model.is_some() && self.context.is_some() && self.batch.is_some()
    }
}

impl Drop for LlamaCppEngine {
    fn drop(&mut self) {
        self.release();
    }
}
