//! Load lifecycle
//!
//! Drives an instance from idle to ready: validate the model file, load the
//! model, create the context (with a single degraded retry), prewarm, and
//! report each stage. Shutdown releases resources in dependency order and
//! is idempotent.

use crate::engine::{validate_gguf, EngineError, InferenceEngine, ModelInfo};
use crate::inference::events::LoadStage;
use crate::inference::InstanceError;
use crate::types::{InstanceSettings, ModelProfile};

/// Classify a model-load failure. Unsupported-architecture errors carry a
/// remediation hint and are recoverable at the façade by retrying with the
/// generic architecture tag.
fn classify_load_error(error: EngineError) -> InstanceError {
    let message = error.to_string();
    let lowered = message.to_lowercase();
    if lowered.contains("architecture") || lowered.contains("unknown model") {
        InstanceError::UnsupportedArchitecture {
            message,
            suggestion: "This backend build does not recognize the model's architecture; \
                         update the backend or use a model from a supported family"
                .to_string(),
        }
    } else {
        InstanceError::ModelInit(message)
    }
}

/// Run the startup sequence, emitting a stage event at every transition.
///
/// Emits `Ready` or `Failed` as the final stage; the caller closes the
/// progress stream afterwards.
pub(crate) fn startup(
    engine: &mut dyn InferenceEngine,
    profile: &ModelProfile,
    settings: &InstanceSettings,
    emit: &mut dyn FnMut(LoadStage),
) -> Result<ModelInfo, InstanceError> {
    let fail = |emit: &mut dyn FnMut(LoadStage),
                err: InstanceError|
     -> Result<ModelInfo, InstanceError> {
        emit(LoadStage::Failed(err.clone()));
        Err(err)
    };

    emit(LoadStage::Preparing);
    let mut settings = settings.clone();
    settings.validate();

    emit(LoadStage::ReadingModel);
    // Cheap header check before the expensive load.
    if let Err(e) = validate_gguf(&profile.path) {
        return fail(emit, e.into());
    }
    let info = match engine.load_model(&profile.path, &settings) {
        Ok(info) => info,
        Err(e) => return fail(emit, classify_load_error(e)),
    };

    emit(LoadStage::CreatingContext);
    let effective_settings = match engine.create_context(&settings) {
        Ok(n_ctx) => {
            tracing::info!("Context created: {} positions", n_ctx);
            settings.clone()
        }
        Err(first) => {
            // Exactly one automatic retry with a reduced configuration;
            // a second failure is fatal for this load attempt.
            let fallback = settings.fallback();
            tracing::warn!(
                "Context creation failed ({}), retrying with fallback settings",
                first
            );
            match engine.create_context(&fallback) {
                Ok(n_ctx) => {
                    tracing::info!("Fallback context created: {} positions", n_ctx);
                    fallback
                }
                Err(second) => return fail(emit, second.into()),
            }
        }
    };
    if let Err(e) = engine.create_batch(effective_settings.batch_size) {
        return fail(emit, e.into());
    }

    emit(LoadStage::Prewarming);
    prewarm(engine);

    emit(LoadStage::Ready);
    tracing::info!("Instance ready: {}", profile.id);
    Ok(info)
}

/// One trivial decode cycle to force lazy initialization inside the
/// backend. Failure is logged and never fatal.
fn prewarm(engine: &mut dyn InferenceEngine) {
    let Some(bos) = engine.bos_token() else {
        tracing::debug!("No BOS token; skipping prewarm");
        return;
    };
    if let Err(e) = engine.decode(&[bos], 0) {
        tracing::warn!("Prewarm decode failed (continuing): {}", e);
    }
    engine.clear_cache();
}

/// Release all engine resources. Safe to call repeatedly.
pub(crate) fn shutdown(engine: &mut dyn InferenceEngine) {
    engine.release();
}
