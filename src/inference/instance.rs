//! Instance handle and worker thread
//!
//! Engine handles contain raw pointers that are not `Send`, so every engine
//! operation for one instance runs on a dedicated worker thread owning the
//! engine exclusively. The public [`Instance`] handle communicates with it
//! over a command channel; startup, generation, interruption, shutdown, and
//! settings mutation all serialize through that single owner. Distinct
//! instances are fully independent.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};

use crate::engine::{InferenceEngine, LlamaCppEngine, ModelInfo};
use crate::inference::context::ContextState;
use crate::inference::events::{CompletionReason, LoadStage, StreamEvent};
use crate::inference::generation::{run_generation, GenerationRequest, GenerationScope};
use crate::inference::speak::{SpeakConfig, StepTable};
use crate::inference::{lifecycle, InstanceError};
use crate::prompt::{PromptFormatter, StopRegistry, TemplateFormatter};
use crate::types::{InstanceSettings, ModelProfile, PredictionConfig};

/// Creates the engine inside the worker thread (the engine itself is not
/// `Send`, the factory is).
pub type EngineFactory = Box<dyn FnOnce() -> Box<dyn InferenceEngine> + Send>;

/// Per-instance configuration beyond [`InstanceSettings`].
pub struct InstanceOptions {
    /// Default sampling configuration (per-call overrides win)
    pub prediction: PredictionConfig,
    /// Speak-mode configuration
    pub speak: SpeakConfig,
    /// Stop sequences added on top of the architecture defaults
    pub extra_stop_sequences: Vec<String>,
    /// Replaces the built-in per-architecture template formatter
    pub formatter: Option<Box<dyn PromptFormatter>>,
}

impl Default for InstanceOptions {
    fn default() -> Self {
        Self {
            prediction: PredictionConfig::default(),
            speak: SpeakConfig::default(),
            extra_stop_sequences: Vec::new(),
            formatter: None,
        }
    }
}

enum WorkerCommand {
    Load {
        progress_tx: UnboundedSender<LoadStage>,
    },
    Generate {
        request: GenerationRequest,
        event_tx: UnboundedSender<StreamEvent>,
        interrupt: Arc<AtomicBool>,
    },
    UpdateSettings(InstanceSettings),
    SetPrediction(PredictionConfig),
    Shutdown,
}

/// One loaded (or loading) model instance.
///
/// Cheap handle over the worker thread; clone-free by design — share it
/// behind an `Arc` if multiple owners need it.
pub struct Instance {
    command_tx: UnboundedSender<WorkerCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
    profile: ModelProfile,
    ready: Arc<AtomicBool>,
    model_info: Arc<Mutex<Option<ModelInfo>>>,
    current_interrupt: Mutex<Arc<AtomicBool>>,
}

impl Instance {
    /// Spawn an instance whose engine is built by `factory` on the worker
    /// thread. Loading does not start until [`Instance::load`] is called.
    pub fn spawn(
        profile: ModelProfile,
        settings: InstanceSettings,
        options: InstanceOptions,
        factory: EngineFactory,
    ) -> Self {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let ready = Arc::new(AtomicBool::new(false));
        let model_info = Arc::new(Mutex::new(None));

        let worker_profile = profile.clone();
        let worker_ready = ready.clone();
        let worker_info = model_info.clone();
        let handle = thread::spawn(move || {
            worker_main(
                command_rx,
                factory,
                worker_profile,
                settings,
                options,
                worker_ready,
                worker_info,
            );
        });

        tracing::info!("Instance worker started: {}", profile.id);
        Self {
            command_tx,
            worker: Mutex::new(Some(handle)),
            profile,
            ready,
            model_info,
            current_interrupt: Mutex::new(Arc::new(AtomicBool::new(false))),
        }
    }

    /// Spawn an instance backed by the llama.cpp engine.
    pub fn local(profile: ModelProfile, settings: InstanceSettings, options: InstanceOptions) -> Self {
        Self::spawn(
            profile,
            settings,
            options,
            Box::new(|| Box::new(LlamaCppEngine::new()) as Box<dyn InferenceEngine>),
        )
    }

    pub fn profile(&self) -> &ModelProfile {
        &self.profile
    }

    /// True once the startup sequence reached `Ready`.
    pub fn is_ready(&self) -> bool {
        self.ready.load(Ordering::SeqCst)
    }

    /// Information about the loaded model, if loading completed.
    pub fn model_info(&self) -> Option<ModelInfo> {
        self.model_info.lock().ok().and_then(|info| info.clone())
    }

    /// Start the load lifecycle. Returns the stage stream; it closes after
    /// `Ready` or `Failed`.
    pub fn load(&self) -> LoadProgress {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        if self
            .command_tx
            .send(WorkerCommand::Load {
                progress_tx: progress_tx.clone(),
            })
            .is_err()
        {
            let _ = progress_tx.send(LoadStage::Failed(InstanceError::NotReady));
        }
        LoadProgress { rx: progress_rx }
    }

    /// Submit a generation call. Returns immediately; calls on the same
    /// instance serialize on the worker, so back-to-back submissions see a
    /// consistent KV cache.
    pub fn generate(&self, request: GenerationRequest) -> GenerationStream {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let interrupt = Arc::new(AtomicBool::new(false));

        if let Ok(mut current) = self.current_interrupt.lock() {
            *current = interrupt.clone();
        }

        if self
            .command_tx
            .send(WorkerCommand::Generate {
                request,
                event_tx: event_tx.clone(),
                interrupt: interrupt.clone(),
            })
            .is_err()
        {
            let _ = event_tx.send(StreamEvent::completed(CompletionReason::Error(
                InstanceError::NotReady.to_string(),
            )));
        }

        GenerationStream {
            rx: event_rx,
            interrupt,
        }
    }

    /// Convenience variant of [`Instance::generate`] for callers that only
    /// want text fragments.
    pub fn generate_text(&self, request: GenerationRequest) -> TextStream {
        TextStream {
            inner: self.generate(request),
        }
    }

    /// Interrupt the most recent generation call. Cooperative: the stream
    /// ends with `UserStopped` within one token iteration.
    pub fn interrupt(&self) {
        if let Ok(current) = self.current_interrupt.lock() {
            current.store(true, Ordering::Relaxed);
        }
    }

    /// Replace the instance settings. Context-affecting fields take effect
    /// on the next [`Instance::load`]; this call does not reload.
    pub fn update_settings(&self, settings: InstanceSettings) {
        let _ = self.command_tx.send(WorkerCommand::UpdateSettings(settings));
    }

    /// Replace the default sampling configuration. In-flight calls keep
    /// the configuration they captured.
    pub fn set_default_prediction(&self, prediction: PredictionConfig) {
        let _ = self.command_tx.send(WorkerCommand::SetPrediction(prediction));
    }

    /// Release engine resources and stop the worker. Idempotent; safe to
    /// call while a generation is streaming (it finishes first, since the
    /// worker serializes commands).
    pub fn shutdown(&self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        let _ = self.command_tx.send(WorkerCommand::Shutdown);
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                let _ = handle.join();
            }
        }
    }
}

/// Stream of [`LoadStage`] events for one load attempt.
pub struct LoadProgress {
    rx: UnboundedReceiver<LoadStage>,
}

impl LoadProgress {
    pub async fn next(&mut self) -> Option<LoadStage> {
        self.rx.recv().await
    }

    /// Drain the stream; `Ok` on `Ready`, the failure on `Failed`.
    pub async fn wait_ready(mut self) -> Result<(), InstanceError> {
        while let Some(stage) = self.next().await {
            match stage {
                LoadStage::Ready => return Ok(()),
                LoadStage::Failed(err) => return Err(err),
                _ => {}
            }
        }
        Err(InstanceError::Unknown(
            "load progress stream closed before a terminal stage".into(),
        ))
    }
}

/// Stream of [`StreamEvent`]s for one generation call.
pub struct GenerationStream {
    rx: UnboundedReceiver<StreamEvent>,
    interrupt: Arc<AtomicBool>,
}

impl GenerationStream {
    /// Next event, `None` once the stream is closed (after the terminal
    /// event).
    pub async fn next(&mut self) -> Option<StreamEvent> {
        self.rx.recv().await
    }

    /// Cooperatively cancel this call.
    pub fn interrupt(&self) {
        self.interrupt.store(true, Ordering::Relaxed);
    }

    /// Collect every fragment into one string. A terminal error event
    /// becomes a hard `Err`, so awaiting callers never miss failures.
    pub async fn collect_text(mut self) -> Result<String, InstanceError> {
        let mut out = String::new();
        while let Some(event) = self.next().await {
            out.push_str(&event.text);
            if let Some(CompletionReason::Error(message)) = event.reason {
                return Err(InstanceError::Prediction(message));
            }
        }
        Ok(out)
    }
}

/// Bare-text view over a generation stream.
pub struct TextStream {
    inner: GenerationStream,
}

impl TextStream {
    /// Next non-empty text fragment; `None` once generation completed (for
    /// any reason).
    pub async fn next(&mut self) -> Option<String> {
        while let Some(event) = self.inner.next().await {
            if event.complete {
                return None;
            }
            if !event.text.is_empty() {
                return Some(event.text);
            }
        }
        None
    }

    pub fn interrupt(&self) {
        self.inner.interrupt();
    }
}

/// Worker thread main loop. Owns the engine and all mutable generation
/// state; processes commands until shutdown.
fn worker_main(
    mut command_rx: UnboundedReceiver<WorkerCommand>,
    factory: EngineFactory,
    profile: ModelProfile,
    mut settings: InstanceSettings,
    options: InstanceOptions,
    ready: Arc<AtomicBool>,
    model_info: Arc<Mutex<Option<ModelInfo>>>,
) {
    let mut engine = factory();
    let mut state = ContextState::new();
    let mut speak_table: Option<StepTable> = None;

    let formatter: Box<dyn PromptFormatter> = options
        .formatter
        .unwrap_or_else(|| Box::new(TemplateFormatter::new(profile.architecture)));
    let stops = StopRegistry::for_architecture(profile.architecture)
        .with_additions(options.extra_stop_sequences);
    let speak = options.speak;
    let mut prediction = options.prediction;
    settings.validate();

    while let Some(command) = command_rx.blocking_recv() {
        match command {
            WorkerCommand::Load { progress_tx } => {
                let result = lifecycle::startup(engine.as_mut(), &profile, &settings, &mut |stage| {
                    let _ = progress_tx.send(stage);
                });
                match result {
                    Ok(info) => {
                        if let Ok(mut slot) = model_info.lock() {
                            *slot = Some(info);
                        }
                        // A reload starts from an empty cache.
                        state = ContextState::new();
                        speak_table = None;
                        ready.store(true, Ordering::SeqCst);
                    }
                    Err(e) => {
                        tracing::error!("Load failed: {}", e);
                        ready.store(false, Ordering::SeqCst);
                    }
                }
            }
            WorkerCommand::Generate {
                request,
                event_tx,
                interrupt,
            } => {
                if !ready.load(Ordering::SeqCst) {
                    let _ = event_tx.send(StreamEvent::completed(CompletionReason::Error(
                        InstanceError::NotReady.to_string(),
                    )));
                    continue;
                }
                let result = run_generation(
                    GenerationScope {
                        engine: engine.as_mut(),
                        state: &mut state,
                        speak_table: &mut speak_table,
                        formatter: formatter.as_ref(),
                        stops: &stops,
                        prediction: &prediction,
                        speak: &speak,
                        settings: &settings,
                    },
                    &request,
                    &interrupt,
                    &mut |event| {
                        let _ = event_tx.send(event);
                    },
                );
                if let Err(e) = result {
                    // Already surfaced to the stream as a terminal event.
                    tracing::error!("Generation failed: {}", e);
                }
            }
            WorkerCommand::UpdateSettings(mut new_settings) => {
                new_settings.validate();
                settings = new_settings;
                tracing::debug!("Instance settings updated");
            }
            WorkerCommand::SetPrediction(mut config) => {
                config.validate();
                prediction = config;
            }
            WorkerCommand::Shutdown => {
                lifecycle::shutdown(engine.as_mut());
                ready.store(false, Ordering::SeqCst);
                tracing::info!("Instance worker shut down: {}", profile.id);
                break;
            }
        }
    }
}
