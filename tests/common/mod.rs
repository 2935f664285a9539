//! Scripted collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use mate_lib::error::BackendError;
use mate_lib::llm::backend::{BackendFactory, Generation, ImageInput, InferenceBackend};
use mate_lib::llm::lifecycle::ModelLifecycleController;
use mate_lib::llm::model_manager::{Downloader, ModelStorage, NetworkMonitor};
use mate_lib::llm::model_registry::{self, ModelDescriptor};
use mate_lib::settings::{MemoryFacts, MemoryStore, PersistedSettings, PersonaConfig, SessionConfig};
use mate_lib::tools::{AppRegistry, InstalledApp, ScreenContextProvider, WebFetcher, WebSearchProvider};
use mate_lib::AssistantSession;
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};

/// Larger than every catalog minimum. Written as a sparse file.
pub const FAKE_MODEL_BYTES: u64 = 2_000_000_000;

pub fn place_model(storage: &ModelStorage, model: &ModelDescriptor) {
    storage.ensure_dir().unwrap();
    let file = std::fs::File::create(storage.model_path(model)).unwrap();
    file.set_len(FAKE_MODEL_BYTES).unwrap();
}

// ── Backend ─────────────────────────────────────────────────────────

/// Holds a generation open until the test releases it.
#[derive(Default)]
pub struct Gate {
    pub entered: Notify,
    pub release: Notify,
}

/// Replies and prompt log shared by every backend a factory builds.
#[derive(Clone, Default)]
pub struct Script {
    replies: Arc<Mutex<VecDeque<Result<String, String>>>>,
    prompts: Arc<Mutex<Vec<String>>>,
    gate: Arc<Mutex<Option<Arc<Gate>>>>,
    images: Arc<AtomicBool>,
    image_calls: Arc<AtomicUsize>,
}

impl Script {
    pub fn reply(&self, text: &str) -> &Self {
        self.replies.lock().unwrap().push_back(Ok(text.to_string()));
        self
    }

    pub fn fail(&self, reason: &str) -> &Self {
        self.replies.lock().unwrap().push_back(Err(reason.to_string()));
        self
    }

    /// The next generation blocks until `gate.release` is notified.
    pub fn gate_next(&self) -> Arc<Gate> {
        let gate = Arc::new(Gate::default());
        *self.gate.lock().unwrap() = Some(Arc::clone(&gate));
        gate
    }

    /// Backends report image support from now on.
    pub fn accept_images(&self) -> &Self {
        self.images.store(true, Ordering::SeqCst);
        self
    }

    pub fn image_calls(&self) -> usize {
        self.image_calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }

    pub fn last_prompt(&self) -> String {
        self.prompts().last().cloned().unwrap_or_default()
    }
}

pub struct ScriptedBackend {
    script: Script,
    closed: Arc<AtomicBool>,
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    fn engine(&self) -> &'static str {
        "scripted"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, BackendError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(BackendError::Closed);
        }
        self.script.prompts.lock().unwrap().push(prompt.to_string());

        let gate = self.script.gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let reply = self.script.replies.lock().unwrap().pop_front();
        match reply {
            Some(Ok(text)) => Ok(Generation { text, elapsed: Duration::from_millis(5) }),
            Some(Err(reason)) => Err(BackendError::Generation(reason)),
            None => Ok(Generation { text: "ok".to_string(), elapsed: Duration::from_millis(5) }),
        }
    }

    fn supports_images(&self) -> bool {
        self.script.images.load(Ordering::SeqCst)
    }

    async fn generate_with_image(
        &self,
        prompt: &str,
        _image: &ImageInput,
    ) -> Result<Generation, BackendError> {
        self.script.image_calls.fetch_add(1, Ordering::SeqCst);
        self.generate(prompt).await
    }

    fn is_ready(&self) -> bool {
        !self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct ScriptedFactory {
    pub script: Script,
    loaded: Mutex<Vec<(&'static str, Arc<AtomicBool>)>>,
    fail_next: Mutex<Option<String>>,
}

impl ScriptedFactory {
    pub fn fail_next_load(&self, reason: &str) {
        *self.fail_next.lock().unwrap() = Some(reason.to_string());
    }

    /// Display names in load order.
    pub fn loads(&self) -> Vec<&'static str> {
        self.loaded.lock().unwrap().iter().map(|(name, _)| *name).collect()
    }

    /// Backends that have been loaded and not closed.
    pub fn open_backends(&self) -> usize {
        self.loaded
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, closed)| !closed.load(Ordering::SeqCst))
            .count()
    }
}

#[async_trait]
impl BackendFactory for ScriptedFactory {
    async fn load(
        &self,
        descriptor: &'static ModelDescriptor,
        _model_path: &Path,
    ) -> Result<Box<dyn InferenceBackend>, BackendError> {
        if let Some(reason) = self.fail_next.lock().unwrap().take() {
            return Err(BackendError::LoadFailed(reason));
        }
        let closed = Arc::new(AtomicBool::new(false));
        self.loaded
            .lock()
            .unwrap()
            .push((descriptor.display_name, Arc::clone(&closed)));
        Ok(Box::new(ScriptedBackend { script: self.script.clone(), closed }))
    }
}

// ── Download ────────────────────────────────────────────────────────

pub struct FakeDownloader {
    progress: Vec<u8>,
    outcome: Result<u64, String>,
    content: Option<&'static [u8]>,
    gate: Option<Arc<Gate>>,
    pub calls: AtomicUsize,
    pub cancelled: Mutex<Vec<String>>,
}

impl FakeDownloader {
    /// Emits `progress`, then writes a complete model file.
    pub fn succeeding(progress: &[u8]) -> Self {
        Self {
            progress: progress.to_vec(),
            outcome: Ok(FAKE_MODEL_BYTES),
            content: None,
            gate: None,
            calls: AtomicUsize::new(0),
            cancelled: Mutex::new(Vec::new()),
        }
    }

    /// Emits `progress`, then fails with `reason`.
    pub fn failing(progress: &[u8], reason: &str) -> Self {
        Self { outcome: Err(reason.to_string()), ..Self::succeeding(progress) }
    }

    /// Emits `progress`, then waits on the returned gate before finishing.
    pub fn held(progress: &[u8]) -> (Self, Arc<Gate>) {
        let gate = Arc::new(Gate::default());
        let downloader = Self { gate: Some(Arc::clone(&gate)), ..Self::succeeding(progress) };
        (downloader, gate)
    }

    /// Writes exactly `content` as the model file.
    pub fn writing(content: &'static [u8]) -> Self {
        Self {
            outcome: Ok(content.len() as u64),
            content: Some(content),
            ..Self::succeeding(&[100])
        }
    }

    /// Reports success without writing anything.
    pub fn truncating() -> Self {
        Self { outcome: Ok(4), ..Self::succeeding(&[100]) }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn fetch(
        &self,
        _locator: &str,
        dest: &Path,
        progress: mpsc::UnboundedSender<u8>,
    ) -> Result<u64, String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        for p in &self.progress {
            let _ = progress.send(*p);
            tokio::task::yield_now().await;
        }
        if let Some(gate) = &self.gate {
            gate.entered.notify_one();
            gate.release.notified().await;
        }
        let bytes = self.outcome.clone()?;
        if let Some(content) = self.content {
            std::fs::write(dest, content).map_err(|e| e.to_string())?;
        } else if bytes == FAKE_MODEL_BYTES {
            let file = std::fs::File::create(dest).map_err(|e| e.to_string())?;
            file.set_len(bytes).map_err(|e| e.to_string())?;
        }
        Ok(bytes)
    }

    fn cancel(&self, locator: &str) {
        self.cancelled.lock().unwrap().push(locator.to_string());
    }
}

pub struct Metered;

impl NetworkMonitor for Metered {
    fn is_unmetered(&self) -> bool {
        false
    }
}

// ── Device collaborators ────────────────────────────────────────────

#[derive(Default)]
pub struct FakeApps {
    pub apps: Vec<InstalledApp>,
    pub launched: Mutex<Vec<String>>,
}

impl FakeApps {
    pub fn with(labels: &[(&str, &str)]) -> Self {
        Self {
            apps: labels.iter().map(|(l, p)| InstalledApp::new(*l, *p)).collect(),
            launched: Mutex::new(Vec::new()),
        }
    }

    pub fn launched(&self) -> Vec<String> {
        self.launched.lock().unwrap().clone()
    }
}

impl AppRegistry for FakeApps {
    fn installed_apps(&self) -> Vec<InstalledApp> {
        self.apps.clone()
    }

    fn launch(&self, package: &str) -> bool {
        self.launched.lock().unwrap().push(package.to_string());
        true
    }
}

pub struct FakeSearch {
    reply: Result<String, String>,
    delay: Option<Duration>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeSearch {
    pub fn returning(results: &str) -> Self {
        Self { reply: Ok(results.to_string()), delay: None, queries: Mutex::new(Vec::new()) }
    }

    pub fn failing(reason: &str) -> Self {
        Self { reply: Err(reason.to_string()), ..Self::returning("") }
    }

    pub fn hanging(delay: Duration) -> Self {
        Self { delay: Some(delay), ..Self::returning("late") }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait]
impl WebSearchProvider for FakeSearch {
    async fn search(&self, query: &str) -> Result<String, String> {
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.reply.clone()
    }
}

pub struct FakeFetcher(pub Result<String, String>);

#[async_trait]
impl WebFetcher for FakeFetcher {
    async fn fetch_text(&self, _url: &str) -> Result<String, String> {
        self.0.clone()
    }
}

pub struct FakeScreen(pub &'static str);

impl ScreenContextProvider for FakeScreen {
    fn screen_text(&self) -> Option<String> {
        Some(self.0.to_string())
    }
}

pub struct StaticSettings {
    pub persona: PersonaConfig,
    pub model: String,
    pub memory: MemoryFacts,
}

impl StaticSettings {
    pub fn new(persona: PersonaConfig) -> Self {
        Self { persona, model: "SmolVLM 500M".to_string(), memory: MemoryFacts::default() }
    }
}

impl PersistedSettings for StaticSettings {
    fn persona(&self) -> PersonaConfig {
        self.persona.clone()
    }

    fn selected_model(&self) -> String {
        self.model.clone()
    }
}

impl MemoryStore for StaticSettings {
    fn memory_facts(&self) -> MemoryFacts {
        self.memory.clone()
    }
}

// ── Wiring ──────────────────────────────────────────────────────────

pub struct Harness {
    pub dir: tempfile::TempDir,
    pub storage: ModelStorage,
    pub factory: Arc<ScriptedFactory>,
    pub downloader: Arc<FakeDownloader>,
    pub controller: Arc<ModelLifecycleController>,
}

impl Harness {
    pub fn script(&self) -> &Script {
        &self.factory.script
    }
}

/// Controller bound to `model`, with `downloader` as the byte source.
pub fn harness_with(model: &str, downloader: FakeDownloader, present: bool) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let storage = ModelStorage::new(dir.path().join("models"));
    let descriptor = model_registry::find_by_name(model);
    if present {
        place_model(&storage, descriptor);
    }
    let factory = Arc::new(ScriptedFactory::default());
    let downloader = Arc::new(downloader);
    let controller = Arc::new(ModelLifecycleController::new(
        descriptor,
        storage.clone(),
        Arc::clone(&downloader) as Arc<dyn Downloader>,
        Arc::clone(&factory) as Arc<dyn BackendFactory>,
    ));
    Harness { dir, storage, factory, downloader, controller }
}

/// Controller whose model bytes are already on disk.
pub fn harness(model: &str) -> Harness {
    harness_with(model, FakeDownloader::succeeding(&[100]), true)
}

pub fn session(
    h: &Harness,
    settings: StaticSettings,
    apps: Arc<FakeApps>,
    search: Arc<FakeSearch>,
) -> AssistantSession {
    let settings = Arc::new(settings);
    let config = SessionConfig {
        models_dir: h.storage.root().to_path_buf(),
        network_timeout: Duration::from_secs(10),
        ..SessionConfig::default()
    };
    AssistantSession::new(
        config,
        Arc::clone(&h.controller),
        settings.clone(),
        settings,
        apps,
        search,
    )
}
