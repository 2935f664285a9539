//! Model lifecycle: download, load, generate, unload, switch.
//!
//! The controller owns at most one resident backend. Every resident carries
//! the epoch it was loaded under; switching or unloading bumps the epoch, so
//! a response that finishes after the switch is recognised as stale and
//! dropped instead of being handed back to the caller.
//!
//! State transitions are published on a broadcast channel as [`StatusEvent`]s.

use super::backend::{BackendFactory, Generation, ImageInput, InferenceBackend};
use super::model_manager::{
    verify_sha256, AssumeUnmetered, Downloader, ModelStorage, NetworkMonitor,
};
use super::model_registry::{self, ModelDescriptor};
use crate::error::{DownloadError, SessionError};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex};

const EVENT_CAPACITY: usize = 64;

/// Where the bound model is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendState {
    Uninitialized,
    Downloading(u8),
    Loading,
    Ready,
    Unloaded,
    Error(String),
}

impl BackendState {
    pub fn percent(&self) -> u8 {
        match self {
            BackendState::Downloading(p) => *p,
            BackendState::Loading | BackendState::Ready => 100,
            _ => 0,
        }
    }

    pub fn is_busy(&self) -> bool {
        matches!(self, BackendState::Downloading(_) | BackendState::Loading)
    }

    /// Short status line for the host UI.
    pub fn status_text(&self) -> String {
        match self {
            BackendState::Uninitialized => "⏳ Not loaded".to_string(),
            BackendState::Downloading(p) => format!("📥 {}%", p),
            BackendState::Loading => "⚙️ Loading...".to_string(),
            BackendState::Ready => "✅ Ready".to_string(),
            BackendState::Unloaded => "💤 Unloaded".to_string(),
            BackendState::Error(reason) => format!("❌ {}", reason),
        }
    }
}

/// Published on every state change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEvent {
    pub model: &'static str,
    pub percent: u8,
    pub phase: BackendState,
}

/// A loaded backend plus the epoch it belongs to.
#[derive(Clone)]
pub struct Resident {
    backend: Arc<dyn InferenceBackend>,
    flight: Arc<Mutex<()>>,
    epoch: u64,
}

impl Resident {
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    pub fn engine(&self) -> &'static str {
        self.backend.engine()
    }
}

struct Inner {
    descriptor: &'static ModelDescriptor,
    state: BackendState,
    resident: Option<Resident>,
}

enum Request<'a> {
    Text(&'a str),
    Image(&'a str, &'a ImageInput),
}

pub struct ModelLifecycleController {
    inner: Mutex<Inner>,
    epoch: AtomicU64,
    /// Serialises model loads so an outgoing model is closed before the
    /// next one is brought into memory.
    residency: Mutex<()>,
    events: broadcast::Sender<StatusEvent>,
    storage: ModelStorage,
    downloader: Arc<dyn Downloader>,
    factory: Arc<dyn BackendFactory>,
    network: Arc<dyn NetworkMonitor>,
}

impl ModelLifecycleController {
    pub fn new(
        descriptor: &'static ModelDescriptor,
        storage: ModelStorage,
        downloader: Arc<dyn Downloader>,
        factory: Arc<dyn BackendFactory>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            inner: Mutex::new(Inner {
                descriptor,
                state: BackendState::Uninitialized,
                resident: None,
            }),
            epoch: AtomicU64::new(0),
            residency: Mutex::new(()),
            events,
            storage,
            downloader,
            factory,
            network: Arc::new(AssumeUnmetered),
        }
    }

    pub fn with_network_monitor(mut self, network: Arc<dyn NetworkMonitor>) -> Self {
        self.network = network;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.events.subscribe()
    }

    pub fn storage(&self) -> &ModelStorage {
        &self.storage
    }

    /// Current state and bound model.
    pub async fn status(&self) -> (BackendState, &'static ModelDescriptor) {
        let inner = self.inner.lock().await;
        (inner.state.clone(), inner.descriptor)
    }

    pub async fn descriptor(&self) -> &'static ModelDescriptor {
        self.inner.lock().await.descriptor
    }

    pub async fn is_ready(&self) -> bool {
        let inner = self.inner.lock().await;
        inner.state == BackendState::Ready
            && inner.resident.as_ref().is_some_and(|r| r.backend.is_ready())
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::SeqCst)
    }

    fn set_state(&self, inner: &mut Inner, state: BackendState) {
        if inner.state != state {
            log::info!(
                "[LIFECYCLE] {}: {:?} -> {:?}",
                inner.descriptor.display_name,
                inner.state,
                state
            );
        }
        inner.state = state.clone();
        let _ = self.events.send(StatusEvent {
            model: inner.descriptor.display_name,
            percent: state.percent(),
            phase: state,
        });
    }

    /// Guarantee a ready backend, downloading and loading as needed.
    ///
    /// `confirmed` marks an explicit user request and lifts the metered
    /// network block. Fails fast with `Busy` while another acquisition runs.
    pub async fn acquire(&self, confirmed: bool) -> Result<Resident, SessionError> {
        let (descriptor, epoch, needs_download) = {
            let mut inner = self.inner.lock().await;
            match &inner.state {
                BackendState::Ready => {
                    if let Some(resident) = &inner.resident {
                        return Ok(resident.clone());
                    }
                }
                BackendState::Downloading(p) => {
                    return Err(SessionError::Busy(format!(
                        "Downloading model... {}% complete. Please wait.",
                        p
                    )));
                }
                BackendState::Loading => {
                    return Err(SessionError::Busy("Loading model... Please wait.".to_string()));
                }
                _ => {}
            }

            let descriptor = inner.descriptor;
            let present = self.storage.is_present(descriptor);
            if !present && !confirmed && !self.network.is_unmetered() {
                let reason = "model is not downloaded and the network is metered".to_string();
                log::warn!("[LIFECYCLE] {}: {}", descriptor.display_name, reason);
                self.set_state(&mut inner, BackendState::Error(reason.clone()));
                return Err(DownloadError::NetworkPolicy(reason).into());
            }

            let next = if present { BackendState::Loading } else { BackendState::Downloading(0) };
            self.set_state(&mut inner, next);
            (descriptor, self.epoch(), !present)
        };

        if needs_download {
            self.download_bytes(descriptor, epoch).await?;
        }
        self.load(descriptor, epoch).await
    }

    async fn download_bytes(
        &self,
        descriptor: &'static ModelDescriptor,
        epoch: u64,
    ) -> Result<(), SessionError> {
        if let Err(e) = self.storage.ensure_dir() {
            return self.fail_download(epoch, DownloadError::from_reason(&e.to_string())).await;
        }

        let dest = self.storage.model_path(descriptor);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let fetch = self.downloader.fetch(descriptor.source_locator, &dest, tx);
        tokio::pin!(fetch);

        let mut last = 0u8;
        let result = loop {
            tokio::select! {
                res = &mut fetch => break res,
                Some(percent) = rx.recv() => self.report_progress(epoch, &mut last, percent).await,
            }
        };
        while let Ok(percent) = rx.try_recv() {
            self.report_progress(epoch, &mut last, percent).await;
        }

        match result {
            Err(reason) => {
                log::error!("[MODEL] Download of {} failed: {}", descriptor.display_name, reason);
                self.fail_download(epoch, DownloadError::from_reason(&reason)).await
            }
            Ok(_) if !self.storage.is_present(descriptor) => {
                let reason = format!(
                    "Downloaded file is smaller than the expected {} bytes",
                    descriptor.min_expected_size_bytes
                );
                self.fail_download(epoch, DownloadError::Transfer(reason)).await
            }
            Ok(bytes) => {
                if let Err(reason) = self.verify_digest(descriptor).await {
                    log::error!("[MODEL] {} failed verification: {}", descriptor.display_name, reason);
                    if let Err(e) = self.storage.delete(descriptor) {
                        log::warn!("[MODEL] Could not remove {}: {}", descriptor.file_name, e);
                    }
                    return self.fail_download(epoch, DownloadError::Transfer(reason)).await;
                }
                log::info!("[MODEL] {} present ({} bytes)", descriptor.display_name, bytes);
                let mut inner = self.inner.lock().await;
                if self.epoch() != epoch {
                    return Err(SessionError::StaleResponse);
                }
                self.set_state(&mut inner, BackendState::Loading);
                Ok(())
            }
        }
    }

    /// Hash the downloaded file on the blocking pool when the descriptor
    /// carries a digest.
    async fn verify_digest(&self, descriptor: &'static ModelDescriptor) -> Result<(), String> {
        let Some(digest) = descriptor.sha256 else {
            return Ok(());
        };
        let path = self.storage.model_path(descriptor);
        tokio::task::spawn_blocking(move || verify_sha256(&path, digest))
            .await
            .map_err(|e| format!("Verification task failed: {}", e))?
    }

    async fn report_progress(&self, epoch: u64, last: &mut u8, percent: u8) {
        let percent = percent.min(100);
        if percent <= *last {
            return;
        }
        *last = percent;
        let mut inner = self.inner.lock().await;
        if self.epoch() == epoch && matches!(inner.state, BackendState::Downloading(_)) {
            self.set_state(&mut inner, BackendState::Downloading(percent));
        }
    }

    async fn fail_download(&self, epoch: u64, error: DownloadError) -> Result<(), SessionError> {
        let mut inner = self.inner.lock().await;
        if self.epoch() != epoch {
            return Err(SessionError::StaleResponse);
        }
        self.set_state(&mut inner, BackendState::Error(error.to_string()));
        Err(error.into())
    }

    async fn load(
        &self,
        descriptor: &'static ModelDescriptor,
        epoch: u64,
    ) -> Result<Resident, SessionError> {
        let _residency = self.residency.lock().await;
        if self.epoch() != epoch {
            return Err(SessionError::StaleResponse);
        }

        let path = self.storage.model_path(descriptor);
        log::info!("[LIFECYCLE] Loading {} from {}", descriptor.display_name, path.display());
        let loaded = self.factory.load(descriptor, &path).await;

        let mut inner = self.inner.lock().await;
        if self.epoch() != epoch {
            if let Ok(backend) = loaded {
                backend.close();
            }
            log::warn!("[LIFECYCLE] Discarding {}: model changed while loading", descriptor.display_name);
            return Err(SessionError::StaleResponse);
        }

        match loaded {
            Ok(backend) => {
                let resident = Resident {
                    backend: Arc::from(backend),
                    flight: Arc::new(Mutex::new(())),
                    epoch,
                };
                log::info!(
                    "[LIFECYCLE] {} resident on {}",
                    descriptor.display_name,
                    resident.engine()
                );
                inner.resident = Some(resident.clone());
                self.set_state(&mut inner, BackendState::Ready);
                Ok(resident)
            }
            Err(e) => {
                log::error!("[LIFECYCLE] Load of {} failed: {}", descriptor.display_name, e);
                self.set_state(&mut inner, BackendState::Error(e.to_string()));
                Err(e.into())
            }
        }
    }

    /// Generate a response, acquiring the model lazily.
    pub async fn generate(&self, prompt: &str) -> Result<Generation, SessionError> {
        let resident = self.acquire(false).await?;
        self.run(&resident, Request::Text(prompt)).await
    }

    /// Acquire the model and confirm images can be sent to it.
    ///
    /// Text-only descriptors are refused before anything is loaded; a vision
    /// descriptor is refused once loaded if its engine has no projector.
    pub async fn accepts_images(&self) -> Result<(), SessionError> {
        self.vision_resident().await.map(|_| ())
    }

    /// Image + prompt generation. Refused before any engine call unless
    /// [`accepts_images`](Self::accepts_images) holds.
    pub async fn generate_with_image(
        &self,
        prompt: &str,
        image: &ImageInput,
    ) -> Result<Generation, SessionError> {
        let resident = self.vision_resident().await?;
        self.run(&resident, Request::Image(prompt, image)).await
    }

    async fn vision_resident(&self) -> Result<Resident, SessionError> {
        let descriptor = self.descriptor().await;
        let refused = || SessionError::VisionUnsupported {
            model: descriptor.display_name.to_string(),
        };
        if !descriptor.capabilities.supports_vision_input {
            return Err(refused());
        }
        let resident = self.acquire(false).await?;
        if !resident.backend.supports_images() {
            log::warn!(
                "[LIFECYCLE] {} on {} has no image support",
                descriptor.display_name,
                resident.engine()
            );
            return Err(refused());
        }
        Ok(resident)
    }

    async fn run(&self, resident: &Resident, request: Request<'_>) -> Result<Generation, SessionError> {
        // One request in flight per backend instance.
        let _flight = resident.flight.lock().await;
        if self.epoch() != resident.epoch {
            return Err(SessionError::StaleResponse);
        }

        let result = match request {
            Request::Text(prompt) => {
                log::info!("[LOCAL_LLM] Prompt: {} chars", prompt.len());
                resident.backend.generate(prompt).await
            }
            Request::Image(prompt, image) => {
                log::info!(
                    "[LOCAL_LLM] Prompt: {} chars, image: {} bytes",
                    prompt.len(),
                    image.bytes.len()
                );
                resident.backend.generate_with_image(prompt, image).await
            }
        };

        if self.epoch() != resident.epoch {
            log::warn!(
                "[LIFECYCLE] Dropping stale response from epoch {} (now {})",
                resident.epoch,
                self.epoch()
            );
            return Err(SessionError::StaleResponse);
        }

        let generation = result?;
        if generation.text.trim().is_empty() {
            return Err(SessionError::ModelUnavailable(
                "model returned an empty response".to_string(),
            ));
        }
        log::info!(
            "[LOCAL_LLM] Response: {} chars in {:?}",
            generation.text.len(),
            generation.elapsed
        );
        Ok(generation)
    }

    /// Explicit user download. Bypasses the metered-network block.
    pub async fn download(&self) -> Result<(), SessionError> {
        self.acquire(true).await.map(|_| ())
    }

    pub async fn cancel_download(&self) {
        let inner = self.inner.lock().await;
        if matches!(inner.state, BackendState::Downloading(_)) {
            self.downloader.cancel(inner.descriptor.source_locator);
        }
    }

    /// Free model memory. The next generate call re-acquires lazily.
    pub async fn unload(&self) {
        let mut inner = self.inner.lock().await;
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.release(&mut inner);
        if matches!(
            inner.state,
            BackendState::Ready | BackendState::Downloading(_) | BackendState::Loading
        ) {
            self.set_state(&mut inner, BackendState::Unloaded);
        }
    }

    /// Bind a different model. The current backend is closed before the
    /// new descriptor is accepted; unknown names resolve to the default model.
    pub async fn switch_model(&self, name: &str) -> &'static ModelDescriptor {
        let next = model_registry::find_by_name(name);
        let mut inner = self.inner.lock().await;
        if inner.descriptor.display_name == next.display_name {
            return next;
        }

        log::info!(
            "[LIFECYCLE] Switching {} -> {}",
            inner.descriptor.display_name,
            next.display_name
        );
        self.epoch.fetch_add(1, Ordering::SeqCst);
        self.release(&mut inner);
        inner.descriptor = next;
        self.set_state(&mut inner, BackendState::Uninitialized);
        next
    }

    fn release(&self, inner: &mut Inner) {
        if let Some(resident) = inner.resident.take() {
            log::info!("[LIFECYCLE] Closing {} backend", resident.engine());
            resident.backend.close();
        }
        if matches!(inner.state, BackendState::Downloading(_)) {
            self.downloader.cancel(inner.descriptor.source_locator);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_per_state() {
        assert_eq!(BackendState::Downloading(42).status_text(), "📥 42%");
        assert_eq!(BackendState::Loading.status_text(), "⚙️ Loading...");
        assert_eq!(BackendState::Ready.status_text(), "✅ Ready");
        assert_eq!(BackendState::Unloaded.status_text(), "💤 Unloaded");
        assert!(BackendState::Error("disk".into()).status_text().contains("disk"));
    }

    #[test]
    fn percent_and_busy() {
        assert_eq!(BackendState::Uninitialized.percent(), 0);
        assert_eq!(BackendState::Downloading(7).percent(), 7);
        assert_eq!(BackendState::Loading.percent(), 100);
        assert!(BackendState::Loading.is_busy());
        assert!(BackendState::Downloading(0).is_busy());
        assert!(!BackendState::Unloaded.is_busy());
        assert!(!BackendState::Error("x".into()).is_busy());
    }
}
