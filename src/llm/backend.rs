//! Inference backend abstraction.
//!
//! Every engine family implements [`InferenceBackend`]. The lifecycle
//! controller only ever talks to this trait; it never looks at which engine
//! sits behind it.

use super::model_registry::{BackendKind, ModelDescriptor};
use crate::error::BackendError;
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;

/// Result of one generation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub elapsed: Duration,
}

/// Raw image bytes handed to a vision-capable model.
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

/// A loaded, memory-resident model.
///
/// `generate` must not block the caller: implementations move the actual
/// decoding onto a blocking worker and await it.
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Short engine identifier for logs ("llama.cpp", "candle").
    fn engine(&self) -> &'static str;

    async fn generate(&self, prompt: &str) -> Result<Generation, BackendError>;

    /// Whether this engine instance can take image input. Engines without
    /// a vision projector keep the default.
    fn supports_images(&self) -> bool {
        false
    }

    /// Image + prompt generation. Only called when `supports_images` is true.
    async fn generate_with_image(
        &self,
        _prompt: &str,
        _image: &ImageInput,
    ) -> Result<Generation, BackendError> {
        Err(BackendError::VisionUnsupported(self.engine().to_string()))
    }

    fn is_ready(&self) -> bool;

    /// Release all model memory. Safe to call more than once.
    fn close(&self);
}

/// Builds a backend for a descriptor whose bytes are already on disk.
#[async_trait]
pub trait BackendFactory: Send + Sync {
    async fn load(
        &self,
        descriptor: &'static ModelDescriptor,
        model_path: &Path,
    ) -> Result<Box<dyn InferenceBackend>, BackendError>;
}

/// Default factory: picks the engine by `backend_kind`.
///
/// Engines are cargo features; a descriptor whose engine was not compiled
/// in fails to load with `EngineUnavailable`.
#[derive(Debug, Default, Clone, Copy)]
pub struct EngineFactory;

#[async_trait]
impl BackendFactory for EngineFactory {
    #[allow(unused_variables)]
    async fn load(
        &self,
        descriptor: &'static ModelDescriptor,
        model_path: &Path,
    ) -> Result<Box<dyn InferenceBackend>, BackendError> {
        match descriptor.backend_kind {
            BackendKind::LlamaCpp => {
                #[cfg(feature = "llama")]
                {
                    let backend = super::llama::LlamaCppBackend::load(model_path, descriptor).await?;
                    return Ok(Box::new(backend));
                }
                #[cfg(not(feature = "llama"))]
                Err(BackendError::EngineUnavailable(
                    "llama.cpp (build with --features llama)".to_string(),
                ))
            }
            BackendKind::Candle => {
                #[cfg(feature = "candle")]
                {
                    let backend = super::candle::CandleBackend::load(model_path, descriptor).await?;
                    return Ok(Box::new(backend));
                }
                #[cfg(not(feature = "candle"))]
                Err(BackendError::EngineUnavailable(
                    "Candle (build with --features candle)".to_string(),
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Echo;

    #[async_trait]
    impl InferenceBackend for Echo {
        fn engine(&self) -> &'static str {
            "echo"
        }
        async fn generate(&self, prompt: &str) -> Result<Generation, BackendError> {
            Ok(Generation { text: prompt.to_string(), elapsed: Duration::ZERO })
        }
        fn is_ready(&self) -> bool {
            true
        }
        fn close(&self) {}
    }

    #[tokio::test]
    async fn image_generation_defaults_to_unsupported() {
        let image = ImageInput { bytes: vec![0x89, 0x50], mime_type: "image/png".into() };
        let err = Echo.generate_with_image("what is this?", &image).await.unwrap_err();
        assert!(matches!(err, BackendError::VisionUnsupported(ref e) if e == "echo"));
    }

    #[cfg(not(feature = "llama"))]
    #[tokio::test]
    async fn missing_engine_reports_unavailable() {
        let m = crate::llm::model_registry::find_by_name("Phi-3.5 Mini");
        let err = EngineFactory
            .load(m, Path::new("/nonexistent.gguf"))
            .await
            .err()
            .expect("llama engine is not compiled in");
        assert!(matches!(err, BackendError::EngineUnavailable(_)));
    }
}
