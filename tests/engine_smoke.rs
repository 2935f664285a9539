//! Real-engine smoke test: load a downloaded model and generate once.
//!
//! Only runs with an engine feature enabled AND the model file present in
//! the default models directory (or `MATE_MODELS_DIR`).
//! Run with: cargo test --features llama --test engine_smoke -- --nocapture

#![cfg(any(feature = "llama", feature = "candle"))]

use mate_lib::llm::backend::{BackendFactory, EngineFactory};
use mate_lib::llm::model_manager::ModelStorage;
use mate_lib::llm::model_registry::{self, BackendKind};
use mate_lib::llm::prompts_local;
use mate_lib::settings::{MemoryFacts, PersonaConfig, SessionConfig};

async fn smoke(kind: BackendKind) {
    mate_lib::init_logging();
    let storage = ModelStorage::new(SessionConfig::from_env().models_dir);
    let Some(model) = storage
        .downloaded()
        .into_iter()
        .find(|m| m.backend_kind == kind)
    else {
        eprintln!("SKIP: no {:?} model downloaded in {}", kind, storage.root().display());
        return;
    };

    let load_start = std::time::Instant::now();
    let backend = EngineFactory
        .load(model, &storage.model_path(model))
        .await
        .expect("Model load failed");
    eprintln!("[BENCH] {} load: {}ms", model.display_name, load_start.elapsed().as_millis());
    assert!(backend.is_ready());

    let persona = PersonaConfig { verbosity: 2, ..Default::default() };
    let prompt = prompts_local::assemble(&persona, &MemoryFacts::default(), None, "Say hello.");
    let generation = backend.generate(&prompt).await.expect("Generation failed");
    eprintln!("[BENCH] {:?}: {:?}", generation.elapsed, generation.text);
    assert!(!generation.text.trim().is_empty());

    backend.close();
    backend.close();
    assert!(!backend.is_ready());
}

#[cfg(feature = "llama")]
#[tokio::test]
async fn llama_cpp_generates() {
    smoke(BackendKind::LlamaCpp).await;
}

#[cfg(feature = "candle")]
#[tokio::test]
async fn candle_generates() {
    smoke(BackendKind::Candle).await;
}
