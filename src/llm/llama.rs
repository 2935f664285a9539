//! llama.cpp engine for GGUF models.
//!
//! The model is held as `Arc<LlamaModel>`. Each generation creates a fresh
//! context inside `spawn_blocking` (LlamaContext is !Send), so a `close()`
//! during generation only drops our handle; the weights are freed once the
//! in-flight call returns.

use super::backend::{Generation, InferenceBackend};
use super::model_registry::ModelDescriptor;
use crate::error::BackendError;
use async_trait::async_trait;
use llama_cpp_2::context::params::LlamaContextParams;
use llama_cpp_2::llama_backend::LlamaBackend;
use llama_cpp_2::llama_batch::LlamaBatch;
use llama_cpp_2::model::params::LlamaModelParams;
use llama_cpp_2::model::{AddBos, LlamaModel};
use llama_cpp_2::sampling::LlamaSampler;
use std::num::NonZeroU32;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Instant;

const MAX_TOKENS: u32 = 512;
const CONTEXT_TOKENS: u32 = 2048;
const BATCH_TOKENS: usize = 512;

/// llama.cpp may only be initialised once per process.
static BACKEND: OnceLock<LlamaBackend> = OnceLock::new();
static BACKEND_INIT: Mutex<()> = Mutex::new(());

fn llama_backend() -> Result<&'static LlamaBackend, BackendError> {
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }
    let _guard = BACKEND_INIT
        .lock()
        .map_err(|_| BackendError::LoadFailed("llama.cpp init lock poisoned".to_string()))?;
    if let Some(backend) = BACKEND.get() {
        return Ok(backend);
    }
    let backend = LlamaBackend::init()
        .map_err(|e| BackendError::LoadFailed(format!("llama.cpp init failed: {:?}", e)))?;
    Ok(BACKEND.get_or_init(|| backend))
}

pub struct LlamaCppBackend {
    model: Mutex<Option<Arc<LlamaModel>>>,
    name: &'static str,
}

impl LlamaCppBackend {
    pub async fn load(model_path: &Path, descriptor: &ModelDescriptor) -> Result<Self, BackendError> {
        let path = model_path.to_path_buf();
        let started = Instant::now();

        let model = tokio::task::spawn_blocking(move || {
            let backend = llama_backend()?;
            let params = LlamaModelParams::default();
            LlamaModel::load_from_file(backend, &path, &params)
                .map_err(|e| BackendError::LoadFailed(format!("{:?}", e)))
        })
        .await
        .map_err(|e| BackendError::LoadFailed(format!("Task join error: {}", e)))??;

        log::info!(
            "[LOCAL_LLM] Model loaded: {} in {}ms",
            descriptor.display_name,
            started.elapsed().as_millis()
        );
        Ok(Self {
            model: Mutex::new(Some(Arc::new(model))),
            name: descriptor.display_name,
        })
    }

    fn handle(&self) -> Result<Arc<LlamaModel>, BackendError> {
        self.model
            .lock()
            .map_err(|_| BackendError::Closed)?
            .clone()
            .ok_or(BackendError::Closed)
    }
}

#[async_trait]
impl InferenceBackend for LlamaCppBackend {
    fn engine(&self) -> &'static str {
        "llama.cpp"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, BackendError> {
        let model = self.handle()?;
        let prompt = prompt.to_string();
        let started = Instant::now();

        let text = tokio::task::spawn_blocking(move || {
            let backend = llama_backend()?;
            generate_sync(backend, &model, &prompt, MAX_TOKENS).map_err(BackendError::Generation)
        })
        .await
        .map_err(|e| BackendError::Generation(format!("Generation task failed: {}", e)))??;

        Ok(Generation { text, elapsed: started.elapsed() })
    }

    fn is_ready(&self) -> bool {
        self.model.lock().map(|m| m.is_some()).unwrap_or(false)
    }

    fn close(&self) {
        if let Ok(mut guard) = self.model.lock() {
            if guard.take().is_some() {
                log::info!("[LOCAL_LLM] Model unloaded: {}", self.name);
            }
        }
    }
}

/// Synchronous generation. Runs inside spawn_blocking.
fn generate_sync(
    backend: &LlamaBackend,
    model: &LlamaModel,
    prompt: &str,
    max_tokens: u32,
) -> Result<String, String> {
    let start = Instant::now();

    let ctx_params = LlamaContextParams::default()
        .with_n_ctx(NonZeroU32::new(CONTEXT_TOKENS))
        .with_n_batch(BATCH_TOKENS as u32);

    let mut ctx = model
        .new_context(backend, ctx_params)
        .map_err(|e| format!("Context creation failed: {:?}", e))?;

    let mut tokens = model
        .str_to_token(prompt, AddBos::Always)
        .map_err(|e| format!("Tokenization failed: {:?}", e))?;

    // Keep the tail of an oversized prompt; the user text sits at the end.
    let budget = (CONTEXT_TOKENS - max_tokens) as usize;
    if tokens.len() > budget {
        log::warn!("[LOCAL_LLM] Prompt truncated from {} to {} tokens", tokens.len(), budget);
        tokens.drain(..tokens.len() - budget);
    }
    let prompt_len = tokens.len();
    log::info!("[LOCAL_LLM] Prompt: {} tokens", prompt_len);

    let mut batch = LlamaBatch::new(BATCH_TOKENS, 1);
    for (chunk_start, chunk) in tokens.chunks(BATCH_TOKENS).enumerate() {
        batch.clear();
        for (i, &token) in chunk.iter().enumerate() {
            let pos = chunk_start * BATCH_TOKENS + i;
            batch
                .add(token, pos as i32, &[0], pos == prompt_len - 1)
                .map_err(|e| format!("Batch add failed: {:?}", e))?;
        }
        ctx.decode(&mut batch)
            .map_err(|e| format!("Prompt decode failed: {:?}", e))?;
    }

    let prefill_ms = start.elapsed().as_millis();

    let mut sampler = LlamaSampler::chain_simple([
        LlamaSampler::temp(0.7),
        LlamaSampler::top_k(40),
        LlamaSampler::top_p(0.9, 1),
        LlamaSampler::greedy(),
    ]);

    let mut output = String::new();
    let mut n_decoded = 0u32;
    let eos = model.token_eos();
    let mut decoder = encoding_rs::UTF_8.new_decoder();

    for _ in 0..max_tokens {
        let token = sampler.sample(&ctx, -1);
        sampler.accept(token);

        if token == eos {
            break;
        }

        let piece = model
            .token_to_piece(token, &mut decoder, false, None)
            .unwrap_or_default();
        output.push_str(&piece);

        batch.clear();
        batch
            .add(token, (prompt_len + n_decoded as usize) as i32, &[0], true)
            .map_err(|e| format!("Batch add failed: {:?}", e))?;
        ctx.decode(&mut batch)
            .map_err(|e| format!("Decode failed: {:?}", e))?;
        n_decoded += 1;
    }

    let total_ms = start.elapsed().as_millis();
    let gen_ms = total_ms - prefill_ms;
    let tps = if gen_ms > 0 {
        (n_decoded as f64 / gen_ms as f64) * 1000.0
    } else {
        0.0
    };
    log::info!(
        "[LOCAL_LLM] Generated {} tokens in {}ms ({:.1} tok/s, prefill={}ms)",
        n_decoded,
        total_ms,
        tps,
        prefill_ms
    );

    Ok(output)
}
