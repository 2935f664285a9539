//! Candle engine for quantized llama-architecture GGUF models.
//!
//! Pure Rust, CPU only. The tokenizer is read from a `tokenizer.json` next to
//! the model file, or fetched from the descriptor's Hugging Face repo.

use super::backend::{Generation, InferenceBackend};
use super::model_registry::ModelDescriptor;
use crate::error::BackendError;
use async_trait::async_trait;
use candle_core::quantized::gguf_file;
use candle_core::{Device, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::quantized_llama as qlm;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Instant;
use tokenizers::Tokenizer;

const MAX_TOKENS: usize = 512;
const TEMPERATURE: f64 = 0.7;
const SEED: u64 = 42;

#[derive(Debug, Clone, Copy)]
enum ChatTemplate {
    /// `<|user|>` / `<|assistant|>` turns (TinyLlama).
    Zephyr,
    /// `<|im_start|>` turns (SmolLM).
    ChatMl,
}

impl ChatTemplate {
    fn for_model(descriptor: &ModelDescriptor) -> Self {
        if descriptor.display_name.starts_with("TinyLlama") {
            ChatTemplate::Zephyr
        } else {
            ChatTemplate::ChatMl
        }
    }

    fn wrap(self, prompt: &str) -> String {
        match self {
            ChatTemplate::Zephyr => format!("<|user|>\n{}</s>\n<|assistant|>\n", prompt),
            ChatTemplate::ChatMl => {
                format!("<|im_start|>user\n{}<|im_end|>\n<|im_start|>assistant\n", prompt)
            }
        }
    }
}

struct LoadedModel {
    weights: qlm::ModelWeights,
    tokenizer: Tokenizer,
    device: Device,
    eos_token_id: u32,
}

pub struct CandleBackend {
    model: Mutex<Option<Arc<Mutex<LoadedModel>>>>,
    template: ChatTemplate,
    name: &'static str,
}

fn candle_err(e: candle_core::Error) -> String {
    format!("Candle inference error: {e}")
}

fn tokenizer_path(model_path: &Path, descriptor: &ModelDescriptor) -> Result<PathBuf, BackendError> {
    let sibling = model_path.with_file_name("tokenizer.json");
    if sibling.exists() {
        return Ok(sibling);
    }
    let repo = descriptor.tokenizer_repo.ok_or_else(|| {
        BackendError::LoadFailed(format!("{} has no tokenizer source", descriptor.display_name))
    })?;
    let api = hf_hub::api::sync::Api::new()
        .map_err(|e| BackendError::LoadFailed(format!("HuggingFace Hub API error: {e}")))?;
    api.model(repo.to_string())
        .get("tokenizer.json")
        .map_err(|e| BackendError::LoadFailed(format!("Failed to fetch tokenizer from '{repo}': {e}")))
}

fn load_sync(model_path: &Path, descriptor: &ModelDescriptor) -> Result<LoadedModel, BackendError> {
    let device = Device::Cpu;
    let tokenizer = Tokenizer::from_file(tokenizer_path(model_path, descriptor)?)
        .map_err(|e| BackendError::LoadFailed(format!("Failed to load tokenizer: {e}")))?;

    let mut file = std::fs::File::open(model_path)
        .map_err(|e| BackendError::LoadFailed(format!("Failed to open GGUF file: {e}")))?;
    let gguf = gguf_file::Content::read(&mut file)
        .map_err(|e| BackendError::LoadFailed(format!("Failed to parse GGUF file: {e}")))?;
    let weights = qlm::ModelWeights::from_gguf(gguf, &mut file, &device)
        .map_err(|e| BackendError::LoadFailed(format!("Failed to load model weights: {e}")))?;

    let eos_token_id = tokenizer
        .token_to_id("</s>")
        .or_else(|| tokenizer.token_to_id("<|endoftext|>"))
        .or_else(|| tokenizer.token_to_id("<|im_end|>"))
        .unwrap_or(2);

    Ok(LoadedModel { weights, tokenizer, device, eos_token_id })
}

impl LoadedModel {
    fn generate(&mut self, prompt: &str) -> Result<String, String> {
        let encoding = self
            .tokenizer
            .encode(prompt, true)
            .map_err(|e| format!("Tokenization failed: {e}"))?;
        let prompt_tokens = encoding.get_ids();
        log::info!("[LOCAL_LLM] Prompt: {} tokens", prompt_tokens.len());

        let mut input = Tensor::new(prompt_tokens, &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(candle_err)?;
        let mut logits_processor = LogitsProcessor::new(SEED, Some(TEMPERATURE), None);
        let mut generated: Vec<u32> = Vec::new();
        let mut index_pos = 0;

        for _ in 0..MAX_TOKENS {
            let seq_len = input.dim(1).map_err(candle_err)?;
            let logits = self.weights.forward(&input, index_pos).map_err(candle_err)?;
            index_pos += seq_len;

            let logits = logits.squeeze(0).map_err(candle_err)?;
            let next = logits_processor.sample(&logits).map_err(candle_err)?;
            if next == self.eos_token_id {
                break;
            }
            generated.push(next);

            input = Tensor::new(&[next][..], &self.device)
                .and_then(|t| t.unsqueeze(0))
                .map_err(candle_err)?;
        }

        log::info!("[LOCAL_LLM] Generated {} tokens", generated.len());
        let output = self
            .tokenizer
            .decode(&generated, true)
            .map_err(|e| format!("Detokenization failed: {e}"))?;
        Ok(output
            .trim()
            .trim_end_matches("</s>")
            .trim_end_matches("<|im_end|>")
            .trim()
            .to_string())
    }
}

impl CandleBackend {
    pub async fn load(model_path: &Path, descriptor: &'static ModelDescriptor) -> Result<Self, BackendError> {
        let path = model_path.to_path_buf();
        let started = Instant::now();
        let loaded = tokio::task::spawn_blocking(move || load_sync(&path, descriptor))
            .await
            .map_err(|e| BackendError::LoadFailed(format!("Model loading task failed: {e}")))??;

        log::info!(
            "[LOCAL_LLM] Model loaded: {} in {}ms (eos={})",
            descriptor.display_name,
            started.elapsed().as_millis(),
            loaded.eos_token_id
        );
        Ok(Self {
            model: Mutex::new(Some(Arc::new(Mutex::new(loaded)))),
            template: ChatTemplate::for_model(descriptor),
            name: descriptor.display_name,
        })
    }
}

#[async_trait]
impl InferenceBackend for CandleBackend {
    fn engine(&self) -> &'static str {
        "candle"
    }

    async fn generate(&self, prompt: &str) -> Result<Generation, BackendError> {
        let model = self
            .model
            .lock()
            .map_err(|_| BackendError::Closed)?
            .clone()
            .ok_or(BackendError::Closed)?;
        let prompt = self.template.wrap(prompt);
        let started = Instant::now();

        let text = tokio::task::spawn_blocking(move || {
            let mut guard = model
                .lock()
                .map_err(|_| BackendError::Generation("model lock poisoned".to_string()))?;
            guard.generate(&prompt).map_err(BackendError::Generation)
        })
        .await
        .map_err(|e| BackendError::Generation(format!("Inference task panicked: {e}")))??;

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
