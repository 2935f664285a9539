//! Known on-device models: static catalog of supported model files.
//!
//! Each entry names the engine that runs it, where its bytes come from, the
//! smallest file size we accept as a complete download, and whether it can
//! take image input. Lookups never fail: unknown names resolve to the first
//! entry.

/// Which local engine family runs a model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum BackendKind {
    /// Candle quantized-llama runtime (pure Rust).
    Candle,
    /// llama.cpp via `llama-cpp-2`.
    LlamaCpp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub supports_vision_input: bool,
}

/// Metadata for a supported model.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelDescriptor {
    pub display_name: &'static str,
    pub file_name: &'static str,
    pub source_locator: &'static str,
    pub min_expected_size_bytes: u64,
    pub backend_kind: BackendKind,
    pub capabilities: Capabilities,
    pub size_label: &'static str,
    pub description: &'static str,
    /// Hugging Face repo holding `tokenizer.json` (Candle models only).
    pub tokenizer_repo: Option<&'static str>,
    /// Lowercase hex SHA-256 of the complete file. Checked after download
    /// when set; otherwise only the minimum size is.
    pub sha256: Option<&'static str>,
}

impl ModelDescriptor {
    pub fn engine_label(&self) -> &'static str {
        match self.backend_kind {
            BackendKind::Candle => "Candle",
            BackendKind::LlamaCpp => "llama.cpp",
        }
    }

    /// Name with vision badge, engine and size, e.g. `"Moondream2 👁️ [llama.cpp] ~1.5GB"`.
    pub fn formatted_name(&self) -> String {
        let vision = if self.capabilities.supports_vision_input { " 👁️" } else { "" };
        format!(
            "{}{} [{}] {}",
            self.display_name,
            vision,
            self.engine_label(),
            self.size_label
        )
    }
}

const TEXT_ONLY: Capabilities = Capabilities { supports_vision_input: false };
const VISION: Capabilities = Capabilities { supports_vision_input: true };

/// All models, in the order they are offered to the user.
///
/// The first entry is the fallback for unknown names, so keep the smallest,
/// most broadly compatible model there.
static MODELS: &[ModelDescriptor] = &[
    // ===== Candle (quantized llama architecture) =====
    ModelDescriptor {
        display_name: "TinyLlama 1.1B",
        file_name: "tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        source_locator: "https://huggingface.co/TheBloke/TinyLlama-1.1B-Chat-v1.0-GGUF/resolve/main/tinyllama-1.1b-chat-v1.0.Q4_K_M.gguf",
        min_expected_size_bytes: 600_000_000,
        backend_kind: BackendKind::Candle,
        capabilities: TEXT_ONLY,
        size_label: "~0.67GB",
        description: "Small chat model. Fast and reliable on modest hardware.",
        tokenizer_repo: Some("TinyLlama/TinyLlama-1.1B-Chat-v1.0"),
        sha256: None,
    },
    ModelDescriptor {
        display_name: "SmolLM 1.7B",
        file_name: "smollm-1.7b-instruct.Q4_K_M.gguf",
        source_locator: "https://huggingface.co/TheBloke/SmolLM-1.7B-Instruct-GGUF/resolve/main/smollm-1.7b-instruct.Q4_K_M.gguf",
        min_expected_size_bytes: 900_000_000,
        backend_kind: BackendKind::Candle,
        capabilities: TEXT_ONLY,
        size_label: "~1.0GB",
        description: "Proven stable baseline. Text-only.",
        tokenizer_repo: Some("HuggingFaceTB/SmolLM-1.7B-Instruct"),
        sha256: None,
    },
    // ===== llama.cpp (GGUF) =====
    ModelDescriptor {
        display_name: "Moondream2",
        file_name: "moondream2-text-model-f16.gguf",
        source_locator: "https://huggingface.co/moondream/moondream2-gguf/resolve/main/moondream2-text-model-f16.gguf",
        min_expected_size_bytes: 500_000_000,
        backend_kind: BackendKind::LlamaCpp,
        capabilities: VISION,
        size_label: "~1.5GB",
        description: "Vision model. Can describe images, read text in photos.",
        tokenizer_repo: None,
        sha256: None,
    },
    ModelDescriptor {
        display_name: "SmolVLM 500M",
        file_name: "smolvlm-500m-instruct-q8_0.gguf",
        source_locator: "https://huggingface.co/ggml-org/SmolVLM-500M-Instruct-GGUF/resolve/main/SmolVLM-500M-Instruct-Q8_0.gguf",
        min_expected_size_bytes: 300_000_000,
        backend_kind: BackendKind::LlamaCpp,
        capabilities: VISION,
        size_label: "~0.5GB",
        description: "Tiny vision model. Ultra-fast, fits any device.",
        tokenizer_repo: None,
        sha256: None,
    },
    ModelDescriptor {
        display_name: "Qwen2-VL 2B",
        file_name: "qwen2-vl-2b-instruct-q4_k_m.gguf",
        source_locator: "https://huggingface.co/Qwen/Qwen2-VL-2B-Instruct-GGUF/resolve/main/qwen2-vl-2b-instruct-q4_k_m.gguf",
        min_expected_size_bytes: 1_000_000_000,
        backend_kind: BackendKind::LlamaCpp,
        capabilities: VISION,
        size_label: "~1.6GB",
        description: "Strong OCR and image understanding.",
        tokenizer_repo: None,
        sha256: None,
    },
    ModelDescriptor {
        display_name: "Phi-3.5 Mini",
        file_name: "phi-3.5-mini-instruct-q4_k_m.gguf",
        source_locator: "https://huggingface.co/bartowski/Phi-3.5-mini-instruct-GGUF/resolve/main/Phi-3.5-mini-instruct-Q4_K_M.gguf",
        min_expected_size_bytes: 1_500_000_000,
        backend_kind: BackendKind::LlamaCpp,
        capabilities: TEXT_ONLY,
        size_label: "~1.8GB",
        description: "Best reasoning at this size. Text-only.",
        tokenizer_repo: None,
        sha256: None,
    },
];

/// Return all available models in fixed order.
pub fn available_models() -> &'static [ModelDescriptor] {
    MODELS
}

/// The fallback model.
pub fn default_model() -> &'static ModelDescriptor {
    &MODELS[0]
}

/// Exact display-name lookup, falling back to [`default_model`].
pub fn find_by_name(name: &str) -> &'static ModelDescriptor {
    MODELS
        .iter()
        .find(|m| m.display_name == name)
        .unwrap_or_else(default_model)
}
