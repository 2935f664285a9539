//! Error taxonomy for the assistant core.
//!
//! Engines, the downloader and the session each have their own error type.
//! Everything funnels into `SessionError` at the session boundary, where it is
//! turned into a short user-facing status line via `FailureKind`.

/// Failure while acquiring model bytes.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DownloadError {
    #[error("Not enough storage to download the model: {0}")]
    InsufficientStorage(String),

    #[error("Cellular download requires confirmation: {0}")]
    NetworkPolicy(String),

    #[error("Model download failed: {0}")]
    Transfer(String),
}

impl DownloadError {
    /// Map a downloader's terminal reason string onto the taxonomy.
    pub fn from_reason(reason: &str) -> Self {
        match FailureKind::classify(reason) {
            FailureKind::StorageExhausted => Self::InsufficientStorage(reason.to_string()),
            FailureKind::NetworkPolicyRequired => Self::NetworkPolicy(reason.to_string()),
            _ => Self::Transfer(reason.to_string()),
        }
    }
}

/// Failure raised by an inference engine.
#[derive(Debug, Clone, thiserror::Error)]
pub enum BackendError {
    #[error("Failed to load model: {0}")]
    LoadFailed(String),

    #[error("Generation failed: {0}")]
    Generation(String),

    #[error("Backend is closed")]
    Closed,

    #[error("Image input is not supported by {0}")]
    VisionUnsupported(String),

    #[error("Engine not available in this build: {0}")]
    EngineUnavailable(String),
}

/// App launch could not be resolved. Never surfaced as `Err` to callers;
/// the tool protocol reports it as `launched_app == false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolDispatchError {
    #[error("Could not find app: {0}")]
    AppNotFound(String),

    #[error("Registry refused to launch {0}")]
    LaunchRefused(String),
}

/// Errors from the JSON settings store.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Settings I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Settings file is malformed: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error type returned by every caller-facing session operation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Download(#[from] DownloadError),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Inference failed: {0}")]
    Inference(String),

    #[error("{0}")]
    Busy(String),

    #[error("Response discarded: the model was switched or unloaded while generating")]
    StaleResponse,

    #[error("Compaction failed: {reason}")]
    CompactionFailed { pending_query: String, reason: String },

    #[error("{model} cannot take image input")]
    VisionUnsupported { model: String },

    #[error("Could not fetch page: {0}")]
    Fetch(String),
}

impl From<BackendError> for SessionError {
    fn from(e: BackendError) -> Self {
        match e {
            BackendError::Closed => SessionError::ModelUnavailable(e.to_string()),
            BackendError::VisionUnsupported(model) => SessionError::VisionUnsupported { model },
            other => SessionError::Inference(other.to_string()),
        }
    }
}

impl SessionError {
    /// Coarse classification used for rendering guidance.
    pub fn kind(&self) -> FailureKind {
        match self {
            SessionError::Download(DownloadError::InsufficientStorage(_)) => {
                FailureKind::StorageExhausted
            }
            SessionError::Download(DownloadError::NetworkPolicy(_)) => {
                FailureKind::NetworkPolicyRequired
            }
            SessionError::ModelUnavailable(reason) if FailureKind::classify(reason) == FailureKind::Generic => {
                FailureKind::EmptyResult
            }
            other => FailureKind::classify(&other.to_string()),
        }
    }

    /// One-line status for the UI layer.
    pub fn user_status(&self) -> String {
        match self.kind() {
            FailureKind::EmptyResult => {
                "The model returned nothing. Try again, or reload the model.".to_string()
            }
            FailureKind::StorageExhausted => {
                "Not enough free storage for this model. Free up space or pick a smaller model."
                    .to_string()
            }
            FailureKind::NetworkPolicyRequired => {
                "You're on a metered connection. Confirm the download to continue.".to_string()
            }
            FailureKind::Generic => format!("Error: {}", self),
        }
    }
}

/// Fixed keyword classification of failure reasons.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    EmptyResult,
    StorageExhausted,
    NetworkPolicyRequired,
    Generic,
}

impl FailureKind {
    /// Case-insensitive keyword match. First matching rule wins.
    pub fn classify(reason: &str) -> Self {
        let reason = reason.to_lowercase();
        if reason.contains("empty") {
            FailureKind::EmptyResult
        } else if reason.contains("storage") || reason.contains("no space") {
            FailureKind::StorageExhausted
        } else if reason.contains("cellular")
            || reason.contains("metered")
            || reason.contains("requires confirmation")
        {
            FailureKind::NetworkPolicyRequired
        } else {
            FailureKind::Generic
        }
    }
}
