//! Mate: on-device assistant core.
//!
//! Routes user text through a locally resident model:
//! - Model catalog, download and load/unload lifecycle (llm/)
//! - Persona-driven prompt assembly (llm/prompts_local.rs)
//! - Conversation history with compaction (conversation.rs)
//! - Embedded `[LAUNCH:..]` / `[SEARCH:..]` commands (tools/)
//! - The caller-facing session (session.rs)

pub mod conversation;
pub mod error;
pub mod llm;
pub mod session;
pub mod settings;
pub mod tools;

pub use error::{FailureKind, SessionError};
pub use llm::lifecycle::{BackendState, ModelLifecycleController, StatusEvent};
pub use session::{AssistantSession, SubmitOutcome};
pub use settings::{MemoryFacts, PersonaConfig, SessionConfig};

/// Install the env_logger sink. Honours `RUST_LOG`, defaults to `info`.
/// Safe to call more than once.
pub fn init_logging() {
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .try_init();
}
