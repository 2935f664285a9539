//! Persona, memory facts and session configuration.
//!
//! Persona and memory are persisted by the host app; the core only reads
//! snapshots of them through [`PersistedSettings`] and [`MemoryStore`]. A
//! plain JSON-file store is provided for hosts without their own storage.

use crate::error::SettingsError;
use crate::llm::model_manager;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Style directives that produce no persona line.
const DEFAULT_STYLES: [&str; 2] = ["Helpful", "Default"];
const DEFAULT_MOOD: &str = "Neutral";

/// How the assistant should sound. All dials are 0..=10.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct PersonaConfig {
    pub style_tag: String,
    pub intensity: u8,
    pub mood: String,
    pub verbosity: u8,
    pub formality: u8,
    pub humor: u8,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            style_tag: "Helpful".to_string(),
            intensity: 5,
            mood: DEFAULT_MOOD.to_string(),
            verbosity: 5,
            formality: 5,
            humor: 5,
        }
    }
}

impl PersonaConfig {
    pub fn has_custom_style(&self) -> bool {
        !DEFAULT_STYLES.contains(&self.style_tag.as_str())
    }

    pub fn has_custom_mood(&self) -> bool {
        self.mood != DEFAULT_MOOD
    }

    /// Clamp every dial into 0..=10.
    pub fn clamped(mut self) -> Self {
        for dial in [
            &mut self.intensity,
            &mut self.verbosity,
            &mut self.formality,
            &mut self.humor,
        ] {
            *dial = (*dial).min(10);
        }
        self
    }
}

/// Long-term facts about the user, injected verbatim into prompts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct MemoryFacts {
    pub name: Option<String>,
    pub dob: Option<String>,
    pub family_notes: Option<String>,
}

impl MemoryFacts {
    fn non_empty(field: &Option<String>) -> Option<&str> {
        field.as_deref().map(str::trim).filter(|s| !s.is_empty())
    }

    pub fn name(&self) -> Option<&str> {
        Self::non_empty(&self.name)
    }

    pub fn dob(&self) -> Option<&str> {
        Self::non_empty(&self.dob)
    }

    pub fn family_notes(&self) -> Option<&str> {
        Self::non_empty(&self.family_notes)
    }

    pub fn is_empty(&self) -> bool {
        self.name().is_none() && self.dob().is_none() && self.family_notes().is_none()
    }
}

/// Read-only view of the host's persisted preferences.
pub trait PersistedSettings: Send + Sync {
    fn persona(&self) -> PersonaConfig;
    fn selected_model(&self) -> String;
}

/// Read-only view of the host's long-term memory store.
pub trait MemoryStore: Send + Sync {
    fn memory_facts(&self) -> MemoryFacts;
}

/// Settings as stored on disk by [`JsonSettingsStore`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoredSettings {
    pub persona: PersonaConfig,
    pub selected_model: String,
    pub memory: MemoryFacts,
}

impl Default for StoredSettings {
    fn default() -> Self {
        Self {
            persona: PersonaConfig::default(),
            selected_model: "SmolVLM 500M".to_string(),
            memory: MemoryFacts::default(),
        }
    }
}

/// JSON-file backed settings. A missing file yields defaults.
#[derive(Debug, Clone)]
pub struct JsonSettingsStore {
    path: PathBuf,
    settings: StoredSettings,
}

impl JsonSettingsStore {
    /// Default location: `<config dir>/mate/settings.json`.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mate")
            .join("settings.json")
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, SettingsError> {
        let path = path.as_ref().to_path_buf();
        let settings = match std::fs::read_to_string(&path) {
            Ok(raw) => serde_json::from_str(&raw)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                log::info!("[SETTINGS] No settings at {}, using defaults", path.display());
                StoredSettings::default()
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, settings })
    }

    pub fn settings(&self) -> &StoredSettings {
        &self.settings
    }

    pub fn update(&mut self, f: impl FnOnce(&mut StoredSettings)) {
        f(&mut self.settings);
    }

    pub fn save(&self) -> Result<(), SettingsError> {
        if let Some(dir) = self.path.parent() {
            std::fs::create_dir_all(dir)?;
        }
        let raw = serde_json::to_string_pretty(&self.settings)?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl PersistedSettings for JsonSettingsStore {
    fn persona(&self) -> PersonaConfig {
        self.settings.persona.clone().clamped()
    }

    fn selected_model(&self) -> String {
        self.settings.selected_model.clone()
    }
}

impl MemoryStore for JsonSettingsStore {
    fn memory_facts(&self) -> MemoryFacts {
        self.settings.memory.clone()
    }
}

/// Tunables for a session.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    pub models_dir: PathBuf,
    /// User turns after which history is compacted.
    pub compaction_threshold: u32,
    /// Applies to web search and page fetches only. Generation has no timeout.
    #[serde(with = "secs")]
    pub network_timeout: Duration,
    /// Max characters of fetched page text sent to the model.
    pub page_text_limit: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            models_dir: model_manager::default_models_dir(),
            compaction_threshold: 5,
            network_timeout: Duration::from_secs(10),
            page_text_limit: 2500,
        }
    }
}

impl SessionConfig {
    /// Defaults overridden by `MATE_*` environment variables. A `.env` file
    /// in the working directory is loaded first if present.
    pub fn from_env() -> Self {
        let _ = dotenvy::dotenv();
        let mut config = Self::default();

        if let Ok(dir) = std::env::var("MATE_MODELS_DIR") {
            if !dir.is_empty() {
                config.models_dir = PathBuf::from(dir);
            }
        }
        if let Some(n) = env_parse::<u32>("MATE_COMPACTION_THRESHOLD").filter(|n| *n > 0) {
            config.compaction_threshold = n;
        }
        if let Some(secs) = env_parse::<u64>("MATE_NETWORK_TIMEOUT_SECS") {
            config.network_timeout = Duration::from_secs(secs);
        }
        if let Some(limit) = env_parse::<usize>("MATE_PAGE_TEXT_LIMIT") {
            config.page_text_limit = limit;
        }
        config
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    let raw = std::env::var(key).ok()?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            log::warn!("[SETTINGS] Ignoring invalid {}={:?}", key, raw);
            None
        }
    }
}

mod secs {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
