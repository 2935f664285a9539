//! Caller-facing assistant session.
//!
//! A session ties the pieces together for one user: it records turns,
//! compacts history when due, assembles the prompt from the current persona
//! and memory snapshot, runs it through the lifecycle controller and then
//! acts on any tool commands in the reply.
//!
//! Operations that talk to the model take `&mut self`, so a session never has
//! two requests in flight. Model switching from another task goes through
//! [`AssistantSession::controller`].

use crate::conversation::{ConversationStore, Role};
use crate::error::SessionError;
use crate::llm::backend::{EngineFactory, Generation, ImageInput};
use crate::llm::lifecycle::{BackendState, ModelLifecycleController, StatusEvent};
use crate::llm::model_manager::{HttpDownloader, ModelStorage};
use crate::llm::model_registry::{self, ModelDescriptor};
use crate::llm::prompts_local;
use crate::settings::{MemoryStore, PersistedSettings, SessionConfig};
use crate::tools::{
    self, AppRegistry, ScreenContextProvider, WebFetcher, WebSearchProvider,
};
use regex::Regex;
use std::sync::{Arc, LazyLock};
use std::time::Duration;
use tokio::sync::broadcast;

static WHITESPACE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s+").unwrap());

/// What a submit produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SubmitOutcome {
    /// Model reply with command tokens removed.
    pub display_text: String,
    pub launched_app: bool,
    pub launch_target: Option<String>,
    /// Query of the SEARCH command that was acted on.
    pub search_query: Option<String>,
    /// Summary from the search follow-up, or why it failed.
    pub search_summary: Option<String>,
    /// Total generation time across round trips.
    pub elapsed: Duration,
}

pub struct AssistantSession {
    controller: Arc<ModelLifecycleController>,
    conversation: ConversationStore,
    /// User text recorded but not yet answered.
    pending: Option<String>,
    settings: Arc<dyn PersistedSettings>,
    memory: Arc<dyn MemoryStore>,
    apps: Arc<dyn AppRegistry>,
    search: Arc<dyn WebSearchProvider>,
    fetcher: Option<Arc<dyn WebFetcher>>,
    screen: Option<Arc<dyn ScreenContextProvider>>,
    config: SessionConfig,
}

impl AssistantSession {
    pub fn new(
        config: SessionConfig,
        controller: Arc<ModelLifecycleController>,
        settings: Arc<dyn PersistedSettings>,
        memory: Arc<dyn MemoryStore>,
        apps: Arc<dyn AppRegistry>,
        search: Arc<dyn WebSearchProvider>,
    ) -> Self {
        Self {
            controller,
            conversation: ConversationStore::new(),
            pending: None,
            settings,
            memory,
            apps,
            search,
            fetcher: None,
            screen: None,
            config,
        }
    }

    /// Session bound to the persisted model choice, downloading over HTTP
    /// into `config.models_dir` and loading with the compiled-in engines.
    pub fn open(
        config: SessionConfig,
        settings: Arc<dyn PersistedSettings>,
        memory: Arc<dyn MemoryStore>,
        apps: Arc<dyn AppRegistry>,
        search: Arc<dyn WebSearchProvider>,
    ) -> Self {
        let descriptor = model_registry::find_by_name(&settings.selected_model());
        log::info!(
            "[SESSION] Opening with {} (models in {})",
            descriptor.display_name,
            config.models_dir.display()
        );
        let controller = ModelLifecycleController::new(
            descriptor,
            ModelStorage::new(&config.models_dir),
            Arc::new(HttpDownloader::new()),
            Arc::new(EngineFactory),
        );
        Self::new(config, Arc::new(controller), settings, memory, apps, search)
    }

    pub fn with_fetcher(mut self, fetcher: Arc<dyn WebFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_screen_context(mut self, screen: Arc<dyn ScreenContextProvider>) -> Self {
        self.screen = Some(screen);
        self
    }

    pub fn controller(&self) -> Arc<ModelLifecycleController> {
        Arc::clone(&self.controller)
    }

    pub fn conversation(&self) -> &ConversationStore {
        &self.conversation
    }

    /// The user message still waiting for an answer, if any.
    pub fn pending_query(&self) -> Option<&str> {
        self.pending.as_deref()
    }

    /// Start over: drop the history, its summary and any unanswered message.
    pub fn new_conversation(&mut self) {
        self.conversation.clear();
        self.pending = None;
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StatusEvent> {
        self.controller.subscribe()
    }

    pub async fn status(&self) -> (BackendState, &'static ModelDescriptor) {
        self.controller.status().await
    }

    pub async fn status_text(&self) -> String {
        self.controller.status().await.0.status_text()
    }

    pub async fn switch_model(&self, name: &str) -> &'static ModelDescriptor {
        self.controller.switch_model(name).await
    }

    pub async fn unload_model(&self) {
        self.controller.unload().await
    }

    pub async fn download_model(&self) -> Result<(), SessionError> {
        self.controller.download().await
    }

    pub async fn cancel_download(&self) {
        self.controller.cancel_download().await
    }

    /// Send one user message.
    ///
    /// A bare `http(s)://` link is fetched and summarised instead when a
    /// page fetcher is configured.
    pub async fn submit(
        &mut self,
        text: &str,
        ambient_context: Option<&str>,
    ) -> Result<SubmitOutcome, SessionError> {
        let text = text.trim();
        if is_url(text) && self.fetcher.is_some() {
            return self.summarize_page(text).await;
        }
        self.conversation.record_user(text);
        self.pending = Some(text.to_string());
        self.answer_pending(ambient_context, None).await
    }

    /// Submit the fixed screen-analysis request with the current screen text.
    pub async fn assist_screen(&mut self) -> Result<SubmitOutcome, SessionError> {
        let context = self.screen.as_ref().and_then(|s| s.screen_text());
        self.submit(prompts_local::ANALYZE_SCREEN_REQUEST, context.as_deref())
            .await
    }

    /// Send a message with an image. Refused before anything is recorded
    /// unless both the model and its loaded engine take images.
    pub async fn submit_with_image(
        &mut self,
        text: &str,
        image: &ImageInput,
        ambient_context: Option<&str>,
    ) -> Result<SubmitOutcome, SessionError> {
        self.controller.accepts_images().await?;
        let text = text.trim();
        self.conversation.record_user(text);
        self.pending = Some(text.to_string());
        self.answer_pending(ambient_context, Some(image)).await
    }

    /// Answer the unanswered message again, e.g. after `CompactionFailed`
    /// or a failed generation. Returns `None` when nothing is waiting.
    pub async fn retry_pending(
        &mut self,
        ambient_context: Option<&str>,
    ) -> Result<Option<SubmitOutcome>, SessionError> {
        if self.pending.is_none() {
            return Ok(None);
        }
        self.answer_pending(ambient_context, None).await.map(Some)
    }

    /// Compacts first when due. `pending` is only cleared once a reply lands.
    async fn answer_pending(
        &mut self,
        ambient_context: Option<&str>,
        image: Option<&ImageInput>,
    ) -> Result<SubmitOutcome, SessionError> {
        let pending = self.pending.clone().unwrap_or_default();

        if self.conversation.needs_compaction(self.config.compaction_threshold) {
            self.compact(&pending).await?;
        }

        let context = self.context_block(ambient_context);
        let prompt = prompts_local::assemble(
            &self.settings.persona(),
            &self.memory.memory_facts(),
            context.as_deref(),
            &pending,
        );

        let generation = match image {
            Some(image) => self.controller.generate_with_image(&prompt, image).await?,
            None => self.controller.generate(&prompt).await?,
        };
        Ok(self.finish(generation).await)
    }

    async fn compact(&mut self, pending: &str) -> Result<(), SessionError> {
        let history = self.conversation.history_block();
        log::info!(
            "[SESSION] Compacting {} turns ({} chars)",
            self.conversation.len(),
            history.len()
        );
        let request = prompts_local::summarize_history_request(&history);
        match self.controller.generate(&request).await {
            Ok(generation) => {
                self.conversation.compact(generation.text.trim());
                Ok(())
            }
            Err(e) => {
                log::error!("[SESSION] Compaction failed: {}", e);
                Err(SessionError::CompactionFailed {
                    pending_query: pending.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Retained summary plus caller context, or nothing.
    fn context_block(&self, ambient_context: Option<&str>) -> Option<String> {
        let summary = self
            .conversation
            .summary()
            .map(|s| format!("Earlier conversation (summary): {}", s));
        let ambient = ambient_context
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .map(str::to_string);
        let parts: Vec<String> = summary.into_iter().chain(ambient).collect();
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("\n"))
        }
    }

    /// Act on commands in a reply and record what the user sees.
    async fn finish(&mut self, generation: Generation) -> SubmitOutcome {
        self.pending = None;
        let raw = generation.text;
        let mut outcome = SubmitOutcome {
            display_text: tools::strip_commands(&raw),
            elapsed: generation.elapsed,
            ..Default::default()
        };

        if let Some((target, launched)) = tools::handle_launch(&raw, self.apps.as_ref()) {
            outcome.launch_target = Some(target);
            outcome.launched_app = launched;
        }

        if let Some(query) = tools::extract_search_query(&raw) {
            let (summary, elapsed) = self.search_follow_up(&query).await;
            outcome.elapsed += elapsed;
            outcome.search_query = Some(query);
            outcome.search_summary = Some(summary);
        }

        if !outcome.display_text.is_empty() {
            self.conversation.record(Role::Assistant, outcome.display_text.clone());
        }
        if let Some(summary) = &outcome.search_summary {
            self.conversation.record(Role::Assistant, summary.clone());
        }
        outcome
    }

    /// One bounded round trip: search, then summarise the results. Commands
    /// in the summary are stripped, never acted on.
    async fn search_follow_up(&self, query: &str) -> (String, Duration) {
        log::info!("[TOOLS] Search requested ({} chars)", query.len());
        let results =
            match tokio::time::timeout(self.config.network_timeout, self.search.search(query)).await {
                Ok(Ok(results)) => results,
                Ok(Err(e)) => {
                    log::warn!("[TOOLS] Search failed: {}", e);
                    return (format!("Search failed: {}", e), Duration::ZERO);
                }
                Err(_) => {
                    log::warn!("[TOOLS] Search timed out");
                    return (
                        format!("Search timed out after {}s", self.config.network_timeout.as_secs()),
                        Duration::ZERO,
                    );
                }
            };

        let request = prompts_local::summarize_search_request(&results);
        match self.controller.generate(&request).await {
            Ok(generation) => (tools::strip_commands(&generation.text), generation.elapsed),
            Err(e) => {
                log::warn!("[TOOLS] Search summary failed: {}", e);
                (e.user_status(), Duration::ZERO)
            }
        }
    }

    async fn summarize_page(&mut self, url: &str) -> Result<SubmitOutcome, SessionError> {
        let Some(fetcher) = self.fetcher.clone() else {
            return Err(SessionError::Fetch("no page fetcher configured".to_string()));
        };
        // Recorded, but not counted toward compaction.
        self.conversation.record(Role::User, url);

        let page = match tokio::time::timeout(self.config.network_timeout, fetcher.fetch_text(url)).await {
            Ok(Ok(page)) => page,
            Ok(Err(e)) => return Err(SessionError::Fetch(e)),
            Err(_) => {
                return Err(SessionError::Fetch(format!(
                    "timed out after {}s",
                    self.config.network_timeout.as_secs()
                )))
            }
        };

        let text = clean_page_text(&page, self.config.page_text_limit);
        if text.is_empty() {
            return Err(SessionError::Fetch("page has no readable text".to_string()));
        }
        log::info!("[SESSION] Summarising page ({} chars)", text.len());

        let generation = self
            .controller
            .generate(&prompts_local::summarize_page_request(&text))
            .await?;
        let display_text = tools::strip_commands(&generation.text);
        if !display_text.is_empty() {
            self.conversation.record(Role::Assistant, display_text.clone());
        }
        Ok(SubmitOutcome {
            display_text,
            elapsed: generation.elapsed,
            ..Default::default()
        })
    }
}

fn is_url(text: &str) -> bool {
    (text.starts_with("http://") || text.starts_with("https://")) && !text.contains(char::is_whitespace)
}

/// Collapse whitespace runs and cap the length in characters.
fn clean_page_text(page: &str, limit: usize) -> String {
    WHITESPACE
        .replace_all(page, " ")
        .trim()
        .chars()
        .take(limit)
        .collect()
}
