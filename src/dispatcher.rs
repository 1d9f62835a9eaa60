//! Intent routing
//!
//! Each [`Intent`] variant maps to exactly one of: a local surface edit, a
//! UI hook, or a queued AI request.

use crate::commands::{Command, CommandRegistry};
use crate::config::{decode_patterns, default_patterns, ConfigChange, ParsePattern};
use crate::intent::Intent;
use crate::response::TextSurface;
use crate::ui::UiHooks;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

const WEB_SEARCH_TITLE: &str = "Web Search";

/// The AI side of the pipeline as seen by the dispatcher
pub trait AiRequester: Send + Sync {
    /// Queue a request; `false` when nothing was queued.
    fn generate_response(&self, prompt: &str, system_message: Option<&str>) -> bool;
    fn set_text_action_mode(&self, enabled: bool, selected_text: Option<String>);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchEngine {
    Google,
    Bing,
    Yahoo,
    Yandex,
    Brave,
    Ecosia,
    Qwant,
    Startpage,
    Perplexity,
    Phind,
    #[default]
    DuckDuckGo,
}

impl SearchEngine {
    pub fn all() -> &'static [SearchEngine] {
        &[
            SearchEngine::Google,
            SearchEngine::Bing,
            SearchEngine::Yahoo,
            SearchEngine::Yandex,
            SearchEngine::Brave,
            SearchEngine::Ecosia,
            SearchEngine::Qwant,
            SearchEngine::Startpage,
            SearchEngine::Perplexity,
            SearchEngine::Phind,
            SearchEngine::DuckDuckGo,
        ]
    }

    pub fn name(&self) -> &'static str {
        match self {
            SearchEngine::Google => "google",
            SearchEngine::Bing => "bing",
            SearchEngine::Yahoo => "yahoo",
            SearchEngine::Yandex => "yandex",
            SearchEngine::Brave => "brave",
            SearchEngine::Ecosia => "ecosia",
            SearchEngine::Qwant => "qwant",
            SearchEngine::Startpage => "startpage",
            SearchEngine::Perplexity => "perplexity",
            SearchEngine::Phind => "phind",
            SearchEngine::DuckDuckGo => "duckduckgo",
        }
    }

    pub fn parse(name: &str) -> Option<SearchEngine> {
        let name = name.trim();
        Self::all()
            .iter()
            .copied()
            .find(|e| e.name().eq_ignore_ascii_case(name))
    }

    fn base_url(&self) -> &'static str {
        match self {
            SearchEngine::Google => "https://www.google.com/search?q=",
            SearchEngine::Bing => "https://www.bing.com/search?q=",
            SearchEngine::Yahoo => "https://search.yahoo.com/search?p=",
            SearchEngine::Yandex => "https://yandex.com/search/?text=",
            SearchEngine::Brave => "https://search.brave.com/search?q=",
            SearchEngine::Ecosia => "https://www.ecosia.org/search?q=",
            SearchEngine::Qwant => "https://www.qwant.com/?q=",
            SearchEngine::Startpage => "https://www.startpage.com/do/dsearch?query=",
            SearchEngine::Perplexity => "https://www.perplexity.ai/?q=",
            SearchEngine::Phind => "https://www.phind.com/search?q=",
            SearchEngine::DuckDuckGo => "https://duckduckgo.com/?q=",
        }
    }

    pub fn search_url(&self, query: &str) -> String {
        format!("{}{}", self.base_url(), urlencoding::encode(query))
    }
}

impl std::fmt::Display for SearchEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

pub struct Dispatcher {
    ai: Arc<dyn AiRequester>,
    commands: Arc<CommandRegistry>,
    surface: Arc<dyn TextSurface>,
    ui: Arc<dyn UiHooks>,
    search_engine: RwLock<SearchEngine>,
    patterns: RwLock<Vec<ParsePattern>>,
}

impl Dispatcher {
    pub fn new(
        ai: Arc<dyn AiRequester>,
        commands: Arc<CommandRegistry>,
        surface: Arc<dyn TextSurface>,
        ui: Arc<dyn UiHooks>,
    ) -> Self {
        Self {
            ai,
            commands,
            surface,
            ui,
            search_engine: RwLock::new(SearchEngine::default()),
            patterns: RwLock::new(default_patterns()),
        }
    }

    pub fn with_search_engine(self, engine: SearchEngine) -> Self {
        self.set_search_engine(engine);
        self
    }

    pub fn with_patterns(self, patterns: Vec<ParsePattern>) -> Self {
        self.set_patterns(patterns);
        self
    }

    /// Trigger patterns currently in effect
    pub fn patterns(&self) -> Vec<ParsePattern> {
        self.patterns
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn set_patterns(&self, patterns: Vec<ParsePattern>) {
        for pattern in patterns.iter().filter(|p| p.regex().is_none()) {
            warn!(
                "Pattern for {} is not a valid regex: {}",
                pattern.kind.name(),
                pattern.pattern
            );
        }
        *self.patterns.write().unwrap_or_else(|e| e.into_inner()) = patterns;
    }

    pub fn commands(&self) -> &Arc<CommandRegistry> {
        &self.commands
    }

    pub fn search_engine(&self) -> SearchEngine {
        *self.search_engine.read().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_search_engine(&self, engine: SearchEngine) {
        *self.search_engine.write().unwrap_or_else(|e| e.into_inner()) = engine;
    }

    /// Route one intent. Returns `true` when an AI request was queued.
    pub fn dispatch(&self, intent: Intent) -> bool {
        debug!(?intent, "Dispatching");
        match intent {
            Intent::Transform { text, method } => {
                let converted = method.convert(&text);
                self.surface.stop_notify_input();
                self.surface.commit(&converted);
                self.surface.start_notify_input();
                false
            }
            Intent::Question { prompt } => self.ai.generate_response(&prompt, None),
            Intent::InlineAsk { prompt, preserved } => {
                self.restore_preserved(&preserved);
                self.ai.generate_response(&prompt, None)
            }
            Intent::Command { prefix, prompt } => {
                if prefix.is_empty() {
                    self.ui.show_edit_commands();
                    return false;
                }
                self.run_command(&prefix, &prompt)
            }
            Intent::InlineCommand {
                prefix,
                prompt,
                preserved,
            } => {
                self.restore_preserved(&preserved);
                self.run_command(&prefix, &prompt)
            }
            Intent::Settings => {
                self.ui.show_settings();
                false
            }
            Intent::WebSearch { query } => {
                self.show_search(&query);
                false
            }
            Intent::AppTrigger {
                trigger,
                package,
                activity,
                app_name,
            } => {
                info!(%trigger, %package, %activity, "App trigger");
                let ui = self.ui.clone();
                self.ui.post(Box::new(move || {
                    if !ui.launch_app(&package, &activity) {
                        warn!("Failed to launch app: {}", package);
                        ui.toast_short(&format!("Failed to launch {app_name}"));
                    }
                }));
                false
            }
            Intent::TextAction { text, action } => {
                info!(action = action.name(), "Text action");
                let system_message = action.system_message();
                let prompt = action.build_prompt(&text);

                // The trigger text is already gone; put the selection back
                // and remove it so the response replaces it.
                self.surface.stop_notify_input();
                self.surface.commit(&text);
                self.surface.start_notify_input();

                self.surface.stop_notify_input();
                self.surface.delete(text.chars().count());
                self.surface.start_notify_input();

                self.ai.set_text_action_mode(true, Some(text));
                self.ai.generate_response(&prompt, Some(system_message.as_str()))
            }
        }
    }

    fn run_command(&self, prefix: &str, prompt: &str) -> bool {
        match self.commands.get(prefix) {
            Some(Command::GenerativeAi { message, .. }) => {
                self.ai.generate_response(prompt, Some(message.as_str()))
            }
            Some(Command::InlineAsk { .. }) => self.ai.generate_response(prompt, None),
            Some(Command::WebSearch) => {
                self.show_search(prompt);
                false
            }
            None => {
                warn!("Unknown command prefix: {}", prefix);
                false
            }
        }
    }

    fn show_search(&self, query: &str) {
        let url = self.search_engine().search_url(query);
        self.ui.show_web_search(WEB_SEARCH_TITLE, &url);
    }

    fn restore_preserved(&self, preserved: &str) {
        if preserved.is_empty() {
            return;
        }
        self.surface.stop_notify_input();
        self.surface.commit(&format!("{preserved} "));
        self.surface.start_notify_input();
    }

    /// Apply a settings-store notification.
    ///
    /// Malformed command or pattern payloads are returned as errors and
    /// leave the current state untouched.
    pub fn apply_change(&self, change: ConfigChange) -> Result<()> {
        match change {
            ConfigChange::Commands(raw) => self.commands.on_commands_change(&raw),
            ConfigChange::Patterns(raw) => {
                let patterns = decode_patterns(Some(&raw))?;
                debug!("Patterns updated ({} kinds)", patterns.len());
                self.set_patterns(patterns);
                Ok(())
            }
            ConfigChange::Settings(settings) => {
                if let Some(engine) = settings.search_engine {
                    info!("Search engine set to {}", engine);
                    self.set_search_engine(engine);
                }
                if let Some(prefix) = settings.inline_ask_prefix {
                    self.commands.set_inline_ask_prefix(&prefix);
                }
                Ok(())
            }
        }
    }

    /// Apply notifications until every sender is dropped
    pub async fn listen(self: Arc<Self>, mut changes: mpsc::Receiver<ConfigChange>) {
        while let Some(change) = changes.recv().await {
            if let Err(e) = self.apply_change(change) {
                error!("Rejected configuration change: {}", e);
            }
        }
        debug!("Configuration listener stopped");
    }
}
