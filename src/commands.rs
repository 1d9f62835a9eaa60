//! Command registry
//!
//! - `s` = web search (built in, cannot be overridden)
//! - inline ask prefix (default `ask`) = ask without a system message
//! - everything else = user-defined AI commands with a system message

use crate::{QuillError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

pub const WEB_SEARCH_PREFIX: &str = "s";
pub const DEFAULT_INLINE_ASK_PREFIX: &str = "ask";

/// A resolved command
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Forward the prompt with `message` as system message
    GenerativeAi { prefix: String, message: String },
    WebSearch,
    /// Forward the prompt with no system message
    InlineAsk { prefix: String },
}

impl Command {
    pub fn prefix(&self) -> &str {
        match self {
            Command::GenerativeAi { prefix, .. } | Command::InlineAsk { prefix } => prefix,
            Command::WebSearch => WEB_SEARCH_PREFIX,
        }
    }

    pub fn is_built_in(&self) -> bool {
        !matches!(self, Command::GenerativeAi { .. })
    }
}

/// Stored form of a user command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub prefix: String,
    pub message: String,
}

impl CommandEntry {
    pub fn new(prefix: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            message: message.into(),
        }
    }
}

/// Commands installed on first run
pub fn default_commands() -> Vec<CommandEntry> {
    vec![
        CommandEntry::new("tr", "Translate the following text. If it's in Arabic, translate to English and vice versa. Give only the translation."),
        CommandEntry::new("fix", "Fix spelling and grammar errors in the following text. Give only the corrected text."),
        CommandEntry::new("short", "Summarize the following text in one or two sentences."),
        CommandEntry::new("formal", "Rewrite the following text in a formal and professional style. Give only the rewritten text."),
        CommandEntry::new("casual", "Rewrite the following text in a friendly and casual style. Give only the rewritten text."),
        CommandEntry::new("reply", "Write a short and appropriate reply to the following message. Give only the reply."),
        CommandEntry::new("email", "Write a professional email about the following topic."),
        CommandEntry::new("explain", "Explain the following topic in a simple and easy to understand way."),
        CommandEntry::new("code", "Write the requested code without additional explanation. Give only the code."),
        CommandEntry::new("emoji", "Add appropriate emojis to the following text. Give only the text with emojis."),
    ]
}

/// JSON array of `{prefix, message}` objects
pub fn encode_commands(commands: &[CommandEntry]) -> Result<String> {
    Ok(serde_json::to_string(commands)?)
}

pub fn decode_commands(raw: &str) -> Result<Vec<CommandEntry>> {
    serde_json::from_str(raw)
        .map_err(|e| QuillError::MalformedConfig(format!("invalid commands: {e}")))
}

type CommandMap = HashMap<String, Command>;

/// Prefix → command map, rebuilt wholesale on every change.
///
/// Readers always see either the old or the new map, never a mix.
pub struct CommandRegistry {
    inline_ask_prefix: RwLock<String>,
    user_commands: RwLock<Vec<CommandEntry>>,
    map: RwLock<Arc<CommandMap>>,
}

impl CommandRegistry {
    pub fn new(user_commands: Vec<CommandEntry>) -> Self {
        Self::with_inline_ask_prefix(DEFAULT_INLINE_ASK_PREFIX, user_commands)
    }

    pub fn with_inline_ask_prefix(prefix: &str, user_commands: Vec<CommandEntry>) -> Self {
        let prefix = if prefix.trim().is_empty() {
            DEFAULT_INLINE_ASK_PREFIX.to_string()
        } else {
            prefix.trim().to_string()
        };
        let map = build_map(&prefix, &user_commands);
        Self {
            inline_ask_prefix: RwLock::new(prefix),
            user_commands: RwLock::new(user_commands),
            map: RwLock::new(Arc::new(map)),
        }
    }

    pub fn get(&self, prefix: &str) -> Option<Command> {
        self.snapshot().get(prefix).cloned()
    }

    /// Current map; later rebuilds do not affect it
    pub fn snapshot(&self) -> Arc<HashMap<String, Command>> {
        self.map.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn inline_ask_prefix(&self) -> String {
        self.inline_ask_prefix
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn is_built_in(&self, prefix: &str) -> bool {
        is_built_in_prefix(prefix, &self.inline_ask_prefix())
    }

    /// User commands, sorted by prefix
    pub fn user_commands(&self) -> Vec<CommandEntry> {
        let mut commands: Vec<CommandEntry> = self
            .snapshot()
            .values()
            .filter_map(|c| match c {
                Command::GenerativeAi { prefix, message } => {
                    Some(CommandEntry::new(prefix.clone(), message.clone()))
                }
                _ => None,
            })
            .collect();
        commands.sort_by(|a, b| a.prefix.cmp(&b.prefix));
        commands
    }

    pub fn set_inline_ask_prefix(&self, prefix: &str) {
        let prefix = prefix.trim();
        if prefix.is_empty() {
            warn!("Ignoring empty inline ask prefix");
            return;
        }
        *self
            .inline_ask_prefix
            .write()
            .unwrap_or_else(|e| e.into_inner()) = prefix.to_string();
        let user_commands = self
            .user_commands
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        self.rebuild(user_commands);
    }

    /// Replace the user commands and swap in a fresh map
    pub fn rebuild(&self, user_commands: Vec<CommandEntry>) {
        let map = build_map(&self.inline_ask_prefix(), &user_commands);
        info!("Command registry rebuilt with {} commands", map.len());
        *self.user_commands.write().unwrap_or_else(|e| e.into_inner()) = user_commands;
        *self.map.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(map);
    }

    /// Decode a raw commands value and rebuild. A malformed value leaves
    /// the current map in place.
    pub fn on_commands_change(&self, raw: &str) -> Result<()> {
        let commands = decode_commands(raw)?;
        self.rebuild(commands);
        Ok(())
    }
}

fn is_built_in_prefix(prefix: &str, inline_ask_prefix: &str) -> bool {
    prefix == WEB_SEARCH_PREFIX
        || prefix.eq_ignore_ascii_case(inline_ask_prefix)
        || prefix.eq_ignore_ascii_case(DEFAULT_INLINE_ASK_PREFIX)
}

fn build_map(inline_ask_prefix: &str, user_commands: &[CommandEntry]) -> CommandMap {
    let mut map = CommandMap::new();
    map.insert(WEB_SEARCH_PREFIX.to_string(), Command::WebSearch);
    map.insert(
        inline_ask_prefix.to_string(),
        Command::InlineAsk {
            prefix: inline_ask_prefix.to_string(),
        },
    );

    for entry in user_commands {
        if is_built_in_prefix(&entry.prefix, inline_ask_prefix) {
            debug!("Skipping user command shadowing built-in /{}", entry.prefix);
            continue;
        }
        map.insert(
            entry.prefix.clone(),
            Command::GenerativeAi {
                prefix: entry.prefix.clone(),
                message: entry.message.clone(),
            },
        );
    }
    map
}
