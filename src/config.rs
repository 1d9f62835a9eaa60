//! Configuration file, change notifications and the pattern codec

use crate::commands::{decode_commands, default_commands, CommandEntry, DEFAULT_INLINE_ASK_PREFIX};
use crate::dispatcher::SearchEngine;
use crate::llm::{LanguageModel, ModelOverrides, ModelSettings};
use crate::response::SurfaceTexts;
use crate::worker::{DEFAULT_SHUTDOWN_GRACE, DEFAULT_WORKERS};
use crate::{QuillError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Quillstream configuration, read from `config.toml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuillConfig {
    /// Active language model
    pub model: Option<LanguageModel>,
    /// Per-model overrides keyed by model id
    pub models: HashMap<String, ModelOverrides>,
    /// Stream chat completions line by line
    pub stream: bool,
    pub search_engine: SearchEngine,
    pub inline_ask_prefix: String,
    pub placeholder: String,
    pub error_format: String,
    pub unknown_error: String,
    /// Encoded user commands; `None` installs the defaults
    pub commands: Option<String>,
    /// Encoded user patterns; `None` uses the defaults
    pub patterns: Option<String>,
    pub worker_threads: usize,
    pub shutdown_grace_secs: u64,
}

impl Default for QuillConfig {
    fn default() -> Self {
        let texts = SurfaceTexts::default();
        Self {
            model: None,
            models: HashMap::new(),
            stream: false,
            search_engine: SearchEngine::default(),
            inline_ask_prefix: DEFAULT_INLINE_ASK_PREFIX.to_string(),
            placeholder: texts.placeholder,
            error_format: texts.error_format,
            unknown_error: texts.unknown_error,
            commands: None,
            patterns: None,
            worker_threads: DEFAULT_WORKERS,
            shutdown_grace_secs: DEFAULT_SHUTDOWN_GRACE.as_secs(),
        }
    }
}

impl QuillConfig {
    /// `<config_dir>/quillstream/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("quillstream").join("config.toml"))
    }

    /// Load from `path`; a missing file yields the defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        match tokio::fs::read_to_string(path).await {
            Ok(content) => {
                let config: QuillConfig = toml::from_str(&content)?;
                info!("Loaded config from {}", path.display());
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn with_model(mut self, model: LanguageModel) -> Self {
        self.model = Some(model);
        self
    }

    pub fn with_api_key(mut self, model: LanguageModel, key: impl Into<String>) -> Self {
        self.models.entry(model.id().to_string()).or_default().api_key = Some(key.into());
        self
    }

    pub fn with_streaming(mut self, stream: bool) -> Self {
        self.stream = stream;
        self
    }

    pub fn with_search_engine(mut self, engine: SearchEngine) -> Self {
        self.search_engine = engine;
        self
    }

    /// Settings for the active model, `None` when no model is chosen
    pub fn model_settings(&self) -> Option<ModelSettings> {
        let model = self.model?;
        let overrides = self.models.get(model.id()).cloned().unwrap_or_default();
        Some(ModelSettings::resolve(model, &overrides))
    }

    pub fn user_commands(&self) -> Result<Vec<CommandEntry>> {
        match &self.commands {
            Some(raw) => decode_commands(raw),
            None => Ok(default_commands()),
        }
    }

    pub fn surface_texts(&self) -> SurfaceTexts {
        SurfaceTexts {
            placeholder: self.placeholder.clone(),
            error_format: self.error_format.clone(),
            unknown_error: self.unknown_error.clone(),
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Settings bundle pushed alongside command and pattern changes
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OtherSettings {
    pub search_engine: Option<SearchEngine>,
    pub inline_ask_prefix: Option<String>,
}

/// Push notification from the settings store
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigChange {
    /// Raw encoded command list
    Commands(String),
    /// Raw encoded pattern list
    Patterns(String),
    Settings(OtherSettings),
}

// ─── Patterns ───────────────────────────────────────────────────────

/// Trigger kinds the intent parser recognises
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PatternKind {
    Settings,
    CommandAi,
    CommandCustom,
    FormatItalic,
    FormatBold,
    FormatCrossout,
    FormatUnderline,
    WebSearch,
    RangeSelection,
}

impl PatternKind {
    pub fn all() -> &'static [PatternKind] {
        &[
            PatternKind::Settings,
            PatternKind::CommandAi,
            PatternKind::CommandCustom,
            PatternKind::FormatItalic,
            PatternKind::FormatBold,
            PatternKind::FormatCrossout,
            PatternKind::FormatUnderline,
            PatternKind::WebSearch,
            PatternKind::RangeSelection,
        ]
    }

    /// Name used in the encoded form
    pub fn name(&self) -> &'static str {
        match self {
            PatternKind::Settings => "Settings",
            PatternKind::CommandAi => "CommandAI",
            PatternKind::CommandCustom => "CommandCustom",
            PatternKind::FormatItalic => "FormatItalic",
            PatternKind::FormatBold => "FormatBold",
            PatternKind::FormatCrossout => "FormatCrossout",
            PatternKind::FormatUnderline => "FormatUnderline",
            PatternKind::WebSearch => "WebSearch",
            PatternKind::RangeSelection => "RangeSelection",
        }
    }

    pub fn parse(name: &str) -> Option<PatternKind> {
        Self::all().iter().copied().find(|k| k.name() == name)
    }

    pub fn default_pattern(&self) -> &'static str {
        match self {
            PatternKind::Settings => "€$",
            PatternKind::CommandAi => r"(.+)\$$",
            PatternKind::CommandCustom => r"([^%]+)%(?:([^ %]+))?%$",
            PatternKind::FormatItalic => r"([^|]+)\|$",
            PatternKind::FormatBold => r"([^@]+)@$",
            PatternKind::FormatCrossout => r"([^~]+)~$",
            PatternKind::FormatUnderline => r"([^_]+)_$",
            PatternKind::WebSearch => r"(.+)\?\?$",
            PatternKind::RangeSelection => r"\$(.+)\$$",
        }
    }
}

/// A user-editable trigger pattern
#[derive(Debug, Clone, PartialEq)]
pub struct ParsePattern {
    pub kind: PatternKind,
    pub pattern: String,
    pub extras: Option<HashMap<String, String>>,
}

impl ParsePattern {
    pub fn new(kind: PatternKind, pattern: impl Into<String>) -> Self {
        Self {
            kind,
            pattern: pattern.into(),
            extras: None,
        }
    }

    /// Compiled pattern; `None` when the user pattern is not a valid regex
    pub fn regex(&self) -> Option<regex::Regex> {
        regex::Regex::new(&self.pattern).ok()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct EncodedPattern {
    name: String,
    pattern: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    extras: Option<HashMap<String, String>>,
}

pub fn default_patterns() -> Vec<ParsePattern> {
    PatternKind::all()
        .iter()
        .map(|kind| ParsePattern::new(*kind, kind.default_pattern()))
        .collect()
}

/// JSON array of `{name, pattern, extras?}` objects
pub fn encode_patterns(patterns: &[ParsePattern]) -> Result<String> {
    let encoded: Vec<EncodedPattern> = patterns
        .iter()
        .map(|p| EncodedPattern {
            name: p.kind.name().to_string(),
            pattern: p.pattern.clone(),
            extras: p.extras.clone(),
        })
        .collect();
    Ok(serde_json::to_string(&encoded)?)
}

/// Decode user patterns. Unknown kinds are skipped and kinds missing from
/// the payload get their default pattern.
pub fn decode_patterns(raw: Option<&str>) -> Result<Vec<ParsePattern>> {
    let Some(raw) = raw else {
        return Ok(default_patterns());
    };
    let encoded: Vec<EncodedPattern> = serde_json::from_str(raw)
        .map_err(|e| QuillError::MalformedConfig(format!("invalid patterns: {e}")))?;

    let mut patterns = Vec::with_capacity(PatternKind::all().len());
    for entry in encoded {
        match PatternKind::parse(&entry.name) {
            Some(kind) => patterns.push(ParsePattern {
                kind,
                pattern: entry.pattern,
                extras: entry.extras,
            }),
            None => warn!("Skipping unknown pattern type: {}", entry.name),
        }
    }
    for kind in PatternKind::all() {
        if !patterns.iter().any(|p| p.kind == *kind) {
            debug!("Added missing pattern type: {}", kind.name());
            patterns.push(ParsePattern::new(*kind, kind.default_pattern()));
        }
    }
    Ok(patterns)
}
