//! Language model catalogue and per-model settings

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_TOKENS: u32 = 4096;
pub const DEFAULT_TEMPERATURE: f64 = 1.0;
pub const DEFAULT_TOP_P: f64 = 1.0;

/// Request body dialect spoken by a provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireFormat {
    /// `{base}/chat/completions` with a bearer key
    ChatCompletions,
    /// `{base}/models/{model}:generateContent` with `x-goog-api-key`
    Gemini,
}

/// Supported providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LanguageModel {
    Gemini,
    ChatGpt,
    Groq,
    OpenRouter,
    Claude,
    Mistral,
    Chutes,
    Perplexity,
    Glm,
}

impl LanguageModel {
    pub fn all() -> &'static [LanguageModel] {
        &[
            LanguageModel::Gemini,
            LanguageModel::ChatGpt,
            LanguageModel::Groq,
            LanguageModel::OpenRouter,
            LanguageModel::Claude,
            LanguageModel::Mistral,
            LanguageModel::Chutes,
            LanguageModel::Perplexity,
            LanguageModel::Glm,
        ]
    }

    /// Key used in config files
    pub fn id(&self) -> &'static str {
        match self {
            LanguageModel::Gemini => "gemini",
            LanguageModel::ChatGpt => "chatgpt",
            LanguageModel::Groq => "groq",
            LanguageModel::OpenRouter => "openrouter",
            LanguageModel::Claude => "claude",
            LanguageModel::Mistral => "mistral",
            LanguageModel::Chutes => "chutes",
            LanguageModel::Perplexity => "perplexity",
            LanguageModel::Glm => "glm",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            LanguageModel::Gemini => "Gemini",
            LanguageModel::ChatGpt => "ChatGPT",
            LanguageModel::Groq => "Groq",
            LanguageModel::OpenRouter => "OpenRouter",
            LanguageModel::Claude => "Claude",
            LanguageModel::Mistral => "Mistral",
            LanguageModel::Chutes => "Chutes",
            LanguageModel::Perplexity => "Perplexity",
            LanguageModel::Glm => "ZhipuAI GLM",
        }
    }

    pub fn default_sub_model(&self) -> &'static str {
        match self {
            LanguageModel::Gemini => "gemini-2.5-flash",
            LanguageModel::ChatGpt => "gpt-4o",
            LanguageModel::Groq => "llama-3.3-70b-versatile",
            LanguageModel::OpenRouter => "google/gemini-2.0-flash-exp:free",
            LanguageModel::Claude => "claude-sonnet-4-5-20250630",
            LanguageModel::Mistral => "mistral-small-latest",
            LanguageModel::Chutes => "deepseek-ai/DeepSeek-R1-Distill-Llama-70B",
            LanguageModel::Perplexity => "sonar-pro",
            LanguageModel::Glm => "glm-4",
        }
    }

    pub fn default_base_url(&self) -> &'static str {
        match self {
            LanguageModel::Gemini => "https://generativelanguage.googleapis.com/v1beta",
            LanguageModel::ChatGpt => "https://api.openai.com/v1",
            LanguageModel::Groq => "https://api.groq.com/openai/v1",
            LanguageModel::OpenRouter => "https://openrouter.ai/api/v1",
            LanguageModel::Claude => "https://api.anthropic.com/v1",
            LanguageModel::Mistral => "https://api.mistral.ai/v1",
            LanguageModel::Chutes => "https://api.chutes.ai/v1",
            LanguageModel::Perplexity => "https://api.perplexity.ai",
            LanguageModel::Glm => "https://open.bigmodel.cn/api/paas/v4",
        }
    }

    pub fn wire_format(&self) -> WireFormat {
        match self {
            LanguageModel::Gemini => WireFormat::Gemini,
            _ => WireFormat::ChatCompletions,
        }
    }

    pub fn parse(s: &str) -> Option<LanguageModel> {
        let s = s.trim();
        Self::all()
            .iter()
            .copied()
            .find(|m| m.id().eq_ignore_ascii_case(s) || m.label().eq_ignore_ascii_case(s))
    }
}

impl std::fmt::Display for LanguageModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// User-provided overrides for one model, as stored in config
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelOverrides {
    pub api_key: Option<String>,
    pub sub_model: Option<String>,
    pub base_url: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub top_p: Option<f64>,
}

/// Fully resolved settings used to build a request
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSettings {
    pub model: LanguageModel,
    pub api_key: Option<String>,
    pub sub_model: String,
    pub base_url: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub top_p: f64,
}

impl ModelSettings {
    pub fn defaults(model: LanguageModel) -> Self {
        Self::resolve(model, &ModelOverrides::default())
    }

    /// Overrides win; blank strings fall back to the model defaults.
    pub fn resolve(model: LanguageModel, overrides: &ModelOverrides) -> Self {
        let non_blank = |value: &Option<String>| {
            value
                .as_deref()
                .map(str::trim)
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        Self {
            model,
            api_key: non_blank(&overrides.api_key),
            sub_model: non_blank(&overrides.sub_model)
                .unwrap_or_else(|| model.default_sub_model().to_string()),
            base_url: non_blank(&overrides.base_url)
                .unwrap_or_else(|| model.default_base_url().to_string()),
            max_tokens: overrides.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            temperature: overrides.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: overrides.top_p.unwrap_or(DEFAULT_TOP_P),
        }
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    pub fn api_key(&self) -> Option<&str> {
        self.api_key.as_deref().filter(|k| !k.trim().is_empty())
    }

    /// `base_url` joined with `path`, without a doubled slash
    pub fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_accepts_id_and_label() {
        assert_eq!(LanguageModel::parse("chatgpt"), Some(LanguageModel::ChatGpt));
        assert_eq!(LanguageModel::parse("ChatGPT"), Some(LanguageModel::ChatGpt));
        assert_eq!(LanguageModel::parse(" gemini "), Some(LanguageModel::Gemini));
        assert_eq!(LanguageModel::parse("unknown"), None);
    }

    #[test]
    fn test_resolve_uses_defaults_for_blank_overrides() {
        let overrides = ModelOverrides {
            api_key: Some("  ".to_string()),
            sub_model: Some(String::new()),
            temperature: Some(0.2),
            ..Default::default()
        };
        let settings = ModelSettings::resolve(LanguageModel::Groq, &overrides);

        assert_eq!(settings.api_key(), None);
        assert_eq!(settings.sub_model, "llama-3.3-70b-versatile");
        assert_eq!(settings.base_url, "https://api.groq.com/openai/v1");
        assert_eq!(settings.max_tokens, DEFAULT_MAX_TOKENS);
        assert_eq!(settings.temperature, 0.2);
    }

    #[test]
    fn test_endpoint_joins_without_double_slash() {
        let settings = ModelSettings::defaults(LanguageModel::ChatGpt)
            .with_base_url("http://localhost:8080/v1/");
        assert_eq!(
            settings.endpoint("/chat/completions"),
            "http://localhost:8080/v1/chat/completions"
        );
    }

    #[test]
    fn test_only_gemini_uses_gemini_wire_format() {
        for model in LanguageModel::all() {
            let expected = if *model == LanguageModel::Gemini {
                WireFormat::Gemini
            } else {
                WireFormat::ChatCompletions
            };
            assert_eq!(model.wire_format(), expected);
        }
    }
}
