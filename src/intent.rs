//! Parsed intents and the line reader used by the CLI
//!
//! Line syntax:
//! - `/prefix prompt` = command, `/` alone opens the command editor
//! - `text /prefix prompt` = inline command, `text` is kept in place
//! - `prompt$` = question
//! - `query??` = web search
//! - `#bold text`, `#italic`, `#crossout`, `#underline` = local transform
//! - `#rephrase text`, `#translate:de text`, ... = text action
//! - `#open program [arg]` = app trigger
//! - `#settings` = settings

use crate::transform::ConversionMethod;
use regex::Regex;
use std::sync::OnceLock;

/// What the user asked for; consumed once by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Intent {
    Question {
        prompt: String,
    },
    Transform {
        text: String,
        method: ConversionMethod,
    },
    Command {
        prefix: String,
        prompt: String,
    },
    InlineCommand {
        prefix: String,
        prompt: String,
        preserved: String,
    },
    InlineAsk {
        prompt: String,
        preserved: String,
    },
    Settings,
    WebSearch {
        query: String,
    },
    AppTrigger {
        trigger: String,
        package: String,
        activity: String,
        app_name: String,
    },
    TextAction {
        text: String,
        action: TextAction,
    },
}

/// Named rewrite of a selected text
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TextAction {
    Rephrase,
    FixErrors,
    Improve,
    Expand,
    Shorten,
    Formal,
    Casual,
    /// Target language; `None` picks the opposite of the detected language
    Translate(Option<String>),
}

impl TextAction {
    pub fn name(&self) -> &'static str {
        match self {
            TextAction::Rephrase => "rephrase",
            TextAction::FixErrors => "fix-errors",
            TextAction::Improve => "improve",
            TextAction::Expand => "expand",
            TextAction::Shorten => "shorten",
            TextAction::Formal => "formal",
            TextAction::Casual => "casual",
            TextAction::Translate(_) => "translate",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            TextAction::Rephrase => "Rephrase",
            TextAction::FixErrors => "Fix Errors",
            TextAction::Improve => "Improve",
            TextAction::Expand => "Expand",
            TextAction::Shorten => "Shorten",
            TextAction::Formal => "Formal",
            TextAction::Casual => "Casual",
            TextAction::Translate(_) => "Translate",
        }
    }

    /// `translate:<lang>` carries a target language
    pub fn parse(name: &str) -> Option<TextAction> {
        let (name, target) = match name.split_once(':') {
            Some((name, target)) => (name, Some(target.trim())),
            None => (name, None),
        };
        let action = match name.to_ascii_lowercase().as_str() {
            "rephrase" => TextAction::Rephrase,
            "fix" | "fix-errors" => TextAction::FixErrors,
            "improve" => TextAction::Improve,
            "expand" => TextAction::Expand,
            "shorten" => TextAction::Shorten,
            "formal" => TextAction::Formal,
            "casual" => TextAction::Casual,
            "translate" => TextAction::Translate(
                target.filter(|t| !t.is_empty()).map(str::to_string),
            ),
            _ => return None,
        };
        Some(action)
    }

    pub fn system_message(&self) -> String {
        let message = match self {
            TextAction::Rephrase => "Rephrase the following text while keeping its meaning. Give only the rephrased text.",
            TextAction::FixErrors => "Fix spelling and grammar errors in the following text. Give only the corrected text.",
            TextAction::Improve => "Improve the clarity and flow of the following text. Give only the improved text.",
            TextAction::Expand => "Expand the following text with more detail. Give only the expanded text.",
            TextAction::Shorten => "Shorten the following text while keeping its key points. Give only the shortened text.",
            TextAction::Formal => "Rewrite the following text in a formal and professional style. Give only the rewritten text.",
            TextAction::Casual => "Rewrite the following text in a friendly and casual style. Give only the rewritten text.",
            TextAction::Translate(Some(target)) => {
                return format!("Translate the following text to {target}. Give only the translation.");
            }
            TextAction::Translate(None) => "Translate the following text. If it's in English, translate to Arabic and vice versa. Give only the translation.",
        };
        message.to_string()
    }

    /// The prompt is the selected text itself
    pub fn build_prompt(&self, selected_text: &str) -> String {
        selected_text.to_string()
    }
}

fn inline_command_regex() -> Option<&'static Regex> {
    static INLINE: OnceLock<Option<Regex>> = OnceLock::new();
    INLINE
        .get_or_init(|| Regex::new(r"^(?P<kept>.*\S)\s+/(?P<prefix>\S+)(?:\s+(?P<prompt>.*))?$").ok())
        .as_ref()
}

/// Read one CLI line as an intent; `None` means plain typed text.
pub fn read_line(line: &str, inline_ask_prefix: &str) -> Option<Intent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }

    if let Some(rest) = line.strip_prefix('#') {
        return read_directive(rest);
    }

    if let Some(rest) = line.strip_prefix('/') {
        let mut parts = rest.splitn(2, ' ');
        let prefix = parts.next().unwrap_or("").to_string();
        let prompt = parts.next().unwrap_or("").trim().to_string();
        return Some(Intent::Command { prefix, prompt });
    }

    if let Some(caps) = inline_command_regex().and_then(|re| re.captures(line)) {
        let preserved = caps["kept"].to_string();
        let prefix = caps["prefix"].to_string();
        let prompt = caps
            .name("prompt")
            .map(|m| m.as_str().trim().to_string())
            .unwrap_or_default();
        if prefix.eq_ignore_ascii_case(inline_ask_prefix) {
            return Some(Intent::InlineAsk { prompt, preserved });
        }
        return Some(Intent::InlineCommand {
            prefix,
            prompt,
            preserved,
        });
    }

    if let Some(query) = line.strip_suffix("??") {
        let query = query.trim();
        if !query.is_empty() {
            return Some(Intent::WebSearch {
                query: query.to_string(),
            });
        }
    }

    if let Some(prompt) = line.strip_suffix('$') {
        let prompt = prompt.trim();
        if !prompt.is_empty() {
            return Some(Intent::Question {
                prompt: prompt.to_string(),
            });
        }
    }

    None
}

fn read_directive(rest: &str) -> Option<Intent> {
    let mut parts = rest.splitn(2, ' ');
    let name = parts.next()?;
    let args = parts.next().unwrap_or("").trim();

    if name.eq_ignore_ascii_case("settings") {
        return Some(Intent::Settings);
    }

    if name.eq_ignore_ascii_case("open") {
        let mut words = args.split_whitespace();
        let package = words.next()?.to_string();
        let activity = words.collect::<Vec<_>>().join(" ");
        return Some(Intent::AppTrigger {
            trigger: format!("#open {args}"),
            app_name: package.clone(),
            package,
            activity,
        });
    }

    if args.is_empty() {
        return None;
    }
    if let Some(method) = ConversionMethod::parse(name) {
        return Some(Intent::Transform {
            text: args.to_string(),
            method,
        });
    }
    TextAction::parse(name).map(|action| Intent::TextAction {
        text: args.to_string(),
        action,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_read_command() {
        assert_eq!(
            read_line("/tr hello world", "ask"),
            Some(Intent::Command {
                prefix: "tr".to_string(),
                prompt: "hello world".to_string(),
            })
        );
        assert_eq!(
            read_line("/", "ask"),
            Some(Intent::Command {
                prefix: String::new(),
                prompt: String::new(),
            })
        );
    }

    #[test]
    fn test_read_inline_forms() {
        assert_eq!(
            read_line("Dear Bob, /fix i has a cat", "ask"),
            Some(Intent::InlineCommand {
                prefix: "fix".to_string(),
                prompt: "i has a cat".to_string(),
                preserved: "Dear Bob,".to_string(),
            })
        );
        assert_eq!(
            read_line("Note: /ASK capital of France", "ask"),
            Some(Intent::InlineAsk {
                prompt: "capital of France".to_string(),
                preserved: "Note:".to_string(),
            })
        );
    }

    #[test]
    fn test_read_triggers() {
        assert_eq!(
            read_line("rust lifetimes??", "ask"),
            Some(Intent::WebSearch {
                query: "rust lifetimes".to_string()
            })
        );
        assert_eq!(
            read_line("what is 2+2$", "ask"),
            Some(Intent::Question {
                prompt: "what is 2+2".to_string()
            })
        );
        assert_eq!(read_line("just typing", "ask"), None);
        assert_eq!(read_line("$", "ask"), None);
    }

    #[test]
    fn test_read_directives() {
        assert_eq!(read_line("#settings", "ask"), Some(Intent::Settings));
        assert_eq!(
            read_line("#bold hi", "ask"),
            Some(Intent::Transform {
                text: "hi".to_string(),
                method: ConversionMethod::BOLD,
            })
        );
        assert_eq!(
            read_line("#translate:German good morning", "ask"),
            Some(Intent::TextAction {
                text: "good morning".to_string(),
                action: TextAction::Translate(Some("German".to_string())),
            })
        );
        assert!(matches!(
            read_line("#open firefox https://example.com", "ask"),
            Some(Intent::AppTrigger { package, .. }) if package == "firefox"
        ));
        assert_eq!(read_line("#bold", "ask"), None);
        assert_eq!(read_line("#unknown words", "ask"), None);
    }

    #[test]
    fn test_text_action_messages() {
        assert_eq!(TextAction::Rephrase.build_prompt("draft"), "draft");
        assert!(TextAction::Translate(Some("French".to_string()))
            .system_message()
            .contains("to French"));
        assert_eq!(TextAction::parse("fix"), Some(TextAction::FixErrors));
        assert_eq!(TextAction::parse("translate"), Some(TextAction::Translate(None)));
    }
}
