//! Quillstream CLI
//!
//! Line-based front end: each input line is read as an intent and routed
//! through the dispatcher; AI responses stream into an in-memory surface
//! that is printed once the response settles.

use anyhow::Context;
use clap::Parser;
use quillstream::commands::encode_commands;
use quillstream::config::{decode_patterns, OtherSettings, ParsePattern};
use quillstream::intent::read_line;
use quillstream::llm::{client_for, HttpTransport};
use quillstream::{
    BufferSurface, CommandRegistry, ConfigChange, Dispatcher, LanguageModel, QuillConfig,
    ResponseManager, SearchEngine,
};
use quillstream::ui::ConsoleUi;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

/// Quillstream - AI completions streamed into your text
#[derive(Parser, Debug)]
#[command(name = "quillstream")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Language model to use (e.g. chatgpt, gemini, groq)
    #[arg(short, long)]
    model: Option<String>,

    /// API key for the selected model
    #[arg(long)]
    api_key: Option<String>,

    /// Stream chat completions as they are generated
    #[arg(long)]
    stream: bool,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Line to process before reading stdin
    #[arg(trailing_var_arg = true)]
    prompt: Vec<String>,
}

/// `:`-prefixed lines handled by the REPL itself
#[derive(Debug, Clone, PartialEq, Eq)]
enum ReplCommand {
    Quit,
    Show,
    Clear,
    Cancel,
    Commands(String),
    Patterns(String),
    Engine(String),
    Ask(String),
}

impl ReplCommand {
    fn parse(line: &str) -> Option<ReplCommand> {
        let rest = line.trim().strip_prefix(':')?;
        let mut parts = rest.splitn(2, ' ');
        let name = parts.next()?;
        let arg = parts.next().unwrap_or("").trim().to_string();

        match name {
            "quit" | "q" => Some(ReplCommand::Quit),
            "show" => Some(ReplCommand::Show),
            "clear" => Some(ReplCommand::Clear),
            "cancel" => Some(ReplCommand::Cancel),
            "commands" => Some(ReplCommand::Commands(arg)),
            "patterns" => Some(ReplCommand::Patterns(arg)),
            "engine" => Some(ReplCommand::Engine(arg)),
            "ask" => Some(ReplCommand::Ask(arg)),
            _ => None,
        }
    }
}

struct Session {
    surface: Arc<BufferSurface>,
    manager: Arc<ResponseManager>,
    dispatcher: Arc<Dispatcher>,
    changes: mpsc::Sender<ConfigChange>,
}

impl Session {
    /// Handle one input line. Returns `false` to quit.
    async fn handle_line(&self, line: &str) -> anyhow::Result<bool> {
        if let Some(command) = ReplCommand::parse(line) {
            return self.handle_command(command).await;
        }

        let inline_ask_prefix = self.dispatcher.commands().inline_ask_prefix();
        match read_line(line, &inline_ask_prefix) {
            Some(intent) => {
                let before = self.manager.status().borrow().finished;
                if self.dispatcher.dispatch(intent) {
                    self.wait_for_response(before).await;
                }
                self.print_surface();
            }
            None => {
                if !self.surface.type_text(&format!("{} ", line.trim())) {
                    warn!("Input is locked while a response is streaming");
                }
            }
        }
        Ok(true)
    }

    async fn handle_command(&self, command: ReplCommand) -> anyhow::Result<bool> {
        match command {
            ReplCommand::Quit => return Ok(false),
            ReplCommand::Show => {
                self.print_surface();
                if let Some(caret) = caret_line(&self.surface) {
                    print_line(&caret);
                }
            }
            ReplCommand::Clear => {
                self.surface.take_text();
            }
            ReplCommand::Cancel => self.manager.cancel(),
            ReplCommand::Commands(raw) if raw.is_empty() => {
                let commands = self.dispatcher.commands().user_commands();
                print_line(&encode_commands(&commands)?);
            }
            ReplCommand::Commands(raw) => self.changes.send(ConfigChange::Commands(raw)).await?,
            ReplCommand::Patterns(raw) if raw.is_empty() => {
                for pattern in self.dispatcher.patterns() {
                    print_line(&describe_pattern(&pattern));
                }
            }
            ReplCommand::Patterns(raw) => self.changes.send(ConfigChange::Patterns(raw)).await?,
            ReplCommand::Engine(name) => match SearchEngine::parse(&name) {
                Some(engine) => {
                    let settings = OtherSettings {
                        search_engine: Some(engine),
                        ..Default::default()
                    };
                    self.changes.send(ConfigChange::Settings(settings)).await?
                }
                None => warn!("Unknown search engine: {}", name),
            },
            ReplCommand::Ask(prefix) => {
                let settings = OtherSettings {
                    inline_ask_prefix: Some(prefix),
                    ..Default::default()
                };
                self.changes.send(ConfigChange::Settings(settings)).await?
            }
        }
        Ok(true)
    }

    /// Wait until the request queued after `before` finished; Ctrl-C cancels it.
    async fn wait_for_response(&self, before: u64) {
        let mut status = self.manager.status();
        let finished = status.wait_for(|s| s.finished > before);
        tokio::pin!(finished);
        loop {
            tokio::select! {
                result = &mut finished => {
                    if result.is_err() {
                        warn!("Response consumer stopped before the request finished");
                    }
                    return;
                }
                _ = tokio::signal::ctrl_c() => self.manager.cancel(),
            }
        }
    }

    fn print_surface(&self) {
        print_line(&self.surface.display_text());
    }
}

fn print_line(line: &str) {
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{line}");
    let _ = stdout.flush();
}

/// Marker under the cursor, where keystrokes and responses are inserted.
/// `None` for multi-line text.
fn caret_line(surface: &BufferSurface) -> Option<String> {
    if surface.display_text().contains('\n') {
        return None;
    }
    Some(format!("{}^", " ".repeat(surface.cursor_display_width())))
}

fn describe_pattern(pattern: &ParsePattern) -> String {
    let validity = if pattern.regex().is_some() {
        ""
    } else {
        " (invalid regex)"
    };
    format!("{:<16} {}{}", pattern.kind.name(), pattern.pattern, validity)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();

    let config = load_config(&cli).await?;
    run(cli, config).await
}

async fn load_config(cli: &Cli) -> anyhow::Result<QuillConfig> {
    let mut config = match cli.config.clone().or_else(QuillConfig::default_path) {
        Some(path) => QuillConfig::load(&path)
            .await
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => QuillConfig::default(),
    };

    if let Some(name) = &cli.model {
        let model = LanguageModel::parse(name)
            .ok_or_else(|| anyhow::anyhow!("Unknown language model: {name}"))?;
        config = config.with_model(model);
    }
    if let Some(key) = &cli.api_key {
        let model = config
            .model
            .ok_or_else(|| anyhow::anyhow!("--api-key needs a model (--model or config)"))?;
        config = config.with_api_key(model, key.clone());
    }
    if cli.stream {
        config = config.with_streaming(true);
    }
    Ok(config)
}

async fn run(cli: Cli, config: QuillConfig) -> anyhow::Result<()> {
    info!("Starting Quillstream");
    let runtime = Handle::current();

    let client = config
        .model_settings()
        .map(|settings| client_for(settings, HttpTransport::new(runtime.clone()), config.stream));
    match &client {
        Some(client) => info!("Language model: {}", client.language_model()),
        None => info!("No language model configured"),
    }

    let patterns = decode_patterns(config.patterns.as_deref())?;
    debug!("Loaded {} trigger patterns", patterns.len());

    let surface = Arc::new(BufferSurface::new());
    let (ui, mut main_tasks) = ConsoleUi::new();
    let ui = Arc::new(ui);
    let manager = Arc::new(ResponseManager::start(
        client,
        surface.clone(),
        ui.clone(),
        config.surface_texts(),
        config.worker_threads,
        &runtime,
    ));
    let registry = Arc::new(CommandRegistry::with_inline_ask_prefix(
        &config.inline_ask_prefix,
        config.user_commands()?,
    ));
    let dispatcher = Arc::new(
        Dispatcher::new(manager.clone(), registry, surface.clone(), ui)
            .with_search_engine(config.search_engine)
            .with_patterns(patterns),
    );

    let (changes, changes_rx) = mpsc::channel::<ConfigChange>(16);
    let listener = tokio::spawn(dispatcher.clone().listen(changes_rx));

    let session = Session {
        surface,
        manager: manager.clone(),
        dispatcher,
        changes,
    };

    // Spawn blocking thread to read from stdin
    let (line_tx, mut lines) = mpsc::channel::<String>(32);
    std::thread::spawn(move || {
        let stdin = io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if line_tx.blocking_send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    eprintln!("Error reading stdin: {}", e);
                    break;
                }
            }
        }
    });

    let mut running = true;
    if !cli.prompt.is_empty() {
        running = session.handle_line(&cli.prompt.join(" ")).await?;
    }

    while running {
        tokio::select! {
            line = lines.recv() => match line {
                Some(line) => running = session.handle_line(&line).await?,
                None => running = false,
            },
            Some(task) = main_tasks.recv() => task(),
        }
    }

    while let Ok(task) = main_tasks.try_recv() {
        task();
    }

    let outcome = manager.shutdown(config.shutdown_grace()).await;
    info!("Shut down ({:?})", outcome);
    drop(session);
    let _ = listener.await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use quillstream::config::PatternKind;

    #[test]
    fn test_parse_repl_commands() {
        assert_eq!(ReplCommand::parse(":q"), Some(ReplCommand::Quit));
        assert_eq!(
            ReplCommand::parse(":engine brave"),
            Some(ReplCommand::Engine("brave".to_string()))
        );
        assert_eq!(
            ReplCommand::parse(":commands [] "),
            Some(ReplCommand::Commands("[]".to_string()))
        );
        assert_eq!(ReplCommand::parse(":nope"), None);
        assert_eq!(ReplCommand::parse("/tr hi"), None);
    }

    #[test]
    fn test_caret_marks_the_cursor_column() {
        let surface = BufferSurface::with_text("a你");
        surface.type_text("draft");
        assert_eq!(caret_line(&surface), Some("   ^".to_string()));

        let multi_line = BufferSurface::with_text("one\ntwo");
        assert_eq!(caret_line(&multi_line), None);
    }

    #[test]
    fn test_describe_pattern_flags_invalid_regex() {
        let valid = ParsePattern::new(PatternKind::FormatBold, "#bold (.+)");
        assert_eq!(describe_pattern(&valid), "FormatBold       #bold (.+)");

        let invalid = ParsePattern::new(PatternKind::WebSearch, "(unclosed");
        assert!(describe_pattern(&invalid).ends_with("(unclosed (invalid regex)"));
    }

    #[test]
    fn test_cli_parses_trailing_prompt() {
        let cli = Cli::parse_from(["quillstream", "-m", "groq", "--stream", "/tr", "hello"]);
        assert_eq!(cli.model.as_deref(), Some("groq"));
        assert!(cli.stream);
        assert_eq!(cli.prompt, vec!["/tr".to_string(), "hello".to_string()]);
    }

    #[tokio::test]
    async fn test_cli_flags_override_config() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let cli = Cli::parse_from([
            "quillstream",
            "--config",
            path.to_str().unwrap(),
            "--model",
            "chatgpt",
            "--api-key",
            "sk-test",
        ]);

        let config = load_config(&cli).await.unwrap();
        assert_eq!(config.model, Some(LanguageModel::ChatGpt));
        assert_eq!(config.model_settings().unwrap().api_key(), Some("sk-test"));
    }
}
