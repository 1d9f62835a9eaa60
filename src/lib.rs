//! Quillstream - AI completions streamed into a text surface
//!
//! Parsed intents are routed by the [`Dispatcher`]; AI intents become a
//! network request whose response is streamed chunk by chunk into a
//! [`TextSurface`] while the surface is locked against other edits.
//! - `stream`: the publisher/subscriber contract and its producers
//! - `llm`: model clients, HTTP transport and the request controller
//! - `response`: the consumer state machine that owns the text surface

pub mod commands;
pub mod config;
pub mod dispatcher;
pub mod intent;
pub mod llm;
pub mod response;
pub mod stream;
pub mod transform;
pub mod ui;
pub mod worker;

pub use commands::{Command, CommandEntry, CommandRegistry};
pub use config::{ConfigChange, OtherSettings, QuillConfig};
pub use dispatcher::{AiRequester, Dispatcher, SearchEngine};
pub use intent::{Intent, TextAction};
pub use llm::{AiController, AiEvent, LanguageModel};
pub use response::{BufferSurface, ResponseManager, ResponsePhase, TextSurface};
pub use stream::{Publisher, StreamError, Subscriber, Subscription};
pub use ui::UiHooks;
pub use worker::WorkerPool;

/// Result type for Quillstream operations
pub type Result<T> = std::result::Result<T, QuillError>;

/// Errors that can occur in Quillstream
#[derive(Debug, thiserror::Error)]
pub enum QuillError {
    #[error("Malformed configuration: {0}")]
    MalformedConfig(String),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Worker pool is shut down: {0}")]
    Shutdown(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}
