//! Language model access
//!
//! - `model`: provider catalogue and resolved request settings
//! - `client`: provider request builders and response decoders
//! - `transport`: reqwest plumbing into the stream producers
//! - `controller`: request lifecycle as [`AiEvent`]s

pub mod client;
pub mod controller;
pub mod model;
pub mod transport;

pub use client::{client_for, LanguageModelClient, DEFAULT_SYSTEM_MESSAGE};
pub use controller::{AiController, AiEvent, RequestEvent};
pub use model::{LanguageModel, ModelOverrides, ModelSettings};
pub use transport::HttpTransport;
