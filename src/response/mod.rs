//! Text surface, response consumer and the manager tying them to requests

pub mod consumer;
pub mod manager;
pub mod surface;

pub use consumer::{
    ResponseConsumer, ResponsePhase, ResponseStatus, SurfaceTexts, TextActionMode,
    DEFAULT_ERROR_FORMAT, DEFAULT_PLACEHOLDER, DEFAULT_UNKNOWN_ERROR,
};
pub use manager::ResponseManager;
pub use surface::{BufferSurface, TextSurface};
