//! Response consumer: applies [`AiEvent`]s to the text surface
//!
//! Phases run Idle → Preparing → Streaming → Complete/Error → Idle. The
//! input lock is held from `Preparing` until the terminal event and is
//! released around every surface write.
//!
//! Requests are applied one at a time: events of a request that starts
//! while another is still open are held back until that one ends.

use super::surface::TextSurface;
use crate::llm::{AiEvent, RequestEvent};
use crate::stream::StreamError;
use crate::ui::UiHooks;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, watch};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, warn};

pub const DEFAULT_PLACEHOLDER: &str = "<Generating Content...>";
pub const DEFAULT_ERROR_FORMAT: &str = "[Error: {}]";
pub const DEFAULT_UNKNOWN_ERROR: &str = "Unknown error occurred";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResponsePhase {
    #[default]
    Idle,
    Preparing,
    Streaming,
    Complete,
    Error,
}

/// Published after every transition
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ResponseStatus {
    pub phase: ResponsePhase,
    /// Requests that reached a terminal event so far
    pub finished: u64,
}

/// Strings written into the surface by the consumer
#[derive(Debug, Clone, PartialEq)]
pub struct SurfaceTexts {
    pub placeholder: String,
    /// `{}` is replaced by the error detail
    pub error_format: String,
    pub unknown_error: String,
}

impl Default for SurfaceTexts {
    fn default() -> Self {
        Self {
            placeholder: DEFAULT_PLACEHOLDER.to_string(),
            error_format: DEFAULT_ERROR_FORMAT.to_string(),
            unknown_error: DEFAULT_UNKNOWN_ERROR.to_string(),
        }
    }
}

impl SurfaceTexts {
    pub fn format_error(&self, error: &StreamError) -> String {
        let detail = error
            .detail()
            .unwrap_or_else(|| self.unknown_error.clone());
        if self.error_format.contains("{}") {
            self.error_format.replacen("{}", &detail, 1)
        } else {
            format!("{} {}", self.error_format, detail)
        }
    }
}

/// Text-action state, cleared on every terminal event
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TextActionMode {
    pub enabled: bool,
    pub selected_text: Option<String>,
}

pub struct ResponseConsumer {
    surface: Arc<dyn TextSurface>,
    ui: Arc<dyn UiHooks>,
    texts: SurfaceTexts,
    text_action: Arc<Mutex<TextActionMode>>,
    status: watch::Sender<ResponseStatus>,
    placeholder_pending: bool,
    active: Option<u64>,
    held: VecDeque<(u64, Vec<AiEvent>)>,
}

impl ResponseConsumer {
    pub fn new(
        surface: Arc<dyn TextSurface>,
        ui: Arc<dyn UiHooks>,
        texts: SurfaceTexts,
        text_action: Arc<Mutex<TextActionMode>>,
    ) -> (Self, watch::Receiver<ResponseStatus>) {
        let (status, status_rx) = watch::channel(ResponseStatus::default());
        (
            Self {
                surface,
                ui,
                texts,
                text_action,
                status,
                placeholder_pending: false,
                active: None,
                held: VecDeque::new(),
            },
            status_rx,
        )
    }

    /// Apply events until every sender is gone
    pub async fn run(mut self, events: mpsc::UnboundedReceiver<RequestEvent>) {
        let mut events = UnboundedReceiverStream::new(events);
        while let Some(event) = events.next().await {
            self.accept(event);
        }
        if !self.held.is_empty() {
            warn!("{} requests never reached the surface", self.held.len());
        }
        debug!("Response consumer stopped");
    }

    /// Apply a tagged event, or hold it while another request is open
    pub fn accept(&mut self, tagged: RequestEvent) {
        let RequestEvent { request, event } = tagged;
        match self.active {
            Some(active) if active != request => {
                match self.held.iter_mut().find(|(id, _)| *id == request) {
                    Some((_, events)) => events.push(event),
                    None => {
                        debug!(request, active, "Holding back overlapping request");
                        self.held.push_back((request, vec![event]));
                    }
                }
                return;
            }
            Some(_) => {}
            None => self.active = Some(request),
        }

        if self.apply(event) {
            self.resume_held();
        }
    }

    /// Returns `true` when the event ended the active request.
    fn apply(&mut self, event: AiEvent) -> bool {
        let terminal = event.is_terminal();
        self.handle(event);
        if terminal {
            self.active = None;
        }
        terminal
    }

    /// Replay held requests in arrival order until one is still open
    fn resume_held(&mut self) {
        while self.active.is_none() {
            let Some((request, events)) = self.held.pop_front() else {
                return;
            };
            self.active = Some(request);
            for event in events {
                if self.apply(event) {
                    break;
                }
            }
        }
    }

    pub fn handle(&mut self, event: AiEvent) {
        match event {
            AiEvent::Preparing => self.on_prepare(),
            AiEvent::Chunk(chunk) => self.on_next(&chunk),
            AiEvent::Failed(error) => self.on_error(&error),
            AiEvent::Completed => self.on_complete(),
        }
    }

    pub fn phase(&self) -> ResponsePhase {
        self.status.borrow().phase
    }

    fn set_phase(&self, phase: ResponsePhase) {
        self.status.send_modify(|s| s.phase = phase);
    }

    fn finish(&self, phase: ResponsePhase) {
        self.set_phase(phase);
        self.status.send_modify(|s| {
            s.phase = ResponsePhase::Idle;
            s.finished += 1;
        });
    }

    fn on_prepare(&mut self) {
        if self.phase() != ResponsePhase::Idle {
            warn!("New request while the previous one is {:?}", self.phase());
        }
        self.ui.on_ai_prepare();
        self.surface.flush();
        self.surface.commit(&self.texts.placeholder);
        self.surface.stop_notify_input();
        self.surface.start_input_lock();
        self.placeholder_pending = true;
        self.set_phase(ResponsePhase::Preparing);
    }

    /// Remove the placeholder once per request, never before `Preparing`
    fn clear_placeholder(&mut self) {
        if !self.placeholder_pending {
            return;
        }
        self.placeholder_pending = false;
        self.surface.flush();
        self.surface
            .delete(self.texts.placeholder.chars().count());
    }

    fn on_next(&mut self, chunk: &str) {
        self.surface.end_input_lock();
        self.clear_placeholder();
        self.surface.flush();
        self.surface.commit(chunk);
        self.surface.start_input_lock();
        self.set_phase(ResponsePhase::Streaming);
    }

    fn on_error(&mut self, error: &StreamError) {
        self.surface.end_input_lock();
        self.clear_placeholder();
        self.surface.flush();
        self.surface.commit(&self.texts.format_error(error));
        self.surface.start_notify_input();
        self.reset_text_action();
        self.finish(ResponsePhase::Error);
    }

    fn on_complete(&mut self) {
        self.surface.end_input_lock();
        self.clear_placeholder();
        self.surface.start_notify_input();
        self.reset_text_action();
        self.finish(ResponsePhase::Complete);
    }

    fn reset_text_action(&self) {
        *self.text_action.lock().unwrap_or_else(|e| e.into_inner()) = TextActionMode::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::response::surface::BufferSurface;
    use crate::ui::tests::RecordingUi;
    use pretty_assertions::assert_eq;

    /// Surface recording every call, backed by a real buffer
    #[derive(Default)]
    struct TracingSurface {
        buffer: BufferSurface,
        calls: Mutex<Vec<String>>,
    }

    impl TracingSurface {
        fn record(&self, call: impl Into<String>) {
            self.calls.lock().unwrap().push(call.into());
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl TextSurface for TracingSurface {
        fn flush(&self) {
            self.record("flush");
            self.buffer.flush();
        }
        fn commit(&self, text: &str) {
            self.record(format!("commit {text}"));
            self.buffer.commit(text);
        }
        fn delete(&self, count: usize) {
            self.record(format!("delete {count}"));
            self.buffer.delete(count);
        }
        fn start_input_lock(&self) {
            self.record("lock");
            self.buffer.start_input_lock();
        }
        fn end_input_lock(&self) {
            self.record("unlock");
            self.buffer.end_input_lock();
        }
        fn start_notify_input(&self) {
            self.record("notify");
            self.buffer.start_notify_input();
        }
        fn stop_notify_input(&self) {
            self.record("mute");
            self.buffer.stop_notify_input();
        }
    }

    fn consumer(
        surface: Arc<TracingSurface>,
    ) -> (ResponseConsumer, watch::Receiver<ResponseStatus>, Arc<Mutex<TextActionMode>>) {
        let mode = Arc::new(Mutex::new(TextActionMode::default()));
        let (consumer, status) = ResponseConsumer::new(
            surface,
            RecordingUi::new(),
            SurfaceTexts::default(),
            mode.clone(),
        );
        (consumer, status, mode)
    }

    #[test]
    fn test_streamed_response_replaces_placeholder() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, status, _) = consumer(surface.clone());

        consumer.handle(AiEvent::Preparing);
        assert_eq!(surface.buffer.text(), DEFAULT_PLACEHOLDER);
        assert!(surface.buffer.is_locked());
        assert!(!surface.buffer.is_notifying());

        consumer.handle(AiEvent::Chunk("Bon".to_string()));
        consumer.handle(AiEvent::Chunk("jour".to_string()));
        assert!(surface.buffer.is_locked());
        consumer.handle(AiEvent::Completed);

        assert_eq!(surface.buffer.text(), "Bonjour");
        assert!(!surface.buffer.is_locked());
        assert!(surface.buffer.is_notifying());
        assert_eq!(
            *status.borrow(),
            ResponseStatus {
                phase: ResponsePhase::Idle,
                finished: 1
            }
        );
    }

    #[test]
    fn test_surface_call_order() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, _, _) = consumer(surface.clone());

        consumer.handle(AiEvent::Preparing);
        consumer.handle(AiEvent::Chunk("a".to_string()));
        consumer.handle(AiEvent::Chunk("b".to_string()));
        consumer.handle(AiEvent::Completed);

        let placeholder = format!("commit {DEFAULT_PLACEHOLDER}");
        let delete = format!("delete {}", DEFAULT_PLACEHOLDER.chars().count());
        assert_eq!(
            surface.calls(),
            vec![
                "flush",
                placeholder.as_str(),
                "mute",
                "lock",
                "unlock",
                "flush",
                delete.as_str(),
                "flush",
                "commit a",
                "lock",
                "unlock",
                "flush",
                "commit b",
                "lock",
                "unlock",
                "notify",
            ]
        );
    }

    fn tagged(request: u64, event: AiEvent) -> RequestEvent {
        RequestEvent { request, event }
    }

    #[test]
    fn test_overlapping_requests_are_applied_in_turn() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, status, _) = consumer(surface.clone());

        consumer.accept(tagged(0, AiEvent::Preparing));
        consumer.accept(tagged(1, AiEvent::Preparing));
        consumer.accept(tagged(1, AiEvent::Chunk("[two]".to_string())));
        consumer.accept(tagged(0, AiEvent::Chunk("[one]".to_string())));
        assert_eq!(surface.buffer.text(), "[one]");
        assert!(surface.buffer.is_locked());

        consumer.accept(tagged(1, AiEvent::Completed));
        consumer.accept(tagged(0, AiEvent::Completed));

        assert_eq!(surface.buffer.text(), "[one][two]");
        assert!(!surface.buffer.is_locked());
        assert!(surface.buffer.is_notifying());
        assert_eq!(status.borrow().finished, 2);
    }

    #[test]
    fn test_held_request_resumes_after_failure() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, status, _) = consumer(surface.clone());

        consumer.accept(tagged(3, AiEvent::Preparing));
        consumer.accept(tagged(4, AiEvent::Preparing));
        consumer.accept(tagged(3, AiEvent::Failed(StreamError::Cancelled)));
        assert!(surface.buffer.is_locked());
        assert!(surface.buffer.text().ends_with(DEFAULT_PLACEHOLDER));

        consumer.accept(tagged(4, AiEvent::Chunk("ok".to_string())));
        consumer.accept(tagged(4, AiEvent::Completed));

        let error = SurfaceTexts::default().format_error(&StreamError::Cancelled);
        assert_eq!(surface.buffer.text(), format!("{error}ok"));
        assert!(!surface.buffer.is_locked());
        assert_eq!(status.borrow().finished, 2);
    }

    #[test]
    fn test_error_commits_template_and_unlocks() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, status, mode) = consumer(surface.clone());
        *mode.lock().unwrap() = TextActionMode {
            enabled: true,
            selected_text: Some("draft".to_string()),
        };

        consumer.handle(AiEvent::Preparing);
        consumer.handle(AiEvent::Failed(StreamError::transport(
            Some(404),
            "API error 404: not found",
        )));

        assert_eq!(surface.buffer.text(), "[Error: API error 404: not found]");
        assert!(!surface.buffer.is_locked());
        assert!(surface.buffer.is_notifying());
        assert_eq!(*mode.lock().unwrap(), TextActionMode::default());
        assert_eq!(status.borrow().finished, 1);
    }

    #[test]
    fn test_error_without_detail_uses_fallback() {
        let surface = Arc::new(TracingSurface::default());
        let (mut consumer, _, _) = consumer(surface.clone());

        consumer.handle(AiEvent::Preparing);
        consumer.handle(AiEvent::Failed(StreamError::Io(String::new())));
        assert_eq!(surface.buffer.text(), "[Error: Unknown error occurred]");
    }

    #[test]
    fn test_chunk_without_prepare_keeps_existing_text() {
        let surface = Arc::new(TracingSurface::default());
        surface.buffer.commit("typed ");
        let (mut consumer, _, _) = consumer(surface.clone());

        consumer.handle(AiEvent::Chunk("x".to_string()));
        consumer.handle(AiEvent::Completed);
        assert_eq!(surface.buffer.text(), "typed x");
    }

    #[test]
    fn test_custom_error_format_without_slot() {
        let texts = SurfaceTexts {
            error_format: "Oops:".to_string(),
            ..Default::default()
        };
        assert_eq!(
            texts.format_error(&StreamError::Decode("bad json".to_string())),
            "Oops: bad json"
        );
    }
}
