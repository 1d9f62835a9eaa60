//! Request controller: turns one prompt into a sequence of [`AiEvent`]s

use super::client::LanguageModelClient;
use super::model::LanguageModel;
use crate::stream::{Publisher, StreamError, Subscriber, Subscription};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Lifecycle of one request, as seen by the response consumer
#[derive(Debug, Clone, PartialEq)]
pub enum AiEvent {
    Preparing,
    Chunk(String),
    Failed(StreamError),
    Completed,
}

impl AiEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, AiEvent::Failed(_) | AiEvent::Completed)
    }
}

/// An [`AiEvent`] tagged with the request it belongs to
#[derive(Debug, Clone, PartialEq)]
pub struct RequestEvent {
    pub request: u64,
    pub event: AiEvent,
}

/// Owns the active model client and forwards request lifecycles to the
/// response consumer.
pub struct AiController {
    client: RwLock<Option<Arc<dyn LanguageModelClient>>>,
    events: mpsc::UnboundedSender<RequestEvent>,
    scope: Mutex<CancellationToken>,
    started: AtomicU64,
}

impl AiController {
    pub fn new(
        client: Option<Arc<dyn LanguageModelClient>>,
        events: mpsc::UnboundedSender<RequestEvent>,
    ) -> Self {
        Self {
            client: RwLock::new(client),
            events,
            scope: Mutex::new(CancellationToken::new()),
            started: AtomicU64::new(0),
        }
    }

    pub fn client(&self) -> Option<Arc<dyn LanguageModelClient>> {
        self.client
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Swap the model client; requests already running keep the old one.
    pub fn set_client(&self, client: Option<Arc<dyn LanguageModelClient>>) {
        if let Some(c) = &client {
            info!("Using language model {}", c.language_model());
        }
        *self.client.write().unwrap_or_else(|e| e.into_inner()) = client;
    }

    pub fn language_model(&self) -> Option<LanguageModel> {
        self.client().map(|c| c.language_model())
    }

    pub fn needs_model_client(&self) -> bool {
        self.client().is_none()
    }

    pub fn needs_api_key(&self) -> bool {
        self.client().map_or(true, |c| c.api_key().is_none())
    }

    /// Requests that have sent `Preparing`; each one ends with exactly one
    /// terminal event.
    pub fn started(&self) -> u64 {
        self.started.load(Ordering::Acquire)
    }

    /// Cancel every request currently in flight
    pub fn cancel_active(&self) {
        let mut scope = self.scope.lock().unwrap_or_else(|e| e.into_inner());
        scope.cancel();
        *scope = CancellationToken::new();
    }

    /// Run one request to its terminal event on the calling thread.
    ///
    /// Must be called from a blocking-capable thread. `shutdown` aborts the
    /// request when the worker pool is force-stopped.
    pub fn generate(
        &self,
        prompt: &str,
        system_message: Option<&str>,
        shutdown: &CancellationToken,
    ) {
        if prompt.is_empty() {
            return;
        }
        let Some(client) = self.client() else {
            warn!("No language model configured, dropping request");
            return;
        };
        info!(
            model = %client.language_model(),
            "Getting response for prompt ({} chars)",
            prompt.chars().count()
        );

        let request = self.started.fetch_add(1, Ordering::AcqRel);
        let subscriber = Arc::new(EventForwarder::new(request, self.events.clone()));
        subscriber.send(AiEvent::Preparing);
        let publisher = client.submit_prompt(prompt, system_message);

        let scope = self
            .scope
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .child_token();
        match Handle::try_current() {
            Ok(runtime) => {
                let forwarder = subscriber.clone();
                let shutdown = shutdown.clone();
                runtime.spawn(async move {
                    tokio::select! {
                        _ = forwarder.finished.cancelled() => {}
                        _ = shutdown.cancelled() => forwarder.abort(),
                        _ = scope.cancelled() => forwarder.abort(),
                    }
                });
            }
            Err(_) => debug!("No runtime for the cancellation watcher"),
        }

        publisher.subscribe(subscriber.clone());
        futures::executor::block_on(subscriber.finished.cancelled());
    }
}

/// Subscriber forwarding signals as [`AiEvent`]s.
///
/// Skips empty chunks and reports only the first terminal signal.
struct EventForwarder {
    request: u64,
    events: mpsc::UnboundedSender<RequestEvent>,
    subscription: Mutex<Option<Arc<dyn Subscription>>>,
    terminated: AtomicBool,
    finished: CancellationToken,
}

impl EventForwarder {
    fn new(request: u64, events: mpsc::UnboundedSender<RequestEvent>) -> Self {
        Self {
            request,
            events,
            subscription: Mutex::new(None),
            terminated: AtomicBool::new(false),
            finished: CancellationToken::new(),
        }
    }

    fn send(&self, event: AiEvent) {
        let tagged = RequestEvent {
            request: self.request,
            event,
        };
        if self.events.send(tagged).is_err() {
            debug!(request = self.request, "Response consumer is gone");
        }
    }

    fn terminate(&self, event: AiEvent) {
        if self.terminated.swap(true, Ordering::AcqRel) {
            debug!("Skipping duplicate terminal signal {:?}", event);
            return;
        }
        self.send(event);
        self.finished.cancel();
    }

    /// Cancel upstream and report the request as cancelled so the consumer
    /// still sees a terminal event.
    fn abort(&self) {
        let subscription = self
            .subscription
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(subscription) = subscription {
            subscription.cancel();
        }
        self.terminate(AiEvent::Failed(StreamError::Cancelled));
    }
}

impl Subscriber for EventForwarder {
    fn on_subscribe(&self, subscription: Arc<dyn Subscription>) {
        *self.subscription.lock().unwrap_or_else(|e| e.into_inner()) = Some(subscription.clone());
        subscription.request(i64::MAX);
    }

    fn on_next(&self, item: String) {
        if item.is_empty() {
            return;
        }
        self.send(AiEvent::Chunk(item));
    }

    fn on_error(&self, error: StreamError) {
        error!("Request failed: {}", error);
        self.terminate(AiEvent::Failed(error));
    }

    fn on_complete(&self) {
        debug!("Request completed");
        self.terminate(AiEvent::Completed);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::llm::model::ModelSettings;
    use crate::stream::{FailureProducer, ValueProducer};
    use pretty_assertions::assert_eq;

    enum Script {
        Answer(String),
        /// Answers `[prompt]`
        Echo,
        Fail(StreamError),
    }

    /// Client giving the same scripted answer to every prompt
    pub struct ScriptedClient {
        settings: ModelSettings,
        script: Script,
        pub prompts: Mutex<Vec<(String, Option<String>)>>,
    }

    impl ScriptedClient {
        fn new(settings: ModelSettings, script: Script) -> Arc<Self> {
            Arc::new(Self {
                settings,
                script,
                prompts: Mutex::new(Vec::new()),
            })
        }

        pub fn answering(text: &str) -> Arc<Self> {
            Self::new(
                ModelSettings::defaults(LanguageModel::ChatGpt).with_api_key("test"),
                Script::Answer(text.to_string()),
            )
        }

        pub fn echoing() -> Arc<Self> {
            Self::new(
                ModelSettings::defaults(LanguageModel::ChatGpt).with_api_key("test"),
                Script::Echo,
            )
        }

        pub fn failing(error: StreamError) -> Arc<Self> {
            Self::new(
                ModelSettings::defaults(LanguageModel::ChatGpt).with_api_key("test"),
                Script::Fail(error),
            )
        }

        pub fn without_key() -> Arc<Self> {
            Self::new(
                ModelSettings::defaults(LanguageModel::Mistral),
                Script::Answer("unused".to_string()),
            )
        }
    }

    impl LanguageModelClient for ScriptedClient {
        fn settings(&self) -> &ModelSettings {
            &self.settings
        }

        fn submit_prompt(&self, prompt: &str, system_message: Option<&str>) -> Arc<dyn Publisher> {
            self.prompts
                .lock()
                .unwrap()
                .push((prompt.to_string(), system_message.map(str::to_string)));
            match &self.script {
                Script::Answer(text) => Arc::new(ValueProducer::new(text.clone())),
                Script::Echo => Arc::new(ValueProducer::new(format!("[{prompt}]"))),
                Script::Fail(error) => Arc::new(FailureProducer::new(error.clone())),
            }
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<RequestEvent>) -> Vec<AiEvent> {
        let mut events = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            events.push(tagged.event);
        }
        events
    }

    #[test]
    fn test_generate_forwards_value_as_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = AiController::new(Some(ScriptedClient::answering("Bonjour")), tx);

        controller.generate("hello", Some("Translate"), &CancellationToken::new());
        assert_eq!(
            drain(&mut rx),
            vec![
                AiEvent::Preparing,
                AiEvent::Chunk("Bonjour".to_string()),
                AiEvent::Completed
            ]
        );
    }

    #[test]
    fn test_generate_skips_empty_chunks() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = AiController::new(Some(ScriptedClient::answering("")), tx);

        controller.generate("hello", None, &CancellationToken::new());
        assert_eq!(drain(&mut rx), vec![AiEvent::Preparing, AiEvent::Completed]);
    }

    #[test]
    fn test_generate_reports_failure_once() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let error = StreamError::transport(Some(500), "API error 500");
        let controller = AiController::new(Some(ScriptedClient::failing(error.clone())), tx);

        controller.generate("hello", None, &CancellationToken::new());
        assert_eq!(
            drain(&mut rx),
            vec![AiEvent::Preparing, AiEvent::Failed(error)]
        );
    }

    #[test]
    fn test_empty_prompt_is_ignored() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = AiController::new(Some(ScriptedClient::answering("x")), tx);

        controller.generate("", None, &CancellationToken::new());
        assert!(drain(&mut rx).is_empty());
        assert_eq!(controller.started(), 0);
    }

    #[test]
    fn test_each_request_gets_its_own_tag() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let controller = AiController::new(Some(ScriptedClient::answering("x")), tx);

        controller.generate("one", None, &CancellationToken::new());
        controller.generate("two", None, &CancellationToken::new());
        assert_eq!(controller.started(), 2);

        let mut tags = Vec::new();
        while let Ok(tagged) = rx.try_recv() {
            tags.push((tagged.request, tagged.event.is_terminal()));
        }
        assert_eq!(
            tags,
            vec![
                (0, false),
                (0, false),
                (0, true),
                (1, false),
                (1, false),
                (1, true)
            ]
        );
    }

    #[test]
    fn test_needs_flags() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let controller = AiController::new(None, tx);
        assert!(controller.needs_model_client());
        assert!(controller.needs_api_key());

        controller.set_client(Some(ScriptedClient::without_key()));
        assert!(!controller.needs_model_client());
        assert!(controller.needs_api_key());
        assert_eq!(controller.language_model(), Some(LanguageModel::Mistral));

        controller.set_client(Some(ScriptedClient::answering("x")));
        assert!(!controller.needs_api_key());
    }

    #[test]
    fn test_forwarder_suppresses_duplicate_terminals() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let forwarder = EventForwarder::new(0, tx);

        forwarder.on_complete();
        forwarder.on_error(StreamError::Cancelled);
        forwarder.on_complete();
        assert_eq!(drain(&mut rx), vec![AiEvent::Completed]);
        assert!(forwarder.finished.is_cancelled());
    }
}
