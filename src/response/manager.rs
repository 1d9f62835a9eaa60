//! Response manager: queues AI requests and owns the consumer task

use super::consumer::{ResponseConsumer, ResponseStatus, SurfaceTexts, TextActionMode};
use super::surface::TextSurface;
use crate::dispatcher::AiRequester;
use crate::llm::{AiController, LanguageModelClient};
use crate::ui::UiHooks;
use crate::worker::{ShutdownOutcome, WorkerPool};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub struct ResponseManager {
    controller: Arc<AiController>,
    pool: WorkerPool,
    ui: Arc<dyn UiHooks>,
    text_action: Arc<Mutex<TextActionMode>>,
    status: watch::Receiver<ResponseStatus>,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl ResponseManager {
    /// Wire controller, consumer task and a pool of `workers` threads on
    /// `runtime`.
    pub fn start(
        client: Option<Arc<dyn LanguageModelClient>>,
        surface: Arc<dyn TextSurface>,
        ui: Arc<dyn UiHooks>,
        texts: SurfaceTexts,
        workers: usize,
        runtime: &Handle,
    ) -> Self {
        let (events, events_rx) = mpsc::unbounded_channel();
        let text_action = Arc::new(Mutex::new(TextActionMode::default()));
        let (consumer, status) =
            ResponseConsumer::new(surface, ui.clone(), texts, text_action.clone());
        let consumer = runtime.spawn(consumer.run(events_rx));

        Self {
            controller: Arc::new(AiController::new(client, events)),
            pool: WorkerPool::new(workers, runtime),
            ui,
            text_action,
            status,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    pub fn controller(&self) -> &Arc<AiController> {
        &self.controller
    }

    /// Watch the consumer phase and finished-request counter
    pub fn status(&self) -> watch::Receiver<ResponseStatus> {
        self.status.clone()
    }

    /// Queue one request. Returns `false` when nothing was queued: empty
    /// prompt, no model chosen, missing key or a pool that is shut down.
    pub fn generate_response(&self, prompt: &str, system_message: Option<&str>) -> bool {
        if prompt.is_empty() {
            return false;
        }
        if self.controller.needs_model_client() {
            if !self.ui.show_choose_model_dialog() {
                debug!("Model chooser unavailable");
            }
            self.ui.toast_long("Choose and configure your language model");
            return false;
        }
        if self.controller.needs_api_key() {
            let label = self
                .controller
                .language_model()
                .map(|m| m.label())
                .unwrap_or("Language model");
            self.ui.toast_long(&format!("{label} is missing an API key"));
            return false;
        }

        let controller = self.controller.clone();
        let prompt = prompt.to_string();
        let system_message = system_message.map(str::to_string);
        match self.pool.execute(move |stop| {
            controller.generate(&prompt, system_message.as_deref(), stop)
        }) {
            Ok(()) => {
                debug!(queued = self.pool.queued(), "Request queued");
                true
            }
            Err(e) => {
                warn!("Dropping request: {}", e);
                false
            }
        }
    }

    pub fn set_text_action_mode(&self, enabled: bool, selected_text: Option<String>) {
        *self.text_action.lock().unwrap_or_else(|e| e.into_inner()) = TextActionMode {
            enabled,
            selected_text,
        };
    }

    pub fn text_action_mode(&self) -> TextActionMode {
        self.text_action
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Cancel the requests in flight; each still ends with a terminal event.
    pub fn cancel(&self) {
        info!("Cancelling active requests");
        self.controller.cancel_active();
    }

    /// Drain the pool within `grace`, force-stopping what is left, then stop
    /// the consumer once every started request has been applied.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownOutcome {
        let outcome = self.pool.shutdown(grace).await;

        let controller = self.controller.clone();
        let mut status = self.status.clone();
        let settled = tokio::time::timeout(
            grace,
            status.wait_for(|s| s.finished >= controller.started()),
        )
        .await
        .map(|settled| settled.map(|_| ()));
        match settled {
            Ok(Ok(_)) => debug!("Response consumer settled"),
            Ok(Err(_)) => warn!("Response consumer stopped before settling"),
            Err(_) => warn!(
                started = controller.started(),
                "Response consumer did not settle within {:?}", grace
            ),
        }

        let consumer = self
            .consumer
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(consumer) = consumer {
            consumer.abort();
        }
        outcome
    }
}

impl AiRequester for ResponseManager {
    fn generate_response(&self, prompt: &str, system_message: Option<&str>) -> bool {
        ResponseManager::generate_response(self, prompt, system_message)
    }

    fn set_text_action_mode(&self, enabled: bool, selected_text: Option<String>) {
        ResponseManager::set_text_action_mode(self, enabled, selected_text)
    }
}
