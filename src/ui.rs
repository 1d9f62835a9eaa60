//! UI hooks invoked by the dispatcher and the response pipeline

use std::io::{self, Write};
use std::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Work posted to the main (UI) context
pub type MainTask = Box<dyn FnOnce() + Send>;

/// Host UI surface: dialogs, toasts, app launching and the main context
pub trait UiHooks: Send + Sync {
    fn show_edit_commands(&self);
    fn show_settings(&self);
    fn show_web_search(&self, title: &str, url: &str);
    /// Ask the user to pick and configure a model. Returns whether a
    /// dialog could be shown.
    fn show_choose_model_dialog(&self) -> bool;
    fn toast_short(&self, message: &str);
    fn toast_long(&self, message: &str);
    /// Returns `false` when the app could not be started
    fn launch_app(&self, package: &str, activity: &str) -> bool;
    /// Run `task` on the main context
    fn post(&self, task: MainTask);
    /// Called right before the placeholder is written
    fn on_ai_prepare(&self) {}
}

/// Terminal implementation; posted tasks are drained by the REPL loop.
pub struct ConsoleUi {
    main: mpsc::UnboundedSender<MainTask>,
}

impl ConsoleUi {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<MainTask>) {
        let (main, rx) = mpsc::unbounded_channel();
        (Self { main }, rx)
    }

    fn print(&self, line: &str) {
        let mut stdout = io::stdout().lock();
        let _ = writeln!(stdout, "{line}");
        let _ = stdout.flush();
    }
}

impl UiHooks for ConsoleUi {
    fn show_edit_commands(&self) {
        self.print("Commands can be edited with :commands <json>, e.g. [{\"prefix\":\"tr\",\"message\":\"Translate to French\"}]");
    }

    fn show_settings(&self) {
        self.print("Settings: :engine <name> sets the search engine, :ask <prefix> sets the inline ask prefix");
    }

    fn show_web_search(&self, title: &str, url: &str) {
        self.print(&format!("{title}: {url}"));
    }

    fn show_choose_model_dialog(&self) -> bool {
        self.print("Pick a model with --model <name> or set `model` in the config file");
        true
    }

    fn toast_short(&self, message: &str) {
        self.print(&format!("! {message}"));
    }

    fn toast_long(&self, message: &str) {
        self.print(&format!("! {message}"));
    }

    fn launch_app(&self, package: &str, activity: &str) -> bool {
        let mut command = Command::new(package);
        if !activity.is_empty() {
            command.arg(activity);
        }
        match command.spawn() {
            Ok(mut child) => {
                debug!(pid = child.id(), "Launched {}", package);
                std::thread::spawn(move || {
                    let _ = child.wait();
                });
                true
            }
            Err(e) => {
                warn!("Could not launch {}: {}", package, e);
                false
            }
        }
    }

    fn post(&self, task: MainTask) {
        if self.main.send(task).is_err() {
            warn!("Main context is gone, dropping posted task");
        }
    }

    fn on_ai_prepare(&self) {
        debug!("Preparing AI response");
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    /// Records every hook call; posted tasks run inline
    #[derive(Default)]
    pub struct RecordingUi {
        pub calls: Mutex<Vec<String>>,
        pub launch_succeeds: bool,
        pub dialog_available: bool,
    }

    impl RecordingUi {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                dialog_available: true,
                ..Default::default()
            })
        }

        pub fn with_launch(succeeds: bool) -> Arc<Self> {
            Arc::new(Self {
                launch_succeeds: succeeds,
                dialog_available: true,
                ..Default::default()
            })
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn record(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }
    }

    impl UiHooks for RecordingUi {
        fn show_edit_commands(&self) {
            self.record("edit_commands".to_string());
        }
        fn show_settings(&self) {
            self.record("settings".to_string());
        }
        fn show_web_search(&self, title: &str, url: &str) {
            self.record(format!("web_search {title} {url}"));
        }
        fn show_choose_model_dialog(&self) -> bool {
            self.record("choose_model".to_string());
            self.dialog_available
        }
        fn toast_short(&self, message: &str) {
            self.record(format!("toast {message}"));
        }
        fn toast_long(&self, message: &str) {
            self.record(format!("toast_long {message}"));
        }
        fn launch_app(&self, package: &str, activity: &str) -> bool {
            self.record(format!("launch {package}/{activity}"));
            self.launch_succeeds
        }
        fn post(&self, task: MainTask) {
            self.record("post".to_string());
            task();
        }
    }

    #[tokio::test]
    async fn test_console_ui_posts_to_main_queue() {
        let (ui, mut main) = ConsoleUi::new();
        let (tx, rx) = std::sync::mpsc::channel();
        ui.post(Box::new(move || tx.send(7).unwrap()));

        let task = main.recv().await.unwrap();
        task();
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
