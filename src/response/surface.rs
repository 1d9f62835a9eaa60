//! Text surface the response is written into

use std::sync::Mutex;
use tracing::debug;
use unicode_width::UnicodeWidthStr;

/// Editable target of a response.
///
/// While the input lock is held the surface must refuse user edits; only
/// the response consumer writes to it.
pub trait TextSurface: Send + Sync {
    /// Finish any pending composition so later edits see committed text
    fn flush(&self);
    /// Insert `text` at the cursor
    fn commit(&self, text: &str);
    /// Delete `count` characters before the cursor
    fn delete(&self, count: usize);
    fn start_input_lock(&self);
    fn end_input_lock(&self);
    /// Resume reporting user input to intent detection
    fn start_notify_input(&self);
    fn stop_notify_input(&self);
}

/// In-memory [`TextSurface`] with a composing region for user keystrokes.
///
/// Cursor positions are character indices, not byte indices.
#[derive(Debug, Default)]
pub struct BufferSurface {
    state: Mutex<BufferState>,
}

#[derive(Debug)]
struct BufferState {
    text: String,
    cursor: usize,
    composing: String,
    locked: bool,
    notifying: bool,
    rejected: usize,
}

impl Default for BufferState {
    fn default() -> Self {
        Self {
            text: String::new(),
            cursor: 0,
            composing: String::new(),
            locked: false,
            notifying: true,
            rejected: 0,
        }
    }
}

impl BufferState {
    fn char_to_byte_index(&self, char_idx: usize) -> usize {
        self.text
            .char_indices()
            .nth(char_idx)
            .map(|(byte_idx, _)| byte_idx)
            .unwrap_or(self.text.len())
    }

    fn insert_str(&mut self, s: &str) {
        let byte_idx = self.char_to_byte_index(self.cursor);
        self.text.insert_str(byte_idx, s);
        self.cursor += s.chars().count();
    }

    fn remove_before_cursor(&mut self, count: usize) {
        let count = count.min(self.cursor);
        if count == 0 {
            return;
        }
        let start = self.char_to_byte_index(self.cursor - count);
        let end = self.char_to_byte_index(self.cursor);
        self.text.replace_range(start..end, "");
        self.cursor -= count;
    }

    fn flush(&mut self) {
        if !self.composing.is_empty() {
            let composing = std::mem::take(&mut self.composing);
            self.insert_str(&composing);
        }
    }
}

impl BufferSurface {
    pub fn new() -> Self {
        Self::default()
    }

    /// Surface pre-filled with committed text, cursor at the end
    pub fn with_text(text: &str) -> Self {
        let surface = Self::default();
        surface.lock().insert_str(text);
        surface
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BufferState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// User keystrokes; refused while the input lock is held
    pub fn type_text(&self, text: &str) -> bool {
        let mut state = self.lock();
        if state.locked {
            state.rejected += 1;
            debug!("Input locked, rejecting keystrokes");
            return false;
        }
        state.composing.push_str(text);
        true
    }

    /// User backspace; refused while the input lock is held
    pub fn backspace(&self) -> bool {
        let mut state = self.lock();
        if state.locked {
            state.rejected += 1;
            return false;
        }
        if state.composing.pop().is_none() {
            state.remove_before_cursor(1);
        }
        true
    }

    /// Committed text
    pub fn text(&self) -> String {
        self.lock().text.clone()
    }

    /// Committed text followed by the composing region
    pub fn display_text(&self) -> String {
        let state = self.lock();
        format!("{}{}", state.text, state.composing)
    }

    /// Take the committed text and reset the surface
    pub fn take_text(&self) -> String {
        let mut state = self.lock();
        state.cursor = 0;
        std::mem::take(&mut state.text)
    }

    pub fn cursor(&self) -> usize {
        self.lock().cursor
    }

    /// Terminal columns occupied by the committed text before the cursor
    pub fn cursor_display_width(&self) -> usize {
        let state = self.lock();
        let byte_idx = state.char_to_byte_index(state.cursor);
        UnicodeWidthStr::width(&state.text[..byte_idx])
    }

    pub fn is_locked(&self) -> bool {
        self.lock().locked
    }

    pub fn is_notifying(&self) -> bool {
        self.lock().notifying
    }

    /// User edits refused so far
    pub fn rejected_edits(&self) -> usize {
        self.lock().rejected
    }
}

impl TextSurface for BufferSurface {
    fn flush(&self) {
        self.lock().flush();
    }

    fn commit(&self, text: &str) {
        self.lock().insert_str(text);
    }

    fn delete(&self, count: usize) {
        self.lock().remove_before_cursor(count);
    }

    fn start_input_lock(&self) {
        self.lock().locked = true;
    }

    fn end_input_lock(&self) {
        self.lock().locked = false;
    }

    fn start_notify_input(&self) {
        self.lock().notifying = true;
    }

    fn stop_notify_input(&self) {
        self.lock().notifying = false;
    }
}
