// src/editor.rs

//! Borrowed editor-side state.
//!
//! The platform layer does not own an editing model; it borrows just
//! enough structure to have something to deliver input to, invoke
//! listeners against, and let scripts poke at: buffers of lines, windows
//! with a cursor, an options table, message sinks, and the textlock and
//! sandbox flags that gate reentrancy.

use log::trace;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum OptionValue {
    Number(i64),
    Str(String),
    Bool(bool),
}

#[derive(Debug)]
pub struct Buffer {
    pub id: u64,
    pub name: String,
    lines: Vec<String>,
}

impl Buffer {
    fn new(id: u64, name: &str) -> Self {
        Buffer {
            id,
            name: name.to_string(),
            lines: vec![String::new()],
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// 1-based line access.
    pub fn line(&self, lnum: usize) -> Option<&str> {
        self.lines.get(lnum.checked_sub(1)?).map(String::as_str)
    }

    pub fn set_line(&mut self, lnum: usize, text: &str) -> bool {
        match lnum.checked_sub(1).and_then(|i| self.lines.get_mut(i)) {
            Some(slot) => {
                *slot = text.to_string();
                true
            }
            None => false,
        }
    }

    pub fn append_line(&mut self, text: &str) {
        self.lines.push(text.to_string());
    }

    pub fn set_lines(&mut self, lines: Vec<String>) {
        self.lines = if lines.is_empty() { vec![String::new()] } else { lines };
    }
}

#[derive(Debug)]
pub struct Window {
    pub id: u64,
    pub buffer: u64,
    /// 1-based (line, column).
    pub cursor: (usize, usize),
    pub width: u16,
    pub height: u16,
}

#[derive(Debug, Default)]
pub struct EditorState {
    buffers: Vec<Buffer>,
    windows: Vec<Window>,
    next_buf_id: u64,
    next_win_id: u64,
    pub current_buffer: u64,
    pub current_window: u64,
    options: HashMap<String, OptionValue>,
    pub messages: Vec<String>,
    pub errors: Vec<String>,
    textlock: u32,
    pub sandbox: bool,
    beeps: u32,
    /// Listener ids queued for removal from inside a listener callback;
    /// drained by the invoking `ListenerSet`.
    pub listener_removals: Vec<u64>,
    /// Ex commands handed over for execution; the embedding editor
    /// drains this, the platform layer only queues.
    pub command_sink: Vec<String>,
}

impl EditorState {
    /// One empty buffer shown in one window, like a fresh start.
    pub fn new() -> Self {
        let mut state = EditorState::default();
        let buf = state.open_buffer("");
        let win = state.new_window(buf, 80, 24);
        state.current_buffer = buf;
        state.current_window = win;
        state
    }

    pub fn open_buffer(&mut self, name: &str) -> u64 {
        self.next_buf_id += 1;
        let id = self.next_buf_id;
        trace!("opening buffer {} ({:?})", id, name);
        self.buffers.push(Buffer::new(id, name));
        id
    }

    pub fn buffer(&self, id: u64) -> Option<&Buffer> {
        self.buffers.iter().find(|b| b.id == id)
    }

    pub fn buffer_mut(&mut self, id: u64) -> Option<&mut Buffer> {
        self.buffers.iter_mut().find(|b| b.id == id)
    }

    pub fn buffers(&self) -> impl Iterator<Item = &Buffer> {
        self.buffers.iter()
    }

    pub fn new_window(&mut self, buffer: u64, width: u16, height: u16) -> u64 {
        self.next_win_id += 1;
        let id = self.next_win_id;
        self.windows.push(Window {
            id,
            buffer,
            cursor: (1, 1),
            width,
            height,
        });
        id
    }

    pub fn window(&self, id: u64) -> Option<&Window> {
        self.windows.iter().find(|w| w.id == id)
    }

    pub fn window_mut(&mut self, id: u64) -> Option<&mut Window> {
        self.windows.iter_mut().find(|w| w.id == id)
    }

    pub fn windows(&self) -> impl Iterator<Item = &Window> {
        self.windows.iter()
    }

    pub fn set_option(&mut self, name: &str, value: OptionValue) {
        self.options.insert(name.to_string(), value);
    }

    pub fn option(&self, name: &str) -> Option<&OptionValue> {
        self.options.get(name)
    }

    pub fn message(&mut self, text: impl Into<String>) {
        self.messages.push(text.into());
    }

    pub fn error(&mut self, text: impl Into<String>) {
        self.errors.push(text.into());
    }

    pub fn beep(&mut self) {
        self.beeps += 1;
    }

    pub fn beep_count(&self) -> u32 {
        self.beeps
    }

    /// Buffer text may not be modified while this is nonzero.
    pub fn text_locked(&self) -> bool {
        self.textlock > 0
    }

    pub fn enter_textlock(&mut self) {
        self.textlock += 1;
    }

    pub fn leave_textlock(&mut self) {
        debug_assert!(self.textlock > 0);
        self.textlock = self.textlock.saturating_sub(1);
    }
}
