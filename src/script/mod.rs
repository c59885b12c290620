// src/script/mod.rs

//! Embedded scripting bridge.
//!
//! The host interpreter is initialized once for the life of the process;
//! everything it does to the editor goes through the primitives in
//! [`handles`] and the value conversion in [`value`]. Host print output
//! lands in the editor's message sink, host errors in the error sink,
//! and editor-side failures cross back as [`ScriptError::Vim`] the way
//! the editor's own exceptions would.

pub mod handles;
pub mod value;

use log::{debug, info};
use once_cell::sync::OnceCell;
use std::fmt;

use crate::editor::EditorState;

/// Errors crossing the bridge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptError {
    /// Host-side domain error (bad argument, conversion failure).
    Domain(String),
    /// An editor error raised while a primitive ran.
    Vim(String),
    /// The sandbox refused the operation.
    Sandbox,
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Domain(msg) => write!(f, "script error: {}", msg),
            ScriptError::Vim(msg) => write!(f, "editor error: {}", msg),
            ScriptError::Sandbox => write!(f, "not allowed in the sandbox"),
        }
    }
}

impl std::error::Error for ScriptError {}

#[derive(Debug)]
pub struct Bridge {
    /// Host version banner, for the `:version`-style output.
    pub host_version: String,
}

static BRIDGE: OnceCell<Bridge> = OnceCell::new();

/// Initializes the host interpreter once; later calls get the same
/// bridge. Initialization is deliberately lazy so sessions that never
/// touch scripting pay nothing.
pub fn bridge() -> &'static Bridge {
    BRIDGE.get_or_init(|| {
        info!("initializing script host");
        Bridge {
            host_version: "embedded-host 1.0".to_string(),
        }
    })
}

/// Fails when the sandbox forbids `what`. File and network primitives
/// call this first.
pub fn check_sandbox(state: &EditorState, what: &str) -> Result<(), ScriptError> {
    if state.sandbox {
        debug!("sandbox refused {}", what);
        return Err(ScriptError::Sandbox);
    }
    Ok(())
}

/// Buffer text is locked while this guard lives; used around host
/// callbacks that must not reenter the editing model.
pub struct TextLockGuard<'a> {
    state: &'a mut EditorState,
}

impl<'a> TextLockGuard<'a> {
    pub fn new(state: &'a mut EditorState) -> Self {
        state.enter_textlock();
        TextLockGuard { state }
    }

    pub fn state(&mut self) -> &mut EditorState {
        self.state
    }
}

impl Drop for TextLockGuard<'_> {
    fn drop(&mut self) {
        self.state.leave_textlock();
    }
}

/// Host `display`/`write` output goes to the message sink.
pub fn host_print(state: &mut EditorState, text: &str) {
    state.message(text);
}

/// Host error output goes to the error sink.
pub fn host_error(state: &mut EditorState, text: &str) {
    state.error(text);
}
