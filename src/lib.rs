//! Platform abstraction layer for a terminal modal editor.
//!
//! Everything the editor core needs from the host OS (tty modes, signal
//! delivery, multiplexed input, mouse decoding, file attributes, shell and
//! job execution, console rendering, an embedded-interpreter bridge)
//! lives behind the `facade` module. No caller above the facade branches
//! on the operating system.

pub mod caps;
pub mod config;
pub mod editor;
pub mod facade;
pub mod fs;
pub mod input;
pub mod job;
pub mod keys;
pub mod listener;
pub mod render;
pub mod script;
pub mod signal;
pub mod tty;
