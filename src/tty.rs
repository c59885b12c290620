// src/tty.rs

//! Tty mode management.
//!
//! Switches the controlling terminal between cooked, raw and sleep
//! disciplines and guarantees that whatever was in effect at startup is
//! back in effect when the process leaves. The termios access goes
//! through the small `TtyOps` trait so the restoration invariant can be
//! checked without a real tty; `NixTtyOps` is the live implementation.

use anyhow::{Context, Result};
use std::io::Write;
use std::os::unix::io::{AsFd, AsRawFd, BorrowedFd, RawFd};

use nix::sys::termios::{self, InputFlags, LocalFlags, OutputFlags, SetArg, SpecialCharacterIndices};

/// Terminal discipline as the editor sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TermMode {
    /// Line-buffered, echoing; the state the shell left us in.
    Cooked,
    /// Byte-at-a-time, no echo, no flow control, no CR/NL mapping.
    Raw,
    /// Unbuffered reads but otherwise cooked; used while suspended waits.
    Sleep,
    Unknown,
}

/// Portable image of the discipline bits the editor cares about. The live
/// implementation folds these into the full termios it captured at init.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TtyState {
    pub icanon: bool,
    pub echo: bool,
    pub isig: bool,
    pub ixon: bool,
    pub icrnl: bool,
    pub onlcr: bool,
    pub vmin: u8,
    pub vtime: u8,
}

impl TtyState {
    /// The raw discipline: every byte delivered immediately, nothing
    /// echoed or translated.
    pub fn raw_from(mut base: TtyState) -> TtyState {
        base.icanon = false;
        base.echo = false;
        base.isig = false;
        base.ixon = false;
        base.icrnl = false;
        base.onlcr = false;
        base.vmin = 1;
        base.vtime = 0;
        base
    }

    /// The sleep discipline: unbuffered reads, echo off, the rest cooked.
    pub fn sleep_from(mut base: TtyState) -> TtyState {
        base.icanon = false;
        base.echo = false;
        base
    }
}

/// Access to the underlying tty discipline.
pub trait TtyOps {
    fn get(&self) -> Result<TtyState>;
    fn set(&mut self, state: &TtyState) -> Result<()>;
}

/// Live termios implementation over a tty fd (normally stdin).
///
/// The full `Termios` captured at construction is the base every
/// `TtyState` is folded into, so flags outside the portable image are
/// preserved across mode changes and restored verbatim on exit.
pub struct NixTtyOps {
    fd: RawFd,
    base: termios::Termios,
}

impl NixTtyOps {
    pub fn new<F: AsFd>(fd: &F) -> Result<Self> {
        let raw = fd.as_fd().as_raw_fd();
        let base = termios::tcgetattr(fd.as_fd())
            .with_context(|| format!("tcgetattr failed for fd {}", raw))?;
        Ok(NixTtyOps { fd: raw, base })
    }

    fn borrowed(&self) -> BorrowedFd<'_> {
        // The fd is the controlling terminal; it outlives the manager.
        unsafe { BorrowedFd::borrow_raw(self.fd) }
    }

    fn state_of(t: &termios::Termios) -> TtyState {
        TtyState {
            icanon: t.local_flags.contains(LocalFlags::ICANON),
            echo: t.local_flags.contains(LocalFlags::ECHO),
            isig: t.local_flags.contains(LocalFlags::ISIG),
            ixon: t.input_flags.contains(InputFlags::IXON),
            icrnl: t.input_flags.contains(InputFlags::ICRNL),
            onlcr: t.output_flags.contains(OutputFlags::ONLCR),
            vmin: t.control_chars[SpecialCharacterIndices::VMIN as usize],
            vtime: t.control_chars[SpecialCharacterIndices::VTIME as usize],
        }
    }
}

impl TtyOps for NixTtyOps {
    fn get(&self) -> Result<TtyState> {
        let t = termios::tcgetattr(self.borrowed()).context("tcgetattr failed")?;
        Ok(Self::state_of(&t))
    }

    fn set(&mut self, state: &TtyState) -> Result<()> {
        let mut t = self.base.clone();
        t.local_flags.set(LocalFlags::ICANON, state.icanon);
        t.local_flags.set(LocalFlags::ECHO, state.echo);
        t.local_flags.set(LocalFlags::ISIG, state.isig);
        t.local_flags.set(LocalFlags::IEXTEN, state.icanon);
        t.input_flags.set(InputFlags::IXON, state.ixon);
        t.input_flags.set(InputFlags::ICRNL, state.icrnl);
        t.output_flags.set(OutputFlags::ONLCR, state.onlcr);
        t.control_chars[SpecialCharacterIndices::VMIN as usize] = state.vmin;
        t.control_chars[SpecialCharacterIndices::VTIME as usize] = state.vtime;
        termios::tcsetattr(self.borrowed(), SetArg::TCSANOW, &t).context("tcsetattr failed")?;
        log::trace!("tty fd {} set to {:?}", self.fd, state);
        Ok(())
    }
}

/// Owns the tty discipline for the whole session.
pub struct TtyManager<O: TtyOps> {
    ops: O,
    initial: TtyState,
    mode: TermMode,
}

impl<O: TtyOps> TtyManager<O> {
    /// Captures the current discipline; that snapshot is what `Cooked`
    /// and process exit restore.
    pub fn new(ops: O) -> Result<Self> {
        let initial = ops.get().context("Failed to snapshot initial tty state")?;
        log::debug!("initial tty state: {:?}", initial);
        Ok(TtyManager {
            ops,
            initial,
            mode: TermMode::Unknown,
        })
    }

    pub fn get_mode(&self) -> TermMode {
        self.mode
    }

    pub fn initial_state(&self) -> TtyState {
        self.initial
    }

    /// Transitions the tty to `mode`. On success the installed OS state
    /// matches the requested discipline.
    pub fn set_mode(&mut self, mode: TermMode) -> Result<()> {
        let target = match mode {
            TermMode::Cooked | TermMode::Unknown => self.initial,
            TermMode::Raw => TtyState::raw_from(self.initial),
            TermMode::Sleep => TtyState::sleep_from(self.initial),
        };
        self.ops
            .set(&target)
            .with_context(|| format!("Failed to enter {:?} mode", mode))?;
        self.mode = mode;
        log::debug!("tty mode now {:?}", mode);
        Ok(())
    }

    /// Restores the startup discipline, swallowing errors. Called from
    /// exit paths including the deadly-signal preserve hook.
    pub fn emergency_restore(&mut self) {
        if self.ops.set(&self.initial).is_err() {
            log::error!("could not restore tty state on exit");
        }
        self.mode = TermMode::Cooked;
    }
}

impl<O: TtyOps> Drop for TtyManager<O> {
    fn drop(&mut self) {
        if self.mode != TermMode::Cooked {
            self.emergency_restore();
        }
    }
}

/// Which saved value `restore_title` puts back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TitleKind {
    TitleOnly,
    IconOnly,
    Both,
}

/// Terminal title and icon, settable via control strings with the
/// previous values recoverable.
pub struct TitleManager {
    saved_title: Option<String>,
    saved_icon: Option<String>,
    current_title: Option<String>,
    current_icon: Option<String>,
}

impl Default for TitleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl TitleManager {
    pub fn new() -> Self {
        TitleManager {
            saved_title: None,
            saved_icon: None,
            current_title: None,
            current_icon: None,
        }
    }

    /// Remembers the pre-editor title/icon so they can be put back.
    pub fn save_original(&mut self, title: Option<String>, icon: Option<String>) {
        self.saved_title = title;
        self.saved_icon = icon;
    }

    /// Sets title and/or icon by writing OSC control strings to `sink`.
    /// A GUI fallback, when one exists, is the facade's business.
    pub fn set_title<W: Write>(
        &mut self,
        sink: &mut W,
        title: Option<&str>,
        icon: Option<&str>,
    ) -> Result<()> {
        if let Some(t) = title {
            write!(sink, "\x1b]2;{}\x07", t).context("Failed to write title OSC")?;
            self.current_title = Some(t.to_string());
        }
        if let Some(i) = icon {
            write!(sink, "\x1b]1;{}\x07", i).context("Failed to write icon OSC")?;
            self.current_icon = Some(i.to_string());
        }
        sink.flush().context("Failed to flush title write")?;
        Ok(())
    }

    /// Puts back the saved title/icon. Quietly does nothing for a part
    /// that was never saved.
    pub fn restore_title<W: Write>(&mut self, sink: &mut W, which: TitleKind) -> Result<()> {
        let title = match which {
            TitleKind::TitleOnly | TitleKind::Both => self.saved_title.clone(),
            TitleKind::IconOnly => None,
        };
        let icon = match which {
            TitleKind::IconOnly | TitleKind::Both => self.saved_icon.clone(),
            TitleKind::TitleOnly => None,
        };
        self.set_title(sink, title.as_deref(), icon.as_deref())
    }

    pub fn current_title(&self) -> Option<&str> {
        self.current_title.as_deref()
    }
}
