// src/facade.rs

//! The flat operation surface the editor core calls.
//!
//! `Pal` owns one of everything: tty discipline, title state, the input
//! multiplexer, the job table and the renderer. The `mch_*` methods are
//! thin and boring on purpose; anything interesting lives in the
//! component modules, and every capability decision is made here so no
//! caller above this module branches on what the host can do.

use anyhow::{Context, Result};
use log::{debug, error, info};
use std::io::Write;
use std::os::fd::AsFd;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::caps::Capabilities;
use crate::config::PalConfig;
use crate::fs;
use crate::fs::wildcard::{self, ExpandFlags};
use crate::input::{InputMultiplexer, RecordSource, UnixTtySource, WAIT_SLICE_MS};
use crate::job::shell::{call_shell, ShellIo, ShellResult};
use crate::job::{JobOptions, JobTable};
use crate::render::Renderer;
use crate::signal;
use crate::tty::{NixTtyOps, TermMode, TitleKind, TitleManager, TtyManager, TtyOps};

/// Runs a `:!`-style command inside a hosted terminal window instead of
/// handing over the real one. Returns the command's exit code.
pub type TerminalShellHook = Box<dyn FnMut(&PalConfig, Option<&str>) -> Result<i32>>;

/// The assembled platform layer.
pub struct Pal<O: TtyOps, S: RecordSource> {
    pub config: PalConfig,
    pub caps: Capabilities,
    tty: TtyManager<O>,
    title: TitleManager,
    input: InputMultiplexer<S>,
    jobs: JobTable,
    renderer: Renderer,
    terminal_shell: Option<TerminalShellHook>,
}

impl Pal<NixTtyOps, UnixTtySource> {
    /// Builds the live platform layer over a real controlling terminal.
    pub fn open<F: AsFd>(config: PalConfig, tty: &F, cols: u16, rows: u16) -> Result<Self> {
        let caps = Capabilities::detect_unix(false);
        let ops = NixTtyOps::new(tty).context("Failed to probe the controlling terminal")?;
        let source = UnixTtySource::new(tty)?;
        Pal::with_parts(config, caps, ops, source, cols, rows)
    }
}

impl<O: TtyOps, S: RecordSource> Pal<O, S> {
    /// Assembles a platform layer from explicit parts. Tests hand in a
    /// mock tty and a null record source; `open` hands in the real ones.
    pub fn with_parts(
        config: PalConfig,
        caps: Capabilities,
        tty_ops: O,
        source: S,
        cols: u16,
        rows: u16,
    ) -> Result<Self> {
        signal::install_signal_handlers();
        let tty = TtyManager::new(tty_ops)?;
        let input = InputMultiplexer::new(source, config.mousetime, config.updatetime);
        let renderer = Renderer::new(cols, rows, &caps, &config);
        info!(
            "platform layer up: {}x{}, vtp={}, pty={}",
            cols, rows, caps.vtp_working, caps.conpty_working
        );
        Ok(Pal {
            config,
            caps,
            tty,
            title: TitleManager::new(),
            input,
            jobs: JobTable::new(),
            renderer,
            terminal_shell: None,
        })
    }

    /// Registers the hosted-terminal command runner. Only consulted when
    /// the host can actually allocate a pty.
    pub fn set_terminal_shell_hook(&mut self, hook: TerminalShellHook) {
        self.terminal_shell = Some(hook);
    }

    pub fn input_mut(&mut self) -> &mut InputMultiplexer<S> {
        &mut self.input
    }

    pub fn renderer(&self) -> &Renderer {
        &self.renderer
    }

    pub fn renderer_mut(&mut self) -> &mut Renderer {
        &mut self.renderer
    }

    pub fn jobs(&self) -> &JobTable {
        &self.jobs
    }

    pub fn title_mut(&mut self) -> &mut TitleManager {
        &mut self.title
    }

    /// Reads input bytes, waiting up to `timeout_ms` (negative waits
    /// forever). Timers, side work and CursorHold run while waiting.
    pub fn mch_inchar(&mut self, buf: &mut [u8], timeout_ms: i64) -> usize {
        let token = self.input.typeahead_token();
        self.input.read_chars(buf, timeout_ms, token)
    }

    pub fn mch_char_avail(&mut self) -> bool {
        self.input.char_avail()
    }

    /// Interprets one chunk of the editor's output dialect.
    pub fn mch_write(&mut self, data: &[u8]) {
        self.renderer.write(data);
    }

    pub fn mch_settmode(&mut self, mode: TermMode) -> Result<()> {
        self.tty.set_mode(mode)
    }

    pub fn tty_mode(&self) -> TermMode {
        self.tty.get_mode()
    }

    pub fn mch_settitle<W: Write>(
        &mut self,
        sink: &mut W,
        title: Option<&str>,
        icon: Option<&str>,
    ) -> Result<()> {
        if self.caps.gui_in_use {
            // The GUI owns its window title.
            return Ok(());
        }
        self.title.set_title(sink, title, icon)
    }

    pub fn mch_restore_title<W: Write>(&mut self, sink: &mut W, which: TitleKind) -> Result<()> {
        if self.caps.gui_in_use {
            return Ok(());
        }
        self.title.restore_title(sink, which)
    }

    /// Runs a shell command. For the `Inherit` shape the terminal is
    /// handed to the child cooked and taken back raw afterwards, whether
    /// or not the command succeeded.
    pub fn mch_call_shell(
        &mut self,
        cmd: Option<&str>,
        io: &ShellIo,
        relay: Option<&mut dyn FnMut(&[u8])>,
    ) -> Result<ShellResult> {
        if matches!(io, ShellIo::Inherit) && self.caps.conpty_working {
            if let Some(hook) = self.terminal_shell.as_mut() {
                let code = hook(&self.config, cmd)?;
                return Ok(ShellResult { code, output: Vec::new() });
            }
        }
        let hand_over = matches!(io, ShellIo::Inherit) && self.tty.get_mode() == TermMode::Raw;
        if hand_over {
            self.tty.set_mode(TermMode::Cooked)?;
        }
        // Piped commands keep the terminal, so keys typed while they run
        // are picked off the multiplexer and fed to the child.
        let input = &mut self.input;
        let mut poll = move || {
            let token = input.typeahead_token();
            let mut b = [0u8; 1];
            (input.read_chars(&mut b, 0, token) == 1).then_some(b[0])
        };
        let result = call_shell(&self.config, cmd, io, relay, Some(&mut poll));
        if hand_over {
            if let Err(e) = self.tty.set_mode(TermMode::Raw) {
                error!("could not re-enter raw mode after shell: {:#}", e);
            }
        }
        result
    }

    pub fn mch_job_start(&mut self, argv: &[String], opts: &JobOptions) -> Result<u64> {
        let mut opts = opts.clone();
        let wants_pty = [&opts.io_in, &opts.io_out, &opts.io_err]
            .iter()
            .any(|io| **io == crate::job::JobIo::Pty);
        if wants_pty && !self.caps.conpty_working {
            // No usable pty on this host; pipes are the honest fallback.
            debug!("pty requested without pty support, using pipes");
            for io in [&mut opts.io_in, &mut opts.io_out, &mut opts.io_err] {
                if *io == crate::job::JobIo::Pty {
                    *io = crate::job::JobIo::Pipe;
                }
            }
        }
        self.jobs.start(&self.config, argv, &opts)
    }

    /// "run", "dead" or "fail", sweeping for ended children first.
    pub fn mch_job_status(&mut self, id: u64) -> &'static str {
        self.jobs.detect_ended_jobs();
        match self.jobs.get(id) {
            Some(job) => job.status_name(),
            None => "fail",
        }
    }

    pub fn mch_signal_job(&mut self, id: u64, what: &str) -> Result<()> {
        self.jobs.signal(id, what)
    }

    pub fn mch_clear_job(&mut self, id: u64) {
        self.jobs.clear(id);
    }

    pub fn mch_detect_ended_job(&mut self) -> usize {
        self.jobs.detect_ended_jobs()
    }

    pub fn mch_full_name(&self, path: &Path) -> Result<PathBuf> {
        fs::full_name(path)
    }

    pub fn mch_isdir(&self, path: &Path) -> bool {
        fs::is_dir(path)
    }

    pub fn mch_rename(&self, from: &Path, to: &Path) -> Result<()> {
        fs::rename(from, to)
    }

    pub fn mch_expand_wildcards(
        &self,
        patterns: &[String],
        flags: ExpandFlags,
    ) -> Result<Vec<String>> {
        wildcard::expand_wildcards(&self.config, patterns, flags)
    }

    pub fn mch_getperm(&self, path: &Path) -> Option<u32> {
        fs::get_perm(path)
    }

    pub fn mch_setperm(&self, path: &Path, mode: u32) -> Result<()> {
        fs::set_perm(path, mode)
    }

    /// Sleeps for `msec`. Unless input is to be ignored the wait ends
    /// early when a character arrives, without consuming it.
    pub fn mch_delay(&mut self, msec: u64, ignore_input: bool) {
        if ignore_input {
            std::thread::sleep(Duration::from_millis(msec));
            return;
        }
        let deadline = Instant::now() + Duration::from_millis(msec);
        loop {
            if self.input.char_avail() {
                return;
            }
            let now = Instant::now();
            if now >= deadline {
                return;
            }
            let left = (deadline - now).as_millis() as u64;
            std::thread::sleep(Duration::from_millis(left.min(WAIT_SLICE_MS)));
        }
    }

    pub fn mch_get_pid(&self) -> u32 {
        std::process::id()
    }

    /// Everything `mch_exit` does short of `exit()`: marks the process
    /// exiting, stops remaining jobs and puts the terminal back the way
    /// it was found. Safe to call more than once.
    pub fn prepare_exit(&mut self) {
        signal::set_exiting();
        for id in self.jobs.ids() {
            self.jobs.clear(id);
        }
        self.tty.emergency_restore();
    }

    pub fn mch_exit(&mut self, code: i32) -> ! {
        debug!("exiting with code {}", code);
        self.prepare_exit();
        std::process::exit(code);
    }
}

/// One saved command-line argument: the text as the OS delivered it
/// (UTF-16 on hosts that version their arguments that way) and whether
/// the user gave it literally or it came out of wildcard expansion.
#[derive(Debug, Clone)]
pub struct SavedArg {
    pub utf16: Vec<u16>,
    pub literal: bool,
}

/// Re-decodes the saved argument list once the 'encoding' option has
/// settled, keeping each argument's literal-vs-expanded status. Called
/// after option initialization, before the first file is loaded.
pub fn fix_arg_enc(saved: &[SavedArg]) -> Vec<(String, bool)> {
    saved
        .iter()
        .map(|arg| (String::from_utf16_lossy(&arg.utf16), arg.literal))
        .collect()
}
