// src/signal.rs

//! Signal/event core.
//!
//! Installs handlers for the deadly and controllable signal sets and
//! translates asynchronous OS events into edge-triggered atomic flags that
//! the input multiplexer polls. Handlers only ever write atomics; the one
//! exception is the deadly path, which runs the registered preserve hook
//! under a recursion guard and then leaves via `_exit`.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicUsize, Ordering};
use std::sync::Once;

use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};

/// Exit code used when a deadly signal arrives while already exiting, or
/// on the third recursive entry into the deadly handler.
pub const DEADLY_REENTRY_EXIT: i32 = 8;

// Edge-triggered flags written from handler context.
static DO_RESIZE: AtomicBool = AtomicBool::new(false);
static GOT_INT: AtomicBool = AtomicBool::new(false);
static GOT_TSTP: AtomicBool = AtomicBool::new(false);
static GOT_SIGUSR1: AtomicBool = AtomicBool::new(false);
static SIGCONT_RECEIVED: AtomicBool = AtomicBool::new(false);
static OLDTITLE_OUTDATED: AtomicBool = AtomicBool::new(false);

static DEADLY_ENTERED: AtomicU32 = AtomicU32::new(0);
static EXITING: AtomicBool = AtomicBool::new(false);
static CAUGHT_DEADLY: AtomicU32 = AtomicU32::new(0);

// Preserve hook, stored as a raw fn pointer so the handler can load it
// without locking. Zero means "not registered".
static PRESERVE_HOOK: AtomicUsize = AtomicUsize::new(0);

static INSTALL_ONCE: Once = Once::new();

/// One row of the signal classification table.
struct SignalInfo {
    sig: Signal,
    name: &'static str,
    deadly: bool,
}

/// Which signals we catch, and how. SEGV and PROF are claimed by some
/// embedded interpreter runtimes (the Scheme collector uses both), so they
/// are classified deadly only when no such runtime is linked in; this
/// build assumes none.
fn signal_table() -> &'static [SignalInfo] {
    &[
        SignalInfo { sig: Signal::SIGHUP, name: "hup", deadly: true },
        SignalInfo { sig: Signal::SIGQUIT, name: "quit", deadly: true },
        SignalInfo { sig: Signal::SIGILL, name: "ill", deadly: true },
        SignalInfo { sig: Signal::SIGTRAP, name: "trap", deadly: true },
        SignalInfo { sig: Signal::SIGABRT, name: "abrt", deadly: true },
        SignalInfo { sig: Signal::SIGFPE, name: "fpe", deadly: true },
        SignalInfo { sig: Signal::SIGBUS, name: "bus", deadly: true },
        SignalInfo { sig: Signal::SIGSEGV, name: "segv", deadly: true },
        SignalInfo { sig: Signal::SIGSYS, name: "sys", deadly: true },
        SignalInfo { sig: Signal::SIGTERM, name: "term", deadly: true },
        SignalInfo { sig: Signal::SIGVTALRM, name: "vtalrm", deadly: true },
        SignalInfo { sig: Signal::SIGPROF, name: "prof", deadly: true },
        SignalInfo { sig: Signal::SIGXCPU, name: "xcpu", deadly: true },
        SignalInfo { sig: Signal::SIGXFSZ, name: "xfsz", deadly: true },
        SignalInfo { sig: Signal::SIGUSR1, name: "usr1", deadly: false },
        SignalInfo { sig: Signal::SIGINT, name: "int", deadly: false },
        SignalInfo { sig: Signal::SIGWINCH, name: "winch", deadly: false },
        SignalInfo { sig: Signal::SIGTSTP, name: "tstp", deadly: false },
        SignalInfo { sig: Signal::SIGCONT, name: "cont", deadly: false },
    ]
}

extern "C" fn deadly_handler(signum: libc::c_int) {
    let entered = DEADLY_ENTERED.fetch_add(1, Ordering::SeqCst) + 1;
    CAUGHT_DEADLY.store(signum as u32, Ordering::SeqCst);

    if entered >= 3 || EXITING.load(Ordering::SeqCst) {
        unsafe { libc::_exit(DEADLY_REENTRY_EXIT) };
    }
    if entered == 1 {
        // First entry: flush and preserve, then exit. The hook is the
        // embedder's preserve-and-restore path and must stay signal safe.
        let hook = PRESERVE_HOOK.load(Ordering::SeqCst);
        if hook != 0 {
            let f: fn() = unsafe { std::mem::transmute(hook) };
            f();
        }
    }
    // Second entry skips preservation entirely.
    EXITING.store(true, Ordering::SeqCst);
    unsafe { libc::_exit(1) };
}

extern "C" fn controllable_handler(signum: libc::c_int) {
    match Signal::try_from(signum) {
        Ok(Signal::SIGINT) => GOT_INT.store(true, Ordering::SeqCst),
        Ok(Signal::SIGWINCH) => DO_RESIZE.store(true, Ordering::SeqCst),
        Ok(Signal::SIGTSTP) => GOT_TSTP.store(true, Ordering::SeqCst),
        Ok(Signal::SIGCONT) => {
            // Coming back from a suspend: the terminal may have been
            // resized and the title clobbered while we were stopped.
            SIGCONT_RECEIVED.store(true, Ordering::SeqCst);
            OLDTITLE_OUTDATED.store(true, Ordering::SeqCst);
        }
        Ok(Signal::SIGUSR1) => GOT_SIGUSR1.store(true, Ordering::SeqCst),
        _ => {}
    }
}

/// Installs the alternate signal stack so the deadly handler survives a
/// stack overflow SEGV. Best effort.
fn install_alt_stack() {
    const ALT_STACK_SIZE: usize = libc::SIGSTKSZ;
    // Leaked on purpose; the stack must outlive the process.
    let stack = Box::leak(vec![0u8; ALT_STACK_SIZE].into_boxed_slice());
    let ss = libc::stack_t {
        ss_sp: stack.as_mut_ptr() as *mut libc::c_void,
        ss_flags: 0,
        ss_size: ALT_STACK_SIZE,
    };
    if unsafe { libc::sigaltstack(&ss, std::ptr::null_mut()) } == -1 {
        log::warn!(
            "sigaltstack failed: {}; deadly handler runs on the main stack",
            std::io::Error::last_os_error()
        );
    }
}

/// Installs handlers for every signal in the classification table, plus
/// ignore dispositions for PIPE and ALRM. Idempotent; a handler that
/// cannot be installed is reported once and skipped.
pub fn install_signal_handlers() {
    INSTALL_ONCE.call_once(|| {
        install_alt_stack();

        for info in signal_table() {
            let handler = if info.deadly {
                SigHandler::Handler(deadly_handler)
            } else {
                SigHandler::Handler(controllable_handler)
            };
            let mut flags = SaFlags::SA_RESTART;
            if info.deadly {
                flags |= SaFlags::SA_ONSTACK;
            }
            let action = SigAction::new(handler, flags, SigSet::empty());
            if let Err(e) = unsafe { sigaction(info.sig, &action) } {
                log::error!("failed to install handler for SIG{}: {}", info.name, e);
            }
        }

        // A write to a dead pipe must surface as EPIPE, not kill us, and
        // an interpreter's alarm() must not either.
        let ignore = SigAction::new(SigHandler::SigIgn, SaFlags::empty(), SigSet::empty());
        for sig in [Signal::SIGPIPE, Signal::SIGALRM] {
            if let Err(e) = unsafe { sigaction(sig, &ignore) } {
                log::error!("failed to ignore {:?}: {}", sig, e);
            }
        }
        log::debug!("signal handlers installed");
    });
}

/// Registers the preserve-and-exit hook run on the first deadly entry.
pub fn set_preserve_hook(hook: fn()) {
    PRESERVE_HOOK.store(hook as usize, Ordering::SeqCst);
}

/// Marks the process as exiting so a late deadly signal short-circuits.
pub fn set_exiting() {
    EXITING.store(true, Ordering::SeqCst);
}

pub fn got_int() -> bool {
    GOT_INT.load(Ordering::SeqCst)
}

pub fn set_got_int(v: bool) {
    GOT_INT.store(v, Ordering::SeqCst);
}

/// Consumes the pending-resize edge.
pub fn take_do_resize() -> bool {
    DO_RESIZE.swap(false, Ordering::SeqCst)
}

pub fn raise_do_resize() {
    DO_RESIZE.store(true, Ordering::SeqCst);
}

pub fn take_got_tstp() -> bool {
    GOT_TSTP.swap(false, Ordering::SeqCst)
}

pub fn take_sigcont() -> bool {
    SIGCONT_RECEIVED.swap(false, Ordering::SeqCst)
}

pub fn take_got_sigusr1() -> bool {
    GOT_SIGUSR1.swap(false, Ordering::SeqCst)
}

pub fn oldtitle_outdated() -> bool {
    OLDTITLE_OUTDATED.swap(false, Ordering::SeqCst)
}

/// Looks up a signal by the lowercase name accepted by `signal_job`.
pub fn signal_by_name(name: &str) -> Option<Signal> {
    signal_table()
        .iter()
        .find(|i| i.name == name)
        .map(|i| i.sig)
        .or_else(|| match name {
            "kill" => Some(Signal::SIGKILL),
            _ => None,
        })
}

/// Lowercased name for a termination signal, as reported in job status.
pub fn name_for_signal(sig: Signal) -> String {
    sig.as_str()
        .trim_start_matches("SIG")
        .to_ascii_lowercase()
}

/// Console control events on NT-class hosts, mapped onto the same policy
/// as Unix signals: C and BREAK interrupt, the session-ending events
/// preserve and exit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlEvent {
    C,
    Break,
    Close,
    Logoff,
    Shutdown,
}

/// What the control handler decided; `PreserveAndExit` means the caller
/// must not return to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CtrlDisposition {
    Handled,
    PreserveAndExit,
}

/// Applies the control-event policy. The actual exit is left to the
/// caller so this stays testable.
pub fn handle_ctrl_event(ev: CtrlEvent) -> CtrlDisposition {
    match ev {
        CtrlEvent::C | CtrlEvent::Break => {
            GOT_INT.store(true, Ordering::SeqCst);
            CtrlDisposition::Handled
        }
        CtrlEvent::Close | CtrlEvent::Logoff | CtrlEvent::Shutdown => {
            CtrlDisposition::PreserveAndExit
        }
    }
}
