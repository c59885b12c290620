// src/job/mod.rs

//! Job control: starting child processes, watching them end, and
//! signaling them.
//!
//! A job is a forked child wired to the editor through a [`Channel`].
//! Stdio wiring is chosen per stream: a pipe, a pty, a file, the null
//! device, or (for stderr) sharing stdout. The child reports wiring
//! failures through reserved exit codes so the parent can tell "the
//! command failed" from "the command never ran".

pub mod channel;
pub mod pty;
pub mod shell;

use anyhow::{bail, Context, Result};
use log::{debug, trace, warn};
use nix::sys::signal::{kill, Signal};
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::{fork, ForkResult, Pid};
use std::ffi::CString;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::config::PalConfig;
use channel::Channel;
use pty::PtyPair;

/// Child exit code when exec itself failed.
pub const EXEC_FAILED: i32 = 122;
/// Child exit code when the null device would not open.
pub const OPEN_NULL_FAILED: i32 = 123;

/// Where one stream of the child goes.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum JobIo {
    /// The null device.
    Null,
    /// A file, truncated for output and read for input.
    File(PathBuf),
    /// A pipe to a channel part.
    #[default]
    Pipe,
    /// The job's pty (all pty streams share one pair).
    Pty,
    /// Stderr only: same destination as stdout.
    Out,
}

#[derive(Debug, Clone)]
pub struct JobOptions {
    pub io_in: JobIo,
    pub io_out: JobIo,
    pub io_err: JobIo,
    pub cwd: Option<PathBuf>,
    /// Extra environment on top of the standard child variables.
    pub env: Vec<(String, String)>,
    pub rows: u16,
    pub cols: u16,
    /// The job drives a terminal window; affects TERM.
    pub is_terminal: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        JobOptions {
            io_in: JobIo::Pipe,
            io_out: JobIo::Pipe,
            io_err: JobIo::Pipe,
            cwd: None,
            env: Vec::new(),
            rows: 24,
            cols: 80,
            is_terminal: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobState {
    /// Never got off the ground (fork failed).
    Failed,
    Running,
    Ended {
        exitval: Option<i32>,
        /// Lowercased signal name without the SIG prefix.
        termsig: Option<String>,
    },
}

#[derive(Debug)]
pub struct Job {
    pub id: u64,
    pid: Option<Pid>,
    state: JobState,
    pub channel: Option<Channel>,
    /// Slave device name when the job runs on a pty.
    pub tty_name: Option<String>,
}

impl Job {
    pub fn pid(&self) -> Option<Pid> {
        self.pid
    }

    pub fn state(&self) -> &JobState {
        &self.state
    }

    /// The status word scripts see.
    pub fn status_name(&self) -> &'static str {
        match self.state {
            JobState::Failed => "fail",
            JobState::Running => "run",
            JobState::Ended { .. } => "dead",
        }
    }
}

static DONT_CHECK_ENDED: AtomicUsize = AtomicUsize::new(0);

/// While alive, [`JobTable::detect_ended_jobs`] does nothing. Used around
/// waits that must see the child's status themselves (the synchronous
/// shell path reaps its own child).
pub struct ReapGuard;

impl ReapGuard {
    pub fn new() -> Self {
        DONT_CHECK_ENDED.fetch_add(1, Ordering::SeqCst);
        ReapGuard
    }
}

impl Drop for ReapGuard {
    fn drop(&mut self) {
        DONT_CHECK_ENDED.fetch_sub(1, Ordering::SeqCst);
    }
}

pub fn reaping_suppressed() -> bool {
    DONT_CHECK_ENDED.load(Ordering::SeqCst) > 0
}

/// Variables every job child gets, terminal geometry included.
fn child_env(config: &PalConfig, opts: &JobOptions) -> Vec<CString> {
    let mut vars: Vec<(String, String)> = std::env::vars().collect();
    let mut set = |name: &str, value: String| {
        if let Some(slot) = vars.iter_mut().find(|(n, _)| n == name) {
            slot.1 = value;
        } else {
            vars.push((name.to_string(), value));
        }
    };
    set("ROWS", opts.rows.to_string());
    set("LINES", opts.rows.to_string());
    set("COLUMNS", opts.cols.to_string());
    set("COLORS", "256".to_string());
    set("VIM_SERVERNAME", config.servername.clone());
    if opts.is_terminal {
        // Only children living in a hosted terminal window get told so.
        set("VIM_TERMINAL", config.terminal_version.clone());
    }
    set(
        "TERM",
        if opts.is_terminal { "xterm-256color" } else { "dumb" }.to_string(),
    );
    for (name, value) in &opts.env {
        set(name, value.clone());
    }
    vars.into_iter()
        .filter_map(|(n, v)| CString::new(format!("{}={}", n, v)).ok())
        .collect()
}

/// What the child must do with one of its standard descriptors.
#[derive(Debug, Clone, Copy)]
enum ChildFd {
    /// dup2 this descriptor onto the target.
    Dup(RawFd),
    /// Open the null device onto the target.
    Null,
    /// Leave it alone (the pty session setup already placed it).
    Placed,
    /// Stderr: duplicate whatever stdout became.
    SameAsOut,
}

struct Wiring {
    child: [ChildFd; 3],
    /// Parent-side channel ends: stdin writer, stdout reader, stderr reader.
    chan_in: Option<OwnedFd>,
    chan_out: Option<OwnedFd>,
    chan_err: Option<OwnedFd>,
    /// Descriptors only the child needs; parent closes them after fork.
    child_only: Vec<OwnedFd>,
    pty: Option<PtyPair>,
}

fn set_nonblocking(fd: &OwnedFd) -> Result<()> {
    let raw = fd.as_raw_fd();
    let flags = unsafe { libc::fcntl(raw, libc::F_GETFL) };
    if flags == -1
        || unsafe { libc::fcntl(raw, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1
    {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("Failed to set fd {} nonblocking", raw));
    }
    Ok(())
}

fn plan_wiring(opts: &JobOptions) -> Result<Wiring> {
    let uses_pty = [&opts.io_in, &opts.io_out, &opts.io_err]
        .iter()
        .any(|io| **io == JobIo::Pty);
    let pty = if uses_pty {
        Some(PtyPair::open(opts.cols, opts.rows)?)
    } else {
        None
    };

    let mut wiring = Wiring {
        child: [ChildFd::Null; 3],
        chan_in: None,
        chan_out: None,
        chan_err: None,
        child_only: Vec::new(),
        pty: None,
    };

    for (target, io) in [(0, &opts.io_in), (1, &opts.io_out), (2, &opts.io_err)] {
        match io {
            JobIo::Null => wiring.child[target] = ChildFd::Null,
            JobIo::Out => {
                if target != 2 {
                    bail!("only stderr can be redirected to stdout");
                }
                wiring.child[target] = ChildFd::SameAsOut;
            }
            JobIo::Pty => {
                // The session setup dup2s the slave over 0..3.
                wiring.child[target] = ChildFd::Placed;
            }
            JobIo::File(path) => {
                let file = if target == 0 {
                    std::fs::File::open(path)
                        .with_context(|| format!("Failed to open {} for job input", path.display()))?
                } else {
                    std::fs::File::create(path).with_context(|| {
                        format!("Failed to open {} for job output", path.display())
                    })?
                };
                let fd: OwnedFd = file.into();
                wiring.child[target] = ChildFd::Dup(fd.as_raw_fd());
                wiring.child_only.push(fd);
            }
            JobIo::Pipe => {
                // CLOEXEC so the exec'd child does not keep stray copies
                // of the parent-side ends; the dup2 below clears the flag
                // on the descriptors the child actually uses.
                let (r, w) = nix::unistd::pipe2(nix::fcntl::OFlag::O_CLOEXEC)
                    .context("Failed to create job pipe")?;
                if target == 0 {
                    wiring.child[target] = ChildFd::Dup(r.as_raw_fd());
                    wiring.child_only.push(r);
                    wiring.chan_in = Some(w);
                } else {
                    wiring.child[target] = ChildFd::Dup(w.as_raw_fd());
                    wiring.child_only.push(w);
                    set_nonblocking(&r)?;
                    if target == 1 {
                        wiring.chan_out = Some(r);
                    } else {
                        wiring.chan_err = Some(r);
                    }
                }
            }
        }
    }

    if let Some(pair) = pty {
        set_nonblocking(&pair.master)?;
        wiring.pty = Some(pair);
    }
    Ok(wiring)
}

/// Runs in the child between fork and exec. Only async-signal-safe calls.
fn child_wire_and_exec(
    wiring: &Wiring,
    argv: &[CString],
    envp: &[CString],
    cwd: &Option<CString>,
    null_path: &CString,
) -> ! {
    unsafe {
        if let Some(pair) = &wiring.pty {
            libc::close(pair.master.as_raw_fd());
            if pty::child_session_setup(pair.slave.as_raw_fd()).is_err() {
                libc::_exit(EXEC_FAILED);
            }
        }
        for (target, plan) in wiring.child.iter().enumerate() {
            let target = target as RawFd;
            match plan {
                ChildFd::Placed => {}
                ChildFd::Dup(fd) => {
                    if libc::dup2(*fd, target) == -1 {
                        libc::_exit(EXEC_FAILED);
                    }
                }
                ChildFd::Null => {
                    let flags = if target == 0 { libc::O_RDONLY } else { libc::O_WRONLY };
                    let nul = libc::open(null_path.as_ptr(), flags);
                    if nul == -1 {
                        libc::_exit(OPEN_NULL_FAILED);
                    }
                    if nul != target {
                        if libc::dup2(nul, target) == -1 {
                            libc::_exit(OPEN_NULL_FAILED);
                        }
                        libc::close(nul);
                    }
                }
                ChildFd::SameAsOut => {
                    if libc::dup2(1, target) == -1 {
                        libc::_exit(EXEC_FAILED);
                    }
                }
            }
        }
        for fd in &wiring.child_only {
            let raw = fd.as_raw_fd();
            if raw > 2 {
                libc::close(raw);
            }
        }
        if let Some(dir) = cwd {
            if libc::chdir(dir.as_ptr()) == -1 {
                libc::_exit(EXEC_FAILED);
            }
        }
    }
    let _ = nix::unistd::execvpe(&argv[0], argv, envp);
    unsafe { libc::_exit(EXEC_FAILED) }
}

#[derive(Debug, Default)]
pub struct JobTable {
    jobs: Vec<Job>,
    next_id: u64,
}

impl JobTable {
    pub fn new() -> Self {
        JobTable::default()
    }

    pub fn get(&self, id: u64) -> Option<&Job> {
        self.jobs.iter().find(|j| j.id == id)
    }

    pub fn get_mut(&mut self, id: u64) -> Option<&mut Job> {
        self.jobs.iter_mut().find(|j| j.id == id)
    }

    /// Forks and execs `argv` with the wiring in `opts`, returning the
    /// new job's id. The job starts as `run` even if the command turns
    /// out not to exist; that surfaces later as a dead job with exit
    /// code [`EXEC_FAILED`].
    pub fn start(
        &mut self,
        config: &PalConfig,
        argv: &[String],
        opts: &JobOptions,
    ) -> Result<u64> {
        if argv.is_empty() {
            bail!("job_start needs a command");
        }
        let cargv: Vec<CString> = argv
            .iter()
            .map(|a| CString::new(a.as_str()).context("command argument contains NUL"))
            .collect::<Result<_>>()?;
        let envp = child_env(config, opts);
        let cwd = match &opts.cwd {
            Some(dir) => Some(
                CString::new(dir.as_os_str().as_encoded_bytes())
                    .context("job cwd contains NUL")?,
            ),
            None => None,
        };
        let null_path = CString::new("/dev/null").context("static path")?;
        let mut wiring = plan_wiring(opts)?;

        self.next_id += 1;
        let id = self.next_id;

        match unsafe { fork() }.context("fork failed")? {
            ForkResult::Child => child_wire_and_exec(&wiring, &cargv, &envp, &cwd, &null_path),
            ForkResult::Parent { child } => {
                debug!("job {}: started pid {} running {:?}", id, child, argv[0]);
                wiring.child_only.clear();
                let mut tty_name = None;
                let (chan_in, chan_out, chan_err) = if let Some(pair) = wiring.pty.take() {
                    tty_name = pair.slave_name();
                    drop(pair.slave);
                    // All three parts speak through the master.
                    let master = pair.master;
                    let out = master.try_clone().context("Failed to clone pty master")?;
                    (Some(master), Some(out), None)
                } else {
                    (wiring.chan_in.take(), wiring.chan_out.take(), wiring.chan_err.take())
                };
                let channel = Channel::new(id, chan_in, chan_out, chan_err);
                self.jobs.push(Job {
                    id,
                    pid: Some(child),
                    state: JobState::Running,
                    channel: Some(channel),
                    tty_name,
                });
                Ok(id)
            }
        }
    }

    /// Non-blocking sweep for children that have ended. No-op while a
    /// [`ReapGuard`] is alive. Returns how many jobs changed state.
    pub fn detect_ended_jobs(&mut self) -> usize {
        if reaping_suppressed() {
            trace!("job reaping suppressed");
            return 0;
        }
        let mut changed = 0;
        for job in &mut self.jobs {
            if job.state != JobState::Running {
                continue;
            }
            let Some(pid) = job.pid else { continue };
            match waitpid(pid, Some(WaitPidFlag::WNOHANG)) {
                Ok(WaitStatus::Exited(_, code)) => {
                    debug!("job {}: exited with {}", job.id, code);
                    job.state = JobState::Ended { exitval: Some(code), termsig: None };
                    changed += 1;
                }
                Ok(WaitStatus::Signaled(_, sig, _)) => {
                    let name = crate::signal::name_for_signal(sig);
                    debug!("job {}: killed by {}", job.id, name);
                    job.state = JobState::Ended { exitval: None, termsig: Some(name) };
                    changed += 1;
                }
                Ok(_) => {}
                Err(nix::errno::Errno::ECHILD) => {
                    // Someone else reaped it; all we know is it's gone.
                    warn!("job {}: child {} already reaped", job.id, pid);
                    job.state = JobState::Ended { exitval: None, termsig: None };
                    changed += 1;
                }
                Err(e) => warn!("job {}: waitpid failed: {}", job.id, e),
            }
        }
        changed
    }

    /// Sends a signal to the job's process group, falling back to the
    /// process itself. `what` is a signal name like `term` or `kill`, or
    /// a signal number in decimal.
    pub fn signal(&mut self, id: u64, what: &str) -> Result<()> {
        let job = self.get(id).with_context(|| format!("no job {}", id))?;
        let Some(pid) = job.pid else {
            bail!("job {} has no process", id);
        };
        let sig = match what.parse::<i32>() {
            Ok(n) => Signal::try_from(n)
                .with_context(|| format!("signal number {} out of range", n))?,
            Err(_) => crate::signal::signal_by_name(what)
                .with_context(|| format!("unknown signal name {:?}", what))?,
        };
        // The job may lead its own group (pty jobs do); hit the group
        // first so shell children get it too.
        let group = Pid::from_raw(-pid.as_raw());
        if kill(group, sig).is_err() {
            kill(pid, sig).with_context(|| format!("Failed to signal job {}", id))?;
        }
        debug!("job {}: sent {:?}", id, sig);
        Ok(())
    }

    /// Final cleanup: reap the child if it is still pending and drop the
    /// job from the table.
    pub fn clear(&mut self, id: u64) {
        let Some(pos) = self.jobs.iter().position(|j| j.id == id) else { return };
        let job = self.jobs.remove(pos);
        if job.state == JobState::Running {
            if let Some(pid) = job.pid {
                let _ = kill(pid, Signal::SIGTERM);
                match waitpid(pid, None) {
                    Ok(status) => trace!("job {}: final reap {:?}", id, status),
                    Err(e) => warn!("job {}: final reap failed: {}", id, e),
                }
            }
        }
    }

    pub fn running_count(&self) -> usize {
        self.jobs.iter().filter(|j| j.state == JobState::Running).count()
    }

    pub fn ids(&self) -> Vec<u64> {
        self.jobs.iter().map(|j| j.id).collect()
    }
}
