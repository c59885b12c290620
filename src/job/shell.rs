// src/job/shell.rs

//! Synchronous shell execution, the `:!` and filter path.
//!
//! Three wirings: inherit the terminal (bare `:!cmd`), pipe the buffer
//! through the command (filters), or stage input and output in temporary
//! files for shells that cannot be piped. The piped shape feeds the
//! command from a writer thread, relays output as it arrives, reacts to
//! an interrupt by signaling the child's process group, and never splits
//! a multibyte character across relay calls.

use anyhow::{Context, Result};
use log::{debug, trace};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{Read, Write};
use std::process::{Command, Stdio};
use std::time::Duration;

use crate::config::PalConfig;
use super::{ReapGuard, EXEC_FAILED};

/// How the command's stdio is wired.
#[derive(Debug, Clone)]
pub enum ShellIo {
    /// The command shares the editor's terminal.
    Inherit,
    /// Buffer text in, command output back, relayed live.
    Piped { input: Option<Vec<u8>> },
    /// Input and output staged in temporary files.
    TempFiles { input: Option<Vec<u8>> },
}

#[derive(Debug)]
pub struct ShellResult {
    /// Exit code; 128+signal for a signaled child.
    pub code: i32,
    /// Captured output with embedded NULs already turned into newlines.
    pub output: Vec<u8>,
}

/// Embedded NUL bytes become line breaks, the buffer-text convention.
pub fn nul_to_nl(data: &mut [u8]) {
    for b in data.iter_mut() {
        if *b == 0 {
            *b = b'\n';
        }
    }
}

/// Length of the longest prefix of `buf` that ends on a UTF-8 character
/// boundary. The remainder is an incomplete sequence still in flight.
pub fn utf8_complete_prefix(buf: &[u8]) -> usize {
    // Only the last three bytes can start an incomplete sequence.
    let tail_start = buf.len().saturating_sub(3);
    for i in (tail_start..buf.len()).rev() {
        let b = buf[i];
        if b < 0x80 {
            return i + 1;
        }
        if b >= 0xc0 {
            // Lead byte at i; complete only if its continuation bytes
            // all fit before the end.
            let need = if b >= 0xf0 {
                4
            } else if b >= 0xe0 {
                3
            } else {
                2
            };
            return if i + need <= buf.len() { buf.len() } else { i };
        }
    }
    buf.len()
}

/// Renders buffer lines into the byte stream a filter reads on stdin.
///
/// Each line ends in NL; an embedded NL character stands for a stored
/// NUL and is written back as one. `no_eol_lnum` names the one line
/// that had no line ending in the file; without `fixeol` that line is
/// sent unterminated when it comes last.
pub fn filter_input(
    config: &PalConfig,
    lines: &[String],
    no_eol_lnum: Option<usize>,
) -> Vec<u8> {
    let mut out = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        for &b in line.as_bytes() {
            out.push(if b == b'\n' { 0 } else { b });
        }
        let lnum = i + 1;
        let last = lnum == lines.len();
        let missing_eol = no_eol_lnum == Some(lnum);
        if last && missing_eol && (config.binary || !config.fixeol) {
            break;
        }
        out.push(b'\n');
    }
    out
}

fn command_for(config: &PalConfig, cmd: Option<&str>) -> Command {
    let mut c = Command::new(&config.shell);
    if let Some(cmd) = cmd {
        c.arg(&config.shellcmdflag).arg(cmd);
    }
    c
}

fn exit_code(status: std::process::ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|s| 128 + s))
        .unwrap_or(EXEC_FAILED)
}

fn set_nonblocking(fd: i32) -> Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags == -1 || unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) } == -1 {
        return Err(std::io::Error::last_os_error()).context("Failed to set pipe nonblocking");
    }
    Ok(())
}

/// Sends SIGINT to the child's whole process group, falling back to the
/// child alone when it has no group of its own.
fn interrupt_child(pid: u32) {
    let pid = pid as i32;
    if kill(Pid::from_raw(-pid), Signal::SIGINT).is_err() {
        let _ = kill(Pid::from_raw(pid), Signal::SIGINT);
    }
}

/// Runs `cmd` through the configured shell and waits for it.
///
/// `relay` sees output as it arrives (piped shape only), always cut on
/// character boundaries. The captured output is returned regardless.
/// `typeahead` polls for keys typed while a piped command runs; plain
/// bytes go to the child's stdin. CTRL-C interrupts the child's process
/// group and CTRL-D closes the stdin pipe.
/// While this runs, background job reaping is suspended so the wait here
/// sees its own child's status.
pub fn call_shell(
    config: &PalConfig,
    cmd: Option<&str>,
    io: &ShellIo,
    mut relay: Option<&mut dyn FnMut(&[u8])>,
    mut typeahead: Option<&mut dyn FnMut() -> Option<u8>>,
) -> Result<ShellResult> {
    let _guard = ReapGuard::new();
    debug!("call_shell: {:?} via {}", cmd, config.shell);
    match io {
        ShellIo::Inherit => {
            let status = match command_for(config, cmd).status() {
                Ok(s) => s,
                Err(e) => {
                    log::error!("cannot execute shell {}: {}", config.shell, e);
                    return Ok(ShellResult { code: EXEC_FAILED, output: Vec::new() });
                }
            };
            Ok(ShellResult { code: exit_code(status), output: Vec::new() })
        }
        ShellIo::TempFiles { input } => {
            let outfile =
                tempfile::NamedTempFile::new().context("Failed to create shell output file")?;
            let mut full = String::new();
            if let Some(cmd) = cmd {
                full.push('(');
                full.push_str(cmd);
                full.push(')');
            } else {
                full.push_str(&config.shell);
            }
            let infile = match input {
                Some(data) => {
                    let mut f = tempfile::NamedTempFile::new()
                        .context("Failed to create shell input file")?;
                    f.write_all(data).context("Failed to write shell input file")?;
                    f.flush().ok();
                    full.push_str(" < ");
                    full.push_str(&f.path().to_string_lossy());
                    Some(f)
                }
                None => None,
            };
            full.push_str(" > ");
            full.push_str(&outfile.path().to_string_lossy());
            full.push_str(" 2>&1");
            let status = command_for(config, Some(&full))
                .status()
                .with_context(|| format!("Failed to run shell {}", config.shell))?;
            drop(infile);
            let mut output =
                std::fs::read(outfile.path()).context("Failed to read shell output file")?;
            nul_to_nl(&mut output);
            Ok(ShellResult { code: exit_code(status), output })
        }
        ShellIo::Piped { input } => {
            use std::os::unix::process::CommandExt;
            let wants_stdin = input.is_some() || typeahead.is_some();
            let mut child = command_for(config, cmd)
                .stdin(if wants_stdin { Stdio::piped() } else { Stdio::null() })
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                // The child leads its own process group so an interrupt
                // reaches everything it spawns, not just the shell.
                .process_group(0)
                .spawn()
                .with_context(|| format!("Failed to run shell {}", config.shell))?;

            // A dedicated writer so a command that floods its output
            // before reading its input cannot deadlock us. When there is
            // no buffer to send, stdin stays here for typeahead.
            let mut stdin = child.stdin.take();
            let writer = input.clone().and_then(|data| {
                stdin.take().map(|mut stdin| {
                    std::thread::spawn(move || {
                        if let Err(e) = stdin.write_all(&data) {
                            trace!("shell input write ended early: {}", e);
                        }
                        // Dropping stdin is the EOF the filter waits for.
                    })
                })
            });

            let mut stdout = child.stdout.take().context("child stdout missing")?;
            let mut stderr = child.stderr.take().context("child stderr missing")?;
            use std::os::unix::io::AsRawFd;
            set_nonblocking(stdout.as_raw_fd())?;
            set_nonblocking(stderr.as_raw_fd())?;

            let mut output = Vec::new();
            let mut relayed = 0usize;
            let mut interrupted = false;
            let mut backoff_ms = 1u64;
            let mut out_open = true;
            let mut err_open = true;
            let mut chunk = [0u8; 4096];
            while out_open || err_open {
                if crate::signal::got_int() && !interrupted {
                    debug!("call_shell: interrupt, signaling group of {}", child.id());
                    interrupt_child(child.id());
                    interrupted = true;
                }
                let mut progress = false;
                if let Some(poll) = typeahead.as_deref_mut() {
                    while let Some(b) = poll() {
                        progress = true;
                        match b {
                            crate::keys::CTRL_C => {
                                interrupt_child(child.id());
                                interrupted = true;
                            }
                            crate::keys::CTRL_D => {
                                // EOF for a command reading its stdin.
                                stdin = None;
                            }
                            b => {
                                if let Some(s) = stdin.as_mut() {
                                    if s.write_all(&[b]).and_then(|_| s.flush()).is_err() {
                                        stdin = None;
                                    }
                                }
                            }
                        }
                    }
                }
                for (stream, open) in [
                    (&mut stdout as &mut dyn Read, &mut out_open),
                    (&mut stderr as &mut dyn Read, &mut err_open),
                ] {
                    if !*open {
                        continue;
                    }
                    match stream.read(&mut chunk) {
                        Ok(0) => *open = false,
                        Ok(n) => {
                            output.extend_from_slice(&chunk[..n]);
                            progress = true;
                        }
                        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
                        Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
                        Err(e) => return Err(e).context("shell output read failed"),
                    }
                }
                if let Some(relay) = relay.as_deref_mut() {
                    let complete = utf8_complete_prefix(&output);
                    if complete > relayed {
                        relay(&output[relayed..complete]);
                        relayed = complete;
                    }
                }
                if progress {
                    backoff_ms = 1;
                } else {
                    // Nothing arrived; ease off the polling gradually.
                    std::thread::sleep(Duration::from_millis(backoff_ms));
                    backoff_ms = (backoff_ms * 2).min(10);
                }
            }
            if let Some(relay) = relay.as_deref_mut() {
                if output.len() > relayed {
                    relay(&output[relayed..]);
                }
            }
            if let Some(writer) = writer {
                let _ = writer.join();
            }
            drop(stdin);
            let status = child.wait().context("Failed to wait for shell")?;
            nul_to_nl(&mut output);
            Ok(ShellResult { code: exit_code(status), output })
        }
    }
}
