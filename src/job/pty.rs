// src/job/pty.rs

//! Pseudo-terminal plumbing for jobs and terminal windows.

use anyhow::{Context, Result};
use log::trace;
use nix::pty::{openpty, Winsize};
use std::os::fd::{AsRawFd, OwnedFd, RawFd};

nix::ioctl_write_ptr_bad!(tiocswinsz, nix::libc::TIOCSWINSZ, Winsize);

fn winsize(cols: u16, rows: u16) -> Winsize {
    Winsize {
        ws_row: rows,
        ws_col: cols,
        ws_xpixel: 0,
        ws_ypixel: 0,
    }
}

/// Both ends of a freshly opened pty. The master stays with the editor;
/// the slave is handed to the child as stdin/stdout/stderr and closed on
/// the parent side once the fork is done.
#[derive(Debug)]
pub struct PtyPair {
    pub master: OwnedFd,
    pub slave: OwnedFd,
}

impl PtyPair {
    pub fn open(cols: u16, rows: u16) -> Result<Self> {
        let ws = winsize(cols, rows);
        let ends = openpty(Some(&ws), None).context("Failed to open pty pair")?;
        trace!(
            "opened pty master fd {} slave fd {} at {}x{}",
            ends.master.as_raw_fd(),
            ends.slave.as_raw_fd(),
            cols,
            rows
        );
        Ok(PtyPair {
            master: ends.master,
            slave: ends.slave,
        })
    }

    /// Pushes a new size to the slave side; the child sees SIGWINCH.
    pub fn resize(&self, cols: u16, rows: u16) -> Result<()> {
        set_winsize(self.master.as_raw_fd(), cols, rows)
    }

    /// Device name of the slave end, for display alongside the job.
    pub fn slave_name(&self) -> Option<String> {
        let mut buf = [0u8; 128];
        let rc = unsafe {
            libc::ttyname_r(self.slave.as_raw_fd(), buf.as_mut_ptr().cast(), buf.len())
        };
        if rc != 0 {
            return None;
        }
        let len = buf.iter().position(|&b| b == 0)?;
        String::from_utf8(buf[..len].to_vec()).ok()
    }
}

pub fn set_winsize(fd: RawFd, cols: u16, rows: u16) -> Result<()> {
    let ws = winsize(cols, rows);
    unsafe { tiocswinsz(fd, &ws) }
        .with_context(|| format!("Failed to resize pty fd {} to {}x{}", fd, cols, rows))?;
    Ok(())
}

/// Per-child setup between fork and exec: become a session leader and
/// take the slave as the controlling terminal and standard descriptors.
/// Runs in the child, so only async-signal-safe calls.
pub fn child_session_setup(slave: RawFd) -> std::result::Result<(), nix::Error> {
    nix::unistd::setsid()?;
    unsafe {
        if libc::ioctl(slave, libc::TIOCSCTTY as _, 0) == -1 {
            return Err(nix::Error::last());
        }
        for target in 0..3 {
            if libc::dup2(slave, target) == -1 {
                return Err(nix::Error::last());
            }
        }
        if slave > 2 {
            libc::close(slave);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_and_resize_pty() {
        let pair = PtyPair::open(80, 24).unwrap();
        assert!(pair.master.as_raw_fd() >= 0);
        assert!(pair.slave.as_raw_fd() >= 0);
        pair.resize(120, 40).unwrap();
    }

    #[test]
    fn slave_has_a_device_name() {
        let pair = PtyPair::open(80, 24).unwrap();
        let name = pair.slave_name().unwrap();
        assert!(name.starts_with("/dev/"), "unexpected name {:?}", name);
    }

    #[test]
    fn resize_on_bad_fd_fails() {
        assert!(set_winsize(-1, 80, 24).is_err());
    }
}
