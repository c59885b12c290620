// src/input/poll.rs

//! Readiness polling for the tty fd and the self-pipe waker.
//!
//! A thin wrapper over `epoll` using raw `libc` calls; the multiplexer
//! only ever waits on two descriptors, so the interface is deliberately
//! smaller than a general reactor.

use anyhow::{Context, Result};
use bitflags::bitflags;
use log::{debug, trace, warn};
use std::io;
use std::os::unix::io::{AsRawFd, RawFd};

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ReadyFlags: u32 {
        const IN = libc::EPOLLIN as u32;
        const ERR = libc::EPOLLERR as u32;
        const HUP = libc::EPOLLHUP as u32;
    }
}

/// A descriptor that became ready, identified by the token it was
/// registered with.
#[derive(Debug, Clone, Copy)]
pub struct Ready {
    pub token: u64,
    pub flags: ReadyFlags,
}

#[derive(Debug)]
pub struct FdPoller {
    epoll_fd: RawFd,
}

impl FdPoller {
    pub fn new() -> Result<Self> {
        let epoll_fd = unsafe { libc::epoll_create1(libc::O_CLOEXEC) };
        if epoll_fd == -1 {
            return Err(io::Error::last_os_error()).context("epoll_create1 failed");
        }
        debug!("FdPoller created with epoll_fd {}", epoll_fd);
        Ok(FdPoller { epoll_fd })
    }

    pub fn add<S: AsRawFd>(&self, source: &S, token: u64) -> Result<()> {
        let fd = source.as_raw_fd();
        let mut event = libc::epoll_event {
            events: libc::EPOLLIN as u32,
            u64: token,
        };
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_ADD, fd, &mut event) } == -1 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to add fd {} to epoll (token {})", fd, token));
        }
        trace!("added fd {} to epoll_fd {} token {}", fd, self.epoll_fd, token);
        Ok(())
    }

    pub fn delete(&self, fd: RawFd) -> Result<()> {
        let mut event: libc::epoll_event = unsafe { std::mem::zeroed() };
        if unsafe { libc::epoll_ctl(self.epoll_fd, libc::EPOLL_CTL_DEL, fd, &mut event) } == -1 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("Failed to delete fd {} from epoll", fd));
        }
        Ok(())
    }

    /// Waits up to `timeout_ms` for readiness. An interrupted wait
    /// (EINTR) reports no events rather than an error so signal flags get
    /// serviced promptly by the caller.
    pub fn wait(&self, out: &mut Vec<Ready>, timeout_ms: i32) -> Result<()> {
        let mut raw: [libc::epoll_event; 8] = unsafe { std::mem::zeroed() };
        let n = unsafe { libc::epoll_wait(self.epoll_fd, raw.as_mut_ptr(), 8, timeout_ms) };
        out.clear();
        if n == -1 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                trace!("epoll_wait interrupted");
                return Ok(());
            }
            return Err(err).context("epoll_wait failed");
        }
        for ev in raw.iter().take(n as usize) {
            out.push(Ready {
                token: ev.u64,
                flags: ReadyFlags::from_bits_truncate(ev.events),
            });
        }
        Ok(())
    }
}

impl Drop for FdPoller {
    fn drop(&mut self) {
        if unsafe { libc::close(self.epoll_fd) } == -1 {
            warn!(
                "failed to close epoll_fd {}: {}",
                self.epoll_fd,
                io::Error::last_os_error()
            );
        }
    }
}
