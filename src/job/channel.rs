// src/job/channel.rs

//! Channels: buffered stdio conduits between the editor and a job.
//!
//! A channel owns up to three parts (stdin, stdout, stderr). Parts backed
//! by a pty share one descriptor; pipe-backed parts each have their own.
//! Channels are reference counted because scripts can hold one after the
//! job ends; the buffers keep draining until every reference is gone.

use anyhow::{Context, Result};
use log::trace;
use std::io;
use std::os::fd::OwnedFd;

/// Which stream of the job a call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChanPart {
    In,
    Out,
    Err,
}

#[derive(Debug, Default)]
struct PartState {
    fd: Option<OwnedFd>,
    buffer: Vec<u8>,
    eof: bool,
}

impl PartState {
    fn drain_fd(&mut self) -> Result<usize> {
        let Some(fd) = &self.fd else { return Ok(0) };
        let mut chunk = [0u8; 4096];
        let mut total = 0;
        loop {
            match nix::unistd::read(fd, &mut chunk) {
                Ok(0) => {
                    self.eof = true;
                    self.fd = None;
                    break;
                }
                Ok(n) => {
                    self.buffer.extend_from_slice(&chunk[..n]);
                    total += n;
                }
                Err(nix::errno::Errno::EAGAIN) => break,
                Err(nix::errno::Errno::EINTR) => continue,
                // A pty master reports EIO once the slave side is gone.
                Err(nix::errno::Errno::EIO) => {
                    self.eof = true;
                    self.fd = None;
                    break;
                }
                Err(e) => return Err(e).context("channel read failed"),
            }
        }
        Ok(total)
    }
}

#[derive(Debug)]
pub struct Channel {
    id: u64,
    part_in: PartState,
    part_out: PartState,
    part_err: PartState,
    refcount: u32,
    /// Keep the channel allocated even at refcount zero.
    pub keep_open: bool,
}

impl Channel {
    pub fn new(
        id: u64,
        fd_in: Option<OwnedFd>,
        fd_out: Option<OwnedFd>,
        fd_err: Option<OwnedFd>,
    ) -> Self {
        Channel {
            id,
            part_in: PartState { fd: fd_in, ..Default::default() },
            part_out: PartState { fd: fd_out, ..Default::default() },
            part_err: PartState { fd: fd_err, ..Default::default() },
            refcount: 1,
            keep_open: false,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    fn part_mut(&mut self, part: ChanPart) -> &mut PartState {
        match part {
            ChanPart::In => &mut self.part_in,
            ChanPart::Out => &mut self.part_out,
            ChanPart::Err => &mut self.part_err,
        }
    }

    /// Writes to the job's stdin. Short writes are retried; EPIPE turns
    /// the in-part off instead of erroring, matching a job that exited
    /// between the check and the write.
    pub fn write_input(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let Some(fd) = &self.part_in.fd else { break };
            match nix::unistd::write(fd, data) {
                Ok(n) => data = &data[n..],
                Err(nix::errno::Errno::EINTR) => continue,
                Err(nix::errno::Errno::EPIPE) => {
                    trace!("channel {}: stdin closed by the job", self.id);
                    self.part_in.fd = None;
                    self.part_in.eof = true;
                    break;
                }
                Err(e) => return Err(io::Error::from(e)).context("channel write failed"),
            }
        }
        Ok(())
    }

    /// Pulls whatever the job has produced on `part` into its buffer and
    /// returns the buffered bytes.
    pub fn read_output(&mut self, part: ChanPart) -> Result<Vec<u8>> {
        let id = self.id;
        let state = self.part_mut(part);
        let pulled = state.drain_fd()?;
        if pulled > 0 {
            trace!("channel {}: drained {} bytes from {:?}", id, pulled, part);
        }
        Ok(std::mem::take(&mut state.buffer))
    }

    /// Closes one direction. Closing stdin is how the editor signals EOF
    /// to a filter job.
    pub fn close_part(&mut self, part: ChanPart) {
        let state = self.part_mut(part);
        state.fd = None;
        state.eof = true;
    }

    /// No descriptor left and nothing buffered.
    pub fn part_finished(&self, part: ChanPart) -> bool {
        let state = match part {
            ChanPart::In => &self.part_in,
            ChanPart::Out => &self.part_out,
            ChanPart::Err => &self.part_err,
        };
        state.fd.is_none() && state.buffer.is_empty()
    }

    pub fn incref(&mut self) {
        self.refcount += 1;
    }

    /// Drops one reference; returns true when the channel may be freed.
    pub fn unref(&mut self) -> bool {
        self.refcount = self.refcount.saturating_sub(1);
        self.refcount == 0 && !self.keep_open
    }

    /// Output fd to poll for readability, if any remains.
    pub fn poll_fd(&self) -> Option<&OwnedFd> {
        self.part_out.fd.as_ref().or(self.part_err.fd.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::unistd::pipe;

    fn pipe_channel() -> (Channel, OwnedFd, OwnedFd) {
        // The channel holds the write end of stdin and the read end of
        // stdout, like the parent after a job fork.
        let (stdin_r, stdin_w) = pipe().unwrap();
        let (stdout_r, stdout_w) = pipe().unwrap();
        let ch = Channel::new(1, Some(stdin_w), Some(stdout_r), None);
        (ch, stdin_r, stdout_w)
    }

    #[test]
    fn write_reaches_the_far_end() {
        let (mut ch, stdin_r, _stdout_w) = pipe_channel();
        ch.write_input(b"hello").unwrap();
        let mut buf = [0u8; 16];
        let n = nix::unistd::read(&stdin_r, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn read_drains_far_end_output() {
        let (mut ch, _stdin_r, stdout_w) = pipe_channel();
        nix::unistd::write(&stdout_w, b"result").unwrap();
        drop(stdout_w);
        let got = ch.read_output(ChanPart::Out).unwrap();
        assert_eq!(got, b"result");
        assert!(ch.part_finished(ChanPart::Out));
    }

    #[test]
    fn refcount_gates_release() {
        let (mut ch, _a, _b) = pipe_channel();
        ch.incref();
        assert!(!ch.unref());
        assert!(ch.unref());
    }

    #[test]
    fn keep_open_blocks_release() {
        let (mut ch, _a, _b) = pipe_channel();
        ch.keep_open = true;
        assert!(!ch.unref());
    }

    #[test]
    fn write_after_reader_gone_is_not_fatal() {
        let (mut ch, stdin_r, _stdout_w) = pipe_channel();
        drop(stdin_r);
        // SIGPIPE is ignored by the handler install; here the raw write
        // yields EPIPE which must be swallowed.
        crate::signal::install_signal_handlers();
        ch.write_input(b"late").unwrap();
        assert!(ch.part_finished(ChanPart::In));
    }
}
