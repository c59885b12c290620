// src/input/mod.rs

//! The input multiplexer.
//!
//! One primitive, `read_chars`, folds everything the editor can be woken
//! by (keystrokes, mouse records, resize and focus events, due timers,
//! clipboard/channel/scripting side work) into a single bounded wait.
//! The editor's top-level input loop is built over it and nothing else in
//! the process blocks.

pub mod mouse;
pub mod poll;
pub mod records;

use anyhow::{Context, Result};
use log::{debug, trace};
use std::os::unix::io::{AsFd, AsRawFd, OwnedFd, RawFd};
use std::time::Instant;

use crate::keys;
use crate::signal;
use mouse::{MouseButton, MouseDecoder, MouseEvent, PeekAdvice};
use poll::{FdPoller, Ready};
use records::{InputRecord, KeyRecord, MouseRecord, RecordQueue};

/// Maximum sleep per wait slice; side work and flags are serviced at
/// least this often while blocked.
pub const WAIT_SLICE_MS: u64 = 11;

const TOKEN_TTY: u64 = 0;
const TOKEN_WAKER: u64 = 1;

/// Something that can refill the record queue from the OS, waiting up to
/// `timeout_ms` for the first record.
pub trait RecordSource {
    fn poll(&mut self, queue: &mut RecordQueue, timeout_ms: i32) -> Result<()>;
}

/// A source that never produces anything; used where all input is
/// injected (tests, GUI builds where the toolkit owns the event loop).
#[derive(Debug, Default)]
pub struct NullSource;

impl RecordSource for NullSource {
    fn poll(&mut self, _queue: &mut RecordQueue, timeout_ms: i32) -> Result<()> {
        if timeout_ms > 0 {
            std::thread::sleep(std::time::Duration::from_millis(timeout_ms as u64));
        }
        Ok(())
    }
}

/// Cross-thread wakeup for the blocked multiplexer: a write end of the
/// self-pipe registered with the poller.
#[derive(Debug, Clone)]
pub struct Waker {
    write_fd: std::sync::Arc<OwnedFd>,
}

impl Waker {
    /// Wakes the event wait. Best effort; a full pipe already guarantees
    /// a pending wakeup.
    pub fn wake(&self) {
        let _ = nix::unistd::write(&*self.write_fd, &[1u8]);
    }
}

/// Raw-mode tty bytes as a record source.
pub struct UnixTtySource {
    tty_fd: RawFd,
    poller: FdPoller,
    wake_read: OwnedFd,
    waker: Waker,
    ready: Vec<Ready>,
}

impl UnixTtySource {
    pub fn new<F: AsFd>(tty: &F) -> Result<Self> {
        let tty_fd = tty.as_fd().as_raw_fd();
        let poller = FdPoller::new()?;
        poller.add(&tty_fd, TOKEN_TTY)?;
        let (pipe_r, pipe_w) =
            nix::unistd::pipe().context("Failed to create waker pipe")?;
        nix::fcntl::fcntl(
            pipe_r.as_fd(),
            nix::fcntl::FcntlArg::F_SETFL(nix::fcntl::OFlag::O_NONBLOCK),
        )
        .context("Failed to set waker pipe nonblocking")?;
        poller.add(&pipe_r, TOKEN_WAKER)?;
        Ok(UnixTtySource {
            tty_fd,
            poller,
            wake_read: pipe_r,
            waker: Waker { write_fd: std::sync::Arc::new(pipe_w) },
            ready: Vec::new(),
        })
    }

    pub fn waker(&self) -> Waker {
        self.waker.clone()
    }

    fn drain_waker_pipe(&mut self) {
        let mut sink = [0u8; 64];
        loop {
            match nix::unistd::read(&self.wake_read, &mut sink) {
                Ok(n) if n == sink.len() => continue,
                _ => break,
            }
        }
    }
}

impl RecordSource for UnixTtySource {
    fn poll(&mut self, queue: &mut RecordQueue, timeout_ms: i32) -> Result<()> {
        let mut ready = std::mem::take(&mut self.ready);
        self.poller.wait(&mut ready, timeout_ms)?;
        for ev in &ready {
            match ev.token {
                TOKEN_TTY => {
                    let mut buf = [0u8; 256];
                    // Borrow the fd for a direct read; it stays owned by
                    // the tty manager.
                    let fd = unsafe { std::os::unix::io::BorrowedFd::borrow_raw(self.tty_fd) };
                    match nix::unistd::read(&fd, &mut buf) {
                        Ok(n) => {
                            trace!("tty read {} bytes", n);
                            for &b in &buf[..n] {
                                queue.push(InputRecord::Byte(b));
                            }
                        }
                        Err(nix::Error::EAGAIN) | Err(nix::Error::EINTR) => {}
                        Err(e) => return Err(e).context("tty read failed"),
                    }
                }
                TOKEN_WAKER => self.drain_waker_pipe(),
                other => debug!("unexpected poll token {}", other),
            }
        }
        self.ready = ready;
        Ok(())
    }
}

/// A repeating or one-shot timer run from inside the wait.
struct Timer {
    id: u64,
    due_ms: u64,
    interval_ms: Option<u64>,
    callback: Box<dyn FnMut()>,
}

/// Timers owned by the multiplexer; callbacks run on the editor thread
/// between wait slices, never from an OS timer queue.
#[derive(Default)]
pub struct TimerList {
    timers: Vec<Timer>,
    next_id: u64,
}

impl TimerList {
    pub fn add(&mut self, after_ms: u64, interval_ms: Option<u64>, now_ms: u64, cb: Box<dyn FnMut()>) -> u64 {
        self.next_id += 1;
        self.timers.push(Timer {
            id: self.next_id,
            due_ms: now_ms + after_ms,
            interval_ms,
            callback: cb,
        });
        self.next_id
    }

    pub fn remove(&mut self, id: u64) -> bool {
        let before = self.timers.len();
        self.timers.retain(|t| t.id != id);
        before != self.timers.len()
    }

    /// Runs every due timer once; returns true when any ran.
    pub fn run_due(&mut self, now_ms: u64) -> bool {
        let mut ran = false;
        for t in &mut self.timers {
            if now_ms >= t.due_ms {
                (t.callback)();
                ran = true;
                match t.interval_ms {
                    Some(iv) => t.due_ms = now_ms + iv,
                    None => t.due_ms = u64::MAX, // swept below
                }
            }
        }
        self.timers.retain(|t| t.due_ms != u64::MAX);
        ran
    }
}

/// Work the multiplexer must keep serviced while blocked: clipboard
/// server traffic, channel I/O, scripting-runtime quanta.
#[derive(Default)]
pub struct SideWork {
    hooks: Vec<(&'static str, Box<dyn FnMut()>)>,
}

impl SideWork {
    pub fn register(&mut self, name: &'static str, hook: Box<dyn FnMut()>) {
        debug!("side work registered: {}", name);
        self.hooks.push((name, hook));
    }

    fn run_all(&mut self) {
        for (_, hook) in &mut self.hooks {
            hook();
        }
    }
}

fn button_code(button: MouseButton) -> u8 {
    match button {
        MouseButton::Left => 0,
        MouseButton::Middle => 1,
        MouseButton::Right => 2,
        MouseButton::Release => 3,
        MouseButton::Drag => 4,
        MouseButton::X1 => 5,
        MouseButton::X2 => 6,
        MouseButton::ScrollUp => 7,
        MouseButton::ScrollDown => 8,
        MouseButton::ScrollLeft => 9,
        MouseButton::ScrollRight => 10,
    }
}

/// The single suspension point of the editor.
pub struct InputMultiplexer<S: RecordSource> {
    source: S,
    queue: RecordQueue,
    mouse: MouseDecoder,
    timers: TimerList,
    side_work: SideWork,
    pending: Vec<u8>,
    pending_surrogate: Option<u16>,
    typeahead_gen: u64,
    resize_hook: Option<Box<dyn FnMut(u16, u16)>>,
    redraw_wanted: bool,
    tstp_pending: bool,
    updatetime_ms: u64,
    epoch: Instant,
}

impl<S: RecordSource> InputMultiplexer<S> {
    pub fn new(source: S, mousetime_ms: u64, updatetime_ms: u64) -> Self {
        InputMultiplexer {
            source,
            queue: RecordQueue::new(),
            mouse: MouseDecoder::new(mousetime_ms, false),
            timers: TimerList::default(),
            side_work: SideWork::default(),
            pending: Vec::new(),
            pending_surrogate: None,
            typeahead_gen: 0,
            resize_hook: None,
            redraw_wanted: false,
            tstp_pending: false,
            updatetime_ms,
            epoch: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.epoch.elapsed().as_millis() as u64
    }

    pub fn set_resize_hook(&mut self, hook: Box<dyn FnMut(u16, u16)>) {
        self.resize_hook = Some(hook);
    }

    pub fn timers_mut(&mut self) -> &mut TimerList {
        &mut self.timers
    }

    pub fn side_work_mut(&mut self) -> &mut SideWork {
        &mut self.side_work
    }

    pub fn mouse_mut(&mut self) -> &mut MouseDecoder {
        &mut self.mouse
    }

    pub fn now_ms_pub(&self) -> u64 {
        self.now_ms()
    }

    /// The token callers pass back to `read_chars` to detect typeahead
    /// replacement by an asynchronous source.
    pub fn typeahead_token(&self) -> u64 {
        self.typeahead_gen
    }

    /// Called by asynchronous producers (scripting callbacks, channel
    /// handlers) after stuffing the typeahead buffer.
    pub fn note_typeahead_changed(&mut self) {
        self.typeahead_gen = self.typeahead_gen.wrapping_add(1);
    }

    /// Test and GUI injection entry.
    pub fn inject(&mut self, rec: InputRecord) {
        self.queue.inject(rec);
    }

    /// True when a redraw was scheduled by SIGCONT while waiting.
    pub fn take_redraw_wanted(&mut self) -> bool {
        std::mem::take(&mut self.redraw_wanted)
    }

    fn encode_key(&mut self, key: KeyRecord) {
        if !key.down {
            // Key-ups only matter for surrogate/pairing bookkeeping.
            return;
        }
        if keys::is_high_surrogate(key.unit) {
            self.pending_surrogate = Some(key.unit);
            return;
        }
        if let Some(high) = self.pending_surrogate.take() {
            if let Some(ch) = keys::fold_surrogates(high, key.unit) {
                keys::push_modifiers(&mut self.pending, key.mods);
                keys::push_char(&mut self.pending, ch);
                return;
            }
            // Unpaired high surrogate: drop it, fall through with this
            // unit on its own.
        }
        match char::from_u32(key.unit as u32) {
            Some(ch) => {
                keys::push_modifiers(&mut self.pending, key.mods);
                keys::push_char(&mut self.pending, ch);
            }
            None => trace!("dropping unpairable key unit {:#x}", key.unit),
        }
    }

    fn encode_mouse_event(&mut self, ev: MouseEvent) {
        self.pending.push(keys::K_SPECIAL);
        self.pending.push(keys::KS_EXTRA);
        self.pending.push(keys::KE_MOUSE);
        self.pending.push(button_code(ev.button));
        self.pending.push(ev.mods);
        self.pending.push(ev.clicks);
        self.pending.extend_from_slice(&ev.row.to_be_bytes());
        self.pending.extend_from_slice(&ev.col.to_be_bytes());
    }

    fn decode_mouse(&mut self, rec: MouseRecord) {
        // The peek for Left+Right middle synthesis looks at the next
        // queued record, injected or real.
        let peeked = match self.queue.peek() {
            Some(InputRecord::Mouse(m)) => Some(*m),
            _ => None,
        };
        let now = self.now_ms();
        let (event, advice) = self.mouse.decode(&rec, peeked.as_ref(), now);
        if advice == PeekAdvice::Consume {
            let _ = self.queue.pop();
        }
        if let Some(ev) = event {
            self.encode_mouse_event(ev);
        }
    }

    /// Drains queued records into the pending byte buffer.
    fn drain_records(&mut self) {
        while self.pending.len() < 1024 {
            let Some(rec) = self.queue.pop() else { break };
            match rec {
                InputRecord::Byte(b) => keys::push_escaped(&mut self.pending, &[b]),
                InputRecord::Key(k) => self.encode_key(k),
                InputRecord::Mouse(m) => self.decode_mouse(m),
                InputRecord::Resize { cols, rows } => {
                    // Takes effect before the next character is returned.
                    if let Some(hook) = self.resize_hook.as_mut() {
                        hook(cols, rows);
                    }
                }
                InputRecord::Focus(gained) => {
                    if gained {
                        self.mouse.focus_gained();
                    }
                    keys::push_focus(&mut self.pending, gained);
                }
            }
        }
    }

    fn service_flags(&mut self) {
        if signal::take_do_resize() {
            if let Some(hook) = self.resize_hook.as_mut() {
                // Geometry is re-queried by the hook itself.
                hook(0, 0);
            }
        }
        if signal::take_got_tstp() {
            self.tstp_pending = true;
        }
        if signal::take_sigcont() && self.tstp_pending {
            // Back from a suspend: everything on screen is suspect, but
            // the wait itself is not woken for this.
            self.redraw_wanted = true;
            self.tstp_pending = false;
        }
    }

    /// Reads up to `buf.len()` canonical key bytes.
    ///
    /// * `timeout_ms == 0`: poll; returns 0 immediately when idle.
    /// * `timeout_ms > 0`: waits at most that long.
    /// * `timeout_ms < 0`: waits forever, synthesizing `CursorHold`
    ///   after `updatetime` idle milliseconds.
    ///
    /// Returns 0 on interrupt (`got_int` is left set for the caller) and
    /// when `change_token` no longer matches the typeahead generation.
    pub fn read_chars(&mut self, buf: &mut [u8], timeout_ms: i64, change_token: u64) -> usize {
        if buf.is_empty() {
            return 0;
        }
        let start = self.now_ms();
        let mut cursorhold_sent = false;

        loop {
            if change_token != self.typeahead_gen {
                trace!("typeahead replaced underneath read_chars");
                return 0;
            }
            if signal::got_int() {
                return 0;
            }

            self.service_flags();
            let now = self.now_ms();
            self.timers.run_due(now);
            self.side_work.run_all();
            self.drain_records();

            if !self.pending.is_empty() {
                let n = self.pending.len().min(buf.len());
                buf[..n].copy_from_slice(&self.pending[..n]);
                self.pending.drain(..n);
                return n;
            }

            let elapsed = self.now_ms().saturating_sub(start);
            let slice = if timeout_ms == 0 {
                return 0;
            } else if timeout_ms > 0 {
                let remaining = (timeout_ms as u64).saturating_sub(elapsed);
                if remaining == 0 {
                    return 0;
                }
                remaining.min(WAIT_SLICE_MS)
            } else {
                if !cursorhold_sent && elapsed >= self.updatetime_ms {
                    keys::push_cursorhold(&mut self.pending);
                    cursorhold_sent = true;
                    continue;
                }
                WAIT_SLICE_MS
            };

            if let Err(e) = self.source.poll(&mut self.queue, slice as i32) {
                log::warn!("input source poll failed: {:#}", e);
                return 0;
            }
        }
    }

    /// True when a poll would deliver at least one byte.
    pub fn char_avail(&mut self) -> bool {
        !self.pending.is_empty() || {
            let _ = self.source.poll(&mut self.queue, 0);
            self.drain_records();
            !self.pending.is_empty()
        }
    }
}

impl InputMultiplexer<UnixTtySource> {
    pub fn for_tty<F: AsFd>(tty: &F, mousetime_ms: u64, updatetime_ms: u64) -> Result<Self> {
        let source = UnixTtySource::new(tty)?;
        Ok(InputMultiplexer::new(source, mousetime_ms, updatetime_ms))
    }

    pub fn waker(&self) -> Waker {
        self.source.waker()
    }
}

#[cfg(test)]
mod tests {
    use super::records::{ButtonState, MouseMotion};
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;

    fn mux() -> InputMultiplexer<NullSource> {
        InputMultiplexer::new(NullSource, 500, 40)
    }

    fn key_rec(unit: u16) -> InputRecord {
        InputRecord::Key(KeyRecord { down: true, unit, mods: 0 })
    }

    #[test]
    fn injected_records_come_back_in_order() {
        let mut m = mux();
        for b in [b'h', b'e', b'l', b'l', b'o'] {
            m.inject(key_rec(b as u16));
        }
        let tok = m.typeahead_token();
        let mut buf = [0u8; 16];
        let n = m.read_chars(&mut buf, 0, tok);
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn poll_with_no_input_returns_zero() {
        let mut m = mux();
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        assert_eq!(m.read_chars(&mut buf, 0, tok), 0);
    }

    #[test]
    fn bounded_wait_times_out() {
        let mut m = mux();
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        let start = std::time::Instant::now();
        assert_eq!(m.read_chars(&mut buf, 30, tok), 0);
        assert!(start.elapsed().as_millis() >= 25);
    }

    #[test]
    fn stale_change_token_returns_zero_with_input_pending() {
        let mut m = mux();
        m.inject(key_rec(b'x' as u16));
        let tok = m.typeahead_token();
        m.note_typeahead_changed();
        let mut buf = [0u8; 4];
        assert_eq!(m.read_chars(&mut buf, 0, tok), 0);
        // With the fresh token the byte is still there.
        let tok = m.typeahead_token();
        assert_eq!(m.read_chars(&mut buf, 0, tok), 1);
        assert_eq!(buf[0], b'x');
    }

    #[test]
    fn infinite_wait_synthesizes_cursorhold_after_updatetime() {
        let mut m = mux(); // updatetime = 40ms
        let tok = m.typeahead_token();
        let mut buf = [0u8; 8];
        let n = m.read_chars(&mut buf, -1, tok);
        assert_eq!(
            &buf[..n],
            &[keys::K_SPECIAL, keys::KS_EXTRA, keys::KE_CURSORHOLD]
        );
    }

    #[test]
    fn interrupt_flag_aborts_the_wait() {
        let mut m = mux();
        signal::set_got_int(true);
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        assert_eq!(m.read_chars(&mut buf, -1, tok), 0);
        assert!(signal::got_int());
        signal::set_got_int(false);
    }

    #[test]
    fn resize_record_runs_hook_before_next_char() {
        let mut m = mux();
        let seen = Rc::new(Cell::new((0u16, 0u16)));
        let seen2 = seen.clone();
        m.set_resize_hook(Box::new(move |c, r| seen2.set((c, r))));
        m.inject(InputRecord::Resize { cols: 132, rows: 50 });
        m.inject(key_rec(b'a' as u16));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        let n = m.read_chars(&mut buf, 0, tok);
        assert_eq!(seen.get(), (132, 50));
        assert_eq!(&buf[..n], b"a");
    }

    #[test]
    fn surrogate_pair_keys_fold_into_escaped_utf8() {
        let mut m = mux();
        m.inject(key_rec(0xd83d));
        m.inject(key_rec(0xde00));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 8];
        let n = m.read_chars(&mut buf, 0, tok);
        // U+1F600, with its trailing 0x80 byte escaped as a K_SPECIAL
        // triplet so it cannot read as a frame lead-in.
        assert_eq!(
            &buf[..n],
            [0xf0, 0x9f, 0x98, keys::K_SPECIAL, keys::KS_SPECIAL, keys::KE_FILLER]
        );
    }

    #[test]
    fn timers_run_while_waiting() {
        let mut m = mux();
        let fired = Rc::new(Cell::new(0u32));
        let fired2 = fired.clone();
        let now = m.now_ms_pub();
        m.timers_mut()
            .add(5, None, now, Box::new(move || fired2.set(fired2.get() + 1)));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        let _ = m.read_chars(&mut buf, 30, tok);
        assert_eq!(fired.get(), 1);
    }

    #[test]
    fn side_work_serviced_during_wait() {
        let mut m = mux();
        let count = Rc::new(Cell::new(0u32));
        let count2 = count.clone();
        m.side_work_mut()
            .register("clipboard", Box::new(move || count2.set(count2.get() + 1)));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 4];
        let _ = m.read_chars(&mut buf, 25, tok);
        // At least two ~11ms slices fit in 25ms.
        assert!(count.get() >= 2, "side work ran {} times", count.get());
    }

    #[test]
    fn mouse_record_encodes_canonical_frame() {
        let mut m = mux();
        m.inject(InputRecord::Mouse(MouseRecord {
            buttons: ButtonState::LEFT,
            motion: MouseMotion::None,
            col: 5,
            row: 7,
            mods: 0,
        }));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 16];
        let n = m.read_chars(&mut buf, 0, tok);
        assert_eq!(n, 10);
        assert_eq!(&buf[..4], &[keys::K_SPECIAL, keys::KS_EXTRA, keys::KE_MOUSE, 0]);
        assert_eq!(buf[5], 1); // single click
        assert_eq!(&buf[6..8], &7u16.to_be_bytes());
        assert_eq!(&buf[8..10], &5u16.to_be_bytes());
    }

    #[test]
    fn focus_gain_drops_exactly_one_mouse_record() {
        let mut m = mux();
        m.inject(InputRecord::Focus(true));
        m.inject(InputRecord::Mouse(MouseRecord {
            buttons: ButtonState::LEFT,
            motion: MouseMotion::None,
            col: 1,
            row: 1,
            mods: 0,
        }));
        m.inject(InputRecord::Mouse(MouseRecord {
            buttons: ButtonState::empty(),
            motion: MouseMotion::None,
            col: 1,
            row: 1,
            mods: 0,
        }));
        let tok = m.typeahead_token();
        let mut buf = [0u8; 32];
        let n = m.read_chars(&mut buf, 0, tok);
        // Focus frame, then only one mouse frame: the press was dropped
        // and the release suppressed (nothing was pressed), so exactly
        // the focus frame remains.
        assert_eq!(&buf[..n], &[keys::K_SPECIAL, keys::KS_EXTRA, keys::KE_FOCUSGAINED]);
    }
}
