// src/input/records.rs

//! Low-level input records and the FIFO they travel through.
//!
//! Records model console input events (key, mouse, resize, focus) in an
//! OS-neutral form. The queue has two producers: the OS reader and the
//! test-injection API; the real console is only consulted when the queue
//! is empty. Consumption is strictly FIFO except that a synthesized
//! key-up is always delivered immediately after its key-down, before any
//! later OS record.

use bitflags::bitflags;
use std::collections::VecDeque;

bitflags! {
    /// Raw button state carried by a mouse record.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct ButtonState: u8 {
        const LEFT = 0x01;
        const RIGHT = 0x02;
        const MIDDLE = 0x04;
        const X1 = 0x08;
        const X2 = 0x10;
    }
}

/// Motion/wheel qualifier of a mouse record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseMotion {
    /// Button change with no movement.
    None,
    /// The pointer moved (possibly within the same cell).
    Moved,
    /// The OS pre-detected a double click.
    DoubleClick,
    /// Vertical wheel; positive is away from the user.
    Wheeled(i16),
    /// Horizontal wheel; positive is to the right.
    HWheeled(i16),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseRecord {
    pub buttons: ButtonState,
    pub motion: MouseMotion,
    pub col: u16,
    pub row: u16,
    /// MOD_MASK_* bits from `keys`.
    pub mods: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyRecord {
    pub down: bool,
    /// UTF-16 code unit as consoles deliver it; surrogate halves are
    /// paired by the multiplexer.
    pub unit: u16,
    pub mods: u8,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRecord {
    Key(KeyRecord),
    Mouse(MouseRecord),
    Resize { cols: u16, rows: u16 },
    Focus(bool),
    /// One raw byte from a tty in raw mode; passed through escaped but
    /// otherwise untranslated.
    Byte(u8),
}

/// FIFO of input records with injection support.
#[derive(Debug, Default)]
pub struct RecordQueue {
    queue: VecDeque<InputRecord>,
    pending_keyup: Option<KeyRecord>,
}

impl RecordQueue {
    pub fn new() -> Self {
        RecordQueue::default()
    }

    /// Appends a record from the OS reader. Consecutive buffer-size
    /// events are coalesced: only the latest geometry survives.
    pub fn push(&mut self, rec: InputRecord) {
        if let InputRecord::Resize { .. } = rec {
            if let Some(back @ InputRecord::Resize { .. }) = self.queue.back_mut() {
                *back = rec;
                return;
            }
        }
        self.queue.push_back(rec);
    }

    /// Appends a key-down and schedules its synthesized key-up. The pair
    /// is indivisible: the up is returned before any record pushed later.
    pub fn push_paired_key(&mut self, down: KeyRecord) {
        debug_assert!(down.down);
        self.queue.push_back(InputRecord::Key(down));
        self.pending_keyup = Some(KeyRecord { down: false, ..down });
    }

    /// Test-injection entry (the `test_mswin_event` surface). Injected
    /// records take the same path as OS records, so they participate in
    /// coalescing and in the focus heuristics downstream.
    pub fn inject(&mut self, rec: InputRecord) {
        self.push(rec);
    }

    pub fn is_empty(&self) -> bool {
        self.pending_keyup.is_none() && self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len() + usize::from(self.pending_keyup.is_some())
    }

    pub fn pop(&mut self) -> Option<InputRecord> {
        // A scheduled key-up outranks everything that arrived after the
        // matching key-down.
        if let Some(up) = self.pending_keyup.take() {
            // Only if the down has already been consumed.
            if !self
                .queue
                .front()
                .is_some_and(|r| matches!(*r, InputRecord::Key(k) if k.down && k.unit == up.unit))
            {
                return Some(InputRecord::Key(up));
            }
            self.pending_keyup = Some(up);
        }
        self.queue.pop_front()
    }

    pub fn peek(&self) -> Option<&InputRecord> {
        self.queue.front()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(unit: u16, down: bool) -> InputRecord {
        InputRecord::Key(KeyRecord { down, unit, mods: 0 })
    }

    #[test]
    fn fifo_order_preserved() {
        let mut q = RecordQueue::new();
        q.push(key(b'a' as u16, true));
        q.push(key(b'b' as u16, true));
        q.push(InputRecord::Focus(true));
        assert_eq!(q.pop(), Some(key(b'a' as u16, true)));
        assert_eq!(q.pop(), Some(key(b'b' as u16, true)));
        assert_eq!(q.pop(), Some(InputRecord::Focus(true)));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn consecutive_resizes_coalesce() {
        let mut q = RecordQueue::new();
        q.push(InputRecord::Resize { cols: 80, rows: 24 });
        q.push(InputRecord::Resize { cols: 100, rows: 30 });
        q.push(InputRecord::Resize { cols: 120, rows: 40 });
        assert_eq!(q.pop(), Some(InputRecord::Resize { cols: 120, rows: 40 }));
        assert_eq!(q.pop(), None);
    }

    #[test]
    fn nonadjacent_resizes_survive() {
        let mut q = RecordQueue::new();
        q.push(InputRecord::Resize { cols: 80, rows: 24 });
        q.push(key(b'x' as u16, true));
        q.push(InputRecord::Resize { cols: 100, rows: 30 });
        assert_eq!(q.len(), 3);
    }

    #[test]
    fn paired_keyup_before_later_records() {
        let mut q = RecordQueue::new();
        q.push_paired_key(KeyRecord { down: true, unit: 0x3042, mods: 0 });
        q.push(key(b'z' as u16, true));
        assert_eq!(q.pop(), Some(key(0x3042, true)));
        // Synthesized up comes before the 'z' that was pushed later.
        assert_eq!(q.pop(), Some(key(0x3042, false)));
        assert_eq!(q.pop(), Some(key(b'z' as u16, true)));
    }

    #[test]
    fn injection_is_fifo_with_os_records() {
        let mut q = RecordQueue::new();
        q.inject(key(b'1' as u16, true));
        q.inject(key(b'2' as u16, true));
        q.push(key(b'3' as u16, true));
        assert_eq!(q.pop(), Some(key(b'1' as u16, true)));
        assert_eq!(q.pop(), Some(key(b'2' as u16, true)));
        assert_eq!(q.pop(), Some(key(b'3' as u16, true)));
    }
}
