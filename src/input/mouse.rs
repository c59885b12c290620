// src/input/mouse.rs

//! Mouse record decoding.
//!
//! Converts raw console mouse records into the editor's canonical event
//! stream. Every Left/Middle/Right press is followed by zero or more
//! drags and exactly one release; multi-clicks are counted here; a
//! two-button mouse can fake Middle by holding Left and Right together,
//! which needs a peek at the following record before committing.

use log::trace;

use super::records::{ButtonState, MouseMotion, MouseRecord};
use crate::keys::{MOD_MASK_ALT, MOD_MASK_CTRL, MOD_MASK_SHIFT};

/// Canonical mouse button / event kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MouseButton {
    Left,
    Middle,
    Right,
    Release,
    Drag,
    X1,
    X2,
    ScrollUp,
    ScrollDown,
    ScrollLeft,
    ScrollRight,
}

impl MouseButton {
    /// Direction code used in the packed scroll representation.
    fn scroll_code(self) -> Option<u8> {
        match self {
            MouseButton::ScrollUp => Some(0),
            MouseButton::ScrollDown => Some(1),
            MouseButton::ScrollLeft => Some(2),
            MouseButton::ScrollRight => Some(3),
            _ => None,
        }
    }
}

/// A decoded event delivered to the editor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MouseEvent {
    pub button: MouseButton,
    /// MOD_MASK_* bits.
    pub mods: u8,
    pub row: u16,
    pub col: u16,
    /// 1..=4; meaningful for presses only.
    pub clicks: u8,
}

impl MouseEvent {
    /// Packs a scroll event as `(direction << 8) | modifiers`; `None` for
    /// non-scroll events.
    pub fn packed_scroll(&self) -> Option<u16> {
        self.button
            .scroll_code()
            .map(|dir| ((dir as u16) << 8) | self.mods as u16)
    }
}

/// What the decoder wants the caller to do with the peeked record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeekAdvice {
    /// Nothing consumed; deliver the peeked record normally.
    Keep,
    /// The peeked record was folded into this decode; drop it.
    Consume,
}

/// Session-long mouse state; mutated only here.
#[derive(Debug)]
pub struct MouseDecoder {
    enabled: bool,
    /// Two-button hardware: Left+Right fakes Middle.
    two_button: bool,
    mousetime: u64,
    last_button: Option<MouseButton>,
    last_col: i32,
    last_row: i32,
    last_click_time: u64,
    clicks: u8,
    released: bool,
    next_is_middle: bool,
    just_got_focus: bool,
    last_emitted: Option<MouseEvent>,
}

impl MouseDecoder {
    pub fn new(mousetime: u64, two_button: bool) -> Self {
        MouseDecoder {
            enabled: true,
            two_button,
            mousetime,
            last_button: None,
            last_col: -1,
            last_row: -1,
            last_click_time: 0,
            clicks: 1,
            released: true,
            next_is_middle: false,
            just_got_focus: false,
            last_emitted: None,
        }
    }

    /// Milliseconds the caller should wait for a peek record when a lone
    /// Left or Right arrives on two-button hardware.
    pub fn middle_peek_window(&self) -> u64 {
        self.mousetime / 3
    }

    pub fn set_enabled(&mut self, on: bool) {
        self.enabled = on;
    }

    /// The first mouse record after gaining focus is spurious; drop it.
    pub fn focus_gained(&mut self) {
        self.just_got_focus = true;
    }

    fn mods_of(rec: &MouseRecord) -> u8 {
        rec.mods & (MOD_MASK_SHIFT | MOD_MASK_CTRL | MOD_MASK_ALT)
    }

    fn decode_wheel(&mut self, rec: &MouseRecord) -> Option<MouseEvent> {
        let button = match rec.motion {
            MouseMotion::Wheeled(delta) => {
                if delta >= 0 {
                    MouseButton::ScrollUp
                } else {
                    MouseButton::ScrollDown
                }
            }
            MouseMotion::HWheeled(delta) => {
                if delta < 0 {
                    MouseButton::ScrollLeft
                } else {
                    MouseButton::ScrollRight
                }
            }
            _ => return None,
        };
        Some(MouseEvent {
            button,
            mods: Self::mods_of(rec),
            row: rec.row,
            col: rec.col,
            clicks: 1,
        })
    }

    /// Decodes one record. `peek` is the next record, if the caller has
    /// one, used only for the Left+Right Middle synthesis; the returned
    /// advice says whether it was consumed.
    pub fn decode(
        &mut self,
        rec: &MouseRecord,
        peek: Option<&MouseRecord>,
        now_ms: u64,
    ) -> (Option<MouseEvent>, PeekAdvice) {
        if !self.enabled {
            return (None, PeekAdvice::Keep);
        }
        if self.just_got_focus {
            // Exactly one spurious record is swallowed.
            self.just_got_focus = false;
            trace!("dropping first mouse record after focus gain");
            return (None, PeekAdvice::Keep);
        }

        if matches!(rec.motion, MouseMotion::Wheeled(_) | MouseMotion::HWheeled(_)) {
            return (self.decode_wheel(rec), PeekAdvice::Keep);
        }

        let col = rec.col as i32;
        let row = rec.row as i32;
        let moved = rec.motion == MouseMotion::Moved;

        // Moves within the same character cell carry no information.
        if moved && col == self.last_col && row == self.last_row {
            return (None, PeekAdvice::Keep);
        }

        let advice = PeekAdvice::Keep;
        let mut button;
        if rec.buttons.is_empty() {
            button = MouseButton::Release;
            if self.released {
                // Only one release between presses.
                return (None, PeekAdvice::Keep);
            }
            self.released = true;
        } else {
            let lr = rec.buttons & (ButtonState::LEFT | ButtonState::RIGHT);
            // Lone Left or Right on a two-button mouse: if the very next
            // record shows both held, this was the first half of a faked
            // Middle; fold the pair.
            if self.two_button
                && self.last_button != Some(MouseButton::Drag)
                && (lr == ButtonState::LEFT || lr == ButtonState::RIGHT)
            {
                if let Some(next) = peek {
                    if next
                        .buttons
                        .contains(ButtonState::LEFT | ButtonState::RIGHT)
                        && next.motion != MouseMotion::Moved
                    {
                        let folded = MouseRecord {
                            buttons: ButtonState::LEFT | ButtonState::RIGHT,
                            ..*rec
                        };
                        let (ev, _) = self.decode(&folded, None, now_ms);
                        return (ev, PeekAdvice::Consume);
                    }
                }
            }

            if self.next_is_middle {
                button = if moved { MouseButton::Drag } else { MouseButton::Middle };
                self.next_is_middle = false;
            } else if self.two_button
                && lr == (ButtonState::LEFT | ButtonState::RIGHT)
            {
                button = MouseButton::Middle;
                if !self.released && !moved {
                    // The press that completed the chord is still owed a
                    // release for the first button.
                    self.next_is_middle = true;
                    button = MouseButton::Release;
                }
            } else if rec.buttons.contains(ButtonState::LEFT) {
                button = MouseButton::Left;
            } else if rec.buttons.contains(ButtonState::MIDDLE) {
                button = MouseButton::Middle;
            } else if rec.buttons.contains(ButtonState::RIGHT) {
                button = MouseButton::Right;
            } else if rec.buttons.contains(ButtonState::X1) {
                button = MouseButton::X1;
            } else {
                button = MouseButton::X2;
            }

            if !self.released
                && !self.next_is_middle
                && Some(button) != self.last_button
                && self.last_button != Some(MouseButton::Drag)
            {
                // A different button while one is still down; ignore.
                return (None, advice);
            }
            self.released = self.next_is_middle;
        }

        match rec.motion {
            MouseMotion::None | MouseMotion::DoubleClick => {
                if button != MouseButton::Release {
                    // Same button at the same cell within 'mousetime'
                    // counts up; anything else starts over at 1.
                    if self.last_col != col
                        || self.last_row != row
                        || Some(button) != self.last_button
                        || now_ms.saturating_sub(self.last_click_time) > self.mousetime
                    {
                        self.clicks = 1;
                    } else {
                        self.clicks += 1;
                        if self.clicks > 4 {
                            self.clicks = 1;
                        }
                    }
                    self.last_click_time = now_ms;
                }
            }
            MouseMotion::Moved => {
                if button != MouseButton::Release {
                    button = MouseButton::Drag;
                }
                self.clicks = 1;
            }
            _ => {}
        }

        if button != MouseButton::Release {
            self.last_button = Some(button);
        }

        let event = MouseEvent {
            button,
            mods: Self::mods_of(rec),
            row: rec.row,
            col: rec.col,
            clicks: if matches!(button, MouseButton::Drag | MouseButton::Release) {
                1
            } else {
                self.clicks
            },
        };

        // Suppress exact duplicates at the same cell.
        if self.last_col == col && self.last_row == row && self.last_emitted == Some(event) {
            return (None, advice);
        }
        self.last_col = col;
        self.last_row = row;
        self.last_emitted = Some(event);
        (Some(event), advice)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const T: u64 = 500;

    fn press(buttons: ButtonState, col: u16, row: u16) -> MouseRecord {
        MouseRecord { buttons, motion: MouseMotion::None, col, row, mods: 0 }
    }

    fn release(col: u16, row: u16) -> MouseRecord {
        MouseRecord {
            buttons: ButtonState::empty(),
            motion: MouseMotion::None,
            col,
            row,
            mods: 0,
        }
    }

    fn movement(buttons: ButtonState, col: u16, row: u16) -> MouseRecord {
        MouseRecord { buttons, motion: MouseMotion::Moved, col, row, mods: 0 }
    }

    fn decode(d: &mut MouseDecoder, rec: MouseRecord, now: u64) -> Option<MouseEvent> {
        d.decode(&rec, None, now).0
    }

    #[test]
    fn drag_across_cells_with_in_cell_move_dropped() {
        let mut d = MouseDecoder::new(T, false);
        let ev = decode(&mut d, press(ButtonState::LEFT, 5, 5), 0).unwrap();
        assert_eq!(ev.button, MouseButton::Left);
        assert_eq!((ev.col, ev.row, ev.clicks), (5, 5, 1));

        // Move within the same cell: dropped.
        assert_eq!(decode(&mut d, movement(ButtonState::LEFT, 5, 5), 10), None);

        let ev = decode(&mut d, movement(ButtonState::LEFT, 6, 5), 20).unwrap();
        assert_eq!(ev.button, MouseButton::Drag);
        assert_eq!((ev.col, ev.row), (6, 5));

        let ev = decode(&mut d, release(6, 5), 30).unwrap();
        assert_eq!(ev.button, MouseButton::Release);
        assert_eq!((ev.col, ev.row), (6, 5));
    }

    #[test]
    fn click_counter_increments_and_wraps() {
        let mut d = MouseDecoder::new(T, false);
        let mut now = 0;
        let mut counts = Vec::new();
        for _ in 0..5 {
            let ev = decode(&mut d, press(ButtonState::LEFT, 3, 3), now).unwrap();
            counts.push(ev.clicks);
            now += 50;
            assert_eq!(
                decode(&mut d, release(3, 3), now).unwrap().button,
                MouseButton::Release
            );
            now += 50;
        }
        assert_eq!(counts, vec![1, 2, 3, 4, 1]);
    }

    #[test]
    fn slow_second_click_does_not_count_up() {
        let mut d = MouseDecoder::new(T, false);
        assert_eq!(decode(&mut d, press(ButtonState::LEFT, 3, 3), 0).unwrap().clicks, 1);
        decode(&mut d, release(3, 3), 10);
        let ev = decode(&mut d, press(ButtonState::LEFT, 3, 3), T + 100).unwrap();
        assert_eq!(ev.clicks, 1);
    }

    #[test]
    fn click_at_other_cell_restarts_count() {
        let mut d = MouseDecoder::new(T, false);
        decode(&mut d, press(ButtonState::LEFT, 3, 3), 0);
        decode(&mut d, release(3, 3), 10);
        let ev = decode(&mut d, press(ButtonState::LEFT, 9, 3), 20).unwrap();
        assert_eq!(ev.clicks, 1);
    }

    #[test]
    fn only_one_release_between_presses() {
        let mut d = MouseDecoder::new(T, false);
        decode(&mut d, press(ButtonState::LEFT, 1, 1), 0);
        assert!(decode(&mut d, release(1, 1), 10).is_some());
        assert_eq!(decode(&mut d, release(1, 1), 20), None);
        assert_eq!(decode(&mut d, release(2, 1), 30), None);
    }

    #[test]
    fn wheel_events_pack_direction_and_mods() {
        let mut d = MouseDecoder::new(T, false);
        let rec = MouseRecord {
            buttons: ButtonState::empty(),
            motion: MouseMotion::Wheeled(120),
            col: 4,
            row: 7,
            mods: MOD_MASK_SHIFT,
        };
        let (ev, _) = d.decode(&rec, None, 0);
        let ev = ev.unwrap();
        assert_eq!(ev.button, MouseButton::ScrollUp);
        assert_eq!(ev.packed_scroll(), Some(MOD_MASK_SHIFT as u16));

        let rec = MouseRecord { motion: MouseMotion::Wheeled(-120), ..rec };
        let ev = d.decode(&rec, None, 0).0.unwrap();
        assert_eq!(ev.button, MouseButton::ScrollDown);
        assert_eq!(ev.packed_scroll(), Some((1 << 8) | MOD_MASK_SHIFT as u16));
    }

    #[test]
    fn disabled_decoder_rejects_records() {
        let mut d = MouseDecoder::new(T, false);
        d.set_enabled(false);
        assert_eq!(decode(&mut d, press(ButtonState::LEFT, 1, 1), 0), None);
    }

    #[test]
    fn first_record_after_focus_is_dropped() {
        let mut d = MouseDecoder::new(T, false);
        d.focus_gained();
        assert_eq!(decode(&mut d, press(ButtonState::LEFT, 1, 1), 0), None);
        // The next one goes through.
        assert!(decode(&mut d, press(ButtonState::LEFT, 2, 1), 10).is_some());
    }

    #[test]
    fn two_button_chord_synthesizes_middle_via_peek() {
        let mut d = MouseDecoder::new(T, true);
        let first = press(ButtonState::LEFT, 2, 2);
        let second = press(ButtonState::LEFT | ButtonState::RIGHT, 2, 2);
        let (ev, advice) = d.decode(&first, Some(&second), 0);
        assert_eq!(advice, PeekAdvice::Consume);
        assert_eq!(ev.unwrap().button, MouseButton::Middle);
    }

    #[test]
    fn lone_left_without_chord_commits_left() {
        let mut d = MouseDecoder::new(T, true);
        let first = press(ButtonState::LEFT, 2, 2);
        let (ev, advice) = d.decode(&first, None, 0);
        assert_eq!(advice, PeekAdvice::Keep);
        assert_eq!(ev.unwrap().button, MouseButton::Left);
    }

    #[test]
    fn mods_are_carried_on_press() {
        let mut d = MouseDecoder::new(T, false);
        let rec = MouseRecord {
            buttons: ButtonState::RIGHT,
            motion: MouseMotion::None,
            col: 8,
            row: 2,
            mods: MOD_MASK_CTRL | MOD_MASK_ALT,
        };
        let ev = d.decode(&rec, None, 0).0.unwrap();
        assert_eq!(ev.button, MouseButton::Right);
        assert_eq!(ev.mods, MOD_MASK_CTRL | MOD_MASK_ALT);
    }
}
