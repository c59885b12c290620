// src/render/dialect.rs

//! Parser for the private terminal dialect the editor core emits.
//!
//! The core drives the console through compact `ESC |` sequences rather
//! than full termcap output: optional numeric arguments, then a single
//! command letter. A few C0 bytes act directly, and `ESC [ Ps SP q`
//! cursor-style sequences are recognized so they can be passed through
//! to a VT-capable host. Everything else is literal text.

use crate::render::coalesce;

const ESC: u8 = 0x1b;

/// One decoded dialect command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Attribute arguments as sent; interpretation depends on the
    /// console's color capability.
    Sgr(Vec<u16>),
    /// 1-based cursor position.
    GotoXY { x: u16, y: u16 },
    /// Full-width scroll region by 1-based rows.
    ScrollRegionFull { top: u16, bottom: u16 },
    /// Top/bottom edges only, 1-based.
    ScrollRegionTb { top: u16, bottom: u16 },
    /// Left/right edges only, 1-based.
    ScrollRegionLr { left: u16, right: u16 },
    CursorUp(u16),
    CursorRight(u16),
    TextColor(u16),
    TextBackground(u16),
    InsertLines(u16),
    DeleteLines(u16),
    VisualBell,
    TermcapStart,
    TermcapEnd,
    Standout,
    Standend,
    Home,
    ClearScreen,
    ClearToEndOfDisplay,
    ClearToEndOfLine,
    CursorVisible(bool),
    /// Recognized but meaningless; consumed silently.
    Ignored,
}

/// One parsing step over the output stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Step<'a> {
    /// A run of literal characters.
    Text(&'a [u8]),
    Newline,
    CarriageReturn,
    Backspace,
    Bell,
    Dialect(Command),
    /// A cursor-style sequence, kept whole for passthrough.
    CursorStyle(&'a [u8]),
    /// A byte that looked like a sequence but was not one.
    Literal(u8),
}

fn is_plain(ch: u8) -> bool {
    ch > 0x1e || !matches!(ch, b'\n' | b'\r' | 0x08 | 0x07 | ESC)
}

fn args_command(args: &[u16], term: u8) -> Command {
    match (args.len(), term) {
        (_, b'm') => Command::Sgr(args.to_vec()),
        (2, b'H') => Command::GotoXY { x: args[1], y: args[0] },
        (2, b'r') => Command::ScrollRegionFull { top: args[0], bottom: args[1] },
        (2, b'R') => Command::ScrollRegionTb { top: args[0], bottom: args[1] },
        (2, b'V') => Command::ScrollRegionLr { left: args[0], right: args[1] },
        (1, b'A') => Command::CursorUp(args[0]),
        (1, b'b') => Command::TextBackground(args[0]),
        (1, b'C') => Command::CursorRight(args[0]),
        (1, b'f') => Command::TextColor(args[0]),
        (1, b'H') => Command::GotoXY { x: 1, y: args[0] },
        (1, b'L') => Command::InsertLines(args[0]),
        (1, b'M') => Command::DeleteLines(args[0]),
        _ => Command::Ignored,
    }
}

fn bare_command(letter: u8) -> Command {
    match letter {
        b'A' => Command::CursorUp(1),
        b'B' => Command::VisualBell,
        b'C' => Command::CursorRight(1),
        b'E' => Command::TermcapEnd,
        b'F' => Command::Standout,
        b'f' => Command::Standend,
        b'H' => Command::Home,
        b'j' => Command::ClearToEndOfDisplay,
        b'J' => Command::ClearScreen,
        b'K' => Command::ClearToEndOfLine,
        b'L' => Command::InsertLines(1),
        b'M' => Command::DeleteLines(1),
        b'S' => Command::TermcapStart,
        b'V' => Command::CursorVisible(true),
        b'v' => Command::CursorVisible(false),
        _ => Command::Ignored,
    }
}

/// Decodes the next step at `pos`; returns it with the index to resume
/// from. `pos` must be in bounds.
pub fn parse_next(buf: &[u8], pos: usize) -> (Step<'_>, usize) {
    debug_assert!(pos < buf.len());

    let mut run = pos;
    while run < buf.len() && is_plain(buf[run]) {
        run += 1;
    }
    if run > pos {
        return (Step::Text(&buf[pos..run]), run);
    }

    match buf[pos] {
        b'\n' => (Step::Newline, pos + 1),
        b'\r' => (Step::CarriageReturn, pos + 1),
        0x08 => (Step::Backspace, pos + 1),
        0x07 => (Step::Bell, pos + 1),
        ESC if buf.get(pos + 1) == Some(&b'|') && pos + 2 < buf.len() => {
            let third = buf[pos + 2];
            if third.is_ascii_digit() {
                match coalesce::seq(buf, pos) {
                    Some((args, term, next)) => {
                        (Step::Dialect(args_command(&args, term)), next)
                    }
                    None => (Step::Literal(ESC), pos + 1),
                }
            } else {
                (Step::Dialect(bare_command(third)), pos + 3)
            }
        }
        ESC if buf.get(pos + 1) == Some(&b'[') && pos + 2 < buf.len() => {
            let mut l = 2;
            if buf.get(pos + l).is_some_and(u8::is_ascii_digit) {
                l += 1;
            }
            if buf.get(pos + l) == Some(&b' ') && buf.get(pos + l + 1) == Some(&b'q') {
                (Step::CursorStyle(&buf[pos..pos + l + 2]), pos + l + 2)
            } else {
                (Step::Literal(ESC), pos + 1)
            }
        }
        other => (Step::Literal(other), pos + 1),
    }
}
