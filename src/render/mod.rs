// src/render/mod.rs

//! Output side of the platform layer.
//!
//! The editor core writes a stream in its private dialect; the renderer
//! interprets it against the in-memory console. On a VT-capable host the
//! color traffic and cursor-style sequences are forwarded verbatim (the
//! host's parser is better at colors than the legacy attribute word),
//! while movement and scrolling still go through the cell model. Termcap
//! mode transitions snapshot and restore whole screens so the user's
//! shell output survives the editor's full-screen phase.

pub mod coalesce;
pub mod console;
pub mod dialect;

use log::trace;

use crate::caps::Capabilities;
use crate::config::PalConfig;
use console::{ConsoleCells, SnapshotKind};
use dialect::{Command, Step};

const ESC: u8 = 0x1b;

#[derive(Debug)]
pub struct Renderer {
    pub console: ConsoleCells,
    vtp: bool,
    use_alt_screen: bool,
    restore_screen: bool,
    termcap_active: bool,
    /// Bytes forwarded to the VT host instead of being interpreted.
    pub passthrough: Vec<u8>,
}

impl Renderer {
    pub fn new(cols: u16, rows: u16, caps: &Capabilities, config: &PalConfig) -> Self {
        Renderer {
            console: ConsoleCells::new(cols, rows),
            vtp: caps.vtp_working,
            use_alt_screen: caps.use_alt_screen_buffer,
            restore_screen: config.restore_screen,
            termcap_active: false,
            passthrough: Vec::new(),
        }
    }

    pub fn in_termcap_mode(&self) -> bool {
        self.termcap_active
    }

    /// Interprets one chunk of dialect output.
    pub fn write(&mut self, data: &[u8]) {
        let mut pos = 0;
        while pos < data.len() {
            // Color runs first get the redundant-prefix treatment.
            if data[pos] == ESC
                && data.get(pos + 1) == Some(&b'|')
                && data.get(pos + 2).is_some_and(u8::is_ascii_digit)
            {
                pos = coalesce::compress_sgr(data, pos);
            }
            let (step, next) = dialect::parse_next(data, pos);
            self.apply(step);
            pos = next;
        }
    }

    fn apply(&mut self, step: Step<'_>) {
        match step {
            Step::Text(run) => {
                for ch in String::from_utf8_lossy(run).chars() {
                    self.console.put_char(ch);
                }
            }
            Step::Newline => {
                let (_, bottom, left, _) = self.console.region();
                let (_, row) = self.console.cursor();
                if row == bottom {
                    self.console.scroll(1);
                    self.console.gotoxy(left + 1, bottom + 1);
                } else {
                    self.console.gotoxy(left + 1, row + 2);
                }
            }
            Step::CarriageReturn => {
                let (_, _, left, _) = self.console.region();
                let (_, row) = self.console.cursor();
                self.console.gotoxy(left + 1, row + 1);
            }
            Step::Backspace => {
                let (top, _, left, right) = self.console.region();
                let (col, row) = self.console.cursor();
                if col > left {
                    self.console.gotoxy(col, row + 1);
                } else if row > top {
                    self.console.gotoxy(right + 1, row);
                }
            }
            Step::Bell => self.console.ring_bell(),
            Step::CursorStyle(seq) => {
                if self.vtp {
                    self.passthrough.extend_from_slice(seq);
                }
            }
            Step::Literal(b) => self.console.put_char(char::from(b)),
            Step::Dialect(cmd) => self.dispatch(cmd),
        }
    }

    fn dispatch(&mut self, cmd: Command) {
        trace!("dialect command {:?}", cmd);
        match cmd {
            Command::Sgr(args) => self.apply_sgr(&args),
            Command::GotoXY { x, y } => self.console.gotoxy(x, y),
            Command::ScrollRegionFull { top, bottom } => {
                let (cols, _) = self.console.size();
                self.console.set_scroll_region(
                    0,
                    top.saturating_sub(1),
                    cols.saturating_sub(1),
                    bottom.saturating_sub(1),
                );
            }
            Command::ScrollRegionTb { top, bottom } => {
                self.console.set_scroll_region_tb(top, bottom);
            }
            Command::ScrollRegionLr { left, right } => {
                self.console.set_scroll_region_lr(left, right);
            }
            Command::CursorUp(n) => {
                let (top, _, _, _) = self.console.region();
                let (col, row) = self.console.cursor();
                self.console.gotoxy(col + 1, row.saturating_sub(n).max(top) + 1);
            }
            Command::CursorRight(n) => {
                let (_, _, _, right) = self.console.region();
                let (col, row) = self.console.cursor();
                self.console.gotoxy((col + n).min(right) + 1, row + 1);
            }
            Command::TextColor(c) => self.console.set_fg(c),
            Command::TextBackground(c) => self.console.set_bg(c),
            Command::InsertLines(n) => self.console.insert_lines(n),
            Command::DeleteLines(n) => self.console.delete_lines(n),
            Command::VisualBell => self.console.ring_bell(),
            Command::Standout => self.console.standout(),
            Command::Standend => self.console.standend(),
            Command::Home => self.console.gotoxy(1, 1),
            Command::ClearScreen => self.console.clear_screen(),
            Command::ClearToEndOfDisplay => self.console.clear_to_end_of_display(),
            Command::ClearToEndOfLine => self.console.clear_to_end_of_line(),
            Command::CursorVisible(v) => self.console.set_cursor_visible(v),
            Command::TermcapStart => self.termcap_start(),
            Command::TermcapEnd => self.termcap_end(),
            Command::Ignored => {}
        }
    }

    fn apply_sgr(&mut self, args: &[u16]) {
        match args {
            [0] => self.console.normvideo(),
            [attr] => {
                if self.vtp {
                    self.console.set_fg(*attr);
                } else {
                    self.console.set_attr(*attr);
                }
            }
            _ if self.vtp => {
                // Bulk colors go to the host's own VT parser.
                self.passthrough.push(ESC);
                self.passthrough.push(b'[');
                for (i, a) in args.iter().enumerate() {
                    if i > 0 {
                        self.passthrough.push(b';');
                    }
                    self.passthrough.extend_from_slice(a.to_string().as_bytes());
                }
                self.passthrough.push(b'm');
            }
            _ => {}
        }
    }

    /// Entering full-screen mode: remember the user's screen first.
    fn termcap_start(&mut self) {
        if self.termcap_active {
            return;
        }
        trace!("entering termcap mode");
        self.console.save_snapshot(SnapshotKind::Original);
        if self.vtp && self.use_alt_screen {
            self.passthrough.extend_from_slice(b"\x1b[?1049h");
        }
        self.console.reset_scroll_region();
        self.termcap_active = true;
    }

    /// Leaving full-screen mode: keep the editor's screen for a later
    /// return, then put the user's screen back (or just clear, when
    /// restoring is disabled).
    fn termcap_end(&mut self) {
        if !self.termcap_active {
            return;
        }
        trace!("leaving termcap mode");
        self.console.save_snapshot(SnapshotKind::Editor);
        if self.vtp && self.use_alt_screen {
            self.passthrough.extend_from_slice(b"\x1b[?1049l");
        }
        if self.restore_screen {
            if !self.console.restore_snapshot(SnapshotKind::Original) {
                self.console.clear_screen();
            }
        } else {
            self.console.clear_screen();
        }
        self.console.reset_scroll_region();
        self.console.set_cursor_visible(true);
        self.termcap_active = false;
    }

    pub fn resize(&mut self, cols: u16, rows: u16) {
        self.console.resize(cols, rows);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn legacy_renderer(cols: u16, rows: u16) -> Renderer {
        let caps = Capabilities::default();
        Renderer::new(cols, rows, &caps, &PalConfig::default())
    }

    fn vtp_renderer(cols: u16, rows: u16) -> Renderer {
        let caps = Capabilities {
            vtp_working: true,
            use_alt_screen_buffer: true,
            ..Default::default()
        };
        Renderer::new(cols, rows, &caps, &PalConfig::default())
    }

    #[test]
    fn text_and_movement() {
        let mut r = legacy_renderer(10, 4);
        r.write(b"\x1b|2;3Habc");
        assert_eq!(r.console.row_text(1), "  abc");
        r.write(b"\r\ndef");
        assert_eq!(r.console.row_text(2), "def");
    }

    #[test]
    fn newline_at_region_bottom_scrolls() {
        let mut r = legacy_renderer(5, 3);
        r.write(b"one\r\ntwo\r\ntri");
        // Cursor sits on the last row; one more newline scrolls.
        r.write(b"\r\nqua");
        assert_eq!(r.console.row_text(0), "two");
        assert_eq!(r.console.row_text(2), "qua");
    }

    #[test]
    fn backspace_wraps_to_previous_line() {
        let mut r = legacy_renderer(5, 3);
        r.write(b"\x1b|2;1H");
        r.write(b"\x08");
        assert_eq!(r.console.cursor(), (4, 0));
    }

    #[test]
    fn insert_delete_lines_via_dialect() {
        let mut r = legacy_renderer(5, 3);
        r.write(b"aa\r\nbb\r\ncc");
        r.write(b"\x1b|1;1H\x1b|1M");
        assert_eq!(r.console.row_text(0), "bb");
        r.write(b"\x1b|1L");
        assert_eq!(r.console.row_text(0), "");
        assert_eq!(r.console.row_text(1), "bb");
    }

    #[test]
    fn legacy_single_arg_sets_whole_attribute() {
        let mut r = legacy_renderer(5, 2);
        r.write(b"\x1b|31mx");
        assert_eq!(r.console.cell(0, 0).attr, 31);
    }

    #[test]
    fn sgr_reset_restores_default() {
        let mut r = legacy_renderer(5, 2);
        r.write(b"\x1b|31m\x1b|0mx");
        assert_eq!(r.console.cell(0, 0).attr, console::DEFAULT_ATTR);
    }

    #[test]
    fn vtp_bulk_colors_pass_through() {
        let mut r = vtp_renderer(5, 2);
        r.write(b"\x1b|38;2;10;20;30m");
        assert_eq!(r.passthrough, b"\x1b[38;2;10;20;30m");
    }

    #[test]
    fn redundant_reset_fg_is_elided() {
        let mut r = vtp_renderer(5, 2);
        r.write(b"\x1b|39m\x1b|38;2;1;2;3m");
        // Only the surviving truecolor set reaches the host.
        assert_eq!(r.passthrough, b"\x1b[38;2;1;2;3m");
    }

    #[test]
    fn cursor_style_forwarded_only_with_vtp() {
        let mut r = vtp_renderer(5, 2);
        r.write(b"\x1b[4 q");
        assert_eq!(r.passthrough, b"\x1b[4 q");
        let mut legacy = legacy_renderer(5, 2);
        legacy.write(b"\x1b[4 q");
        assert!(legacy.passthrough.is_empty());
    }

    #[test]
    fn termcap_cycle_restores_user_screen() {
        let mut r = legacy_renderer(8, 3);
        r.write(b"prompt$");
        r.write(b"\x1b|S");
        assert!(r.in_termcap_mode());
        r.write(b"\x1b|J\x1b|Hediting");
        assert_eq!(r.console.row_text(0), "editing");
        r.write(b"\x1b|E");
        assert!(!r.in_termcap_mode());
        assert_eq!(r.console.row_text(0), "prompt$");
    }

    #[test]
    fn termcap_end_without_restore_clears() {
        let caps = Capabilities::default();
        let config = PalConfig { restore_screen: false, ..Default::default() };
        let mut r = Renderer::new(8, 3, &caps, &config);
        r.write(b"prompt$");
        r.write(b"\x1b|S\x1b|Hediting\x1b|E");
        assert_eq!(r.console.row_text(0), "");
    }

    #[test]
    fn alt_screen_toggles_pass_through() {
        let mut r = vtp_renderer(8, 3);
        r.write(b"\x1b|S");
        r.write(b"\x1b|E");
        let s = String::from_utf8_lossy(&r.passthrough);
        assert!(s.contains("\x1b[?1049h"));
        assert!(s.contains("\x1b[?1049l"));
    }

    #[test]
    fn bell_counted() {
        let mut r = legacy_renderer(5, 2);
        r.write(b"\x07\x1b|B");
        assert_eq!(r.console.bell_count(), 2);
    }
}
