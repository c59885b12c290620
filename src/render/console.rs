// src/render/console.rs

//! In-memory model of a cell-addressed console.
//!
//! Cells carry a character and a packed attribute word (foreground
//! nibble, background nibble, reverse-video bit). The scroll region has
//! all four edges, so sideways scrolling for vertical splits works the
//! same as full-width scrolling. Two buffer snapshots exist: the screen
//! as it was before the editor took over, and the editor's own screen,
//! so dropping in and out of termcap mode can restore either side.

use log::trace;

pub const FG_MASK: u16 = 0x000f;
pub const BG_MASK: u16 = 0x00f0;
pub const REVERSE: u16 = 0x4000;
pub const DEFAULT_ATTR: u16 = 0x0007;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cell {
    pub ch: char,
    pub attr: u16,
}

impl Default for Cell {
    fn default() -> Self {
        Cell { ch: ' ', attr: DEFAULT_ATTR }
    }
}

/// Which saved screen a snapshot call refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    /// The screen from before the editor entered termcap mode.
    Original,
    /// The editor's screen, for coming back from a suspend or shell.
    Editor,
}

#[derive(Debug, Clone)]
struct Snapshot {
    cells: Vec<Cell>,
    cols: u16,
    rows: u16,
    cursor: (u16, u16),
}

#[derive(Debug)]
pub struct ConsoleCells {
    cols: u16,
    rows: u16,
    cells: Vec<Cell>,
    /// Cursor position, 0-based (col, row).
    cur_col: u16,
    cur_row: u16,
    attr: u16,
    saved_attr: u16,
    /// Inclusive 0-based edges: top, bottom, left, right.
    region: (u16, u16, u16, u16),
    cursor_visible: bool,
    /// The last column has been written; the wrap happens on the next
    /// `put_char`, not now. Keeps a character in the bottom-right cell
    /// from scrolling the screen by itself.
    wrap_pending: bool,
    bells: u32,
    original: Option<Snapshot>,
    editor: Option<Snapshot>,
}

impl ConsoleCells {
    pub fn new(cols: u16, rows: u16) -> Self {
        ConsoleCells {
            cols,
            rows,
            cells: vec![Cell::default(); cols as usize * rows as usize],
            cur_col: 0,
            cur_row: 0,
            attr: DEFAULT_ATTR,
            saved_attr: DEFAULT_ATTR,
            region: (0, rows.saturating_sub(1), 0, cols.saturating_sub(1)),
            cursor_visible: true,
            wrap_pending: false,
            bells: 0,
            original: None,
            editor: None,
        }
    }

    pub fn size(&self) -> (u16, u16) {
        (self.cols, self.rows)
    }

    /// Cursor position, 0-based (col, row).
    pub fn cursor(&self) -> (u16, u16) {
        (self.cur_col, self.cur_row)
    }

    pub fn attr(&self) -> u16 {
        self.attr
    }

    pub fn is_cursor_visible(&self) -> bool {
        self.cursor_visible
    }

    pub fn bell_count(&self) -> u32 {
        self.bells
    }

    pub fn region(&self) -> (u16, u16, u16, u16) {
        self.region
    }

    fn idx(&self, col: u16, row: u16) -> usize {
        row as usize * self.cols as usize + col as usize
    }

    pub fn cell(&self, col: u16, row: u16) -> Cell {
        self.cells[self.idx(col, row)]
    }

    /// Text of one row with trailing blanks trimmed, for assertions and
    /// screen dumps.
    pub fn row_text(&self, row: u16) -> String {
        let start = self.idx(0, row);
        let s: String = self.cells[start..start + self.cols as usize]
            .iter()
            .map(|c| c.ch)
            .collect();
        s.trim_end().to_string()
    }

    /// 1-based cursor positioning, clamped to the screen.
    pub fn gotoxy(&mut self, x: u16, y: u16) {
        self.cur_col = x.saturating_sub(1).min(self.cols.saturating_sub(1));
        self.cur_row = y.saturating_sub(1).min(self.rows.saturating_sub(1));
        self.wrap_pending = false;
    }

    pub fn set_attr(&mut self, attr: u16) {
        self.attr = attr;
    }

    pub fn set_fg(&mut self, color: u16) {
        self.attr = (self.attr & !FG_MASK) | (color & FG_MASK);
    }

    pub fn set_bg(&mut self, color: u16) {
        self.attr = (self.attr & !BG_MASK) | ((color << 4) & BG_MASK);
    }

    pub fn normvideo(&mut self) {
        self.attr = DEFAULT_ATTR;
    }

    /// Reverse video on, remembering what to come back to.
    pub fn standout(&mut self) {
        self.saved_attr = self.attr;
        self.attr |= REVERSE;
    }

    pub fn standend(&mut self) {
        self.attr = self.saved_attr;
    }

    pub fn set_cursor_visible(&mut self, visible: bool) {
        self.cursor_visible = visible;
    }

    pub fn ring_bell(&mut self) {
        self.bells += 1;
    }

    /// Full four-edge region, 0-based inclusive.
    pub fn set_scroll_region(&mut self, left: u16, top: u16, right: u16, bottom: u16) {
        self.region = (
            top.min(self.rows.saturating_sub(1)),
            bottom.min(self.rows.saturating_sub(1)),
            left.min(self.cols.saturating_sub(1)),
            right.min(self.cols.saturating_sub(1)),
        );
    }

    /// Top/bottom only, 1-based as the dialect sends it.
    pub fn set_scroll_region_tb(&mut self, top: u16, bottom: u16) {
        let (_, _, left, right) = self.region;
        self.set_scroll_region(left, top.saturating_sub(1), right, bottom.saturating_sub(1));
    }

    /// Left/right only, 1-based.
    pub fn set_scroll_region_lr(&mut self, left: u16, right: u16) {
        let (top, bottom, _, _) = self.region;
        self.set_scroll_region(left.saturating_sub(1), top, right.saturating_sub(1), bottom);
    }

    pub fn reset_scroll_region(&mut self) {
        self.region = (0, self.rows.saturating_sub(1), 0, self.cols.saturating_sub(1));
    }

    fn blank(&self) -> Cell {
        Cell { ch: ' ', attr: self.attr }
    }

    /// Scrolls the region up by `n` lines, blanking the bottom.
    pub fn scroll(&mut self, n: u16) {
        let (top, bottom, left, right) = self.region;
        let n = n.min(bottom - top + 1);
        for row in top..=bottom {
            for col in left..=right {
                let i = self.idx(col, row);
                self.cells[i] = if row + n <= bottom {
                    self.cells[self.idx(col, row + n)]
                } else {
                    self.blank()
                };
            }
        }
    }

    /// Inserts `n` blank lines at the cursor row, pushing region lines
    /// down and off the bottom edge.
    pub fn insert_lines(&mut self, n: u16) {
        let (top, bottom, left, right) = self.region;
        let at = self.cur_row.clamp(top, bottom);
        let n = n.min(bottom - at + 1);
        for row in (at..=bottom).rev() {
            for col in left..=right {
                let i = self.idx(col, row);
                self.cells[i] = if row >= at + n {
                    self.cells[self.idx(col, row - n)]
                } else {
                    self.blank()
                };
            }
        }
    }

    /// Deletes `n` lines at the cursor row, pulling region lines up and
    /// blanking the bottom.
    pub fn delete_lines(&mut self, n: u16) {
        let (top, bottom, left, right) = self.region;
        let at = self.cur_row.clamp(top, bottom);
        let n = n.min(bottom - at + 1);
        for row in at..=bottom {
            for col in left..=right {
                let i = self.idx(col, row);
                self.cells[i] = if row + n <= bottom {
                    self.cells[self.idx(col, row + n)]
                } else {
                    self.blank()
                };
            }
        }
    }

    pub fn clear_screen(&mut self) {
        let blank = self.blank();
        self.cells.fill(blank);
    }

    pub fn clear_to_end_of_line(&mut self) {
        let row = self.cur_row;
        let blank = self.blank();
        for col in self.cur_col..self.cols {
            let i = self.idx(col, row);
            self.cells[i] = blank;
        }
    }

    pub fn clear_to_end_of_display(&mut self) {
        self.clear_to_end_of_line();
        let blank = self.blank();
        for row in self.cur_row + 1..self.rows {
            for col in 0..self.cols {
                let i = self.idx(col, row);
                self.cells[i] = blank;
            }
        }
    }

    /// Puts one character at the cursor and advances. The wrap at the
    /// screen edge is deferred: the cursor parks on the last column and
    /// only the next `put_char` moves it to the following line, scrolling
    /// the region when that runs off its bottom.
    pub fn put_char(&mut self, ch: char) {
        if self.wrap_pending {
            self.wrap_pending = false;
            self.cur_col = 0;
            if self.cur_row == self.region.1 {
                self.scroll(1);
            } else if self.cur_row + 1 < self.rows {
                self.cur_row += 1;
            }
        }
        let i = self.idx(self.cur_col, self.cur_row);
        self.cells[i] = Cell { ch, attr: self.attr };
        if self.cur_col + 1 < self.cols {
            self.cur_col += 1;
        } else {
            self.wrap_pending = true;
        }
    }

    fn take_snapshot(&self) -> Snapshot {
        Snapshot {
            cells: self.cells.clone(),
            cols: self.cols,
            rows: self.rows,
            cursor: (self.cur_col, self.cur_row),
        }
    }

    pub fn save_snapshot(&mut self, kind: SnapshotKind) {
        let snap = self.take_snapshot();
        trace!("saving {:?} console snapshot", kind);
        match kind {
            SnapshotKind::Original => self.original = Some(snap),
            SnapshotKind::Editor => self.editor = Some(snap),
        }
    }

    /// Restores a saved screen; false when there is none or the console
    /// has been resized since (the snapshot would no longer fit).
    pub fn restore_snapshot(&mut self, kind: SnapshotKind) -> bool {
        let snap = match kind {
            SnapshotKind::Original => self.original.as_ref(),
            SnapshotKind::Editor => self.editor.as_ref(),
        };
        let Some(snap) = snap else { return false };
        if snap.cols != self.cols || snap.rows != self.rows {
            return false;
        }
        self.cells.copy_from_slice(&snap.cells);
        (self.cur_col, self.cur_row) = snap.cursor;
        self.wrap_pending = false;
        true
    }

    /// Resize, keeping the top-left contents. Snapshots for the old
    /// geometry stay around but will refuse to restore.
    pub fn resize(&mut self, cols: u16, rows: u16) {
        let mut cells = vec![Cell::default(); cols as usize * rows as usize];
        for row in 0..rows.min(self.rows) {
            for col in 0..cols.min(self.cols) {
                cells[row as usize * cols as usize + col as usize] =
                    self.cells[self.idx(col, row)];
            }
        }
        self.cols = cols;
        self.rows = rows;
        self.cells = cells;
        self.cur_col = self.cur_col.min(cols.saturating_sub(1));
        self.cur_row = self.cur_row.min(rows.saturating_sub(1));
        self.wrap_pending = false;
        self.reset_scroll_region();
    }
}

/// Console input-mode flags, saved on startup and swapped for the
/// editor's own while it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InputModes {
    pub mouse_events: bool,
    pub window_events: bool,
    /// Host-side drag-to-select. Incompatible with mouse reporting.
    pub quick_edit: bool,
}

impl InputModes {
    /// The mode the console is kept in while the editor owns it.
    /// Geometry events are always wanted; quick-edit must yield to the
    /// editor's mouse when that is on.
    pub fn for_editor(mouse_on: bool) -> Self {
        InputModes {
            mouse_events: mouse_on,
            window_events: true,
            quick_edit: !mouse_on,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn put_str(c: &mut ConsoleCells, s: &str) {
        for ch in s.chars() {
            c.put_char(ch);
        }
    }

    #[test]
    fn editor_input_mode_trades_quick_edit_for_mouse() {
        let with_mouse = InputModes::for_editor(true);
        assert!(with_mouse.mouse_events && !with_mouse.quick_edit);
        let without = InputModes::for_editor(false);
        assert!(!without.mouse_events && without.quick_edit);
        assert!(with_mouse.window_events && without.window_events);
    }

    #[test]
    fn put_and_wrap() {
        let mut c = ConsoleCells::new(4, 3);
        put_str(&mut c, "abcdE");
        assert_eq!(c.row_text(0), "abcd");
        assert_eq!(c.row_text(1), "E");
        assert_eq!(c.cursor(), (1, 1));
    }

    #[test]
    fn bottom_right_cell_does_not_scroll_by_itself() {
        let mut c = ConsoleCells::new(3, 2);
        put_str(&mut c, "abc");
        c.gotoxy(1, 2);
        put_str(&mut c, "xyz");
        // The corner cell is filled but nothing has scrolled yet.
        assert_eq!(c.row_text(0), "abc");
        assert_eq!(c.row_text(1), "xyz");
        assert_eq!(c.cursor(), (2, 1));
        // The next character takes the deferred wrap and scrolls.
        c.put_char('!');
        assert_eq!(c.row_text(0), "xyz");
        assert_eq!(c.row_text(1), "!");
    }

    #[test]
    fn cursor_motion_cancels_a_pending_wrap() {
        let mut c = ConsoleCells::new(3, 2);
        put_str(&mut c, "abc");
        c.gotoxy(1, 1);
        c.put_char('A');
        assert_eq!(c.row_text(0), "Abc");
        assert_eq!(c.cursor(), (1, 0));
    }

    #[test]
    fn scroll_blanks_the_bottom() {
        let mut c = ConsoleCells::new(4, 3);
        put_str(&mut c, "one ");
        c.gotoxy(1, 2);
        put_str(&mut c, "two ");
        c.gotoxy(1, 3);
        put_str(&mut c, "tri");
        c.scroll(1);
        assert_eq!(c.row_text(0), "two");
        assert_eq!(c.row_text(1), "tri");
        assert_eq!(c.row_text(2), "");
    }

    #[test]
    fn sideways_region_limits_scroll() {
        let mut c = ConsoleCells::new(6, 2);
        put_str(&mut c, "abcdef");
        c.gotoxy(1, 2);
        put_str(&mut c, "ABCDE");
        c.set_scroll_region(2, 0, 4, 1);
        c.scroll(1);
        // Columns outside the region untouched.
        assert_eq!(c.cell(0, 0).ch, 'a');
        assert_eq!(c.cell(5, 0).ch, 'f');
        // Inside the region row 1 moved up.
        assert_eq!(c.cell(2, 0).ch, 'C');
        assert_eq!(c.cell(2, 1).ch, ' ');
    }

    #[test]
    fn insert_and_delete_lines() {
        let mut c = ConsoleCells::new(3, 4);
        for (i, s) in ["aaa", "bbb", "ccc", "ddd"].iter().enumerate() {
            c.gotoxy(1, i as u16 + 1);
            put_str(&mut c, s);
        }
        c.gotoxy(1, 2);
        c.insert_lines(1);
        assert_eq!(c.row_text(1), "");
        assert_eq!(c.row_text(2), "bbb");
        assert_eq!(c.row_text(3), "ccc"); // "ddd" pushed off
        c.gotoxy(1, 2);
        c.delete_lines(1);
        assert_eq!(c.row_text(1), "bbb");
        assert_eq!(c.row_text(3), "");
    }

    #[test]
    fn standout_round_trip() {
        let mut c = ConsoleCells::new(2, 2);
        c.set_fg(3);
        let before = c.attr();
        c.standout();
        assert_ne!(c.attr(), before);
        c.put_char('x');
        assert_eq!(c.cell(0, 0).attr & REVERSE, REVERSE);
        c.standend();
        assert_eq!(c.attr(), before);
    }

    #[test]
    fn snapshot_restores_contents_and_cursor() {
        let mut c = ConsoleCells::new(4, 2);
        put_str(&mut c, "shel");
        c.save_snapshot(SnapshotKind::Original);
        c.clear_screen();
        c.gotoxy(1, 2);
        put_str(&mut c, "edit");
        assert!(c.restore_snapshot(SnapshotKind::Original));
        assert_eq!(c.row_text(0), "shel");
        // Cursor parks on the last written column, wrap still pending.
        assert_eq!(c.cursor(), (3, 0));
    }

    #[test]
    fn snapshot_refuses_other_geometry() {
        let mut c = ConsoleCells::new(4, 2);
        c.save_snapshot(SnapshotKind::Editor);
        c.resize(5, 2);
        assert!(!c.restore_snapshot(SnapshotKind::Editor));
    }

    #[test]
    fn clear_to_end_variants() {
        let mut c = ConsoleCells::new(4, 2);
        put_str(&mut c, "abc");
        c.gotoxy(1, 2);
        put_str(&mut c, "def");
        c.gotoxy(2, 1);
        c.clear_to_end_of_line();
        assert_eq!(c.row_text(0), "a");
        assert_eq!(c.row_text(1), "def");
        c.gotoxy(2, 1);
        c.clear_to_end_of_display();
        assert_eq!(c.row_text(1), "");
    }
}
