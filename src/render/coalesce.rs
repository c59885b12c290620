// src/render/coalesce.rs

//! Peephole elision of redundant color runs.
//!
//! Redraws emit highly regular attribute traffic: a reset-foreground
//! followed by the same truecolor pair it is about to replace, doubled
//! background sets, and reset-set chains across a newline. Console
//! attribute calls are slow enough that skipping the doomed prefix is
//! visible, so the writer looks ahead over a handful of fixed shapes
//! before interpreting a color sequence.

const ESC: u8 = 0x1b;

/// Parses `ESC <intro> n(;n)* <term>` at `pos`. Returns the numeric
/// arguments, the terminator, and the index past it.
pub(crate) fn seq(buf: &[u8], pos: usize) -> Option<(Vec<u16>, u8, usize)> {
    if *buf.get(pos)? != ESC {
        return None;
    }
    let mut p = pos + 2;
    let mut args = Vec::new();
    loop {
        let mut n: u32 = 0;
        while let Some(d) = buf.get(p).filter(|d| d.is_ascii_digit()) {
            n = n.saturating_mul(10) + u32::from(d - b'0');
            p += 1;
        }
        if args.len() < 16 {
            args.push(n.min(u32::from(u16::MAX)) as u16);
        }
        if buf.get(p) == Some(&b';') {
            p += 1;
        } else {
            break;
        }
    }
    let term = *buf.get(p)?;
    Some((args, term, p + 1))
}

fn sgr(buf: &[u8], pos: usize) -> Option<(Vec<u16>, usize)> {
    let (args, term, next) = seq(buf, pos)?;
    (term == b'm').then_some((args, next))
}

/// Truecolor set: `n;2;r;g;b m`. Returns the index past it.
fn sgrn2(buf: &[u8], pos: usize, n: u16) -> Option<usize> {
    let (args, next) = sgr(buf, pos)?;
    (args.len() == 5 && args[0] == n && args[1] == 2).then_some(next)
}

fn skip_white(buf: &[u8], mut p: usize) -> usize {
    while matches!(buf.get(p), Some(b' ') | Some(b'\t')) {
        p += 1;
    }
    p
}

fn skip_blank(buf: &[u8], mut p: usize) -> usize {
    while matches!(buf.get(p), Some(b' ') | Some(b'\t') | Some(b'\n') | Some(b'\r')) {
        p += 1;
    }
    p
}

/// Single-argument SGR `n m` followed (after spaces) by another escape.
fn sgrnc(buf: &[u8], pos: usize, n: u16) -> Option<usize> {
    let (args, next) = sgr(buf, pos)?;
    if args.len() != 1 || args[0] != n {
        return None;
    }
    let p = skip_white(buf, next);
    (buf.get(p) == Some(&ESC)).then_some(p)
}

/// Truecolor set followed (after blanks) by another escape.
fn sgrn2c(buf: &[u8], pos: usize, n: u16) -> Option<usize> {
    let next = sgrn2(buf, pos, n)?;
    if next >= buf.len() {
        return None;
    }
    let p = skip_blank(buf, next);
    (buf.get(p) == Some(&ESC)).then_some(p)
}

/// Truecolor set with exactly one newline before the next escape.
/// Returns the index of that escape.
fn sgrn2cn(buf: &[u8], pos: usize, n: u16) -> Option<usize> {
    let next = sgrn2(buf, pos, n)?;
    (buf.get(next) == Some(&b'\n') && buf.get(next + 1) == Some(&ESC)).then_some(next + 1)
}

/// Looks for the known redundant shapes starting at `start` and returns
/// the position interpretation should resume from. Position `start` must
/// be at an escape; when nothing matches it comes back unchanged.
pub fn compress_sgr(buf: &[u8], start: usize) -> usize {
    // resetFG,FG,BG,<newline>,BG,FG: everything before the newline is
    // about to be overridden on the next line anyway.
    if let Some(b) = sgrnc(buf, start, 39).and_then(|a| sgrn2(buf, a, 38)) {
        if let Some(c) = sgrn2cn(buf, b, 48) {
            if sgrn2(buf, c, 48).and_then(|d| sgrn2(buf, d, 38)).is_some() {
                return c - 1;
            }
        }
    }

    let mut p = start;
    // FG,BG,BG,FG: the first FG loses.
    if let Some(sp) = sgrn2(buf, p, 38) {
        if sgrn2c(buf, sp, 48)
            .and_then(|q| sgrn2(buf, q, 48))
            .and_then(|q| sgrn2(buf, q, 38))
            .is_some()
        {
            p = sp;
        }
    }
    // FG,BG,FG,BG: likewise.
    if let Some(sp) = sgrn2(buf, p, 38) {
        if sgrn2c(buf, sp, 48)
            .and_then(|q| sgrn2(buf, q, 38))
            .and_then(|q| sgrn2(buf, q, 48))
            .is_some()
        {
            p = sp;
        }
    }
    // BG,BG: the first BG loses.
    if let Some(sp) = sgrn2(buf, p, 48) {
        if sgrn2(buf, sp, 48).is_some() {
            p = sp;
        }
    }
    // resetFG,FG: the reset is pointless.
    if let Some(sp) = sgrnc(buf, p, 39) {
        if sgrn2(buf, sp, 38).is_some() {
            p = sp;
        }
    }
    p
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fg(r: u8) -> Vec<u8> {
        format!("\x1b|38;2;{};{};{}m", r, r, r).into_bytes()
    }

    fn bg(r: u8) -> Vec<u8> {
        format!("\x1b|48;2;{};{};{}m", r, r, r).into_bytes()
    }

    const RESET_FG: &[u8] = b"\x1b|39m";

    #[test]
    fn seq_parses_args_and_terminator() {
        let (args, term, next) = seq(b"\x1b|12;34H", 0).unwrap();
        assert_eq!(args, vec![12, 34]);
        assert_eq!(term, b'H');
        assert_eq!(next, 8);
    }

    #[test]
    fn reset_set_pair_drops_the_reset() {
        let mut buf = RESET_FG.to_vec();
        buf.extend(fg(10));
        let p = compress_sgr(&buf, 0);
        assert_eq!(p, RESET_FG.len());
    }

    #[test]
    fn doubled_background_drops_the_first() {
        let mut buf = bg(1);
        let first_len = buf.len();
        buf.extend(bg(2));
        assert_eq!(compress_sgr(&buf, 0), first_len);
    }

    #[test]
    fn fg_bg_bg_fg_drops_fg_then_first_bg() {
        let mut buf = fg(1);
        let fg_len = buf.len();
        buf.extend(bg(2));
        let bg_len = buf.len() - fg_len;
        buf.extend(bg(3));
        buf.extend(fg(4));
        // The leading FG goes first, then the doubled-BG rule collapses
        // the survivors further.
        assert_eq!(compress_sgr(&buf, 0), fg_len + bg_len);
    }

    #[test]
    fn newline_chain_skips_to_the_newline() {
        let mut buf = RESET_FG.to_vec();
        buf.extend(fg(1));
        buf.extend(bg(2));
        buf.push(b'\n');
        buf.extend(bg(3));
        buf.extend(fg(4));
        let nl = buf.iter().position(|&b| b == b'\n').unwrap();
        assert_eq!(compress_sgr(&buf, 0), nl);
    }

    #[test]
    fn lone_sequence_is_untouched() {
        let buf = fg(7);
        assert_eq!(compress_sgr(&buf, 0), 0);
    }

    #[test]
    fn non_sgr_sequence_is_untouched() {
        let buf = b"\x1b|5;10H".to_vec();
        assert_eq!(compress_sgr(&buf, 0), 0);
    }
}
