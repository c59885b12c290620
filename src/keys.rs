// src/keys.rs

//! Canonical key byte encoding.
//!
//! The editor core consumes a byte stream in which special keys are framed
//! as `K_SPECIAL` triplets and modifier state precedes the key it applies
//! to. The multiplexer produces this encoding from OS input records; this
//! module owns the constants and the framing helpers.

/// Lead-in byte for special key frames. A literal 0x80 in input data must
/// be escaped as `K_SPECIAL KS_SPECIAL KE_FILLER`.
pub const K_SPECIAL: u8 = 0x80;
/// 8-bit CSI; quoted the same way K_SPECIAL is when it appears as data.
pub const CSI: u8 = 0x9b;

// Second bytes of a special frame.
pub const KS_SPECIAL: u8 = 254;
pub const KS_EXTRA: u8 = 253;
pub const KS_MODIFIER: u8 = 252;

/// Third byte used when escaping a literal K_SPECIAL/CSI.
pub const KE_FILLER: u8 = 88;

// KS_EXTRA subcodes.
pub const KE_CURSORHOLD: u8 = 96;
pub const KE_FOCUSGAINED: u8 = 97;
pub const KE_FOCUSLOST: u8 = 98;
pub const KE_MOUSE: u8 = 99;
pub const KE_IGNORE: u8 = 100;

// Modifier mask bits, carried in the third byte of a KS_MODIFIER frame.
pub const MOD_MASK_SHIFT: u8 = 0x02;
pub const MOD_MASK_CTRL: u8 = 0x04;
pub const MOD_MASK_ALT: u8 = 0x08;

pub const CTRL_C: u8 = 0x03;
pub const CTRL_D: u8 = 0x04;

/// Appends the synthesized `CursorHold` key.
pub fn push_cursorhold(buf: &mut Vec<u8>) {
    buf.push(K_SPECIAL);
    buf.push(KS_EXTRA);
    buf.push(KE_CURSORHOLD);
}

/// Appends a focus change frame.
pub fn push_focus(buf: &mut Vec<u8>, gained: bool) {
    buf.push(K_SPECIAL);
    buf.push(KS_EXTRA);
    buf.push(if gained { KE_FOCUSGAINED } else { KE_FOCUSLOST });
}

/// Appends a modifier frame. No frame is emitted for an empty mask.
pub fn push_modifiers(buf: &mut Vec<u8>, mods: u8) {
    if mods != 0 {
        buf.push(K_SPECIAL);
        buf.push(KS_MODIFIER);
        buf.push(mods);
    }
}

/// Appends raw bytes, escaping any literal `K_SPECIAL` or `CSI` so the
/// consumer cannot mistake data for a frame lead-in.
pub fn push_escaped(buf: &mut Vec<u8>, bytes: &[u8]) {
    for &b in bytes {
        match b {
            K_SPECIAL => {
                buf.push(K_SPECIAL);
                buf.push(KS_SPECIAL);
                buf.push(KE_FILLER);
            }
            CSI => {
                buf.push(K_SPECIAL);
                buf.push(KS_EXTRA);
                buf.push(KE_FILLER);
            }
            _ => buf.push(b),
        }
    }
}

/// Appends one Unicode scalar as escaped UTF-8.
pub fn push_char(buf: &mut Vec<u8>, ch: char) {
    let mut utf8 = [0u8; 4];
    push_escaped(buf, ch.encode_utf8(&mut utf8).as_bytes());
}

/// Folds a UTF-16 surrogate pair into a scalar value.
///
/// Console key events deliver astral-plane characters as two events
/// carrying the high and low halves; the multiplexer pairs them up and
/// calls this. Returns `None` for an invalid pair.
pub fn fold_surrogates(high: u16, low: u16) -> Option<char> {
    if !(0xd800..=0xdbff).contains(&high) || !(0xdc00..=0xdfff).contains(&low) {
        return None;
    }
    let cp = 0x10000 + (((high as u32 - 0xd800) << 10) | (low as u32 - 0xdc00));
    char::from_u32(cp)
}

/// True when `unit` is the leading half of a surrogate pair.
pub fn is_high_surrogate(unit: u16) -> bool {
    (0xd800..=0xdbff).contains(&unit)
}
