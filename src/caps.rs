// src/caps.rs

//! Process-wide capability flags.
//!
//! Detected once at startup and read-only afterwards, except for the
//! termcap-mode toggle which lives in the renderer. Callers consult this
//! struct instead of probing the OS again; optional OS facilities are
//! represented as flags here rather than as late-bound function pointers.

use serde::{Deserialize, Serialize};

/// Minimum OS build with a working virtual-terminal processor.
pub const VTP_MIN_BUILD: u32 = 15063;
/// Minimum OS build with ConPTY.
pub const CONPTY_MIN_BUILD: u32 = 17763;
/// Build where ConPTY stabilized enough for unrestricted use.
pub const CONPTY_STABLE_BUILD: u32 = 18362;

/// Observable behavior classes of the PTY layer, gated on the OS build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConPtyType {
    /// No usable ConPTY.
    Type1,
    /// ConPTY present but with known resize/flush quirks.
    Type2,
    /// Fully working ConPTY.
    Type3,
}

/// Write-once capability flags for the whole process.
#[derive(Debug, Clone)]
pub struct Capabilities {
    /// The editor runs with a GUI attached; console paths are bypassed.
    pub gui_in_use: bool,
    /// Virtual-terminal output sequences are interpreted by the console.
    pub vtp_working: bool,
    /// A genuine pseudo-terminal can be allocated for jobs.
    pub conpty_working: bool,
    pub conpty_type: ConPtyType,
    /// Running under a terminal multiplexer that handles VT itself.
    pub wt_working: bool,
    /// The console supports an alternate screen buffer.
    pub use_alt_screen_buffer: bool,
    /// Host OS build number; zero when the OS does not version this way.
    pub os_build: u32,
}

impl Default for Capabilities {
    /// The most conservative console: no VT, no pty, legacy buffer only.
    fn default() -> Self {
        Capabilities {
            gui_in_use: false,
            vtp_working: false,
            conpty_working: false,
            conpty_type: ConPtyType::Type1,
            wt_working: false,
            use_alt_screen_buffer: false,
            os_build: 0,
        }
    }
}

impl Capabilities {
    /// Detects capabilities for a Unix-like host.
    ///
    /// On Unix the terminal itself interprets escape sequences and PTYs
    /// are always available, so this mostly reports "everything works".
    pub fn detect_unix(gui_in_use: bool) -> Self {
        let wt_working = std::env::var_os("WT_SESSION").is_some();
        Capabilities {
            gui_in_use,
            vtp_working: true,
            conpty_working: true,
            conpty_type: ConPtyType::Type3,
            wt_working,
            use_alt_screen_buffer: true,
            os_build: 0,
        }
    }

    /// Derives capabilities from an NT-class build number.
    pub fn from_nt_build(build: u32, gui_in_use: bool) -> Self {
        let vtp_working = build >= VTP_MIN_BUILD;
        let conpty_working = build >= CONPTY_MIN_BUILD;
        let conpty_type = if !conpty_working {
            ConPtyType::Type1
        } else if build < CONPTY_STABLE_BUILD {
            ConPtyType::Type2
        } else {
            ConPtyType::Type3
        };
        Capabilities {
            gui_in_use,
            vtp_working,
            conpty_working,
            conpty_type,
            wt_working: false,
            use_alt_screen_buffer: vtp_working,
            os_build: build,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn old_build_has_no_vtp_or_conpty() {
        let caps = Capabilities::from_nt_build(14393, false);
        assert!(!caps.vtp_working);
        assert!(!caps.conpty_working);
        assert_eq!(caps.conpty_type, ConPtyType::Type1);
    }

    #[test]
    fn vtp_without_conpty_window() {
        let caps = Capabilities::from_nt_build(16299, false);
        assert!(caps.vtp_working);
        assert!(!caps.conpty_working);
    }

    #[test]
    fn early_conpty_is_type2() {
        let caps = Capabilities::from_nt_build(17763, false);
        assert!(caps.conpty_working);
        assert_eq!(caps.conpty_type, ConPtyType::Type2);
    }

    #[test]
    fn stable_conpty_is_type3() {
        let caps = Capabilities::from_nt_build(19045, false);
        assert_eq!(caps.conpty_type, ConPtyType::Type3);
    }

    #[test]
    fn unix_always_has_pty() {
        let caps = Capabilities::detect_unix(false);
        assert!(caps.conpty_working);
        assert!(caps.vtp_working);
    }
}
