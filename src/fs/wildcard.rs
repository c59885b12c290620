// src/fs/wildcard.rs

//! Wildcard expansion through the user's shell.
//!
//! Patterns are handed to the configured shell, which globs them and
//! writes the matches to a temporary file this module reads back. The
//! command stanza depends on the shell family: csh has a `glob` builtin,
//! zsh has `print -N` with NUL separators, and everything else gets a
//! small `vimglob` function defined inline. Patterns with no wildcard
//! characters never touch the shell at all.

use anyhow::{bail, Context, Result};
use bitflags::bitflags;
use log::{debug, trace};
use std::path::Path;
use std::process::Command;

use nix::unistd::AccessFlags;

use crate::config::PalConfig;

bitflags! {
    /// What the caller wants back from an expansion.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ExpandFlags: u32 {
        /// Keep ordinary files.
        const FILE = 0x01;
        /// Keep directories.
        const DIR = 0x02;
        /// Keep patterns that matched nothing, as themselves.
        const NOTFOUND = 0x04;
        /// Append a slash to directory results.
        const ADDSLASH = 0x08;
        /// Keep only executables (rules out DIR).
        const EXEC = 0x10;
        /// Suppress the error message on shell failure.
        const SILENT = 0x20;
    }
}

/// How a shell family expands a list of patterns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShellStyle {
    /// csh and tcsh: the `glob` builtin, NUL-separated output.
    CshGlob,
    /// zsh: `print -N`, NUL-separated output, `nonomatch` unset.
    ZshPrint,
    /// POSIX shells: an inline `vimglob` function, newline-separated.
    VimGlob,
    /// bash: `vimglob` plus `**` via globstar. The version guard is
    /// bash syntax, so only bash itself gets this stanza.
    BashGlobstar,
}

impl ShellStyle {
    /// Picks the stanza from the shell's base name.
    pub fn detect(shell: &str) -> Self {
        let base = Path::new(shell)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if base.ends_with("csh") {
            ShellStyle::CshGlob
        } else if base == "zsh" {
            ShellStyle::ZshPrint
        } else if base == "bash" {
            ShellStyle::BashGlobstar
        } else {
            ShellStyle::VimGlob
        }
    }

    fn separator(self) -> u8 {
        match self {
            ShellStyle::CshGlob | ShellStyle::ZshPrint => 0,
            ShellStyle::VimGlob | ShellStyle::BashGlobstar => b'\n',
        }
    }
}

/// True when `pat` contains a character the shell would expand.
pub fn has_wildcard(pat: &str) -> bool {
    let mut prev_backslash = false;
    for c in pat.chars() {
        if prev_backslash {
            prev_backslash = false;
            continue;
        }
        match c {
            '\\' => prev_backslash = true,
            '*' | '?' | '[' | '{' | '`' | '$' | '~' => return true,
            _ => {}
        }
    }
    false
}

/// Removes one level of backslash escaping, the inverse of what callers
/// add to keep a literal name out of the shell's hands.
pub fn halve_backslashes(pat: &str) -> String {
    let mut out = String::with_capacity(pat.len());
    let mut chars = pat.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(next) = chars.next() {
                out.push(next);
                continue;
            }
        }
        out.push(c);
    }
    out
}

fn escape_for_shell(pat: &str) -> String {
    // Wildcard characters must survive to be expanded; everything else
    // the shell treats specially gets a backslash.
    let mut out = String::with_capacity(pat.len());
    for c in pat.chars() {
        if matches!(c, ' ' | '\t' | ';' | '&' | '|' | '<' | '>' | '(' | ')' | '#' | '"' | '\'') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Builds the full shell command writing matches to `outfile`.
pub fn build_command(style: ShellStyle, patterns: &[String], outfile: &Path) -> String {
    let mut cmd = String::new();
    match style {
        ShellStyle::CshGlob => {
            cmd.push_str("glob >");
            cmd.push_str(&outfile.to_string_lossy());
        }
        ShellStyle::ZshPrint => {
            cmd.push_str("unset nonomatch; print -N >");
            cmd.push_str(&outfile.to_string_lossy());
        }
        ShellStyle::VimGlob => {
            cmd.push_str(
                "vimglob() { while [ $# -ge 1 ]; do echo \"$1\"; shift; done }; vimglob >",
            );
            cmd.push_str(&outfile.to_string_lossy());
        }
        ShellStyle::BashGlobstar => {
            // bash 4+ also honors ** across directories.
            cmd.push_str("[[ ${BASH_VERSINFO[0]} -ge 4 ]] && shopt -s globstar; ");
            cmd.push_str(
                "vimglob() { while [ $# -ge 1 ]; do echo \"$1\"; shift; done }; vimglob >",
            );
            cmd.push_str(&outfile.to_string_lossy());
        }
    }
    for pat in patterns {
        cmd.push(' ');
        cmd.push_str(&escape_for_shell(pat));
    }
    cmd
}

fn keep(path: &Path, flags: ExpandFlags) -> bool {
    if !path.exists() {
        return false;
    }
    let dir = path.is_dir();
    if dir && !flags.contains(ExpandFlags::DIR) {
        return false;
    }
    if !dir && !flags.contains(ExpandFlags::FILE) {
        return false;
    }
    if flags.contains(ExpandFlags::EXEC) && !crate::fs::access(path, AccessFlags::X_OK) {
        return false;
    }
    true
}

fn literal_results(patterns: &[String], flags: ExpandFlags) -> Vec<String> {
    patterns
        .iter()
        .map(|p| halve_backslashes(p))
        .filter(|p| flags.contains(ExpandFlags::NOTFOUND) || keep(Path::new(p), flags))
        .collect()
}

/// Expands `patterns` through the shell named in `config`.
///
/// Patterns without wildcards are returned as-is, modulo backslash
/// halving, without consulting the shell. A pattern matching nothing
/// disappears from the result unless `NOTFOUND` keeps it. Shell failure
/// is an error and produces no partial results, except that `NOTFOUND`
/// still hands the unexpanded patterns back.
pub fn expand_wildcards(
    config: &PalConfig,
    patterns: &[String],
    flags: ExpandFlags,
) -> Result<Vec<String>> {
    if patterns.is_empty() {
        return Ok(Vec::new());
    }
    if !patterns.iter().any(|p| has_wildcard(p)) {
        trace!("no wildcards in {:?}, skipping shell", patterns);
        return Ok(literal_results(patterns, flags));
    }

    let style = ShellStyle::detect(&config.shell);
    let outfile = tempfile::NamedTempFile::new().context("Failed to create glob output file")?;
    let cmd = build_command(style, patterns, outfile.path());
    debug!("expanding via {} ({:?}): {}", config.shell, style, cmd);

    let status = Command::new(&config.shell)
        .arg(&config.shellcmdflag)
        .arg(&cmd)
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .status()
        .with_context(|| format!("Failed to run shell {}", config.shell))?;
    if !status.success() && style == ShellStyle::CshGlob {
        // csh exits non-zero when a pattern matches nothing; the output
        // file still holds whatever did match.
        debug!("glob builtin reported no match");
    } else if !status.success() {
        if !flags.contains(ExpandFlags::SILENT) {
            log::error!("shell returned {} while expanding wildcards", status);
        }
        if flags.contains(ExpandFlags::NOTFOUND) {
            // The caller asked for unmatched patterns back; a failed
            // shell leaves every pattern unmatched.
            return Ok(patterns.iter().map(|p| halve_backslashes(p)).collect());
        }
        bail!("wildcard expansion failed with {}", status);
    }

    let raw = std::fs::read(outfile.path()).context("Failed to read glob output")?;

    let sep = style.separator();
    let mut out = Vec::new();
    for token in raw.split(|&b| b == sep) {
        if token.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(token).into_owned();
        let path = Path::new(&name);
        if !keep(path, flags) {
            if flags.contains(ExpandFlags::NOTFOUND) && has_wildcard(&name) {
                out.push(name);
            }
            continue;
        }
        if flags.contains(ExpandFlags::ADDSLASH) && path.is_dir() && !name.ends_with('/') {
            out.push(format!("{}/", name));
        } else {
            out.push(name);
        }
    }
    if out.is_empty() && flags.contains(ExpandFlags::NOTFOUND) {
        return Ok(patterns.iter().map(|p| halve_backslashes(p)).collect());
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh_config() -> PalConfig {
        PalConfig {
            shell: "/bin/sh".to_string(),
            shellcmdflag: "-c".to_string(),
            ..Default::default()
        }
    }

    const FILES: ExpandFlags = ExpandFlags::FILE.union(ExpandFlags::DIR);

    #[test]
    fn style_detection() {
        assert_eq!(ShellStyle::detect("/bin/csh"), ShellStyle::CshGlob);
        assert_eq!(ShellStyle::detect("/usr/bin/tcsh"), ShellStyle::CshGlob);
        assert_eq!(ShellStyle::detect("/usr/bin/zsh"), ShellStyle::ZshPrint);
        assert_eq!(ShellStyle::detect("/bin/bash"), ShellStyle::BashGlobstar);
        assert_eq!(ShellStyle::detect("/bin/sh"), ShellStyle::VimGlob);
        assert_eq!(ShellStyle::detect("/bin/dash"), ShellStyle::VimGlob);
    }

    #[test]
    fn wildcard_detection() {
        assert!(has_wildcard("*.rs"));
        assert!(has_wildcard("file?"));
        assert!(has_wildcard("~alice"));
        assert!(has_wildcard("$HOME"));
        assert!(!has_wildcard("plain.txt"));
        assert!(!has_wildcard("esc\\*aped"));
    }

    #[test]
    fn backslash_halving() {
        assert_eq!(halve_backslashes("a\\*b"), "a*b");
        assert_eq!(halve_backslashes("a\\\\b"), "a\\b");
        assert_eq!(halve_backslashes("plain"), "plain");
    }

    #[test]
    fn vimglob_stanza_is_pure_posix() {
        let cmd = build_command(
            ShellStyle::VimGlob,
            &["*.txt".to_string()],
            Path::new("/tmp/out"),
        );
        assert!(cmd.contains("vimglob() { while [ $# -ge 1 ]"));
        // The version guard is bash syntax; dash dies on it.
        assert!(!cmd.contains("BASH_VERSINFO"));
        assert!(cmd.ends_with("vimglob >/tmp/out *.txt"));
    }

    #[test]
    fn bash_stanza_adds_the_globstar_guard() {
        let cmd = build_command(
            ShellStyle::BashGlobstar,
            &["*.txt".to_string()],
            Path::new("/tmp/out"),
        );
        assert!(cmd.starts_with("[[ ${BASH_VERSINFO[0]} -ge 4 ]] && shopt -s globstar; "));
        assert!(cmd.contains("vimglob() { while [ $# -ge 1 ]"));
        assert!(cmd.ends_with("vimglob >/tmp/out *.txt"));
    }

    #[test]
    fn zsh_stanza_uses_print() {
        let cmd = build_command(
            ShellStyle::ZshPrint,
            &["*.txt".to_string()],
            Path::new("/tmp/out"),
        );
        assert_eq!(cmd, "unset nonomatch; print -N >/tmp/out *.txt");
    }

    #[test]
    fn literal_patterns_skip_the_shell() {
        // A bogus shell proves no process is spawned for literal input.
        let config = PalConfig {
            shell: "/no/such/shell".to_string(),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let f = dir.path().join("plain.txt");
        std::fs::write(&f, b"x").unwrap();
        let pat = f.to_string_lossy().into_owned();
        let out = expand_wildcards(&config, &[pat.clone()], FILES).unwrap();
        assert_eq!(out, vec![pat]);
    }

    #[test]
    fn literal_escapes_are_halved() {
        let config = PalConfig {
            shell: "/no/such/shell".to_string(),
            ..Default::default()
        };
        let out = expand_wildcards(
            &config,
            &["a\\*b".to_string()],
            FILES | ExpandFlags::NOTFOUND,
        )
        .unwrap();
        assert_eq!(out, vec!["a*b".to_string()]);
    }

    #[test]
    fn star_expands_to_matching_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), b"").unwrap();
        std::fs::write(dir.path().join("b.txt"), b"").unwrap();
        std::fs::write(dir.path().join("c.log"), b"").unwrap();
        let pat = format!("{}/*.txt", dir.path().display());
        let mut out = expand_wildcards(&sh_config(), &[pat], FILES).unwrap();
        out.sort();
        assert_eq!(out.len(), 2);
        assert!(out[0].ends_with("a.txt"));
        assert!(out[1].ends_with("b.txt"));
    }

    #[test]
    fn dir_filter_drops_files() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), b"").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        let pat = format!("{}/*", dir.path().display());
        let out = expand_wildcards(
            &sh_config(),
            &[pat],
            ExpandFlags::DIR | ExpandFlags::ADDSLASH,
        )
        .unwrap();
        assert_eq!(out.len(), 1);
        assert!(out[0].ends_with("sub/"));
    }

    #[test]
    fn shell_failure_keeps_patterns_under_notfound() {
        let config = PalConfig {
            shell: "/bin/false".to_string(),
            shellcmdflag: "-c".to_string(),
            ..Default::default()
        };
        let pats = vec!["*.zzz".to_string()];
        assert!(expand_wildcards(&config, &pats, FILES | ExpandFlags::SILENT).is_err());
        let kept = expand_wildcards(
            &config,
            &pats,
            FILES | ExpandFlags::NOTFOUND | ExpandFlags::SILENT,
        )
        .unwrap();
        assert_eq!(kept, pats);
    }

    #[test]
    fn unmatched_pattern_kept_only_with_notfound() {
        let dir = tempfile::tempdir().unwrap();
        let pat = format!("{}/nothing*.zzz", dir.path().display());
        let none = expand_wildcards(&sh_config(), &[pat.clone()], FILES).unwrap();
        assert!(none.is_empty());
        let kept =
            expand_wildcards(&sh_config(), &[pat.clone()], FILES | ExpandFlags::NOTFOUND).unwrap();
        assert_eq!(kept, vec![pat]);
    }
}
