// src/config.rs

//! Option block for the platform layer.
//!
//! This mirrors the handful of editor options the PAL consults directly
//! (`updatetime`, `mousetime`, the shell options, screen restoration).
//! The struct deserializes from a JSON fragment supplied by the embedder;
//! every field has a default so a partial or missing block is fine.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Options consulted by the platform layer.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PalConfig {
    /// Idle milliseconds before a `CursorHold` key is synthesized (`p_ut`).
    pub updatetime: u64,
    /// Maximum milliseconds between clicks of a multi-click (`p_mouset`).
    pub mousetime: u64,
    /// Shell used for `call_shell` and wildcard expansion (`p_sh`).
    pub shell: String,
    /// Flag passed to the shell to run a command string (`p_shcf`).
    pub shellcmdflag: String,
    /// Prefer the `system()`-style shell shape over pipes.
    pub shelltemp: bool,
    /// Buffer bytes go to a filter verbatim, no line-ending policy.
    pub binary: bool,
    /// Add the missing final line ending when filtering (`p_fixeol`).
    pub fixeol: bool,
    /// Restore the saved console contents when leaving termcap mode.
    pub restore_screen: bool,
    /// Registered server name, exported to children as `VIM_SERVERNAME`.
    pub servername: String,
    /// Version string exported to hosted-terminal children.
    pub terminal_version: String,
}

impl Default for PalConfig {
    fn default() -> Self {
        PalConfig {
            updatetime: 4000,
            mousetime: 500,
            shell: std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string()),
            shellcmdflag: "-c".to_string(),
            shelltemp: false,
            binary: false,
            fixeol: true,
            restore_screen: true,
            servername: String::new(),
            terminal_version: "901".to_string(),
        }
    }
}

impl PalConfig {
    /// Loads a config from a JSON file, falling back to defaults when the
    /// file does not exist.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if !path.exists() {
            log::info!("no PAL config at {}, using defaults", path.display());
            return Ok(PalConfig::default());
        }
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read PAL config {}", path.display()))?;
        let cfg: PalConfig = serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse PAL config {}", path.display()))?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = PalConfig::default();
        assert_eq!(cfg.updatetime, 4000);
        assert_eq!(cfg.mousetime, 500);
        assert!(!cfg.shell.is_empty());
    }

    #[test]
    fn partial_json_uses_defaults_for_missing_fields() {
        let cfg: PalConfig = serde_json::from_str(r#"{"updatetime": 250}"#).unwrap();
        assert_eq!(cfg.updatetime, 250);
        assert_eq!(cfg.mousetime, 500);
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let cfg = PalConfig::load_or_default(Path::new("/nonexistent/pal.json")).unwrap();
        assert_eq!(cfg.updatetime, 4000);
    }
}
