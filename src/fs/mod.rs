// src/fs/mod.rs

//! Filesystem adapter.
//!
//! Paths are byte strings in the editor's encoding; conversion to the
//! OS-native form (wide strings on NT hosts) happens at this boundary and
//! nowhere else. No operation here aborts the process; everything is a
//! `Result` the facade folds into OK/FAIL.

pub mod acl;
pub mod wildcard;

use anyhow::{bail, Context, Result};
use std::fs::{File, OpenOptions};
use std::os::unix::ffi::OsStrExt;
use std::os::unix::fs::{MetadataExt, PermissionsExt};
use std::path::{Component, Path, PathBuf};

use nix::unistd::AccessFlags;

/// Converts an editor byte-string path to the native `Path`.
pub fn path_from_bytes(bytes: &[u8]) -> &Path {
    Path::new(std::ffi::OsStr::from_bytes(bytes))
}

/// Converts a path to the UTF-16 form NT system calls take. The last
/// conversion point before the OS; nothing above this sees wide strings.
pub fn to_wide(path: &Path) -> Vec<u16> {
    let mut w: Vec<u16> = path.as_os_str().to_string_lossy().encode_utf16().collect();
    w.push(0);
    w
}

/// Makes `path` absolute and normalizes `.` and `..` components without
/// resolving a symbolic link in the final component (a symlink target is
/// still referred to by its own name).
pub fn full_name(path: &Path) -> Result<PathBuf> {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .context("Failed to get current directory")?
            .join(path)
    };
    let mut out = PathBuf::new();
    for comp in joined.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

pub fn is_dir(path: &Path) -> bool {
    path.is_dir()
}

/// A directory that is not reached through a symbolic link.
pub fn is_real_dir(path: &Path) -> bool {
    match std::fs::symlink_metadata(path) {
        Ok(meta) => meta.is_dir(),
        Err(_) => false,
    }
}

pub fn is_symlink(path: &Path) -> bool {
    std::fs::symlink_metadata(path)
        .map(|m| m.file_type().is_symlink())
        .unwrap_or(false)
}

/// More than one name refers to this file's inode.
pub fn is_hardlinked(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.nlink() > 1).unwrap_or(false)
}

/// Unix permission bits, or `None` when the file cannot be statted.
pub fn get_perm(path: &Path) -> Option<u32> {
    std::fs::metadata(path).ok().map(|m| m.permissions().mode() & 0o7777)
}

pub fn set_perm(path: &Path, mode: u32) -> Result<()> {
    let perm = std::fs::Permissions::from_mode(mode);
    std::fs::set_permissions(path, perm)
        .with_context(|| format!("Failed to set mode {:o} on {}", mode, path.display()))
}

/// POSIX access check with the caller's real IDs.
pub fn access(path: &Path, flags: AccessFlags) -> bool {
    nix::unistd::access(path, flags).is_ok()
}

pub fn mkdir(path: &Path) -> Result<()> {
    std::fs::create_dir(path)
        .with_context(|| format!("Failed to create directory {}", path.display()))
}

pub fn rmdir(path: &Path) -> Result<()> {
    std::fs::remove_dir(path)
        .with_context(|| format!("Failed to remove directory {}", path.display()))
}

/// Dotfile convention; the archive/hidden attribute on NT hosts.
pub fn is_hidden(path: &Path) -> bool {
    path.file_name()
        .map(|n| n.as_bytes().starts_with(b"."))
        .unwrap_or(false)
}

pub fn open_for_read(path: &Path) -> Result<File> {
    File::open(path).with_context(|| format!("Failed to open {} for reading", path.display()))
}

pub fn open_for_write(path: &Path) -> Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .with_context(|| format!("Failed to open {} for writing", path.display()))
}

fn placeholder_temp_name(from: &Path) -> PathBuf {
    // Same directory, so the rename below never crosses a filesystem.
    let mut name = from.as_os_str().to_os_string();
    name.push(&format!(".rn{}", std::process::id()));
    PathBuf::from(name)
}

/// Renames `from` to `to`.
///
/// Goes through a temporary name and keeps an empty placeholder file at
/// the old name for the duration, so a filesystem that aliases names
/// (8.3 short names) cannot hand the old alias to someone else mid-move.
/// Fails atomically: if this returns an error, `from` still exists and
/// no placeholder or temporary remains.
pub fn rename(from: &Path, to: &Path) -> Result<()> {
    if !from.exists() {
        bail!("rename source {} does not exist", from.display());
    }
    let temp = placeholder_temp_name(from);
    if temp.exists() {
        bail!("rename temp name {} already occupied", temp.display());
    }

    std::fs::rename(from, &temp)
        .with_context(|| format!("Failed to move {} aside", from.display()))?;

    // Placeholder keeps the old name (and its alias) occupied. Failure
    // to create it is not fatal.
    let placeholder_made = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(from)
        .is_ok();

    let moved = std::fs::rename(&temp, to);

    if placeholder_made {
        let _ = std::fs::remove_file(from);
    }

    match moved {
        Ok(()) => Ok(()),
        Err(e) => {
            // Put the source back under its original name.
            if let Err(back) = std::fs::rename(&temp, from) {
                log::error!(
                    "rename rollback failed, {} stranded: {}",
                    temp.display(),
                    back
                );
            }
            Err(e).with_context(|| {
                format!("Failed to rename {} to {}", from.display(), to.display())
            })
        }
    }
}
