// src/fs/acl.rs

//! Security attributes and extended file metadata.
//!
//! An [`AclHandle`] is an opaque snapshot of everything beyond the plain
//! permission bits: the POSIX ACL xattr where the filesystem has one, and
//! a protection flag mirroring the NT "no inherited entries" state. The
//! editor grabs a handle before rewriting a file and reapplies it to the
//! replacement, so a write-and-rename save does not strip metadata.

use anyhow::{Context, Result};
use log::{debug, trace};
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

const POSIX_ACL_ACCESS: &str = "system.posix_acl_access";

/// Snapshot of a file's security attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AclHandle {
    /// Permission bits, always captured.
    pub mode: u32,
    /// Raw POSIX ACL blob, when the filesystem supports one.
    pub acl_blob: Option<Vec<u8>>,
    /// The source carried no inherited entries; reapplying must not let
    /// the destination's container re-introduce any.
    pub protected: bool,
}

fn path_cstr(path: &Path) -> Result<CString> {
    CString::new(path.as_os_str().as_bytes())
        .with_context(|| format!("path {} contains a NUL byte", path.display()))
}

fn read_xattr(path: &Path, name: &str) -> Result<Option<Vec<u8>>> {
    let cpath = path_cstr(path)?;
    let cname = CString::new(name).context("xattr name contains NUL")?;
    let len = unsafe {
        libc::getxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            std::ptr::null_mut(),
            0,
        )
    };
    if len == -1 {
        let err = io::Error::last_os_error();
        return match err.raw_os_error() {
            // No ACL set, or a filesystem without xattr support. Both
            // just mean "nothing to snapshot".
            Some(libc::ENODATA) | Some(libc::ENOTSUP) => Ok(None),
            _ => Err(err).with_context(|| format!("getxattr {} on {}", name, path.display())),
        };
    }
    let mut buf = vec![0u8; len as usize];
    let got = unsafe {
        libc::getxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            buf.as_mut_ptr() as *mut libc::c_void,
            buf.len(),
        )
    };
    if got == -1 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("getxattr {} on {}", name, path.display()));
    }
    buf.truncate(got as usize);
    Ok(Some(buf))
}

fn write_xattr(path: &Path, name: &str, value: &[u8]) -> Result<()> {
    let cpath = path_cstr(path)?;
    let cname = CString::new(name).context("xattr name contains NUL")?;
    let rc = unsafe {
        libc::setxattr(
            cpath.as_ptr(),
            cname.as_ptr(),
            value.as_ptr() as *const libc::c_void,
            value.len(),
            0,
        )
    };
    if rc == -1 {
        let err = io::Error::last_os_error();
        // The destination filesystem may not take xattrs at all; the
        // mode bits below still carry the essentials.
        if err.raw_os_error() == Some(libc::ENOTSUP) {
            debug!("xattr {} not supported on {}", name, path.display());
            return Ok(());
        }
        return Err(err).with_context(|| format!("setxattr {} on {}", name, path.display()));
    }
    Ok(())
}

/// Captures the security attributes of `path`. Missing pieces degrade to
/// an empty handle rather than an error; a file the editor can stat always
/// yields a usable snapshot.
pub fn get_acl(path: &Path) -> Result<AclHandle> {
    let mode = super::get_perm(path)
        .with_context(|| format!("Failed to stat {}", path.display()))?;
    let acl_blob = read_xattr(path, POSIX_ACL_ACCESS)?;
    trace!(
        "captured acl of {}: mode {:o}, blob {} bytes",
        path.display(),
        mode,
        acl_blob.as_ref().map_or(0, Vec::len)
    );
    Ok(AclHandle {
        mode,
        acl_blob,
        protected: false,
    })
}

/// Reapplies a previously captured snapshot to `path`.
pub fn set_acl(path: &Path, handle: &AclHandle) -> Result<()> {
    super::set_perm(path, handle.mode)?;
    if let Some(blob) = &handle.acl_blob {
        write_xattr(path, POSIX_ACL_ACCESS, blob)?;
    }
    Ok(())
}

/// Whether reapplying `handle` must mark the destination protected.
///
/// A source with no inherited entries was isolated from its container; a
/// plain copy of its entries into a destination that still inherits would
/// silently widen access. So the copy is marked protected exactly when
/// the source was.
pub fn needs_protected_dacl(handle: &AclHandle) -> bool {
    handle.protected
}

/// Name of the data inside a `:name:$DATA` stream qualifier, or `None`
/// for the unnamed (main) stream and non-stream suffixes.
pub fn parse_stream_name(qualifier: &str) -> Option<&str> {
    let rest = qualifier.strip_prefix(':')?;
    let name = rest.strip_suffix(":$DATA")?;
    if name.is_empty() {
        None
    } else {
        Some(name)
    }
}

/// Copies permission bits and every user xattr from `from` to `to`.
/// Used after write-and-rename saves and by the shape-C shell path when
/// it replaces a file wholesale.
pub fn copy_file_attributes(from: &Path, to: &Path) -> Result<()> {
    if let Some(mode) = super::get_perm(from) {
        super::set_perm(to, mode)?;
    }
    let cfrom = path_cstr(from)?;
    let len = unsafe { libc::listxattr(cfrom.as_ptr(), std::ptr::null_mut(), 0) };
    if len <= 0 {
        return Ok(());
    }
    let mut names = vec![0u8; len as usize];
    let got = unsafe {
        libc::listxattr(
            cfrom.as_ptr(),
            names.as_mut_ptr() as *mut libc::c_char,
            names.len(),
        )
    };
    if got == -1 {
        return Err(io::Error::last_os_error())
            .with_context(|| format!("listxattr on {}", from.display()));
    }
    names.truncate(got as usize);
    for raw in names.split(|&b| b == 0) {
        if raw.is_empty() {
            continue;
        }
        let name = String::from_utf8_lossy(raw).into_owned();
        if let Some(value) = read_xattr(from, &name)? {
            write_xattr(to, &name, &value)?;
        }
    }
    Ok(())
}
