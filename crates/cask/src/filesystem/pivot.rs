#![allow(unsafe_code)]
//! pivot_root implementation.

use std::ffi::CString;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;

use cask_common::{CaskError, CaskResult};

/// Execute pivot_root to change the root filesystem.
///
/// The old root ends up at `put_old`, which must be below `new_root`.
///
/// # Errors
///
/// Fails when a path contains a NUL byte or the syscall fails.
pub fn pivot_root(new_root: &Path, put_old: &Path) -> CaskResult<()> {
    tracing::debug!(
        new_root = %new_root.display(),
        put_old = %put_old.display(),
        "Executing pivot_root"
    );

    let to_c = |path: &Path| {
        CString::new(path.as_os_str().as_bytes()).map_err(|e| CaskError::Config {
            message: format!("Invalid path {}: {e}", path.display()),
        })
    };
    let new_root_c = to_c(new_root)?;
    let put_old_c = to_c(put_old)?;

    // SAFETY: both arguments are valid NUL-terminated strings.
    let ret = unsafe {
        libc::syscall(
            libc::SYS_pivot_root,
            new_root_c.as_ptr(),
            put_old_c.as_ptr(),
        )
    };

    if ret != 0 {
        return Err(CaskError::io_context(
            "pivot_root",
            std::io::Error::last_os_error(),
        ));
    }

    tracing::debug!("pivot_root successful");
    Ok(())
}
