//! Network namespace switching.
//!
//! `setns` changes the namespace of the calling thread only. Work that must
//! happen inside a container's network namespace therefore runs on a
//! dedicated OS thread with its own single-threaded runtime, so netlink
//! sockets are opened inside the target namespace and no other task ever
//! observes the switch.

#![allow(unsafe_code)]

use std::fs::File;
use std::future::Future;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};

use cask_common::{CaskError, CaskResult};

/// Network namespace of the current thread.
const THREAD_NETNS: &str = "/proc/thread-self/ns/net";

/// Path of the network namespace of `pid`.
#[must_use]
pub fn netns_path(pid: i32) -> PathBuf {
    PathBuf::from(format!("/proc/{pid}/ns/net"))
}

/// Moves the current thread into a network namespace and back on drop.
#[derive(Debug)]
pub struct NetnsGuard {
    original: File,
}

impl NetnsGuard {
    /// Enter the namespace at `path`.
    ///
    /// # Errors
    ///
    /// Fails when either namespace file cannot be opened or `setns` fails.
    pub fn enter(path: &Path) -> CaskResult<Self> {
        let original = File::open(THREAD_NETNS)
            .map_err(|e| CaskError::io_context(format!("open {THREAD_NETNS}"), e))?;
        let target = File::open(path)
            .map_err(|e| CaskError::io_context(format!("open {}", path.display()), e))?;

        setns(&target).map_err(|e| {
            CaskError::io_context(format!("enter network namespace {}", path.display()), e)
        })?;

        tracing::debug!(netns = %path.display(), "Entered network namespace");
        Ok(Self { original })
    }
}

impl Drop for NetnsGuard {
    fn drop(&mut self) {
        if let Err(e) = setns(&self.original) {
            tracing::error!(error = %e, "Failed to restore network namespace");
        }
    }
}

fn setns(file: &File) -> std::io::Result<()> {
    // SAFETY: the fd is valid for the duration of the call.
    let ret = unsafe { libc::setns(file.as_raw_fd(), libc::CLONE_NEWNET) };
    if ret == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

/// Run the future produced by `f` inside the network namespace at `path`.
///
/// # Errors
///
/// Returns the error of `f`, or a namespace or runtime setup error.
pub async fn run_in_netns<F, Fut, T>(path: PathBuf, f: F) -> CaskResult<T>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = CaskResult<T>>,
    T: Send + 'static,
{
    let (tx, rx) = tokio::sync::oneshot::channel();

    std::thread::Builder::new()
        .name("cask-netns".to_string())
        .spawn(move || {
            let result = (|| -> CaskResult<T> {
                // the runtime drops before the guard restores the namespace
                let _guard = NetnsGuard::enter(&path)?;
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                runtime.block_on(f())
            })();
            let _ = tx.send(result);
        })
        .map_err(|e| CaskError::Internal {
            message: format!("failed to spawn namespace thread: {e}"),
        })?;

    rx.await.map_err(|_| CaskError::Internal {
        message: "namespace thread exited without a result".to_string(),
    })?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_netns_path() {
        assert_eq!(netns_path(42), PathBuf::from("/proc/42/ns/net"));
    }

    #[tokio::test]
    async fn test_missing_namespace_is_an_error() {
        let result = run_in_netns(PathBuf::from("/nonexistent/ns/net"), || async {
            Ok::<_, CaskError>(1)
        })
        .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    #[ignore = "requires CAP_SYS_ADMIN"]
    async fn test_run_in_own_namespace() {
        let value = run_in_netns(netns_path(i32::try_from(std::process::id()).unwrap()), || async {
            Ok::<_, CaskError>(7)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }
}
