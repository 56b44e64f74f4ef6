//! Running a command inside an existing container.

#![allow(unsafe_code)]

use std::ffi::CString;
use std::fs::File;
use std::os::fd::AsRawFd;
use std::os::unix::ffi::OsStringExt;

use cask_common::{CaskError, CaskResult};

use super::process::wait_pid;

/// Namespaces joined by `cask exec`, in join order. The mount namespace
/// goes last so the earlier joins are unaffected by the new root.
const NAMESPACES: [(&str, libc::c_int); 5] = [
    ("ipc", libc::CLONE_NEWIPC),
    ("uts", libc::CLONE_NEWUTS),
    ("net", libc::CLONE_NEWNET),
    ("pid", libc::CLONE_NEWPID),
    ("mnt", libc::CLONE_NEWNS),
];

const EXIT_SETUP_FAILED: libc::c_int = 126;
const EXIT_EXEC_FAILED: libc::c_int = 127;

/// Split a `/proc/<pid>/environ` blob into `KEY=VALUE` entries.
#[must_use]
pub fn parse_environ(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|entry| !entry.is_empty())
        .map(|entry| String::from_utf8_lossy(entry).into_owned())
        .collect()
}

/// Environment of a running process.
///
/// # Errors
///
/// Fails when the process is gone or unreadable.
pub fn process_environ(pid: i32) -> CaskResult<Vec<String>> {
    let path = format!("/proc/{pid}/environ");
    let raw =
        std::fs::read(&path).map_err(|e| CaskError::io_context(format!("read {path}"), e))?;
    Ok(parse_environ(&raw))
}

fn c_strings<I, S>(values: I) -> CaskResult<Vec<CString>>
where
    I: IntoIterator<Item = S>,
    S: Into<Vec<u8>>,
{
    values
        .into_iter()
        .map(|value| {
            CString::new(value).map_err(|e| CaskError::Config {
                message: format!("argument contains a NUL byte: {e}"),
            })
        })
        .collect()
}

/// The caller's environment as raw `KEY=VALUE` entries, followed by
/// `extra`.
fn exec_environment(extra: &[String]) -> Vec<Vec<u8>> {
    std::env::vars_os()
        .map(|(key, value)| {
            let mut entry = key.into_vec();
            entry.push(b'=');
            entry.extend(value.into_vec());
            entry
        })
        .chain(extra.iter().map(|entry| entry.clone().into_bytes()))
        .collect()
}

fn pointers(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

/// Run `argv` inside the namespaces of `pid` with the caller's environment
/// extended by `env`, and return its exit code.
///
/// The forked helper joins the namespaces and forks once more so the
/// command becomes a member of the container's pid namespace.
///
/// # Errors
///
/// Fails when `argv` is empty, a namespace cannot be opened or `fork`
/// fails. Failures after the fork surface as exit codes 126 and 127.
pub fn exec_in_container(pid: i32, argv: &[String], env: &[String]) -> CaskResult<i32> {
    if argv.is_empty() {
        return Err(CaskError::Config {
            message: "exec requires a command".to_string(),
        });
    }

    let namespaces = NAMESPACES
        .iter()
        .map(|(ns, flag)| {
            let path = format!("/proc/{pid}/ns/{ns}");
            File::open(&path)
                .map(|file| (file, *flag))
                .map_err(|e| CaskError::io_context(format!("open {path}"), e))
        })
        .collect::<CaskResult<Vec<_>>>()?;

    let args = c_strings(argv.iter().map(String::as_str))?;
    let envs = c_strings(exec_environment(env))?;
    let root = c_strings(["/"])?;
    let argv_ptrs = pointers(&args);
    let envp_ptrs = pointers(&envs);

    tracing::debug!(pid, command = ?argv, "Entering container namespaces");

    // SAFETY: the child only makes async-signal-safe calls on data built
    // before the fork.
    let helper = unsafe { libc::fork() };
    match helper {
        -1 => Err(CaskError::io_context(
            "fork exec helper",
            std::io::Error::last_os_error(),
        )),
        0 => unsafe {
            for (file, flag) in &namespaces {
                if libc::setns(file.as_raw_fd(), *flag) != 0 {
                    libc::_exit(EXIT_SETUP_FAILED);
                }
            }
            match libc::fork() {
                -1 => libc::_exit(EXIT_SETUP_FAILED),
                0 => {
                    if libc::chdir(root[0].as_ptr()) != 0 {
                        libc::_exit(EXIT_SETUP_FAILED);
                    }
                    libc::execvpe(args[0].as_ptr(), argv_ptrs.as_ptr(), envp_ptrs.as_ptr());
                    libc::_exit(EXIT_EXEC_FAILED)
                }
                command => {
                    let mut status: libc::c_int = 0;
                    while libc::waitpid(command, &raw mut status, 0) == -1 {
                        if *libc::__errno_location() != libc::EINTR {
                            libc::_exit(EXIT_SETUP_FAILED);
                        }
                    }
                    let code = if libc::WIFEXITED(status) {
                        libc::WEXITSTATUS(status)
                    } else if libc::WIFSIGNALED(status) {
                        128 + libc::WTERMSIG(status)
                    } else {
                        1
                    };
                    libc::_exit(code)
                }
            }
        },
        helper => {
            drop(namespaces);
            wait_pid(helper)
        }
    }
}
