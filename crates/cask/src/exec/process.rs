//! Launching the container init process.
//!
//! The child is created with `clone(2)` in fresh UTS, PID, mount, network
//! and IPC namespaces and immediately re-executes this binary as
//! `cask init`. The command to run travels over a pipe whose read end the
//! child sees as fd 3; the parent writes it once everything else (cgroups,
//! network) is in place.

#![allow(unsafe_code)]

use std::ffi::{CString, OsString};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::fd::{AsRawFd, OwnedFd, RawFd};
use std::os::unix::ffi::OsStringExt;
use std::path::PathBuf;

use cask_common::{CaskError, CaskResult};

/// Fd number of the control pipe inside the child.
pub const PIPE_FD: RawFd = 3;

/// Namespaces every container gets.
const CLONE_FLAGS: libc::c_int = libc::CLONE_NEWUTS
    | libc::CLONE_NEWPID
    | libc::CLONE_NEWNS
    | libc::CLONE_NEWNET
    | libc::CLONE_NEWIPC;

/// Stack for the cloned child until it calls `execve`.
const STACK_SIZE: usize = 1024 * 1024;

/// Exit codes of the child before `execve`.
const EXIT_SETUP_FAILED: libc::c_int = 126;
const EXIT_EXEC_FAILED: libc::c_int = 127;

/// How to launch a container.
#[derive(Debug, Clone)]
pub struct LaunchOptions {
    /// Keep the caller's stdio attached.
    pub interactive: bool,
    /// Container name, for logging.
    pub container_name: String,
    /// Merged root, the child's working directory.
    pub root_dir: PathBuf,
    /// Output destination when not interactive.
    pub log_file: PathBuf,
    /// `KEY=VALUE` pairs added to the inherited environment.
    pub extra_env: Vec<String>,
}

/// A container that has not been started yet.
#[derive(Debug)]
pub struct ContainerProcess {
    options: LaunchOptions,
    pipe_read: OwnedFd,
}

/// Write end of the control pipe.
#[derive(Debug)]
pub struct PipeWriter {
    pipe_write: File,
}

impl PipeWriter {
    /// Send the command and close the pipe. The child's init reads until
    /// the pipe is closed, so this is the go signal.
    ///
    /// # Errors
    ///
    /// Fails when the child is gone and the write fails.
    pub fn send_command(mut self, argv: &[String]) -> CaskResult<()> {
        let command = argv.join(" ");
        tracing::debug!(command = %command, "Sending command to container init");
        self.pipe_write
            .write_all(command.as_bytes())
            .map_err(|e| CaskError::io_context("write container command", e))
    }
}

/// Data the child needs between `clone` and `execve`, prepared in advance
/// so the child does not allocate.
struct ChildContext {
    cwd: CString,
    exe: CString,
    argv: Vec<*const libc::c_char>,
    envp: Vec<*const libc::c_char>,
    pipe_fd: RawFd,
    stdin_fd: Option<RawFd>,
    output_fd: Option<RawFd>,
}

extern "C" fn child_main(arg: *mut libc::c_void) -> libc::c_int {
    // SAFETY: `arg` points at the ChildContext in the parent's copy of the
    // address space, which the child received intact.
    let ctx = unsafe { &*arg.cast::<ChildContext>() };

    // SAFETY: only async-signal-safe calls on data prepared by the parent.
    unsafe {
        if libc::chdir(ctx.cwd.as_ptr()) != 0 {
            libc::_exit(EXIT_SETUP_FAILED);
        }
        // stdio first, the sources may sit on fd 3
        if let Some(fd) = ctx.stdin_fd {
            libc::dup2(fd, libc::STDIN_FILENO);
        }
        if let Some(fd) = ctx.output_fd {
            libc::dup2(fd, libc::STDOUT_FILENO);
            libc::dup2(fd, libc::STDERR_FILENO);
        }
        if libc::dup2(ctx.pipe_fd, PIPE_FD) < 0 || libc::fcntl(PIPE_FD, libc::F_SETFD, 0) < 0 {
            libc::_exit(EXIT_SETUP_FAILED);
        }
        libc::execve(ctx.exe.as_ptr(), ctx.argv.as_ptr(), ctx.envp.as_ptr());
        libc::_exit(EXIT_EXEC_FAILED)
    }
}

fn c_string(value: Vec<u8>) -> CaskResult<CString> {
    CString::new(value).map_err(|e| CaskError::Config {
        message: format!("argument contains a NUL byte: {e}"),
    })
}

fn null_terminated(strings: &[CString]) -> Vec<*const libc::c_char> {
    strings
        .iter()
        .map(|s| s.as_ptr())
        .chain(std::iter::once(std::ptr::null()))
        .collect()
}

impl ContainerProcess {
    /// Prepare a launch and create the control pipe.
    ///
    /// # Errors
    ///
    /// Fails when the pipe cannot be created.
    pub fn new(options: LaunchOptions) -> CaskResult<(Self, PipeWriter)> {
        let (pipe_read, pipe_write) = rustix::pipe::pipe_with(rustix::pipe::PipeFlags::CLOEXEC)
            .map_err(|e| CaskError::io_context("create control pipe", e.into()))?;
        Ok((
            Self { options, pipe_read },
            PipeWriter {
                pipe_write: File::from(pipe_write),
            },
        ))
    }

    /// Environment of the child: ours plus the extra pairs.
    fn environment(&self) -> CaskResult<Vec<CString>> {
        std::env::vars_os()
            .map(|(key, value)| {
                let mut pair = key;
                pair.push("=");
                pair.push(value);
                pair
            })
            .chain(self.options.extra_env.iter().map(OsString::from))
            .map(|pair| c_string(pair.into_vec()))
            .collect()
    }

    /// Where detached output goes; failures are logged and ignored.
    fn open_log(&self) -> Option<File> {
        if self.options.interactive {
            return None;
        }
        if let Some(parent) = self.options.log_file.parent() {
            if let Err(e) = std::fs::create_dir_all(parent) {
                tracing::warn!(path = %parent.display(), error = %e, "Failed to create log directory");
                return None;
            }
        }
        match File::create(&self.options.log_file) {
            Ok(file) => Some(file),
            Err(e) => {
                tracing::warn!(
                    path = %self.options.log_file.display(),
                    error = %e,
                    "Failed to create container log, output is discarded"
                );
                None
            }
        }
    }

    /// Clone the child into new namespaces and exec `cask init` in it.
    ///
    /// # Errors
    ///
    /// Fails when the child cannot be created.
    pub fn start(self) -> CaskResult<ContainerChild> {
        let env = self.environment()?;
        let args = [c_string(b"/proc/self/exe".to_vec())?, c_string(b"init".to_vec())?];
        let log = self.open_log();
        let devnull = if self.options.interactive {
            None
        } else {
            OpenOptions::new().read(true).open("/dev/null").ok()
        };

        let ctx = ChildContext {
            cwd: c_string(self.options.root_dir.clone().into_os_string().into_vec())?,
            exe: args[0].clone(),
            argv: null_terminated(&args),
            envp: null_terminated(&env),
            pipe_fd: self.pipe_read.as_raw_fd(),
            stdin_fd: devnull.as_ref().map(AsRawFd::as_raw_fd),
            output_fd: log.as_ref().map(AsRawFd::as_raw_fd),
        };

        let mut stack = vec![0u8; STACK_SIZE];
        // SAFETY: the offset stays within the allocation; the stack grows
        // down from its 16-byte aligned top.
        let stack_top = unsafe {
            let top = stack.as_mut_ptr().add(STACK_SIZE);
            top.sub(top as usize % 16)
        };

        // SAFETY: without CLONE_VM the child works on a copy of this address
        // space, so `ctx` and the stack stay valid for it until execve.
        let pid = unsafe {
            libc::clone(
                child_main,
                stack_top.cast(),
                CLONE_FLAGS | libc::SIGCHLD,
                std::ptr::addr_of!(ctx).cast_mut().cast(),
            )
        };
        if pid < 0 {
            return Err(CaskError::io_context(
                "clone container process",
                std::io::Error::last_os_error(),
            ));
        }

        tracing::info!(
            container = %self.options.container_name,
            pid,
            interactive = self.options.interactive,
            "Container process started"
        );
        Ok(ContainerChild { pid })
    }
}

/// A started container init process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerChild {
    pid: libc::pid_t,
}

impl ContainerChild {
    /// Host pid.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.pid.unsigned_abs()
    }

    /// Wait for the process to exit and return its exit code.
    ///
    /// # Errors
    ///
    /// Fails when `waitpid` fails.
    pub async fn wait(&self) -> CaskResult<i32> {
        let pid = self.pid;
        tokio::task::spawn_blocking(move || wait_pid(pid))
            .await
            .map_err(|e| CaskError::Internal {
                message: format!("Task join error: {e}"),
            })?
    }

    /// Deliver `signal` to the process.
    ///
    /// # Errors
    ///
    /// Fails when the signal cannot be delivered.
    pub fn signal(&self, signal: libc::c_int) -> CaskResult<()> {
        send_signal(self.pid, signal)
    }
}

/// Block until `pid` exits; signals map to `128 + signo`.
pub(crate) fn wait_pid(pid: libc::pid_t) -> CaskResult<i32> {
    let mut status: libc::c_int = 0;
    loop {
        // SAFETY: status points to a live local.
        let result = unsafe { libc::waitpid(pid, &raw mut status, 0) };
        if result == -1 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            if err.raw_os_error() == Some(libc::ECHILD) {
                return Ok(0);
            }
            return Err(CaskError::io_context(format!("waitpid {pid}"), err));
        }
        break;
    }

    if libc::WIFEXITED(status) {
        Ok(libc::WEXITSTATUS(status))
    } else if libc::WIFSIGNALED(status) {
        Ok(128 + libc::WTERMSIG(status))
    } else {
        Ok(1)
    }
}

/// Send `signal` to `pid`.
///
/// # Errors
///
/// Fails when `kill(2)` fails, e.g. the process is gone.
pub fn send_signal(pid: libc::pid_t, signal: libc::c_int) -> CaskResult<()> {
    tracing::debug!(pid, signal, "Sending signal");
    // SAFETY: kill has no memory safety preconditions.
    if unsafe { libc::kill(pid, signal) } != 0 {
        return Err(CaskError::io_context(
            format!("send signal {signal} to {pid}"),
            std::io::Error::last_os_error(),
        ));
    }
    Ok(())
}
