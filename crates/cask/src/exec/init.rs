//! Container init: the first process inside the namespaces.
//!
//! Runs as `cask init`. Reads the command from the control pipe, moves the
//! root filesystem to the merged overlay and replaces itself with the
//! command.

#![allow(unsafe_code)]

use std::convert::Infallible;
use std::fs::File;
use std::io::Read;
use std::os::fd::FromRawFd;
use std::os::unix::process::CommandExt;
use std::path::Path;
use std::process::Command;

use cask_common::{CaskError, CaskResult};

use super::process::PIPE_FD;
use crate::filesystem::{self, MountOptions};

/// Where the old root is parked during `pivot_root`.
const PUT_OLD: &str = ".pivot_root";

/// Split the command received over the pipe.
///
/// # Errors
///
/// Fails when the command is empty.
pub fn parse_command(raw: &str) -> CaskResult<Vec<String>> {
    let argv: Vec<String> = raw.split_whitespace().map(str::to_string).collect();
    if argv.is_empty() {
        return Err(CaskError::Config {
            message: "container init received an empty command".to_string(),
        });
    }
    Ok(argv)
}

/// Read the whole command; blocks until the parent closes the pipe.
fn read_command() -> CaskResult<Vec<String>> {
    // SAFETY: the launcher installs the read end of the control pipe as fd 3
    // and nothing else in this process owns it.
    let mut pipe = unsafe { File::from_raw_fd(PIPE_FD) };
    let mut raw = String::new();
    pipe.read_to_string(&mut raw)
        .map_err(|e| CaskError::io_context("read command from control pipe", e))?;
    parse_command(&raw)
}

/// Run the container init. Only returns on failure.
///
/// # Errors
///
/// Fails when the command is empty, the mount setup fails or the command
/// cannot be resolved or executed.
pub fn run_init_process() -> CaskResult<Infallible> {
    let argv = read_command()?;
    tracing::debug!(command = ?argv, "Container init received command");

    setup_mount()?;

    let program = which::which(&argv[0]).map_err(|e| CaskError::Config {
        message: format!("cannot resolve {}: {e}", argv[0]),
    })?;
    tracing::debug!(program = %program.display(), "Executing container command");

    let err = Command::new(&program)
        .arg0(&argv[0])
        .args(&argv[1..])
        .exec();
    Err(CaskError::io_context(format!("exec {}", program.display()), err))
}

/// Switch to the merged root (the working directory) and mount `/proc`
/// and `/dev`.
fn setup_mount() -> CaskResult<()> {
    let root = std::env::current_dir()?;
    tracing::debug!(root = %root.display(), "Setting up container root");

    filesystem::make_private(Path::new("/"))?;
    pivot_into(&root)?;

    std::fs::create_dir_all("/proc")?;
    filesystem::mount("proc", Path::new("/proc"), "proc", &MountOptions::proc(), None)?;

    std::fs::create_dir_all("/dev")?;
    filesystem::mount(
        "tmpfs",
        Path::new("/dev"),
        "tmpfs",
        &MountOptions::dev(),
        Some("mode=755"),
    )?;
    Ok(())
}

/// Make `root` the new `/` and drop the old root.
fn pivot_into(root: &Path) -> CaskResult<()> {
    // pivot_root needs the new root to be a mount point
    filesystem::bind_mount(root, root, true)?;

    let put_old = root.join(PUT_OLD);
    std::fs::create_dir_all(&put_old)?;
    filesystem::pivot_root(root, &put_old)?;

    std::env::set_current_dir("/")?;

    let put_old = Path::new("/").join(PUT_OLD);
    filesystem::unmount(&put_old, true)?;
    std::fs::remove_dir(&put_old)
        .map_err(|e| CaskError::io_context(format!("remove {}", put_old.display()), e))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("top -b\n").unwrap(), vec!["top", "-b"]);
        assert_eq!(parse_command("  sh   -c  ls ").unwrap(), vec!["sh", "-c", "ls"]);
    }

    #[test]
    fn test_empty_command_is_an_error() {
        assert!(parse_command("").is_err());
        assert!(parse_command(" \n\t").is_err());
    }
}
