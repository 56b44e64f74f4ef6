//! Process execution: launching containers, the in-container init and
//! `exec` into running containers.

pub mod enter;
pub mod init;
pub mod process;

pub use enter::{exec_in_container, parse_environ, process_environ};
pub use init::{parse_command, run_init_process};
pub use process::{
    ContainerChild, ContainerProcess, LaunchOptions, PIPE_FD, PipeWriter, send_signal,
};
