//! # Cask Container Runtime
//!
//! A minimal Linux container runtime:
//!
//! - **Isolation**: UTS, PID, mount, network and IPC namespaces with a
//!   `pivot_root` into an overlay workspace
//! - **Cgroup v1**: cpu, cpuset and memory limits
//! - **Networking**: bridge networks with port publishing, via `cask-network`
//!
//! ## Usage
//!
//! ```no_run
//! use cask::runtime::{RunOptions, Runtime, RuntimeConfig};
//!
//! # async fn example() -> cask_common::CaskResult<()> {
//! let runtime = Runtime::new(RuntimeConfig::default());
//! let code = runtime
//!     .run(RunOptions {
//!         interactive: true,
//!         image: "busybox".to_string(),
//!         command: vec!["sh".to_string()],
//!         ..RunOptions::default()
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod cgroup;
pub mod cli;
pub mod exec;
pub mod filesystem;
pub mod runtime;

pub use runtime::Runtime;
