//! Container runtime core: configuration, record persistence and the
//! lifecycle orchestrator.

mod config;
mod orchestrator;
mod state;

pub use config::RuntimeConfig;
pub use orchestrator::{RunOptions, Runtime, format_container_table};
pub use state::RecordStore;
