//! Container lifecycle: run, stop, rm and the commands that read records.
//!
//! Each invocation rebuilds what it needs from the persisted record. Once
//! the child exists, failures in later phases (cgroups, network) are
//! logged and the launch goes on; only a failed clone aborts a run.

use std::path::PathBuf;

use cask_common::{
    CaskError, CaskResult, ContainerId, ContainerRecord, ContainerStatus, ResourceConfig,
    validate_name,
};
use cask_network::NetworkManager;
use tabled::settings::Style;
use tabled::{Table, Tabled};
use tokio::signal::unix::{SignalKind, signal};

use super::config::RuntimeConfig;
use super::state::RecordStore;
use crate::cgroup::CgroupManager;
use crate::exec::{
    ContainerChild, ContainerProcess, LaunchOptions, exec_in_container, process_environ,
    send_signal,
};
use crate::filesystem::{self, Workspace};

/// Everything `cask run` needs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Attach the caller's terminal and clean up on exit.
    pub interactive: bool,
    /// Container name; the generated id when absent.
    pub name: Option<String>,
    /// Image whose archive provides the read-only layer.
    pub image: String,
    /// Command and arguments.
    pub command: Vec<String>,
    /// Resource limits.
    pub resources: ResourceConfig,
    /// `host:container` volume, empty for none.
    pub volume: String,
    /// Extra `KEY=VALUE` environment.
    pub env: Vec<String>,
    /// Network to connect to.
    pub network: Option<String>,
    /// `host:container` TCP port mappings.
    pub port_mapping: Vec<String>,
}

/// Sequences workspace, launcher, cgroups and network into container
/// operations.
#[derive(Debug, Clone)]
pub struct Runtime {
    config: RuntimeConfig,
    store: RecordStore,
}

impl Runtime {
    /// Create a runtime over `config`.
    #[must_use]
    pub fn new(config: RuntimeConfig) -> Self {
        let store = RecordStore::new(config.paths.clone());
        Self { config, store }
    }

    /// The configuration in use.
    #[must_use]
    pub const fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    /// The record store.
    #[must_use]
    pub const fn store(&self) -> &RecordStore {
        &self.store
    }

    fn cgroup(&self, id: &ContainerId) -> CgroupManager {
        CgroupManager::with_hierarchy(
            CgroupManager::container_path(id.as_str()),
            self.config.hierarchy.clone(),
        )
    }

    /// Run a container. Interactive runs return the exit code of the
    /// command after tearing the container down; detached runs return 0
    /// as soon as the command was handed over.
    ///
    /// # Errors
    ///
    /// Fails on an empty command, an unusable or taken name, a missing
    /// image, or when the child cannot be created.
    pub async fn run(&self, options: RunOptions) -> CaskResult<i32> {
        if options.command.is_empty() {
            return Err(CaskError::Config {
                message: "missing container command".to_string(),
            });
        }

        let id = ContainerId::generate();
        let name = options.name.clone().unwrap_or_else(|| id.to_string());
        validate_name(&name)?;
        if let Ok(existing) = self.store.load(&name) {
            return Err(CaskError::InvalidState {
                name,
                status: existing.status.to_string(),
                operation: "run".to_string(),
            });
        }

        let paths = &self.config.paths;
        let workspace = Workspace::new(paths, &name, &options.image, &options.volume);
        if let Err(e) = workspace.create() {
            workspace.delete();
            return Err(e);
        }

        let launch = ContainerProcess::new(LaunchOptions {
            interactive: options.interactive,
            container_name: name.clone(),
            root_dir: workspace.mount_point(),
            log_file: paths.container_log(&name),
            extra_env: options.env.clone(),
        });
        let (process, writer) = match launch {
            Ok(launch) => launch,
            Err(e) => {
                workspace.delete();
                return Err(e);
            }
        };
        let child = match process.start() {
            Ok(child) => child,
            Err(e) => {
                workspace.delete();
                return Err(e);
            }
        };

        let mut record = ContainerRecord::new(child.pid(), id.clone(), &name, &options.command)
            .with_volume(&options.volume)
            .with_port_mapping(options.port_mapping.clone());
        self.save_logged(&record);

        let cgroup = self.cgroup(&id);
        if let Err(e) = cgroup.set(&options.resources) {
            tracing::error!(container = %name, error = %e, "Failed to set resource limits");
        }
        if let Err(e) = cgroup.apply(child.pid()) {
            tracing::error!(container = %name, error = %e, "Failed to add container to cgroups");
        }

        let mut networks = None;
        if let Some(network) = &options.network {
            match NetworkManager::init(paths) {
                Ok(mut manager) => {
                    if let Err(e) = manager.connect(network, &mut record).await {
                        tracing::error!(container = %name, %network, error = %e, "Failed to connect container");
                    }
                    self.save_logged(&record);
                    networks = Some(manager);
                }
                Err(e) => {
                    tracing::error!(container = %name, error = %e, "Failed to initialize networking");
                }
            }
        }

        if let Err(e) = writer.send_command(&options.command) {
            tracing::error!(container = %name, error = %e, "Failed to send command to container");
        }

        if !options.interactive {
            tracing::info!(container = %name, id = %id, pid = child.pid(), "Container running in background");
            return Ok(0);
        }

        let code = wait_forwarding_signals(child).await?;
        tracing::info!(container = %name, code, "Container exited");

        if let Some(mut manager) = networks {
            if let Err(e) = manager.disconnect(&record).await {
                tracing::warn!(container = %name, error = %e, "Failed to disconnect container");
            }
        }
        cgroup.destroy();
        workspace.delete();
        if let Err(e) = self.store.delete(&name) {
            tracing::warn!(container = %name, error = %e, "Failed to delete container record");
        }
        Ok(code)
    }

    fn save_logged(&self, record: &ContainerRecord) {
        if let Err(e) = self.store.save(record) {
            tracing::error!(container = %record.name, error = %e, "Failed to record container");
        }
    }

    /// Send SIGTERM to a running container and mark it stopped.
    ///
    /// # Errors
    ///
    /// Fails when the container is unknown, not running, or cannot be
    /// signalled.
    pub fn stop(&self, name: &str) -> CaskResult<()> {
        let mut record = self.store.load(name)?;
        if record.status != ContainerStatus::Running {
            return Err(CaskError::InvalidState {
                name: name.to_string(),
                status: record.status.to_string(),
                operation: "stop".to_string(),
            });
        }

        send_signal(record.pid()?, libc::SIGTERM)?;
        record.mark_stopped();
        self.store.save(&record)?;

        tracing::info!(container = %name, "Container stopped");
        Ok(())
    }

    /// Remove a container that is no longer running: network, cgroups,
    /// workspace, then the record.
    ///
    /// # Errors
    ///
    /// Fails when the container is unknown or still running. Teardown
    /// failures are logged.
    pub async fn remove(&self, name: &str) -> CaskResult<()> {
        let record = self.store.load(name)?;
        if !record.status.can_remove() {
            return Err(CaskError::InvalidState {
                name: name.to_string(),
                status: record.status.to_string(),
                operation: "remove".to_string(),
            });
        }

        if record.network.is_some() {
            match NetworkManager::init(&self.config.paths) {
                Ok(mut manager) => {
                    if let Err(e) = manager.disconnect(&record).await {
                        tracing::warn!(container = %name, error = %e, "Failed to disconnect container");
                    }
                }
                Err(e) => {
                    tracing::warn!(container = %name, error = %e, "Failed to initialize networking");
                }
            }
        }

        self.cgroup(&record.id).destroy();
        Workspace::new(&self.config.paths, name, "", &record.volume).delete();
        self.store.delete(name)?;

        tracing::info!(container = %name, "Container removed");
        Ok(())
    }

    /// Every known container.
    ///
    /// # Errors
    ///
    /// Fails when the record directory cannot be listed.
    pub fn list(&self) -> CaskResult<Vec<ContainerRecord>> {
        self.store.list()
    }

    /// Log file of a container.
    ///
    /// # Errors
    ///
    /// Fails when the container is unknown.
    pub fn log_path(&self, name: &str) -> CaskResult<PathBuf> {
        self.store.load(name)?;
        Ok(self.config.paths.container_log(name))
    }

    /// Run `argv` inside a running container with its environment.
    ///
    /// # Errors
    ///
    /// Fails when the container is unknown or not running, or the command
    /// cannot be started.
    pub fn exec(&self, name: &str, argv: &[String]) -> CaskResult<i32> {
        let record = self.store.load(name)?;
        if record.status != ContainerStatus::Running {
            return Err(CaskError::InvalidState {
                name: name.to_string(),
                status: record.status.to_string(),
                operation: "exec".to_string(),
            });
        }
        let pid = record.pid()?;
        let env = process_environ(pid)?;
        exec_in_container(pid, argv, &env)
    }

    /// Pack the merged root of a container into `<root>/<image>.tar`.
    ///
    /// # Errors
    ///
    /// Fails when the container has no workspace or packing fails.
    pub fn commit(&self, name: &str, image: &str) -> CaskResult<PathBuf> {
        filesystem::commit(&self.config.paths, name, image)
    }
}

/// Wait for the child, passing SIGINT and SIGTERM on so the caller
/// survives them and can clean up.
async fn wait_forwarding_signals(child: ContainerChild) -> CaskResult<i32> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;

    let exit = child.wait();
    tokio::pin!(exit);

    loop {
        tokio::select! {
            code = &mut exit => return code,
            _ = interrupt.recv() => forward(child, libc::SIGINT),
            _ = terminate.recv() => forward(child, libc::SIGTERM),
        }
    }
}

fn forward(child: ContainerChild, signal: libc::c_int) {
    if let Err(e) = child.signal(signal) {
        tracing::warn!(pid = child.pid(), signal, error = %e, "Failed to forward signal");
    }
}

#[derive(Tabled)]
struct ContainerRow {
    #[tabled(rename = "ID")]
    id: String,
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "PID")]
    pid: String,
    #[tabled(rename = "STATUS")]
    status: String,
    #[tabled(rename = "COMMAND")]
    command: String,
    #[tabled(rename = "CREATED")]
    created: String,
}

/// Render records as the `ps` table.
pub fn format_container_table<'a>(records: impl IntoIterator<Item = &'a ContainerRecord>) -> String {
    let rows: Vec<ContainerRow> = records
        .into_iter()
        .map(|r| ContainerRow {
            id: r.id.to_string(),
            name: r.name.clone(),
            pid: r.pid.clone(),
            status: r.status.to_string(),
            command: r.command.clone(),
            created: r.create_time.clone(),
        })
        .collect();
    Table::new(rows).with(Style::blank()).to_string()
}
