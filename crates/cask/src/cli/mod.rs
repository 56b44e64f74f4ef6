//! CLI command definitions and handlers.

use std::io::{BufRead, Write};
use std::path::PathBuf;

use cask_common::ResourceConfig;
use cask_common::paths::{CASK_ROOT, CASK_RUNTIME_DIR};
use cask_network::{BRIDGE_DRIVER, NetworkManager, format_network_table};
use clap::{ArgGroup, Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};

use crate::runtime::{RunOptions, Runtime, RuntimeConfig, format_container_table};

/// Cask - Minimal Container Runtime
#[derive(Parser)]
#[command(name = "cask")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for images and container layers
    #[arg(long, global = true, env = "CASK_ROOT")]
    pub root: Option<PathBuf>,

    /// Directory for container records, logs and network state
    #[arg(long, global = true, env = "CASK_RUNTIME_DIR")]
    pub runtime_dir: Option<PathBuf>,

    /// Enable debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create and start a container
    #[command(group(ArgGroup::new("mode").required(true).args(["interactive", "detach"])))]
    Run {
        /// Keep stdin attached and remove the container on exit
        #[arg(short = 'i', long = "it")]
        interactive: bool,

        /// Accepted with -i so that `-it` works
        #[arg(short = 't', requires = "interactive", hide = true)]
        tty: bool,

        /// Run in the background
        #[arg(short, long)]
        detach: bool,

        /// Container name
        #[arg(long)]
        name: Option<String>,

        /// Memory limit, e.g. 100m
        #[arg(short, long)]
        memory: Option<String>,

        /// Relative cpu share
        #[arg(long)]
        cpushare: Option<String>,

        /// Cpus the container may use, e.g. 0-1
        #[arg(long)]
        cpuset: Option<String>,

        /// Bind mount, host:container
        #[arg(short, long)]
        volume: Option<String>,

        /// Environment variables, KEY=VALUE
        #[arg(short, long)]
        env: Vec<String>,

        /// Network to connect to
        #[arg(long)]
        net: Option<String>,

        /// Port mappings, host:container
        #[arg(short, long)]
        publish: Vec<String>,

        /// Image name
        image: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Container init process (internal, do not call directly)
    #[command(hide = true)]
    Init,

    /// List containers
    Ps,

    /// Print the output of a detached container
    Logs {
        /// Container name
        name: String,

        /// Follow log output
        #[arg(short, long)]
        follow: bool,
    },

    /// Execute a command in a running container
    Exec {
        /// Container name
        name: String,

        /// Command and arguments
        #[arg(trailing_var_arg = true, required = true)]
        command: Vec<String>,
    },

    /// Stop a running container
    Stop {
        /// Container name
        name: String,
    },

    /// Remove a stopped container
    Rm {
        /// Container name
        name: String,
    },

    /// Save a container's filesystem as an image archive
    Commit {
        /// Container name
        name: String,

        /// Image name
        image: String,
    },

    /// Manage networks
    #[command(subcommand)]
    Network(NetworkCommands),
}

/// `cask network` commands.
#[derive(Subcommand)]
pub enum NetworkCommands {
    /// Create a network
    Create {
        /// Network driver
        #[arg(long, default_value = BRIDGE_DRIVER)]
        driver: String,

        /// Subnet in CIDR notation
        #[arg(long)]
        subnet: String,

        /// Network name
        name: String,
    },

    /// List networks
    List,

    /// Remove a network
    Remove {
        /// Network name
        name: String,
    },
}

impl Cli {
    /// Runtime configuration from the global flags.
    #[must_use]
    pub fn runtime_config(&self) -> RuntimeConfig {
        let root = self.root.clone().unwrap_or_else(|| CASK_ROOT.clone());
        let runtime_dir = self
            .runtime_dir
            .clone()
            .unwrap_or_else(|| CASK_RUNTIME_DIR.clone());
        RuntimeConfig::default()
            .with_root(root)
            .with_runtime(runtime_dir)
    }

    /// Execute the CLI command and return the process exit code.
    ///
    /// # Errors
    ///
    /// Fails when the command fails.
    pub async fn execute(self) -> Result<i32> {
        let runtime = Runtime::new(self.runtime_config());

        match self.command {
            Commands::Run {
                interactive,
                tty: _,
                detach: _,
                name,
                memory,
                cpushare,
                cpuset,
                volume,
                env,
                net,
                publish,
                image,
                command,
            } => {
                let resources = ResourceConfig::new()
                    .with_memory_limit(memory.unwrap_or_default())
                    .with_cpu_share(cpushare.unwrap_or_default())
                    .with_cpu_set(cpuset.unwrap_or_default());
                let code = runtime
                    .run(RunOptions {
                        interactive,
                        name,
                        image,
                        command,
                        resources,
                        volume: volume.unwrap_or_default(),
                        env,
                        network: net,
                        port_mapping: publish,
                    })
                    .await
                    .map_err(|e| eyre!("Failed to run container: {e}"))?;
                Ok(code)
            }

            Commands::Init => match crate::exec::run_init_process() {
                Ok(never) => match never {},
                Err(e) => Err(eyre!("Container init failed: {e}")),
            },

            Commands::Ps => {
                let records = runtime
                    .list()
                    .map_err(|e| eyre!("Failed to list containers: {e}"))?;
                println!("{}", format_container_table(&records));
                Ok(0)
            }

            Commands::Logs { name, follow } => {
                let log_path = runtime.log_path(&name)?;
                if !log_path.exists() {
                    return Err(eyre!(
                        "Log file not found for container {name}. (Only detached containers have logs)"
                    ));
                }
                follow_log(&log_path, follow).await?;
                Ok(0)
            }

            Commands::Exec { name, command } => {
                let code = runtime
                    .exec(&name, &command)
                    .map_err(|e| eyre!("Failed to exec in container: {e}"))?;
                Ok(code)
            }

            Commands::Stop { name } => {
                runtime
                    .stop(&name)
                    .map_err(|e| eyre!("Failed to stop container: {e}"))?;
                println!("{name}");
                Ok(0)
            }

            Commands::Rm { name } => {
                runtime
                    .remove(&name)
                    .await
                    .map_err(|e| eyre!("Failed to remove container: {e}"))?;
                println!("{name}");
                Ok(0)
            }

            Commands::Commit { name, image } => {
                let archive = runtime
                    .commit(&name, &image)
                    .map_err(|e| eyre!("Failed to commit container: {e}"))?;
                println!("{}", archive.display());
                Ok(0)
            }

            Commands::Network(command) => {
                let mut manager = NetworkManager::init(&runtime.config().paths)
                    .map_err(|e| eyre!("Failed to initialize networking: {e}"))?;
                match command {
                    NetworkCommands::Create {
                        driver,
                        subnet,
                        name,
                    } => {
                        let network = manager
                            .create_network(&driver, &subnet, &name)
                            .await
                            .map_err(|e| eyre!("Failed to create network: {e}"))?;
                        println!("{}", network.name);
                    }
                    NetworkCommands::List => {
                        println!("{}", format_network_table(manager.networks()));
                    }
                    NetworkCommands::Remove { name } => {
                        manager
                            .delete_network(&name)
                            .await
                            .map_err(|e| eyre!("Failed to remove network: {e}"))?;
                        println!("{name}");
                    }
                }
                Ok(0)
            }
        }
    }
}

/// Copy a log file to stdout, polling for new lines when following.
async fn follow_log(path: &std::path::Path, follow: bool) -> Result<()> {
    let file = std::fs::File::open(path)?;
    let mut reader = std::io::BufReader::new(file);
    let mut stdout = std::io::stdout();
    let mut line = String::new();

    loop {
        line.clear();
        match reader.read_line(&mut line) {
            Ok(0) => {
                if !follow {
                    break;
                }
                stdout.flush()?;
                tokio::time::sleep(std::time::Duration::from_millis(100)).await;
            }
            Ok(_) => stdout.write_all(line.as_bytes())?,
            Err(e) => return Err(eyre!("Failed to read log: {e}")),
        }
    }
    stdout.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn verify_cli() {
        Cli::command().debug_assert();
    }

    #[test]
    fn parse_run() {
        let cli = Cli::try_parse_from([
            "cask", "run", "-d", "--name", "web", "-m", "100m", "--cpuset", "0", "-v",
            "/data:/data", "-e", "A=1", "--net", "testbr", "-p", "8080:80", "busybox", "top",
            "-b",
        ])
        .unwrap();

        let Commands::Run {
            interactive,
            detach,
            name,
            memory,
            cpuset,
            volume,
            env,
            net,
            publish,
            image,
            command,
            ..
        } = cli.command
        else {
            panic!("expected run");
        };
        assert!(!interactive);
        assert!(detach);
        assert_eq!(name.as_deref(), Some("web"));
        assert_eq!(memory.as_deref(), Some("100m"));
        assert_eq!(cpuset.as_deref(), Some("0"));
        assert_eq!(volume.as_deref(), Some("/data:/data"));
        assert_eq!(env, vec!["A=1"]);
        assert_eq!(net.as_deref(), Some("testbr"));
        assert_eq!(publish, vec!["8080:80"]);
        assert_eq!(image, "busybox");
        assert_eq!(command, vec!["top", "-b"]);
    }

    #[test]
    fn run_requires_exactly_one_mode() {
        assert!(Cli::try_parse_from(["cask", "run", "busybox", "sh"]).is_err());
        assert!(Cli::try_parse_from(["cask", "run", "--it", "-d", "busybox", "sh"]).is_err());
        assert!(Cli::try_parse_from(["cask", "run", "--it", "busybox", "sh"]).is_ok());
        assert!(Cli::try_parse_from(["cask", "run", "-it", "busybox", "sh"]).is_ok());
        assert!(Cli::try_parse_from(["cask", "run", "-t", "busybox", "sh"]).is_err());
    }

    #[test]
    fn parse_network_create() {
        let cli = Cli::try_parse_from([
            "cask", "network", "create", "--subnet", "192.168.10.0/24", "testbr",
        ])
        .unwrap();
        let Commands::Network(NetworkCommands::Create {
            driver,
            subnet,
            name,
        }) = cli.command
        else {
            panic!("expected network create");
        };
        assert_eq!(driver, BRIDGE_DRIVER);
        assert_eq!(subnet, "192.168.10.0/24");
        assert_eq!(name, "testbr");
    }

    #[test]
    fn global_paths() {
        let cli = Cli::try_parse_from([
            "cask",
            "--root",
            "/tmp/cask",
            "--runtime-dir",
            "/tmp/cask-run",
            "ps",
        ])
        .unwrap();
        let config = cli.runtime_config();
        assert_eq!(config.paths.root, PathBuf::from("/tmp/cask"));
        assert_eq!(config.paths.runtime, PathBuf::from("/tmp/cask-run"));
    }
}
