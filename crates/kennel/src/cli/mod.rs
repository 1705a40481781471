//! CLI command definitions and handlers.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::eyre::{Result, WrapErr};

use kennel_common::ContainerId;

use crate::exec::parse_signal;
use crate::runtime::{ContainerConfig, ContainerLogLevel, Runtime, RuntimeConfig};

/// Kennel - OCI runtime for an LXC-style backend
#[derive(Parser)]
#[command(name = "kennel")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Root directory for container runtime state
    #[arg(long, global = true, env = "KENNEL_ROOT")]
    pub root: Option<PathBuf>,

    /// Directory with the kennel-start, kennel-init and kennel-hook helpers
    #[arg(long, global = true, env = "KENNEL_LIBEXEC")]
    pub libexec: Option<PathBuf>,

    /// Runtime settings file (TOML). Defaults to `~/.config/kennel/kennel.toml`
    /// or `/etc/kennel/kennel.toml`, whichever exists first
    #[arg(long, global = true, env = "KENNEL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Log filter, e.g. `debug` or `kennel=trace`
    #[arg(long, global = true, env = "KENNEL_LOG_LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Write logs as JSON lines to this file instead of stderr
    #[arg(long, global = true, env = "KENNEL_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Backend log level for containers
    #[arg(long, global = true, value_enum)]
    pub container_log_level: Option<ContainerLogLevel>,

    /// Backend log file for containers
    #[arg(long, global = true)]
    pub container_log_file: Option<PathBuf>,

    /// The subcommand to execute.
    #[command(subcommand)]
    pub command: Commands,
}

/// Output format of `list`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ListFormat {
    /// Tab separated table.
    Table,
    /// JSON array of container states.
    Json,
}

/// Container commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Create a container
    Create {
        /// Container ID
        container_id: String,

        /// Path to the OCI bundle
        #[arg(short, long, default_value = ".")]
        bundle: PathBuf,

        /// Unix socket that receives the terminal master
        #[arg(long)]
        console_socket: Option<PathBuf>,

        /// File to write the container process ID to
        #[arg(long)]
        pid_file: Option<PathBuf>,
    },

    /// Start a created container
    Start {
        /// Container ID
        container_id: String,
    },

    /// Query container state
    State {
        /// Container ID
        container_id: String,
    },

    /// Send a signal to the container processes
    Kill {
        /// Container ID
        container_id: String,

        /// Signal name or number
        #[arg(default_value = "SIGTERM")]
        signal: String,
    },

    /// Delete a container
    Delete {
        /// Container ID
        container_id: String,

        /// Kill and delete a container that is not stopped
        #[arg(short, long)]
        force: bool,
    },

    /// List containers
    List {
        /// Output format
        #[arg(short, long, value_enum, default_value = "table")]
        format: ListFormat,

        /// Only display container IDs
        #[arg(short, long)]
        quiet: bool,
    },
}

impl Cli {
    /// Runtime settings: defaults, then the settings file, then flags.
    ///
    /// # Errors
    ///
    /// Returns an error if the settings file can't be loaded.
    pub fn runtime_config(&self) -> Result<RuntimeConfig> {
        let file = self.config.clone().or_else(RuntimeConfig::default_file);
        let mut config = match &file {
            Some(path) => RuntimeConfig::from_file(path)?,
            None => RuntimeConfig::default(),
        };
        if let Some(root) = &self.root {
            config = config.with_root(root);
        }
        if let Some(libexec) = &self.libexec {
            config = config.with_libexec(libexec);
        }
        if let Some(level) = self.container_log_level {
            config.container_log.level = level;
        }
        if let Some(file) = &self.container_log_file {
            config.container_log.file = Some(file.clone());
        }
        Ok(config)
    }

    /// Execute the CLI command.
    ///
    /// # Errors
    ///
    /// Returns the failing operation's error.
    pub async fn execute(self) -> Result<()> {
        let runtime = Runtime::new(self.runtime_config()?)?;

        match self.command {
            Commands::Create {
                container_id,
                bundle,
                console_socket,
                pid_file,
            } => {
                let id = ContainerId::new(&container_id)?;
                let bundle = std::fs::canonicalize(&bundle)
                    .wrap_err_with(|| format!("bundle {} not found", bundle.display()))?;
                let mut config = ContainerConfig::from_bundle(id, bundle)?;
                if let Some(socket) = console_socket {
                    config = config.with_console_socket(socket);
                }
                runtime.check_system()?;

                runtime
                    .create(config)
                    .await
                    .wrap_err_with(|| format!("failed to create container {container_id}"))?;

                if let Some(pid_file) = pid_file {
                    let state = runtime.state(&container_id)?;
                    let pid = state.pid.map(|p| p.to_string()).unwrap_or_default();
                    std::fs::write(&pid_file, pid)
                        .wrap_err_with(|| format!("failed to write {}", pid_file.display()))?;
                }
                Ok(())
            }

            Commands::Start { container_id } => {
                let container = runtime.load(&container_id)?;
                runtime
                    .start(&container)
                    .await
                    .wrap_err_with(|| format!("failed to start container {container_id}"))?;
                Ok(())
            }

            Commands::State { container_id } => {
                let state = runtime.state(&container_id)?;
                println!("{}", serde_json::to_string_pretty(&state)?);
                Ok(())
            }

            Commands::Kill {
                container_id,
                signal,
            } => {
                let signal = parse_signal(&signal)?;
                let container = runtime.load(&container_id)?;
                runtime
                    .kill(&container, signal)
                    .wrap_err_with(|| format!("failed to kill container {container_id}"))?;
                Ok(())
            }

            Commands::Delete {
                container_id,
                force,
            } => {
                runtime
                    .delete(&container_id, force)
                    .await
                    .wrap_err_with(|| format!("failed to delete container {container_id}"))?;
                Ok(())
            }

            Commands::List { format, quiet } => {
                let ids = runtime.list()?;
                if quiet {
                    for id in ids {
                        println!("{id}");
                    }
                    return Ok(());
                }

                let mut states = Vec::with_capacity(ids.len());
                for id in &ids {
                    match runtime.state(id) {
                        Ok(state) => states.push(state),
                        Err(e) => tracing::warn!(container_id = %id, error = %e, "Skipping container"),
                    }
                }

                match format {
                    ListFormat::Json => println!("{}", serde_json::to_string_pretty(&states)?),
                    ListFormat::Table => {
                        println!("ID\tPID\tSTATUS\tBUNDLE");
                        for state in states {
                            println!(
                                "{}\t{}\t{}\t{}",
                                state.id,
                                state.pid.unwrap_or(0),
                                state.status,
                                state.bundle.display()
                            );
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_settings_file() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("kennel.toml");
        std::fs::write(
            &file,
            "[paths]\nroot = \"/srv/kennel\"\nlibexec = \"/opt/kennel\"\n\n[container_log]\nlevel = \"error\"\n",
        )
        .unwrap();

        let cli = Cli::parse_from([
            "kennel",
            "--config",
            file.to_str().unwrap(),
            "--root",
            "/run/other",
            "--container-log-level",
            "debug",
            "list",
        ]);
        let config = cli.runtime_config().unwrap();
        assert_eq!(config.paths.root, PathBuf::from("/run/other"));
        assert_eq!(config.paths.libexec, PathBuf::from("/opt/kennel"));
        assert_eq!(config.container_log.level, ContainerLogLevel::Debug);
    }

    #[test]
    fn parse_commands() {
        let cli = Cli::parse_from(["kennel", "kill", "c1", "KILL"]);
        assert!(matches!(
            cli.command,
            Commands::Kill { ref container_id, ref signal } if container_id == "c1" && signal == "KILL"
        ));

        let cli = Cli::parse_from(["kennel", "list", "--format", "json"]);
        assert!(matches!(
            cli.command,
            Commands::List { format: ListFormat::Json, quiet: false }
        ));
    }
}
