//! Container lifecycle management.
//!
//! [`Runtime`] drives containers through create, start, kill and delete.
//! Nothing about a container is cached between calls: every operation
//! loads the record from the runtime directory and observes the status.

use std::ffi::OsString;
use std::fmt;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use tokio::time::Instant;

use kennel_common::paths::{EXEC_HOOK, EXEC_INIT, EXEC_START};
use kennel_common::{ContainerId, KennelError, KennelResult};
use kennel_oci::{ContainerState, ContainerStatus};

use super::config::{RuntimeConfig, Timeouts};
use super::container::{Container, ContainerConfig, Observation};
use super::state::StateManager;
use super::validate::validate;
use crate::cgroup::{CgroupManager, cgroup_dir};
use crate::compiler::{self, CompiledConfig};
use crate::exec::{ConsoleMode, capture_env, hooks, monitor};
use crate::security::{self, HostCapabilities, apparmor};

/// Callback run in the background after a container was created.
pub type AfterCreateHook = Arc<dyn Fn(Container) -> BoxFuture<'static, ()> + Send + Sync>;

/// Callbacks for embedding the runtime.
#[derive(Clone, Default)]
pub struct RuntimeHooks {
    /// Spawned on the tokio runtime once a container is created.
    pub after_create: Option<AfterCreateHook>,
}

impl fmt::Debug for RuntimeHooks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeHooks")
            .field("after_create", &self.after_create.is_some())
            .finish()
    }
}

/// The container runtime.
#[derive(Debug)]
pub struct Runtime {
    config: RuntimeConfig,
    cgroups: CgroupManager,
    state: StateManager,
    env: Vec<(String, OsString)>,
    hooks: RuntimeHooks,
}

impl Runtime {
    /// Create a runtime.
    ///
    /// Host capabilities and AppArmor support are probed once, and features
    /// the host can't provide are switched off.
    ///
    /// # Errors
    ///
    /// Returns an error if the process capabilities can't be read.
    pub fn new(mut config: RuntimeConfig) -> KennelResult<Self> {
        let host = HostCapabilities::probe()?;
        security::restrict_to_host(&mut config.features, &host, apparmor::is_enabled());

        let cgroups = match &config.cgroup_root {
            Some(root) => CgroupManager::with_root(root),
            None => CgroupManager::detect(),
        };
        tracing::debug!(
            root = %config.paths.root.display(),
            cgroup_root = %cgroups.root().display(),
            features = ?config.features,
            "Initialized runtime"
        );

        Ok(Self {
            state: StateManager::new(&config.paths.root),
            env: capture_env(),
            hooks: RuntimeHooks::default(),
            cgroups,
            config,
        })
    }

    /// Install callbacks.
    #[must_use]
    pub fn with_hooks(mut self, hooks: RuntimeHooks) -> Self {
        self.hooks = hooks;
        self
    }

    /// Check that the helper executables are installed and `/proc` is
    /// mounted.
    ///
    /// # Errors
    ///
    /// Returns a configuration error naming the first problem found.
    pub fn check_system(&self) -> KennelResult<()> {
        for name in [EXEC_START, EXEC_INIT, EXEC_HOOK] {
            let path = self.config.paths.libexec(name);
            check_executable(&path)?;
        }

        let proc = rustix::fs::statfs("/proc")
            .map_err(|e| KennelError::config(format!("failed to stat /proc: {e}")))?;
        if proc.f_type != rustix::fs::PROC_SUPER_MAGIC {
            return Err(KennelError::config("/proc is not a procfs mount"));
        }
        Ok(())
    }

    /// Create a container and wait until its init process is ready to be
    /// started.
    ///
    /// A failure after the runtime directory was created leaves it in place,
    /// [`Runtime::delete`] removes it.
    ///
    /// # Errors
    ///
    /// Returns a validation error before anything is created,
    /// [`KennelError::AlreadyExists`] for an existing container, and
    /// configuration, supervision or timeout errors after that.
    pub async fn create(&self, mut config: ContainerConfig) -> KennelResult<Container> {
        let deadline = Timeouts::deadline(self.config.timeouts.create);
        validate(&mut config)?;

        let cgroup = cgroup_dir(&config.id, &config.spec);
        let runtime_dir = self.state.create_dir(&config.id)?;
        let mut container = Container::new(config, runtime_dir, cgroup, self.config.container_log.clone());
        tracing::info!(
            container_id = %container.id,
            bundle = %container.bundle.display(),
            cgroup = %container.cgroup_dir,
            "Creating container"
        );

        let compiled = compiler::compile(&self.config, &self.cgroups, &container)?;
        self.supervise(&mut container, compiled, deadline).await?;

        if let Some(after_create) = &self.hooks.after_create {
            tokio::spawn(after_create(container.clone()));
        }
        Ok(container)
    }

    async fn supervise(
        &self,
        container: &mut Container,
        mut compiled: CompiledConfig,
        deadline: Instant,
    ) -> KennelResult<()> {
        if ConsoleMode::of(container) == ConsoleMode::Inherit {
            compiled.set("lxc.console.path", "none")?;
        }
        compiled.persist(&container.config_path())?;

        let pid = monitor::spawn(&self.config, container, &self.env, deadline).await?;
        container.pid = Some(pid);
        container.created_at = Some(Utc::now());
        self.state.save(container)?;

        let init_pid = container.wait_created(&self.cgroups, deadline).await?;
        tracing::info!(container_id = %container.id, pid = init_pid, "Container created");
        Ok(())
    }

    /// Load a container record.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::ContainerNotFound`] if the container does not
    /// exist, or an error if its record can't be read.
    pub fn load(&self, id: &str) -> KennelResult<Container> {
        let id = ContainerId::new(id)?;
        self.state.load(id.as_str())
    }

    /// Current OCI state of a container.
    ///
    /// # Errors
    ///
    /// Returns an error if the container can't be loaded or observed.
    pub fn state(&self, id: &str) -> KennelResult<ContainerState> {
        let container = self.load(id)?;
        let observation = container.observe(&self.cgroups)?;
        Ok(container.oci_state(&observation))
    }

    /// Start a created container and run its `poststart` hooks.
    ///
    /// Hook failures are logged and don't fail the start. The hooks share the
    /// start deadline with releasing init.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::InvalidState`] unless the container is
    /// created, or [`KennelError::Timeout`] if init can't be released in
    /// time.
    pub async fn start(&self, container: &Container) -> KennelResult<()> {
        let deadline = Timeouts::deadline(self.config.timeouts.start);
        let observation = container.observe(&self.cgroups)?;
        if !observation.status.can_start() {
            return Err(KennelError::InvalidState {
                id: container.id.to_string(),
                message: format!("expected created, but was {}", observation.status),
            });
        }

        container.release_init(deadline).await?;
        tracing::info!(container_id = %container.id, pid = ?observation.init_pid, "Container started");

        if let Some(spec_hooks) = &container.spec.hooks {
            let state = container.oci_state(&Observation {
                status: ContainerStatus::Running,
                init_pid: observation.init_pid,
            });
            // Failures are logged per hook.
            let _ = hooks::run_hooks("poststart", &spec_hooks.poststart, &state, deadline).await;
        }
        Ok(())
    }

    /// Send a signal to the container processes.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::InvalidState`] for a stopped container, or the
    /// first signalling error.
    pub fn kill(&self, container: &Container, signal: i32) -> KennelResult<()> {
        let observation = container.observe(&self.cgroups)?;
        if !observation.status.can_kill() {
            return Err(KennelError::InvalidState {
                id: container.id.to_string(),
                message: "container is stopped".to_string(),
            });
        }
        tracing::info!(container_id = %container.id, signal, "Killing container");
        container.kill(&self.cgroups, signal)
    }

    /// Delete a container.
    ///
    /// Unless forced, the container must be stopped. Teardown continues past
    /// failing steps; they are logged and only a failure to remove the
    /// runtime directory is returned.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::ContainerNotFound`] for an unknown container,
    /// [`KennelError::InvalidState`] for a live container without `force`,
    /// or the error removing the runtime directory.
    pub async fn delete(&self, id: &str, force: bool) -> KennelResult<()> {
        let id = ContainerId::new(id)?;
        if !self.state.exists(id.as_str()) {
            return Err(KennelError::ContainerNotFound { id: id.to_string() });
        }

        let container = match self.load(id.as_str()) {
            Ok(container) => container,
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Unreadable container record, removing runtime directory");
                return self.state.remove_dir(id.as_str());
            }
        };

        let status = match container.observe(&self.cgroups) {
            Ok(observation) => observation.status,
            Err(e) => {
                tracing::warn!(container_id = %id, error = %e, "Failed to observe container");
                ContainerStatus::Creating
            }
        };
        if !status.is_stopped() && !force {
            return Err(KennelError::InvalidState {
                id: id.to_string(),
                message: format!("expected stopped, but was {status}"),
            });
        }

        tracing::info!(container_id = %id, %status, force, "Deleting container");
        let deadline = Timeouts::deadline(self.config.timeouts.delete);
        let mut teardown = Teardown::new(&id);

        if !status.is_stopped() {
            teardown.step("kill", container.kill(&self.cgroups, libc::SIGKILL));
        }
        teardown.step("wait monitor exit", container.wait_monitor_exit(deadline).await);
        teardown.step(
            "wait cgroup drain",
            self.cgroups.wait_drained(&container.cgroup_dir, deadline).await,
        );
        teardown.step("remove cgroup", self.cgroups.delete(&container.cgroup_dir));
        if let Some(spec_hooks) = &container.spec.hooks {
            let state = container.oci_state(&Observation {
                status: ContainerStatus::Stopped,
                init_pid: None,
            });
            teardown.step(
                "poststop hooks",
                hooks::run_hooks("poststop", &spec_hooks.poststop, &state, deadline).await,
            );
        }
        teardown.finish(self.state.remove_dir(id.as_str()))
    }

    /// IDs of all containers, sorted.
    ///
    /// # Errors
    ///
    /// Returns an error if the runtime root can't be read.
    pub fn list(&self) -> KennelResult<Vec<String>> {
        self.state.list()
    }
}

fn check_executable(path: &Path) -> KennelResult<()> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| KennelError::config(format!("{}: {e}", path.display())))?;
    if !metadata.is_file() || metadata.permissions().mode() & 0o111 == 0 {
        return Err(KennelError::config(format!("{} is not executable", path.display())));
    }
    Ok(())
}

/// Failed steps of a delete.
struct Teardown<'a> {
    id: &'a ContainerId,
    failed: Vec<(&'static str, KennelError)>,
}

impl<'a> Teardown<'a> {
    const fn new(id: &'a ContainerId) -> Self {
        Self {
            id,
            failed: Vec::new(),
        }
    }

    fn step(&mut self, step: &'static str, result: KennelResult<()>) {
        if let Err(e) = result {
            tracing::warn!(container_id = %self.id, step, error = %e, "Teardown step failed");
            self.failed.push((step, e));
        }
    }

    fn finish(self, removal: KennelResult<()>) -> KennelResult<()> {
        if !self.failed.is_empty() {
            let steps: Vec<&str> = self.failed.iter().map(|(step, _)| *step).collect();
            tracing::warn!(container_id = %self.id, ?steps, "Container deleted with errors");
        }
        removal.inspect_err(|e| {
            tracing::error!(container_id = %self.id, step = "remove runtime directory", error = %e, "Teardown step failed");
        })?;
        tracing::info!(container_id = %self.id, "Container deleted");
        Ok(())
    }
}
