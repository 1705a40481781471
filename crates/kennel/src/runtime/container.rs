//! Container record and observed state.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::time::Instant;

use kennel_common::paths::files;
use kennel_common::{ContainerId, KennelError, KennelResult};
use kennel_oci::{ContainerState, ContainerStatus, Spec};

use super::config::ContainerLog;
use crate::cgroup::{CgroupManager, POLL_INTERVAL};
use crate::exec::process;
use crate::filesystem::rootfs::INIT_CMD;

/// What the caller asks to create.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    /// Container ID.
    pub id: ContainerId,
    /// Bundle `config.json`.
    pub spec: Spec,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Unix socket that receives the terminal master.
    pub console_socket: Option<PathBuf>,
}

impl ContainerConfig {
    /// Read `config.json` from a bundle.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the bundle has no readable `config.json`.
    pub fn from_bundle(id: ContainerId, bundle: impl Into<PathBuf>) -> KennelResult<Self> {
        let bundle = bundle.into();
        let spec = Spec::from_bundle(&bundle)?;
        Ok(Self {
            id,
            spec,
            bundle,
            console_socket: None,
        })
    }

    /// Hand the terminal to a console socket.
    #[must_use]
    pub fn with_console_socket(mut self, socket: impl Into<PathBuf>) -> Self {
        self.console_socket = Some(socket.into());
        self
    }
}

/// A container as recorded in its runtime directory.
///
/// The record never stores a status. Status is observed from the monitor
/// and the container cgroup on every query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Container {
    /// Container ID.
    pub id: ContainerId,
    /// Bundle directory.
    pub bundle: PathBuf,
    /// Validated bundle config.
    pub spec: Spec,
    /// Runtime directory holding the compiled config and side files.
    pub runtime_dir: PathBuf,
    /// Container cgroup, relative to the cgroup root.
    pub cgroup_dir: String,
    /// Unix socket that receives the terminal master.
    pub console_socket: Option<PathBuf>,
    /// When the monitor was started.
    pub created_at: Option<DateTime<Utc>>,
    /// Monitor pid.
    pub pid: Option<i32>,
    /// Backend log settings the config was compiled with.
    #[serde(default)]
    pub log: ContainerLog,
}

/// Status of a container at one point in time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Observation {
    /// Observed status.
    pub status: ContainerStatus,
    /// The init process while created, the first workload process while
    /// running.
    pub init_pid: Option<i32>,
}

impl Observation {
    const fn new(status: ContainerStatus, init_pid: Option<i32>) -> Self {
        Self { status, init_pid }
    }
}

impl Container {
    /// Record for a container about to be created.
    #[must_use]
    pub fn new(config: ContainerConfig, runtime_dir: PathBuf, cgroup_dir: String, log: ContainerLog) -> Self {
        Self {
            id: config.id,
            bundle: config.bundle,
            spec: config.spec,
            runtime_dir,
            cgroup_dir,
            console_socket: config.console_socket,
            created_at: None,
            pid: None,
            log,
        }
    }

    /// Path of a file in the runtime directory.
    #[must_use]
    pub fn runtime_path(&self, name: &str) -> PathBuf {
        self.runtime_dir.join(name)
    }

    /// Path of the compiled config.
    #[must_use]
    pub fn config_path(&self) -> PathBuf {
        self.runtime_path(files::CONFIG)
    }

    /// Observe the current status.
    ///
    /// Processes sharing the monitor's command line are forks of the monitor
    /// and are skipped, as are processes that exit while being inspected.
    ///
    /// # Errors
    ///
    /// Returns an error if `cgroup.procs` exists but can't be read.
    pub fn observe(&self, cgroups: &CgroupManager) -> KennelResult<Observation> {
        let Some(monitor) = self.pid.filter(|pid| process::is_alive(*pid)) else {
            return Ok(Observation::new(ContainerStatus::Stopped, None));
        };
        let monitor_cmdline = process::cmdline(monitor).ok();

        let mut running = None;
        for pid in cgroups.procs(&self.cgroup_dir)? {
            let Ok(cmdline) = process::cmdline(pid) else {
                continue;
            };
            if cmdline.is_empty() || monitor_cmdline.as_ref() == Some(&cmdline) {
                continue;
            }
            if is_init(&cmdline) {
                return Ok(Observation::new(ContainerStatus::Created, Some(pid)));
            }
            running.get_or_insert(pid);
        }

        Ok(match running {
            Some(pid) => Observation::new(ContainerStatus::Running, Some(pid)),
            None => Observation::new(ContainerStatus::Creating, None),
        })
    }

    /// OCI state for an observation.
    #[must_use]
    pub fn oci_state(&self, observation: &Observation) -> ContainerState {
        ContainerState::new(self.id.as_str(), &self.bundle, observation.status)
            .with_pid(observation.init_pid)
            .with_annotations(self.spec.annotations.clone())
    }

    /// Signal every process of the container cgroup, or the monitor while
    /// the cgroup is still empty.
    ///
    /// Processes that are already gone are ignored. Every process is
    /// signalled even if one fails.
    ///
    /// # Errors
    ///
    /// Returns the first signalling error.
    pub fn kill(&self, cgroups: &CgroupManager, signal: i32) -> KennelResult<()> {
        let pids = cgroups.procs(&self.cgroup_dir)?;
        if pids.is_empty() {
            if let Some(monitor) = self.pid {
                tracing::debug!(container_id = %self.id, pid = monitor, signal, "Signalling monitor");
                process::send_signal(monitor, signal)?;
            }
            return Ok(());
        }

        let mut first_error = None;
        for pid in pids {
            if let Err(e) = process::send_signal(pid, signal) {
                tracing::warn!(container_id = %self.id, pid, signal, error = %e, "Failed to signal process");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Wait until the monitor is gone.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::Timeout`] when the deadline passes first.
    pub async fn wait_monitor_exit(&self, deadline: Instant) -> KennelResult<()> {
        let Some(monitor) = self.pid else {
            return Ok(());
        };
        while process::is_alive(monitor) {
            if Instant::now() >= deadline {
                return Err(KennelError::timeout(format!("waiting for monitor {monitor} to exit")));
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + POLL_INTERVAL)).await;
        }
        Ok(())
    }

    /// Wait until the init process is waiting to be started and return its
    /// pid.
    ///
    /// # Errors
    ///
    /// Returns a supervision error if the monitor exits first, or
    /// [`KennelError::Timeout`] when the deadline passes first.
    pub async fn wait_created(&self, cgroups: &CgroupManager, deadline: Instant) -> KennelResult<i32> {
        loop {
            let observation = self.observe(cgroups)?;
            match (observation.status, observation.init_pid) {
                (ContainerStatus::Created, Some(pid)) => return Ok(pid),
                (ContainerStatus::Stopped, _) => {
                    return Err(KennelError::supervision(format!(
                        "monitor for {} exited before the container was created",
                        self.id
                    )));
                }
                (ContainerStatus::Running, _) => {
                    return Err(KennelError::InvalidState {
                        id: self.id.to_string(),
                        message: "expected created, but was running".to_string(),
                    });
                }
                _ => {}
            }
            if Instant::now() >= deadline {
                return Err(KennelError::timeout(format!("creating container {}", self.id)));
            }
            tokio::time::sleep_until(deadline.min(Instant::now() + POLL_INTERVAL)).await;
        }
    }

    /// Let the init process exec the container process.
    ///
    /// Init blocks opening the sync FIFO for writing until it is opened here,
    /// then writes one byte before it execs.
    ///
    /// # Errors
    ///
    /// Returns [`KennelError::Timeout`] if init does not write before the
    /// deadline.
    pub async fn release_init(&self, deadline: Instant) -> KennelResult<()> {
        let fifo = self.runtime_path(files::SYNC_FIFO);
        let mut receiver = tokio::net::unix::pipe::OpenOptions::new()
            .read_write(true)
            .open_receiver(&fifo)?;

        let mut buf = [0u8; 1];
        let read = tokio::time::timeout_at(deadline, receiver.read(&mut buf))
            .await
            .map_err(|_| KennelError::timeout(format!("releasing init of {}", self.id)))??;
        if read == 0 {
            return Err(KennelError::supervision(format!(
                "sync FIFO {} closed without data",
                fifo.display()
            )));
        }
        tracing::debug!(container_id = %self.id, "Released init");
        Ok(())
    }
}

/// `/.kennel/init` with its NUL terminator and nothing else.
fn is_init(cmdline: &[u8]) -> bool {
    cmdline.strip_suffix(b"\0") == Some(INIT_CMD.as_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::{test_container, wait_for_exec};
    use std::os::unix::process::CommandExt;
    use std::path::Path;
    use std::process::{Child, Command, Stdio};
    use std::time::Duration;

    struct Reaped(Child);

    impl Reaped {
        fn pid(&self) -> i32 {
            i32::try_from(self.0.id()).unwrap()
        }
    }

    impl Drop for Reaped {
        fn drop(&mut self) {
            let _ = self.0.kill();
            let _ = self.0.wait();
        }
    }

    fn sleeper(secs: &str) -> Reaped {
        let sleeper = Reaped(Command::new("sleep").arg(secs).spawn().unwrap());
        wait_for_exec(sleeper.pid(), "sleep");
        sleeper
    }

    /// A process whose command line is exactly the init command.
    fn fake_init() -> Reaped {
        let init = Reaped(
            Command::new("cat")
                .arg0(INIT_CMD)
                .stdin(Stdio::piped())
                .stdout(Stdio::null())
                .spawn()
                .unwrap(),
        );
        wait_for_exec(init.pid(), INIT_CMD);
        init
    }

    fn fake_cgroup(root: &Path, dir: &str, pids: &[i32]) -> CgroupManager {
        let path = root.join(dir);
        std::fs::create_dir_all(&path).unwrap();
        let procs: String = pids.iter().map(|p| format!("{p}\n")).collect();
        std::fs::write(path.join("cgroup.procs"), procs).unwrap();
        CgroupManager::with_root(root)
    }

    #[test]
    fn stopped_without_live_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = test_container(dir.path());
        let cgroups = CgroupManager::with_root(dir.path().join("cgroup"));

        let observation = container.observe(&cgroups).unwrap();
        assert_eq!(observation, Observation::new(ContainerStatus::Stopped, None));

        let mut exited = Command::new("true").spawn().unwrap();
        exited.wait().unwrap();
        container.pid = Some(i32::try_from(exited.id()).unwrap());
        assert_eq!(container.observe(&cgroups).unwrap().status, ContainerStatus::Stopped);
    }

    #[test]
    fn creating_created_running() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = test_container(dir.path());
        let monitor = sleeper("30");
        container.pid = Some(monitor.pid());
        let root = dir.path().join("cgroup");

        let cgroups = fake_cgroup(&root, &container.cgroup_dir, &[monitor.pid()]);
        assert_eq!(
            container.observe(&cgroups).unwrap(),
            Observation::new(ContainerStatus::Creating, None)
        );

        let init = fake_init();
        let cgroups = fake_cgroup(&root, &container.cgroup_dir, &[monitor.pid(), init.pid()]);
        assert_eq!(
            container.observe(&cgroups).unwrap(),
            Observation::new(ContainerStatus::Created, Some(init.pid()))
        );

        let workload = sleeper("31");
        let cgroups = fake_cgroup(&root, &container.cgroup_dir, &[monitor.pid(), workload.pid()]);
        assert_eq!(
            container.observe(&cgroups).unwrap(),
            Observation::new(ContainerStatus::Running, Some(workload.pid()))
        );

        let state = container.oci_state(&container.observe(&cgroups).unwrap());
        assert_eq!(state.status, ContainerStatus::Running);
        assert_eq!(state.pid, Some(workload.pid()));
        assert_eq!(state.id, "c1");
    }

    #[test]
    fn init_command_line() {
        assert!(is_init(b"/.kennel/init\0"));
        assert!(!is_init(b"/.kennel/init\0--flag\0"));
        assert!(!is_init(b"/.kennel/init"));
    }

    #[test]
    fn kill_signals_cgroup_or_monitor() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = test_container(dir.path());
        let mut monitor = sleeper("30");
        let mut workload = sleeper("31");
        container.pid = Some(monitor.pid());
        let root = dir.path().join("cgroup");

        let cgroups = fake_cgroup(&root, &container.cgroup_dir, &[workload.pid()]);
        container.kill(&cgroups, libc::SIGKILL).unwrap();
        assert!(workload.0.wait().unwrap().code().is_none());
        assert!(process::is_alive(monitor.pid()));

        let cgroups = fake_cgroup(&root, &container.cgroup_dir, &[]);
        container.kill(&cgroups, libc::SIGKILL).unwrap();
        assert!(monitor.0.wait().unwrap().code().is_none());
    }

    #[tokio::test]
    async fn monitor_exit_during_create() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = test_container(dir.path());
        let mut exited = Command::new("true").spawn().unwrap();
        exited.wait().unwrap();
        container.pid = Some(i32::try_from(exited.id()).unwrap());

        let cgroups = CgroupManager::with_root(dir.path().join("cgroup"));
        let deadline = Instant::now() + Duration::from_secs(5);
        let err = container.wait_created(&cgroups, deadline).await.unwrap_err();
        assert!(matches!(err, KennelError::Supervision { .. }));
    }

    #[tokio::test]
    async fn created_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let mut container = test_container(dir.path());
        let monitor = sleeper("30");
        container.pid = Some(monitor.pid());
        let cgroups = fake_cgroup(&dir.path().join("cgroup"), &container.cgroup_dir, &[]);

        let deadline = Instant::now() + Duration::from_millis(300);
        let err = container.wait_created(&cgroups, deadline).await.unwrap_err();
        assert!(matches!(err, KennelError::Timeout { .. }));
    }

    #[tokio::test]
    async fn release_init_reads_fifo() {
        let dir = tempfile::tempdir().unwrap();
        let container = test_container(dir.path());
        let fifo = container.runtime_path(files::SYNC_FIFO);
        rustix::fs::mknodat(
            rustix::fs::CWD,
            &fifo,
            rustix::fs::FileType::Fifo,
            rustix::fs::Mode::from_raw_mode(0o600),
            0,
        )
        .unwrap();

        let writer = std::thread::spawn(move || {
            use std::io::Write;
            let mut fifo = std::fs::OpenOptions::new().write(true).open(fifo).unwrap();
            fifo.write_all(b"1").unwrap();
        });

        let deadline = Instant::now() + Duration::from_secs(5);
        container.release_init(deadline).await.unwrap();
        writer.join().unwrap();
    }

    #[tokio::test]
    async fn release_init_deadline() {
        let dir = tempfile::tempdir().unwrap();
        let container = test_container(dir.path());
        let fifo = container.runtime_path(files::SYNC_FIFO);
        rustix::fs::mknodat(
            rustix::fs::CWD,
            &fifo,
            rustix::fs::FileType::Fifo,
            rustix::fs::Mode::from_raw_mode(0o600),
            0,
        )
        .unwrap();

        let deadline = Instant::now() + Duration::from_millis(200);
        let err = container.release_init(deadline).await.unwrap_err();
        assert!(matches!(err, KennelError::Timeout { .. }));
    }
}
