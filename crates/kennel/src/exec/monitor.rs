//! Monitor process supervision.
//!
//! The monitor (`kennel-start`) sets up the container from the compiled
//! config and stays around as its parent. It is started as
//! `kennel-start <id> <root> <config>` from inside the runtime directory with
//! a cleared environment.

#![allow(unsafe_code)]

use std::ffi::OsString;
use std::io;
use std::os::fd::AsFd;
use std::os::unix::process::CommandExt;
use std::path::PathBuf;
use std::process::{Command, Stdio};

use tokio::time::Instant;

use kennel_common::paths::EXEC_START;
use kennel_common::{KennelError, KennelResult};

use super::{console, pty};
use crate::runtime::{Container, RuntimeConfig};

/// Variables passed through to the monitor.
pub const ENV_ALLOW_LIST: [&str; 3] = ["HOME", "XDG_RUNTIME_DIR", "PATH"];

/// Capture the allow-listed variables of the current process.
#[must_use]
pub fn capture_env() -> Vec<(String, OsString)> {
    ENV_ALLOW_LIST
        .iter()
        .filter_map(|name| std::env::var_os(name).map(|value| ((*name).to_string(), value)))
        .collect()
}

/// Where the monitor's stdio goes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleMode {
    /// No terminal requested, stdio is inherited and the backend console is
    /// switched off.
    Inherit,
    /// A terminal without a console socket, stdio is `/dev/null`.
    Null,
    /// A pty whose master is sent to the console socket.
    Socket(PathBuf),
}

impl ConsoleMode {
    /// Mode for a container.
    #[must_use]
    pub fn of(container: &Container) -> Self {
        let terminal = container.spec.process.as_ref().is_some_and(|p| p.terminal);
        match (&container.console_socket, terminal) {
            (Some(socket), _) => Self::Socket(socket.clone()),
            (None, true) => Self::Null,
            (None, false) => Self::Inherit,
        }
    }
}

/// Start the monitor and return its pid.
///
/// With a console socket the socket is connected first, then the monitor is
/// spawned on a fresh pty and the master is handed over. The socket and the
/// master are closed before this returns.
///
/// # Errors
///
/// Returns a supervision error if the monitor can't be spawned or the
/// console hand-off fails, or a timeout error if the console socket does not
/// accept before `deadline`.
pub async fn spawn(
    settings: &RuntimeConfig,
    container: &Container,
    env: &[(String, OsString)],
    deadline: Instant,
) -> KennelResult<i32> {
    let start = settings.paths.libexec(EXEC_START);
    let mut cmd = Command::new(&start);
    cmd.arg(container.id.as_str())
        .arg(&settings.paths.root)
        .arg(container.config_path())
        .current_dir(&container.runtime_dir)
        .env_clear()
        .envs(env.iter().map(|(k, v)| (k, v)));

    let pid = match ConsoleMode::of(container) {
        ConsoleMode::Inherit => spawn_command(&mut cmd)?,
        ConsoleMode::Null => {
            cmd.stdin(Stdio::null())
                .stdout(Stdio::null())
                .stderr(Stdio::null());
            spawn_command(&mut cmd)?
        }
        ConsoleMode::Socket(socket) => {
            let stream = console::connect(&socket, deadline).await?;
            let pty = pty::open_pty()?;

            cmd.stdin(Stdio::from(pty.slave.try_clone()?))
                .stdout(Stdio::from(pty.slave.try_clone()?))
                .stderr(Stdio::from(pty.slave.try_clone()?));
            unsafe {
                cmd.pre_exec(|| {
                    if libc::setsid() < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    if libc::ioctl(0, libc::TIOCSCTTY, 0) < 0 {
                        return Err(io::Error::last_os_error());
                    }
                    Ok(())
                });
            }
            let pid = spawn_command(&mut cmd)?;
            drop(cmd);
            drop(pty.slave);

            console::send_terminal(&stream, pty.master.as_fd())?;
            pid
        }
    };

    tracing::info!(
        container_id = %container.id,
        pid,
        path = %start.display(),
        "Started monitor"
    );
    Ok(pid)
}

fn spawn_command(cmd: &mut Command) -> KennelResult<i32> {
    let child = cmd.spawn().map_err(|e| {
        KennelError::supervision(format!(
            "failed to run {}: {e}",
            cmd.get_program().to_string_lossy()
        ))
    })?;
    // Exited monitors are reaped by the liveness check, not by `Child`.
    i32::try_from(child.id()).map_err(|_| KennelError::Internal {
        message: format!("monitor pid {} out of range", child.id()),
    })
}
