//! PTY (pseudo-terminal) allocation.

use std::ffi::OsStr;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::os::fd::OwnedFd;
use std::path::PathBuf;

use rustix::fs::{Mode, OFlags};
use rustix::pty::{OpenptFlags, grantpt, openpt, ptsname, unlockpt};

use kennel_common::{KennelError, KennelResult};

/// A master/slave pty pair. Both ends close on drop.
#[derive(Debug)]
pub struct Pty {
    /// Master end, handed to the console socket.
    pub master: OwnedFd,
    /// Slave end, the monitor's stdio and controlling terminal.
    pub slave: OwnedFd,
    /// Path of the slave device.
    pub slave_path: PathBuf,
}

/// Allocate a pty with close-on-exec on both ends.
///
/// # Errors
///
/// Returns a supervision error if the pty can't be allocated.
pub fn open_pty() -> KennelResult<Pty> {
    let pty_err = |step: &str, e: io::Error| KennelError::supervision(format!("{step}: {e}"));

    let master = openpt(OpenptFlags::RDWR | OpenptFlags::NOCTTY | OpenptFlags::CLOEXEC)
        .map_err(|e| pty_err("openpt", e.into()))?;
    grantpt(&master).map_err(|e| pty_err("grantpt", e.into()))?;
    unlockpt(&master).map_err(|e| pty_err("unlockpt", e.into()))?;

    let name = ptsname(&master, Vec::new()).map_err(|e| pty_err("ptsname", e.into()))?;
    let slave_path = PathBuf::from(OsStr::from_bytes(name.as_bytes()));
    let slave = rustix::fs::open(
        name.as_c_str(),
        OFlags::RDWR | OFlags::NOCTTY | OFlags::CLOEXEC,
        Mode::empty(),
    )
    .map_err(|e| pty_err("open pty slave", e.into()))?;

    tracing::debug!(path = %slave_path.display(), "Allocated pty");
    Ok(Pty {
        master,
        slave,
        slave_path,
    })
}
