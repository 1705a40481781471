//! Root filesystem and init process configuration.

use std::path::Path;

use kennel_common::paths::files;
use kennel_common::{KennelError, KennelResult};
use rustix::fs::{CWD, FileType, Mode};

use super::{path_str, write_new_file};
use crate::compiler::CompiledConfig;
use crate::runtime::{Container, RuntimeConfig};

/// Path of the init executable inside the container.
pub const INIT_CMD: &str = "/.kennel/init";

/// Mount point of the runtime directory, relative to the rootfs.
pub const RUNTIME_MOUNT: &str = ".kennel";

/// Hostname and rootfs directives.
///
/// # Errors
///
/// Returns a configuration error if the config has no root.
pub fn configure_rootfs(
    config: &mut CompiledConfig,
    settings: &RuntimeConfig,
    container: &Container,
) -> KennelResult<()> {
    let spec = &container.spec;
    if let Some(hostname) = spec.hostname.as_deref().filter(|h| !h.is_empty()) {
        config.set("lxc.uts.name", hostname)?;
    }

    let root = spec
        .root
        .as_ref()
        .ok_or_else(|| KennelError::config("spec has no root filesystem"))?;
    let rootfs = container.bundle.join(&root.path);
    config.set("lxc.rootfs.path", path_str(&rootfs)?)?;
    config.set("lxc.rootfs.mount", path_str(&settings.rootfs_mount)?)?;
    // The rootfs belongs to the caller and must survive the container.
    config.set("lxc.rootfs.managed", "0")?;
    config.set("lxc.ephemeral", "0")?;

    let mut options = Vec::new();
    if let Some(propagation) = spec
        .linux()
        .and_then(|l| l.rootfs_propagation.as_deref())
        .filter(|p| !p.is_empty())
    {
        options.push(propagation);
    }
    if root.readonly {
        options.push("ro");
    }
    if !options.is_empty() {
        config.set("lxc.rootfs.options", options.join(","))?;
    }
    Ok(())
}

/// Init process directives and the files `kennel-init` reads on startup.
///
/// # Errors
///
/// Returns a configuration error if the config has no process or a side file
/// can't be created.
pub fn configure_init(config: &mut CompiledConfig, container: &Container) -> KennelResult<()> {
    let process = container
        .spec
        .process
        .as_ref()
        .ok_or_else(|| KennelError::config("spec has no process"))?;

    let cwd = if process.cwd.as_os_str().is_empty() {
        Path::new("/")
    } else {
        process.cwd.as_path()
    };
    config.set("lxc.init.cwd", path_str(cwd)?)?;
    config.set("lxc.init.uid", process.user.uid.to_string())?;
    config.set("lxc.init.gid", process.user.gid.to_string())?;
    if !process.user.additional_gids.is_empty() {
        let groups: Vec<String> = process
            .user
            .additional_gids
            .iter()
            .map(ToString::to_string)
            .collect();
        config.set("lxc.init.groups", groups.join(" "))?;
    }
    config.set("lxc.init.cmd", INIT_CMD)?;

    let dir = &container.runtime_dir;
    write_new_file(&dir.join(files::CMDLINE), &nul_separated(&process.args)?, 0o400)?;
    write_new_file(&dir.join(files::ENVIRON), &nul_separated(&process.env)?, 0o400)?;
    create_fifo(&dir.join(files::SYNC_FIFO))?;
    // Bind mount target for the init executable.
    write_new_file(&dir.join(files::INIT), b"", 0o400)?;

    tracing::debug!(
        container_id = %container.id,
        args = process.args.len(),
        "Configured init process"
    );
    Ok(())
}

fn nul_separated(items: &[String]) -> KennelResult<Vec<u8>> {
    let mut out = Vec::new();
    for item in items {
        if item.contains('\0') {
            return Err(KennelError::config(format!(
                "NUL byte in process argument or environment {item:?}"
            )));
        }
        out.extend_from_slice(item.as_bytes());
        out.push(0);
    }
    Ok(out)
}

fn create_fifo(path: &Path) -> KennelResult<()> {
    rustix::fs::mknodat(CWD, path, FileType::Fifo, Mode::from_raw_mode(0o600), 0).map_err(|e| {
        KennelError::config(format!("failed to create fifo {}: {e}", path.display()))
    })
}
