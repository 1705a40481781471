//! Mount entries, readonly paths and masked paths.

use std::path::Path;

use kennel_common::paths::{EXEC_INIT, files};
use kennel_common::{KennelError, KennelResult};
use kennel_oci::runtime::Mount;

use super::rootfs::RUNTIME_MOUNT;
use super::{path_str, write_new_file};
use crate::compiler::CompiledConfig;
use crate::runtime::{Container, RuntimeConfig};

/// One `lxc.mount.entry` per bundle mount, then the runtime directory and the
/// init executable.
///
/// # Errors
///
/// Returns a configuration error for mounts onto the rootfs itself or paths
/// that are not valid UTF-8.
pub fn configure_mounts(
    config: &mut CompiledConfig,
    settings: &RuntimeConfig,
    container: &Container,
) -> KennelResult<()> {
    for mount in &container.spec.mounts {
        config.set("lxc.mount.entry", mount_entry(mount)?)?;
    }

    let runtime_dir = escape(path_str(&container.runtime_dir)?);
    config.set(
        "lxc.mount.entry",
        format!("{runtime_dir} {RUNTIME_MOUNT} none bind,ro,nodev,nosuid,create=dir 0 0"),
    )?;

    let init = settings.paths.libexec(EXEC_INIT);
    config.set(
        "lxc.mount.entry",
        format!(
            "{} {RUNTIME_MOUNT}/{} none bind,ro 0 0",
            escape(path_str(&init)?),
            files::INIT
        ),
    )?;
    Ok(())
}

/// Bind mount every readonly path onto itself with `ro`.
///
/// Must run after the rootfs mount point has been configured.
///
/// # Errors
///
/// Returns a configuration error if `lxc.rootfs.mount` is not set yet.
pub fn configure_readonly_paths(
    config: &mut CompiledConfig,
    container: &Container,
) -> KennelResult<()> {
    let Some(linux) = container.spec.linux() else {
        return Ok(());
    };
    if linux.readonly_paths.is_empty() {
        return Ok(());
    }
    let rootfs_mount = config
        .get("lxc.rootfs.mount")
        .ok_or_else(|| KennelError::config("lxc.rootfs.mount must be set before readonly paths"))?
        .to_string();

    for path in &linux.readonly_paths {
        let relative = path.trim_start_matches('/');
        let source = Path::new(&rootfs_mount).join(relative);
        config.set(
            "lxc.mount.entry",
            format!(
                "{} {} bind bind,ro,optional 0 0",
                escape(path_str(&source)?),
                escape(relative)
            ),
        )?;
    }
    Ok(())
}

/// Write `masked.txt` for the mount hook, one path per line.
///
/// # Errors
///
/// Returns a configuration error if the file can't be created.
pub fn write_masked(container: &Container) -> KennelResult<()> {
    let masked = container
        .spec
        .linux()
        .and_then(|l| l.masked_paths.as_deref())
        .unwrap_or_default();
    if masked.is_empty() {
        return Ok(());
    }

    let mut content = String::new();
    for path in masked {
        content.push_str(path);
        content.push('\n');
    }
    write_new_file(
        &container.runtime_dir.join(files::MASKED),
        content.as_bytes(),
        0o600,
    )
}

fn mount_entry(mount: &Mount) -> KennelResult<String> {
    let destination = path_str(&mount.destination)?.trim_start_matches('/');
    if destination.is_empty() {
        return Err(KennelError::config("mount destination must not be the rootfs"));
    }

    let mut options = mount.options.clone();
    let is_bind = mount.mount_type.as_deref() == Some("bind")
        || options.iter().any(|o| o == "bind" || o == "rbind");

    let fstype = if is_bind {
        "none"
    } else {
        mount.mount_type.as_deref().filter(|t| !t.is_empty()).unwrap_or("none")
    };
    let source = match &mount.source {
        Some(source) => path_str(source)?,
        None => fstype,
    };

    if is_bind {
        if !options.iter().any(|o| o == "bind" || o == "rbind") {
            options.push("bind".to_string());
        }
        // The backend creates missing mount targets of the source's kind.
        let create = match std::fs::metadata(source) {
            Ok(meta) if !meta.is_dir() => "create=file",
            _ => "create=dir",
        };
        options.push(create.to_string());
    }
    let options = if options.is_empty() {
        "defaults".to_string()
    } else {
        options.join(",")
    };

    Ok(format!(
        "{} {} {fstype} {options} 0 0",
        escape(source),
        escape(destination)
    ))
}

/// fstab style octal escapes for separators.
fn escape(field: &str) -> String {
    field.replace(' ', "\\040").replace('\t', "\\011")
}
