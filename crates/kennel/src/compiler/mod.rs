//! Translation of a validated container into backend directives.
//!
//! The order of the steps is fixed so that the same bundle always compiles
//! to the same file. Steps that write side files put them into the runtime
//! directory, which must exist and be empty.

mod directives;

use std::collections::HashSet;

use kennel_common::paths::EXEC_HOOK;
use kennel_common::{KennelError, KennelResult};

pub use directives::CompiledConfig;

use crate::cgroup::CgroupManager;
use crate::filesystem::{DevicePlan, mounts, path_str, rootfs};
use crate::runtime::{Container, RuntimeConfig};
use crate::{namespace, security};

/// Compile a container.
///
/// # Errors
///
/// Returns the first failing step's error. Side files written before the
/// failure stay in the runtime directory.
pub fn compile(
    settings: &RuntimeConfig,
    cgroups: &CgroupManager,
    container: &Container,
) -> KennelResult<CompiledConfig> {
    let mut config = CompiledConfig::new();
    let spec = &container.spec;

    rootfs::configure_rootfs(&mut config, settings, container)?;
    rootfs::configure_init(&mut config, container)?;
    mounts::configure_mounts(&mut config, settings, container)?;
    mounts::configure_readonly_paths(&mut config, container)?;
    namespace::configure(&mut config, spec)?;

    if let Some(process) = &spec.process {
        if let Some(score) = process.oom_score_adj {
            config.set("lxc.proc.oom_score_adj", score.to_string())?;
        }
        if process.no_new_privileges {
            config.set("lxc.no_new_privs", "1")?;
        }
    }

    security::configure(&mut config, container, &settings.features)?;

    let devices = DevicePlan::new(spec);
    devices.configure(&mut config, container)?;
    mounts::write_masked(container)?;

    config.set("lxc.hook.version", "1")?;
    config.set("lxc.hook.mount", path_str(&settings.paths.libexec(EXEC_HOOK))?)?;

    cgroups.configure(
        &mut config,
        settings,
        &container.cgroup_dir,
        spec,
        &devices.cgroup_rules,
    )?;

    if let Some(linux) = spec.linux() {
        for (key, value) in &linux.sysctl {
            config.set(format!("lxc.sysctl.{key}"), value.as_str())?;
        }
    }

    configure_rlimits(&mut config, container)?;

    config.set("lxc.log.level", container.log.level.priority().to_string())?;
    if let Some(file) = &container.log.file {
        config.set("lxc.log.file", path_str(file)?)?;
    }

    tracing::debug!(
        container_id = %container.id,
        directives = config.directives().len(),
        "Compiled container config"
    );
    Ok(config)
}

/// `lxc.prlimit.<name> = soft:hard` per rlimit.
///
/// Duplicates are rejected before anything is emitted. Limits not listed are
/// inherited from the monitor.
fn configure_rlimits(config: &mut CompiledConfig, container: &Container) -> KennelResult<()> {
    let Some(process) = &container.spec.process else {
        return Ok(());
    };

    let mut seen = HashSet::new();
    let mut limits = Vec::with_capacity(process.rlimits.len());
    for limit in &process.rlimits {
        let lower = limit.limit_type.to_lowercase();
        let name = lower.strip_prefix("rlimit_").unwrap_or(&lower).to_string();
        if !seen.insert(name.clone()) {
            return Err(KennelError::config(format!(
                "duplicate resource limit {}",
                limit.limit_type
            )));
        }
        limits.push((name, format!("{}:{}", limit.soft, limit.hard)));
    }

    for (name, value) in limits {
        config.set(format!("lxc.prlimit.{name}"), value)?;
    }
    Ok(())
}
