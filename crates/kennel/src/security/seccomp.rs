//! Seccomp syscall filtering.
//!
//! The OCI rules are rendered as a backend profile in the version 2 text
//! format: a version line, the filter mode with its default action, then
//! one section per architecture with one line per syscall rule.

use std::fmt::Write as _;

use kennel_common::paths::files;
use kennel_common::{KennelError, KennelResult};
use kennel_oci::runtime::{Seccomp, SeccompAction, SeccompSyscall};

use crate::compiler::CompiledConfig;
use crate::filesystem::{path_str, write_new_file};
use crate::runtime::Container;

/// Errno returned by `SCMP_ACT_ERRNO` without an explicit value (EPERM).
const DEFAULT_ERRNO: u32 = 1;

/// Write `seccomp.conf` and point the backend at it.
///
/// Profiles without syscall rules are skipped.
///
/// # Errors
///
/// Returns a configuration error for actions or architectures the backend
/// can't express.
pub fn configure(config: &mut CompiledConfig, container: &Container, enabled: bool) -> KennelResult<()> {
    if !enabled {
        tracing::warn!("seccomp feature is disabled - all system calls are allowed");
        return Ok(());
    }
    let Some(seccomp) = container
        .spec
        .linux()
        .and_then(|l| l.seccomp.as_ref())
        .filter(|s| !s.syscalls.is_empty())
    else {
        return Ok(());
    };

    let profile = render(seccomp)?;
    let path = container.runtime_dir.join(files::SECCOMP);
    write_new_file(&path, profile.as_bytes(), 0o440)?;
    config.set("lxc.seccomp.profile", path_str(&path)?)?;

    tracing::debug!(
        container_id = %container.id,
        rules = seccomp.syscalls.len(),
        "Wrote seccomp profile"
    );
    Ok(())
}

/// Render a profile.
///
/// # Errors
///
/// Returns a configuration error for unsupported actions and unknown
/// architectures.
pub fn render(seccomp: &Seccomp) -> KennelResult<String> {
    if !seccomp.flags.is_empty() {
        tracing::warn!(flags = ?seccomp.flags, "Ignoring unsupported seccomp flags");
    }

    let mut out = String::from("2\n");
    if seccomp.default_action == SeccompAction::ScmpActAllow {
        out.push_str("denylist\n");
    } else {
        let default = action(seccomp.default_action, seccomp.default_errno_ret)?;
        let _ = writeln!(out, "allowlist {default}");
    }

    let arches = if seccomp.architectures.is_empty() {
        vec!["all"]
    } else {
        seccomp
            .architectures
            .iter()
            .map(|a| arch(a))
            .collect::<KennelResult<Vec<_>>>()?
    };

    for arch in arches {
        let _ = writeln!(out, "[{arch}]");
        for rule in &seccomp.syscalls {
            write_rule(&mut out, rule)?;
        }
    }
    Ok(out)
}

fn write_rule(out: &mut String, rule: &SeccompSyscall) -> KennelResult<()> {
    let action = action(rule.action, rule.errno_ret)?;
    let mut args = String::new();
    for arg in &rule.args {
        let _ = write!(
            args,
            " [{},{},{},{}]",
            arg.index,
            arg.value,
            arg.op.as_str(),
            arg.value_two
        );
    }
    for name in &rule.names {
        let _ = writeln!(out, "{name} {action}{args}");
    }
    Ok(())
}

fn action(action: SeccompAction, errno: Option<u32>) -> KennelResult<String> {
    let name = match action {
        SeccompAction::ScmpActKill
        | SeccompAction::ScmpActKillThread
        | SeccompAction::ScmpActKillProcess => "kill",
        SeccompAction::ScmpActTrap => "trap",
        SeccompAction::ScmpActErrno => {
            return Ok(format!("errno {}", errno.unwrap_or(DEFAULT_ERRNO)));
        }
        SeccompAction::ScmpActAllow => "allow",
        SeccompAction::ScmpActNotify => "notify",
        SeccompAction::ScmpActLog | SeccompAction::ScmpActTrace => {
            return Err(KennelError::config(format!(
                "unsupported seccomp action {action:?}"
            )));
        }
    };
    Ok(name.to_string())
}

fn arch(name: &str) -> KennelResult<&'static str> {
    let arch = match name {
        "SCMP_ARCH_X86" => "x86",
        "SCMP_ARCH_X86_64" => "x86_64",
        "SCMP_ARCH_X32" => "x32",
        "SCMP_ARCH_ARM" => "arm",
        "SCMP_ARCH_AARCH64" => "arm64",
        "SCMP_ARCH_MIPS" => "mips",
        "SCMP_ARCH_MIPS64" => "mips64",
        "SCMP_ARCH_MIPS64N32" => "mips64n32",
        "SCMP_ARCH_MIPSEL" => "mipsel",
        "SCMP_ARCH_MIPSEL64" => "mipsel64",
        "SCMP_ARCH_MIPSEL64N32" => "mipsel64n32",
        "SCMP_ARCH_PPC" => "ppc",
        "SCMP_ARCH_PPC64" => "ppc64",
        "SCMP_ARCH_PPC64LE" => "ppc64le",
        "SCMP_ARCH_S390" => "s390",
        "SCMP_ARCH_S390X" => "s390x",
        "SCMP_ARCH_RISCV64" => "riscv64",
        other => {
            return Err(KennelError::config(format!(
                "unsupported seccomp architecture {other}"
            )));
        }
    };
    Ok(arch)
}
