//! Container security features.
//!
//! Each feature can be switched off runtime-wide. A switched off feature
//! never fails a container; it is logged as a warning on every compile.
//!
//! - AppArmor profiles
//! - Seccomp syscall filtering
//! - Linux capabilities

pub mod apparmor;
pub mod capabilities;
pub mod seccomp;

pub use capabilities::HostCapabilities;

use kennel_common::KennelResult;

use crate::compiler::CompiledConfig;
use crate::runtime::{Container, Features};

/// Emit the AppArmor, seccomp and capability directives, in that order.
///
/// # Errors
///
/// Returns a configuration error from the first feature that fails.
pub fn configure(
    config: &mut CompiledConfig,
    container: &Container,
    features: &Features,
) -> KennelResult<()> {
    apparmor::configure(config, &container.spec, features.apparmor)?;
    seccomp::configure(config, container, features.seccomp)?;
    capabilities::configure(config, &container.spec, features.capabilities)?;
    Ok(())
}

/// Disable features the host can't provide. Each change is logged.
pub fn restrict_to_host(features: &mut Features, host: &HostCapabilities, apparmor_enabled: bool) {
    if features.apparmor && !apparmor_enabled {
        tracing::warn!("AppArmor is not enabled on this host - disabling apparmor feature");
        features.apparmor = false;
    }
    if features.capabilities && !host.has("CAP_SETPCAP") {
        tracing::warn!("missing CAP_SETPCAP - disabling capabilities feature");
        features.capabilities = false;
    }
    if features.cgroup_devices && !host.has("CAP_SYS_ADMIN") {
        tracing::warn!("missing CAP_SYS_ADMIN - disabling cgroup_devices feature");
        features.cgroup_devices = false;
    }
}
