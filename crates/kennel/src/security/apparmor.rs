//! AppArmor profile selection.

use std::path::Path;

use kennel_common::KennelResult;
use kennel_oci::Spec;

use crate::compiler::CompiledConfig;

/// Profile applied when the config names none or AppArmor is disabled.
pub const UNCONFINED: &str = "unconfined";

/// Check if AppArmor is enabled on the host.
#[must_use]
pub fn is_enabled() -> bool {
    is_enabled_at(Path::new("/sys/module/apparmor/parameters/enabled"))
}

fn is_enabled_at(param: &Path) -> bool {
    std::fs::read_to_string(param).is_ok_and(|v| v.trim() == "Y")
}

/// Emit `lxc.apparmor.profile` for the process, or `unconfined` when the
/// feature is disabled.
///
/// # Errors
///
/// Returns a configuration error if the profile name is not a valid value.
pub fn configure(config: &mut CompiledConfig, spec: &Spec, enabled: bool) -> KennelResult<()> {
    if !enabled {
        tracing::warn!("apparmor feature is disabled - profile is set to unconfined");
        return config.set("lxc.apparmor.profile", UNCONFINED);
    }
    let profile = spec
        .process
        .as_ref()
        .and_then(|p| p.apparmor_profile.as_deref())
        .filter(|p| !p.is_empty())
        .unwrap_or(UNCONFINED);
    config.set("lxc.apparmor.profile", profile)
}
