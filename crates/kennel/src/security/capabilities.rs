//! Linux capabilities management.

use caps::{CapSet, Capability, CapsHashSet};
use kennel_common::{KennelError, KennelResult};
use kennel_oci::Spec;

use crate::compiler::CompiledConfig;

/// Effective capabilities of the runtime process, read once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    effective: CapsHashSet,
}

impl HostCapabilities {
    /// Read the effective set of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns an error if the capability sets can't be read.
    pub fn probe() -> KennelResult<Self> {
        let effective = caps::read(None, CapSet::Effective).map_err(|e| KennelError::Internal {
            message: format!("failed to read process capabilities: {e}"),
        })?;
        tracing::debug!(count = effective.len(), "Probed effective capabilities");
        Ok(Self { effective })
    }

    /// A fixed capability set.
    #[must_use]
    pub fn from_set(effective: CapsHashSet) -> Self {
        Self { effective }
    }

    /// Whether `name` (e.g. `CAP_SYS_ADMIN`) is effective. Unknown names are
    /// logged and treated as missing.
    #[must_use]
    pub fn has(&self, name: &str) -> bool {
        match name.to_uppercase().parse::<Capability>() {
            Ok(cap) => self.effective.contains(&cap),
            Err(_) => {
                tracing::warn!(capability = name, "Undefined capability");
                false
            }
        }
    }
}

/// Emit `lxc.cap.keep` with the permitted capabilities of the process.
///
/// The backend drops everything else. Without permitted capabilities the
/// value is `none`.
///
/// # Errors
///
/// Returns a configuration error if the directive is rejected.
pub fn configure(config: &mut CompiledConfig, spec: &Spec, enabled: bool) -> KennelResult<()> {
    if !enabled {
        tracing::warn!("capabilities feature is disabled - running with full privileges");
        return Ok(());
    }

    let keep: Vec<String> = spec
        .process
        .as_ref()
        .and_then(|p| p.capabilities.as_ref())
        .map(|c| c.permitted.iter().map(|name| keep_name(name)).collect())
        .unwrap_or_default();

    if keep.is_empty() {
        config.set("lxc.cap.keep", "none")
    } else {
        config.set("lxc.cap.keep", keep.join(" "))
    }
}

/// `CAP_NET_ADMIN` -> `net_admin`
fn keep_name(name: &str) -> String {
    let lower = name.to_lowercase();
    lower.strip_prefix("cap_").unwrap_or(&lower).to_string()
}
