//! Linux namespace configuration.
//!
//! The backend creates and joins namespaces; this module decides which ones
//! from the bundle config and checks that the container does not share namespaces
//! with the runtime where that is unsafe.

use std::collections::HashSet;
use std::os::unix::fs::MetadataExt;
use std::path::Path;

use kennel_common::{KennelError, KennelResult};
use kennel_oci::Spec;
use kennel_oci::runtime::{IdMapping, NamespaceType};

use crate::compiler::CompiledConfig;
use crate::filesystem::path_str;

/// Whether the container would run in the runtime's own namespace of the
/// given type.
///
/// A namespace type absent from the config is inherited from the runtime. An
/// entry with a path is shared if it refers to the same namespace as the
/// calling process.
///
/// # Errors
///
/// Returns a validation error if a namespace path can't be inspected.
pub fn shares_runtime_namespace(spec: &Spec, ns_type: NamespaceType) -> KennelResult<bool> {
    let Some(ns) = spec.namespace(ns_type) else {
        return Ok(true);
    };
    let Some(path) = ns.path.as_deref() else {
        return Ok(false);
    };
    let own = Path::new("/proc/self/ns").join(ns_type.proc_name());
    same_file(path, &own)
}

fn same_file(a: &Path, b: &Path) -> KennelResult<bool> {
    let stat = |p: &Path| {
        std::fs::metadata(p).map_err(|e| {
            KennelError::validation(format!("failed to inspect namespace {}: {e}", p.display()))
        })
    };
    let (a, b) = (stat(a)?, stat(b)?);
    Ok(a.dev() == b.dev() && a.ino() == b.ino())
}

/// Namespace and ID mapping directives.
///
/// Namespaces with a path are joined, all others are created by the backend.
///
/// # Errors
///
/// Returns a configuration error if a namespace type is listed twice.
pub fn configure(config: &mut CompiledConfig, spec: &Spec) -> KennelResult<()> {
    let Some(linux) = spec.linux() else {
        return Ok(());
    };

    let mut seen = HashSet::new();
    let mut clone = Vec::new();
    for ns in &linux.namespaces {
        if !seen.insert(ns.ns_type) {
            return Err(KennelError::config(format!(
                "duplicate namespace {}",
                ns.ns_type
            )));
        }
        let name = ns.ns_type.proc_name();
        match ns.path.as_deref() {
            Some(path) => config.set(format!("lxc.namespace.share.{name}"), path_str(path)?)?,
            None => clone.push(name),
        }
    }
    if !clone.is_empty() {
        config.set("lxc.namespace.clone", clone.join(" "))?;
    }

    for (kind, mappings) in [('u', &linux.uid_mappings), ('g', &linux.gid_mappings)] {
        for IdMapping {
            container_id,
            host_id,
            size,
        } in mappings
        {
            config.set("lxc.idmap", format!("{kind} {container_id} {host_id} {size}"))?;
        }
    }
    Ok(())
}
