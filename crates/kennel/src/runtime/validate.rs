//! Bundle config validation, before anything is created on disk.

use std::path::{Component, Path, PathBuf};

use kennel_common::{KennelError, KennelResult};
use kennel_oci::runtime::NamespaceType;

use super::container::ContainerConfig;
use crate::cgroup::cgroup_dir;
use crate::namespace::shares_runtime_namespace;

/// Check a container config and fill in defaults.
///
/// # Errors
///
/// Returns a validation error for specs the runtime can't run.
pub fn validate(config: &mut ContainerConfig) -> KennelResult<()> {
    let id = config.id.clone();
    let spec = &mut config.spec;

    match &spec.root {
        Some(root) if !root.path.as_os_str().is_empty() => {}
        _ => return Err(KennelError::validation("root.path is required")),
    }

    let Some(process) = spec.process.as_mut() else {
        return Err(KennelError::validation("process is required"));
    };
    if process.args.is_empty() {
        return Err(KennelError::validation("process.args must not be empty"));
    }
    if process.cwd.as_os_str().is_empty() {
        tracing::info!(container_id = %id, "process.cwd not set, using /");
        process.cwd = PathBuf::from("/");
    }

    if spec.linux.is_none() {
        spec.linux = Some(kennel_oci::runtime::Linux::default());
    }

    let cgroup = cgroup_dir(&id, spec);
    if !stays_below_root(&cgroup) {
        return Err(KennelError::validation(format!(
            "linux.cgroupsPath resolves to {cgroup}, outside the cgroup root"
        )));
    }

    if shares_runtime_namespace(spec, NamespaceType::Mount)? {
        return Err(KennelError::validation(
            "container must not share the runtime's mount namespace",
        ));
    }
    if shares_runtime_namespace(spec, NamespaceType::Pid)? {
        tracing::warn!(container_id = %id, "Container shares the runtime's PID namespace");
    }

    Ok(())
}

/// Whether a cgroup directory relative to the cgroup root names a
/// descendant of it.
fn stays_below_root(dir: &str) -> bool {
    let mut components = Path::new(dir).components().peekable();
    components.peek().is_some() && components.all(|c| matches!(c, Component::Normal(_)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::tests::capture_warnings;
    use kennel_common::ContainerId;
    use kennel_oci::Spec;
    use kennel_oci::runtime::{Linux, Namespace, Process, Root};

    fn config(spec: Spec) -> ContainerConfig {
        ContainerConfig {
            id: ContainerId::new("c1").unwrap(),
            spec,
            bundle: PathBuf::from("/bundles/c1"),
            console_socket: None,
        }
    }

    fn namespace(ns_type: NamespaceType, path: Option<&str>) -> Namespace {
        Namespace {
            ns_type,
            path: path.map(PathBuf::from),
        }
    }

    fn valid_spec() -> Spec {
        Spec {
            root: Some(Root {
                path: PathBuf::from("rootfs"),
                readonly: false,
            }),
            process: Some(Process {
                args: vec!["/bin/sh".to_string()],
                ..Default::default()
            }),
            linux: Some(Linux {
                namespaces: vec![
                    namespace(NamespaceType::Mount, None),
                    namespace(NamespaceType::Pid, None),
                ],
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_cwd() {
        let mut config = config(valid_spec());
        validate(&mut config).unwrap();
        let process = config.spec.process.unwrap();
        assert_eq!(process.cwd, PathBuf::from("/"));
    }

    #[test]
    fn requires_root_and_args() {
        let mut spec = valid_spec();
        spec.root = None;
        assert!(matches!(validate(&mut config(spec)), Err(KennelError::Validation { .. })));

        let mut spec = valid_spec();
        if let Some(root) = spec.root.as_mut() {
            root.path = PathBuf::new();
        }
        assert!(validate(&mut config(spec)).is_err());

        let mut spec = valid_spec();
        spec.process = None;
        assert!(validate(&mut config(spec)).is_err());

        let mut spec = valid_spec();
        if let Some(process) = spec.process.as_mut() {
            process.args.clear();
        }
        assert!(validate(&mut config(spec)).is_err());
    }

    #[test]
    fn rejects_shared_mount_namespace() {
        let mut spec = valid_spec();
        spec.linux = None;
        assert!(validate(&mut config(spec)).is_err());

        let mut spec = valid_spec();
        if let Some(linux) = spec.linux.as_mut() {
            linux.namespaces = vec![namespace(NamespaceType::Mount, Some("/proc/self/ns/mnt"))];
        }
        assert!(validate(&mut config(spec)).is_err());
    }

    #[test]
    fn accepts_shared_pid_namespace() {
        let mut spec = valid_spec();
        if let Some(linux) = spec.linux.as_mut() {
            linux.namespaces = vec![namespace(NamespaceType::Mount, None)];
        }
        let (result, logs) = capture_warnings(|| validate(&mut config(spec)));
        result.unwrap();
        assert!(logs.contains("WARN"));
        assert!(logs.contains("Container shares the runtime's PID namespace"));

        let (result, logs) = capture_warnings(|| validate(&mut config(valid_spec())));
        result.unwrap();
        assert!(logs.is_empty());
    }

    #[test]
    fn rejects_cgroups_path_outside_root() {
        for path in ["..", "/", "/../escape", "kennel/../../escape", "../x:kennel:c1", "x:../..:c1"] {
            let mut spec = valid_spec();
            if let Some(linux) = spec.linux.as_mut() {
                linux.cgroups_path = Some(path.to_string());
            }
            let err = validate(&mut config(spec)).unwrap_err();
            assert!(matches!(err, KennelError::Validation { .. }), "{path}");
        }

        for path in ["", "/pods/c1", "machine.slice:kennel:c1"] {
            let mut spec = valid_spec();
            if let Some(linux) = spec.linux.as_mut() {
                linux.cgroups_path = Some(path.to_string());
            }
            validate(&mut config(spec)).unwrap();
        }
    }
}
