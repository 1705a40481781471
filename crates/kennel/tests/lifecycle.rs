//! Lifecycle tests against a scripted monitor.
//!
//! The fake `kennel-start` plays the backend: it places a process named
//! `/.kennel/init` into the container cgroup below a temporary cgroup root
//! and writes to the sync FIFO once `start` opens it.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use kennel::runtime::{
    Container, ContainerConfig, Runtime, RuntimeConfig, RuntimeHooks, Timeouts,
};
use kennel_common::{ContainerId, KennelError};
use kennel_oci::ContainerStatus;
use kennel_oci::runtime::{Linux, Namespace, NamespaceType, Process, Root};
use kennel_oci::Spec;
use tempfile::TempDir;

struct Host {
    dir: TempDir,
}

impl Host {
    fn new() -> Self {
        Self {
            dir: tempfile::tempdir().unwrap(),
        }
    }

    fn path(&self, rel: &str) -> PathBuf {
        self.dir.path().join(rel)
    }

    fn monitor(&self, script: &str) {
        let libexec = self.path("libexec");
        std::fs::create_dir_all(&libexec).unwrap();
        let start = libexec.join("kennel-start");
        std::fs::write(&start, script).unwrap();
        std::fs::set_permissions(&start, std::fs::Permissions::from_mode(0o755)).unwrap();
    }

    fn config(&self, create_timeout: u64) -> RuntimeConfig {
        RuntimeConfig::default()
            .with_root(self.path("run"))
            .with_libexec(self.path("libexec"))
            .with_cgroup_root(self.path("cgroup"))
            .with_timeouts(Timeouts {
                create: create_timeout,
                start: 5,
                delete: 5,
            })
    }

    fn bundle(&self, spec: &Spec) -> PathBuf {
        let bundle = self.path("bundle");
        std::fs::create_dir_all(bundle.join("rootfs")).unwrap();
        std::fs::write(bundle.join("config.json"), serde_json::to_vec(spec).unwrap()).unwrap();
        bundle
    }

    fn container_config(&self, id: &str) -> ContainerConfig {
        let bundle = self.bundle(&spec());
        ContainerConfig::from_bundle(ContainerId::new(id).unwrap(), bundle).unwrap()
    }
}

fn spec() -> Spec {
    Spec {
        root: Some(Root {
            path: PathBuf::from("rootfs"),
            readonly: false,
        }),
        process: Some(Process {
            args: vec!["/bin/sh".to_string()],
            ..Default::default()
        }),
        hostname: Some("web".to_string()),
        linux: Some(Linux {
            namespaces: vec![
                Namespace {
                    ns_type: NamespaceType::Mount,
                    path: None,
                },
                Namespace {
                    ns_type: NamespaceType::Pid,
                    path: None,
                },
            ],
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// A monitor that creates the init process and releases it on start.
fn backend_script(cgroup_root: &Path) -> String {
    format!(
        r#"#!/bin/bash
cg="{}/kennel/$1"
mkdir -p "$cg"
mkfifo hold
(exec -a /.kennel/init cat <> hold > /dev/null) &
echo $! > "$cg/cgroup.procs"
(echo 1 > syncfifo) &
wait
"#,
        cgroup_root.display()
    )
}

#[tokio::test]
async fn create_start_delete() {
    if !Path::new("/bin/bash").exists() {
        return;
    }
    let host = Host::new();
    host.monitor(&backend_script(&host.path("cgroup")));

    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let hooks = RuntimeHooks {
        after_create: Some(Arc::new(move |container: Container| {
            let tx = tx.clone();
            async move {
                let _ = tx.send(container.id.to_string());
            }
            .boxed()
        })),
    };
    let runtime = Runtime::new(host.config(10)).unwrap().with_hooks(hooks);

    let container = runtime.create(host.container_config("web")).await.unwrap();
    assert_eq!(rx.recv().await.as_deref(), Some("web"));
    assert!(container.created_at.is_some());

    let config = std::fs::read_to_string(container.config_path()).unwrap();
    assert!(config.starts_with("lxc.uts.name = web\n"));
    assert!(config.contains("lxc.init.cmd = /.kennel/init\n"));
    assert!(config.contains("lxc.console.path = none\n"));

    let state = runtime.state("web").unwrap();
    assert_eq!(state.status, ContainerStatus::Created);
    assert!(state.pid.is_some());
    assert_eq!(runtime.list().unwrap(), vec!["web"]);

    let loaded = runtime.load("web").unwrap();
    runtime.start(&loaded).await.unwrap();

    let err = runtime.delete("web", false).await.unwrap_err();
    assert!(matches!(err, KennelError::InvalidState { .. }));

    runtime.delete("web", true).await.unwrap();
    assert!(runtime.list().unwrap().is_empty());
    assert!(runtime.load("web").unwrap_err().is_not_found());
}

#[tokio::test]
async fn monitor_exit_fails_create() {
    let host = Host::new();
    host.monitor("#!/bin/sh\nexit 1\n");
    let runtime = Runtime::new(host.config(10)).unwrap();

    let err = runtime.create(host.container_config("web")).await.unwrap_err();
    assert!(matches!(err, KennelError::Supervision { .. }), "{err}");

    // The runtime directory stays until deleted.
    assert_eq!(runtime.list().unwrap(), vec!["web"]);
    assert_eq!(runtime.state("web").unwrap().status, ContainerStatus::Stopped);
    runtime.delete("web", false).await.unwrap();
    assert!(runtime.list().unwrap().is_empty());
}

#[tokio::test]
async fn create_deadline_leaves_monitor_to_delete() {
    let host = Host::new();
    host.monitor("#!/bin/sh\nexec sleep 30\n");
    let runtime = Runtime::new(host.config(1)).unwrap();

    let err = runtime.create(host.container_config("web")).await.unwrap_err();
    assert!(matches!(err, KennelError::Timeout { .. }), "{err}");
    assert_eq!(runtime.state("web").unwrap().status, ContainerStatus::Creating);

    runtime.delete("web", true).await.unwrap();
    assert!(runtime.list().unwrap().is_empty());
}

#[tokio::test]
async fn create_rejects_existing_and_invalid() {
    let host = Host::new();
    host.monitor("#!/bin/sh\nexit 1\n");
    let runtime = Runtime::new(host.config(10)).unwrap();

    std::fs::create_dir_all(host.path("run/web")).unwrap();
    let err = runtime.create(host.container_config("web")).await.unwrap_err();
    assert!(matches!(err, KennelError::AlreadyExists { .. }));

    let mut config = host.container_config("db");
    config.spec.process = None;
    let err = runtime.create(config).await.unwrap_err();
    assert!(matches!(err, KennelError::Validation { .. }));
    assert_eq!(runtime.list().unwrap(), vec!["web"]);
}
