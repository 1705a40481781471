//! Device nodes and device cgroup rules.

use std::fmt::Write as _;
use std::path::PathBuf;

use kennel_common::KennelResult;
use kennel_common::paths::files;
use kennel_oci::Spec;
use kennel_oci::runtime::{Device, DeviceCgroup, User};

use super::write_new_file;
use crate::compiler::CompiledConfig;
use crate::runtime::Container;

/// Devices every container gets: path, major, minor.
const DEFAULT_DEVICES: [(&str, i64, i64); 6] = [
    ("/dev/null", 1, 3),
    ("/dev/zero", 1, 5),
    ("/dev/full", 1, 7),
    ("/dev/random", 1, 8),
    ("/dev/urandom", 1, 9),
    ("/dev/tty", 5, 0),
];

/// Mode of added default devices.
const DEFAULT_DEVICE_MODE: u32 = 0o666;

/// Mode of declared devices without a file mode.
const DECLARED_DEVICE_MODE: u32 = 0o600;

/// Devices to create in the container and the cgroup rules granting access
/// to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DevicePlan {
    /// Device nodes, declared devices first.
    pub devices: Vec<Device>,
    /// Device cgroup rules, declared rules first.
    pub cgroup_rules: Vec<DeviceCgroup>,
}

impl DevicePlan {
    /// Declared devices plus the defaults the config does not declare.
    #[must_use]
    pub fn new(spec: &Spec) -> Self {
        let linux = spec.linux();
        let mut devices = linux.map(|l| l.devices.clone()).unwrap_or_default();
        let mut cgroup_rules = linux
            .and_then(|l| l.resources.as_ref())
            .map(|r| r.devices.clone())
            .unwrap_or_default();

        // /dev/ptmx and the /dev/pts/N slots.
        cgroup_rules.push(allow_rule(5, Some(2)));
        cgroup_rules.push(allow_rule(88, None));

        let user = spec.process.as_ref().map(|p| p.user.clone()).unwrap_or_default();
        for (path, major, minor) in DEFAULT_DEVICES {
            if devices.iter().any(|d| d.path.as_os_str() == path) {
                continue;
            }
            devices.push(Device {
                path: PathBuf::from(path),
                device_type: "c".to_string(),
                major,
                minor,
                file_mode: Some(DEFAULT_DEVICE_MODE),
                uid: Some(user.uid),
                gid: Some(user.gid),
            });
            cgroup_rules.push(allow_rule(major, Some(minor)));
        }

        Self {
            devices,
            cgroup_rules,
        }
    }

    /// `devices.txt` contents: `path type major minor mode uid:gid` per line.
    #[must_use]
    pub fn table(&self, user: &User) -> String {
        let mut out = String::new();
        for dev in &self.devices {
            let _ = writeln!(
                out,
                "{} {} {} {} {:o} {}:{}",
                dev.path.display(),
                dev.device_type,
                dev.major,
                dev.minor,
                dev.file_mode.unwrap_or(DECLARED_DEVICE_MODE),
                dev.uid.unwrap_or(user.uid),
                dev.gid.unwrap_or(user.gid),
            );
        }
        out
    }

    /// Disable backend device management and write `devices.txt` for the
    /// mount hook.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the table can't be written.
    pub fn configure(&self, config: &mut CompiledConfig, container: &Container) -> KennelResult<()> {
        config.set("lxc.autodev", "0")?;

        let user = container
            .spec
            .process
            .as_ref()
            .map(|p| p.user.clone())
            .unwrap_or_default();
        write_new_file(
            &container.runtime_dir.join(files::DEVICES),
            self.table(&user).as_bytes(),
            0o600,
        )
    }
}

fn allow_rule(major: i64, minor: Option<i64>) -> DeviceCgroup {
    DeviceCgroup {
        allow: true,
        device_type: Some("c".to_string()),
        major: Some(major),
        minor,
        access: Some("rwm".to_string()),
    }
}
