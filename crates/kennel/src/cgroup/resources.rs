//! Translation of OCI resources into cgroup2 interface files.

use kennel_common::{KennelError, KennelResult};
use kennel_oci::runtime::{DeviceCgroup, Resources, ThrottleDevice};

/// Default CFS period in microseconds.
const DEFAULT_CPU_PERIOD: u64 = 100_000;

/// Directive for a device rule: `(key, "<type> <major>:<minor> <access>")`.
pub(crate) fn device_rule(rule: &DeviceCgroup) -> KennelResult<(&'static str, String)> {
    let key = if rule.allow {
        "lxc.cgroup2.devices.allow"
    } else {
        "lxc.cgroup2.devices.deny"
    };

    let dev_type = match rule.device_type.as_deref() {
        None | Some("") => "a",
        Some(t @ ("a" | "b" | "c")) => t,
        Some(other) => {
            return Err(KennelError::config(format!("invalid device type {other:?}")));
        }
    };
    let access = rule.access.as_deref().unwrap_or("rwm");
    if access.is_empty() || !access.chars().all(|c| matches!(c, 'r' | 'w' | 'm')) {
        return Err(KennelError::config(format!("invalid device access {access:?}")));
    }

    let number = |n: Option<i64>| n.map_or_else(|| "*".to_string(), |n| n.to_string());
    Ok((
        key,
        format!(
            "{dev_type} {}:{} {access}",
            number(rule.major),
            number(rule.minor)
        ),
    ))
}

/// Cgroup2 interface files and values for the resource limits.
pub(crate) fn limits(res: &Resources) -> KennelResult<Vec<(&'static str, String)>> {
    let mut out = Vec::new();

    if let Some(mem) = &res.memory {
        if let Some(limit) = mem.limit {
            out.push(("memory.max", max_or(limit)));
        }
        if let Some(reservation) = mem.reservation {
            out.push(("memory.low", max_or(reservation)));
        }
        if let Some(swap) = mem.swap {
            // OCI counts memory plus swap, cgroup2 counts swap only.
            let value = match mem.limit {
                _ if swap < 0 => "max".to_string(),
                Some(limit) if limit > 0 => {
                    if swap < limit {
                        return Err(KennelError::config(format!(
                            "memory swap limit {swap} is lower than memory limit {limit}"
                        )));
                    }
                    (swap - limit).to_string()
                }
                _ => swap.to_string(),
            };
            out.push(("memory.swap.max", value));
        }
    }

    if let Some(cpu) = &res.cpu {
        if let Some(shares) = cpu.shares {
            out.push(("cpu.weight", shares_to_weight(shares).to_string()));
        }
        if cpu.quota.is_some() || cpu.period.is_some() {
            let quota = cpu.quota.filter(|q| *q > 0).map_or_else(|| "max".to_string(), |q| q.to_string());
            let period = cpu.period.unwrap_or(DEFAULT_CPU_PERIOD);
            out.push(("cpu.max", format!("{quota} {period}")));
        }
        if let Some(cpus) = cpu.cpus.as_deref().filter(|s| !s.is_empty()) {
            out.push(("cpuset.cpus", cpus.to_string()));
        }
        if let Some(mems) = cpu.mems.as_deref().filter(|s| !s.is_empty()) {
            out.push(("cpuset.mems", mems.to_string()));
        }
    }

    if let Some(pids) = &res.pids {
        out.push(("pids.max", max_or(pids.limit)));
    }

    if let Some(io) = &res.block_io {
        if let Some(weight) = io.weight {
            out.push(("io.weight", weight.to_string()));
        }
        let throttles: [(&[ThrottleDevice], &str); 4] = [
            (&io.throttle_read_bps_device, "rbps"),
            (&io.throttle_write_bps_device, "wbps"),
            (&io.throttle_read_iops_device, "riops"),
            (&io.throttle_write_iops_device, "wiops"),
        ];
        for (devices, key) in throttles {
            for dev in devices {
                out.push(("io.max", format!("{}:{} {key}={}", dev.major, dev.minor, dev.rate)));
            }
        }
    }

    Ok(out)
}

/// Non-positive limits mean unlimited.
fn max_or(value: i64) -> String {
    if value > 0 {
        value.to_string()
    } else {
        "max".to_string()
    }
}

/// Map cgroup v1 shares (2-262144) onto cgroup2 weight (1-10000).
fn shares_to_weight(shares: u64) -> u64 {
    let shares = shares.clamp(2, 262_144);
    1 + ((shares - 2) * 9999) / 262_142
}
