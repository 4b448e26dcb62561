//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Resource usage read from the container's cgroup
//!
//! Each reading tries the unified (v2) file first and falls back to the
//! legacy (v1) controller file.

use std::collections::BTreeMap;
use std::fs;
use std::time::Duration;

use bytesize::ByteSize;
use nix::unistd::{sysconf, SysconfVar};
use serde::Serialize;

use crate::engine::container::{Container, Require};
use crate::error::{Error, Operation, Result};
use crate::ffi::marshal;

/// v1 reports "no limit" as the largest page-aligned counter value.
const V1_UNLIMITED: u64 = 0x7FFF_FFFF_FFFF_F000;

const KMEM_LIMIT: &str = "memory.kmem.limit_in_bytes";

/// CPU time split by mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CpuStats {
    pub user: Duration,
    pub system: Duration,
}

/// Bytes through one host-side interface, as seen from the container
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct InterfaceStats {
    pub rx: ByteSize,
    pub tx: ByteSize,
}

impl Container {
    /// First of `keys` the cgroup has, with its index.
    fn cgroup_first(&self, keys: &[&str]) -> Result<Option<(usize, String)>> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let backend = inner.backend.as_mut();
        for (i, key) in keys.iter().enumerate() {
            if let Some(value) = marshal::read_sized_string(|buf| backend.get_cgroup_item(key, buf)) {
                return Ok(Some((i, value)));
            }
        }
        Ok(None)
    }

    fn cgroup_set_first(&self, writes: &[(&str, String)]) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        for (key, value) in writes {
            if inner.backend.set_cgroup_item(key, value) {
                return Ok(());
            }
        }
        Err(inner.fail(Operation::SetCgroupItem))
    }

    fn cgroup_bytes(&self, keys: &[&str], what: &'static str) -> Result<Option<ByteSize>> {
        match self.cgroup_first(keys)? {
            Some((_, value)) => parse_limit(&value),
            None => Err(Error::NotSupported(what)),
        }
    }

    fn set_cgroup_limit(&self, v2: &str, v1: &str, limit: Option<ByteSize>) -> Result<()> {
        let (v2_value, v1_value) = match limit {
            Some(size) => (size.as_u64().to_string(), size.as_u64().to_string()),
            None => ("max".to_string(), "-1".to_string()),
        };
        self.cgroup_set_first(&[(v2, v2_value), (v1, v1_value)])
    }

    pub fn memory_usage(&self) -> Result<ByteSize> {
        self.cgroup_bytes(&["memory.current", "memory.usage_in_bytes"], "memory accounting")?
            .ok_or(Error::NotSupported("memory accounting"))
    }

    /// Hard memory limit, `None` when unlimited.
    pub fn memory_limit(&self) -> Result<Option<ByteSize>> {
        self.cgroup_bytes(&["memory.max", "memory.limit_in_bytes"], "memory limit")
    }

    pub fn set_memory_limit(&self, limit: Option<ByteSize>) -> Result<()> {
        self.set_cgroup_limit("memory.max", "memory.limit_in_bytes", limit)
    }

    /// Throttling threshold (`memory.high` / `memory.soft_limit_in_bytes`).
    pub fn soft_memory_limit(&self) -> Result<Option<ByteSize>> {
        self.cgroup_bytes(&["memory.high", "memory.soft_limit_in_bytes"], "soft memory limit")
    }

    pub fn set_soft_memory_limit(&self, limit: Option<ByteSize>) -> Result<()> {
        self.set_cgroup_limit("memory.high", "memory.soft_limit_in_bytes", limit)
    }

    /// Swap usage. On v1 this is memory plus swap.
    pub fn memory_swap_usage(&self) -> Result<ByteSize> {
        self.cgroup_bytes(&["memory.swap.current", "memory.memsw.usage_in_bytes"], "swap accounting")?
            .ok_or(Error::NotSupported("swap accounting"))
    }

    pub fn memory_swap_limit(&self) -> Result<Option<ByteSize>> {
        self.cgroup_bytes(&["memory.swap.max", "memory.memsw.limit_in_bytes"], "swap limit")
    }

    pub fn set_memory_swap_limit(&self, limit: Option<ByteSize>) -> Result<()> {
        self.set_cgroup_limit("memory.swap.max", "memory.memsw.limit_in_bytes", limit)
    }

    pub fn kernel_memory_usage(&self) -> Result<ByteSize> {
        match self.cgroup_first(&["memory.stat", "memory.kmem.usage_in_bytes"])? {
            Some((0, stat)) => match stat_field(&stat, "kernel") {
                Some(bytes) => Ok(ByteSize::b(bytes)),
                None => Err(Error::NotSupported("kernel memory accounting")),
            },
            Some((_, value)) => Ok(ByteSize::b(parse_u64(&value)?)),
            None => Err(Error::NotSupported("kernel memory accounting")),
        }
    }

    /// Kernel memory limit. Only the legacy memory controller has one.
    pub fn kernel_memory_limit(&self) -> Result<Option<ByteSize>> {
        self.cgroup_bytes(&[KMEM_LIMIT], "kernel memory limit")
    }

    pub fn set_kernel_memory_limit(&self, limit: Option<ByteSize>) -> Result<()> {
        if self.cgroup_first(&[KMEM_LIMIT])?.is_none() {
            return Err(Error::NotSupported("kernel memory limit"));
        }
        let value = limit.map_or_else(|| "-1".to_string(), |size| size.as_u64().to_string());
        self.cgroup_set_first(&[(KMEM_LIMIT, value)])
    }

    /// Total CPU time consumed by the container.
    pub fn cpu_time(&self) -> Result<Duration> {
        match self.cgroup_first(&["cpu.stat", "cpuacct.usage"])? {
            Some((0, stat)) => stat_field(&stat, "usage_usec")
                .map(Duration::from_micros)
                .ok_or_else(|| Error::parse("cpu.stat", stat)),
            Some((_, value)) => Ok(Duration::from_nanos(parse_u64(&value)?)),
            None => Err(Error::NotSupported("cpu accounting")),
        }
    }

    /// CPU time per CPU. Only the legacy cpuacct controller reports this.
    pub fn cpu_time_per_cpu(&self) -> Result<BTreeMap<usize, Duration>> {
        let value = match self.cgroup_first(&["cpuacct.usage_percpu"])? {
            Some((_, value)) => value,
            None => return Err(Error::NotSupported("per-cpu accounting")),
        };

        value
            .split_whitespace()
            .enumerate()
            .map(|(cpu, ns)| Ok((cpu, Duration::from_nanos(parse_u64(ns)?))))
            .collect()
    }

    pub fn cpu_stats(&self) -> Result<CpuStats> {
        match self.cgroup_first(&["cpu.stat", "cpuacct.stat"])? {
            Some((0, stat)) => {
                let user = stat_field(&stat, "user_usec");
                let system = stat_field(&stat, "system_usec");
                match (user, system) {
                    (Some(u), Some(s)) => Ok(CpuStats {
                        user: Duration::from_micros(u),
                        system: Duration::from_micros(s),
                    }),
                    _ => Err(Error::parse("cpu.stat", stat)),
                }
            }
            Some((_, stat)) => cpuacct_stats(&stat, clock_tick()),
            None => Err(Error::NotSupported("cpu accounting")),
        }
    }

    /// Bytes read and written by the container across all block devices.
    pub fn blkio_usage(&self) -> Result<ByteSize> {
        match self.cgroup_first(&["io.stat", "blkio.throttle.io_service_bytes"])? {
            Some((0, stat)) => io_stat_bytes(&stat).map(ByteSize::b),
            Some((_, value)) => value
                .lines()
                .find_map(|line| line.strip_prefix("Total "))
                .map(parse_u64)
                .transpose()?
                .map(ByteSize::b)
                .ok_or(Error::NotSupported("block io accounting")),
            None => Err(Error::NotSupported("block io accounting")),
        }
    }

    /// Traffic per network device, read from the host side of each link.
    /// `rx`/`tx` are from the container's point of view.
    pub fn interface_stats(&self) -> Result<BTreeMap<String, InterfaceStats>> {
        let mut stats = BTreeMap::new();

        for index in self.config_item_values("lxc.net")? {
            let kind = match self.running_config_item(&format!("lxc.net.{}.type", index))? {
                Some(kind) => kind,
                None => continue,
            };
            let key = if kind == "veth" {
                format!("lxc.net.{}.veth.pair", index)
            } else {
                format!("lxc.net.{}.link", index)
            };
            let device = match self.running_config_item(&key)? {
                Some(device) if !device.is_empty() => device,
                _ => continue,
            };

            // host tx is container rx
            let rx = read_counter(&device, "tx_bytes")?;
            let tx = read_counter(&device, "rx_bytes")?;
            stats.insert(device, InterfaceStats { rx, tx });
        }

        Ok(stats)
    }
}

fn read_counter(device: &str, counter: &str) -> Result<ByteSize> {
    let path = format!("/sys/class/net/{}/statistics/{}", device, counter);
    let content = fs::read_to_string(path)?;
    Ok(ByteSize::b(parse_u64(&content)?))
}

fn parse_u64(value: &str) -> Result<u64> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::parse("cgroup value", value))
}

/// Parse a byte limit; "max" and the v1 sentinel mean unlimited.
fn parse_limit(value: &str) -> Result<Option<ByteSize>> {
    let value = value.trim();
    if value == "max" {
        return Ok(None);
    }
    let bytes = parse_u64(value)?;
    if bytes >= V1_UNLIMITED {
        return Ok(None);
    }
    Ok(Some(ByteSize::b(bytes)))
}

/// Value of `name` in a flat-keyed stat file ("name value" per line).
fn stat_field(stat: &str, name: &str) -> Option<u64> {
    stat.lines().find_map(|line| {
        let mut parts = line.split_whitespace();
        if parts.next() == Some(name) {
            parts.next().and_then(|v| v.parse().ok())
        } else {
            None
        }
    })
}

/// User and system time from v1 `cpuacct.stat`, counted in clock ticks.
fn cpuacct_stats(stat: &str, tick: Duration) -> Result<CpuStats> {
    let tick_ns = tick.as_nanos() as u64;
    match (stat_field(stat, "user"), stat_field(stat, "system")) {
        (Some(u), Some(s)) => Ok(CpuStats {
            user: Duration::from_nanos(tick_ns.saturating_mul(u)),
            system: Duration::from_nanos(tick_ns.saturating_mul(s)),
        }),
        _ => Err(Error::parse("cpuacct.stat", stat)),
    }
}

/// Bytes read plus bytes written over every device line of v2 `io.stat`.
fn io_stat_bytes(stat: &str) -> Result<u64> {
    let mut total = 0u64;
    for field in stat.split_whitespace() {
        if let Some(v) = field
            .strip_prefix("rbytes=")
            .or_else(|| field.strip_prefix("wbytes="))
        {
            total = total.saturating_add(parse_u64(v)?);
        }
    }
    Ok(total)
}

fn clock_tick() -> Duration {
    let hz = match sysconf(SysconfVar::CLK_TCK) {
        Ok(Some(hz)) if hz > 0 => hz as u64,
        _ => 100,
    };
    Duration::from_nanos(1_000_000_000 / hz)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_limit() {
        assert_eq!(parse_limit("max\n").unwrap(), None);
        assert_eq!(parse_limit("9223372036854771712").unwrap(), None);
        assert_eq!(parse_limit("1048576").unwrap(), Some(ByteSize::mib(1)));
        assert!(parse_limit("lots").is_err());
    }

    #[test]
    fn test_stat_field() {
        let stat = "usage_usec 1500\nuser_usec 1000\nsystem_usec 500\n";
        assert_eq!(stat_field(stat, "usage_usec"), Some(1500));
        assert_eq!(stat_field(stat, "system_usec"), Some(500));
        assert_eq!(stat_field(stat, "user"), None);
        assert_eq!(stat_field("user 12\nsystem 3", "user"), Some(12));
    }

    #[test]
    fn test_cpuacct_ticks_beyond_u32() {
        let ticks = u32::MAX as u64 + 10;
        let stat = format!("user {}\nsystem 3\n", ticks);
        let stats = cpuacct_stats(&stat, Duration::from_millis(10)).unwrap();
        assert_eq!(stats.user, Duration::from_millis(10 * ticks));
        assert_eq!(stats.system, Duration::from_millis(30));
        assert!(cpuacct_stats("user 1\n", Duration::from_millis(10)).is_err());
    }

    #[test]
    fn test_io_stat_bytes_sums_devices() {
        let stat = "8:0 rbytes=4096 wbytes=1024 rios=1 wios=1\n8:16 rbytes=10 wbytes=0\n";
        assert_eq!(io_stat_bytes(stat).unwrap(), 5130);

        let huge = format!("8:0 rbytes={} wbytes={}\n", u64::MAX, u64::MAX);
        assert_eq!(io_stat_bytes(&huge).unwrap(), u64::MAX);
    }

    #[test]
    fn test_clock_tick_is_sane() {
        let tick = clock_tick();
        assert!(tick > Duration::ZERO);
        assert!(tick <= Duration::from_millis(100));
    }
}
