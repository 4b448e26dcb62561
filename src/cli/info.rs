//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! `lxcctl info` and `lxcctl ips` command implementations

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::Args;
use serde_json::json;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use walkdir::WalkDir;

use lxcctl::{Container, Error};

use crate::cli::Session;

/// Arguments for the `info` command
#[derive(Args, Debug)]
pub struct InfoArgs {
    /// Container name
    pub name: String,

    /// Format output with placeholders: {{.Name}}, {{.State}}, {{.Pid}}, {{.ConfigFile}}
    #[arg(short, long)]
    pub format: Option<String>,

    /// Display the total size of the root filesystem
    #[arg(short, long)]
    pub size: bool,
}

/// Arguments for the `ips` command
#[derive(Args, Debug)]
pub struct IpsArgs {
    /// Container name
    pub name: String,

    /// Only addresses of this interface
    #[arg(short, long)]
    pub interface: Option<String>,

    /// Only IPv4 addresses
    #[arg(short = '4', long, conflicts_with = "ipv6")]
    pub ipv4: bool,

    /// Only IPv6 addresses
    #[arg(short = '6', long)]
    pub ipv6: bool,
}

pub async fn execute(args: InfoArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;

    let state = container.state();
    let pid = container.init_pid().map(|p| p.as_raw());
    let config_file = container.config_file_name();

    if let Some(ref format) = args.format {
        let formatted = format
            .replace("{{.Name}}", &container.name())
            .replace("{{.State}}", state.as_str())
            .replace("{{.Pid}}", &pid.map_or_else(|| "-".to_string(), |p| p.to_string()))
            .replace(
                "{{.ConfigFile}}",
                &config_file.as_ref().map(|p| p.display().to_string()).unwrap_or_default(),
            );
        println!("{}", formatted);
        return Ok(ExitCode::SUCCESS);
    }

    let running = state.is_active();
    let rootfs = container.config_item("lxc.rootfs.path")?;
    let snapshots = match container.snapshots() {
        Ok(list) => list,
        Err(Error::NoSnapshot) => Vec::new(),
        Err(e) => return Err(e).context("Failed to list snapshots"),
    };

    let mut output = json!({
        "Name": container.name(),
        "State": state,
        "Pid": pid,
        "Lifecycle": container.lifecycle(),
        "ConfigFile": config_file,
        "ConfigPath": container.config_path(),
        "Hostname": container.config_item("lxc.uts.name")?,
        "RootFs": rootfs,
        "Snapshots": snapshots,
        "Daemonize": container.daemonize(),
    });

    if running {
        output["Network"] = json!({
            "Interfaces": container.interfaces().unwrap_or_default(),
            "IPv4": container.ipv4_addresses().unwrap_or_default(),
            "IPv6": container.ipv6_addresses().unwrap_or_default(),
        });
        output["Resources"] = resources(&container);
    }

    if args.size {
        let size = rootfs
            .as_deref()
            .map(rootfs_dir)
            .filter(|p| p.is_dir())
            .map(|p| ByteSize::b(dir_size(&p)).to_string());
        output["RootFsSize"] = json!(size);
    }

    println!("{}", serde_json::to_string_pretty(&output)?);
    Ok(ExitCode::SUCCESS)
}

/// Usage figures; each is null when the cgroup does not expose it.
fn resources(container: &Container) -> serde_json::Value {
    json!({
        "MemoryUsage": container.memory_usage().ok().map(|b| b.to_string()),
        "MemoryLimit": container.memory_limit().ok().flatten().map(|b| b.to_string()),
        "SwapUsage": container.memory_swap_usage().ok().map(|b| b.to_string()),
        "KernelMemoryUsage": container.kernel_memory_usage().ok().map(|b| b.to_string()),
        "CpuTime": container.cpu_time().ok().map(|d| format!("{:?}", d)),
        "Cpu": container.cpu_stats().ok(),
        "BlkIO": container.blkio_usage().ok().map(|b| b.to_string()),
        "InterfaceStats": container.interface_stats().ok(),
    })
}

/// Directory part of an `lxc.rootfs.path` value (`[type:]path`).
fn rootfs_dir(value: &str) -> PathBuf {
    match value.split_once(':') {
        Some((kind, path)) if !kind.contains('/') => PathBuf::from(path),
        _ => PathBuf::from(value),
    }
}

fn dir_size(path: &Path) -> u64 {
    WalkDir::new(path)
        .follow_links(false)
        .into_iter()
        .filter_map(|e| e.ok())
        .filter_map(|e| e.metadata().ok())
        .filter(|m| m.is_file())
        .map(|m| m.len())
        .sum()
}

pub async fn ips(args: IpsArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;

    let family = if args.ipv4 {
        Some("inet")
    } else if args.ipv6 {
        Some("inet6")
    } else {
        None
    };
    let addresses = container
        .ip_addresses_with(args.interface.as_deref(), family, 0)
        .with_context(|| format!("Failed to read addresses of {}", args.name))?;

    for address in addresses {
        println!("{}", address);
    }
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rootfs_dir() {
        assert_eq!(rootfs_dir("dir:/var/lib/lxc/web/rootfs"), PathBuf::from("/var/lib/lxc/web/rootfs"));
        assert_eq!(rootfs_dir("/var/lib/lxc/web/rootfs"), PathBuf::from("/var/lib/lxc/web/rootfs"));
        assert_eq!(rootfs_dir("overlayfs:/a:/b"), PathBuf::from("/a:/b"));
    }

    #[test]
    fn test_dir_size() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a"), [0u8; 100]).unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b"), [0u8; 28]).unwrap();
        assert_eq!(dir_size(dir.path()), 128);
    }
}
