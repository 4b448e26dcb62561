//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container runtime integration
//!
//! [`Runtime`] is the process-wide side of the container library (version,
//! global config, discovery) and hands out one [`ContainerBackend`] per
//! container handle. Backends mirror the library's calls one to one: plain
//! `bool`/`i32` results, the two-call sizing protocol for string getters,
//! and no policy. Preconditions, locking and error mapping live in
//! [`Container`](crate::Container).

pub mod memory;
#[cfg(liblxc)]
pub mod native;

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::os::fd::RawFd;
use std::path::Path;
use std::process::{Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::engine::{AttachOptions, MigrateCommand, MigrateOptions, Snapshot};
use crate::error::{Error, Result};

pub use memory::MemoryRuntime;
#[cfg(liblxc)]
pub use native::NativeRuntime;

/// Which containers a listing call returns.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListFilter {
    Defined,
    Active,
    All,
}

/// The process-wide runtime.
pub trait Runtime: Send + Sync {
    /// Short name for logs and `doctor`.
    fn name(&self) -> &'static str;

    /// Allocate a handle for `name` under `lxcpath` (or the default path).
    fn open(&self, name: &str, lxcpath: Option<&Path>) -> Result<Box<dyn ContainerBackend>>;

    fn version(&self) -> String;

    fn global_config_item(&self, key: &str) -> Option<String>;

    fn config_item_is_supported(&self, key: &str) -> bool;

    fn has_api_extension(&self, extension: &str) -> bool;

    fn list_containers(&self, lxcpath: Option<&Path>, filter: ListFilter) -> Result<Vec<String>>;

    fn default_config_path(&self) -> Option<String> {
        self.global_config_item("lxc.lxcpath")
    }

    fn default_lvm_vg(&self) -> Option<String> {
        self.global_config_item("lxc.bdev.lvm.vg")
    }

    fn default_zfs_root(&self) -> Option<String> {
        self.global_config_item("lxc.bdev.zfs.root")
    }

    fn defined_container_names(&self, lxcpath: Option<&Path>) -> Result<Vec<String>> {
        self.list_containers(lxcpath, ListFilter::Defined)
    }

    fn active_container_names(&self, lxcpath: Option<&Path>) -> Result<Vec<String>> {
        self.list_containers(lxcpath, ListFilter::Active)
    }

    fn container_names(&self, lxcpath: Option<&Path>) -> Result<Vec<String>> {
        self.list_containers(lxcpath, ListFilter::All)
    }
}

/// One container handle inside the runtime.
///
/// Every method maps onto a single library call. String arguments have been
/// checked for interior NULs by the caller. No method may be called after
/// [`release`](ContainerBackend::release).
pub trait ContainerBackend: Send {
    fn is_defined(&mut self) -> bool;
    /// Runtime state name, e.g. `"RUNNING"`.
    fn state(&mut self) -> Option<String>;
    fn is_running(&mut self) -> bool;
    fn freeze(&mut self) -> bool;
    fn unfreeze(&mut self) -> bool;
    /// Init pid, or `<= 0` when not running.
    fn init_pid(&mut self) -> i32;

    // Descriptor getters return a new fd owned by the caller, or a negative
    // errno.
    fn init_pidfd(&mut self) -> i32;
    fn devpts_fd(&mut self) -> i32;
    fn seccomp_notify_fd(&mut self) -> i32;
    fn seccomp_notify_fd_active(&mut self) -> i32;

    fn load_config(&mut self, alt_file: Option<&Path>) -> bool;
    fn save_config(&mut self, alt_file: Option<&Path>) -> bool;
    fn start(&mut self, use_init: bool, argv: &[String]) -> bool;
    fn stop(&mut self) -> bool;
    fn want_daemonize(&mut self, state: bool) -> bool;
    fn want_close_all_fds(&mut self, state: bool) -> bool;
    fn daemonize(&mut self) -> bool;
    fn config_file_name(&mut self) -> Option<String>;
    /// Block until `state` is reached. `timeout` is seconds, `-1` forever.
    fn wait(&mut self, state: &str, timeout: i32) -> bool;
    fn set_config_item(&mut self, key: &str, value: &str) -> bool;
    fn destroy(&mut self) -> bool;
    fn destroy_with_snapshots(&mut self) -> bool;
    fn create(&mut self, template: &str, bdevtype: Option<&str>, flags: i32, argv: &[String]) -> bool;
    fn rename(&mut self, new_name: &str) -> bool;
    /// `timeout` 0 requests the signal only; otherwise wait up to that many seconds.
    fn reboot(&mut self, timeout: i32) -> bool;
    fn shutdown(&mut self, timeout: i32) -> bool;
    fn clear_config(&mut self);
    fn clear_config_item(&mut self, key: &str) -> bool;

    // Sized getters: called with `None` they return the value length (<= 0
    // when absent); called with a buffer they fill it NUL-terminated.
    fn get_config_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32;
    fn get_keys(&mut self, prefix: Option<&str>, buf: Option<&mut [u8]>) -> i32;
    fn get_cgroup_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32;

    fn get_running_config_item(&mut self, key: &str) -> Option<String>;
    fn get_interfaces(&mut self) -> Option<Vec<String>>;
    fn get_ips(&mut self, interface: Option<&str>, family: Option<&str>, scope: i32) -> Option<Vec<String>>;
    fn set_cgroup_item(&mut self, key: &str, value: &str) -> bool;
    fn config_path(&mut self) -> Option<String>;
    fn set_config_path(&mut self, path: &Path) -> bool;
    fn clone_to(&mut self, new_name: &str, lxcpath: Option<&Path>, flags: i32, bdevtype: Option<&str>) -> bool;
    /// Allocate a tty; returns the pty fd (caller owned) or negative.
    fn console_getfd(&mut self, ttynum: i32) -> i32;
    fn console(&mut self, ttynum: i32, stdin: RawFd, stdout: RawFd, stderr: RawFd, escape: i32) -> i32;

    // Attach: raw wait status for the waiting forms, negative when nothing ran.
    fn attach_shell(&mut self, options: &AttachOptions) -> i32;
    fn attach_run_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32;
    /// Pid of the attached process, or negative.
    fn attach_no_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32;
    /// Run `argv` as a throwaway application container named after this
    /// handle. Stdout and stderr interleaved, or `None` when it failed.
    fn execute(&mut self, argv: &[String]) -> Option<Vec<u8>>;

    /// Index of the new snapshot, or negative.
    fn snapshot(&mut self, comment_file: Option<&Path>) -> i32;
    fn snapshot_list(&mut self) -> Option<Vec<Snapshot>>;
    fn snapshot_restore(&mut self, snapname: &str, new_name: &str) -> bool;
    fn snapshot_destroy(&mut self, snapname: &str) -> bool;
    fn snapshot_destroy_all(&mut self) -> bool;
    fn may_control(&mut self) -> bool;
    fn add_device_node(&mut self, src: &str, dst: Option<&str>) -> bool;
    fn remove_device_node(&mut self, src: &str, dst: Option<&str>) -> bool;
    fn attach_interface(&mut self, dev: &str, dst: Option<&str>) -> bool;
    fn detach_interface(&mut self, dev: &str, dst: Option<&str>) -> bool;
    fn checkpoint(&mut self, directory: &Path, stop: bool, verbose: bool) -> bool;
    fn restore(&mut self, directory: &Path, verbose: bool) -> bool;
    /// 0 on success.
    fn migrate(&mut self, command: MigrateCommand, options: &MigrateOptions) -> i32;
    /// Console ring buffer contents, or a negative errno.
    fn console_log(&mut self, clear: bool, read: bool, read_max: Option<u64>) -> std::result::Result<Vec<u8>, i32>;

    fn error_num(&mut self) -> i32;
    fn error_string(&mut self) -> Option<String>;

    /// Drop the runtime's reference. Returns false if the runtime reported an error.
    fn release(&mut self) -> bool;
}

/// Runtime selector used by configuration and the CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeKind {
    #[default]
    Native,
    Memory,
}

impl RuntimeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            RuntimeKind::Native => "native",
            RuntimeKind::Memory => "memory",
        }
    }
}

impl fmt::Display for RuntimeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RuntimeKind {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "native" | "lxc" => Ok(RuntimeKind::Native),
            "memory" => Ok(RuntimeKind::Memory),
            _ => Err(Error::parse("runtime", s)),
        }
    }
}

/// Run `cmd` with stdout and stderr sharing one pipe, so the output keeps
/// the order the child wrote it in.
pub(crate) fn combined_output(mut cmd: Command) -> io::Result<(ExitStatus, Vec<u8>)> {
    let (reader, writer) = nix::unistd::pipe()?;
    let stderr = writer.try_clone()?;
    cmd.stdin(Stdio::null())
        .stdout(Stdio::from(writer))
        .stderr(Stdio::from(stderr));
    let mut child = cmd.spawn()?;
    // our copies of the write end must go before reading to EOF
    drop(cmd);

    let mut output = Vec::new();
    File::from(reader).read_to_end(&mut output)?;
    let status = child.wait()?;
    Ok((status, output))
}

/// The liblxc runtime, when this build was linked against it.
pub fn native() -> Result<Arc<dyn Runtime>> {
    #[cfg(liblxc)]
    {
        Ok(Arc::new(NativeRuntime::new()))
    }
    #[cfg(not(liblxc))]
    {
        Err(Error::NotSupported("built without liblxc"))
    }
}

/// Open the runtime selected by `kind`. The in-memory runtime is rooted at
/// `lxcpath` (or a scratch path) and persists nothing beyond the process.
pub fn connect(kind: RuntimeKind, lxcpath: Option<&Path>) -> Result<Arc<dyn Runtime>> {
    match kind {
        RuntimeKind::Native => native(),
        RuntimeKind::Memory => {
            let root = lxcpath
                .map(Path::to_path_buf)
                .unwrap_or_else(|| std::env::temp_dir().join("lxcctl-memory"));
            Ok(Arc::new(MemoryRuntime::new(root)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_runtime_kind_parse() {
        assert_eq!("memory".parse::<RuntimeKind>().unwrap(), RuntimeKind::Memory);
        assert_eq!("LXC".parse::<RuntimeKind>().unwrap(), RuntimeKind::Native);
        assert!("docker".parse::<RuntimeKind>().is_err());
    }

    #[cfg(not(liblxc))]
    #[test]
    fn test_native_unavailable_without_liblxc() {
        assert!(matches!(native(), Err(Error::NotSupported(_))));
    }

    #[test]
    fn test_combined_output_keeps_write_order() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "echo one; echo two >&2; echo three; exit 3"]);
        let (status, output) = combined_output(cmd).unwrap();
        assert_eq!(status.code(), Some(3));
        assert_eq!(output, b"one\ntwo\nthree\n");
    }

    #[test]
    fn test_memory_runtime_defaults() {
        let rt = connect(RuntimeKind::Memory, Some(Path::new("/srv/lxc"))).unwrap();
        assert_eq!(rt.name(), "memory");
        assert_eq!(rt.default_config_path().as_deref(), Some("/srv/lxc"));
        assert_eq!(rt.default_lvm_vg().as_deref(), Some("lxc"));
    }
}
