//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container handles
//!
//! A [`Container`] owns one runtime handle behind a mutex. Each operation
//! checks its lifecycle preconditions and calls the runtime under the same
//! lock, so two threads sharing a handle never interleave and a state check
//! cannot go stale before the call it guards.

use std::ops::BitOr;
use std::os::fd::{FromRawFd, OwnedFd};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use nix::unistd::Pid;
use tracing::{debug, info, warn};

use crate::engine::options::{ConsoleLogOptions, ConsoleOptions, Verbosity};
use crate::engine::{Lifecycle, State};
use crate::error::{Error, NativeFault, Operation, Result};
use crate::ffi::marshal;
use crate::runtime::{ContainerBackend, Runtime};

/// Lifecycle preconditions checked before an operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Require(u8);

impl Require {
    pub(crate) const NONE: Self = Self(0);
    pub(crate) const DEFINED: Self = Self(1 << 0);
    pub(crate) const NOT_DEFINED: Self = Self(1 << 1);
    pub(crate) const RUNNING: Self = Self(1 << 2);
    pub(crate) const NOT_RUNNING: Self = Self(1 << 3);

    fn has(self, other: Self) -> bool {
        self.0 & other.0 != 0
    }
}

impl BitOr for Require {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Everything behind the handle's lock.
pub(crate) struct Inner {
    pub(crate) name: String,
    pub(crate) backend: Box<dyn ContainerBackend>,
    pub(crate) believed: Lifecycle,
    pub(crate) verbosity: Verbosity,
}

impl Inner {
    pub(crate) fn check(&mut self, require: Require) -> Result<()> {
        if require.has(Require::DEFINED) && !self.backend.is_defined() {
            return Err(Error::NotDefined);
        }
        if require.has(Require::NOT_DEFINED) && self.backend.is_defined() {
            return Err(Error::AlreadyDefined);
        }
        if require.has(Require::RUNNING) && !self.backend.is_running() {
            return Err(Error::NotRunning);
        }
        if require.has(Require::NOT_RUNNING) && self.backend.is_running() {
            return Err(Error::AlreadyRunning);
        }
        Ok(())
    }

    /// The runtime's last recorded error, if it recorded one.
    pub(crate) fn fault(&mut self) -> Option<NativeFault> {
        let code = self.backend.error_num();
        let message = self.backend.error_string().filter(|m| !m.is_empty());
        if code == 0 && message.is_none() {
            return None;
        }
        Some(NativeFault { code, message })
    }

    pub(crate) fn fail(&mut self, op: Operation) -> Error {
        let fault = self.fault();
        warn!("{} {} failed", self.name, op);
        Error::Failed { op, fault }
    }

    pub(crate) fn ensure(&mut self, ok: bool, op: Operation) -> Result<()> {
        if ok {
            Ok(())
        } else {
            Err(self.fail(op))
        }
    }

    pub(crate) fn current_state(&mut self) -> State {
        self.backend
            .state()
            .and_then(|s| s.parse().ok())
            .unwrap_or(State::Stopped)
    }

    /// Re-read the runtime's view and update the believed lifecycle.
    pub(crate) fn refresh(&mut self) -> Lifecycle {
        let defined = self.backend.is_defined();
        let state = self.current_state();
        self.believed = Lifecycle::derive(defined, state);
        self.believed
    }
}

/// Convert a timeout into the runtime's whole seconds. `None` waits forever
/// (`-1`); a partial second rounds up so a short timeout still waits.
pub(crate) fn timeout_secs(timeout: Option<Duration>) -> i32 {
    match timeout {
        None => -1,
        Some(d) => {
            let mut secs = d.as_secs();
            if d.subsec_nanos() > 0 {
                secs += 1;
            }
            i32::try_from(secs).unwrap_or(i32::MAX)
        }
    }
}

/// A handle to one container
pub struct Container {
    runtime: Arc<dyn Runtime>,
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for Container {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.lock();
        f.debug_struct("Container")
            .field("name", &inner.name)
            .field("runtime", &self.runtime.name())
            .field("believed", &inner.believed)
            .finish()
    }
}

impl Container {
    /// Open a handle for `name`, looked up under `lxcpath` or the runtime's
    /// default path. The container need not exist yet.
    pub fn new(runtime: Arc<dyn Runtime>, name: &str, lxcpath: Option<&Path>) -> Result<Self> {
        if name.is_empty() {
            return Err(Error::NewFailed("container name is empty".to_string()));
        }
        marshal::check(name)?;
        if let Some(path) = lxcpath {
            marshal::check(&path.to_string_lossy())?;
        }

        let backend = runtime.open(name, lxcpath)?;
        let mut inner = Inner {
            name: name.to_string(),
            backend,
            believed: Lifecycle::Undefined,
            verbosity: Verbosity::default(),
        };
        inner.refresh();
        debug!("Opened container {} ({})", name, inner.believed);

        Ok(Self {
            runtime,
            inner: Mutex::new(inner),
        })
    }

    /// Handles for every container under `lxcpath`.
    pub fn all(runtime: Arc<dyn Runtime>, lxcpath: Option<&Path>) -> Result<Vec<Container>> {
        runtime
            .container_names(lxcpath)?
            .iter()
            .map(|name| Container::new(runtime.clone(), name, lxcpath))
            .collect()
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Lock the handle and check `require` inside the same critical section.
    pub(crate) fn guarded(&self, require: Require) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        inner.check(require)?;
        Ok(inner)
    }

    pub(crate) fn require_extension(&self, extension: &'static str) -> Result<()> {
        if self.runtime.has_api_extension(extension) {
            Ok(())
        } else {
            Err(Error::NotSupported(extension))
        }
    }

    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.runtime
    }

    pub fn name(&self) -> String {
        self.lock().name.clone()
    }

    pub fn defined(&self) -> bool {
        let mut inner = self.lock();
        inner.refresh();
        inner.backend.is_defined()
    }

    pub fn running(&self) -> bool {
        self.lock().refresh().is_running()
    }

    pub fn state(&self) -> State {
        let mut inner = self.lock();
        inner.refresh();
        inner.current_state()
    }

    /// Query the runtime and return the resulting lifecycle.
    pub fn lifecycle(&self) -> Lifecycle {
        self.lock().refresh()
    }

    /// Lifecycle as last observed, without asking the runtime.
    pub fn believed_lifecycle(&self) -> Lifecycle {
        self.lock().believed
    }

    /// Whether the caller may manage this container.
    pub fn controllable(&self) -> bool {
        self.lock().backend.may_control()
    }

    /// Pid of the container's init, `None` when it is not running.
    pub fn init_pid(&self) -> Option<Pid> {
        let pid = self.lock().backend.init_pid();
        (pid > 0).then(|| Pid::from_raw(pid))
    }

    pub fn init_pidfd(&self) -> Result<OwnedFd> {
        self.require_extension("pidfd")?;
        self.descriptor(Operation::InitPidFd, |b| b.init_pidfd())
    }

    pub fn devpts_fd(&self) -> Result<OwnedFd> {
        self.require_extension("devpts_fd")?;
        self.descriptor(Operation::DevptsFd, |b| b.devpts_fd())
    }

    pub fn seccomp_notify_fd(&self) -> Result<OwnedFd> {
        self.require_extension("seccomp_notify")?;
        self.descriptor(Operation::SeccompNotifyFd, |b| b.seccomp_notify_fd())
    }

    /// Like [`seccomp_notify_fd`](Self::seccomp_notify_fd) but asks the running monitor.
    pub fn seccomp_notify_fd_active(&self) -> Result<OwnedFd> {
        self.require_extension("seccomp_notify_fd_active")?;
        self.descriptor(Operation::SeccompNotifyFd, |b| b.seccomp_notify_fd_active())
    }

    fn descriptor(
        &self,
        op: Operation,
        get: impl FnOnce(&mut dyn ContainerBackend) -> i32,
    ) -> Result<OwnedFd> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let fd = get(inner.backend.as_mut());
        if fd == -libc::ENOSYS {
            return Err(Error::NotSupported("descriptor call compiled out of this liblxc"));
        }
        if fd < 0 {
            return Err(inner.fail(op));
        }
        // Safety: the runtime hands over a fresh descriptor we now own
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    pub fn want_daemonize(&self, daemonize: bool) -> Result<()> {
        let mut inner = self.lock();
        let ok = inner.backend.want_daemonize(daemonize);
        inner.ensure(ok, Operation::Daemonize)
    }

    pub fn want_close_all_fds(&self, close: bool) -> Result<()> {
        let mut inner = self.lock();
        let ok = inner.backend.want_close_all_fds(close);
        inner.ensure(ok, Operation::CloseAllFds)
    }

    /// Whether start() daemonizes.
    pub fn daemonize(&self) -> bool {
        self.lock().backend.daemonize()
    }

    pub fn set_verbosity(&self, verbosity: Verbosity) {
        self.lock().verbosity = verbosity;
    }

    // Configuration

    /// Value of `key` in the handle's config, `None` when unset.
    pub fn config_item(&self, key: &str) -> Result<Option<String>> {
        marshal::check(key)?;
        let mut inner = self.lock();
        let backend = inner.backend.as_mut();
        Ok(marshal::read_sized_string(|buf| backend.get_config_item(key, buf)))
    }

    /// Multi-valued keys (e.g. `lxc.mount.entry`) one entry per element.
    pub fn config_item_values(&self, key: &str) -> Result<Vec<String>> {
        Ok(marshal::split_lines(self.config_item(key)?))
    }

    /// Set `key` in memory; call [`save_config`](Self::save_config) to persist.
    pub fn set_config_item(&self, key: &str, value: &str) -> Result<()> {
        marshal::check(key)?;
        marshal::check(value)?;
        let mut inner = self.lock();
        debug!("{}: {} = {}", inner.name, key, value);
        let ok = inner.backend.set_config_item(key, value);
        inner.ensure(ok, Operation::SetConfigItem)
    }

    pub fn clear_config_item(&self, key: &str) -> Result<()> {
        marshal::check(key)?;
        let mut inner = self.lock();
        let ok = inner.backend.clear_config_item(key);
        inner.ensure(ok, Operation::ClearConfigItem)
    }

    /// Drop the handle's in-memory config.
    pub fn clear_config(&self) {
        self.lock().backend.clear_config();
    }

    /// Config keys known to the runtime, optionally under `prefix`.
    pub fn config_keys(&self, prefix: Option<&str>) -> Result<Vec<String>> {
        if let Some(p) = prefix {
            marshal::check(p)?;
        }
        let mut inner = self.lock();
        let backend = inner.backend.as_mut();
        let keys = marshal::read_sized_string(|buf| backend.get_keys(prefix, buf));
        Ok(marshal::split_lines(keys))
    }

    /// Value of `key` in the running container's config.
    pub fn running_config_item(&self, key: &str) -> Result<Option<String>> {
        marshal::check(key)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        Ok(inner.backend.get_running_config_item(key))
    }

    pub fn cgroup_item(&self, key: &str) -> Result<Option<String>> {
        marshal::check(key)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let backend = inner.backend.as_mut();
        Ok(marshal::read_sized_string(|buf| backend.get_cgroup_item(key, buf)))
    }

    pub fn cgroup_item_values(&self, key: &str) -> Result<Vec<String>> {
        Ok(marshal::split_lines(self.cgroup_item(key)?))
    }

    pub fn set_cgroup_item(&self, key: &str, value: &str) -> Result<()> {
        marshal::check(key)?;
        marshal::check(value)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let ok = inner.backend.set_cgroup_item(key, value);
        inner.ensure(ok, Operation::SetCgroupItem)
    }

    /// Reload the container's own config file.
    pub fn load_config(&self) -> Result<()> {
        let mut inner = self.lock();
        let ok = inner.backend.load_config(None);
        inner.ensure(ok, Operation::LoadConfig)
    }

    pub fn load_config_file(&self, path: &Path) -> Result<()> {
        marshal::check(&path.to_string_lossy())?;
        let mut inner = self.lock();
        let ok = inner.backend.load_config(Some(path));
        inner.ensure(ok, Operation::LoadConfig)
    }

    /// Persist the in-memory config to the container's own config file.
    pub fn save_config(&self) -> Result<()> {
        let mut inner = self.lock();
        let ok = inner.backend.save_config(None);
        inner.ensure(ok, Operation::SaveConfig)
    }

    pub fn save_config_file(&self, path: &Path) -> Result<()> {
        marshal::check(&path.to_string_lossy())?;
        let mut inner = self.lock();
        let ok = inner.backend.save_config(Some(path));
        inner.ensure(ok, Operation::SaveConfig)
    }

    /// Directory the container lives under.
    pub fn config_path(&self) -> Option<PathBuf> {
        self.lock().backend.config_path().map(PathBuf::from)
    }

    pub fn set_config_path(&self, path: &Path) -> Result<()> {
        marshal::check(&path.to_string_lossy())?;
        let mut inner = self.lock();
        let ok = inner.backend.set_config_path(path);
        inner.ensure(ok, Operation::SetConfigPath)
    }

    pub fn config_file_name(&self) -> Option<PathBuf> {
        self.lock().backend.config_file_name().map(PathBuf::from)
    }

    // Network

    pub fn interfaces(&self) -> Result<Vec<String>> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        match inner.backend.get_interfaces() {
            Some(names) => Ok(names),
            None => Err(inner.fail(Operation::Interfaces)),
        }
    }

    pub fn ip_addresses(&self) -> Result<Vec<String>> {
        self.ip_addresses_with(None, None, 0)
    }

    pub fn ipv4_addresses(&self) -> Result<Vec<String>> {
        self.ip_addresses_with(None, Some("inet"), 0)
    }

    pub fn ipv6_addresses(&self) -> Result<Vec<String>> {
        self.ip_addresses_with(None, Some("inet6"), 0)
    }

    /// Addresses of one interface.
    pub fn ip_address(&self, interface: &str) -> Result<Vec<String>> {
        self.ip_addresses_with(Some(interface), None, 0)
    }

    /// Addresses filtered by interface, family (`inet`/`inet6`) and scope.
    pub fn ip_addresses_with(
        &self,
        interface: Option<&str>,
        family: Option<&str>,
        scope: i32,
    ) -> Result<Vec<String>> {
        for s in [interface, family].into_iter().flatten() {
            marshal::check(s)?;
        }
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        match inner.backend.get_ips(interface, family, scope) {
            Some(ips) => Ok(ips),
            None => Err(inner.fail(Operation::IpAddresses)),
        }
    }

    // Devices

    pub fn add_device_node(&self, source: &str, destination: Option<&str>) -> Result<()> {
        check_pair(source, destination)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Adding device {} to {}", source, inner.name);
        let ok = inner.backend.add_device_node(source, destination);
        inner.ensure(ok, Operation::AddDeviceNode)
    }

    pub fn remove_device_node(&self, source: &str, destination: Option<&str>) -> Result<()> {
        check_pair(source, destination)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Removing device {} from {}", source, inner.name);
        let ok = inner.backend.remove_device_node(source, destination);
        inner.ensure(ok, Operation::RemoveDeviceNode)
    }

    /// Move host netdev `device` into the container, optionally renamed.
    pub fn attach_interface(&self, device: &str, destination: Option<&str>) -> Result<()> {
        check_pair(device, destination)?;
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Attaching interface {} to {}", device, inner.name);
        let ok = inner.backend.attach_interface(device, destination);
        inner.ensure(ok, Operation::AttachInterface)
    }

    pub fn detach_interface(&self, device: &str, destination: Option<&str>) -> Result<()> {
        check_pair(device, destination)?;
        let mut inner = self.guarded(Require::DEFINED)?;
        info!("Detaching interface {} from {}", device, inner.name);
        let ok = inner.backend.detach_interface(device, destination);
        inner.ensure(ok, Operation::DetachInterface)
    }

    // Console

    /// Allocate a tty. Closing the returned fd releases it.
    pub fn console_fd(&self, ttynum: i32) -> Result<OwnedFd> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let fd = inner.backend.console_getfd(ttynum);
        if fd < 0 {
            return Err(inner.fail(Operation::Console));
        }
        // Safety: console_getfd returns a fresh pty descriptor
        Ok(unsafe { OwnedFd::from_raw_fd(fd) })
    }

    /// Run an interactive console until the user detaches.
    pub fn console(&self, options: &ConsoleOptions) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let (stdin, stdout, stderr) = options.fds();
        let ret = inner
            .backend
            .console(options.tty_num(), stdin, stdout, stderr, options.raw_escape());
        if ret < 0 {
            return Err(inner.fail(Operation::Console));
        }
        Ok(())
    }

    /// Read and/or clear the console ring buffer.
    pub fn console_log(&self, options: &ConsoleLogOptions) -> Result<Vec<u8>> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        match inner
            .backend
            .console_log(options.clears(), options.reads(), options.max_bytes())
        {
            Ok(data) => Ok(data),
            Err(code) if code == -libc::ENOSYS => Err(Error::NotSupported("console_log")),
            Err(_) => Err(inner.fail(Operation::ConsoleLog)),
        }
    }

    /// Release the runtime handle now. Persisted state is untouched.
    pub fn release(self) -> Result<()> {
        let mut inner = self.inner.into_inner().unwrap_or_else(PoisonError::into_inner);
        debug!("Releasing container {}", inner.name);
        if inner.backend.release() {
            Ok(())
        } else {
            Err(Error::ReleaseFailed)
        }
    }
}

fn check_pair(first: &str, second: Option<&str>) -> Result<()> {
    marshal::check(first)?;
    if let Some(s) = second {
        marshal::check(s)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_rounds_up() {
        assert_eq!(timeout_secs(None), -1);
        assert_eq!(timeout_secs(Some(Duration::ZERO)), 0);
        assert_eq!(timeout_secs(Some(Duration::from_millis(1))), 1);
        assert_eq!(timeout_secs(Some(Duration::from_millis(1500))), 2);
        assert_eq!(timeout_secs(Some(Duration::from_secs(30))), 30);
    }

    #[test]
    fn test_require_combines() {
        let r = Require::DEFINED | Require::RUNNING;
        assert!(r.has(Require::DEFINED));
        assert!(r.has(Require::RUNNING));
        assert!(!r.has(Require::NOT_RUNNING));
        assert!(!Require::NONE.has(Require::DEFINED));
    }

    #[test]
    fn test_container_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<Container>();
    }
}
