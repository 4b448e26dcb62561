//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! In-process runtime
//!
//! Keeps container records in memory and simulates the lifecycle well
//! enough to exercise [`Container`](crate::Container) without liblxc or
//! root. Attached commands really run, as host processes: there is no
//! namespace to enter, so namespace, personality and LSM settings are
//! accepted and ignored.
//!
//! Handles opened from the same `MemoryRuntime` share one store, so a
//! second handle sees what the first one saved or started.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::os::fd::{BorrowedFd, RawFd};
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use chrono::Local;
use nix::unistd::{setgid, setgroups, setuid};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::engine::config::{ROOTFS_PATH_KEY, UTS_NAME_KEY};
use crate::engine::options::clone_flags;
use crate::engine::snapshot::TIMESTAMP_FORMAT;
use crate::engine::{AttachOptions, EnvPolicy, MigrateCommand, MigrateFeatures, MigrateOptions, Snapshot, State};
use crate::error::{Error, Result};
use crate::ffi::marshal::write_sized_string;

use super::{ContainerBackend, ListFilter, Runtime};

const FIRST_PID: i32 = 10_000;
const CHECKPOINT_FILE: &str = "checkpoint.json";

/// Keys that hold a list; setting one appends.
const LIST_KEYS: &[&str] = &[
    "lxc.cap.drop",
    "lxc.cap.keep",
    "lxc.environment",
    "lxc.group",
    "lxc.idmap",
    "lxc.include",
    "lxc.mount.entry",
];

const SUPPORTED_KEYS: &[&str] = &[
    "lxc.apparmor.profile",
    "lxc.arch",
    "lxc.autodev",
    "lxc.cap.drop",
    "lxc.cap.keep",
    "lxc.console.buffer.size",
    "lxc.console.logfile",
    "lxc.console.path",
    "lxc.environment",
    "lxc.ephemeral",
    "lxc.group",
    "lxc.idmap",
    "lxc.include",
    "lxc.init.cmd",
    "lxc.init.cwd",
    "lxc.init.gid",
    "lxc.init.uid",
    "lxc.log.file",
    "lxc.log.level",
    "lxc.log.syslog",
    "lxc.mount.auto",
    "lxc.mount.entry",
    "lxc.mount.fstab",
    "lxc.no_new_privs",
    "lxc.rootfs.mount",
    "lxc.rootfs.options",
    "lxc.rootfs.path",
    "lxc.seccomp.profile",
    "lxc.signal.halt",
    "lxc.signal.reboot",
    "lxc.signal.stop",
    "lxc.start.auto",
    "lxc.start.delay",
    "lxc.start.order",
    "lxc.tty.dir",
    "lxc.tty.max",
    "lxc.uts.name",
];

const SUPPORTED_PREFIXES: &[&str] = &[
    "lxc.cgroup.",
    "lxc.cgroup2.",
    "lxc.hook.",
    "lxc.limit.",
    "lxc.net.",
    "lxc.prlimit.",
    "lxc.proc.",
    "lxc.sysctl.",
];

/// Extensions this runtime can honour. Descriptor-returning calls are left
/// out: there is no real init process to hand out.
const API_EXTENSIONS: &[&str] = &[
    "lxc_log",
    "mount_injection_file",
    "network_veth_routes",
    "network_ipvlan",
    "network_l2proxy",
    "cgroup2",
    "cgroup2_devices",
    "console_log",
];

type Config = BTreeMap<String, Vec<String>>;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct SnapshotRecord {
    name: String,
    comment: Option<PathBuf>,
    timestamp: String,
    config: Config,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Record {
    config: Config,
    state: State,
    init_pid: i32,
    cgroup: BTreeMap<String, String>,
    snapshots: Vec<SnapshotRecord>,
    devices: BTreeSet<String>,
    extra_interfaces: Vec<String>,
    console: Vec<u8>,
}

impl Record {
    fn new(config: Config) -> Self {
        Self {
            config,
            state: State::Stopped,
            init_pid: -1,
            cgroup: BTreeMap::new(),
            snapshots: Vec::new(),
            devices: BTreeSet::new(),
            extra_interfaces: Vec::new(),
            console: Vec::new(),
        }
    }

    fn stopped(&mut self) {
        self.state = State::Stopped;
        self.init_pid = -1;
        self.cgroup.clear();
        self.devices.clear();
        self.extra_interfaces.clear();
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CheckpointImage {
    name: String,
    config: Config,
    init_pid: i32,
    cgroup: BTreeMap<String, String>,
}

#[derive(Default)]
struct Store {
    containers: BTreeMap<(PathBuf, String), Record>,
    next_pid: i32,
    rejected_templates: BTreeSet<String>,
    ignore_halt: BTreeSet<String>,
}

impl Store {
    fn allocate_pid(&mut self) -> i32 {
        let pid = FIRST_PID + self.next_pid;
        self.next_pid += 1;
        pid
    }
}

struct Shared {
    store: Mutex<Store>,
    changed: Condvar,
    default_lxcpath: PathBuf,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, Store> {
        self.store.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// In-memory runtime
#[derive(Clone)]
pub struct MemoryRuntime {
    shared: Arc<Shared>,
}

impl MemoryRuntime {
    /// A runtime whose default container path is `lxcpath`.
    pub fn new(lxcpath: impl Into<PathBuf>) -> Self {
        Self {
            shared: Arc::new(Shared {
                store: Mutex::new(Store::default()),
                changed: Condvar::new(),
                default_lxcpath: lxcpath.into(),
            }),
        }
    }

    /// Make `create` fail for `template`.
    pub fn reject_template(&self, template: &str) {
        self.shared.lock().rejected_templates.insert(template.to_string());
    }

    /// Make the named container's init ignore the halt signal, so shutdown
    /// runs into its timeout.
    pub fn ignore_halt(&self, name: &str) {
        self.shared.lock().ignore_halt.insert(name.to_string());
    }
}

impl Runtime for MemoryRuntime {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn open(&self, name: &str, lxcpath: Option<&Path>) -> Result<Box<dyn ContainerBackend>> {
        if name.is_empty() {
            return Err(Error::NewFailed("container name is empty".to_string()));
        }
        let lxcpath = lxcpath
            .map(Path::to_path_buf)
            .unwrap_or_else(|| self.shared.default_lxcpath.clone());

        let config = self
            .shared
            .lock()
            .containers
            .get(&(lxcpath.clone(), name.to_string()))
            .map(|r| r.config.clone())
            .unwrap_or_default();

        Ok(Box::new(MemoryContainer {
            shared: self.shared.clone(),
            name: name.to_string(),
            lxcpath,
            config,
            daemonize: true,
            close_all_fds: false,
            error: None,
            released: false,
        }))
    }

    fn version(&self) -> String {
        format!("{}-memory", env!("CARGO_PKG_VERSION"))
    }

    fn global_config_item(&self, key: &str) -> Option<String> {
        match key {
            "lxc.lxcpath" => Some(self.shared.default_lxcpath.display().to_string()),
            "lxc.bdev.lvm.vg" | "lxc.bdev.zfs.root" => Some("lxc".to_string()),
            "lxc.default_config" => Some(
                self.shared
                    .default_lxcpath
                    .join("default.conf")
                    .display()
                    .to_string(),
            ),
            _ => None,
        }
    }

    fn config_item_is_supported(&self, key: &str) -> bool {
        key_supported(key)
    }

    fn has_api_extension(&self, extension: &str) -> bool {
        API_EXTENSIONS.contains(&extension)
    }

    fn list_containers(&self, lxcpath: Option<&Path>, filter: ListFilter) -> Result<Vec<String>> {
        let lxcpath = lxcpath.unwrap_or(&self.shared.default_lxcpath);
        let store = self.shared.lock();
        Ok(store
            .containers
            .iter()
            .filter(|((path, _), _)| path == lxcpath)
            .filter(|(_, record)| match filter {
                ListFilter::Active => record.state.is_active(),
                ListFilter::Defined | ListFilter::All => true,
            })
            .map(|((_, name), _)| name.clone())
            .collect())
    }
}

fn key_supported(key: &str) -> bool {
    SUPPORTED_KEYS.contains(&key)
        || SUPPORTED_PREFIXES
            .iter()
            .any(|p| key.starts_with(p) && key.len() > p.len())
}

/// One handle into the in-memory store
pub struct MemoryContainer {
    shared: Arc<Shared>,
    name: String,
    lxcpath: PathBuf,
    /// Unsaved config, like the in-memory `lxc_conf` of a real handle.
    config: Config,
    daemonize: bool,
    close_all_fds: bool,
    error: Option<(i32, String)>,
    released: bool,
}

impl MemoryContainer {
    fn key(&self) -> (PathBuf, String) {
        (self.lxcpath.clone(), self.name.clone())
    }

    fn store(&self) -> MutexGuard<'_, Store> {
        self.shared.lock()
    }

    fn fail(&mut self, code: i32, message: impl Into<String>) -> bool {
        let message = message.into();
        debug!("memory runtime: {}: {}", self.name, message);
        self.error = Some((code, message));
        false
    }

    fn succeed(&mut self) -> bool {
        self.error = None;
        true
    }

    fn state_of(&self) -> State {
        self.store()
            .containers
            .get(&self.key())
            .map_or(State::Stopped, |r| r.state)
    }

    fn notify(&self) {
        self.shared.changed.notify_all();
    }

    fn config_value(&self, key: &str) -> Option<String> {
        if key == "lxc.net" {
            let indices = net_indices(&self.config);
            if indices.is_empty() {
                return None;
            }
            return Some(indices.iter().map(|i| format!("{}\n", i)).collect());
        }
        self.config.get(key).map(|values| values.join("\n"))
    }

    /// Names of the container's network devices, in index order.
    fn interface_names(&self, record: &Record) -> Vec<(String, usize)> {
        let mut names = Vec::new();
        for index in net_indices(&record.config) {
            let get = |field: &str| {
                record
                    .config
                    .get(&format!("lxc.net.{}.{}", index, field))
                    .and_then(|v| v.last().cloned())
            };
            if get("type").as_deref() == Some("empty") {
                continue;
            }
            let name = get("name").unwrap_or_else(|| format!("eth{}", index));
            names.push((name, index));
        }
        names
    }

    fn write_checkpoint(&mut self, directory: &Path, record: &Record) -> io::Result<()> {
        fs::create_dir_all(directory)?;
        let image = CheckpointImage {
            name: self.name.clone(),
            config: record.config.clone(),
            init_pid: record.init_pid,
            cgroup: record.cgroup.clone(),
        };
        let json = serde_json::to_vec_pretty(&image).map_err(io::Error::other)?;
        fs::write(directory.join(CHECKPOINT_FILE), json)
    }

    fn checkpoint_into(&mut self, directory: &Path, stop: bool) -> bool {
        let key = self.key();
        let record = self
            .store()
            .containers
            .get(&key)
            .filter(|r| r.state.is_active())
            .cloned();
        let Some(record) = record else {
            return self.fail(libc::ESRCH, "container is not running");
        };
        if let Err(e) = self.write_checkpoint(directory, &record) {
            return self.fail(e.raw_os_error().unwrap_or(libc::EIO), format!("writing checkpoint: {}", e));
        }
        if stop {
            if let Some(r) = self.store().containers.get_mut(&key) {
                r.stopped();
            }
            self.notify();
        }
        self.succeed()
    }

    fn restore_from(&mut self, directory: &Path) -> bool {
        let image: CheckpointImage = match fs::read(directory.join(CHECKPOINT_FILE))
            .map_err(|e| e.to_string())
            .and_then(|data| serde_json::from_slice(&data).map_err(|e| e.to_string()))
        {
            Ok(image) => image,
            Err(e) => return self.fail(libc::ENOENT, format!("reading checkpoint: {}", e)),
        };

        let key = self.key();
        let shared = self.shared.clone();
        let mut store = shared.lock();
        let record = match store.containers.get_mut(&key) {
            Some(r) if !r.state.is_active() => r,
            Some(_) => return self.fail(libc::EBUSY, "container is running"),
            None => return self.fail(libc::ENOENT, "container is not defined"),
        };
        record.state = State::Running;
        record.init_pid = image.init_pid;
        record.cgroup = image.cgroup;
        drop(store);
        self.notify();
        self.succeed()
    }

    fn spawn(&mut self, options: &AttachOptions, argv: &[String]) -> io::Result<std::process::Child> {
        if !self.state_of().is_active() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "container is not running"));
        }
        debug!(
            "memory runtime: attach flags {:#x}, namespaces {}",
            options.effective_flags().bits(),
            options.raw_namespaces()
        );
        host_command(options, argv)?.spawn()
    }

    fn run_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32 {
        if !self.state_of().is_active() {
            self.fail(libc::ESRCH, "container is not running");
            return -1;
        }
        match self.spawn(options, argv) {
            Ok(mut child) => match child.wait() {
                Ok(status) => {
                    self.succeed();
                    status.into_raw()
                }
                Err(e) => {
                    self.fail(e.raw_os_error().unwrap_or(libc::ECHILD), e.to_string());
                    -1
                }
            },
            // exec failed in the child: reported as exit 255
            Err(e) => {
                warn!("memory runtime: exec of {:?} failed: {}", argv.first(), e);
                self.fail(e.raw_os_error().unwrap_or(libc::ENOEXEC), e.to_string());
                255 << 8
            }
        }
    }
}

fn net_indices(config: &Config) -> Vec<usize> {
    let indices: BTreeSet<usize> = config
        .keys()
        .filter_map(|k| k.strip_prefix("lxc.net."))
        .filter_map(|rest| rest.split('.').next())
        .filter_map(|i| i.parse().ok())
        .collect();
    indices.into_iter().collect()
}

fn parse_config_file(content: &str) -> Config {
    let mut config = Config::new();
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some((key, value)) = line.split_once('=') {
            config
                .entry(key.trim().to_string())
                .or_default()
                .push(value.trim().to_string());
        }
    }
    config
}

fn render_config_file(config: &Config) -> String {
    let mut out = String::new();
    for (key, values) in config {
        for value in values {
            out.push_str(&format!("{} = {}\n", key, value));
        }
    }
    out
}

/// Duplicate a caller-owned descriptor so the child gets its own copy.
fn inherit(fd: RawFd) -> io::Result<Stdio> {
    // Safety: the caller guarantees `fd` is open for the duration of the call
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    Ok(Stdio::from(borrowed.try_clone_to_owned()?))
}

fn host_command(options: &AttachOptions, argv: &[String]) -> io::Result<Command> {
    let (program, args) = argv
        .split_first()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty argv"))?;

    let mut cmd = Command::new(program);
    cmd.args(args);

    if options.policy() == EnvPolicy::Clear {
        cmd.env_clear();
        for key in options.kept_env() {
            if let Some(value) = std::env::var_os(key) {
                cmd.env(key, value);
            }
        }
    }
    for (key, value) in options.extra_env() {
        cmd.env(key, value);
    }
    if let Some(cwd) = options.initial_cwd() {
        cmd.current_dir(cwd);
    }

    cmd.stdin(inherit(options.stdin_fd())?);
    cmd.stdout(inherit(options.stdout_fd())?);
    cmd.stderr(inherit(options.stderr_fd())?);

    let groups = options.target_groups().to_vec();
    let uid = options.target_uid();
    let gid = options.target_gid();
    if !groups.is_empty() || uid.is_some() || gid.is_some() {
        // Safety: only async-signal-safe credential calls run between fork and exec
        unsafe {
            cmd.pre_exec(move || {
                if !groups.is_empty() {
                    setgroups(&groups)?;
                }
                if let Some(gid) = gid {
                    setgid(gid)?;
                }
                if let Some(uid) = uid {
                    setuid(uid)?;
                }
                Ok(())
            });
        }
    }

    Ok(cmd)
}

impl ContainerBackend for MemoryContainer {
    fn is_defined(&mut self) -> bool {
        self.store().containers.contains_key(&self.key())
    }

    fn state(&mut self) -> Option<String> {
        Some(self.state_of().as_str().to_string())
    }

    fn is_running(&mut self) -> bool {
        self.state_of().is_active()
    }

    fn freeze(&mut self) -> bool {
        let key = self.key();
        let ok = match self.store().containers.get_mut(&key) {
            Some(r) if r.state.is_active() => {
                r.state = State::Frozen;
                true
            }
            _ => false,
        };
        if !ok {
            return self.fail(libc::ESRCH, "container is not running");
        }
        self.notify();
        self.succeed()
    }

    fn unfreeze(&mut self) -> bool {
        let key = self.key();
        let ok = match self.store().containers.get_mut(&key) {
            Some(r) if r.state.is_active() => {
                r.state = State::Running;
                true
            }
            _ => false,
        };
        if !ok {
            return self.fail(libc::ESRCH, "container is not running");
        }
        self.notify();
        self.succeed()
    }

    fn init_pid(&mut self) -> i32 {
        self.store()
            .containers
            .get(&self.key())
            .map_or(-1, |r| r.init_pid)
    }

    fn init_pidfd(&mut self) -> i32 {
        -libc::ENOSYS
    }

    fn devpts_fd(&mut self) -> i32 {
        -libc::ENOSYS
    }

    fn seccomp_notify_fd(&mut self) -> i32 {
        -libc::ENOSYS
    }

    fn seccomp_notify_fd_active(&mut self) -> i32 {
        -libc::ENOSYS
    }

    fn load_config(&mut self, alt_file: Option<&Path>) -> bool {
        match alt_file {
            Some(path) => match fs::read_to_string(path) {
                Ok(content) => {
                    for (key, values) in parse_config_file(&content) {
                        self.config.insert(key, values);
                    }
                    self.succeed()
                }
                Err(e) => self.fail(e.raw_os_error().unwrap_or(libc::EIO), e.to_string()),
            },
            None => {
                let saved = self
                    .store()
                    .containers
                    .get(&self.key())
                    .map(|r| r.config.clone());
                match saved {
                    Some(config) => {
                        self.config = config;
                        self.succeed()
                    }
                    None => self.fail(libc::ENOENT, "container has no config file"),
                }
            }
        }
    }

    fn save_config(&mut self, alt_file: Option<&Path>) -> bool {
        match alt_file {
            Some(path) => match fs::write(path, render_config_file(&self.config)) {
                Ok(()) => self.succeed(),
                Err(e) => self.fail(e.raw_os_error().unwrap_or(libc::EIO), e.to_string()),
            },
            None => {
                let key = self.key();
                let config = self.config.clone();
                self.store()
                    .containers
                    .entry(key)
                    .and_modify(|r| r.config = config.clone())
                    .or_insert_with(|| Record::new(config));
                self.succeed()
            }
        }
    }

    fn start(&mut self, use_init: bool, argv: &[String]) -> bool {
        let rootfs = self.config.get(ROOTFS_PATH_KEY).and_then(|v| v.last().cloned());
        if rootfs.map_or(true, |p| p.is_empty()) {
            return self.fail(libc::EINVAL, "no rootfs configured");
        }

        let key = self.key();
        let config = self.config.clone();
        let mut store = self.store();
        let pid = store.allocate_pid();
        let started = match store.containers.get_mut(&key) {
            Some(r) if !r.state.is_active() => {
                r.state = State::Running;
                r.init_pid = pid;
                r.config = config;
                r.cgroup = default_cgroup(pid);
                r.console = format!("{} started (init {})\n", key.1, pid).into_bytes();
                true
            }
            _ => false,
        };
        drop(store);

        if !started {
            return self.fail(libc::EBUSY, "container is not startable");
        }
        debug!("memory runtime: started {} as {} (init={}, argv={:?})", self.name, pid, use_init, argv);
        self.notify();
        self.succeed()
    }

    fn stop(&mut self) -> bool {
        let key = self.key();
        let ok = match self.store().containers.get_mut(&key) {
            Some(r) if r.state.is_active() => {
                r.stopped();
                true
            }
            _ => false,
        };
        if !ok {
            return self.fail(libc::ESRCH, "container is not running");
        }
        self.notify();
        self.succeed()
    }

    fn want_daemonize(&mut self, state: bool) -> bool {
        self.daemonize = state;
        self.succeed()
    }

    fn want_close_all_fds(&mut self, state: bool) -> bool {
        self.close_all_fds = state;
        self.succeed()
    }

    fn daemonize(&mut self) -> bool {
        self.daemonize
    }

    fn config_file_name(&mut self) -> Option<String> {
        Some(self.lxcpath.join(&self.name).join("config").display().to_string())
    }

    fn wait(&mut self, state: &str, timeout: i32) -> bool {
        let target: State = match state.parse() {
            Ok(s) => s,
            Err(_) => return false,
        };
        let key = self.key();
        let deadline = (timeout >= 0).then(|| Instant::now() + Duration::from_secs(timeout as u64));

        let mut store = self.shared.lock();
        loop {
            let current = store.containers.get(&key).map_or(State::Stopped, |r| r.state);
            if current == target {
                return true;
            }
            match deadline {
                None => {
                    store = self
                        .shared
                        .changed
                        .wait(store)
                        .unwrap_or_else(PoisonError::into_inner);
                }
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        return false;
                    }
                    store = self
                        .shared
                        .changed
                        .wait_timeout(store, deadline - now)
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
            }
        }
    }

    fn set_config_item(&mut self, key: &str, value: &str) -> bool {
        if !key_supported(key) {
            return self.fail(libc::EINVAL, format!("unknown config key {}", key));
        }
        if LIST_KEYS.contains(&key) && !value.is_empty() {
            self.config.entry(key.to_string()).or_default().push(value.to_string());
        } else {
            self.config.insert(key.to_string(), vec![value.to_string()]);
        }
        self.succeed()
    }

    fn destroy(&mut self) -> bool {
        let key = self.key();
        let mut store = self.store();
        let result = match store.containers.get(&key) {
            None => Err((libc::ENOENT, "container is not defined")),
            Some(r) if r.state.is_active() => Err((libc::EBUSY, "container is running")),
            Some(r) if !r.snapshots.is_empty() => Err((libc::ENOTEMPTY, "container has snapshots")),
            Some(_) => Ok(()),
        };
        if result.is_ok() {
            store.containers.remove(&key);
        }
        drop(store);
        match result {
            Ok(()) => {
                self.config.clear();
                self.notify();
                self.succeed()
            }
            Err((code, msg)) => self.fail(code, msg),
        }
    }

    fn destroy_with_snapshots(&mut self) -> bool {
        let key = self.key();
        if let Some(r) = self.store().containers.get_mut(&key) {
            r.snapshots.clear();
        }
        self.destroy()
    }

    fn create(&mut self, template: &str, bdevtype: Option<&str>, flags: i32, argv: &[String]) -> bool {
        if self.store().rejected_templates.contains(template) {
            return self.fail(libc::EINVAL, format!("template {} failed", template));
        }

        let key = self.key();
        let rootfs = format!(
            "{}:{}",
            bdevtype.unwrap_or("dir"),
            self.lxcpath.join(&self.name).join("rootfs").display()
        );
        self.config
            .entry(ROOTFS_PATH_KEY.to_string())
            .or_insert_with(|| vec![rootfs]);
        self.config
            .entry(UTS_NAME_KEY.to_string())
            .or_insert_with(|| vec![self.name.clone()]);

        let config = self.config.clone();
        let mut store = self.store();
        if store.containers.contains_key(&key) {
            drop(store);
            return self.fail(libc::EEXIST, "container already exists");
        }
        store.containers.insert(key, Record::new(config));
        drop(store);

        debug!("memory runtime: created {} from {} (flags {:#x}, args {:?})", self.name, template, flags, argv);
        self.notify();
        self.succeed()
    }

    fn rename(&mut self, new_name: &str) -> bool {
        let old = self.key();
        let new = (self.lxcpath.clone(), new_name.to_string());
        let mut store = self.store();
        if store.containers.contains_key(&new) {
            drop(store);
            return self.fail(libc::EEXIST, format!("{} already exists", new_name));
        }
        let mut record = match store.containers.remove(&old) {
            Some(r) => r,
            None => {
                drop(store);
                return self.fail(libc::ENOENT, "container is not defined");
            }
        };
        record
            .config
            .insert(UTS_NAME_KEY.to_string(), vec![new_name.to_string()]);
        let config = record.config.clone();
        store.containers.insert(new, record);
        drop(store);

        self.name = new_name.to_string();
        self.config = config;
        self.succeed()
    }

    fn reboot(&mut self, _timeout: i32) -> bool {
        let key = self.key();
        let mut store = self.store();
        let pid = store.allocate_pid();
        let ok = match store.containers.get_mut(&key) {
            Some(r) if r.state.is_active() => {
                r.state = State::Running;
                r.init_pid = pid;
                r.cgroup = default_cgroup(pid);
                true
            }
            _ => false,
        };
        drop(store);
        if !ok {
            return self.fail(libc::ESRCH, "container is not running");
        }
        self.notify();
        self.succeed()
    }

    fn shutdown(&mut self, timeout: i32) -> bool {
        let key = self.key();
        let ignores_halt = self.store().ignore_halt.contains(&self.name);

        if !ignores_halt {
            let ok = match self.store().containers.get_mut(&key) {
                Some(r) if r.state.is_active() => {
                    r.stopped();
                    true
                }
                _ => false,
            };
            if !ok {
                return self.fail(libc::ESRCH, "container is not running");
            }
            self.notify();
            return self.succeed();
        }

        // init ignores SIGPWR; only an outside stop ends the wait
        if self.wait(State::Stopped.as_str(), timeout) {
            self.succeed()
        } else {
            self.fail(libc::ETIMEDOUT, "timed out waiting for shutdown")
        }
    }

    fn clear_config(&mut self) {
        self.config.clear();
    }

    fn clear_config_item(&mut self, key: &str) -> bool {
        if !key_supported(key) {
            return self.fail(libc::EINVAL, format!("unknown config key {}", key));
        }
        self.config.remove(key);
        self.succeed()
    }

    fn get_config_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32 {
        match self.config_value(key) {
            Some(value) => write_sized_string(&value, buf),
            None => -1,
        }
    }

    fn get_keys(&mut self, prefix: Option<&str>, buf: Option<&mut [u8]>) -> i32 {
        let keys: Vec<&str> = self
            .config
            .keys()
            .map(String::as_str)
            .filter(|k| prefix.map_or(true, |p| k.starts_with(p)))
            .collect();
        if keys.is_empty() {
            return -1;
        }
        write_sized_string(&keys.join("\n"), buf)
    }

    fn get_cgroup_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32 {
        let value = self
            .store()
            .containers
            .get(&self.key())
            .filter(|r| r.state.is_active())
            .and_then(|r| r.cgroup.get(key).cloned());
        match value {
            Some(value) => write_sized_string(&value, buf),
            None => -1,
        }
    }

    fn get_running_config_item(&mut self, key: &str) -> Option<String> {
        self.store()
            .containers
            .get(&self.key())
            .filter(|r| r.state.is_active())
            .and_then(|r| r.config.get(key).map(|v| v.join("\n")))
    }

    fn get_interfaces(&mut self) -> Option<Vec<String>> {
        let record = self.store().containers.get(&self.key()).cloned()?;
        if !record.state.is_active() {
            self.fail(libc::ESRCH, "container is not running");
            return None;
        }
        let mut names = vec!["lo".to_string()];
        names.extend(self.interface_names(&record).into_iter().map(|(n, _)| n));
        names.extend(record.extra_interfaces.iter().cloned());
        Some(names)
    }

    fn get_ips(&mut self, interface: Option<&str>, family: Option<&str>, _scope: i32) -> Option<Vec<String>> {
        let record = self.store().containers.get(&self.key()).cloned()?;
        if !record.state.is_active() {
            self.fail(libc::ESRCH, "container is not running");
            return None;
        }

        let want_v4 = family.map_or(true, |f| f == "inet");
        let want_v6 = family.map_or(true, |f| f == "inet6");
        let mut ips = Vec::new();

        if interface == Some("lo") {
            if want_v4 {
                ips.push("127.0.0.1".to_string());
            }
            if want_v6 {
                ips.push("::1".to_string());
            }
            return Some(ips);
        }

        for (name, index) in self.interface_names(&record) {
            if interface.is_some_and(|i| i != name) {
                continue;
            }
            let mut push = |field: &str| {
                let key = format!("lxc.net.{}.{}", index, field);
                for addr in record.config.get(&key).into_iter().flatten() {
                    let addr = addr.split('/').next().unwrap_or(addr);
                    ips.push(addr.to_string());
                }
            };
            if want_v4 {
                push("ipv4.address");
            }
            if want_v6 {
                push("ipv6.address");
            }
        }
        Some(ips)
    }

    fn set_cgroup_item(&mut self, key: &str, value: &str) -> bool {
        let own_key = self.key();
        let ok = match self.store().containers.get_mut(&own_key) {
            // only files the controller exposes can be written
            Some(r) if r.state.is_active() && r.cgroup.contains_key(key) => {
                r.cgroup.insert(key.to_string(), value.to_string());
                true
            }
            _ => false,
        };
        if ok {
            self.succeed()
        } else {
            self.fail(libc::ENOENT, format!("cgroup file {} not available", key))
        }
    }

    fn config_path(&mut self) -> Option<String> {
        Some(self.lxcpath.display().to_string())
    }

    fn set_config_path(&mut self, path: &Path) -> bool {
        self.lxcpath = path.to_path_buf();
        let config = self
            .store()
            .containers
            .get(&self.key())
            .map(|r| r.config.clone())
            .unwrap_or_default();
        self.config = config;
        self.succeed()
    }

    fn clone_to(&mut self, new_name: &str, lxcpath: Option<&Path>, flags: i32, bdevtype: Option<&str>) -> bool {
        let target_path = lxcpath.map_or_else(|| self.lxcpath.clone(), Path::to_path_buf);
        let target = (target_path.clone(), new_name.to_string());
        let shared = self.shared.clone();
        let mut store = shared.lock();

        let source = match store.containers.get(&self.key()) {
            Some(r) if !r.state.is_active() => r.clone(),
            Some(_) => return self.fail(libc::EBUSY, "container is running"),
            None => return self.fail(libc::ENOENT, "container is not defined"),
        };
        if store.containers.contains_key(&target) {
            return self.fail(libc::EEXIST, format!("{} already exists", new_name));
        }

        let mut config = source.config;
        if flags & clone_flags::KEEPNAME == 0 {
            config.insert(UTS_NAME_KEY.to_string(), vec![new_name.to_string()]);
        }
        let source_type = config
            .get(ROOTFS_PATH_KEY)
            .and_then(|v| v.last())
            .and_then(|p| p.split_once(':').map(|(t, _)| t.to_string()))
            .unwrap_or_else(|| "dir".to_string());
        let bdev = if flags & clone_flags::KEEPBDEVTYPE != 0 {
            source_type
        } else {
            bdevtype.unwrap_or("dir").to_string()
        };
        config.insert(
            ROOTFS_PATH_KEY.to_string(),
            vec![format!("{}:{}", bdev, target_path.join(new_name).join("rootfs").display())],
        );
        store.containers.insert(target, Record::new(config));
        drop(store);
        self.succeed()
    }

    fn console_getfd(&mut self, _ttynum: i32) -> i32 {
        self.fail(libc::ENOTTY, "no ttys in the memory runtime");
        -1
    }

    fn console(&mut self, _ttynum: i32, _stdin: RawFd, _stdout: RawFd, _stderr: RawFd, _escape: i32) -> i32 {
        self.fail(libc::ENOTTY, "no ttys in the memory runtime");
        -1
    }

    fn attach_shell(&mut self, options: &AttachOptions) -> i32 {
        self.run_wait(options, &["/bin/sh".to_string()])
    }

    fn attach_run_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32 {
        self.run_wait(options, argv)
    }

    fn attach_no_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32 {
        match self.spawn(options, argv) {
            Ok(child) => {
                self.succeed();
                child.id() as i32
            }
            Err(e) => {
                self.fail(e.raw_os_error().unwrap_or(libc::ESRCH), e.to_string());
                -1
            }
        }
    }

    fn execute(&mut self, argv: &[String]) -> Option<Vec<u8>> {
        let Some((program, args)) = argv.split_first() else {
            self.fail(libc::EINVAL, "nothing to execute");
            return None;
        };
        let mut cmd = Command::new(program);
        cmd.args(args);
        match super::combined_output(cmd) {
            Ok((status, output)) if status.success() => {
                self.succeed();
                Some(output)
            }
            Ok((status, _)) => {
                self.fail(libc::EIO, format!("{} exited with {}", program, status));
                None
            }
            Err(e) => {
                self.fail(e.raw_os_error().unwrap_or(libc::ENOEXEC), e.to_string());
                None
            }
        }
    }

    fn snapshot(&mut self, comment_file: Option<&Path>) -> i32 {
        let key = self.key();
        let snaps_dir = self.lxcpath.join(&self.name).join("snaps");
        let mut store = self.store();
        let index = match store.containers.get_mut(&key) {
            Some(r) if !r.state.is_active() => {
                let index = (0..)
                    .find(|i| !r.snapshots.iter().any(|s| s.name == format!("snap{}", i)))
                    .unwrap_or(r.snapshots.len());
                let name = format!("snap{}", index);
                r.snapshots.push(SnapshotRecord {
                    comment: comment_file.map(|_| snaps_dir.join(&name).join("comment")),
                    timestamp: Local::now().format(TIMESTAMP_FORMAT).to_string(),
                    config: r.config.clone(),
                    name,
                });
                Some(index)
            }
            _ => None,
        };
        drop(store);
        match index {
            Some(i) => {
                self.succeed();
                i as i32
            }
            None => {
                self.fail(libc::EBUSY, "container must be defined and stopped");
                -1
            }
        }
    }

    fn snapshot_list(&mut self) -> Option<Vec<Snapshot>> {
        let snaps_dir = self.lxcpath.join(&self.name).join("snaps");
        let store = self.store();
        let record = store.containers.get(&self.key())?;
        Some(
            record
                .snapshots
                .iter()
                .map(|s| Snapshot {
                    name: s.name.clone(),
                    comment_path: s.comment.clone(),
                    timestamp: s.timestamp.clone(),
                    lxcpath: snaps_dir.clone(),
                })
                .collect(),
        )
    }

    fn snapshot_restore(&mut self, snapname: &str, new_name: &str) -> bool {
        let key = self.key();
        let mut store = self.store();
        let snap = store
            .containers
            .get(&key)
            .and_then(|r| r.snapshots.iter().find(|s| s.name == snapname).cloned());
        let snap = match snap {
            Some(s) => s,
            None => {
                drop(store);
                return self.fail(libc::ENOENT, format!("no snapshot {}", snapname));
            }
        };

        if new_name.is_empty() || new_name == self.name {
            let running = store.containers.get(&key).is_some_and(|r| r.state.is_active());
            if running {
                drop(store);
                return self.fail(libc::EBUSY, "container is running");
            }
            if let Some(r) = store.containers.get_mut(&key) {
                r.config = snap.config.clone();
            }
            drop(store);
            self.config = snap.config;
            return self.succeed();
        }

        let target = (self.lxcpath.clone(), new_name.to_string());
        if store.containers.contains_key(&target) {
            drop(store);
            return self.fail(libc::EEXIST, format!("{} already exists", new_name));
        }
        let mut config = snap.config;
        config.insert(UTS_NAME_KEY.to_string(), vec![new_name.to_string()]);
        store.containers.insert(target, Record::new(config));
        drop(store);
        self.succeed()
    }

    fn snapshot_destroy(&mut self, snapname: &str) -> bool {
        let key = self.key();
        let removed = match self.store().containers.get_mut(&key) {
            Some(r) => {
                let before = r.snapshots.len();
                r.snapshots.retain(|s| s.name != snapname);
                r.snapshots.len() != before
            }
            None => false,
        };
        if removed {
            self.succeed()
        } else {
            self.fail(libc::ENOENT, format!("no snapshot {}", snapname))
        }
    }

    fn snapshot_destroy_all(&mut self) -> bool {
        let key = self.key();
        let cleared = self
            .store()
            .containers
            .get_mut(&key)
            .map(|r| r.snapshots.clear())
            .is_some();
        if cleared {
            self.succeed()
        } else {
            self.fail(libc::ENOENT, "container is not defined")
        }
    }

    fn may_control(&mut self) -> bool {
        true
    }

    fn add_device_node(&mut self, src: &str, dst: Option<&str>) -> bool {
        if !Path::new(src).exists() {
            return self.fail(libc::ENOENT, format!("{} does not exist", src));
        }
        let key = self.key();
        let ok = match self.store().containers.get_mut(&key) {
            Some(r) if r.state.is_active() => {
                r.devices.insert(dst.unwrap_or(src).to_string());
                true
            }
            _ => false,
        };
        if ok {
            self.succeed()
        } else {
            self.fail(libc::ESRCH, "container is not running")
        }
    }

    fn remove_device_node(&mut self, src: &str, dst: Option<&str>) -> bool {
        let key = self.key();
        let removed = self
            .store()
            .containers
            .get_mut(&key)
            .is_some_and(|r| r.devices.remove(dst.unwrap_or(src)));
        if removed {
            self.succeed()
        } else {
            self.fail(libc::ENOENT, format!("device {} not present", src))
        }
    }

    fn attach_interface(&mut self, dev: &str, dst: Option<&str>) -> bool {
        let key = self.key();
        let name = dst.unwrap_or(dev).to_string();
        let ok = match self.store().containers.get_mut(&key) {
            Some(r) if r.state.is_active() && !r.extra_interfaces.contains(&name) => {
                r.extra_interfaces.push(name);
                true
            }
            _ => false,
        };
        if ok {
            self.succeed()
        } else {
            self.fail(libc::EINVAL, format!("cannot attach {}", dev))
        }
    }

    fn detach_interface(&mut self, dev: &str, _dst: Option<&str>) -> bool {
        let key = self.key();
        let removed = self.store().containers.get_mut(&key).is_some_and(|r| {
            let before = r.extra_interfaces.len();
            r.extra_interfaces.retain(|n| n != dev);
            r.extra_interfaces.len() != before
        });
        if removed {
            self.succeed()
        } else {
            self.fail(libc::ENODEV, format!("{} is not attached", dev))
        }
    }

    fn checkpoint(&mut self, directory: &Path, stop: bool, _verbose: bool) -> bool {
        self.checkpoint_into(directory, stop)
    }

    fn restore(&mut self, directory: &Path, _verbose: bool) -> bool {
        self.restore_from(directory)
    }

    fn migrate(&mut self, command: MigrateCommand, options: &MigrateOptions) -> i32 {
        let ok = match command {
            MigrateCommand::PreDump => {
                let dir = options.predump().unwrap_or(options.directory()).to_path_buf();
                self.checkpoint_into(&dir, false)
            }
            MigrateCommand::Dump => self.checkpoint_into(options.directory(), options.stops()),
            MigrateCommand::Restore => self.restore_from(options.directory()),
            MigrateCommand::FeatureCheck => {
                let known = MigrateFeatures::MEM_TRACK | MigrateFeatures::LAZY_PAGES;
                if known.contains(options.features()) {
                    self.succeed()
                } else {
                    self.fail(libc::EOPNOTSUPP, "unknown migration feature")
                }
            }
        };
        if ok {
            0
        } else {
            -1
        }
    }

    fn console_log(&mut self, clear: bool, read: bool, read_max: Option<u64>) -> std::result::Result<Vec<u8>, i32> {
        let key = self.key();
        let mut store = self.store();
        let record = match store.containers.get_mut(&key) {
            Some(r) if r.state.is_active() => r,
            _ => return Err(-libc::ESRCH),
        };
        let mut data = Vec::new();
        if read {
            data = record.console.clone();
            if let Some(max) = read_max {
                data.truncate(max as usize);
            }
        }
        if clear {
            record.console.clear();
        }
        Ok(data)
    }

    fn error_num(&mut self) -> i32 {
        self.error.as_ref().map_or(0, |(code, _)| *code)
    }

    fn error_string(&mut self) -> Option<String> {
        self.error.as_ref().map(|(_, msg)| msg.clone())
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        true
    }
}

/// Controller files a freshly started container exposes.
fn default_cgroup(pid: i32) -> BTreeMap<String, String> {
    [
        ("cgroup.procs", pid.to_string()),
        ("memory.current", "8388608".to_string()),
        ("memory.max", "max".to_string()),
        ("memory.high", "max".to_string()),
        ("memory.swap.current", "0".to_string()),
        ("memory.swap.max", "max".to_string()),
        ("memory.stat", "anon 4194304\nfile 2097152\nkernel 1048576\n".to_string()),
        ("cpu.stat", "usage_usec 1500\nuser_usec 1000\nsystem_usec 500\n".to_string()),
        ("io.stat", "8:0 rbytes=4096 wbytes=8192 rios=1 wios=2 dbytes=0 dios=0".to_string()),
        ("pids.current", "1".to_string()),
        ("pids.max", "max".to_string()),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime() -> MemoryRuntime {
        MemoryRuntime::new("/var/lib/lxc")
    }

    fn item(c: &mut Box<dyn ContainerBackend>, key: &str) -> Option<String> {
        crate::ffi::read_sized_string(|buf| c.get_config_item(key, buf))
    }

    #[test]
    fn test_create_defines_and_lists() {
        let rt = runtime();
        let mut c = rt.open("web", None).unwrap();
        assert!(!c.is_defined());
        assert!(c.create("busybox", Some("dir"), 0, &[]));
        assert!(c.is_defined());
        assert_eq!(rt.container_names(None).unwrap(), vec!["web"]);
        assert!(rt.active_container_names(None).unwrap().is_empty());
    }

    #[test]
    fn test_second_handle_sees_saved_state() {
        let rt = runtime();
        let mut a = rt.open("db", None).unwrap();
        a.create("busybox", None, 0, &[]);
        assert!(a.set_config_item("lxc.log.level", "DEBUG"));
        assert!(a.save_config(None));

        let mut b = rt.open("db", None).unwrap();
        assert_eq!(b.get_config_item("lxc.log.level", None), 5);
        assert_eq!(item(&mut b, "lxc.log.level").as_deref(), Some("DEBUG"));
    }

    #[test]
    fn test_unknown_key_rejected() {
        let rt = runtime();
        let mut c = rt.open("x", None).unwrap();
        assert!(!c.set_config_item("lxc.bogus", "1"));
        assert_eq!(c.error_num(), libc::EINVAL);
        assert!(rt.config_item_is_supported("lxc.net.0.type"));
        assert!(!rt.config_item_is_supported("lxc.net."));
    }

    #[test]
    fn test_list_keys_append() {
        let rt = runtime();
        let mut c = rt.open("x", None).unwrap();
        c.set_config_item("lxc.environment", "A=1");
        c.set_config_item("lxc.environment", "B=2");
        c.set_config_item("lxc.uts.name", "one");
        c.set_config_item("lxc.uts.name", "two");
        assert_eq!(item(&mut c, "lxc.environment").as_deref(), Some("A=1\nB=2"));
        assert_eq!(item(&mut c, "lxc.uts.name").as_deref(), Some("two"));
    }

    #[test]
    fn test_net_index_listing() {
        let rt = runtime();
        let mut c = rt.open("x", None).unwrap();
        c.set_config_item("lxc.net.0.type", "veth");
        c.set_config_item("lxc.net.1.type", "empty");
        assert_eq!(item(&mut c, "lxc.net").as_deref(), Some("0\n1\n"));
    }

    #[test]
    fn test_start_requires_rootfs() {
        let rt = runtime();
        let mut c = rt.open("x", None).unwrap();
        c.create("busybox", None, 0, &[]);
        c.clear_config_item(ROOTFS_PATH_KEY);
        assert!(!c.start(false, &[]));
        assert_eq!(c.error_string().as_deref(), Some("no rootfs configured"));
    }

    #[test]
    fn test_pids_are_unique() {
        let rt = runtime();
        let mut a = rt.open("a", None).unwrap();
        let mut b = rt.open("b", None).unwrap();
        a.create("busybox", None, 0, &[]);
        b.create("busybox", None, 0, &[]);
        assert!(a.start(false, &[]));
        assert!(b.start(false, &[]));
        assert_ne!(a.init_pid(), b.init_pid());
        assert!(a.init_pid() >= FIRST_PID);
    }

    #[test]
    fn test_config_file_roundtrip() {
        let config = parse_config_file("# comment\nlxc.uts.name = web\nlxc.mount.entry = a\nlxc.mount.entry = b\n");
        assert_eq!(config["lxc.mount.entry"], vec!["a", "b"]);
        let rendered = render_config_file(&config);
        assert_eq!(parse_config_file(&rendered), config);
    }

    #[test]
    fn test_release_once() {
        let rt = runtime();
        let mut c = rt.open("x", None).unwrap();
        assert!(c.release());
        assert!(!c.release());
    }
}
