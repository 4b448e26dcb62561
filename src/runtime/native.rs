//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! liblxc runtime
//!
//! Thin adapter from [`ContainerBackend`] onto the flat `lxcctl_*` entry
//! points. Strings that fail C conversion make the call report failure
//! without reaching the library; the caller has normally rejected them
//! already.

use std::ffi::CString;
use std::os::fd::RawFd;
use std::os::raw::{c_char, c_int, c_long};
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::ptr::{self, NonNull};
use std::slice;

use libc::{gid_t, pid_t, uid_t};
use tracing::{debug, trace};

use crate::engine::{AttachOptions, EnvPolicy, MigrateCommand, MigrateOptions, Snapshot};
use crate::error::{Error, Operation, Result};
use crate::ffi::liblxc::{self as lxc, lxc_container};
use crate::ffi::marshal::{self, CStringArray};

use super::{ContainerBackend, ListFilter, Runtime};

fn cstr(s: &str) -> Option<CString> {
    CString::new(s).ok()
}

fn path_cstr(path: &Path) -> Option<CString> {
    CString::new(path.as_os_str().as_bytes()).ok()
}

/// Convert an optional argument. The outer `None` means conversion failed.
fn opt_cstr(s: Option<&str>) -> Option<Option<CString>> {
    match s {
        Some(s) => cstr(s).map(Some),
        None => Some(None),
    }
}

fn opt_ptr(s: &Option<CString>) -> *const c_char {
    s.as_ref().map_or(ptr::null(), |s| s.as_ptr())
}

/// Runtime backed by the system liblxc
#[derive(Debug, Default)]
pub struct NativeRuntime;

impl NativeRuntime {
    pub fn new() -> Self {
        Self
    }
}

impl Runtime for NativeRuntime {
    fn name(&self) -> &'static str {
        "liblxc"
    }

    fn open(&self, name: &str, lxcpath: Option<&Path>) -> Result<Box<dyn ContainerBackend>> {
        let c_name = marshal::to_cstring(name)?;
        let c_path = match lxcpath {
            Some(p) => Some(marshal::to_cstring(&p.to_string_lossy())?),
            None => None,
        };

        // Safety: both strings outlive the call; NULL selects the default path
        let raw = unsafe { lxc::lxc_container_new(c_name.as_ptr(), opt_ptr(&c_path)) };
        let ptr = NonNull::new(raw).ok_or_else(|| Error::NewFailed(name.to_string()))?;
        debug!("allocated liblxc handle for {}", name);

        Ok(Box::new(NativeContainer {
            ptr,
            released: false,
        }))
    }

    fn version(&self) -> String {
        // Safety: returns a static string
        unsafe { marshal::from_cstr(lxc::lxc_get_version()) }.unwrap_or_default()
    }

    fn global_config_item(&self, key: &str) -> Option<String> {
        let key = cstr(key)?;
        // Safety: the library keeps ownership of the returned value
        unsafe { marshal::from_cstr(lxc::lxc_get_global_config_item(key.as_ptr())) }
    }

    fn config_item_is_supported(&self, key: &str) -> bool {
        match cstr(key) {
            // Safety: key outlives the call
            Some(key) => unsafe { lxc::lxc_config_item_is_supported(key.as_ptr()) },
            None => false,
        }
    }

    fn has_api_extension(&self, extension: &str) -> bool {
        match cstr(extension) {
            // Safety: extension outlives the call
            Some(ext) => unsafe { lxc::lxc_has_api_extension(ext.as_ptr()) },
            None => false,
        }
    }

    fn list_containers(&self, lxcpath: Option<&Path>, filter: ListFilter) -> Result<Vec<String>> {
        let c_path = match lxcpath {
            Some(p) => Some(marshal::to_cstring(&p.to_string_lossy())?),
            None => None,
        };
        let list = match filter {
            ListFilter::Defined => lxc::list_defined_containers,
            ListFilter::Active => lxc::list_active_containers,
            ListFilter::All => lxc::list_all_containers,
        };

        let mut names: *mut *mut c_char = ptr::null_mut();
        // Safety: names is an out parameter; handles are not requested
        let count = unsafe { list(opt_ptr(&c_path), &mut names, ptr::null_mut()) };
        if count < 0 {
            return Err(Error::failed(Operation::ListContainers));
        }
        // Safety: the library allocated `count` names with malloc
        Ok(unsafe { lxc::take_counted_names(names, count) })
    }
}

/// Owned reference to a `struct lxc_container`
pub struct NativeContainer {
    ptr: NonNull<lxc_container>,
    released: bool,
}

// Safety: liblxc handles carry their own locks and are not tied to the
// creating thread; `Container` serializes access to this value.
unsafe impl Send for NativeContainer {}

impl Drop for NativeContainer {
    fn drop(&mut self) {
        if !self.released {
            // Safety: the reference taken in `open` has not been dropped yet
            unsafe { lxc::lxc_container_put(self.ptr.as_ptr()) };
        }
    }
}

/// Attach arguments plus the storage their pointers refer to.
struct AttachArgs {
    raw: lxc::lxcctl_attach_args,
    _cwd: Option<CString>,
    _env: CStringArray,
    _keep: CStringArray,
    _groups: Vec<gid_t>,
}

impl AttachArgs {
    fn new(options: &AttachOptions) -> Option<Self> {
        let cwd = match options.initial_cwd() {
            Some(p) => Some(path_cstr(p)?),
            None => None,
        };
        let mut env = CStringArray::new(&options.extra_env_vars()).ok()?;
        let mut keep = CStringArray::new(options.kept_env()).ok()?;
        let mut groups: Vec<gid_t> = options.target_groups().iter().map(|g| g.as_raw()).collect();

        let mut raw = lxc::empty_attach_args();
        raw.attach_flags = options.effective_flags().bits();
        raw.namespaces = options.raw_namespaces();
        raw.personality = options.raw_personality() as c_long;
        raw.uid = options.target_uid().map_or(uid_t::MAX, |u| u.as_raw());
        raw.gid = options.target_gid().map_or(gid_t::MAX, |g| g.as_raw());
        raw.ngroups = groups.len();
        raw.groups = if groups.is_empty() {
            ptr::null_mut()
        } else {
            groups.as_mut_ptr()
        };
        raw.clear_env = options.policy() == EnvPolicy::Clear;
        raw.initial_cwd = cwd.as_ref().map_or(ptr::null_mut(), |c| c.as_ptr() as *mut c_char);
        raw.extra_env_vars = env.as_mut_ptr_or_null();
        raw.extra_keep_env = keep.as_mut_ptr_or_null();
        raw.stdin_fd = options.stdin_fd();
        raw.stdout_fd = options.stdout_fd();
        raw.stderr_fd = options.stderr_fd();

        // heap storage does not move with the struct
        Some(Self {
            raw,
            _cwd: cwd,
            _env: env,
            _keep: keep,
            _groups: groups,
        })
    }
}

impl NativeContainer {
    fn raw(&self) -> *mut lxc_container {
        self.ptr.as_ptr()
    }

    fn sized(&mut self, key: &str, buf: Option<&mut [u8]>, get: SizedGetter) -> i32 {
        let Some(key) = cstr(key) else { return -1 };
        let (retv, inlen) = match buf {
            Some(buf) => (buf.as_mut_ptr() as *mut c_char, buf.len() as c_int),
            None => (ptr::null_mut(), 0),
        };
        // Safety: retv is NULL or a writable buffer of inlen bytes
        unsafe { get(self.raw(), key.as_ptr(), retv, inlen) }
    }

    fn path_call(&mut self, path: Option<&Path>, call: unsafe extern "C" fn(*mut lxc_container, *const c_char) -> bool) -> bool {
        let c_path = match path {
            Some(p) => match path_cstr(p) {
                Some(c) => Some(c),
                None => return false,
            },
            None => None,
        };
        // Safety: c_path is NULL or outlives the call
        unsafe { call(self.raw(), opt_ptr(&c_path)) }
    }

    fn key_value(&mut self, key: &str, value: &str, call: KeyValueCall) -> bool {
        let (Some(key), Some(value)) = (cstr(key), cstr(value)) else {
            return false;
        };
        // Safety: both strings outlive the call
        unsafe { call(self.raw(), key.as_ptr(), value.as_ptr()) }
    }

    fn device_call(&mut self, src: &str, dst: Option<&str>, call: KeyValueCall) -> bool {
        let (Some(src), Some(dst)) = (cstr(src), opt_cstr(dst)) else {
            return false;
        };
        // Safety: src outlives the call; dst is NULL or outlives it
        unsafe { call(self.raw(), src.as_ptr(), opt_ptr(&dst)) }
    }
}

type SizedGetter = unsafe extern "C" fn(*mut lxc_container, *const c_char, *mut c_char, c_int) -> c_int;
type KeyValueCall = unsafe extern "C" fn(*mut lxc_container, *const c_char, *const c_char) -> bool;

impl ContainerBackend for NativeContainer {
    fn is_defined(&mut self) -> bool {
        // Safety: self.ptr is a live handle for every method below
        unsafe { lxc::lxcctl_defined(self.raw()) }
    }

    fn state(&mut self) -> Option<String> {
        unsafe { marshal::from_cstr(lxc::lxcctl_state(self.raw())) }
    }

    fn is_running(&mut self) -> bool {
        unsafe { lxc::lxcctl_running(self.raw()) }
    }

    fn freeze(&mut self) -> bool {
        unsafe { lxc::lxcctl_freeze(self.raw()) }
    }

    fn unfreeze(&mut self) -> bool {
        unsafe { lxc::lxcctl_unfreeze(self.raw()) }
    }

    fn init_pid(&mut self) -> i32 {
        unsafe { lxc::lxcctl_init_pid(self.raw()) }
    }

    fn init_pidfd(&mut self) -> i32 {
        unsafe { lxc::lxcctl_init_pidfd(self.raw()) }
    }

    fn devpts_fd(&mut self) -> i32 {
        unsafe { lxc::lxcctl_devpts_fd(self.raw()) }
    }

    fn seccomp_notify_fd(&mut self) -> i32 {
        unsafe { lxc::lxcctl_seccomp_notify_fd(self.raw()) }
    }

    fn seccomp_notify_fd_active(&mut self) -> i32 {
        unsafe { lxc::lxcctl_seccomp_notify_fd_active(self.raw()) }
    }

    fn load_config(&mut self, alt_file: Option<&Path>) -> bool {
        self.path_call(alt_file, lxc::lxcctl_load_config)
    }

    fn save_config(&mut self, alt_file: Option<&Path>) -> bool {
        self.path_call(alt_file, lxc::lxcctl_save_config)
    }

    fn start(&mut self, use_init: bool, argv: &[String]) -> bool {
        let Ok(mut args) = CStringArray::new(argv) else { return false };
        trace!("lxc start useinit={} argc={}", use_init, args.len());
        unsafe { lxc::lxcctl_start(self.raw(), use_init as c_int, args.as_mut_ptr_or_null()) }
    }

    fn stop(&mut self) -> bool {
        unsafe { lxc::lxcctl_stop(self.raw()) }
    }

    fn want_daemonize(&mut self, state: bool) -> bool {
        unsafe { lxc::lxcctl_want_daemonize(self.raw(), state) }
    }

    fn want_close_all_fds(&mut self, state: bool) -> bool {
        unsafe { lxc::lxcctl_want_close_all_fds(self.raw(), state) }
    }

    fn daemonize(&mut self) -> bool {
        unsafe { lxc::lxcctl_daemonize(self.raw()) }
    }

    fn config_file_name(&mut self) -> Option<String> {
        unsafe { lxc::take_string(lxc::lxcctl_config_file_name(self.raw())) }
    }

    fn wait(&mut self, state: &str, timeout: i32) -> bool {
        let Some(state) = cstr(state) else { return false };
        unsafe { lxc::lxcctl_wait(self.raw(), state.as_ptr(), timeout) }
    }

    fn set_config_item(&mut self, key: &str, value: &str) -> bool {
        self.key_value(key, value, lxc::lxcctl_set_config_item)
    }

    fn destroy(&mut self) -> bool {
        unsafe { lxc::lxcctl_destroy(self.raw()) }
    }

    fn destroy_with_snapshots(&mut self) -> bool {
        unsafe { lxc::lxcctl_destroy_with_snapshots(self.raw()) }
    }

    fn create(&mut self, template: &str, bdevtype: Option<&str>, flags: i32, argv: &[String]) -> bool {
        let (Some(template), Some(bdevtype)) = (cstr(template), opt_cstr(bdevtype)) else {
            return false;
        };
        let Ok(mut args) = CStringArray::new(argv) else { return false };
        unsafe {
            lxc::lxcctl_create(
                self.raw(),
                template.as_ptr(),
                opt_ptr(&bdevtype),
                flags,
                args.as_mut_ptr_or_null(),
            )
        }
    }

    fn rename(&mut self, new_name: &str) -> bool {
        let Some(new_name) = cstr(new_name) else { return false };
        unsafe { lxc::lxcctl_rename(self.raw(), new_name.as_ptr()) }
    }

    fn reboot(&mut self, timeout: i32) -> bool {
        unsafe { lxc::lxcctl_reboot(self.raw(), timeout) }
    }

    fn shutdown(&mut self, timeout: i32) -> bool {
        unsafe { lxc::lxcctl_shutdown(self.raw(), timeout) }
    }

    fn clear_config(&mut self) {
        unsafe { lxc::lxcctl_clear_config(self.raw()) }
    }

    fn clear_config_item(&mut self, key: &str) -> bool {
        let Some(key) = cstr(key) else { return false };
        unsafe { lxc::lxcctl_clear_config_item(self.raw(), key.as_ptr()) }
    }

    fn get_config_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32 {
        self.sized(key, buf, lxc::lxcctl_get_config_item)
    }

    fn get_keys(&mut self, prefix: Option<&str>, buf: Option<&mut [u8]>) -> i32 {
        let Some(prefix) = opt_cstr(prefix) else { return -1 };
        let (retv, inlen) = match buf {
            Some(buf) => (buf.as_mut_ptr() as *mut c_char, buf.len() as c_int),
            None => (ptr::null_mut(), 0),
        };
        unsafe { lxc::lxcctl_get_keys(self.raw(), opt_ptr(&prefix), retv, inlen) }
    }

    fn get_cgroup_item(&mut self, key: &str, buf: Option<&mut [u8]>) -> i32 {
        self.sized(key, buf, lxc::lxcctl_get_cgroup_item)
    }

    fn get_running_config_item(&mut self, key: &str) -> Option<String> {
        let key = cstr(key)?;
        unsafe { lxc::take_string(lxc::lxcctl_get_running_config_item(self.raw(), key.as_ptr())) }
    }

    fn get_interfaces(&mut self) -> Option<Vec<String>> {
        unsafe { lxc::take_string_array(lxc::lxcctl_get_interfaces(self.raw())) }
    }

    fn get_ips(&mut self, interface: Option<&str>, family: Option<&str>, scope: i32) -> Option<Vec<String>> {
        let interface = opt_cstr(interface)?;
        let family = opt_cstr(family)?;
        unsafe {
            lxc::take_string_array(lxc::lxcctl_get_ips(
                self.raw(),
                opt_ptr(&interface),
                opt_ptr(&family),
                scope,
            ))
        }
    }

    fn set_cgroup_item(&mut self, key: &str, value: &str) -> bool {
        self.key_value(key, value, lxc::lxcctl_set_cgroup_item)
    }

    fn config_path(&mut self) -> Option<String> {
        unsafe { marshal::from_cstr(lxc::lxcctl_get_config_path(self.raw())) }
    }

    fn set_config_path(&mut self, path: &Path) -> bool {
        self.path_call(Some(path), lxc::lxcctl_set_config_path)
    }

    fn clone_to(&mut self, new_name: &str, lxcpath: Option<&Path>, flags: i32, bdevtype: Option<&str>) -> bool {
        let (Some(new_name), Some(bdevtype)) = (cstr(new_name), opt_cstr(bdevtype)) else {
            return false;
        };
        let lxcpath = match lxcpath {
            Some(p) => match path_cstr(p) {
                Some(c) => Some(c),
                None => return false,
            },
            None => None,
        };
        unsafe {
            lxc::lxcctl_clone(
                self.raw(),
                new_name.as_ptr(),
                opt_ptr(&lxcpath),
                flags,
                opt_ptr(&bdevtype),
            )
        }
    }

    fn console_getfd(&mut self, ttynum: i32) -> i32 {
        unsafe { lxc::lxcctl_console_getfd(self.raw(), ttynum) }
    }

    fn console(&mut self, ttynum: i32, stdin: RawFd, stdout: RawFd, stderr: RawFd, escape: i32) -> i32 {
        unsafe { lxc::lxcctl_console(self.raw(), ttynum, stdin, stdout, stderr, escape) }
    }

    fn attach_shell(&mut self, options: &AttachOptions) -> i32 {
        let Some(args) = AttachArgs::new(options) else { return -1 };
        unsafe { lxc::lxcctl_attach_shell(self.raw(), &args.raw) }
    }

    fn attach_run_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32 {
        let Some(args) = AttachArgs::new(options) else { return -1 };
        let Ok(argv) = CStringArray::new(argv) else { return -1 };
        unsafe { lxc::lxcctl_attach_run_wait(self.raw(), &args.raw, argv.as_ptr()) }
    }

    fn attach_no_wait(&mut self, options: &AttachOptions, argv: &[String]) -> i32 {
        let Some(args) = AttachArgs::new(options) else { return -1 };
        let Ok(argv) = CStringArray::new(argv) else { return -1 };
        let mut pid: pid_t = -1;
        let ret = unsafe { lxc::lxcctl_attach_no_wait(self.raw(), &args.raw, argv.as_ptr(), &mut pid) };
        if ret < 0 {
            ret
        } else {
            pid
        }
    }

    fn execute(&mut self, argv: &[String]) -> Option<Vec<u8>> {
        // Safety: the name is set at allocation and owned by the handle
        let name = unsafe { marshal::from_cstr(lxc::lxcctl_name(self.raw())) }?;
        let lxcpath = self.config_path()?;

        let mut cmd = Command::new("lxc-execute");
        cmd.args(["-n", name.as_str(), "-P", lxcpath.as_str(), "--"]).args(argv);
        match super::combined_output(cmd) {
            Ok((status, output)) if status.success() => Some(output),
            Ok((status, output)) => {
                debug!(
                    "lxc-execute {} exited with {}: {}",
                    name,
                    status,
                    String::from_utf8_lossy(&output).trim_end()
                );
                None
            }
            Err(e) => {
                debug!("running lxc-execute for {}: {}", name, e);
                None
            }
        }
    }

    fn snapshot(&mut self, comment_file: Option<&Path>) -> i32 {
        let comment = match comment_file {
            Some(p) => match path_cstr(p) {
                Some(c) => Some(c),
                None => return -1,
            },
            None => None,
        };
        unsafe { lxc::lxcctl_snapshot(self.raw(), opt_ptr(&comment)) }
    }

    fn snapshot_list(&mut self) -> Option<Vec<Snapshot>> {
        let mut list: *mut lxc::lxc_snapshot = ptr::null_mut();
        let count = unsafe { lxc::lxcctl_snapshot_list(self.raw(), &mut list) };
        if count < 0 {
            return None;
        }
        if count == 0 || list.is_null() {
            return Some(Vec::new());
        }

        // Safety: the library returned `count` initialised entries
        let entries = unsafe { slice::from_raw_parts(list, count as usize) };
        let snapshots = entries
            .iter()
            .map(|s| unsafe {
                Snapshot {
                    name: marshal::from_cstr(s.name).unwrap_or_default(),
                    comment_path: marshal::from_cstr(s.comment_pathname).map(PathBuf::from),
                    timestamp: marshal::from_cstr(s.timestamp).unwrap_or_default(),
                    lxcpath: PathBuf::from(marshal::from_cstr(s.lxcpath).unwrap_or_default()),
                }
            })
            .collect();
        unsafe { lxc::lxcctl_snapshot_list_free(list, count) };
        Some(snapshots)
    }

    fn snapshot_restore(&mut self, snapname: &str, new_name: &str) -> bool {
        let (Some(snapname), Some(new_name)) = (cstr(snapname), cstr(new_name)) else {
            return false;
        };
        unsafe { lxc::lxcctl_snapshot_restore(self.raw(), snapname.as_ptr(), new_name.as_ptr()) }
    }

    fn snapshot_destroy(&mut self, snapname: &str) -> bool {
        let Some(snapname) = cstr(snapname) else { return false };
        unsafe { lxc::lxcctl_snapshot_destroy(self.raw(), snapname.as_ptr()) }
    }

    fn snapshot_destroy_all(&mut self) -> bool {
        unsafe { lxc::lxcctl_snapshot_destroy_all(self.raw()) }
    }

    fn may_control(&mut self) -> bool {
        unsafe { lxc::lxcctl_may_control(self.raw()) }
    }

    fn add_device_node(&mut self, src: &str, dst: Option<&str>) -> bool {
        self.device_call(src, dst, lxc::lxcctl_add_device_node)
    }

    fn remove_device_node(&mut self, src: &str, dst: Option<&str>) -> bool {
        self.device_call(src, dst, lxc::lxcctl_remove_device_node)
    }

    fn attach_interface(&mut self, dev: &str, dst: Option<&str>) -> bool {
        self.device_call(dev, dst, lxc::lxcctl_attach_interface)
    }

    fn detach_interface(&mut self, dev: &str, dst: Option<&str>) -> bool {
        self.device_call(dev, dst, lxc::lxcctl_detach_interface)
    }

    fn checkpoint(&mut self, directory: &Path, stop: bool, verbose: bool) -> bool {
        let Some(dir) = path_cstr(directory) else { return false };
        // the library does not write through the pointer
        unsafe { lxc::lxcctl_checkpoint(self.raw(), dir.as_ptr() as *mut c_char, stop, verbose) }
    }

    fn restore(&mut self, directory: &Path, verbose: bool) -> bool {
        let Some(dir) = path_cstr(directory) else { return false };
        unsafe { lxc::lxcctl_restore(self.raw(), dir.as_ptr() as *mut c_char, verbose) }
    }

    fn migrate(&mut self, command: MigrateCommand, options: &MigrateOptions) -> i32 {
        let Some(directory) = path_cstr(options.directory()) else { return -1 };
        let predump = match options.predump() {
            Some(p) => match path_cstr(p) {
                Some(c) => Some(c),
                None => return -1,
            },
            None => None,
        };
        let script = match options.script() {
            Some(p) => match path_cstr(p) {
                Some(c) => Some(c),
                None => return -1,
            },
            None => None,
        };

        let args = lxc::lxcctl_migrate_args {
            cmd: command.as_raw(),
            directory: directory.as_ptr() as *mut c_char,
            verbose: options.is_verbose(),
            stop: options.stops(),
            predump_dir: opt_ptr(&predump) as *mut c_char,
            preserves_inodes: options.keeps_inodes(),
            action_script: opt_ptr(&script) as *mut c_char,
            ghost_limit: options.ghost_limit_bytes(),
            features_to_check: options.features().bits(),
        };
        unsafe { lxc::lxcctl_migrate(self.raw(), &args) }
    }

    fn console_log(&mut self, clear: bool, read: bool, read_max: Option<u64>) -> std::result::Result<Vec<u8>, i32> {
        // 0 reads the whole ring buffer
        let mut len: u64 = read_max.unwrap_or(0);
        let mut data: *mut c_char = ptr::null_mut();
        let ret = unsafe { lxc::lxcctl_console_log(self.raw(), clear, read, &mut len, &mut data) };
        if ret < 0 {
            return Err(ret);
        }
        if data.is_null() {
            return Ok(Vec::new());
        }

        // Safety: the library returned `len` bytes allocated with malloc
        let bytes = unsafe { slice::from_raw_parts(data as *const u8, len as usize) }.to_vec();
        unsafe { libc::free(data as *mut libc::c_void) };
        Ok(bytes)
    }

    fn error_num(&mut self) -> i32 {
        unsafe { lxc::lxcctl_error_num(self.raw()) }
    }

    fn error_string(&mut self) -> Option<String> {
        unsafe { marshal::from_cstr(lxc::lxcctl_error_string(self.raw())) }
    }

    fn release(&mut self) -> bool {
        if self.released {
            return false;
        }
        self.released = true;
        // Safety: drops the reference taken in `open`, exactly once
        unsafe { lxc::lxc_container_put(self.raw()) >= 0 }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_reported() {
        assert!(!NativeRuntime::new().version().is_empty());
    }

    #[test]
    fn test_unknown_container_is_undefined() {
        let dir = tempfile::tempdir().unwrap();
        let rt = NativeRuntime::new();
        let mut c = rt.open("lxcctl-does-not-exist", Some(dir.path())).unwrap();
        assert!(!c.is_defined());
        assert!(!c.is_running());
        assert!(c.release());
    }

    #[test]
    fn test_nul_in_name_rejected() {
        let rt = NativeRuntime::new();
        assert!(matches!(rt.open("a\0b", None), Err(Error::NulByte(_))));
    }
}
