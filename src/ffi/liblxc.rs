//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! FFI bindings to liblxc and the `lxcctl_*` shim
//!
//! liblxc exposes a handful of free functions plus a function table on
//! `struct lxc_container`. The free functions are declared directly; the
//! table entries go through the flat wrappers in `csrc/lxc_shim.c`.

#![allow(non_camel_case_types)]

use std::os::raw::{c_char, c_int, c_long, c_uint};
use std::ptr;

use libc::{gid_t, pid_t, size_t, uid_t};

/// Opaque liblxc container handle.
#[repr(C)]
pub struct lxc_container {
    _private: [u8; 0],
}

/// Mirror of `struct lxc_snapshot` from `lxccontainer.h`.
#[repr(C)]
pub struct lxc_snapshot {
    pub name: *mut c_char,
    pub comment_pathname: *mut c_char,
    pub timestamp: *mut c_char,
    pub lxcpath: *mut c_char,
    pub free: Option<unsafe extern "C" fn(*mut lxc_snapshot)>,
}

/// Flattened attach parameters, see `struct lxcctl_attach_args`.
#[repr(C)]
pub struct lxcctl_attach_args {
    pub attach_flags: c_int,
    pub namespaces: c_int,
    pub personality: c_long,
    pub uid: uid_t,
    pub gid: gid_t,
    pub ngroups: size_t,
    pub groups: *mut gid_t,
    pub clear_env: bool,
    pub initial_cwd: *mut c_char,
    pub extra_env_vars: *mut *mut c_char,
    pub extra_keep_env: *mut *mut c_char,
    pub stdin_fd: c_int,
    pub stdout_fd: c_int,
    pub stderr_fd: c_int,
}

/// Flattened migrate parameters, see `struct lxcctl_migrate_args`.
#[repr(C)]
pub struct lxcctl_migrate_args {
    pub cmd: c_uint,
    pub directory: *mut c_char,
    pub verbose: bool,
    pub stop: bool,
    pub predump_dir: *mut c_char,
    pub preserves_inodes: bool,
    pub action_script: *mut c_char,
    pub ghost_limit: u64,
    pub features_to_check: u64,
}

// liblxc exports
extern "C" {
    pub fn lxc_container_new(name: *const c_char, configpath: *const c_char) -> *mut lxc_container;
    pub fn lxc_container_put(c: *mut lxc_container) -> c_int;
    pub fn lxc_get_version() -> *const c_char;
    pub fn lxc_get_global_config_item(key: *const c_char) -> *const c_char;
    pub fn lxc_config_item_is_supported(key: *const c_char) -> bool;
    pub fn lxc_has_api_extension(extension: *const c_char) -> bool;
    pub fn list_defined_containers(
        lxcpath: *const c_char,
        names: *mut *mut *mut c_char,
        cret: *mut *mut *mut lxc_container,
    ) -> c_int;
    pub fn list_active_containers(
        lxcpath: *const c_char,
        names: *mut *mut *mut c_char,
        cret: *mut *mut *mut lxc_container,
    ) -> c_int;
    pub fn list_all_containers(
        lxcpath: *const c_char,
        names: *mut *mut *mut c_char,
        cret: *mut *mut *mut lxc_container,
    ) -> c_int;
}

// shim exports
extern "C" {
    pub fn lxcctl_name(c: *mut lxc_container) -> *const c_char;
    pub fn lxcctl_defined(c: *mut lxc_container) -> bool;
    pub fn lxcctl_state(c: *mut lxc_container) -> *const c_char;
    pub fn lxcctl_running(c: *mut lxc_container) -> bool;
    pub fn lxcctl_freeze(c: *mut lxc_container) -> bool;
    pub fn lxcctl_unfreeze(c: *mut lxc_container) -> bool;
    pub fn lxcctl_init_pid(c: *mut lxc_container) -> pid_t;
    pub fn lxcctl_init_pidfd(c: *mut lxc_container) -> c_int;
    pub fn lxcctl_devpts_fd(c: *mut lxc_container) -> c_int;
    pub fn lxcctl_seccomp_notify_fd(c: *mut lxc_container) -> c_int;
    pub fn lxcctl_seccomp_notify_fd_active(c: *mut lxc_container) -> c_int;
    pub fn lxcctl_load_config(c: *mut lxc_container, alt_file: *const c_char) -> bool;
    pub fn lxcctl_save_config(c: *mut lxc_container, alt_file: *const c_char) -> bool;
    pub fn lxcctl_start(c: *mut lxc_container, useinit: c_int, argv: *const *mut c_char) -> bool;
    pub fn lxcctl_stop(c: *mut lxc_container) -> bool;
    pub fn lxcctl_want_daemonize(c: *mut lxc_container, state: bool) -> bool;
    pub fn lxcctl_want_close_all_fds(c: *mut lxc_container, state: bool) -> bool;
    pub fn lxcctl_daemonize(c: *mut lxc_container) -> bool;
    pub fn lxcctl_config_file_name(c: *mut lxc_container) -> *mut c_char;
    pub fn lxcctl_wait(c: *mut lxc_container, state: *const c_char, timeout: c_int) -> bool;
    pub fn lxcctl_set_config_item(c: *mut lxc_container, key: *const c_char, value: *const c_char) -> bool;
    pub fn lxcctl_destroy(c: *mut lxc_container) -> bool;
    pub fn lxcctl_destroy_with_snapshots(c: *mut lxc_container) -> bool;
    pub fn lxcctl_create(
        c: *mut lxc_container,
        t: *const c_char,
        bdevtype: *const c_char,
        flags: c_int,
        argv: *const *mut c_char,
    ) -> bool;
    pub fn lxcctl_rename(c: *mut lxc_container, newname: *const c_char) -> bool;
    pub fn lxcctl_reboot(c: *mut lxc_container, timeout: c_int) -> bool;
    pub fn lxcctl_shutdown(c: *mut lxc_container, timeout: c_int) -> bool;
    pub fn lxcctl_clear_config(c: *mut lxc_container);
    pub fn lxcctl_clear_config_item(c: *mut lxc_container, key: *const c_char) -> bool;
    pub fn lxcctl_get_config_item(c: *mut lxc_container, key: *const c_char, retv: *mut c_char, inlen: c_int) -> c_int;
    pub fn lxcctl_get_running_config_item(c: *mut lxc_container, key: *const c_char) -> *mut c_char;
    pub fn lxcctl_get_keys(c: *mut lxc_container, prefix: *const c_char, retv: *mut c_char, inlen: c_int) -> c_int;
    pub fn lxcctl_get_interfaces(c: *mut lxc_container) -> *mut *mut c_char;
    pub fn lxcctl_get_ips(
        c: *mut lxc_container,
        interface: *const c_char,
        family: *const c_char,
        scope: c_int,
    ) -> *mut *mut c_char;
    pub fn lxcctl_get_cgroup_item(c: *mut lxc_container, key: *const c_char, retv: *mut c_char, inlen: c_int) -> c_int;
    pub fn lxcctl_set_cgroup_item(c: *mut lxc_container, key: *const c_char, value: *const c_char) -> bool;
    pub fn lxcctl_get_config_path(c: *mut lxc_container) -> *const c_char;
    pub fn lxcctl_set_config_path(c: *mut lxc_container, path: *const c_char) -> bool;
    pub fn lxcctl_clone(
        c: *mut lxc_container,
        newname: *const c_char,
        lxcpath: *const c_char,
        flags: c_int,
        bdevtype: *const c_char,
    ) -> bool;
    pub fn lxcctl_console_getfd(c: *mut lxc_container, ttynum: c_int) -> c_int;
    pub fn lxcctl_console(
        c: *mut lxc_container,
        ttynum: c_int,
        stdinfd: c_int,
        stdoutfd: c_int,
        stderrfd: c_int,
        escape: c_int,
    ) -> c_int;
    pub fn lxcctl_attach_shell(c: *mut lxc_container, args: *const lxcctl_attach_args) -> c_int;
    pub fn lxcctl_attach_run_wait(
        c: *mut lxc_container,
        args: *const lxcctl_attach_args,
        argv: *const *const c_char,
    ) -> c_int;
    pub fn lxcctl_attach_no_wait(
        c: *mut lxc_container,
        args: *const lxcctl_attach_args,
        argv: *const *const c_char,
        attached_pid: *mut pid_t,
    ) -> c_int;
    pub fn lxcctl_snapshot(c: *mut lxc_container, commentfile: *const c_char) -> c_int;
    pub fn lxcctl_snapshot_list(c: *mut lxc_container, ret: *mut *mut lxc_snapshot) -> c_int;
    pub fn lxcctl_snapshot_list_free(snapshots: *mut lxc_snapshot, count: c_int);
    pub fn lxcctl_snapshot_restore(c: *mut lxc_container, snapname: *const c_char, newname: *const c_char) -> bool;
    pub fn lxcctl_snapshot_destroy(c: *mut lxc_container, snapname: *const c_char) -> bool;
    pub fn lxcctl_snapshot_destroy_all(c: *mut lxc_container) -> bool;
    pub fn lxcctl_may_control(c: *mut lxc_container) -> bool;
    pub fn lxcctl_add_device_node(c: *mut lxc_container, src_path: *const c_char, dest_path: *const c_char) -> bool;
    pub fn lxcctl_remove_device_node(c: *mut lxc_container, src_path: *const c_char, dest_path: *const c_char) -> bool;
    pub fn lxcctl_attach_interface(c: *mut lxc_container, dev: *const c_char, dst_dev: *const c_char) -> bool;
    pub fn lxcctl_detach_interface(c: *mut lxc_container, dev: *const c_char, dst_dev: *const c_char) -> bool;
    pub fn lxcctl_checkpoint(c: *mut lxc_container, directory: *mut c_char, stop: bool, verbose: bool) -> bool;
    pub fn lxcctl_restore(c: *mut lxc_container, directory: *mut c_char, verbose: bool) -> bool;
    pub fn lxcctl_migrate(c: *mut lxc_container, args: *const lxcctl_migrate_args) -> c_int;
    pub fn lxcctl_console_log(
        c: *mut lxc_container,
        clear: bool,
        read: bool,
        read_max: *mut u64,
        data: *mut *mut c_char,
    ) -> c_int;
    pub fn lxcctl_error_num(c: *mut lxc_container) -> c_int;
    pub fn lxcctl_error_string(c: *mut lxc_container) -> *const c_char;
    pub fn lxcctl_free_string_array(array: *mut *mut c_char);
}

/// Take ownership of a malloc'd C string, copy it and free the original.
///
/// # Safety
/// `ptr` must be NULL or a string allocated with `malloc`.
pub unsafe fn take_string(ptr: *mut c_char) -> Option<String> {
    let value = super::marshal::from_cstr(ptr);
    if !ptr.is_null() {
        libc::free(ptr as *mut libc::c_void);
    }
    value
}

/// Take ownership of a NULL-terminated, malloc'd `char**`.
///
/// # Safety
/// `array` must be NULL or an array whose elements and backing storage
/// were allocated with `malloc`.
pub unsafe fn take_string_array(array: *mut *mut c_char) -> Option<Vec<String>> {
    if array.is_null() {
        return None;
    }

    let mut values = Vec::new();
    let mut cursor = array;
    while !(*cursor).is_null() {
        if let Some(value) = super::marshal::from_cstr(*cursor) {
            values.push(value);
        }
        cursor = cursor.add(1);
    }
    lxcctl_free_string_array(array);
    Some(values)
}

/// Take ownership of a counted name list from `list_*_containers`.
///
/// # Safety
/// `names` must be NULL or hold `count` malloc'd strings.
pub unsafe fn take_counted_names(names: *mut *mut c_char, count: c_int) -> Vec<String> {
    if names.is_null() {
        return Vec::new();
    }

    let mut values = Vec::with_capacity(count.max(0) as usize);
    for i in 0..count.max(0) as usize {
        let entry = *names.add(i);
        if let Some(value) = take_string(entry) {
            values.push(value);
        }
    }
    libc::free(names as *mut libc::c_void);
    values
}

/// Empty attach arguments with every id and descriptor left at its default.
pub fn empty_attach_args() -> lxcctl_attach_args {
    lxcctl_attach_args {
        attach_flags: 0,
        namespaces: -1,
        personality: -1,
        uid: uid_t::MAX,
        gid: gid_t::MAX,
        ngroups: 0,
        groups: ptr::null_mut(),
        clear_env: false,
        initial_cwd: ptr::null_mut(),
        extra_env_vars: ptr::null_mut(),
        extra_keep_env: ptr::null_mut(),
        stdin_fd: 0,
        stdout_fd: 1,
        stderr_fd: 2,
    }
}
