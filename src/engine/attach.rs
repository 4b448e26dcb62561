//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Running programs inside a container
//!
//! Attaching enters some or all of the container's namespaces, optionally
//! switches credentials and environment, then runs a program. Failure to get
//! that far is `Error::AttachFailed`; a program that ran and exited badly is
//! an ordinary `ExitStatus`.

use std::ops::{BitOr, BitOrAssign};
use std::os::fd::RawFd;
use std::os::unix::process::ExitStatusExt;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;

use nix::sched::CloneFlags;
use nix::unistd::{Gid, Pid, Uid};
use tracing::{debug, info, warn};

use crate::engine::container::{Container, Require};
use crate::error::{Error, Result};
use crate::ffi::marshal;

/// Attach flags understood by the runtime (`LXC_ATTACH_*`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttachFlags(i32);

impl AttachFlags {
    pub const MOVE_TO_CGROUP: Self = Self(0x0000_0001);
    pub const DROP_CAPABILITIES: Self = Self(0x0000_0002);
    pub const SET_PERSONALITY: Self = Self(0x0000_0004);
    pub const LSM_EXEC: Self = Self(0x0000_0008);
    pub const REMOUNT_PROC_SYS: Self = Self(0x0001_0000);
    pub const LSM_NOW: Self = Self(0x0002_0000);
    pub const NO_NEW_PRIVS: Self = Self(0x0004_0000);
    pub const TERMINAL: Self = Self(0x0008_0000);
    pub const LSM_LABEL: Self = Self(0x0010_0000);
    pub const SETGROUPS: Self = Self(0x0020_0000);
    /// Everything in the low 16 bits; what the runtime does when not told otherwise.
    pub const DEFAULT: Self = Self(0x0000_FFFF);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> i32 {
        self.0
    }

    pub const fn from_bits(bits: i32) -> Self {
        Self(bits)
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }
}

impl Default for AttachFlags {
    fn default() -> Self {
        Self::DEFAULT
    }
}

impl BitOr for AttachFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AttachFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// How the attached process's environment is seeded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EnvPolicy {
    /// Inherit the caller's environment.
    #[default]
    Keep,
    /// Start empty apart from `env_to_keep` and `env`.
    Clear,
}

/// Execution domain for the attached process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Personality {
    X86,
    X86_64,
    Raw(i64),
}

impl Personality {
    pub fn as_raw(&self) -> i64 {
        match self {
            // PER_LINUX32
            Personality::X86 => 0x0008,
            // PER_LINUX
            Personality::X86_64 => 0x0000,
            Personality::Raw(v) => *v,
        }
    }
}

/// Options for attaching to a container.
#[derive(Debug, Clone)]
pub struct AttachOptions {
    namespaces: Option<CloneFlags>,
    personality: Option<Personality>,
    uid: Option<Uid>,
    gid: Option<Gid>,
    groups: Vec<Gid>,
    cwd: Option<PathBuf>,
    env_policy: EnvPolicy,
    env: Vec<(String, String)>,
    env_to_keep: Vec<String>,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    flags: AttachFlags,
    remount_sys_proc: bool,
    elevated_privileges: bool,
}

impl Default for AttachOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl AttachOptions {
    /// Runtime defaults: every namespace, container credentials, caller's
    /// stdio and environment.
    pub fn new() -> Self {
        Self {
            namespaces: None,
            personality: None,
            uid: None,
            gid: None,
            groups: Vec::new(),
            cwd: None,
            env_policy: EnvPolicy::Keep,
            env: Vec::new(),
            env_to_keep: Vec::new(),
            stdin_fd: 0,
            stdout_fd: 1,
            stderr_fd: 2,
            flags: AttachFlags::DEFAULT,
            remount_sys_proc: false,
            elevated_privileges: false,
        }
    }

    /// Namespaces to enter. Unset means all of them.
    pub fn namespaces(mut self, namespaces: CloneFlags) -> Self {
        self.namespaces = Some(namespaces);
        self
    }

    pub fn personality(mut self, personality: Personality) -> Self {
        self.personality = Some(personality);
        self
    }

    pub fn uid(mut self, uid: Uid) -> Self {
        self.uid = Some(uid);
        self
    }

    pub fn gid(mut self, gid: Gid) -> Self {
        self.gid = Some(gid);
        self
    }

    /// Supplementary groups. Setting any replaces the account's own list.
    pub fn groups(mut self, groups: Vec<Gid>) -> Self {
        self.groups = groups;
        self
    }

    pub fn cwd(mut self, cwd: impl Into<PathBuf>) -> Self {
        self.cwd = Some(cwd.into());
        self
    }

    pub fn env_policy(mut self, policy: EnvPolicy) -> Self {
        self.env_policy = policy;
        self
    }

    pub fn clear_env(self, clear: bool) -> Self {
        self.env_policy(if clear { EnvPolicy::Clear } else { EnvPolicy::Keep })
    }

    /// Extra variable; wins over anything inherited or kept.
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    /// Variable preserved when the environment is cleared.
    pub fn keep_env(mut self, key: impl Into<String>) -> Self {
        self.env_to_keep.push(key.into());
        self
    }

    /// Stdio descriptors handed to the attached process. They stay owned by
    /// the caller and are never closed.
    pub fn stdio(mut self, stdin: RawFd, stdout: RawFd, stderr: RawFd) -> Self {
        self.stdin_fd = stdin;
        self.stdout_fd = stdout;
        self.stderr_fd = stderr;
        self
    }

    pub fn flags(mut self, flags: AttachFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn remount_sys_proc(mut self, remount: bool) -> Self {
        self.remount_sys_proc = remount;
        self
    }

    /// Keep capabilities, skip the LSM transition and stay in the caller's cgroup.
    pub fn elevated_privileges(mut self, elevated: bool) -> Self {
        self.elevated_privileges = elevated;
        self
    }

    // Resolved values, in the shape the runtime takes them.

    /// Attach flags with the boolean switches folded in.
    pub fn effective_flags(&self) -> AttachFlags {
        let mut flags = self.flags;
        if self.remount_sys_proc {
            flags.insert(AttachFlags::REMOUNT_PROC_SYS);
        }
        if self.elevated_privileges {
            flags.remove(AttachFlags::DROP_CAPABILITIES);
            flags.remove(AttachFlags::LSM_EXEC);
            flags.remove(AttachFlags::MOVE_TO_CGROUP);
        }
        if !self.groups.is_empty() {
            flags.insert(AttachFlags::SETGROUPS);
        }
        flags
    }

    /// Namespace bitset, `-1` when unset.
    pub fn raw_namespaces(&self) -> i32 {
        self.namespaces.map_or(-1, |ns| ns.bits())
    }

    /// Personality, `-1` when unset.
    pub fn raw_personality(&self) -> i64 {
        self.personality.map_or(-1, |p| p.as_raw())
    }

    pub fn target_uid(&self) -> Option<Uid> {
        self.uid
    }

    pub fn target_gid(&self) -> Option<Gid> {
        self.gid
    }

    pub fn target_groups(&self) -> &[Gid] {
        &self.groups
    }

    pub fn initial_cwd(&self) -> Option<&Path> {
        self.cwd.as_deref()
    }

    pub fn policy(&self) -> EnvPolicy {
        self.env_policy
    }

    pub fn extra_env(&self) -> &[(String, String)] {
        &self.env
    }

    /// Extra variables as `KEY=VALUE`.
    pub fn extra_env_vars(&self) -> Vec<String> {
        self.env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()
    }

    pub fn kept_env(&self) -> &[String] {
        &self.env_to_keep
    }

    pub fn stdin_fd(&self) -> RawFd {
        self.stdin_fd
    }

    pub fn stdout_fd(&self) -> RawFd {
        self.stdout_fd
    }

    pub fn stderr_fd(&self) -> RawFd {
        self.stderr_fd
    }

    fn validate(&self) -> Result<()> {
        for (key, value) in &self.env {
            marshal::check(key)?;
            marshal::check(value)?;
        }
        marshal::check_all(&self.env_to_keep)?;
        if let Some(cwd) = &self.cwd {
            marshal::check(&cwd.to_string_lossy())?;
        }
        Ok(())
    }
}

/// Reported when supplementary groups were requested but the runtime
/// cannot set them on the attached process.
const GROUPS_UNSUPPORTED: &str = "attach groups";

/// Turn a raw wait status into an exit status.
///
/// A negative status means the runtime never got a process going. An exit
/// code of 255 is how the attach helper reports a failed exec, so it is
/// treated the same way; a program that really exits 255 is indistinguishable.
pub(crate) fn decode_status(status: i32) -> Result<ExitStatus> {
    if status == -libc::ENOSYS {
        return Err(Error::NotSupported(GROUPS_UNSUPPORTED));
    }
    if status < 0 {
        return Err(Error::AttachFailed);
    }
    let status = ExitStatus::from_raw(status);
    if status.code() == Some(255) {
        return Err(Error::AttachFailed);
    }
    Ok(status)
}

impl Container {
    /// Run a command inside the container and wait for it.
    pub fn run_command_status<S: AsRef<str>>(
        &self,
        argv: &[S],
        options: &AttachOptions,
    ) -> Result<ExitStatus> {
        let argv = owned_argv(argv)?;
        options.validate()?;

        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        debug!("Attaching to {}: {:?}", inner.name, argv);
        let status = inner.backend.attach_run_wait(options, &argv);
        if status < 0 {
            warn!("Attach to {} failed before the command ran", inner.name);
        }
        decode_status(status)
    }

    /// Run a command inside the container; true when it exited 0.
    pub fn run_command<S: AsRef<str>>(&self, argv: &[S], options: &AttachOptions) -> Result<bool> {
        Ok(self.run_command_status(argv, options)?.success())
    }

    /// Start a command inside the container without waiting. The caller owns
    /// reaping the returned pid.
    pub fn run_command_no_wait<S: AsRef<str>>(
        &self,
        argv: &[S],
        options: &AttachOptions,
    ) -> Result<Pid> {
        let argv = owned_argv(argv)?;
        options.validate()?;

        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let pid = inner.backend.attach_no_wait(options, &argv);
        if pid == -libc::ENOSYS {
            return Err(Error::NotSupported(GROUPS_UNSUPPORTED));
        }
        if pid <= 0 {
            return Err(Error::AttachFailed);
        }
        info!("Attached {:?} to {} as pid {}", argv[0], inner.name, pid);
        Ok(Pid::from_raw(pid))
    }

    /// Run an interactive shell on the option's stdio and wait for it.
    pub fn attach_shell(&self, options: &AttachOptions) -> Result<ExitStatus> {
        options.validate()?;

        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        debug!("Attaching shell to {}", inner.name);
        let status = inner.backend.attach_shell(options);
        decode_status(status)
    }
}

fn owned_argv<S: AsRef<str>>(argv: &[S]) -> Result<Vec<String>> {
    if argv.is_empty() {
        return Err(Error::InsufficientArguments);
    }
    marshal::check_all(argv)?;
    Ok(argv.iter().map(|s| s.as_ref().to_string()).collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_leave_everything_to_the_runtime() {
        let opts = AttachOptions::new();
        assert_eq!(opts.raw_namespaces(), -1);
        assert_eq!(opts.raw_personality(), -1);
        assert!(opts.target_uid().is_none());
        assert!(opts.target_gid().is_none());
        assert_eq!(opts.policy(), EnvPolicy::Keep);
        assert_eq!(opts.effective_flags(), AttachFlags::DEFAULT);
        assert_eq!((opts.stdin_fd(), opts.stdout_fd(), opts.stderr_fd()), (0, 1, 2));
    }

    #[test]
    fn test_elevated_privileges_drops_confinement_flags() {
        let flags = AttachOptions::new().elevated_privileges(true).effective_flags();
        assert!(!flags.contains(AttachFlags::DROP_CAPABILITIES));
        assert!(!flags.contains(AttachFlags::LSM_EXEC));
        assert!(!flags.contains(AttachFlags::MOVE_TO_CGROUP));
        assert!(flags.contains(AttachFlags::SET_PERSONALITY));
    }

    #[test]
    fn test_remount_and_groups_add_flags() {
        let flags = AttachOptions::new()
            .remount_sys_proc(true)
            .groups(vec![Gid::from_raw(10)])
            .effective_flags();
        assert!(flags.contains(AttachFlags::REMOUNT_PROC_SYS));
        assert!(flags.contains(AttachFlags::SETGROUPS));
    }

    #[test]
    fn test_namespaces_and_personality() {
        let opts = AttachOptions::new()
            .namespaces(CloneFlags::CLONE_NEWNS | CloneFlags::CLONE_NEWPID)
            .personality(Personality::X86);
        assert_eq!(
            opts.raw_namespaces(),
            libc::CLONE_NEWNS | libc::CLONE_NEWPID
        );
        assert_eq!(opts.raw_personality(), 0x0008);
    }

    #[test]
    fn test_env_pairs_render() {
        let opts = AttachOptions::new().env("FOO", "bar").env("A", "b=c");
        assert_eq!(opts.extra_env_vars(), vec!["FOO=bar", "A=b=c"]);
    }

    #[test]
    fn test_decode_status() {
        assert!(matches!(decode_status(-1), Err(Error::AttachFailed)));
        assert!(matches!(decode_status(255 << 8), Err(Error::AttachFailed)));
        assert_eq!(decode_status(37 << 8).unwrap().code(), Some(37));
        assert_eq!(decode_status(0).unwrap().code(), Some(0));
        // killed by SIGKILL
        assert_eq!(decode_status(9).unwrap().signal(), Some(9));
    }

    #[test]
    fn test_unsupported_groups_never_succeed() {
        assert!(matches!(
            decode_status(-libc::ENOSYS),
            Err(Error::NotSupported("attach groups"))
        ));
    }

    #[test]
    fn test_empty_argv_rejected() {
        assert!(matches!(
            owned_argv::<&str>(&[]),
            Err(Error::InsufficientArguments)
        ));
    }
}
