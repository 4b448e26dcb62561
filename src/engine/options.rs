//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Option builders for create, clone and console

use std::fmt;
use std::os::fd::RawFd;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Error;

/// Backing store for a container's root filesystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendStore {
    #[default]
    Dir,
    Btrfs,
    Lvm,
    Zfs,
    Overlayfs,
    Loop,
    /// Let the runtime pick.
    Best,
}

impl BackendStore {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendStore::Dir => "dir",
            BackendStore::Btrfs => "btrfs",
            BackendStore::Lvm => "lvm",
            BackendStore::Zfs => "zfs",
            BackendStore::Overlayfs => "overlayfs",
            BackendStore::Loop => "loop",
            BackendStore::Best => "best",
        }
    }
}

impl fmt::Display for BackendStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackendStore {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dir" | "directory" => Ok(BackendStore::Dir),
            "btrfs" => Ok(BackendStore::Btrfs),
            "lvm" => Ok(BackendStore::Lvm),
            "zfs" => Ok(BackendStore::Zfs),
            "overlayfs" | "overlay" => Ok(BackendStore::Overlayfs),
            "loop" => Ok(BackendStore::Loop),
            "best" => Ok(BackendStore::Best),
            _ => Err(Error::parse("backend store", s)),
        }
    }
}

/// How chatty create and friends are on stdout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    Quiet,
    #[default]
    Verbose,
}

/// `LXC_CREATE_QUIET`
pub(crate) const CREATE_QUIET: i32 = 1 << 0;

impl Verbosity {
    pub(crate) fn create_flags(&self) -> i32 {
        match self {
            Verbosity::Quiet => CREATE_QUIET,
            Verbosity::Verbose => 0,
        }
    }
}

/// Template selection and arguments for [`Container::create`](crate::Container::create).
#[derive(Debug, Clone)]
pub struct TemplateOptions {
    template: String,
    backend: BackendStore,
    distro: Option<String>,
    release: Option<String>,
    arch: Option<String>,
    variant: Option<String>,
    server: Option<String>,
    key_id: Option<String>,
    key_server: Option<String>,
    disable_gpg_validation: bool,
    flush_cache: bool,
    force_cache: bool,
    extra_args: Vec<String>,
}

impl TemplateOptions {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            backend: BackendStore::Dir,
            distro: None,
            release: None,
            arch: None,
            variant: None,
            server: None,
            key_id: None,
            key_server: None,
            disable_gpg_validation: false,
            flush_cache: false,
            force_cache: false,
            extra_args: Vec::new(),
        }
    }

    /// The `download` template for a distro image.
    pub fn download(
        distro: impl Into<String>,
        release: impl Into<String>,
        arch: impl Into<String>,
    ) -> Self {
        Self::new("download").distro(distro).release(release).arch(arch)
    }

    pub fn backend(mut self, backend: BackendStore) -> Self {
        self.backend = backend;
        self
    }

    pub fn distro(mut self, distro: impl Into<String>) -> Self {
        self.distro = Some(distro.into());
        self
    }

    pub fn release(mut self, release: impl Into<String>) -> Self {
        self.release = Some(release.into());
        self
    }

    pub fn arch(mut self, arch: impl Into<String>) -> Self {
        self.arch = Some(arch.into());
        self
    }

    pub fn variant(mut self, variant: impl Into<String>) -> Self {
        self.variant = Some(variant.into());
        self
    }

    pub fn server(mut self, server: impl Into<String>) -> Self {
        self.server = Some(server.into());
        self
    }

    pub fn key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn key_server(mut self, key_server: impl Into<String>) -> Self {
        self.key_server = Some(key_server.into());
        self
    }

    pub fn disable_gpg_validation(mut self, disable: bool) -> Self {
        self.disable_gpg_validation = disable;
        self
    }

    pub fn flush_cache(mut self, flush: bool) -> Self {
        self.flush_cache = flush;
        self
    }

    pub fn force_cache(mut self, force: bool) -> Self {
        self.force_cache = force;
        self
    }

    /// Arguments passed through to the template verbatim, after the generated ones.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.extra_args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn backend_store(&self) -> BackendStore {
        self.backend
    }

    /// Full template argument vector.
    pub fn to_args(&self) -> Vec<String> {
        let mut args = Vec::new();
        let mut push = |flag: &str, value: &Option<String>| {
            if let Some(v) = value {
                args.push(flag.to_string());
                args.push(v.clone());
            }
        };

        push("--dist", &self.distro);
        push("--release", &self.release);
        push("--arch", &self.arch);
        push("--variant", &self.variant);
        push("--server", &self.server);
        push("--keyid", &self.key_id);
        push("--keyserver", &self.key_server);

        if self.disable_gpg_validation {
            args.push("--no-validate".to_string());
        }
        if self.flush_cache {
            args.push("--flush-cache".to_string());
        }
        if self.force_cache {
            args.push("--force-cache".to_string());
        }

        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// `LXC_CLONE_*` flags
pub(crate) mod clone_flags {
    pub const KEEPNAME: i32 = 1 << 0;
    pub const KEEPMACADDR: i32 = 1 << 1;
    pub const SNAPSHOT: i32 = 1 << 2;
    pub const KEEPBDEVTYPE: i32 = 1 << 3;
    pub const MAYBE_SNAPSHOT: i32 = 1 << 4;
}

/// Options for [`Container::clone`](crate::Container::clone).
#[derive(Debug, Clone, Default)]
pub struct CloneOptions {
    backend: Option<BackendStore>,
    lxcpath: Option<PathBuf>,
    keep_name: bool,
    keep_mac: bool,
    snapshot: bool,
    maybe_snapshot: bool,
}

impl CloneOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backing store for the copy; unset keeps the source's.
    pub fn backend(mut self, backend: BackendStore) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Where the copy lives; unset means alongside the source.
    pub fn lxcpath(mut self, lxcpath: impl Into<PathBuf>) -> Self {
        self.lxcpath = Some(lxcpath.into());
        self
    }

    /// Keep the source's hostname in the copy.
    pub fn keep_name(mut self, keep: bool) -> Self {
        self.keep_name = keep;
        self
    }

    pub fn keep_mac(mut self, keep: bool) -> Self {
        self.keep_mac = keep;
        self
    }

    /// Copy-on-write clone. Requires a snapshotting backend.
    pub fn snapshot(mut self, snapshot: bool) -> Self {
        self.snapshot = snapshot;
        self
    }

    /// Snapshot when the backend allows it, copy otherwise.
    pub fn maybe_snapshot(mut self, maybe: bool) -> Self {
        self.maybe_snapshot = maybe;
        self
    }

    pub fn target_lxcpath(&self) -> Option<&Path> {
        self.lxcpath.as_deref()
    }

    pub fn backend_store(&self) -> Option<BackendStore> {
        self.backend
    }

    pub fn raw_flags(&self) -> i32 {
        let mut flags = 0;
        if self.keep_name {
            flags |= clone_flags::KEEPNAME;
        }
        if self.keep_mac {
            flags |= clone_flags::KEEPMACADDR;
        }
        if self.snapshot {
            flags |= clone_flags::SNAPSHOT;
        }
        if self.maybe_snapshot {
            flags |= clone_flags::MAYBE_SNAPSHOT;
        }
        if self.backend.is_none() {
            flags |= clone_flags::KEEPBDEVTYPE;
        }
        flags
    }
}

/// Options for [`Container::console`](crate::Container::console).
#[derive(Debug, Clone)]
pub struct ConsoleOptions {
    tty: i32,
    stdin_fd: RawFd,
    stdout_fd: RawFd,
    stderr_fd: RawFd,
    escape: char,
}

impl Default for ConsoleOptions {
    fn default() -> Self {
        Self {
            tty: -1,
            stdin_fd: 0,
            stdout_fd: 1,
            stderr_fd: 2,
            escape: 'a',
        }
    }
}

impl ConsoleOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// tty number; -1 picks the first free one, 0 is the console itself.
    pub fn tty(mut self, tty: i32) -> Self {
        self.tty = tty;
        self
    }

    pub fn stdio(mut self, stdin: RawFd, stdout: RawFd, stderr: RawFd) -> Self {
        self.stdin_fd = stdin;
        self.stdout_fd = stdout;
        self.stderr_fd = stderr;
        self
    }

    /// Escape letter, used as Ctrl+<letter> followed by q.
    pub fn escape(mut self, escape: char) -> Self {
        self.escape = escape;
        self
    }

    pub fn tty_num(&self) -> i32 {
        self.tty
    }

    pub fn fds(&self) -> (RawFd, RawFd, RawFd) {
        (self.stdin_fd, self.stdout_fd, self.stderr_fd)
    }

    /// Escape as the runtime wants it: 1 for 'a', 2 for 'b' and so on.
    pub fn raw_escape(&self) -> i32 {
        let c = self.escape.to_ascii_lowercase();
        if c.is_ascii_lowercase() {
            (c as u8 - b'a' + 1) as i32
        } else {
            1
        }
    }
}

/// Options for [`Container::console_log`](crate::Container::console_log).
#[derive(Debug, Clone, Default)]
pub struct ConsoleLogOptions {
    clear: bool,
    read: bool,
    read_max: Option<u64>,
}

impl ConsoleLogOptions {
    /// Read the whole ring buffer without clearing it.
    pub fn read() -> Self {
        Self {
            clear: false,
            read: true,
            read_max: None,
        }
    }

    pub fn clear(mut self, clear: bool) -> Self {
        self.clear = clear;
        self
    }

    pub fn read_max(mut self, max: u64) -> Self {
        self.read_max = Some(max);
        self
    }

    pub fn clears(&self) -> bool {
        self.clear
    }

    pub fn reads(&self) -> bool {
        self.read
    }

    pub fn max_bytes(&self) -> Option<u64> {
        self.read_max
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_download_args() {
        let args = TemplateOptions::download("ubuntu", "noble", "amd64")
            .variant("cloud")
            .flush_cache(true)
            .arg("--no-install")
            .to_args();
        assert_eq!(
            args,
            vec![
                "--dist", "ubuntu", "--release", "noble", "--arch", "amd64", "--variant",
                "cloud", "--flush-cache", "--no-install",
            ]
        );
    }

    #[test]
    fn test_plain_template_has_only_extra_args() {
        let opts = TemplateOptions::new("busybox").args(["-x", "y"]);
        assert_eq!(opts.template(), "busybox");
        assert_eq!(opts.to_args(), vec!["-x", "y"]);
        assert_eq!(opts.backend_store(), BackendStore::Dir);
    }

    #[test]
    fn test_backend_store_parse() {
        assert_eq!("overlay".parse::<BackendStore>().unwrap(), BackendStore::Overlayfs);
        assert_eq!("ZFS".parse::<BackendStore>().unwrap(), BackendStore::Zfs);
        assert!("ext4".parse::<BackendStore>().is_err());
    }

    #[test]
    fn test_clone_flags() {
        assert_eq!(CloneOptions::new().raw_flags(), clone_flags::KEEPBDEVTYPE);
        let flags = CloneOptions::new()
            .backend(BackendStore::Overlayfs)
            .snapshot(true)
            .keep_mac(true)
            .raw_flags();
        assert_eq!(flags, clone_flags::SNAPSHOT | clone_flags::KEEPMACADDR);
    }

    #[test]
    fn test_console_escape() {
        assert_eq!(ConsoleOptions::new().raw_escape(), 1);
        assert_eq!(ConsoleOptions::new().escape('B').raw_escape(), 2);
        assert_eq!(ConsoleOptions::new().tty_num(), -1);
    }

    #[test]
    fn test_quiet_sets_create_flag() {
        assert_eq!(Verbosity::Quiet.create_flags(), CREATE_QUIET);
        assert_eq!(Verbosity::Verbose.create_flags(), 0);
    }
}
