//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Checkpoint, restore and live migration

use std::ops::BitOr;
use std::path::{Path, PathBuf};

use tracing::info;

use crate::engine::container::{Container, Require};
use crate::engine::Lifecycle;
use crate::error::{Error, Operation, Result};
use crate::ffi::marshal;

/// Migration step passed to the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrateCommand {
    PreDump = 0,
    Dump = 1,
    Restore = 2,
    FeatureCheck = 3,
}

impl MigrateCommand {
    pub fn as_raw(self) -> u32 {
        self as u32
    }
}

/// CRIU features probed by [`MigrateCommand::FeatureCheck`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MigrateFeatures(u64);

impl MigrateFeatures {
    pub const MEM_TRACK: Self = Self(1 << 0);
    pub const LAZY_PAGES: Self = Self(1 << 1);

    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn bits(self) -> u64 {
        self.0
    }

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl BitOr for MigrateFeatures {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Options for [`Container::migrate`].
#[derive(Debug, Clone)]
pub struct MigrateOptions {
    directory: PathBuf,
    verbose: bool,
    stop: bool,
    predump_dir: Option<PathBuf>,
    preserves_inodes: bool,
    action_script: Option<PathBuf>,
    ghost_limit: u64,
    features_to_check: MigrateFeatures,
}

impl MigrateOptions {
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        Self {
            directory: directory.into(),
            verbose: false,
            stop: false,
            predump_dir: None,
            preserves_inodes: false,
            action_script: None,
            ghost_limit: 0,
            features_to_check: MigrateFeatures::empty(),
        }
    }

    pub fn verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Stop the container once the dump is written.
    pub fn stop(mut self, stop: bool) -> Self {
        self.stop = stop;
        self
    }

    /// Directory of a previous pre-dump to build on.
    pub fn predump_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.predump_dir = Some(dir.into());
        self
    }

    pub fn preserves_inodes(mut self, preserves: bool) -> Self {
        self.preserves_inodes = preserves;
        self
    }

    pub fn action_script(mut self, script: impl Into<PathBuf>) -> Self {
        self.action_script = Some(script.into());
        self
    }

    /// Largest ghost file CRIU may dump, in bytes; 0 keeps CRIU's default.
    pub fn ghost_limit(mut self, limit: u64) -> Self {
        self.ghost_limit = limit;
        self
    }

    pub fn features_to_check(mut self, features: MigrateFeatures) -> Self {
        self.features_to_check = features;
        self
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn stops(&self) -> bool {
        self.stop
    }

    pub fn predump(&self) -> Option<&Path> {
        self.predump_dir.as_deref()
    }

    pub fn keeps_inodes(&self) -> bool {
        self.preserves_inodes
    }

    pub fn script(&self) -> Option<&Path> {
        self.action_script.as_deref()
    }

    pub fn ghost_limit_bytes(&self) -> u64 {
        self.ghost_limit
    }

    pub fn features(&self) -> MigrateFeatures {
        self.features_to_check
    }

    fn validate(&self) -> Result<()> {
        for path in [Some(&self.directory), self.predump_dir.as_ref(), self.action_script.as_ref()]
            .into_iter()
            .flatten()
        {
            marshal::check(&path.to_string_lossy())?;
        }
        Ok(())
    }
}

impl Container {
    /// Dump the running container's state into `directory`.
    pub fn checkpoint(&self, directory: &Path, stop: bool, verbose: bool) -> Result<()> {
        marshal::check(&directory.to_string_lossy())?;

        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Checkpointing {} into {}", inner.name, directory.display());
        let ok = inner.backend.checkpoint(directory, stop, verbose);
        inner.ensure(ok, Operation::Checkpoint)?;
        if stop {
            inner.believed = Lifecycle::Defined;
        }
        Ok(())
    }

    /// Bring a checkpointed container back from `directory`.
    pub fn restore(&self, directory: &Path, verbose: bool) -> Result<()> {
        marshal::check(&directory.to_string_lossy())?;

        let mut inner = self.guarded(Require::DEFINED)?;
        info!("Restoring {} from {}", inner.name, directory.display());
        let ok = inner.backend.restore(directory, verbose);
        inner.ensure(ok, Operation::Restore)?;
        inner.believed = Lifecycle::Running;
        Ok(())
    }

    /// Run one migration step. Zero from the runtime is success; anything
    /// else is a failure carrying the runtime's last error.
    pub fn migrate(&self, command: MigrateCommand, options: &MigrateOptions) -> Result<()> {
        options.validate()?;

        let require = match command {
            MigrateCommand::PreDump | MigrateCommand::Dump => Require::DEFINED | Require::RUNNING,
            MigrateCommand::Restore => Require::DEFINED | Require::NOT_RUNNING,
            MigrateCommand::FeatureCheck => Require::NONE,
        };
        let mut inner = self.guarded(require)?;

        info!("Migrate {:?} for {}", command, inner.name);
        let ret = inner.backend.migrate(command, options);
        if ret != 0 {
            return Err(inner.fail(Operation::Migrate));
        }

        match command {
            MigrateCommand::Dump if options.stops() => {
                inner.believed = Lifecycle::Defined
            }
            MigrateCommand::Restore => inner.believed = Lifecycle::Running,
            _ => {}
        }
        Ok(())
    }

    /// Ask the runtime whether CRIU supports `features`.
    pub fn migrate_features_supported(&self, features: MigrateFeatures) -> Result<bool> {
        let options = MigrateOptions::new("/tmp").features_to_check(features);
        match self.migrate(MigrateCommand::FeatureCheck, &options) {
            Ok(()) => Ok(true),
            Err(Error::Failed { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_values() {
        assert_eq!(MigrateCommand::PreDump.as_raw(), 0);
        assert_eq!(MigrateCommand::Dump.as_raw(), 1);
        assert_eq!(MigrateCommand::Restore.as_raw(), 2);
        assert_eq!(MigrateCommand::FeatureCheck.as_raw(), 3);
    }

    #[test]
    fn test_builder_defaults() {
        let opts = MigrateOptions::new("/var/tmp/ckpt");
        assert_eq!(opts.directory(), Path::new("/var/tmp/ckpt"));
        assert!(!opts.is_verbose());
        assert!(!opts.stops());
        assert!(opts.predump().is_none());
        assert_eq!(opts.ghost_limit_bytes(), 0);
        assert!(opts.features().is_empty());
    }

    #[test]
    fn test_features_combine() {
        let both = MigrateFeatures::MEM_TRACK | MigrateFeatures::LAZY_PAGES;
        assert_eq!(both.bits(), 0b11);
        assert!(both.contains(MigrateFeatures::LAZY_PAGES));
    }

    #[test]
    fn test_nul_in_directory_rejected() {
        let opts = MigrateOptions::new("/tmp/a\0b");
        assert!(matches!(opts.validate(), Err(Error::NulByte(_))));
    }
}
