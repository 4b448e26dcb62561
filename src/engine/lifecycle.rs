//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container lifecycle management

use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::container::{timeout_secs, Container, Require};
use crate::engine::options::{CloneOptions, TemplateOptions};
use crate::engine::{Lifecycle, State};
use crate::error::{Error, Operation, Result};
use crate::ffi::marshal;

impl Container {
    /// Create the container from a template.
    pub fn create(&self, options: &TemplateOptions) -> Result<()> {
        marshal::check(options.template())?;
        let args = options.to_args();
        marshal::check_all(&args)?;

        let mut inner = self.guarded(Require::NOT_DEFINED)?;
        info!(
            "Creating container {} (template {}, {})",
            inner.name,
            options.template(),
            options.backend_store()
        );

        let flags = inner.verbosity.create_flags();
        let backend = options.backend_store().as_str();
        let ok = inner.backend.create(options.template(), Some(backend), flags, &args);
        inner.ensure(ok, Operation::Create)?;
        inner.believed = Lifecycle::Defined;
        Ok(())
    }

    /// Start the container's configured init.
    pub fn start(&self) -> Result<()> {
        self.start_with(false, &[] as &[&str])
    }

    /// Start with an explicit command. `use_init` runs it under the
    /// runtime's minimal init.
    pub fn start_with<S: AsRef<str>>(&self, use_init: bool, args: &[S]) -> Result<()> {
        marshal::check_all(args)?;
        let args: Vec<String> = args.iter().map(|s| s.as_ref().to_string()).collect();

        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;
        info!("Starting container {}", inner.name);
        let ok = inner.backend.start(use_init, &args);
        inner.ensure(ok, Operation::Start)?;
        inner.believed = Lifecycle::Running;
        Ok(())
    }

    /// Run `args` as a temporary application container under this handle's
    /// name, for a container that is not defined. Returns everything the
    /// command wrote to stdout and stderr.
    pub fn execute<S: AsRef<str>>(&self, args: &[S]) -> Result<Vec<u8>> {
        if args.is_empty() {
            return Err(Error::InsufficientArguments);
        }
        marshal::check_all(args)?;
        let args: Vec<String> = args.iter().map(|s| s.as_ref().to_string()).collect();

        let mut inner = self.guarded(Require::NOT_DEFINED)?;
        info!("Executing {:?} as application container {}", args[0], inner.name);
        match inner.backend.execute(&args) {
            Some(output) => Ok(output),
            None => Err(inner.fail(Operation::Execute)),
        }
    }

    /// Kill the container.
    pub fn stop(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Stopping container {}", inner.name);
        let ok = inner.backend.stop();
        inner.ensure(ok, Operation::Stop)?;
        inner.believed = Lifecycle::Defined;
        Ok(())
    }

    /// Ask init to halt and wait up to `timeout` (forever when `None`).
    /// Never escalates to [`stop`](Self::stop).
    pub fn shutdown(&self, timeout: Option<Duration>) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        let secs = timeout_secs(timeout);
        info!("Shutting down container {} (timeout {}s)", inner.name, secs);

        if inner.backend.shutdown(secs) {
            inner.believed = Lifecycle::Defined;
            return Ok(());
        }

        if inner.backend.is_running() {
            warn!("Container {} still running after shutdown timeout", inner.name);
            return Err(Error::Timeout(State::Stopped));
        }
        Err(inner.fail(Operation::Shutdown))
    }

    /// Restart the container in place.
    pub fn reboot(&self) -> Result<()> {
        self.reboot_with_timeout(Some(Duration::ZERO))
    }

    /// Restart and wait up to `timeout` for the reboot to happen.
    pub fn reboot_with_timeout(&self, timeout: Option<Duration>) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        info!("Rebooting container {}", inner.name);
        let ok = inner.backend.reboot(timeout_secs(timeout));
        inner.ensure(ok, Operation::Reboot)?;
        inner.believed = Lifecycle::Running;
        Ok(())
    }

    pub fn freeze(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        if inner.current_state() == State::Frozen {
            return Err(Error::AlreadyFrozen);
        }
        info!("Freezing container {}", inner.name);
        let ok = inner.backend.freeze();
        inner.ensure(ok, Operation::Freeze)?;
        inner.believed = Lifecycle::Frozen;
        Ok(())
    }

    pub fn unfreeze(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::RUNNING)?;
        if inner.current_state() != State::Frozen {
            return Err(Error::NotFrozen);
        }
        info!("Unfreezing container {}", inner.name);
        let ok = inner.backend.unfreeze();
        inner.ensure(ok, Operation::Unfreeze)?;
        inner.believed = Lifecycle::Running;
        Ok(())
    }

    /// Remove the container's config and rootfs. Irreversible.
    pub fn destroy(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;
        info!("Destroying container {}", inner.name);
        let ok = inner.backend.destroy();
        inner.ensure(ok, Operation::Destroy)?;
        inner.believed = Lifecycle::Undefined;
        Ok(())
    }

    pub fn destroy_with_all_snapshots(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;
        info!("Destroying container {} and its snapshots", inner.name);
        let ok = inner.backend.destroy_with_snapshots();
        inner.ensure(ok, Operation::DestroyWithAllSnapshots)?;
        inner.believed = Lifecycle::Undefined;
        Ok(())
    }

    /// Block until the container reaches `state` or `timeout` passes.
    /// Returns false on timeout; never changes anything.
    pub fn wait(&self, state: State, timeout: Option<Duration>) -> bool {
        let mut inner = self.lock();
        debug!("Waiting for {} to reach {}", inner.name, state);
        inner.backend.wait(state.as_str(), timeout_secs(timeout))
    }

    /// Copy the stopped container to `new_name`.
    pub fn clone(&self, new_name: &str, options: &CloneOptions) -> Result<()> {
        marshal::check(new_name)?;
        if let Some(path) = options.target_lxcpath() {
            marshal::check(&path.to_string_lossy())?;
        }

        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;
        info!("Cloning container {} to {}", inner.name, new_name);
        let backend = options.backend_store().map(|b| b.as_str());
        let ok = inner.backend.clone_to(
            new_name,
            options.target_lxcpath(),
            options.raw_flags(),
            backend,
        );
        inner.ensure(ok, Operation::Clone)
    }

    pub fn rename(&self, new_name: &str) -> Result<()> {
        marshal::check(new_name)?;

        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;
        info!("Renaming container {} to {}", inner.name, new_name);
        let ok = inner.backend.rename(new_name);
        inner.ensure(ok, Operation::Rename)?;
        inner.name = new_name.to_string();
        Ok(())
    }
}
