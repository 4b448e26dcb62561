//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Lifecycle commands: create, start, stop, shutdown, destroy and friends

use anyhow::{bail, Context, Result};
use clap::Args;
use dialoguer::Confirm;
use std::io::{self, Write};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing::info;

use lxcctl::{BackendStore, CloneOptions, State, TemplateOptions, Verbosity};

use crate::cli::{blocking, Session};

/// Arguments for the `create` command
#[derive(Args, Debug)]
pub struct CreateArgs {
    /// Container name
    pub name: String,

    /// Template to run (default from settings, else "download")
    #[arg(short, long)]
    pub template: Option<String>,

    /// Distribution for the download template
    #[arg(short, long)]
    pub dist: Option<String>,

    /// Release for the download template
    #[arg(short, long)]
    pub release: Option<String>,

    /// Architecture for the download template
    #[arg(short, long)]
    pub arch: Option<String>,

    /// Image variant
    #[arg(long)]
    pub variant: Option<String>,

    /// Image server
    #[arg(long)]
    pub server: Option<String>,

    /// Backing store (dir, btrfs, lvm, zfs, overlayfs, loop, ...)
    #[arg(short = 'B', long)]
    pub bdev: Option<BackendStore>,

    /// Skip GPG validation of downloaded images
    #[arg(long)]
    pub no_validate: bool,

    /// Discard the local image cache first
    #[arg(long)]
    pub flush_cache: bool,

    /// Only use the local image cache
    #[arg(long)]
    pub force_cache: bool,

    /// Suppress template output
    #[arg(short, long)]
    pub quiet: bool,

    /// Extra arguments passed to the template
    #[arg(last = true)]
    pub template_args: Vec<String>,
}

impl CreateArgs {
    fn template_options(&self, default_template: &str) -> TemplateOptions {
        let template = self.template.as_deref().unwrap_or(default_template);
        let mut options = TemplateOptions::new(template)
            .disable_gpg_validation(self.no_validate)
            .flush_cache(self.flush_cache)
            .force_cache(self.force_cache)
            .args(self.template_args.iter().cloned());

        if let Some(bdev) = self.bdev {
            options = options.backend(bdev);
        }
        if let Some(dist) = &self.dist {
            options = options.distro(dist.clone());
        }
        if let Some(release) = &self.release {
            options = options.release(release.clone());
        }
        if let Some(arch) = &self.arch {
            options = options.arch(arch.clone());
        }
        if let Some(variant) = &self.variant {
            options = options.variant(variant.clone());
        }
        if let Some(server) = &self.server {
            options = options.server(server.clone());
        }
        options
    }
}

/// Arguments for the `start` command
#[derive(Args, Debug)]
pub struct StartArgs {
    /// Container names; several are started concurrently
    #[arg(required = true)]
    pub names: Vec<String>,

    /// Run the command through lxc-init
    #[arg(long)]
    pub use_init: bool,

    /// Seconds to wait for each container to reach RUNNING
    #[arg(short, long)]
    pub wait: Option<u64>,

    /// Command to run instead of the configured init
    #[arg(last = true)]
    pub command: Vec<String>,
}

/// Arguments for the `destroy` command
#[derive(Args, Debug)]
pub struct DestroyArgs {
    /// Container name
    pub name: String,

    /// Do not ask for confirmation; stop the container first if needed
    #[arg(short, long)]
    pub force: bool,

    /// Also destroy the container's snapshots
    #[arg(short, long)]
    pub snapshots: bool,
}

/// Arguments for the `wait` command
#[derive(Args, Debug)]
pub struct WaitArgs {
    /// Container name
    pub name: String,

    /// State to wait for (STOPPED, RUNNING, FROZEN, ...)
    pub state: State,

    /// Seconds to wait before giving up (default: forever)
    #[arg(short, long)]
    pub timeout: Option<u64>,
}

/// Arguments for the `execute` command
#[derive(Args, Debug)]
pub struct ExecuteArgs {
    /// Name for the temporary container; must not be defined
    pub name: String,

    /// Command to run
    #[arg(last = true, required = true)]
    pub command: Vec<String>,
}

/// Arguments for the `clone` command
#[derive(Args, Debug)]
pub struct CloneArgs {
    /// Source container
    pub name: String,

    /// Name of the copy
    pub new_name: String,

    /// Create the copy under another container path
    #[arg(long)]
    pub target_path: Option<PathBuf>,

    /// Backing store for the copy
    #[arg(short = 'B', long)]
    pub bdev: Option<BackendStore>,

    /// Make a copy-on-write snapshot clone
    #[arg(short, long)]
    pub snapshot: bool,

    /// Keep the hostname
    #[arg(long)]
    pub keep_name: bool,

    /// Keep MAC addresses
    #[arg(long)]
    pub keep_mac: bool,
}

pub async fn create(args: CreateArgs, session: &Session) -> Result<ExitCode> {
    let container = session.container(&args.name)?;
    if args.quiet {
        container.set_verbosity(Verbosity::Quiet);
    }

    let options = args.template_options(session.settings.template());
    info!("Creating {} from template {}", args.name, options.template());
    container
        .create(&options)
        .with_context(|| format!("Failed to create {}", args.name))?;

    println!("Created container: {}", args.name);
    Ok(ExitCode::SUCCESS)
}

pub async fn start(args: StartArgs, session: &Session) -> Result<ExitCode> {
    let mut tasks = Vec::with_capacity(args.names.len());

    for name in &args.names {
        let container = session.existing(name)?;
        let name = name.clone();
        let use_init = args.use_init;
        let command = args.command.clone();
        let wait = args.wait.map(Duration::from_secs);

        tasks.push(tokio::task::spawn_blocking(move || {
            let result = if command.is_empty() && !use_init {
                container.start()
            } else {
                container.start_with(use_init, &command)
            };
            let reached = match (&result, wait) {
                (Ok(()), Some(timeout)) => container.wait(State::Running, Some(timeout)),
                _ => true,
            };
            (name, result, reached)
        }));
    }

    let mut failed = 0;
    for task in tasks {
        let (name, result, reached) = task.await?;
        match result {
            Ok(()) if reached => println!("Started container: {}", name),
            Ok(()) => {
                eprintln!("Container {} did not reach RUNNING in time", name);
                failed += 1;
            }
            Err(e) => {
                eprintln!("Failed to start {}: {}", name, e);
                failed += 1;
            }
        }
    }

    Ok(if failed == 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

pub async fn stop(name: &str, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    blocking(move || container.stop())
        .await?
        .with_context(|| format!("Failed to stop {}", name))?;
    println!("Stopped container: {}", name);
    Ok(ExitCode::SUCCESS)
}

pub async fn shutdown(name: &str, timeout: Option<i64>, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    let secs = timeout.unwrap_or(session.settings.shutdown_timeout() as i64);
    let timeout = u64::try_from(secs).ok().map(Duration::from_secs);

    println!("Shutting down container: {} (timeout: {})", name, describe_timeout(timeout));
    blocking(move || container.shutdown(timeout))
        .await?
        .with_context(|| format!("Failed to shut down {}", name))?;
    Ok(ExitCode::SUCCESS)
}

pub async fn reboot(name: &str, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    blocking(move || container.reboot())
        .await?
        .with_context(|| format!("Failed to reboot {}", name))?;
    println!("Rebooting container: {}", name);
    Ok(ExitCode::SUCCESS)
}

pub async fn freeze(name: &str, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    container.freeze().with_context(|| format!("Failed to freeze {}", name))?;
    println!("Frozen container: {}", name);
    Ok(ExitCode::SUCCESS)
}

pub async fn unfreeze(name: &str, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    container.unfreeze().with_context(|| format!("Failed to unfreeze {}", name))?;
    println!("Thawed container: {}", name);
    Ok(ExitCode::SUCCESS)
}

pub async fn destroy(args: DestroyArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;

    if !args.force {
        let confirmed = Confirm::new()
            .with_prompt(format!("Destroy container {} and its root filesystem?", args.name))
            .default(false)
            .interact()?;

        if !confirmed {
            println!("Aborted.");
            return Ok(ExitCode::SUCCESS);
        }
    }

    if container.running() && !args.force {
        bail!("Container {} is running; stop it first or pass --force", args.name);
    }

    let name = args.name.clone();
    let with_snapshots = args.snapshots;
    blocking(move || {
        if container.running() {
            container
                .stop()
                .with_context(|| format!("Failed to stop {}", name))?;
        }
        if with_snapshots {
            container.destroy_with_all_snapshots()
        } else {
            container.destroy()
        }
        .with_context(|| format!("Failed to destroy {}", name))
    })
    .await??;

    println!("Destroyed container: {}", args.name);
    Ok(ExitCode::SUCCESS)
}

pub async fn wait(args: WaitArgs, session: &Session) -> Result<ExitCode> {
    let container = session.container(&args.name)?;
    let timeout = args.timeout.map(Duration::from_secs);
    let state = args.state;

    if blocking(move || container.wait(state, timeout)).await? {
        Ok(ExitCode::SUCCESS)
    } else {
        eprintln!(
            "Timed out waiting for {} to reach {} (timeout: {})",
            args.name,
            args.state,
            describe_timeout(timeout)
        );
        Ok(ExitCode::FAILURE)
    }
}

pub async fn clone(args: CloneArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;

    let mut options = CloneOptions::new()
        .snapshot(args.snapshot)
        .keep_name(args.keep_name)
        .keep_mac(args.keep_mac);
    if let Some(bdev) = args.bdev {
        options = options.backend(bdev);
    }
    if let Some(path) = &args.target_path {
        options = options.lxcpath(path.clone());
    }

    let new_name = args.new_name.clone();
    blocking(move || container.clone(&new_name, &options))
        .await?
        .with_context(|| format!("Failed to clone {} to {}", args.name, args.new_name))?;
    println!("Cloned {} to {}", args.name, args.new_name);
    Ok(ExitCode::SUCCESS)
}

pub async fn rename(name: &str, new_name: &str, session: &Session) -> Result<ExitCode> {
    let container = session.existing(name)?;
    container
        .rename(new_name)
        .with_context(|| format!("Failed to rename {} to {}", name, new_name))?;
    println!("Renamed {} to {}", name, new_name);
    Ok(ExitCode::SUCCESS)
}

pub async fn execute(args: ExecuteArgs, session: &Session) -> Result<ExitCode> {
    let container = session.container(&args.name)?;
    let command = args.command;
    let output = blocking(move || container.execute(&command))
        .await?
        .with_context(|| format!("Failed to execute in {}", args.name))?;

    io::stdout().write_all(&output)?;
    Ok(ExitCode::SUCCESS)
}

fn describe_timeout(timeout: Option<Duration>) -> String {
    match timeout {
        Some(t) => format!("{}s", t.as_secs()),
        None => "none".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        create: CreateArgs,
    }

    #[test]
    fn test_create_args_build_download_options() {
        let w = Wrapper::try_parse_from([
            "create", "web", "-d", "alpine", "-r", "3.20", "-a", "amd64", "-B", "btrfs", "--", "--extra",
        ])
        .unwrap();
        let options = w.create.template_options("download");
        assert_eq!(options.template(), "download");
        assert_eq!(options.backend_store(), BackendStore::Btrfs);
        let args = options.to_args();
        assert!(args.windows(2).any(|w| w == ["--dist", "alpine"]));
        assert_eq!(args.last().map(String::as_str), Some("--extra"));
    }

    #[test]
    fn test_create_uses_default_template() {
        let w = Wrapper::try_parse_from(["create", "web"]).unwrap();
        assert_eq!(w.create.template_options("busybox").template(), "busybox");
    }

    #[test]
    fn test_describe_timeout() {
        assert_eq!(describe_timeout(None), "none");
        assert_eq!(describe_timeout(Some(Duration::from_secs(5))), "5s");
    }
}
