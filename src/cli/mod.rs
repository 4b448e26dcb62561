//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Command-line interface for lxcctl

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::debug;

use lxcctl::{runtime, Container, Runtime, RuntimeKind};

pub mod attach;
pub mod completion;
pub mod config;
pub mod doctor;
pub mod info;
pub mod lifecycle;
pub mod ls;
pub mod migrate;
pub mod settings;
pub mod snapshot;

use settings::Settings;

/// lxcctl - manage LXC containers through liblxc
#[derive(Parser, Debug)]
#[command(
    name = "lxcctl",
    author = "lxcctl contributors",
    version,
    about = "Manage LXC system containers through liblxc",
    long_about = None
)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Directory holding container definitions (default: the runtime's lxc.lxcpath)
    #[arg(long, global = true, env = "LXCCTL_LXCPATH")]
    pub lxcpath: Option<PathBuf>,

    /// Runtime backend (native or memory)
    #[arg(long, global = true, env = "LXCCTL_BACKEND")]
    pub backend: Option<RuntimeKind>,

    /// Settings file (default: ~/.config/lxcctl/config.toml)
    #[arg(long, global = true, env = "LXCCTL_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a container from a template
    Create(lifecycle::CreateArgs),

    /// Start one or more containers
    Start(lifecycle::StartArgs),

    /// Kill a running container
    Stop {
        /// Container name
        name: String,
    },

    /// Ask a container to shut down cleanly
    Shutdown {
        /// Container name
        name: String,

        /// Seconds to wait for init to exit (-1 waits forever)
        #[arg(short, long, allow_negative_numbers = true)]
        timeout: Option<i64>,
    },

    /// Reboot a running container
    Reboot {
        /// Container name
        name: String,
    },

    /// Freeze all processes in a container
    Freeze {
        /// Container name
        name: String,
    },

    /// Thaw a frozen container
    Unfreeze {
        /// Container name
        name: String,
    },

    /// Destroy a container and its storage
    Destroy(lifecycle::DestroyArgs),

    /// Wait for a container to reach a state
    Wait(lifecycle::WaitArgs),

    /// List containers
    Ls(ls::LsArgs),

    /// Display detailed information on a container
    Info(info::InfoArgs),

    /// Show network addresses of a running container
    Ips(info::IpsArgs),

    /// Read or change container configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Read or change cgroup values of a running container
    #[command(subcommand)]
    Cgroup(config::CgroupCommands),

    /// Run a command (or a shell) inside a running container
    Attach(attach::AttachArgs),

    /// Manage snapshots
    #[command(subcommand)]
    Snapshot(snapshot::SnapshotCommands),

    /// Checkpoint a running container to disk
    Checkpoint(migrate::CheckpointArgs),

    /// Restore a container from a checkpoint
    Restore(migrate::RestoreArgs),

    /// Drive a migration step (pre-dump, dump, restore, feature-check)
    Migrate(migrate::MigrateArgs),

    /// Copy a stopped container
    Clone(lifecycle::CloneArgs),

    /// Run a command as a temporary application container
    Execute(lifecycle::ExecuteArgs),

    /// Rename a stopped container
    Rename {
        /// Container name
        name: String,

        /// New name
        new_name: String,
    },

    /// Check the runtime, kernel and helper tools
    Doctor(doctor::DoctorArgs),

    /// Generate shell completions
    Completion(completion::CompletionArgs),

    /// Generate a man page
    Man(completion::ManArgs),

    /// Show lxcctl and runtime versions
    Version,
}

/// Resolved runtime plus the settings every command needs.
pub struct Session {
    pub runtime: Arc<dyn Runtime>,
    pub lxcpath: Option<PathBuf>,
    pub settings: Settings,
}

impl Session {
    /// Resolve flags over settings and open the selected runtime.
    pub fn open(cli: &Cli, settings: &Settings) -> Result<Self> {
        let kind = cli.backend.or(settings.backend).unwrap_or_default();
        let lxcpath = cli.lxcpath.clone().or_else(|| settings.lxcpath.clone());
        debug!("Using {} runtime (lxcpath: {:?})", kind, lxcpath);

        let runtime = runtime::connect(kind, lxcpath.as_deref())
            .with_context(|| format!("Failed to open the {} runtime", kind))?;

        Ok(Self {
            runtime,
            lxcpath,
            settings: settings.clone(),
        })
    }

    /// A handle for `name`, whether or not it is defined.
    pub fn container(&self, name: &str) -> Result<Container> {
        Container::new(self.runtime.clone(), name, self.lxcpath.as_deref())
            .with_context(|| format!("Failed to open container {}", name))
    }

    /// A handle for an existing container.
    pub fn existing(&self, name: &str) -> Result<Container> {
        let container = self.container(name)?;
        if !container.defined() {
            bail!("Container {} does not exist", name);
        }
        Ok(container)
    }
}

/// Run a blocking container call on the blocking thread pool.
pub async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> T + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .context("Container task panicked")
}

/// Execute a CLI command
pub async fn execute(cli: Cli, settings: Settings) -> Result<ExitCode> {
    // commands that never touch a runtime
    match &cli.command {
        Commands::Completion(args) => return completion::execute(args).map(|_| ExitCode::SUCCESS),
        Commands::Man(args) => return completion::execute_man(args).map(|_| ExitCode::SUCCESS),
        Commands::Doctor(args) => return doctor::execute(args, &cli, &settings).await,
        _ => {}
    }

    let session = Session::open(&cli, &settings)?;

    match cli.command {
        Commands::Create(args) => lifecycle::create(args, &session).await,
        Commands::Start(args) => lifecycle::start(args, &session).await,
        Commands::Stop { name } => lifecycle::stop(&name, &session).await,
        Commands::Shutdown { name, timeout } => lifecycle::shutdown(&name, timeout, &session).await,
        Commands::Reboot { name } => lifecycle::reboot(&name, &session).await,
        Commands::Freeze { name } => lifecycle::freeze(&name, &session).await,
        Commands::Unfreeze { name } => lifecycle::unfreeze(&name, &session).await,
        Commands::Destroy(args) => lifecycle::destroy(args, &session).await,
        Commands::Wait(args) => lifecycle::wait(args, &session).await,
        Commands::Clone(args) => lifecycle::clone(args, &session).await,
        Commands::Rename { name, new_name } => lifecycle::rename(&name, &new_name, &session).await,
        Commands::Execute(args) => lifecycle::execute(args, &session).await,
        Commands::Ls(args) => ls::execute(args, &session).await,
        Commands::Info(args) => info::execute(args, &session).await,
        Commands::Ips(args) => info::ips(args, &session).await,
        Commands::Config(cmd) => config::execute(cmd, &session).await,
        Commands::Cgroup(cmd) => config::execute_cgroup(cmd, &session).await,
        Commands::Attach(args) => attach::execute(args, &session).await,
        Commands::Snapshot(cmd) => snapshot::execute(cmd, &session).await,
        Commands::Checkpoint(args) => migrate::checkpoint(args, &session).await,
        Commands::Restore(args) => migrate::restore(args, &session).await,
        Commands::Migrate(args) => migrate::execute(args, &session).await,
        Commands::Version => show_version(&session),
        Commands::Completion(_) | Commands::Man(_) | Commands::Doctor(_) => Ok(ExitCode::SUCCESS),
    }
}

fn show_version(session: &Session) -> Result<ExitCode> {
    println!("lxcctl version {}", env!("CARGO_PKG_VERSION"));
    println!("{} version {}", session.runtime.name(), session.runtime.version());
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from(["lxcctl", "ls", "--backend", "memory", "--lxcpath", "/srv/lxc"]).unwrap();
        assert_eq!(cli.backend, Some(RuntimeKind::Memory));
        assert_eq!(cli.lxcpath, Some(PathBuf::from("/srv/lxc")));
    }

    #[test]
    fn test_flags_override_settings() {
        let cli = Cli::try_parse_from(["lxcctl", "--backend", "memory", "--lxcpath", "/a", "version"]).unwrap();
        let settings = Settings {
            lxcpath: Some(PathBuf::from("/b")),
            backend: Some(RuntimeKind::Native),
            ..Settings::default()
        };
        let session = Session::open(&cli, &settings).unwrap();
        assert_eq!(session.runtime.name(), "memory");
        assert_eq!(session.lxcpath, Some(PathBuf::from("/a")));
    }

    #[tokio::test]
    async fn test_blocking_runs_off_the_calling_thread() {
        let here = std::thread::current().id();
        let there = blocking(|| std::thread::current().id()).await.unwrap();
        assert_ne!(here, there);
    }

    #[test]
    fn test_settings_fill_missing_flags() {
        let cli = Cli::try_parse_from(["lxcctl", "version"]).unwrap();
        let settings = Settings {
            lxcpath: Some(PathBuf::from("/b")),
            backend: Some(RuntimeKind::Memory),
            ..Settings::default()
        };
        let session = Session::open(&cli, &settings).unwrap();
        assert_eq!(session.runtime.name(), "memory");
        assert_eq!(session.lxcpath, Some(PathBuf::from("/b")));
    }
}
