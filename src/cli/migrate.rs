//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Checkpoint, restore and migration commands

use anyhow::{Context, Result};
use bytesize::ByteSize;
use clap::{Args, ValueEnum};
use std::path::PathBuf;
use std::process::ExitCode;

use lxcctl::{MigrateCommand, MigrateFeatures, MigrateOptions};

use crate::cli::{blocking, Session};

/// Arguments for the `checkpoint` command
#[derive(Args, Debug)]
pub struct CheckpointArgs {
    /// Container name
    pub name: String,

    /// Directory receiving the image
    #[arg(short = 'D', long)]
    pub dir: PathBuf,

    /// Stop the container after dumping
    #[arg(short, long)]
    pub stop: bool,

    /// Ask CRIU for verbose logs
    #[arg(long)]
    pub criu_verbose: bool,
}

/// Arguments for the `restore` command
#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Container name
    pub name: String,

    /// Directory holding the image
    #[arg(short = 'D', long)]
    pub dir: PathBuf,

    /// Ask CRIU for verbose logs
    #[arg(long)]
    pub criu_verbose: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Step {
    PreDump,
    Dump,
    Restore,
    FeatureCheck,
}

impl From<Step> for MigrateCommand {
    fn from(step: Step) -> Self {
        match step {
            Step::PreDump => MigrateCommand::PreDump,
            Step::Dump => MigrateCommand::Dump,
            Step::Restore => MigrateCommand::Restore,
            Step::FeatureCheck => MigrateCommand::FeatureCheck,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Feature {
    MemTrack,
    LazyPages,
}

/// Arguments for the `migrate` command
#[derive(Args, Debug)]
pub struct MigrateArgs {
    /// Container name
    pub name: String,

    /// Migration step
    #[arg(value_enum)]
    pub step: Step,

    /// Image directory
    #[arg(short = 'D', long, default_value = "/tmp")]
    pub dir: PathBuf,

    /// Directory of an earlier pre-dump
    #[arg(long)]
    pub predump_dir: Option<PathBuf>,

    /// Stop the container after a dump
    #[arg(short, long)]
    pub stop: bool,

    /// Ask CRIU for verbose logs
    #[arg(long)]
    pub criu_verbose: bool,

    /// The restore side preserves inode numbers
    #[arg(long)]
    pub preserves_inodes: bool,

    /// Script CRIU runs at each action
    #[arg(long)]
    pub action_script: Option<PathBuf>,

    /// Largest ghost file CRIU may dump, e.g. 1MiB
    #[arg(long)]
    pub ghost_limit: Option<ByteSize>,

    /// Features to probe with feature-check
    #[arg(long, value_enum, value_delimiter = ',')]
    pub features: Vec<Feature>,
}

impl MigrateArgs {
    fn options(&self) -> MigrateOptions {
        let mut options = MigrateOptions::new(&self.dir)
            .verbose(self.criu_verbose)
            .stop(self.stop)
            .preserves_inodes(self.preserves_inodes)
            .features_to_check(self.feature_bits());
        if let Some(dir) = &self.predump_dir {
            options = options.predump_dir(dir);
        }
        if let Some(script) = &self.action_script {
            options = options.action_script(script);
        }
        if let Some(limit) = self.ghost_limit {
            options = options.ghost_limit(limit.as_u64());
        }
        options
    }

    fn feature_bits(&self) -> MigrateFeatures {
        self.features
            .iter()
            .fold(MigrateFeatures::empty(), |acc, f| {
                acc | match f {
                    Feature::MemTrack => MigrateFeatures::MEM_TRACK,
                    Feature::LazyPages => MigrateFeatures::LAZY_PAGES,
                }
            })
    }
}

pub async fn checkpoint(args: CheckpointArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;
    std::fs::create_dir_all(&args.dir)
        .with_context(|| format!("Failed to create {}", args.dir.display()))?;

    let (dir, stop, verbose) = (args.dir.clone(), args.stop, args.criu_verbose);
    blocking(move || container.checkpoint(&dir, stop, verbose))
        .await?
        .with_context(|| format!("Failed to checkpoint {}", args.name))?;
    println!("Checkpointed {} into {}", args.name, args.dir.display());
    Ok(ExitCode::SUCCESS)
}

pub async fn restore(args: RestoreArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;
    let (dir, verbose) = (args.dir.clone(), args.criu_verbose);
    blocking(move || container.restore(&dir, verbose))
        .await?
        .with_context(|| format!("Failed to restore {}", args.name))?;
    println!("Restored {} from {}", args.name, args.dir.display());
    Ok(ExitCode::SUCCESS)
}

pub async fn execute(args: MigrateArgs, session: &Session) -> Result<ExitCode> {
    let container = session.container(&args.name)?;

    if args.step == Step::FeatureCheck {
        let supported = container.migrate_features_supported(args.feature_bits())?;
        println!("{}", if supported { "supported" } else { "unsupported" });
        return Ok(if supported {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        });
    }

    let options = args.options();
    let step: MigrateCommand = args.step.into();
    blocking(move || container.migrate(step, &options))
        .await?
        .with_context(|| format!("Migration step {:?} failed for {}", args.step, args.name))?;
    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct Wrapper {
        #[command(flatten)]
        migrate: MigrateArgs,
    }

    #[test]
    fn test_feature_list_parses() {
        let w = Wrapper::try_parse_from([
            "migrate", "web", "feature-check", "--features", "mem-track,lazy-pages",
        ])
        .unwrap();
        assert_eq!(w.migrate.step, Step::FeatureCheck);
        assert_eq!(
            w.migrate.feature_bits(),
            MigrateFeatures::MEM_TRACK | MigrateFeatures::LAZY_PAGES
        );
    }

    #[test]
    fn test_dump_options() {
        let w = Wrapper::try_parse_from([
            "migrate", "web", "dump", "-D", "/srv/ckpt", "--stop", "--ghost-limit", "2MiB",
            "--predump-dir", "/srv/pre",
        ])
        .unwrap();
        let options = w.migrate.options();
        assert_eq!(options.directory(), std::path::Path::new("/srv/ckpt"));
        assert!(options.stops());
        assert_eq!(options.predump(), Some(std::path::Path::new("/srv/pre")));
        assert_eq!(options.ghost_limit_bytes(), 2 * 1024 * 1024);
    }
}
