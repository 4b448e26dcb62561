//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! `lxcctl snapshot` command implementation

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::path::PathBuf;
use std::process::ExitCode;
use tabled::{Table, Tabled};

use lxcctl::{Error, Snapshot};

use crate::cli::{blocking, Session};

#[derive(Subcommand, Debug)]
pub enum SnapshotCommands {
    /// Snapshot a stopped container
    Create {
        /// Container name
        name: String,

        /// File whose contents become the snapshot comment
        #[arg(short, long)]
        comment: Option<PathBuf>,
    },

    /// List snapshots
    Ls {
        /// Container name
        name: String,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Restore a snapshot
    Restore {
        /// Container name
        name: String,

        /// Snapshot name, e.g. snap0
        snapshot: String,

        /// Restore into a new container instead of rolling back in place
        #[arg(short = 'N', long)]
        new_name: Option<String>,
    },

    /// Remove snapshots
    Rm {
        /// Container name
        name: String,

        /// Snapshot name
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        snapshot: Option<String>,

        /// Remove every snapshot
        #[arg(long)]
        all: bool,
    },
}

#[derive(Tabled)]
struct SnapshotRow {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "CREATED")]
    created: String,
    #[tabled(rename = "COMMENT")]
    comment: String,
}

impl From<&Snapshot> for SnapshotRow {
    fn from(snapshot: &Snapshot) -> Self {
        let comment = snapshot
            .comment_path
            .as_ref()
            .and_then(|p| std::fs::read_to_string(p).ok())
            .map(|s| s.lines().next().unwrap_or_default().to_string())
            .unwrap_or_default();
        Self {
            name: snapshot.name.clone(),
            created: snapshot.timestamp.clone(),
            comment,
        }
    }
}

pub async fn execute(cmd: SnapshotCommands, session: &Session) -> Result<ExitCode> {
    match cmd {
        SnapshotCommands::Create { name, comment } => {
            let container = session.existing(&name)?;
            if let Some(path) = &comment {
                if !path.is_file() {
                    bail!("Comment file {} does not exist", path.display());
                }
            }
            let snapshot = blocking(move || match comment {
                Some(path) => container.create_snapshot_with_comment(&path),
                None => container.create_snapshot(),
            })
            .await?
            .with_context(|| format!("Failed to snapshot {}", name))?;
            println!("{}", snapshot.name);
            Ok(ExitCode::SUCCESS)
        }
        SnapshotCommands::Ls { name, json } => {
            let container = session.existing(&name)?;
            let snapshots = match container.snapshots() {
                Ok(list) => list,
                Err(Error::NoSnapshot) => Vec::new(),
                Err(e) => return Err(e).context("Failed to list snapshots"),
            };

            if json {
                println!("{}", serde_json::to_string_pretty(&snapshots)?);
            } else if snapshots.is_empty() {
                println!("No snapshots.");
            } else {
                let rows: Vec<SnapshotRow> = snapshots.iter().map(SnapshotRow::from).collect();
                println!("{}", Table::new(rows));
            }
            Ok(ExitCode::SUCCESS)
        }
        SnapshotCommands::Restore {
            name,
            snapshot,
            new_name,
        } => {
            let container = session.existing(&name)?;
            let target = new_name.unwrap_or_else(|| name.clone());
            let (snap, new) = (Snapshot::named(&snapshot), target.clone());
            blocking(move || container.restore_snapshot(&snap, &new))
                .await?
                .with_context(|| format!("Failed to restore {} of {}", snapshot, name))?;
            println!("Restored {} as {}", snapshot, target);
            Ok(ExitCode::SUCCESS)
        }
        SnapshotCommands::Rm {
            name,
            snapshot,
            all,
        } => {
            let container = session.existing(&name)?;
            if all {
                container
                    .destroy_all_snapshots()
                    .with_context(|| format!("Failed to remove snapshots of {}", name))?;
                println!("Removed all snapshots of {}", name);
            } else if let Some(snapshot) = snapshot {
                container
                    .destroy_snapshot(&Snapshot::named(&snapshot))
                    .with_context(|| format!("Failed to remove {}", snapshot))?;
                println!("Removed {}", snapshot);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_reads_first_comment_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("comment");
        std::fs::write(&path, "before upgrade\nsecond line\n").unwrap();

        let snapshot = Snapshot {
            comment_path: Some(path),
            timestamp: "2024:03:09 14:05:59".to_string(),
            ..Snapshot::named("snap0")
        };
        let row = SnapshotRow::from(&snapshot);
        assert_eq!(row.comment, "before upgrade");
        assert_eq!(row.created, "2024:03:09 14:05:59");
    }

    #[test]
    fn test_row_without_comment() {
        let row = SnapshotRow::from(&Snapshot::named("snap1"));
        assert_eq!(row.name, "snap1");
        assert!(row.comment.is_empty());
    }
}
