//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container snapshots

use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::Serialize;
use tracing::info;

use crate::engine::container::{Container, Require};
use crate::error::{Error, Operation, Result};
use crate::ffi::marshal;

/// Layout of the timestamp the runtime records for each snapshot.
pub const TIMESTAMP_FORMAT: &str = "%Y:%m:%d %H:%M:%S";

/// A snapshot of a container
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Snapshot {
    pub name: String,
    pub comment_path: Option<PathBuf>,
    pub timestamp: String,
    pub lxcpath: PathBuf,
}

impl Snapshot {
    /// A reference to a snapshot by name only, enough to restore or destroy it.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            comment_path: None,
            timestamp: String::new(),
            lxcpath: PathBuf::new(),
        }
    }

    pub fn created_at(&self) -> Option<NaiveDateTime> {
        NaiveDateTime::parse_from_str(&self.timestamp, TIMESTAMP_FORMAT).ok()
    }
}

impl Container {
    /// Snapshot the stopped container. The runtime names it `snapN`.
    pub fn create_snapshot(&self) -> Result<Snapshot> {
        self.snapshot_with(None)
    }

    /// Snapshot with a comment read from `comment_file`.
    pub fn create_snapshot_with_comment(&self, comment_file: &Path) -> Result<Snapshot> {
        marshal::check(&comment_file.to_string_lossy())?;
        self.snapshot_with(Some(comment_file))
    }

    fn snapshot_with(&self, comment_file: Option<&Path>) -> Result<Snapshot> {
        let mut inner = self.guarded(Require::DEFINED | Require::NOT_RUNNING)?;

        let index = inner.backend.snapshot(comment_file);
        if index < 0 {
            return Err(inner.fail(Operation::CreateSnapshot));
        }

        let name = format!("snap{}", index);
        info!("Created snapshot {} of {}", name, inner.name);

        let snapshot = inner
            .backend
            .snapshot_list()
            .and_then(|list| list.into_iter().find(|s| s.name == name))
            .unwrap_or_else(|| Snapshot::named(&name));
        Ok(snapshot)
    }

    /// Every snapshot of the container, oldest first.
    pub fn snapshots(&self) -> Result<Vec<Snapshot>> {
        let mut inner = self.guarded(Require::DEFINED)?;

        let snapshots = match inner.backend.snapshot_list() {
            Some(list) => list,
            None => return Err(inner.fail(Operation::SnapshotList)),
        };
        if snapshots.is_empty() {
            return Err(Error::NoSnapshot);
        }
        Ok(snapshots)
    }

    /// Restore `snapshot` as the container `new_name`. Passing the
    /// container's own name rolls it back in place.
    pub fn restore_snapshot(&self, snapshot: &Snapshot, new_name: &str) -> Result<()> {
        marshal::check(&snapshot.name)?;
        marshal::check(new_name)?;

        let mut inner = self.guarded(Require::DEFINED)?;
        info!("Restoring {} from snapshot {} as {}", inner.name, snapshot.name, new_name);
        let ok = inner.backend.snapshot_restore(&snapshot.name, new_name);
        inner.ensure(ok, Operation::RestoreSnapshot)
    }

    pub fn destroy_snapshot(&self, snapshot: &Snapshot) -> Result<()> {
        marshal::check(&snapshot.name)?;

        let mut inner = self.guarded(Require::DEFINED)?;
        info!("Destroying snapshot {} of {}", snapshot.name, inner.name);
        let ok = inner.backend.snapshot_destroy(&snapshot.name);
        inner.ensure(ok, Operation::DestroySnapshot)
    }

    pub fn destroy_all_snapshots(&self) -> Result<()> {
        let mut inner = self.guarded(Require::DEFINED)?;
        info!("Destroying all snapshots of {}", inner.name);
        let ok = inner.backend.snapshot_destroy_all();
        inner.ensure(ok, Operation::DestroyAllSnapshots)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Datelike, Timelike};

    #[test]
    fn test_timestamp_parses() {
        let snap = Snapshot {
            timestamp: "2024:03:09 14:05:59".to_string(),
            ..Snapshot::named("snap0")
        };
        let ts = snap.created_at().unwrap();
        assert_eq!((ts.year(), ts.month(), ts.day()), (2024, 3, 9));
        assert_eq!((ts.hour(), ts.minute(), ts.second()), (14, 5, 59));
    }

    #[test]
    fn test_bad_timestamp_is_none() {
        assert!(Snapshot::named("snap1").created_at().is_none());
    }
}
