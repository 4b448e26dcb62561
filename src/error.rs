//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Error types for lxcctl

use std::fmt;

use thiserror::Error;

use crate::engine::State;

/// Result type alias using lxcctl's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while driving a container through the runtime.
#[derive(Error, Debug)]
pub enum Error {
    #[error("container is not defined")]
    NotDefined,

    #[error("container already defined")]
    AlreadyDefined,

    #[error("container is not running")]
    NotRunning,

    #[error("container is already running")]
    AlreadyRunning,

    #[error("container is already frozen")]
    AlreadyFrozen,

    #[error("container is not frozen")]
    NotFrozen,

    #[error("insufficient number of arguments were supplied")]
    InsufficientArguments,

    /// The runtime reported failure for an operation.
    #[error("{op} failed{}", fault_suffix(.fault))]
    Failed {
        op: Operation,
        fault: Option<NativeFault>,
    },

    /// Entering the container or spawning the program failed; no process ran
    /// (or it could not exec).
    #[error("attaching to the container failed")]
    AttachFailed,

    #[error("timed out waiting for container to reach {0}")]
    Timeout(State),

    #[error("method is not supported by this LXC version: {0}")]
    NotSupported(&'static str),

    #[error("container has no snapshot")]
    NoSnapshot,

    #[error("allocating the container failed: {0}")]
    NewFailed(String),

    #[error("releasing the container failed")]
    ReleaseFailed,

    #[error("string contains an interior NUL byte: {0:?}")]
    NulByte(String),

    #[error("unable to parse {what}: {value:?}")]
    Parse { what: &'static str, value: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn failed(op: Operation) -> Self {
        Error::Failed { op, fault: None }
    }

    pub(crate) fn parse(what: &'static str, value: impl Into<String>) -> Self {
        Error::Parse {
            what,
            value: value.into(),
        }
    }

    /// True for errors that mean "wrong lifecycle state for this call".
    pub fn is_precondition(&self) -> bool {
        matches!(
            self,
            Error::NotDefined
                | Error::AlreadyDefined
                | Error::NotRunning
                | Error::AlreadyRunning
                | Error::AlreadyFrozen
                | Error::NotFrozen
        )
    }
}

/// Last error recorded by the runtime on the container handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeFault {
    pub code: i32,
    pub message: Option<String>,
}

impl fmt::Display for NativeFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{} (error {})", msg, self.code),
            None => write!(f, "error {}", self.code),
        }
    }
}

fn fault_suffix(fault: &Option<NativeFault>) -> String {
    match fault {
        Some(fault) => format!(": {}", fault),
        None => String::new(),
    }
}

/// The operation named by an [`Error::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    AddDeviceNode,
    AttachInterface,
    Checkpoint,
    ClearConfigItem,
    Clone,
    CloseAllFds,
    Console,
    ConsoleLog,
    Create,
    CreateSnapshot,
    Daemonize,
    Destroy,
    DestroyAllSnapshots,
    DestroySnapshot,
    DestroyWithAllSnapshots,
    DetachInterface,
    Execute,
    Freeze,
    Interfaces,
    IpAddresses,
    ListContainers,
    LoadConfig,
    Migrate,
    Reboot,
    RemoveDeviceNode,
    Rename,
    Restore,
    RestoreSnapshot,
    SaveConfig,
    SetCgroupItem,
    SetConfigItem,
    SetConfigPath,
    Shutdown,
    SnapshotList,
    Start,
    Stop,
    Unfreeze,
    InitPidFd,
    DevptsFd,
    SeccompNotifyFd,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Operation::AddDeviceNode => "adding device to container",
            Operation::AttachInterface => "attaching specified netdev to the container",
            Operation::Checkpoint => "checkpoint",
            Operation::ClearConfigItem => "clearing config item for the container",
            Operation::Clone => "cloning the container",
            Operation::CloseAllFds => "setting close_all_fds flag for container",
            Operation::Console => "allocating a console for the container",
            Operation::ConsoleLog => "reading the console log",
            Operation::Create => "creating the container",
            Operation::CreateSnapshot => "snapshotting the container",
            Operation::Daemonize => "setting daemonize flag for container",
            Operation::Destroy => "destroying the container",
            Operation::DestroyAllSnapshots => "destroying all snapshots",
            Operation::DestroySnapshot => "destroying the snapshot",
            Operation::DestroyWithAllSnapshots => "destroying the container with all snapshots",
            Operation::DetachInterface => "detaching specified netdev from the container",
            Operation::Execute => "executing the command in a temporary container",
            Operation::Freeze => "freezing the container",
            Operation::Interfaces => "getting interface names for the container",
            Operation::IpAddresses => "getting IP addresses of the container",
            Operation::ListContainers => "listing containers",
            Operation::LoadConfig => "loading config file for the container",
            Operation::Migrate => "migrating the container",
            Operation::Reboot => "rebooting the container",
            Operation::RemoveDeviceNode => "removing device from container",
            Operation::Rename => "renaming the container",
            Operation::Restore => "restore",
            Operation::RestoreSnapshot => "restoring the container",
            Operation::SaveConfig => "saving config file for the container",
            Operation::SetCgroupItem => "setting cgroup item for the container",
            Operation::SetConfigItem => "setting config item for the container",
            Operation::SetConfigPath => "setting config path for the container",
            Operation::Shutdown => "shutting down the container",
            Operation::SnapshotList => "listing snapshots",
            Operation::Start => "starting the container",
            Operation::Stop => "stopping the container",
            Operation::Unfreeze => "unfreezing the container",
            Operation::InitPidFd => "getting the init pidfd",
            Operation::DevptsFd => "getting the devpts fd",
            Operation::SeccompNotifyFd => "getting the seccomp notify fd",
        };
        f.write_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failed_without_fault() {
        let err = Error::failed(Operation::Start);
        assert_eq!(err.to_string(), "starting the container failed");
    }

    #[test]
    fn test_failed_with_fault() {
        let err = Error::Failed {
            op: Operation::Create,
            fault: Some(NativeFault {
                code: 2,
                message: Some("template not found".to_string()),
            }),
        };
        assert_eq!(
            err.to_string(),
            "creating the container failed: template not found (error 2)"
        );
    }

    #[test]
    fn test_precondition_classification() {
        assert!(Error::NotRunning.is_precondition());
        assert!(Error::AlreadyDefined.is_precondition());
        assert!(!Error::AttachFailed.is_precondition());
        assert!(!Error::failed(Operation::Stop).is_precondition());
    }
}
