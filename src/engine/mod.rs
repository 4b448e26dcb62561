//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Container engine core functionality

pub mod attach;
pub mod config;
pub mod container;
pub mod lifecycle;
pub mod migrate;
pub mod options;
pub mod snapshot;
pub mod state;
pub mod stats;

pub use attach::{AttachFlags, AttachOptions, EnvPolicy, Personality};
pub use config::LogLevel;
pub use container::Container;
pub use migrate::{MigrateCommand, MigrateFeatures, MigrateOptions};
pub use options::{BackendStore, CloneOptions, ConsoleLogOptions, ConsoleOptions, TemplateOptions, Verbosity};
pub use snapshot::Snapshot;
pub use state::{Lifecycle, State};
pub use stats::{CpuStats, InterfaceStats};
