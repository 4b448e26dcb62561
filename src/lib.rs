//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! lxcctl - safe bindings to the liblxc container runtime
//!
//! Open a [`Container`] against a [`runtime::Runtime`] and drive it through
//! its lifecycle:
//!
//! ```ignore
//! use lxcctl::{runtime, Container, State, TemplateOptions};
//!
//! let rt = runtime::native()?;
//! let c = Container::new(rt, "web", None)?;
//! c.create(&TemplateOptions::download("alpine", "3.20", "amd64"))?;
//! c.start()?;
//! c.wait(State::Running, Some(std::time::Duration::from_secs(30)));
//! ```

pub mod engine;
pub mod error;
pub mod ffi;
pub mod runtime;

pub use engine::{
    AttachFlags, AttachOptions, BackendStore, CloneOptions, ConsoleLogOptions, ConsoleOptions,
    Container, CpuStats, EnvPolicy, InterfaceStats, Lifecycle, LogLevel, MigrateCommand,
    MigrateFeatures, MigrateOptions, Personality, Snapshot, State, TemplateOptions, Verbosity,
};
pub use error::{Error, NativeFault, Operation, Result};
pub use runtime::{ContainerBackend, ListFilter, Runtime, RuntimeKind};
