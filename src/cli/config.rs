//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! `lxcctl config` and `lxcctl cgroup` command implementations

use anyhow::{bail, Context, Result};
use clap::Subcommand;
use std::process::ExitCode;

use crate::cli::Session;

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print a configuration value
    Get {
        /// Container name
        name: String,

        /// Key, e.g. lxc.uts.name
        key: String,

        /// Read the value from the running container instead of the file
        #[arg(long)]
        running: bool,
    },

    /// Set a configuration value and save the config file
    Set {
        /// Container name
        name: String,

        /// Key, e.g. lxc.start.auto
        key: String,

        /// Value
        value: String,

        /// Change the loaded config only, do not save it
        #[arg(long)]
        no_save: bool,
    },

    /// Remove a configuration key and save the config file
    Clear {
        /// Container name
        name: String,

        /// Key to remove
        key: String,

        /// Change the loaded config only, do not save it
        #[arg(long)]
        no_save: bool,
    },

    /// List configuration keys
    Keys {
        /// Container name
        name: String,

        /// Only keys under this prefix, e.g. lxc.net.0
        prefix: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
pub enum CgroupCommands {
    /// Print a cgroup value
    Get {
        /// Container name
        name: String,

        /// Controller file, e.g. memory.max
        key: String,
    },

    /// Write a cgroup value
    Set {
        /// Container name
        name: String,

        /// Controller file, e.g. memory.max
        key: String,

        /// Value
        value: String,
    },
}

pub async fn execute(cmd: ConfigCommands, session: &Session) -> Result<ExitCode> {
    match cmd {
        ConfigCommands::Get { name, key, running } => {
            let container = session.existing(&name)?;
            let value = if running {
                container.running_config_item(&key)?
            } else {
                container.config_item(&key)?
            };
            match value {
                Some(value) => {
                    println!("{}", value.trim_end());
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::FAILURE),
            }
        }
        ConfigCommands::Set {
            name,
            key,
            value,
            no_save,
        } => {
            if !session.runtime.config_item_is_supported(&key) {
                bail!("{} is not a configuration key known to {}", key, session.runtime.name());
            }
            let container = session.existing(&name)?;
            container
                .set_config_item(&key, &value)
                .with_context(|| format!("Failed to set {}", key))?;
            if !no_save {
                container.save_config().context("Failed to save config")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommands::Clear { name, key, no_save } => {
            let container = session.existing(&name)?;
            container
                .clear_config_item(&key)
                .with_context(|| format!("Failed to clear {}", key))?;
            if !no_save {
                container.save_config().context("Failed to save config")?;
            }
            Ok(ExitCode::SUCCESS)
        }
        ConfigCommands::Keys { name, prefix } => {
            let container = session.existing(&name)?;
            for key in container.config_keys(prefix.as_deref())? {
                println!("{}", key);
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

pub async fn execute_cgroup(cmd: CgroupCommands, session: &Session) -> Result<ExitCode> {
    match cmd {
        CgroupCommands::Get { name, key } => {
            let container = session.existing(&name)?;
            match container.cgroup_item(&key)? {
                Some(value) => {
                    println!("{}", value.trim_end());
                    Ok(ExitCode::SUCCESS)
                }
                None => Ok(ExitCode::FAILURE),
            }
        }
        CgroupCommands::Set { name, key, value } => {
            let container = session.existing(&name)?;
            container
                .set_cgroup_item(&key, &value)
                .with_context(|| format!("Failed to set {}", key))?;
            Ok(ExitCode::SUCCESS)
        }
    }
}
