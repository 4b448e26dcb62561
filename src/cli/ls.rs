//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! `lxcctl ls` command implementation

use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use serde::Serialize;
use std::process::ExitCode;
use tabled::{Table, Tabled};

use lxcctl::{Container, ListFilter, State};

use crate::cli::Session;

/// Arguments for the `ls` command
#[derive(Args, Debug)]
pub struct LsArgs {
    /// Only show active (running or frozen) containers
    #[arg(long)]
    pub active: bool,

    /// Only display container names
    #[arg(short, long)]
    pub quiet: bool,

    /// Filter by state
    #[arg(long)]
    pub filter: Option<State>,

    /// Output format
    #[arg(long, value_enum, default_value = "table")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Table,
    Json,
}

#[derive(Debug, Serialize, Tabled)]
struct Row {
    #[tabled(rename = "NAME")]
    name: String,
    #[tabled(rename = "STATE")]
    state: State,
    #[tabled(rename = "PID", display_with = "display_pid")]
    pid: Option<i32>,
    #[tabled(rename = "IPV4")]
    ipv4: String,
    #[tabled(rename = "AUTOSTART")]
    autostart: bool,
}

fn display_pid(pid: &Option<i32>) -> String {
    pid.map_or_else(|| "-".to_string(), |p| p.to_string())
}

impl Row {
    fn from_container(container: &Container) -> Self {
        let state = container.state();
        let ipv4 = if state.is_active() {
            container.ipv4_addresses().unwrap_or_default().join(", ")
        } else {
            String::new()
        };
        let autostart = container
            .config_item("lxc.start.auto")
            .ok()
            .flatten()
            .is_some_and(|v| v.trim() == "1");

        Row {
            name: container.name(),
            state,
            pid: container.init_pid().map(|p| p.as_raw()),
            ipv4,
            autostart,
        }
    }
}

pub async fn execute(args: LsArgs, session: &Session) -> Result<ExitCode> {
    let filter = if args.active {
        ListFilter::Active
    } else {
        ListFilter::All
    };
    let names = session
        .runtime
        .list_containers(session.lxcpath.as_deref(), filter)
        .context("Failed to list containers")?;

    if args.quiet && args.filter.is_none() {
        for name in &names {
            println!("{}", name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    let mut rows = Vec::with_capacity(names.len());
    for name in &names {
        let container = session.container(name)?;
        let row = Row::from_container(&container);
        if args.filter.is_some_and(|f| f != row.state) {
            continue;
        }
        rows.push(row);
    }

    if args.quiet {
        for row in &rows {
            println!("{}", row.name);
        }
        return Ok(ExitCode::SUCCESS);
    }

    match args.format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&rows)?),
        OutputFormat::Table => println!("{}", Table::new(rows)),
    }

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_pid() {
        assert_eq!(display_pid(&None), "-");
        assert_eq!(display_pid(&Some(42)), "42");
    }

    #[test]
    fn test_table_headers() {
        let rows = vec![Row {
            name: "web".to_string(),
            state: State::Running,
            pid: Some(1234),
            ipv4: "10.0.3.5".to_string(),
            autostart: false,
        }];
        let table = Table::new(rows).to_string();
        assert!(table.contains("NAME"));
        assert!(table.contains("RUNNING"));
        assert!(table.contains("1234"));
    }
}
