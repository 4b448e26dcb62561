//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Shell completion and man page generation

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser};
use clap_complete::{generate, Shell};
use clap_mangen::Man;
use std::io::{self, Write};
use std::path::PathBuf;

/// Generate shell completions
#[derive(Parser, Debug)]
pub struct CompletionArgs {
    /// Shell to generate completions for
    #[arg(value_enum)]
    pub shell: Shell,
}

/// Generate a man page
#[derive(Parser, Debug)]
pub struct ManArgs {
    /// Write one page per subcommand into this directory instead of
    /// printing the top-level page
    #[arg(short, long)]
    pub out_dir: Option<PathBuf>,
}

/// Execute completion generation
pub fn execute(args: &CompletionArgs) -> Result<()> {
    let mut cmd = crate::cli::Cli::command();
    let name = cmd.get_name().to_string();
    generate(args.shell, &mut cmd, name, &mut io::stdout());
    Ok(())
}

pub fn execute_man(args: &ManArgs) -> Result<()> {
    let cmd = crate::cli::Cli::command();

    let Some(dir) = &args.out_dir else {
        let mut out = io::stdout().lock();
        Man::new(cmd).render(&mut out)?;
        out.flush()?;
        return Ok(());
    };

    std::fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let name = cmd.get_name().to_string();
    write_page(dir, &name, cmd.clone())?;
    for sub in cmd.get_subcommands() {
        let page = format!("{}-{}", name, sub.get_name());
        write_page(dir, &page, sub.clone())?;
    }
    Ok(())
}

fn write_page(dir: &std::path::Path, page: &str, cmd: clap::Command) -> Result<()> {
    let path = dir.join(format!("{}.1", page));
    let mut buf = Vec::new();
    Man::new(cmd).render(&mut buf)?;
    std::fs::write(&path, buf).with_context(|| format!("Failed to write {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_args() {
        let args = CompletionArgs { shell: Shell::Bash };
        assert!(matches!(args.shell, Shell::Bash));
    }

    #[test]
    fn test_man_pages_written_per_subcommand() {
        let dir = tempfile::tempdir().unwrap();
        execute_man(&ManArgs {
            out_dir: Some(dir.path().to_path_buf()),
        })
        .unwrap();
        assert!(dir.path().join("lxcctl.1").is_file());
        assert!(dir.path().join("lxcctl-start.1").is_file());
        assert!(dir.path().join("lxcctl-snapshot.1").is_file());
    }
}
