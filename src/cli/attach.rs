//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! `lxcctl attach` command implementation

use anyhow::{bail, Context, Result};
use clap::Args;
use nix::unistd::{Gid, Uid};
use std::os::unix::process::ExitStatusExt;
use std::process::{ExitCode, ExitStatus};

use lxcctl::{AttachOptions, EnvPolicy};

use crate::cli::{blocking, Session};

/// Arguments for the `attach` command
#[derive(Args, Debug)]
pub struct AttachArgs {
    /// Container name
    pub name: String,

    /// Start the command and return its pid without waiting
    #[arg(short, long)]
    pub detach: bool,

    /// Set environment variables (KEY=VALUE)
    #[arg(short = 'e', long = "env", action = clap::ArgAction::Append)]
    pub env: Vec<String>,

    /// Start from an empty environment
    #[arg(long)]
    pub clear_env: bool,

    /// Variables to keep when the environment is cleared
    #[arg(long = "keep-env", action = clap::ArgAction::Append)]
    pub keep_env: Vec<String>,

    /// Working directory inside the container
    #[arg(short = 'w', long)]
    pub workdir: Option<String>,

    /// Run as UID[:GID]
    #[arg(short = 'u', long)]
    pub user: Option<String>,

    /// Command and arguments to execute (default: a shell)
    #[arg(trailing_var_arg = true)]
    pub command: Vec<String>,
}

impl AttachArgs {
    fn options(&self) -> Result<AttachOptions> {
        let mut options = AttachOptions::new().env_policy(if self.clear_env {
            EnvPolicy::Clear
        } else {
            EnvPolicy::Keep
        });

        for var in &self.env {
            let Some((key, value)) = var.split_once('=') else {
                bail!("Invalid environment variable '{}', expected KEY=VALUE", var);
            };
            options = options.env(key, value);
        }
        for key in &self.keep_env {
            options = options.keep_env(key.clone());
        }
        if let Some(cwd) = &self.workdir {
            options = options.cwd(cwd);
        }
        if let Some(user) = &self.user {
            let (uid, gid) = parse_user(user)?;
            options = options.uid(uid);
            if let Some(gid) = gid {
                options = options.gid(gid);
            }
        }

        Ok(options)
    }
}

fn parse_user(spec: &str) -> Result<(Uid, Option<Gid>)> {
    let (uid, gid) = match spec.split_once(':') {
        Some((uid, gid)) => (uid, Some(gid)),
        None => (spec, None),
    };
    let uid: u32 = uid.parse().with_context(|| format!("Invalid uid '{}'", uid))?;
    let gid = gid
        .map(|g| g.parse::<u32>().with_context(|| format!("Invalid gid '{}'", g)))
        .transpose()?;
    Ok((Uid::from_raw(uid), gid.map(Gid::from_raw)))
}

/// Shell-style exit code: the program's code, or 128 + signal.
fn exit_code(status: ExitStatus) -> u8 {
    let code = match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    };
    u8::try_from(code).unwrap_or(1)
}

pub async fn execute(args: AttachArgs, session: &Session) -> Result<ExitCode> {
    let container = session.existing(&args.name)?;
    let options = args.options()?;

    if args.detach {
        if args.command.is_empty() {
            bail!("--detach needs a command");
        }
        let command = args.command.clone();
        let pid = blocking(move || container.run_command_no_wait(&command, &options))
            .await?
            .with_context(|| format!("Failed to attach to {}", args.name))?;
        println!("{}", pid);
        return Ok(ExitCode::SUCCESS);
    }

    let command = args.command;
    let status = blocking(move || {
        if command.is_empty() {
            container.attach_shell(&options)
        } else {
            container.run_command_status(&command, &options)
        }
    })
    .await?
    .with_context(|| format!("Failed to attach to {}", args.name))?;

    Ok(ExitCode::from(exit_code(status)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_user() {
        let (uid, gid) = parse_user("1000").unwrap();
        assert_eq!(uid.as_raw(), 1000);
        assert!(gid.is_none());

        let (uid, gid) = parse_user("0:27").unwrap();
        assert_eq!(uid.as_raw(), 0);
        assert_eq!(gid.map(|g| g.as_raw()), Some(27));

        assert!(parse_user("root").is_err());
    }

    #[test]
    fn test_exit_code_from_signal() {
        // SIGKILL
        let status = ExitStatus::from_raw(9);
        assert_eq!(exit_code(status), 137);
        let status = ExitStatus::from_raw(37 << 8);
        assert_eq!(exit_code(status), 37);
    }

    #[test]
    fn test_env_must_be_key_value() {
        let args = AttachArgs {
            name: "web".to_string(),
            detach: false,
            env: vec!["NOPE".to_string()],
            clear_env: false,
            keep_env: Vec::new(),
            workdir: None,
            user: None,
            command: Vec::new(),
        };
        assert!(args.options().is_err());
    }
}
