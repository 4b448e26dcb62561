//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! System doctor command for validating prerequisites

use anyhow::Result;
use clap::{Parser, ValueEnum};
use console::{style, Emoji};
use serde::Serialize;
use std::path::Path;
use std::process::{Command, ExitCode};

use lxcctl::{runtime, Runtime};

use crate::cli::settings::Settings;
use crate::cli::Cli;

static CHECK: Emoji<'_, '_> = Emoji("✓ ", "+ ");
static CROSS: Emoji<'_, '_> = Emoji("✗ ", "x ");
static WARN: Emoji<'_, '_> = Emoji("⚠ ", "! ");

/// API extensions worth reporting; the runtime works without any of them.
const API_EXTENSIONS: &[&str] = &[
    "pidfd",
    "devpts_fd",
    "seccomp_notify",
    "mount_injection_file",
    "console_log",
    "cgroup2",
];

const CATEGORIES: &[&str] = &["Runtime", "API Extensions", "Kernel", "Tools"];

/// Check the runtime, kernel and helper tools
#[derive(Parser, Debug)]
pub struct DoctorArgs {
    /// Show all checks, not just failures
    #[arg(long)]
    pub all: bool,

    /// Output format
    #[arg(long, value_enum, default_value = "human")]
    pub format: OutputFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum, Default)]
pub enum OutputFormat {
    #[default]
    Human,
    Json,
}

#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    pub category: &'static str,
    pub name: String,
    pub status: CheckStatus,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fix: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CheckStatus {
    Pass,
    Warn,
    Fail,
}

impl CheckResult {
    fn new(category: &'static str, name: &str, status: CheckStatus, message: impl Into<String>) -> Self {
        Self {
            category,
            name: name.to_string(),
            status,
            message: message.into(),
            fix: None,
        }
    }

    fn with_fix(mut self, fix: impl Into<String>) -> Self {
        self.fix = Some(fix.into());
        self
    }
}

#[derive(Debug, Serialize)]
struct DoctorReport {
    version: String,
    timestamp: String,
    checks: Vec<CheckResult>,
    summary: Summary,
    next_steps: Vec<String>,
}

#[derive(Debug, Serialize)]
struct Summary {
    passed: usize,
    warnings: usize,
    errors: usize,
}

/// Execute doctor command
pub async fn execute(args: &DoctorArgs, cli: &Cli, settings: &Settings) -> Result<ExitCode> {
    let kind = cli.backend.or(settings.backend).unwrap_or_default();
    let lxcpath = cli.lxcpath.clone().or_else(|| settings.lxcpath.clone());

    let mut checks = Vec::new();
    match runtime::connect(kind, lxcpath.as_deref()) {
        Ok(rt) => {
            checks.extend(check_runtime(rt.as_ref(), lxcpath.as_deref()));
            checks.extend(check_api_extensions(rt.as_ref()));
        }
        Err(e) => checks.push(
            CheckResult::new(
                "Runtime",
                "runtime",
                CheckStatus::Fail,
                format!("Cannot open the {} runtime: {}", kind, e),
            )
            .with_fix("Install liblxc (>= 3.0) development files and rebuild, or use --backend memory"),
        ),
    }
    checks.extend(check_kernel());
    checks.extend(check_tools());

    let passed = checks.iter().filter(|c| c.status == CheckStatus::Pass).count();
    let warnings = checks.iter().filter(|c| c.status == CheckStatus::Warn).count();
    let errors = checks.iter().filter(|c| c.status == CheckStatus::Fail).count();

    let next_steps: Vec<_> = checks
        .iter()
        .filter(|c| c.status == CheckStatus::Fail)
        .filter_map(|c| c.fix.clone())
        .collect();

    match args.format {
        OutputFormat::Json => {
            let shown: Vec<_> = checks
                .iter()
                .filter(|c| args.all || c.status != CheckStatus::Pass)
                .cloned()
                .collect();
            let report = DoctorReport {
                version: env!("CARGO_PKG_VERSION").to_string(),
                timestamp: chrono::Utc::now().to_rfc3339(),
                checks: shown,
                summary: Summary {
                    passed,
                    warnings,
                    errors,
                },
                next_steps,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Human => print_human(args, &checks, &next_steps, passed, warnings, errors),
    }

    Ok(if errors > 0 {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn print_human(
    args: &DoctorArgs,
    checks: &[CheckResult],
    next_steps: &[String],
    passed: usize,
    warnings: usize,
    errors: usize,
) {
    println!("{}", style("LXCCTL SYSTEM CHECK").bold());
    println!("{}", style("===================").dim());
    println!();

    for category in CATEGORIES {
        let shown: Vec<_> = checks
            .iter()
            .filter(|c| c.category == *category)
            .filter(|c| args.all || c.status != CheckStatus::Pass)
            .collect();
        if shown.is_empty() {
            continue;
        }

        println!("{}", style(category).bold());
        for check in shown {
            let (emoji, color) = match check.status {
                CheckStatus::Pass => (CHECK, console::Color::Green),
                CheckStatus::Warn => (WARN, console::Color::Yellow),
                CheckStatus::Fail => (CROSS, console::Color::Red),
            };
            println!("  {} {}", style(format!("{}", emoji)).fg(color), check.message);
            if let Some(fix) = &check.fix {
                println!("    → {}", style(fix).cyan());
            }
        }
        println!();
    }

    println!("{}", style("─".repeat(45)).dim());
    print!("SUMMARY: ");
    if errors > 0 {
        print!("{} ", style(format!("{} error(s)", errors)).red());
    }
    if warnings > 0 {
        print!("{} ", style(format!("{} warning(s)", warnings)).yellow());
    }
    println!("{}", style(format!("{} passed", passed)).green());

    if !next_steps.is_empty() {
        println!();
        println!("{}", style("DO THIS NEXT:").bold().yellow());
        for step in next_steps {
            println!("  {}", style(step).cyan());
        }
    }
}

fn check_runtime(rt: &dyn Runtime, lxcpath: Option<&Path>) -> Vec<CheckResult> {
    let mut results = vec![CheckResult::new(
        "Runtime",
        "runtime_version",
        CheckStatus::Pass,
        format!("{} {}", rt.name(), rt.version()),
    )];

    let path = lxcpath
        .map(|p| p.display().to_string())
        .or_else(|| rt.default_config_path());
    match path {
        Some(path) if Path::new(&path).is_dir() => results.push(CheckResult::new(
            "Runtime",
            "lxcpath",
            CheckStatus::Pass,
            format!("Container path {} exists", path),
        )),
        Some(path) => results.push(
            CheckResult::new(
                "Runtime",
                "lxcpath",
                CheckStatus::Warn,
                format!("Container path {} does not exist (created on first create)", path),
            )
            .with_fix(format!("mkdir -p {}", path)),
        ),
        None => results.push(CheckResult::new(
            "Runtime",
            "lxcpath",
            CheckStatus::Warn,
            "Runtime reports no lxc.lxcpath",
        )),
    }

    match rt.container_names(lxcpath) {
        Ok(names) => results.push(CheckResult::new(
            "Runtime",
            "containers",
            CheckStatus::Pass,
            format!("{} container(s) found", names.len()),
        )),
        Err(e) => results.push(CheckResult::new(
            "Runtime",
            "containers",
            CheckStatus::Fail,
            format!("Cannot list containers: {}", e),
        )),
    }

    results
}

fn check_api_extensions(rt: &dyn Runtime) -> Vec<CheckResult> {
    API_EXTENSIONS
        .iter()
        .map(|ext| {
            if rt.has_api_extension(ext) {
                CheckResult::new("API Extensions", ext, CheckStatus::Pass, format!("{} supported", ext))
            } else {
                CheckResult::new(
                    "API Extensions",
                    ext,
                    CheckStatus::Warn,
                    format!("{} not supported by this runtime", ext),
                )
            }
        })
        .collect()
}

/// `(major, minor)` of a `uname -r` style release string.
fn parse_kernel_version(release: &str) -> Option<(u32, u32)> {
    let mut parts = release.split(['.', '-']);
    let major = parts.next()?.parse().ok()?;
    let minor = parts.next()?.parse().ok()?;
    Some((major, minor))
}

fn check_kernel() -> Vec<CheckResult> {
    let mut results = Vec::new();

    if let Ok(uts) = nix::sys::utsname::uname() {
        let release = uts.release().to_string_lossy().into_owned();
        let status = match parse_kernel_version(&release) {
            Some(v) if v >= (5, 4) => CheckStatus::Pass,
            _ => CheckStatus::Warn,
        };
        results.push(CheckResult::new(
            "Kernel",
            "kernel_version",
            status,
            format!("Kernel {} (recommended: 5.4+)", release),
        ));
    }

    if Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
        results.push(CheckResult::new(
            "Kernel",
            "cgroup_v2",
            CheckStatus::Pass,
            "cgroup v2 unified hierarchy",
        ));
    } else {
        results.push(
            CheckResult::new(
                "Kernel",
                "cgroup_v2",
                CheckStatus::Warn,
                "cgroup v2 not detected (using v1)",
            )
            .with_fix("Add 'systemd.unified_cgroup_hierarchy=1' to kernel cmdline"),
        );
    }

    let userns = Path::new("/proc/sys/kernel/unprivileged_userns_clone");
    match std::fs::read_to_string(userns) {
        Ok(content) if content.trim() != "1" => results.push(
            CheckResult::new(
                "Kernel",
                "user_namespaces",
                CheckStatus::Warn,
                "Unprivileged user namespaces disabled (unprivileged containers unavailable)",
            )
            .with_fix("sudo sysctl -w kernel.unprivileged_userns_clone=1"),
        ),
        _ => results.push(CheckResult::new(
            "Kernel",
            "user_namespaces",
            CheckStatus::Pass,
            "User namespaces available",
        )),
    }

    results
}

fn check_tools() -> Vec<CheckResult> {
    [
        ("lxc-checkconfig", "kernel feature report"),
        ("criu", "checkpoint, restore and migrate"),
        ("newuidmap", "unprivileged containers"),
    ]
    .into_iter()
    .map(|(tool, purpose)| match which::which(tool) {
        Ok(path) => CheckResult::new(
            "Tools",
            tool,
            CheckStatus::Pass,
            format!("{} {} found at {}", tool, command_version(tool), path.display()),
        ),
        Err(_) => CheckResult::new(
            "Tools",
            tool,
            CheckStatus::Warn,
            format!("{} not found (needed for {})", tool, purpose),
        ),
    })
    .collect()
}

fn command_version(cmd: &str) -> String {
    Command::new(cmd)
        .arg("--version")
        .output()
        .ok()
        .and_then(|o| {
            String::from_utf8_lossy(&o.stdout)
                .lines()
                .next()
                .map(|s| s.trim().to_string())
        })
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "(unknown version)".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use lxcctl::runtime::MemoryRuntime;

    #[test]
    fn test_parse_kernel_version() {
        assert_eq!(parse_kernel_version("6.8.0-45-generic"), Some((6, 8)));
        assert_eq!(parse_kernel_version("5.4-rc1"), Some((5, 4)));
        assert_eq!(parse_kernel_version("garbage"), None);
    }

    #[test]
    fn test_memory_runtime_checks() {
        let dir = tempfile::tempdir().unwrap();
        let rt = MemoryRuntime::new(dir.path());

        let runtime = check_runtime(&rt, Some(dir.path()));
        assert!(runtime.iter().all(|c| c.status == CheckStatus::Pass));

        let exts = check_api_extensions(&rt);
        let pidfd = exts.iter().find(|c| c.name == "pidfd").unwrap();
        assert_eq!(pidfd.status, CheckStatus::Warn);
    }
}
