//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! User settings file (`~/.config/lxcctl/config.toml`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use lxcctl::RuntimeKind;

/// Template used by `create` when neither `--template` nor the settings file
/// names one.
pub const DEFAULT_TEMPLATE: &str = "download";

/// Seconds `shutdown` waits for init to exit.
pub const DEFAULT_SHUTDOWN_TIMEOUT: u64 = 30;

/// Settings loaded from the TOML file. Every field is optional; command-line
/// flags and environment variables take precedence.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub lxcpath: Option<PathBuf>,
    pub backend: Option<RuntimeKind>,
    pub default_template: Option<String>,
    pub shutdown_timeout: Option<u64>,
    pub log_level: Option<String>,
}

impl Settings {
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|d| d.join("lxcctl").join("config.toml"))
    }

    /// Load `explicit` if given (it must exist), otherwise the default file
    /// if present.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("Invalid settings in {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn template(&self) -> &str {
        self.default_template.as_deref().unwrap_or(DEFAULT_TEMPLATE)
    }

    pub fn shutdown_timeout(&self) -> u64 {
        self.shutdown_timeout.unwrap_or(DEFAULT_SHUTDOWN_TIMEOUT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_is_default() {
        let settings = Settings::from_toml("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.template(), "download");
        assert_eq!(settings.shutdown_timeout(), 30);
    }

    #[test]
    fn test_full_file() {
        let settings = Settings::from_toml(
            r#"
lxcpath = "/srv/lxc"
backend = "memory"
default_template = "busybox"
shutdown_timeout = 5
log_level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(settings.lxcpath.as_deref(), Some(Path::new("/srv/lxc")));
        assert_eq!(settings.backend, Some(RuntimeKind::Memory));
        assert_eq!(settings.template(), "busybox");
        assert_eq!(settings.shutdown_timeout(), 5);
    }

    #[test]
    fn test_unknown_key_rejected() {
        assert!(Settings::from_toml("lxc_path = \"/srv\"").is_err());
    }

    #[test]
    fn test_explicit_missing_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Settings::load(Some(&dir.path().join("nope.toml"))).is_err());
    }

    #[test]
    fn test_explicit_file_loaded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "backend = \"memory\"\n").unwrap();
        let settings = Settings::load(Some(&path)).unwrap();
        assert_eq!(settings.backend, Some(RuntimeKind::Memory));
    }
}
