//! SPDX-License-Identifier: MIT OR AGPL-3.0-or-later
//! Well-known configuration keys and logging settings

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::engine::container::Container;
use crate::error::{Error, Result};

pub const LOG_FILE_KEY: &str = "lxc.log.file";
pub const LOG_LEVEL_KEY: &str = "lxc.log.level";
pub const ROOTFS_PATH_KEY: &str = "lxc.rootfs.path";
pub const UTS_NAME_KEY: &str = "lxc.uts.name";

/// Runtime log priority, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Notice,
    Warn,
    Error,
    Crit,
    Alert,
    Fatal,
}

impl LogLevel {
    const ALL: [LogLevel; 9] = [
        LogLevel::Trace,
        LogLevel::Debug,
        LogLevel::Info,
        LogLevel::Notice,
        LogLevel::Warn,
        LogLevel::Error,
        LogLevel::Crit,
        LogLevel::Alert,
        LogLevel::Fatal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Notice => "NOTICE",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
            LogLevel::Crit => "CRIT",
            LogLevel::Alert => "ALERT",
            LogLevel::Fatal => "FATAL",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = Error;

    /// Accepts names (any case, `WARNING` too) or the runtime's numeric form.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let s = s.trim();
        if let Ok(n) = s.parse::<usize>() {
            return LogLevel::ALL
                .get(n)
                .copied()
                .ok_or_else(|| Error::parse("log level", s));
        }
        let upper = s.to_ascii_uppercase();
        let name = if upper == "WARNING" { "WARN" } else { upper.as_str() };
        LogLevel::ALL
            .iter()
            .copied()
            .find(|l| l.as_str() == name)
            .ok_or_else(|| Error::parse("log level", s))
    }
}

impl Container {
    pub fn log_file(&self) -> Result<Option<PathBuf>> {
        Ok(self.config_item(LOG_FILE_KEY)?.map(PathBuf::from))
    }

    pub fn set_log_file(&self, path: &Path) -> Result<()> {
        self.set_config_item(LOG_FILE_KEY, &path.to_string_lossy())
    }

    pub fn log_level(&self) -> Result<Option<LogLevel>> {
        self.config_item(LOG_LEVEL_KEY)?
            .map(|v| v.parse())
            .transpose()
    }

    pub fn set_log_level(&self, level: LogLevel) -> Result<()> {
        self.set_config_item(LOG_LEVEL_KEY, level.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_names() {
        assert_eq!("debug".parse::<LogLevel>().unwrap(), LogLevel::Debug);
        assert_eq!("WARNING".parse::<LogLevel>().unwrap(), LogLevel::Warn);
        assert_eq!(LogLevel::Crit.to_string(), "CRIT");
    }

    #[test]
    fn test_log_level_numeric() {
        assert_eq!("0".parse::<LogLevel>().unwrap(), LogLevel::Trace);
        assert_eq!("8".parse::<LogLevel>().unwrap(), LogLevel::Fatal);
        assert!("9".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_log_level_order() {
        assert!(LogLevel::Trace < LogLevel::Fatal);
    }
}
