use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{HarnessError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "flow-e2e.yaml";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Explicit path to the `flow` binary under test.
    #[serde(default)]
    pub flow_binary: Option<PathBuf>,
    /// Directory holding per-scenario sandboxes.
    #[serde(default = "default_work_root")]
    pub work_root: PathBuf,
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,
    #[serde(default = "default_keep_on_failure")]
    pub keep_on_failure: bool,
    #[serde(default)]
    pub keep_artifacts: bool,
    #[serde(default)]
    pub fail_fast: bool,
    /// Directories prepended to PATH after the sandbox's mock directory.
    #[serde(default)]
    pub extra_path: Vec<PathBuf>,
}

impl Default for SuiteConfig {
    fn default() -> Self {
        Self {
            flow_binary: None,
            work_root: default_work_root(),
            command_timeout_secs: default_command_timeout(),
            keep_on_failure: default_keep_on_failure(),
            keep_artifacts: false,
            fail_fast: false,
            extra_path: Vec::new(),
        }
    }
}

fn default_work_root() -> PathBuf {
    std::env::temp_dir().join("flow-e2e")
}
fn default_command_timeout() -> u64 {
    120
}
fn default_keep_on_failure() -> bool {
    true
}

impl SuiteConfig {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(HarnessError::ConfigNotFound(path.to_path_buf()));
        }
        let content = std::fs::read_to_string(path)?;
        let config: SuiteConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` when it exists. A missing file is only an error when the
    /// caller asked for it explicitly.
    pub fn load_or_default(path: &Path, explicit: bool) -> Result<Self> {
        if path.exists() || explicit {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    fn validate(&self) -> Result<()> {
        if self.command_timeout_secs == 0 {
            return Err(HarnessError::Config(
                "command_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.work_root.as_os_str().is_empty() {
            return Err(HarnessError::Config("work_root must not be empty".into()));
        }
        Ok(())
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_config() {
        let config = SuiteConfig::default();
        assert_eq!(config.command_timeout_secs, 120);
        assert!(config.keep_on_failure);
        assert!(!config.keep_artifacts);
        assert!(config.flow_binary.is_none());
        assert!(config.work_root.ends_with("flow-e2e"));
    }

    #[test]
    fn test_load_partial_yaml_fills_defaults() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "flow_binary: /opt/flow/bin/flow\nfail_fast: true\n").unwrap();

        let config = SuiteConfig::load(tmp.path()).unwrap();
        assert_eq!(config.flow_binary, Some(PathBuf::from("/opt/flow/bin/flow")));
        assert!(config.fail_fast);
        assert_eq!(config.command_timeout_secs, 120);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let tmp = NamedTempFile::new().unwrap();
        std::fs::write(tmp.path(), "command_timeout_secs: 0\n").unwrap();

        let err = SuiteConfig::load(tmp.path()).unwrap_err();
        assert!(matches!(err, HarnessError::Config(_)));
    }

    #[test]
    fn test_missing_file_only_errors_when_explicit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.yaml");

        assert!(SuiteConfig::load_or_default(&path, false).is_ok());
        assert!(matches!(
            SuiteConfig::load_or_default(&path, true),
            Err(HarnessError::ConfigNotFound(_))
        ));
    }
}
