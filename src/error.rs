use std::path::PathBuf;

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
  #[error("config error: {0}")]
  Config(String),

  #[error("config file not found: {0}")]
  ConfigNotFound(PathBuf),

  #[error("binary not found: {0}")]
  BinaryNotFound(String),

  #[error("command error: {0}")]
  Command(String),

  #[error("assertion failed: {0}")]
  Assertion(String),

  #[error("git error: {0}")]
  Git(String),

  #[error("timeout: {0}")]
  Timeout(String),

  #[error("cancelled")]
  Cancelled,

  #[error("no scenarios matched: {0}")]
  NoScenarios(String),

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("yaml error: {0}")]
  Yaml(#[from] serde_yaml::Error),

  #[error("json error: {0}")]
  Json(#[from] serde_json::Error),
}

impl HarnessError {
  pub fn assertion(msg: impl Into<String>) -> Self {
    HarnessError::Assertion(msg.into())
  }
}

pub type Result<T> = std::result::Result<T, HarnessError>;
