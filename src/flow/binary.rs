use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::config::SuiteConfig;
use crate::error::{HarnessError, Result};

pub const FLOW_BINARY_ENV: &str = "FLOW_BINARY";

const CANDIDATES: &[&str] = &[
    "./bin/flow",
    "../bin/flow",
    "../../bin/flow",
    "../../../bin/flow",
    "../../../../bin/flow",
];

#[derive(Debug, Deserialize)]
struct ProjectManifest {
    binary: Option<BinarySpec>,
}

#[derive(Debug, Deserialize)]
struct BinarySpec {
    path: PathBuf,
}

/// Locates the `flow` binary under test.
///
/// Order: `FLOW_BINARY`, the suite config, the `binary.path` declared by the
/// nearest `grove.yml` above `start_dir`, then `bin/flow` up to four levels up.
pub fn find_flow_binary(config: &SuiteConfig, start_dir: &Path) -> Result<PathBuf> {
    if let Some(from_env) = std::env::var_os(FLOW_BINARY_ENV).filter(|v| !v.is_empty()) {
        return Ok(PathBuf::from(from_env));
    }
    if let Some(path) = &config.flow_binary {
        return Ok(absolutize(start_dir, path));
    }
    if let Some(path) = binary_from_manifest(start_dir)? {
        if path.is_file() {
            return Ok(path);
        }
        debug!("grove.yml declares {} but it does not exist", path.display());
    }
    for candidate in CANDIDATES {
        let path = absolutize(start_dir, Path::new(candidate));
        if path.is_file() {
            return Ok(path);
        }
    }
    Err(HarnessError::BinaryNotFound(
        "flow binary not found. Build it with 'make build' or set FLOW_BINARY env var".into(),
    ))
}

/// `binary.path` from the nearest `grove.yml` at or above `start_dir`,
/// resolved against the manifest's directory.
pub fn binary_from_manifest(start_dir: &Path) -> Result<Option<PathBuf>> {
    for dir in start_dir.ancestors() {
        let manifest = dir.join("grove.yml");
        if !manifest.is_file() {
            continue;
        }
        let content = std::fs::read_to_string(&manifest)?;
        let parsed: ProjectManifest = serde_yaml::from_str(&content)?;
        if let Some(binary) = parsed.binary {
            return Ok(Some(absolutize(dir, &binary.path)));
        }
    }
    Ok(None)
}

fn absolutize(base: &Path, path: &Path) -> PathBuf {
    let joined = if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    };
    joined.canonicalize().unwrap_or(joined)
}

#[cfg(test)]
mod tests {
    use super::*;

    // FLOW_BINARY is process-global; these tests only exercise the paths
    // that run when it is unset.
    fn env_unset() -> bool {
        std::env::var_os(FLOW_BINARY_ENV).is_none()
    }

    #[test]
    fn test_manifest_binary_path() {
        if !env_unset() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("grove.yml"),
            "name: grove-flow\nbinary:\n  name: flow\n  path: ./bin/flow\n",
        )
        .unwrap();
        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/flow"), "").unwrap();
        let nested = dir.path().join("tests/e2e");
        std::fs::create_dir_all(&nested).unwrap();

        let found = find_flow_binary(&SuiteConfig::default(), &nested).unwrap();
        assert_eq!(found, dir.path().join("bin/flow").canonicalize().unwrap());
    }

    #[test]
    fn test_config_path_wins_over_candidates() {
        if !env_unset() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let config = SuiteConfig {
            flow_binary: Some(PathBuf::from("/opt/flow/bin/flow")),
            ..SuiteConfig::default()
        };
        assert_eq!(
            find_flow_binary(&config, dir.path()).unwrap(),
            PathBuf::from("/opt/flow/bin/flow")
        );
    }

    #[test]
    fn test_candidate_search_and_not_found() {
        if !env_unset() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let deep = dir.path().join("a/b");
        std::fs::create_dir_all(&deep).unwrap();
        assert!(matches!(
            find_flow_binary(&SuiteConfig::default(), &deep),
            Err(HarnessError::BinaryNotFound(_))
        ));

        std::fs::create_dir_all(dir.path().join("bin")).unwrap();
        std::fs::write(dir.path().join("bin/flow"), "").unwrap();
        let found = find_flow_binary(&SuiteConfig::default(), &deep).unwrap();
        assert_eq!(found, dir.path().join("bin/flow").canonicalize().unwrap());
    }
}
