//! Content assertions shared by scenario steps.

use std::path::Path;

use serde_yaml::Value;

use crate::error::{HarnessError, Result};
use crate::harness::fs;

pub fn contains(haystack: &str, needle: &str, message: &str) -> Result<()> {
    if haystack.contains(needle) {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "{message}: {needle:?} not found in:\n{haystack}"
        )))
    }
}

pub fn not_contains(haystack: &str, needle: &str, message: &str) -> Result<()> {
    if haystack.contains(needle) {
        Err(HarnessError::assertion(format!(
            "{message}: {needle:?} unexpectedly found in:\n{haystack}"
        )))
    } else {
        Ok(())
    }
}

pub fn equal<T: PartialEq + std::fmt::Debug>(expected: T, actual: T, message: &str) -> Result<()> {
    if expected == actual {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "{message}: expected {expected:?}, got {actual:?}"
        )))
    }
}

/// Looks up a dotted key (`flow.plans_directory`) in a YAML value.
pub fn lookup<'a>(value: &'a Value, dotted_key: &str) -> Option<&'a Value> {
    dotted_key
        .split('.')
        .try_fold(value, |current, key| current.get(key))
}

/// Renders a scalar the way it appears in a hand-written YAML file.
pub fn scalar_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Null => String::new(),
        other => serde_yaml::to_string(other)
            .unwrap_or_default()
            .trim()
            .to_string(),
    }
}

fn load_yaml(path: &Path) -> Result<Value> {
    let content = fs::read_string(path)?;
    if content.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(&content)?)
}

pub fn yaml_field(path: &Path, dotted_key: &str, expected: &str) -> Result<()> {
    let doc = load_yaml(path)?;
    match lookup(&doc, dotted_key) {
        Some(v) if scalar_to_string(v) == expected => Ok(()),
        Some(v) => Err(HarnessError::assertion(format!(
            "{}: {dotted_key} is {:?}, expected {expected:?}",
            path.display(),
            scalar_to_string(v)
        ))),
        None => Err(HarnessError::assertion(format!(
            "{}: field {dotted_key} not found",
            path.display()
        ))),
    }
}

pub fn yaml_field_exists(path: &Path, dotted_key: &str) -> Result<()> {
    let doc = load_yaml(path)?;
    if lookup(&doc, dotted_key).is_some() {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "{}: field {dotted_key} not found",
            path.display()
        )))
    }
}

/// Splits a markdown job file into its YAML frontmatter text and body.
/// Returns `None` when the file does not start with a `---` fence.
pub fn split_frontmatter(content: &str) -> Option<(&str, &str)> {
    let rest = content
        .strip_prefix("---\n")
        .or_else(|| content.strip_prefix("---\r\n"))?;
    let mut offset = 0;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            return Some((&rest[..offset], &rest[offset + line.len()..]));
        }
        offset += line.len();
    }
    None
}

pub fn frontmatter(content: &str) -> Result<Value> {
    let (yaml, _) = split_frontmatter(content)
        .ok_or_else(|| HarnessError::assertion("content has no frontmatter"))?;
    if yaml.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_yaml::from_str(yaml)?)
}

pub fn frontmatter_field(content: &str, key: &str) -> Result<Option<String>> {
    let doc = frontmatter(content)?;
    Ok(lookup(&doc, key).map(scalar_to_string))
}

pub fn body(content: &str) -> &str {
    split_frontmatter(content).map_or(content, |(_, body)| body)
}

#[cfg(test)]
mod tests {
    use super::*;

    const JOB: &str = "---\nid: test-job\ntitle: Test Job\nstatus: pending\ndepends_on:\n  - 01-spec.md\n---\n\nThis is a test job.\n";

    #[test]
    fn test_frontmatter_fields() {
        assert_eq!(
            frontmatter_field(JOB, "title").unwrap().as_deref(),
            Some("Test Job")
        );
        assert_eq!(frontmatter_field(JOB, "model").unwrap(), None);
        assert_eq!(body(JOB), "\nThis is a test job.\n");
    }

    #[test]
    fn test_body_without_frontmatter_is_whole_content() {
        assert_eq!(body("# Chat One\n"), "# Chat One\n");
        assert!(frontmatter("# Chat One\n").is_err());
    }

    #[test]
    fn test_yaml_field_dotted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grove.yml");
        std::fs::write(
            &path,
            "name: test-project\nflow:\n  plans_directory: ./plans\n  max_jobs: 3\n",
        )
        .unwrap();

        yaml_field(&path, "flow.plans_directory", "./plans").unwrap();
        yaml_field(&path, "flow.max_jobs", "3").unwrap();
        yaml_field_exists(&path, "name").unwrap();
        assert!(yaml_field(&path, "name", "other").is_err());
        assert!(yaml_field_exists(&path, "flow.missing").is_err());
    }

    #[test]
    fn test_empty_yaml_has_no_fields() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".grove-plan.yml");
        std::fs::write(&path, "").unwrap();
        assert!(yaml_field_exists(&path, "status").is_err());
    }

    #[test]
    fn test_contains_messages() {
        assert!(contains("status: hold", "hold", "plan on hold").is_ok());
        let err = not_contains("status: hold", "hold", "plan released")
            .unwrap_err()
            .to_string();
        assert!(err.contains("plan released"));
        assert!(equal(3, 3, "jobs").is_ok());
        assert!(equal("a", "b", "ids").is_err());
    }
}
