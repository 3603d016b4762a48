use std::path::Path;

use crate::error::{HarnessError, Result};

pub fn write_string(path: &Path, content: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, content)?;
    Ok(())
}

/// Writes a script and marks it executable (0755).
pub fn write_executable(path: &Path, content: &str) -> Result<()> {
    write_string(path, content)?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o755))?;
    }
    Ok(())
}

pub fn read_string(path: &Path) -> Result<String> {
    std::fs::read_to_string(path).map_err(|e| {
        HarnessError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to read {}: {e}", path.display()),
        ))
    })
}

pub fn create_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path)?;
    Ok(())
}

pub fn exists(path: &Path) -> bool {
    path.exists()
}

/// Names of the regular files directly inside `dir`, sorted.
pub fn list_files(dir: &Path) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_file() {
            names.push(entry.file_name().to_string_lossy().to_string());
        }
    }
    names.sort();
    Ok(names)
}

pub fn remove_if_exists(path: &Path) -> Result<()> {
    match std::fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => std::fs::remove_dir_all(path)?,
        Ok(_) => std::fs::remove_file(path)?,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

pub fn assert_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "expected {} to exist",
            path.display()
        )))
    }
}

pub fn assert_not_exists(path: &Path) -> Result<()> {
    if path.exists() {
        Err(HarnessError::assertion(format!(
            "expected {} not to exist",
            path.display()
        )))
    } else {
        Ok(())
    }
}

pub fn assert_contains(path: &Path, needle: &str) -> Result<()> {
    let content = read_string(path)?;
    if content.contains(needle) {
        Ok(())
    } else {
        Err(HarnessError::assertion(format!(
            "{} does not contain {needle:?}\ncontent:\n{content}",
            path.display()
        )))
    }
}

pub fn assert_not_contains(path: &Path, needle: &str) -> Result<()> {
    let content = read_string(path)?;
    if content.contains(needle) {
        Err(HarnessError::assertion(format!(
            "{} unexpectedly contains {needle:?}",
            path.display()
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_string_creates_parents() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plans/my-plan/.grove-plan.yml");
        write_string(&path, "status: hold\n").unwrap();
        assert_eq!(read_string(&path).unwrap(), "status: hold\n");
        assert!(assert_contains(&path, "status: hold").is_ok());
        assert!(assert_not_contains(&path, "status: hold").is_err());
    }

    #[cfg(unix)]
    #[test]
    fn test_write_executable_sets_mode() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("test_bin/llm");
        write_executable(&path, "#!/bin/sh\necho hi\n").unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
    }

    #[test]
    fn test_list_files_skips_dirs_and_sorts() {
        let dir = tempfile::tempdir().unwrap();
        write_string(&dir.path().join("02-b.md"), "").unwrap();
        write_string(&dir.path().join("01-a.md"), "").unwrap();
        create_dir(&dir.path().join("nested")).unwrap();
        assert_eq!(list_files(dir.path()).unwrap(), vec!["01-a.md", "02-b.md"]);
    }

    #[test]
    fn test_remove_if_exists() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a/b");
        create_dir(&nested).unwrap();
        remove_if_exists(&dir.path().join("a")).unwrap();
        assert_not_exists(&dir.path().join("a")).unwrap();
        remove_if_exists(&dir.path().join("a")).unwrap();
    }
}
