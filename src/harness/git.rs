use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::harness::fs;

fn git(dir: &Path, args: &[&str]) -> Result<String> {
    debug!("git {} (in {})", args.join(" "), dir.display());
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        // Keep the developer's global hooks and templates out of fixtures.
        .env("GIT_CONFIG_NOSYSTEM", "1")
        .env("GIT_TERMINAL_PROMPT", "0")
        .output()?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(HarnessError::Git(format!(
            "git {} failed: {stderr}",
            args.first().copied().unwrap_or_default()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

pub fn is_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .is_ok_and(|o| o.status.success())
}

pub fn init(dir: &Path) -> Result<()> {
    fs::create_dir(dir)?;
    // `-b` needs git >= 2.28; fall back to renaming HEAD on older versions.
    if git(dir, &["init", "-q", "-b", "main"]).is_err() {
        git(dir, &["init", "-q"])?;
        git(dir, &["symbolic-ref", "HEAD", "refs/heads/main"])?;
    }
    Ok(())
}

pub fn setup_test_config(dir: &Path) -> Result<()> {
    git(dir, &["config", "user.name", "Flow E2E"])?;
    git(dir, &["config", "user.email", "flow-e2e@example.com"])?;
    git(dir, &["config", "commit.gpgsign", "false"])?;
    Ok(())
}

pub fn add(dir: &Path, pathspec: &str) -> Result<()> {
    git(dir, &["add", pathspec])?;
    Ok(())
}

pub fn commit(dir: &Path, message: &str) -> Result<()> {
    git(dir, &["commit", "-q", "-m", message])?;
    Ok(())
}

/// Initializes a repo with test identity, a README and one commit on `main`.
pub fn setup_test_repo(dir: &Path) -> Result<()> {
    init(dir)?;
    setup_test_config(dir)?;
    fs::write_string(&dir.join("README.md"), "Test project\n")?;
    add(dir, ".")?;
    commit(dir, "Initial commit")
}

pub fn create_worktree(repo: &Path, path: &Path, branch: &str) -> Result<PathBuf> {
    if path.exists() {
        debug!("worktree already exists: {}", path.display());
        return Ok(path.to_path_buf());
    }
    let path_str = path.to_string_lossy();
    if let Err(e) = git(repo, &["worktree", "add", "-q", "-b", branch, &path_str]) {
        // Branch may already exist, try without -b
        if e.to_string().contains("already exists") {
            git(repo, &["worktree", "add", "-q", &path_str, branch])?;
        } else {
            return Err(e);
        }
    }
    Ok(path.to_path_buf())
}

pub fn worktree_list(repo: &Path) -> Result<Vec<PathBuf>> {
    let stdout = git(repo, &["worktree", "list", "--porcelain"])?;
    Ok(stdout
        .lines()
        .filter_map(|line| line.strip_prefix("worktree "))
        .map(PathBuf::from)
        .collect())
}

pub fn current_branch(dir: &Path) -> Result<String> {
    Ok(git(dir, &["rev-parse", "--abbrev-ref", "HEAD"])?
        .trim()
        .to_string())
}

pub fn toplevel(dir: &Path) -> Result<PathBuf> {
    Ok(PathBuf::from(
        git(dir, &["rev-parse", "--show-toplevel"])?.trim(),
    ))
}

pub fn branch_exists(repo: &Path, branch: &str) -> bool {
    git(
        repo,
        &["rev-parse", "--verify", "-q", &format!("refs/heads/{branch}")],
    )
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_setup_test_repo_and_worktree() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        let repo = dir.path().join("project");
        setup_test_repo(&repo).unwrap();

        assert_eq!(current_branch(&repo).unwrap(), "main");
        assert_eq!(
            toplevel(&repo).unwrap().canonicalize().unwrap(),
            repo.canonicalize().unwrap()
        );

        let wt = repo.join(".grove-worktrees/feature");
        create_worktree(&repo, &wt, "feature").unwrap();
        assert!(wt.join("README.md").exists());
        assert!(branch_exists(&repo, "feature"));
        assert_eq!(current_branch(&wt).unwrap(), "feature");

        let listed = worktree_list(&repo).unwrap();
        assert_eq!(listed.len(), 2);

        // Idempotent when the path is already there.
        create_worktree(&repo, &wt, "feature").unwrap();
    }

    #[test]
    fn test_commit_without_changes_fails() {
        if !is_available() {
            return;
        }
        let dir = tempfile::tempdir().unwrap();
        setup_test_repo(dir.path()).unwrap();
        let err = commit(dir.path(), "nothing").unwrap_err();
        assert!(matches!(err, HarnessError::Git(_)));
    }
}
