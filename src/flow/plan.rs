//! Locating plans and job files written by `flow`.

use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::harness::{fs, git, Context};

pub const PLAN_CONFIG_FILE: &str = ".grove-plan.yml";
const INIT_PATH_MARKER: &str = "Initializing orchestration plan in:";

/// Plan directory announced by `flow plan init` on the line after the marker.
pub fn parse_init_output(stdout: &str) -> Option<PathBuf> {
    let mut lines = stdout.lines();
    while let Some(line) = lines.next() {
        if line.contains(INIT_PATH_MARKER) {
            let inline = line
                .split_once(INIT_PATH_MARKER)
                .map(|(_, rest)| rest.trim())
                .unwrap_or_default();
            if !inline.is_empty() {
                return Some(PathBuf::from(inline));
            }
            return lines
                .next()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(PathBuf::from);
        }
    }
    None
}

/// Where a plan lives with the fixtures' `plans_directory: ./plans`.
pub fn resolve_plan_path(ctx: &Context, plan_name: &str) -> PathBuf {
    ctx.root_dir.join("plans").join(plan_name)
}

pub fn plan_config_path(ctx: &Context, plan_name: &str) -> PathBuf {
    resolve_plan_path(ctx, plan_name).join(PLAN_CONFIG_FILE)
}

/// Absolute path for `plan_path`, trying `root_dir` and then the git toplevel.
pub fn plan_absolute_path(ctx: &Context, plan_path: &Path) -> Result<PathBuf> {
    if plan_path.is_absolute() {
        return Ok(plan_path.to_path_buf());
    }

    let from_root = ctx.root_dir.join(plan_path);
    if from_root.exists() {
        return Ok(from_root);
    }

    if let Ok(top) = git::toplevel(&ctx.root_dir) {
        if top != ctx.root_dir {
            let from_git = top.join(plan_path);
            if from_git.exists() {
                return Ok(from_git);
            }
        }
    }

    Err(HarnessError::assertion(format!(
        "plan not found at {}",
        plan_path.display()
    )))
}

fn job_files(plan_dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = fs::list_files(plan_dir)?
        .into_iter()
        .filter(|name| name.ends_with(".md"))
        .map(|name| plan_dir.join(name))
        .collect();
    files.sort();
    Ok(files)
}

/// Finds a job by the `title:` in its frontmatter rather than its file name.
pub fn find_job_file_by_title(plan_dir: &Path, title: &str) -> Result<PathBuf> {
    let plain = format!("title: {title}");
    let quoted = format!("title: \"{title}\"");

    for file in job_files(plan_dir)? {
        let name = file.file_name().and_then(|n| n.to_str()).unwrap_or_default();
        if name.ends_with("spec.md") || name == "README.md" {
            continue;
        }
        let Ok(content) = std::fs::read_to_string(&file) else {
            debug!("skipping unreadable {}", file.display());
            continue;
        };
        if content.lines().any(|l| l.trim_end() == plain || l.trim_end() == quoted) {
            return Ok(file);
        }
    }

    Err(HarnessError::assertion(format!(
        "job file with title '{title}' not found in directory {}",
        plan_dir.display()
    )))
}

pub fn find_job_by_prefix(plan_dir: &Path, prefix: &str) -> Result<PathBuf> {
    job_files(plan_dir)?
        .into_iter()
        .find(|f| {
            f.file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.starts_with(prefix))
        })
        .ok_or_else(|| {
            HarnessError::assertion(format!(
                "no job file found with prefix {prefix} in {}",
                plan_dir.display()
            ))
        })
}

/// Lowercase, dash-separated form `flow` uses for job file names.
pub fn job_slug(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    let mut pending_dash = false;
    for c in title.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c.to_ascii_lowercase());
        } else {
            pending_dash = true;
        }
    }
    slug
}

/// `NN-slug.md` for the `index`-th job (1-based).
pub fn job_file_name(index: usize, title: &str) -> String {
    format!("{index:02}-{}.md", job_slug(title))
}

/// Removes a lock file created by `create_mock_lock_file` when dropped.
#[derive(Debug)]
pub struct LockFileGuard {
    path: PathBuf,
}

impl LockFileGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockFileGuard {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

fn lock_path(job_path: &Path) -> PathBuf {
    let mut s = job_path.as_os_str().to_os_string();
    s.push(".lock");
    PathBuf::from(s)
}

/// Simulates a running job: writes `<job>.lock` holding this process's pid.
pub fn create_mock_lock_file(job_path: &Path) -> Result<LockFileGuard> {
    let path = lock_path(job_path);
    std::fs::write(&path, std::process::id().to_string()).map_err(|e| {
        HarnessError::Io(std::io::Error::new(
            e.kind(),
            format!("failed to write mock lock file at {}: {e}", path.display()),
        ))
    })?;
    Ok(LockFileGuard { path })
}

/// Whether the pid recorded in `<job>.lock` belongs to a live process.
pub fn lock_file_pid_alive(job_path: &Path) -> Result<bool> {
    let path = lock_path(job_path);
    if !path.exists() {
        return Ok(false);
    }
    let content = std::fs::read_to_string(&path)?;
    let Ok(pid) = content.trim().parse::<i32>() else {
        return Ok(false);
    };
    Ok(pid_alive(pid))
}

#[cfg(unix)]
fn pid_alive(pid: i32) -> bool {
    if pid <= 0 {
        return false;
    }
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // No signal: only checks that the pid exists.
    matches!(kill(Pid::from_raw(pid), None), Ok(()) | Err(Errno::EPERM))
}

#[cfg(not(unix))]
fn pid_alive(_pid: i32) -> bool {
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ContextSettings;

    #[test]
    fn test_parse_init_output() {
        let stdout = "Initializing orchestration plan in:\n  /tmp/x/plans/my-plan\nCreated .grove-plan.yml\n";
        assert_eq!(
            parse_init_output(stdout),
            Some(PathBuf::from("/tmp/x/plans/my-plan"))
        );
        assert_eq!(
            parse_init_output("Initializing orchestration plan in: /a/b\n"),
            Some(PathBuf::from("/a/b"))
        );
        assert_eq!(parse_init_output("Initializing orchestration plan in:\n"), None);
        assert_eq!(parse_init_output("nothing here"), None);
    }

    #[test]
    fn test_job_slug() {
        assert_eq!(job_slug("Setup Environment"), "setup-environment");
        assert_eq!(job_slug("  Run: the tests!  "), "run-the-tests");
        assert_eq!(job_file_name(2, "Install Dependencies"), "02-install-dependencies.md");
    }

    #[test]
    fn test_find_job_file_by_title() {
        let dir = tempfile::tempdir().unwrap();
        let plan = dir.path();
        std::fs::write(plan.join("01-spec.md"), "---\ntitle: Build\n---\n").unwrap();
        std::fs::write(plan.join("02-build.md"), "---\ntitle: \"Build\"\n---\n").unwrap();
        std::fs::write(plan.join("03-build-more.md"), "---\ntitle: Build More\n---\n").unwrap();

        assert_eq!(find_job_file_by_title(plan, "Build").unwrap(), plan.join("02-build.md"));
        assert_eq!(
            find_job_file_by_title(plan, "Build More").unwrap(),
            plan.join("03-build-more.md")
        );
        assert!(find_job_file_by_title(plan, "Deploy").is_err());
        assert_eq!(find_job_by_prefix(plan, "03").unwrap(), plan.join("03-build-more.md"));
        assert!(find_job_by_prefix(plan, "09").is_err());
    }

    #[test]
    fn test_mock_lock_file_lifecycle() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("01-agent.md");
        std::fs::write(&job, "---\ntitle: Agent\n---\n").unwrap();

        assert!(!lock_file_pid_alive(&job).unwrap());
        let guard = create_mock_lock_file(&job).unwrap();
        assert_eq!(guard.path(), dir.path().join("01-agent.md.lock"));
        assert!(lock_file_pid_alive(&job).unwrap());
        drop(guard);
        assert!(!dir.path().join("01-agent.md.lock").exists());
    }

    #[test]
    fn test_stale_lock_file_is_not_alive() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("01-agent.md");
        let mut finished = std::process::Command::new("true").spawn().unwrap();
        let pid = finished.id();
        finished.wait().unwrap();

        std::fs::write(dir.path().join("01-agent.md.lock"), pid.to_string()).unwrap();
        assert!(!lock_file_pid_alive(&job).unwrap());
        std::fs::write(dir.path().join("01-agent.md.lock"), "not-a-pid").unwrap();
        assert!(!lock_file_pid_alive(&job).unwrap());
        std::fs::write(dir.path().join("01-agent.md.lock"), "-1").unwrap();
        assert!(!lock_file_pid_alive(&job).unwrap());
    }

    #[test]
    fn test_plan_paths() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(dir.path(), ContextSettings::default()).unwrap();
        let plan = resolve_plan_path(&ctx, "my-plan");
        assert_eq!(plan, ctx.root_dir.join("plans/my-plan"));
        assert!(plan_config_path(&ctx, "my-plan").ends_with("plans/my-plan/.grove-plan.yml"));

        assert!(plan_absolute_path(&ctx, Path::new("plans/my-plan")).is_err());
        std::fs::create_dir_all(&plan).unwrap();
        assert_eq!(plan_absolute_path(&ctx, Path::new("plans/my-plan")).unwrap(), plan);
        assert_eq!(
            plan_absolute_path(&ctx, Path::new("/abs/plan")).unwrap(),
            PathBuf::from("/abs/plan")
        );
    }
}
