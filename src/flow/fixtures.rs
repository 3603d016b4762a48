//! Project, config and mock fixtures the `flow` scenarios start from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::flow::plan;
use crate::harness::mock::{self, Mock, MOCK_LLM_RESPONSE_FILE_ENV};
use crate::harness::{fs, git, Context, Step};

pub const GROVE_CONFIG_FILE: &str = "grove.yml";

/// The most common project config: plans under `./plans`.
pub const PLANS_CONFIG: &str = "name: test-project\nflow:\n  plans_directory: ./plans\n";

pub fn write_grove_config(dir: &Path, body: &str) -> Result<()> {
    fs::write_string(&dir.join(GROVE_CONFIG_FILE), body)
}

/// Git repo in `root_dir` with one commit, followed by `grove_yml` (left
/// uncommitted so `flow` sees it as local config).
pub fn standard_project(ctx: &Context, grove_yml: &str) -> Result<()> {
    git::setup_test_repo(&ctx.root_dir)?;
    write_grove_config(&ctx.root_dir, grove_yml)
}

pub fn create_test_grove_config(ctx: &Context) -> Result<()> {
    write_grove_config(
        &ctx.root_dir,
        "flow:\n  target_agent_container: fake-container\n  plans_directory: ./plans\n",
    )
}

/// Minimal global config in the sandboxed XDG_CONFIG_HOME so the developer's
/// own config never leaks into a run.
pub fn setup_empty_global_config(ctx: &Context) -> Result<()> {
    let dir = ctx.config_dir().join("grove");
    fs::create_dir(&dir)?;
    fs::write_string(&dir.join(GROVE_CONFIG_FILE), "version: \"1.0\"\n")
}

/// Project under `~/code/<project>` and a notebook rooted at `~/notebooks`,
/// linked through the sandboxed global config. Returns (project, notebooks).
pub fn setup_default_environment(ctx: &mut Context, project: &str) -> Result<(PathBuf, PathBuf)> {
    let home = ctx.home_dir().to_path_buf();
    let project_dir = home.join("code").join(project);
    fs::create_dir(&project_dir)?;
    git::setup_test_repo(&project_dir)?;
    write_grove_config(&project_dir, &format!("name: {project}\nversion: \"1.0\"\n"))?;

    let notebooks_root = home.join("notebooks");
    fs::create_dir(&notebooks_root)?;

    let global = format!(
        r#"version: "1.0"
notebooks:
  definitions:
    default:
      root_dir: {notebooks}
  rules:
    default: default
groves:
  code:
    path: ~/code
    enabled: true
    notebook: default
"#,
        notebooks = notebooks_root.display()
    );
    write_grove_config(&ctx.config_dir().join("grove"), &global)?;

    ctx.set_path("project_dir", &project_dir);
    ctx.set_path("notebooks_root", &notebooks_root);
    Ok((project_dir, notebooks_root))
}

/// Plan directory `flow` uses for `project` in the default environment.
pub fn notebook_plan_path(notebooks_root: &Path, project: &str, plan_name: &str) -> PathBuf {
    notebooks_root
        .join("workspaces")
        .join(project)
        .join("plans")
        .join(plan_name)
}

/// Runs `flow plan init` and returns the plan directory it reports, falling
/// back to `<root_dir>/<plan>` when the output does not say.
pub fn setup_plan_in_expected_location(ctx: &Context, plan_name: &str) -> Result<PathBuf> {
    let config_path = ctx.root_dir.join(GROVE_CONFIG_FILE);
    if config_path.exists() {
        let content = fs::read_string(&config_path)?;
        if content.contains("plans_directory:") {
            write_grove_config(&ctx.root_dir, "flow:\n  target_agent_container: fake-container\n")?;
        }
    }

    let result = ctx.flow(["plan", "init", plan_name])?.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    result
        .ok()
        .map_err(|e| HarnessError::Command(format!("failed to init plan: {e}")))?;

    match plan::parse_init_output(&result.stdout) {
        Some(path) => Ok(path),
        None => {
            debug!("plan init did not print a path, using default location");
            Ok(ctx.root_dir.join(plan_name))
        }
    }
}

/// Options for `setup_test_environment`.
#[derive(Debug, Clone, Default)]
pub struct TestEnvOptions {
    /// Canned response for the `llm` mock.
    pub mock_llm_response: Option<String>,
    /// Extra or replacement mock scripts keyed by command name.
    pub additional_mocks: BTreeMap<String, String>,
    /// Give mocks a private call log instead of the shared one in /tmp.
    pub subprocess_safe: bool,
}

impl TestEnvOptions {
    pub fn with_response(response: &str) -> Self {
        Self {
            mock_llm_response: Some(response.to_string()),
            ..Self::default()
        }
    }

    pub fn mock(mut self, name: &str, script: &str) -> Self {
        self.additional_mocks
            .insert(name.to_string(), script.to_string());
        self
    }
}

pub const DEFAULT_MOCKS: &[&str] = &["llm", "tmux", "docker", "cx", "grove-hooks"];

/// Installs the default mocks (overridden by `additional_mocks`) and wires the
/// canned LLM response through `GROVE_MOCK_LLM_RESPONSE_FILE`.
pub fn apply_test_environment(ctx: &mut Context, options: &TestEnvOptions) -> Result<()> {
    let mut mocks: Vec<Mock> = DEFAULT_MOCKS
        .iter()
        .filter(|name| !options.additional_mocks.contains_key(**name))
        .map(|name| Mock::new(name))
        .collect();
    mocks.extend(
        options
            .additional_mocks
            .iter()
            .map(|(name, script)| Mock::with_script(name, script)),
    );
    mock::install_all(ctx, &mocks)?;

    if let Some(response) = &options.mock_llm_response {
        let path = ctx.sandbox_dir().join("mock-llm-response.txt");
        fs::write_string(&path, response)?;
        ctx.export_env(MOCK_LLM_RESPONSE_FILE_ENV, path.to_string_lossy());
    }

    if options.subprocess_safe {
        let log = ctx.sandbox_dir().join("nb_mock_calls.log");
        ctx.export_env("NB_MOCK_LOG", log.to_string_lossy());
        ctx.set_path("nb_mock_log", &log);
    }
    Ok(())
}

pub fn setup_test_environment(options: TestEnvOptions) -> Step {
    Step::new("Setup test environment", move |ctx: &mut Context| {
        apply_test_environment(ctx, &options)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::ContextSettings;

    fn ctx() -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let ctx = Context::new(dir.path(), ContextSettings::default()).unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_empty_global_config() {
        let (_dir, ctx) = ctx();
        setup_empty_global_config(&ctx).unwrap();
        let path = ctx.config_dir().join("grove/grove.yml");
        crate::harness::assert::yaml_field(&path, "version", "1.0").unwrap();
    }

    #[test]
    fn test_test_environment_overrides_and_response() {
        let (_dir, mut ctx) = ctx();
        let options = TestEnvOptions::with_response("Test job completed")
            .mock("tmux", "#!/bin/bash\necho custom tmux\n");
        apply_test_environment(&mut ctx, &options).unwrap();

        for name in DEFAULT_MOCKS {
            assert!(ctx.bin_dir().join(name).exists(), "{name} missing");
        }
        let tmux = ctx.command("tmux", ["ls"]).run();
        assert_eq!(tmux.stdout.trim(), "custom tmux");

        let llm = ctx.command("llm", ["-m", "mock"]).run();
        assert_eq!(llm.stdout, "Test job completed");
    }

    #[test]
    fn test_subprocess_safe_log() {
        let (_dir, mut ctx) = ctx();
        let options = TestEnvOptions {
            subprocess_safe: true,
            ..TestEnvOptions::default()
        }
        .mock("nb", crate::harness::mock::builtin_script("nb").unwrap());
        apply_test_environment(&mut ctx, &options).unwrap();

        ctx.command("nb", ["add", "note"]).run().assert_success().unwrap();
        let log = ctx.get_path("nb_mock_log").unwrap();
        assert_eq!(std::fs::read_to_string(log).unwrap(), "add note\n");
    }

    #[test]
    fn test_default_environment_layout() {
        if !git::is_available() {
            return;
        }
        let (_dir, mut ctx) = ctx();
        let (project, notebooks) = setup_default_environment(&mut ctx, "my-project").unwrap();
        assert!(project.join(".git").exists());
        assert!(project.starts_with(ctx.home_dir()));
        assert_eq!(ctx.get_path("notebooks_root").unwrap(), notebooks);
        let global = ctx.config_dir().join("grove/grove.yml");
        crate::harness::assert::yaml_field(&global, "groves.code.notebook", "default").unwrap();
        assert_eq!(
            notebook_plan_path(&notebooks, "my-project", "my-plan"),
            notebooks.join("workspaces/my-project/plans/my-plan")
        );
    }
}
