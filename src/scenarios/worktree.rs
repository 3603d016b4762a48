//! Worktree isolation: context files, per-worktree `.grove/state.yml`, and
//! `go.work` propagation.

use std::path::Path;

use crate::error::Result;
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::steps::{flow_in, verify_file_exists, Expect};
use crate::harness::mock::MOCK_LLM_RESPONSE_FILE_ENV;
use crate::harness::{fs, git, CommandResult, Context, Scenario, Step};

const MOCK_MODEL_CONFIG: &str = "version: \"1.0\"
flow:
  oneshot_model: mock
  plans_directory: \"./plans\"
";

/// `flow <args>` from `dir`, with the mock model answering from `response`.
fn flow_with_response(ctx: &Context, dir: &Path, response: &Path, args: &[&str]) -> Result<CommandResult> {
    let mut cmd = ctx.flow(args.iter().copied())?;
    cmd.dir(dir).env_pair(MOCK_LLM_RESPONSE_FILE_ENV, response);
    let result = cmd.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    Ok(result)
}

fn oneshot_job(id: &str, title: &str, worktree: &str, body: &str) -> String {
    format!(
        "---\nid: {id}\ntitle: {title}\nstatus: pending\ntype: oneshot\nworktree: {worktree}\nmodel: mock\n---\n\n{body}\n"
    )
}

/// `unset` may leave the key behind as long as it no longer names a plan.
fn active_plan_cleared(state: &str) -> bool {
    !state.contains("active_plan:")
        || state.contains("active_plan: \"\"")
        || state.contains("active_plan: null")
}

const SETUP_WORKTREE_JOB: &str = "---
id: setup-worktree
title: Setup Feature Branch Worktree
status: pending
type: shell
worktree: feature-branch
---

echo \"Setting up feature branch worktree\"
echo \"# Feature Branch Context\" > CLAUDE.md
echo \"\" >> CLAUDE.md
echo \"This is the feature branch context for developing a new feature.\" >> CLAUDE.md
echo \"This context is specific to the feature-branch worktree.\" >> CLAUDE.md
";

const CONTEXT_RESPONSE: &str = "Based on the context files I can see:

## Available Context Files:
- CLAUDE.md (from the worktree)
- .grove/context (if it exists in the worktree)

## Content Analysis:
The CLAUDE.md file indicates this is the \"Feature Branch Context\" for developing a new feature.
I am working in the feature-branch worktree, not the main repository.

## Working Directory:
My working directory is the feature-branch worktree at .grove-worktrees/feature-branch/
";

pub fn simple_worktree_context() -> Scenario {
    Scenario::new(
        "simple-worktree-context-test",
        "Verify oneshot jobs see only their worktree context",
        &["worktree", "context", "smoke"],
        vec![
            Step::new("Setup project with multiple contexts", |ctx: &mut Context| {
                let root = ctx.root_dir.clone();
                git::init(&root)?;
                git::setup_test_config(&root)?;
                fs::write_string(&root.join("README.md"), "# Main Repository\n")?;
                fs::write_string(
                    &root.join("CLAUDE.md"),
                    "# Main Repository Context\n\nThis is the main repository context.\n",
                )?;
                fs::write_string(
                    &root.join("main.go"),
                    "package main\n\nfunc main() {\n\t// Main repo code\n}\n",
                )?;
                git::add(&root, ".")?;
                git::commit(&root, "Initial commit")?;
                fixtures::setup_empty_global_config(ctx)?;
                fixtures::write_grove_config(&root, MOCK_MODEL_CONFIG)?;

                let plan_dir = root.join("plans/test-worktree-context");
                fs::write_string(
                    &plan_dir.join("01-analyze-context.md"),
                    &oneshot_job(
                        "analyze-context",
                        "Analyze Available Context",
                        "feature-branch",
                        "Tell me what context files you can see and what their content says about the current working directory.",
                    ),
                )?;
                fs::write_string(&root.join("mock-response.txt"), CONTEXT_RESPONSE)
            }),
            Step::new("Create worktree and add different context", |ctx: &mut Context| {
                let plan_dir = ctx.root_dir.join("plans/test-worktree-context");
                fs::write_string(&plan_dir.join("00-setup-worktree.md"), SETUP_WORKTREE_JOB)?;
                flow_in(ctx, Some(&plan_dir), &["plan", "run", "00-setup-worktree.md", "-y"])?.ok()
            }),
            verify_file_exists(".grove-worktrees/feature-branch/CLAUDE.md"),
            Step::new("Run oneshot job and verify context isolation", |ctx: &mut Context| {
                let plan_dir = ctx.root_dir.join("plans/test-worktree-context");
                let response = ctx.root_dir.join("mock-response.txt");
                flow_with_response(ctx, &plan_dir, &response, &["plan", "run", "01-analyze-context.md", "-y"])?
                    .ok()?;

                let job = plan_dir.join("01-analyze-context.md");
                fs::assert_contains(&job, "Feature Branch Context")?;
                fs::assert_not_contains(&job, "Main Repository Context")
            }),
        ],
    )
}

/// Runs the plan's single job from inside its directory, then checks the
/// worktree it created carries its own state file.
fn run_isolated_job(plan_name: &'static str, job_file: &'static str, response: &'static str) -> Step {
    Step::new(
        format!("Run {job_file} to create worktree '{plan_name}' with state"),
        move |ctx: &mut Context| {
            let plan_dir = ctx.root_dir.join("plans").join(plan_name);
            let response = ctx.root_dir.join(response);
            flow_with_response(ctx, &plan_dir, &response, &["plan", "run", job_file])?.ok()?;

            let worktree = ctx.root_dir.join(".grove-worktrees").join(plan_name);
            fs::assert_exists(&worktree)?;
            fs::assert_contains(&worktree.join(".grove/state.yml"), "active_plan: .")
        },
    )
}

pub fn state_isolation() -> Scenario {
    Scenario::new(
        "worktree-state-isolation",
        "Verify that each worktree keeps its own active plan state",
        &["worktree", "state", "isolation"],
        vec![
            Step::new("Setup git repository with plans", |ctx: &mut Context| {
                let root = ctx.root_dir.clone();
                git::init(&root)?;
                git::setup_test_config(&root)?;
                fs::write_string(&root.join("README.md"), "# Test Project\n")?;
                git::add(&root, ".")?;
                git::commit(&root, "Initial commit")?;
                fixtures::setup_empty_global_config(ctx)?;
                fixtures::write_grove_config(&root, MOCK_MODEL_CONFIG)?;

                for (name, letter) in [("feature-a", "A"), ("feature-b", "B")] {
                    let suffix = letter.to_lowercase();
                    let body = if letter == "A" {
                        "Implement feature A in a dedicated worktree."
                    } else {
                        "Implement feature B in a different worktree."
                    };
                    fs::write_string(
                        &root.join("plans").join(name).join(format!("01-implement-{suffix}.md")),
                        &oneshot_job(
                            &format!("implement-{name}"),
                            &format!("Implement Feature {letter}"),
                            name,
                            body,
                        ),
                    )?;
                    fs::write_string(
                        &root.join(format!("mock-response-{suffix}.txt")),
                        &format!("Feature {letter} implemented successfully."),
                    )?;
                }
                Ok(())
            }),
            run_isolated_job("feature-a", "01-implement-a.md", "mock-response-a.txt"),
            run_isolated_job("feature-b", "01-implement-b.md", "mock-response-b.txt"),
            Step::new("Verify worktree A kept its state", |ctx: &mut Context| {
                fs::assert_contains(
                    &ctx.root_dir.join(".grove-worktrees/feature-a/.grove/state.yml"),
                    "active_plan: .",
                )
            }),
            // "." names no plan from inside a worktree, so an error report is tolerated.
            Step::new("Test flow plan status in worktrees", |ctx: &mut Context| {
                for name in ["feature-a", "feature-b"] {
                    let worktree = ctx.root_dir.join(".grove-worktrees").join(name);
                    let result = flow_in(ctx, Some(&worktree), &["plan", "status"])?;
                    if result.stderr.contains("Error") {
                        return Ok(());
                    }
                    result.ok()?;
                }
                Ok(())
            }),
            Step::new("Test that main repo is unaffected", |ctx: &mut Context| {
                let current = flow_in(ctx, None, &["plan", "current"])?;
                let state_file = ctx.root_dir.join(".grove/state.yml");
                let state = if fs::exists(&state_file) {
                    fs::read_string(&state_file)?
                } else {
                    String::new()
                };
                ctx.verify("main repo state", |v| {
                    v.not_contains("current plan", &current.stdout, "feature-a")
                        .not_contains("current plan", &current.stdout, "feature-b")
                        .not_contains("state file", &state, "feature-a")
                        .not_contains("state file", &state, "feature-b");
                })
            }),
        ],
    )
}

const REFACTOR_JOB: &str = "---
id: refactor-code
title: Refactor Main Function
status: pending
type: interactive_agent
worktree: refactor-work
---

Refactor the main.go file to improve structure.
";

fn refactor_worktree(ctx: &Context) -> std::path::PathBuf {
    ctx.root_dir.join(".grove-worktrees/refactor-work")
}

pub fn state_direct_navigation() -> Scenario {
    Scenario::new(
        "worktree-state-direct-navigation",
        "Verify that cd'ing into a worktree allows immediate use of plan commands",
        &["worktree", "state", "navigation"],
        vec![
            Step::new("Setup git repository with interactive agent job", |ctx: &mut Context| {
                let root = ctx.root_dir.clone();
                git::init(&root)?;
                git::setup_test_config(&root)?;
                fs::write_string(&root.join("README.md"), "# Test Project\n")?;
                fs::write_string(
                    &root.join("main.go"),
                    "package main\n\nfunc main() {\n\t// TODO\n}\n",
                )?;
                git::add(&root, ".")?;
                git::commit(&root, "Initial commit")?;
                fixtures::setup_empty_global_config(ctx)?;
                fixtures::write_grove_config(&root, "version: \"1.0\"\nflow:\n  plans_directory: \"./plans\"\n")?;
                fs::write_string(&root.join("plans/refactor-task/01-refactor.md"), REFACTOR_JOB)
            }),
            // Laid out by hand, the way an agent session leaves it.
            Step::new("Create the agent's worktree layout", |ctx: &mut Context| {
                let worktree = refactor_worktree(ctx);
                fs::write_string(&worktree.join("README.md"), "# Test Project\n")?;
                fs::write_string(
                    &worktree.join("main.go"),
                    "package main\n\n// Refactored by agent\nfunc main() {\n\t// Improved implementation\n}\n",
                )?;
                fs::write_string(
                    &worktree.join(".grove/state.yml"),
                    "active_plan: ../../plans/refactor-task\n",
                )?;
                fs::write_string(
                    &worktree.join("CLAUDE.md"),
                    "# Refactoring Context\n\nThis worktree contains refactored code.\n",
                )
            }),
            Step::new("Test direct navigation to worktree", |ctx: &mut Context| {
                let worktree = refactor_worktree(ctx);
                flow_in(ctx, Some(&worktree), &["plan", "status"])?.ok()?;
                let current = flow_in(ctx, Some(&worktree), &["plan", "current"])?;
                Expect::success().stdout("plans/refactor-task").check(&current)
            }),
            Step::new("Test unset and set within worktree", |ctx: &mut Context| {
                let worktree = refactor_worktree(ctx);
                let state_file = worktree.join(".grove/state.yml");

                flow_in(ctx, Some(&worktree), &["plan", "unset"])?.ok()?;
                let state = fs::read_string(&state_file)?;
                ctx.verify("state after unset", |v| {
                    v.is_true(
                        &format!("active plan cleared, got:\n{state}"),
                        active_plan_cleared(&state),
                    );
                })?;

                flow_in(ctx, Some(&worktree), &["plan", "set", "../plans/refactor-task"])?.ok()?;
                fs::assert_contains(&state_file, "plans/refactor-task")
            }),
        ],
    )
}

const GO_WORK: &str = "go 1.21

use (
\t./my-module
\t./other-module
)
";

const MY_MODULE_GO_MOD: &str = "module github.com/test/my-module

go 1.21

require (
\tgithub.com/test/other-module v0.1.0
)
";

pub fn go_workspace() -> Scenario {
    Scenario::new(
        "flow-go-workspace-worktree",
        "Tests that go.work files are automatically created in worktrees for Go projects",
        &["plan", "agent", "worktree", "go"],
        vec![
            Step::new("Setup Go project with workspace", |ctx: &mut Context| {
                let root = ctx.root_dir.clone();
                git::init(&root)?;
                git::setup_test_config(&root)?;
                fs::write_string(&root.join("go.work"), GO_WORK)?;

                let module = root.join("my-module");
                fs::write_string(&module.join("go.mod"), MY_MODULE_GO_MOD)?;
                fs::write_string(
                    &module.join("main.go"),
                    "package main\n\nimport \"fmt\"\n\nfunc main() {\n\tfmt.Println(\"Hello, World!\")\n}\n",
                )?;
                fixtures::write_grove_config(&module, "name: my-module\nflow:\n  plans_directory: ./plans\n")?;
                fs::write_string(
                    &root.join("other-module/go.mod"),
                    "module github.com/test/other-module\n\ngo 1.21\n",
                )?;

                git::add(&root, ".")?;
                git::commit(&root, "Initial commit with Go workspace")?;
                fixtures::setup_empty_global_config(ctx)?;
                ctx.set_path("module_dir", &module);
                Ok(())
            }),
            Step::new("Initialize plan and add an agent job with worktree", |ctx: &mut Context| {
                let module = ctx.get_path("module_dir")?;
                flow_in(ctx, Some(&module), &["plan", "init", "go-workspace-test"])?.ok()?;
                let plan = module.join("plans/go-workspace-test");
                let plan = plan.to_string_lossy().into_owned();
                flow_in(
                    ctx,
                    Some(&module),
                    &[
                        "plan", "add", plan.as_str(), "--title", "Test Go Build", "--type", "agent",
                        "--worktree", "test-go-build", "-p",
                        "Test that go build works in the worktree",
                    ],
                )?
                .ok()
            }),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            Step::new("Launch the agent job", |ctx: &mut Context| {
                let module = ctx.get_path("module_dir")?;
                let job = module.join("plans/go-workspace-test/01-test-go-build.md");
                fs::assert_exists(&job)?;
                let job = job.to_string_lossy().into_owned();
                let mut cmd = ctx.flow(["plan", "launch", "--host", job.as_str()])?;
                cmd.dir(&module).env("GROVE_FLOW_SKIP_DOCKER_CHECK=true");
                let result = cmd.run();
                ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
                result.ok()
            }),
            Step::new("Verify go.work was created in worktree", |ctx: &mut Context| {
                // The worktree belongs to the repo at the workspace root, not the module.
                let worktree = ctx.root_dir.join(".grove-worktrees/test-go-build");
                let listed = git::worktree_list(&ctx.root_dir)?;
                let content = fs::read_string(&worktree.join("go.work"))?;
                ctx.verify("worktree go.work", |v| {
                    v.is_true(
                        "git lists the test-go-build worktree",
                        listed.iter().any(|p| p.ends_with("test-go-build")),
                    )
                    .contains("go version directive", &content, "go 1.21")
                    .contains("use block", &content, "use (")
                    .contains("use entry", &content, "\t.")
                    .contains("my-module reference", &content, "my-module")
                    .contains("other-module reference", &content, "other-module");
                })
            }),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_active_plan_cleared() {
        assert!(active_plan_cleared("other: 1\n"));
        assert!(active_plan_cleared("active_plan: \"\"\n"));
        assert!(active_plan_cleared("active_plan: null\n"));
        assert!(!active_plan_cleared("active_plan: ../../plans/refactor-task\n"));
    }

    #[test]
    fn test_oneshot_job_frontmatter() {
        let job = oneshot_job("implement-feature-a", "Implement Feature A", "feature-a", "Body.");
        let fm = crate::harness::assert::frontmatter(&job).unwrap();
        assert_eq!(fm["worktree"].as_str(), Some("feature-a"));
        assert_eq!(fm["model"].as_str(), Some("mock"));
        assert_eq!(fm["type"].as_str(), Some("oneshot"));
        assert!(job.ends_with("Body.\n"));
    }
}
