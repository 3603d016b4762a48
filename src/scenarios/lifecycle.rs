//! Plan basics: shell job lifecycle, active job state, launch and graph output.

use std::path::Path;

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::{flow_env, flow_ok, run_flow, verify_file_contains, Expect};
use crate::harness::{fs, git, Context, Scenario, Step};
use crate::scenarios::{add_shell_job, setup_project};

/// Fails unless the job file `index`/`title` in `plan_name` carries `worktree: <plan_name>`.
fn assert_job_worktree(ctx: &Context, plan_name: &str, index: usize, title: &str) -> Result<()> {
    let job = plan::resolve_plan_path(ctx, plan_name).join(plan::job_file_name(index, title));
    fs::assert_contains(&job, &format!("worktree: {plan_name}"))
}

pub fn shell_lifecycle() -> Scenario {
    Scenario::new(
        "flow-plan-shell-lifecycle",
        "Tests shell job execution: init, add shell jobs with dependencies, run, and verify status.",
        &["plan", "shell", "smoke"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            Step::new("Initialize a new plan", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "my-plan"])?;
                fs::assert_exists(&plan::resolve_plan_path(ctx, "my-plan"))
            }),
            add_shell_job(
                "my-plan",
                "Create Hello File",
                "echo 'hello from shell job' > plans/my-plan/hello.txt",
                None,
            ),
            add_shell_job(
                "my-plan",
                "Copy File Using Shell",
                "cp plans/my-plan/hello.txt plans/my-plan/world.txt",
                Some("01-create-hello-file.md"),
            ),
            run_flow(
                "Run the first shell job",
                &["plan", "run", "plans/my-plan/01-create-hello-file.md"],
                Expect::success(),
            ),
            verify_file_contains("plans/my-plan/hello.txt", "hello from shell job"),
            run_flow(
                "Verify first shell job status",
                &["plan", "status", "my-plan"],
                Expect::success().stdout("Completed: 1").stdout("Pending: 1"),
            ),
            run_flow(
                "Run the second shell job",
                &["plan", "run", "plans/my-plan/02-copy-file-using-shell.md"],
                Expect::success(),
            ),
            verify_file_contains("plans/my-plan/world.txt", "hello from shell job"),
            run_flow(
                "Verify both shell jobs completed",
                &["plan", "status", "my-plan"],
                Expect::success().stdout("Completed: 2"),
            ),
        ],
    )
}

pub fn active_job() -> Scenario {
    Scenario::new(
        "flow-plan-active-job",
        "Tests the 'plan set', 'plan current', and 'plan unset' commands.",
        &["plan", "state"],
        vec![
            setup_project("Setup git repo", fixtures::PLANS_CONFIG),
            run_flow(
                "Initialize plan",
                &["plan", "init", "active-plan-test"],
                Expect::success(),
            ),
            run_flow(
                "Set the active job",
                &["plan", "set", "active-plan-test"],
                Expect::success().stdout("Set active job to: active-plan-test"),
            ),
            run_flow(
                "Show the current job",
                &["plan", "current"],
                Expect::success().stdout("Active job: active-plan-test"),
            ),
            run_flow("Unset the active job", &["plan", "unset"], Expect::success()),
            run_flow(
                "Verify active job is cleared",
                &["plan", "current"],
                Expect::success().stdout("No active job set"),
            ),
        ],
    )
}

pub fn agent_launch() -> Scenario {
    Scenario::new(
        "flow-plan-agent-launch",
        "Tests launching an agent job, which should create a git worktree.",
        &["plan", "agent", "worktree"],
        vec![
            Step::new("Setup git repo and project config", |ctx: &mut Context| {
                git::setup_test_repo(&ctx.root_dir)?;
                fixtures::create_test_grove_config(ctx)
            }),
            run_flow("Initialize plan", &["plan", "init", "agent-plan"], Expect::success()),
            Step::new("Add an agent job", |ctx: &mut Context| {
                let plan_dir = plan::plan_absolute_path(ctx, Path::new("plans/agent-plan"))?;
                let plan_dir = plan_dir.to_string_lossy();
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", &plan_dir, "--title", "Refactor Code", "--type", "agent",
                        "-p", "Refactor everything.",
                    ],
                )
                .map(|_| ())
            }),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            Step::new("Launch the agent job", |ctx: &mut Context| {
                let plan_dir = plan::plan_absolute_path(ctx, Path::new("plans/agent-plan"))?;
                let job = plan::find_job_by_prefix(&plan_dir, "01-")?;
                let job = job.to_string_lossy();
                flow_env(
                    ctx,
                    &["GROVE_FLOW_SKIP_DOCKER_CHECK=true"],
                    &["plan", "launch", &job],
                )?
                .assert_success()
            }),
            Step::new("Verify worktree creation", |ctx: &mut Context| {
                let worktrees = git::worktree_list(&ctx.root_dir)?;
                let found = worktrees.iter().any(|w| {
                    let w = w.to_string_lossy();
                    w.contains("refactor-code") || w.contains("agent-plan")
                });
                if found {
                    Ok(())
                } else {
                    Err(HarnessError::assertion(format!(
                        "worktree not found in git worktree list: {worktrees:?}"
                    )))
                }
            }),
        ],
    )
}

pub fn graph() -> Scenario {
    Scenario::new(
        "flow-plan-graph",
        "Tests the 'plan graph' command output for shell jobs with dependencies.",
        &["plan", "graph", "shell"],
        vec![
            setup_project("Setup git repo", fixtures::PLANS_CONFIG),
            Step::new("Setup a plan with dependencies", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "graph-plan"])?;
                let jobs: [&[&str]; 3] = [
                    &["--title", "A", "--type", "shell", "-p", "echo A"],
                    &["--title", "B", "--type", "shell", "-p", "echo B", "--depends-on", "01-a.md"],
                    &["--title", "C", "--type", "shell", "-p", "echo C", "--depends-on", "01-a.md"],
                ];
                for job in jobs {
                    let mut args = vec!["plan", "add", "graph-plan"];
                    args.extend_from_slice(job);
                    flow_ok(ctx, &args)?;
                }
                Ok(())
            }),
            run_flow(
                "Generate Mermaid graph",
                &["plan", "graph", "graph-plan", "--format", "mermaid"],
                Expect::success().stdout("graph TD").stdout("-->"),
            ),
        ],
    )
}

pub fn worktree_inheritance() -> Scenario {
    Scenario::new(
        "flow-plan-worktree-inheritance",
        "Tests that flow plan add --depends-on correctly inherits the worktree from dependencies",
        &["plan", "worktree"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            run_flow(
                "Initialize plan",
                &["plan", "init", "inheritance-plan"],
                Expect::success(),
            ),
            Step::new("Add first agent job", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "inheritance-plan", "--title", "Implement API", "--type",
                        "agent", "-p", "Implement the API",
                    ],
                )?;
                assert_job_worktree(ctx, "inheritance-plan", 1, "Implement API")
            }),
            Step::new(
                "Add dependent job without specifying worktree",
                |ctx: &mut Context| {
                    flow_ok(
                        ctx,
                        &[
                            "plan", "add", "inheritance-plan", "--title", "Review API", "--type",
                            "oneshot", "--depends-on", "01-implement-api.md", "-p",
                            "Review the API code",
                        ],
                    )?;
                    assert_job_worktree(ctx, "inheritance-plan", 2, "Review API")
                },
            ),
        ],
    )
}
