use tracing::info;

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::{flow, flow_in, flow_ok, run_flow, Expect};
use crate::harness::{assert, fs, Context, Scenario, Step};
use crate::scenarios::{add_shell_job, setup_project};

const PLANS_WITH_LLM: &str = "name: test-project
flow:
  plans_directory: ./plans
llm:
  provider: openai
  model: test
";

pub fn simple_orchestration() -> Scenario {
    Scenario::new(
        "flow-simple-orchestration",
        "Test basic job orchestration with dependencies using flow plan add",
        &["plan", "orchestration"],
        vec![
            setup_project("Setup project with git repo", PLANS_WITH_LLM),
            fixtures::setup_test_environment(TestEnvOptions::with_response(
                "Task completed successfully.",
            )),
            Step::new("Initialize new plan", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "simple-plan"])?;
                fs::assert_exists(&plan::resolve_plan_path(ctx, "simple-plan"))
            }),
            add_shell_job(
                "simple-plan",
                "Setup Environment",
                "echo 'Setting up environment'",
                None,
            ),
            add_shell_job(
                "simple-plan",
                "Install Dependencies",
                "echo 'Installing dependencies'",
                Some("01-setup-environment.md"),
            ),
            add_shell_job(
                "simple-plan",
                "Run Tests",
                "echo 'Running tests'",
                Some("02-install-dependencies.md"),
            ),
            run_flow(
                "Check plan status",
                &["plan", "status", "simple-plan"],
                Expect::success()
                    .stdout("01-setup-environment.md")
                    .stdout("02-install-dependencies.md")
                    .stdout("03-run-tests.md"),
            ),
            Step::new("Try to run job with unmet dependencies", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "set", "simple-plan"])?;
                let result = flow(ctx, &["plan", "run", "plans/simple-plan/03-run-tests.md"])?;
                result.assert_failure()?;
                assert::contains(&result.stderr, "depend", "expected dependency error")
            }),
            Step::new("Run jobs in correct order", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "set", "simple-plan"])?;
                for job in [
                    "01-setup-environment.md",
                    "02-install-dependencies.md",
                    "03-run-tests.md",
                ] {
                    let path = format!("plans/simple-plan/{job}");
                    flow_ok(ctx, &["plan", "run", path.as_str()])?;
                }
                Ok(())
            }),
            run_flow(
                "Verify all jobs completed",
                &["plan", "status", "simple-plan"],
                Expect::success().stdout("Completed: 3"),
            ),
        ],
    )
}

pub fn hold_workflow() -> Scenario {
    Scenario::new(
        "flow-plan-hold-workflow",
        "Tests setting plans to 'hold' status, filtering them from lists, and resuming them.",
        &["plan", "hold", "status"],
        vec![
            setup_project("Setup project with a plan", fixtures::PLANS_CONFIG),
            Step::new("Create plan with a shell job", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "hold-test-plan"])?;
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "add",
                        "hold-test-plan",
                        "--title",
                        "Test Shell Job",
                        "--type",
                        "shell",
                        "-p",
                        "echo 'This should not run while on hold'",
                    ],
                )
                .map(|_| ())
            }),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            Step::new("Set plan status to 'hold'", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "hold", "hold-test-plan"])?;
                fs::assert_contains(&plan::plan_config_path(ctx, "hold-test-plan"), "status: hold")
            }),
            Step::new("Verify 'plan list' hides the on-hold plan", |ctx: &mut Context| {
                let result = flow_ok(ctx, &["plan", "list"])?;
                assert::not_contains(
                    &result.stdout,
                    "hold-test-plan",
                    "on-hold plan should be hidden from default list view",
                )
            }),
            run_flow(
                "Verify 'plan list --show-hold' shows the plan",
                &["plan", "list", "--show-hold"],
                Expect::success().stdout("hold-test-plan"),
            ),
            run_flow(
                "Verify 'plan run' is blocked for on-hold plan",
                &["plan", "run", "hold-test-plan"],
                Expect::failure().stderr("plan is on hold"),
            ),
            Step::new("Remove plan hold status with unhold", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "unhold", "hold-test-plan"])?;
                fs::assert_not_contains(
                    &plan::plan_config_path(ctx, "hold-test-plan"),
                    "status: hold",
                )
            }),
            run_flow(
                "Verify 'plan list' shows the plan again",
                &["plan", "list"],
                Expect::success().stdout("hold-test-plan"),
            ),
            run_flow(
                "Verify 'plan run' now succeeds",
                &["plan", "run", "hold-test-plan", "--yes"],
                Expect::success().stdout("All jobs completed"),
            ),
        ],
    )
}

fn config_get(ctx: &Context, plan_name: &str, key: &str) -> Result<String> {
    let result = flow_ok(ctx, &["plan", "config", plan_name, "--get", key])?;
    Ok(result.stdout.trim().to_string())
}

pub fn plan_config() -> Scenario {
    Scenario::new(
        "flow-plan-config",
        "Tests plan-level configuration with .grove-plan.yml",
        &["plan", "config"],
        vec![
            setup_project(
                "Setup git repository and config",
                "flow:\n  oneshot_model: claude-3-5-sonnet-20241022\n  plans_directory: plans\n",
            ),
            Step::new("Test plan init with config flags", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "init",
                        "test-config",
                        "--model",
                        "gemini-2.0-flash",
                        "--worktree=feature/test",
                        "--target-agent-container",
                        "grove-agent-fast",
                    ],
                )?;
                let content = fs::read_string(&plan::plan_config_path(ctx, "test-config"))?;
                ctx.verify("plan init config flags", |v| {
                    v.contains("model should be set", &content, "model: gemini-2.0-flash")
                        .contains("worktree should be set", &content, "worktree: feature/test")
                        .contains(
                            "container should be set",
                            &content,
                            "target_agent_container: grove-agent-fast",
                        );
                })
            }),
            run_flow(
                "Show all config",
                &["plan", "config", "test-config"],
                Expect::success().stdout("model: gemini-2.0-flash"),
            ),
            Step::new("Test config get", |ctx: &mut Context| {
                let model = config_get(ctx, "test-config", "model")?;
                assert::equal("gemini-2.0-flash", model.as_str(), "plan config --get model")
            }),
            Step::new("Test config set", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "config",
                        "test-config",
                        "--set",
                        "model=claude-3-5-sonnet-20241022",
                        "--set",
                        "worktree=main",
                    ],
                )?;
                let model = config_get(ctx, "test-config", "model")?;
                assert::equal(
                    "claude-3-5-sonnet-20241022",
                    model.as_str(),
                    "model was not updated correctly",
                )
            }),
            Step::new("Test config JSON output", |ctx: &mut Context| {
                let result = flow_ok(ctx, &["plan", "config", "test-config", "--json"])?;
                let json: serde_json::Value = serde_json::from_str(&result.stdout)?;
                ctx.verify("plan config --json", |v| {
                    v.equal(
                        "JSON output should contain model",
                        Some("claude-3-5-sonnet-20241022"),
                        json["model"].as_str(),
                    )
                    .equal(
                        "JSON output should contain worktree",
                        Some("main"),
                        json["worktree"].as_str(),
                    );
                })
            }),
            fixtures::setup_test_environment(TestEnvOptions::with_response("Test job completed")),
            Step::new("Test plan add inherits config", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan",
                        "add",
                        "test-config",
                        "--title",
                        "Test Job",
                        "--type",
                        "oneshot",
                        "--prompt",
                        "Do something",
                    ],
                )?;
                let job = plan::resolve_plan_path(ctx, "test-config").join("01-test-job.md");
                let content = fs::read_string(&job)?;
                ctx.verify("job inherits plan config", |v| {
                    v.contains("job should inherit worktree", &content, "worktree: main")
                        .contains("job should be oneshot type", &content, "type: oneshot");
                })
            }),
            Step::new("Test clearing config values", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "config", "test-config", "--set", "worktree="])?;
                fs::assert_contains(
                    &plan::plan_config_path(ctx, "test-config"),
                    "# worktree: feature-branch",
                )
            }),
            Step::new("Test plan init with defaults", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "init", "test-defaults"])?;
                let content = fs::read_string(&plan::plan_config_path(ctx, "test-defaults"))?;
                ctx.verify("default config is commented out", |v| {
                    for expected in [
                        "# model: gemini-2.5-pro",
                        "# worktree: feature-branch",
                        "# target_agent_container: grove-agent-ide",
                    ] {
                        v.contains("default config should be commented out", &content, expected);
                    }
                })
            }),
        ],
    )
}

const JOB_WITH_MODEL: &str = r#"---
id: job-with-model
title: "Job With Model"
status: pending
type: oneshot
model: gemini-2.0-flash
output:
  type: file
---

Do something else"#;

const PROPAGATED_MODEL: &str = "model: claude-3-5-sonnet-20241022";

/// Contents of the three jobs of `test-propagation`, in order.
fn propagation_jobs(ctx: &Context) -> Result<[String; 3]> {
    let dir = plan::resolve_plan_path(ctx, "test-propagation");
    Ok([
        fs::read_string(&dir.join("01-job-without-model.md"))?,
        fs::read_string(&dir.join("02-job-with-model.md"))?,
        fs::read_string(&dir.join("03-another-job-without-model.md"))?,
    ])
}

pub fn config_propagation() -> Scenario {
    Scenario::new(
        "flow-plan-config-propagation",
        "Tests that plan config updates propagate to job files without the field",
        &["plan", "config", "propagation"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            run_flow(
                "Initialize plan",
                &["plan", "init", "test-propagation"],
                Expect::success(),
            ),
            Step::new("Add jobs with and without model", |ctx: &mut Context| {
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "test-propagation", "--title", "Job Without Model",
                        "--type", "oneshot", "-p", "Do something",
                    ],
                )?;
                let dir = plan::resolve_plan_path(ctx, "test-propagation");
                fs::write_string(&dir.join("02-job-with-model.md"), JOB_WITH_MODEL)?;
                flow_ok(
                    ctx,
                    &[
                        "plan", "add", "test-propagation", "--title", "Another Job Without Model",
                        "--type", "shell", "-p", "echo hello",
                    ],
                )
                .map(|_| ())
            }),
            Step::new("Verify initial state", |ctx: &mut Context| {
                let [first, second, third] = propagation_jobs(ctx)?;
                ctx.verify("initial models", |v| {
                    v.not_contains("job1 should not have model field initially", &first, "model:")
                        .contains("job2 should have its own model", &second, "model: gemini-2.0-flash")
                        .not_contains("job3 should not have model field initially", &third, "model:");
                })
            }),
            Step::new("Set model in plan config", |ctx: &mut Context| {
                let result = flow_ok(
                    ctx,
                    &["plan", "config", "test-propagation", "--set", "model=claude-3-5-sonnet-20241022"],
                )?;
                result.assert_stdout_contains(&["Propagated config changes to 2 job(s)"])
            }),
            Step::new("Verify propagation", |ctx: &mut Context| {
                let [first, second, third] = propagation_jobs(ctx)?;
                ctx.verify("model propagation", |v| {
                    v.contains("job1 should get the plan model", &first, PROPAGATED_MODEL)
                        .contains("job2 keeps its model", &second, "model: gemini-2.0-flash")
                        .not_contains("job2 should not be updated", &second, "claude-3-5-sonnet-20241022")
                        .contains("job3 should get the plan model", &third, PROPAGATED_MODEL);
                })
            }),
            Step::new("Test worktree propagation", |ctx: &mut Context| {
                let result = flow_ok(
                    ctx,
                    &["plan", "config", "test-propagation", "--set", "worktree=feature-branch"],
                )?;
                let [first, second, third] = propagation_jobs(ctx)?;
                ctx.verify("worktree propagation skips shell jobs", |v| {
                    v.contains(
                        "two oneshot jobs updated",
                        &result.stdout,
                        "Propagated config changes to 2 job(s)",
                    )
                    .contains("oneshot job1 gets worktree", &first, "worktree: feature-branch")
                    .contains("oneshot job2 gets worktree", &second, "worktree: feature-branch")
                    .not_contains("shell job has no worktree", &third, "worktree:");
                })
            }),
            Step::new("Test clearing values doesn't propagate", |ctx: &mut Context| {
                let result = flow_ok(ctx, &["plan", "config", "test-propagation", "--set", "model="])?;
                let [first, _, _] = propagation_jobs(ctx)?;
                ctx.verify("cleared value stays local", |v| {
                    v.not_contains(
                        "clearing values should not propagate to jobs",
                        &result.stdout,
                        "Propagated config changes",
                    )
                    .contains("job1 keeps its model", &first, PROPAGATED_MODEL);
                })
            }),
        ],
    )
}

const RECIPE_FILES: &[&str] = &[
    "01-spec.md",
    "02-implement.md",
    "03-git-changes.md",
    "04-git-status.md",
    "05-review.md",
];

pub fn recipes() -> Scenario {
    Scenario::new(
        "flow-plan-recipes",
        "Tests the creation of plans from recipes and listing available recipes.",
        &["plan", "recipes", "init"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            run_flow(
                "List available recipes",
                &["plan", "recipes", "list"],
                Expect::success()
                    .stdout("standard-feature")
                    .stdout("A standard workflow: spec -> implement -> review."),
            ),
            Step::new("List recipes as JSON", |ctx: &mut Context| {
                let result = flow_ok(ctx, &["plan", "recipes", "list", "--json"])?;
                let recipes: Vec<serde_json::Value> = serde_json::from_str(&result.stdout)?;
                if recipes.is_empty() {
                    return Err(HarnessError::assertion(
                        "expected at least one recipe in JSON output",
                    ));
                }
                if !recipes.iter().any(|r| r["name"] == "standard-feature") {
                    return Err(HarnessError::assertion(
                        "expected 'standard-feature' recipe to be in the list",
                    ));
                }
                Ok(())
            }),
            run_flow(
                "Initialize plan from recipe",
                &["plan", "init", "my-feature-plan", "--recipe", "standard-feature"],
                Expect::success().stdout("Using recipe: standard-feature"),
            ),
            Step::new("Verify generated files and their content", |ctx: &mut Context| {
                let plan_dir = plan::resolve_plan_path(ctx, "my-feature-plan");
                for file in RECIPE_FILES {
                    let content = fs::read_string(&plan_dir.join(file))?;
                    assert::contains(
                        &content,
                        "my-feature-plan",
                        &format!("{file} should have its plan name templated"),
                    )?;
                }

                let implement = fs::read_string(&plan_dir.join("02-implement.md"))?;
                let changes = fs::read_string(&plan_dir.join("03-git-changes.md"))?;
                let status = fs::read_string(&plan_dir.join("04-git-status.md"))?;
                let review = fs::read_string(&plan_dir.join("05-review.md"))?;
                ctx.verify("recipe job contents", |v| {
                    v.contains("implement worktree", &implement, "worktree: my-feature-plan")
                        .contains("git-changes type", &changes, "type: shell")
                        .contains(
                            "git-changes command",
                            &changes,
                            "git diff --name-status main...HEAD",
                        )
                        .contains("git-status type", &status, "type: shell")
                        .contains("git-status command", &status, "git status --porcelain")
                        .contains("review depends on git-changes", &review, "03-git-changes.md")
                        .contains("review depends on git-status", &review, "04-git-status.md");
                })
            }),
            Step::new("Verify .grove-plan.yml was created correctly", |ctx: &mut Context| {
                fs::assert_contains(
                    &plan::plan_config_path(ctx, "my-feature-plan"),
                    "worktree: my-feature-plan",
                )
            }),
            run_flow(
                "Verify status of the new plan",
                &["plan", "status", "my-feature-plan"],
                Expect::success().stdout("Jobs: 5 total").stdout("Pending: 5"),
            ),
        ],
    )
}

pub fn init_improvements() -> Scenario {
    Scenario::new(
        "flow-plan-init-improvements",
        "Tests plan init improvements: empty plan listing and --with-worktree flag",
        &["plan", "init"],
        vec![
            setup_project(
                "Setup git repository and config",
                "name: test-project\nflow:\n  plans_directory: ./plans\n  oneshot_model: gemini-2.5-pro\n",
            ),
            Step::new(
                "Test plan init with --with-worktree flag and auto-activation",
                |ctx: &mut Context| {
                    let result =
                        flow_ok(ctx, &["plan", "init", "test-worktree-plan", "--with-worktree"])?;
                    result.assert_stdout_contains(&["Set active plan to: test-worktree-plan"])?;

                    let content =
                        fs::read_string(&plan::plan_config_path(ctx, "test-worktree-plan"))?;
                    ctx.verify("--with-worktree plan config", |v| {
                        v.contains("worktree matches plan name", &content, "worktree: test-worktree-plan")
                            .contains("model is commented out", &content, "# model: gemini-2.5-pro");
                    })?;

                    let current = flow_ok(ctx, &["plan", "current"])?;
                    current.assert_stdout_contains(&["test-worktree-plan"])
                },
            ),
            Step::new("Test empty plan appears in list", |ctx: &mut Context| {
                let init = flow_ok(ctx, &["plan", "init", "empty-plan"])?;
                init.assert_stdout_contains(&["Set active plan to: empty-plan"])?;

                let list = flow_ok(ctx, &["plan", "list"])?;
                let listed_empty = |name: &str| {
                    list.stdout
                        .lines()
                        .any(|line| line.contains(name) && line.contains('0'))
                };
                ctx.verify("empty plans are listed", |v| {
                    v.contains("worktree plan listed", &list.stdout, "test-worktree-plan")
                        .contains("empty plan listed", &list.stdout, "empty-plan")
                        .is_true("empty-plan shows 0 jobs", listed_empty("empty-plan"))
                        .is_true(
                            "test-worktree-plan shows 0 jobs",
                            listed_empty("test-worktree-plan"),
                        );
                })
            }),
        ],
    )
}

const FEATURE_NOTE: &str = "---
title: Test Feature Request
tags: [feature, todo]
---

# Feature Request: Add User Dashboard

Please implement a user dashboard with the following features:
- User profile display
- Recent activity feed
- Settings panel

This should be implemented using React components.
";

/// First job file of a plan, ignoring dotfiles.
fn first_job(plan_dir: &std::path::Path) -> Result<std::path::PathBuf> {
    fs::list_files(plan_dir)?
        .into_iter()
        .find(|f| f.ends_with(".md") && !f.starts_with('.'))
        .map(|f| plan_dir.join(f))
        .ok_or_else(|| {
            HarnessError::assertion(format!("no job files found in {}", plan_dir.display()))
        })
}

pub fn from_note() -> Scenario {
    Scenario::new(
        "flow-plan-from-note",
        "Tests the --from-note flag for plan init command.",
        &["plan", "init", "from-note"],
        vec![
            Step::new("Setup sandboxed environment with project", |ctx: &mut Context| {
                let (_, notebooks) = fixtures::setup_default_environment(ctx, "from-note-project")?;
                let note = notebooks.join("test-notes").join("feature-request.md");
                fs::write_string(&note, FEATURE_NOTE)?;
                ctx.set_path("note_path", &note);
                Ok(())
            }),
            Step::new("Test plan init with --from-note flag", |ctx: &mut Context| {
                let project = ctx.get_path("project_dir")?;
                let notebooks = ctx.get_path("notebooks_root")?;
                let note = ctx.get_string("note_path");
                flow_in(
                    ctx,
                    Some(project.as_path()),
                    &["plan", "init", "dashboard-plan", "--from-note", note.as_str()],
                )?
                .assert_success()?;

                let plan_dir =
                    fixtures::notebook_plan_path(&notebooks, "from-note-project", "dashboard-plan");
                fs::assert_exists(&plan_dir)?;
                ctx.set_path("plan_path", &plan_dir);
                Ok(())
            }),
            Step::new("Verify first job carries the note", |ctx: &mut Context| {
                let plan_dir = ctx.get_path("plan_path")?;
                let note = ctx.get_string("note_path");
                let config = fs::read_string(&plan_dir.join(plan::PLAN_CONFIG_FILE))?;
                let content = fs::read_string(&first_job(&plan_dir)?)?;
                let note_ref = assert::frontmatter_field(&content, "note_ref")?;
                ctx.verify("job created from note", |v| {
                    v.is_true("plan config is not empty", !config.trim().is_empty())
                        .contains("note heading", &content, "Feature Request: Add User Dashboard")
                        .contains("note details", &content, "User profile display")
                        .equal("note_ref frontmatter", Some(note.as_str()), note_ref.as_deref());
                })
            }),
            Step::new("Test --from-note with recipe and worktree", |ctx: &mut Context| {
                let project = ctx.get_path("project_dir")?;
                let notebooks = ctx.get_path("notebooks_root")?;
                let note = ctx.get_string("note_path");
                flow_in(
                    ctx,
                    Some(project.as_path()),
                    &[
                        "plan",
                        "init",
                        "recipe-with-note",
                        "--from-note",
                        note.as_str(),
                        "--recipe",
                        "chat",
                        "--worktree",
                    ],
                )?
                .assert_success()?;

                let plan_dir = fixtures::notebook_plan_path(
                    &notebooks,
                    "from-note-project",
                    "recipe-with-note",
                );
                fs::assert_exists(&plan_dir)?;
                fs::assert_exists(&project.join(".grove-worktrees").join("recipe-with-note"))?;
                let content = fs::read_string(&first_job(&plan_dir)?)?;
                assert::contains(
                    &content,
                    "Feature Request: Add User Dashboard",
                    "recipe job should contain the note content",
                )
            }),
        ],
    )
}

const GEMAPI_MOCK: &str = r#"#!/bin/bash
log_dir="${PROMPT_LOG_DIR:?}"
mkdir -p "$log_dir"
count=$(ls "$log_dir"/prompt-*.log 2>/dev/null | wc -l)
log_file="$log_dir/prompt-$(printf "%02d" $((count + 1))).log"

echo "=== GEMAPI REQUEST ===" > "$log_file"
echo "Command: $0 $@" >> "$log_file"
for arg in "$@"; do
  if [[ -f "$arg" ]] && [[ "$arg" != *.log ]]; then
    echo "=== File: $arg ===" >> "$log_file"
    cat "$arg" >> "$log_file"
  fi
done
if [ ! -t 0 ]; then
  echo "=== STDIN ===" >> "$log_file"
  cat >> "$log_file"
fi

echo "Task completed successfully."
"#;

const PREPEND_JOBS: &[(&str, &str)] = &[
    (
        "01-spec.md",
        "---
id: spec
title: Create Specification
type: oneshot
status: pending
model: gemini-2.0-flash-exp
---

# Specification

## Requirements
- Feature A: Must support user authentication
- Feature B: Must support data export
- Feature C: Must support notifications
",
    ),
    (
        "02-implement-control.md",
        "---
id: implement-control
title: Implement Features (Control)
type: oneshot
status: pending
model: gemini-2.0-flash-exp
depends_on:
  - 01-spec.md
---

Implement the features based on the specification.
",
    ),
    (
        "03-implement-test.md",
        "---
id: implement-test
title: Implement Features (With Prepend)
type: oneshot
status: pending
model: gemini-2.0-flash-exp
prepend_dependencies: true
depends_on:
  - 01-spec.md
---

Implement the features based on the specification.
",
    ),
];

pub fn prepend_dependencies() -> Scenario {
    Scenario::new(
        "flow-prepend-dependencies",
        "Test that prepend_dependencies inlines dependency content into the prompt",
        &["plan", "orchestration", "prepend_dependencies"],
        vec![
            setup_project(
                "Setup project with git repo",
                "name: test-project
flow:
  plans_directory: ./plans
orchestration:
  oneshot_model: gemini-2.0-flash-exp
llm:
  provider: gemini
  model: gemini-2.0-flash-exp
",
            ),
            fixtures::setup_test_environment(TestEnvOptions::default().mock("gemapi", GEMAPI_MOCK)),
            Step::new("Create plan with jobs", |ctx: &mut Context| {
                let log_dir = ctx.root_dir.join("prompt-logs");
                fs::create_dir(&log_dir)?;
                ctx.export_env("PROMPT_LOG_DIR", log_dir.to_string_lossy());

                let plan_dir = plan::resolve_plan_path(ctx, "prepend-test");
                for (file, content) in PREPEND_JOBS {
                    fs::write_string(&plan_dir.join(file), content)?;
                }
                Ok(())
            }),
            Step::new("Run every job in order", |ctx: &mut Context| {
                flow_ok(ctx, &["plan", "set", "prepend-test"])?;
                for (file, _) in PREPEND_JOBS {
                    let path = format!("plans/prepend-test/{file}");
                    flow_ok(ctx, &["plan", "run", path.as_str(), "-y"])?;
                }
                let logged = fs::list_files(&ctx.root_dir.join("prompt-logs"))?.len();
                info!("gemapi mock logged {logged} request(s)");
                Ok(())
            }),
            run_flow(
                "Verify all jobs completed",
                &["plan", "status", "prepend-test"],
                Expect::success().stdout("Completed: 3"),
            ),
        ],
    )
    .explicit_only()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scenarios::test_support::{ctx_with_flow, step};

    #[test]
    fn test_failed_plan_set_fails_the_step() {
        let (_dir, mut ctx) = ctx_with_flow(
            "#!/bin/sh\nif [ \"$2\" = set ]; then echo 'no such plan' >&2; exit 1; fi\necho 'unmet dependencies' >&2\nexit 1\n",
        );
        let scenario = simple_orchestration();
        let err = step(&scenario, "Try to run job with unmet dependencies")
            .run(&mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("no such plan"), "{err}");
    }
}
