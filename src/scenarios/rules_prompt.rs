//! The prompt `flow plan run` shows when a oneshot job has no `.grove/rules`.

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::harness::{fs, git, CommandResult, Context, Scenario, Step};

const GROVE_YML: &str = "version: \"1.0\"
flow:
  oneshot_model: mock
  plans_directory: \"./plans\"
";

const ONESHOT_JOB: &str = "---
id: test-job
title: Test Job
status: pending
type: oneshot
worktree: test-worktree
---

This is a test job.
";

const TAGS: &[&str] = &["rules", "prompt", "interactive"];

fn setup_without_rules() -> Step {
    Step::new("Setup project without rules", |ctx: &mut Context| {
        fixtures::setup_empty_global_config(ctx)?;
        git::setup_test_repo(&ctx.root_dir)?;
        fs::write_string(
            &ctx.root_dir.join("main.go"),
            "package main\n\nfunc main() {}\n",
        )?;
        git::add(&ctx.root_dir, ".")?;
        git::commit(&ctx.root_dir, "Add main.go")?;
        fixtures::write_grove_config(&ctx.root_dir, GROVE_YML)?;
        fs::write_string(
            &plan::resolve_plan_path(ctx, "test-plan").join("01-test-job.md"),
            ONESHOT_JOB,
        )
    })
}

/// `flow plan run` answering the rules prompt with `answer`. TERM is cleared
/// so `flow` never tries to switch tmux sessions.
fn run_plan(ctx: &Context, args: &[&str], answer: &str) -> Result<CommandResult> {
    let mut cmd = ctx.flow(args.iter().copied())?;
    cmd.stdin(answer).env("TERM=");
    let result = cmd.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    Ok(result)
}

pub fn proceed() -> Scenario {
    Scenario::new(
        "rules-prompt-proceed",
        "Verify that user can proceed without .grove/rules file",
        TAGS,
        vec![
            setup_without_rules(),
            fixtures::setup_test_environment(TestEnvOptions::with_response(
                "Test job completed successfully without context.",
            )),
            Step::new("Run job and choose proceed", |ctx: &mut Context| {
                let result = run_plan(ctx, &["plan", "run", "-y", "test-plan"], "p\n")?;
                result.assert_success()?;
                result.assert_output_contains(&[
                    "Skipping interactive prompt and proceeding without context for oneshot job",
                    "completed",
                ])
            }),
        ],
    )
}

pub fn cancel() -> Scenario {
    Scenario::new(
        "rules-prompt-cancel",
        "Verify that user can cancel job when .grove/rules file missing",
        TAGS,
        vec![
            setup_without_rules(),
            fixtures::setup_test_environment(TestEnvOptions::with_response(
                "This response should not be used.",
            )),
            Step::new("Run job and choose cancel", |ctx: &mut Context| {
                // Exit status varies between versions; the output is what counts.
                let result = run_plan(ctx, &["plan", "run", "test-plan"], "n\n")?;
                let output = result.combined_output();
                if !output.contains("Aborted.") && !output.contains("job canceled by user") {
                    return Err(HarnessError::assertion(format!(
                        "expected 'Aborted.' or 'job canceled by user', got:\n{output}"
                    )));
                }
                if output.contains("All jobs completed!") {
                    return Err(HarnessError::assertion(
                        "expected job to be canceled, but it completed successfully",
                    ));
                }
                Ok(())
            }),
        ],
    )
}

pub fn edit() -> Scenario {
    Scenario::new(
        "rules-prompt-edit",
        "Verify that user can edit rules file when prompted",
        TAGS,
        vec![
            setup_without_rules(),
            fixtures::setup_test_environment(TestEnvOptions::with_response(
                "Test job completed with context from rules.",
            )),
            Step::new("Run job and choose edit", |ctx: &mut Context| {
                let result = run_plan(ctx, &["plan", "run", "test-plan"], "e\n")?;
                result.assert_success()?;
                let output = result.combined_output();

                // 'e' answers the run confirmation first on some versions, which aborts.
                if output.contains("Aborted.") {
                    return Ok(());
                }
                if !output.contains("Opening rules editor") {
                    return Err(HarnessError::assertion(format!(
                        "expected 'Opening rules editor' or 'Aborted.', got:\n{output}"
                    )));
                }
                let rules = ctx
                    .root_dir
                    .join(".grove-worktrees")
                    .join("test-worktree")
                    .join(".grove")
                    .join("rules");
                fs::assert_exists(&rules)?;
                result.assert_output_contains(&["completed"])
            }),
        ],
    )
}
