//! Job summaries written into frontmatter by `flow plan complete`.

use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::flow_ok;
use crate::harness::{assert, fs, git, Context, Scenario, Step};

const SUMMARY_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
  summarize_on_complete: true
  summary_model: mock-summarizer
";

const SUMMARY_LLM: &str = "#!/bin/bash
echo \"This is a concise mock summary.\"
";

const ONESHOT_JOB: &str = "---
id: job-to-summarize
title: Job To Summarize
status: pending
type: oneshot
---

# Main Task

This is the main task for the job. It involves several steps and has a clear outcome.

## Output

The job produced this output, which should be included in the summary.
";

const AGENT_JOB: &str = "---
id: agent-session
title: Agent Session
status: running
type: interactive_agent
---

Implement the parser and report what changed.
";

/// Git repo with summarization enabled and `job` written into a fresh plan.
fn setup_summary_plan(plan_name: &'static str, job_file: &'static str, job: &'static str) -> Step {
    Step::new(
        "Setup project with summarization enabled",
        move |ctx: &mut Context| {
            git::init(&ctx.root_dir)?;
            git::setup_test_config(&ctx.root_dir)?;
            fixtures::setup_empty_global_config(ctx)?;
            fixtures::write_grove_config(&ctx.root_dir, SUMMARY_CONFIG)?;
            flow_ok(ctx, &["plan", "init", plan_name])?;
            let plan_dir = plan::resolve_plan_path(ctx, plan_name);
            fs::write_string(&plan_dir.join(job_file), job)
        },
    )
}

/// `flow plan complete` on the job. With `running`, a lock file naming a live
/// pid is planted first and must be gone afterwards.
fn complete_and_verify(
    plan_name: &'static str,
    job_file: &'static str,
    running: bool,
    extra_output: &'static [&'static str],
) -> Step {
    Step::new("Run 'flow plan complete' on the job", move |ctx: &mut Context| {
        let job_path = plan::resolve_plan_path(ctx, plan_name).join(job_file);
        let lock = if running {
            let guard = plan::create_mock_lock_file(&job_path)?;
            assert::equal(true, plan::lock_file_pid_alive(&job_path)?, "lock file pid alive")?;
            Some(guard)
        } else {
            None
        };

        let relative = format!("plans/{plan_name}/{job_file}");
        let result = flow_ok(ctx, &["plan", "complete", relative.as_str()])?;
        result.assert_stdout_contains(&["Added summary to job frontmatter"])?;
        result.assert_stdout_contains(extra_output)?;
        if let Some(lock) = &lock {
            fs::assert_not_exists(lock.path())?;
        }

        let content = fs::read_string(&job_path)?;
        ctx.verify("job file after completion", |v| {
            v.contains("status updated", &content, "status: completed")
                .contains(
                    "summary in frontmatter",
                    &content,
                    "summary: This is a concise mock summary.",
                );
        })
    })
}

pub fn job_summary() -> Scenario {
    Scenario::new(
        "flow-job-summary-on-complete",
        "Tests that job content is summarized when a job is marked as complete",
        &["plan", "complete", "summary"],
        vec![
            setup_summary_plan("summary-test", "01-job-to-summarize.md", ONESHOT_JOB),
            fixtures::setup_test_environment(TestEnvOptions::default().mock("llm", SUMMARY_LLM)),
            complete_and_verify("summary-test", "01-job-to-summarize.md", false, &[]),
        ],
    )
}

pub fn interactive_agent_summary() -> Scenario {
    Scenario::new(
        "flow-interactive-agent-job-summary",
        "Tests that completing an interactive agent job appends its transcript and adds a summary",
        &["plan", "complete", "summary", "interactive"],
        vec![
            setup_summary_plan("agent-summary-test", "01-agent-session.md", AGENT_JOB),
            fixtures::setup_test_environment(TestEnvOptions::default().mock("llm", SUMMARY_LLM)),
            complete_and_verify(
                "agent-summary-test",
                "01-agent-session.md",
                true,
                &["Appending agent session transcript", "Job completed: Agent Session"],
            ),
        ],
    )
}
