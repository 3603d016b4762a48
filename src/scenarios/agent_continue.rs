//! `--agent-continue`: opt-in session continuation for agent jobs.

use crate::flow::fixtures;
use crate::flow::steps::{flow_ok, run_flow, Expect};
use crate::harness::{fs, git, Context, Scenario, Step};

const CONTINUE_CONFIG: &str = "name: test-project
flow:
  plans_directory: ./plans
  target_agent_container: test-container
agent:
  args:
    - --model
    - claude-3-5-sonnet-20241022
";

fn setup_repo(grove_yml: &'static str) -> Step {
    Step::new("Setup project with git repo", move |ctx: &mut Context| {
        git::init(&ctx.root_dir)?;
        git::setup_test_config(&ctx.root_dir)?;
        fs::write_string(&ctx.root_dir.join("README.md"), "Test project")?;
        git::add(&ctx.root_dir, ".")?;
        git::commit(&ctx.root_dir, "Initial commit")?;
        fixtures::setup_empty_global_config(ctx)?;
        fixtures::write_grove_config(&ctx.root_dir, grove_yml)
    })
}

/// `flow plan add <plan> <args>`, then checks `agent_continue` in the new job file.
fn add_agent_job(
    name: &'static str,
    plan_name: &'static str,
    job_file: &'static str,
    args: &'static [&'static str],
    continues: bool,
) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        let mut full = vec!["plan", "add", plan_name];
        full.extend_from_slice(args);
        flow_ok(ctx, &full)?;

        let job = ctx.root_dir.join("plans").join(plan_name).join(job_file);
        if continues {
            fs::assert_contains(&job, "agent_continue: true")
        } else {
            fs::assert_not_contains(&job, "agent_continue")
        }
    })
}

pub fn agent_continue() -> Scenario {
    Scenario::new(
        "flow-agent-continue",
        "Tests agent_continue flag functionality for interactive agent jobs",
        &["plan", "agent", "continue"],
        vec![
            setup_repo(CONTINUE_CONFIG),
            run_flow("Initialize plan", &["plan", "init", "continue-test"], Expect::success()),
            add_agent_job(
                "Add first interactive agent job without continue",
                "continue-test",
                "01-first-agent-job.md",
                &[
                    "--title", "First Agent Job", "--type", "interactive_agent", "-p",
                    "This is the first agent job",
                ],
                false,
            ),
            add_agent_job(
                "Add second interactive agent job with --agent-continue",
                "continue-test",
                "02-second-agent-job-with-continue.md",
                &[
                    "--title", "Second Agent Job with Continue", "--type", "interactive_agent",
                    "--depends-on", "01-first-agent-job.md", "--agent-continue", "-p",
                    "This job should continue from the previous agent session",
                ],
                true,
            ),
            run_flow(
                "Verify plan status shows both jobs",
                &["plan", "status", "continue-test"],
                Expect::success()
                    .stdout("01-first-agent-job.md")
                    .stdout("02-second-agent-job-with-continue.md")
                    .stdout("Jobs: 2 total"),
            ),
            Step::new("Verify job files content", |ctx: &mut Context| {
                let plan_dir = ctx.root_dir.join("plans/continue-test");
                let first = fs::read_string(&plan_dir.join("01-first-agent-job.md"))?;
                let second = fs::read_string(&plan_dir.join("02-second-agent-job-with-continue.md"))?;
                ctx.verify("agent job files", |v| {
                    v.not_contains("first job does not continue", &first, "agent_continue")
                        .contains("second job continues", &second, "agent_continue: true")
                        .contains("first job type", &first, "type: interactive_agent")
                        .contains("second job type", &second, "type: interactive_agent")
                        .contains("second job dependency field", &second, "depends_on:")
                        .contains("second job depends on first", &second, "- 01-first-agent-job.md");
                })
            }),
        ],
    )
}

pub fn not_enabled_by_default() -> Scenario {
    Scenario::new(
        "flow-agent-continue-auto-enable",
        "Tests that agent_continue is NOT automatically enabled for interactive_agent jobs by default",
        &["plan", "agent", "continue", "auto"],
        vec![
            setup_repo("name: test-project\nflow:\n  plans_directory: ./plans\n"),
            run_flow("Initialize plan", &["plan", "init", "auto-continue-test"], Expect::success()),
            add_agent_job(
                "Add first interactive agent job",
                "auto-continue-test",
                "01-first-interactive-agent.md",
                &[
                    "--title", "First Interactive Agent", "--type", "interactive_agent", "-p",
                    "This is the first interactive agent job",
                ],
                false,
            ),
            add_agent_job(
                "Add second interactive agent job",
                "auto-continue-test",
                "02-second-interactive-agent-auto.md",
                &[
                    "--title", "Second Interactive Agent Auto", "--type", "interactive_agent",
                    "-p", "This should NOT have continue flag enabled by default",
                ],
                false,
            ),
            // `agent` is an alias for interactive_agent.
            add_agent_job(
                "Add agent job",
                "auto-continue-test",
                "03-agent-job-alias.md",
                &[
                    "--title", "Agent Job (Alias)", "--type", "agent", "--worktree",
                    "test-worktree", "-p",
                    "This is an agent job (now behaves as interactive_agent)",
                ],
                false,
            ),
        ],
    )
}

pub fn flag_propagation() -> Scenario {
    Scenario::new(
        "flow-agent-continue-flag-propagation",
        "Tests that agent_continue is written for agent jobs and documented in plan add",
        &["plan", "agent", "continue", "command"],
        vec![
            setup_repo(
                "name: test-project\nflow:\n  plans_directory: ./plans\n  target_agent_container: test-container\n",
            ),
            run_flow("Initialize plan", &["plan", "init", "command-test"], Expect::success()),
            add_agent_job(
                "Add agent job with --agent-continue",
                "command-test",
                "01-continue-test-job.md",
                &[
                    "--title", "Continue Test Job", "--type", "agent", "--worktree",
                    "test-worktree", "--agent-continue", "-p",
                    "Test prompt for continue functionality",
                ],
                true,
            ),
            Step::new("Verify worktree and type", |ctx: &mut Context| {
                let job = ctx.root_dir.join("plans/command-test/01-continue-test-job.md");
                fs::assert_contains(&job, "worktree: test-worktree")?;
                fs::assert_contains(&job, "type: agent")
            }),
            run_flow(
                "Verify help shows --agent-continue flag",
                &["plan", "add", "--help"],
                Expect::success()
                    .stdout("--agent-continue")
                    .stdout("Continue the last agent session"),
            ),
        ],
    )
}
