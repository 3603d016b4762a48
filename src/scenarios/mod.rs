//! The scenario catalog run against the `flow` binary.

mod agent_continue;
mod chat;
mod context_files;
mod extract;
mod finish;
mod interactive_agent;
mod jobs;
mod lifecycle;
mod note_to_plan;
mod plan;
mod recipes;
mod rules_prompt;
mod summary;
mod worktree;

use std::path::Path;

use crate::error::Result;
use crate::flow::steps::flow_ok;
use crate::flow::{fixtures, plan as flow_plan};
use crate::harness::{fs, Context, Scenario, Step};

/// Every scenario, in the order `run` executes them.
pub fn all() -> Vec<Scenario> {
    vec![
        plan::simple_orchestration(),
        plan::hold_workflow(),
        plan::plan_config(),
        plan::config_propagation(),
        plan::recipes(),
        recipes::recipe_with_extract(),
        recipes::generate_recipe(),
        recipes::generate_recipe_with_variables(),
        plan::init_improvements(),
        plan::from_note(),
        plan::prepend_dependencies(),
        lifecycle::shell_lifecycle(),
        lifecycle::active_job(),
        lifecycle::agent_launch(),
        lifecycle::graph(),
        lifecycle::worktree_inheritance(),
        jobs::rename(),
        jobs::update_dependencies(),
        summary::job_summary(),
        summary::interactive_agent_summary(),
        finish::finish(),
        finish::finish_flags(),
        finish::finish_dev_links(),
        chat::run_filtering(),
        chat::interactive_prompt(),
        chat::launch(),
        chat::pipeline(),
        chat::template_injection(),
        extract::basic(),
        extract::list(),
        extract::all_blocks(),
        extract::errors(),
        note_to_plan::workflow(),
        context_files::reference_prompts(),
        context_files::rules_in_frontmatter(),
        interactive_agent::basic(),
        interactive_agent::skip(),
        interactive_agent::workflow(),
        agent_continue::agent_continue(),
        agent_continue::not_enabled_by_default(),
        agent_continue::flag_propagation(),
        worktree::simple_worktree_context(),
        worktree::state_isolation(),
        worktree::state_direct_navigation(),
        worktree::go_workspace(),
        rules_prompt::proceed(),
        rules_prompt::cancel(),
        rules_prompt::edit(),
    ]
}

/// Git repo with an initial commit and the given `grove.yml` in `root_dir`.
fn setup_project(name: &str, grove_yml: &'static str) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        fixtures::setup_empty_global_config(ctx)?;
        fixtures::standard_project(ctx, grove_yml)
    })
}

/// `flow plan add --type shell`, then drops the job's worktree so it runs in place.
fn add_shell_job(plan_name: &'static str, title: &'static str, script: &'static str, depends_on: Option<&'static str>) -> Step {
    Step::new(format!("Add job '{title}'"), move |ctx: &mut Context| {
        let mut args = vec![
            "plan", "add", plan_name, "--title", title, "--type", "shell", "-p", script,
        ];
        if let Some(dep) = depends_on {
            args.extend(["--depends-on", dep]);
        }
        flow_ok(ctx, &args)?;

        let plan_dir = flow_plan::resolve_plan_path(ctx, plan_name);
        let job = flow_plan::find_job_file_by_title(&plan_dir, title)?;
        strip_worktree(&job)
    })
}

/// Drops `worktree:` lines so shell jobs run in place.
fn strip_worktree(job_path: &Path) -> Result<()> {
    let content = fs::read_string(job_path)?;
    let kept: Vec<&str> = content
        .lines()
        .filter(|line| !line.starts_with("worktree:"))
        .collect();
    fs::write_string(job_path, &(kept.join("\n") + "\n"))
}

/// Rewrites `from` to `to` once in a job's frontmatter, e.g. to reset a status.
fn replace_in_file(path: &Path, from: &str, to: &str) -> Result<()> {
    let content = fs::read_string(path)?;
    fs::write_string(path, &content.replacen(from, to, 1))
}

#[cfg(test)]
pub(crate) mod test_support {
    use crate::harness::{fs, Context, ContextSettings, Scenario, Step};

    /// Context whose `flow` is the given shell script.
    pub fn ctx_with_flow(script: &str) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("fake-flow");
        fs::write_executable(&flow, script).unwrap();
        let ctx = Context::new(
            &dir.path().join("sandbox"),
            ContextSettings {
                flow_binary: Some(flow),
                ..ContextSettings::default()
            },
        )
        .unwrap();
        (dir, ctx)
    }

    pub fn step<'a>(scenario: &'a Scenario, name: &str) -> &'a Step {
        scenario
            .steps
            .iter()
            .find(|s| s.name() == name)
            .unwrap_or_else(|| panic!("{} has no step '{name}'", scenario.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_worktree() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("01-setup.md");
        std::fs::write(&job, "---\ntitle: Setup\nworktree: simple-plan\ntype: shell\n---\necho\n")
            .unwrap();
        strip_worktree(&job).unwrap();
        let content = std::fs::read_to_string(&job).unwrap();
        assert!(!content.contains("worktree:"));
        assert!(content.contains("type: shell"));
    }

    #[test]
    fn test_replace_in_file_once() {
        let dir = tempfile::tempdir().unwrap();
        let job = dir.path().join("01-chat.md");
        std::fs::write(&job, "status: pending_user\nstatus: pending_user\n").unwrap();
        replace_in_file(&job, "status: pending_user", "status: pending").unwrap();
        assert_eq!(
            std::fs::read_to_string(&job).unwrap(),
            "status: pending\nstatus: pending_user\n"
        );
    }
}
