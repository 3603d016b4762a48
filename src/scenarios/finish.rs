//! `flow plan finish`: review gating, cleanup flags and dev link pruning.

use std::path::PathBuf;

use crate::error::{HarnessError, Result};
use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::plan;
use crate::flow::steps::{flow_ok, run_plan_finish, verify_plan_finish_gated, verify_plan_status};
use crate::harness::mock::{self, Mock};
use crate::harness::{assert, fs, git, Context, Scenario, Step};
use crate::scenarios::setup_project;

fn worktree_path(ctx: &Context, name: &str) -> PathBuf {
    ctx.root_dir.join(".grove-worktrees").join(name)
}

/// `plan init --with-worktree`, plus the worktree and branch `flow` would have created.
fn init_worktree_plan(plan_name: &'static str) -> Step {
    Step::new(
        format!("Create plan '{plan_name}' with a worktree"),
        move |ctx: &mut Context| {
            flow_ok(ctx, &["plan", "init", plan_name, "--with-worktree"])?;
            let path = worktree_path(ctx, plan_name);
            git::create_worktree(&ctx.root_dir, &path, plan_name)?;
            assert::equal(plan_name, git::current_branch(&path)?.as_str(), "worktree branch")
        },
    )
}

fn review(plan_name: &'static str) -> Step {
    Step::new(format!("Review plan '{plan_name}'"), move |ctx: &mut Context| {
        flow_ok(ctx, &["plan", "review", plan_name])?.assert_stdout_contains(&["marked for review"])
    })
}

fn worktree_registered(ctx: &Context, name: &str) -> Result<bool> {
    Ok(git::worktree_list(&ctx.root_dir)?
        .iter()
        .any(|w| w.ends_with(name)))
}

fn assert_worktree_removed(ctx: &Context, name: &str) -> Result<()> {
    fs::assert_not_exists(&worktree_path(ctx, name))?;
    if worktree_registered(ctx, name)? {
        return Err(HarnessError::assertion(format!(
            "worktree {name} is still registered with git"
        )));
    }
    Ok(())
}

pub fn finish() -> Scenario {
    Scenario::new(
        "flow-plan-finish",
        "Tests the review-gated plan cleanup: worktree, branch and plan directory are all handled by --yes.",
        &["plan", "finish", "cleanup"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            init_worktree_plan("finish-plan"),
            verify_plan_finish_gated("finish-plan"),
            review("finish-plan"),
            verify_plan_status("finish-plan", "review"),
            run_plan_finish("finish-plan", &["--yes"]),
            Step::new("Verify worktree and branch are gone", |ctx: &mut Context| {
                assert_worktree_removed(ctx, "finish-plan")?;
                if git::branch_exists(&ctx.root_dir, "finish-plan") {
                    return Err(HarnessError::assertion("branch finish-plan should be deleted"));
                }
                assert::equal("main", git::current_branch(&ctx.root_dir)?.as_str(), "main checkout branch")
            }),
            Step::new("Verify plan was archived as finished", |ctx: &mut Context| {
                fs::assert_not_exists(&plan::resolve_plan_path(ctx, "finish-plan"))?;
                let archived = ctx
                    .root_dir
                    .join("plans/.archive/finish-plan")
                    .join(plan::PLAN_CONFIG_FILE);
                assert::yaml_field(&archived, "status", "finished")
            }),
        ],
    )
}

pub fn finish_flags() -> Scenario {
    Scenario::new(
        "flow-plan-finish-flags",
        "Tests that explicit plan finish flags only run the selected cleanup actions.",
        &["plan", "finish", "cleanup", "flags"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            init_worktree_plan("flags-plan"),
            review("flags-plan"),
            run_plan_finish("flags-plan", &["--prune-worktree"]),
            Step::new("Verify only the worktree was pruned", |ctx: &mut Context| {
                assert_worktree_removed(ctx, "flags-plan")?;
                if !git::branch_exists(&ctx.root_dir, "flags-plan") {
                    return Err(HarnessError::assertion(
                        "branch flags-plan should survive without --delete-branch",
                    ));
                }
                fs::assert_exists(&plan::resolve_plan_path(ctx, "flags-plan"))
            }),
            verify_plan_status("flags-plan", "finished"),
            Step::new("Finish again to delete the branch", |ctx: &mut Context| {
                let result = flow_ok(ctx, &["plan", "finish", "flags-plan", "--delete-branch"])?;
                result.assert_stdout_contains(&[
                    "This plan is already 'finished'",
                    "Plan cleanup finished",
                ])?;
                if git::branch_exists(&ctx.root_dir, "flags-plan") {
                    return Err(HarnessError::assertion("branch flags-plan should be deleted"));
                }
                Ok(())
            }),
        ],
    )
}

fn grove_dev(ctx: &Context, args: &[&str]) -> Result<String> {
    let mut full = vec!["dev"];
    full.extend_from_slice(args);
    let result = ctx.command("grove", full).run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    result.assert_success()?;
    Ok(result.stdout)
}

pub fn finish_dev_links() -> Scenario {
    Scenario::new(
        "flow-plan-finish-dev-links",
        "Tests that plan finish --clean-dev-links prunes the worktree's dev binaries and falls back to the main repo.",
        &["plan", "finish", "cleanup", "devlinks"],
        vec![
            setup_project("Setup git repository and config", fixtures::PLANS_CONFIG),
            fixtures::setup_test_environment(TestEnvOptions::default()),
            mock::setup_mocks(vec![Mock::new("grove")]),
            Step::new("Register main repo binary", |ctx: &mut Context| {
                let root = ctx.root_dir.to_string_lossy().to_string();
                grove_dev(ctx, &["link", &root, "--as", "main-repo"])?;
                fs::assert_exists(&ctx.home_dir().join(".grove/dev-links"))
            }),
            init_worktree_plan("links-plan"),
            Step::new("Activate worktree binary", |ctx: &mut Context| {
                let worktree = worktree_path(ctx, "links-plan").to_string_lossy().to_string();
                grove_dev(ctx, &["link", &worktree, "--as", "links-plan"])?;
                let list = grove_dev(ctx, &["list"])?;
                assert::contains(&list, "* links-plan", "worktree binary should be active")
            }),
            review("links-plan"),
            Step::new("Finish with --clean-dev-links", |ctx: &mut Context| {
                let result = flow_ok(
                    ctx,
                    &["plan", "finish", "links-plan", "--prune-worktree", "--clean-dev-links"],
                )?;
                result.assert_stdout_contains(&["Pruning broken dev links", "Plan cleanup finished"])?;
                assert_worktree_removed(ctx, "links-plan")
            }),
            Step::new("Verify binary fell back to main repo", |ctx: &mut Context| {
                let list = grove_dev(ctx, &["list"])?;
                ctx.verify("dev links after prune", |v| {
                    v.contains("main-repo is current", &list, "* main-repo")
                        .not_contains("worktree link removed", &list, "links-plan");
                })
            }),
        ],
    )
}
