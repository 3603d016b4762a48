//! Step constructors shared by several scenarios.

use std::path::Path;

use crate::error::Result;
use crate::flow::plan;
use crate::harness::{assert, fs, CommandResult, Context, Step};

/// Runs `flow <args>` (from `root_dir` unless `dir` is given), shows the
/// output and returns the result without judging it.
pub fn flow_in(ctx: &Context, dir: Option<&Path>, args: &[&str]) -> Result<CommandResult> {
    let mut cmd = ctx.flow(args.iter().copied())?;
    if let Some(dir) = dir {
        cmd.dir(dir);
    }
    let result = cmd.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    Ok(result)
}

pub fn flow(ctx: &Context, args: &[&str]) -> Result<CommandResult> {
    flow_in(ctx, None, args)
}

/// `flow <args>` with extra `KEY=VALUE` assignments in its environment.
pub fn flow_env(ctx: &Context, env: &[&str], args: &[&str]) -> Result<CommandResult> {
    let mut cmd = ctx.flow(args.iter().copied())?;
    for assignment in env {
        cmd.env(assignment);
    }
    let result = cmd.run();
    ctx.show_command_output(&result.command, &result.stdout, &result.stderr);
    Ok(result)
}

/// `flow <args>` that must succeed.
pub fn flow_ok(ctx: &Context, args: &[&str]) -> Result<CommandResult> {
    let result = flow(ctx, args)?;
    result.assert_success()?;
    Ok(result)
}

/// What `run_flow` expects of the command.
#[derive(Debug, Clone, Default)]
pub struct Expect {
    pub fail: bool,
    pub stdout: Vec<&'static str>,
    pub stderr: Vec<&'static str>,
}

impl Expect {
    pub fn success() -> Self {
        Self::default()
    }

    pub fn failure() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn stdout(mut self, needle: &'static str) -> Self {
        self.stdout.push(needle);
        self
    }

    pub fn stderr(mut self, needle: &'static str) -> Self {
        self.stderr.push(needle);
        self
    }

    pub fn check(&self, result: &CommandResult) -> Result<()> {
        if self.fail {
            result.assert_failure()?;
        } else {
            result.assert_success()?;
        }
        result.assert_stdout_contains(&self.stdout)?;
        result.assert_stderr_contains(&self.stderr)
    }
}

pub fn run_flow(name: &str, args: &'static [&'static str], expect: Expect) -> Step {
    Step::new(name, move |ctx: &mut Context| {
        let result = flow(ctx, args)?;
        expect.check(&result)
    })
}

pub fn init_plan_with_note_ref(plan_name: &str, note_key: &str, extra_flags: &[&str]) -> Step {
    let plan_name = plan_name.to_string();
    let note_key = note_key.to_string();
    let extra: Vec<String> = extra_flags.iter().map(|f| f.to_string()).collect();
    Step::new("Initialize plan with --note-ref", move |ctx: &mut Context| {
        let note = ctx.get_string(&note_key);
        let mut args = vec![
            "plan",
            "init",
            plan_name.as_str(),
            "--recipe",
            "chat",
            "--worktree",
            "--note-ref",
            note.as_str(),
        ];
        args.extend(extra.iter().map(String::as_str));
        flow_ok(ctx, &args).map(|_| ())
    })
}

pub fn verify_plan_status(plan_name: &str, expected: &str) -> Step {
    let plan_name = plan_name.to_string();
    let expected = expected.to_string();
    Step::new(
        format!("Verify plan status is '{expected}'"),
        move |ctx: &mut Context| {
            assert::yaml_field(&plan::plan_config_path(ctx, &plan_name), "status", &expected)
        },
    )
}

pub fn verify_job_frontmatter_field(plan_name: &str, job_file: &str, field: &str, value_key: &str) -> Step {
    let plan_name = plan_name.to_string();
    let job_file = job_file.to_string();
    let field = field.to_string();
    let value_key = value_key.to_string();
    Step::new(
        format!("Verify job {job_file} has {field}"),
        move |ctx: &mut Context| {
            let expected = ctx.require(&value_key)?.to_string();
            let path = plan::resolve_plan_path(ctx, &plan_name).join(&job_file);
            let content = fs::read_string(&path)?;
            let actual = assert::frontmatter_field(&content, &field)?;
            assert::equal(
                Some(expected.as_str()),
                actual.as_deref(),
                &format!("job frontmatter field {field}"),
            )
        },
    )
}

pub fn run_plan_review(plan_name: &str) -> Step {
    let plan_name = plan_name.to_string();
    Step::new("Run 'flow plan review'", move |ctx: &mut Context| {
        let result = flow_ok(ctx, &["plan", "review", plan_name.as_str()])?;
        result.assert_stdout_contains(&[
            "Executing on_review hook",
            "on_review hook executed successfully",
            "marked for review",
        ])
    })
}

pub fn verify_plan_finish_gated(plan_name: &str) -> Step {
    let plan_name = plan_name.to_string();
    Step::new("Test that 'plan finish' is gated", move |ctx: &mut Context| {
        let result = flow(ctx, &["plan", "finish", plan_name.as_str()])?;
        result.assert_failure()?;
        assert::contains(
            &result.stderr,
            "Please run 'flow plan review",
            "expected error message about running 'plan review' first",
        )
    })
}

pub fn run_plan_finish(plan_name: &str, flags: &[&str]) -> Step {
    let plan_name = plan_name.to_string();
    let flags: Vec<String> = flags.iter().map(|f| f.to_string()).collect();
    Step::new("Run 'flow plan finish'", move |ctx: &mut Context| {
        let mut args = vec!["plan", "finish", plan_name.as_str()];
        args.extend(flags.iter().map(String::as_str));
        let result = flow_ok(ctx, &args)?;
        result.assert_stdout_contains(&["Marked plan as finished", "Plan cleanup finished"])
    })
}

pub fn verify_hooks_configured(plan_name: &str, hook: &str) -> Step {
    let plan_name = plan_name.to_string();
    let hook = hook.to_string();
    Step::new(
        format!("Verify {hook} hook is configured"),
        move |ctx: &mut Context| {
            let content = fs::read_string(&plan::plan_config_path(ctx, &plan_name))?;
            assert::contains(
                &content,
                &format!("{hook}:"),
                &format!("plan config should contain {hook} hook"),
            )
        },
    )
}

pub fn verify_file_exists(relative: &str) -> Step {
    let relative = relative.to_string();
    Step::new(
        format!("Verify file exists: {relative}"),
        move |ctx: &mut Context| fs::assert_exists(&ctx.root_dir.join(&relative)),
    )
}

pub fn verify_file_contains(relative: &str, expected: &str) -> Step {
    let relative = relative.to_string();
    let expected = expected.to_string();
    Step::new(
        format!("Verify {relative} contains expected content"),
        move |ctx: &mut Context| fs::assert_contains(&ctx.root_dir.join(&relative), &expected),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::{ContextSettings, Command};

    fn ctx_with_flow(script: &str) -> (tempfile::TempDir, Context) {
        let dir = tempfile::tempdir().unwrap();
        let flow = dir.path().join("fake-flow");
        fs::write_executable(&flow, script).unwrap();
        let ctx = Context::new(
            dir.path(),
            ContextSettings {
                flow_binary: Some(flow),
                ..ContextSettings::default()
            },
        )
        .unwrap();
        (dir, ctx)
    }

    #[test]
    fn test_expect_checks_streams() {
        let result = Command::new("sh", ["-c", "echo 'All jobs completed'; echo warn >&2"]).run();
        Expect::success().stdout("All jobs completed").check(&result).unwrap();
        assert!(Expect::failure().check(&result).is_err());
        assert!(Expect::success().stderr("plan is on hold").check(&result).is_err());
    }

    #[test]
    fn test_run_flow_step_uses_binary() {
        let (_dir, mut ctx) = ctx_with_flow("#!/bin/sh\necho \"flow $*\"\n");
        let step = run_flow(
            "list plans",
            &["plan", "list"],
            Expect::success().stdout("flow plan list"),
        );
        step.run(&mut ctx).unwrap();
    }

    #[test]
    fn test_plan_finish_gated_step() {
        let (_dir, mut ctx) = ctx_with_flow(
            "#!/bin/sh\necho \"Error: Please run 'flow plan review $3' first\" >&2\nexit 1\n",
        );
        verify_plan_finish_gated("note-plan").run(&mut ctx).unwrap();
    }

    #[test]
    fn test_frontmatter_and_status_steps() {
        let (_dir, mut ctx) = ctx_with_flow("#!/bin/sh\n");
        let plan_dir = plan::resolve_plan_path(&ctx, "note-plan");
        fs::write_string(&plan_dir.join(".grove-plan.yml"), "status: review\non_review: echo hi\n")
            .unwrap();
        fs::write_string(
            &plan_dir.join("01-chat.md"),
            "---\ntitle: chat\nnote_ref: /notes/my-note.md\n---\n",
        )
        .unwrap();
        ctx.set("note_path", "/notes/my-note.md");

        verify_plan_status("note-plan", "review").run(&mut ctx).unwrap();
        verify_hooks_configured("note-plan", "on_review").run(&mut ctx).unwrap();
        verify_job_frontmatter_field("note-plan", "01-chat.md", "note_ref", "note_path")
            .run(&mut ctx)
            .unwrap();
        assert!(verify_plan_status("note-plan", "finished").run(&mut ctx).is_err());
        verify_file_exists("plans/note-plan/01-chat.md").run(&mut ctx).unwrap();
        verify_file_contains("plans/note-plan/01-chat.md", "note_ref").run(&mut ctx).unwrap();
    }

    #[test]
    fn test_frontmatter_step_needs_stored_value() {
        let (_dir, mut ctx) = ctx_with_flow("#!/bin/sh\n");
        let plan_dir = plan::resolve_plan_path(&ctx, "note-plan");
        // A field equal to the key's name must not pass when the key is unset.
        fs::write_string(
            &plan_dir.join("01-chat.md"),
            "---\ntitle: chat\nnote_ref: note_path\n---\n",
        )
        .unwrap();

        let err = verify_job_frontmatter_field("note-plan", "01-chat.md", "note_ref", "note_path")
            .run(&mut ctx)
            .unwrap_err();
        assert!(err.to_string().contains("note_path is not set"), "{err}");
    }
}
