use crate::flow::fixtures::{self, TestEnvOptions};
use crate::flow::steps;
use crate::harness::{fs, Context, Scenario, Step};
use crate::scenarios::setup_project;

pub fn workflow() -> Scenario {
    Scenario::new(
        "flow-note-to-plan-workflow",
        "Tests the two-stage plan completion (review/finish) and note_ref hooks.",
        &["plan", "review", "finish", "hooks", "note-to-plan"],
        vec![
            setup_project("Setup project", fixtures::PLANS_CONFIG),
            Step::new("Create a note to plan from", |ctx: &mut Context| {
                let note = ctx.root_dir.join("notes").join("my-test-note.md");
                fs::write_string(&note, "# My Test Note\n\nThis is the content of the note.")?;
                ctx.set_path("note_path", &note);
                Ok(())
            }),
            fixtures::setup_test_environment(TestEnvOptions {
                subprocess_safe: true,
                ..TestEnvOptions::default()
            }),
            steps::init_plan_with_note_ref("note-plan", "note_path", &[]),
            steps::verify_hooks_configured("note-plan", "on_review"),
            steps::verify_job_frontmatter_field("note-plan", "01-chat.md", "note_ref", "note_path"),
            steps::verify_plan_finish_gated("note-plan"),
            steps::run_plan_review("note-plan"),
            steps::verify_plan_status("note-plan", "review"),
            steps::run_plan_finish("note-plan", &["--yes", "--prune-worktree", "--delete-branch"]),
        ],
    )
}
