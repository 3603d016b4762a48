//! Drives the review/finish step chain through the runner against a scripted
//! stand-in for `flow`.

use std::path::Path;
use std::sync::atomic::AtomicBool;

use flow_e2e::flow::fixtures::{self, TestEnvOptions};
use flow_e2e::flow::steps::{self, Expect};
use flow_e2e::harness::{
    fs, Context, ContextSettings, Runner, RunnerOptions, Scenario, ScenarioStatus, Step,
};

const FAKE_FLOW: &str = r#"#!/bin/sh
cmd="$1 $2"
plan="$3"
dir="$PWD/plans/$plan"
case "$cmd" in
  "plan init")
    mkdir -p "$dir"
    note=""
    while [ $# -gt 0 ]; do
      if [ "$1" = "--note-ref" ]; then note="$2"; fi
      shift
    done
    printf 'status: active\non_review: echo reviewed\n' > "$dir/.grove-plan.yml"
    printf '%s\n' '---' 'title: chat' "note_ref: $note" '---' > "$dir/01-chat.md"
    echo "Initializing orchestration plan in:"
    echo "$dir"
    ;;
  "plan review")
    echo "Executing on_review hook"
    echo "on_review hook executed successfully"
    echo "Plan '$plan' marked for review"
    printf 'status: review\non_review: echo reviewed\n' > "$dir/.grove-plan.yml"
    ;;
  "plan finish")
    if ! grep -q 'status: review' "$dir/.grove-plan.yml"; then
      echo "Error: Please run 'flow plan review $plan' first" >&2
      exit 1
    fi
    echo "Marked plan as finished"
    echo "Plan cleanup finished"
    ;;
  *)
    echo "unexpected: $*" >&2
    exit 2
    ;;
esac
"#;

fn options(work_root: &Path, flow: &Path) -> RunnerOptions {
    RunnerOptions {
        work_root: work_root.to_path_buf(),
        keep_artifacts: false,
        keep_on_failure: true,
        fail_fast: false,
        context: ContextSettings {
            flow_binary: Some(flow.to_path_buf()),
            ..ContextSettings::default()
        },
    }
}

fn write_note() -> Step {
    Step::new("Create note", |ctx: &mut Context| {
        let note = ctx.root_dir.join("notes").join("my-test-note.md");
        fs::write_string(&note, "# My Test Note\n")?;
        ctx.set_path("note_path", &note);
        Ok(())
    })
}

#[test]
fn review_then_finish_passes() {
    let dir = tempfile::tempdir().unwrap();
    let flow = dir.path().join("fake-flow");
    fs::write_executable(&flow, FAKE_FLOW).unwrap();
    let work_root = dir.path().join("work");

    let scenario = Scenario::new(
        "fake-note-to-plan",
        "review/finish chain against a scripted flow",
        &["plan"],
        vec![
            write_note(),
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
            steps::run_plan_finish("note-plan", &["--yes"]),
            steps::verify_file_exists("plans/note-plan/01-chat.md"),
        ],
    );

    let report = Runner::new(options(&work_root, &flow))
        .run(&[scenario], &AtomicBool::new(false))
        .unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, ScenarioStatus::Passed, "{:?}", outcome.error);
    assert_eq!(outcome.steps_run, 10);
    assert!(outcome.sandbox.is_none());
}

#[test]
fn unexpected_subcommand_fails_the_step() {
    let dir = tempfile::tempdir().unwrap();
    let flow = dir.path().join("fake-flow");
    fs::write_executable(&flow, FAKE_FLOW).unwrap();
    let work_root = dir.path().join("work");

    let scenario = Scenario::new(
        "fake-unknown",
        "flow rejects the subcommand",
        &["plan"],
        vec![steps::run_flow(
            "List plans",
            &["plan", "list"],
            Expect::success().stdout("Plans"),
        )],
    );

    let report = Runner::new(options(&work_root, &flow))
        .run(&[scenario], &AtomicBool::new(false))
        .unwrap();
    let outcome = &report.outcomes[0];
    assert_eq!(outcome.status, ScenarioStatus::Failed);
    assert_eq!(outcome.failed_step.as_deref(), Some("List plans"));
    let sandbox = outcome.sandbox.as_ref().unwrap();
    assert!(sandbox.join("root").is_dir());
}

#[test]
fn missing_binary_fails_with_a_hint() {
    let dir = tempfile::tempdir().unwrap();
    let scenario = Scenario::new(
        "no-binary",
        "flow is not available",
        &["plan"],
        vec![steps::run_flow("Version", &["version"], Expect::success())],
    );
    let mut opts = options(dir.path(), Path::new("/unused"));
    opts.context.flow_binary = None;

    let report = Runner::new(opts)
        .run(&[scenario], &AtomicBool::new(false))
        .unwrap();
    let error = report.outcomes[0].error.as_deref().unwrap();
    assert!(error.contains("FLOW_BINARY"), "{error}");
}
