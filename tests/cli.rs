use std::path::{Path, PathBuf};

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// A scratch directory with a `flow-e2e.yaml` whose sandboxes stay inside it.
struct Workspace {
    dir: TempDir,
}

impl Workspace {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = format!(
            "work_root: {}\nkeep_on_failure: false\ncommand_timeout_secs: 30\n",
            dir.path().join("work").display()
        );
        std::fs::write(dir.path().join("flow-e2e.yaml"), config).unwrap();
        Self { dir }
    }

    fn path(&self) -> &Path {
        self.dir.path()
    }

    fn cmd(&self) -> Command {
        let mut cmd = Command::new(env!("CARGO_BIN_EXE_flow-e2e"));
        cmd.current_dir(self.path());
        cmd.env("NO_COLOR", "1");
        cmd.env_remove("RUST_LOG");
        cmd.env_remove("FLOW_BINARY");
        cmd
    }

    fn failing_flow(&self) -> PathBuf {
        let path = self.path().join("fake-flow");
        std::fs::write(&path, "#!/bin/sh\necho \"fake flow: $*\" >&2\nexit 1\n").unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }
        path
    }
}

#[test]
fn test_list_marks_explicit_only_scenarios() {
    let ws = Workspace::new();
    ws.cmd()
        .arg("list")
        .assert()
        .success()
        .stdout(predicate::str::contains("flow-prepend-dependencies"))
        .stdout(predicate::str::contains("(explicit only)"));
}

#[test]
fn test_list_filters_by_tag() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["list", "--tags", "rules"])
        .assert()
        .success()
        .stdout(predicate::str::contains("rules-prompt-proceed"))
        .stdout(predicate::str::contains("flow-simple-orchestration").not());
}

#[test]
fn test_empty_selection_exits_nonzero() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["run", "--tags", "no-such-tag"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("no scenarios matched"));
}

#[test]
fn test_zero_timeout_is_rejected() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["run", "--timeout", "0", "flow-plan-active-job"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("--timeout must be greater than zero"));
    assert!(!ws.path().join("work").exists());
}

#[test]
fn test_missing_explicit_config_exits_nonzero() {
    let ws = Workspace::new();
    ws.cmd()
        .args(["--config", "absent.yaml", "run"])
        .assert()
        .failure()
        .code(1);
}

#[test]
fn test_failing_scenario_exits_nonzero() {
    let ws = Workspace::new();
    let flow = ws.failing_flow();
    ws.cmd()
        .env("FLOW_BINARY", &flow)
        .args(["run", "flow-plan-active-job"])
        .assert()
        .failure()
        .code(1)
        .stdout(predicate::str::contains("flow-plan-active-job: Failed"))
        .stdout(predicate::str::contains("passed=0, failed=1, skipped=0, cancelled=0"));
}

#[test]
fn test_report_is_written_for_failed_run() {
    let ws = Workspace::new();
    let flow = ws.failing_flow();
    let report = ws.path().join("report.json");
    ws.cmd()
        .env("FLOW_BINARY", &flow)
        .args(["run", "flow-plan-active-job", "--report"])
        .arg(&report)
        .assert()
        .failure();

    let json: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(&report).unwrap()).unwrap();
    assert_eq!(json["outcomes"][0]["name"], "flow-plan-active-job");
    assert_eq!(json["outcomes"][0]["status"], "failed");
}
