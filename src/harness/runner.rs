use std::fs::OpenOptions;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{HarnessError, Result};
use crate::harness::context::{Context, ContextSettings};
use crate::harness::scenario::Scenario;

const LOCK_FILE: &str = ".flow-e2e.lock";

#[derive(Debug, Clone)]
pub struct RunnerOptions {
    pub work_root: PathBuf,
    pub keep_artifacts: bool,
    pub keep_on_failure: bool,
    pub fail_fast: bool,
    pub context: ContextSettings,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ScenarioStatus {
    Passed,
    Failed,
    Skipped,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScenarioOutcome {
    pub name: String,
    pub status: ScenarioStatus,
    pub steps_run: usize,
    pub failed_step: Option<String>,
    pub error: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
    /// Sandbox left on disk for inspection.
    pub sandbox: Option<PathBuf>,
}

impl ScenarioOutcome {
    fn not_run(name: &str, status: ScenarioStatus) -> Self {
        Self {
            name: name.to_string(),
            status,
            steps_run: 0,
            failed_step: None,
            error: None,
            started_at: None,
            finished_at: None,
            duration_ms: 0,
            sandbox: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub outcomes: Vec<ScenarioOutcome>,
}

impl RunReport {
    pub fn summary(&self) -> RunSummary {
        let mut summary = RunSummary::default();
        for outcome in &self.outcomes {
            match outcome.status {
                ScenarioStatus::Passed => summary.passed += 1,
                ScenarioStatus::Failed => summary.failed += 1,
                ScenarioStatus::Skipped => summary.skipped += 1,
                ScenarioStatus::Cancelled => summary.cancelled += 1,
            }
        }
        summary
    }

    pub fn is_success(&self) -> bool {
        self.outcomes
            .iter()
            .all(|o| o.status == ScenarioStatus::Passed)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct RunSummary {
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub cancelled: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "passed={}, failed={}, skipped={}, cancelled={}",
            self.passed, self.failed, self.skipped, self.cancelled
        )
    }
}

pub struct Runner {
    options: RunnerOptions,
}

impl Runner {
    pub fn new(options: RunnerOptions) -> Self {
        Self { options }
    }

    /// Runs `scenarios` one after another. Holds an exclusive lock on the work
    /// root for the whole run.
    pub fn run(&self, scenarios: &[Scenario], cancel: &AtomicBool) -> Result<RunReport> {
        std::fs::create_dir_all(&self.options.work_root)?;
        let lock_path = self.options.work_root.join(LOCK_FILE);
        let lock = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(&lock_path)?;
        lock.try_lock_exclusive().map_err(|_| {
            HarnessError::Config(format!(
                "another run is using {}",
                self.options.work_root.display()
            ))
        })?;

        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        info!("run {run_id}: {} scenario(s)", scenarios.len());

        let mut outcomes = Vec::with_capacity(scenarios.len());
        let mut stop: Option<ScenarioStatus> = None;

        for scenario in scenarios {
            if cancel.load(Ordering::SeqCst) {
                stop = Some(ScenarioStatus::Cancelled);
            }
            if let Some(status) = stop {
                outcomes.push(ScenarioOutcome::not_run(&scenario.name, status));
                continue;
            }

            let outcome = self.run_scenario(scenario, cancel);
            match outcome.status {
                ScenarioStatus::Cancelled => stop = Some(ScenarioStatus::Cancelled),
                ScenarioStatus::Failed if self.options.fail_fast => {
                    stop = Some(ScenarioStatus::Skipped)
                }
                _ => {}
            }
            outcomes.push(outcome);
        }

        let _ = FileExt::unlock(&lock);

        Ok(RunReport {
            run_id,
            started_at,
            finished_at: Utc::now(),
            outcomes,
        })
    }

    fn run_scenario(&self, scenario: &Scenario, cancel: &AtomicBool) -> ScenarioOutcome {
        info!("=== {} ===", scenario.name);
        let started_at = Utc::now();
        let start = Instant::now();

        let sandbox = match tempfile::Builder::new()
            .prefix(&format!("{}-", scenario.name))
            .tempdir_in(&self.options.work_root)
        {
            Ok(sandbox) => sandbox,
            Err(e) => return setup_failed(scenario, started_at, start, &HarnessError::Io(e)),
        };
        let mut ctx = match Context::new(sandbox.path(), self.options.context.clone()) {
            Ok(ctx) => ctx,
            Err(e) => return setup_failed(scenario, started_at, start, &e),
        };

        let mut status = ScenarioStatus::Passed;
        let mut failed_step = None;
        let mut error_msg = None;
        let mut steps_run = 0;

        let total = scenario.steps.len();
        for (i, step) in scenario.steps.iter().enumerate() {
            if cancel.load(Ordering::SeqCst) {
                warn!("{}: cancelled before step {}", scenario.name, step.name());
                status = ScenarioStatus::Cancelled;
                break;
            }
            info!("[{}/{total}] {}", i + 1, step.name());
            steps_run += 1;

            let result = panic::catch_unwind(AssertUnwindSafe(|| step.run(&mut ctx)))
                .unwrap_or_else(|payload| Err(HarnessError::Assertion(panic_message(&payload))));

            if let Err(e) = result {
                error!("{}: step '{}' failed: {e}", scenario.name, step.name());
                status = if matches!(e, HarnessError::Cancelled) {
                    ScenarioStatus::Cancelled
                } else {
                    ScenarioStatus::Failed
                };
                failed_step = Some(step.name().to_string());
                error_msg = Some(e.to_string());
                break;
            }
        }

        let keep = self.options.keep_artifacts
            || (status != ScenarioStatus::Passed && self.options.keep_on_failure);
        let sandbox_path = if keep {
            let path = sandbox.keep();
            warn!("{}: sandbox kept at {}", scenario.name, path.display());
            Some(path)
        } else {
            let path = sandbox.path().to_path_buf();
            if let Err(e) = sandbox.close() {
                warn!("failed to remove sandbox {}: {e}", path.display());
            }
            None
        };

        match status {
            ScenarioStatus::Passed => info!("{}: passed", scenario.name),
            _ => info!("{}: {status:?}", scenario.name),
        }

        ScenarioOutcome {
            name: scenario.name.clone(),
            status,
            steps_run,
            failed_step,
            error: error_msg,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
            duration_ms: elapsed_ms(start),
            sandbox: sandbox_path,
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX)
}

/// Outcome for a scenario whose sandbox could not be prepared.
fn setup_failed(
    scenario: &Scenario,
    started_at: DateTime<Utc>,
    start: Instant,
    err: &HarnessError,
) -> ScenarioOutcome {
    error!("{}: sandbox setup failed: {err}", scenario.name);
    ScenarioOutcome {
        error: Some(format!("sandbox setup failed: {err}")),
        started_at: Some(started_at),
        finished_at: Some(Utc::now()),
        duration_ms: elapsed_ms(start),
        ..ScenarioOutcome::not_run(&scenario.name, ScenarioStatus::Failed)
    }
}

fn panic_message(payload: &Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        format!("step panicked: {s}")
    } else if let Some(s) = payload.downcast_ref::<String>() {
        format!("step panicked: {s}")
    } else {
        "step panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harness::scenario::Step;

    fn options(root: &Path) -> RunnerOptions {
        RunnerOptions {
            work_root: root.to_path_buf(),
            keep_artifacts: false,
            keep_on_failure: true,
            fail_fast: false,
            context: ContextSettings::default(),
        }
    }

    fn passing(name: &str) -> Scenario {
        Scenario::new(name, "passes", &["test"], vec![Step::new("ok", |_| Ok(()))])
    }

    #[test]
    fn test_stops_at_first_failing_step() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::new(
            "stops",
            "fails in the middle",
            &["test"],
            vec![
                Step::new("first", |ctx: &mut Context| {
                    ctx.set("first", "ran");
                    Ok(())
                }),
                Step::new("second", |_| Err(HarnessError::assertion("boom"))),
                Step::new("third", |_| panic!("must not run")),
            ],
        );

        let report = Runner::new(options(dir.path()))
            .run(&[scenario], &AtomicBool::new(false))
            .unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, ScenarioStatus::Failed);
        assert_eq!(outcome.steps_run, 2);
        assert_eq!(outcome.failed_step.as_deref(), Some("second"));
        assert!(outcome.error.as_deref().unwrap().contains("boom"));
        // keep_on_failure leaves the sandbox behind
        assert!(outcome.sandbox.as_ref().unwrap().join("root").is_dir());
        assert!(!report.is_success());
    }

    #[test]
    fn test_passing_sandbox_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(options(dir.path()))
            .run(&[passing("a"), passing("b")], &AtomicBool::new(false))
            .unwrap();
        assert!(report.is_success());
        assert_eq!(report.summary().to_string(), "passed=2, failed=0, skipped=0, cancelled=0");
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name() != LOCK_FILE)
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_fail_fast_skips_rest() {
        let dir = tempfile::tempdir().unwrap();
        let failing = Scenario::new(
            "fails",
            "",
            &["test"],
            vec![Step::new("bad", |_| Err(HarnessError::assertion("nope")))],
        );
        let mut opts = options(dir.path());
        opts.fail_fast = true;
        opts.keep_on_failure = false;

        let report = Runner::new(opts)
            .run(&[failing, passing("after")], &AtomicBool::new(false))
            .unwrap();
        assert_eq!(report.outcomes[0].status, ScenarioStatus::Failed);
        assert!(report.outcomes[0].sandbox.is_none());
        assert_eq!(report.outcomes[1].status, ScenarioStatus::Skipped);
    }

    #[test]
    fn test_cancel_marks_remaining() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(options(dir.path()))
            .run(&[passing("a"), passing("b")], &AtomicBool::new(true))
            .unwrap();
        let summary = report.summary();
        assert_eq!(summary.cancelled, 2);
        assert_eq!(summary.passed, 0);
    }

    #[test]
    fn test_panicking_step_is_a_failure() {
        let dir = tempfile::tempdir().unwrap();
        let scenario = Scenario::new(
            "panics",
            "",
            &["test"],
            vec![Step::new("explode", |_| panic!("kaboom"))],
        );
        let report = Runner::new(options(dir.path()))
            .run(&[scenario], &AtomicBool::new(false))
            .unwrap();
        assert!(report.outcomes[0].error.as_deref().unwrap().contains("kaboom"));
    }

    #[test]
    fn test_sandbox_failure_does_not_abort_run() {
        let dir = tempfile::tempdir().unwrap();
        // The prefix names a missing subdirectory, so the tempdir cannot be created.
        let broken = Scenario::new("missing/dir", "", &["test"], vec![Step::new("ok", |_| Ok(()))]);
        let report = Runner::new(options(dir.path()))
            .run(&[passing("before"), broken, passing("after")], &AtomicBool::new(false))
            .unwrap();

        let statuses: Vec<ScenarioStatus> = report.outcomes.iter().map(|o| o.status).collect();
        assert_eq!(
            statuses,
            [ScenarioStatus::Passed, ScenarioStatus::Failed, ScenarioStatus::Passed]
        );
        let failed = &report.outcomes[1];
        assert_eq!(failed.steps_run, 0);
        assert!(failed.error.as_deref().unwrap().contains("sandbox setup failed"));
    }

    #[test]
    fn test_locked_work_root_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let held = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.path().join(LOCK_FILE))
            .unwrap();
        held.try_lock_exclusive().unwrap();

        let err = Runner::new(options(dir.path()))
            .run(&[passing("a")], &AtomicBool::new(false))
            .unwrap_err();
        assert!(err.to_string().contains("another run is using"), "{err}");

        FileExt::unlock(&held).unwrap();
        assert!(Runner::new(options(dir.path()))
            .run(&[passing("a")], &AtomicBool::new(false))
            .unwrap()
            .is_success());
    }

    #[test]
    fn test_keep_artifacts_keeps_passing_sandbox() {
        let dir = tempfile::tempdir().unwrap();
        let mut opts = options(dir.path());
        opts.keep_artifacts = true;
        let report = Runner::new(opts)
            .run(&[passing("kept")], &AtomicBool::new(false))
            .unwrap();
        let outcome = &report.outcomes[0];
        assert_eq!(outcome.status, ScenarioStatus::Passed);
        let sandbox = outcome.sandbox.as_ref().unwrap();
        assert!(sandbox.starts_with(dir.path()));
        assert!(sandbox.join("root").is_dir());
    }

    #[test]
    fn test_report_json() {
        let dir = tempfile::tempdir().unwrap();
        let report = Runner::new(options(dir.path()))
            .run(&[passing("a")], &AtomicBool::new(false))
            .unwrap();
        let path = dir.path().join("reports/run.json");
        report.write_json(&path).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(parsed["outcomes"][0]["status"], "passed");
        assert_eq!(parsed["outcomes"][0]["name"], "a");
    }
}
