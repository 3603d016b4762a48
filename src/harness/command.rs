use std::ffi::OsString;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::{Child, ExitStatus, Stdio};
use std::sync::{mpsc, Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::{HarnessError, Result};

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// A subprocess invocation built up step by step and run synchronously.
#[derive(Debug, Clone)]
pub struct Command {
  program: OsString,
  args: Vec<OsString>,
  dir: Option<PathBuf>,
  envs: Vec<(OsString, OsString)>,
  env_removes: Vec<OsString>,
  stdin: Option<String>,
  timeout: Option<Duration>,
}

impl Command {
  pub fn new<P, I, S>(program: P, args: I) -> Self
  where
    P: Into<OsString>,
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    Self {
      program: program.into(),
      args: args.into_iter().map(Into::into).collect(),
      dir: None,
      envs: Vec::new(),
      env_removes: Vec::new(),
      stdin: None,
      timeout: None,
    }
  }

  pub fn arg(&mut self, arg: impl Into<OsString>) -> &mut Self {
    self.args.push(arg.into());
    self
  }

  pub fn args<I, S>(&mut self, args: I) -> &mut Self
  where
    I: IntoIterator<Item = S>,
    S: Into<OsString>,
  {
    self.args.extend(args.into_iter().map(Into::into));
    self
  }

  pub fn dir(&mut self, dir: impl AsRef<Path>) -> &mut Self {
    self.dir = Some(dir.as_ref().to_path_buf());
    self
  }

  /// Sets a variable from a `KEY=VALUE` string. An empty value is kept as an
  /// empty variable, not removed.
  pub fn env(&mut self, assignment: &str) -> &mut Self {
    match assignment.split_once('=') {
      Some((key, value)) => self.env_pair(key, value),
      None => self.env_pair(assignment, ""),
    }
  }

  pub fn env_pair(&mut self, key: impl Into<OsString>, value: impl Into<OsString>) -> &mut Self {
    let key = key.into();
    self.env_removes.retain(|k| *k != key);
    self.envs.push((key, value.into()));
    self
  }

  pub fn env_remove(&mut self, key: impl Into<OsString>) -> &mut Self {
    let key = key.into();
    self.envs.retain(|(k, _)| *k != key);
    self.env_removes.push(key);
    self
  }

  pub fn stdin(&mut self, input: impl Into<String>) -> &mut Self {
    self.stdin = Some(input.into());
    self
  }

  pub fn timeout(&mut self, timeout: Duration) -> &mut Self {
    self.timeout = Some(timeout);
    self
  }

  /// Value of an environment override set on this command, last one wins.
  pub fn env_value(&self, key: &str) -> Option<&OsString> {
    self
      .envs
      .iter()
      .rev()
      .find(|(k, _)| k == key)
      .map(|(_, v)| v)
  }

  pub fn working_dir(&self) -> Option<&Path> {
    self.dir.as_deref()
  }

  /// Runs the command to completion. Spawn failures, non-zero exits and
  /// timeouts are reported through `CommandResult::error`, never by panicking.
  pub fn run(&self) -> CommandResult {
    let rendered = self.to_string();
    debug!("running: {rendered}");
    let start = Instant::now();

    let mut cmd = std::process::Command::new(&self.program);
    cmd
      .args(&self.args)
      .stdin(if self.stdin.is_some() {
        Stdio::piped()
      } else {
        Stdio::null()
      })
      .stdout(Stdio::piped())
      .stderr(Stdio::piped());
    if let Some(dir) = &self.dir {
      cmd.current_dir(dir);
    }
    for key in &self.env_removes {
      cmd.env_remove(key);
    }
    for (key, value) in &self.envs {
      cmd.env(key, value);
    }

    #[cfg(unix)]
    {
      // Own process group, so a timeout also reaches helpers the child backgrounds.
      use std::os::unix::process::CommandExt;
      cmd.process_group(0);
    }

    let mut child = match cmd.spawn() {
      Ok(child) => child,
      Err(e) => {
        return CommandResult {
          command: rendered,
          stdout: String::new(),
          stderr: String::new(),
          exit_code: None,
          duration: start.elapsed(),
          error: Some(format!(
            "failed to start {}: {e}",
            Path::new(&self.program).display()
          )),
        };
      }
    };

    if let Some(input) = &self.stdin {
      if let Some(mut pipe) = child.stdin.take() {
        let input = input.clone();
        // The child may exit without reading; a broken pipe is not an error here.
        std::thread::spawn(move || {
          let _ = pipe.write_all(input.as_bytes());
        });
      }
    }

    let stdout = Capture::spawn(child.stdout.take());
    let stderr = Capture::spawn(child.stderr.take());
    let deadline = self.timeout.map(|t| start + t);
    let waited = wait_until(&mut child, deadline, &[&stdout, &stderr]);

    let (exit_code, error) = match waited {
      Waited::Exited(status) => {
        let exit_code = status.code();
        let error = if status.success() {
          None
        } else {
          Some(match exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
          })
        };
        (exit_code, error)
      }
      Waited::TimedOut => (
        None,
        Some(format!(
          "timed out after {}s",
          self.timeout.unwrap_or_default().as_secs_f32()
        )),
      ),
      Waited::Failed(e) => (None, Some(format!("failed to wait for process: {e}"))),
    };

    CommandResult {
      command: rendered,
      stdout: stdout.snapshot(),
      stderr: stderr.snapshot(),
      exit_code,
      duration: start.elapsed(),
      error,
    }
  }
}

impl std::fmt::Display for Command {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    write!(f, "{}", quote(&self.program.to_string_lossy()))?;
    for arg in &self.args {
      write!(f, " {}", quote(&arg.to_string_lossy()))?;
    }
    Ok(())
  }
}

fn quote(s: &str) -> String {
  if s.is_empty() {
    return "''".to_string();
  }
  if s.chars().any(|c| c.is_whitespace() || "'\"$`\\*?;&|<>()".contains(c)) {
    format!("'{}'", s.replace('\'', r"'\''"))
  } else {
    s.to_string()
  }
}

/// Output read from one pipe so far. The reader thread keeps appending until
/// the pipe closes, so a snapshot taken after a timeout holds what was printed
/// before the process hung.
struct Capture {
  buf: Arc<Mutex<Vec<u8>>>,
  done: mpsc::Receiver<()>,
}

impl Capture {
  fn spawn<R: Read + Send + 'static>(pipe: Option<R>) -> Self {
    let buf = Arc::new(Mutex::new(Vec::new()));
    let (tx, done) = mpsc::channel();
    let sink = Arc::clone(&buf);
    std::thread::spawn(move || {
      if let Some(mut pipe) = pipe {
        let mut chunk = [0u8; 8192];
        loop {
          match pipe.read(&mut chunk) {
            Ok(0) => break,
            Ok(n) => {
              if let Ok(mut buf) = sink.lock() {
                buf.extend_from_slice(&chunk[..n]);
              }
            }
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => break,
          }
        }
      }
      let _ = tx.send(());
    });
    Self { buf, done }
  }

  /// Waits for the pipe to close. Returns false if `deadline` passed first.
  fn wait_closed(&self, deadline: Option<Instant>) -> bool {
    match deadline {
      None => {
        let _ = self.done.recv();
        true
      }
      Some(deadline) => {
        let remaining = deadline.saturating_duration_since(Instant::now());
        !matches!(
          self.done.recv_timeout(remaining),
          Err(mpsc::RecvTimeoutError::Timeout)
        )
      }
    }
  }

  fn snapshot(&self) -> String {
    self
      .buf
      .lock()
      .map(|buf| String::from_utf8_lossy(&buf).into_owned())
      .unwrap_or_default()
  }
}

enum Waited {
  Exited(ExitStatus),
  TimedOut,
  Failed(String),
}

/// Polls `child` until it exits and its pipes close, or `deadline` passes.
/// Pipes held open by grandchildren count against the same deadline.
fn wait_until(child: &mut Child, deadline: Option<Instant>, captures: &[&Capture]) -> Waited {
  let expired = || deadline.is_some_and(|d| Instant::now() >= d);
  loop {
    match child.try_wait() {
      Ok(Some(status)) => {
        if captures.iter().all(|c| c.wait_closed(deadline)) {
          return Waited::Exited(status);
        }
        warn!(
          "process {} exited but its output stayed open past the deadline, killing its group",
          child.id()
        );
        kill_group(child);
        return Waited::TimedOut;
      }
      Ok(None) if expired() => {
        warn!("process {} timed out, killing", child.id());
        kill_group(child);
        let _ = child.wait();
        return Waited::TimedOut;
      }
      Ok(None) => std::thread::sleep(POLL_INTERVAL),
      Err(e) => {
        warn!("failed to poll process {}: {e}", child.id());
        kill_group(child);
        let _ = child.wait();
        return Waited::Failed(e.to_string());
      }
    }
  }
}

#[cfg(unix)]
fn kill_group(child: &mut Child) {
  use nix::sys::signal::{killpg, Signal};
  use nix::unistd::Pid;

  let killed = i32::try_from(child.id())
    .ok()
    .map(|pid| killpg(Pid::from_raw(pid), Signal::SIGKILL));
  if !matches!(killed, Some(Ok(()))) {
    debug!("could not signal process group of {}, killing the process only", child.id());
    let _ = child.kill();
  }
}

#[cfg(not(unix))]
fn kill_group(child: &mut Child) {
  let _ = child.kill();
}

/// Captured outcome of a finished `Command`.
#[derive(Debug, Clone)]
pub struct CommandResult {
  pub command: String,
  pub stdout: String,
  pub stderr: String,
  pub exit_code: Option<i32>,
  pub duration: Duration,
  /// Set when the process could not start, exited non-zero or timed out.
  pub error: Option<String>,
}

impl CommandResult {
  pub fn success(&self) -> bool {
    self.error.is_none()
  }

  pub fn combined_output(&self) -> String {
    format!("{}{}", self.stdout, self.stderr)
  }

  /// Converts the run into a `Result`, carrying stderr in the error message.
  pub fn ok(&self) -> Result<()> {
    match &self.error {
      None => Ok(()),
      Some(e) => Err(HarnessError::Command(format!(
        "`{}` failed ({e}): {}",
        self.command,
        self.stderr.trim()
      ))),
    }
  }

  pub fn assert_success(&self) -> Result<()> {
    match &self.error {
      None => Ok(()),
      Some(e) => Err(HarnessError::assertion(format!(
        "expected `{}` to succeed, got {e}\nstdout:\n{}\nstderr:\n{}",
        self.command, self.stdout, self.stderr
      ))),
    }
  }

  pub fn assert_failure(&self) -> Result<()> {
    if self.exit_code.is_some() && self.error.is_some() {
      Ok(())
    } else if self.error.is_none() {
      Err(HarnessError::assertion(format!(
        "expected `{}` to fail, but it succeeded\nstdout:\n{}",
        self.command, self.stdout
      )))
    } else {
      // Did not start or timed out: not the kind of failure a scenario asserts on.
      self.ok()
    }
  }

  pub fn assert_stdout_contains(&self, needles: &[&str]) -> Result<()> {
    assert_all_in("stdout", &self.command, &self.stdout, needles)
  }

  pub fn assert_stderr_contains(&self, needles: &[&str]) -> Result<()> {
    assert_all_in("stderr", &self.command, &self.stderr, needles)
  }

  pub fn assert_output_contains(&self, needles: &[&str]) -> Result<()> {
    assert_all_in("output", &self.command, &self.combined_output(), needles)
  }
}

fn assert_all_in(stream: &str, command: &str, haystack: &str, needles: &[&str]) -> Result<()> {
  let missing: Vec<&str> = needles
    .iter()
    .copied()
    .filter(|n| !haystack.contains(n))
    .collect();
  if missing.is_empty() {
    return Ok(());
  }
  Err(HarnessError::assertion(format!(
    "{stream} of `{command}` is missing {missing:?}\n{stream}:\n{haystack}"
  )))
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_captures_stdout_and_exit_code() {
    let result = Command::new("sh", ["-c", "printf hello; printf oops >&2"]).run();
    assert!(result.success());
    assert_eq!(result.stdout, "hello");
    assert_eq!(result.stderr, "oops");
    assert_eq!(result.exit_code, Some(0));
  }

  #[test]
  fn test_nonzero_exit_sets_error() {
    let result = Command::new("sh", ["-c", "echo bad >&2; exit 3"]).run();
    assert!(!result.success());
    assert_eq!(result.exit_code, Some(3));
    assert!(result.assert_failure().is_ok());
    assert!(result.assert_success().is_err());
    let msg = result.ok().unwrap_err().to_string();
    assert!(msg.contains("exit status 3"));
    assert!(msg.contains("bad"));
  }

  #[test]
  fn test_missing_program_does_not_panic() {
    let result = Command::new("/nonexistent/flow-e2e-missing", Vec::<String>::new()).run();
    assert!(result.exit_code.is_none());
    assert!(result.error.as_deref().unwrap().contains("failed to start"));
    // Not starting at all is not an expected failure.
    assert!(result.assert_failure().is_err());
  }

  #[test]
  fn test_stdin_is_delivered() {
    let result = Command::new("cat", Vec::<String>::new())
      .stdin("p\n")
      .run();
    assert_eq!(result.stdout, "p\n");
  }

  #[test]
  fn test_env_and_dir() {
    let dir = tempfile::tempdir().unwrap();
    let result = Command::new("sh", ["-c", "printf \"$GREETING:$EMPTY:\"; pwd"])
      .dir(dir.path())
      .env("GREETING=hi")
      .env("EMPTY=")
      .run();
    let canonical = dir.path().canonicalize().unwrap();
    assert!(result.stdout.starts_with("hi::"));
    assert!(result.stdout.trim_end().ends_with(canonical.to_str().unwrap()));
  }

  #[test]
  fn test_later_env_wins() {
    let mut cmd = Command::new("sh", ["-c", "printf \"$V\""]);
    cmd.env("V=first").env("V=second");
    assert_eq!(cmd.env_value("V").unwrap(), "second");
    assert_eq!(cmd.run().stdout, "second");
  }

  #[test]
  fn test_timeout_kills_process() {
    let result = Command::new("sleep", ["5"])
      .timeout(Duration::from_millis(200))
      .run();
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert!(result.duration < Duration::from_secs(4));
  }

  #[test]
  fn test_timeout_covers_backgrounded_children() {
    let result = Command::new("sh", ["-c", "sleep 8 & echo started"])
      .timeout(Duration::from_secs(1))
      .run();
    assert!(result.duration < Duration::from_secs(5));
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert_eq!(result.stdout.trim(), "started");
  }

  #[test]
  fn test_timeout_keeps_partial_output() {
    let result = Command::new("sh", ["-c", "echo progress-line; echo warming >&2; sleep 5"])
      .timeout(Duration::from_millis(500))
      .run();
    assert!(result.error.as_deref().unwrap().contains("timed out"));
    assert!(result.exit_code.is_none());
    assert_eq!(result.stdout, "progress-line\n");
    assert_eq!(result.stderr, "warming\n");
  }

  #[test]
  fn test_display_quotes_arguments() {
    let cmd = Command::new("flow", ["plan", "add", "my plan", "-p", "echo 'hi'"]);
    assert_eq!(
      cmd.to_string(),
      r"flow plan add 'my plan' -p 'echo '\''hi'\'''"
    );
  }

  #[test]
  fn test_stdout_contains_reports_missing() {
    let result = Command::new("echo", ["Found 2 runnable chat(s)"]).run();
    assert!(result.assert_stdout_contains(&["Found 2"]).is_ok());
    let err = result
      .assert_stdout_contains(&["Found 2", "Running Chat: chat1"])
      .unwrap_err()
      .to_string();
    assert!(err.contains("Running Chat: chat1"));
    assert!(!err.contains("\"Found 2\""));
  }
}
