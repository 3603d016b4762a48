use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::debug;

use crate::error::{HarnessError, Result};
use crate::harness::command::Command;
use crate::harness::verify::Verifier;

/// Settings a `Context` inherits from the runner.
#[derive(Debug, Clone, Default)]
pub struct ContextSettings {
    pub flow_binary: Option<PathBuf>,
    pub command_timeout: Option<Duration>,
    pub extra_path: Vec<PathBuf>,
    pub verbose: bool,
}

/// Per-scenario state handed to every step.
///
/// A context owns a sandbox laid out as:
///
/// ```text
/// <sandbox>/root           project workspace (`root_dir`)
/// <sandbox>/home           HOME for commands started through `command`
/// <sandbox>/home/.config   XDG_CONFIG_HOME
/// <sandbox>/test_bin       mock executables, prepended to PATH once created
/// ```
#[derive(Debug)]
pub struct Context {
    pub root_dir: PathBuf,
    sandbox_dir: PathBuf,
    home_dir: PathBuf,
    config_dir: PathBuf,
    bin_dir: PathBuf,
    values: HashMap<String, String>,
    exported_env: Vec<(String, String)>,
    settings: ContextSettings,
}

impl Context {
    pub fn new(sandbox_dir: &Path, settings: ContextSettings) -> Result<Self> {
        let root_dir = sandbox_dir.join("root");
        let home_dir = sandbox_dir.join("home");
        let config_dir = home_dir.join(".config");
        std::fs::create_dir_all(&root_dir)?;
        std::fs::create_dir_all(&config_dir)?;

        Ok(Self {
            root_dir,
            sandbox_dir: sandbox_dir.to_path_buf(),
            home_dir,
            config_dir,
            bin_dir: sandbox_dir.join("test_bin"),
            values: HashMap::new(),
            exported_env: Vec::new(),
            settings,
        })
    }

    pub fn sandbox_dir(&self) -> &Path {
        &self.sandbox_dir
    }

    pub fn home_dir(&self) -> &Path {
        &self.home_dir
    }

    pub fn config_dir(&self) -> &Path {
        &self.config_dir
    }

    pub fn bin_dir(&self) -> &Path {
        &self.bin_dir
    }

    pub fn verbose(&self) -> bool {
        self.settings.verbose
    }

    /// Path of a new directory under `root_dir`. The directory is not created.
    pub fn new_dir(&self, name: &str) -> PathBuf {
        self.root_dir.join(name)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    pub fn set_path(&mut self, key: &str, path: &Path) {
        self.set(key, path.to_string_lossy());
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    /// Stored value for `key`, or an empty string when unset.
    pub fn get_string(&self, key: &str) -> String {
        self.get(key).unwrap_or_default().to_string()
    }

    /// Stored value for `key`; an unset key is an error rather than "".
    pub fn require(&self, key: &str) -> Result<&str> {
        self.get(key)
            .ok_or_else(|| HarnessError::Config(format!("context value {key} is not set")))
    }

    pub fn get_path(&self, key: &str) -> Result<PathBuf> {
        self.require(key).map(PathBuf::from)
    }

    /// Exports a variable to every command started through `command` from now on.
    pub fn export_env(&mut self, key: &str, value: impl Into<String>) {
        let value = value.into();
        self.exported_env.retain(|(k, _)| k != key);
        self.exported_env.push((key.to_string(), value));
    }

    pub fn flow_binary(&self) -> Result<&Path> {
        self.settings.flow_binary.as_deref().ok_or_else(|| {
            HarnessError::BinaryNotFound(
                "flow binary not found. Build it with 'make build' or set FLOW_BINARY env var"
                    .into(),
            )
        })
    }

    /// A sandboxed command: HOME and XDG_CONFIG_HOME point into the sandbox,
    /// mock executables shadow real ones and the working directory is `root_dir`.
    pub fn command<P, I, S>(&self, program: P, args: I) -> Command
    where
        P: Into<OsString>,
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let mut cmd = Command::new(program, args);
        cmd.dir(&self.root_dir)
            .env_pair("HOME", &self.home_dir)
            .env_pair("XDG_CONFIG_HOME", &self.config_dir)
            .env_pair("PATH", self.search_path());
        for (key, value) in &self.exported_env {
            cmd.env_pair(key, value);
        }
        if let Some(timeout) = self.settings.command_timeout {
            cmd.timeout(timeout);
        }
        cmd
    }

    pub fn flow<I, S>(&self, args: I) -> Result<Command>
    where
        I: IntoIterator<Item = S>,
        S: Into<OsString>,
    {
        let flow = self.flow_binary()?.to_path_buf();
        Ok(self.command(flow, args))
    }

    fn search_path(&self) -> OsString {
        let mut dirs: Vec<PathBuf> = Vec::new();
        if self.bin_dir.is_dir() {
            dirs.push(self.bin_dir.clone());
        }
        dirs.extend(self.settings.extra_path.iter().cloned());
        if let Some(current) = std::env::var_os("PATH") {
            dirs.extend(std::env::split_paths(&current));
        }
        std::env::join_paths(dirs).unwrap_or_else(|_| std::env::var_os("PATH").unwrap_or_default())
    }

    pub fn show_command_output(&self, command: &str, stdout: &str, stderr: &str) {
        if self.settings.verbose {
            println!("$ {command}");
            if !stdout.trim().is_empty() {
                println!("{}", stdout.trim_end());
            }
            if !stderr.trim().is_empty() {
                println!("[stderr]\n{}", stderr.trim_end());
            }
        } else {
            debug!("$ {command}\nstdout:\n{stdout}\nstderr:\n{stderr}");
        }
    }

    /// Runs `checks` against a fresh `Verifier` and reports every failure together.
    pub fn verify(&self, description: &str, checks: impl FnOnce(&mut Verifier)) -> Result<()> {
        let mut verifier = Verifier::new();
        checks(&mut verifier);
        verifier.finish(description)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context(dir: &Path) -> Context {
        Context::new(dir, ContextSettings::default()).unwrap()
    }

    #[test]
    fn test_sandbox_layout() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        assert!(ctx.root_dir.is_dir());
        assert!(ctx.config_dir().is_dir());
        assert!(ctx.config_dir().starts_with(ctx.home_dir()));
        assert!(!ctx.bin_dir().exists());
        assert_eq!(ctx.new_dir("my-project"), ctx.root_dir.join("my-project"));
    }

    #[test]
    fn test_values() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        assert_eq!(ctx.get_string("project_dir"), "");
        assert!(ctx.get_path("project_dir").is_err());
        ctx.set_path("project_dir", Path::new("/tmp/x"));
        assert_eq!(ctx.get_path("project_dir").unwrap(), PathBuf::from("/tmp/x"));
    }

    #[test]
    fn test_command_is_sandboxed() {
        let dir = tempfile::tempdir().unwrap();
        let mut ctx = context(dir.path());
        ctx.export_env("GROVE_MOCK_LLM_RESPONSE_FILE", "/tmp/response.txt");

        let result = ctx
            .command(
                "sh",
                ["-c", "printf '%s|%s|%s' \"$HOME\" \"$XDG_CONFIG_HOME\" \"$GROVE_MOCK_LLM_RESPONSE_FILE\""],
            )
            .run();
        result.assert_success().unwrap();
        let parts: Vec<&str> = result.stdout.split('|').collect();
        assert_eq!(parts[0], ctx.home_dir().to_str().unwrap());
        assert_eq!(parts[1], ctx.config_dir().to_str().unwrap());
        assert_eq!(parts[2], "/tmp/response.txt");
    }

    #[test]
    fn test_bin_dir_shadows_path() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        crate::harness::fs::write_executable(
            &ctx.bin_dir().join("llm"),
            "#!/bin/sh\necho mocked llm\n",
        )
        .unwrap();

        let result = ctx.command("llm", Vec::<String>::new()).run();
        assert_eq!(result.stdout.trim(), "mocked llm");
    }

    #[test]
    fn test_flow_without_binary_errors() {
        let dir = tempfile::tempdir().unwrap();
        let ctx = context(dir.path());
        assert!(matches!(
            ctx.flow(["plan", "list"]),
            Err(HarnessError::BinaryNotFound(_))
        ));
    }
}
