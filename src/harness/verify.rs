use std::fmt::Debug;

use crate::error::{HarnessError, Result};

/// Collects several checks and reports every failure at once instead of
/// stopping at the first one.
#[derive(Debug, Default)]
pub struct Verifier {
    checks: usize,
    failures: Vec<String>,
}

impl Verifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn check(&mut self, ok: bool, message: impl Into<String>) -> &mut Self {
        self.checks += 1;
        if !ok {
            self.failures.push(message.into());
        }
        self
    }

    pub fn equal<T: PartialEq + Debug>(&mut self, message: &str, expected: T, actual: T) -> &mut Self {
        let ok = expected == actual;
        self.check(ok, format!("{message}: expected {expected:?}, got {actual:?}"))
    }

    pub fn contains(&mut self, message: &str, haystack: &str, needle: &str) -> &mut Self {
        self.check(
            haystack.contains(needle),
            format!("{message}: {needle:?} not found"),
        )
    }

    pub fn not_contains(&mut self, message: &str, haystack: &str, needle: &str) -> &mut Self {
        self.check(
            !haystack.contains(needle),
            format!("{message}: {needle:?} unexpectedly found"),
        )
    }

    pub fn is_true(&mut self, message: &str, value: bool) -> &mut Self {
        self.check(value, message.to_string())
    }

    pub fn failures(&self) -> &[String] {
        &self.failures
    }

    pub fn finish(self, description: &str) -> Result<()> {
        if self.failures.is_empty() {
            return Ok(());
        }
        let mut msg = format!(
            "{description}: {} of {} checks failed",
            self.failures.len(),
            self.checks
        );
        for failure in &self.failures {
            msg.push_str("\n  - ");
            msg.push_str(failure);
        }
        Err(HarnessError::Assertion(msg))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collects_all_failures() {
        let output = "Found 2 runnable chat(s)\nRunning Chat: chat1\n";
        let mut v = Verifier::new();
        v.contains("runnable count", output, "Found 2 runnable chat(s)")
            .contains("chat3 ran", output, "Running Chat: chat3")
            .not_contains("chat2 skipped", output, "Running Chat: chat2")
            .equal("exit code", 0, 1);

        assert_eq!(v.failures().len(), 2);
        let err = v.finish("chat run filtering").unwrap_err().to_string();
        assert!(err.contains("2 of 4 checks failed"));
        assert!(err.contains("chat3 ran"));
        assert!(err.contains("exit code"));
    }

    #[test]
    fn test_all_passing() {
        let mut v = Verifier::new();
        v.is_true("always", true);
        assert!(v.finish("noop").is_ok());
    }
}
