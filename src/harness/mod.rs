//! Scenario harness: sandboxes, subprocess runs and assertions.

pub mod assert;
pub mod command;
pub mod context;
pub mod fs;
pub mod git;
pub mod mock;
pub mod runner;
pub mod scenario;
pub mod verify;

pub use command::{Command, CommandResult};
pub use context::{Context, ContextSettings};
pub use mock::Mock;
pub use runner::{RunReport, Runner, RunnerOptions, ScenarioStatus};
pub use scenario::{Scenario, ScenarioFilter, Step};
