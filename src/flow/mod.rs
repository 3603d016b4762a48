//! Helpers specific to the `flow` CLI under test.

pub mod binary;
pub mod fixtures;
pub mod plan;
pub mod steps;

pub use binary::find_flow_binary;
pub use steps::Expect;
