pub mod config;
pub mod error;
pub mod flow;
pub mod harness;
pub mod scenarios;
