//! Command-line surface

pub mod args;
pub mod commands;

pub use args::{BuildArgs, Cli, Commands, PurgeArgs, PurgeScope};
