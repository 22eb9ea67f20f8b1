//! CLI command implementations

pub mod build;
pub mod purge;

pub use build::execute as build;
pub use purge::execute as purge;
