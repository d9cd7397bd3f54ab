//! CLI command implementations.

pub mod demo;
pub mod history;
pub mod states;
