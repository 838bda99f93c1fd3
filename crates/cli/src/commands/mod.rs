//! CLI subcommands.

pub mod allocation;
pub mod migrate;
pub mod register;
