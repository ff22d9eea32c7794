//! kiln - package build orchestrator
//!
//! This library resolves a recipe's dependency graph into a deterministic
//! build plan, builds every node in an isolated environment, writes
//! post-install configuration and verifies the installed result.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Business logic (no I/O operations)
//! - [`infra`] - Infrastructure layer (filesystem, processes, host probing)
//! - [`config`] - Configuration and constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
