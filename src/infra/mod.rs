//! Infrastructure layer
//!
//! Handles all I/O operations: filesystem, recipe loading, host probing
//! and external processes. This module is the only place where side effects occur.

pub mod dirs;
pub mod executor;
pub mod filesystem;
pub mod host;
pub mod linkage;
pub mod postinstall;
pub mod process;
pub mod recipes;
pub mod verifier;
