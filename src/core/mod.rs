//! Core business logic module
//!
//! This module contains all business logic for kiln.
//! It has NO I/O operations - those belong in [`crate::infra`].
//!
//! # Submodules
//!
//! - [`recipe`] - Recipe definitions and the recipe store
//! - [`platform`] - Host facts, platform predicates and sysroot selection
//! - [`template`] - `{placeholder}` rendering
//! - [`resolver`] - Dependency resolution into a build plan
//! - [`build_env`] - Per-node build environment construction
//! - [`builder`] - Concurrent build orchestration
//! - [`verify`] - Test procedures and assertion evaluation

pub mod build_env;
pub mod builder;
pub mod platform;
pub mod recipe;
pub mod resolver;
pub mod template;
pub mod verify;
