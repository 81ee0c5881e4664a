//! Foundation types for varex.
//!
//! This crate contains the types shared by all varex crates: the workspace
//! error type, variable-level errors, and the TOML configuration model.

pub mod config;
pub mod error;
