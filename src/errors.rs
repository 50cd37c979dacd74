// src/errors.rs

//! Crate-wide error aliases.
//!
//! The engine reports recoverable failures through `anyhow`; this module is
//! the single place to introduce more structured error types if a consumer
//! ever needs to match on them.

pub use anyhow::{Error, Result};
