// src/nodes/mod.rs

//! Reference node implementations.
//!
//! [`stage`] holds the canonical single-input wiring node that other node
//! types (and the test suite) are built against. Real pipelines supply their
//! own factories; nothing in the engine is specific to these.

pub mod stage;

pub use stage::{Stage, StageFitting};
