// src/lifecycle/mod.rs

//! Per-node lifecycle management.
//!
//! - [`holder`] wraps one factory's asynchronous construction and the
//!   instantiating → ready → open → closed state machine (with broken as the
//!   construction-failure terminal).
//! - [`context`] contains the capability objects a node is handed while it is
//!   part of the live pipeline: the per-call [`WiringContext`] for
//!   open/close, and the persistent [`RebuildHandle`] for requesting forced
//!   recreation.

pub mod context;
pub mod holder;

pub use context::{RebuildHandle, WiringContext};
pub use holder::{NodeHolder, NodeState};
