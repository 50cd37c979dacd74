// src/contract/mod.rs

//! Node and resource contracts.
//!
//! - [`factory`] defines what it means to *describe* a pipeline node: a
//!   comparable [`FactoryKey`] plus an async constructor.
//! - [`fitting`] defines what a *constructed* node must support: open,
//!   close, and fresh dependency reporting.
//! - [`patchbay`] is the shared-resource seam: the structure the engine
//!   mutates under exclusive lock, plus an in-memory reference
//!   implementation.
//!
//! Everything else in the crate (lifecycle, engine, reference nodes) is
//! written against these traits; collaborators supply their own
//! implementations.

pub mod factory;
pub mod fitting;
pub mod patchbay;

pub use factory::{BuildFuture, FactoryKey, NodeFactory};
pub use fitting::{Fitting, FittingHandle};
pub use patchbay::{
    lock_patchbay, shared_patchbay, MemoryPatchbay, Patchbay, PortId, SharedPatchbay,
};
