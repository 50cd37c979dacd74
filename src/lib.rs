// src/lib.rs

//! `repatch`: incremental dependency-graph reconfiguration for
//! continuously-running pipelines.
//!
//! A pipeline's topology is described by *factories*: comparable values
//! identifying nodes that should exist, each able to construct a *fitting*
//! (a live node instance with `open`/`close`/`deps`). Callers register root
//! factories with a [`PatchEngine`]; the engine keeps everything reachable
//! from the roots constructed and wired on a shared [`Patchbay`], computing
//! the minimal delta on every reevaluation pass and committing it under
//! exclusive lock: all closes before any opens, so exclusive sub-resources
//! are free before their replacements claim them.
//!
//! Passes are debounced: any burst of triggers (root registration, a node's
//! rebuild request, an explicit [`PatchEngine::reevaluate`]) collapses into
//! one trailing pass, and idle passes never touch the patchbay lock.
//!
//! What nodes do once connected is out of scope; the engine only decides
//! when they exist and how they are wired.

pub mod contract;
pub mod engine;
pub mod errors;
pub mod lifecycle;
pub mod logging;
pub mod nodes;

pub use contract::{
    lock_patchbay, shared_patchbay, BuildFuture, FactoryKey, Fitting, FittingHandle,
    MemoryPatchbay, NodeFactory, Patchbay, PortId, SharedPatchbay,
};
pub use engine::{DebounceScheduler, PatchEngine, ReevalTrigger, Settled};
pub use lifecycle::{NodeHolder, NodeState, RebuildHandle, WiringContext};
pub use nodes::{Stage, StageFitting};
