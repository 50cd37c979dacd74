// src/engine/mod.rs

//! The reconfiguration engine.
//!
//! - [`debounce`] collapses bursts of reevaluation requests into single
//!   trailing runs.
//! - [`reconcile`] owns the graph state and the reevaluation pass: traversal,
//!   delta classification, and the locked commit.
//! - [`PatchEngine`] is the caller-facing facade tying the two together over
//!   a shared patchbay.

pub mod debounce;
mod reconcile;

pub use debounce::{DebounceScheduler, ReevalTrigger, Settled};

use std::sync::{Arc, OnceLock};

use tokio::sync::Mutex as AsyncMutex;

use crate::contract::{FactoryKey, FittingHandle, NodeFactory, SharedPatchbay};
use crate::lifecycle::context::ForcedSet;
use reconcile::EngineState;

/// Incremental dependency-graph reconfiguration engine.
///
/// Callers register root factories; the engine keeps every factory reachable
/// from the roots via `deps()` constructed and open on the shared patchbay,
/// reconciling in debounced passes. All triggers are fire-and-forget: their
/// effects are observable only through the active set and the patchbay's
/// structure once the scheduler settles.
///
/// The engine is cheap to clone; clones share the same state and scheduler.
#[derive(Clone)]
pub struct PatchEngine {
    state: Arc<AsyncMutex<EngineState>>,
    sched: DebounceScheduler,
}

impl PatchEngine {
    /// Create an engine over the given shared patchbay.
    ///
    /// The patchbay clone handed in here is locked only for the commit phase
    /// of each pass; the embedding system keeps its own clone for its
    /// execution context.
    pub fn new(patchbay: SharedPatchbay) -> Self {
        let forced = ForcedSet::default();
        let trigger_cell: Arc<OnceLock<ReevalTrigger>> = Arc::new(OnceLock::new());
        let state = Arc::new(AsyncMutex::new(EngineState::new(
            forced,
            Arc::clone(&trigger_cell),
        )));

        let sched = {
            let state = Arc::clone(&state);
            DebounceScheduler::new(move || {
                let state = Arc::clone(&state);
                let patchbay = Arc::clone(&patchbay);
                async move {
                    state.lock().await.reconcile(&patchbay).await;
                }
            })
        };
        // Nodes reach the scheduler through weak triggers; setting the cell
        // after construction avoids a strong reference cycle.
        let _ = trigger_cell.set(sched.trigger());

        Self { state, sched }
    }

    /// Register a root factory and request a reevaluation pass.
    ///
    /// Registering an already-known root is harmless.
    pub async fn register_root(&self, factory: Arc<dyn NodeFactory>) {
        self.state.lock().await.add_root(factory);
        let _ = self.sched.start();
    }

    /// Remove a root factory and request a reevaluation pass. Nodes only
    /// reachable through this root are closed on the next settled pass.
    pub async fn remove_root(&self, key: &FactoryKey) {
        if self.state.lock().await.remove_root(key) {
            let _ = self.sched.start();
        }
    }

    /// Request a reevaluation pass without changing the root set, e.g. after
    /// a node's declared dependencies changed. Fire-and-forget.
    pub fn reevaluate(&self) {
        let _ = self.sched.start();
    }

    /// Request a reevaluation pass and wait until the pass serving it
    /// completes. Primarily a drain point for tests and shutdown sequencing.
    pub async fn settle(&self) {
        self.sched.start().await;
    }

    /// The fitting currently active for `key`, for top-level callers needing
    /// to read a live node.
    pub async fn fitting(&self, key: &FactoryKey) -> Option<FittingHandle> {
        self.state.lock().await.active_fitting(key)
    }

    /// Sorted snapshot of the currently active factory keys, for diagnostics
    /// and tests.
    pub async fn active_keys(&self) -> Vec<FactoryKey> {
        self.state.lock().await.active_keys()
    }
}
