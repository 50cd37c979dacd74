// src/lifecycle/holder.rs

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{bail, Result};
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::contract::{Fitting, FittingHandle, FactoryKey, NodeFactory};
use crate::engine::ReevalTrigger;
use crate::lifecycle::context::{ForcedSet, RebuildHandle, WiringContext};

/// Lifecycle state of one node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Construction is in flight; the fitting is not yet available.
    Instantiating,
    /// Construction finished and the fitting passed contract validation, but
    /// `open()` has not been called yet.
    Ready,
    /// `open()` has been called and `close()` has not.
    Open,
    /// Construction failed (error, panic, or contract violation); the node is
    /// excluded from the active graph.
    Broken,
    /// `close()` has been called; terminal.
    Closed,
}

/// The engine's lifecycle wrapper around one factory's construction and
/// open/closed state.
///
/// Construction runs as a spawned task so independent branches can make
/// progress together; the traversal awaits [`NodeHolder::wait_ready`] before
/// reading the fitting's dependencies, since a just-constructed fitting's
/// `deps()` cannot be known earlier.
pub struct NodeHolder {
    key: FactoryKey,
    state: NodeState,
    fitting: Option<FittingHandle>,
    build: Option<JoinHandle<Result<Box<dyn Fitting>>>>,
    open_flag: Arc<AtomicBool>,
    rebuild: RebuildHandle,
}

impl NodeHolder {
    /// Start constructing a node for `factory`.
    pub(crate) fn spawn(
        factory: &Arc<dyn NodeFactory>,
        forced: ForcedSet,
        trigger: ReevalTrigger,
    ) -> Self {
        let key = factory.key();
        let open_flag = Arc::new(AtomicBool::new(false));
        let rebuild = RebuildHandle::new(key.clone(), forced, trigger, Arc::clone(&open_flag));

        debug!(node = %key, "constructing node");
        let build = tokio::spawn(factory.build(rebuild.clone()));

        Self {
            key,
            state: NodeState::Instantiating,
            fitting: None,
            build: Some(build),
            open_flag,
            rebuild,
        }
    }

    pub fn key(&self) -> &FactoryKey {
        &self.key
    }

    pub fn state(&self) -> NodeState {
        self.state
    }

    /// The constructed fitting, if construction has completed successfully.
    pub fn fitting(&self) -> Option<FittingHandle> {
        self.fitting.clone()
    }

    pub(crate) fn rebuild_handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }

    /// Wait for construction to finish and validate the result.
    ///
    /// Returns `true` if the holder is usable (ready or already open). On
    /// construction failure the holder ends up broken; the failure is logged
    /// and contained here so one broken branch never aborts the pass.
    pub async fn wait_ready(&mut self) -> bool {
        if let Some(build) = self.build.take() {
            debug_assert_eq!(self.state, NodeState::Instantiating);
            match build.await {
                Ok(Ok(fitting)) => match validate_fitting(&self.key, fitting.as_ref()) {
                    Ok(()) => {
                        debug!(node = %self.key, "node constructed and validated");
                        self.fitting = Some(FittingHandle::new(fitting));
                        self.state = NodeState::Ready;
                    }
                    Err(err) => {
                        warn!(node = %self.key, error = %err, "constructed fitting rejected; marking node broken");
                        self.state = NodeState::Broken;
                    }
                },
                Ok(Err(err)) => {
                    warn!(node = %self.key, error = %err, "node construction failed; marking node broken");
                    self.state = NodeState::Broken;
                }
                Err(err) => {
                    error!(node = %self.key, error = %err, "node construction task panicked or was cancelled; marking node broken");
                    self.state = NodeState::Broken;
                }
            }
        }
        matches!(self.state, NodeState::Ready | NodeState::Open)
    }

    /// Current dependencies, read fresh from the fitting.
    pub fn deps_snapshot(&self) -> Vec<Arc<dyn NodeFactory>> {
        self.fitting
            .as_ref()
            .map(|f| f.lock().deps())
            .unwrap_or_default()
    }

    /// Claim patchbay structures for this node.
    ///
    /// Failures from the fitting are logged and swallowed and the holder is
    /// nonetheless treated as open; a failing `open()` can leave the node
    /// half-wired.
    pub(crate) fn open(&mut self, ctx: &mut WiringContext<'_>) {
        debug_assert_eq!(self.state, NodeState::Ready);
        // The open span starts here: a node may legally request its own
        // rebuild from inside `open()`.
        self.open_flag.store(true, Ordering::SeqCst);
        if let Some(fitting) = &self.fitting {
            if let Err(err) = fitting.lock().open(ctx) {
                warn!(node = %self.key, error = %err, "open failed; treating node as open anyway");
            }
        }
        self.state = NodeState::Open;
        debug!(node = %self.key, "node open");
    }

    /// Release patchbay structures for this node.
    ///
    /// Failures are logged and swallowed; the holder always ends closed.
    pub(crate) fn close(&mut self, ctx: &mut WiringContext<'_>) {
        debug_assert_eq!(self.state, NodeState::Open);
        self.open_flag.store(false, Ordering::SeqCst);
        if let Some(fitting) = &self.fitting {
            if let Err(err) = fitting.lock().close(ctx) {
                warn!(node = %self.key, error = %err, "close failed; node is closed regardless");
            }
        }
        self.state = NodeState::Closed;
        debug!(node = %self.key, "node closed");
    }
}

/// Boundary validation of a freshly constructed fitting.
///
/// The trait system guarantees the shape statically; what it cannot rule out
/// is a fitting that lists its own factory among its dependencies, which
/// would make the node self-reachable.
fn validate_fitting(key: &FactoryKey, fitting: &dyn Fitting) -> Result<()> {
    for dep in fitting.deps() {
        if dep.key() == *key {
            bail!("fitting for '{key}' lists itself as a dependency");
        }
    }
    Ok(())
}
