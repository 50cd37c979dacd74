// src/contract/fitting.rs

use std::any::Any;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::Result;

use crate::contract::factory::NodeFactory;
use crate::contract::patchbay::PortId;
use crate::lifecycle::WiringContext;

/// A constructed node instance.
///
/// `open` claims structures on the shared patchbay, `close` releases them;
/// both run while the engine holds the patchbay lock on the node's behalf and
/// receive a [`WiringContext`] valid only for the duration of the call.
///
/// `deps` is re-read by the engine on every reevaluation pass. A fitting may
/// legitimately change its declared dependencies between passes (e.g. after
/// internal state changes); implementations must return the *current* list,
/// and the engine never caches it.
pub trait Fitting: Send + 'static {
    /// Claim patchbay structures. Called exactly once per instance, while the
    /// holder transitions from ready to open.
    fn open(&mut self, ctx: &mut WiringContext<'_>) -> Result<()>;

    /// Release patchbay structures. Called exactly once per instance, while
    /// the holder transitions from open to closed.
    fn close(&mut self, ctx: &mut WiringContext<'_>) -> Result<()>;

    /// Factories this fitting currently depends on.
    fn deps(&self) -> Vec<Arc<dyn NodeFactory>>;

    /// The conventional downstream-connectable endpoint of this node, if it
    /// has one. Single-input consumers use this to wire themselves to their
    /// upstream dependency.
    fn output_port(&self) -> Option<PortId> {
        None
    }

    /// Access the concrete node type behind the trait object.
    fn as_any(&self) -> &dyn Any;

    /// Mutable access to the concrete node type behind the trait object.
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// Shared handle to a constructed fitting.
///
/// The engine hands these out from sibling lookups and top-level queries;
/// cloning is cheap and all clones refer to the same instance. Locking is
/// poison-recovering: a panicking node must not wedge the rest of the
/// pipeline.
#[derive(Clone)]
pub struct FittingHandle {
    inner: Arc<Mutex<Box<dyn Fitting>>>,
}

impl FittingHandle {
    pub(crate) fn new(fitting: Box<dyn Fitting>) -> Self {
        Self {
            inner: Arc::new(Mutex::new(fitting)),
        }
    }

    /// Lock the fitting for direct access.
    ///
    /// Do not hold the guard across calls back into the engine; in
    /// particular, a node must never look up its own fitting.
    pub fn lock(&self) -> MutexGuard<'_, Box<dyn Fitting>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl fmt::Debug for FittingHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FittingHandle").finish()
    }
}
