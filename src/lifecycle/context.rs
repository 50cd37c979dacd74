// src/lifecycle/context.rs

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::{Context as _, Result};

use crate::contract::{FactoryKey, FittingHandle, Patchbay, PortId};
use crate::engine::ReevalTrigger;

/// Shared force-rebuild set: factories to recreate unconditionally on the
/// next pass. Lives outside the engine's async state lock so that nodes can
/// add to it synchronously from inside their own `open()`.
pub(crate) type ForcedSet = Arc<Mutex<HashSet<FactoryKey>>>;

pub(crate) fn forced_insert(forced: &ForcedSet, key: FactoryKey) {
    forced
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .insert(key);
}

pub(crate) fn forced_drain(forced: &ForcedSet) -> HashSet<FactoryKey> {
    std::mem::take(&mut *forced.lock().unwrap_or_else(PoisonError::into_inner))
}

/// Capability object handed to a fitting for the duration of one `open()` or
/// `close()` call.
///
/// The context borrows the exclusively-locked patchbay and a lookup view of
/// the fittings visible at this point of the commit, so using it outside the
/// call it was created for is impossible by construction.
pub struct WiringContext<'a> {
    patchbay: &'a mut dyn Patchbay,
    fittings: &'a HashMap<FactoryKey, FittingHandle>,
    rebuild: RebuildHandle,
}

impl<'a> WiringContext<'a> {
    pub(crate) fn new(
        patchbay: &'a mut dyn Patchbay,
        fittings: &'a HashMap<FactoryKey, FittingHandle>,
        rebuild: RebuildHandle,
    ) -> Self {
        Self {
            patchbay,
            fittings,
            rebuild,
        }
    }

    /// Create an edge on the shared patchbay.
    pub fn connect(&mut self, from: &PortId, to: &PortId) -> Result<()> {
        self.patchbay.connect(from, to)
    }

    /// Remove an edge from the shared patchbay.
    pub fn disconnect(&mut self, from: &PortId, to: &PortId) -> Result<()> {
        self.patchbay.disconnect(from, to)
    }

    /// Look up the fitting currently active for another factory.
    ///
    /// Fails with an error if that factory is not active (a parent whose
    /// dependency broke during construction sees that failure here and is
    /// responsible for handling it). Intended use is restricted to factories
    /// the caller declares via its own `deps()`.
    ///
    /// Panics if a node attempts to look up its own fitting: the factory
    /// graph must be acyclic, and self-lookup would deadlock on the node's
    /// own lock.
    pub fn fitting(&self, key: &FactoryKey) -> Result<FittingHandle> {
        assert!(
            *key != *self.rebuild.key(),
            "node '{}' attempted to look up its own fitting",
            key
        );
        self.fittings
            .get(key)
            .cloned()
            .with_context(|| format!("no active node for factory '{key}'"))
    }

    /// The owning node's persistent rebuild capability.
    pub fn rebuild_handle(&self) -> RebuildHandle {
        self.rebuild.clone()
    }
}

/// Persistent capability for a node to request its own forced recreation.
///
/// Handed to the factory at build time and available from the wiring context;
/// clonable and cheap to store. [`RebuildHandle::request_rebuild`] is legal
/// only while the owning holder is open.
#[derive(Clone)]
pub struct RebuildHandle {
    key: FactoryKey,
    forced: ForcedSet,
    trigger: ReevalTrigger,
    open: Arc<AtomicBool>,
}

impl RebuildHandle {
    pub(crate) fn new(
        key: FactoryKey,
        forced: ForcedSet,
        trigger: ReevalTrigger,
        open: Arc<AtomicBool>,
    ) -> Self {
        Self {
            key,
            forced,
            trigger,
            open,
        }
    }

    /// The factory key this handle rebuilds.
    pub fn key(&self) -> &FactoryKey {
        &self.key
    }

    /// Mark the owning factory for unconditional recreation on the next pass
    /// and request a reevaluation. Fire-and-forget: the effect is observable
    /// only through the active set after the scheduler settles.
    ///
    /// Panics if the owning holder is not currently open; requesting a
    /// rebuild of a node that is not part of the live pipeline is a contract
    /// violation.
    pub fn request_rebuild(&self) {
        assert!(
            self.open.load(Ordering::SeqCst),
            "rebuild requested for '{}' while its node is not open",
            self.key
        );
        forced_insert(&self.forced, self.key.clone());
        self.trigger.fire();
    }
}

impl fmt::Debug for RebuildHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RebuildHandle")
            .field("key", &self.key)
            .field("open", &self.open.load(Ordering::SeqCst))
            .finish()
    }
}
